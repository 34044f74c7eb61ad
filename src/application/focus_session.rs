use crate::application::focus_engine::FocusTimerEngine;
use crate::domain::models::{
    CachedFocusSession, EndedFocusSession, FocusState, RemoteFocusStatus, TimerSnapshot,
};
use crate::domain::presentation::completion_message;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::focus_api_client::FocusApiClient;
use crate::infrastructure::session_cache::FocusSessionCacheRepository;
use async_trait::async_trait;
use std::sync::Arc;

/// Asked before an active session is thrown away.
#[async_trait]
pub trait SessionCloseConfirmer: Send + Sync {
    async fn confirm_discard(&self, snapshot: &TimerSnapshot) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusEndSummary {
    pub session: EndedFocusSession,
    pub message: String,
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    Kept,
    Ended(FocusEndSummary),
}

pub struct FocusSessionService<C, R>
where
    C: FocusApiClient + 'static,
    R: FocusSessionCacheRepository,
{
    engine: FocusTimerEngine<C>,
    cache: Arc<R>,
}

impl<C, R> FocusSessionService<C, R>
where
    C: FocusApiClient + 'static,
    R: FocusSessionCacheRepository,
{
    pub fn new(engine: FocusTimerEngine<C>, cache: Arc<R>) -> Self {
        Self { engine, cache }
    }

    pub fn engine(&self) -> &FocusTimerEngine<C> {
        &self.engine
    }

    pub fn open(&self) -> Result<TimerSnapshot, InfraError> {
        self.engine.reset()
    }

    pub fn toggle(&self, subject: &str) -> Result<TimerSnapshot, InfraError> {
        self.engine.toggle(subject)
    }

    pub async fn end(&self) -> Result<Option<FocusEndSummary>, InfraError> {
        let Some(session) = self.engine.end().await? else {
            return Ok(None);
        };

        let cached = match self
            .cache
            .append(&CachedFocusSession::from(&session), session.ended_at)
        {
            Ok(()) => true,
            Err(error) => {
                log::warn!("focus session was saved remotely but not cached locally: {error}");
                false
            }
        };

        Ok(Some(FocusEndSummary {
            message: completion_message(session.duration_minutes),
            session,
            cached,
        }))
    }

    /// Closes the focus view. An idle timer closes straight away; an active
    /// session is only ended when `confirmer` agrees, and stays intact when the
    /// end request fails.
    pub async fn close(
        &self,
        confirmer: &dyn SessionCloseConfirmer,
    ) -> Result<CloseOutcome, InfraError> {
        let snapshot = self.engine.snapshot()?;
        match snapshot.state {
            FocusState::Idle => {
                self.engine.reset()?;
                Ok(CloseOutcome::Closed)
            }
            FocusState::Ended => Ok(CloseOutcome::Kept),
            FocusState::Running | FocusState::Paused => {
                if !confirmer.confirm_discard(&snapshot).await {
                    log::info!("close declined; keeping focus session");
                    return Ok(CloseOutcome::Kept);
                }
                match self.end().await? {
                    Some(summary) => Ok(CloseOutcome::Ended(summary)),
                    None => {
                        self.engine.reset()?;
                        Ok(CloseOutcome::Closed)
                    }
                }
            }
        }
    }

    /// Only reports what the server holds; local state is not rebuilt from it.
    pub async fn reconcile_on_load(&self) -> Option<RemoteFocusStatus> {
        match self.engine.check_remote_session().await {
            Ok(status) => {
                if status.active {
                    log::info!(
                        "active focus session detected subject={}",
                        status.subject.as_deref().unwrap_or("-")
                    );
                }
                Some(status)
            }
            Err(error) => {
                log::warn!("could not check for an active focus session: {error}");
                None
            }
        }
    }

    pub fn history(&self, limit: Option<usize>) -> Result<Vec<CachedFocusSession>, InfraError> {
        let mut sessions = self.cache.list_all()?;
        sessions.reverse();
        if let Some(limit) = limit {
            sessions.truncate(limit);
        }
        Ok(sessions)
    }
}
