use crate::application::bootstrap::{bootstrap_workspace, BootstrapResult};
use crate::application::focus_engine::{FocusTimerEngine, RetryPolicy};
use crate::application::focus_session::{
    CloseOutcome, FocusEndSummary, FocusSessionService, SessionCloseConfirmer,
};
use crate::domain::models::{CachedFocusSession, RemoteFocusStatus, TimerSnapshot};
use crate::domain::presentation::{format_clock, ring_offset};
use crate::infrastructure::config::FocusConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::focus_api_client::{FocusApiClient, ReqwestFocusApiClient};
use crate::infrastructure::session_cache::SqliteFocusSessionCache;
use chrono::Utc;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

pub struct AppState<C = ReqwestFocusApiClient>
where
    C: FocusApiClient + 'static,
{
    workspace_root: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    config: FocusConfig,
    service: FocusSessionService<C, SqliteFocusSessionCache>,
    log_guard: Mutex<()>,
}

impl AppState<ReqwestFocusApiClient> {
    pub fn new(workspace_root: PathBuf, server_override: Option<&str>) -> Result<Self, InfraError> {
        Self::with_lookup(workspace_root, server_override, |key| std::env::var(key).ok())
    }

    /// Precedence for the server URL: `server_override`, then `lookup`, then
    /// `config/app.json`.
    pub fn with_lookup<F>(
        workspace_root: PathBuf,
        server_override: Option<&str>,
        lookup: F,
    ) -> Result<Self, InfraError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let mut config = bootstrap.config.clone().apply_overrides(lookup)?;
        if let Some(server) = server_override.map(str::trim).filter(|value| !value.is_empty()) {
            config.server_base_url = server.to_string();
            config.validate()?;
        }

        let client = ReqwestFocusApiClient::new(&config.server_base_url, config.request_timeout())?;
        Ok(Self::assemble(bootstrap, config, Arc::new(client)))
    }
}

impl<C> AppState<C>
where
    C: FocusApiClient + 'static,
{
    pub fn with_client(workspace_root: PathBuf, client: Arc<C>) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let config = bootstrap.config.clone();
        Ok(Self::assemble(bootstrap, config, client))
    }

    fn assemble(bootstrap: BootstrapResult, config: FocusConfig, client: Arc<C>) -> Self {
        let engine = FocusTimerEngine::new(client, config.default_subject.clone())
            .with_tick_interval(config.tick_interval())
            .with_retry_policy(RetryPolicy::from(&config.end_retry));
        let cache = Arc::new(SqliteFocusSessionCache::new(&bootstrap.database_path));

        Self {
            workspace_root: bootstrap.workspace_root,
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            config,
            service: FocusSessionService::new(engine, cache),
            log_guard: Mutex::new(()),
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn config(&self) -> &FocusConfig {
        &self.config
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerSnapshot> {
        self.service.engine().subscribe()
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        log::info!("{command}: {message}");
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        log::error!("{command}: {message}");
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FocusStateResponse {
    pub state: String,
    pub subject: Option<String>,
    pub started_at: Option<String>,
    pub elapsed_seconds: u64,
    pub clock: String,
    pub progress_fraction: f64,
    pub ring_offset: f64,
    pub tick_armed: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OpenFocusResponse {
    pub timer: FocusStateResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteFocusStatus>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EndFocusResponse {
    pub subject: String,
    pub duration_minutes: i64,
    pub elapsed_seconds: u64,
    pub message: String,
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CloseFocusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended: Option<EndFocusResponse>,
}

pub async fn open_focus_impl<C>(state: &AppState<C>) -> Result<OpenFocusResponse, InfraError>
where
    C: FocusApiClient + 'static,
{
    let snapshot = state.service.open()?;
    let remote = state.service.reconcile_on_load().await;
    let message = match remote.as_ref() {
        Some(status) if status.active => "opened focus timer; server reports an active session",
        Some(_) => "opened focus timer",
        None => "opened focus timer; server status unavailable",
    };
    state.log_info("open_focus", message);

    Ok(OpenFocusResponse {
        timer: to_focus_state_response(&snapshot, state.config.ring_radius),
        remote,
    })
}

pub fn toggle_focus_impl<C>(
    state: &AppState<C>,
    subject: Option<String>,
) -> Result<FocusStateResponse, InfraError>
where
    C: FocusApiClient + 'static,
{
    let subject = subject.unwrap_or_default();
    let snapshot = state.service.toggle(&subject)?;
    state.log_info(
        "toggle_focus",
        &format!(
            "state={} elapsed_seconds={}",
            snapshot.state.as_str(),
            snapshot.elapsed_seconds
        ),
    );
    Ok(to_focus_state_response(&snapshot, state.config.ring_radius))
}

pub fn reset_focus_impl<C>(state: &AppState<C>) -> Result<FocusStateResponse, InfraError>
where
    C: FocusApiClient + 'static,
{
    let snapshot = state.service.open()?;
    state.log_info("reset_focus", "reset focus timer");
    Ok(to_focus_state_response(&snapshot, state.config.ring_radius))
}

pub fn get_focus_state_impl<C>(state: &AppState<C>) -> Result<FocusStateResponse, InfraError>
where
    C: FocusApiClient + 'static,
{
    let snapshot = state.service.engine().snapshot()?;
    Ok(to_focus_state_response(&snapshot, state.config.ring_radius))
}

pub async fn end_focus_impl<C>(state: &AppState<C>) -> Result<Option<EndFocusResponse>, InfraError>
where
    C: FocusApiClient + 'static,
{
    match state.service.end().await? {
        Some(summary) => {
            state.log_info(
                "end_focus",
                &format!(
                    "ended subject={} duration_minutes={}",
                    summary.session.subject, summary.session.duration_minutes
                ),
            );
            Ok(Some(to_end_focus_response(summary)))
        }
        None => {
            state.log_info("end_focus", "no active focus session");
            Ok(None)
        }
    }
}

pub async fn close_focus_impl<C>(
    state: &AppState<C>,
    confirmer: &dyn SessionCloseConfirmer,
) -> Result<CloseFocusResponse, InfraError>
where
    C: FocusApiClient + 'static,
{
    let response = match state.service.close(confirmer).await? {
        CloseOutcome::Closed => CloseFocusResponse {
            status: "closed".to_string(),
            ended: None,
        },
        CloseOutcome::Kept => CloseFocusResponse {
            status: "kept".to_string(),
            ended: None,
        },
        CloseOutcome::Ended(summary) => CloseFocusResponse {
            status: "ended".to_string(),
            ended: Some(to_end_focus_response(summary)),
        },
    };
    state.log_info("close_focus", &format!("status={}", response.status));
    Ok(response)
}

pub async fn focus_status_impl<C>(state: &AppState<C>) -> Result<RemoteFocusStatus, InfraError>
where
    C: FocusApiClient + 'static,
{
    let status = state.service.engine().check_remote_session().await?;
    state.log_info("focus_status", &format!("active={}", status.active));
    Ok(status)
}

pub fn list_focus_history_impl<C>(
    state: &AppState<C>,
    limit: Option<usize>,
) -> Result<Vec<CachedFocusSession>, InfraError>
where
    C: FocusApiClient + 'static,
{
    state.service.history(limit)
}

pub fn to_focus_state_response(snapshot: &TimerSnapshot, ring_radius: f64) -> FocusStateResponse {
    FocusStateResponse {
        state: snapshot.state.as_str().to_string(),
        subject: snapshot.subject.clone(),
        started_at: snapshot.started_at.map(|value| value.to_rfc3339()),
        elapsed_seconds: snapshot.elapsed_seconds,
        clock: format_clock(snapshot.elapsed_seconds),
        progress_fraction: snapshot.progress_fraction,
        ring_offset: ring_offset(snapshot.progress_fraction, ring_radius),
        tick_armed: snapshot.tick_armed,
    }
}

fn to_end_focus_response(summary: FocusEndSummary) -> EndFocusResponse {
    EndFocusResponse {
        subject: summary.session.subject,
        duration_minutes: summary.session.duration_minutes,
        elapsed_seconds: summary.session.elapsed_seconds,
        message: summary.message,
        cached: summary.cached,
    }
}
