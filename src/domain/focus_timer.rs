use crate::domain::models::{FocusState, TimerSnapshot};
use crate::domain::presentation::progress_fraction;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Duration, Utc};

/// What a timer operation changed; the engine maps this onto side effects
/// (remote notification, arming or cancelling the tick task).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerTransition {
    /// A fresh session was armed from Idle.
    Started { subject: String },
    Resumed,
    Paused,
    Unchanged,
}

/// Local state captured when an end request is issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEnd {
    pub subject: String,
    pub session_started_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: u64,
    pub generation: u64,
}

/// Focus timer state machine. Holds no clock: every operation takes `now`.
#[derive(Debug, Clone)]
pub struct FocusTimer {
    state: FocusState,
    subject: Option<String>,
    /// Running anchor; `now - started_at` is the elapsed time while running.
    started_at: Option<DateTime<Utc>>,
    /// Wall-clock instant the session was first armed.
    session_started_at: Option<DateTime<Utc>>,
    elapsed_seconds: u64,
    tick_armed: bool,
    /// Bumped on every reset; a close reply only applies to its own generation.
    generation: u64,
    fallback_subject: String,
}

impl FocusTimer {
    pub fn new(fallback_subject: impl Into<String>) -> Self {
        Self {
            state: FocusState::Idle,
            subject: None,
            started_at: None,
            session_started_at: None,
            elapsed_seconds: 0,
            tick_armed: false,
            generation: 0,
            fallback_subject: fallback_subject.into(),
        }
    }

    pub fn state(&self) -> FocusState {
        self.state
    }

    pub fn is_tick_armed(&self) -> bool {
        self.tick_armed
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    pub fn reset(&mut self) {
        self.state = FocusState::Idle;
        self.subject = None;
        self.started_at = None;
        self.session_started_at = None;
        self.elapsed_seconds = 0;
        self.tick_armed = false;
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn start(&mut self, subject: &str, now: DateTime<Utc>) -> Result<TimerTransition, InfraError> {
        if self.tick_armed {
            return Ok(TimerTransition::Unchanged);
        }
        if self.state == FocusState::Ended {
            return Err(InfraError::InvalidState(
                "focus session is being closed".to_string(),
            ));
        }

        let anchor = anchor_for(now, self.elapsed_seconds);
        let transition = if self.started_at.is_none() {
            let subject = self.normalize_subject(subject);
            self.subject = Some(subject.clone());
            self.session_started_at = Some(anchor);
            TimerTransition::Started { subject }
        } else {
            TimerTransition::Resumed
        };

        self.started_at = Some(anchor);
        self.tick_armed = true;
        self.state = FocusState::Running;
        Ok(transition)
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> TimerTransition {
        if !self.tick_armed {
            return TimerTransition::Unchanged;
        }
        self.elapsed_seconds = self.elapsed_at(now);
        self.tick_armed = false;
        self.state = FocusState::Paused;
        TimerTransition::Paused
    }

    /// Dispatches on whether a tick is armed rather than on the nominal state.
    pub fn toggle(&mut self, subject: &str, now: DateTime<Utc>) -> Result<TimerTransition, InfraError> {
        if self.tick_armed {
            Ok(self.pause(now))
        } else {
            self.start(subject, now)
        }
    }

    /// Recomputes elapsed time for a periodic tick. `None` once disarmed.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<TimerSnapshot> {
        if !self.tick_armed {
            return None;
        }
        self.elapsed_seconds = self.elapsed_at(now);
        Some(self.snapshot_at(now))
    }

    pub fn begin_end(&mut self, now: DateTime<Utc>) -> Option<PendingEnd> {
        let started_at = self.started_at?;
        if self.state == FocusState::Ended {
            return None;
        }
        self.elapsed_seconds = self.elapsed_at(now);
        self.tick_armed = false;
        self.state = FocusState::Ended;

        Some(PendingEnd {
            subject: self
                .subject
                .clone()
                .unwrap_or_else(|| self.fallback_subject.clone()),
            session_started_at: self.session_started_at.unwrap_or(started_at),
            started_at,
            elapsed_seconds: self.elapsed_seconds,
            generation: self.generation,
        })
    }

    /// Returns false when the timer was reset while the close was in flight;
    /// the current session is then left alone.
    pub fn complete_end(&mut self, generation: u64) -> bool {
        if !self.is_closing(generation) {
            return false;
        }
        self.reset();
        true
    }

    /// Keeps elapsed time and anchor so the close request can be retried.
    pub fn abort_end(&mut self, generation: u64) -> bool {
        if !self.is_closing(generation) {
            return false;
        }
        self.state = FocusState::Paused;
        true
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> TimerSnapshot {
        let elapsed_seconds = self.elapsed_at(now);
        TimerSnapshot {
            state: self.state,
            subject: self.subject.clone(),
            started_at: self.started_at,
            elapsed_seconds,
            progress_fraction: progress_fraction(elapsed_seconds),
            tick_armed: self.tick_armed,
        }
    }

    fn is_closing(&self, generation: u64) -> bool {
        self.state == FocusState::Ended && self.generation == generation
    }

    fn elapsed_at(&self, now: DateTime<Utc>) -> u64 {
        match (self.tick_armed, self.started_at) {
            (true, Some(anchor)) => {
                let millis = (now - anchor).num_milliseconds();
                let derived = if millis <= 0 { 0 } else { (millis / 1000) as u64 };
                derived.max(self.elapsed_seconds)
            }
            _ => self.elapsed_seconds,
        }
    }

    fn normalize_subject(&self, subject: &str) -> String {
        let trimmed = subject.trim();
        if trimmed.is_empty() {
            self.fallback_subject.clone()
        } else {
            trimmed.to_string()
        }
    }
}

fn anchor_for(now: DateTime<Utc>, elapsed_seconds: u64) -> DateTime<Utc> {
    let seconds = i64::try_from(elapsed_seconds).unwrap_or(i64::MAX / 1000);
    Duration::try_seconds(seconds)
        .and_then(|offset| now.checked_sub_signed(offset))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
