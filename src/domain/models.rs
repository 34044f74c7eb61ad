use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FocusState {
    #[default]
    Idle,
    Running,
    Paused,
    Ended,
}

impl FocusState {
    pub fn as_str(self) -> &'static str {
        match self {
            FocusState::Idle => "idle",
            FocusState::Running => "running",
            FocusState::Paused => "paused",
            FocusState::Ended => "ended",
        }
    }

    /// Running or Paused: there is local progress that closing would discard.
    pub fn holds_session(self) -> bool {
        matches!(self, FocusState::Running | FocusState::Paused)
    }
}

/// Read-only view of the timer handed to presentation code.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TimerSnapshot {
    pub state: FocusState,
    pub subject: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: u64,
    pub progress_fraction: f64,
    pub tick_armed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndedFocusSession {
    pub subject: String,
    pub session_started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub elapsed_seconds: u64,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedFocusSession {
    pub subject: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub elapsed_seconds: u64,
    pub duration_minutes: i64,
}

impl CachedFocusSession {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.subject, "focus_session.subject")?;
        if self.end_time < self.start_time {
            return Err("focus_session.end_time must be >= focus_session.start_time".to_string());
        }
        if self.duration_minutes < 0 {
            return Err("focus_session.duration_minutes must be >= 0".to_string());
        }
        Ok(())
    }
}

impl From<&EndedFocusSession> for CachedFocusSession {
    fn from(ended: &EndedFocusSession) -> Self {
        Self {
            subject: ended.subject.clone(),
            start_time: ended.session_started_at,
            end_time: ended.ended_at,
            elapsed_seconds: ended.elapsed_seconds,
            duration_minutes: ended.duration_minutes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RemoteFocusStatus {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    #[test]
    fn cached_session_rejects_end_before_start() {
        let cached = CachedFocusSession {
            subject: "Calculus II".to_string(),
            start_time: at("2026-02-16T10:00:00Z"),
            end_time: at("2026-02-16T09:00:00Z"),
            elapsed_seconds: 0,
            duration_minutes: 0,
        };
        assert!(cached.validate().is_err());
    }

    #[test]
    fn cached_session_is_built_from_ended_session() {
        let ended = EndedFocusSession {
            subject: "Linear Algebra".to_string(),
            session_started_at: at("2026-02-16T10:00:00Z"),
            ended_at: at("2026-02-16T11:30:00Z"),
            elapsed_seconds: 5400,
            duration_minutes: 90,
        };
        let cached = CachedFocusSession::from(&ended);

        assert_eq!(cached.subject, "Linear Algebra");
        assert_eq!(cached.duration_minutes, 90);
        assert!(cached.validate().is_ok());
    }

    #[test]
    fn remote_status_tolerates_missing_optional_fields() {
        let status: RemoteFocusStatus =
            serde_json::from_str(r#"{"active": false}"#).expect("parse status");
        assert_eq!(status, RemoteFocusStatus::default());
    }

    #[test]
    fn default_state_is_idle() {
        assert_eq!(FocusState::default(), FocusState::Idle);
        assert_eq!(TimerSnapshot::default().state, FocusState::Idle);
    }

    #[test]
    fn only_running_and_paused_hold_a_session() {
        assert!(FocusState::Running.holds_session());
        assert!(FocusState::Paused.holds_session());
        assert!(!FocusState::Idle.holds_session());
        assert!(!FocusState::Ended.holds_session());
    }
}
