use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const UNKNOWN_METHOD_TITLE: &str = "Unknown Method";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimerPhase {
    #[default]
    Work,
    Break,
}

impl TimerPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::Break => "break",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "work" => Some(Self::Work),
            "break" => Some(Self::Break),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConcentrationMethod {
    pub method_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub work_duration: u32,
    pub break_duration: u32,
}

impl ConcentrationMethod {
    /// Rebuilds a catalog entry from an adopted session when the user did not
    /// pick the method on this client (for example after a restart).
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        Self {
            method_id: snapshot.method_id,
            title: display_title(&snapshot.method_title),
            description: None,
            work_duration: snapshot.work_duration_minutes,
            break_duration: snapshot.break_duration_minutes,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_positive_id(self.method_id, "method.method_id")?;
        validate_non_empty(&self.title, "method.title")
    }
}

/// Server-known session state at one point in time. Superseded, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub user_id: i64,
    pub method_id: i64,
    pub method_title: String,
    pub current_phase: TimerPhase,
    pub is_active: bool,
    pub is_paused: bool,
    pub remaining_seconds: u32,
    pub phase_duration_minutes: u32,
    pub work_duration_minutes: u32,
    pub break_duration_minutes: u32,
    pub current_cycle: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub phase_started_at: Option<DateTime<Utc>>,
    pub total_paused_seconds: u32,
    pub elapsed_seconds: u32,
}

impl SessionSnapshot {
    pub fn phase_duration_seconds(&self) -> u32 {
        self.phase_duration_minutes.saturating_mul(60)
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_positive_id(self.user_id, "session.user_id")?;
        validate_positive_id(self.method_id, "session.method_id")?;
        if self.current_cycle == 0 {
            return Err("session.current_cycle must be >= 1".to_string());
        }
        if self.remaining_seconds > self.phase_duration_seconds() {
            return Err(
                "session.remaining_seconds must be <= session.phase_duration_minutes * 60"
                    .to_string(),
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalTimerState {
    pub is_active: bool,
    pub is_paused: bool,
    pub current_phase: TimerPhase,
    pub method_title: String,
    pub remaining_seconds: u32,
    pub total_phase_seconds: u32,
    pub current_cycle: u32,
}

impl Default for LocalTimerState {
    fn default() -> Self {
        Self {
            is_active: false,
            is_paused: false,
            current_phase: TimerPhase::Work,
            method_title: String::new(),
            remaining_seconds: 0,
            total_phase_seconds: 0,
            current_cycle: 1,
        }
    }
}

impl LocalTimerState {
    pub fn idle() -> Self {
        Self::default()
    }

    /// Full projection of an adopted snapshot; every field is replaced.
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        if !snapshot.is_active {
            return Self::idle();
        }
        let total_phase_seconds = snapshot.phase_duration_seconds();
        Self {
            is_active: true,
            is_paused: snapshot.is_paused,
            current_phase: snapshot.current_phase,
            method_title: display_title(&snapshot.method_title),
            remaining_seconds: snapshot.remaining_seconds.min(total_phase_seconds),
            total_phase_seconds,
            current_cycle: snapshot.current_cycle.max(1),
        }
    }

    /// State for a session this client just created: first work phase, full length.
    pub fn fresh_session(snapshot: &SessionSnapshot) -> Self {
        let work_seconds = snapshot.work_duration_minutes.saturating_mul(60);
        Self {
            is_active: true,
            is_paused: false,
            current_phase: TimerPhase::Work,
            method_title: display_title(&snapshot.method_title),
            remaining_seconds: work_seconds,
            total_phase_seconds: work_seconds,
            current_cycle: 1,
        }
    }

    pub fn is_counting_down(&self) -> bool {
        self.is_active && !self.is_paused
    }

    /// Decrements by one second. Returns true once the phase has no time left.
    pub fn tick(&mut self) -> bool {
        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        self.remaining_seconds == 0
    }

    pub fn enter_phase(&mut self, phase: TimerPhase, total_seconds: u32, cycle: u32) {
        self.current_phase = phase;
        self.total_phase_seconds = total_seconds;
        self.remaining_seconds = total_seconds;
        self.current_cycle = cycle.max(1);
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.remaining_seconds > self.total_phase_seconds {
            return Err("timer.remaining_seconds must be <= timer.total_phase_seconds".to_string());
        }
        if !self.is_active && *self != Self::idle() {
            return Err("inactive timer must hold reset defaults".to_string());
        }
        Ok(())
    }
}

fn display_title(title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        UNKNOWN_METHOD_TITLE.to_string()
    } else {
        trimmed.to_string()
    }
}

fn validate_positive_id(value: i64, field_name: &str) -> Result<(), String> {
    if value <= 0 {
        return Err(format!("{field_name} must be > 0"));
    }
    Ok(())
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
