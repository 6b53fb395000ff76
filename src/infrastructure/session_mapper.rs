use crate::domain::models::{ConcentrationMethod, SessionSnapshot, TimerPhase};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, NaiveDateTime, Utc};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ApiEnvelope<T> {
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(default = "default_success")]
    pub success: bool,
    pub language: Option<String>,
}

fn default_success() -> bool {
    true
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub method_id: i64,
}

/// Session payload shared by `timer/start`, `timer/status`, `timer/pause` and
/// `timer/complete-phase`. The status endpoint omits fields when no session
/// exists, so every field is optional on the wire.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSessionDto {
    pub user_id: Option<i64>,
    pub method_id: Option<i64>,
    pub method_title: Option<String>,
    pub current_phase: Option<String>,
    pub start_time: Option<String>,
    pub pause_start_time: Option<String>,
    pub total_paused_seconds: Option<i64>,
    pub phase_duration_minutes: Option<i64>,
    pub work_duration_minutes: Option<i64>,
    pub break_duration_minutes: Option<i64>,
    #[serde(default)]
    pub is_active: bool,
    pub is_paused: Option<bool>,
    pub remaining_seconds: Option<i64>,
    pub elapsed_seconds: Option<i64>,
    pub phase_start_time: Option<String>,
    pub current_cycle: Option<i64>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConcentrationMethodDto {
    pub method_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub work_duration: i64,
    pub break_duration: i64,
    pub created_at: Option<String>,
}

pub fn decode_session(dto: &ActiveSessionDto) -> Result<SessionSnapshot, InfraError> {
    let phase_duration_minutes =
        non_negative_minutes(dto.phase_duration_minutes, "phaseDurationMinutes")?;
    let work_duration_minutes =
        non_negative_minutes(dto.work_duration_minutes, "workDurationMinutes")?;
    let break_duration_minutes =
        non_negative_minutes(dto.break_duration_minutes, "breakDurationMinutes")?;

    let current_phase = dto
        .current_phase
        .as_deref()
        .and_then(TimerPhase::parse)
        .unwrap_or(TimerPhase::Work);

    let phase_seconds = phase_duration_minutes.saturating_mul(60);
    let remaining_seconds = clamp_seconds(dto.remaining_seconds).min(phase_seconds);

    Ok(SessionSnapshot {
        user_id: dto.user_id.unwrap_or(0),
        method_id: dto.method_id.unwrap_or(0),
        method_title: dto.method_title.clone().unwrap_or_default(),
        current_phase,
        is_active: dto.is_active,
        is_paused: dto.is_paused.unwrap_or(false),
        remaining_seconds,
        phase_duration_minutes,
        work_duration_minutes,
        break_duration_minutes,
        current_cycle: dto
            .current_cycle
            .and_then(|value| u32::try_from(value).ok())
            .unwrap_or(1)
            .max(1),
        started_at: dto.start_time.as_deref().and_then(parse_server_time),
        phase_started_at: dto.phase_start_time.as_deref().and_then(parse_server_time),
        total_paused_seconds: clamp_seconds(dto.total_paused_seconds),
        elapsed_seconds: clamp_seconds(dto.elapsed_seconds),
    })
}

pub fn decode_method(dto: &ConcentrationMethodDto) -> Result<ConcentrationMethod, InfraError> {
    let method = ConcentrationMethod {
        method_id: dto.method_id,
        title: dto.title.trim().to_string(),
        description: dto
            .description
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned),
        work_duration: non_negative_minutes(Some(dto.work_duration), "workDuration")?,
        break_duration: non_negative_minutes(Some(dto.break_duration), "breakDuration")?,
    };
    method.validate().map_err(InfraError::Validation)?;
    Ok(method)
}

fn non_negative_minutes(value: Option<i64>, field_name: &str) -> Result<u32, InfraError> {
    let raw = value.unwrap_or(0);
    u32::try_from(raw)
        .map_err(|_| InfraError::Validation(format!("{field_name} must be >= 0, got {raw}")))
}

fn clamp_seconds(value: Option<i64>) -> u32 {
    value
        .unwrap_or(0)
        .clamp(0, i64::from(u32::MAX))
        .try_into()
        .unwrap_or(0)
}

/// The API emits RFC 3339 timestamps, sometimes without an offset; those are UTC.
fn parse_server_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}
