use crate::domain::models::{ConcentrationMethod, SessionSnapshot};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::session_mapper::{
    decode_method, decode_session, ActiveSessionDto, ApiEnvelope, ConcentrationMethodDto,
    StartSessionRequest,
};
use async_trait::async_trait;
use log::warn;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

#[async_trait]
pub trait TimerApiClient: Send + Sync {
    async fn start_session(
        &self,
        access_token: &str,
        method_id: i64,
    ) -> Result<SessionSnapshot, InfraError>;

    /// `Ok(None)` when the server holds no session for the user.
    async fn session_status(&self, access_token: &str)
    -> Result<Option<SessionSnapshot>, InfraError>;

    /// Toggles the server-side pause flag and returns the resulting session.
    async fn pause_session(&self, access_token: &str) -> Result<SessionSnapshot, InfraError>;

    async fn stop_session(&self, access_token: &str) -> Result<(), InfraError>;

    async fn complete_phase(&self, access_token: &str) -> Result<SessionSnapshot, InfraError>;

    async fn list_methods(&self) -> Result<Vec<ConcentrationMethod>, InfraError>;

    async fn get_method(&self, method_id: i64) -> Result<ConcentrationMethod, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTimerApiClient {
    client: Client,
    base_url: Url,
}

impl ReqwestTimerApiClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, InfraError> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|error| InfraError::InvalidConfig(format!("invalid api base url: {error}")))?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(
                "api base url cannot be a base".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| {
                InfraError::InvalidConfig(format!("http client setup failed: {error}"))
            })?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("api base url cannot be a base".to_string())
            })?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    fn ensure_token(access_token: &str) -> Result<(), InfraError> {
        if access_token.trim().is_empty() {
            return Err(InfraError::Auth("access token must not be empty".to_string()));
        }
        Ok(())
    }

    async fn send<T: DeserializeOwned>(
        request: reqwest::RequestBuilder,
        action: &str,
    ) -> Result<Option<T>, InfraError> {
        let response = request
            .send()
            .await
            .map_err(|error| InfraError::Network(format!("{action} failed: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| {
                InfraError::Network(format!("failed reading {action} response: {error}"))
            })?;

        decode_envelope(status, &body, action)
    }
}

/// Maps one HTTP exchange onto the envelope contract shared by every endpoint.
pub fn decode_envelope<T: DeserializeOwned>(
    status: StatusCode,
    body: &str,
    action: &str,
) -> Result<Option<T>, InfraError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(InfraError::Auth(format!(
            "{action} rejected: http {}",
            status.as_u16()
        )));
    }

    if !status.is_success() {
        let message = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(body)
            .ok()
            .and_then(|envelope| envelope.message)
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| body.trim().to_string());
        return Err(InfraError::Server {
            code: status.as_u16(),
            message: format!("{action}: {message}"),
        });
    }

    if body.trim().is_empty() {
        return Ok(None);
    }

    let envelope: ApiEnvelope<T> = serde_json::from_str(body).map_err(|error| {
        InfraError::Validation(format!("invalid {action} payload: {error}; body={body}"))
    })?;

    if !envelope.success {
        return Err(InfraError::Server {
            code: status.as_u16(),
            message: format!(
                "{action}: {}",
                envelope.message.unwrap_or_else(|| "request was not successful".to_string())
            ),
        });
    }

    Ok(envelope.data)
}

fn require_session(
    data: Option<ActiveSessionDto>,
    action: &str,
) -> Result<SessionSnapshot, InfraError> {
    let dto = data.ok_or_else(|| {
        InfraError::Validation(format!("{action} response did not include a session"))
    })?;
    decode_session(&dto)
}

/// A status payload that cannot be decoded counts as no session.
fn status_snapshot(data: Option<ActiveSessionDto>) -> Option<SessionSnapshot> {
    let dto = data.filter(|dto| dto.is_active)?;
    match decode_session(&dto) {
        Ok(snapshot) => Some(snapshot),
        Err(error) => {
            warn!("ignoring undecodable session status: {error}");
            None
        }
    }
}

#[async_trait]
impl TimerApiClient for ReqwestTimerApiClient {
    async fn start_session(
        &self,
        access_token: &str,
        method_id: i64,
    ) -> Result<SessionSnapshot, InfraError> {
        Self::ensure_token(access_token)?;
        let request = self
            .client
            .post(self.endpoint(&["timer", "start"])?)
            .bearer_auth(access_token)
            .json(&StartSessionRequest { method_id });
        let data = Self::send::<ActiveSessionDto>(request, "start session").await?;
        require_session(data, "start session")
    }

    async fn session_status(
        &self,
        access_token: &str,
    ) -> Result<Option<SessionSnapshot>, InfraError> {
        Self::ensure_token(access_token)?;
        let request = self
            .client
            .get(self.endpoint(&["timer", "status"])?)
            .bearer_auth(access_token);
        let data = match Self::send::<ActiveSessionDto>(request, "session status").await {
            Ok(data) => data,
            Err(InfraError::Server { code: 404, .. }) => None,
            Err(error) => return Err(error),
        };
        Ok(status_snapshot(data))
    }

    async fn pause_session(&self, access_token: &str) -> Result<SessionSnapshot, InfraError> {
        Self::ensure_token(access_token)?;
        let request = self
            .client
            .post(self.endpoint(&["timer", "pause"])?)
            .bearer_auth(access_token);
        let data = Self::send::<ActiveSessionDto>(request, "pause session").await?;
        require_session(data, "pause session")
    }

    async fn stop_session(&self, access_token: &str) -> Result<(), InfraError> {
        Self::ensure_token(access_token)?;
        let request = self
            .client
            .post(self.endpoint(&["timer", "stop"])?)
            .bearer_auth(access_token);
        Self::send::<serde_json::Value>(request, "stop session").await?;
        Ok(())
    }

    async fn complete_phase(&self, access_token: &str) -> Result<SessionSnapshot, InfraError> {
        Self::ensure_token(access_token)?;
        let request = self
            .client
            .post(self.endpoint(&["timer", "complete-phase"])?)
            .bearer_auth(access_token);
        let data = Self::send::<ActiveSessionDto>(request, "complete phase").await?;
        require_session(data, "complete phase")
    }

    async fn list_methods(&self) -> Result<Vec<ConcentrationMethod>, InfraError> {
        let request = self.client.get(self.endpoint(&["concentrationmethods"])?);
        let data = Self::send::<Vec<ConcentrationMethodDto>>(request, "list methods").await?;
        data.unwrap_or_default().iter().map(decode_method).collect()
    }

    async fn get_method(&self, method_id: i64) -> Result<ConcentrationMethod, InfraError> {
        let id = method_id.to_string();
        let request = self
            .client
            .get(self.endpoint(&["concentrationmethods", &id])?);
        let data = Self::send::<ConcentrationMethodDto>(request, "get method").await?;
        let dto = data.ok_or_else(|| {
            InfraError::Validation(format!("method {method_id} response did not include data"))
        })?;
        decode_method(&dto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_extend_base_path() {
        let client =
            ReqwestTimerApiClient::new("http://127.0.0.1:5000/api/", Duration::from_secs(5))
                .expect("client");
        let url = client.endpoint(&["timer", "complete-phase"]).expect("endpoint");
        assert_eq!(url.as_str(), "http://127.0.0.1:5000/api/timer/complete-phase");

        let client = ReqwestTimerApiClient::new("http://localhost/api", Duration::from_secs(5))
            .expect("client");
        let url = client.endpoint(&["concentrationmethods", "7"]).expect("endpoint");
        assert_eq!(url.as_str(), "http://localhost/api/concentrationmethods/7");
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let result = ReqwestTimerApiClient::new("not a url", Duration::from_secs(5));
        assert!(matches!(result, Err(InfraError::InvalidConfig(_))));
    }

    #[test]
    fn unauthorized_maps_to_auth_error() {
        let result = decode_envelope::<ActiveSessionDto>(StatusCode::UNAUTHORIZED, "", "status");
        assert!(matches!(result, Err(InfraError::Auth(_))));
    }

    #[test]
    fn server_error_prefers_envelope_message() {
        let body = r#"{"data": null, "message": "session already active", "success": false}"#;
        let error = decode_envelope::<ActiveSessionDto>(StatusCode::CONFLICT, body, "start session")
            .expect_err("conflict");
        match error {
            InfraError::Server { code, message } => {
                assert_eq!(code, 409);
                assert!(message.contains("session already active"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unsuccessful_envelope_with_ok_status_is_server_error() {
        let body = r#"{"data": null, "message": "method not found", "success": false}"#;
        let result = decode_envelope::<ActiveSessionDto>(StatusCode::OK, body, "start session");
        assert!(matches!(result, Err(InfraError::Server { code: 200, .. })));
    }

    #[test]
    fn malformed_body_is_validation_error() {
        let result = decode_envelope::<ActiveSessionDto>(StatusCode::OK, "{not json", "status");
        assert!(matches!(result, Err(InfraError::Validation(_))));
    }

    #[test]
    fn empty_success_body_has_no_data() {
        let result = decode_envelope::<serde_json::Value>(StatusCode::OK, "  ", "stop session")
            .expect("empty body");
        assert!(result.is_none());
    }

    #[test]
    fn undecodable_status_counts_as_no_session() {
        let broken = ActiveSessionDto {
            is_active: true,
            work_duration_minutes: Some(-5),
            ..ActiveSessionDto::default()
        };
        assert!(status_snapshot(Some(broken)).is_none());

        let inactive = ActiveSessionDto::default();
        assert!(status_snapshot(Some(inactive)).is_none());
        assert!(status_snapshot(None).is_none());

        let running = ActiveSessionDto {
            is_active: true,
            method_id: Some(4),
            current_phase: Some("Work".to_string()),
            phase_duration_minutes: Some(25),
            work_duration_minutes: Some(25),
            break_duration_minutes: Some(5),
            remaining_seconds: Some(600),
            ..ActiveSessionDto::default()
        };
        let snapshot = status_snapshot(Some(running)).expect("decoded session");
        assert_eq!(snapshot.remaining_seconds, 600);
    }

    #[test]
    fn require_session_rejects_missing_data() {
        let result = require_session(None, "complete phase");
        assert!(matches!(result, Err(InfraError::Validation(_))));
    }
}
