use crate::domain::models::SessionSnapshot;
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::timer_api_client::TimerApiClient;
use log::{debug, warn};
use std::sync::Arc;
use tokio::time::{sleep, Duration as TokioDuration};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

/// Network gateway for session operations. Holds no session state.
pub struct SessionSyncEngine<C, S>
where
    C: TimerApiClient,
    S: CredentialStore,
{
    api_client: Arc<C>,
    credential_store: Arc<S>,
    retry_policy: RetryPolicy,
}

impl<C, S> SessionSyncEngine<C, S>
where
    C: TimerApiClient,
    S: CredentialStore,
{
    pub fn new(api_client: Arc<C>, credential_store: Arc<S>) -> Self {
        Self {
            api_client,
            credential_store,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    fn access_token(&self) -> Result<String, InfraError> {
        self.credential_store
            .load_token()?
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| InfraError::Auth("no access token stored; sign in first".to_string()))
    }

    /// `Ok(None)` covers both "no session" and a snapshot that fails validation.
    pub async fn fetch_status(&self) -> Result<Option<SessionSnapshot>, InfraError> {
        let access_token = self.access_token()?;
        let snapshot = self.session_status_with_retry(&access_token).await?;

        let Some(snapshot) = snapshot.filter(|snapshot| snapshot.is_active) else {
            return Ok(None);
        };
        if let Err(reason) = snapshot.validate() {
            warn!("ignoring invalid session status: {reason}");
            return Ok(None);
        }
        Ok(Some(snapshot))
    }

    /// Callers must check `fetch_status` first; the server does not reject
    /// a second session.
    pub async fn start(&self, method_id: i64) -> Result<SessionSnapshot, InfraError> {
        let access_token = self.access_token()?;
        debug!("starting session for method {method_id}");
        let snapshot = self.api_client.start_session(&access_token, method_id).await?;
        require_active(snapshot, "start")
    }

    pub async fn stop(&self) -> Result<(), InfraError> {
        let access_token = self.access_token()?;
        self.api_client.stop_session(&access_token).await
    }

    pub async fn complete_phase(&self) -> Result<SessionSnapshot, InfraError> {
        let access_token = self.access_token()?;
        let snapshot = self.api_client.complete_phase(&access_token).await?;
        require_active(snapshot, "complete phase")
    }

    pub async fn toggle_pause(&self) -> Result<SessionSnapshot, InfraError> {
        let access_token = self.access_token()?;
        let snapshot = self.api_client.pause_session(&access_token).await?;
        require_active(snapshot, "pause")
    }

    async fn session_status_with_retry(
        &self,
        access_token: &str,
    ) -> Result<Option<SessionSnapshot>, InfraError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match self.api_client.session_status(access_token).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(error) if error.is_transient() && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    debug!("session status failed ({error}); retrying in {delay}ms");
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn require_active(snapshot: SessionSnapshot, action: &str) -> Result<SessionSnapshot, InfraError> {
    if !snapshot.is_active {
        return Err(InfraError::Validation(format!(
            "{action} returned an inactive session"
        )));
    }
    snapshot.validate().map_err(InfraError::Validation)?;
    Ok(snapshot)
}
