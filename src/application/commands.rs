use crate::application::bootstrap::bootstrap_workspace;
use crate::application::session_sync::SessionSyncEngine;
use crate::application::timer_controller::{
    ControllerConfig, StopOutcome, TimerController, TimerUiState,
};
use crate::domain::models::{ConcentrationMethod, LocalTimerState};
use crate::infrastructure::config::{load_client_config, ClientConfig};
use crate::infrastructure::credential_store::{CredentialStore, KeyringCredentialStore};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::preference_store::{JsonPreferenceStore, PreferenceStore};
use crate::infrastructure::timer_api_client::{ReqwestTimerApiClient, TimerApiClient};
use chrono::Utc;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub struct AppState<
    C = ReqwestTimerApiClient,
    S = KeyringCredentialStore,
    P = JsonPreferenceStore,
> where
    C: TimerApiClient + 'static,
    S: CredentialStore + 'static,
    P: PreferenceStore + 'static,
{
    config_dir: PathBuf,
    logs_dir: PathBuf,
    api_client: Arc<C>,
    credential_store: Arc<S>,
    preferences: Arc<P>,
    controller: TimerController<C, S, P>,
    log_guard: Mutex<()>,
}

impl AppState {
    /// Desktop wiring: workspace config, keyring token, preferences file.
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        init_logging();
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let client_config =
            load_client_config(&bootstrap.config_dir, |key| std::env::var(key).ok())?;
        let api_client = ReqwestTimerApiClient::new(
            &client_config.api_base_url,
            client_config.request_timeout,
        )?;
        log::info!("timer api base url: {}", api_client.base_url());

        Self::with_collaborators(
            workspace_root,
            &client_config,
            Arc::new(api_client),
            Arc::new(KeyringCredentialStore::default()),
            Arc::new(JsonPreferenceStore::new(bootstrap.config_dir.clone())),
        )
    }
}

impl<C, S, P> AppState<C, S, P>
where
    C: TimerApiClient + 'static,
    S: CredentialStore + 'static,
    P: PreferenceStore + 'static,
{
    pub fn with_collaborators(
        workspace_root: PathBuf,
        client_config: &ClientConfig,
        api_client: Arc<C>,
        credential_store: Arc<S>,
        preferences: Arc<P>,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let engine = SessionSyncEngine::new(api_client.clone(), credential_store.clone());
        let controller = TimerController::new(
            engine,
            preferences.clone(),
            ControllerConfig::from(client_config),
        );

        Ok(Self {
            config_dir: bootstrap.config_dir,
            logs_dir: bootstrap.logs_dir,
            api_client,
            credential_store,
            preferences,
            controller,
            log_guard: Mutex::new(()),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn controller(&self) -> &TimerController<C, S, P> {
        &self.controller
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
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

fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

#[derive(Debug, Clone, Serialize)]
pub struct TimerStateResponse {
    pub timer: LocalTimerState,
    pub ui: TimerUiState,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopSessionResponse {
    pub outcome: StopOutcome,
    pub timer: LocalTimerState,
    pub ui: TimerUiState,
}

fn snapshot_response<C, S, P>(state: &AppState<C, S, P>) -> TimerStateResponse
where
    C: TimerApiClient + 'static,
    S: CredentialStore + 'static,
    P: PreferenceStore + 'static,
{
    TimerStateResponse {
        timer: state.controller.timer_state(),
        ui: state.controller.ui_state(),
    }
}

pub async fn initialize_timer_impl<C, S, P>(
    state: &AppState<C, S, P>,
) -> Result<TimerStateResponse, InfraError>
where
    C: TimerApiClient + 'static,
    S: CredentialStore + 'static,
    P: PreferenceStore + 'static,
{
    let timer = state.controller.initialize().await?;
    if timer.is_active {
        state.log_info(
            "initialize_timer",
            &format!("restored session '{}'", timer.method_title),
        );
    }
    Ok(snapshot_response(state))
}

pub async fn start_session_impl<C, S, P>(
    state: &AppState<C, S, P>,
    method_id: i64,
) -> Result<TimerStateResponse, InfraError>
where
    C: TimerApiClient + 'static,
    S: CredentialStore + 'static,
    P: PreferenceStore + 'static,
{
    if method_id <= 0 {
        return Err(InfraError::Validation("method_id must be > 0".to_string()));
    }
    let method = state.api_client.get_method(method_id).await?;
    let timer = state.controller.start_session(method).await?;
    state.log_info(
        "start_session",
        &format!(
            "method={method_id} phase={} remaining={}s",
            timer.current_phase.as_str(),
            timer.remaining_seconds
        ),
    );
    Ok(snapshot_response(state))
}

pub async fn stop_session_impl<C, S, P>(
    state: &AppState<C, S, P>,
) -> Result<StopSessionResponse, InfraError>
where
    C: TimerApiClient + 'static,
    S: CredentialStore + 'static,
    P: PreferenceStore + 'static,
{
    let outcome = state.controller.stop_session().await?;
    match outcome {
        StopOutcome::StoppedLocallyOutOfSync => {
            state.log_error("stop_session", "server stop failed; session ended locally")
        }
        StopOutcome::AlreadyIdle | StopOutcome::Ignored => {}
        StopOutcome::Stopped | StopOutcome::StoppedLocallyDelegated => {
            state.log_info("stop_session", &format!("{outcome:?}"))
        }
    }
    Ok(StopSessionResponse {
        outcome,
        timer: state.controller.timer_state(),
        ui: state.controller.ui_state(),
    })
}

pub async fn toggle_pause_impl<C, S, P>(
    state: &AppState<C, S, P>,
) -> Result<TimerStateResponse, InfraError>
where
    C: TimerApiClient + 'static,
    S: CredentialStore + 'static,
    P: PreferenceStore + 'static,
{
    let timer = state.controller.toggle_pause().await?;
    state.log_info(
        "toggle_pause",
        if timer.is_paused { "paused" } else { "resumed" },
    );
    Ok(snapshot_response(state))
}

pub async fn complete_phase_impl<C, S, P>(
    state: &AppState<C, S, P>,
) -> Result<TimerStateResponse, InfraError>
where
    C: TimerApiClient + 'static,
    S: CredentialStore + 'static,
    P: PreferenceStore + 'static,
{
    let timer = state.controller.complete_current_phase().await?;
    state.log_info(
        "complete_phase",
        &format!(
            "now {} cycle {}",
            timer.current_phase.as_str(),
            timer.current_cycle
        ),
    );
    Ok(snapshot_response(state))
}

pub fn get_timer_state_impl<C, S, P>(state: &AppState<C, S, P>) -> TimerStateResponse
where
    C: TimerApiClient + 'static,
    S: CredentialStore + 'static,
    P: PreferenceStore + 'static,
{
    snapshot_response(state)
}

pub fn clear_error_impl<C, S, P>(
    state: &AppState<C, S, P>,
) -> Result<TimerStateResponse, InfraError>
where
    C: TimerApiClient + 'static,
    S: CredentialStore + 'static,
    P: PreferenceStore + 'static,
{
    state.controller.clear_error()?;
    Ok(snapshot_response(state))
}

pub fn clear_notice_impl<C, S, P>(
    state: &AppState<C, S, P>,
) -> Result<TimerStateResponse, InfraError>
where
    C: TimerApiClient + 'static,
    S: CredentialStore + 'static,
    P: PreferenceStore + 'static,
{
    state.controller.clear_notice()?;
    Ok(snapshot_response(state))
}

pub async fn list_methods_impl<C, S, P>(
    state: &AppState<C, S, P>,
) -> Result<Vec<ConcentrationMethod>, InfraError>
where
    C: TimerApiClient + 'static,
    S: CredentialStore + 'static,
    P: PreferenceStore + 'static,
{
    let mut methods = state.api_client.list_methods().await?;
    methods.sort_by_key(|method| method.method_id);
    Ok(methods)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreferencesResponse {
    pub iot_enabled: bool,
    pub auto_sync_enabled: bool,
    pub language: String,
}

pub fn get_preferences_impl<C, S, P>(
    state: &AppState<C, S, P>,
) -> Result<PreferencesResponse, InfraError>
where
    C: TimerApiClient + 'static,
    S: CredentialStore + 'static,
    P: PreferenceStore + 'static,
{
    Ok(PreferencesResponse {
        iot_enabled: state.preferences.is_iot_delegation_enabled()?,
        auto_sync_enabled: state.preferences.is_auto_sync_enabled()?,
        language: state.preferences.language()?,
    })
}

/// Takes effect at the next stop or phase flip.
pub fn set_iot_delegation_impl<C, S, P>(
    state: &AppState<C, S, P>,
    enabled: bool,
) -> Result<bool, InfraError>
where
    C: TimerApiClient + 'static,
    S: CredentialStore + 'static,
    P: PreferenceStore + 'static,
{
    state.preferences.set_iot_delegation_enabled(enabled)?;
    state.log_info("set_iot_delegation", &format!("enabled={enabled}"));
    state.preferences.is_iot_delegation_enabled()
}

/// Read by the reconciliation task every period, so it applies mid-session.
pub fn set_auto_sync_impl<C, S, P>(
    state: &AppState<C, S, P>,
    enabled: bool,
) -> Result<bool, InfraError>
where
    C: TimerApiClient + 'static,
    S: CredentialStore + 'static,
    P: PreferenceStore + 'static,
{
    state.preferences.set_auto_sync_enabled(enabled)?;
    state.log_info("set_auto_sync", &format!("enabled={enabled}"));
    state.preferences.is_auto_sync_enabled()
}

pub fn save_access_token_impl<C, S, P>(
    state: &AppState<C, S, P>,
    access_token: String,
) -> Result<(), InfraError>
where
    C: TimerApiClient + 'static,
    S: CredentialStore + 'static,
    P: PreferenceStore + 'static,
{
    if access_token.trim().is_empty() {
        return Err(InfraError::Auth("access token must not be empty".to_string()));
    }
    state.credential_store.save_token(&access_token)?;
    state.log_info("save_access_token", "access token stored");
    Ok(())
}

pub fn sign_out_impl<C, S, P>(state: &AppState<C, S, P>) -> Result<(), InfraError>
where
    C: TimerApiClient + 'static,
    S: CredentialStore + 'static,
    P: PreferenceStore + 'static,
{
    state.credential_store.delete_token()?;
    state.log_info("sign_out", "access token removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{pomodoro, FakeTimerApiClient};
    use crate::application::timer_controller::ControllerStatus;
    use crate::domain::models::TimerPhase;
    use crate::infrastructure::credential_store::InMemoryCredentialStore;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    static NEXT_TEMP_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

    type TestState = AppState<FakeTimerApiClient, InMemoryCredentialStore, JsonPreferenceStore>;

    struct TempWorkspace {
        path: PathBuf,
        api: Arc<FakeTimerApiClient>,
    }

    impl TempWorkspace {
        fn new() -> Self {
            let sequence = NEXT_TEMP_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "focuslearn-command-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp workspace");
            Self {
                path,
                api: Arc::new(FakeTimerApiClient::new(vec![pomodoro()])),
            }
        }

        fn app_state(&self, access_token: Option<&str>) -> TestState {
            let credentials = match access_token {
                Some(token) => InMemoryCredentialStore::with_token(token),
                None => InMemoryCredentialStore::default(),
            };
            let client_config = ClientConfig {
                tick_interval: Duration::from_secs(3_600),
                reconcile_interval: Duration::from_secs(3_600),
                ..ClientConfig::default()
            };
            AppState::with_collaborators(
                self.path.clone(),
                &client_config,
                self.api.clone(),
                Arc::new(credentials),
                Arc::new(JsonPreferenceStore::new(self.path.join("config"))),
            )
            .expect("initialize app state")
        }

        fn command_log(&self) -> String {
            fs::read_to_string(self.path.join("logs").join("commands.log")).unwrap_or_default()
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[tokio::test]
    async fn start_and_stop_session_flow() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state(Some("token"));

        let started = start_session_impl(&state, pomodoro().method_id)
            .await
            .expect("start");
        assert_eq!(started.timer.current_phase, TimerPhase::Work);
        assert_eq!(started.timer.remaining_seconds, 1_500);

        let stopped = stop_session_impl(&state).await.expect("stop");
        assert_eq!(stopped.outcome, StopOutcome::Stopped);
        assert!(!stopped.timer.is_active);
        assert_eq!(workspace.api.stop_calls.load(Ordering::SeqCst), 1);

        let log = workspace.command_log();
        assert!(log.contains("\"command\":\"start_session\""));
        assert!(log.contains("\"command\":\"stop_session\""));
    }

    #[tokio::test]
    async fn start_without_token_is_auth_error() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state(None);

        let error = start_session_impl(&state, pomodoro().method_id)
            .await
            .expect_err("no token");
        assert!(matches!(error, InfraError::Auth(_)));
        let message = state.command_error("start_session", &error);
        assert!(message.contains("authentication required"));
        assert!(workspace.command_log().contains("\"level\":\"error\""));
    }

    #[tokio::test]
    async fn start_rejects_unknown_method() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state(Some("token"));

        assert!(start_session_impl(&state, 0).await.is_err());
        assert!(start_session_impl(&state, 77).await.is_err());
        assert_eq!(workspace.api.start_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn iot_preference_is_persisted_and_gates_stop() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state(Some("token"));
        start_session_impl(&state, pomodoro().method_id)
            .await
            .expect("start");

        let defaults = get_preferences_impl(&state).expect("read prefs");
        assert!(!defaults.iot_enabled);
        assert!(defaults.auto_sync_enabled);
        assert_eq!(defaults.language, "en");

        assert!(set_iot_delegation_impl(&state, true).expect("enable"));
        assert!(get_preferences_impl(&state).expect("read prefs").iot_enabled);
        let raw = fs::read_to_string(workspace.path.join("config").join("preferences.json"))
            .expect("read prefs");
        assert!(raw.contains("\"iotEnabled\": true"));

        let stopped = stop_session_impl(&state).await.expect("stop");
        assert_eq!(stopped.outcome, StopOutcome::StoppedLocallyDelegated);
        assert_eq!(workspace.api.stop_calls.load(Ordering::SeqCst), 0);
        assert!(stopped.ui.notice.is_some());

        let cleared = clear_notice_impl(&state).expect("clear notice");
        assert!(cleared.ui.notice.is_none());
    }

    #[tokio::test]
    async fn token_commands_store_and_remove_credentials() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state(None);

        assert!(save_access_token_impl(&state, "  ".to_string()).is_err());
        save_access_token_impl(&state, "abc".to_string()).expect("save token");
        initialize_timer_impl(&state).await.expect("initialize");
        assert_eq!(workspace.api.status_calls.load(Ordering::SeqCst), 1);

        sign_out_impl(&state).expect("sign out");
        let response = initialize_timer_impl(&state).await.expect("initialize");
        assert!(response.ui.notice.is_some());
        assert_eq!(workspace.api.status_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn auto_sync_preference_is_persisted() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state(None);

        assert!(!set_auto_sync_impl(&state, false).expect("disable"));
        let raw = fs::read_to_string(workspace.path.join("config").join("preferences.json"))
            .expect("read prefs");
        assert!(raw.contains("\"autoSyncEnabled\": false"));
        let preferences = get_preferences_impl(&state).expect("read prefs");
        assert!(!preferences.auto_sync_enabled);
        assert!(!preferences.iot_enabled);

        assert!(set_auto_sync_impl(&state, true).expect("enable"));
        assert!(workspace.command_log().contains("\"command\":\"set_auto_sync\""));
    }

    #[tokio::test]
    async fn list_methods_returns_catalog() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state(None);
        let methods = list_methods_impl(&state).await.expect("list");
        assert_eq!(methods, vec![pomodoro()]);
    }

    #[tokio::test]
    async fn pause_and_complete_phase_commands() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state(Some("token"));

        assert!(toggle_pause_impl(&state).await.is_err());
        let cleared = clear_error_impl(&state).expect("clear error");
        assert!(cleared.ui.error.is_none());

        start_session_impl(&state, pomodoro().method_id)
            .await
            .expect("start");
        let ui_updates = state.controller().subscribe_ui();
        let paused = toggle_pause_impl(&state).await.expect("pause");
        assert!(paused.timer.is_paused);
        assert_eq!(ui_updates.borrow().status, ControllerStatus::Paused);

        let completed = complete_phase_impl(&state).await.expect("complete");
        assert_eq!(completed.timer.current_phase, TimerPhase::Break);
        assert_eq!(get_timer_state_impl(&state).timer, completed.timer);
        state.controller().shutdown().expect("shutdown");
    }
}
