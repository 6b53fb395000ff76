pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::commands::{
    clear_error_impl, clear_notice_impl, complete_phase_impl, get_preferences_impl,
    get_timer_state_impl, initialize_timer_impl, list_methods_impl, save_access_token_impl,
    set_auto_sync_impl, set_iot_delegation_impl, sign_out_impl, start_session_impl,
    stop_session_impl, toggle_pause_impl, AppState, PreferencesResponse, StopSessionResponse,
    TimerStateResponse,
};
pub use application::session_sync::{RetryPolicy, SessionSyncEngine};
pub use application::timer_controller::{
    ControllerConfig, ControllerStatus, PendingAction, StopOutcome, TimerController, TimerUiState,
};
pub use domain::models::{ConcentrationMethod, LocalTimerState, SessionSnapshot, TimerPhase};
pub use domain::phase_policy::PhaseTransitionPolicy;
pub use infrastructure::error::InfraError;
