use crate::application::local_clock::{ActiveTasks, PeriodicTask};
use crate::application::session_sync::SessionSyncEngine;
use crate::domain::models::{ConcentrationMethod, LocalTimerState, SessionSnapshot};
use crate::domain::phase_policy::{PhaseTransitionPolicy, TransitionReporting};
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::preference_store::PreferenceStore;
use crate::infrastructure::timer_api_client::TimerApiClient;
use log::{debug, info, warn};
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;

const SESSION_ALREADY_ACTIVE: &str = "a session is already active; stop it before starting another";
const NO_ACTIVE_SESSION: &str = "no active session";
const NOTICE_STOPPED: &str = "Session stopped.";
const NOTICE_STOPPED_DELEGATED: &str = "Stopped locally; the IoT device continues recording.";
const NOTICE_STOPPED_OUT_OF_SYNC: &str = "Stopped locally; the server may be out of sync.";
const NOTICE_ENDED_REMOTELY: &str = "The session is no longer active on the server.";
const NOTICE_COMPLETION_RETRY: &str =
    "Phase completion was not recorded; it will be retried on the next sync.";
const NOTICE_COMPLETION_DROPPED: &str =
    "Phase completion was rejected by the server; the timer will follow the server state.";
const NOTICE_STATUS_UNAVAILABLE: &str = "Could not check for a running session.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    pub tick_interval: Duration,
    pub reconcile_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            reconcile_interval: Duration::from_secs(30),
        }
    }
}

impl From<&ClientConfig> for ControllerConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            tick_interval: config.tick_interval,
            reconcile_interval: config.reconcile_interval,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingAction {
    Restoring,
    Starting,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "action", rename_all = "snake_case")]
pub enum ControllerStatus {
    #[default]
    Idle,
    Loading(PendingAction),
    Running,
    Paused,
}

impl ControllerStatus {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

/// Read-only record for the presentation layer. `error` is user-actionable,
/// `notice` is informational; both stay until cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimerUiState {
    pub status: ControllerStatus,
    pub is_loading: bool,
    pub error: Option<String>,
    pub notice: Option<String>,
    pub selected_method: Option<ConcentrationMethod>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    StoppedLocallyDelegated,
    StoppedLocallyOutOfSync,
    AlreadyIdle,
    /// A start or restore was in flight.
    Ignored,
}

/// Identifies the local state a request was issued against. A response is
/// applied only if no structural transition happened since and no newer
/// response was applied first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotTicket {
    pub epoch: u64,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    Unchanged,
    Counted,
    Flipped,
    ReportCompletion(SnapshotTicket),
}

#[derive(Debug)]
struct ControllerCore {
    status: ControllerStatus,
    timer: LocalTimerState,
    method: Option<ConcentrationMethod>,
    ui: TimerUiState,
    epoch: u64,
    next_seq: u64,
    last_applied_seq: u64,
    completion_pending: bool,
    completion_in_flight: Option<u64>,
    tasks: ActiveTasks,
}

impl ControllerCore {
    fn new(tick_interval: Duration) -> Self {
        Self {
            status: ControllerStatus::Idle,
            timer: LocalTimerState::idle(),
            method: None,
            ui: TimerUiState::default(),
            epoch: 0,
            next_seq: 0,
            last_applied_seq: 0,
            completion_pending: false,
            completion_in_flight: None,
            tasks: ActiveTasks::new(tick_interval),
        }
    }

    fn begin_transition(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
    }

    fn issue_ticket(&mut self) -> SnapshotTicket {
        self.next_seq += 1;
        SnapshotTicket {
            epoch: self.epoch,
            seq: self.next_seq,
        }
    }

    fn accepts(&self, ticket: SnapshotTicket) -> bool {
        ticket.epoch == self.epoch && ticket.seq > self.last_applied_seq
    }

    /// Cancels both periodic tasks in the same critical section that zeroes
    /// the state, so no tick can land on a stopped session.
    fn reset_to_idle(&mut self) {
        self.tasks.cancel_all();
        self.status = ControllerStatus::Idle;
        self.timer = LocalTimerState::idle();
        self.method = None;
        self.completion_pending = false;
        self.completion_in_flight = None;
        self.begin_transition();
    }
}

struct Inner<C, S, P>
where
    C: TimerApiClient + 'static,
    S: CredentialStore + 'static,
    P: PreferenceStore + 'static,
{
    engine: SessionSyncEngine<C, S>,
    preferences: Arc<P>,
    policy: PhaseTransitionPolicy,
    config: ControllerConfig,
    core: Mutex<ControllerCore>,
    timer_tx: watch::Sender<LocalTimerState>,
    ui_tx: watch::Sender<TimerUiState>,
    weak_self: Weak<Inner<C, S, P>>,
}

/// Owns the session state machine (Idle, Loading, Running, Paused). Every
/// mutation goes through one mutex; network calls happen outside it and their
/// results are re-checked against a `SnapshotTicket` before being applied.
pub struct TimerController<C, S, P>
where
    C: TimerApiClient + 'static,
    S: CredentialStore + 'static,
    P: PreferenceStore + 'static,
{
    inner: Arc<Inner<C, S, P>>,
}

impl<C, S, P> Clone for TimerController<C, S, P>
where
    C: TimerApiClient + 'static,
    S: CredentialStore + 'static,
    P: PreferenceStore + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C, S, P> TimerController<C, S, P>
where
    C: TimerApiClient + 'static,
    S: CredentialStore + 'static,
    P: PreferenceStore + 'static,
{
    pub fn new(
        engine: SessionSyncEngine<C, S>,
        preferences: Arc<P>,
        config: ControllerConfig,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak_self| Inner {
            engine,
            preferences,
            policy: PhaseTransitionPolicy::new(),
            config,
            core: Mutex::new(ControllerCore::new(config.tick_interval)),
            timer_tx: watch::channel(LocalTimerState::idle()).0,
            ui_tx: watch::channel(TimerUiState::default()).0,
            weak_self: weak_self.clone(),
        });
        Self { inner }
    }

    /// Startup recovery: adopts a session the server already runs.
    pub async fn initialize(&self) -> Result<LocalTimerState, InfraError> {
        self.inner.initialize().await
    }

    pub async fn start_session(
        &self,
        method: ConcentrationMethod,
    ) -> Result<LocalTimerState, InfraError> {
        self.inner.start_session(method).await
    }

    /// Always ends the local session; server failures only change the notice.
    pub async fn stop_session(&self) -> Result<StopOutcome, InfraError> {
        self.inner.stop_session().await
    }

    pub async fn toggle_pause(&self) -> Result<LocalTimerState, InfraError> {
        self.inner.toggle_pause().await
    }

    pub async fn complete_current_phase(&self) -> Result<LocalTimerState, InfraError> {
        self.inner.complete_current_phase().await
    }

    /// Drives one clock tick and waits for any completion report it triggers.
    /// The background clock does the same without waiting.
    pub async fn tick(&self) -> Result<LocalTimerState, InfraError> {
        if let TickOutcome::ReportCompletion(ticket) = self.inner.advance_clock()? {
            self.inner.report_phase_completion(ticket).await;
        }
        Ok(self.timer_state())
    }

    pub async fn reconcile_now(&self) {
        self.inner.reconcile().await;
    }

    pub fn clear_error(&self) -> Result<(), InfraError> {
        self.inner.update_ui(|ui| ui.error = None)
    }

    pub fn clear_notice(&self) -> Result<(), InfraError> {
        self.inner.update_ui(|ui| ui.notice = None)
    }

    pub fn timer_state(&self) -> LocalTimerState {
        self.inner.timer_tx.borrow().clone()
    }

    pub fn ui_state(&self) -> TimerUiState {
        self.inner.ui_tx.borrow().clone()
    }

    pub fn subscribe_timer(&self) -> watch::Receiver<LocalTimerState> {
        self.inner.timer_tx.subscribe()
    }

    pub fn subscribe_ui(&self) -> watch::Receiver<TimerUiState> {
        self.inner.ui_tx.subscribe()
    }

    pub fn iot_delegation_enabled(&self) -> bool {
        self.inner.iot_delegation_enabled()
    }

    /// Teardown: cancels both periodic tasks and invalidates in-flight responses.
    pub fn shutdown(&self) -> Result<(), InfraError> {
        let mut core = self.inner.lock_core()?;
        core.tasks.cancel_all();
        core.begin_transition();
        if matches!(core.status, ControllerStatus::Loading(_)) {
            core.status = ControllerStatus::Idle;
        }
        core.ui.is_loading = false;
        self.inner.publish(&core);
        Ok(())
    }
}

impl<C, S, P> Inner<C, S, P>
where
    C: TimerApiClient + 'static,
    S: CredentialStore + 'static,
    P: PreferenceStore + 'static,
{
    fn lock_core(&self) -> Result<MutexGuard<'_, ControllerCore>, InfraError> {
        self.core
            .lock()
            .map_err(|error| InfraError::Unknown(format!("timer state lock poisoned: {error}")))
    }

    fn publish(&self, core: &ControllerCore) {
        let mut ui = core.ui.clone();
        ui.status = core.status;
        self.timer_tx.send_replace(core.timer.clone());
        self.ui_tx.send_replace(ui);
    }

    fn update_ui(&self, update: impl FnOnce(&mut TimerUiState)) -> Result<(), InfraError> {
        let mut core = self.lock_core()?;
        update(&mut core.ui);
        self.publish(&core);
        Ok(())
    }

    fn iot_delegation_enabled(&self) -> bool {
        self.preferences
            .is_iot_delegation_enabled()
            .unwrap_or_else(|error| {
                warn!("reading IoT delegation flag failed, assuming off: {error}");
                false
            })
    }

    fn auto_sync_enabled(&self) -> bool {
        self.preferences.is_auto_sync_enabled().unwrap_or_else(|error| {
            warn!("reading auto-sync flag failed, assuming on: {error}");
            true
        })
    }

    async fn initialize(&self) -> Result<LocalTimerState, InfraError> {
        let ticket = {
            let mut core = self.lock_core()?;
            if core.status != ControllerStatus::Idle {
                return Ok(core.timer.clone());
            }
            core.status = ControllerStatus::Loading(PendingAction::Restoring);
            core.ui.is_loading = true;
            core.begin_transition();
            self.publish(&core);
            core.issue_ticket()
        };

        let result = self.engine.fetch_status().await;

        let mut core = self.lock_core()?;
        core.ui.is_loading = false;
        if core.status == ControllerStatus::Loading(PendingAction::Restoring) {
            core.status = ControllerStatus::Idle;
        }
        match result {
            Ok(Some(snapshot)) if core.accepts(ticket) => {
                info!("restoring session for method {}", snapshot.method_id);
                self.apply_snapshot(&mut core, &snapshot, ticket);
                core.ui.notice = Some(format!(
                    "Resumed the running session for {}.",
                    core.timer.method_title
                ));
            }
            Ok(Some(_)) => debug!("discarding stale startup snapshot {ticket:?}"),
            Ok(None) => debug!("no session running on the server"),
            Err(error) => {
                warn!("startup status check failed: {error}");
                core.ui.notice = Some(format!("{NOTICE_STATUS_UNAVAILABLE} ({error})"));
            }
        }
        self.publish(&core);
        Ok(core.timer.clone())
    }

    async fn start_session(
        &self,
        method: ConcentrationMethod,
    ) -> Result<LocalTimerState, InfraError> {
        let ticket = {
            let mut core = self.lock_core()?;
            match core.status {
                ControllerStatus::Loading(action) => {
                    debug!("start ignored while {action:?} is in flight");
                    return Ok(core.timer.clone());
                }
                ControllerStatus::Running | ControllerStatus::Paused => {
                    let error = InfraError::Validation(SESSION_ALREADY_ACTIVE.to_string());
                    core.ui.error = Some(error.to_string());
                    self.publish(&core);
                    return Err(error);
                }
                ControllerStatus::Idle => {}
            }
            if let Err(reason) = method.validate() {
                let error = InfraError::Validation(reason);
                core.ui.error = Some(error.to_string());
                self.publish(&core);
                return Err(error);
            }

            core.status = ControllerStatus::Loading(PendingAction::Starting);
            core.ui.is_loading = true;
            core.ui.error = None;
            core.ui.notice = None;
            core.ui.selected_method = Some(method.clone());
            core.method = Some(method.clone());
            core.begin_transition();
            self.publish(&core);
            core.issue_ticket()
        };

        // The server does not reject a second session, so look before starting.
        let existing = match self.engine.fetch_status().await {
            Ok(existing) => existing,
            Err(error) => return self.fail_start(error),
        };

        if let Some(snapshot) = existing {
            let mut core = self.lock_core()?;
            core.ui.is_loading = false;
            if core.accepts(ticket) {
                info!(
                    "adopting existing session for method {} instead of starting",
                    snapshot.method_id
                );
                self.apply_snapshot(&mut core, &snapshot, ticket);
                core.ui.notice = Some(format!(
                    "A session for {} was already running; resumed it.",
                    core.timer.method_title
                ));
            } else {
                settle_loading(&mut core);
            }
            self.publish(&core);
            return Ok(core.timer.clone());
        }

        let snapshot = match self.engine.start(method.method_id).await {
            Ok(snapshot) => snapshot,
            Err(error) => return self.fail_start(error),
        };

        let mut core = self.lock_core()?;
        core.ui.is_loading = false;
        if core.accepts(ticket) {
            info!("started session for method {}", snapshot.method_id);
            core.last_applied_seq = ticket.seq;
            core.timer = LocalTimerState::fresh_session(&snapshot);
            core.status = ControllerStatus::Running;
            self.ensure_tasks(&mut core);
        } else {
            settle_loading(&mut core);
        }
        self.publish(&core);
        Ok(core.timer.clone())
    }

    fn fail_start(&self, error: InfraError) -> Result<LocalTimerState, InfraError> {
        warn!("start session failed: {error}");
        let mut core = self.lock_core()?;
        if core.status == ControllerStatus::Loading(PendingAction::Starting) {
            core.status = ControllerStatus::Idle;
            core.timer = LocalTimerState::idle();
            core.method = None;
        }
        core.ui.is_loading = false;
        core.ui.error = Some(error.to_string());
        self.publish(&core);
        Err(error)
    }

    async fn stop_session(&self) -> Result<StopOutcome, InfraError> {
        let delegated = {
            let mut core = self.lock_core()?;
            match core.status {
                ControllerStatus::Idle
                | ControllerStatus::Loading(PendingAction::Stopping) => {
                    return Ok(StopOutcome::AlreadyIdle);
                }
                ControllerStatus::Loading(action) => {
                    debug!("stop ignored while {action:?} is in flight");
                    return Ok(StopOutcome::Ignored);
                }
                ControllerStatus::Running | ControllerStatus::Paused => {}
            }

            core.reset_to_idle();
            core.ui.error = None;
            let delegated = self.iot_delegation_enabled();
            if delegated {
                core.ui.is_loading = false;
                core.ui.notice = Some(NOTICE_STOPPED_DELEGATED.to_string());
            } else {
                core.status = ControllerStatus::Loading(PendingAction::Stopping);
                core.ui.is_loading = true;
            }
            self.publish(&core);
            delegated
        };

        if delegated {
            info!("session stopped locally; IoT device keeps the record");
            return Ok(StopOutcome::StoppedLocallyDelegated);
        }

        let result = self.engine.stop().await;

        let mut core = self.lock_core()?;
        if core.status == ControllerStatus::Loading(PendingAction::Stopping) {
            core.status = ControllerStatus::Idle;
        }
        core.ui.is_loading = false;
        let outcome = match result {
            Ok(()) => {
                info!("session stopped");
                core.ui.notice = Some(NOTICE_STOPPED.to_string());
                StopOutcome::Stopped
            }
            Err(error) => {
                warn!("stop request failed, session ended locally: {error}");
                core.ui.notice = Some(format!("{NOTICE_STOPPED_OUT_OF_SYNC} ({error})"));
                StopOutcome::StoppedLocallyOutOfSync
            }
        };
        self.publish(&core);
        Ok(outcome)
    }

    async fn toggle_pause(&self) -> Result<LocalTimerState, InfraError> {
        let ticket = {
            let mut core = self.lock_core()?;
            match core.status {
                ControllerStatus::Loading(_) => return Ok(core.timer.clone()),
                ControllerStatus::Idle => {
                    let error = InfraError::Validation(NO_ACTIVE_SESSION.to_string());
                    core.ui.error = Some(error.to_string());
                    self.publish(&core);
                    return Err(error);
                }
                ControllerStatus::Running | ControllerStatus::Paused => {}
            }
            core.begin_transition();
            core.ui.is_loading = true;
            self.publish(&core);
            core.issue_ticket()
        };

        let result = self.engine.toggle_pause().await;

        let mut core = self.lock_core()?;
        // A stop issued meanwhile owns the loading flag and the error slot.
        if !matches!(core.status, ControllerStatus::Loading(_)) {
            core.ui.is_loading = false;
        }
        let outcome = match result {
            Ok(snapshot) => {
                if core.accepts(ticket) {
                    self.apply_snapshot(&mut core, &snapshot, ticket);
                } else {
                    debug!("discarding stale pause snapshot {ticket:?}");
                }
                Ok(core.timer.clone())
            }
            Err(error) => {
                warn!("pause toggle failed: {error}");
                if core.status.is_active() {
                    core.ui.error = Some(error.to_string());
                }
                Err(error)
            }
        };
        self.publish(&core);
        outcome
    }

    async fn complete_current_phase(&self) -> Result<LocalTimerState, InfraError> {
        let outcome = {
            let mut core = self.lock_core()?;
            if !core.status.is_active() {
                let error = InfraError::Validation(NO_ACTIVE_SESSION.to_string());
                core.ui.error = Some(error.to_string());
                self.publish(&core);
                return Err(error);
            }
            core.timer.remaining_seconds = 0;
            let outcome = self.expire_phase(&mut core);
            self.publish(&core);
            outcome
        };

        if let TickOutcome::ReportCompletion(ticket) = outcome {
            self.report_phase_completion(ticket).await;
        }
        Ok(self.timer_tx.borrow().clone())
    }

    fn advance_clock(&self) -> Result<TickOutcome, InfraError> {
        let mut core = self.lock_core()?;
        if core.status != ControllerStatus::Running || !core.timer.is_counting_down() {
            return Ok(TickOutcome::Unchanged);
        }

        let expired =
            self.policy.is_phase_complete(core.timer.remaining_seconds) || core.timer.tick();
        let outcome = if expired {
            self.expire_phase(&mut core)
        } else {
            TickOutcome::Counted
        };
        self.publish(&core);
        Ok(outcome)
    }

    /// The IoT flag is read here, at the moment of the flip.
    fn expire_phase(&self, core: &mut ControllerCore) -> TickOutcome {
        let reporting = TransitionReporting::for_delegation(self.iot_delegation_enabled());
        if reporting == TransitionReporting::Server && core.completion_in_flight.is_some() {
            return TickOutcome::Unchanged;
        }

        // Without a method the server decides the next phase; stay at zero.
        let transition = core.method.as_ref().map(|method| {
            self.policy.next(
                core.timer.current_phase,
                core.timer.current_cycle,
                method,
                reporting,
            )
        });
        if let Some(transition) = transition {
            debug!(
                "phase flip to {} (cycle {}, {}s)",
                transition.phase.as_str(),
                transition.cycle,
                transition.duration_seconds
            );
            core.timer
                .enter_phase(transition.phase, transition.duration_seconds, transition.cycle);
            core.begin_transition();
        }

        match reporting {
            TransitionReporting::LocalOnly => {
                core.completion_pending = false;
                TickOutcome::Flipped
            }
            TransitionReporting::Server => {
                core.completion_pending = true;
                let ticket = core.issue_ticket();
                core.completion_in_flight = Some(ticket.seq);
                TickOutcome::ReportCompletion(ticket)
            }
        }
    }

    async fn report_phase_completion(&self, ticket: SnapshotTicket) {
        let result = self.engine.complete_phase().await;

        let mut core = match self.lock_core() {
            Ok(core) => core,
            Err(error) => {
                warn!("phase completion result dropped: {error}");
                return;
            }
        };
        let owned = core.completion_in_flight == Some(ticket.seq);
        if owned {
            core.completion_in_flight = None;
        }
        match result {
            Ok(snapshot) => {
                if owned {
                    core.completion_pending = false;
                }
                if core.accepts(ticket) {
                    self.apply_snapshot(&mut core, &snapshot, ticket);
                } else {
                    debug!("discarding stale phase completion snapshot {ticket:?}");
                }
            }
            Err(error) => {
                warn!("phase completion report failed: {error}");
                let retry = completion_is_retryable(&error);
                if owned && !retry {
                    // Let the next reconciliation ask for status instead.
                    core.completion_pending = false;
                }
                if owned && core.status.is_active() {
                    let notice = if retry {
                        NOTICE_COMPLETION_RETRY
                    } else {
                        NOTICE_COMPLETION_DROPPED
                    };
                    core.ui.notice = Some(format!("{notice} ({error})"));
                }
            }
        }
        self.publish(&core);
    }

    async fn reconcile(&self) {
        if let Err(error) = self.reconcile_once().await {
            warn!("reconciliation failed: {error}");
        }
    }

    async fn reconcile_once(&self) -> Result<(), InfraError> {
        let (ticket, retry_completion) = {
            let mut core = self.lock_core()?;
            if !core.status.is_active() {
                return Ok(());
            }
            if core.completion_pending && self.iot_delegation_enabled() {
                core.completion_pending = false;
            }
            if core.completion_pending && core.completion_in_flight.is_some() {
                return Ok(());
            }
            let ticket = core.issue_ticket();
            let retry_completion = core.completion_pending;
            if retry_completion {
                core.completion_in_flight = Some(ticket.seq);
            }
            (ticket, retry_completion)
        };

        if retry_completion {
            info!("retrying phase completion report");
            self.report_phase_completion(ticket).await;
            return Ok(());
        }

        let status = self.engine.fetch_status().await?;

        let mut core = self.lock_core()?;
        match status {
            Some(snapshot) if core.accepts(ticket) => {
                debug!(
                    "reconciled: {} {}s left",
                    snapshot.current_phase.as_str(),
                    snapshot.remaining_seconds
                );
                self.apply_snapshot(&mut core, &snapshot, ticket);
            }
            None if core.accepts(ticket) => {
                info!("server reports no session; ending locally");
                core.reset_to_idle();
                core.ui.notice = Some(NOTICE_ENDED_REMOTELY.to_string());
            }
            _ => debug!("discarding stale status snapshot {ticket:?}"),
        }
        self.publish(&core);
        Ok(())
    }

    /// Replaces the whole local state with the snapshot.
    fn apply_snapshot(
        &self,
        core: &mut ControllerCore,
        snapshot: &SessionSnapshot,
        ticket: SnapshotTicket,
    ) {
        core.last_applied_seq = ticket.seq;
        if !snapshot.is_active {
            core.reset_to_idle();
            return;
        }

        core.timer = LocalTimerState::from_snapshot(snapshot);
        core.method = match core.method.take() {
            Some(method) if method.method_id == snapshot.method_id => Some(method),
            _ => Some(ConcentrationMethod::from_snapshot(snapshot)),
        };
        core.ui.selected_method = core.method.clone();
        core.status = if snapshot.is_paused {
            ControllerStatus::Paused
        } else {
            ControllerStatus::Running
        };
        self.ensure_tasks(core);
    }

    fn ensure_tasks(&self, core: &mut ControllerCore) {
        if core.timer.is_paused {
            core.tasks.clock.cancel();
        } else if !core.tasks.clock.is_running() {
            let weak = self.weak_self.clone();
            core.tasks.clock.start(move || {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => {
                            Self::on_clock_tick(inner);
                            ControlFlow::Continue(())
                        }
                        None => ControlFlow::Break(()),
                    }
                }
            });
        }

        if !core.tasks.is_reconciling() {
            let weak = self.weak_self.clone();
            core.tasks.reconciliation = Some(PeriodicTask::spawn(
                "reconciliation",
                self.config.reconcile_interval,
                move || {
                    let weak = weak.clone();
                    async move {
                        let Some(inner) = weak.upgrade() else {
                            return ControlFlow::Break(());
                        };
                        // Read every period so the preference applies mid-session.
                        if inner.auto_sync_enabled() {
                            inner.reconcile().await;
                        }
                        ControlFlow::Continue(())
                    }
                },
            ));
        }
    }

    /// Ticks never wait on the network; completion reports run detached.
    fn on_clock_tick(inner: Arc<Self>) {
        match inner.advance_clock() {
            Ok(TickOutcome::ReportCompletion(ticket)) => {
                tokio::spawn(async move {
                    inner.report_phase_completion(ticket).await;
                });
            }
            Ok(TickOutcome::Unchanged | TickOutcome::Counted | TickOutcome::Flipped) => {}
            Err(error) => warn!("clock tick failed: {error}"),
        }
    }
}

fn settle_loading(core: &mut ControllerCore) {
    if matches!(core.status, ControllerStatus::Loading(_)) {
        core.status = ControllerStatus::Idle;
        core.timer = LocalTimerState::idle();
        core.method = None;
    }
}

/// Rejections that a later attempt cannot fix. A 404 means the session is
/// gone, which the next status check handles.
fn completion_is_retryable(error: &InfraError) -> bool {
    !matches!(
        error,
        InfraError::Auth(_) | InfraError::Validation(_) | InfraError::Server { code: 404, .. }
    )
}
