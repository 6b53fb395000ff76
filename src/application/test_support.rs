use crate::domain::models::{ConcentrationMethod, SessionSnapshot, TimerPhase};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::timer_api_client::TimerApiClient;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

pub(crate) fn pomodoro() -> ConcentrationMethod {
    ConcentrationMethod {
        method_id: 4,
        title: "Pomodoro".to_string(),
        description: Some("25 minutes of work, 5 minutes of rest".to_string()),
        work_duration: 25,
        break_duration: 5,
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum FakeFailure {
    Network,
    Server(u16),
}

impl FakeFailure {
    fn into_error(self) -> InfraError {
        match self {
            Self::Network => InfraError::Network("connection reset by fake".to_string()),
            Self::Server(code) => InfraError::Server {
                code,
                message: "fake server failure".to_string(),
            },
        }
    }
}

/// Behaves like a single-user timer server. Failures are scripted per endpoint
/// and calls can be held open to simulate slow responses.
#[derive(Debug)]
pub(crate) struct FakeTimerApiClient {
    methods: Vec<ConcentrationMethod>,
    session: Mutex<Option<SessionSnapshot>>,
    start_failures: Mutex<VecDeque<FakeFailure>>,
    status_failures: Mutex<VecDeque<FakeFailure>>,
    stop_failures: Mutex<VecDeque<FakeFailure>>,
    complete_failures: Mutex<VecDeque<FakeFailure>>,
    pause_failures: Mutex<VecDeque<FakeFailure>>,
    hold_start: AtomicBool,
    hold_status: AtomicBool,
    hold_pause: AtomicBool,
    hold_stop: AtomicBool,
    release: Notify,
    release_stop: Notify,
    pub(crate) start_calls: AtomicUsize,
    pub(crate) status_calls: AtomicUsize,
    pub(crate) stop_calls: AtomicUsize,
    pub(crate) complete_calls: AtomicUsize,
    pub(crate) pause_calls: AtomicUsize,
}

impl FakeTimerApiClient {
    pub(crate) fn new(methods: Vec<ConcentrationMethod>) -> Self {
        Self {
            methods,
            session: Mutex::new(None),
            start_failures: Mutex::new(VecDeque::new()),
            status_failures: Mutex::new(VecDeque::new()),
            stop_failures: Mutex::new(VecDeque::new()),
            complete_failures: Mutex::new(VecDeque::new()),
            pause_failures: Mutex::new(VecDeque::new()),
            hold_start: AtomicBool::new(false),
            hold_status: AtomicBool::new(false),
            hold_pause: AtomicBool::new(false),
            hold_stop: AtomicBool::new(false),
            release: Notify::new(),
            release_stop: Notify::new(),
            start_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            complete_calls: AtomicUsize::new(0),
            pause_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_server_session(&self, snapshot: Option<SessionSnapshot>) {
        *self.session.lock().expect("session lock poisoned") = snapshot;
    }

    pub(crate) fn server_session(&self) -> Option<SessionSnapshot> {
        self.session.lock().expect("session lock poisoned").clone()
    }

    pub(crate) fn fail_start(&self, failure: FakeFailure) {
        push(&self.start_failures, failure);
    }

    pub(crate) fn fail_status(&self, failure: FakeFailure) {
        push(&self.status_failures, failure);
    }

    pub(crate) fn fail_stop(&self, failure: FakeFailure) {
        push(&self.stop_failures, failure);
    }

    pub(crate) fn fail_complete(&self, failure: FakeFailure) {
        push(&self.complete_failures, failure);
    }

    pub(crate) fn fail_pause(&self, failure: FakeFailure) {
        push(&self.pause_failures, failure);
    }

    pub(crate) fn hold_start(&self) {
        self.hold_start.store(true, Ordering::SeqCst);
    }

    pub(crate) fn hold_status(&self) {
        self.hold_status.store(true, Ordering::SeqCst);
    }

    pub(crate) fn hold_pause(&self) {
        self.hold_pause.store(true, Ordering::SeqCst);
    }

    /// Stop waits on its own release so it can be held next to another call.
    pub(crate) fn hold_stop(&self) {
        self.hold_stop.store(true, Ordering::SeqCst);
    }

    /// Lets one held start, status or pause call return.
    pub(crate) fn release_one(&self) {
        self.release.notify_one();
    }

    pub(crate) fn release_stop(&self) {
        self.release_stop.notify_one();
    }

    /// Snapshot the server would hand out for a newly started session.
    pub(crate) fn session_for(method: &ConcentrationMethod) -> SessionSnapshot {
        SessionSnapshot {
            user_id: 1,
            method_id: method.method_id,
            method_title: method.title.clone(),
            current_phase: TimerPhase::Work,
            is_active: true,
            is_paused: false,
            remaining_seconds: method.work_duration * 60,
            phase_duration_minutes: method.work_duration,
            work_duration_minutes: method.work_duration,
            break_duration_minutes: method.break_duration,
            current_cycle: 1,
            started_at: None,
            phase_started_at: None,
            total_paused_seconds: 0,
            elapsed_seconds: 0,
        }
    }

    async fn wait_if_held(&self, flag: &AtomicBool) {
        if flag.swap(false, Ordering::SeqCst) {
            self.release.notified().await;
        }
    }
}

fn push(queue: &Mutex<VecDeque<FakeFailure>>, failure: FakeFailure) {
    queue.lock().expect("failure queue lock poisoned").push_back(failure);
}

fn take_failure(queue: &Mutex<VecDeque<FakeFailure>>) -> Result<(), InfraError> {
    match queue.lock().expect("failure queue lock poisoned").pop_front() {
        Some(failure) => Err(failure.into_error()),
        None => Ok(()),
    }
}

fn no_session() -> InfraError {
    InfraError::Server {
        code: 404,
        message: "no active session".to_string(),
    }
}

#[async_trait]
impl TimerApiClient for FakeTimerApiClient {
    async fn start_session(
        &self,
        _access_token: &str,
        method_id: i64,
    ) -> Result<SessionSnapshot, InfraError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_if_held(&self.hold_start).await;
        take_failure(&self.start_failures)?;

        let method = self
            .methods
            .iter()
            .find(|method| method.method_id == method_id)
            .ok_or_else(|| InfraError::Server {
                code: 404,
                message: format!("method {method_id} not found"),
            })?;
        let snapshot = Self::session_for(method);
        self.set_server_session(Some(snapshot.clone()));
        Ok(snapshot)
    }

    async fn session_status(
        &self,
        _access_token: &str,
    ) -> Result<Option<SessionSnapshot>, InfraError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_if_held(&self.hold_status).await;
        take_failure(&self.status_failures)?;
        Ok(self.server_session())
    }

    async fn pause_session(&self, _access_token: &str) -> Result<SessionSnapshot, InfraError> {
        self.pause_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_if_held(&self.hold_pause).await;
        take_failure(&self.pause_failures)?;
        let mut guard = self.session.lock().expect("session lock poisoned");
        let session = guard.as_mut().ok_or_else(no_session)?;
        session.is_paused = !session.is_paused;
        Ok(session.clone())
    }

    async fn stop_session(&self, _access_token: &str) -> Result<(), InfraError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if self.hold_stop.swap(false, Ordering::SeqCst) {
            self.release_stop.notified().await;
        }
        take_failure(&self.stop_failures)?;
        self.set_server_session(None);
        Ok(())
    }

    async fn complete_phase(&self, _access_token: &str) -> Result<SessionSnapshot, InfraError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        take_failure(&self.complete_failures)?;
        let mut guard = self.session.lock().expect("session lock poisoned");
        let session = guard.as_mut().ok_or_else(no_session)?;
        match session.current_phase {
            TimerPhase::Work => {
                session.current_phase = TimerPhase::Break;
                session.phase_duration_minutes = session.break_duration_minutes;
            }
            TimerPhase::Break => {
                session.current_phase = TimerPhase::Work;
                session.phase_duration_minutes = session.work_duration_minutes;
                session.current_cycle += 1;
            }
        }
        session.remaining_seconds = session.phase_duration_minutes * 60;
        Ok(session.clone())
    }

    async fn list_methods(&self) -> Result<Vec<ConcentrationMethod>, InfraError> {
        Ok(self.methods.clone())
    }

    async fn get_method(&self, method_id: i64) -> Result<ConcentrationMethod, InfraError> {
        self.methods
            .iter()
            .find(|method| method.method_id == method_id)
            .cloned()
            .ok_or_else(|| InfraError::Server {
                code: 404,
                message: format!("method {method_id} not found"),
            })
    }
}
