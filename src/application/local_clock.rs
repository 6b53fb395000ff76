use log::debug;
use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// A named background loop that runs `on_tick` once per period until it
/// returns `ControlFlow::Break` or the task is dropped.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let period = period.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            // First tick one full period after start, not immediately.
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if on_tick().await.is_break() {
                    debug!("{name} task finished");
                    break;
                }
            }
        });
        Self { name, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// One-tick-per-period countdown driver. Starting it again replaces the
/// running instance, so two clocks never decrement the same state.
#[derive(Debug)]
pub struct LocalClock {
    period: Duration,
    task: Option<PeriodicTask>,
}

impl LocalClock {
    pub fn new(period: Duration) -> Self {
        Self { period, task: None }
    }

    pub fn start<F, Fut>(&mut self, on_tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        self.cancel();
        self.task = Some(PeriodicTask::spawn("local clock", self.period, on_tick));
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

/// The two periodic activities a session owns. Dropping it cancels both.
#[derive(Debug)]
pub struct ActiveTasks {
    pub clock: LocalClock,
    pub reconciliation: Option<PeriodicTask>,
}

impl ActiveTasks {
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            clock: LocalClock::new(tick_interval),
            reconciliation: None,
        }
    }

    pub fn is_reconciling(&self) -> bool {
        self.reconciliation
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn cancel_all(&mut self) {
        self.clock.cancel();
        if let Some(task) = self.reconciliation.take() {
            task.cancel();
        }
    }
}
