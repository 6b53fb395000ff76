use crate::domain::models::{ConcentrationMethod, TimerPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionReporting {
    /// The flip is reported with `completePhase` and the server snapshot wins.
    Server,
    /// An IoT device records progress; the flip only changes what is displayed.
    LocalOnly,
}

impl TransitionReporting {
    pub fn for_delegation(iot_delegation_enabled: bool) -> Self {
        if iot_delegation_enabled {
            Self::LocalOnly
        } else {
            Self::Server
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransition {
    pub phase: TimerPhase,
    pub duration_seconds: u32,
    pub cycle: u32,
    pub reporting: TransitionReporting,
}

impl PhaseTransition {
    /// A zero-length phase is complete the moment it is entered; the next clock
    /// tick flips it again.
    pub fn completes_immediately(&self) -> bool {
        self.duration_seconds == 0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseTransitionPolicy;

impl PhaseTransitionPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Work -> Break keeps the cycle; Break -> Work starts the next cycle.
    pub fn next(
        &self,
        current: TimerPhase,
        current_cycle: u32,
        method: &ConcentrationMethod,
        reporting: TransitionReporting,
    ) -> PhaseTransition {
        let current_cycle = current_cycle.max(1);
        match current {
            TimerPhase::Work => PhaseTransition {
                phase: TimerPhase::Break,
                duration_seconds: minutes_to_seconds(method.break_duration),
                cycle: current_cycle,
                reporting,
            },
            TimerPhase::Break => PhaseTransition {
                phase: TimerPhase::Work,
                duration_seconds: minutes_to_seconds(method.work_duration),
                cycle: current_cycle.saturating_add(1),
                reporting,
            },
        }
    }

    pub fn is_phase_complete(&self, remaining_seconds: u32) -> bool {
        remaining_seconds == 0
    }
}

fn minutes_to_seconds(minutes: u32) -> u32 {
    minutes.saturating_mul(60)
}
