//! Core state machine states and the recovery table

use std::fmt;

/// Execution state of one core
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreState {
    /// Nothing in flight
    Idle,
    /// A trigger is scheduled
    Trigger,
    /// A job is on the engine
    Busy,
    /// Interrupt arrived with a done status
    IrqHandled,
    /// Interrupt arrived with an error status
    IrqError,
    /// Quiesced for system suspend
    Suspend,
    /// Clock or power enable failed
    EnableErr,
    /// IOMMU mapping failed
    MapErr,
    /// An acquire fence did not signal
    WaitErr,
    /// The engine refused the trigger
    TriggerErr,
    /// Watchdog fired, or the engine was busy at trigger
    HwHangErr,
    /// Post-interrupt release failed
    ReleaseErr,
}

impl CoreState {
    /// Every state, in discriminant order
    pub const ALL: [Self; 12] = [
        Self::Idle,
        Self::Trigger,
        Self::Busy,
        Self::IrqHandled,
        Self::IrqError,
        Self::Suspend,
        Self::EnableErr,
        Self::MapErr,
        Self::WaitErr,
        Self::TriggerErr,
        Self::HwHangErr,
        Self::ReleaseErr,
    ];

    pub(crate) fn from_raw(raw: u8) -> Self {
        Self::ALL.get(usize::from(raw)).copied().unwrap_or(Self::Idle)
    }

    pub(crate) const fn raw(self) -> u8 {
        self as u8
    }

    /// Name as printed in the status nodes
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Trigger => "trigger",
            Self::Busy => "busy",
            Self::IrqHandled => "irq-handled",
            Self::IrqError => "irq-error",
            Self::Suspend => "suspend",
            Self::EnableErr => "enable-err",
            Self::MapErr => "map-err",
            Self::WaitErr => "wait-err",
            Self::TriggerErr => "trigger-err",
            Self::HwHangErr => "hw-hang-err",
            Self::ReleaseErr => "release-err",
        }
    }

    /// One of the failure states recovery runs from
    pub const fn is_error(self) -> bool {
        self.recovery_plan().is_some()
    }

    /// What recovery does from this state; `None` outside the error states
    pub const fn recovery_plan(self) -> Option<RecoveryPlan> {
        match self {
            Self::EnableErr | Self::MapErr => Some(RecoveryPlan {
                unmap: false,
                dump: false,
                reset: false,
            }),
            // a failed release is recovered like a refused trigger
            Self::WaitErr | Self::TriggerErr | Self::ReleaseErr => Some(RecoveryPlan {
                unmap: true,
                dump: true,
                reset: false,
            }),
            Self::HwHangErr => Some(RecoveryPlan {
                unmap: true,
                dump: true,
                reset: true,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for CoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Suspend progress of one core, independent of [`CoreState`]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuspendState {
    /// Running normally
    Exit,
    /// Suspend started: no new triggers
    Begin,
    /// Suspend is waiting for the in-flight job
    Wait,
}

impl SuspendState {
    pub(crate) const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Begin,
            2 => Self::Wait,
            _ => Self::Exit,
        }
    }

    pub(crate) const fn raw(self) -> u8 {
        self as u8
    }

    /// Name as printed in the status nodes
    pub const fn name(self) -> &'static str {
        match self {
            Self::Exit => "exit",
            Self::Begin => "begin",
            Self::Wait => "wait",
        }
    }
}

impl fmt::Display for SuspendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Recovery actions beyond freeing buffers and completing the job, which
/// happen from every error state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPlan {
    /// Tear down IOMMU mappings
    pub unmap: bool,
    /// Dump core and interface state
    pub dump: bool,
    /// Reset the engine
    pub reset: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_round_trip() {
        for state in CoreState::ALL {
            assert_eq!(CoreState::from_raw(state.raw()), state);
        }
        for s in [SuspendState::Exit, SuspendState::Begin, SuspendState::Wait] {
            assert_eq!(SuspendState::from_raw(s.raw()), s);
        }
    }

    #[test]
    fn only_hang_resets() {
        let resetting: Vec<_> = CoreState::ALL
            .iter()
            .filter(|s| s.recovery_plan().is_some_and(|p| p.reset))
            .collect();
        assert_eq!(resetting, [&CoreState::HwHangErr]);
    }

    #[test]
    fn early_failures_skip_unmap_and_dump() {
        for s in [CoreState::EnableErr, CoreState::MapErr] {
            let plan = s.recovery_plan().unwrap();
            assert!(!plan.unmap && !plan.dump);
        }
        assert_eq!(
            CoreState::ReleaseErr.recovery_plan(),
            CoreState::TriggerErr.recovery_plan()
        );
    }

    #[test]
    fn running_states_are_not_errors() {
        for s in [
            CoreState::Idle,
            CoreState::Trigger,
            CoreState::Busy,
            CoreState::IrqHandled,
            CoreState::IrqError,
            CoreState::Suspend,
        ] {
            assert!(!s.is_error(), "{s}");
        }
    }
}
