//! Error types for GSP scheduling operations

use gsp_chip::codes::ErrorCode;
use thiserror::Error;

/// Result type alias for GSP operations
pub type Result<T> = std::result::Result<T, GspError>;

/// Errors surfaced by the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GspError {
    /// Bad job count, index, payload size or device description
    #[error("Invalid configuration: {reason}")]
    Config {
        /// What was wrong
        reason: String,
    },

    /// No free job slot on the selected core
    #[error("Core {core}: no free job slot")]
    QueueFull {
        /// Core index
        core: usize,
    },

    /// A share fd did not resolve to a buffer
    #[error("Buffer for share fd {fd} unresolved: {reason}")]
    BufferResolution {
        /// Share fd given by the client
        fd: i32,
        /// Reason for failure
        reason: String,
    },

    /// More acquire fences than one job may hold
    #[error("Too many acquire fences (max {max})")]
    FenceOverflow {
        /// Per-job cap
        max: usize,
    },

    /// A wait fd did not resolve to a fence
    #[error("No fence behind fd {fd}")]
    FenceNotFound {
        /// Wait fd given by the client
        fd: i32,
    },

    /// The signal fence fd could not be written back to the client record
    #[error("No record slot to publish fence fd {fd}")]
    FencePublish {
        /// Fd that was created
        fd: i32,
    },

    /// An acquire fence did not signal in time
    #[error("Fence wait timed out after {duration_ms}ms")]
    FenceTimeout {
        /// Timeout in milliseconds
        duration_ms: u64,
    },

    /// An acquire fence wait was abandoned
    #[error("Fence wait interrupted")]
    FenceInterrupted,

    /// IOMMU mapping failed
    #[error("IOMMU map failed: {reason}")]
    IommuMap {
        /// Reason for failure
        reason: String,
    },

    /// Engine still busy at trigger
    #[error("Core {core}: hardware busy at trigger")]
    HardwareBusy {
        /// Core index
        core: usize,
    },

    /// Clock check or control code fault at trigger
    #[error("Core {core}: trigger failed with {code}")]
    HardwareTrigger {
        /// Core index
        core: usize,
        /// Code returned by the backend
        code: ErrorCode,
    },

    /// Watchdog fired before the interrupt
    #[error("Core {core}: hardware hang")]
    HardwareHang {
        /// Core index
        core: usize,
    },

    /// Backend release after interrupt failed
    #[error("Core {core}: release failed: {reason}")]
    HardwareRelease {
        /// Core index
        core: usize,
        /// Reason for failure
        reason: String,
    },

    /// Interrupt reported an error status
    #[error("Core {core}: interrupt reported an error")]
    HardwareIrq {
        /// Core index
        core: usize,
    },

    /// Core did not quiesce (or resume) in time
    #[error("Core {core}: suspend wait timed out after {duration_ms}ms")]
    SuspendTimeout {
        /// Core index
        core: usize,
        /// Timeout in milliseconds
        duration_ms: u64,
    },

    /// Job was dropped from the queue before it ran
    #[error("Core {core}: job {tag} cancelled")]
    JobCancelled {
        /// Core index
        core: usize,
        /// Job tag
        tag: usize,
    },

    /// Synchronous completion did not arrive in time
    #[error("Operation timeout after {duration_ms}ms")]
    WaitTimeout {
        /// Timeout in milliseconds
        duration_ms: u64,
    },

    /// A wait was abandoned because its producer went away
    #[error("Interrupted: {what}")]
    Interrupted {
        /// What was being waited on
        what: String,
    },

    /// Backend operation failed
    #[error("Backend error: {reason}")]
    Backend {
        /// Reason for failure
        reason: String,
    },

    /// Operation not valid in the current state
    #[error("Invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// Device is being torn down
    #[error("Device stopped")]
    DeviceStopped,
}

impl GspError {
    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a buffer resolution error
    pub fn buffer(fd: i32, reason: impl Into<String>) -> Self {
        Self::BufferResolution {
            fd,
            reason: reason.into(),
        }
    }

    /// Create an IOMMU map error
    pub fn iommu(reason: impl Into<String>) -> Self {
        Self::IommuMap {
            reason: reason.into(),
        }
    }

    /// Create a backend error
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// Create an interrupted error
    pub fn interrupted(what: impl Into<String>) -> Self {
        Self::Interrupted { what: what.into() }
    }

    /// Driver error code a front end reports for this error, if any
    #[must_use]
    pub const fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Config { .. } => Some(ErrorCode::ParamChk),
            Self::QueueFull { .. } => Some(ErrorCode::NotEnoughEmptyKcmd),
            Self::BufferResolution { .. } => Some(ErrorCode::GetDmabufByFd),
            Self::FenceOverflow { .. } | Self::FenceNotFound { .. } => {
                Some(ErrorCode::GetFenceByFd)
            }
            Self::FencePublish { .. } => Some(ErrorCode::PutFenceToUser),
            Self::IommuMap { .. } => Some(ErrorCode::IommuMap),
            Self::HardwareBusy { .. } => Some(ErrorCode::HwBusy),
            Self::HardwareTrigger { code, .. } => Some(*code),
            Self::HardwareHang { .. } => Some(ErrorCode::HwHang),
            _ => None,
        }
    }

    /// `true` for faults raised by the engine itself
    #[must_use]
    pub const fn is_hardware(&self) -> bool {
        matches!(
            self,
            Self::HardwareBusy { .. }
                | Self::HardwareTrigger { .. }
                | Self::HardwareHang { .. }
                | Self::HardwareRelease { .. }
                | Self::HardwareIrq { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_driver_table() {
        assert_eq!(
            GspError::QueueFull { core: 0 }.code(),
            Some(ErrorCode::NotEnoughEmptyKcmd)
        );
        assert_eq!(
            GspError::HardwareTrigger {
                core: 1,
                code: ErrorCode::ClkChk
            }
            .code(),
            Some(ErrorCode::ClkChk)
        );
        assert_eq!(GspError::FenceInterrupted.code(), None);
    }

    #[test]
    fn display_names_core() {
        let err = GspError::HardwareHang { core: 1 };
        assert_eq!(err.to_string(), "Core 1: hardware hang");
        assert!(err.is_hardware());
        assert!(!GspError::config("x").is_hardware());
    }
}
