//! Driver and hardware error codes.
//!
//! Two families share one numeric space:
//!
//! ```text
//! 0x000        NO_ERR
//! 0x100..0x10b driver-side faults (control code, clock check, fences, buffers, ...)
//! 0x200..0x201 hardware faults (busy, hang)
//! ```
//!
//! A chip backend's `trigger` returns one of these. The scheduler maps
//! `HW_BUSY` to a hang recovery, `CLK_CHK`/`CTL_CODE` to a trigger recovery
//! and everything else non-zero to a trigger recovery as well.

/// Raw code values.
pub mod raw {
    /// Success.
    pub const NO_ERR: u32 = 0;
    /// Base of the driver-side family.
    pub const CTL_CODE_ERR: u32 = 0x100;
    /// Clock check failed before trigger.
    pub const CLK_CHK_ERR: u32 = 0x101;
    /// Signal fence creation failed.
    pub const CREATE_FENCE_ERR: u32 = 0x102;
    /// Publishing the signal fd to the client failed.
    pub const PUT_FENCE_TO_USER_ERR: u32 = 0x103;
    /// A wait fd did not resolve to a fence.
    pub const GET_FENCE_BY_FD_ERR: u32 = 0x104;
    /// A share fd did not resolve to a buffer.
    pub const GET_DMABUF_BY_FD_ERR: u32 = 0x105;
    /// Copying the client config failed.
    pub const COPY_FROM_USER_ERR: u32 = 0x106;
    /// Writing back to the client failed.
    pub const COPY_TO_USER_ERR: u32 = 0x107;
    /// No free job slot.
    pub const NOT_ENOUGH_EMPTY_KCMD_ERR: u32 = 0x108;
    /// Worker creation failed.
    pub const CREATE_THREAD_ERR: u32 = 0x109;
    /// IOMMU mapping failed.
    pub const IOMMU_MAP_ERR: u32 = 0x10a;
    /// Parameter check failed.
    pub const PARAM_CHK_ERR: u32 = 0x10b;
    /// Base of the hardware family: engine still busy at trigger.
    pub const HW_BUSY_ERR: u32 = 0x200;
    /// Engine hung.
    pub const HW_HANG_ERR: u32 = 0x201;
}

/// Typed view of the code table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// Success.
    NoErr = raw::NO_ERR,
    /// Control code fault.
    CtlCode = raw::CTL_CODE_ERR,
    /// Clock check fault.
    ClkChk = raw::CLK_CHK_ERR,
    /// Fence creation fault.
    CreateFence = raw::CREATE_FENCE_ERR,
    /// Fence publication fault.
    PutFenceToUser = raw::PUT_FENCE_TO_USER_ERR,
    /// Wait fd lookup fault.
    GetFenceByFd = raw::GET_FENCE_BY_FD_ERR,
    /// Share fd lookup fault.
    GetDmabufByFd = raw::GET_DMABUF_BY_FD_ERR,
    /// Copy-in fault.
    CopyFromUser = raw::COPY_FROM_USER_ERR,
    /// Copy-out fault.
    CopyToUser = raw::COPY_TO_USER_ERR,
    /// Job pool exhausted.
    NotEnoughEmptyKcmd = raw::NOT_ENOUGH_EMPTY_KCMD_ERR,
    /// Worker creation fault.
    CreateThread = raw::CREATE_THREAD_ERR,
    /// IOMMU fault.
    IommuMap = raw::IOMMU_MAP_ERR,
    /// Parameter fault.
    ParamChk = raw::PARAM_CHK_ERR,
    /// Engine busy.
    HwBusy = raw::HW_BUSY_ERR,
    /// Engine hang.
    HwHang = raw::HW_HANG_ERR,
}

impl ErrorCode {
    /// Every code, in numeric order.
    pub const ALL: [Self; 15] = [
        Self::NoErr,
        Self::CtlCode,
        Self::ClkChk,
        Self::CreateFence,
        Self::PutFenceToUser,
        Self::GetFenceByFd,
        Self::GetDmabufByFd,
        Self::CopyFromUser,
        Self::CopyToUser,
        Self::NotEnoughEmptyKcmd,
        Self::CreateThread,
        Self::IommuMap,
        Self::ParamChk,
        Self::HwBusy,
        Self::HwHang,
    ];

    /// Look up a raw value. Unknown values yield `None`.
    #[must_use]
    pub fn from_raw(value: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.raw() == value)
    }

    /// Numeric value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self as u32
    }

    /// `true` for `NoErr`.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::NoErr)
    }

    /// `true` for the `0x200` family.
    #[must_use]
    pub const fn is_hardware(self) -> bool {
        self.raw() >= raw::HW_BUSY_ERR
    }

    /// Upper-case name as it appears in driver logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::NoErr => "NO_ERR",
            Self::CtlCode => "CTL_CODE_ERR",
            Self::ClkChk => "CLK_CHK_ERR",
            Self::CreateFence => "CREATE_FENCE_ERR",
            Self::PutFenceToUser => "PUT_FENCE_TO_USER_ERR",
            Self::GetFenceByFd => "GET_FENCE_BY_FD_ERR",
            Self::GetDmabufByFd => "GET_DMABUF_BY_FD_ERR",
            Self::CopyFromUser => "COPY_FROM_USER_ERR",
            Self::CopyToUser => "COPY_TO_USER_ERR",
            Self::NotEnoughEmptyKcmd => "NOT_ENOUGH_EMPTY_KCMD_ERR",
            Self::CreateThread => "CREATE_THREAD_ERR",
            Self::IommuMap => "IOMMU_MAP_ERR",
            Self::ParamChk => "PARAM_CHK_ERR",
            Self::HwBusy => "HW_BUSY_ERR",
            Self::HwHang => "HW_HANG_ERR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:#x})", self.name(), self.raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn families_are_contiguous() {
        assert_eq!(raw::PARAM_CHK_ERR - raw::CTL_CODE_ERR, 11);
        assert_eq!(raw::HW_HANG_ERR, raw::HW_BUSY_ERR + 1);
    }

    #[test]
    fn raw_lookup_covers_table() {
        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::from_raw(code.raw()), Some(code));
        }
        assert_eq!(ErrorCode::from_raw(0x1ff), None);
    }

    #[test]
    fn hardware_family() {
        assert!(ErrorCode::HwBusy.is_hardware());
        assert!(ErrorCode::HwHang.is_hardware());
        assert!(!ErrorCode::ClkChk.is_hardware());
        assert!(ErrorCode::NoErr.is_ok());
        assert_eq!(ErrorCode::HwBusy.to_string(), "HW_BUSY_ERR (0x200)");
    }
}
