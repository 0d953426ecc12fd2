//! Layer kinds and addressing.
//!
//! A GSP job composes up to two source layers (an image layer and an
//! on-screen-display layer) onto one destination layer. Each layer names
//! its buffer by a share fd and may carry an acquire fence fd.

/// Role of a layer within one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum LayerType {
    /// Source image (scaled, rotated).
    Img = 0,
    /// Overlay source.
    Osd = 1,
    /// Destination.
    Des = 2,
    /// Unrecognised.
    Invalid = 3,
}

impl LayerType {
    /// Decode a raw layer type. Out-of-range values become `Invalid`.
    #[must_use]
    pub const fn from_raw(value: u32) -> Self {
        match value {
            0 => Self::Img,
            1 => Self::Osd,
            2 => Self::Des,
            _ => Self::Invalid,
        }
    }

    /// Raw value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self as u32
    }

    /// Short lower-case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Img => "img",
            Self::Osd => "osd",
            Self::Des => "des",
            Self::Invalid => "inval",
        }
    }
}

/// Kind of address the engine consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AddrType {
    /// Not set.
    Invalid = 0,
    /// Physical (reserved memory, no IOMMU).
    Physical = 1,
    /// IO-virtual (mapped through the IOMMU).
    IoVirtual = 2,
}

impl AddrType {
    /// Decode a raw address type.
    #[must_use]
    pub const fn from_raw(value: u32) -> Self {
        match value {
            1 => Self::Physical,
            2 => Self::IoVirtual,
            _ => Self::Invalid,
        }
    }
}

/// Plane addresses of one layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AddrData {
    /// Luma (or packed RGB) plane.
    pub addr_y: u32,
    /// Chroma plane.
    pub addr_uv: u32,
    /// Second chroma plane (planar formats).
    pub addr_va: u32,
}

/// Plane offsets relative to the buffer base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Offset {
    /// Offset of the uv plane.
    pub uv_offset: u32,
    /// Offset of the v plane.
    pub v_offset: u32,
}

impl AddrData {
    /// Addresses for a buffer based at `base` with the given plane offsets.
    #[must_use]
    pub const fn from_base(base: u32, offset: Offset) -> Self {
        Self {
            addr_y: base,
            addr_uv: base.wrapping_add(offset.uv_offset),
            addr_va: base.wrapping_add(offset.v_offset),
        }
    }
}

/// Rectangle in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    /// Left edge.
    pub st_x: u16,
    /// Top edge.
    pub st_y: u16,
    /// Width.
    pub rect_w: u16,
    /// Height.
    pub rect_h: u16,
}

impl Rect {
    /// A rectangle at the origin.
    #[must_use]
    pub const fn sized(rect_w: u16, rect_h: u16) -> Self {
        Self {
            st_x: 0,
            st_y: 0,
            rect_w,
            rect_h,
        }
    }
}
