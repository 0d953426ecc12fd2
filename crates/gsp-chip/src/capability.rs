//! Capability record reported to clients.

use crate::compat::ChipRevision;
use crate::layer::{AddrType, Rect};

/// Marks an initialised capability record.
pub const CAPABILITY_MAGIC: u32 = 0xDEEF_BEEF;

/// What one GSP instance can do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    /// [`CAPABILITY_MAGIC`] once filled in.
    pub magic: u32,
    /// Revision string (`"r6p0"`, ...).
    pub version: String,
    /// Jobs accepted per submission.
    pub io_cnt: u32,
    /// Cores in the device.
    pub core_cnt: u32,
    /// Layers per job.
    pub max_layer: u32,
    /// Image layers per job.
    pub max_img_layer: u32,
    /// Largest crop.
    pub crop_max: Rect,
    /// Smallest crop.
    pub crop_min: Rect,
    /// Largest output.
    pub out_max: Rect,
    /// Smallest output.
    pub out_min: Rect,
    /// Address kind the engine consumes.
    pub buf_type: AddrType,
}

impl Capability {
    /// Default record for a revision.
    #[must_use]
    pub fn for_revision(rev: ChipRevision) -> Self {
        let (max, buf_type) = match rev {
            ChipRevision::LiteR2p0 => (Rect::sized(4096, 4096), AddrType::Physical),
            _ => (Rect::sized(8191, 8191), AddrType::IoVirtual),
        };
        Self {
            magic: CAPABILITY_MAGIC,
            version: rev.tag().to_string(),
            io_cnt: rev.io_cnt() as u32,
            core_cnt: rev.core_count() as u32,
            max_layer: rev.max_layer(),
            max_img_layer: 1,
            crop_max: max,
            crop_min: Rect::sized(4, 4),
            out_max: max,
            out_min: Rect::sized(4, 4),
            buf_type,
        }
    }

    /// `true` once the magic is set.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.magic == CAPABILITY_MAGIC
    }

    /// Whether an output of `w`×`h` fits the limits.
    #[must_use]
    pub const fn accepts_output(&self, w: u16, h: u16) -> bool {
        w >= self.out_min.rect_w
            && h >= self.out_min.rect_h
            && w <= self.out_max.rect_w
            && h <= self.out_max.rect_h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_defaults() {
        let cap = Capability::for_revision(ChipRevision::R8p0);
        assert!(cap.is_valid());
        assert_eq!(cap.core_cnt, 2);
        assert_eq!(cap.version, "r8p0");
        assert_eq!(cap.buf_type, AddrType::IoVirtual);
        assert!(cap.accepts_output(1920, 1080));
        assert!(!cap.accepts_output(2, 2));
    }
}
