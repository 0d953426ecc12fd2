//! Chip revisions and compatible strings.
//!
//! A compatible string has the form `sprd,gsp-<revision>-<soc>`. The
//! revision selects the core backend; the trailing SoC field names the
//! power/clock interface the cores sit behind.

/// GSP hardware revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipRevision {
    /// r6p0 (sharkl3).
    R6p0,
    /// lite_r2p0 (sharkle, pike2).
    LiteR2p0,
    /// lite_r3p0 (sharkl5).
    LiteR3p0,
    /// r7p0 (roc1).
    R7p0,
    /// r8p0 (sharkl5pro).
    R8p0,
}

/// Known compatible strings and the revision each one selects.
pub const COMPATIBLES: &[(&str, ChipRevision)] = &[
    ("sprd,gsp-r6p0-sharkl3", ChipRevision::R6p0),
    ("sprd,gsp-lite_r3p0-sharkl5", ChipRevision::LiteR3p0),
    ("sprd,gsp-lite_r2p0-sharkle", ChipRevision::LiteR2p0),
    ("sprd,gsp-lite_r2p0-pike2", ChipRevision::LiteR2p0),
    ("sprd,gsp-r7p0-roc1", ChipRevision::R7p0),
    ("sprd,gsp-r8p0-sharkl5pro", ChipRevision::R8p0),
];

impl ChipRevision {
    /// Match a compatible string exactly.
    #[must_use]
    pub fn from_compatible(compatible: &str) -> Option<Self> {
        COMPATIBLES
            .iter()
            .find(|(c, _)| *c == compatible)
            .map(|&(_, rev)| rev)
    }

    /// Revision tag as written in compatible strings.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::R6p0 => "r6p0",
            Self::LiteR2p0 => "lite_r2p0",
            Self::LiteR3p0 => "lite_r3p0",
            Self::R7p0 => "r7p0",
            Self::R8p0 => "r8p0",
        }
    }

    /// Cores instantiated by this revision.
    #[must_use]
    pub const fn core_count(self) -> usize {
        match self {
            Self::R8p0 | Self::R7p0 => 2,
            _ => 1,
        }
    }

    /// Jobs accepted per submission.
    #[must_use]
    pub const fn io_cnt(self) -> usize {
        match self {
            Self::R8p0 | Self::R7p0 => 4,
            _ => 2,
        }
    }

    /// Maximum layers composed in one job.
    #[must_use]
    pub const fn max_layer(self) -> u32 {
        match self {
            Self::LiteR2p0 => 2,
            _ => 3,
        }
    }
}

impl std::fmt::Display for ChipRevision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Interface name carried in a compatible string: the text after the
/// second `-`.
///
/// ```
/// use gsp_chip::compat::interface_name;
/// assert_eq!(interface_name("sprd,gsp-r6p0-sharkl3"), Some("sharkl3"));
/// assert_eq!(interface_name("sprd,gsp"), None);
/// ```
#[must_use]
pub fn interface_name(compatible: &str) -> Option<&str> {
    let mut parts = compatible.splitn(3, '-');
    parts.next()?;
    parts.next()?;
    parts.next().filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_compatible_has_an_interface() {
        for (compatible, rev) in COMPATIBLES {
            assert!(interface_name(compatible).is_some(), "{compatible}");
            assert!(compatible.contains(rev.tag()));
        }
    }

    #[test]
    fn unknown_compatible() {
        assert_eq!(ChipRevision::from_compatible("sprd,gsp-r9p9-x"), None);
        assert_eq!(
            ChipRevision::from_compatible("sprd,gsp-r8p0-sharkl5pro"),
            Some(ChipRevision::R8p0)
        );
    }

    #[test]
    fn multi_core_revisions() {
        assert_eq!(ChipRevision::R8p0.core_count(), 2);
        assert_eq!(ChipRevision::R6p0.core_count(), 1);
    }
}
