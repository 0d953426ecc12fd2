//! User config record and trigger command encoding.
//!
//! ## Config record layout (little-endian, 128 bytes)
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | `job_id` (client cookie, echoed in logs) |
//! | 4 | 4 | `flags` (reserved for the chip backend) |
//! | 8 | 40 | image layer |
//! | 48 | 40 | OSD layer |
//! | 88 | 40 | destination layer |
//!
//! Each layer record:
//!
//! ```text
//! +0  type      u32     +20 addr_y    u32
//! +4  enable    u32     +24 addr_uv   u32
//! +8  share_fd  i32     +28 addr_va   u32
//! +12 wait_fd   i32     +32 uv_offset u32
//! +16 sig_fd    i32     +36 v_offset  u32
//! ```
//!
//! The scheduler writes the published signal fence fd into the
//! destination layer's `sig_fd` of the last record in a batch
//! ([`DES_SIG_FD_OFFSET`]).
//!
//! ## Trigger command
//!
//! One byte, as carried in the ioctl number:
//!
//! ```text
//! bit6 GET_CAPABILITY  bit5 TRIGGER  bit4 async  bit3 split  bit2..0 count
//! ```

use crate::layer::{AddrData, LayerType, Offset};

/// Size of one encoded layer record.
pub const LAYER_USER_SIZE: usize = 40;

/// Size of the record header.
pub const CFG_HEADER_SIZE: usize = 8;

/// Size of one encoded config record.
pub const CFG_USER_SIZE: usize = CFG_HEADER_SIZE + 3 * LAYER_USER_SIZE;

/// Byte offset of the destination layer's `sig_fd` inside one record.
pub const DES_SIG_FD_OFFSET: usize = CFG_HEADER_SIZE + 2 * LAYER_USER_SIZE + 16;

/// Marker for "no fd".
pub const NO_FD: i32 = -1;

/// Trigger command bits.
pub mod cmd {
    /// Capability query.
    pub const GET_CAPABILITY: u8 = 1 << 6;
    /// Trigger request.
    pub const TRIGGER: u8 = 1 << 5;
    /// Async flag.
    pub const ASYNC: u8 = 1 << 4;
    /// Split flag.
    pub const SPLIT: u8 = 1 << 3;
    /// Count field mask.
    pub const CNT_MASK: u8 = 0x7;
}

/// Errors decoding a config record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer shorter than the record.
    Truncated {
        /// Bytes required.
        need: usize,
        /// Bytes available.
        got: usize,
    },
    /// A layer slot holds the wrong layer kind.
    LayerSlot {
        /// Kind the slot requires.
        expected: LayerType,
        /// Raw kind found.
        found: u32,
    },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { need, got } => {
                write!(f, "config record truncated: need {need} bytes, got {got}")
            }
            Self::LayerSlot { expected, found } => {
                write!(f, "{} slot holds layer type {found}", expected.name())
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// One layer as the client describes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerUser {
    /// Layer kind.
    pub kind: LayerType,
    /// Whether the layer takes part in the job.
    pub enable: bool,
    /// Buffer share fd (`<= 0` means no buffer, addresses are used as-is).
    pub share_fd: i32,
    /// Acquire fence fd (`< 0` means none).
    pub wait_fd: i32,
    /// Signal fence fd slot (written back by the scheduler).
    pub sig_fd: i32,
    /// Client-provided addresses.
    pub addr: AddrData,
    /// Plane offsets.
    pub offset: Offset,
}

impl LayerUser {
    /// A disabled layer of the given kind.
    #[must_use]
    pub const fn disabled(kind: LayerType) -> Self {
        Self {
            kind,
            enable: false,
            share_fd: NO_FD,
            wait_fd: NO_FD,
            sig_fd: NO_FD,
            addr: AddrData {
                addr_y: 0,
                addr_uv: 0,
                addr_va: 0,
            },
            offset: Offset {
                uv_offset: 0,
                v_offset: 0,
            },
        }
    }

    /// An enabled layer backed by `share_fd`.
    #[must_use]
    pub const fn with_buffer(kind: LayerType, share_fd: i32) -> Self {
        let mut layer = Self::disabled(kind);
        layer.enable = true;
        layer.share_fd = share_fd;
        layer
    }

    /// Same layer with an acquire fence fd.
    #[must_use]
    pub const fn waiting_on(mut self, wait_fd: i32) -> Self {
        self.wait_fd = wait_fd;
        self
    }

    /// Encode into `out[..LAYER_USER_SIZE]`.
    ///
    /// # Panics
    ///
    /// Panics if `out` is shorter than [`LAYER_USER_SIZE`].
    pub fn encode(&self, out: &mut [u8]) {
        let words: [u32; 10] = [
            self.kind.raw(),
            u32::from(self.enable),
            self.share_fd as u32,
            self.wait_fd as u32,
            self.sig_fd as u32,
            self.addr.addr_y,
            self.addr.addr_uv,
            self.addr.addr_va,
            self.offset.uv_offset,
            self.offset.v_offset,
        ];
        for (chunk, word) in out[..LAYER_USER_SIZE].chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
    }

    /// Decode from `bytes[..LAYER_USER_SIZE]`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] when `bytes` is too short.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < LAYER_USER_SIZE {
            return Err(DecodeError::Truncated {
                need: LAYER_USER_SIZE,
                got: bytes.len(),
            });
        }
        let w = |i: usize| read_u32(bytes, i * 4);
        Ok(Self {
            kind: LayerType::from_raw(w(0)),
            enable: w(1) != 0,
            share_fd: w(2) as i32,
            wait_fd: w(3) as i32,
            sig_fd: w(4) as i32,
            addr: AddrData {
                addr_y: w(5),
                addr_uv: w(6),
                addr_va: w(7),
            },
            offset: Offset {
                uv_offset: w(8),
                v_offset: w(9),
            },
        })
    }
}

/// One config record: one hardware job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfgUser {
    /// Client cookie.
    pub job_id: u32,
    /// Backend-specific flags.
    pub flags: u32,
    /// Image layer.
    pub img: LayerUser,
    /// OSD layer.
    pub osd: LayerUser,
    /// Destination layer.
    pub des: LayerUser,
}

impl CfgUser {
    /// A record with all layers disabled.
    #[must_use]
    pub const fn new(job_id: u32) -> Self {
        Self {
            job_id,
            flags: 0,
            img: LayerUser::disabled(LayerType::Img),
            osd: LayerUser::disabled(LayerType::Osd),
            des: LayerUser::disabled(LayerType::Des),
        }
    }

    /// Layers in slot order.
    #[must_use]
    pub const fn layers(&self) -> [LayerUser; 3] {
        [self.img, self.osd, self.des]
    }

    /// Encode into a fresh record.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; CFG_USER_SIZE] {
        let mut out = [0u8; CFG_USER_SIZE];
        self.encode(&mut out);
        out
    }

    /// Encode into `out[..CFG_USER_SIZE]`.
    ///
    /// # Panics
    ///
    /// Panics if `out` is shorter than [`CFG_USER_SIZE`].
    pub fn encode(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.job_id.to_le_bytes());
        out[4..8].copy_from_slice(&self.flags.to_le_bytes());
        for (slot, layer) in self.layers().iter().enumerate() {
            let at = CFG_HEADER_SIZE + slot * LAYER_USER_SIZE;
            layer.encode(&mut out[at..at + LAYER_USER_SIZE]);
        }
    }

    /// Decode one record, checking that every slot holds its own kind.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] on a short buffer or a misplaced layer.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < CFG_USER_SIZE {
            return Err(DecodeError::Truncated {
                need: CFG_USER_SIZE,
                got: bytes.len(),
            });
        }
        let slot = |i: usize, expected: LayerType| {
            let at = CFG_HEADER_SIZE + i * LAYER_USER_SIZE;
            let layer = LayerUser::decode(&bytes[at..at + LAYER_USER_SIZE])?;
            if layer.kind == expected {
                Ok(layer)
            } else {
                Err(DecodeError::LayerSlot {
                    expected,
                    found: read_u32(bytes, at),
                })
            }
        };
        Ok(Self {
            job_id: read_u32(bytes, 0),
            flags: read_u32(bytes, 4),
            img: slot(0, LayerType::Img)?,
            osd: slot(1, LayerType::Osd)?,
            des: slot(2, LayerType::Des)?,
        })
    }
}

/// Encode a batch of records back to back.
#[must_use]
pub fn encode_batch(cfgs: &[CfgUser]) -> Vec<u8> {
    let mut out = vec![0u8; cfgs.len() * CFG_USER_SIZE];
    for (cfg, chunk) in cfgs.iter().zip(out.chunks_exact_mut(CFG_USER_SIZE)) {
        cfg.encode(chunk);
    }
    out
}

/// Read the published signal fd of record `index` in a batch.
#[must_use]
pub fn published_sig_fd(batch: &[u8], index: usize) -> Option<i32> {
    let at = index * CFG_USER_SIZE + DES_SIG_FD_OFFSET;
    (batch.len() >= at + 4).then(|| read_u32(batch, at) as i32)
}

/// Decoded trigger command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerCmd {
    /// Non-blocking submission.
    pub is_async: bool,
    /// Split submission.
    pub split: bool,
    /// Job count (0..=7).
    pub cnt: u8,
}

impl TriggerCmd {
    /// Encode as the command byte.
    #[must_use]
    pub const fn encode(self) -> u8 {
        let mut nr = cmd::TRIGGER | (self.cnt & cmd::CNT_MASK);
        if self.is_async {
            nr |= cmd::ASYNC;
        }
        if self.split {
            nr |= cmd::SPLIT;
        }
        nr
    }

    /// Decode a command byte. Non-trigger commands yield `None`.
    #[must_use]
    pub const fn decode(nr: u8) -> Option<Self> {
        if nr & cmd::TRIGGER == 0 {
            return None;
        }
        Some(Self {
            is_async: nr & cmd::ASYNC != 0,
            split: nr & cmd::SPLIT != 0,
            cnt: nr & cmd::CNT_MASK,
        })
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_sizes() {
        assert_eq!(CFG_USER_SIZE, 128);
        assert_eq!(DES_SIG_FD_OFFSET, 104);
    }

    #[test]
    fn decode_reads_back_fields() {
        let mut cfg = CfgUser::new(7);
        cfg.img = LayerUser::with_buffer(LayerType::Img, 11).waiting_on(20);
        cfg.des = LayerUser::with_buffer(LayerType::Des, 12);
        let bytes = cfg.to_bytes();
        let back = CfgUser::decode(&bytes).unwrap();
        assert_eq!(back.job_id, 7);
        assert_eq!(back.img.wait_fd, 20);
        assert!(back.des.enable);
        assert!(!back.osd.enable);
    }

    #[test]
    fn misplaced_layer_is_rejected() {
        let mut cfg = CfgUser::new(1);
        cfg.osd = LayerUser::disabled(LayerType::Des);
        let err = CfgUser::decode(&cfg.to_bytes()).unwrap_err();
        assert_eq!(
            err,
            DecodeError::LayerSlot {
                expected: LayerType::Osd,
                found: 2
            }
        );
    }

    #[test]
    fn short_buffer_is_rejected() {
        let err = CfgUser::decode(&[0u8; 16]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { need: 128, got: 16 }));
    }

    #[test]
    fn sig_fd_slot_lands_in_des_layer() {
        let mut batch = encode_batch(&[CfgUser::new(0), CfgUser::new(1)]);
        let at = CFG_USER_SIZE + DES_SIG_FD_OFFSET;
        batch[at..at + 4].copy_from_slice(&9i32.to_le_bytes());
        let second = CfgUser::decode(&batch[CFG_USER_SIZE..]).unwrap();
        assert_eq!(second.des.sig_fd, 9);
        assert_eq!(published_sig_fd(&batch, 1), Some(9));
        assert_eq!(published_sig_fd(&batch, 2), None);
    }

    #[test]
    fn trigger_command_bits() {
        let cmd = TriggerCmd {
            is_async: true,
            split: false,
            cnt: 3,
        };
        assert_eq!(cmd.encode(), 0x20 | 0x10 | 3);
        assert_eq!(TriggerCmd::decode(cmd.encode()), Some(cmd));
        assert_eq!(TriggerCmd::decode(cmd::GET_CAPABILITY), None);
    }
}
