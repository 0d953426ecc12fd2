//! Hardware model for the GSP 2D graphics/scaling accelerator.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of what the scheduler and a submitting client agree on: the
//! driver error-code table, layer kinds, the fixed user config record, the
//! chip-revision catalogue, capability limits and the driver's timing
//! constants.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`codes`] | Driver/hardware error codes (`0x100` family, `0x200` family) |
//! | [`layer`] | Layer kinds, address types, address data and plane offsets |
//! | [`uapi`] | Little-endian user config record and trigger command encoding |
//! | [`compat`] | Chip revisions and their compatible strings |
//! | [`capability`] | Capability record reported to clients |
//! | [`timing`] | Wait, watchdog and autosuspend timeouts |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod capability;
pub mod codes;
pub mod compat;
pub mod layer;
pub mod timing;
pub mod uapi;
