//! Multi-core job scheduler for the GSP 2D graphics accelerator.
//!
//! A GSP instance has one or more execution cores. Clients submit batches
//! of up to `io_cnt` fixed-size config records, synchronously (the call
//! returns once every job finished) or asynchronously (the call returns a
//! signal-fence fd at once). This crate owns everything between the
//! submission and the engine's interrupt:
//!
//! ```text
//! Device ──select_core──► Core ─┬─ Workqueue (empty / filled)
//!   │                           ├─ Timeline  (signal fences)
//!   └─ JobList (one batch)      └─ worker    (trigger, release, recover,
//!                                             suspend, hang watchdog)
//! ```
//!
//! Register programming lives behind [`CoreOps`] and [`InterfaceOps`];
//! buffers come from a [`BufferProvider`]. The in-tree [`backends`] model a
//! GSP in software, with fault injection, so the whole scheduler runs on
//! any host.
//!
//! # Quick start
//!
//! ```no_run
//! use gsp_driver::backends::{SoftwareBufferPool, SoftwareCore, SoftwareInterface};
//! use gsp_driver::prelude::*;
//! use gsp_driver::{BackendParts, CoreOps};
//! use gsp_chip::compat::ChipRevision;
//! use gsp_chip::layer::LayerType;
//! use gsp_chip::uapi::{encode_batch, CfgUser, LayerUser, CFG_USER_SIZE};
//! use std::sync::Arc;
//!
//! # fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let config = DeviceConfig::for_compatible("sprd,gsp-r6p0-sharkl3")?;
//! let buffers = Arc::new(SoftwareBufferPool::new());
//! let (core, _control) = SoftwareCore::new(ChipRevision::R6p0);
//! let parts = BackendParts {
//!     cores: vec![Arc::new(core) as Arc<dyn CoreOps>],
//!     interface: Arc::new(SoftwareInterface::new("sharkl3")),
//!     buffers: buffers.clone(),
//! };
//! let device = Device::new(config, parts)?;
//!
//! let mut cfg = CfgUser::new(1);
//! cfg.des = LayerUser::with_buffer(LayerType::Des, buffers.register(4096));
//! let mut arg = encode_batch(&[cfg]);
//! device.submit(SubmitRequest::new(1, CFG_USER_SIZE), &mut arg)?;
//! println!("{}", device.stats());
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! | Context | Runs |
//! |---------|------|
//! | Caller thread | acquire, fill, push, sync wait, suspend/resume requests |
//! | Core worker | trigger, release, recovery, suspend/resume transitions |
//! | Interrupt line / watchdog | enqueue a message for the worker, nothing else |

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod backend;
pub mod backends;
mod buffer;
mod completion;
pub mod config;
mod device;
mod engine;
mod error;
mod job_list;
mod kcfg;
mod layer;
mod pm;
mod stats;
pub mod sync;
mod workqueue;

pub use backend::{select_backend, BackendParts, CoreOps, InterfaceOps};
pub use buffer::{BufferProvider, DmaBuf};
pub use completion::{Completion, JobCompletion};
pub use config::{CoreConfig, DeviceConfig, Timeouts};
pub use device::{Device, SubmitRequest};
pub use engine::{Core, CoreState, IrqLine, IrqStatus, RecoveryPlan, SuspendState};
pub use error::{GspError, Result};
pub use job_list::JobList;
pub use kcfg::Kcfg;
pub use layer::Layer;
pub use pm::RuntimePm;
pub use stats::{CoreStats, DeviceStats};
pub use sync::{Fence, FenceSet, FenceTable, Timeline};
pub use workqueue::{PushError, Workqueue};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        CoreState, Device, DeviceConfig, DeviceStats, GspError, IrqStatus, Result,
        SubmitRequest, SuspendState, Timeouts,
    };
}
