//! Backend abstraction for GSP hardware
//!
//! The scheduler never programs registers itself. Each chip revision plugs
//! in through two operation tables:
//!
//! - [`CoreOps`]: one per execution core (payload decoding, trigger,
//!   enable/disable, dump, reset);
//! - [`InterfaceOps`]: the power/clock interface shared by all cores.
//!
//! Buffers come from a [`BufferProvider`]. The three are bundled as
//! [`BackendParts`] and chosen once, by compatible string, in
//! [`select_backend`].

use crate::backends::{SoftwareBufferPool, SoftwareCore, SoftwareInterface};
use crate::buffer::BufferProvider;
use crate::config::{CoreConfig, DeviceConfig};
use crate::engine::IrqLine;
use crate::error::{GspError, Result};
use crate::kcfg::Kcfg;
use bytes::Bytes;
use gsp_chip::capability::Capability;
use gsp_chip::codes::ErrorCode;
use gsp_chip::compat::{interface_name, ChipRevision};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::info;

/// Operation table of one execution core
///
/// Called from the core's worker for the execution path and from submitter
/// threads for [`CoreOps::copy_payload`] and [`CoreOps::intercept`], so
/// implementations keep their own state behind interior mutability.
pub trait CoreOps: Debug + Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Check and absorb the core node
    ///
    /// # Errors
    ///
    /// Returns an error if the node is unusable for this backend.
    fn parse_config(&self, config: &CoreConfig) -> Result<()>;

    /// Reserve backend storage for `kcfg_num` job slots
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be allocated.
    fn alloc(&self, kcfg_num: usize) -> Result<()>;

    /// Bring the core up; `irq` is how the engine reports completion
    ///
    /// # Errors
    ///
    /// Returns an error if the core cannot be initialized.
    fn init(&self, irq: IrqLine) -> Result<()>;

    /// Size of one client config record
    fn cfg_size(&self) -> usize;

    /// Decode record `index` into `job` (payload and layers)
    ///
    /// # Errors
    ///
    /// Returns [`GspError::Config`] for malformed records.
    fn copy_payload(&self, job: &mut Kcfg, record: Bytes, index: usize) -> Result<()>;

    /// Byte offset, within a batch of `size`-byte records, of the slot where
    /// record `index` receives its signal fence fd
    fn intercept(&self, index: usize, size: usize) -> Option<usize>;

    /// Ungate the core before a trigger
    ///
    /// # Errors
    ///
    /// Returns an error if the core cannot be enabled.
    fn enable(&self) -> Result<()>;

    /// Gate the core after a run
    fn disable(&self);

    /// Start `job`; the interrupt arrives later through the [`IrqLine`]
    fn trigger(&self, job: &Kcfg) -> ErrorCode;

    /// Post-interrupt housekeeping
    ///
    /// # Errors
    ///
    /// Returns an error if the engine did not return to a clean state.
    fn release(&self) -> Result<()>;

    /// Log engine state for diagnosis
    fn dump(&self);

    /// Reset the engine after a hang
    ///
    /// # Errors
    ///
    /// Returns an error if the reset did not take.
    fn reset(&self) -> Result<()>;

    /// Drop calibration state so the next trigger recomputes it
    fn recalibrate(&self) {}

    /// What this core can do
    fn capability(&self) -> Capability;
}

/// Power/clock interface shared by the cores of one device
pub trait InterfaceOps: Debug + Send + Sync {
    /// Interface name (the SoC field of the compatible string)
    fn name(&self) -> &str;

    /// One-time setup at probe and on resume
    ///
    /// # Errors
    ///
    /// Returns an error if the interface cannot be brought up.
    fn init(&self) -> Result<()>;

    /// Teardown at suspend and remove
    fn deinit(&self);

    /// Enable clocks and power around a trigger
    ///
    /// # Errors
    ///
    /// Returns an error if clocks or power cannot be enabled.
    fn prepare(&self) -> Result<()>;

    /// Undo [`InterfaceOps::prepare`]
    fn unprepare(&self);

    /// Reset the interface after a hang
    ///
    /// # Errors
    ///
    /// Returns an error if the reset did not take.
    fn reset(&self) -> Result<()>;

    /// Log interface state
    fn dump(&self);
}

/// Everything a device needs from its backend
#[derive(Debug, Clone)]
pub struct BackendParts {
    /// One table per configured core, in configuration order
    pub cores: Vec<Arc<dyn CoreOps>>,
    /// Shared interface
    pub interface: Arc<dyn InterfaceOps>,
    /// Buffer resolution and IOMMU
    pub buffers: Arc<dyn BufferProvider>,
}

/// Select the backend for `config.compatible`
///
/// Every known revision is served by the software model: register-level
/// programming is the backend's business, not the scheduler's.
///
/// # Errors
///
/// Returns [`GspError::Config`] for unknown compatible strings.
pub fn select_backend(config: &DeviceConfig) -> Result<BackendParts> {
    let rev = ChipRevision::from_compatible(&config.compatible).ok_or_else(|| {
        GspError::config(format!("no backend for {:?}", config.compatible))
    })?;
    let iface = interface_name(&config.compatible).unwrap_or("unknown");
    info!(
        "Selected software backend: {rev} on {iface} ({} cores)",
        config.cores.len()
    );

    let cores = config
        .cores
        .iter()
        .map(|_| {
            let (core, _control) = SoftwareCore::new(rev);
            Arc::new(core) as Arc<dyn CoreOps>
        })
        .collect();

    Ok(BackendParts {
        cores,
        interface: Arc::new(SoftwareInterface::new(iface)),
        buffers: Arc::new(SoftwareBufferPool::new()),
    })
}
