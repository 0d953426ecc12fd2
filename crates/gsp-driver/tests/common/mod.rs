//! Shared rig for the scheduler integration tests
//!
//! Builds a device on the software backend and keeps the harness-side
//! handles (core controls, interface, buffer pool) for inspection.

#![allow(dead_code)]

use gsp_chip::compat::ChipRevision;
use gsp_chip::layer::LayerType;
use gsp_chip::uapi::{encode_batch, CfgUser, LayerUser, CFG_USER_SIZE};
use gsp_driver::backends::{IrqMode, SoftwareBufferPool, SoftwareControl, SoftwareCore, SoftwareInterface};
use gsp_driver::{BackendParts, CoreOps, Device, DeviceConfig, Result, SubmitRequest, Timeouts};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const COMPATIBLE: &str = "sprd,gsp-r8p0-sharkl5pro";

pub struct Rig {
    pub device: Device,
    pub controls: Vec<SoftwareControl>,
    pub iface: Arc<SoftwareInterface>,
    pub buffers: Arc<SoftwareBufferPool>,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn rig(cores: usize, slots: usize) -> Rig {
    rig_with(cores, slots, Timeouts::simulated())
}

pub fn rig_with(cores: usize, slots: usize, timeouts: Timeouts) -> Rig {
    init_tracing();
    let config = DeviceConfig::for_compatible(COMPATIBLE)
        .expect("known compatible")
        .with_cores(cores, slots)
        .with_timeouts(timeouts);

    let mut ops: Vec<Arc<dyn CoreOps>> = Vec::new();
    let mut controls = Vec::new();
    for _ in 0..cores {
        let (core, control) = SoftwareCore::new(ChipRevision::R8p0);
        ops.push(Arc::new(core));
        controls.push(control);
    }
    let iface = Arc::new(SoftwareInterface::new("sharkl5pro"));
    let buffers = Arc::new(SoftwareBufferPool::new());
    let parts = BackendParts {
        cores: ops,
        interface: iface.clone(),
        buffers: buffers.clone(),
    };

    Rig {
        device: Device::new(config, parts).expect("device probe"),
        controls,
        iface,
        buffers,
    }
}

impl Rig {
    /// Hold interrupts on every core until fired by hand
    pub fn manual_irqs(&self) {
        for control in &self.controls {
            control.set_irq_mode(IrqMode::Manual);
        }
    }

    /// A record drawing into a fresh destination buffer
    pub fn record(&self, job_id: u32) -> CfgUser {
        let mut cfg = CfgUser::new(job_id);
        cfg.des = LayerUser::with_buffer(LayerType::Des, self.buffers.register(4096));
        cfg
    }

    pub fn submit_sync(&self, ids: &[u32]) -> Result<Option<i32>> {
        let cfgs: Vec<_> = ids.iter().map(|&id| self.record(id)).collect();
        self.submit(&cfgs, false).0
    }

    pub fn submit_async(&self, ids: &[u32]) -> (Result<Option<i32>>, Vec<u8>) {
        let cfgs: Vec<_> = ids.iter().map(|&id| self.record(id)).collect();
        self.submit(&cfgs, true)
    }

    pub fn submit(&self, cfgs: &[CfgUser], is_async: bool) -> (Result<Option<i32>>, Vec<u8>) {
        let mut arg = encode_batch(cfgs);
        let mut request = SubmitRequest::new(cfgs.len(), CFG_USER_SIZE);
        if is_async {
            request = request.asynchronous();
        }
        (self.device.submit(request, &mut arg), arg)
    }

    /// Wait for every core to settle back to idle
    pub fn settle(&self) {
        assert!(
            wait_until(Duration::from_secs(3), || self.device.is_idle()),
            "device did not settle:\n{}",
            self.device.stats()
        );
    }

    /// Nothing queued or in flight, and no buffer reference or mapping left
    pub fn assert_clean(&self) {
        self.settle();
        let stats = self.device.stats();
        assert!(stats.is_drained(), "not drained:\n{stats}");
        assert_eq!(self.buffers.outstanding_refs(), 0, "buffer refs leaked");
        assert_eq!(self.buffers.live_mappings(), 0, "iommu mappings leaked");
        assert_eq!(self.buffers.underflows(), 0, "buffer released twice");
        assert_eq!(self.iface.prepare_balance(), 0, "prepare/unprepare unbalanced");
    }
}

pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}
