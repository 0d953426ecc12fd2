//! Submit a synchronous and an asynchronous batch
//!
//! Builds a two-core device on the software backend, keeps the buffer pool
//! to register client buffers, then waits on the published fence.

use gsp_chip::compat::ChipRevision;
use gsp_chip::layer::LayerType;
use gsp_chip::uapi::{encode_batch, CfgUser, LayerUser, CFG_USER_SIZE};
use gsp_driver::backends::{SoftwareBufferPool, SoftwareCore, SoftwareInterface};
use gsp_driver::prelude::*;
use gsp_driver::{BackendParts, CoreOps};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("gsp_driver=debug")
        .init();

    println!("🚀 GSP Basic Submit\n");

    let config = DeviceConfig::for_compatible("sprd,gsp-r8p0-sharkl5pro")?.with_cores(2, 16);
    let buffers = Arc::new(SoftwareBufferPool::new());
    let parts = BackendParts {
        cores: (0..2)
            .map(|_| Arc::new(SoftwareCore::new(ChipRevision::R8p0).0) as Arc<dyn CoreOps>)
            .collect(),
        interface: Arc::new(SoftwareInterface::new("sharkl5pro")),
        buffers: buffers.clone(),
    };
    let device = Device::new(config, parts)?;

    let batch = |ids: &[u32]| {
        let cfgs: Vec<_> = ids
            .iter()
            .map(|&id| {
                let mut cfg = CfgUser::new(id);
                cfg.img = LayerUser::with_buffer(LayerType::Img, buffers.register(1920 * 1080 * 4));
                cfg.des = LayerUser::with_buffer(LayerType::Des, buffers.register(1920 * 1080 * 4));
                cfg
            })
            .collect();
        encode_batch(&cfgs)
    };

    println!("📤 Synchronous batch of 2...");
    let start = Instant::now();
    let mut arg = batch(&[1, 2]);
    device.submit(SubmitRequest::new(2, CFG_USER_SIZE), &mut arg)?;
    println!("   ✅ done in {:?}", start.elapsed());

    println!("📤 Asynchronous batch of 3...");
    let mut arg = batch(&[3, 4, 5]);
    let fd = device
        .submit(SubmitRequest::new(3, CFG_USER_SIZE).asynchronous(), &mut arg)?
        .ok_or_else(|| GspError::invalid_state("async submit published no fence"))?;
    println!("   📮 signal fence fd {fd}");

    let fence = device.fences().get(fd)?;
    if fence.wait_timeout(Duration::from_secs(3)) && !fence.has_error() {
        println!("   ✅ fence signaled");
    } else {
        println!("   ❌ fence failed");
    }
    device.close_fence(fd);

    println!("\n📊 Device status:\n{}", device.stats());
    Ok(())
}
