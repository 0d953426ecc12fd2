//! `gsp`: command-line driver for the GSP job scheduler.
//!
//! Every command runs against the software backend, so the scheduler can be
//! exercised (and its recovery and power paths demonstrated) on any host.
//!
//! ```text
//! USAGE:
//!   gsp probe                        Capability record and core layout
//!   gsp submit [--jobs N] [--async]  Submit batches and report latency
//!   gsp stress [--threads T]         Concurrent submitters
//!   gsp hang                         Hang core 0 and show the watchdog recovery
//!   gsp fault <kind>                 Inject any fault and show the recovery
//!   gsp suspend                      Suspend/resume cycle under load
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use gsp_chip::compat::ChipRevision;
use gsp_chip::layer::LayerType;
use gsp_chip::uapi::{encode_batch, CfgUser, LayerUser, CFG_USER_SIZE};
use gsp_driver::backends::{SoftwareBufferPool, SoftwareControl, SoftwareCore, SoftwareInterface, TriggerFault};
use gsp_driver::{BackendParts, CoreOps, Device, DeviceConfig, SubmitRequest, Timeouts};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gsp", about = "GSP 2D accelerator scheduler CLI", version)]
struct Cli {
    /// Compatible string of the modelled instance.
    #[arg(long, global = true, default_value = "sprd,gsp-r8p0-sharkl5pro")]
    compatible: String,

    /// Override the number of cores.
    #[arg(long, global = true)]
    cores: Option<usize>,

    /// Use the driver's hardware timeouts instead of the short simulated ones.
    #[arg(long, global = true)]
    hw_timeouts: bool,

    /// Debug logging (RUST_LOG still wins when set).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Probe the device and print its capability record and core layout.
    Probe,
    /// Submit batches of jobs and report latency.
    Submit {
        /// Jobs per batch.
        #[arg(short, long, default_value_t = 1)]
        jobs: usize,
        /// Number of batches.
        #[arg(short, long, default_value_t = 1)]
        iterations: usize,
        /// Submit asynchronously and wait on the published fence.
        #[arg(long = "async")]
        is_async: bool,
    },
    /// Submit from several threads at once.
    Stress {
        /// Submitting threads.
        #[arg(short, long, default_value_t = 4)]
        threads: usize,
        /// Synchronous submissions per thread.
        #[arg(short, long, default_value_t = 100)]
        iterations: usize,
    },
    /// Hang core 0 and show the watchdog recovery.
    Hang,
    /// Inject a fault on core 0 and show how the core recovers.
    Fault {
        /// Fault to inject.
        #[arg(value_enum)]
        kind: FaultKind,
    },
    /// Suspend with a job in flight, then resume and submit again.
    Suspend,
}

#[derive(Clone, Copy, ValueEnum)]
enum FaultKind {
    /// Engine busy at trigger (full reset)
    Busy,
    /// Clock check failure
    ClkChk,
    /// Control code failure
    CtlCode,
    /// Accepted but never interrupts (watchdog)
    Hang,
    /// Interrupt with error status
    IrqError,
    /// Engine clock enable failure
    Enable,
    /// Engine release failure after the interrupt
    Release,
}

/// Device plus the harness handles of the software backend
struct Sim {
    device: Device,
    controls: Vec<SoftwareControl>,
    buffers: Arc<SoftwareBufferPool>,
}

impl Sim {
    fn build(cli: &Cli) -> Result<Self> {
        let revision = ChipRevision::from_compatible(&cli.compatible)
            .with_context(|| format!("unknown compatible {:?}", cli.compatible))?;
        let mut config = DeviceConfig::for_compatible(&cli.compatible)?;
        if let Some(cores) = cli.cores {
            config = DeviceConfig::new(&cli.compatible, cores)?;
        }
        if !cli.hw_timeouts {
            config = config.with_timeouts(Timeouts::simulated());
        }

        let mut cores: Vec<Arc<dyn CoreOps>> = Vec::new();
        let mut controls = Vec::new();
        for _ in 0..config.cores.len() {
            let (core, control) = SoftwareCore::new(revision);
            cores.push(Arc::new(core));
            controls.push(control);
        }
        let iface = gsp_chip::compat::interface_name(&cli.compatible).unwrap_or("unknown");
        let buffers = Arc::new(SoftwareBufferPool::new());
        let parts = BackendParts {
            cores,
            interface: Arc::new(SoftwareInterface::new(iface)),
            buffers: buffers.clone(),
        };

        Ok(Self {
            device: Device::new(config, parts)?,
            controls,
            buffers,
        })
    }

    fn batch(&self, first_id: u32, jobs: usize) -> Vec<u8> {
        let cfgs: Vec<_> = (0..jobs)
            .map(|i| {
                let mut cfg = CfgUser::new(first_id + u32::try_from(i).unwrap_or(0));
                cfg.img = LayerUser::with_buffer(LayerType::Img, self.buffers.register(1 << 20));
                cfg.des = LayerUser::with_buffer(LayerType::Des, self.buffers.register(1 << 20));
                cfg
            })
            .collect();
        encode_batch(&cfgs)
    }

    /// Submit one batch; async batches are waited on through their fence
    fn run(&self, first_id: u32, jobs: usize, is_async: bool) -> Result<()> {
        let mut arg = self.batch(first_id, jobs);
        let mut request = SubmitRequest::new(jobs, CFG_USER_SIZE);
        if is_async {
            request = request.asynchronous();
        }
        let Some(fd) = self.device.submit(request, &mut arg)? else {
            return Ok(());
        };
        let fence = self.device.fences().get(fd)?;
        let waited = fence.wait_timeout(self.device.timeouts().completion_wait);
        self.device.close_fence(fd);
        if !waited {
            bail!("fence fd {fd} did not signal");
        }
        if fence.has_error() {
            bail!("fence fd {fd} signaled with an error");
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let fallback = if cli.verbose { "gsp_driver=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into()))
        .init();

    let sim = Sim::build(&cli)?;
    match cli.command {
        Cmd::Probe => cmd_probe(&sim),
        Cmd::Submit {
            jobs,
            iterations,
            is_async,
        } => cmd_submit(&sim, jobs, iterations, is_async)?,
        Cmd::Stress {
            threads,
            iterations,
        } => cmd_stress(&sim, threads, iterations)?,
        Cmd::Hang => cmd_fault(&sim, FaultKind::Hang)?,
        Cmd::Fault { kind } => cmd_fault(&sim, kind)?,
        Cmd::Suspend => cmd_suspend(&sim)?,
    }
    Ok(())
}

fn cmd_probe(sim: &Sim) {
    let config = sim.device.config();
    let cap = sim.device.capability();

    println!("Compatible   : {}", config.compatible);
    println!("Version      : {}", cap.version);
    println!("Cores        : {}", cap.core_cnt);
    println!("Jobs/submit  : {}", cap.io_cnt);
    println!("Layers       : {} ({} image)", cap.max_layer, cap.max_img_layer);
    println!("Output       : {}x{} .. {}x{}", cap.out_min.rect_w, cap.out_min.rect_h, cap.out_max.rect_w, cap.out_max.rect_h);
    println!("Crop         : {}x{} .. {}x{}", cap.crop_min.rect_w, cap.crop_min.rect_h, cap.crop_max.rect_w, cap.crop_max.rect_h);
    println!("Buffer type  : {:?}", cap.buf_type);
    for core in &config.cores {
        println!(
            "core[{}]      : {} slots{}{}",
            core.id,
            core.kcfg_num,
            if core.real_time { ", real-time" } else { "" },
            if core.need_iommu { ", iommu" } else { "" }
        );
    }
    let t = sim.device.timeouts();
    println!("Hang watchdog: {:?}", t.hang);
    println!("Fence wait   : {:?}", t.fence_wait);
}

fn cmd_submit(sim: &Sim, jobs: usize, iterations: usize, is_async: bool) -> Result<()> {
    let mut latencies = Vec::with_capacity(iterations);
    for i in 0..iterations {
        let first_id = u32::try_from(i * jobs).unwrap_or(u32::MAX);
        let start = Instant::now();
        sim.run(first_id, jobs, is_async)
            .with_context(|| format!("batch {i}"))?;
        latencies.push(start.elapsed());
    }

    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let count = u32::try_from(latencies.len().max(1)).unwrap_or(u32::MAX);
    println!(
        "{iterations} {} batches of {jobs}: mean {:?}, p50 {:?}, max {:?}",
        if is_async { "async" } else { "sync" },
        total / count,
        latencies.get(latencies.len() / 2).copied().unwrap_or_default(),
        latencies.last().copied().unwrap_or_default()
    );
    println!("\n{}", sim.device.stats());
    Ok(())
}

fn cmd_stress(sim: &Sim, threads: usize, iterations: usize) -> Result<()> {
    let start = Instant::now();
    let failures: usize = thread::scope(|s| {
        let workers: Vec<_> = (0..threads)
            .map(|t| {
                s.spawn(move || {
                    (0..iterations)
                        .filter(|&i| {
                            let id = u32::try_from(t * iterations + i).unwrap_or(u32::MAX);
                            sim.run(id, 1, false).is_err()
                        })
                        .count()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap_or(iterations)).sum()
    });
    let elapsed = start.elapsed();

    let total = threads * iterations;
    println!(
        "{total} jobs from {threads} threads in {elapsed:?} ({failures} failed)"
    );
    for core in sim.device.stats().cores {
        println!("  core[{}] completed {}", core.id, core.completed);
    }
    if failures > 0 {
        bail!("{failures} submissions failed");
    }
    Ok(())
}

fn cmd_fault(sim: &Sim, kind: FaultKind) -> Result<()> {
    let control = sim.controls.first().context("no cores")?;
    match kind {
        FaultKind::Busy => control.inject(TriggerFault::HwBusy),
        FaultKind::ClkChk => control.inject(TriggerFault::ClkChk),
        FaultKind::CtlCode => control.inject(TriggerFault::CtlCode),
        FaultKind::Hang => control.inject(TriggerFault::Hang),
        FaultKind::IrqError => control.inject(TriggerFault::IrqError),
        FaultKind::Enable => control.fail_next_enable(),
        FaultKind::Release => control.fail_next_release(),
    }

    // a single-job batch always lands on core 0 of an idle device
    match sim.run(0, 1, false) {
        Ok(()) => println!("faulted job: completed"),
        Err(e) => println!("faulted job: {e:#}"),
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while !sim.device.is_idle() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    sim.run(1, 1, false).context("core did not recover")?;
    println!("follow-up job: completed");

    let sw = control.counters();
    println!("engine       : {} triggers, {} dumps, {} resets", sw.triggers, sw.dumps, sw.resets);
    println!("\n{}", sim.device.stats());
    Ok(())
}

fn cmd_suspend(sim: &Sim) -> Result<()> {
    let mut arg = sim.batch(0, 2);
    let fd = sim
        .device
        .submit(SubmitRequest::new(2, CFG_USER_SIZE).asynchronous(), &mut arg)?
        .context("async submit published no fence")?;

    let start = Instant::now();
    sim.device.suspend()?;
    info!("suspended in {:?}", start.elapsed());
    println!("suspend      : {:?} (suspended: {})", start.elapsed(), sim.device.is_suspend());

    let fence = sim.device.fences().get(fd)?;
    fence.wait_timeout(sim.device.timeouts().completion_wait);
    println!(
        "batch fence  : {}",
        match (fence.is_signaled(), fence.has_error()) {
            (false, _) => "pending",
            (true, false) => "signaled",
            (true, true) => "signaled with error (queued work dropped)",
        }
    );
    sim.device.close_fence(fd);

    let start = Instant::now();
    sim.device.resume()?;
    println!("resume       : {:?}", start.elapsed());

    sim.run(10, 1, false).context("submit after resume")?;
    println!("after resume : job completed");
    println!("\n{}", sim.device.stats());
    Ok(())
}
