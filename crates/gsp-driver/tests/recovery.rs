//! Fault injection and recovery tests on the software backend
//!
//! Each test queues one fault, checks the error the submitter sees, then
//! checks the core cleaned up after itself and still accepts work.

mod common;

use common::{rig, rig_with, wait_until, Rig};
use gsp_chip::codes::ErrorCode;
use gsp_driver::backends::TriggerFault;
use gsp_driver::{CoreState, GspError, IrqStatus, Timeouts};
use std::time::Duration;

const FENCE_WAIT: Duration = Duration::from_secs(2);

/// Core 0 recovered, is idle again and runs the next job
fn assert_recovered(rig: &Rig) {
    rig.assert_clean();
    assert_eq!(rig.device.core(0).map(|c| c.state()), Some(CoreState::Idle));
    assert_eq!(rig.submit_sync(&[99]), Ok(None), "core unusable after recovery");
    rig.assert_clean();
}

#[test]
fn test_busy_engine_is_reset() {
    let rig = rig(1, 4);
    rig.controls[0].inject(TriggerFault::HwBusy);

    assert_eq!(rig.submit_sync(&[1]), Err(GspError::HardwareBusy { core: 0 }));
    rig.settle();

    let core = &rig.device.stats().cores[0];
    assert_eq!(core.recovered, 1);
    assert_eq!(core.resets, 1);
    let sim = rig.controls[0].counters();
    assert_eq!(sim.resets, 1);
    assert_eq!(sim.dumps, 1);
    assert_eq!(rig.iface.counters().resets, 1);
    assert_recovered(&rig);
}

#[test]
fn test_clock_check_recovers_without_reset() {
    let rig = rig(1, 4);
    rig.controls[0].inject(TriggerFault::ClkChk);

    assert_eq!(
        rig.submit_sync(&[1]),
        Err(GspError::HardwareTrigger {
            core: 0,
            code: ErrorCode::ClkChk
        })
    );
    rig.settle();

    let core = &rig.device.stats().cores[0];
    assert_eq!(core.recovered, 1);
    assert_eq!(core.resets, 0);
    assert_eq!(rig.controls[0].counters().dumps, 1);
    assert_eq!(rig.controls[0].counters().resets, 0);
    assert_recovered(&rig);
}

#[test]
fn test_control_code_fault() {
    let rig = rig(1, 4);
    rig.controls[0].inject(TriggerFault::CtlCode);

    let err = rig.submit_sync(&[1]).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::CtlCode));
    assert!(err.is_hardware());
    assert_recovered(&rig);
}

#[test]
fn test_enable_failure_skips_dump() {
    let rig = rig(1, 4);
    rig.controls[0].fail_next_enable();

    assert!(matches!(rig.submit_sync(&[1]), Err(GspError::Backend { .. })));
    rig.settle();

    assert_eq!(rig.controls[0].counters().dumps, 0);
    assert_eq!(rig.controls[0].counters().triggers, 0);
    assert_eq!(rig.device.stats().cores[0].recovered, 1);
    assert_recovered(&rig);
}

#[test]
fn test_prepare_failure_is_enable_error() {
    let rig = rig(1, 4);
    rig.iface.fail_next_prepare();

    assert!(rig.submit_sync(&[1]).is_err());
    assert_eq!(rig.controls[0].counters().triggers, 0);
    assert_recovered(&rig);
}

#[test]
fn test_map_failure_leaves_no_mappings() {
    let rig = rig(1, 4);
    rig.buffers.fail_next_map();

    assert!(matches!(rig.submit_sync(&[1]), Err(GspError::IommuMap { .. })));
    rig.settle();

    assert_eq!(rig.controls[0].counters().dumps, 0);
    assert_eq!(rig.controls[0].counters().triggers, 0);
    assert_recovered(&rig);
}

#[test]
fn test_fence_timeout_fails_job() {
    let rig = rig(1, 4);
    let never = gsp_driver::Fence::new();
    let never_fd = rig.device.fences().install(never);

    let mut cfg = rig.record(1);
    cfg.des = cfg.des.waiting_on(never_fd);
    let (result, _) = rig.submit(&[cfg], true);
    let fd = result.expect("async submit").expect("published fd");

    let fence = rig.device.fences().get(fd).expect("fence installed");
    assert!(fence.wait_timeout(FENCE_WAIT), "failed job left its fence pending");
    assert!(fence.has_error());
    rig.settle();

    assert_eq!(rig.controls[0].counters().triggers, 0);
    assert_eq!(rig.controls[0].counters().dumps, 1);
    assert_eq!(rig.controls[0].counters().resets, 0);
    assert_recovered(&rig);
}

#[test]
fn test_hang_watchdog_resets_core() {
    let rig = rig(1, 4);
    rig.controls[0].inject(TriggerFault::Hang);

    assert_eq!(rig.submit_sync(&[1]), Err(GspError::HardwareHang { core: 0 }));
    rig.settle();

    let core = &rig.device.stats().cores[0];
    assert_eq!(core.hangs, 1);
    assert_eq!(core.resets, 1);
    assert_eq!(core.recovered, 1);
    assert_eq!(core.completed, 0);
    assert_recovered(&rig);
}

#[test]
fn test_hang_cancels_queued_jobs() {
    let rig = rig(1, 4);
    rig.controls[0].inject(TriggerFault::Hang);

    let (result, _) = rig.submit_async(&[1, 2, 3]);
    let fd = result.expect("async submit").expect("published fd");

    let fence = rig.device.fences().get(fd).expect("fence installed");
    assert!(fence.wait_timeout(FENCE_WAIT));
    assert!(fence.has_error(), "cancelled batch signaled success");
    rig.settle();

    assert_eq!(rig.controls[0].trigger_log(), vec![1]);
    let core = &rig.device.stats().cores[0];
    assert_eq!(core.fences_created, core.fences_signaled);
    assert_recovered(&rig);
}

#[test]
fn test_reset_discards_held_interrupt() {
    let timeouts = Timeouts {
        hang: Duration::from_millis(50),
        ..Timeouts::simulated()
    };
    let rig = rig_with(1, 4, timeouts);
    rig.manual_irqs();

    let (result, _) = rig.submit_async(&[1]);
    let fd = result.expect("async submit").expect("published fd");
    let fence = rig.device.fences().get(fd).expect("fence installed");
    assert!(fence.wait_timeout(FENCE_WAIT));
    assert!(fence.has_error());
    rig.settle();
    assert_eq!(rig.controls[0].pending_irqs(), 0);

    // a late interrupt for the dead job changes nothing
    rig.device.irq(0, IrqStatus::Done).expect("core 0 exists");
    let left_idle = wait_until(Duration::from_millis(50), || {
        rig.device.core(0).map(|c| c.state()) != Some(CoreState::Idle)
    });
    assert!(!left_idle);
    assert_eq!(rig.device.stats().cores[0].completed, 0);
    rig.assert_clean();
}

#[test]
fn test_release_failure_after_success() {
    let rig = rig(1, 4);
    rig.controls[0].fail_next_release();

    // the job itself finished before the engine refused to release
    assert_eq!(rig.submit_sync(&[1]), Ok(None));
    assert!(wait_until(Duration::from_secs(1), || rig.device.stats().cores[0].recovered == 1));
    rig.settle();

    assert_eq!(rig.controls[0].counters().dumps, 1);
    assert_eq!(rig.controls[0].counters().resets, 0);
    assert_recovered(&rig);
}

#[test]
fn test_error_interrupt_fails_job() {
    let rig = rig(1, 4);
    rig.controls[0].inject(TriggerFault::IrqError);

    assert_eq!(rig.submit_sync(&[1]), Err(GspError::HardwareIrq { core: 0 }));
    rig.settle();

    assert!(rig.controls[0].counters().dumps >= 1);
    assert_eq!(rig.iface.counters().dumps, rig.controls[0].counters().dumps);
    assert_eq!(rig.device.stats().cores[0].recovered, 0);
    assert_recovered(&rig);
}

#[test]
fn test_fault_on_one_core_leaves_other_running() {
    let rig = rig(2, 4);
    rig.controls[0].inject(TriggerFault::Hang);

    // core 0 takes job 1 and hangs, core 1 runs job 2
    let (result, _) = rig.submit_async(&[1, 2]);
    let fd = result.expect("async submit").expect("published fd");
    let fence = rig.device.fences().get(fd).expect("fence installed");
    assert!(fence.wait_timeout(FENCE_WAIT));
    assert!(!fence.has_error(), "last job ran on the healthy core");
    rig.settle();

    let stats = rig.device.stats();
    assert_eq!(stats.cores[0].hangs, 1);
    assert_eq!(stats.cores[1].hangs, 0);
    assert_eq!(stats.cores[1].completed, 1);
    rig.assert_clean();
}
