//! System suspend/resume, runtime PM and teardown tests

mod common;

use common::{rig, rig_with, wait_until};
use gsp_driver::{CoreState, GspError, SuspendState, Timeouts};
use std::thread;
use std::time::Duration;

const FENCE_WAIT: Duration = Duration::from_secs(2);

/// Long hang watchdog so held interrupts are never mistaken for hangs
fn patient() -> Timeouts {
    Timeouts {
        hang: Duration::from_secs(5),
        ..Timeouts::simulated()
    }
}

#[test]
fn test_suspend_and_resume_idle_device() {
    let rig = rig(2, 4);
    assert_eq!(rig.submit_sync(&[1]), Ok(None));
    rig.settle();
    assert!(!rig.controls[0].force_calc());

    rig.device.suspend().expect("suspend");
    assert!(rig.device.is_suspend());
    assert!(rig.device.is_suspending());
    assert!(rig.device.stats().suspended);
    assert_eq!(rig.iface.counters().deinits, 1);

    // a second suspend is a no-op
    rig.device.suspend().expect("repeated suspend");
    assert_eq!(rig.iface.counters().deinits, 1);

    rig.device.resume().expect("resume");
    assert!(!rig.device.is_suspending());
    assert_eq!(rig.iface.counters().inits, 2);
    assert!(rig.controls[0].force_calc(), "resume must force recalibration");
    for core in rig.device.cores() {
        assert_eq!(core.suspend_state(), SuspendState::Exit);
    }

    assert_eq!(rig.submit_sync(&[2]), Ok(None));
    rig.assert_clean();
}

#[test]
fn test_suspend_waits_for_in_flight_job() {
    let rig = rig_with(1, 4, patient());
    rig.manual_irqs();

    let (result, _) = rig.submit_async(&[1]);
    let fd = result.expect("async submit").expect("published fd");
    assert!(wait_until(Duration::from_secs(1), || rig.controls[0].pending_irqs() == 1));

    thread::scope(|s| {
        let suspend = s.spawn(|| rig.device.suspend());
        thread::sleep(Duration::from_millis(50));
        assert!(!rig.device.is_suspend(), "suspended with a job on the engine");
        assert!(rig.controls[0].fire_irq());
        suspend.join().expect("suspend thread").expect("suspend");
    });
    assert!(rig.device.is_suspend());

    let fence = rig.device.fences().get(fd).expect("fence installed");
    assert!(fence.wait_timeout(FENCE_WAIT));
    assert!(!fence.has_error(), "in-flight job should finish normally");

    rig.device.resume().expect("resume");
    rig.assert_clean();
}

#[test]
fn test_no_trigger_after_suspend_begins() {
    let rig = rig_with(1, 4, patient());
    rig.manual_irqs();

    let (result, _) = rig.submit_async(&[1, 2]);
    let fd = result.expect("async submit").expect("published fd");
    assert!(wait_until(Duration::from_secs(1), || rig.controls[0].pending_irqs() == 1));

    thread::scope(|s| {
        let suspend = s.spawn(|| rig.device.suspend());
        assert!(wait_until(Duration::from_secs(1), || rig.device.is_suspending()));
        assert!(rig.controls[0].fire_irq());
        suspend.join().expect("suspend thread").expect("suspend");
    });

    // job 2 was still queued and is dropped, so the batch fence fails
    assert_eq!(rig.controls[0].trigger_log(), vec![1]);
    let fence = rig.device.fences().get(fd).expect("fence installed");
    assert!(fence.wait_timeout(FENCE_WAIT));
    assert!(fence.has_error());

    rig.device.resume().expect("resume");
    rig.assert_clean();
    assert_eq!(rig.controls[0].trigger_log(), vec![1]);
}

#[test]
fn test_suspend_timeout_leaves_core_running() {
    let timeouts = Timeouts {
        suspend_wait: Duration::from_millis(50),
        ..patient()
    };
    let rig = rig_with(1, 4, timeouts);
    rig.manual_irqs();

    let (result, _) = rig.submit_async(&[1]);
    result.expect("async submit");
    assert!(wait_until(Duration::from_secs(1), || rig.controls[0].pending_irqs() == 1));

    assert!(matches!(
        rig.device.suspend(),
        Err(GspError::SuspendTimeout { core: 0, .. })
    ));
    assert!(!rig.device.is_suspend());
    assert_eq!(rig.iface.counters().deinits, 0, "interface down under a busy core");

    assert!(rig.controls[0].fire_irq());
    rig.settle();
    rig.device.resume().expect("forced resume");
    assert!(!rig.device.is_suspending());

    assert_eq!(rig.submit_sync(&[2]), Ok(None));
    rig.assert_clean();
}

#[test]
fn test_submit_while_suspended_waits_for_resume() {
    let rig = rig(2, 4);
    rig.device.suspend().expect("suspend");

    thread::scope(|s| {
        s.spawn(|| {
            thread::sleep(Duration::from_millis(50));
            rig.device.resume().expect("resume");
        });
        assert_eq!(rig.submit_sync(&[1]), Ok(None));
    });
    rig.assert_clean();
}

#[test]
fn test_submit_while_suspended_times_out() {
    let timeouts = Timeouts {
        resume_wait: Duration::from_millis(100),
        ..Timeouts::simulated()
    };
    let rig = rig_with(1, 4, timeouts);
    rig.device.suspend().expect("suspend");

    assert!(matches!(
        rig.submit_sync(&[1]),
        Err(GspError::SuspendTimeout { core: 0, .. })
    ));
    assert_eq!(rig.device.core(0).map(|c| c.state()), Some(CoreState::Suspend));
    assert!(rig.device.stats().is_drained());
    assert_eq!(rig.buffers.outstanding_refs(), 0);
    assert_eq!(rig.controls[0].counters().triggers, 0);

    rig.device.resume().expect("resume");
    rig.assert_clean();
}

#[test]
fn test_runtime_pm_balances() {
    let rig = rig(2, 4);
    assert_eq!(rig.device.stats().pm_usage, 0);

    assert_eq!(rig.submit_sync(&[1, 2, 3]), Ok(None));
    rig.settle();

    assert_eq!(rig.device.stats().pm_usage, 0);
    assert!(wait_until(Duration::from_secs(1), || rig.device.runtime_idle()));
    assert_eq!(rig.iface.prepare_balance(), 0);
}

#[test]
fn test_shutdown_interrupts_in_flight_job() {
    let rig = rig_with(1, 4, patient());
    rig.manual_irqs();

    let (result, _) = rig.submit_async(&[1, 2]);
    let fd = result.expect("async submit").expect("published fd");
    assert!(wait_until(Duration::from_secs(1), || rig.controls[0].pending_irqs() == 1));

    rig.device.shutdown();

    let fence = rig.device.fences().get(fd).expect("fence installed");
    assert!(fence.is_signaled(), "shutdown left a fence pending");
    assert!(fence.has_error());
    assert_eq!(rig.buffers.outstanding_refs(), 0);
    assert_eq!(rig.buffers.live_mappings(), 0);
    assert_eq!(rig.iface.prepare_balance(), 0);
    assert_eq!(rig.iface.counters().deinits, 1);

    rig.device.shutdown();
    assert_eq!(rig.iface.counters().deinits, 1);
    assert_eq!(rig.submit_sync(&[3]), Err(GspError::DeviceStopped));
    assert_eq!(rig.buffers.outstanding_refs(), 0);
}
