//! Crash classification of real children
//!
//! Every way a child can end maps to exactly one status, both for a bare
//! `ChildProcess` and through the registry's notifications.

use child_process_host::NotificationKind;
use core_types::{ChildProcessId, ProcessType};
use process_launcher::{
    spawn, ChildProcess, CommandLine, LaunchRequest, TerminationStatus, RESULT_CODE_KILLED,
};
use std::time::Duration;
use tests_resilience::{RegistryHarness, WAIT};

fn sh(script: &str) -> ChildProcess {
    let mut command_line = CommandLine::new("/bin/sh");
    command_line.append_arg("-c").append_arg(script);
    spawn(LaunchRequest::new(ChildProcessId::next(), command_line)).unwrap()
}

#[test]
fn test_exit_codes() {
    let info = sh("exit 0").wait_for_termination(WAIT);
    assert_eq!(info.status, TerminationStatus::NormalExit);
    assert_eq!(info.exit_code, 0);
    assert_eq!(info.signal, None);

    let info = sh("exit 7").wait_for_termination(WAIT);
    assert_eq!(info.status, TerminationStatus::AbnormalExit);
    assert_eq!(info.exit_code, 7);
}

#[test]
fn test_crash_signals() {
    for (signal, number) in [("SEGV", 11), ("ABRT", 6), ("ILL", 4), ("FPE", 8), ("TRAP", 5)] {
        let info = sh(&format!("kill -{} $$", signal)).wait_for_termination(WAIT);
        assert_eq!(info.status, TerminationStatus::Crashed, "SIG{}", signal);
        assert_eq!(info.signal, Some(number));
        assert_eq!(info.exit_code, 128 + number);
    }
}

#[test]
fn test_kill_signals() {
    for signal in ["KILL", "TERM"] {
        let info = sh(&format!("kill -{} $$", signal)).wait_for_termination(WAIT);
        assert_eq!(info.status, TerminationStatus::Killed, "SIG{}", signal);
    }
}

#[test]
fn test_other_signals_are_abnormal() {
    for signal in ["HUP", "USR1"] {
        let info = sh(&format!("kill -{} $$", signal)).wait_for_termination(WAIT);
        assert_eq!(info.status, TerminationStatus::AbnormalExit, "SIG{}", signal);
    }
}

#[test]
fn test_host_initiated_termination() {
    let mut child = sh("exec sleep 30");
    assert!(child.terminate(RESULT_CODE_KILLED));
    let info = child.wait_for_termination(WAIT);
    assert_eq!(info.status, TerminationStatus::Killed);
    assert_eq!(info.exit_code, RESULT_CODE_KILLED);

    // Already gone: nothing to kill.
    assert!(!child.terminate(RESULT_CODE_KILLED));
}

#[test]
fn test_still_running_after_grace() {
    let mut child = sh("exec sleep 30");
    let info = child.wait_for_termination(Duration::from_millis(50));
    assert_eq!(info.status, TerminationStatus::StillRunning);
    assert!(!child.has_exited());
}

#[test]
fn test_registry_reports_crash_before_disconnect() {
    let mut harness = RegistryHarness::new();
    let id = harness.launch_sh(ProcessType::Renderer, "sleep 0.2; kill -SEGV $$");
    harness.wait_launched(id);

    let info = harness.wait_disconnected(id);
    assert_eq!(info.status, TerminationStatus::Crashed);
    assert!(!harness.registry.contains(id));

    let kinds = harness.kinds(id);
    let crashed = kinds
        .iter()
        .position(|k| matches!(k, NotificationKind::Crashed(_)))
        .expect("crash notice");
    assert_eq!(crashed, kinds.len() - 2);
    assert!(matches!(kinds.last(), Some(NotificationKind::Disconnected(_))));
}

#[test]
fn test_registry_reports_abnormal_exit_without_crash() {
    let mut harness = RegistryHarness::new();
    let id = harness.launch_sh(ProcessType::Utility, "sleep 0.2; exit 4");
    harness.wait_launched(id);

    let info = harness.wait_disconnected(id);
    assert_eq!(info.status, TerminationStatus::AbnormalExit);
    assert_eq!(info.exit_code, 4);
    assert!(!harness
        .kinds(id)
        .iter()
        .any(|k| matches!(k, NotificationKind::Crashed(_) | NotificationKind::Killed(_))));
}

#[test]
fn test_registry_terminate_reports_killed() {
    let mut harness = RegistryHarness::new();
    let id = harness.launch_sh(ProcessType::Gpu, "exec sleep 30");
    harness.wait_launched(id);

    assert!(harness.registry.get_mut(id).unwrap().terminate(RESULT_CODE_KILLED));
    let info = harness.wait_disconnected(id);
    assert_eq!(info.status, TerminationStatus::Killed);
    assert_eq!(info.exit_code, RESULT_CODE_KILLED);
    assert!(harness
        .kinds(id)
        .iter()
        .any(|k| matches!(k, NotificationKind::Killed(_))));
}
