//! How a child process ended

use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::ExitStatus;

/// Exit code recorded when the host kills a child without a specific reason
pub const RESULT_CODE_KILLED: i32 = 1;
/// Exit code recorded when the host kills a hung child
pub const RESULT_CODE_HUNG: i32 = 2;
/// Exit code recorded when the host kills a child for sending a malformed message
pub const RESULT_CODE_KILLED_BAD_MESSAGE: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationStatus {
    NormalExit,
    AbnormalExit,
    Killed,
    Crashed,
    StillRunning,
}

impl TerminationStatus {
    /// Crashes and kills are reported separately from plain disconnects
    pub fn is_crash_or_kill(&self) -> bool {
        matches!(self, TerminationStatus::Crashed | TerminationStatus::Killed)
    }
}

impl fmt::Display for TerminationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TerminationStatus::NormalExit => "normal exit",
            TerminationStatus::AbnormalExit => "abnormal exit",
            TerminationStatus::Killed => "killed",
            TerminationStatus::Crashed => "crashed",
            TerminationStatus::StillRunning => "still running",
        };
        f.write_str(name)
    }
}

/// Classified outcome plus the raw details it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationInfo {
    pub status: TerminationStatus,
    /// Exit code, or 128 plus the signal number for a signalled child
    pub exit_code: i32,
    pub signal: Option<i32>,
}

impl TerminationInfo {
    pub fn still_running() -> Self {
        Self {
            status: TerminationStatus::StillRunning,
            exit_code: 0,
            signal: None,
        }
    }

    /// Classifies a reaped status. `host_exit_code` is set when the host
    /// itself terminated the child, and takes precedence.
    pub fn from_exit_status(status: ExitStatus, host_exit_code: Option<i32>) -> Self {
        let signal = exit_signal(&status);

        if let Some(exit_code) = host_exit_code {
            return Self {
                status: TerminationStatus::Killed,
                exit_code,
                signal,
            };
        }

        match (status.code(), signal) {
            (Some(0), _) => Self {
                status: TerminationStatus::NormalExit,
                exit_code: 0,
                signal: None,
            },
            (Some(code), _) => Self {
                status: classify_exit_code(code),
                exit_code: code,
                signal: None,
            },
            (None, Some(signal)) => Self {
                status: classify_signal(signal),
                exit_code: 128 + signal,
                signal: Some(signal),
            },
            (None, None) => Self {
                status: TerminationStatus::AbnormalExit,
                exit_code: -1,
                signal: None,
            },
        }
    }
}

impl fmt::Display for TerminationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.signal {
            Some(signal) => write!(
                f,
                "{} (signal {}, exit code {})",
                self.status,
                signal_name(signal),
                self.exit_code
            ),
            None => write!(f, "{} (exit code {})", self.status, self.exit_code),
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

#[cfg(unix)]
fn classify_exit_code(_code: i32) -> TerminationStatus {
    TerminationStatus::AbnormalExit
}

// NTSTATUS error codes (0xC0000005 access violation and friends) mean the
// process died on an unhandled exception.
#[cfg(not(unix))]
fn classify_exit_code(code: i32) -> TerminationStatus {
    if (code as u32) >= 0xC000_0000 {
        TerminationStatus::Crashed
    } else {
        TerminationStatus::AbnormalExit
    }
}

#[cfg(unix)]
fn classify_signal(signal: i32) -> TerminationStatus {
    match signal {
        libc::SIGSEGV
        | libc::SIGBUS
        | libc::SIGILL
        | libc::SIGFPE
        | libc::SIGABRT
        | libc::SIGTRAP
        | libc::SIGSYS => TerminationStatus::Crashed,
        libc::SIGKILL | libc::SIGTERM | libc::SIGINT => TerminationStatus::Killed,
        _ => TerminationStatus::AbnormalExit,
    }
}

#[cfg(not(unix))]
fn classify_signal(_signal: i32) -> TerminationStatus {
    TerminationStatus::AbnormalExit
}

#[cfg(unix)]
fn signal_name(signal: i32) -> String {
    nix::sys::signal::Signal::try_from(signal)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| signal.to_string())
}

#[cfg(not(unix))]
fn signal_name(signal: i32) -> String {
    signal.to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    // Raw wait(2) status encodings.
    fn exited(code: i32) -> ExitStatus {
        ExitStatus::from_raw(code << 8)
    }

    fn signalled(signal: i32) -> ExitStatus {
        ExitStatus::from_raw(signal)
    }

    #[test]
    fn test_exit_codes() {
        let info = TerminationInfo::from_exit_status(exited(0), None);
        assert_eq!(info.status, TerminationStatus::NormalExit);

        let info = TerminationInfo::from_exit_status(exited(7), None);
        assert_eq!(info.status, TerminationStatus::AbnormalExit);
        assert_eq!(info.exit_code, 7);
    }

    #[test]
    fn test_crash_signals() {
        for signal in [libc::SIGSEGV, libc::SIGABRT, libc::SIGBUS, libc::SIGILL, libc::SIGFPE] {
            let info = TerminationInfo::from_exit_status(signalled(signal), None);
            assert_eq!(info.status, TerminationStatus::Crashed, "signal {}", signal);
            assert_eq!(info.signal, Some(signal));
            assert_eq!(info.exit_code, 128 + signal);
        }
    }

    #[test]
    fn test_kill_signals() {
        for signal in [libc::SIGKILL, libc::SIGTERM, libc::SIGINT] {
            let info = TerminationInfo::from_exit_status(signalled(signal), None);
            assert_eq!(info.status, TerminationStatus::Killed);
        }
        let info = TerminationInfo::from_exit_status(signalled(libc::SIGPIPE), None);
        assert_eq!(info.status, TerminationStatus::AbnormalExit);
    }

    #[test]
    fn test_host_kill_overrides() {
        let info = TerminationInfo::from_exit_status(
            signalled(libc::SIGKILL),
            Some(RESULT_CODE_KILLED_BAD_MESSAGE),
        );
        assert_eq!(info.status, TerminationStatus::Killed);
        assert_eq!(info.exit_code, RESULT_CODE_KILLED_BAD_MESSAGE);
    }

    #[test]
    fn test_display() {
        let info = TerminationInfo::from_exit_status(signalled(libc::SIGSEGV), None);
        assert_eq!(info.to_string(), "crashed (signal SIGSEGV, exit code 139)");
        assert!(info.status.is_crash_or_kill());
        assert!(!TerminationStatus::AbnormalExit.is_crash_or_kill());
    }
}
