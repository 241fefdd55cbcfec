//! Handle to a launched child

use crate::termination::TerminationInfo;
use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A running (or reaped) child process.
///
/// Dropping a child that is still running kills and reaps it.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    exit_status: Option<ExitStatus>,
    host_exit_code: Option<i32>,
}

impl ChildProcess {
    pub(crate) fn new(child: Child) -> Self {
        Self {
            child,
            exit_status: None,
            host_exit_code: None,
        }
    }

    pub fn pid(&self) -> i32 {
        self.child.id() as i32
    }

    /// Reaps the child if it has exited, without blocking
    pub fn has_exited(&mut self) -> bool {
        self.poll_exit().is_some()
    }

    /// Current classification; `StillRunning` while the child lives
    pub fn termination_info(&mut self) -> TerminationInfo {
        match self.poll_exit() {
            Some(status) => TerminationInfo::from_exit_status(status, self.host_exit_code),
            None => TerminationInfo::still_running(),
        }
    }

    /// Waits up to `grace` for the child to exit on its own
    pub fn wait_for_termination(&mut self, grace: Duration) -> TerminationInfo {
        let deadline = Instant::now() + grace;
        loop {
            let info = self.termination_info();
            if info.status != crate::TerminationStatus::StillRunning || Instant::now() >= deadline {
                return info;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    /// Kills the child and records `exit_code` as the reason.
    /// Returns `false` if the child had already exited.
    pub fn terminate(&mut self, exit_code: i32) -> bool {
        if self.has_exited() {
            return false;
        }
        self.host_exit_code = Some(exit_code);
        match self.child.kill() {
            Ok(()) => {
                log::info!("killed child {} (exit code {})", self.pid(), exit_code);
                true
            }
            Err(e) => {
                log::warn!("failed to kill child {}: {}", self.pid(), e);
                false
            }
        }
    }

    /// Kills if needed and blocks until reaped
    pub fn terminate_and_wait(&mut self, exit_code: i32) -> TerminationInfo {
        self.terminate(exit_code);
        if self.exit_status.is_none() {
            match self.child.wait() {
                Ok(status) => self.exit_status = Some(status),
                Err(e) => log::warn!("failed to reap child {}: {}", self.pid(), e),
            }
        }
        self.termination_info()
    }

    fn poll_exit(&mut self) -> Option<ExitStatus> {
        if self.exit_status.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.exit_status = status,
                Err(e) => log::warn!("failed to query child {}: {}", self.pid(), e),
            }
        }
        self.exit_status
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.has_exited() {
            return;
        }
        self.terminate(crate::RESULT_CODE_KILLED);
        if self.has_exited() {
            return;
        }
        reap_in_background(self.pid());
    }
}

#[cfg(unix)]
fn reap_in_background(pid: i32) {
    let spawned = thread::Builder::new()
        .name("child-reaper".to_string())
        .spawn(move || {
            // SAFETY: waitpid on our own child with a valid status pointer.
            let mut status = 0;
            unsafe { libc::waitpid(pid, &mut status, 0) };
        });
    if let Err(e) = spawned {
        log::warn!("failed to start reaper for child {}: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn reap_in_background(_pid: i32) {}
