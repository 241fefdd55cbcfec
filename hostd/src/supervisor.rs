//! Restart bookkeeping for configured children

use crate::config::RestartPolicy;
use core_types::ChildProcessId;
use process_launcher::TerminationStatus;
use std::collections::HashMap;

/// Tracks which configured child each live host belongs to, and how often
/// each has been restarted
#[derive(Debug, Default)]
pub struct Supervisor {
    live: HashMap<ChildProcessId, usize>,
    restarts: Vec<u32>,
}

impl Supervisor {
    pub fn new(specs: usize) -> Self {
        Self {
            live: HashMap::new(),
            restarts: vec![0; specs],
        }
    }

    /// Records that `id` runs the child at `spec`
    pub fn track(&mut self, id: ChildProcessId, spec: usize) {
        self.live.insert(id, spec);
    }

    /// Forgets `id` and returns the child it ran, if it was tracked
    pub fn untrack(&mut self, id: ChildProcessId) -> Option<usize> {
        self.live.remove(&id)
    }

    pub fn restarts(&self, spec: usize) -> u32 {
        self.restarts.get(spec).copied().unwrap_or(0)
    }

    pub fn total_restarts(&self) -> u32 {
        self.restarts.iter().sum()
    }

    /// Decides whether to relaunch and, if so, counts the restart
    pub fn on_exit(&mut self, spec: usize, policy: RestartPolicy, status: TerminationStatus) -> bool {
        let Some(restarts) = self.restarts.get_mut(spec) else {
            return false;
        };
        let restart = should_restart(policy, status, *restarts);
        if restart {
            *restarts = restarts.saturating_add(1);
        }
        restart
    }
}

pub fn should_restart(policy: RestartPolicy, status: TerminationStatus, restarts: u32) -> bool {
    let failed = status != TerminationStatus::NormalExit;
    match policy {
        RestartPolicy::Never => false,
        RestartPolicy::Always => true,
        RestartPolicy::OnFailure => failed,
        RestartPolicy::Limited { max_restarts } => failed && restarts < max_restarts,
    }
}
