//! # Host Runtime
//!
//! The main event loop that ties everything together: one I/O thread, one
//! launcher, one registry, and the configured children.

use crate::config::{ChildSpec, HostRuntimeConfig};
use crate::supervisor::Supervisor;
use child_process_host::{
    DefaultDelegate, HostError, NotificationKind, ProcessNotification, ProcessObserver,
    ProcessRegistry,
};
use core_types::ChildProcessId;
use ipc::{mailbox, ConfigError, IoThread, IpcError, Mailbox};
use lifecycle::{Deadline, Timeout};
use process_launcher::{CommandLine, LaunchError, ProcessLauncher, TerminationInfo};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Host runtime error types
#[derive(Debug, Error)]
pub enum HostRuntimeError {
    #[error("Cannot read config file {path}: {source}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("IPC config error: {0}")]
    IpcConfig(#[from] ConfigError),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}

/// How a run ended
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub launched: usize,
    pub restarts: u32,
    /// Name and outcome of every child that went away, in order
    pub exits: Vec<(String, TerminationInfo)>,
}

/// Host runtime
pub struct HostRuntime {
    /// Configuration
    config: HostRuntimeConfig,
    // Field order is drop order: hosts close their channels before the
    // I/O thread stops.
    registry: ProcessRegistry,
    launcher: ProcessLauncher,
    io: IoThread,
    notifications: Mailbox<ProcessNotification>,
    supervisor: Supervisor,
    summary: RunSummary,
}

impl HostRuntime {
    /// Creates a new host runtime
    pub fn new(config: HostRuntimeConfig) -> Result<Self, HostRuntimeError> {
        config.validate()?;
        let io = IoThread::start(config.host.ipc.clone())?;
        let launcher = ProcessLauncher::start()?;

        let (notify_tx, notifications) = mailbox();
        let mut registry = ProcessRegistry::new(config.host.clone());
        let observer: Arc<dyn ProcessObserver> = Arc::new(notify_tx);
        registry.add_observer(observer);

        let supervisor = Supervisor::new(config.children.len());
        Ok(Self {
            config,
            registry,
            launcher,
            io,
            notifications,
            supervisor,
            summary: RunSummary::default(),
        })
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ProcessRegistry {
        &mut self.registry
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Launches every configured child
    pub fn launch_all(&mut self) -> Result<Vec<ChildProcessId>, HostRuntimeError> {
        (0..self.config.children.len())
            .map(|spec| self.launch_spec(spec))
            .collect()
    }

    /// Runs the host event loop
    ///
    /// Returns when:
    /// - `run_for` has elapsed (if configured)
    /// - No children are running (if exit_on_idle configured)
    pub fn run(&mut self) -> Result<RunSummary, HostRuntimeError> {
        self.launch_all()?;
        let deadline = self.config.run_for().map(|d| Timeout::after(d).start());

        loop {
            if deadline.as_ref().is_some_and(|d| d.has_passed(Instant::now())) {
                log::info!("run time elapsed");
                break;
            }
            if self.config.exit_on_idle && self.registry.is_empty() {
                log::info!("no children left");
                break;
            }
            self.step(self.wait_budget(deadline.as_ref()))?;
        }

        self.shutdown();
        Ok(self.summary.clone())
    }

    /// Pumps host events once and applies restart policies
    pub fn step(&mut self, timeout: Duration) -> Result<(), HostRuntimeError> {
        self.registry.pump(timeout);
        while let Some(notification) = self.notifications.try_recv() {
            self.on_notification(notification)?;
        }
        Ok(())
    }

    /// Terminates every remaining child
    pub fn shutdown(&mut self) {
        let terminated = self.registry.terminate_all();
        if terminated > 0 {
            log::info!("terminated {} remaining children", terminated);
        }
        while let Some(notification) = self.notifications.try_recv() {
            if let NotificationKind::Disconnected(info) = notification.kind {
                self.record_exit(notification.id, info);
            }
        }
    }

    fn on_notification(&mut self, notification: ProcessNotification) -> Result<(), HostRuntimeError> {
        match notification.kind {
            NotificationKind::Crashed(info) => {
                log::error!("{} {} crashed: {}", notification.process_type, notification.id, info);
            }
            NotificationKind::LaunchFailed { error } => {
                log::error!("{} failed to launch: {}", notification.id, error);
                self.supervisor.untrack(notification.id);
            }
            NotificationKind::Disconnected(info) => {
                if let Some(spec) = self.record_exit(notification.id, info) {
                    let policy = self.config.children[spec].restart;
                    if self.supervisor.on_exit(spec, policy, info.status) {
                        log::info!(
                            "restarting {} ({} so far)",
                            self.config.children[spec].name,
                            self.supervisor.restarts(spec)
                        );
                        self.summary.restarts += 1;
                        self.launch_spec(spec)?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn record_exit(&mut self, id: ChildProcessId, info: TerminationInfo) -> Option<usize> {
        let spec = self.supervisor.untrack(id)?;
        let name = self.config.children[spec].name.clone();
        log::info!("{} exited: {}", name, info);
        self.summary.exits.push((name, info));
        Some(spec)
    }

    fn launch_spec(&mut self, spec: usize) -> Result<ChildProcessId, HostRuntimeError> {
        let ChildSpec {
            process_type,
            program,
            args,
            ..
        } = &self.config.children[spec];

        let mut command_line = CommandLine::new(program);
        for arg in args {
            command_line.append_arg(arg.clone());
        }

        let id = self
            .registry
            .create_host(*process_type, Box::new(DefaultDelegate));
        self.registry
            .launch(id, &self.io.handle(), &self.launcher, command_line)?;
        self.supervisor.track(id, spec);
        self.summary.launched += 1;
        Ok(id)
    }

    fn wait_budget(&self, deadline: Option<&Deadline>) -> Duration {
        let interval = self.config.pump_interval();
        match deadline {
            Some(deadline) => deadline
                .time_remaining(Instant::now())
                .map_or(Duration::ZERO, |remaining| interval.min(remaining)),
            None => interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RestartPolicy;
    use core_types::ProcessType;

    fn sh_child(name: &str, script: &str, restart: RestartPolicy) -> ChildSpec {
        ChildSpec::new(name, ProcessType::Utility, "/bin/sh")
            .with_args(["-c", script])
            .with_restart(restart)
    }

    #[test]
    fn test_exit_on_idle_after_children_finish() {
        let config = HostRuntimeConfig {
            children: vec![sh_child("quick", "exit 0", RestartPolicy::Never)],
            exit_on_idle: true,
            run_for_ms: Some(20_000),
            ..HostRuntimeConfig::default()
        };

        let summary = HostRuntime::new(config).unwrap().run().unwrap();
        assert_eq!(summary.launched, 1);
        assert_eq!(summary.restarts, 0);
        assert_eq!(summary.exits.len(), 1);
        assert_eq!(summary.exits[0].0, "quick");
    }

    #[test]
    fn test_limited_restarts() {
        let config = HostRuntimeConfig {
            children: vec![sh_child(
                "flaky",
                "exit 3",
                RestartPolicy::Limited { max_restarts: 2 },
            )],
            exit_on_idle: true,
            run_for_ms: Some(20_000),
            ..HostRuntimeConfig::default()
        };

        let summary = HostRuntime::new(config).unwrap().run().unwrap();
        assert_eq!(summary.launched, 3);
        assert_eq!(summary.restarts, 2);
        assert_eq!(summary.exits.len(), 3);
    }

    #[test]
    fn test_run_for_terminates_survivors() {
        let config = HostRuntimeConfig {
            children: vec![sh_child("sleeper", "sleep 30", RestartPolicy::Always)],
            run_for_ms: Some(200),
            ..HostRuntimeConfig::default()
        };

        let summary = HostRuntime::new(config).unwrap().run().unwrap();
        assert_eq!(summary.launched, 1);
        assert_eq!(summary.exits.len(), 1);
        assert_eq!(
            summary.exits[0].1.status,
            process_launcher::TerminationStatus::Killed
        );
    }

    #[test]
    fn test_missing_program_fails_fast() {
        let config = HostRuntimeConfig {
            children: vec![ChildSpec::new("ghost", ProcessType::Utility, "/no/such/binary")],
            ..HostRuntimeConfig::default()
        };

        let err = HostRuntime::new(config).unwrap().run().unwrap_err();
        assert!(matches!(err, HostRuntimeError::Host(HostError::Launch(_))));
    }
}
