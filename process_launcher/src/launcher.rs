//! Dedicated launcher thread
//!
//! Spawning happens off the caller's thread. Problems detectable up front
//! (missing executable) are returned synchronously from [`ProcessLauncher::launch`];
//! everything else arrives through the [`LaunchClient`].

use crate::command_line::{CommandLine, PRIMARY_IPC_FD};
use crate::process::ChildProcess;
use core_types::ChildProcessId;
use ipc::{mailbox, Mailbox, MailboxSender};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Executable not found: {0}")]
    ExecutableNotFound(PathBuf),

    #[error("Not an executable file: {0}")]
    NotExecutable(PathBuf),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Launcher thread has stopped")]
    LauncherStopped,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Everything needed to start one child
#[derive(Debug)]
pub struct LaunchRequest {
    pub id: ChildProcessId,
    pub command_line: CommandLine,
    /// Client end of the channel, mapped to fd 3 in the child
    pub channel_fd: Option<OwnedFd>,
    pub env: Vec<(String, String)>,
}

impl LaunchRequest {
    pub fn new(id: ChildProcessId, command_line: CommandLine) -> Self {
        Self {
            id,
            command_line,
            channel_fd: None,
            env: Vec::new(),
        }
    }

    pub fn with_channel_fd(mut self, fd: OwnedFd) -> Self {
        self.channel_fd = Some(fd);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Receives launch results on the launcher thread
pub trait LaunchClient: Send + Sync {
    fn on_launch_finished(&self, id: ChildProcessId, result: Result<ChildProcess, LaunchError>);
}

/// Launch result as a value, for clients that prefer a mailbox
#[derive(Debug)]
pub struct LaunchOutcome {
    pub id: ChildProcessId,
    pub result: Result<ChildProcess, LaunchError>,
}

impl LaunchClient for MailboxSender<LaunchOutcome> {
    fn on_launch_finished(&self, id: ChildProcessId, result: Result<ChildProcess, LaunchError>) {
        // A gone receiver drops the child, which kills it.
        self.post(LaunchOutcome { id, result });
    }
}

enum LauncherTask {
    Launch(LaunchRequest, Arc<dyn LaunchClient>),
    Shutdown,
}

pub struct ProcessLauncher {
    tasks: MailboxSender<LauncherTask>,
    thread: Option<JoinHandle<()>>,
}

impl ProcessLauncher {
    pub fn start() -> Result<Self, LaunchError> {
        let (tasks, inbox) = mailbox();
        let thread = thread::Builder::new()
            .name("process-launcher".to_string())
            .spawn(move || run(inbox))?;
        Ok(Self {
            tasks,
            thread: Some(thread),
        })
    }

    /// Queues a launch. The result is delivered to `client` later.
    pub fn launch(
        &self,
        request: LaunchRequest,
        client: Arc<dyn LaunchClient>,
    ) -> Result<(), LaunchError> {
        check_executable(request.command_line.program())?;
        if !self.tasks.post(LauncherTask::Launch(request, client)) {
            return Err(LaunchError::LauncherStopped);
        }
        Ok(())
    }
}

impl Drop for ProcessLauncher {
    fn drop(&mut self) {
        self.tasks.post(LauncherTask::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run(inbox: Mailbox<LauncherTask>) {
    loop {
        match inbox.recv() {
            Some(LauncherTask::Launch(request, client)) => {
                let id = request.id;
                let result = spawn(request);
                match &result {
                    Ok(child) => log::debug!("launched {} as pid {}", id, child.pid()),
                    Err(e) => log::warn!("launch of {} failed: {}", id, e),
                }
                client.on_launch_finished(id, result);
            }
            Some(LauncherTask::Shutdown) | None => break,
        }
    }
}

/// Spawns synchronously on the calling thread.
///
/// The parent's copy of the channel descriptor is closed once the child
/// has it.
pub fn spawn(request: LaunchRequest) -> Result<ChildProcess, LaunchError> {
    let LaunchRequest {
        command_line,
        channel_fd,
        env,
        ..
    } = request;
    let program = command_line.program().to_path_buf();
    check_executable(&program)?;

    let mut command = Command::new(&program);
    command.args(command_line.args());
    command.envs(env);

    if let Some(fd) = &channel_fd {
        let raw = fd.as_raw_fd();
        // SAFETY: the hook only calls async-signal-safe functions.
        unsafe {
            command.pre_exec(move || map_channel_fd(raw));
        }
    }

    let child = command
        .spawn()
        .map_err(|source| LaunchError::Spawn { program, source })?;
    drop(channel_fd);
    Ok(ChildProcess::new(child))
}

// Runs between fork and exec.
fn map_channel_fd(raw: RawFd) -> io::Result<()> {
    let rc = if raw == PRIMARY_IPC_FD {
        // Already in place; just let it survive exec.
        unsafe { libc::fcntl(raw, libc::F_SETFD, 0) }
    } else {
        unsafe { libc::dup2(raw, PRIMARY_IPC_FD) }
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn check_executable(program: &Path) -> Result<(), LaunchError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match std::fs::metadata(program) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(LaunchError::ExecutableNotFound(program.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    if !metadata.is_file() || metadata.permissions().mode() & 0o111 == 0 {
        return Err(LaunchError::NotExecutable(program.to_path_buf()));
    }
    Ok(())
}
