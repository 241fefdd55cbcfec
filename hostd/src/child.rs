//! Child-side loop of the `ipc_child` stub

use crate::messages::{Burst, BurstItem, Crash, Echo, Exit, RequestShutdown, SendMalformed};
use child_process_host::messages::{
    AskBeforeShutdown, BeginTracing, EndTracing, EndTracingAck, SetIpcLoggingEnabled, Shutdown,
    ShutdownRequest, TraceDataCollected,
};
use child_process_host::{host_channel, HostError};
use ipc::{mailbox, ChannelEvent, ChannelProxy, IoThread, IpcConfig, IpcError, Message, TypedMessage};
use process_launcher::CommandLine;
use std::time::Duration;
use thiserror::Error;

/// How long the child waits for any host traffic before giving up
const HOST_SILENCE_LIMIT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ChildError {
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Message encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("No message from the host for {0:?}")]
    HostSilent(Duration),
}

/// Connects to the host named on `command_line` and serves it until told
/// to stop. Returns the process exit code.
pub fn run_child(command_line: &CommandLine) -> Result<i32, ChildError> {
    let io = IoThread::start(IpcConfig::default())?;
    let (events_tx, events) = mailbox();
    let proxy = host_channel(command_line)?
        .mailbox(events_tx)
        .build(&io.handle())?;

    let mut child = ChildLoop {
        proxy,
        ask_before_shutdown: false,
        categories: None,
    };

    loop {
        let Some(event) = events.recv_timeout(HOST_SILENCE_LIMIT) else {
            return Err(ChildError::HostSilent(HOST_SILENCE_LIMIT));
        };
        match event {
            ChannelEvent::Connected { peer_pid } => log::info!("connected to host pid {}", peer_pid),
            ChannelEvent::Error => {
                log::info!("host channel closed");
                return Ok(0);
            }
            ChannelEvent::Message(message) => {
                if let Some(code) = child.handle(&message)? {
                    return Ok(code);
                }
            }
        }
    }
}

struct ChildLoop {
    proxy: ChannelProxy,
    ask_before_shutdown: bool,
    categories: Option<String>,
}

impl ChildLoop {
    /// `Some(code)` ends the process
    fn handle(&mut self, message: &Message) -> Result<Option<i32>, ChildError> {
        if Shutdown::matches(message) {
            log::info!("host requested shutdown");
            return Ok(Some(0));
        }
        if AskBeforeShutdown::matches(message) {
            self.ask_before_shutdown = true;
        } else if SetIpcLoggingEnabled::matches(message) {
            let enabled = SetIpcLoggingEnabled::read(message)?.enabled;
            log::debug!("ipc logging enabled: {}", enabled);
        } else if BeginTracing::matches(message) {
            self.categories = Some(BeginTracing::read(message)?.categories);
        } else if EndTracing::matches(message) {
            self.end_tracing()?;
        } else if Echo::matches(message) {
            self.echo(message)?;
        } else if Crash::matches(message) {
            log::warn!("aborting on request");
            std::process::abort();
        } else if Exit::matches(message) {
            return Ok(Some(Exit::read(message)?.code));
        } else if Burst::matches(message) {
            let count = Burst::read(message)?.count;
            for seq in 0..count {
                self.proxy.send(BurstItem { seq }.to_control()?);
            }
        } else if RequestShutdown::matches(message) {
            if !self.ask_before_shutdown {
                return Ok(Some(0));
            }
            self.proxy.send(ShutdownRequest {}.to_control()?);
        } else if SendMalformed::matches(message) {
            let mut bogus = Message::control(ShutdownRequest::TYPE);
            bogus.set_payload_bytes(b"not json".to_vec());
            self.proxy.send(bogus);
        } else {
            log::warn!("ignoring message {}", message.message_type());
            if message.is_sync() {
                self.proxy.send(message.reply_error());
            }
        }
        Ok(None)
    }

    fn echo(&self, message: &Message) -> Result<(), ChildError> {
        let echo = Echo::read(message)?;
        let response = if message.is_sync() {
            let mut reply = message.reply();
            reply.write_payload(&echo)?;
            reply
        } else {
            echo.to_message(message.routing_id())?
        };
        self.proxy.send(response);
        Ok(())
    }

    fn end_tracing(&mut self) -> Result<(), ChildError> {
        let categories = self.categories.take().unwrap_or_default();
        let fragments = [
            format!("pid={}", std::process::id()),
            format!("categories={}", categories),
        ];
        for data in fragments {
            self.proxy.send(TraceDataCollected { data }.to_control()?);
        }
        self.proxy.send(EndTracingAck {}.to_control()?);
        Ok(())
    }
}
