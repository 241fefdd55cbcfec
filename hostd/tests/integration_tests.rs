//! End-to-end tests: real `ipc_child` processes behind a process registry

use child_process_host::{
    ChildProcessHost, DefaultDelegate, Disposition, HostConfig, NotificationKind,
    ProcessNotification, ProcessObserver, ProcessRegistry, RouteListener, TraceCollection,
    TraceMessageFilter,
};
use core_types::{ChildProcessId, ProcessType, RoutingId};
use hostd::messages::{Burst, BurstItem, Crash, Echo, RequestShutdown, SendMalformed};
use ipc::{mailbox, IoThread, IpcConfig, Mailbox, MailboxSender, Message, ProxySender, TypedMessage};
use process_launcher::{CommandLine, ProcessLauncher, TerminationStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(10);

struct Harness {
    // Dropped in order: hosts first, the I/O thread last.
    registry: ProcessRegistry,
    launcher: ProcessLauncher,
    io: IoThread,
    notifications: Mailbox<ProcessNotification>,
    seen: Vec<ProcessNotification>,
}

impl Harness {
    fn new(config: HostConfig) -> Self {
        let io = IoThread::start(IpcConfig::default()).unwrap();
        let launcher = ProcessLauncher::start().unwrap();
        let (tx, notifications) = mailbox();
        let mut registry = ProcessRegistry::new(config);
        let observer: Arc<dyn ProcessObserver> = Arc::new(tx);
        registry.add_observer(observer);
        Self {
            registry,
            launcher,
            io,
            notifications,
            seen: Vec::new(),
        }
    }

    fn default_config() -> HostConfig {
        HostConfig {
            termination_grace_ms: 5_000,
            ..HostConfig::default()
        }
    }

    /// Creates a host, lets `configure` prepare it, then launches `ipc_child`
    fn launch(&mut self, configure: impl FnOnce(&mut ChildProcessHost)) -> ChildProcessId {
        let id = self
            .registry
            .create_host(ProcessType::Utility, Box::new(DefaultDelegate));
        configure(self.registry.get_mut(id).unwrap());
        let command_line = CommandLine::new(env!("CARGO_BIN_EXE_ipc_child"));
        self.registry
            .launch(id, &self.io.handle(), &self.launcher, command_line)
            .unwrap();
        id
    }

    /// Pumps until `id` has produced a notification matching `pred`
    fn wait_for(
        &mut self,
        id: ChildProcessId,
        pred: impl Fn(&NotificationKind) -> bool,
    ) -> NotificationKind {
        let deadline = Instant::now() + WAIT;
        loop {
            if let Some(found) = self
                .seen
                .iter()
                .find(|n| n.id == id && pred(&n.kind))
            {
                return found.kind.clone();
            }
            assert!(Instant::now() < deadline, "timed out; saw {:?}", self.kinds(id));
            self.registry.pump(Duration::from_millis(50));
            self.seen.extend(self.notifications.drain());
        }
    }

    fn wait_connected(&mut self, id: ChildProcessId) {
        self.wait_for(id, |k| matches!(k, NotificationKind::Connected { .. }));
    }

    fn wait_disconnected(&mut self, id: ChildProcessId) -> process_launcher::TerminationInfo {
        match self.wait_for(id, |k| matches!(k, NotificationKind::Disconnected(_))) {
            NotificationKind::Disconnected(info) => info,
            _ => unreachable!(),
        }
    }

    fn kinds(&self, id: ChildProcessId) -> Vec<NotificationKind> {
        self.seen
            .iter()
            .filter(|n| n.id == id)
            .map(|n| n.kind.clone())
            .collect()
    }

    fn send(&mut self, id: ChildProcessId, message: Message) {
        assert!(self.registry.get_mut(id).unwrap().send(message));
    }
}

/// Forwards echoed text to a mailbox
struct EchoRoute(MailboxSender<String>);

impl RouteListener for EchoRoute {
    fn on_message_received(&mut self, message: &Message, _sender: &ProxySender) -> Disposition {
        match Echo::read(message) {
            Ok(echo) => {
                self.0.post(echo.text);
                Disposition::Handled
            }
            Err(_) => Disposition::BadMessage,
        }
    }
}

fn collect(registry: &mut ProcessRegistry, inbox: &Mailbox<String>, count: usize) -> Vec<String> {
    let mut texts = Vec::new();
    let done = registry.pump_until(WAIT, |_| {
        texts.extend(inbox.drain());
        texts.len() >= count
    });
    assert!(done, "only got {:?}", texts);
    texts
}

#[test]
fn test_trace_then_negotiated_shutdown() {
    let mut harness = Harness::new(Harness::default_config());
    let (trace_tx, traces) = mailbox::<TraceCollection>();
    let filter = TraceMessageFilter::new(trace_tx);
    assert!(filter.begin_tracing("ipc,host"));

    let id = harness.launch(|host| host.add_filter(filter.clone()));
    harness.wait_connected(id);

    assert!(filter.end_tracing());
    let trace = traces.recv_timeout(WAIT).expect("trace finished");
    assert!(trace.complete);
    assert_eq!(trace.fragments.len(), 2);
    assert!(trace.fragments.iter().any(|f| f == "categories=ipc,host"));
    assert!(!filter.is_tracing());

    harness.send(id, RequestShutdown {}.to_control().unwrap());
    let info = harness.wait_disconnected(id);
    assert_eq!(info.status, TerminationStatus::NormalExit);
    assert_eq!(info.exit_code, 0);
    assert!(!harness.registry.contains(id));

    let kinds = harness.kinds(id);
    assert!(kinds.contains(&NotificationKind::Closing), "no closing notice in {:?}", kinds);
    assert!(matches!(kinds.last(), Some(NotificationKind::Disconnected(_))));
}

#[test]
fn test_messages_queued_before_connect_arrive_in_order() {
    let mut harness = Harness::new(Harness::default_config());
    let (echo_tx, echoes) = mailbox();

    let id = harness.launch(|host| {
        let route = host.next_routing_id();
        assert!(host.add_route(route, Box::new(EchoRoute(echo_tx))));
        for text in ["one", "two", "three"] {
            let echo = Echo {
                text: text.to_string(),
            };
            assert!(host.send(echo.to_message(route).unwrap()));
        }
        assert_eq!(host.queued_messages(), 3);
    });

    let texts = collect(&mut harness.registry, &echoes, 3);
    assert_eq!(texts, vec!["one", "two", "three"]);
    assert_eq!(harness.registry.get(id).unwrap().queued_messages(), 0);
}

#[test]
fn test_child_burst_is_received_in_order() {
    let mut harness = Harness::new(Harness::default_config());
    let (seq_tx, seqs) = mailbox::<u32>();

    struct BurstDelegate(MailboxSender<u32>);

    impl child_process_host::ChildProcessHostDelegate for BurstDelegate {
        fn on_message_received(&mut self, message: &Message, _sender: &ProxySender) -> Disposition {
            match BurstItem::read(message) {
                Ok(item) if BurstItem::matches(message) => {
                    self.0.post(item.seq);
                    Disposition::Handled
                }
                _ => Disposition::Unhandled,
            }
        }
    }

    let id = harness
        .registry
        .create_host(ProcessType::Utility, Box::new(BurstDelegate(seq_tx)));
    harness
        .registry
        .launch(
            id,
            &harness.io.handle(),
            &harness.launcher,
            CommandLine::new(env!("CARGO_BIN_EXE_ipc_child")),
        )
        .unwrap();
    harness.send(id, Burst { count: 200 }.to_control().unwrap());

    let mut received = Vec::new();
    let done = harness.registry.pump_until(WAIT, |_| {
        received.extend(seqs.drain());
        received.len() >= 200
    });
    assert!(done);
    assert_eq!(received, (0..200).collect::<Vec<_>>());
}

#[test]
fn test_crash_is_classified() {
    let mut harness = Harness::new(Harness::default_config());
    let id = harness.launch(|_| {});
    harness.wait_connected(id);

    harness.send(id, Crash {}.to_control().unwrap());
    let info = harness.wait_disconnected(id);
    assert_eq!(info.status, TerminationStatus::Crashed);
    assert!(harness
        .kinds(id)
        .iter()
        .any(|k| matches!(k, NotificationKind::Crashed(_))));
    assert!(harness.registry.is_empty());
}

#[test]
fn test_malformed_message_kills_child() {
    let mut harness = Harness::new(Harness::default_config());
    let id = harness.launch(|_| {});
    harness.wait_connected(id);

    harness.send(id, SendMalformed {}.to_control().unwrap());
    let info = harness.wait_disconnected(id);
    assert_eq!(info.status, TerminationStatus::Killed);
    assert_eq!(info.exit_code, process_launcher::RESULT_CODE_KILLED_BAD_MESSAGE);
}

#[test]
fn test_fast_shutdown_reports_killed() {
    let mut harness = Harness::new(Harness::default_config());
    let id = harness.launch(|_| {});
    harness.wait_connected(id);

    assert!(harness.registry.get_mut(id).unwrap().fast_shutdown());
    let info = harness.wait_disconnected(id);
    assert_eq!(info.status, TerminationStatus::Killed);
    assert_eq!(info.exit_code, process_launcher::RESULT_CODE_KILLED);
}

#[test]
fn test_named_channel() {
    let dir = tempfile::tempdir().unwrap();
    let config = HostConfig {
        named_channel_dir: Some(dir.path().to_path_buf()),
        ..Harness::default_config()
    };
    let mut harness = Harness::new(config);
    let (echo_tx, echoes) = mailbox();

    let id = harness.launch(|host| {
        let route = host.next_routing_id();
        host.add_route(route, Box::new(EchoRoute(echo_tx)));
        let echo = Echo {
            text: "named".to_string(),
        };
        host.send(echo.to_message(route).unwrap());
    });

    assert_eq!(collect(&mut harness.registry, &echoes, 1), vec!["named"]);
    assert!(harness.registry.get(id).unwrap().peer_pid().is_some());
    assert!(dir.path().read_dir().unwrap().next().is_some());
}

#[test]
fn test_unrouted_message_is_dropped() {
    let mut harness = Harness::new(Harness::default_config());
    let (echo_tx, echoes) = mailbox();

    let id = harness.launch(|host| {
        let route = host.next_routing_id();
        host.add_route(route, Box::new(EchoRoute(echo_tx)));
        let stray = Echo {
            text: "stray".to_string(),
        };
        host.send(stray.to_message(RoutingId::new(99)).unwrap());
        let echo = Echo {
            text: "kept".to_string(),
        };
        host.send(echo.to_message(route).unwrap());
    });

    assert_eq!(collect(&mut harness.registry, &echoes, 1), vec!["kept"]);
    assert!(harness.registry.contains(id));
}
