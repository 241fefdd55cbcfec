//! Channel proxy behavior over real socket pairs
//!
//! Covers ordering, filter precedence, silence after removal and close,
//! synchronous requests and named servers taking a new client.

use child_process_host::WorkerReplyFilter;
use ipc::{
    mailbox, ChannelEvent, ChannelProxy, EventSink, IoThread, IpcConfig, MessageFilter,
    SyncSendError, TypedMessage,
};
use lifecycle::Timeout;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tests_resilience::{
    entries, eventually, next_message, note, ping, proxy_pair, start_io, wait_connected,
    wait_error, Note, Ping, RecordingFilter, WAIT,
};

#[test]
fn test_messages_arrive_in_send_order() {
    let io = start_io();
    let pair = proxy_pair(&io.handle(), Vec::new());

    for seq in 0..500 {
        assert!(pair.client.send(ping(0, seq)));
    }

    wait_connected(&pair.server_events);
    for expected in 0..500 {
        let message = next_message(&pair.server_events, WAIT).expect("message");
        assert_eq!(Ping::read(&message).unwrap().seq, expected);
    }
}

#[test]
fn test_two_threads_send_concurrently() {
    let io = start_io();
    let pair = proxy_pair(&io.handle(), Vec::new());

    let workers: Vec<_> = (0..2)
        .map(|sender| {
            let proxy = pair.client.sender();
            thread::spawn(move || {
                for seq in 0..1000 {
                    assert!(proxy.send(ping(sender, seq)));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let mut next = [0u32; 2];
    for _ in 0..2000 {
        let message = next_message(&pair.server_events, WAIT).expect("message");
        let ping = Ping::read(&message).unwrap();
        // Each sender's own messages stay in order.
        assert_eq!(ping.seq, next[ping.sender as usize]);
        next[ping.sender as usize] += 1;
    }
    assert_eq!(next, [1000, 1000]);
}

#[test]
fn test_first_claiming_filter_wins() {
    let io = start_io();
    let log = Arc::new(Mutex::new(Vec::new()));
    let first = RecordingFilter::new("first", Some(Ping::TYPE), log.clone());
    let second = RecordingFilter::new("second", Some(Ping::TYPE), log.clone());
    let pair = proxy_pair(&io.handle(), vec![first.clone() as Arc<dyn MessageFilter>, second.clone()]);

    pair.client.send(ping(0, 0));
    pair.client.send(note("unclaimed"));

    let message = next_message(&pair.server_events, WAIT).expect("note reaches listener");
    assert_eq!(Note::read(&message).unwrap().text, "unclaimed");

    let ping_type = Ping::TYPE.to_string();
    let note_type = Note::TYPE.to_string();
    assert_eq!(
        entries(&log, "first"),
        vec!["added", "connected", ping_type.as_str(), note_type.as_str()]
    );
    assert_eq!(
        entries(&log, "second"),
        vec!["added", "connected", note_type.as_str()]
    );
}

#[test]
fn test_filter_given_before_open_sees_whole_lifecycle() {
    let io = start_io();
    let log = Arc::new(Mutex::new(Vec::new()));
    let filter = RecordingFilter::new("early", None, log.clone());
    let pair = proxy_pair(&io.handle(), vec![filter.clone() as Arc<dyn MessageFilter>]);

    wait_connected(&pair.server_events);
    assert!(filter.sender().is_some());
    assert_eq!(entries(&log, "early"), vec!["added", "connected"]);

    pair.server.close();
    assert!(eventually(|| entries(&log, "early").last().map(String::as_str) == Some("removed")));
    assert_eq!(
        entries(&log, "early"),
        vec!["added", "connected", "closing", "removed"]
    );
    assert!(filter.sender().unwrap().is_closed());
}

#[test]
fn test_removed_filter_gets_nothing_more() {
    let io = start_io();
    let log = Arc::new(Mutex::new(Vec::new()));
    let pair = proxy_pair(&io.handle(), Vec::new());
    wait_connected(&pair.server_events);

    let filter: Arc<dyn MessageFilter> = RecordingFilter::new("late", Some(Ping::TYPE), log.clone());
    pair.server.add_filter(filter.clone());
    pair.client.send(ping(0, 1));
    assert!(eventually(|| entries(&log, "late").len() == 3));

    pair.server.remove_filter(&filter);
    assert!(eventually(|| entries(&log, "late").last().map(String::as_str) == Some("removed")));

    pair.client.send(ping(0, 2));
    let message = next_message(&pair.server_events, WAIT).expect("reaches listener");
    assert_eq!(Ping::read(&message).unwrap().seq, 2);
    assert_eq!(
        entries(&log, "late"),
        vec!["added", "connected", Ping::TYPE.to_string().as_str(), "removed"]
    );
}

/// Counts events instead of queueing them
struct CountingSink(AtomicUsize);

impl EventSink for CountingSink {
    fn post_event(&self, _event: ChannelEvent) -> bool {
        self.0.fetch_add(1, Ordering::SeqCst);
        true
    }
}

#[test]
fn test_no_listener_events_after_close() {
    let io = start_io();
    let (server_fd, client_fd) = ipc::socket_pair().unwrap();
    let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
    let server = ChannelProxy::builder(ipc::ChannelHandle::Socket(server_fd), ipc::Mode::Server)
        .listener(sink.clone())
        .build(&io.handle())
        .unwrap();
    let (client_tx, client_events) = mailbox();
    let client = ChannelProxy::builder(ipc::ChannelHandle::Socket(client_fd), ipc::Mode::Client)
        .mailbox(client_tx)
        .build(&io.handle())
        .unwrap();

    client.send(ping(0, 0));
    // Connected plus one message
    assert!(eventually(|| sink.0.load(Ordering::SeqCst) == 2));

    server.close();
    thread::sleep(Duration::from_millis(50));
    let after_close = sink.0.load(Ordering::SeqCst);

    for seq in 1..50 {
        client.send(ping(0, seq));
    }
    wait_error(&client_events);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(sink.0.load(Ordering::SeqCst), after_close);
}

#[test]
fn test_close_is_idempotent_and_refuses_sends() {
    let io = start_io();
    let pair = proxy_pair(&io.handle(), Vec::new());
    let sender = pair.client.sender();

    pair.client.close();
    pair.client.close();
    assert!(pair.client.is_closed());
    assert!(!pair.client.send(ping(0, 0)));
    assert!(!sender.send(ping(0, 1)));
    assert!(sender.closed_token().is_cancelled());
    assert!(matches!(
        pair.client.send_sync(ping(0, 2), Timeout::from_millis(100)),
        Err(SyncSendError::ChannelClosed)
    ));

    assert!(wait_error(&pair.server_events));
}

#[test]
fn test_dropped_proxy_sender_is_closed() {
    let io = start_io();
    let pair = proxy_pair(&io.handle(), Vec::new());
    let sender = pair.client.sender();
    drop(pair);
    assert!(sender.is_closed());
    assert!(!sender.send(ping(0, 0)));
}

#[test]
fn test_sync_request_gets_worker_reply() {
    let io = start_io();
    let filter = WorkerReplyFilter::new(Note::TYPE, |payload| {
        let note: Note = serde_json::from_slice(payload).ok()?;
        serde_json::to_vec(&Note {
            text: note.text.to_uppercase(),
        })
        .ok()
    });
    let pair = proxy_pair(&io.handle(), vec![filter.clone() as Arc<dyn MessageFilter>]);

    let reply = pair
        .client
        .send_sync(note("hello"), Timeout::from_secs(10))
        .unwrap();
    assert!(reply.is_reply());
    assert_eq!(Note::read(&reply).unwrap().text, "HELLO");
    assert!(eventually(|| filter.replies_sent() == 1));
}

#[test]
fn test_sync_reply_error_releases_caller() {
    let io = start_io();
    let filter = WorkerReplyFilter::new(Note::TYPE, |_| None);
    let pair = proxy_pair(&io.handle(), vec![filter as Arc<dyn MessageFilter>]);

    assert!(matches!(
        pair.client.send_sync(note("refused"), Timeout::from_secs(10)),
        Err(SyncSendError::ReplyError)
    ));
}

#[test]
fn test_unanswered_sync_request_times_out() {
    let io = start_io();
    let pair = proxy_pair(&io.handle(), Vec::new());

    assert!(matches!(
        pair.client.send_sync(note("anyone?"), Timeout::from_millis(200)),
        Err(SyncSendError::Timeout)
    ));
    // The request still reached the peer's listener.
    let message = next_message(&pair.server_events, WAIT).expect("request");
    assert!(message.is_sync());
}

#[test]
fn test_peer_close_releases_blocked_caller() {
    let io = start_io();
    let pair = proxy_pair(&io.handle(), Vec::new());
    let client = pair.client;

    let waiter = thread::spawn(move || client.send_sync(note("pending"), Timeout::from_secs(30)));
    next_message(&pair.server_events, WAIT).expect("request");
    drop(pair.server);

    assert!(matches!(
        waiter.join().unwrap(),
        Err(SyncSendError::ChannelClosed)
    ));
}

#[test]
fn test_deferred_reply_cancels_after_close() {
    let io = start_io();
    let filter = WorkerReplyFilter::new(Note::TYPE, |payload| {
        thread::sleep(Duration::from_millis(300));
        Some(payload.to_vec())
    });
    let pair = proxy_pair(&io.handle(), vec![filter.clone() as Arc<dyn MessageFilter>]);
    let client = pair.client;

    let waiter = thread::spawn(move || client.send_sync(note("slow"), Timeout::from_secs(30)));
    // Close while the worker is still busy.
    thread::sleep(Duration::from_millis(100));
    pair.server.close();

    assert!(matches!(
        waiter.join().unwrap(),
        Err(SyncSendError::ChannelClosed)
    ));
    assert!(eventually(|| filter.replies_dropped() == 1));
    assert_eq!(filter.replies_sent(), 0);
}

#[test]
fn test_sync_request_without_listener_is_refused() {
    let io = start_io();
    let (server_fd, client_fd) = ipc::socket_pair().unwrap();
    let _server = ChannelProxy::builder(ipc::ChannelHandle::Socket(server_fd), ipc::Mode::Server)
        .build(&io.handle())
        .unwrap();
    let (client_tx, _client_events) = mailbox();
    let client = ChannelProxy::builder(ipc::ChannelHandle::Socket(client_fd), ipc::Mode::Client)
        .mailbox(client_tx)
        .build(&io.handle())
        .unwrap();

    let started = Instant::now();
    assert!(matches!(
        client.send_sync(note("nobody"), Timeout::from_secs(30)),
        Err(SyncSendError::ReplyError)
    ));
    assert!(started.elapsed() < WAIT);
}

#[test]
fn test_sync_request_to_dropped_listener_is_refused() {
    let io = start_io();
    let pair = proxy_pair(&io.handle(), Vec::new());
    drop(pair.server_events);

    let started = Instant::now();
    assert!(matches!(
        pair.client.send_sync(note("gone"), Timeout::from_secs(30)),
        Err(SyncSendError::ReplyError)
    ));
    assert!(started.elapsed() < WAIT);
    assert!(!pair.server.is_closed());
}

#[test]
fn test_nested_sync_request_is_answered_while_waiting() {
    let io = start_io();
    let pair = proxy_pair(&io.handle(), Vec::new());
    let server = pair.server;
    let server_events = pair.server_events;

    let responder = thread::spawn(move || {
        let request = next_message(&server_events, WAIT).expect("outer request");
        let inner = server
            .send_sync(note("inner"), Timeout::from_secs(10))
            .expect("inner reply");
        let mut reply = request.reply();
        reply
            .write_payload(&Note {
                text: format!("outer after {}", Note::read(&inner).unwrap().text),
            })
            .unwrap();
        assert!(server.send(reply));
        server
    });

    let client_sender = pair.client.sender();
    let mut answered = 0;
    let reply = pair
        .client
        .send_sync_dispatching(note("outer"), Timeout::from_secs(10), &pair.client_events, |event| {
            if let ChannelEvent::Message(request) = event {
                assert!(request.is_sync());
                let mut reply = request.reply();
                reply
                    .write_payload(&Note {
                        text: "answered".to_string(),
                    })
                    .unwrap();
                assert!(client_sender.send(reply));
                answered += 1;
            }
        })
        .unwrap();

    assert_eq!(Note::read(&reply).unwrap().text, "outer after answered");
    assert_eq!(answered, 1);
    drop(responder.join().unwrap());
}

#[test]
fn test_dispatching_wait_times_out() {
    let io = start_io();
    let pair = proxy_pair(&io.handle(), Vec::new());
    wait_connected(&pair.client_events);

    let mut events = 0;
    let result = pair.client.send_sync_dispatching(
        note("silence"),
        Timeout::from_millis(200),
        &pair.client_events,
        |_| events += 1,
    );
    assert!(matches!(result, Err(SyncSendError::Timeout)));
    assert_eq!(events, 0);
}

#[test]
fn test_default_sync_timeout_comes_from_config() {
    let io = IoThread::start(IpcConfig {
        default_sync_timeout_ms: 200,
        ..IpcConfig::default()
    })
    .unwrap();
    let pair = proxy_pair(&io.handle(), Vec::new());

    let started = Instant::now();
    assert!(matches!(
        pair.client.send_sync_default(note("unanswered")),
        Err(SyncSendError::Timeout)
    ));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < WAIT);
}

#[test]
fn test_named_server_proxy_accepts_next_client() {
    let io = start_io();
    let dir = tempfile::tempdir().unwrap();
    let ipc::ChannelHandle::Named(path) = ipc::ChannelHandle::named_in(dir.path()) else {
        unreachable!()
    };

    let (server_tx, server_events) = mailbox();
    let server = ChannelProxy::builder(ipc::ChannelHandle::Named(path.clone()), ipc::Mode::Server)
        .mailbox(server_tx)
        .build(&io.handle())
        .unwrap();

    let first = ChannelProxy::builder(ipc::ChannelHandle::Named(path.clone()), ipc::Mode::Client)
        .build(&io.handle())
        .unwrap();
    wait_connected(&server_events);
    drop(first);
    assert!(wait_error(&server_events));
    assert!(path.exists());

    let (second_tx, _second_events) = mailbox();
    let second = ChannelProxy::builder(ipc::ChannelHandle::Named(path.clone()), ipc::Mode::Client)
        .mailbox(second_tx)
        .build(&io.handle())
        .unwrap();
    wait_connected(&server_events);
    assert!(second.send(ping(0, 9)));
    let message = next_message(&server_events, WAIT).expect("message from next client");
    assert_eq!(Ping::read(&message).unwrap().seq, 9);
    assert!(server.peer_pid().is_some());

    drop(second);
    assert!(wait_error(&server_events));
    server.close();
    assert!(eventually(|| !path.exists()));
}
