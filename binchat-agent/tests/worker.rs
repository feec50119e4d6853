mod common;

use binchat_agent::{ChatCore, ChatWorker};
use binchat_core::{verify_chain, ErrorKind, LogBackend, MemoryBackend, ReplayTransport, Role, ScriptOutcome, SessionLog};
use common::{Event, Recorder};
use std::sync::Arc;

fn echo(code: &str) -> ScriptOutcome {
    ScriptOutcome::Output(format!("ran {}\n", code))
}

#[test]
fn test_worker_runs_commands_in_order() {
    let sink = Arc::new(Recorder::default());
    let transport = ReplayTransport::new()
        .push_text("<idascript>print(db)</idascript>")
        .push_text("All done.");
    let queries = transport.query_log();
    let core = ChatCore::new(transport, echo, sink.clone());
    let worker = ChatWorker::spawn(core).unwrap();

    worker.connect().unwrap().blocking_wait().unwrap();
    let result = worker.send_message("inspect").unwrap().blocking_wait().unwrap();
    worker.disconnect().unwrap().blocking_wait().unwrap();
    worker.join().unwrap();

    assert_eq!(result, "ran print(db)\n");
    assert_eq!(queries.lock().unwrap().clone(), vec!["inspect", "ran print(db)\n"]);
    assert!(sink.events().contains(&Event::Text("All done.".into())));
}

#[test]
fn test_connect_starts_the_session_log() {
    let backend = MemoryBackend::new();
    let history = SessionLog::with_backend("/samples/a.exe", backend.clone());
    let transport = ReplayTransport::new()
        .push_text("<idascript>print(db)</idascript>")
        .push_text("Done.");
    let core = ChatCore::new(transport, echo, Arc::new(Recorder::default())).with_history(history);
    let worker = ChatWorker::spawn(core).unwrap();

    worker.connect().unwrap().blocking_wait().unwrap();
    worker.send_message("inspect").unwrap().blocking_wait().unwrap();
    worker.disconnect().unwrap().blocking_wait().unwrap();
    worker.join().unwrap();

    let ids = backend.session_ids().unwrap();
    assert_eq!(ids.len(), 1);

    let reloaded = SessionLog::with_backend("/samples/a.exe", backend);
    let entries = reloaded.load_session(&ids[0]).unwrap();
    assert!(verify_chain(&entries).is_ok());
    assert_eq!(entries[0].role(), Role::User);
    assert_eq!(entries[0].user_text(), Some("inspect"));
    assert_eq!(entries.last().unwrap().role(), Role::Assistant);
}

#[test]
fn test_send_before_connect_reports_error() {
    let sink = Arc::new(Recorder::default());
    let core = ChatCore::new(ReplayTransport::new(), echo, sink.clone());
    let worker = ChatWorker::spawn(core).unwrap();

    let err = worker.send_message("hello").unwrap().blocking_wait().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotConnected);
    worker.join().unwrap();

    assert_eq!(sink.errors(), vec!["Client not connected. Call connect() first.".to_string()]);
}

#[test]
fn test_new_session_returns_id() {
    let sink = Arc::new(Recorder::default());
    let core = ChatCore::new(ReplayTransport::new(), echo, sink).with_history(SessionLog::in_memory("a.exe"));
    let worker = ChatWorker::spawn(core).unwrap();

    let first = worker.new_session().unwrap().blocking_wait().unwrap();
    let second = worker.new_session().unwrap().blocking_wait().unwrap();
    assert!(!first.is_empty());
    assert_ne!(first, second);

    worker.join().unwrap();
}

#[test]
fn test_commands_after_disconnect_fail() {
    let core = ChatCore::new(ReplayTransport::new(), echo, Arc::new(Recorder::default()));
    let worker = ChatWorker::spawn(core).unwrap();

    worker.disconnect().unwrap().blocking_wait().unwrap();
    // The thread has stopped; the queued command is never answered.
    let outcome = worker.connect().and_then(|reply| reply.blocking_wait());
    assert_eq!(outcome.unwrap_err().kind(), ErrorKind::ChannelClosed);
}

#[tokio::test]
async fn test_reply_can_be_awaited() {
    let transport = ReplayTransport::new().push_text("hi");
    let core = ChatCore::new(transport, echo, Arc::new(Recorder::default()));
    let worker = ChatWorker::spawn(core).unwrap();

    worker.connect().unwrap().wait().await.unwrap();
    let result = worker.send_message("hello").unwrap().wait().await.unwrap();
    assert_eq!(result, "");
}
