use dbrelay::dispatch::Dispatcher;
use dbrelay::ipc::run_ipc;
use dbrelay::registry::SessionRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;

struct IpcHarness {
    events: broadcast::Sender<Value>,
    writer: tokio::io::WriteHalf<tokio::io::DuplexStream>,
    lines: tokio::io::Lines<BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>>,
}

fn start_ipc() -> IpcHarness {
    let (client, server) = tokio::io::duplex(4096);
    let (server_read, server_write) = tokio::io::split(server);

    let registry = Arc::new(SessionRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(registry, None));
    let (events, _) = broadcast::channel(16);

    let channel = events.clone();
    tokio::spawn(async move {
        let _ = run_ipc(dispatcher, channel, server_read, server_write).await;
    });

    let (client_read, writer) = tokio::io::split(client);
    IpcHarness {
        events,
        writer,
        lines: BufReader::new(client_read).lines(),
    }
}

impl IpcHarness {
    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .expect("write line");
    }

    async fn receive(&mut self) -> Value {
        let line = self
            .lines
            .next_line()
            .await
            .expect("read line")
            .expect("stream open");
        serde_json::from_str(&line).expect("json line")
    }
}

#[tokio::test]
async fn sessions_task_round_trips_over_the_channel() {
    let mut ipc = start_ipc();

    ipc.send(r#"{"task": "SESSIONS"}"#).await;
    let payload = ipc.receive().await;

    assert_eq!(payload, json!({ "error": null, "sessions": [] }));
}

#[tokio::test]
async fn add_session_over_ipc_updates_the_registry() {
    let mut ipc = start_ipc();

    ipc.send(r#"{"task": "ADD_SESSION", "message": {"dialect": "sqlite", "database": "/tmp/x.db"}}"#)
        .await;
    let payload = ipc.receive().await;

    assert_eq!(
        payload["sessions"],
        json!([{ "0": "Session currently empty." }])
    );
}

#[tokio::test]
async fn unknown_tasks_come_back_as_error_payloads() {
    let mut ipc = start_ipc();

    ipc.send(r#"{"task": "EXPLODE"}"#).await;
    let payload = ipc.receive().await;

    assert_eq!(payload["error"]["name"], json!("TaskNotImplemented"));
    assert_eq!(
        payload["error"]["message"],
        json!("Task EXPLODE is not implemented.")
    );
}

#[tokio::test]
async fn unparseable_lines_do_not_kill_the_channel() {
    let mut ipc = start_ipc();

    ipc.send("this is not json").await;
    let first = ipc.receive().await;
    assert_eq!(first["error"]["name"], json!("ConfigError"));

    // The channel keeps serving after a bad line.
    ipc.send(r#"{"task": "SESSIONS"}"#).await;
    let second = ipc.receive().await;
    assert!(second["sessions"].is_array());
}

#[tokio::test]
async fn broadcast_responses_are_mirrored_onto_the_channel() {
    let mut ipc = start_ipc();

    // A first round trip guarantees the channel task has subscribed.
    ipc.send(r#"{"task": "SESSIONS"}"#).await;
    ipc.receive().await;

    ipc.events
        .send(json!({ "error": null, "databases": ["plotly"] }))
        .expect("subscriber alive");
    let mirrored = ipc.receive().await;

    assert_eq!(mirrored["databases"], json!(["plotly"]));
}
