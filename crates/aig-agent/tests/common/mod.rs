//! Shared fixtures: a scripted stand-in for the evaluation tool and an
//! in-process websocket server playing the orchestration side.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use aig_agent::config::ToolSettings;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use url::Url;

/// Tool settings that run `<work_dir>/run` through `/bin/sh`.
///
/// Handlers always invoke `<program> run cli_run.py …`, so with `/bin/sh` as
/// the program the script named `run` in the work dir stands in for the
/// tool, receiving the remaining argv as `$@`.
pub fn sh_tool(work_dir: &Path, script: &str) -> ToolSettings {
    std::fs::write(work_dir.join("run"), script).unwrap();
    ToolSettings {
        work_dir: work_dir.to_path_buf(),
        program: "/bin/sh".into(),
        upload_dir: work_dir.join("uploads"),
        dataset_dir: work_dir.join("datasets"),
        kill_grace: Duration::from_secs(1),
    }
}

/// Script prelude recording the argv (one per line) to `args.txt`.
pub const RECORD_ARGS: &str = "printf '%s\\n' \"$@\" > args.txt\n";

/// The argv the script received, if it ran.
pub fn recorded_args(work_dir: &Path) -> Option<Vec<String>> {
    std::fs::read_to_string(work_dir.join("args.txt"))
        .ok()
        .map(|s| s.lines().map(String::from).collect())
}

/// Shell line echoing one tool protocol message.
pub fn emit(kind: &str, content: Value) -> String {
    let line = serde_json::json!({"type": kind, "content": content}).to_string();
    format!("printf '%s\\n' '{}'\n", line.replace('\'', "'\\''"))
}

/// One accepted agent connection, seen from the server.
pub struct Conn {
    to_agent: mpsc::UnboundedSender<String>,
    from_agent: mpsc::UnboundedReceiver<Value>,
}

impl Conn {
    pub fn send(&self, msg: Value) {
        self.to_agent.send(msg.to_string()).unwrap();
    }

    /// Next frame from the agent, heartbeats included.
    pub async fn recv_any(&mut self) -> Option<Value> {
        tokio::time::timeout(Duration::from_secs(10), self.from_agent.recv())
            .await
            .expect("timed out waiting for agent frame")
    }

    /// Next non-heartbeat frame.
    pub async fn recv(&mut self) -> Value {
        loop {
            let msg = self.recv_any().await.expect("agent disconnected");
            if msg["type"] != "heartbeat" {
                return msg;
            }
        }
    }

    /// Wait until the agent side of the socket is gone.
    pub async fn closed(&mut self) {
        while self.recv_any().await.is_some() {}
    }
}

pub struct FakeServer {
    pub addr: SocketAddr,
    conns: mpsc::UnboundedReceiver<Conn>,
}

impl FakeServer {
    pub async fn start() -> Self {
        let (conns_tx, conns) = mpsc::unbounded_channel();
        let app = Router::new()
            .route("/api/v1/agents/ws", get(upgrade))
            .with_state(conns_tx);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, conns }
    }

    pub fn ws_url(&self) -> Url {
        Url::parse(&format!("ws://{}/api/v1/agents/ws", self.addr)).unwrap()
    }

    pub async fn accept(&mut self) -> Conn {
        tokio::time::timeout(Duration::from_secs(10), self.conns.recv())
            .await
            .expect("timed out waiting for agent to connect")
            .expect("server stopped")
    }
}

async fn upgrade(
    State(conns): State<mpsc::UnboundedSender<Conn>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, conns))
}

async fn serve_socket(socket: WebSocket, conns: mpsc::UnboundedSender<Conn>) {
    let (to_agent, mut outbound) = mpsc::unbounded_channel::<String>();
    let (inbound, from_agent) = mpsc::unbounded_channel::<Value>();
    if conns.send(Conn { to_agent, from_agent }).is_err() {
        return;
    }

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(v) = serde_json::from_str::<Value>(text.as_str()) {
                        let _ = inbound.send(v);
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    let _ = sink.close().await;
}
