//! One connection to the orchestration server.
//!
//! A session registers the agent, then serves `task_assign` frames one at a
//! time. The running task reports through [`ChannelCallbacks`], which funnel
//! every outbound message through a single queue so the server sees them in
//! the order they were produced.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aig_core::protocol::{AgentInfo, AgentMessage, ServerMessage, TaskResult};
use aig_core::{SubTask, TaskRequest};
use futures::{Sink, SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::callbacks::TaskCallbacks;
use crate::dispatcher::HandlerRegistry;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("connection closed by server")]
    Closed,
}

/// Connection state published for the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Idle,
    Busy { session_id: String },
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Idle => "idle",
            ConnectionState::Busy { .. } => "busy",
        }
    }

    pub fn current_task(&self) -> Option<&str> {
        match self {
            ConnectionState::Busy { session_id } => Some(session_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub url: Url,
    pub agent_id: String,
    pub hostname: String,
    pub version: String,
    pub heartbeat_interval: Duration,
    /// How long to wait for a cancelled task to wind down on teardown.
    pub teardown_timeout: Duration,
}

enum SessionEvent {
    Outbound(AgentMessage),
    TaskDone {
        session_id: String,
        outcome: Result<(), String>,
    },
}

/// [`TaskCallbacks`] that turn reports into outbound messages.
///
/// Drops a second plan and any status update sent before the plan.
pub struct ChannelCallbacks {
    session_id: String,
    tx: mpsc::UnboundedSender<SessionEvent>,
    plan_sent: AtomicBool,
}

impl ChannelCallbacks {
    fn new(session_id: String, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            session_id,
            tx,
            plan_sent: AtomicBool::new(false),
        }
    }

    fn send(&self, msg: AgentMessage) {
        if self.tx.send(SessionEvent::Outbound(msg)).is_err() {
            debug!("session {} gone, dropping report", self.session_id);
        }
    }
}

impl TaskCallbacks for ChannelCallbacks {
    fn plan_update(&self, tasks: &[SubTask]) {
        if self.plan_sent.swap(true, Ordering::SeqCst) {
            warn!("task {} published a second plan, dropped", self.session_id);
            return;
        }
        self.send(AgentMessage::PlanUpdate {
            session_id: self.session_id.clone(),
            tasks: tasks.to_vec(),
        });
    }

    fn status_update(&self, tasks: &[SubTask]) {
        if !self.plan_sent.load(Ordering::SeqCst) {
            warn!("task {} reported status before its plan, dropped", self.session_id);
            return;
        }
        self.send(AgentMessage::StatusUpdate {
            session_id: self.session_id.clone(),
            tasks: tasks.to_vec(),
        });
    }

    fn result_update(&self, result: &TaskResult) {
        self.send(AgentMessage::result(&self.session_id, result));
    }
}

struct RunningTask {
    session_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Connect, register and serve tasks until the connection drops or
/// `shutdown` fires.
///
/// Returns `Ok(())` only for a shutdown. Any in-flight task is cancelled and
/// awaited (bounded by `teardown_timeout`) before returning.
pub async fn run_session(
    config: &SessionConfig,
    registry: Arc<HandlerRegistry>,
    state: &watch::Sender<ConnectionState>,
    shutdown: &CancellationToken,
) -> Result<(), SessionError> {
    state.send_replace(ConnectionState::Connecting);
    info!("connecting to {}", config.url);

    let (ws, _) = tokio::select! {
        res = connect_async(config.url.as_str()) => res?,
        _ = shutdown.cancelled() => return Ok(()),
    };
    let ip = match ws.get_ref() {
        MaybeTlsStream::Plain(tcp) => tcp.local_addr().ok().map(|a| a.ip()),
        _ => None,
    };
    let (mut sink, mut stream) = ws.split();

    let info = AgentInfo {
        id: config.agent_id.clone(),
        hostname: config.hostname.clone(),
        ip: ip.map(|ip: IpAddr| ip.to_string()).unwrap_or_default(),
        version: config.version.clone(),
        metadata: String::new(),
    };
    send_message(&mut sink, &AgentMessage::Register(info)).await?;
    info!("registered as {}", config.agent_id);
    state.send_replace(ConnectionState::Idle);

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let mut running: Option<RunningTask> = None;
    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );

    let result = loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown requested, closing session");
                break Ok(());
            }
            frame = stream.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(frame))) => {
                        info!("server closed connection: {frame:?}");
                        break Err(SessionError::Closed);
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break Err(e.into()),
                    None => break Err(SessionError::Closed),
                };
                let msg = match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("ignoring malformed server message: {e}");
                        continue;
                    }
                };
                match msg {
                    ServerMessage::TaskAssign(request) => {
                        if let Some(task) = &running {
                            warn!(
                                "rejecting task {}: busy with {}",
                                request.session_id, task.session_id
                            );
                            let reject = AgentMessage::TaskRejected {
                                session_id: request.session_id,
                                reason: format!("agent busy with session {}", task.session_id),
                            };
                            if let Err(e) = send_message(&mut sink, &reject).await {
                                break Err(e);
                            }
                            continue;
                        }
                        state.send_replace(ConnectionState::Busy {
                            session_id: request.session_id.clone(),
                        });
                        running = Some(spawn_task(
                            registry.clone(),
                            request,
                            events_tx.clone(),
                            shutdown.child_token(),
                        ));
                    }
                    ServerMessage::Cancel { session_id } => match &running {
                        Some(task) if task.session_id == session_id => {
                            info!("server cancelled task {session_id}");
                            task.cancel.cancel();
                        }
                        _ => debug!("cancel for unknown task {session_id} ignored"),
                    },
                }
            }
            Some(event) = events_rx.recv() => {
                let msg = match event {
                    SessionEvent::Outbound(msg) => msg,
                    SessionEvent::TaskDone { session_id, outcome } => {
                        running = None;
                        state.send_replace(ConnectionState::Idle);
                        AgentMessage::finished(&session_id, outcome)
                    }
                };
                if let Err(e) = send_message(&mut sink, &msg).await {
                    break Err(e);
                }
            }
            _ = heartbeat.tick() => {
                let beat = AgentMessage::Heartbeat { agent_id: config.agent_id.clone() };
                if let Err(e) = send_message(&mut sink, &beat).await {
                    break Err(e);
                }
            }
        }
    };

    if let Some(task) = running.take() {
        info!("tearing down task {}", task.session_id);
        task.cancel.cancel();
        if tokio::time::timeout(config.teardown_timeout, task.handle)
            .await
            .is_err()
        {
            warn!("task {} did not stop in time", task.session_id);
        }
    }

    if result.is_ok() {
        // Connection still up: flush what the task reported while stopping.
        while let Ok(event) = events_rx.try_recv() {
            let msg = match event {
                SessionEvent::Outbound(msg) => msg,
                SessionEvent::TaskDone { session_id, outcome } => {
                    AgentMessage::finished(&session_id, outcome)
                }
            };
            if send_message(&mut sink, &msg).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    }

    result
}

fn spawn_task(
    registry: Arc<HandlerRegistry>,
    request: TaskRequest,
    events: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
) -> RunningTask {
    let session_id = request.session_id.clone();
    let token = cancel.clone();
    let handle = tokio::spawn(async move {
        let session_id = request.session_id.clone();
        let callbacks = ChannelCallbacks::new(session_id.clone(), events.clone());
        let outcome = registry
            .dispatch(&token, request, &callbacks)
            .await
            .map_err(|e| e.to_string());
        if let Err(e) = &outcome {
            error!("task {session_id} finished with error: {e}");
        }
        let _ = events.send(SessionEvent::TaskDone {
            session_id,
            outcome,
        });
    });
    RunningTask {
        session_id,
        cancel,
        handle,
    }
}

async fn send_message<S>(sink: &mut S, msg: &AgentMessage) -> Result<(), SessionError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(msg)?;
    sink.send(Message::Text(text)).await?;
    Ok(())
}
