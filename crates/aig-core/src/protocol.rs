//! Messages exchanged with the orchestration server over the agent socket.
//!
//! Every frame is a JSON text frame `{"type": "...", "content": {...}}`.

use serde::{Deserialize, Serialize};

use crate::subtask::SubTask;
use crate::task::TaskRequest;

/// Identity the agent announces right after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub id: String,
    pub hostname: String,
    pub ip: String,
    pub version: String,
    #[serde(default)]
    pub metadata: String,
}

/// A result payload emitted by the external tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub msg_type: String,
    pub content: serde_json::Value,
    #[serde(default)]
    pub status: bool,
}

/// Server → agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum ServerMessage {
    TaskAssign(TaskRequest),
    #[serde(rename_all = "camelCase")]
    Cancel { session_id: String },
}

/// Agent → server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum AgentMessage {
    Register(AgentInfo),
    #[serde(rename_all = "camelCase")]
    Heartbeat { agent_id: String },
    #[serde(rename_all = "camelCase")]
    PlanUpdate {
        session_id: String,
        tasks: Vec<SubTask>,
    },
    #[serde(rename_all = "camelCase")]
    StatusUpdate {
        session_id: String,
        tasks: Vec<SubTask>,
    },
    #[serde(rename_all = "camelCase")]
    ResultUpdate {
        session_id: String,
        msg_type: String,
        content: serde_json::Value,
        status: bool,
    },
    #[serde(rename_all = "camelCase")]
    TaskFinished {
        session_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TaskRejected { session_id: String, reason: String },
}

impl AgentMessage {
    pub fn result(session_id: &str, result: &TaskResult) -> Self {
        AgentMessage::ResultUpdate {
            session_id: session_id.to_string(),
            msg_type: result.msg_type.clone(),
            content: result.content.clone(),
            status: result.status,
        }
    }

    pub fn finished(session_id: &str, outcome: Result<(), String>) -> Self {
        match outcome {
            Ok(()) => AgentMessage::TaskFinished {
                session_id: session_id.to_string(),
                success: true,
                error: None,
            },
            Err(e) => AgentMessage::TaskFinished {
                session_id: session_id.to_string(),
                success: false,
                error: Some(e),
            },
        }
    }
}
