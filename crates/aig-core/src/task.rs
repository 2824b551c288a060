use serde::{Deserialize, Serialize};

pub const TASK_TYPE_MODEL_JAILBREAK: &str = "model_jailbreak";
pub const TASK_TYPE_MODEL_REDTEAM_REPORT: &str = "model_redteam_report";

/// Language used when a request does not name one.
pub const DEFAULT_LANGUAGE: &str = "zh";

/// One assignment from the server. Consumed exactly once by a handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub task_type: String,
    pub session_id: String,
    /// Task-type-specific parameters, decoded by the handler.
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub content: String,
    /// Opaque server-side file names.
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub language: String,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    /// The request language, or [`DEFAULT_LANGUAGE`] when empty.
    pub fn effective_language(&self) -> &str {
        let lang = self.language.trim();
        if lang.is_empty() {
            DEFAULT_LANGUAGE
        } else {
            lang
        }
    }

    /// Decode `params` into a handler-specific type. A missing payload
    /// decodes as an empty object.
    pub fn decode_params<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        if self.params.is_null() {
            serde_json::from_value(serde_json::Value::Object(Default::default()))
        } else {
            serde_json::from_value(self.params.clone())
        }
    }
}
