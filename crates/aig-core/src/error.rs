use std::fmt;

use thiserror::Error;

/// Everything that can fail a single task execution.
///
/// None of these tear down the server connection; the session converts them
/// into a `task_finished` failure and keeps serving.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("no model configuration in task and no default model configured")]
    MissingModelConfig,

    #[error("duplicate handler registered for task type: {0}")]
    DuplicateHandler(String),

    #[error("no handler for task type: {0}")]
    NoSuchHandler(String),

    #[error("invalid task params: {0}")]
    InvalidParams(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("tool exited with code {code:?}")]
    Exited { code: Option<i32> },

    #[error("tool reported failure: {0}")]
    ToolFailure(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification used for logging and for the failure message sent
/// to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Dispatch,
    Transport,
    Subprocess,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Dispatch => "dispatch",
            ErrorKind::Transport => "transport",
            ErrorKind::Subprocess => "subprocess",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::MissingModelConfig
            | TaskError::DuplicateHandler(_)
            | TaskError::InvalidParams(_) => ErrorKind::Configuration,
            TaskError::NoSuchHandler(_) => ErrorKind::Dispatch,
            TaskError::Transport(_) | TaskError::Io(_) => ErrorKind::Transport,
            TaskError::Spawn { .. } | TaskError::Exited { .. } | TaskError::ToolFailure(_) => {
                ErrorKind::Subprocess
            }
            TaskError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        TaskError::Transport(message.into())
    }
}
