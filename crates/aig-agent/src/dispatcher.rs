use std::collections::HashMap;
use std::sync::Arc;

use aig_core::{TaskError, TaskRequest};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::callbacks::TaskCallbacks;
use crate::handler::TaskHandler;

/// Task-type name → handler. Filled once at startup, read-only afterwards.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handlers(
        handlers: impl IntoIterator<Item = Arc<dyn TaskHandler>>,
    ) -> Result<Self, TaskError> {
        let mut registry = Self::new();
        for handler in handlers {
            registry.register(handler)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) -> Result<(), TaskError> {
        let name = handler.name().to_string();
        if self.handlers.contains_key(&name) {
            return Err(TaskError::DuplicateHandler(name));
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    pub fn get(&self, task_type: &str) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(task_type)
    }

    /// Registered task types, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Route `request` to its handler and run it.
    pub async fn dispatch(
        &self,
        cancel: &CancellationToken,
        request: TaskRequest,
        callbacks: &dyn TaskCallbacks,
    ) -> Result<(), TaskError> {
        let task_type = request.task_type.clone();
        let session_id = request.session_id.clone();
        let handler = self
            .get(&task_type)
            .ok_or_else(|| TaskError::NoSuchHandler(task_type.clone()))
            .inspect_err(|e| error!("task {session_id} ({task_type}) rejected: {e}"))?;

        info!("dispatching task {session_id} ({task_type})");
        let result = handler.execute(cancel, request, callbacks).await;
        match &result {
            Ok(()) => info!("task {session_id} ({task_type}) completed"),
            Err(e) => error!(
                "task {session_id} ({task_type}) failed [{}]: {e}",
                e.kind()
            ),
        }
        result
    }
}
