use std::sync::Mutex;

use aig_core::protocol::TaskResult;
use aig_core::SubTask;

/// Outward reporting surface for one task execution.
///
/// Implementations must be cheap and non-blocking: they are called from the
/// line-reading loop of the running tool.
pub trait TaskCallbacks: Send + Sync {
    /// Publish the execution plan. Called once, before any status update.
    fn plan_update(&self, tasks: &[SubTask]);

    /// Publish the full sub-task list after a status or progress change.
    fn status_update(&self, tasks: &[SubTask]);

    /// Forward a result emitted by the tool.
    fn result_update(&self, result: &TaskResult);
}

/// One recorded callback invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackEvent {
    Plan(Vec<SubTask>),
    Status(Vec<SubTask>),
    Result(TaskResult),
}

/// Callbacks that keep every event in order. Used by tests and by anything
/// that wants to inspect a run after the fact.
#[derive(Debug, Default)]
pub struct RecordingCallbacks {
    events: Mutex<Vec<CallbackEvent>>,
}

impl RecordingCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CallbackEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn status_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, CallbackEvent::Status(_)))
            .count()
    }

    /// The most recent plan or status snapshot.
    pub fn last_snapshot(&self) -> Option<Vec<SubTask>> {
        self.events().into_iter().rev().find_map(|e| match e {
            CallbackEvent::Plan(t) | CallbackEvent::Status(t) => Some(t),
            CallbackEvent::Result(_) => None,
        })
    }

    fn push(&self, event: CallbackEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl TaskCallbacks for RecordingCallbacks {
    fn plan_update(&self, tasks: &[SubTask]) {
        self.push(CallbackEvent::Plan(tasks.to_vec()));
    }

    fn status_update(&self, tasks: &[SubTask]) {
        self.push(CallbackEvent::Status(tasks.to_vec()));
    }

    fn result_update(&self, result: &TaskResult) {
        self.push(CallbackEvent::Result(result.clone()));
    }
}
