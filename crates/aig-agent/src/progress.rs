//! Turns the evaluation tool's stdout into sub-task state.
//!
//! The tool writes one JSON object per line, `{"type": ..., "content": ...}`.
//! Anything else is noise. See [`ProgressParser::feed`] for the recognised
//! kinds.

use aig_core::protocol::TaskResult;
use aig_core::{SubTask, SubTaskStatus};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::callbacks::TaskCallbacks;

/// Parser state carried across lines of one execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandConfig {
    /// Sub-task the tool is currently working on.
    pub current: Option<u32>,
    /// First unrecoverable failure the tool reported.
    pub failure: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ToolLine {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepContent {
    #[serde(default)]
    step_id: Value,
    #[serde(default)]
    title: String,
    #[serde(default)]
    brief: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Default, Deserialize)]
struct ProgressContent {
    #[serde(default)]
    progress: Value,
}

/// Owns the plan for one execution and applies tool output to it.
///
/// The plan never grows or shrinks, and statuses only move forward along
/// `Todo -> Running -> {Done, Failed}`.
#[derive(Debug)]
pub struct ProgressParser {
    tasks: Vec<SubTask>,
    config: CommandConfig,
    plan_published: bool,
}

impl ProgressParser {
    pub fn new(plan: Vec<SubTask>) -> Self {
        Self {
            tasks: plan,
            config: CommandConfig::default(),
            plan_published: false,
        }
    }

    pub fn snapshot(&self) -> &[SubTask] {
        &self.tasks
    }

    pub fn config(&self) -> &CommandConfig {
        &self.config
    }

    pub fn failure(&self) -> Option<&str> {
        self.config.failure.as_deref()
    }

    /// First sub-task not yet `Done` or `Failed`.
    pub fn unfinished(&self) -> Option<&SubTask> {
        self.tasks.iter().find(|t| !t.status.is_terminal())
    }

    /// Publish the plan through `callbacks`. Only the first call publishes.
    pub fn publish_plan(&mut self, callbacks: &dyn TaskCallbacks) {
        if self.plan_published {
            warn!("plan already published, ignoring");
            return;
        }
        self.plan_published = true;
        callbacks.plan_update(&self.tasks);
    }

    /// Apply one line of tool output. Returns whether the sub-task list
    /// changed; a change is always followed by exactly one `status_update`.
    ///
    /// | kind | effect |
    /// |---|---|
    /// | `newPlanStep` | start `stepId`, completing the previous current step |
    /// | `statusUpdate` | `running` starts, `completed` completes, `failed` fails `stepId` |
    /// | `progress` | raise the current step's progress (0-100) |
    /// | `criticalIssue` | fail the current (or first unfinished) step |
    /// | `resultUpdate` | forwarded via `result_update`, no state change |
    pub fn feed(&mut self, line: &str, callbacks: &dyn TaskCallbacks) -> bool {
        let parsed = match serde_json::from_str::<ToolLine>(line.trim()) {
            Ok(parsed) => parsed,
            Err(_) => {
                debug!("tool: {line}");
                return false;
            }
        };

        let changed = match parsed.kind.as_str() {
            "newPlanStep" => {
                let content: StepContent = decode(parsed.content);
                debug!("tool plan step {}: {}", content.step_id, content.title);
                match parse_step_id(&content.step_id) {
                    Some(id) => self.advance_to(id),
                    None => false,
                }
            }
            "statusUpdate" => {
                let content: StepContent = decode(parsed.content);
                let id = parse_step_id(&content.step_id).or(self.config.current);
                debug!(
                    "tool status {} step {id:?}: {} {}",
                    content.status, content.brief, content.description
                );
                match (id, content.status.as_str()) {
                    (Some(id), "running") => self.start(id),
                    (Some(id), "completed") => self.complete(id),
                    (Some(id), "failed") => {
                        let reason = first_non_empty(&[&content.description, &content.brief])
                            .unwrap_or("step failed")
                            .to_string();
                        self.fail(Some(id), reason)
                    }
                    _ => false,
                }
            }
            "progress" => {
                let content: ProgressContent = decode(parsed.content);
                match parse_percent(&content.progress) {
                    Some(pct) => self.set_progress(pct),
                    None => false,
                }
            }
            "criticalIssue" => {
                let reason = match &parsed.content {
                    Value::String(s) => s.clone(),
                    other => other
                        .get("content")
                        .and_then(Value::as_str)
                        .unwrap_or("critical issue")
                        .to_string(),
                };
                warn!("tool reported critical issue: {reason}");
                self.fail(None, reason)
            }
            "resultUpdate" => {
                match serde_json::from_value::<TaskResult>(parsed.content) {
                    Ok(result) => callbacks.result_update(&result),
                    Err(e) => warn!("malformed resultUpdate from tool: {e}"),
                }
                false
            }
            "toolUsed" | "actionLog" => {
                debug!("tool {}: {}", parsed.kind, parsed.content);
                false
            }
            other => {
                debug!("unknown tool message kind {other}");
                false
            }
        };

        if changed {
            callbacks.status_update(&self.tasks);
        }
        changed
    }

    /// Mark the current (or first unfinished) step failed after the tool
    /// itself failed. Publishes a status update if anything changed.
    pub fn fail_open(&mut self, reason: &str, callbacks: &dyn TaskCallbacks) -> bool {
        let changed = self.fail(None, reason.to_string());
        if changed {
            callbacks.status_update(&self.tasks);
        }
        changed
    }

    fn index_of(&self, id: u32) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    fn transition(&mut self, idx: usize, next: SubTaskStatus) -> bool {
        let task = &mut self.tasks[idx];
        if !task.status.can_transition_to(next) {
            return false;
        }
        task.status = next;
        if next == SubTaskStatus::Done {
            task.progress = 100;
        }
        true
    }

    fn advance_to(&mut self, id: u32) -> bool {
        let Some(idx) = self.index_of(id) else {
            debug!("ignoring step {id} outside the plan");
            return false;
        };
        if !self.tasks[idx].status.can_transition_to(SubTaskStatus::Running) {
            debug!("step {id} already {}, ignoring", self.tasks[idx].status);
            return false;
        }
        let mut changed = false;
        if let Some(prev) = self.config.current.filter(|prev| *prev != id) {
            if let Some(prev_idx) = self.index_of(prev) {
                changed |= self.transition(prev_idx, SubTaskStatus::Done);
            }
            self.config.current = None;
        }
        if self.transition(idx, SubTaskStatus::Running) {
            self.config.current = Some(id);
            changed = true;
        }
        changed
    }

    fn start(&mut self, id: u32) -> bool {
        let Some(idx) = self.index_of(id) else {
            return false;
        };
        if self.transition(idx, SubTaskStatus::Running) {
            self.config.current = Some(id);
            true
        } else {
            false
        }
    }

    fn complete(&mut self, id: u32) -> bool {
        let Some(idx) = self.index_of(id) else {
            return false;
        };
        let changed = self.transition(idx, SubTaskStatus::Done);
        if changed && self.config.current == Some(id) {
            self.config.current = None;
        }
        changed
    }

    fn set_progress(&mut self, pct: u8) -> bool {
        let Some(idx) = self.config.current.and_then(|id| self.index_of(id)) else {
            return false;
        };
        let task = &mut self.tasks[idx];
        if task.status != SubTaskStatus::Running || pct <= task.progress {
            return false;
        }
        task.progress = pct;
        true
    }

    /// Fail step `id`, or without one the current (else first unfinished)
    /// step. An explicit id that is already finished changes nothing.
    fn fail(&mut self, id: Option<u32>, reason: String) -> bool {
        let target = match id {
            Some(id) => self.index_of(id),
            None => self
                .config
                .current
                .and_then(|id| self.index_of(id))
                .filter(|idx| !self.tasks[*idx].status.is_terminal())
                .or_else(|| self.tasks.iter().position(|t| !t.status.is_terminal())),
        };
        let changed = match target {
            Some(idx) => self.transition(idx, SubTaskStatus::Failed),
            None => false,
        };
        if (changed || id.is_none()) && self.config.failure.is_none() {
            self.config.failure = Some(reason);
        }
        if let Some(idx) = target.filter(|_| changed) {
            if self.config.current == Some(self.tasks[idx].id) {
                self.config.current = None;
            }
        }
        changed
    }
}

fn decode<T: DeserializeOwned + Default>(content: Value) -> T {
    serde_json::from_value(content).unwrap_or_default()
}

fn parse_step_id(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_percent(value: &Value) -> Option<u8> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok()?,
        _ => return None,
    };
    if raw.is_nan() {
        return None;
    }
    Some(raw.clamp(0.0, 100.0) as u8)
}

fn first_non_empty<'a>(candidates: &[&'a String]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
}
