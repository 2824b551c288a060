use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    Todo,
    Running,
    Done,
    Failed,
}

impl SubTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubTaskStatus::Todo => "todo",
            SubTaskStatus::Running => "running",
            SubTaskStatus::Done => "done",
            SubTaskStatus::Failed => "failed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "todo" => Some(SubTaskStatus::Todo),
            "running" => Some(SubTaskStatus::Running),
            "done" => Some(SubTaskStatus::Done),
            "failed" => Some(SubTaskStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubTaskStatus::Done | SubTaskStatus::Failed)
    }

    /// Whether moving from `self` to `next` goes forward along
    /// `Todo -> Running -> {Done, Failed}`. A sub-task that never started
    /// may still fail.
    pub fn can_transition_to(&self, next: SubTaskStatus) -> bool {
        matches!(
            (self, next),
            (SubTaskStatus::Todo, SubTaskStatus::Running)
                | (SubTaskStatus::Todo, SubTaskStatus::Failed)
                | (SubTaskStatus::Running, SubTaskStatus::Done)
                | (SubTaskStatus::Running, SubTaskStatus::Failed)
        )
    }
}

impl fmt::Display for SubTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One phase of a task's execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTask {
    /// Ordinal within the plan, dense from 1.
    pub id: u32,
    pub title: String,
    pub status: SubTaskStatus,
    /// Percentage, 0-100.
    pub progress: u8,
}

impl SubTask {
    pub fn new(id: u32, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            status: SubTaskStatus::Todo,
            progress: 0,
        }
    }
}

/// Build a fresh plan from ordered titles: ids 1..=n, all `Todo`.
pub fn plan_from_titles<S: AsRef<str>>(titles: &[S]) -> Vec<SubTask> {
    titles
        .iter()
        .enumerate()
        .map(|(i, title)| SubTask::new(i as u32 + 1, title.as_ref()))
        .collect()
}
