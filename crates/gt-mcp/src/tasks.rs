//! In-memory record of mayor tasks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Timeout,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Timeout => "timeout",
        }
    }
}

/// How a task reached the mayor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Typed into the running mayor session.
    Interactive,
    /// A fresh `claude -p` run in the mayor directory.
    Oneshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub prompt: String,
    pub status: TaskStatus,
    pub mode: Option<ExecutionMode>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct TaskTable {
    tasks: RwLock<HashMap<String, TaskRecord>>,
}

pub fn new_task_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

impl TaskTable {
    /// Record a new running task and return its ID.
    pub fn start(&self, prompt: &str) -> String {
        let task_id = new_task_id();
        let record = TaskRecord {
            task_id: task_id.clone(),
            prompt: prompt.to_string(),
            status: TaskStatus::Running,
            mode: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.tasks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(task_id.clone(), record);
        task_id
    }

    pub fn set_mode(&self, task_id: &str, mode: ExecutionMode) {
        if let Some(task) = self.write().get_mut(task_id) {
            task.mode = Some(mode);
        }
    }

    pub fn complete(&self, task_id: &str, result: String) {
        self.finish(task_id, TaskStatus::Completed, Some(result), None);
    }

    pub fn fail(&self, task_id: &str, status: TaskStatus, error: String) {
        self.finish(task_id, status, None, Some(error));
    }

    fn finish(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) {
        if let Some(task) = self.write().get_mut(task_id) {
            task.status = status;
            task.result = result;
            task.error = error;
            task.completed_at = Some(Utc::now());
        }
    }

    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(task_id)
            .cloned()
    }

    pub fn active(&self) -> usize {
        self.tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .count()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, TaskRecord>> {
        self.tasks.write().unwrap_or_else(|e| e.into_inner())
    }
}
