use serde::Serialize;

use super::types::ProcessId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskbarEntry {
    pub process_id: ProcessId,
    pub app_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Running processes in launch order.
#[derive(Debug, Default)]
pub struct Taskbar {
    entries: Vec<TaskbarEntry>,
}

impl Taskbar {
    pub fn add(&mut self, entry: TaskbarEntry) {
        self.entries.retain(|e| e.process_id != entry.process_id);
        self.entries.push(entry);
    }

    pub fn remove(&mut self, process_id: ProcessId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.process_id != process_id);
        before != self.entries.len()
    }

    pub fn retitle(&mut self, process_id: ProcessId, title: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.process_id == process_id) {
            entry.title = title.to_string();
        }
    }

    pub fn entries(&self) -> &[TaskbarEntry] {
        &self.entries
    }
}
