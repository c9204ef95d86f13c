use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::files::write_via_temp;

pub const MAX_HISTORY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryField {
    StartPattern,
    EndPattern,
    Replacement,
    FilePattern,
}

/// Recent prompt answers, newest first.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InputHistory {
    start_pattern: Vec<String>,
    end_pattern: Vec<String>,
    replacement: Vec<String>,
    file_pattern: Vec<String>,
}

impl InputHistory {
    pub fn recent(&self, field: HistoryField) -> &[String] {
        match field {
            HistoryField::StartPattern => &self.start_pattern,
            HistoryField::EndPattern => &self.end_pattern,
            HistoryField::Replacement => &self.replacement,
            HistoryField::FilePattern => &self.file_pattern,
        }
    }

    /// Moves `value` to the front, dropping blanks and anything past
    /// [`MAX_HISTORY`].
    pub fn push(&mut self, field: HistoryField, value: &str) {
        if value.trim().is_empty() {
            return;
        }
        let entries = self.entries_mut(field);
        entries.retain(|existing| existing != value);
        entries.insert(0, value.to_string());
        entries.truncate(MAX_HISTORY);
    }

    fn entries_mut(&mut self, field: HistoryField) -> &mut Vec<String> {
        match field {
            HistoryField::StartPattern => &mut self.start_pattern,
            HistoryField::EndPattern => &mut self.end_pattern,
            HistoryField::Replacement => &mut self.replacement,
            HistoryField::FilePattern => &mut self.file_pattern,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// An unreadable history file loads as empty.
    pub fn load(&self) -> InputHistory {
        let Ok(data) = fs::read(&self.path) else {
            return InputHistory::default();
        };
        match serde_json::from_slice(&data) {
            Ok(history) => history,
            Err(err) => {
                warn!("ignoring unreadable input history {}: {err}", self.path.display());
                InputHistory::default()
            }
        }
    }

    pub fn save(&self, history: &InputHistory) -> Result<()> {
        let json = serde_json::to_string_pretty(history)?;
        write_via_temp(&self.path, json.as_bytes())
            .with_context(|| format!("saving input history {}", self.path.display()))
    }
}
