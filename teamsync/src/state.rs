use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::files::write_via_temp;

/// Files with approved, uncommitted changes, keyed by repository name.
/// Paths are relative to the repository root.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    #[serde(default)]
    pub modified_files: BTreeMap<String, Vec<String>>,
}

impl SessionState {
    pub fn is_empty(&self) -> bool {
        self.modified_files.values().all(Vec::is_empty)
    }

    pub fn repos(&self) -> Vec<String> {
        self.modified_files
            .iter()
            .filter(|(_, files)| !files.is_empty())
            .map(|(repo, _)| repo.clone())
            .collect()
    }

    pub fn files(&self, repo: &str) -> &[String] {
        self.modified_files
            .get(repo)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn file_count(&self) -> usize {
        self.modified_files.values().map(Vec::len).sum()
    }

    pub fn is_tracked(&self, repo: &str, file: &str) -> bool {
        self.files(repo).iter().any(|tracked| tracked == file)
    }

    /// Returns false when the file was already tracked.
    pub fn track(&mut self, repo: &str, file: &str) -> bool {
        let files = self.modified_files.entry(repo.to_string()).or_default();
        if files.iter().any(|tracked| tracked == file) {
            return false;
        }
        files.push(file.to_string());
        true
    }

    pub fn untrack(&mut self, repo: &str, file: &str) -> bool {
        let Some(files) = self.modified_files.get_mut(repo) else {
            return false;
        };
        let before = files.len();
        files.retain(|tracked| tracked != file);
        let removed = files.len() != before;
        if files.is_empty() {
            self.modified_files.remove(repo);
        }
        removed
    }

    pub fn drop_repo(&mut self, repo: &str) -> Vec<String> {
        self.modified_files.remove(repo).unwrap_or_default()
    }

    pub fn prune(&mut self) {
        self.modified_files.retain(|_, files| !files.is_empty());
    }
}

/// Loads and saves [`SessionState`] as a whole; there is no partial update.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<SessionState> {
        if !self.path.exists() {
            return Ok(SessionState::default());
        }
        let data = fs::read(&self.path)
            .with_context(|| format!("reading session state {}", self.path.display()))?;
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(SessionState::default());
        }
        let mut state: SessionState = serde_json::from_slice(&data)
            .with_context(|| format!("parsing session state {}", self.path.display()))?;
        state.prune();
        Ok(state)
    }

    pub fn save(&self, state: &mut SessionState) -> Result<()> {
        state.prune();
        let json = serde_json::to_string_pretty(state)?;
        write_via_temp(&self.path, json.as_bytes())
            .with_context(|| format!("saving session state {}", self.path.display()))
    }

    pub fn reset(&self) -> Result<SessionState> {
        let mut state = SessionState::default();
        self.save(&mut state)?;
        Ok(state)
    }
}
