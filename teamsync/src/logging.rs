use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::warn;

const MAX_ENTRIES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalAction {
    Applied,
    Tracked,
    Undone,
    Committed,
    CommitFailed,
    Reset,
}

impl JournalAction {
    pub fn label(self) -> &'static str {
        match self {
            JournalAction::Applied => "applied",
            JournalAction::Tracked => "tracked",
            JournalAction::Undone => "undone",
            JournalAction::Committed => "committed",
            JournalAction::CommitFailed => "failed",
            JournalAction::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: String,
    pub action: JournalAction,
    pub repo: String,
    pub path: String,
    #[serde(default)]
    pub detail: String,
}

/// Append-only JSONL record of what happened to which file.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn record(
        &self,
        action: JournalAction,
        repo: &str,
        path: &str,
        detail: &str,
    ) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {parent:?}"))?;
        }
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".into());
        let entry = JournalEntry {
            timestamp,
            action,
            repo: repo.to_string(),
            path: path.to_string(),
            detail: detail.to_string(),
        };
        let json = serde_json::to_string(&entry)?;
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .with_context(|| format!("opening {:?}", self.path))?;
        writeln!(file, "{json}")?;
        truncate_log(&self.path)?;
        Ok(())
    }

    /// Like [`Journal::record`], but a failure only produces a warning.
    pub fn note(&self, action: JournalAction, repo: &str, path: &str, detail: &str) {
        if let Err(err) = self.record(action, repo, path, detail) {
            warn!("could not write change journal: {err:#}");
        }
    }

    /// Newest `tail` entries, oldest first. Unparseable lines are skipped.
    pub fn read_recent(&self, tail: usize) -> Result<Vec<JournalEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file =
            fs::File::open(&self.path).with_context(|| format!("reading {:?}", self.path))?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            match serde_json::from_str::<JournalEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!("skipping journal line: {err}"),
            }
        }
        let skip = entries.len().saturating_sub(tail);
        Ok(entries.split_off(skip))
    }
}

fn truncate_log(path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .with_context(|| format!("reading {path:?}"))?;
    let reader = BufReader::new(file);
    let lines: Vec<_> = reader.lines().collect::<Result<_, _>>()?;
    if lines.len() <= MAX_ENTRIES {
        return Ok(());
    }
    let keep = &lines[lines.len() - MAX_ENTRIES..];
    fs::write(path, keep.join("\n") + "\n")?;
    Ok(())
}
