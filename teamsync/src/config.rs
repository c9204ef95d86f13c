use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

const CONFIG_FILE: &str = "config.yaml";
const STATE_FILE: &str = "sync-replace-state.json";
const HISTORY_FILE: &str = "sync-replace-history.json";
const JOURNAL_FILE: &str = "change_log.jsonl";
const REPOS_DIR: &str = "repos";

pub const DEFAULT_CONCURRENCY: usize = 4;

/// Optional `config.yaml` inside the cache directory. Every field may be
/// overridden from the command line or environment.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub org: Option<String>,
    pub default_team: Option<String>,
    pub editor: Option<String>,
    pub concurrency: Option<usize>,
    pub shallow_clone: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub cache_dir: PathBuf,
    pub org: Option<String>,
    pub default_team: Option<String>,
    pub editor: String,
    pub concurrency: usize,
    pub shallow_clone: bool,
}

impl Settings {
    pub fn resolve(cache_dir: Option<PathBuf>, org: Option<String>) -> Result<Self> {
        let cache_dir = match cache_dir {
            Some(dir) => dir,
            None => default_cache_dir()?,
        };
        let file = load_file_config(&cache_dir.join(CONFIG_FILE))?;
        Ok(Self::merge(cache_dir, org, file))
    }

    fn merge(cache_dir: PathBuf, org: Option<String>, file: FileConfig) -> Self {
        let editor = file
            .editor
            .or_else(|| {
                std::env::var("EDITOR")
                    .ok()
                    .filter(|value| !value.trim().is_empty())
            })
            .unwrap_or_else(|| "code".to_string());
        Self {
            cache_dir,
            org: org.or(file.org),
            default_team: file.default_team,
            editor,
            concurrency: file.concurrency.unwrap_or(DEFAULT_CONCURRENCY).max(1),
            shallow_clone: file.shallow_clone.unwrap_or(true),
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.cache_dir.join(STATE_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.cache_dir.join(HISTORY_FILE)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.cache_dir.join(JOURNAL_FILE)
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.cache_dir.join(REPOS_DIR)
    }

    pub fn require_org(&self) -> Result<&str> {
        self.org.as_deref().ok_or_else(|| {
            anyhow!(
                "organization required; pass --org, set TEAMSYNC_ORG, or add `org:` to config.yaml"
            )
        })
    }
}

fn default_cache_dir() -> Result<PathBuf> {
    let home = home::home_dir()
        .ok_or_else(|| anyhow!("unable to locate home directory; pass --cache-dir"))?;
    Ok(home.join(".cache").join("teamsync"))
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let data = fs::read(path).with_context(|| format!("reading config {}", path.display()))?;
    serde_yaml::from_slice(&data).with_context(|| format!("parsing config {}", path.display()))
}
