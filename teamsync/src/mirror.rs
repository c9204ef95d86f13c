use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use futures::stream::{self, StreamExt};
use tokio::process::Command;
use tracing::{info, warn};

use crate::git::{GitRepo, RepoClient};
use crate::github::Repository;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorStatus {
    Cloned,
    Updated,
    /// Left alone because it holds tracked, uncommitted edits.
    Kept,
    Failed(String),
}

/// Local clones under `<cache_dir>/repos`.
#[derive(Debug, Clone)]
pub struct Mirror {
    repos_dir: PathBuf,
    shallow: bool,
}

impl Mirror {
    pub fn new(repos_dir: impl Into<PathBuf>, shallow: bool) -> Self {
        Self {
            repos_dir: repos_dir.into(),
            shallow,
        }
    }

    pub fn clone_dir(&self, repo: &str) -> PathBuf {
        self.repos_dir.join(repo)
    }

    pub fn repo_client(&self, repo: &str) -> GitRepo {
        GitRepo::new(repo, self.clone_dir(repo))
    }

    /// Clones `repo` or fast-forwards it to the default branch. Never fails;
    /// problems come back as [`MirrorStatus::Failed`].
    pub async fn ensure_local_clone(&self, repo: &Repository, keep_local: bool) -> MirrorStatus {
        let dir = self.clone_dir(&repo.name);
        let result = if !dir.join(".git").exists() {
            self.clone_fresh(repo, &dir).await.map(|()| MirrorStatus::Cloned)
        } else if keep_local {
            Ok(MirrorStatus::Kept)
        } else {
            self.update(repo).await.map(|()| MirrorStatus::Updated)
        };
        match result {
            Ok(status) => {
                info!("{}: {status:?}", repo.name);
                status
            }
            Err(err) => {
                warn!("{}: {err:#}", repo.name);
                MirrorStatus::Failed(format!("{err:#}"))
            }
        }
    }

    /// Runs [`Mirror::ensure_local_clone`] for every repository, `concurrency` at a time.
    /// `keep_local` decides which repositories must not be updated.
    pub async fn ensure_all<F>(
        &self,
        repos: &[Repository],
        concurrency: usize,
        keep_local: F,
    ) -> Vec<(Repository, MirrorStatus)>
    where
        F: Fn(&str) -> bool,
    {
        let keep_local = &keep_local;
        let mut results: Vec<(Repository, MirrorStatus)> = stream::iter(repos.iter().cloned())
            .map(|repo| async move {
                let status = self.ensure_local_clone(&repo, keep_local(&repo.name)).await;
                (repo, status)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;
        results.sort_by(|a, b| a.0.name.cmp(&b.0.name));
        results
    }

    async fn clone_fresh(&self, repo: &Repository, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(&self.repos_dir)
            .await
            .with_context(|| format!("creating {}", self.repos_dir.display()))?;
        let mut command = Command::new("git");
        command.arg("clone").arg("--quiet");
        if self.shallow {
            command.args(["--depth", "1"]);
        }
        command
            .args(["--branch", &repo.default_branch])
            .arg(&repo.url)
            .arg(dir);
        let output = command
            .output()
            .await
            .with_context(|| format!("running git clone for {}", repo.name))?;
        if !output.status.success() {
            bail!(
                "git clone failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    async fn update(&self, repo: &Repository) -> Result<()> {
        let client = self.repo_client(&repo.name);
        let branch = repo.default_branch.as_str();
        client.raw(&["fetch", "--quiet", "origin", branch]).await?;
        client.raw(&["checkout", "--quiet", branch]).await?;
        client.raw(&["merge", "--ff-only", "--quiet", "FETCH_HEAD"]).await?;
        Ok(())
    }
}
