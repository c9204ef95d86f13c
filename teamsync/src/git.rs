use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub file: String,
    pub insertions: usize,
    pub deletions: usize,
    pub binary: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub files: Vec<FileStat>,
    pub insertions: usize,
    pub deletions: usize,
    pub changed: usize,
}

/// Operations on one local clone.
#[allow(async_fn_in_trait)]
pub trait RepoClient {
    fn name(&self) -> &str;
    async fn add(&self, paths: &[String]) -> Result<()>;
    async fn commit(&self, message: &str) -> Result<()>;
    async fn push(&self) -> Result<()>;
    /// Commits on the current branch that its upstream does not have yet.
    async fn unpushed_commits(&self) -> Result<usize>;
    /// Unified diff of `paths` against HEAD. Untracked paths diff against nothing.
    async fn diff(&self, paths: &[String]) -> Result<String>;
    async fn diff_summary(&self) -> Result<DiffSummary>;
    async fn checkout(&self, paths: &[String]) -> Result<()>;
    async fn raw(&self, args: &[&str]) -> Result<String>;
    async fn untracked_files(&self) -> Result<Vec<String>>;
    /// Puts `paths` back to their committed content, deleting files HEAD does not have.
    async fn restore(&self, paths: &[String]) -> Result<()>;

    /// Files that differ from HEAD, new untracked files included.
    async fn changed_files(&self) -> Result<Vec<String>> {
        let mut files: BTreeSet<String> = self
            .diff_summary()
            .await?
            .files
            .into_iter()
            .map(|stat| stat.file)
            .collect();
        files.extend(self.untracked_files().await?);
        Ok(files.into_iter().collect())
    }
}

#[derive(Debug, Clone)]
pub struct GitRepo {
    name: String,
    root: PathBuf,
}

impl GitRepo {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    async fn git(&self, args: &[&str], ok_codes: &[i32]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .await
            .with_context(|| format!("running git {} in {}", args.join(" "), self.name))?;

        let code = output.status.code().unwrap_or(-1);
        if !ok_codes.contains(&code) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "git {} failed in {}: {}",
                args.first().copied().unwrap_or(""),
                self.name,
                stderr.trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn in_head(&self, paths: &[String]) -> Result<BTreeSet<String>> {
        let mut args = vec!["ls-tree", "-r", "--name-only", "HEAD", "--"];
        args.extend(paths.iter().map(String::as_str));
        let listed = self.git(&args, &[0]).await?;
        Ok(listed.lines().map(str::to_string).collect())
    }
}

impl RepoClient for GitRepo {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add(&self, paths: &[String]) -> Result<()> {
        let mut args = vec!["add", "-A", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.git(&args, &[0]).await?;
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<()> {
        self.git(&["commit", "-m", message], &[0]).await?;
        Ok(())
    }

    async fn push(&self) -> Result<()> {
        self.git(&["push"], &[0]).await?;
        Ok(())
    }

    async fn unpushed_commits(&self) -> Result<usize> {
        // 128: no upstream configured, nothing to compare against
        let counted = self
            .git(&["rev-list", "--count", "@{upstream}..HEAD"], &[0, 128])
            .await?;
        Ok(counted.trim().parse().unwrap_or(0))
    }

    async fn diff(&self, paths: &[String]) -> Result<String> {
        if paths.is_empty() {
            return Ok(String::new());
        }
        let mut args = vec!["diff", "HEAD", "--"];
        args.extend(paths.iter().map(String::as_str));
        let mut text = self.git(&args, &[0]).await?;

        let untracked: BTreeSet<String> = self.untracked_files().await?.into_iter().collect();
        for path in paths.iter().filter(|path| untracked.contains(*path)) {
            // --no-index exits 1 when the files differ
            let added = self
                .git(&["diff", "--no-index", "--", "/dev/null", path], &[0, 1])
                .await?;
            text.push_str(&added);
        }
        Ok(text)
    }

    async fn diff_summary(&self) -> Result<DiffSummary> {
        let numstat = self.git(&["diff", "--numstat", "HEAD"], &[0]).await?;
        Ok(parse_numstat(&numstat))
    }

    async fn checkout(&self, paths: &[String]) -> Result<()> {
        let mut args = vec!["checkout", "HEAD", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.git(&args, &[0]).await?;
        Ok(())
    }

    async fn raw(&self, args: &[&str]) -> Result<String> {
        self.git(args, &[0]).await
    }

    async fn untracked_files(&self) -> Result<Vec<String>> {
        let listed = self
            .git(&["ls-files", "--others", "--exclude-standard"], &[0])
            .await?;
        Ok(listed.lines().map(str::to_string).collect())
    }

    async fn restore(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let committed = self.in_head(paths).await?;
        let (known, added): (Vec<String>, Vec<String>) = paths
            .iter()
            .cloned()
            .partition(|path| committed.contains(path));
        if !known.is_empty() {
            self.checkout(&known).await?;
        }
        for path in added {
            let full = self.root.join(&path);
            match tokio::fs::remove_file(&full).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).with_context(|| format!("removing {}", full.display()));
                }
            }
        }
        Ok(())
    }
}

/// Parses `git diff --numstat`; binary files report `-` for both counts.
pub fn parse_numstat(text: &str) -> DiffSummary {
    let mut summary = DiffSummary::default();
    for line in text.lines() {
        let mut parts = line.splitn(3, '\t');
        let (Some(added), Some(removed), Some(file)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let binary = added == "-" && removed == "-";
        let insertions = added.parse().unwrap_or(0);
        let deletions = removed.parse().unwrap_or(0);
        summary.insertions += insertions;
        summary.deletions += deletions;
        summary.files.push(FileStat {
            file: file.to_string(),
            insertions,
            deletions,
            binary,
        });
    }
    summary.changed = summary.files.len();
    summary
}

#[cfg(test)]
pub mod testing {
    use std::path::Path;
    use std::process::Command;

    /// Creates a repository at `root` with one commit containing `files`.
    pub fn init_repo(root: &Path, files: &[(&str, &str)]) {
        std::fs::create_dir_all(root).expect("create repo dir");
        for (path, content) in files {
            let full = root.join(path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).expect("create parent");
            }
            std::fs::write(full, content).expect("write file");
        }
        for args in [
            &["init", "-q"][..],
            &["config", "user.email", "dev@example.com"],
            &["config", "user.name", "Dev"],
            &["config", "commit.gpgsign", "false"],
            &["add", "-A"],
            &["commit", "-q", "-m", "initial"],
        ] {
            let status = Command::new("git")
                .args(args)
                .current_dir(root)
                .status()
                .expect("run git");
            assert!(status.success(), "git {args:?} failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::init_repo;
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn numstat_handles_binary_and_totals() {
        let summary = parse_numstat("3\t1\tsrc/a.rs\n-\t-\tlogo.png\n0\t2\tREADME.md\n");
        assert_eq!(summary.changed, 3);
        assert_eq!(summary.insertions, 3);
        assert_eq!(summary.deletions, 3);
        assert!(summary.files[1].binary);
        assert_eq!(summary.files[2].file, "README.md");
    }

    #[tokio::test]
    async fn changed_files_include_untracked() {
        let temp = tempdir().expect("temp dir");
        init_repo(temp.path(), &[("a.txt", "one\n"), ("b.txt", "two\n")]);
        fs::write(temp.path().join("a.txt"), "uno\n").expect("write");
        fs::write(temp.path().join("new.txt"), "fresh\n").expect("write");

        let repo = GitRepo::new("demo", temp.path());
        assert_eq!(repo.changed_files().await.expect("changed"), ["a.txt", "new.txt"]);

        let diff = repo
            .diff(&["a.txt".to_string(), "new.txt".to_string()])
            .await
            .expect("diff");
        assert!(diff.contains("-one"));
        assert!(diff.contains("+uno"));
        assert!(diff.contains("+fresh"));
    }

    #[tokio::test]
    async fn restore_checks_out_known_and_deletes_new_files() {
        let temp = tempdir().expect("temp dir");
        init_repo(temp.path(), &[("a.txt", "one\n")]);
        fs::write(temp.path().join("a.txt"), "changed\n").expect("write");
        fs::write(temp.path().join("extra.txt"), "x\n").expect("write");

        let repo = GitRepo::new("demo", temp.path());
        repo.restore(&["a.txt".to_string(), "extra.txt".to_string()])
            .await
            .expect("restore");

        assert_eq!(fs::read_to_string(temp.path().join("a.txt")).expect("read"), "one\n");
        assert!(!temp.path().join("extra.txt").exists());
        assert!(repo.changed_files().await.expect("changed").is_empty());
    }

    #[tokio::test]
    async fn unpushed_commits_count_against_upstream() {
        let temp = tempdir().expect("temp dir");
        let origin = temp.path().join("origin");
        init_repo(&origin, &[("a.txt", "one\n")]);
        let clone = temp.path().join("clone");
        let url = format!("file://{}", origin.display());
        let status = std::process::Command::new("git")
            .args(["clone", "-q", &url])
            .arg(&clone)
            .status()
            .expect("clone");
        assert!(status.success());
        init_repo(&clone, &[("b.txt", "two\n")]);

        let repo = GitRepo::new("clone", &clone);
        assert_eq!(repo.unpushed_commits().await.expect("count"), 1);
        let detached = GitRepo::new("origin", &origin);
        assert_eq!(detached.unpushed_commits().await.expect("no upstream"), 0);
    }

    #[tokio::test]
    async fn add_and_commit_clear_the_diff() {
        let temp = tempdir().expect("temp dir");
        init_repo(temp.path(), &[("a.txt", "one\n")]);
        fs::write(temp.path().join("a.txt"), "two\n").expect("write");

        let repo = GitRepo::new("demo", temp.path());
        repo.add(&["a.txt".to_string()]).await.expect("add");
        repo.commit("update a").await.expect("commit");
        assert_eq!(repo.diff_summary().await.expect("summary"), DiffSummary::default());
        let log = repo.raw(&["log", "--format=%s", "-1"]).await.expect("log");
        assert_eq!(log.trim(), "update a");
    }
}
