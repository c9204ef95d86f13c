use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tokio::process::Command;
use tracing::{info, warn};

use crate::diff::print_git_diff;
use crate::git::RepoClient;
use crate::logging::{Journal, JournalAction};
use crate::prompt::Prompter;
use crate::state::{SessionState, SessionStore};

/// Shared handles for the session commands.
pub struct SessionContext<'a> {
    pub store: &'a SessionStore,
    pub journal: &'a Journal,
    pub colorize: bool,
}

pub fn print_status(state: &SessionState) {
    if state.is_empty() {
        println!("no tracked changes.");
        return;
    }
    for repo in state.repos() {
        println!("{repo}");
        for file in state.files(&repo) {
            println!("    {file}");
        }
    }
    println!(
        "{} file(s) in {} repositories",
        state.file_count(),
        state.repos().len()
    );
}

/// Offers every changed but untracked file of each tracked repository for
/// tracking. Returns how many files were added.
pub async fn rediff<C, F, P>(
    state: &mut SessionState,
    ctx: &SessionContext<'_>,
    prompter: &mut P,
    clients: F,
) -> Result<usize>
where
    C: RepoClient,
    F: Fn(&str) -> C,
    P: Prompter,
{
    let mut added = 0usize;
    for repo in state.repos() {
        let client = clients(&repo);
        let changed = match client.changed_files().await {
            Ok(changed) => changed,
            Err(err) => {
                warn!("{repo}: {err:#}; skipped");
                continue;
            }
        };
        let candidates: Vec<String> = changed
            .into_iter()
            .filter(|file| !state.is_tracked(&repo, file))
            .collect();
        if candidates.is_empty() {
            info!("{repo}: no untracked changes");
            continue;
        }
        for file in candidates {
            let diff = match client.diff(std::slice::from_ref(&file)).await {
                Ok(diff) => diff,
                Err(err) => {
                    warn!("{repo}/{file}: {err:#}; skipped");
                    continue;
                }
            };
            println!("=== {repo}/{file}");
            print_git_diff(&diff, ctx.colorize);
            if prompter.confirm(&format!("Track {repo}/{file}?"), true)? {
                state.track(&repo, &file);
                ctx.journal.note(JournalAction::Tracked, &repo, &file, "rediff");
                added += 1;
            }
        }
        ctx.store.save(state)?;
    }
    println!("rediff summary: tracked={added}");
    Ok(added)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReviewSummary {
    pub kept: usize,
    pub undone: usize,
}

/// Walks every tracked file; declined files are restored to HEAD and
/// untracked.
pub async fn review_tracked<C, F, P>(
    state: &mut SessionState,
    ctx: &SessionContext<'_>,
    prompter: &mut P,
    clients: F,
) -> Result<ReviewSummary>
where
    C: RepoClient,
    F: Fn(&str) -> C,
    P: Prompter,
{
    let mut summary = ReviewSummary::default();
    for repo in state.repos() {
        let client = clients(&repo);
        for file in state.files(&repo).to_vec() {
            let diff = match client.diff(std::slice::from_ref(&file)).await {
                Ok(diff) => diff,
                Err(err) => {
                    warn!("{repo}/{file}: {err:#}; left tracked");
                    summary.kept += 1;
                    continue;
                }
            };
            println!("=== {repo}/{file}");
            if diff.trim().is_empty() {
                println!("(no changes against HEAD)");
            } else {
                print_git_diff(&diff, ctx.colorize);
            }
            if prompter.confirm(&format!("Keep {repo}/{file}? (n undoes it)"), true)? {
                summary.kept += 1;
                continue;
            }
            if let Err(err) = client.restore(std::slice::from_ref(&file)).await {
                warn!("undoing {repo}/{file}: {err:#}; left tracked");
                summary.kept += 1;
                continue;
            }
            state.untrack(&repo, &file);
            ctx.journal.note(JournalAction::Undone, &repo, &file, "review");
            summary.undone += 1;
        }
        ctx.store.save(state)?;
    }
    println!(
        "review summary: kept={}, undone={}",
        summary.kept, summary.undone
    );
    Ok(summary)
}

/// Forgets every tracked file. Files on disk are left as they are.
pub fn reset<P: Prompter>(
    state: &mut SessionState,
    ctx: &SessionContext<'_>,
    prompter: &mut P,
    assume_yes: bool,
) -> Result<bool> {
    if state.is_empty() {
        println!("no tracked changes.");
        return Ok(false);
    }
    let question = format!("Forget {} tracked file(s)?", state.file_count());
    if !assume_yes && !prompter.confirm(&question, false)? {
        return Ok(false);
    }
    for repo in state.repos() {
        ctx.journal.note(JournalAction::Reset, &repo, "", "");
    }
    *state = ctx.store.reset()?;
    println!("session reset.");
    Ok(true)
}

/// Opens every tracked repository's clone with `editor`, which may carry
/// its own arguments (`code -n`).
pub async fn open_in_editor(editor: &str, dirs: &[PathBuf]) -> Result<()> {
    let mut parts = editor.split_whitespace();
    let Some(program) = parts.next() else {
        bail!("no editor configured");
    };
    let args: Vec<&str> = parts.collect();
    for dir in dirs {
        let status = Command::new(program)
            .args(&args)
            .arg(dir)
            .status()
            .await
            .with_context(|| format!("launching {editor}"))?;
        if !status.success() {
            bail!("{editor} exited with {status} for {}", dir.display());
        }
        println!("opened {}", dir.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::{TempDir, tempdir};

    use super::*;
    use crate::git::GitRepo;
    use crate::git::testing::init_repo;
    use crate::prompt::testing::ScriptedPrompter;

    struct Fixture {
        temp: TempDir,
        store: SessionStore,
        journal: Journal,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = tempdir().expect("temp dir");
            let store = SessionStore::new(temp.path().join("state.json"));
            let journal = Journal::new(temp.path().join("change_log.jsonl"));
            Self {
                temp,
                store,
                journal,
            }
        }

        fn ctx(&self) -> SessionContext<'_> {
            SessionContext {
                store: &self.store,
                journal: &self.journal,
                colorize: false,
            }
        }

        fn repos(&self) -> PathBuf {
            self.temp.path().join("repos")
        }

        fn clients(&self) -> impl Fn(&str) -> GitRepo + '_ {
            move |name: &str| GitRepo::new(name, self.repos().join(name))
        }
    }

    fn edit(root: &Path, file: &str, body: &str) {
        fs::write(root.join(file), body).expect("write");
    }

    #[tokio::test]
    async fn undoing_every_file_removes_the_repository() {
        let fx = Fixture::new();
        let api = fx.repos().join("api");
        init_repo(&api, &[("Dockerfile", "FROM node:16\n"), ("ci.yml", "node: 16\n")]);
        edit(&api, "Dockerfile", "FROM node:20\n");
        edit(&api, "ci.yml", "node: 20\n");
        edit(&api, "added.txt", "new\n");

        let mut state = SessionState::default();
        state.track("api", "Dockerfile");
        state.track("api", "ci.yml");
        state.track("api", "added.txt");
        fx.store.save(&mut state).expect("save");

        let mut prompter = ScriptedPrompter::with_answers(["n", "n", "n"]);
        let summary = review_tracked(&mut state, &fx.ctx(), &mut prompter, fx.clients())
            .await
            .expect("review");

        assert_eq!(summary, ReviewSummary { kept: 0, undone: 3 });
        assert!(!state.modified_files.contains_key("api"));
        assert!(!fx.store.load().expect("load").modified_files.contains_key("api"));
        assert_eq!(fs::read_to_string(api.join("Dockerfile")).expect("read"), "FROM node:16\n");
        assert!(!api.join("added.txt").exists());
    }

    #[tokio::test]
    async fn kept_files_stay_tracked() {
        let fx = Fixture::new();
        let api = fx.repos().join("api");
        init_repo(&api, &[("a.txt", "1\n"), ("b.txt", "2\n")]);
        edit(&api, "a.txt", "one\n");
        edit(&api, "b.txt", "two\n");

        let mut state = SessionState::default();
        state.track("api", "a.txt");
        state.track("api", "b.txt");

        let mut prompter = ScriptedPrompter::with_answers(["", "n"]);
        let summary = review_tracked(&mut state, &fx.ctx(), &mut prompter, fx.clients())
            .await
            .expect("review");

        assert_eq!(summary, ReviewSummary { kept: 1, undone: 1 });
        assert_eq!(state.files("api"), ["a.txt"]);
        assert_eq!(fs::read_to_string(api.join("a.txt")).expect("read"), "one\n");
    }

    #[tokio::test]
    async fn rediff_offers_only_untracked_changes() {
        let fx = Fixture::new();
        let web = fx.repos().join("web");
        init_repo(&web, &[("a.txt", "1\n"), ("b.txt", "2\n")]);
        edit(&web, "a.txt", "one\n");
        edit(&web, "b.txt", "two\n");
        edit(&web, "c.txt", "three\n");

        let mut state = SessionState::default();
        state.track("web", "a.txt");

        let mut prompter = ScriptedPrompter::with_answers(["y", "n"]);
        let added = rediff(&mut state, &fx.ctx(), &mut prompter, fx.clients())
            .await
            .expect("rediff");

        assert_eq!(added, 1);
        assert_eq!(prompter.asked.len(), 2);
        assert_eq!(state.files("web"), ["a.txt", "b.txt"]);
        assert_eq!(fx.store.load().expect("load"), state);
    }

    #[tokio::test]
    async fn missing_clone_does_not_stop_other_repositories() {
        let fx = Fixture::new();
        let web = fx.repos().join("web");
        init_repo(&web, &[("a.txt", "1\n")]);
        edit(&web, "a.txt", "one\n");
        edit(&web, "b.txt", "two\n");

        let mut state = SessionState::default();
        state.track("api", "gone.txt");
        state.track("web", "a.txt");

        let mut prompter = ScriptedPrompter::with_answers(["y"]);
        let added = rediff(&mut state, &fx.ctx(), &mut prompter, fx.clients())
            .await
            .expect("rediff");
        assert_eq!(added, 1);
        assert_eq!(state.files("web"), ["a.txt", "b.txt"]);

        let mut prompter = ScriptedPrompter::with_answers(["n", "y"]);
        let summary = review_tracked(&mut state, &fx.ctx(), &mut prompter, fx.clients())
            .await
            .expect("review");
        assert_eq!(summary, ReviewSummary { kept: 2, undone: 1 });
        assert_eq!(state.files("api"), ["gone.txt"]);
        assert_eq!(state.files("web"), ["b.txt"]);
        assert_eq!(fs::read_to_string(web.join("a.txt")).expect("read"), "1\n");
    }

    #[test]
    fn reset_requires_confirmation_unless_told_otherwise() {
        let fx = Fixture::new();
        let mut state = SessionState::default();
        state.track("api", "a.txt");
        fx.store.save(&mut state).expect("save");

        let mut prompter = ScriptedPrompter::with_answers(["n"]);
        assert!(!reset(&mut state, &fx.ctx(), &mut prompter, false).expect("reset"));
        assert!(!fx.store.load().expect("load").is_empty());

        assert!(reset(&mut state, &fx.ctx(), &mut prompter, true).expect("reset"));
        assert!(state.is_empty());
        assert_eq!(fx.store.load().expect("load"), SessionState::default());
    }

    #[tokio::test]
    async fn editor_arguments_are_passed_through() {
        let temp = tempdir().expect("temp dir");
        let dir = temp.path().join("api");
        fs::create_dir_all(&dir).expect("mkdir");
        open_in_editor("test -d", &[dir.clone()]).await.expect("open");
        assert!(open_in_editor("test -f", &[dir]).await.is_err());
        assert!(open_in_editor("  ", &[]).await.is_err());
    }
}
