use anyhow::Result;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::diff::print_git_diff;
use crate::git::RepoClient;
use crate::logging::{Journal, JournalAction};
use crate::prompt::Prompter;
use crate::state::{SessionState, SessionStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub repo: String,
    /// `None` when add, commit and push all succeeded.
    pub error: Option<String>,
}

pub struct CommitRequest<'a> {
    pub message: &'a str,
    pub concurrency: usize,
    pub colorize: bool,
}

/// Removes every repository that was pushed; failed ones stay for a retry.
pub fn settle(state: &mut SessionState, outcomes: &[CommitOutcome]) {
    for outcome in outcomes.iter().filter(|outcome| outcome.error.is_none()) {
        state.drop_repo(&outcome.repo);
    }
}

/// Shows the tracked diffs, then stages, commits and pushes each repository.
/// Returns `None` when the operator declines; the session is then untouched.
pub async fn commit_session<C, F, P>(
    state: &mut SessionState,
    store: &SessionStore,
    journal: &Journal,
    prompter: &mut P,
    clients: F,
    request: &CommitRequest<'_>,
) -> Result<Option<Vec<CommitOutcome>>>
where
    C: RepoClient,
    F: Fn(&str) -> C,
    P: Prompter,
{
    if state.is_empty() {
        println!("no tracked changes to commit.");
        return Ok(Some(Vec::new()));
    }
    let question = format!(
        "Show diffs for {} file(s) in {} repositories?",
        state.file_count(),
        state.repos().len()
    );
    if !prompter.confirm(&question, true)? {
        return Ok(None);
    }

    let mut pending = state.clone();
    let mut outcomes: Vec<CommitOutcome> = Vec::new();
    let mut ready = Vec::new();
    for repo in state.repos() {
        let client = clients(&repo);
        let step = match plan_repo(&client, pending.files(&repo)).await {
            Ok(step) => step,
            Err(err) => {
                warn!("{repo}: {err:#}");
                outcomes.push(CommitOutcome {
                    repo,
                    error: Some(format!("{err:#}")),
                });
                continue;
            }
        };
        match step {
            Step::Nothing => {
                warn!("{repo}: tracked files have no changes; dropping them");
                let count = pending.files(&repo).len();
                println!("{repo}: nothing to commit, dropping {count} file(s)");
                pending.drop_repo(&repo);
            }
            Step::PushOnly(ahead) => {
                println!("{repo}: no new changes, {ahead} commit(s) waiting to be pushed");
                ready.push((client, pending.files(&repo).to_vec(), false));
            }
            Step::Commit(diff) => {
                println!("=== {repo}");
                print_git_diff(&diff, request.colorize);
                ready.push((client, pending.files(&repo).to_vec(), true));
            }
        }
    }

    if ready.is_empty() {
        journal_outcomes(journal, &pending, &outcomes, request.message);
        *state = pending;
        store.save(state)?;
        println!("nothing left to push.");
        if !outcomes.is_empty() {
            print_summary(&outcomes);
        }
        return Ok(Some(outcomes));
    }
    let question = format!("Commit and push {} repositories?", ready.len());
    if !prompter.confirm(&question, false)? {
        return Ok(None);
    }

    let message = request.message;
    let pushed: Vec<CommitOutcome> = stream::iter(ready.iter())
        .map(|(client, files, commit)| async move {
            let error = push_repo(client, files, message, *commit).await.err();
            if let Some(err) = &error {
                warn!("{}: {err:#}", client.name());
            } else {
                info!("{}: pushed", client.name());
            }
            CommitOutcome {
                repo: client.name().to_string(),
                error: error.map(|err| format!("{err:#}")),
            }
        })
        .buffer_unordered(request.concurrency.max(1))
        .collect()
        .await;
    outcomes.extend(pushed);
    journal_outcomes(journal, &pending, &outcomes, message);

    settle(&mut pending, &outcomes);
    *state = pending;
    store.save(state)?;
    print_summary(&outcomes);
    Ok(Some(outcomes))
}

enum Step {
    Nothing,
    /// Earlier commits never reached the remote.
    PushOnly(usize),
    Commit(String),
}

async fn plan_repo<C: RepoClient>(client: &C, files: &[String]) -> Result<Step> {
    let diff = client.diff(files).await?;
    if !diff.trim().is_empty() {
        return Ok(Step::Commit(diff));
    }
    match client.unpushed_commits().await? {
        0 => Ok(Step::Nothing),
        ahead => Ok(Step::PushOnly(ahead)),
    }
}

async fn push_repo<C: RepoClient>(
    client: &C,
    files: &[String],
    message: &str,
    commit: bool,
) -> Result<()> {
    if commit {
        client.add(files).await?;
        client.commit(message).await?;
    }
    client.push().await?;
    Ok(())
}

fn journal_outcomes(
    journal: &Journal,
    pending: &SessionState,
    outcomes: &[CommitOutcome],
    message: &str,
) {
    for outcome in outcomes {
        let action = match outcome.error {
            None => JournalAction::Committed,
            Some(_) => JournalAction::CommitFailed,
        };
        let detail = outcome.error.as_deref().unwrap_or(message);
        for file in pending.files(&outcome.repo) {
            journal.note(action, &outcome.repo, file, detail);
        }
    }
}

fn print_summary(outcomes: &[CommitOutcome]) {
    let mut failed = 0usize;
    for outcome in outcomes {
        if let Some(err) = &outcome.error {
            failed += 1;
            println!("{}: failed: {err}", outcome.repo);
        }
    }
    println!(
        "commit summary: succeeded={}, failed={failed}",
        outcomes.len() - failed
    );
}
