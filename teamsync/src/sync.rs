use std::fmt;

use anyhow::{Result, bail};
use tracing::{debug, info, warn};

use crate::diff::print_diff;
use crate::expansion::ExtraLinePattern;
use crate::files::write_via_temp;
use crate::finder::{FileChange, MatchSpan, SearchPattern, scan_repository};
use crate::git::RepoClient;
use crate::github::{Repository, RepositoryLister};
use crate::history::{HistoryField, HistoryStore};
use crate::logging::{Journal, JournalAction};
use crate::mirror::{Mirror, MirrorStatus};
use crate::prompt::Prompter;
use crate::review::{ReviewOutcome, ReviewRequest, review_match};
use crate::runner::{RepoRun, RunTarget, print_failures, run_across};
use crate::state::{SessionState, SessionStore};
use crate::terminal::Terminal;
use crate::transform::{ReplaceOptions, apply_spans, split_lines};

/// Returned through `anyhow` when the operator quits a review.
#[derive(Debug, Clone, Copy)]
pub struct Aborted;

impl fmt::Display for Aborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("aborted by user")
    }
}

impl std::error::Error for Aborted {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Team(String),
    /// `owner/name`, or a bare name inside the configured organization.
    Repo(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Team(team) => write!(f, "team {team}"),
            Target::Repo(repo) => write!(f, "repository {repo}"),
        }
    }
}

/// Whatever the command line or a plan already supplied.
#[derive(Debug, Clone, Default)]
pub struct DraftInputs {
    pub team: Option<String>,
    pub repo: Option<String>,
    pub file_pattern: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub replacement: Option<String>,
    pub inline: bool,
    pub exclude_start: bool,
    pub exclude_end: bool,
    pub force: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct ReplaceInputs {
    pub target: Target,
    pub file_pattern: String,
    pub pattern: SearchPattern,
    pub options: ReplaceOptions,
    pub force: bool,
    pub dry_run: bool,
}

/// Fills the gaps in `draft` by asking, offering recent answers, and
/// remembers the answers. Forced runs never ask.
pub fn resolve_inputs<P: Prompter>(
    draft: DraftInputs,
    default_team: Option<&str>,
    history: &HistoryStore,
    prompter: &mut P,
) -> Result<ReplaceInputs> {
    let interactive = !draft.force;
    let mut recent = history.load();

    let target = match (draft.team, draft.repo) {
        (Some(_), Some(_)) => bail!("pass either --team or --repo, not both"),
        (None, Some(repo)) => Target::Repo(repo),
        (Some(team), None) => Target::Team(team),
        (None, None) => match default_team {
            Some(team) => Target::Team(team.to_string()),
            None if interactive => loop {
                let answer = prompter.ask_with_history("Team", &[])?;
                let answer = answer.trim();
                if !answer.is_empty() {
                    break Target::Team(answer.to_string());
                }
                prompter.say("A team name is required.");
            },
            None => bail!("a team or repository is required; pass --team or --repo"),
        },
    };

    let file_pattern = match draft.file_pattern {
        Some(pattern) => pattern,
        None if interactive => {
            let answer = prompter.ask_with_history(
                "File pattern",
                recent.recent(HistoryField::FilePattern),
            )?;
            if answer.trim().is_empty() { "**/*".to_string() } else { answer }
        }
        None => "**/*".to_string(),
    };

    let start = match draft.start {
        Some(start) => start,
        None if interactive => loop {
            let answer = prompter
                .ask_with_history("Start pattern", recent.recent(HistoryField::StartPattern))?;
            if !answer.is_empty() {
                break answer;
            }
            prompter.say("A start pattern is required.");
        },
        None => bail!("a start pattern is required; pass --start"),
    };

    let end = match draft.end {
        Some(end) => Some(end),
        None if interactive => {
            let answer = prompter.ask_with_history(
                "End pattern (empty for single lines)",
                recent.recent(HistoryField::EndPattern),
            )?;
            Some(answer).filter(|value| !value.is_empty())
        }
        None => None,
    };

    let replacement = match draft.replacement {
        Some(text) => Some(text),
        None if interactive => {
            let answer = prompter.ask_with_history(
                "Replacement (empty deletes the match)",
                recent.recent(HistoryField::Replacement),
            )?;
            Some(answer).filter(|value| !value.is_empty())
        }
        None => None,
    };

    recent.push(HistoryField::FilePattern, &file_pattern);
    recent.push(HistoryField::StartPattern, &start);
    if let Some(end) = &end {
        recent.push(HistoryField::EndPattern, end);
    }
    if let Some(text) = &replacement {
        recent.push(HistoryField::Replacement, text);
    }
    if let Err(err) = history.save(&recent) {
        warn!("could not save input history: {err:#}");
    }

    Ok(ReplaceInputs {
        target,
        file_pattern,
        pattern: SearchPattern::new(start, end)?,
        options: ReplaceOptions {
            replacement,
            inline: draft.inline,
            exclude_start: draft.exclude_start,
            exclude_end: draft.exclude_end,
        },
        force: draft.force,
        dry_run: draft.dry_run,
    })
}

/// Handles shared by every fan-out command.
pub struct SyncEnv<'a> {
    pub store: &'a SessionStore,
    pub journal: &'a Journal,
    pub mirror: &'a Mirror,
    pub concurrency: usize,
    pub colorize: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub repositories: usize,
    pub files: usize,
    pub applied: usize,
    pub skipped: usize,
}

impl SyncSummary {
    fn print(&self, dry_run: bool) {
        let label = if dry_run { "dry-run" } else { "sync-replace" };
        println!(
            "{label} summary: repositories={}, files={}, applied={}, skipped={}",
            self.repositories, self.files, self.applied, self.skipped
        );
    }
}

pub async fn list_repositories<L: RepositoryLister>(
    lister: &L,
    target: &Target,
) -> Result<Vec<Repository>> {
    let repos = match target {
        Target::Team(team) => lister.list_team_repositories(team).await?,
        Target::Repo(repo) => lister.list_single_repository(repo).await?,
    };
    if repos.is_empty() {
        bail!("no repositories found for {target}");
    }
    Ok(repos)
}

/// Clones or updates every repository; repositories with tracked edits are
/// left alone. Only usable clones are returned.
async fn prepare_clones(
    env: &SyncEnv<'_>,
    state: &SessionState,
    repos: &[Repository],
) -> Vec<Repository> {
    let results = env
        .mirror
        .ensure_all(repos, env.concurrency, |name| !state.files(name).is_empty())
        .await;
    let mut usable = Vec::new();
    for (repo, status) in results {
        match status {
            MirrorStatus::Failed(reason) => println!("{}: skipped ({reason})", repo.name),
            status => {
                debug!("{}: {status:?}", repo.name);
                usable.push(repo);
            }
        }
    }
    usable
}

pub async fn sync_replace<L, T, P>(
    inputs: &ReplaceInputs,
    env: &SyncEnv<'_>,
    lister: &L,
    term: &mut T,
    prompter: &mut P,
) -> Result<SyncSummary>
where
    L: RepositoryLister,
    T: Terminal,
    P: Prompter,
{
    let mut repos = list_repositories(lister, &inputs.target).await?;
    if !inputs.force && repos.len() > 1 {
        let names: Vec<String> = repos.iter().map(|repo| repo.name.clone()).collect();
        let picked = prompter.choose_many("Repositories to update", &names)?;
        repos = picked.into_iter().map(|idx| repos[idx].clone()).collect();
    }

    let mut state = env.store.load()?;
    let repos = prepare_clones(env, &state, &repos).await;

    let mut carried: Vec<ExtraLinePattern> = Vec::new();
    let mut summary = SyncSummary::default();
    for repo in &repos {
        let root = env.mirror.clone_dir(&repo.name);
        let changes = match scan_repository(&root, &inputs.file_pattern, &inputs.pattern) {
            Ok(changes) => changes,
            Err(err) => {
                warn!("{}: scan failed: {err:#}", repo.name);
                continue;
            }
        };
        if changes.is_empty() {
            info!("{}: no matches", repo.name);
            continue;
        }

        let mut rewrites = Vec::new();
        for change in &changes {
            let approved = match review_file(&repo.name, change, inputs, &mut carried, term)? {
                Some(approved) => approved,
                None => {
                    if !inputs.dry_run {
                        env.store.save(&mut state)?;
                    }
                    summary.print(inputs.dry_run);
                    return Err(Aborted.into());
                }
            };
            summary.applied += approved.len();
            summary.skipped += change.matches.len().saturating_sub(approved.len());
            if approved.is_empty() {
                continue;
            }
            let text = apply_spans(
                &change.original.text,
                &approved,
                &inputs.pattern.start,
                &inputs.options,
            );
            rewrites.push((change, text, approved.len()));
        }

        if rewrites.is_empty() {
            continue;
        }
        summary.repositories += 1;
        for (change, text, spans) in rewrites {
            if inputs.dry_run {
                let label = format!("{}/{}", repo.name, change.file);
                print_diff(&label, &change.original.text, &text, 3, env.colorize);
                summary.files += 1;
                continue;
            }
            let (bytes, unmappable) = change.original.encode(&text);
            if unmappable {
                warn!(
                    "{}/{}: replacement cannot be written as {}; skipped",
                    repo.name,
                    change.file,
                    change.original.decision.encoding.name()
                );
                continue;
            }
            if let Err(err) = write_via_temp(&change.path, &bytes) {
                warn!("{}/{}: {err:#}; skipped", repo.name, change.file);
                continue;
            }
            state.track(&repo.name, &change.file);
            env.journal.note(
                JournalAction::Applied,
                &repo.name,
                &change.file,
                &format!("{spans} span(s)"),
            );
            summary.files += 1;
            println!("{}: updated {}", repo.name, change.file);
        }
        if !inputs.dry_run {
            env.store.save(&mut state)?;
        }
    }

    summary.print(inputs.dry_run);
    Ok(summary)
}

/// Reviews every match in one file. `None` means the operator aborted.
fn review_file<T: Terminal>(
    repo: &str,
    change: &FileChange,
    inputs: &ReplaceInputs,
    carried: &mut Vec<ExtraLinePattern>,
    term: &mut T,
) -> Result<Option<Vec<MatchSpan>>> {
    let lines = split_lines(&change.original.text);
    let mut approved: Vec<MatchSpan> = Vec::new();
    for (idx, span) in change.matches.iter().enumerate() {
        let last_end = approved.last().map(|span| span.end_line).unwrap_or(0);
        if span.start_line <= last_end {
            debug!("{repo}/{}: match at {} already covered", change.file, span.start_line);
            continue;
        }
        let request = ReviewRequest {
            repo,
            lines: &lines,
            span,
            index: idx + 1,
            total: change.matches.len(),
            options: &inputs.options,
            force: inputs.force,
        };
        match review_match(term, &request, carried)? {
            ReviewOutcome::Apply { span, patterns } => {
                if span.start_line <= last_end {
                    warn!(
                        "{repo}/{}: widened match at line {} overlaps an earlier one; skipped",
                        change.file, span.start_line
                    );
                    continue;
                }
                *carried = patterns;
                approved.push(span);
            }
            ReviewOutcome::Skip => {}
            ReviewOutcome::Abort => return Ok(None),
        }
    }
    Ok(Some(approved))
}

/// `sync-replace run`: the command in every tracked repository. The session
/// itself is not changed.
pub async fn run_in_tracked<T: Terminal>(
    command: &str,
    env: &SyncEnv<'_>,
    term: &mut T,
) -> Result<Vec<RepoRun>> {
    let state = env.store.load()?;
    if state.is_empty() {
        println!("no tracked repositories.");
        return Ok(Vec::new());
    }
    let targets: Vec<RunTarget> = state
        .repos()
        .into_iter()
        .map(|repo| RunTarget {
            dir: env.mirror.clone_dir(&repo),
            repo,
        })
        .collect();
    let runs = run_across(&targets, command, env.concurrency, term).await?;
    print_failures(&runs);
    Ok(runs)
}

/// `sync-cmd`: the command across a team, tracking whatever it changed in
/// repositories where it succeeded.
pub async fn sync_cmd<L, T>(
    target: &Target,
    command: &str,
    env: &SyncEnv<'_>,
    lister: &L,
    term: &mut T,
) -> Result<Vec<RepoRun>>
where
    L: RepositoryLister,
    T: Terminal,
{
    let repos = list_repositories(lister, target).await?;
    let mut state = env.store.load()?;
    let repos = prepare_clones(env, &state, &repos).await;
    let targets: Vec<RunTarget> = repos
        .iter()
        .map(|repo| RunTarget {
            repo: repo.name.clone(),
            dir: env.mirror.clone_dir(&repo.name),
        })
        .collect();

    let runs = run_across(&targets, command, env.concurrency, term).await?;
    let mut tracked = 0usize;
    for run in runs.iter().filter(|run| run.succeeded()) {
        let client = env.mirror.repo_client(&run.repo);
        let changed = match client.changed_files().await {
            Ok(changed) => changed,
            Err(err) => {
                warn!("{}: {err:#}", run.repo);
                continue;
            }
        };
        for file in changed {
            if state.track(&run.repo, &file) {
                env.journal.note(JournalAction::Tracked, &run.repo, &file, command);
                tracked += 1;
            }
        }
    }
    env.store.save(&mut state)?;
    print_failures(&runs);
    println!("sync-cmd tracked {tracked} file(s)");
    Ok(runs)
}
