use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use futures::stream::{self, StreamExt};
use tracing::debug;

use crate::process::run_shell;
use crate::terminal::{LineStyle, StyledLine, Terminal};

pub const FAILURE_TAIL_LINES: usize = 5;

#[derive(Debug, Clone)]
pub struct RunTarget {
    pub repo: String,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed { tail: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRun {
    pub repo: String,
    pub status: RunStatus,
}

impl RepoRun {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

struct StatusBoard<'a, T: Terminal> {
    command: String,
    runs: Vec<RepoRun>,
    term: &'a mut T,
}

impl<T: Terminal> StatusBoard<'_, T> {
    fn set(&mut self, idx: usize, status: RunStatus) -> Result<()> {
        self.runs[idx].status = status;
        self.term.render(&self.frame())
    }

    fn frame(&self) -> Vec<StyledLine> {
        let done = self
            .runs
            .iter()
            .filter(|run| matches!(run.status, RunStatus::Succeeded | RunStatus::Failed { .. }))
            .count();
        let failed = self
            .runs
            .iter()
            .filter(|run| matches!(run.status, RunStatus::Failed { .. }))
            .count();
        let mut lines = vec![StyledLine::new(
            LineStyle::Header,
            format!(
                "{}  [{done}/{} done, {} ok, {failed} failed]",
                self.command,
                self.runs.len(),
                done - failed
            ),
        )];
        for run in &self.runs {
            let (style, label) = match run.status {
                RunStatus::Pending => (LineStyle::Pending, "· pending"),
                RunStatus::Running => (LineStyle::Running, "» running"),
                RunStatus::Succeeded => (LineStyle::Succeeded, "✓ ok"),
                RunStatus::Failed { .. } => (LineStyle::Failed, "✗ failed"),
            };
            lines.push(StyledLine::new(style, format!("  {label:<10} {}", run.repo)));
        }
        lines
    }
}

/// Runs `command` in every target, at most `concurrency` at once. One
/// repository failing never stops the others.
pub async fn run_across<T: Terminal>(
    targets: &[RunTarget],
    command: &str,
    concurrency: usize,
    term: &mut T,
) -> Result<Vec<RepoRun>> {
    let board = StatusBoard {
        command: command.to_string(),
        runs: targets
            .iter()
            .map(|target| RepoRun {
                repo: target.repo.clone(),
                status: RunStatus::Pending,
            })
            .collect(),
        term,
    };
    let board = Mutex::new(board);
    update(&board, None)?;

    let results: Vec<Result<()>> = stream::iter(targets.iter().enumerate())
        .map(|(idx, target)| {
            let board = &board;
            async move {
                update(board, Some((idx, RunStatus::Running)))?;
                let status = match run_shell(command, &target.dir).await {
                    Ok(output) if output.success() => RunStatus::Succeeded,
                    Ok(output) => RunStatus::Failed {
                        tail: output.tail(FAILURE_TAIL_LINES),
                    },
                    Err(err) => RunStatus::Failed {
                        tail: vec![format!("{err:#}")],
                    },
                };
                debug!("{}: {status:?}", target.repo);
                update(board, Some((idx, status)))
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;
    results.into_iter().collect::<Result<()>>()?;

    let board = board
        .into_inner()
        .map_err(|_| anyhow!("status board lock poisoned"))?;
    Ok(board.runs)
}

fn update<T: Terminal>(
    board: &Mutex<StatusBoard<'_, T>>,
    change: Option<(usize, RunStatus)>,
) -> Result<()> {
    let mut board = board
        .lock()
        .map_err(|_| anyhow!("status board lock poisoned"))?;
    match change {
        Some((idx, status)) => board.set(idx, status),
        None => {
            let frame = board.frame();
            board.term.render(&frame)
        }
    }
}

pub fn print_failures(runs: &[RepoRun]) {
    for run in runs {
        if let RunStatus::Failed { tail } = &run.status {
            println!("{} failed:", run.repo);
            for line in tail {
                println!("    {line}");
            }
        }
    }
    let failed = runs.iter().filter(|run| !run.succeeded()).count();
    println!(
        "run summary: succeeded={}, failed={failed}",
        runs.len() - failed
    );
}
