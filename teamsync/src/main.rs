use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use arboard::Clipboard;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use is_terminal::IsTerminal;
use tracing::Level;

mod batch;
mod commit;
mod config;
mod diff;
mod encoding;
mod expansion;
mod files;
mod finder;
mod git;
mod github;
mod history;
mod logging;
mod mirror;
mod process;
mod prompt;
mod review;
mod runner;
mod session;
mod state;
mod sync;
mod terminal;
mod transform;

use commit::{CommitRequest, commit_session};
use config::Settings;
use github::GhLister;
use history::HistoryStore;
use logging::Journal;
use mirror::Mirror;
use prompt::{Prompter, StdPrompter};
use session::SessionContext;
use state::SessionStore;
use sync::{Aborted, DraftInputs, SyncEnv, Target};
use terminal::CrosstermTerminal;

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq, Default)]
enum ColorChoice {
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorChoice {
    fn should_color(self) -> bool {
        match self {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => IsTerminal::is_terminal(&io::stdout()),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: starting runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(run(cli)) {
        if err.downcast_ref::<Aborted>().is_some() {
            eprintln!("aborted.");
            std::process::exit(130);
        }
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let app = App::new(&cli)?;
    match cli.command {
        Command::SyncReplace(cmd) => match cmd {
            SyncReplaceCommand::New(cmd) => handle_new(&app, cmd).await,
            SyncReplaceCommand::Status => handle_status(&app),
            SyncReplaceCommand::Review => handle_review(&app).await,
            SyncReplaceCommand::Rediff => handle_rediff(&app).await,
            SyncReplaceCommand::Reset(cmd) => handle_reset(&app, cmd),
            SyncReplaceCommand::Open => handle_open(&app).await,
            SyncReplaceCommand::Commit(cmd) => handle_commit(&app, cmd).await,
            SyncReplaceCommand::Run(cmd) => handle_run(&app, cmd).await,
        },
        Command::SyncCmd(cmd) => handle_sync_cmd(&app, cmd).await,
        Command::Log(cmd) => handle_log(&app, cmd),
    }
}

/// Everything resolved once per invocation.
struct App {
    settings: Settings,
    colorize: bool,
    store: SessionStore,
    history: HistoryStore,
    journal: Journal,
    mirror: Mirror,
}

impl App {
    fn new(cli: &Cli) -> Result<Self> {
        let settings = Settings::resolve(cli.cache_dir.clone(), cli.org.clone())?;
        Ok(Self {
            colorize: cli.color.should_color(),
            store: SessionStore::new(settings.state_path()),
            history: HistoryStore::new(settings.history_path()),
            journal: Journal::new(settings.journal_path()),
            mirror: Mirror::new(settings.repos_dir(), settings.shallow_clone),
            settings,
        })
    }

    fn env(&self) -> SyncEnv<'_> {
        SyncEnv {
            store: &self.store,
            journal: &self.journal,
            mirror: &self.mirror,
            concurrency: self.settings.concurrency,
            colorize: self.colorize,
        }
    }

    fn session(&self) -> SessionContext<'_> {
        SessionContext {
            store: &self.store,
            journal: &self.journal,
            colorize: self.colorize,
        }
    }

    fn lister(&self) -> Result<GhLister> {
        Ok(GhLister::new(self.settings.require_org()?))
    }
}

async fn handle_new(app: &App, cmd: NewCommand) -> Result<()> {
    let mut draft = match &cmd.plan {
        Some(path) => draft_from_plan(path)?,
        None => DraftInputs {
            file_pattern: cmd.files.clone(),
            start: cmd.start.clone(),
            end: cmd.end.clone(),
            replacement: resolve_replacement(&cmd)?,
            inline: cmd.inline,
            exclude_start: cmd.exclude_start,
            exclude_end: cmd.exclude_end,
            force: cmd.force,
            ..DraftInputs::default()
        },
    };
    if cmd.target.team.is_some() || cmd.target.repo.is_some() {
        draft.team = cmd.target.team.clone();
        draft.repo = cmd.target.repo.clone();
    }
    draft.dry_run = cmd.dry_run;

    let interactive = !draft.force;
    if interactive && !io::stdin().is_terminal() {
        bail!("interactive review needs a terminal; pass --force to apply every match");
    }

    let mut prompter = StdPrompter;
    let inputs = sync::resolve_inputs(
        draft,
        app.settings.default_team.as_deref(),
        &app.history,
        &mut prompter,
    )?;
    let lister = app.lister()?;
    let mut term = CrosstermTerminal::new(app.colorize);
    sync::sync_replace(&inputs, &app.env(), &lister, &mut term, &mut prompter).await?;
    Ok(())
}

fn draft_from_plan(path: &Path) -> Result<DraftInputs> {
    let plan = batch::load_plan(path)?;
    let replacement = plan.replacement_text(path)?;
    Ok(DraftInputs {
        team: plan.team,
        repo: plan.repo,
        file_pattern: Some(plan.file_pattern),
        start: Some(plan.start),
        end: plan.end,
        replacement,
        inline: plan.inline,
        exclude_start: plan.exclude_start,
        exclude_end: plan.exclude_end,
        force: plan.force,
        dry_run: false,
    })
}

fn resolve_replacement(cmd: &NewCommand) -> Result<Option<String>> {
    if let Some(text) = &cmd.replacement {
        return Ok(Some(text.clone()));
    }
    if let Some(path) = &cmd.with_file {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading replacement {}", path.display()))?;
        return Ok(Some(text));
    }
    if cmd.with_clipboard {
        return read_replacement_from_clipboard().map(Some);
    }
    if let Some(tag) = &cmd.with_here {
        return read_heredoc_input(tag, "replacement text").map(Some);
    }
    Ok(None)
}

fn read_replacement_from_clipboard() -> Result<String> {
    let mut clipboard = Clipboard::new().context("opening clipboard")?;
    clipboard
        .get_text()
        .context("reading clipboard text for replacement")
}

fn read_heredoc_input(tag: &str, description: &str) -> Result<String> {
    if tag.trim().is_empty() {
        bail!("heredoc terminator cannot be empty");
    }
    println!("Enter {description}; finish with a line containing only {tag}.");
    let mut buf = String::new();
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = io::stdin()
            .read_line(&mut line)
            .context("reading heredoc input")?;
        if bytes == 0 {
            bail!("stdin closed before heredoc terminator '{tag}'");
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed == tag {
            break;
        }
        buf.push_str(&line);
    }
    Ok(buf)
}

fn handle_status(app: &App) -> Result<()> {
    let state = app.store.load()?;
    session::print_status(&state);
    Ok(())
}

async fn handle_review(app: &App) -> Result<()> {
    let mut state = app.store.load()?;
    session::review_tracked(&mut state, &app.session(), &mut StdPrompter, |name| {
        app.mirror.repo_client(name)
    })
    .await?;
    Ok(())
}

async fn handle_rediff(app: &App) -> Result<()> {
    let mut state = app.store.load()?;
    session::rediff(&mut state, &app.session(), &mut StdPrompter, |name| {
        app.mirror.repo_client(name)
    })
    .await?;
    Ok(())
}

fn handle_reset(app: &App, cmd: ResetCommand) -> Result<()> {
    let mut state = app.store.load()?;
    session::reset(&mut state, &app.session(), &mut StdPrompter, cmd.yes)?;
    Ok(())
}

async fn handle_open(app: &App) -> Result<()> {
    let state = app.store.load()?;
    let dirs: Vec<PathBuf> = state
        .repos()
        .iter()
        .map(|repo| app.mirror.clone_dir(repo))
        .collect();
    if dirs.is_empty() {
        println!("no tracked repositories.");
        return Ok(());
    }
    session::open_in_editor(&app.settings.editor, &dirs).await
}

async fn handle_commit(app: &App, cmd: CommitCommand) -> Result<()> {
    let mut prompter = StdPrompter;
    let message = match cmd.message {
        Some(message) => message,
        None => prompter.ask_with_history("Commit message", &[])?,
    };
    if message.trim().is_empty() {
        bail!("a commit message is required");
    }
    let mut state = app.store.load()?;
    let request = CommitRequest {
        message: &message,
        concurrency: app.settings.concurrency,
        colorize: app.colorize,
    };
    let outcome = commit_session(
        &mut state,
        &app.store,
        &app.journal,
        &mut prompter,
        |name| app.mirror.repo_client(name),
        &request,
    )
    .await?;
    if outcome.is_none() {
        println!("commit cancelled; tracked files unchanged.");
    }
    Ok(())
}

async fn handle_run(app: &App, cmd: RunCommand) -> Result<()> {
    let command = join_command(&cmd.command)?;
    let mut term = CrosstermTerminal::new(app.colorize);
    sync::run_in_tracked(&command, &app.env(), &mut term).await?;
    Ok(())
}

async fn handle_sync_cmd(app: &App, cmd: SyncCmdCommand) -> Result<()> {
    let command = join_command(&cmd.command)?;
    let target = match (cmd.target.team, cmd.target.repo) {
        (_, Some(repo)) => Target::Repo(repo),
        (Some(team), None) => Target::Team(team),
        (None, None) => app
            .settings
            .default_team
            .clone()
            .map(Target::Team)
            .ok_or_else(|| anyhow!("pass --team or --repo, or set default_team in config.yaml"))?,
    };
    let lister = app.lister()?;
    let mut term = CrosstermTerminal::new(app.colorize);
    sync::sync_cmd(&target, &command, &app.env(), &lister, &mut term).await?;
    Ok(())
}

fn join_command(parts: &[String]) -> Result<String> {
    let command = process::shell_command(parts);
    if command.trim().is_empty() {
        bail!("a command is required");
    }
    Ok(command)
}

fn handle_log(app: &App, cmd: LogCommand) -> Result<()> {
    let entries = app.journal.read_recent(cmd.tail)?;
    if entries.is_empty() {
        println!("change log is empty.");
        return Ok(());
    }
    for entry in entries {
        println!(
            "[{}] {:<10} {:<16} {}",
            entry.timestamp,
            entry.action.label(),
            entry.repo,
            entry.path
        );
        if !entry.detail.is_empty() {
            println!("    {}", entry.detail);
        }
    }
    Ok(())
}

#[derive(Debug, Parser)]
#[command(
    name = "teamsync",
    version,
    about = "Apply and review one change across a team's repositories"
)]
struct Cli {
    /// State, history and clones live here.
    #[arg(
        long = "cache-dir",
        global = true,
        env = "TEAMSYNC_CACHE_DIR",
        value_name = "DIR",
        value_hint = ValueHint::DirPath
    )]
    cache_dir: Option<PathBuf>,
    #[arg(long, global = true, env = "TEAMSYNC_ORG", value_name = "ORG")]
    org: Option<String>,
    #[arg(long = "color", global = true, value_enum, default_value = "auto")]
    color: ColorChoice,
    /// -v for progress, -vv for debugging output.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Find, review and replace text across repositories.
    #[command(subcommand)]
    SyncReplace(SyncReplaceCommand),
    /// Run a shell command across repositories and track what it changed.
    SyncCmd(SyncCmdCommand),
    /// Show the change journal.
    Log(LogCommand),
}

#[derive(Debug, Subcommand)]
enum SyncReplaceCommand {
    /// Start a replacement run.
    New(NewCommand),
    /// List tracked files.
    Status,
    /// Keep or undo each tracked file.
    Review,
    /// Offer changed files that are not tracked yet.
    Rediff,
    /// Forget every tracked file.
    Reset(ResetCommand),
    /// Open tracked repositories in the editor.
    Open,
    /// Commit and push tracked files.
    Commit(CommitCommand),
    /// Run a shell command in every tracked repository.
    Run(RunCommand),
}

#[derive(Debug, Clone, Args)]
struct TargetArgs {
    #[arg(long, value_name = "TEAM", conflicts_with = "repo")]
    team: Option<String>,
    #[arg(long, value_name = "OWNER/NAME")]
    repo: Option<String>,
}

#[derive(Debug, Args)]
struct NewCommand {
    #[command(flatten)]
    target: TargetArgs,
    #[arg(long = "files", value_name = "GLOB")]
    files: Option<String>,
    #[arg(long, value_name = "TEXT")]
    start: Option<String>,
    #[arg(long, value_name = "TEXT")]
    end: Option<String>,
    #[arg(
        long = "with",
        value_name = "TEXT",
        conflicts_with_all = ["with_file", "with_clipboard", "with_here"]
    )]
    replacement: Option<String>,
    #[arg(
        long = "with-file",
        value_name = "FILE",
        value_hint = ValueHint::FilePath,
        conflicts_with_all = ["with_clipboard", "with_here"]
    )]
    with_file: Option<PathBuf>,
    #[arg(long = "with-clipboard", action = ArgAction::SetTrue, conflicts_with = "with_here")]
    with_clipboard: bool,
    #[arg(long = "with-here", value_name = "TAG")]
    with_here: Option<String>,
    /// Replace only the start text inside single-line matches.
    #[arg(long, action = ArgAction::SetTrue)]
    inline: bool,
    /// Keep the line holding the start text.
    #[arg(long = "exclude-start", action = ArgAction::SetTrue)]
    exclude_start: bool,
    /// Keep the line holding the end text.
    #[arg(long = "exclude-end", action = ArgAction::SetTrue)]
    exclude_end: bool,
    /// Apply every match without review.
    #[arg(long, action = ArgAction::SetTrue)]
    force: bool,
    /// Replay a YAML or JSON plan.
    #[arg(
        long,
        value_name = "FILE",
        value_hint = ValueHint::FilePath,
        conflicts_with_all = [
            "files", "start", "end", "replacement", "with_file", "with_clipboard",
            "with_here", "inline", "exclude_start", "exclude_end", "force"
        ]
    )]
    plan: Option<PathBuf>,
    /// Print diffs instead of writing files.
    #[arg(long = "dry-run", action = ArgAction::SetTrue)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct ResetCommand {
    #[arg(long = "yes", action = ArgAction::SetTrue)]
    yes: bool,
}

#[derive(Debug, Args)]
struct CommitCommand {
    #[arg(short, long, value_name = "MESSAGE")]
    message: Option<String>,
}

#[derive(Debug, Args)]
struct RunCommand {
    /// One argument runs as a shell script; several are quoted word by word.
    #[arg(
        value_name = "COMMAND",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    command: Vec<String>,
}

#[derive(Debug, Args)]
struct SyncCmdCommand {
    #[command(flatten)]
    target: TargetArgs,
    /// One argument runs as a shell script; several are quoted word by word.
    #[arg(
        value_name = "COMMAND",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    command: Vec<String>,
}

#[derive(Debug, Args)]
struct LogCommand {
    #[arg(long = "tail", default_value_t = 20)]
    tail: usize,
}
