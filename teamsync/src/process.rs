use std::path::Path;

use anyhow::{Context, Result};
use tokio::process::Command;

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// `-1` when the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last `count` non-blank lines of stdout followed by stderr.
    pub fn tail(&self, count: usize) -> Vec<String> {
        let lines: Vec<&str> = self
            .stdout
            .lines()
            .chain(self.stderr.lines())
            .filter(|line| !line.trim().is_empty())
            .collect();
        let skip = lines.len().saturating_sub(count);
        lines[skip..].iter().map(|line| line.to_string()).collect()
    }
}

/// Builds a `sh -c` script from command-line words. A single word is taken as
/// a script as written; several words are quoted so each stays one argument.
pub fn shell_command(words: &[String]) -> String {
    match words {
        [script] => script.clone(),
        _ => words
            .iter()
            .map(|word| shell_quote(word))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "-_./=:,@%+".contains(ch));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}

/// Runs `command` through `sh -c` inside `cwd`.
pub async fn run_shell(command: &str, cwd: &Path) -> Result<CommandOutput> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("spawning `{command}` in {}", cwd.display()))?;

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
