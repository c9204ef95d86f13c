use std::io::{self, BufRead, Write};

use anyhow::{Context, Result, bail};

/// Line-oriented questions asked outside of match review.
pub trait Prompter {
    /// Reads one line; `None` means stdin is closed.
    fn read_answer(&mut self, message: &str) -> Result<Option<String>>;
    fn say(&mut self, message: &str);

    fn confirm(&mut self, message: &str, default: bool) -> Result<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            let Some(input) = self.read_answer(&format!("{message} {hint}: "))? else {
                return Ok(false);
            };
            match input.trim().to_lowercase().as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => self.say("Please enter y or n."),
            }
        }
    }

    /// Asks for a value, offering `recent` entries. Enter takes the newest
    /// one and `:N` picks entry N.
    fn ask_with_history(&mut self, message: &str, recent: &[String]) -> Result<String> {
        for (idx, value) in recent.iter().enumerate().take(5) {
            self.say(&format!("  :{} {}", idx + 1, preview(value)));
        }
        let question = match recent.first() {
            Some(newest) => format!("{message} [{}]: ", preview(newest)),
            None => format!("{message}: "),
        };
        loop {
            let Some(input) = self.read_answer(&question)? else {
                bail!("input closed while waiting for {message}");
            };
            let trimmed = input.trim();
            if trimmed.is_empty() {
                return Ok(recent.first().cloned().unwrap_or_default());
            }
            if let Some(choice) = trimmed.strip_prefix(':') {
                match choice.parse::<usize>().ok().and_then(|n| recent.get(n.wrapping_sub(1))) {
                    Some(value) => return Ok(value.clone()),
                    None => {
                        self.say(&format!("No history entry {choice}."));
                        continue;
                    }
                }
            }
            return Ok(input.trim_end_matches(['\r', '\n']).to_string());
        }
    }

    /// Picks a subset of `items`. Enter selects everything.
    fn choose_many(&mut self, message: &str, items: &[String]) -> Result<Vec<usize>> {
        for (idx, item) in items.iter().enumerate() {
            self.say(&format!("  {:>3}. {item}", idx + 1));
        }
        loop {
            let Some(input) =
                self.read_answer(&format!("{message} (numbers, comma separated) [all]: "))?
            else {
                bail!("input closed while waiting for a selection");
            };
            let trimmed = input.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
                return Ok((0..items.len()).collect());
            }
            match parse_selection(trimmed, items.len()) {
                Some(selected) if !selected.is_empty() => return Ok(selected),
                _ => self.say(&format!("Enter numbers between 1 and {}.", items.len())),
            }
        }
    }
}

fn parse_selection(input: &str, len: usize) -> Option<Vec<usize>> {
    let mut selected = Vec::new();
    for part in input.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let number: usize = part.parse().ok()?;
        if number == 0 || number > len {
            return None;
        }
        if !selected.contains(&(number - 1)) {
            selected.push(number - 1);
        }
    }
    Some(selected)
}

fn preview(value: &str) -> String {
    let first = value.lines().next().unwrap_or("");
    if value.lines().nth(1).is_some() {
        format!("{first} …")
    } else {
        first.to_string()
    }
}

pub struct StdPrompter;

impl Prompter for StdPrompter {
    fn read_answer(&mut self, message: &str) -> Result<Option<String>> {
        print!("{message}");
        io::stdout().flush()?;
        let mut input = String::new();
        let read = io::stdin()
            .lock()
            .read_line(&mut input)
            .context("reading answer from stdin")?;
        Ok((read > 0).then_some(input))
    }

    fn say(&mut self, message: &str) {
        println!("{message}");
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedPrompter;
    use super::*;

    #[test]
    fn confirm_uses_default_and_retries_on_garbage() {
        let mut prompter = ScriptedPrompter::with_answers(["", "maybe", "n"]);
        assert!(prompter.confirm("Proceed?", true).expect("confirm"));
        assert!(!prompter.confirm("Proceed?", true).expect("confirm"));
        assert_eq!(prompter.said, ["Please enter y or n."]);
    }

    #[test]
    fn closed_input_declines() {
        let mut prompter = ScriptedPrompter::default();
        assert!(!prompter.confirm("Push?", true).expect("confirm"));
    }

    #[test]
    fn history_entries_can_be_picked() {
        let recent = vec!["node:16".to_string(), "node:14".to_string()];
        let mut prompter = ScriptedPrompter::with_answers(["", ":2", ":9", "custom\n"]);
        assert_eq!(prompter.ask_with_history("Start", &recent).expect("ask"), "node:16");
        assert_eq!(prompter.ask_with_history("Start", &recent).expect("ask"), "node:14");
        assert_eq!(prompter.ask_with_history("Start", &recent).expect("ask"), "custom");
        assert!(prompter.said.iter().any(|line| line == "No history entry 9."));
    }

    #[test]
    fn empty_history_returns_empty_on_enter() {
        let mut prompter = ScriptedPrompter::with_answers([""]);
        assert_eq!(prompter.ask_with_history("End", &[]).expect("ask"), "");
    }

    #[test]
    fn selection_loops_until_valid() {
        let items = vec!["api".to_string(), "web".to_string(), "cli".to_string()];
        let mut prompter = ScriptedPrompter::with_answers(["0", ",", "3, 1, 3"]);
        assert_eq!(prompter.choose_many("Repos", &items).expect("choose"), [2, 0]);
        assert_eq!(prompter.asked.len(), 3);

        let mut prompter = ScriptedPrompter::with_answers([""]);
        assert_eq!(prompter.choose_many("Repos", &items).expect("choose"), [0, 1, 2]);
    }
}
