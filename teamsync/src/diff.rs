use crossterm::style::Stylize;
use similar::{ChangeTag, TextDiff};

/// Line-level diff of `old` against `new` with `context` unchanged lines
/// around each hunk.
pub fn render_diff(old: &str, new: &str, context: usize) -> Vec<String> {
    let diff = TextDiff::configure()
        .algorithm(similar::Algorithm::Myers)
        .diff_lines(old, new);

    let mut lines = Vec::new();
    for (idx, group) in diff.grouped_ops(context).iter().enumerate() {
        if idx > 0 {
            lines.push("...".to_string());
        }
        for op in group {
            for change in diff.iter_changes(op) {
                let marker = match change.tag() {
                    ChangeTag::Delete => "-",
                    ChangeTag::Insert => "+",
                    ChangeTag::Equal => " ",
                };
                let text = change.value().trim_end_matches(['\r', '\n']);
                lines.push(format!("{marker} {text}"));
            }
        }
    }
    lines
}

pub fn print_diff(label: &str, old: &str, new: &str, context: usize, colorize: bool) {
    println!("{}", paint(&format!("--- {label}"), colorize));
    for line in render_diff(old, new, context) {
        println!("{}", paint(&line, colorize));
    }
}

/// Prints `git diff` output, coloured by line kind.
pub fn print_git_diff(text: &str, colorize: bool) {
    for line in text.lines() {
        println!("{}", paint(line, colorize));
    }
}

fn paint(line: &str, colorize: bool) -> String {
    if !colorize {
        return line.to_string();
    }
    if line.starts_with("+++") || line.starts_with("---") || line.starts_with("diff ") {
        line.bold().to_string()
    } else if line.starts_with("@@") || line == "..." {
        line.cyan().to_string()
    } else if line.starts_with('+') {
        line.green().to_string()
    } else if line.starts_with('-') {
        line.red().to_string()
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hunks_mark_removed_and_added_lines() {
        let old = "a\nb\nc\nd\n";
        let new = "a\nB\nc\nd\n";
        assert_eq!(render_diff(old, new, 1), ["  a", "- b", "+ B", "  c"]);
    }

    #[test]
    fn distant_hunks_are_separated() {
        let old: String = (1..=20).map(|n| format!("{n}\n")).collect();
        let new: String = (1..=20)
            .map(|n| match n {
                2 => "two\n".to_string(),
                19 => "nineteen\n".to_string(),
                _ => format!("{n}\n"),
            })
            .collect();
        let lines = render_diff(&old, &new, 1);
        assert!(lines.contains(&"...".to_string()));
        assert!(lines.contains(&"+ nineteen".to_string()));
    }

    #[test]
    fn plain_output_without_colour() {
        assert_eq!(paint("+added", false), "+added");
    }
}
