use crate::finder::MatchSpan;

#[derive(Debug, Clone, Default)]
pub struct ReplaceOptions {
    /// `None` deletes the matched lines.
    pub replacement: Option<String>,
    pub inline: bool,
    pub exclude_start: bool,
    pub exclude_end: bool,
}

impl ReplaceOptions {
    /// Inline substitution only applies to a found single line that was not widened.
    pub fn is_inline(&self, span: &MatchSpan) -> bool {
        self.inline && span.line_count() == 1 && !span.is_expanded()
    }

    /// Whether the span's first line survives substitution verbatim.
    pub fn keeps_start(&self, span: &MatchSpan) -> bool {
        self.exclude_start && !self.is_inline(span) && span.start_line == span.original_start()
    }

    /// Whether the span's last line survives substitution verbatim.
    pub fn keeps_end(&self, span: &MatchSpan) -> bool {
        self.exclude_end
            && !self.is_inline(span)
            && span.line_count() > 1
            && span.end_line == span.original_end()
    }
}

/// Rewrites `original` with every span substituted in one pass.
///
/// `spans` must be ascending and non-overlapping. Line endings and the
/// presence of a final newline are preserved.
pub fn apply_spans(
    original: &str,
    spans: &[MatchSpan],
    start_pattern: &str,
    options: &ReplaceOptions,
) -> String {
    let style = detect_line_ending_style(original);
    let had_final_newline = original.ends_with(['\n', '\r']);
    let lines = split_lines(original);

    let mut output: Vec<String> = Vec::with_capacity(lines.len());
    let mut spans = spans.iter().peekable();
    let mut idx = 0usize;
    while idx < lines.len() {
        let line_no = idx + 1;
        let Some(span) = spans.next_if(|span| span.start_line == line_no) else {
            output.push(lines[idx].to_string());
            idx += 1;
            continue;
        };

        if options.is_inline(span) {
            let replacement = options.replacement.as_deref().unwrap_or("");
            output.push(lines[idx].replace(start_pattern, replacement));
            idx += 1;
            continue;
        }

        let end = span.end_line.min(lines.len());
        if options.keeps_start(span) {
            output.push(lines[idx].to_string());
        }
        if let Some(replacement) = &options.replacement {
            let indent = leading_whitespace(lines[idx]);
            output.extend(reindent(replacement, indent));
        }
        if options.keeps_end(span) {
            output.push(lines[end - 1].to_string());
        }
        idx = end;
    }

    let mut text = output.join("\n");
    if had_final_newline && !output.is_empty() {
        text.push('\n');
    }
    restore_from_lf(text, style)
}

fn leading_whitespace(line: &str) -> &str {
    let trimmed = line.trim_start_matches([' ', '\t']);
    &line[..line.len() - trimmed.len()]
}

/// Strips the common indentation of `text` and prefixes `indent` instead.
/// Blank lines stay empty.
pub fn reindent(text: &str, indent: &str) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let common = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| leading_whitespace(line).len())
        .min()
        .unwrap_or(0);
    lines
        .iter()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                format!("{indent}{}", &line[common..])
            }
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LineEndingStyle {
    Lf,
    Crlf,
    Cr,
}

fn detect_line_ending_style(text: &str) -> LineEndingStyle {
    if text.contains("\r\n") {
        LineEndingStyle::Crlf
    } else if text.contains('\r') {
        LineEndingStyle::Cr
    } else {
        LineEndingStyle::Lf
    }
}

/// Splits `text` into lines, ending a line at `\n`, `\r\n` or a lone `\r`.
/// A final terminator does not produce a trailing empty line.
pub fn split_lines(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0usize;
    let mut idx = 0usize;
    while idx < bytes.len() {
        match bytes[idx] {
            b'\n' => {
                lines.push(&text[start..idx]);
                idx += 1;
                start = idx;
            }
            b'\r' => {
                lines.push(&text[start..idx]);
                idx += if bytes.get(idx + 1) == Some(&b'\n') { 2 } else { 1 };
                start = idx;
            }
            _ => idx += 1,
        }
    }
    if start < bytes.len() {
        lines.push(&text[start..]);
    }
    lines
}

fn restore_from_lf(text: String, style: LineEndingStyle) -> String {
    match style {
        LineEndingStyle::Lf => text,
        LineEndingStyle::Crlf => text.replace('\n', "\r\n"),
        LineEndingStyle::Cr => text.replace('\n', "\r"),
    }
}
