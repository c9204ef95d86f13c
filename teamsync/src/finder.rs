use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing::{debug, warn};

use crate::encoding::DecodedText;
use crate::files::{self, FileEntry};
use crate::transform::split_lines;

/// A 1-indexed, inclusive line range in one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSpan {
    pub file: String,
    pub start_line: usize,
    pub end_line: usize,
    pub matched_text: String,
    /// Boundaries as found, before any interactive expansion.
    pub original_start_line: Option<usize>,
    pub original_end_line: Option<usize>,
}

impl MatchSpan {
    pub fn line_count(&self) -> usize {
        self.end_line - self.start_line + 1
    }

    pub fn original_start(&self) -> usize {
        self.original_start_line.unwrap_or(self.start_line)
    }

    pub fn original_end(&self) -> usize {
        self.original_end_line.unwrap_or(self.end_line)
    }

    pub fn is_expanded(&self) -> bool {
        self.start_line != self.original_start() || self.end_line != self.original_end()
    }

    /// Copy of this span with new boundaries, remembering the found ones.
    pub fn with_bounds(&self, start_line: usize, end_line: usize) -> Self {
        Self {
            start_line,
            end_line,
            original_start_line: Some(self.original_start()),
            original_end_line: Some(self.original_end()),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileChange {
    pub file: String,
    pub path: PathBuf,
    pub original: DecodedText,
    pub matches: Vec<MatchSpan>,
}

#[derive(Debug, Clone)]
pub struct SearchPattern {
    pub start: String,
    pub end: Option<String>,
}

impl SearchPattern {
    pub fn new(start: impl Into<String>, end: Option<String>) -> Result<Self> {
        let start = start.into();
        if start.is_empty() {
            bail!("start pattern cannot be empty");
        }
        let end = end.filter(|value| !value.is_empty());
        Ok(Self { start, end })
    }
}

/// Finds every span in `text`. Matching is plain substring containment.
pub fn find_spans(file: &str, text: &str, pattern: &SearchPattern) -> Vec<MatchSpan> {
    let lines = split_lines(text);
    let mut spans = Vec::new();
    let mut idx = 0usize;

    while idx < lines.len() {
        let line = lines[idx];
        let Some(start_pos) = line.find(&pattern.start) else {
            idx += 1;
            continue;
        };

        let end_idx = match &pattern.end {
            None => Some(idx),
            Some(end) if line.match_indices(end.as_str()).any(|(pos, _)| pos > start_pos) => {
                Some(idx)
            }
            Some(end) => (idx + 1..lines.len()).find(|&next| lines[next].contains(end.as_str())),
        };

        let Some(end_idx) = end_idx else {
            debug!("unterminated match in {file} at line {}", idx + 1);
            idx += 1;
            continue;
        };

        spans.push(MatchSpan {
            file: file.to_string(),
            start_line: idx + 1,
            end_line: end_idx + 1,
            matched_text: lines[idx..=end_idx].join("\n"),
            original_start_line: None,
            original_end_line: None,
        });
        idx = end_idx + 1;
    }

    spans
}

/// Scans one repository clone. Unreadable and binary files are skipped.
pub fn scan_repository(
    root: &Path,
    file_pattern: &str,
    pattern: &SearchPattern,
) -> Result<Vec<FileChange>> {
    let entries = files::select_files(root, file_pattern)?;
    let mut changes = Vec::new();
    for FileEntry { path, relative } in entries {
        let original = match files::read_text(&path) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => {
                debug!("skipping binary file {}", path.display());
                continue;
            }
            Err(err) => {
                warn!("skipping {}: {err:#}", path.display());
                continue;
            }
        };
        if original.had_errors {
            warn!("skipping {} (not valid text)", path.display());
            continue;
        }
        let matches = find_spans(&relative, &original.text, pattern);
        if matches.is_empty() {
            continue;
        }
        changes.push(FileChange {
            file: relative,
            path,
            original,
            matches,
        });
    }
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn pattern(start: &str, end: Option<&str>) -> SearchPattern {
        SearchPattern::new(start, end.map(str::to_string)).expect("pattern")
    }

    fn bounds(spans: &[MatchSpan]) -> Vec<(usize, usize)> {
        spans
            .iter()
            .map(|span| (span.start_line, span.end_line))
            .collect()
    }

    #[test]
    fn start_only_matches_single_lines() {
        let text = "FROM node:18\nRUN npm ci\nFROM node:18 AS build\n";
        let spans = find_spans("Dockerfile", text, &pattern("FROM node", None));
        assert_eq!(bounds(&spans), [(1, 1), (3, 3)]);
        assert_eq!(spans[1].matched_text, "FROM node:18 AS build");
    }

    #[test]
    fn end_on_same_line_after_start_closes_immediately() {
        let text = "<!-- begin --> body <!-- end -->\nnext\n";
        let spans = find_spans("a.md", text, &pattern("<!-- begin", Some("end -->")));
        assert_eq!(bounds(&spans), [(1, 1)]);
    }

    #[test]
    fn end_may_overlap_the_start_text_when_it_begins_later() {
        let spans = find_spans("a.txt", "ab
b
", &pattern("ab", Some("b")));
        assert_eq!(bounds(&spans), [(1, 1)]);
    }

    #[test]
    fn carriage_returns_end_lines() {
        let spans = find_spans("a.txt", "keep\rFOO\rtail\r", &pattern("FOO", None));
        assert_eq!(bounds(&spans), [(2, 2)]);
        assert_eq!(spans[0].matched_text, "FOO");
    }

    #[test]
    fn end_before_start_on_same_line_does_not_count() {
        let text = "end start\nmiddle\nend\n";
        let spans = find_spans("a.txt", text, &pattern("start", Some("end")));
        assert_eq!(bounds(&spans), [(1, 3)]);
        assert_eq!(spans[0].matched_text, "end start\nmiddle\nend");
    }

    #[test]
    fn unterminated_start_is_dropped_and_scanning_resumes() {
        let text = "begin\nbegin\nstop\n";
        let spans = find_spans("a.txt", text, &pattern("begin", Some("stop")));
        assert_eq!(bounds(&spans), [(1, 3)]);

        let text = "begin\nnothing here\n";
        assert!(find_spans("a.txt", text, &pattern("begin", Some("stop"))).is_empty());
    }

    #[test]
    fn spans_never_overlap() {
        let text = "a {\n a {\n }\n}\na {\n}\n";
        let spans = find_spans("a.txt", text, &pattern("a {", Some("}")));
        for pair in spans.windows(2) {
            assert!(pair[0].end_line < pair[1].start_line);
        }
        assert_eq!(bounds(&spans), [(1, 3), (5, 6)]);
    }

    #[test]
    fn patterns_are_literal_not_regex() {
        let text = "version: 1.2\nversion: 1x2\n";
        let spans = find_spans("a.yml", text, &pattern("1.2", None));
        assert_eq!(bounds(&spans), [(1, 1)]);
    }

    #[test]
    fn empty_start_pattern_is_rejected() {
        assert!(SearchPattern::new("", None).is_err());
    }

    #[test]
    fn with_bounds_remembers_found_span() {
        let spans = find_spans("a.txt", "x\ny\nz\n", &pattern("y", None));
        let expanded = spans[0].with_bounds(1, 3);
        assert_eq!(expanded.original_start(), 2);
        assert_eq!(expanded.original_end(), 2);
        assert!(expanded.is_expanded());
        assert_eq!(expanded.with_bounds(2, 2).original_start(), 2);
    }

    #[test]
    fn scan_repository_skips_binary_files() {
        let temp = tempdir().expect("temp dir");
        fs::write(temp.path().join("a.txt"), "TODO one\n").expect("write");
        fs::write(temp.path().join("b.bin"), [b'T', b'O', b'D', b'O', 0, 1]).expect("write");
        let changes = scan_repository(temp.path(), "*", &pattern("TODO", None)).expect("scan");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].file, "a.txt");
        assert_eq!(changes[0].matches.len(), 1);
    }
}
