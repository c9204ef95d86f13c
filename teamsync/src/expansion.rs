#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Above,
    Below,
}

/// A neighbouring line a reviewer swallowed into a match. Later matches whose
/// neighbours read the same are widened the same way before they are shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraLinePattern {
    pub trimmed_content: String,
    pub position: Position,
    /// Distance from the found span's boundary, starting at 1.
    pub offset: usize,
}

/// Widens `start..=end` (1-indexed) while adjacent lines match `patterns`.
pub fn auto_expand(
    lines: &[&str],
    start: usize,
    end: usize,
    patterns: &[ExtraLinePattern],
) -> (usize, usize) {
    let mut new_start = start;
    for pattern in sorted(patterns, Position::Above) {
        if new_start <= 1 || pattern.offset != start - new_start + 1 {
            break;
        }
        if lines[new_start - 2].trim() != pattern.trimmed_content {
            break;
        }
        new_start -= 1;
    }

    let mut new_end = end;
    for pattern in sorted(patterns, Position::Below) {
        if new_end >= lines.len() || pattern.offset != new_end - end + 1 {
            break;
        }
        if lines[new_end].trim() != pattern.trimmed_content {
            break;
        }
        new_end += 1;
    }

    (new_start, new_end)
}

fn sorted(patterns: &[ExtraLinePattern], position: Position) -> Vec<&ExtraLinePattern> {
    let mut selected: Vec<_> = patterns
        .iter()
        .filter(|pattern| pattern.position == position)
        .collect();
    selected.sort_by_key(|pattern| pattern.offset);
    selected
}

/// Patterns describing how `original` was widened into `final_bounds`.
pub fn patterns_from_delta(
    lines: &[&str],
    original: (usize, usize),
    final_bounds: (usize, usize),
) -> Vec<ExtraLinePattern> {
    let (original_start, original_end) = original;
    let (final_start, final_end) = final_bounds;
    let mut patterns = Vec::new();

    for offset in 1..=original_start.saturating_sub(final_start) {
        patterns.push(ExtraLinePattern {
            trimmed_content: lines[original_start - offset - 1].trim().to_string(),
            position: Position::Above,
            offset,
        });
    }
    for offset in 1..=final_end.saturating_sub(original_end) {
        patterns.push(ExtraLinePattern {
            trimmed_content: lines[original_end + offset - 1].trim().to_string(),
            position: Position::Below,
            offset,
        });
    }

    patterns
}
