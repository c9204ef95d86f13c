use anyhow::Result;

use crate::expansion::{ExtraLinePattern, auto_expand, patterns_from_delta};
use crate::finder::MatchSpan;
use crate::terminal::{Key, LineStyle, StyledLine, Terminal};
use crate::transform::ReplaceOptions;

pub const CONTEXT_LINES: usize = 10;

const REVIEW_HELP: &str =
    "↑/k widen up  ↓/j widen down  enter/y apply  n/s skip  u undo  q quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    ExpandUp,
    ExpandDown,
    Accept,
    Skip,
    Undo,
    Abort,
}

pub fn action_for_key(key: Key) -> Option<ReviewAction> {
    match key {
        Key::Up | Key::Char('k') | Key::Char('K') => Some(ReviewAction::ExpandUp),
        Key::Down | Key::Char('j') | Key::Char('J') => Some(ReviewAction::ExpandDown),
        Key::Enter | Key::Char('y') | Key::Char('Y') => Some(ReviewAction::Accept),
        Key::Char('n') | Key::Char('N') | Key::Char('s') | Key::Char('S') => {
            Some(ReviewAction::Skip)
        }
        Key::Backspace | Key::Char('u') | Key::Char('U') => Some(ReviewAction::Undo),
        Key::Interrupt | Key::Char('q') | Key::Char('Q') => Some(ReviewAction::Abort),
        Key::Char(_) | Key::Other => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewOutcome {
    Apply {
        span: MatchSpan,
        patterns: Vec<ExtraLinePattern>,
    },
    Skip,
    Abort,
}

/// Everything needed to show one match.
pub struct ReviewRequest<'a> {
    pub repo: &'a str,
    pub lines: &'a [&'a str],
    pub span: &'a MatchSpan,
    pub index: usize,
    pub total: usize,
    pub options: &'a ReplaceOptions,
    pub force: bool,
}

/// Boundary state of one match under review.
#[derive(Debug, Clone)]
pub struct Boundaries {
    original: (usize, usize),
    current: (usize, usize),
    undo: Vec<(usize, usize)>,
    line_count: usize,
}

impl Boundaries {
    pub fn new(original: (usize, usize), start_at: (usize, usize), line_count: usize) -> Self {
        Self {
            original,
            current: start_at,
            undo: Vec::new(),
            line_count,
        }
    }

    pub fn current(&self) -> (usize, usize) {
        self.current
    }

    /// Returns false when the start boundary is already on line 1.
    pub fn expand_up(&mut self) -> bool {
        if self.current.0 <= 1 {
            return false;
        }
        self.undo.push(self.current);
        self.current.0 -= 1;
        true
    }

    /// Returns false when the end boundary is already on the last line.
    pub fn expand_down(&mut self) -> bool {
        if self.current.1 >= self.line_count {
            return false;
        }
        self.undo.push(self.current);
        self.current.1 += 1;
        true
    }

    /// Pops the last change; with nothing to pop, returns to the found span.
    pub fn undo(&mut self) -> bool {
        let previous = self.undo.pop().unwrap_or(self.original);
        let changed = previous != self.current;
        self.current = previous;
        changed
    }
}

pub fn review_match<T: Terminal>(
    term: &mut T,
    request: &ReviewRequest<'_>,
    carried: &[ExtraLinePattern],
) -> Result<ReviewOutcome> {
    let span = request.span;
    let original = (span.original_start(), span.original_end());
    let auto = auto_expand(request.lines, original.0, original.1, carried);
    let mut bounds = Boundaries::new(original, auto, request.lines.len());

    if request.force {
        return Ok(accept(request, &bounds));
    }

    term.render(&render_frame(request, &bounds))?;
    loop {
        let Some(action) = action_for_key(term.read_key()?) else {
            continue;
        };
        let changed = match action {
            ReviewAction::ExpandUp => bounds.expand_up(),
            ReviewAction::ExpandDown => bounds.expand_down(),
            ReviewAction::Undo => bounds.undo(),
            ReviewAction::Accept => {
                term.clear()?;
                return Ok(accept(request, &bounds));
            }
            ReviewAction::Skip => {
                term.clear()?;
                return Ok(ReviewOutcome::Skip);
            }
            ReviewAction::Abort => {
                term.clear()?;
                return Ok(ReviewOutcome::Abort);
            }
        };
        if changed {
            term.render(&render_frame(request, &bounds))?;
        }
    }
}

fn accept(request: &ReviewRequest<'_>, bounds: &Boundaries) -> ReviewOutcome {
    let (start, end) = bounds.current();
    let span = request.span.with_bounds(start, end);
    let patterns = patterns_from_delta(request.lines, bounds.original, bounds.current());
    ReviewOutcome::Apply { span, patterns }
}

pub fn render_frame(request: &ReviewRequest<'_>, bounds: &Boundaries) -> Vec<StyledLine> {
    let (start, end) = bounds.current();
    let (original_start, original_end) = bounds.original;
    let shown = request.span.with_bounds(start, end);
    let keeps_start = request.options.keeps_start(&shown);
    let keeps_end = request.options.keeps_end(&shown);

    let mut frame = vec![
        StyledLine::new(
            LineStyle::Header,
            format!(
                "[{}] {}  match {}/{}  lines {start}-{end}",
                request.repo, request.span.file, request.index, request.total
            ),
        ),
        StyledLine::new(LineStyle::Hint, REVIEW_HELP),
    ];

    let first = start.saturating_sub(CONTEXT_LINES).max(1);
    let last = (end + CONTEXT_LINES).min(request.lines.len());
    for number in first..=last {
        let style = if (number == start && keeps_start) || (number == end && keeps_end) {
            LineStyle::Kept
        } else if (original_start..=original_end).contains(&number) {
            LineStyle::Removed
        } else if (start..=end).contains(&number) {
            LineStyle::Expanded
        } else {
            LineStyle::Context
        };
        let marker = match style {
            LineStyle::Removed => '-',
            LineStyle::Expanded => '~',
            LineStyle::Kept => '=',
            _ => ' ',
        };
        let text = request.lines[number - 1];
        frame.push(StyledLine::new(style, format!("{marker}{number:>6} | {text}")));
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expansion::Position;
    use crate::finder::{SearchPattern, find_spans};
    use crate::terminal::testing::ScriptedTerminal;

    const FILE: &str = "\
a
b
# pinned
FROM node:16
# end
c
d
";

    fn span_for(text: &str, start: &str, end: Option<&str>) -> MatchSpan {
        let pattern = SearchPattern::new(start, end.map(str::to_string)).expect("pattern");
        find_spans("Dockerfile", text, &pattern).remove(0)
    }

    fn request<'a>(
        lines: &'a [&'a str],
        span: &'a MatchSpan,
        options: &'a ReplaceOptions,
        force: bool,
    ) -> ReviewRequest<'a> {
        ReviewRequest {
            repo: "api",
            lines,
            span,
            index: 1,
            total: 1,
            options,
            force,
        }
    }

    fn styles(frame: &[StyledLine]) -> Vec<LineStyle> {
        frame.iter().skip(2).map(|line| line.style).collect()
    }

    #[test]
    fn keys_map_to_actions() {
        assert_eq!(action_for_key(Key::Up), Some(ReviewAction::ExpandUp));
        assert_eq!(action_for_key(Key::Char('j')), Some(ReviewAction::ExpandDown));
        assert_eq!(action_for_key(Key::Enter), Some(ReviewAction::Accept));
        assert_eq!(action_for_key(Key::Char('s')), Some(ReviewAction::Skip));
        assert_eq!(action_for_key(Key::Backspace), Some(ReviewAction::Undo));
        assert_eq!(action_for_key(Key::Interrupt), Some(ReviewAction::Abort));
        assert_eq!(action_for_key(Key::Char('x')), None);
    }

    #[test]
    fn boundaries_stop_at_file_edges() {
        let mut bounds = Boundaries::new((1, 2), (1, 2), 2);
        assert!(!bounds.expand_up());
        assert!(!bounds.expand_down());
        assert_eq!(bounds.current(), (1, 2));
    }

    #[test]
    fn undo_pops_then_resets_to_found_span() {
        let mut bounds = Boundaries::new((4, 4), (3, 4), 7);
        assert!(bounds.expand_down());
        assert!(bounds.undo());
        assert_eq!(bounds.current(), (3, 4));
        assert!(bounds.undo());
        assert_eq!(bounds.current(), (4, 4));
        assert!(!bounds.undo());
    }

    #[test]
    fn manual_expansion_is_returned_with_patterns() {
        let lines: Vec<&str> = FILE.lines().collect();
        let span = span_for(FILE, "FROM node", None);
        let options = ReplaceOptions::default();
        let mut term = ScriptedTerminal::with_keys([
            Key::Up,
            Key::Char('x'),
            Key::Down,
            Key::Down,
            Key::Char('u'),
            Key::Enter,
        ]);

        let outcome =
            review_match(&mut term, &request(&lines, &span, &options, false), &[]).expect("review");

        let ReviewOutcome::Apply { span, patterns } = outcome else {
            panic!("expected apply, got {outcome:?}");
        };
        assert_eq!((span.start_line, span.end_line), (3, 5));
        assert_eq!(span.original_start(), 4);
        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns[0].trimmed_content, "# pinned");
        assert_eq!(patterns[1].position, Position::Below);
        // initial frame plus one per boundary change; the unknown key redraws nothing
        assert_eq!(term.frames.len(), 5);
        assert_eq!(term.clears, 1);
    }

    #[test]
    fn carried_patterns_pre_expand_and_force_skips_interaction() {
        let lines: Vec<&str> = FILE.lines().collect();
        let span = span_for(FILE, "FROM node", None);
        let options = ReplaceOptions::default();
        let carried = patterns_from_delta(&lines, (4, 4), (3, 5));
        let mut term = ScriptedTerminal::default();

        let outcome = review_match(&mut term, &request(&lines, &span, &options, true), &carried)
            .expect("review");

        let ReviewOutcome::Apply { span, patterns } = outcome else {
            panic!("expected apply");
        };
        assert_eq!((span.start_line, span.end_line), (3, 5));
        assert_eq!(patterns, carried);
        assert!(term.frames.is_empty());
    }

    #[test]
    fn frame_marks_found_expanded_and_kept_lines() {
        let lines: Vec<&str> = FILE.lines().collect();
        let span = span_for(FILE, "# pinned", Some("# end"));
        let options = ReplaceOptions {
            exclude_end: true,
            ..ReplaceOptions::default()
        };
        let mut bounds = Boundaries::new((3, 5), (3, 5), lines.len());
        bounds.expand_up();
        let frame = render_frame(&request(&lines, &span, &options, false), &bounds);
        assert_eq!(
            styles(&frame),
            [
                LineStyle::Context,
                LineStyle::Expanded,
                LineStyle::Removed,
                LineStyle::Removed,
                LineStyle::Kept,
                LineStyle::Context,
                LineStyle::Context,
            ]
        );
        assert!(frame[0].text.contains("lines 2-5"));
        assert!(frame[6].text.starts_with("=     5 | # end"));
    }

    #[test]
    fn context_is_limited_to_ten_lines_each_side() {
        let text: String = (1..=40).map(|n| format!("line {n}\n")).collect();
        let lines: Vec<&str> = text.lines().collect();
        let span = span_for(&text, "line 20", None);
        let options = ReplaceOptions::default();
        let bounds = Boundaries::new((20, 20), (20, 20), lines.len());
        let frame = render_frame(&request(&lines, &span, &options, false), &bounds);
        assert_eq!(frame.len(), 2 + 21);
        assert!(frame[2].text.contains("line 10"));
        assert!(frame.last().expect("last").text.contains("line 30"));
    }

    #[test]
    fn abort_and_skip_clear_the_frame() {
        let lines: Vec<&str> = FILE.lines().collect();
        let span = span_for(FILE, "FROM node", None);
        let options = ReplaceOptions::default();

        let mut term = ScriptedTerminal::with_keys([Key::Char('n')]);
        let outcome =
            review_match(&mut term, &request(&lines, &span, &options, false), &[]).expect("review");
        assert_eq!(outcome, ReviewOutcome::Skip);
        assert_eq!(term.clears, 1);

        let mut term = ScriptedTerminal::with_keys([Key::Interrupt]);
        let outcome =
            review_match(&mut term, &request(&lines, &span, &options, false), &[]).expect("review");
        assert_eq!(outcome, ReviewOutcome::Abort);
    }
}
