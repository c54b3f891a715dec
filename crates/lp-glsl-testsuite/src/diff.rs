//! Unified text diffs for failed log comparisons.

use std::collections::VecDeque;

/// Context lines kept on each side of a change.
const CONTEXT: usize = 3;

#[derive(Debug, PartialEq, Eq)]
enum DiffLine {
    Context(String),
    Removed(String),
    Added(String),
}

#[derive(Debug, PartialEq, Eq)]
struct Hunk {
    from_line: usize,
    to_line: usize,
    lines: Vec<DiffLine>,
}

impl Hunk {
    fn new(from_line: usize, to_line: usize) -> Hunk {
        Hunk {
            from_line,
            to_line,
            lines: Vec::new(),
        }
    }

    fn from_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|line| !matches!(line, DiffLine::Added(_)))
            .count()
    }

    fn to_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|line| !matches!(line, DiffLine::Removed(_)))
            .count()
    }
}

/// Render a unified diff from `from_text` to `to_text`, or `None` when
/// the two are line-for-line identical. Lines only in `from_text` are
/// prefixed `-`, lines only in `to_text` are prefixed `+`. `\r\n` and
/// bare `\r` endings read as `\n`, but a missing newline on the final
/// line is a difference, flagged in the rendering like diff(1) does.
pub fn unified_diff(
    from_text: &str,
    to_text: &str,
    from_label: &str,
    to_label: &str,
) -> Option<String> {
    let from_text = normalize_endings(from_text);
    let to_text = normalize_endings(to_text);
    let from_lines: Vec<&str> = from_text.split_inclusive('\n').collect();
    let to_lines: Vec<&str> = to_text.split_inclusive('\n').collect();
    let hunks = collect_hunks(&from_lines, &to_lines);
    if hunks.is_empty() {
        return None;
    }
    let mut rendered = String::new();
    rendered.push_str(&format!("--- {from_label}\n"));
    rendered.push_str(&format!("+++ {to_label}\n"));
    for hunk in hunks {
        rendered.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            hunk.from_line,
            hunk.from_count(),
            hunk.to_line,
            hunk.to_count()
        ));
        for line in &hunk.lines {
            let (marker, text) = match line {
                DiffLine::Context(text) => (' ', text),
                DiffLine::Removed(text) => ('-', text),
                DiffLine::Added(text) => ('+', text),
            };
            rendered.push(marker);
            rendered.push_str(text);
            if !text.ends_with('\n') {
                rendered.push_str("\n\\ No newline at end of file\n");
            }
        }
    }
    Some(rendered)
}

fn normalize_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Diff two texts split into lines that keep their `\n` terminator, so
/// the final line compares unequal when only one side ends with one.
fn collect_hunks(from_lines: &[&str], to_lines: &[&str]) -> Vec<Hunk> {
    let mut from_line = 1usize;
    let mut to_line = 1usize;
    let mut context_queue: VecDeque<&str> = VecDeque::with_capacity(CONTEXT);
    let mut lines_since_mismatch = CONTEXT + 1;
    let mut hunks = Vec::new();
    let mut hunk = Hunk::new(0, 0);

    for result in diff::slice(from_lines, to_lines) {
        match result {
            diff::Result::Left(&line) => {
                if lines_since_mismatch >= CONTEXT && lines_since_mismatch > 0 {
                    hunks.push(hunk);
                    hunk = Hunk::new(
                        from_line - context_queue.len(),
                        to_line - context_queue.len(),
                    );
                }
                while let Some(context) = context_queue.pop_front() {
                    hunk.lines.push(DiffLine::Context(context.to_owned()));
                }
                hunk.lines.push(DiffLine::Removed(line.to_owned()));
                from_line += 1;
                lines_since_mismatch = 0;
            }
            diff::Result::Right(&line) => {
                if lines_since_mismatch >= CONTEXT && lines_since_mismatch > 0 {
                    hunks.push(hunk);
                    hunk = Hunk::new(
                        from_line - context_queue.len(),
                        to_line - context_queue.len(),
                    );
                }
                while let Some(context) = context_queue.pop_front() {
                    hunk.lines.push(DiffLine::Context(context.to_owned()));
                }
                hunk.lines.push(DiffLine::Added(line.to_owned()));
                to_line += 1;
                lines_since_mismatch = 0;
            }
            diff::Result::Both(&line, _) => {
                if context_queue.len() >= CONTEXT {
                    let _ = context_queue.pop_front();
                }
                if lines_since_mismatch < CONTEXT {
                    hunk.lines.push(DiffLine::Context(line.to_owned()));
                } else {
                    context_queue.push_back(line);
                }
                from_line += 1;
                to_line += 1;
                lines_since_mismatch += 1;
            }
        }
    }

    hunks.push(hunk);
    // The first entry is the placeholder started before any mismatch.
    hunks.remove(0);
    hunks
}
