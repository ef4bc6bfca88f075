//! `# cci-ignore` comments
//!
//! - `# cci-ignore-file` anywhere drops every diagnostic of the file
//! - a trailing `# cci-ignore` drops diagnostics starting on its line
//! - `# cci-ignore-next-line` drops diagnostics starting on the next line
//! - `# cci-ignore-start` / `# cci-ignore-end` drop diagnostics starting on
//!   any line between them, both included

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use tree_sitter::{Node, Tree};

use crate::position::{LineIndex, Span};

use super::collector::{Diagnostic, DiagnosticCode, DiagnosticCollector};

lazy_static! {
    static ref IGNORE_FILE_RE: Regex = Regex::new(r"^\s*#\s*cci-ignore-file\s*$").unwrap();
    static ref IGNORE_INLINE_RE: Regex = Regex::new(r"#\s*cci-ignore\s*$").unwrap();
    static ref IGNORE_NEXT_LINE_RE: Regex =
        Regex::new(r"^\s*#\s*cci-ignore-next-line\s*$").unwrap();
    static ref IGNORE_START_RE: Regex = Regex::new(r"^\s*#\s*cci-ignore-start\s*$").unwrap();
    static ref IGNORE_END_RE: Regex = Regex::new(r"^\s*#\s*cci-ignore-end\s*$").unwrap();
}

/// Lines on which diagnostics are not reported
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Suppressions {
    pub file_wide: bool,
    /// 0-indexed lines
    pub lines: HashSet<usize>,
    /// Inclusive line ranges
    pub ranges: Vec<(usize, usize)>,
}

impl Suppressions {
    pub fn is_empty(&self) -> bool {
        !self.file_wide && self.lines.is_empty() && self.ranges.is_empty()
    }

    /// Whether a diagnostic starting on `line` is dropped. A diagnostic
    /// spanning several lines is judged by its first one.
    pub fn suppresses(&self, line: usize) -> bool {
        self.file_wide
            || self.lines.contains(&line)
            || self
                .ranges
                .iter()
                .any(|&(start, end)| start <= line && line <= end)
    }

    /// Drop the diagnostics of `content` that are suppressed
    pub fn retain(
        &self,
        content: &str,
        diagnostics: impl IntoIterator<Item = Diagnostic>,
    ) -> Vec<Diagnostic> {
        if self.is_empty() {
            return diagnostics.into_iter().collect();
        }

        let index = LineIndex::new(content);
        diagnostics
            .into_iter()
            .filter(|diagnostic| !self.suppresses(index.line_of(diagnostic.span.start)))
            .collect()
    }
}

/// Read the suppression comments of a parsed document. Unbalanced range
/// comments are reported to `collector`.
pub fn collect_suppressions(
    tree: &Tree,
    text: &str,
    collector: &mut DiagnosticCollector,
) -> Suppressions {
    let index = LineIndex::new(text);
    let mut suppressions = Suppressions::default();
    let mut open_range: Option<(usize, Span)> = None;

    for comment in comments(tree) {
        let span = Span::new(comment.start_byte(), comment.end_byte());
        let comment_text = span.slice(text);
        let line = index.line_of(span.start);

        if IGNORE_FILE_RE.is_match(comment_text) {
            suppressions.file_wide = true;
            continue;
        }

        if IGNORE_INLINE_RE.is_match(comment_text) {
            suppressions.lines.insert(line);
        } else if IGNORE_NEXT_LINE_RE.is_match(comment_text) {
            suppressions.lines.insert(line + 1);
        } else if IGNORE_START_RE.is_match(comment_text) {
            if open_range.is_some() {
                collector.add_error(
                    span,
                    DiagnosticCode::InvalidSuppression,
                    "cci-ignore-start must have a closing cci-ignore-end before trying to open a new ignore-range",
                );
            } else {
                open_range = Some((line, span));
            }
        } else if IGNORE_END_RE.is_match(comment_text) {
            match open_range.take() {
                Some((start, _)) => suppressions.ranges.push((start, line)),
                None => collector.add_error(
                    span,
                    DiagnosticCode::InvalidSuppression,
                    "cci-ignore-end must have an opening cci-ignore-start",
                ),
            }
        }
    }

    if let Some((_, span)) = open_range {
        collector.add_error(
            span,
            DiagnosticCode::InvalidSuppression,
            "cci-ignore-start is missing a closing cci-ignore-end",
        );
    }

    suppressions
}

/// Comment nodes of the whole tree in document order
fn comments(tree: &Tree) -> Vec<Node<'_>> {
    let mut found = Vec::new();
    let mut stack = vec![tree.root_node()];

    while let Some(node) = stack.pop() {
        if node.kind() == "comment" {
            found.push(node);
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }

    found
}
