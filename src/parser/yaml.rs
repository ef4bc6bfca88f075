//! YAML parsing with error recovery
//!
//! tree-sitter always produces a tree, even for broken input. Syntax problems
//! show up as `ERROR` and `MISSING` nodes, which are reported here as
//! diagnostics while the rest of the tree stays usable for the builder.

use tree_sitter::{Node, Tree};

use crate::diagnostics::{DiagnosticCode, DiagnosticCollector};
use crate::position::Span;

use super::syntax::{node_text, parse_tree, root_value, span_of};

/// Parse YAML text and collect any syntax errors
///
/// Returns `None` only when no tree could be built at all; that failure is
/// reported as a diagnostic on the whole document.
pub fn parse_yaml(text: &str, collector: &mut DiagnosticCollector) -> Option<Tree> {
    let tree = match parse_tree(text) {
        Ok(tree) => tree,
        Err(err) => {
            tracing::error!("YAML parser unavailable: {}", err);
            collector.add_error(
                Span::new(0, text.len()),
                DiagnosticCode::YamlSyntax,
                format!("Unable to parse document: {}", err),
            );
            return None;
        }
    };

    collect_syntax_errors(tree.root_node(), text, collector);

    if root_value(&tree).is_none() && !is_blank(text) {
        collector.add_error(
            Span::new(0, text.len()),
            DiagnosticCode::YamlSyntax,
            "Invalid YAML document",
        );
    }

    Some(tree)
}

/// Whether the text holds nothing but whitespace, comments and markers
fn is_blank(text: &str) -> bool {
    text.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#') || line == "---" || line == "..."
    })
}

fn collect_syntax_errors(root: Node, text: &str, collector: &mut DiagnosticCollector) {
    if !root.has_error() {
        return;
    }

    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() {
            collector.add_error(
                span_of(node),
                DiagnosticCode::YamlSyntax,
                error_message(node, text),
            );
            continue;
        }

        if node.is_missing() {
            collector.add_error(
                span_of(node),
                DiagnosticCode::YamlSyntax,
                format!("Missing `{}`", node.kind()),
            );
            continue;
        }

        // Children are pushed in reverse so errors come out in document order.
        let mut cursor = node.walk();
        let children: Vec<Node> = node
            .children(&mut cursor)
            .filter(|child| child.has_error() || child.is_missing())
            .collect();
        stack.extend(children.into_iter().rev());
    }
}

fn error_message(node: Node, text: &str) -> String {
    let snippet = node_text(node, text).trim();
    let first_line = snippet.lines().next().unwrap_or("");

    if first_line.is_empty() {
        "Invalid YAML".to_string()
    } else if first_line.chars().count() > 40 {
        let truncated: String = first_line.chars().take(40).collect();
        format!("Invalid YAML near `{}…`", truncated)
    } else {
        format!("Invalid YAML near `{}`", first_line)
    }
}
