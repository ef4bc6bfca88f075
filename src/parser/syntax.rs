//! tree-sitter adapter for YAML
//!
//! Everything the builder needs from the concrete syntax tree goes through
//! the helpers here: node kinds, field access, unwrapping of `block_node` /
//! `flow_node` wrappers and scalar text extraction.

use tree_sitter::{Node, Parser, Tree};

use crate::error::SyntaxError;
use crate::position::Span;

/// Parse `text` into a tree-sitter YAML tree
pub fn parse_tree(text: &str) -> Result<Tree, SyntaxError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_yaml::LANGUAGE.into())
        .map_err(|err| SyntaxError::Language(err.to_string()))?;

    parser.parse(text, None).ok_or(SyntaxError::NoTree)
}

pub fn span_of(node: Node) -> Span {
    Span::new(node.start_byte(), node.end_byte())
}

/// Raw source text of a node
pub fn node_text<'a>(node: Node, text: &'a str) -> &'a str {
    span_of(node).slice(text)
}

fn is_property(node: &Node) -> bool {
    matches!(node.kind(), "anchor" | "tag" | "comment")
}

/// The first named children of `node`, skipping comments
pub fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| child.kind() != "comment")
        .collect()
}

pub fn child_of_kind<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    let found = node.named_children(&mut cursor).find(|child| child.kind() == kind);
    found
}

/// Unwrap `block_node` / `flow_node` wrappers down to the node carrying the
/// actual content, skipping anchors and tags.
pub fn content_of(node: Node) -> Option<Node> {
    let mut current = node;
    loop {
        match current.kind() {
            "block_node" | "flow_node" => {
                let mut cursor = current.walk();
                let inner = current
                    .named_children(&mut cursor)
                    .find(|child| !is_property(child))?;
                current = inner;
            }
            _ => return Some(current),
        }
    }
}

/// The anchor attached to a value node, if any
pub fn anchor_of(node: Node) -> Option<Node> {
    match node.kind() {
        "block_node" | "flow_node" => child_of_kind(node, "anchor"),
        _ => None,
    }
}

/// Root node of the first YAML document that has content
pub fn root_value(tree: &Tree) -> Option<Node<'_>> {
    let stream = tree.root_node();
    let mut cursor = stream.walk();
    let documents: Vec<Node> = stream
        .named_children(&mut cursor)
        .filter(|child| child.kind() == "document")
        .collect();

    documents.into_iter().find_map(|document| {
        named_children(document)
            .into_iter()
            .find(|child| matches!(child.kind(), "block_node" | "flow_node"))
    })
}

pub fn as_mapping(node: Node) -> Option<Node> {
    content_of(node).filter(|inner| matches!(inner.kind(), "block_mapping" | "flow_mapping"))
}

pub fn as_sequence(node: Node) -> Option<Node> {
    content_of(node).filter(|inner| matches!(inner.kind(), "block_sequence" | "flow_sequence"))
}

pub fn as_alias(node: Node) -> Option<Node> {
    content_of(node).filter(|inner| inner.kind() == "alias")
}

/// Key/value pairs of a mapping node (block or flow)
pub fn mapping_pairs<'t>(mapping: Node<'t>) -> Vec<Node<'t>> {
    named_children(mapping)
        .into_iter()
        .filter(|child| matches!(child.kind(), "block_mapping_pair" | "flow_pair"))
        .collect()
}

pub fn pair_key(pair: Node) -> Option<Node> {
    pair.child_by_field_name("key")
}

pub fn pair_value(pair: Node) -> Option<Node> {
    pair.child_by_field_name("value")
}

/// Value nodes of a sequence, in order
pub fn sequence_items<'t>(sequence: Node<'t>) -> Vec<Node<'t>> {
    match sequence.kind() {
        "block_sequence" => named_children(sequence)
            .into_iter()
            .filter(|child| child.kind() == "block_sequence_item")
            .filter_map(|item| {
                named_children(item)
                    .into_iter()
                    .find(|child| matches!(child.kind(), "block_node" | "flow_node"))
            })
            .collect(),
        "flow_sequence" => named_children(sequence)
            .into_iter()
            .filter(|child| matches!(child.kind(), "flow_node" | "flow_pair"))
            .collect(),
        _ => Vec::new(),
    }
}

/// Decoded text of a scalar value node, `None` for mappings, sequences and
/// aliases.
pub fn scalar_text(node: Node, text: &str) -> Option<String> {
    let inner = content_of(node)?;
    let raw = node_text(inner, text);

    match inner.kind() {
        "plain_scalar" => Some(raw.trim().to_string()),
        "double_quote_scalar" => Some(unescape_double_quoted(strip_quotes(raw, '"'))),
        "single_quote_scalar" => Some(strip_quotes(raw, '\'').replace("''", "'")),
        "block_scalar" => Some(block_scalar_body(raw)),
        _ => None,
    }
}

/// Span of the scalar content, ignoring anchors and tags in front of it
pub fn scalar_span(node: Node) -> Span {
    content_of(node).map(span_of).unwrap_or_else(|| span_of(node))
}

fn strip_quotes(raw: &str, quote: char) -> &str {
    let raw = raw.strip_prefix(quote).unwrap_or(raw);
    raw.strip_suffix(quote).unwrap_or(raw)
}

fn unescape_double_quoted(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Body of a `|` or `>` block scalar: the header line is dropped and the
/// common indentation removed.
fn block_scalar_body(raw: &str) -> String {
    let body = match raw.find('\n') {
        Some(newline) => &raw[newline + 1..],
        None => return String::new(),
    };

    let indent = body
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);

    body.lines()
        .map(|line| line.get(indent..).unwrap_or("").trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Name of an anchor or alias node, without its sigil
pub fn sigil_name<'a>(node: Node, text: &'a str) -> &'a str {
    node_text(node, text)
        .trim_start_matches(['&', '*'])
        .trim()
}

/// Span of an anchor or alias name, without its sigil
pub fn sigil_name_span(node: Node, text: &str) -> Span {
    let span = span_of(node);
    let raw = span.slice(text);
    let trimmed = raw.trim_start_matches(['&', '*']);
    let start = span.start + (raw.len() - trimmed.len());
    Span::new(start, start + trimmed.trim_end().len())
}
