//! Semantic tokens for CircleCI configuration files
//!
//! Highlights orb references, parameter interpolations, configuration
//! keywords and cache-key templates on top of the editor's YAML grammar.

use lazy_static::lazy_static;
use regex::Regex;
use tower_lsp::lsp_types::{
    SemanticToken, SemanticTokenType, SemanticTokens, SemanticTokensLegend,
};
use tree_sitter::Node;

use crate::document::{walk_steps, Document, Step};
use crate::parser::find_interpolations;
use crate::parser::syntax::{
    as_mapping, named_children, node_text, pair_key, root_value, scalar_span,
};
use crate::position::{LineIndex, Span};
use crate::schema::{is_keyword, is_root_keyword};

/// Token types in legend order
pub const TOKEN_TYPES: &[SemanticTokenType] = &[
    SemanticTokenType::NAMESPACE, // 0: orb aliases
    SemanticTokenType::FUNCTION,  // 1: orb commands, jobs and executors
    SemanticTokenType::KEYWORD,   // 2: configuration keys
    SemanticTokenType::PARAMETER, // 3: << parameters.x >>
    SemanticTokenType::VARIABLE,  // 4: {{ .Branch }} cache-key templates
];

mod token_type {
    pub const NAMESPACE: u32 = 0;
    pub const FUNCTION: u32 = 1;
    pub const KEYWORD: u32 = 2;
    pub const PARAMETER: u32 = 3;
    pub const VARIABLE: u32 = 4;
}

lazy_static! {
    static ref CACHE_KEY_RE: Regex = Regex::new(
        r"\{\{ ?(\.Branch|\.BuildNum|\.Revision|\.CheckoutKey|\.Environment\.[A-Za-z0-9_]+|checksum [^}]*|epoch|arch) ?\}\}"
    )
    .unwrap();
}

pub fn legend() -> SemanticTokensLegend {
    SemanticTokensLegend {
        token_types: TOKEN_TYPES.to_vec(),
        token_modifiers: vec![],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RawToken {
    span: Span,
    token_type: u32,
}

/// Semantic tokens of a document, delta encoded
pub fn compute_semantic_tokens(document: &Document) -> SemanticTokens {
    let mut tokens = Vec::new();

    if let Some(tree) = &document.tree {
        let root_mapping = root_value(tree).and_then(as_mapping);
        collect_syntax_tokens(tree.root_node(), root_mapping, &document.content, &mut tokens);
    }
    collect_orb_tokens(document, &mut tokens);

    encode_tokens(&document.content, tokens)
}

fn collect_syntax_tokens<'t>(
    root: Node<'t>,
    root_mapping: Option<Node<'t>>,
    text: &str,
    tokens: &mut Vec<RawToken>,
) {
    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        match node.kind() {
            "block_mapping_pair" | "flow_pair" => {
                if let Some(key) = pair_key(node) {
                    let span = scalar_span(key);
                    let name = span.slice(text);
                    let at_root = node.parent().is_some() && node.parent() == root_mapping;
                    if (at_root && is_root_keyword(name)) || is_keyword(name) {
                        tokens.push(RawToken {
                            span,
                            token_type: token_type::KEYWORD,
                        });
                    }
                }
            }
            "plain_scalar" | "double_quote_scalar" | "single_quote_scalar" | "block_scalar" => {
                let start = node.start_byte();
                let raw = node_text(node, text);

                tokens.extend(find_interpolations(raw, start).into_iter().map(|found| {
                    RawToken {
                        span: found.span,
                        token_type: token_type::PARAMETER,
                    }
                }));
                tokens.extend(CACHE_KEY_RE.find_iter(raw).map(|found| RawToken {
                    span: Span::new(found.start(), found.end()).offset(start),
                    token_type: token_type::VARIABLE,
                }));
                continue;
            }
            _ => {}
        }

        stack.extend(named_children(node));
    }
}

/// `alias/entity` references to declared orbs, plus the orb aliases
/// themselves in the `orbs:` section
fn collect_orb_tokens(document: &Document, tokens: &mut Vec<RawToken>) {
    let mut references: Vec<(String, Span)> = Vec::new();

    for workflow in &document.workflows {
        for job_ref in &workflow.jobs {
            references.push((job_ref.job_name.clone(), job_ref.job_name_span));
        }
    }

    let mut visit = |step: &Step| {
        if let Step::Named(named) = step {
            references.push((named.name.clone(), named.name_span));
        }
    };
    for job in document.jobs.values() {
        walk_steps(&job.steps, &mut visit);
    }
    for command in document.commands.values() {
        walk_steps(&command.steps, &mut visit);
    }
    for job_ref in document.workflows.iter().flat_map(|w| w.jobs.iter()) {
        walk_steps(&job_ref.pre_steps, &mut visit);
        walk_steps(&job_ref.post_steps, &mut visit);
    }

    for job in document.jobs.values() {
        if let Some(executor) = &job.executor {
            references.push((executor.name.clone(), executor.span));
        }
    }

    for (name, span) in references {
        let Some((alias, _)) = name.split_once('/') else {
            continue;
        };
        if !document.orbs.contains_key(alias) {
            continue;
        }

        // Quoted references start one byte after the span
        let raw = span.slice(&document.content);
        let start = span.start + (raw.len() - raw.trim_start_matches(['"', '\'']).len());
        let prefix_end = start + alias.len() + 1;

        tokens.push(RawToken {
            span: Span::new(start, prefix_end),
            token_type: token_type::NAMESPACE,
        });
        tokens.push(RawToken {
            span: Span::new(prefix_end, start + name.len()),
            token_type: token_type::FUNCTION,
        });
    }

    tokens.extend(document.orbs.values().map(|orb| RawToken {
        span: orb.name_span,
        token_type: token_type::NAMESPACE,
    }));
}

/// Order tokens, drop empty, multi-line and overlapping ones, then delta
/// encode them with UTF-16 columns.
fn encode_tokens(text: &str, mut tokens: Vec<RawToken>) -> SemanticTokens {
    tokens.sort_by_key(|token| (token.span.start, token.span.end));

    let index = LineIndex::new(text);
    let mut data: Vec<SemanticToken> = Vec::with_capacity(tokens.len());
    let mut prev_line = 0u32;
    let mut prev_start = 0u32;
    let mut covered_until = 0usize;

    for token in tokens {
        if token.span.is_empty() || token.span.start < covered_until {
            continue;
        }

        let range = index.range(token.span);
        if range.start.line != range.end.line {
            continue;
        }
        covered_until = token.span.end;

        let delta_line = range.start.line - prev_line;
        let delta_start = if delta_line == 0 {
            range.start.character - prev_start
        } else {
            range.start.character
        };

        data.push(SemanticToken {
            delta_line,
            delta_start,
            length: range.end.character - range.start.character,
            token_type: token.token_type,
            token_modifiers_bitset: 0,
        });

        prev_line = range.start.line;
        prev_start = range.start.character;
    }

    SemanticTokens {
        result_id: None,
        data,
    }
}
