//! Document model builder
//!
//! Walks the tree-sitter tree of a configuration and produces a [`Document`]:
//! typed entities with byte spans, the anchor table and every structural
//! diagnostic. Building never fails; broken input yields a partial model.

mod entities;
mod orbs;
mod steps;
mod workflows;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tree_sitter::{Node, Tree};

use crate::diagnostics::{self, DiagnosticCode, DiagnosticCollector};
use crate::document::{AnchorTable, ConfigVersion, Document};
use crate::orbs::{NoOrbs, OrbLookup};
use crate::parser::parse_yaml;
use crate::parser::syntax::{
    as_alias, as_mapping, as_sequence, content_of, mapping_pairs, pair_key,
    pair_value, root_value, scalar_span, scalar_text, sequence_items, sigil_name,
    sigil_name_span, span_of,
};
use crate::position::Span;

pub use orbs::build_orb_info;

/// Nested `when`/`unless` steps and merge keys deeper than this are not
/// followed.
const MAX_DEPTH: usize = 64;

/// Build the document model of `content`, attaching orb information from
/// `orbs` where it is available.
pub fn build(content: &str, orbs: &dyn OrbLookup) -> Document {
    let mut collector = DiagnosticCollector::new();
    let tree = parse_yaml(content, &mut collector);

    let mut document = Document {
        content: content.to_string(),
        ..Default::default()
    };

    if let Some(tree) = &tree {
        let mut builder = Builder::new(content, orbs, collector);
        builder.collect_anchors(tree);
        builder.build_root(tree, &mut document);
        collector = builder.finish(&mut document);
    }

    diagnostics::validate_document(&document, &mut collector);

    let mut suppression_errors = DiagnosticCollector::new();
    if let Some(tree) = &tree {
        document.suppressions =
            diagnostics::collect_suppressions(tree, content, &mut suppression_errors);
    }
    document.diagnostics = document
        .suppressions
        .retain(content, collector.into_diagnostics());
    document.diagnostics.extend(suppression_errors.into_diagnostics());
    document.tree = tree;

    tracing::debug!(
        "Built document: {} jobs, {} workflows, {} diagnostics",
        document.jobs.len(),
        document.workflows.len(),
        document.diagnostics.len()
    );

    document
}

impl Document {
    /// Build a document without any orb information
    pub fn parse(content: &str) -> Document {
        build(content, &NoOrbs)
    }
}

/// A mapping entry after merge keys are expanded
#[derive(Debug, Clone)]
pub(crate) struct Entry<'t> {
    pub key: String,
    pub key_span: Span,
    pub value: Option<Node<'t>>,
    /// The whole key/value pair
    pub span: Span,
}

impl Entry<'_> {
    /// Span recorded for a section: the value, or the pair when empty
    pub fn section_span(&self) -> Span {
        self.value.map(span_of).unwrap_or(self.span)
    }
}

pub(crate) struct Builder<'t> {
    text: &'t str,
    orbs: &'t dyn OrbLookup,
    collector: DiagnosticCollector,
    anchors: AnchorTable,
    /// Anchored value each alias node refers to, keyed by the alias node id
    alias_targets: HashMap<usize, Node<'t>>,
    /// Expanded entries per mapping node id
    expanded: RefCell<HashMap<usize, Vec<Entry<'t>>>>,
    expanding: RefCell<HashSet<usize>>,
}

impl<'t> Builder<'t> {
    pub fn new(text: &'t str, orbs: &'t dyn OrbLookup, collector: DiagnosticCollector) -> Self {
        Self {
            text,
            orbs,
            collector,
            anchors: AnchorTable::default(),
            alias_targets: HashMap::new(),
            expanded: RefCell::new(HashMap::new()),
            expanding: RefCell::new(HashSet::new()),
        }
    }

    fn finish(self, document: &mut Document) -> DiagnosticCollector {
        document.anchors = self.anchors;
        self.collector
    }

    /// Record every `&anchor` and `*alias` in document order. Each alias is
    /// bound to the latest definition preceding it.
    fn collect_anchors(&mut self, tree: &'t Tree) {
        let mut defined: HashMap<String, Node<'t>> = HashMap::new();
        let mut stack = vec![tree.root_node()];

        while let Some(node) = stack.pop() {
            match node.kind() {
                "anchor" => {
                    let name = sigil_name(node, self.text).to_string();
                    let definition = sigil_name_span(node, self.text);
                    let value = node.parent().unwrap_or(node);

                    if self.anchors.define(&name, definition, span_of(value)) {
                        self.collector.add_warning(
                            definition,
                            DiagnosticCode::RedefinedAnchor,
                            format!("Anchor `{}` is redefined", name),
                        );
                    }
                    defined.insert(name, value);
                    continue;
                }
                "alias" => {
                    let name = sigil_name(node, self.text);
                    let span = sigil_name_span(node, self.text);
                    if let Some(target) = defined.get(name) {
                        self.alias_targets.insert(node.id(), *target);
                    }
                    if !self.anchors.add_alias(name, span) {
                        self.collector.add_error(
                            span,
                            DiagnosticCode::UndefinedAnchor,
                            format!("Cannot find anchor `{}`", name),
                        );
                    }
                    continue;
                }
                _ => {}
            }

            let mut cursor = node.walk();
            let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }

    fn build_root(&mut self, tree: &'t Tree, document: &mut Document) {
        let Some(root) = root_value(tree) else {
            return;
        };

        if as_mapping(root).is_none() {
            self.collector.add_error(
                span_of(root),
                DiagnosticCode::YamlSyntax,
                "A configuration must be a mapping",
            );
            return;
        }

        for entry in self.entries(root) {
            let section = Some(entry.section_span());

            match entry.key.as_str() {
                "version" => {
                    document.sections.version = section;
                    document.version = self.build_version(&entry);
                }
                "description" => {
                    document.sections.description = section;
                    document.description = entry.value.and_then(|v| self.scalar(v));
                }
                "orbs" => {
                    document.sections.orbs = section;
                    if let Some(value) = entry.value {
                        document.orbs = self.build_orbs(value);
                    }
                }
                "commands" => {
                    document.sections.commands = section;
                    if let Some(value) = entry.value {
                        document.commands = self.build_commands(value);
                    }
                }
                "jobs" => {
                    document.sections.jobs = section;
                    if let Some(value) = entry.value {
                        document.jobs = self.build_jobs(value);
                    }
                }
                "executors" => {
                    document.sections.executors = section;
                    if let Some(value) = entry.value {
                        document.executors = self.build_executors(value);
                    }
                }
                "workflows" => {
                    document.sections.workflows = section;
                    if let Some(value) = entry.value {
                        let (workflows, version_key) = self.build_workflows(value);
                        document.workflows = workflows;
                        document.sections.workflows_version = version_key;
                    }
                }
                "parameters" => {
                    document.sections.parameters = section;
                    if let Some(value) = entry.value {
                        document.pipeline_parameters = self.build_parameters(value);
                    }
                }
                _ => {}
            }
        }
    }

    fn build_version(&mut self, entry: &Entry<'t>) -> Option<ConfigVersion> {
        let Some(value) = entry.value else {
            self.collector.add_error(
                entry.span,
                DiagnosticCode::InvalidVersion,
                "Missing configuration version",
            );
            return None;
        };

        let text = self.scalar(value).unwrap_or_default();
        let version = ConfigVersion::parse(&text).filter(ConfigVersion::is_supported);
        if version.is_none() {
            self.collector.add_error(
                scalar_span(value),
                DiagnosticCode::InvalidVersion,
                format!("Invalid version `{}`, expected 2, 2.0 or 2.1", text),
            );
        }
        version
    }

    /// Follow an alias to the node carrying its anchor
    pub(crate) fn resolve(&self, node: Node<'t>) -> Node<'t> {
        let mut current = node;
        for _ in 0..MAX_DEPTH {
            let Some(alias) = as_alias(current) else {
                return current;
            };
            match self.alias_targets.get(&alias.id()) {
                Some(target) if *target != current => current = *target,
                _ => return current,
            }
        }
        current
    }

    /// Decoded scalar text of a value, following aliases
    pub(crate) fn scalar(&self, node: Node<'t>) -> Option<String> {
        scalar_text(self.resolve(node), self.text)
    }

    pub(crate) fn scalar_of(&self, entry: &Entry<'t>) -> Option<String> {
        entry.value.and_then(|value| self.scalar(value))
    }

    pub(crate) fn bool_of(&self, entry: &Entry<'t>) -> bool {
        self.scalar_of(entry).is_some_and(|value| value == "true")
    }

    /// A scalar or a list of scalars as a list
    pub(crate) fn string_list(&self, node: Node<'t>) -> Vec<String> {
        let node = self.resolve(node);
        match as_sequence(node) {
            Some(sequence) => sequence_items(sequence)
                .into_iter()
                .filter_map(|item| self.scalar(item))
                .collect(),
            None => self.scalar(node).into_iter().collect(),
        }
    }

    /// Items of a sequence value, following aliases
    pub(crate) fn items(&self, node: Node<'t>) -> Vec<Node<'t>> {
        as_sequence(self.resolve(node))
            .map(sequence_items)
            .unwrap_or_default()
    }

    pub(crate) fn is_mapping(&self, node: Node<'t>) -> bool {
        as_mapping(self.resolve(node)).is_some()
    }

    /// Entries of a mapping value with `<<` merge keys expanded. Keys written
    /// in the mapping itself win over merged ones.
    pub(crate) fn entries(&self, node: Node<'t>) -> Vec<Entry<'t>> {
        self.entries_at_depth(node, 0)
    }

    fn entries_at_depth(&self, node: Node<'t>, depth: usize) -> Vec<Entry<'t>> {
        if depth > MAX_DEPTH {
            return Vec::new();
        }

        let Some(mapping) = as_mapping(self.resolve(node)) else {
            return Vec::new();
        };

        if let Some(entries) = self.expanded.borrow().get(&mapping.id()) {
            return entries.clone();
        }
        // A mapping merging itself through an alias contributes nothing
        if !self.expanding.borrow_mut().insert(mapping.id()) {
            return Vec::new();
        }

        let mut own = Vec::new();
        let mut merged = Vec::new();

        for pair in mapping_pairs(mapping) {
            let Some(key_node) = pair_key(pair) else {
                continue;
            };
            let Some(key) = scalar_text(key_node, self.text) else {
                continue;
            };
            let value = pair_value(pair);

            if key == "<<" {
                if let Some(value) = value {
                    let sources = match as_sequence(value) {
                        Some(sequence) => sequence_items(sequence),
                        None => vec![value],
                    };
                    for source in sources {
                        merged.extend(self.entries_at_depth(source, depth + 1));
                    }
                }
                continue;
            }

            own.push(Entry {
                key,
                key_span: scalar_span(key_node),
                value: value.filter(|v| content_of(*v).is_some()),
                span: span_of(pair),
            });
        }

        merged.retain(|entry: &Entry<'t>| own.iter().all(|o| o.key != entry.key));
        let mut seen = HashSet::new();
        merged.retain(|entry| seen.insert(entry.key.clone()));
        own.extend(merged);

        self.expanding.borrow_mut().remove(&mapping.id());
        self.expanded.borrow_mut().insert(mapping.id(), own.clone());
        own
    }

    /// Insert into an entity map, warning on both names if the key exists.
    /// The later declaration wins.
    pub(crate) fn insert_unique<T>(
        &mut self,
        map: &mut IndexMap<String, T>,
        name: String,
        name_span: Span,
        value: T,
        name_span_of: fn(&T) -> Span,
    ) {
        if let Some(previous) = map.get(&name) {
            let previous_span = name_span_of(previous);
            let message = format!("{} already defined", name);
            self.collector.add_warning(
                previous_span,
                DiagnosticCode::DuplicateDeclaration,
                message.clone(),
            );
            self.collector
                .add_warning(name_span, DiagnosticCode::DuplicateDeclaration, message);
        }
        map.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Severity;

    #[test]
    fn test_sections_are_recorded() {
        let text = "version: 2.1\norbs:\njobs:\n  build:\n    docker:\n      - image: cimg/base:stable\n    steps: [checkout]\n";
        let doc = Document::parse(text);

        assert_eq!(doc.version, Some(ConfigVersion::V2_1));
        assert_eq!(doc.sections.version.map(|s| s.slice(text)), Some("2.1"));
        // An empty section is recorded on the whole pair
        assert_eq!(doc.sections.orbs.map(|s| s.slice(text)), Some("orbs:"));
        assert!(doc.sections.jobs.unwrap().slice(text).starts_with("build:"));
    }

    #[test]
    fn test_invalid_version() {
        let doc = Document::parse("version: two\n");

        assert!(doc.version.is_none());
        assert_eq!(doc.diagnostics.len(), 1);
        assert_eq!(doc.diagnostics[0].code, DiagnosticCode::InvalidVersion);
    }

    #[test]
    fn test_unsupported_versions() {
        for text in ["version: 3\n", "version: 2.5\n", "version: 1\n", "version: 0\n"] {
            let doc = Document::parse(text);

            assert!(doc.version.is_none(), "{}", text);
            assert_eq!(doc.diagnostics.len(), 1, "{}", text);
            assert_eq!(doc.diagnostics[0].code, DiagnosticCode::InvalidVersion);
        }

        assert_eq!(Document::parse("version: 2\n").version, Some(ConfigVersion::V2_0));
        assert_eq!(Document::parse("version: 2.0\n").version, Some(ConfigVersion::V2_0));
    }

    #[test]
    fn test_merge_keys_are_expanded() {
        let text = r#"version: 2.1
defaults: &defaults
  docker:
    - image: cimg/node:20.0
  working_directory: ~/app
jobs:
  build:
    <<: *defaults
    working_directory: ~/other
    steps:
      - checkout
"#;
        let doc = Document::parse(text);
        let job = &doc.jobs["build"];

        assert_eq!(job.working_directory.as_deref(), Some("~/other"));
        assert!(job.inline_executor.is_some());
        assert!(doc.diagnostics.is_empty(), "{:?}", doc.diagnostics);
    }

    #[test]
    fn test_merge_chain_is_expanded_once_per_mapping() {
        let mut text = String::from("version: 2.1\nl0: &l0\n  docker:\n    - image: cimg/base:stable\n");
        for level in 1..=24 {
            text.push_str(&format!("l{}: &l{}\n  <<: [*l{}, *l{}]\n", level, level, level - 1, level - 1));
        }
        text.push_str("jobs:\n  build:\n    <<: *l24\n    steps: [checkout]\n");

        let doc = Document::parse(&text);
        let job = &doc.jobs["build"];

        assert!(job.inline_executor.is_some());
        assert_eq!(job.steps.len(), 1);
        assert!(doc.diagnostics.is_empty(), "{:?}", doc.diagnostics);
    }

    #[test]
    fn test_self_merge_terminates() {
        let text = "version: 2.1\njobs:\n  build: &build\n    <<: *build\n    working_directory: ~/app\n    steps: [checkout]\n";
        let doc = Document::parse(text);
        let job = &doc.jobs["build"];

        assert_eq!(job.working_directory.as_deref(), Some("~/app"));
        assert_eq!(job.steps.len(), 1);
    }

    #[test]
    fn test_alias_binds_to_definition_before_it() {
        let text = r#"version: 2.1
first: &steps
  - checkout
jobs:
  build:
    docker:
      - image: cimg/base:stable
    steps: *steps
second: &steps
  - run: make deploy
"#;
        let doc = Document::parse(text);
        let job = &doc.jobs["build"];

        assert_eq!(job.steps.len(), 1);
        assert_matches::assert_matches!(&job.steps[0], crate::document::Step::Checkout(_));

        let redefined: Vec<_> = doc
            .diagnostics
            .iter()
            .filter(|d| d.code == DiagnosticCode::RedefinedAnchor)
            .collect();
        assert_eq!(redefined.len(), 1);
        assert_eq!(redefined[0].severity, Severity::Warning);
        assert!(redefined[0].span.start > text.find("second").unwrap());
        assert_eq!(doc.anchors.iter().filter(|a| a.name == "steps").count(), 2);
        assert_eq!(doc.anchors.iter().next().map(|a| a.aliases.len()), Some(1));
    }

    #[test]
    fn test_duplicate_jobs_warn_on_both_names() {
        let text = "version: 2.1\njobs:\n  build:\n    steps: [checkout]\n  build:\n    steps: [checkout]\n";
        let doc = Document::parse(text);

        let duplicates: Vec<_> = doc
            .diagnostics
            .iter()
            .filter(|d| d.code == DiagnosticCode::DuplicateDeclaration)
            .collect();
        assert_eq!(duplicates.len(), 2);
        assert!(duplicates.iter().all(|d| d.severity == Severity::Warning));
        assert_ne!(duplicates[0].span, duplicates[1].span);
        assert_eq!(doc.jobs.len(), 1);
    }

    #[test]
    fn test_undefined_alias() {
        let doc = Document::parse("version: 2.1\nx: *missing\n");

        assert_eq!(doc.diagnostics.len(), 1);
        assert_eq!(doc.diagnostics[0].code, DiagnosticCode::UndefinedAnchor);
        assert_eq!(doc.diagnostics[0].span.slice(&doc.content), "missing");
    }

    #[test]
    fn test_non_mapping_root() {
        let doc = Document::parse("- just\n- a list\n");
        assert_eq!(doc.diagnostics.len(), 1);
        assert!(doc.jobs.is_empty());
    }
}
