//! Semantic model of a CircleCI configuration file

pub mod ast;

use std::fmt;

use indexmap::IndexMap;
use tree_sitter::Tree;

use crate::diagnostics::{Diagnostic, Suppressions};

pub use ast::*;

/// A built configuration document
///
/// Produced by [`crate::builder::build`]; immutable afterwards and shared
/// behind an `Arc` by the cache.
#[derive(Clone, Default)]
pub struct Document {
    pub content: String,
    /// `None` when the YAML grammar could not be loaded
    pub tree: Option<Tree>,
    pub version: Option<ConfigVersion>,
    pub description: Option<String>,
    pub sections: SectionRanges,
    pub jobs: IndexMap<String, Job>,
    pub commands: IndexMap<String, Command>,
    pub executors: IndexMap<String, Executor>,
    pub orbs: IndexMap<String, Orb>,
    pub workflows: Vec<Workflow>,
    pub pipeline_parameters: Parameters,
    pub anchors: AnchorTable,
    /// `# cci-ignore` comments, applied to every diagnostic of the document
    pub suppressions: Suppressions,
    pub diagnostics: Vec<Diagnostic>,
}

impl Document {
    pub fn workflow(&self, name: &str) -> Option<&Workflow> {
        self.workflows.iter().find(|workflow| workflow.name == name)
    }

    /// Split `alias/entity` and return the orb declared under `alias`
    pub fn orb_for<'a>(&self, qualified: &'a str) -> Option<(&Orb, &'a str)> {
        let (alias, entity) = qualified.split_once('/')?;
        self.orbs.get(alias).map(|orb| (orb, entity))
    }

    /// Whether `name` is a local job or a job provided by a resolved orb
    pub fn has_job(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
            || self
                .orb_for(name)
                .is_some_and(|(orb, entity)| orb.has_job(entity))
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.commands.contains_key(name)
            || self
                .orb_for(name)
                .is_some_and(|(orb, entity)| orb.has_command(entity))
    }

    pub fn has_executor(&self, name: &str) -> bool {
        self.executors.contains_key(name)
            || self
                .orb_for(name)
                .is_some_and(|(orb, entity)| orb.has_executor(entity))
    }

    /// Whether `name` is qualified by an orb whose contents are unknown, so
    /// references through it cannot be checked.
    pub fn is_unresolved_orb_reference(&self, name: &str) -> bool {
        self.orb_for(name).is_some_and(|(orb, _)| orb.info.is_none())
    }

    pub fn is_at_least(&self, version: ConfigVersion) -> bool {
        self.version.is_some_and(|own| own >= version)
    }
}

// The tree carries no meaning of its own beyond `content`.
impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.content == other.content
            && self.version == other.version
            && self.description == other.description
            && self.sections == other.sections
            && self.jobs == other.jobs
            && self.commands == other.commands
            && self.executors == other.executors
            && self.orbs == other.orbs
            && self.workflows == other.workflows
            && self.pipeline_parameters == other.pipeline_parameters
            && self.anchors == other.anchors
            && self.diagnostics == other.diagnostics
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("version", &self.version)
            .field("description", &self.description)
            .field("sections", &self.sections)
            .field("jobs", &self.jobs.keys().collect::<Vec<_>>())
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .field("executors", &self.executors.keys().collect::<Vec<_>>())
            .field("orbs", &self.orbs.keys().collect::<Vec<_>>())
            .field(
                "workflows",
                &self.workflows.iter().map(|w| &w.name).collect::<Vec<_>>(),
            )
            .field("anchors", &self.anchors.len())
            .field("diagnostics", &self.diagnostics)
            .finish_non_exhaustive()
    }
}
