//! Typed, span-annotated entities of a CircleCI configuration

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::OrbResolutionError;
use crate::position::Span;

pub type Parameters = IndexMap<String, Parameter>;
pub type Environment = IndexMap<String, String>;

/// `version:` of the configuration, e.g. `2` or `2.1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConfigVersion {
    pub major: u32,
    pub minor: u32,
}

impl ConfigVersion {
    pub const V2_0: ConfigVersion = ConfigVersion { major: 2, minor: 0 };
    pub const V2_1: ConfigVersion = ConfigVersion { major: 2, minor: 1 };

    /// Versions CircleCI accepts
    pub fn is_supported(&self) -> bool {
        *self == Self::V2_0 || *self == Self::V2_1
    }

    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (major, minor) = match text.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (text, "0"),
        };
        Some(Self {
            major: major.parse().ok()?,
            minor: minor.parse().ok()?,
        })
    }
}

impl fmt::Display for ConfigVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Spans of the top-level sections. The span is the section's value, or the
/// whole key/value pair when the value is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionRanges {
    pub version: Option<Span>,
    pub description: Option<Span>,
    pub orbs: Option<Span>,
    pub commands: Option<Span>,
    pub jobs: Option<Span>,
    pub executors: Option<Span>,
    pub workflows: Option<Span>,
    pub parameters: Option<Span>,
    /// `version:` written inside `workflows:`
    pub workflows_version: Option<Span>,
}

/// `name: value` passed to a job, command, orb entity or executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentValue {
    pub name: String,
    pub name_span: Span,
    /// Scalar text of the value; `None` for mappings and sequences
    pub value: Option<String>,
    pub value_span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterType {
    String,
    Boolean,
    Integer,
    Enum(Vec<String>),
    Executor,
    Steps,
    EnvVarName,
    Unknown(String),
}

impl ParameterType {
    pub fn from_declared(text: &str, enum_values: Vec<String>) -> Self {
        match text {
            "string" => ParameterType::String,
            "boolean" => ParameterType::Boolean,
            "integer" => ParameterType::Integer,
            "enum" => ParameterType::Enum(enum_values),
            "executor" => ParameterType::Executor,
            "steps" => ParameterType::Steps,
            "env_var_name" => ParameterType::EnvVarName,
            other => ParameterType::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub name_span: Span,
    pub span: Span,
    pub param_type: ParameterType,
    pub type_span: Option<Span>,
    pub default: Option<String>,
    pub default_span: Option<Span>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedStep {
    pub name: String,
    pub name_span: Span,
    pub span: Span,
    pub arguments: Vec<ArgumentValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStep {
    pub name_span: Span,
    pub span: Span,
    /// Command exactly as written (block scalar body already dedented)
    pub raw_command: String,
    pub command: String,
    pub command_span: Option<Span>,
    pub name: Option<String>,
    pub shell: Option<String>,
    pub background: bool,
    pub working_directory: Option<String>,
    pub no_output_timeout: Option<String>,
    pub when: Option<String>,
    pub environment: Environment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutStep {
    pub name_span: Span,
    pub span: Span,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupRemoteDockerStep {
    pub name_span: Span,
    pub span: Span,
    pub docker_layer_caching: bool,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveCacheStep {
    pub name_span: Span,
    pub span: Span,
    pub key: Option<String>,
    pub paths: Vec<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreCacheStep {
    pub name_span: Span,
    pub span: Span,
    pub keys: Vec<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreArtifactsStep {
    pub name_span: Span,
    pub span: Span,
    pub path: Option<String>,
    pub destination: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreTestResultsStep {
    pub name_span: Span,
    pub span: Span,
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistToWorkspaceStep {
    pub name_span: Span,
    pub span: Span,
    pub root: Option<String>,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachWorkspaceStep {
    pub name_span: Span,
    pub span: Span,
    pub at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddSshKeysStep {
    pub name_span: Span,
    pub span: Span,
    pub fingerprints: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    When,
    Unless,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalStep {
    pub kind: ConditionKind,
    pub name_span: Span,
    pub span: Span,
    pub condition_span: Option<Span>,
    pub steps: Vec<Step>,
}

/// `- steps: << parameters.x >>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepsParameterStep {
    pub name_span: Span,
    pub span: Span,
    pub reference: String,
    pub reference_span: Option<Span>,
}

/// One entry of a `steps:` list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Named(NamedStep),
    Run(RunStep),
    Checkout(CheckoutStep),
    SetupRemoteDocker(SetupRemoteDockerStep),
    SaveCache(SaveCacheStep),
    RestoreCache(RestoreCacheStep),
    StoreArtifacts(StoreArtifactsStep),
    StoreTestResults(StoreTestResultsStep),
    PersistToWorkspace(PersistToWorkspaceStep),
    AttachWorkspace(AttachWorkspaceStep),
    AddSshKeys(AddSshKeysStep),
    Conditional(ConditionalStep),
    StepsParameter(StepsParameterStep),
}

impl Step {
    /// The keyword or invoked name of the step
    pub fn name(&self) -> &str {
        match self {
            Step::Named(step) => &step.name,
            Step::Run(_) => "run",
            Step::Checkout(_) => "checkout",
            Step::SetupRemoteDocker(_) => "setup_remote_docker",
            Step::SaveCache(_) => "save_cache",
            Step::RestoreCache(_) => "restore_cache",
            Step::StoreArtifacts(_) => "store_artifacts",
            Step::StoreTestResults(_) => "store_test_results",
            Step::PersistToWorkspace(_) => "persist_to_workspace",
            Step::AttachWorkspace(_) => "attach_workspace",
            Step::AddSshKeys(_) => "add_ssh_keys",
            Step::Conditional(step) => match step.kind {
                ConditionKind::When => "when",
                ConditionKind::Unless => "unless",
            },
            Step::StepsParameter(_) => "steps",
        }
    }

    /// Span of the step's keyword or invoked name
    pub fn name_span(&self) -> Span {
        match self {
            Step::Named(step) => step.name_span,
            Step::Run(step) => step.name_span,
            Step::Checkout(step) => step.name_span,
            Step::SetupRemoteDocker(step) => step.name_span,
            Step::SaveCache(step) => step.name_span,
            Step::RestoreCache(step) => step.name_span,
            Step::StoreArtifacts(step) => step.name_span,
            Step::StoreTestResults(step) => step.name_span,
            Step::PersistToWorkspace(step) => step.name_span,
            Step::AttachWorkspace(step) => step.name_span,
            Step::AddSshKeys(step) => step.name_span,
            Step::Conditional(step) => step.name_span,
            Step::StepsParameter(step) => step.name_span,
        }
    }

    /// Span of the whole list item
    pub fn span(&self) -> Span {
        match self {
            Step::Named(step) => step.span,
            Step::Run(step) => step.span,
            Step::Checkout(step) => step.span,
            Step::SetupRemoteDocker(step) => step.span,
            Step::SaveCache(step) => step.span,
            Step::RestoreCache(step) => step.span,
            Step::StoreArtifacts(step) => step.span,
            Step::StoreTestResults(step) => step.span,
            Step::PersistToWorkspace(step) => step.span,
            Step::AttachWorkspace(step) => step.span,
            Step::AddSshKeys(step) => step.span,
            Step::Conditional(step) => step.span,
            Step::StepsParameter(step) => step.span,
        }
    }

    /// Visit this step and every step nested in `when`/`unless` blocks
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Step)) {
        visit(self);
        if let Step::Conditional(conditional) = self {
            for step in &conditional.steps {
                step.walk(visit);
            }
        }
    }
}

/// Visit every step of a list, nested ones included
pub fn walk_steps<'a>(steps: &'a [Step], visit: &mut dyn FnMut(&'a Step)) {
    for step in steps {
        step.walk(visit);
    }
}

/// `executor:` on a job, by name with optional arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorRef {
    pub name: String,
    pub span: Span,
    pub arguments: Vec<ArgumentValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub name: String,
    pub name_span: Span,
    pub span: Span,
    pub description: Option<String>,
    pub parameters: Parameters,
    pub parameters_span: Option<Span>,
    pub steps: Vec<Step>,
    pub steps_span: Option<Span>,
    pub executor: Option<ExecutorRef>,
    /// `docker:` / `machine:` / `macos:` written directly on the job
    pub inline_executor: Option<Executor>,
    pub resource_class: Option<String>,
    pub parallelism: Option<String>,
    pub shell: Option<String>,
    pub working_directory: Option<String>,
    pub environment: Environment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub name_span: Span,
    pub span: Span,
    pub description: Option<String>,
    pub parameters: Parameters,
    pub parameters_span: Option<Span>,
    pub steps: Vec<Step>,
    pub steps_span: Option<Span>,
}

/// Fields shared by every executor kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorBase {
    pub name: String,
    pub name_span: Span,
    pub span: Span,
    pub parameters: Parameters,
    pub parameters_span: Option<Span>,
    pub resource_class: Option<String>,
    pub shell: Option<String>,
    pub working_directory: Option<String>,
    pub environment: Environment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerImage {
    pub image: String,
    pub span: Span,
    pub name: Option<String>,
    pub environment: Environment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Executor {
    Docker {
        base: ExecutorBase,
        images: Vec<DockerImage>,
    },
    Machine {
        base: ExecutorBase,
        image: Option<String>,
        /// Written as the deprecated `machine: true`
        legacy_true: bool,
        docker_layer_caching: bool,
    },
    MacOs {
        base: ExecutorBase,
        xcode: Option<String>,
    },
    Windows {
        base: ExecutorBase,
        image: Option<String>,
    },
}

impl Executor {
    pub fn base(&self) -> &ExecutorBase {
        match self {
            Executor::Docker { base, .. }
            | Executor::Machine { base, .. }
            | Executor::MacOs { base, .. }
            | Executor::Windows { base, .. } => base,
        }
    }

    pub fn name(&self) -> &str {
        &self.base().name
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Executor::Docker { .. } => "docker",
            Executor::Machine { .. } => "machine",
            Executor::MacOs { .. } => "macos",
            Executor::Windows { .. } => "windows",
        }
    }
}

/// `namespace/name@version`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrbKey {
    pub namespace: String,
    pub name: String,
    pub version: String,
}

impl OrbKey {
    /// Parse a registry reference. A reference without `@version` is refused.
    pub fn parse(reference: &str) -> Result<Self, OrbResolutionError> {
        let reference = reference.trim();
        let (path, version) = match reference.split_once('@') {
            Some((path, version)) if !version.trim().is_empty() => (path, version.trim()),
            Some(_) | None if reference.contains('/') => {
                return Err(OrbResolutionError::MissingVersion(reference.to_string()))
            }
            _ => return Err(OrbResolutionError::InvalidReference(reference.to_string())),
        };

        let (namespace, name) = path
            .split_once('/')
            .filter(|(namespace, name)| is_orb_segment(namespace) && is_orb_segment(name))
            .ok_or_else(|| OrbResolutionError::InvalidReference(reference.to_string()))?;

        if version.contains(char::is_whitespace) {
            return Err(OrbResolutionError::InvalidReference(reference.to_string()));
        }

        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    /// `namespace/name` without the version
    pub fn path(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

fn is_orb_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

impl fmt::Display for OrbKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.namespace, self.name, self.version)
    }
}

/// Newer published versions of an orb, relative to the pinned one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionInfo {
    pub latest: Option<String>,
    pub latest_minor: Option<String>,
    pub latest_patch: Option<String>,
}

/// Commands, jobs and executors an orb provides, keyed without the alias
/// prefix. Spans point into `source` for registry orbs and into the
/// enclosing document for inline orbs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrbInfo {
    pub key: Option<OrbKey>,
    pub description: Option<String>,
    pub commands: IndexMap<String, Command>,
    pub jobs: IndexMap<String, Job>,
    pub executors: IndexMap<String, Executor>,
    pub source: String,
    pub version_info: Option<VersionInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrbReference {
    /// Declared as a mapping in the same file
    Inline,
    Registry(OrbKey),
    /// A reference that could not be parsed, with the reason
    Invalid(OrbResolutionError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orb {
    pub name: String,
    pub name_span: Span,
    pub span: Span,
    pub reference: OrbReference,
    pub version_span: Option<Span>,
    pub info: Option<Arc<OrbInfo>>,
}

impl Orb {
    pub fn key(&self) -> Option<&OrbKey> {
        match &self.reference {
            OrbReference::Registry(key) => Some(key),
            _ => None,
        }
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.info.as_ref().is_some_and(|info| info.commands.contains_key(name))
    }

    pub fn has_job(&self, name: &str) -> bool {
        self.info.as_ref().is_some_and(|info| info.jobs.contains_key(name))
    }

    pub fn has_executor(&self, name: &str) -> bool {
        self.info.as_ref().is_some_and(|info| info.executors.contains_key(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterRule {
    pub only: Vec<String>,
    pub ignore: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters {
    pub branches: FilterRule,
    pub tags: FilterRule,
}

/// A job invoked from a workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRef {
    pub job_name: String,
    pub job_name_span: Span,
    /// `name:` override, defaults to the job name. `requires` entries match it.
    pub step_name: String,
    pub step_name_span: Option<Span>,
    pub span: Span,
    pub job_type: Option<String>,
    pub requires: Vec<Requirement>,
    pub filters: Option<Filters>,
    pub contexts: Vec<String>,
    pub arguments: Vec<ArgumentValue>,
    pub matrix: IndexMap<String, Vec<String>>,
    pub pre_steps: Vec<Step>,
    pub post_steps: Vec<Step>,
}

impl JobRef {
    pub fn is_approval(&self) -> bool {
        self.job_type.as_deref() == Some("approval")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workflow {
    pub name: String,
    pub name_span: Span,
    pub span: Span,
    pub jobs: Vec<JobRef>,
    pub jobs_span: Option<Span>,
    pub has_triggers: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub name: String,
    /// The anchor name after `&`
    pub definition: Span,
    /// The node carrying the anchor
    pub value: Span,
    /// Each `*name` after the definition, in document order
    pub aliases: Vec<Span>,
}

/// YAML anchors of a document in definition order. A redefined name gets a
/// new entry; aliases bind to the latest definition before them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorTable {
    entries: Vec<Anchor>,
    latest: HashMap<String, usize>,
}

impl AnchorTable {
    /// Register a definition. Returns `true` if the name was already defined.
    pub fn define(&mut self, name: &str, definition: Span, value: Span) -> bool {
        let redefined = self.latest.contains_key(name);
        self.entries.push(Anchor {
            name: name.to_string(),
            definition,
            value,
            aliases: Vec::new(),
        });
        self.latest.insert(name.to_string(), self.entries.len() - 1);
        redefined
    }

    /// Record an alias. Returns `false` if the name is not defined yet.
    pub fn add_alias(&mut self, name: &str, span: Span) -> bool {
        match self.latest.get(name) {
            Some(&index) => {
                self.entries[index].aliases.push(span);
                true
            }
            None => false,
        }
    }

    /// The latest definition of `name`
    pub fn get(&self, name: &str) -> Option<&Anchor> {
        self.latest.get(name).map(|&index| &self.entries[index])
    }

    /// The anchor whose definition or one of whose aliases covers `offset`
    pub fn at(&self, offset: usize) -> Option<&Anchor> {
        self.entries.iter().find(|anchor| {
            anchor.definition.contains(offset)
                || anchor.aliases.iter().any(|alias| alias.contains(offset))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Anchor> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_config_version_parse() {
        assert_eq!(ConfigVersion::parse("2.1"), Some(ConfigVersion::V2_1));
        assert_eq!(
            ConfigVersion::parse("2"),
            Some(ConfigVersion { major: 2, minor: 0 })
        );
        assert!(ConfigVersion::parse("two").is_none());
        assert!(ConfigVersion::parse("2.0") < Some(ConfigVersion::V2_1));
    }

    #[test]
    fn test_supported_versions() {
        assert!(ConfigVersion::V2_0.is_supported());
        assert!(ConfigVersion::V2_1.is_supported());
        assert!(!ConfigVersion { major: 3, minor: 0 }.is_supported());
        assert!(!ConfigVersion { major: 2, minor: 5 }.is_supported());
        assert!(!ConfigVersion { major: 1, minor: 0 }.is_supported());
    }

    #[test]
    fn test_orb_key_parse() {
        let key = OrbKey::parse("circleci/node@5.1.0").unwrap();
        assert_eq!(key.namespace, "circleci");
        assert_eq!(key.name, "node");
        assert_eq!(key.version, "5.1.0");
        assert_eq!(key.to_string(), "circleci/node@5.1.0");
        assert_eq!(key.path(), "circleci/node");
    }

    #[test]
    fn test_orb_key_rejects_bad_references() {
        assert_matches!(
            OrbKey::parse("circleci/node"),
            Err(OrbResolutionError::MissingVersion(_))
        );
        assert_matches!(
            OrbKey::parse("circleci/node@"),
            Err(OrbResolutionError::MissingVersion(_))
        );
        assert_matches!(
            OrbKey::parse("node@1.0.0"),
            Err(OrbResolutionError::InvalidReference(_))
        );
        assert_matches!(
            OrbKey::parse("just-text"),
            Err(OrbResolutionError::InvalidReference(_))
        );
    }

    #[test]
    fn test_anchor_table_redefinition() {
        let mut table = AnchorTable::default();
        assert!(!table.define("a", Span::new(1, 2), Span::new(0, 5)));
        assert!(table.add_alias("a", Span::new(10, 11)));
        assert!(table.define("a", Span::new(20, 21), Span::new(19, 25)));
        assert!(table.add_alias("a", Span::new(30, 31)));
        assert!(!table.add_alias("b", Span::new(40, 41)));

        let anchors: Vec<_> = table.iter().collect();
        assert_eq!(anchors.len(), 2);
        assert_eq!(anchors[0].aliases, vec![Span::new(10, 11)]);
        assert_eq!(anchors[1].aliases, vec![Span::new(30, 31)]);
        assert_eq!(table.at(30).map(|a| a.definition), Some(Span::new(20, 21)));
    }
}
