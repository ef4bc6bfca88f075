//! Jobs, commands, executors and parameters

use indexmap::IndexMap;
use tree_sitter::Node;

use crate::diagnostics::DiagnosticCode;
use crate::document::{
    ArgumentValue, Command, DockerImage, Environment, Executor, ExecutorBase, ExecutorRef, Job,
    Parameter, ParameterType, Parameters,
};
use crate::parser::syntax::{scalar_span, span_of};

use super::{Builder, Entry};

const EXECUTOR_KINDS: [&str; 4] = ["docker", "machine", "macos", "windows"];

impl<'t> Builder<'t> {
    pub(crate) fn build_jobs(&mut self, node: Node<'t>) -> IndexMap<String, Job> {
        let mut jobs: IndexMap<String, Job> = IndexMap::new();
        for entry in self.entries(node) {
            let job = self.build_job(&entry);
            self.insert_unique(&mut jobs, entry.key.clone(), entry.key_span, job, |job: &Job| {
                job.name_span
            });
        }
        jobs
    }

    fn build_job(&mut self, entry: &Entry<'t>) -> Job {
        let mut job = Job {
            name: entry.key.clone(),
            name_span: entry.key_span,
            span: entry.span,
            description: None,
            parameters: Parameters::new(),
            parameters_span: None,
            steps: Vec::new(),
            steps_span: None,
            executor: None,
            inline_executor: None,
            resource_class: None,
            parallelism: None,
            shell: None,
            working_directory: None,
            environment: Environment::new(),
        };

        let Some(body) = entry.value else {
            return job;
        };
        let fields = self.entries(body);

        for field in &fields {
            match field.key.as_str() {
                "description" => job.description = self.scalar_of(field),
                "parameters" => {
                    job.parameters_span = Some(field.section_span());
                    if let Some(value) = field.value {
                        job.parameters = self.build_parameters(value);
                    }
                }
                "steps" => {
                    job.steps_span = Some(field.section_span());
                    if let Some(value) = field.value {
                        job.steps = self.build_steps(value, 0);
                    }
                }
                "executor" => job.executor = field.value.and_then(|v| self.build_executor_ref(v)),
                "resource_class" => job.resource_class = self.scalar_of(field),
                "parallelism" => job.parallelism = self.scalar_of(field),
                "shell" => job.shell = self.scalar_of(field),
                "working_directory" => job.working_directory = self.scalar_of(field),
                "environment" => job.environment = self.environment_of(field),
                _ => {}
            }
        }

        if fields
            .iter()
            .any(|field| EXECUTOR_KINDS.contains(&field.key.as_str()))
        {
            job.inline_executor = self.build_executor(entry, true);
        }

        job
    }

    pub(crate) fn build_commands(&mut self, node: Node<'t>) -> IndexMap<String, Command> {
        let mut commands: IndexMap<String, Command> = IndexMap::new();
        for entry in self.entries(node) {
            let command = self.build_command(&entry);
            self.insert_unique(
                &mut commands,
                entry.key.clone(),
                entry.key_span,
                command,
                |command: &Command| command.name_span,
            );
        }
        commands
    }

    fn build_command(&mut self, entry: &Entry<'t>) -> Command {
        let mut command = Command {
            name: entry.key.clone(),
            name_span: entry.key_span,
            span: entry.span,
            description: None,
            parameters: Parameters::new(),
            parameters_span: None,
            steps: Vec::new(),
            steps_span: None,
        };

        let Some(body) = entry.value else {
            return command;
        };

        for field in self.entries(body) {
            match field.key.as_str() {
                "description" => command.description = self.scalar_of(&field),
                "parameters" => {
                    command.parameters_span = Some(field.section_span());
                    if let Some(value) = field.value {
                        command.parameters = self.build_parameters(value);
                    }
                }
                "steps" => {
                    command.steps_span = Some(field.section_span());
                    if let Some(value) = field.value {
                        command.steps = self.build_steps(value, 0);
                    }
                }
                _ => {}
            }
        }

        command
    }

    pub(crate) fn build_executors(&mut self, node: Node<'t>) -> IndexMap<String, Executor> {
        let mut executors: IndexMap<String, Executor> = IndexMap::new();
        for entry in self.entries(node) {
            match self.build_executor(&entry, false) {
                Some(executor) => self.insert_unique(
                    &mut executors,
                    entry.key.clone(),
                    entry.key_span,
                    executor,
                    |executor: &Executor| executor.base().name_span,
                ),
                None => self.collector.add_error(
                    entry.key_span,
                    DiagnosticCode::InvalidExecutor,
                    format!(
                        "Executor `{}` must declare docker, machine, macos or windows",
                        entry.key
                    ),
                ),
            }
        }
        executors
    }

    /// Build an executor from a mapping holding one of the executor kinds.
    /// Shared by the `executors:` section and jobs declaring their executor
    /// inline; an inline executor's `parameters` belong to the job.
    pub(crate) fn build_executor(&mut self, entry: &Entry<'t>, inline: bool) -> Option<Executor> {
        let body = entry.value?;
        let mut base = ExecutorBase {
            name: entry.key.clone(),
            name_span: entry.key_span,
            span: entry.span,
            ..Default::default()
        };
        let mut kind: Option<&Entry<'t>> = None;

        let fields = self.entries(body);
        for field in &fields {
            match field.key.as_str() {
                "resource_class" => base.resource_class = self.scalar_of(field),
                "shell" => base.shell = self.scalar_of(field),
                "working_directory" => base.working_directory = self.scalar_of(field),
                "environment" => base.environment = self.environment_of(field),
                "parameters" if !inline => {
                    base.parameters_span = Some(field.section_span());
                    if let Some(value) = field.value {
                        base.parameters = self.build_parameters(value);
                    }
                }
                key if EXECUTOR_KINDS.contains(&key) && kind.is_none() => kind = Some(field),
                _ => {}
            }
        }

        let kind = kind?;
        let executor = match kind.key.as_str() {
            "docker" => Executor::Docker {
                base,
                images: kind
                    .value
                    .map(|value| self.docker_images(value))
                    .unwrap_or_default(),
            },
            "machine" => self.build_machine(base, kind),
            "macos" => {
                let xcode = kind.value.and_then(|value| {
                    self.entries(value)
                        .iter()
                        .find(|field| field.key == "xcode")
                        .and_then(|field| self.scalar_of(field))
                });
                Executor::MacOs { base, xcode }
            }
            _ => {
                let image = kind.value.and_then(|value| self.field_scalar(value, "image"));
                Executor::Windows { base, image }
            }
        };

        Some(executor)
    }

    fn build_machine(&mut self, base: ExecutorBase, kind: &Entry<'t>) -> Executor {
        let mut image = None;
        let mut legacy_true = false;
        let mut docker_layer_caching = false;

        if let Some(value) = kind.value {
            if self.is_mapping(value) {
                for field in self.entries(value) {
                    match field.key.as_str() {
                        "image" => image = self.scalar_of(&field),
                        "docker_layer_caching" => docker_layer_caching = self.bool_of(&field),
                        _ => {}
                    }
                }
            } else if self.scalar(value).as_deref() == Some("true") {
                legacy_true = true;
                self.collector.add_warning(
                    span_of(value),
                    DiagnosticCode::Deprecated,
                    "`machine: true` is deprecated, specify a machine image instead",
                );
            }
        }

        Executor::Machine {
            base,
            image,
            legacy_true,
            docker_layer_caching,
        }
    }

    fn docker_images(&self, node: Node<'t>) -> Vec<DockerImage> {
        self.items(node)
            .into_iter()
            .filter_map(|item| {
                let fields = self.entries(item);
                let image_field = fields.iter().find(|field| field.key == "image")?;
                Some(DockerImage {
                    image: self.scalar_of(image_field).unwrap_or_default(),
                    span: span_of(item),
                    name: fields
                        .iter()
                        .find(|field| field.key == "name")
                        .and_then(|field| self.scalar_of(field)),
                    environment: fields
                        .iter()
                        .find(|field| field.key == "environment")
                        .map(|field| self.environment_of(field))
                        .unwrap_or_default(),
                })
            })
            .collect()
    }

    /// `executor: name` or `executor: { name: ..., arg: ... }`
    fn build_executor_ref(&self, node: Node<'t>) -> Option<ExecutorRef> {
        if let Some(name) = self.scalar(node) {
            return Some(ExecutorRef {
                name,
                span: scalar_span(self.resolve(node)),
                arguments: Vec::new(),
            });
        }

        let fields = self.entries(node);
        let name_field = fields.iter().find(|field| field.key == "name")?;
        let name_node = name_field.value?;

        Some(ExecutorRef {
            name: self.scalar(name_node)?,
            span: scalar_span(self.resolve(name_node)),
            arguments: fields
                .iter()
                .filter(|field| field.key != "name")
                .map(|field| self.argument(field))
                .collect(),
        })
    }

    pub(crate) fn build_parameters(&mut self, node: Node<'t>) -> Parameters {
        let mut parameters = Parameters::new();
        for entry in self.entries(node) {
            let parameter = self.build_parameter(&entry);
            self.insert_unique(
                &mut parameters,
                entry.key.clone(),
                entry.key_span,
                parameter,
                |parameter: &Parameter| parameter.name_span,
            );
        }
        parameters
    }

    fn build_parameter(&mut self, entry: &Entry<'t>) -> Parameter {
        let mut parameter = Parameter {
            name: entry.key.clone(),
            name_span: entry.key_span,
            span: entry.span,
            param_type: ParameterType::Unknown(String::new()),
            type_span: None,
            default: None,
            default_span: None,
            description: None,
        };

        let Some(body) = entry.value else {
            return parameter;
        };

        let mut declared_type = String::new();
        let mut enum_values = Vec::new();

        for field in self.entries(body) {
            match field.key.as_str() {
                "type" => {
                    declared_type = self.scalar_of(&field).unwrap_or_default();
                    parameter.type_span = field.value.map(scalar_span);
                }
                "default" => {
                    parameter.default = self.scalar_of(&field);
                    parameter.default_span = field.value.map(span_of);
                }
                "description" => parameter.description = self.scalar_of(&field),
                "enum" => {
                    enum_values = field
                        .value
                        .map(|value| self.string_list(value))
                        .unwrap_or_default();
                }
                _ => {}
            }
        }

        parameter.param_type = ParameterType::from_declared(&declared_type, enum_values);
        parameter
    }

    /// A `name: value` argument passed to a job, command or executor
    pub(crate) fn argument(&self, entry: &Entry<'t>) -> ArgumentValue {
        ArgumentValue {
            name: entry.key.clone(),
            name_span: entry.key_span,
            value: self.scalar_of(entry),
            value_span: entry.value.map(span_of),
        }
    }

    /// `environment:` as a mapping or as a list of `KEY=value` strings
    pub(crate) fn environment_of(&self, entry: &Entry<'t>) -> Environment {
        let Some(value) = entry.value else {
            return Environment::new();
        };

        if self.is_mapping(value) {
            return self
                .entries(value)
                .iter()
                .map(|field| (field.key.clone(), self.scalar_of(field).unwrap_or_default()))
                .collect();
        }

        self.string_list(value)
            .into_iter()
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (pair, String::new()),
            })
            .collect()
    }

    /// Scalar value of `key` inside a mapping value
    pub(crate) fn field_scalar(&self, node: Node<'t>, key: &str) -> Option<String> {
        self.entries(node)
            .iter()
            .find(|field| field.key == key)
            .and_then(|field| self.scalar_of(field))
    }
}
