//! `steps:` lists

use tree_sitter::Node;

use crate::diagnostics::DiagnosticCode;
use crate::document::{
    AddSshKeysStep, AttachWorkspaceStep, CheckoutStep, ConditionKind, ConditionalStep,
    Environment, NamedStep, PersistToWorkspaceStep, RestoreCacheStep, RunStep, SaveCacheStep,
    SetupRemoteDockerStep, Step, StepsParameterStep, StoreArtifactsStep, StoreTestResultsStep,
};
use crate::parser::expressions::has_interpolation;
use crate::parser::syntax::{as_mapping, mapping_pairs, scalar_span, span_of};
use crate::position::Span;

use super::{Builder, Entry, MAX_DEPTH};

impl<'t> Builder<'t> {
    pub(crate) fn build_steps(&mut self, node: Node<'t>, depth: usize) -> Vec<Step> {
        let resolved = self.resolve(node);
        if let Some(text) = self.scalar(resolved) {
            if has_interpolation(&text) {
                return Vec::new();
            }
            self.collector.add_error(
                span_of(node),
                DiagnosticCode::InvalidStep,
                "Steps must be a list",
            );
            return Vec::new();
        }

        self.items(resolved)
            .into_iter()
            .map(|item| self.build_step(item, depth))
            .collect()
    }

    fn build_step(&mut self, item: Node<'t>, depth: usize) -> Step {
        let span = span_of(item);
        let node = self.resolve(item);

        if let Some(name) = self.scalar(node) {
            let name_span = scalar_span(node);
            return match name.as_str() {
                "checkout" => Step::Checkout(CheckoutStep {
                    name_span,
                    span,
                    path: ".".to_string(),
                }),
                "setup_remote_docker" => Step::SetupRemoteDocker(SetupRemoteDockerStep {
                    name_span,
                    span,
                    docker_layer_caching: false,
                    version: None,
                }),
                "add_ssh_keys" => Step::AddSshKeys(AddSshKeysStep {
                    name_span,
                    span,
                    fingerprints: Vec::new(),
                }),
                _ => Step::Named(NamedStep {
                    name,
                    name_span,
                    span,
                    arguments: Vec::new(),
                }),
            };
        }

        let pair_count = as_mapping(node).map(|m| mapping_pairs(m).len()).unwrap_or(0);
        let entries = self.entries(node);
        let Some(entry) = entries.first() else {
            return self.invalid_step(span, "Invalid step, expected a name or a mapping");
        };
        if pair_count > 1 {
            return self.invalid_step(span, "A step must have exactly one key");
        }

        match entry.key.as_str() {
            "run" => Step::Run(self.build_run(entry, span)),
            "checkout" => Step::Checkout(CheckoutStep {
                name_span: entry.key_span,
                span,
                path: self
                    .field_of(entry, "path")
                    .unwrap_or_else(|| ".".to_string()),
            }),
            "setup_remote_docker" => Step::SetupRemoteDocker(SetupRemoteDockerStep {
                name_span: entry.key_span,
                span,
                docker_layer_caching: self.field_of(entry, "docker_layer_caching").as_deref()
                    == Some("true"),
                version: self.field_of(entry, "version"),
            }),
            "save_cache" => Step::SaveCache(SaveCacheStep {
                name_span: entry.key_span,
                span,
                key: self.field_of(entry, "key"),
                paths: self.list_field_of(entry, "paths"),
                name: self.field_of(entry, "name"),
            }),
            "restore_cache" => {
                let mut keys: Vec<String> = self.field_of(entry, "key").into_iter().collect();
                keys.extend(self.list_field_of(entry, "keys"));
                Step::RestoreCache(RestoreCacheStep {
                    name_span: entry.key_span,
                    span,
                    keys,
                    name: self.field_of(entry, "name"),
                })
            }
            "store_artifacts" => Step::StoreArtifacts(StoreArtifactsStep {
                name_span: entry.key_span,
                span,
                path: self.field_of(entry, "path"),
                destination: self.field_of(entry, "destination"),
            }),
            "store_test_results" => Step::StoreTestResults(StoreTestResultsStep {
                name_span: entry.key_span,
                span,
                path: self.field_of(entry, "path"),
            }),
            "persist_to_workspace" => Step::PersistToWorkspace(PersistToWorkspaceStep {
                name_span: entry.key_span,
                span,
                root: self.field_of(entry, "root"),
                paths: self.list_field_of(entry, "paths"),
            }),
            "attach_workspace" => Step::AttachWorkspace(AttachWorkspaceStep {
                name_span: entry.key_span,
                span,
                at: self.field_of(entry, "at"),
            }),
            "add_ssh_keys" => Step::AddSshKeys(AddSshKeysStep {
                name_span: entry.key_span,
                span,
                fingerprints: self.list_field_of(entry, "fingerprints"),
            }),
            "when" | "unless" => self.build_conditional(entry, span, depth),
            "steps" => match entry.value.and_then(|value| self.scalar(value)) {
                Some(reference) => Step::StepsParameter(StepsParameterStep {
                    name_span: entry.key_span,
                    span,
                    reference,
                    reference_span: entry.value.map(scalar_span),
                }),
                None => self.invalid_step(span, "`steps` expects a steps parameter"),
            },
            _ => Step::Named(NamedStep {
                name: entry.key.clone(),
                name_span: entry.key_span,
                span,
                arguments: entry
                    .value
                    .map(|value| {
                        self.entries(value)
                            .iter()
                            .map(|field| self.argument(field))
                            .collect()
                    })
                    .unwrap_or_default(),
            }),
        }
    }

    fn build_run(&mut self, entry: &Entry<'t>, span: Span) -> RunStep {
        let mut run = RunStep {
            name_span: entry.key_span,
            span,
            raw_command: String::new(),
            command: String::new(),
            command_span: None,
            name: None,
            shell: None,
            background: false,
            working_directory: None,
            no_output_timeout: None,
            when: None,
            environment: Environment::new(),
        };

        let Some(value) = entry.value else {
            return run;
        };

        if let Some(command) = self.scalar(value) {
            run.command = command.trim().to_string();
            run.raw_command = command;
            run.command_span = Some(scalar_span(self.resolve(value)));
            return run;
        }

        for field in self.entries(value) {
            match field.key.as_str() {
                "command" => {
                    let command = self.scalar_of(&field).unwrap_or_default();
                    run.command = command.trim().to_string();
                    run.raw_command = command;
                    run.command_span = field.value.map(scalar_span);
                }
                "name" => run.name = self.scalar_of(&field),
                "shell" => run.shell = self.scalar_of(&field),
                "background" => run.background = self.bool_of(&field),
                "working_directory" => run.working_directory = self.scalar_of(&field),
                "no_output_timeout" => run.no_output_timeout = self.scalar_of(&field),
                "when" => run.when = self.scalar_of(&field),
                "environment" => run.environment = self.environment_of(&field),
                _ => {}
            }
        }

        run
    }

    fn build_conditional(&mut self, entry: &Entry<'t>, span: Span, depth: usize) -> Step {
        if depth >= MAX_DEPTH {
            return self.invalid_step(span, "Steps are nested too deeply");
        }

        let kind = if entry.key == "when" {
            ConditionKind::When
        } else {
            ConditionKind::Unless
        };

        let mut conditional = ConditionalStep {
            kind,
            name_span: entry.key_span,
            span,
            condition_span: None,
            steps: Vec::new(),
        };

        if let Some(value) = entry.value {
            for field in self.entries(value) {
                match field.key.as_str() {
                    "condition" => conditional.condition_span = Some(field.section_span()),
                    "steps" => {
                        if let Some(steps) = field.value {
                            conditional.steps = self.build_steps(steps, depth + 1);
                        }
                    }
                    _ => {}
                }
            }
        }

        Step::Conditional(conditional)
    }

    fn invalid_step(&mut self, span: Span, message: &str) -> Step {
        self.collector
            .add_error(span, DiagnosticCode::InvalidStep, message);
        Step::Named(NamedStep {
            name: String::new(),
            name_span: span,
            span,
            arguments: Vec::new(),
        })
    }

    fn field_of(&self, entry: &Entry<'t>, key: &str) -> Option<String> {
        entry.value.and_then(|value| self.field_scalar(value, key))
    }

    fn list_field_of(&self, entry: &Entry<'t>, key: &str) -> Vec<String> {
        let Some(value) = entry.value else {
            return Vec::new();
        };
        self.entries(value)
            .iter()
            .find(|field| field.key == key)
            .and_then(|field| field.value)
            .map(|node| self.string_list(node))
            .unwrap_or_default()
    }
}
