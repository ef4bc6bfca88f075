//! Document outline: sections, their entities and the entities' parts

use tower_lsp::lsp_types::{DocumentSymbol, SymbolKind};

use crate::document::{
    Document, Executor, JobRef, OrbReference, Parameter, ParameterType, Parameters, Step, Workflow,
};
use crate::position::{LineIndex, Span};

pub fn document_symbols(document: &Document) -> Vec<DocumentSymbol> {
    let builder = SymbolBuilder {
        index: LineIndex::new(&document.content),
    };
    let sections = &document.sections;
    let mut symbols = Vec::new();

    if let (Some(version), Some(span)) = (document.version, sections.version) {
        symbols.push(builder.leaf(format!("Version {}", version), SymbolKind::MODULE, span, span));
    }

    if let Some(span) = sections.orbs {
        let children = document
            .orbs
            .values()
            .map(|orb| {
                let detail = match &orb.reference {
                    OrbReference::Inline => "inline".to_string(),
                    OrbReference::Registry(key) => key.to_string(),
                    OrbReference::Invalid(_) => "invalid reference".to_string(),
                };
                builder
                    .leaf(orb.name.clone(), SymbolKind::FUNCTION, orb.span, orb.name_span)
                    .with_detail(detail)
            })
            .collect();
        symbols.push(builder.list("Orbs", span, children));
    }

    if let Some(span) = sections.commands {
        let children = document
            .commands
            .values()
            .map(|command| {
                let mut children = Vec::new();
                builder.push_parameters(&mut children, &command.parameters, command.parameters_span);
                builder.push_steps(&mut children, "Steps", &command.steps, command.steps_span);
                builder.node(
                    command.name.clone(),
                    SymbolKind::FILE,
                    command.span,
                    command.name_span,
                    children,
                )
            })
            .collect();
        symbols.push(builder.list("Commands", span, children));
    }

    if let Some(span) = sections.jobs {
        let children = document
            .jobs
            .values()
            .map(|job| {
                let mut children = Vec::new();
                builder.push_parameters(&mut children, &job.parameters, job.parameters_span);
                builder.push_steps(&mut children, "Steps", &job.steps, job.steps_span);
                if let Some(executor) = &job.executor {
                    children.push(builder.leaf(
                        format!("Executor: {}", executor.name),
                        SymbolKind::METHOD,
                        executor.span,
                        executor.span,
                    ));
                }
                if let Some(executor) = &job.inline_executor {
                    children.push(builder.executor(executor, executor.kind()));
                }
                builder.node(job.name.clone(), SymbolKind::FILE, job.span, job.name_span, children)
            })
            .collect();
        symbols.push(builder.list("Jobs", span, children));
    }

    if let Some(span) = sections.executors {
        let children = document
            .executors
            .values()
            .map(|executor| builder.executor(executor, executor.name()))
            .collect();
        symbols.push(builder.list("Executors", span, children));
    }

    if let Some(span) = sections.workflows {
        let children = document
            .workflows
            .iter()
            .map(|workflow| builder.workflow(workflow))
            .collect();
        symbols.push(builder.list("Workflows", span, children));
    }

    if let Some(span) = sections.parameters {
        let children = builder.parameters(&document.pipeline_parameters);
        symbols.push(builder.list("Pipeline parameters", span, children));
    }

    symbols
}

struct SymbolBuilder<'a> {
    index: LineIndex<'a>,
}

impl SymbolBuilder<'_> {
    #[allow(deprecated)]
    fn node(
        &self,
        name: String,
        kind: SymbolKind,
        span: Span,
        selection: Span,
        children: Vec<DocumentSymbol>,
    ) -> DocumentSymbol {
        // The selection must lie within the range
        let selection = if span.contains_span(selection) {
            selection
        } else {
            span
        };

        DocumentSymbol {
            // Clients reject empty names
            name: if name.is_empty() { "-".to_string() } else { name },
            detail: None,
            kind,
            tags: None,
            deprecated: None,
            range: self.index.range(span),
            selection_range: self.index.range(selection),
            children: (!children.is_empty()).then_some(children),
        }
    }

    fn leaf(&self, name: String, kind: SymbolKind, span: Span, selection: Span) -> DocumentSymbol {
        self.node(name, kind, span, selection, Vec::new())
    }

    fn list(&self, name: &str, span: Span, children: Vec<DocumentSymbol>) -> DocumentSymbol {
        self.node(name.to_string(), SymbolKind::ARRAY, span, span, children)
    }

    fn parameters(&self, parameters: &Parameters) -> Vec<DocumentSymbol> {
        parameters
            .values()
            .map(|parameter| self.parameter(parameter))
            .collect()
    }

    fn parameter(&self, parameter: &Parameter) -> DocumentSymbol {
        let kind = match parameter.param_type {
            ParameterType::String | ParameterType::EnvVarName => SymbolKind::STRING,
            ParameterType::Boolean => SymbolKind::BOOLEAN,
            ParameterType::Integer => SymbolKind::NUMBER,
            ParameterType::Enum(_) => SymbolKind::ENUM,
            ParameterType::Executor | ParameterType::Steps | ParameterType::Unknown(_) => {
                SymbolKind::PROPERTY
            }
        };
        let symbol = self.leaf(parameter.name.clone(), kind, parameter.span, parameter.name_span);
        match &parameter.default {
            Some(default) => symbol.with_detail(format!("default: {}", default)),
            None => symbol,
        }
    }

    fn push_parameters(
        &self,
        symbols: &mut Vec<DocumentSymbol>,
        parameters: &Parameters,
        span: Option<Span>,
    ) {
        if let Some(span) = span {
            symbols.push(self.node(
                "Parameters".to_string(),
                SymbolKind::ARRAY,
                span,
                span,
                self.parameters(parameters),
            ));
        }
    }

    fn push_steps(
        &self,
        symbols: &mut Vec<DocumentSymbol>,
        name: &str,
        steps: &[Step],
        span: Option<Span>,
    ) {
        let Some(span) = span.or_else(|| covering(steps.iter().map(Step::span))) else {
            return;
        };
        symbols.push(
            self.list(name, span, self.steps(steps))
                .with_detail(format!("{} total", steps.len())),
        );
    }

    fn steps(&self, steps: &[Step]) -> Vec<DocumentSymbol> {
        steps
            .iter()
            .map(|step| {
                let children = match step {
                    Step::Conditional(conditional) => self.steps(&conditional.steps),
                    _ => Vec::new(),
                };
                self.node(
                    step.name().to_string(),
                    SymbolKind::FUNCTION,
                    step.span(),
                    step.name_span(),
                    children,
                )
            })
            .collect()
    }

    fn executor(&self, executor: &Executor, name: &str) -> DocumentSymbol {
        let base = executor.base();
        let mut children = Vec::new();
        self.push_parameters(&mut children, &base.parameters, base.parameters_span);

        if let Executor::Docker { images, .. } = executor {
            children.extend(images.iter().map(|image| {
                self.leaf(image.image.clone(), SymbolKind::VARIABLE, image.span, image.span)
            }));
        }

        self.node(name.to_string(), SymbolKind::METHOD, base.span, base.name_span, children)
            .with_detail(executor.kind().to_string())
    }

    fn workflow(&self, workflow: &Workflow) -> DocumentSymbol {
        let mut children = Vec::new();
        if let Some(span) = workflow.jobs_span {
            let jobs = workflow.jobs.iter().map(|job_ref| self.job_ref(job_ref)).collect();
            children.push(self.list("Jobs", span, jobs));
        }

        let symbol = self.node(
            workflow.name.clone(),
            SymbolKind::STRUCT,
            workflow.span,
            workflow.name_span,
            children,
        );
        if workflow.has_triggers {
            symbol.with_detail("scheduled".to_string())
        } else {
            symbol
        }
    }

    fn job_ref(&self, job_ref: &JobRef) -> DocumentSymbol {
        let mut children = Vec::new();
        if !job_ref.pre_steps.is_empty() {
            self.push_steps(&mut children, "Pre-Steps", &job_ref.pre_steps, None);
        }
        if !job_ref.post_steps.is_empty() {
            self.push_steps(&mut children, "Post-Steps", &job_ref.post_steps, None);
        }

        let symbol = self.node(
            job_ref.step_name.clone(),
            SymbolKind::FILE,
            job_ref.span,
            job_ref.job_name_span,
            children,
        );
        if job_ref.step_name != job_ref.job_name {
            symbol.with_detail(job_ref.job_name.clone())
        } else if job_ref.is_approval() {
            symbol.with_detail("approval".to_string())
        } else {
            symbol
        }
    }
}

/// Smallest span covering every span of `spans`
fn covering(spans: impl Iterator<Item = Span>) -> Option<Span> {
    spans.reduce(|a, b| Span::new(a.start.min(b.start), a.end.max(b.end)))
}

trait WithDetail {
    fn with_detail(self, detail: String) -> Self;
}

impl WithDetail for DocumentSymbol {
    fn with_detail(mut self, detail: String) -> Self {
        self.detail = Some(detail);
        self
    }
}
