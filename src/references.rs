//! Declaration and usage queries over a built [`Document`]
//!
//! A cursor offset is resolved to a [`Symbol`], trying anchors first, then
//! parameter interpolations, then the section the offset falls in. Each
//! symbol has at most one declaration and any number of usages.

use crate::document::{walk_steps, Document, JobRef, OrbInfo, Parameters, Step};
use crate::parser::{find_interpolations, Interpolation, InterpolationScope};
use crate::position::Span;

/// Entity that declares a parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Owner {
    Job(String),
    Command(String),
    Executor(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Symbol {
    /// Local job or `alias/job` of an orb
    Job(String),
    Command(String),
    Executor(String),
    /// Orb alias
    Orb(String),
    /// `owner: None` is a pipeline parameter
    Parameter { owner: Option<Owner>, name: String },
    /// Identified by its definition since anchors may be redefined
    Anchor { name: String, definition: Span },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolReferences {
    pub declaration: Option<Span>,
    /// Ordered by position
    pub usages: Vec<Span>,
}

pub struct ReferenceIndex<'a> {
    document: &'a Document,
    interpolations: Vec<Interpolation>,
}

impl<'a> ReferenceIndex<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self {
            document,
            interpolations: find_interpolations(&document.content, 0),
        }
    }

    pub fn symbol_at(&self, offset: usize) -> Option<Symbol> {
        if let Some(anchor) = self.document.anchors.at(offset) {
            return Some(Symbol::Anchor {
                name: anchor.name.clone(),
                definition: anchor.definition,
            });
        }

        if let Some(interpolation) = self
            .interpolations
            .iter()
            .find(|interpolation| interpolation.span.contains(offset))
        {
            return self.interpolation_symbol(interpolation, offset);
        }

        let sections = &self.document.sections;
        let within = |span: Option<Span>| span.is_some_and(|span| span.contains(offset));

        if within(sections.workflows) {
            return self.workflows_symbol_at(offset);
        }
        if within(sections.jobs) {
            return self.jobs_symbol_at(offset);
        }
        if within(sections.commands) {
            return self.commands_symbol_at(offset);
        }
        if within(sections.executors) {
            return self.executors_symbol_at(offset);
        }
        if within(sections.orbs) {
            return self.orbs_symbol_at(offset);
        }
        if within(sections.parameters) {
            return parameter_at(&self.document.pipeline_parameters, offset, None);
        }

        None
    }

    pub fn references(&self, symbol: &Symbol) -> SymbolReferences {
        let mut references = match symbol {
            Symbol::Job(name) => SymbolReferences {
                declaration: self.job_declaration(name),
                usages: self
                    .job_refs()
                    .filter(|job_ref| &job_ref.job_name == name)
                    .map(|job_ref| job_ref.job_name_span)
                    .collect(),
            },
            Symbol::Command(name) => SymbolReferences {
                declaration: self.command_declaration(name),
                usages: self.named_steps(name).into_iter().map(|(span, _)| span).collect(),
            },
            Symbol::Executor(name) => SymbolReferences {
                declaration: self.executor_declaration(name),
                usages: self
                    .document
                    .jobs
                    .values()
                    .filter_map(|job| job.executor.as_ref())
                    .filter(|executor| &executor.name == name)
                    .map(|executor| executor.span)
                    .collect(),
            },
            Symbol::Orb(alias) => SymbolReferences {
                declaration: self.document.orbs.get(alias).map(|orb| orb.name_span),
                usages: self.orb_usages(alias),
            },
            Symbol::Parameter { owner, name } => self.parameter_references(owner.as_ref(), name),
            Symbol::Anchor { name, definition } => SymbolReferences {
                declaration: Some(*definition),
                usages: self
                    .document
                    .anchors
                    .iter()
                    .find(|anchor| &anchor.name == name && anchor.definition == *definition)
                    .map(|anchor| anchor.aliases.clone())
                    .unwrap_or_default(),
            },
        };

        references.usages.sort_by_key(|span| (span.start, span.end));
        references.usages.dedup();
        references
    }

    pub fn lookup_at(&self, offset: usize) -> Option<(Symbol, SymbolReferences)> {
        let symbol = self.symbol_at(offset)?;
        let references = self.references(&symbol);
        Some((symbol, references))
    }

    /// Declaration of the symbol under `offset`, empty when unresolved
    pub fn definition_at(&self, offset: usize) -> Vec<Span> {
        self.lookup_at(offset)
            .and_then(|(_, references)| references.declaration)
            .into_iter()
            .collect()
    }

    /// Usages of the symbol under `offset`, empty when unresolved
    pub fn references_at(&self, offset: usize) -> Vec<Span> {
        self.lookup_at(offset)
            .map(|(_, references)| references.usages)
            .unwrap_or_default()
    }

    fn interpolation_symbol(&self, interpolation: &Interpolation, offset: usize) -> Option<Symbol> {
        let name = interpolation.name.clone();
        match interpolation.scope {
            InterpolationScope::Pipeline => Some(Symbol::Parameter { owner: None, name }),
            InterpolationScope::Local => {
                let owner = self.owner_at(offset)?;
                Some(Symbol::Parameter {
                    owner: Some(owner),
                    name,
                })
            }
        }
    }

    /// Job, command or executor whose declaration covers `offset`
    fn owner_at(&self, offset: usize) -> Option<Owner> {
        let document = self.document;
        if let Some(job) = document.jobs.values().find(|job| job.span.contains(offset)) {
            return Some(Owner::Job(job.name.clone()));
        }
        if let Some(command) = document
            .commands
            .values()
            .find(|command| command.span.contains(offset))
        {
            return Some(Owner::Command(command.name.clone()));
        }
        document
            .executors
            .values()
            .find(|executor| executor.base().span.contains(offset))
            .map(|executor| Owner::Executor(executor.name().to_string()))
    }

    fn workflows_symbol_at(&self, offset: usize) -> Option<Symbol> {
        for workflow in &self.document.workflows {
            if !workflow.span.contains(offset) {
                continue;
            }
            for job_ref in &workflow.jobs {
                if !job_ref.span.contains(offset) {
                    continue;
                }
                if job_ref.job_name_span.contains(offset) {
                    return Some(self.qualified(&job_ref.job_name, job_ref.job_name_span, offset, Symbol::Job));
                }
                if let Some(requirement) = job_ref
                    .requires
                    .iter()
                    .find(|requirement| requirement.span.contains(offset))
                {
                    return workflow
                        .jobs
                        .iter()
                        .find(|other| other.step_name == requirement.name)
                        .map(|other| Symbol::Job(other.job_name.clone()));
                }
                if let Some(argument) = job_ref
                    .arguments
                    .iter()
                    .find(|argument| argument.name_span.contains(offset))
                {
                    return Some(Symbol::Parameter {
                        owner: Some(Owner::Job(job_ref.job_name.clone())),
                        name: argument.name.clone(),
                    });
                }
                return self
                    .step_symbol_at(&job_ref.pre_steps, offset)
                    .or_else(|| self.step_symbol_at(&job_ref.post_steps, offset));
            }
        }
        None
    }

    fn jobs_symbol_at(&self, offset: usize) -> Option<Symbol> {
        let job = self
            .document
            .jobs
            .values()
            .find(|job| job.span.contains(offset))?;

        if job.name_span.contains(offset) {
            return Some(Symbol::Job(job.name.clone()));
        }
        if let Some(symbol) =
            parameter_at(&job.parameters, offset, Some(Owner::Job(job.name.clone())))
        {
            return Some(symbol);
        }
        if let Some(executor) = job.executor.as_ref() {
            if executor.span.contains(offset) {
                return Some(self.qualified(&executor.name, executor.span, offset, Symbol::Executor));
            }
            if let Some(argument) = executor
                .arguments
                .iter()
                .find(|argument| argument.name_span.contains(offset))
            {
                return Some(Symbol::Parameter {
                    owner: Some(Owner::Executor(executor.name.clone())),
                    name: argument.name.clone(),
                });
            }
        }
        self.step_symbol_at(&job.steps, offset)
    }

    fn commands_symbol_at(&self, offset: usize) -> Option<Symbol> {
        let command = self
            .document
            .commands
            .values()
            .find(|command| command.span.contains(offset))?;

        if command.name_span.contains(offset) {
            return Some(Symbol::Command(command.name.clone()));
        }
        parameter_at(
            &command.parameters,
            offset,
            Some(Owner::Command(command.name.clone())),
        )
        .or_else(|| self.step_symbol_at(&command.steps, offset))
    }

    fn executors_symbol_at(&self, offset: usize) -> Option<Symbol> {
        let executor = self
            .document
            .executors
            .values()
            .find(|executor| executor.base().span.contains(offset))?;
        let base = executor.base();

        if base.name_span.contains(offset) {
            return Some(Symbol::Executor(base.name.clone()));
        }
        parameter_at(
            &base.parameters,
            offset,
            Some(Owner::Executor(base.name.clone())),
        )
    }

    fn orbs_symbol_at(&self, offset: usize) -> Option<Symbol> {
        let orb = self
            .document
            .orbs
            .values()
            .find(|orb| orb.span.contains(offset))?;

        if orb.name_span.contains(offset) {
            return Some(Symbol::Orb(orb.name.clone()));
        }

        // Entities of an inline orb, addressed as `alias/entity`
        let info = orb.info.as_ref().filter(|_| orb.key().is_none())?;
        let qualify = |name: &str| format!("{}/{}", orb.name, name);
        if let Some(command) = info.commands.values().find(|c| c.name_span.contains(offset)) {
            return Some(Symbol::Command(qualify(&command.name)));
        }
        if let Some(job) = info.jobs.values().find(|j| j.name_span.contains(offset)) {
            return Some(Symbol::Job(qualify(&job.name)));
        }
        info.executors
            .values()
            .find(|e| e.base().name_span.contains(offset))
            .map(|executor| Symbol::Executor(qualify(executor.name())))
    }

    fn step_symbol_at(&self, steps: &[Step], offset: usize) -> Option<Symbol> {
        let mut found = None;
        walk_steps(steps, &mut |step| {
            if found.is_some() {
                return;
            }
            let Step::Named(named) = step else {
                return;
            };
            if named.name_span.contains(offset) {
                found = Some(self.qualified(&named.name, named.name_span, offset, Symbol::Command));
            } else if let Some(argument) = named
                .arguments
                .iter()
                .find(|argument| argument.name_span.contains(offset))
            {
                found = Some(Symbol::Parameter {
                    owner: Some(Owner::Command(named.name.clone())),
                    name: argument.name.clone(),
                });
            }
        });
        found
    }

    /// `kind(name)`, or the orb itself when `offset` is on the alias of an
    /// `alias/entity` reference
    fn qualified(&self, name: &str, span: Span, offset: usize, kind: fn(String) -> Symbol) -> Symbol {
        if let Some((alias, _)) = name.split_once('/') {
            if self.document.orbs.contains_key(alias) {
                let alias_span = self.alias_span(span, alias);
                if (alias_span.start..alias_span.end).contains(&offset) {
                    return Symbol::Orb(alias.to_string());
                }
            }
        }
        kind(name.to_string())
    }

    /// The `alias` part of a reference span, skipping an opening quote
    fn alias_span(&self, span: Span, alias: &str) -> Span {
        let raw = span.slice(&self.document.content);
        let quote = raw.len() - raw.trim_start_matches(['"', '\'']).len();
        let start = span.start + quote;
        Span::new(start, start + alias.len())
    }

    fn job_refs(&self) -> impl Iterator<Item = &'a JobRef> {
        self.document
            .workflows
            .iter()
            .flat_map(|workflow| workflow.jobs.iter())
    }

    /// Named steps called `name`: their name span and argument name spans
    fn named_steps(&self, name: &str) -> Vec<(Span, Vec<(String, Span)>)> {
        let mut found = Vec::new();
        let mut visit = |step: &Step| {
            if let Step::Named(named) = step {
                if named.name == name {
                    let arguments = named
                        .arguments
                        .iter()
                        .map(|argument| (argument.name.clone(), argument.name_span))
                        .collect();
                    found.push((named.name_span, arguments));
                }
            }
        };

        for job in self.document.jobs.values() {
            walk_steps(&job.steps, &mut visit);
        }
        for command in self.document.commands.values() {
            walk_steps(&command.steps, &mut visit);
        }
        for job_ref in self.job_refs() {
            walk_steps(&job_ref.pre_steps, &mut visit);
            walk_steps(&job_ref.post_steps, &mut visit);
        }
        found
    }

    fn orb_usages(&self, alias: &str) -> Vec<Span> {
        let prefix = format!("{}/", alias);
        let mut usages: Vec<Span> = self
            .job_refs()
            .filter(|job_ref| job_ref.job_name.starts_with(&prefix))
            .map(|job_ref| job_ref.job_name_span)
            .collect();

        usages.extend(
            self.document
                .jobs
                .values()
                .filter_map(|job| job.executor.as_ref())
                .filter(|executor| executor.name.starts_with(&prefix))
                .map(|executor| executor.span),
        );

        let mut steps = Vec::new();
        let mut visit = |step: &Step| {
            if let Step::Named(named) = step {
                if named.name.starts_with(&prefix) {
                    steps.push(named.name_span);
                }
            }
        };
        for job in self.document.jobs.values() {
            walk_steps(&job.steps, &mut visit);
        }
        for command in self.document.commands.values() {
            walk_steps(&command.steps, &mut visit);
        }
        for job_ref in self.job_refs() {
            walk_steps(&job_ref.pre_steps, &mut visit);
            walk_steps(&job_ref.post_steps, &mut visit);
        }
        usages.extend(steps);

        usages
            .into_iter()
            .map(|span| self.alias_span(span, alias))
            .collect()
    }

    fn job_declaration(&self, name: &str) -> Option<Span> {
        if let Some(job) = self.document.jobs.get(name) {
            return Some(job.name_span);
        }
        self.inline_orb_entity(name, |info, entity| info.jobs.get(entity).map(|j| j.name_span))
    }

    fn command_declaration(&self, name: &str) -> Option<Span> {
        if let Some(command) = self.document.commands.get(name) {
            return Some(command.name_span);
        }
        self.inline_orb_entity(name, |info, entity| {
            info.commands.get(entity).map(|c| c.name_span)
        })
    }

    fn executor_declaration(&self, name: &str) -> Option<Span> {
        if let Some(executor) = self.document.executors.get(name) {
            return Some(executor.base().name_span);
        }
        self.inline_orb_entity(name, |info, entity| {
            info.executors.get(entity).map(|e| e.base().name_span)
        })
    }

    /// Spans of registry orbs point into the orb source, so only inline orbs
    /// yield a declaration in this document.
    fn inline_orb_entity(
        &self,
        name: &str,
        find: impl Fn(&OrbInfo, &str) -> Option<Span>,
    ) -> Option<Span> {
        let (orb, entity) = self.document.orb_for(name)?;
        if orb.key().is_some() {
            return None;
        }
        orb.info.as_deref().and_then(|info| find(info, entity))
    }

    fn parameter_references(&self, owner: Option<&Owner>, name: &str) -> SymbolReferences {
        let document = self.document;

        let Some(owner) = owner else {
            return SymbolReferences {
                declaration: document.pipeline_parameters.get(name).map(|p| p.name_span),
                usages: self.interpolations_of(InterpolationScope::Pipeline, name, None),
            };
        };

        let (declaration, scope, mut usages): (_, _, Vec<_>) = match owner {
            Owner::Job(job) => {
                let declared = document.jobs.get(job);
                let arguments = self
                    .job_refs()
                    .filter(|job_ref| &job_ref.job_name == job)
                    .flat_map(|job_ref| job_ref.arguments.iter())
                    .filter(|argument| argument.name == name)
                    .map(|argument| argument.name_span)
                    .collect();
                (
                    declared.and_then(|job| job.parameters.get(name)).map(|p| p.name_span),
                    declared.map(|job| job.span),
                    arguments,
                )
            }
            Owner::Command(command) => {
                let declared = document.commands.get(command);
                let arguments = self
                    .named_steps(command)
                    .into_iter()
                    .flat_map(|(_, arguments)| arguments)
                    .filter(|(argument, _)| argument == name)
                    .map(|(_, span)| span)
                    .collect();
                (
                    declared
                        .and_then(|command| command.parameters.get(name))
                        .map(|p| p.name_span),
                    declared.map(|command| command.span),
                    arguments,
                )
            }
            Owner::Executor(executor) => {
                let declared = document.executors.get(executor).map(|e| e.base());
                let arguments = document
                    .jobs
                    .values()
                    .filter_map(|job| job.executor.as_ref())
                    .filter(|executor_ref| &executor_ref.name == executor)
                    .flat_map(|executor_ref| executor_ref.arguments.iter())
                    .filter(|argument| argument.name == name)
                    .map(|argument| argument.name_span)
                    .collect();
                (
                    declared
                        .and_then(|base| base.parameters.get(name))
                        .map(|p| p.name_span),
                    declared.map(|base| base.span),
                    arguments,
                )
            }
        };

        if let Some(scope) = scope {
            usages.extend(self.interpolations_of(InterpolationScope::Local, name, Some(scope)));
        }

        SymbolReferences { declaration, usages }
    }

    fn interpolations_of(
        &self,
        scope: InterpolationScope,
        name: &str,
        within: Option<Span>,
    ) -> Vec<Span> {
        self.interpolations
            .iter()
            .filter(|interpolation| interpolation.scope == scope && interpolation.name == name)
            .filter(|interpolation| within.map_or(true, |span| span.contains_span(interpolation.span)))
            .map(|interpolation| interpolation.name_span)
            .collect()
    }
}

fn parameter_at(parameters: &Parameters, offset: usize, owner: Option<Owner>) -> Option<Symbol> {
    parameters
        .values()
        .find(|parameter| parameter.name_span.contains(offset))
        .map(|parameter| Symbol::Parameter {
            owner,
            name: parameter.name.clone(),
        })
}
