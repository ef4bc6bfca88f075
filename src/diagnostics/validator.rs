//! Cross-reference validation of a built document
//!
//! Runs after the builder has collected every declaration. Checks that
//! workflow jobs, requirements, steps and executors name something that
//! exists, that `requires` has no cycles and that anchors are used.

use std::collections::{HashMap, HashSet};

use crate::document::{walk_steps, ConfigVersion, Document, Step, Workflow};
use crate::parser::expressions::has_interpolation;
use crate::schema::is_builtin_step;

use super::collector::{DiagnosticCode, DiagnosticCollector};

/// Validate the references of a document and collect diagnostics
pub fn validate_document(document: &Document, collector: &mut DiagnosticCollector) {
    for workflow in &document.workflows {
        validate_workflow(document, workflow, collector);
    }

    for job in document.jobs.values() {
        if let Some(executor) = &job.executor {
            if !is_known_executor(document, &executor.name) {
                collector.add_error(
                    executor.span,
                    DiagnosticCode::UndefinedExecutor,
                    format!("Cannot find declaration for executor {}", executor.name),
                );
            }
        }
        validate_steps(document, &job.steps, collector);
    }

    for command in document.commands.values() {
        validate_steps(document, &command.steps, collector);
    }

    for anchor in document.anchors.iter() {
        if anchor.aliases.is_empty() {
            collector.add_info(
                anchor.definition,
                DiagnosticCode::UnusedAnchor,
                "Anchor never used",
            );
        }
    }

    if let Some(span) = document.sections.workflows_version {
        if document.is_at_least(ConfigVersion::V2_1) {
            collector.add_warning(
                span,
                DiagnosticCode::Deprecated,
                "Version key is deprecated since 2.1",
            );
        }
    }
}

fn validate_workflow(document: &Document, workflow: &Workflow, collector: &mut DiagnosticCollector) {
    let step_names: HashSet<&str> = workflow
        .jobs
        .iter()
        .map(|job_ref| job_ref.step_name.as_str())
        .collect();

    for job_ref in &workflow.jobs {
        if !job_ref.is_approval() && !is_known_job(document, &job_ref.job_name) {
            collector.add_error(
                job_ref.job_name_span,
                DiagnosticCode::UndefinedJob,
                format!("Cannot find declaration for job {}", job_ref.job_name),
            );
        }

        for requirement in &job_ref.requires {
            if !step_names.contains(requirement.name.as_str()) {
                collector.add_error(
                    requirement.span,
                    DiagnosticCode::UndefinedRequirement,
                    format!(
                        "Cannot find declaration for job reference {}",
                        requirement.name
                    ),
                );
            }
        }

        validate_steps(document, &job_ref.pre_steps, collector);
        validate_steps(document, &job_ref.post_steps, collector);
    }

    for index in jobs_in_cycles(workflow) {
        let job_ref = &workflow.jobs[index];
        collector.add_error(
            job_ref.step_name_span.unwrap_or(job_ref.job_name_span),
            DiagnosticCode::JobCycle,
            format!("The job `{}` is part of a cycle", job_ref.step_name),
        );
    }
}

fn is_known_job(document: &Document, name: &str) -> bool {
    document.has_job(name)
        || document.is_unresolved_orb_reference(name)
        || document
            .orb_for(name)
            .is_some_and(|(orb, entity)| orb.has_command(entity))
        || has_interpolation(name)
}

fn is_known_executor(document: &Document, name: &str) -> bool {
    document.has_executor(name)
        || document.is_unresolved_orb_reference(name)
        || has_interpolation(name)
}

fn validate_steps(document: &Document, steps: &[Step], collector: &mut DiagnosticCollector) {
    walk_steps(steps, &mut |step| {
        let Step::Named(named) = step else {
            return;
        };
        // Invalid step shapes are already reported by the builder.
        if named.name.is_empty() {
            return;
        }
        if is_builtin_step(&named.name)
            || document.has_command(&named.name)
            || document.is_unresolved_orb_reference(&named.name)
            || has_interpolation(&named.name)
        {
            return;
        }
        collector.add_error(
            named.name_span,
            DiagnosticCode::UndefinedCommand,
            format!("Cannot find declaration for command {}", named.name),
        );
    });
}

/// Indices of the job references of `workflow` that sit on a `requires`
/// cycle, in declaration order.
fn jobs_in_cycles(workflow: &Workflow) -> Vec<usize> {
    let by_name: HashMap<&str, usize> = workflow
        .jobs
        .iter()
        .enumerate()
        .map(|(index, job_ref)| (job_ref.step_name.as_str(), index))
        .collect();

    let edges: Vec<Vec<usize>> = workflow
        .jobs
        .iter()
        .map(|job_ref| {
            job_ref
                .requires
                .iter()
                .filter_map(|requirement| by_name.get(requirement.name.as_str()).copied())
                .collect()
        })
        .collect();

    // A job is on a cycle when it can reach itself.
    (0..edges.len())
        .filter(|&start| reaches(&edges, start, start))
        .collect()
}

fn reaches(edges: &[Vec<usize>], from: usize, target: usize) -> bool {
    let mut visited = vec![false; edges.len()];
    let mut stack: Vec<usize> = edges[from].clone();

    while let Some(node) = stack.pop() {
        if node == target {
            return true;
        }
        if std::mem::replace(&mut visited[node], true) {
            continue;
        }
        stack.extend(edges[node].iter().copied());
    }

    false
}
