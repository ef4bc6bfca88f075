//! `workflows:` and the job references they hold

use indexmap::IndexMap;
use tree_sitter::Node;

use crate::diagnostics::DiagnosticCode;
use crate::document::{FilterRule, Filters, JobRef, Requirement, Workflow};
use crate::parser::syntax::{scalar_span, span_of};
use crate::position::Span;

use super::{Builder, Entry};

impl<'t> Builder<'t> {
    /// Workflows in declaration order, plus the span of a `version:` key
    /// written among them.
    pub(crate) fn build_workflows(&mut self, node: Node<'t>) -> (Vec<Workflow>, Option<Span>) {
        let mut workflows: Vec<Workflow> = Vec::new();
        let mut version_key = None;

        for entry in self.entries(node) {
            if entry.key == "version" {
                version_key = Some(entry.key_span);
                continue;
            }

            let workflow = self.build_workflow(&entry);
            match workflows.iter().position(|w| w.name == workflow.name) {
                Some(index) => {
                    let message = format!("{} already defined", workflow.name);
                    self.collector.add_warning(
                        workflows[index].name_span,
                        DiagnosticCode::DuplicateDeclaration,
                        message.clone(),
                    );
                    self.collector.add_warning(
                        workflow.name_span,
                        DiagnosticCode::DuplicateDeclaration,
                        message,
                    );
                    workflows[index] = workflow;
                }
                None => workflows.push(workflow),
            }
        }

        (workflows, version_key)
    }

    fn build_workflow(&mut self, entry: &Entry<'t>) -> Workflow {
        let mut workflow = Workflow {
            name: entry.key.clone(),
            name_span: entry.key_span,
            span: entry.span,
            jobs: Vec::new(),
            jobs_span: None,
            has_triggers: false,
        };

        let Some(body) = entry.value else {
            return workflow;
        };

        for field in self.entries(body) {
            match field.key.as_str() {
                "jobs" => {
                    workflow.jobs_span = Some(field.section_span());
                    if let Some(value) = field.value {
                        workflow.jobs = self
                            .items(value)
                            .into_iter()
                            .filter_map(|item| self.build_job_ref(item))
                            .collect();
                    }
                }
                "triggers" => workflow.has_triggers = true,
                _ => {}
            }
        }

        workflow
    }

    /// `- build` or `- build: { requires: [...], ... }`
    fn build_job_ref(&mut self, item: Node<'t>) -> Option<JobRef> {
        let span = span_of(item);
        let node = self.resolve(item);

        if let Some(name) = self.scalar(node) {
            return Some(JobRef {
                step_name: name.clone(),
                job_name: name,
                job_name_span: scalar_span(node),
                step_name_span: None,
                span,
                job_type: None,
                requires: Vec::new(),
                filters: None,
                contexts: Vec::new(),
                arguments: Vec::new(),
                matrix: IndexMap::new(),
                pre_steps: Vec::new(),
                post_steps: Vec::new(),
            });
        }

        let entries = self.entries(node);
        let head = entries.first()?;

        let mut job_ref = JobRef {
            job_name: head.key.clone(),
            job_name_span: head.key_span,
            step_name: head.key.clone(),
            step_name_span: None,
            span,
            job_type: None,
            requires: Vec::new(),
            filters: None,
            contexts: Vec::new(),
            arguments: Vec::new(),
            matrix: IndexMap::new(),
            pre_steps: Vec::new(),
            post_steps: Vec::new(),
        };

        let Some(body) = head.value else {
            return Some(job_ref);
        };

        for field in self.entries(body) {
            match field.key.as_str() {
                "type" => job_ref.job_type = self.scalar_of(&field),
                "name" => {
                    if let Some(name) = self.scalar_of(&field) {
                        job_ref.step_name = name;
                        job_ref.step_name_span = field.value.map(scalar_span);
                    }
                }
                "requires" => {
                    job_ref.requires = field
                        .value
                        .map(|value| self.requirements(value))
                        .unwrap_or_default();
                }
                "context" => {
                    job_ref.contexts = field
                        .value
                        .map(|value| self.string_list(value))
                        .unwrap_or_default();
                }
                "filters" => job_ref.filters = field.value.map(|value| self.filters(value)),
                "matrix" => {
                    job_ref.matrix = field
                        .value
                        .map(|value| self.matrix(value))
                        .unwrap_or_default();
                }
                "pre-steps" => {
                    if let Some(value) = field.value {
                        job_ref.pre_steps = self.build_steps(value, 0);
                    }
                }
                "post-steps" => {
                    if let Some(value) = field.value {
                        job_ref.post_steps = self.build_steps(value, 0);
                    }
                }
                _ => job_ref.arguments.push(self.argument(&field)),
            }
        }

        Some(job_ref)
    }

    fn requirements(&self, node: Node<'t>) -> Vec<Requirement> {
        let node = self.resolve(node);
        let items = match self.items(node) {
            items if items.is_empty() => vec![node],
            items => items,
        };

        items
            .into_iter()
            .filter_map(|item| {
                let item = self.resolve(item);
                if let Some(name) = self.scalar(item) {
                    return Some(Requirement {
                        name,
                        span: scalar_span(item),
                    });
                }
                // `- build: success` status form
                let entries = self.entries(item);
                let head = entries.first()?;
                Some(Requirement {
                    name: head.key.clone(),
                    span: head.key_span,
                })
            })
            .collect()
    }

    fn filters(&self, node: Node<'t>) -> Filters {
        let mut filters = Filters::default();
        for field in self.entries(node) {
            let rule = match field.key.as_str() {
                "branches" => &mut filters.branches,
                "tags" => &mut filters.tags,
                _ => continue,
            };
            *rule = self.filter_rule(&field);
        }
        filters
    }

    fn filter_rule(&self, entry: &Entry<'t>) -> FilterRule {
        let mut rule = FilterRule::default();
        let Some(value) = entry.value else {
            return rule;
        };
        for field in self.entries(value) {
            let values = field
                .value
                .map(|value| self.string_list(value))
                .unwrap_or_default();
            match field.key.as_str() {
                "only" => rule.only = values,
                "ignore" => rule.ignore = values,
                _ => {}
            }
        }
        rule
    }

    fn matrix(&self, node: Node<'t>) -> IndexMap<String, Vec<String>> {
        self.entries(node)
            .iter()
            .filter(|field| field.key == "parameters")
            .filter_map(|field| field.value)
            .flat_map(|parameters| self.entries(parameters))
            .map(|field| {
                let values = field
                    .value
                    .map(|value| self.string_list(value))
                    .unwrap_or_default();
                (field.key, values)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::diagnostics::DiagnosticCode;
    use crate::document::Document;

    const CONFIG: &str = r#"version: 2.1
jobs:
  build:
    machine:
      image: ubuntu-2204:current
    parameters:
      target:
        type: string
    steps: [checkout]
  deploy:
    machine:
      image: ubuntu-2204:current
    steps: [checkout]
workflows:
  main:
    jobs:
      - build:
          name: build-linux
          target: linux
          context: [org-global]
          matrix:
            parameters:
              target: [linux, mac]
          filters:
            branches:
              only: main
            tags:
              ignore: /.*/
      - hold:
          type: approval
          requires: [build-linux]
      - deploy:
          requires:
            - hold
          pre-steps:
            - checkout
"#;

    #[test]
    fn test_job_refs() {
        let doc = Document::parse(CONFIG);
        assert!(doc.diagnostics.is_empty(), "{:?}", doc.diagnostics);

        let workflow = doc.workflow("main").unwrap();
        assert_eq!(workflow.jobs.len(), 3);

        let build = &workflow.jobs[0];
        assert_eq!(build.job_name, "build");
        assert_eq!(build.step_name, "build-linux");
        assert_eq!(build.contexts, vec!["org-global".to_string()]);
        assert_eq!(build.arguments.len(), 1);
        assert_eq!(build.arguments[0].name, "target");
        assert_eq!(build.matrix["target"], vec!["linux", "mac"]);
        let filters = build.filters.as_ref().unwrap();
        assert_eq!(filters.branches.only, vec!["main".to_string()]);
        assert_eq!(filters.tags.ignore, vec!["/.*/".to_string()]);

        let hold = &workflow.jobs[1];
        assert!(hold.is_approval());
        assert_eq!(hold.requires[0].name, "build-linux");

        let deploy = &workflow.jobs[2];
        assert_eq!(deploy.requires[0].span.slice(CONFIG), "hold");
        assert_eq!(deploy.pre_steps.len(), 1);
    }

    #[test]
    fn test_workflow_version_key_is_recorded() {
        let text = "version: 2.1\nworkflows:\n  version: 2\n  main:\n    jobs: []\n";
        let doc = Document::parse(text);

        assert_eq!(doc.workflows.len(), 1);
        assert_eq!(
            doc.sections.workflows_version.map(|s| s.slice(text)),
            Some("version")
        );
        assert_eq!(doc.diagnostics.len(), 1);
        assert_eq!(doc.diagnostics[0].code, DiagnosticCode::Deprecated);
    }

    #[test]
    fn test_duplicate_workflow_replaced_in_place() {
        let text = "version: 2.1\nworkflows:\n  a:\n    jobs: []\n  b:\n    jobs: []\n  a:\n    triggers: []\n";
        let doc = Document::parse(text);

        let names: Vec<_> = doc.workflows.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(doc.workflows[0].has_triggers);
        assert_eq!(
            doc.diagnostics
                .iter()
                .filter(|d| d.code == DiagnosticCode::DuplicateDeclaration)
                .count(),
            2
        );
    }
}
