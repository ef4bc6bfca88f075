//! `orbs:` declarations and orb sources

use std::sync::Arc;

use indexmap::IndexMap;
use tree_sitter::Node;

use crate::diagnostics::{DiagnosticCode, DiagnosticCollector, Severity};
use crate::document::{Orb, OrbInfo, OrbKey, OrbReference, VersionInfo};
use crate::error::OrbResolutionError;
use crate::orbs::{NoOrbs, OrbState};
use crate::parser::parse_tree;
use crate::parser::syntax::{as_mapping, node_text, root_value, scalar_span};
use crate::position::Span;

use super::{Builder, Entry};

impl<'t> Builder<'t> {
    pub(crate) fn build_orbs(&mut self, node: Node<'t>) -> IndexMap<String, Orb> {
        let mut orbs: IndexMap<String, Orb> = IndexMap::new();
        for entry in self.entries(node) {
            let orb = self.build_orb(&entry);
            self.insert_unique(&mut orbs, entry.key.clone(), entry.key_span, orb, |orb: &Orb| {
                orb.name_span
            });
        }
        orbs
    }

    fn build_orb(&mut self, entry: &Entry<'t>) -> Orb {
        let mut orb = Orb {
            name: entry.key.clone(),
            name_span: entry.key_span,
            span: entry.span,
            reference: OrbReference::Inline,
            version_span: None,
            info: None,
        };

        let Some(value) = entry.value else {
            let err = OrbResolutionError::InvalidReference(String::new());
            self.collector.add_error(
                entry.span,
                DiagnosticCode::OrbResolution,
                format!("Orb `{}` has no reference", entry.key),
            );
            orb.reference = OrbReference::Invalid(err);
            return orb;
        };

        if self.is_mapping(value) {
            let info = self.build_inline_orb(self.resolve(value));
            orb.info = Some(Arc::new(info));
            return orb;
        }

        let reference = self.scalar(value).unwrap_or_default();
        let reference_span = scalar_span(self.resolve(value));

        match OrbKey::parse(&reference) {
            Ok(key) => {
                orb.version_span = version_span(reference_span, self.text);
                orb.info = match self.orbs.lookup(&key) {
                    OrbState::Resolved(info) => {
                        if let Some((severity, message)) = info
                            .version_info
                            .as_ref()
                            .and_then(|versions| version_notice(&key.version, versions))
                        {
                            self.collector.add(
                                orb.version_span.unwrap_or(reference_span),
                                severity,
                                DiagnosticCode::OrbVersion,
                                message,
                            );
                        }
                        Some(info)
                    }
                    OrbState::Failed(err) => {
                        self.collector.add_error(
                            reference_span,
                            DiagnosticCode::OrbResolution,
                            err.to_string(),
                        );
                        None
                    }
                    OrbState::Pending => None,
                };
                orb.reference = OrbReference::Registry(key);
            }
            Err(err) => {
                self.collector.add_error(
                    reference_span,
                    DiagnosticCode::OrbResolution,
                    err.to_string(),
                );
                orb.reference = OrbReference::Invalid(err);
            }
        }

        orb
    }

    /// Commands, jobs and executors of an orb body. Used for inline orbs and
    /// for the root of a fetched orb source.
    pub(crate) fn build_inline_orb(&mut self, node: Node<'t>) -> OrbInfo {
        let mut info = OrbInfo {
            source: node_text(node, self.text).to_string(),
            ..Default::default()
        };

        for field in self.entries(node) {
            let Some(value) = field.value else {
                continue;
            };
            match field.key.as_str() {
                "description" => info.description = self.scalar(value),
                "commands" => info.commands = self.build_commands(value),
                "jobs" => info.jobs = self.build_jobs(value),
                "executors" => info.executors = self.build_executors(value),
                _ => {}
            }
        }

        info
    }
}

/// Span of the text after `@` in an orb reference
fn version_span(reference: Span, text: &str) -> Option<Span> {
    let raw = reference.slice(text);
    let at = raw.find('@')?;
    let end = raw.trim_end_matches(['"', '\'']).len();
    (at < end).then(|| Span::new(reference.start + at + 1, reference.start + end))
}

/// Notice about newer published versions of an orb pinned to an exact
/// `major.minor.patch` version. Partial pins and `volatile` get none.
fn version_notice(current: &str, versions: &VersionInfo) -> Option<(Severity, String)> {
    let pinned = semver::Version::parse(current).ok()?;
    let latest = versions.latest.as_deref().unwrap_or(current);
    let minor = versions.latest_minor.as_deref().unwrap_or(current);
    let patch = versions.latest_patch.as_deref().unwrap_or(current);

    let released = semver::Version::parse(latest).is_ok_and(|latest| latest.major != 0);
    if pinned.major == 0 && released {
        return Some((
            Severity::Warning,
            format!("A production version has been released. Latest: {}", latest),
        ));
    }

    if patch != current {
        let mut message = format!("A newer patched version exists.\n\nCurrent: {}\n", current);
        if latest != minor {
            if minor != patch {
                message.push_str(&format!("Patch:   {}\n", patch));
            }
            message.push_str(&format!("Minor:   {}\n", minor));
        }
        message.push_str(&format!("Latest:  {}\n", latest));
        return Some((Severity::Warning, message));
    }

    if minor != current {
        let mut message = format!("A newer minor version exists.\n\nCurrent: {}\n", current);
        if latest != minor {
            message.push_str(&format!("Minor:   {}\n", minor));
        }
        message.push_str(&format!("Latest:  {}\n", latest));
        return Some((Severity::Information, message));
    }

    if latest != current {
        return Some((
            Severity::Information,
            format!(
                "A newer major version exists.\n\nCurrent: {}\nLatest:  {}\n",
                current, latest
            ),
        ));
    }

    None
}

/// Build the [`OrbInfo`] of a fetched orb source
pub fn build_orb_info(key: &OrbKey, source: &str) -> Result<OrbInfo, OrbResolutionError> {
    let malformed = |message: String| OrbResolutionError::Malformed {
        key: key.to_string(),
        message,
    };

    let tree = parse_tree(source).map_err(|err| malformed(err.to_string()))?;
    let root = root_value(&tree)
        .filter(|root| as_mapping(*root).is_some())
        .ok_or_else(|| malformed("the orb source is not a mapping".to_string()))?;

    let mut builder = Builder::new(source, &NoOrbs, DiagnosticCollector::new());
    builder.collect_anchors(&tree);
    let mut info = builder.build_inline_orb(root);
    info.key = Some(key.clone());
    info.source = source.to_string();

    tracing::debug!(
        "Built orb {}: {} commands, {} jobs, {} executors",
        key,
        info.commands.len(),
        info.jobs.len(),
        info.executors.len()
    );

    Ok(info)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;

    use super::*;
    use crate::builder::build;
    use crate::document::Document;
    use crate::orbs::OrbLookup;

    struct FixedOrbs(OrbState);

    impl OrbLookup for FixedOrbs {
        fn lookup(&self, _: &OrbKey) -> OrbState {
            self.0.clone()
        }
    }

    const NODE_ORB: &str = r#"version: 2.1
description: Node tools
commands:
  install:
    steps:
      - run: npm ci
jobs:
  test:
    docker:
      - image: cimg/node:20.0
    steps:
      - install
executors:
  default:
    docker:
      - image: cimg/node:20.0
"#;

    #[test]
    fn test_registry_reference() {
        let text = "version: 2.1\norbs:\n  node: circleci/node@5.1.0\n";
        let doc = Document::parse(text);

        let orb = &doc.orbs["node"];
        assert_matches!(&orb.reference, OrbReference::Registry(key) if key.to_string() == "circleci/node@5.1.0");
        assert_eq!(orb.version_span.map(|s| s.slice(text)), Some("5.1.0"));
        assert!(orb.info.is_none());
        assert!(doc.diagnostics.is_empty());
    }

    #[test]
    fn test_missing_version_is_an_error() {
        let doc = Document::parse("version: 2.1\norbs:\n  node: circleci/node\n");

        assert_matches!(
            &doc.orbs["node"].reference,
            OrbReference::Invalid(OrbResolutionError::MissingVersion(_))
        );
        assert_eq!(doc.diagnostics.len(), 1);
        assert_eq!(doc.diagnostics[0].code, DiagnosticCode::OrbResolution);
    }

    #[test]
    fn test_resolved_orb_is_attached() {
        let key = OrbKey::parse("circleci/node@5.1.0").unwrap();
        let info = Arc::new(build_orb_info(&key, NODE_ORB).unwrap());
        let lookup = FixedOrbs(OrbState::Resolved(info));

        let text = "version: 2.1\norbs:\n  node: circleci/node@5.1.0\nworkflows:\n  main:\n    jobs:\n      - node/test\n";
        let doc = build(text, &lookup);

        let orb_info = doc.orbs["node"].info.as_ref().unwrap();
        assert_eq!(orb_info.description.as_deref(), Some("Node tools"));
        assert!(orb_info.commands.contains_key("install"));
        assert!(orb_info.jobs.contains_key("test"));
        assert!(orb_info.executors.contains_key("default"));
        assert!(doc.diagnostics.is_empty(), "{:?}", doc.diagnostics);
    }

    #[test]
    fn test_failed_orb_reports_on_reference() {
        let lookup = FixedOrbs(OrbState::Failed(OrbResolutionError::NotFound(
            "circleci/nope@1.0.0".to_string(),
        )));
        let text = "version: 2.1\norbs:\n  nope: circleci/nope@1.0.0\n";
        let doc = build(text, &lookup);

        assert_eq!(doc.diagnostics.len(), 1);
        assert_eq!(doc.diagnostics[0].code, DiagnosticCode::OrbResolution);
        assert_eq!(doc.diagnostics[0].span.slice(text), "circleci/nope@1.0.0");
    }

    #[test]
    fn test_inline_orb_spans_point_into_document() {
        let text = r#"version: 2.1
orbs:
  local:
    commands:
      hello:
        steps:
          - run: echo hello
jobs:
  build:
    machine:
      image: ubuntu-2204:current
    steps:
      - local/hello
"#;
        let doc = Document::parse(text);

        let orb = &doc.orbs["local"];
        assert_eq!(orb.reference, OrbReference::Inline);
        let hello = &orb.info.as_ref().unwrap().commands["hello"];
        assert_eq!(hello.name_span.slice(text), "hello");
        assert!(doc.diagnostics.is_empty(), "{:?}", doc.diagnostics);
    }

    fn with_versions(latest: &str, minor: &str, patch: &str) -> FixedOrbs {
        let key = OrbKey::parse("circleci/node@5.1.0").unwrap();
        let mut info = build_orb_info(&key, NODE_ORB).unwrap();
        info.version_info = Some(VersionInfo {
            latest: Some(latest.to_string()),
            latest_minor: Some(minor.to_string()),
            latest_patch: Some(patch.to_string()),
        });
        FixedOrbs(OrbState::Resolved(Arc::new(info)))
    }

    #[test]
    fn test_newer_patch_is_a_warning_on_the_version() {
        let text = "version: 2.1\norbs:\n  node: circleci/node@5.1.0\n";
        let doc = build(text, &with_versions("6.0.1", "5.2.0", "5.1.3"));

        assert_eq!(doc.diagnostics.len(), 1);
        let diagnostic = &doc.diagnostics[0];
        assert_eq!(diagnostic.code, DiagnosticCode::OrbVersion);
        assert_eq!(diagnostic.severity, Severity::Warning);
        assert_eq!(diagnostic.span.slice(text), "5.1.0");
        assert_eq!(
            diagnostic.message,
            "A newer patched version exists.\n\nCurrent: 5.1.0\nPatch:   5.1.3\nMinor:   5.2.0\nLatest:  6.0.1\n"
        );
    }

    #[test]
    fn test_newer_minor_and_major_are_information() {
        let text = "version: 2.1\norbs:\n  node: circleci/node@5.1.0\n";

        let doc = build(text, &with_versions("5.2.0", "5.2.0", "5.1.0"));
        assert_eq!(doc.diagnostics[0].severity, Severity::Information);
        assert!(doc.diagnostics[0].message.starts_with("A newer minor version exists."));

        let doc = build(text, &with_versions("6.0.0", "5.1.0", "5.1.0"));
        assert_eq!(doc.diagnostics[0].severity, Severity::Information);
        assert!(doc.diagnostics[0].message.starts_with("A newer major version exists."));

        let doc = build(text, &with_versions("5.1.0", "5.1.0", "5.1.0"));
        assert!(doc.diagnostics.is_empty(), "{:?}", doc.diagnostics);
    }

    #[test]
    fn test_version_notice_rules() {
        let versions = |latest: &str| VersionInfo {
            latest: Some(latest.to_string()),
            latest_minor: Some("0.3.0".to_string()),
            latest_patch: Some("0.3.0".to_string()),
        };

        assert_matches!(
            version_notice("0.3.0", &versions("1.0.0")),
            Some((Severity::Warning, message)) if message == "A production version has been released. Latest: 1.0.0"
        );
        assert_eq!(version_notice("0.3.0", &versions("0.3.0")), None);
        // Partial pins float to the newest matching version
        assert_eq!(version_notice("5.1", &versions("6.0.0")), None);
        assert_eq!(version_notice("volatile", &versions("6.0.0")), None);
    }

    #[test]
    fn test_malformed_orb_source() {
        let key = OrbKey::parse("circleci/node@5.1.0").unwrap();
        assert_matches!(
            build_orb_info(&key, "- not\n- a mapping\n"),
            Err(OrbResolutionError::Malformed { .. })
        );
    }
}
