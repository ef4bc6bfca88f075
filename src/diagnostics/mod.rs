//! Diagnostics module for error collection and reporting

mod collector;
mod suppression;
mod validator;

use std::collections::HashSet;

use tower_lsp::lsp_types::{self, NumberOrString};

use crate::document::Document;
use crate::position::LineIndex;

pub use collector::{Diagnostic, DiagnosticCode, DiagnosticCollector, Severity};
pub use suppression::{collect_suppressions, Suppressions};
pub use validator::validate_document;

/// Source attached to every published diagnostic
pub const DIAGNOSTIC_SOURCE: &str = "circleci-yaml-lsp";

/// Raw schema validation, provided by an external collaborator
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, document: &Document) -> Vec<Diagnostic>;
}

/// Merge the structural diagnostics of a document with schema diagnostics,
/// dropping entries with the same span, severity and message.
pub fn merge_diagnostics(
    structural: &[Diagnostic],
    schema: impl IntoIterator<Item = Diagnostic>,
) -> Vec<Diagnostic> {
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(structural.len());

    for diagnostic in structural.iter().cloned().chain(schema) {
        let key = (diagnostic.span, diagnostic.severity, diagnostic.message.clone());
        if seen.insert(key) {
            merged.push(diagnostic);
        }
    }

    merged
}

impl From<Severity> for lsp_types::DiagnosticSeverity {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Error => lsp_types::DiagnosticSeverity::ERROR,
            Severity::Warning => lsp_types::DiagnosticSeverity::WARNING,
            Severity::Information => lsp_types::DiagnosticSeverity::INFORMATION,
            Severity::Hint => lsp_types::DiagnosticSeverity::HINT,
        }
    }
}

/// Convert model diagnostics to LSP diagnostics for `content`
pub fn to_lsp_diagnostics(content: &str, diagnostics: &[Diagnostic]) -> Vec<lsp_types::Diagnostic> {
    let index = LineIndex::new(content);

    diagnostics
        .iter()
        .map(|diagnostic| lsp_types::Diagnostic {
            range: index.range(diagnostic.span),
            severity: Some(diagnostic.severity.into()),
            code: Some(NumberOrString::String(diagnostic.code.to_string())),
            source: Some(DIAGNOSTIC_SOURCE.to_string()),
            message: diagnostic.message.clone(),
            ..Default::default()
        })
        .collect()
}
