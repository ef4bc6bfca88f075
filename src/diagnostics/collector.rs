//! Diagnostic collection during document building

use std::fmt;

use crate::position::Span;

/// Severity of a diagnostic, mirroring the LSP levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
    Information,
    Hint,
}

/// Stable identifier attached to every diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCode {
    /// The YAML itself is malformed
    YamlSyntax,
    InvalidVersion,
    InvalidStep,
    InvalidExecutor,
    DuplicateDeclaration,
    UndefinedJob,
    UndefinedRequirement,
    UndefinedCommand,
    UndefinedExecutor,
    UndefinedAnchor,
    UnusedAnchor,
    RedefinedAnchor,
    JobCycle,
    OrbResolution,
    /// A newer version of a pinned orb is published
    OrbVersion,
    /// Unbalanced `cci-ignore-start` / `cci-ignore-end`
    InvalidSuppression,
    Deprecated,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticCode::YamlSyntax => "yaml-syntax",
            DiagnosticCode::InvalidVersion => "invalid-version",
            DiagnosticCode::InvalidStep => "invalid-step",
            DiagnosticCode::InvalidExecutor => "invalid-executor",
            DiagnosticCode::DuplicateDeclaration => "duplicate-declaration",
            DiagnosticCode::UndefinedJob => "undefined-job",
            DiagnosticCode::UndefinedRequirement => "undefined-requirement",
            DiagnosticCode::UndefinedCommand => "undefined-command",
            DiagnosticCode::UndefinedExecutor => "undefined-executor",
            DiagnosticCode::UndefinedAnchor => "undefined-anchor",
            DiagnosticCode::UnusedAnchor => "unused-anchor",
            DiagnosticCode::RedefinedAnchor => "redefined-anchor",
            DiagnosticCode::JobCycle => "job-cycle",
            DiagnosticCode::OrbResolution => "orb-resolution",
            DiagnosticCode::OrbVersion => "orb-version",
            DiagnosticCode::InvalidSuppression => "invalid-suppression",
            DiagnosticCode::Deprecated => "deprecated",
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ranged message about the document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Diagnostic {
    pub span: Span,
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub message: String,
}

/// Collects diagnostics during parsing and validation
#[derive(Debug, Default)]
pub struct DiagnosticCollector {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticCollector {
    /// Create a new empty collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        span: Span,
        severity: Severity,
        code: DiagnosticCode,
        message: impl Into<String>,
    ) {
        self.diagnostics.push(Diagnostic {
            span,
            severity,
            code,
            message: message.into(),
        });
    }

    pub fn add_error(&mut self, span: Span, code: DiagnosticCode, message: impl Into<String>) {
        self.add(span, Severity::Error, code, message);
    }

    pub fn add_warning(&mut self, span: Span, code: DiagnosticCode, message: impl Into<String>) {
        self.add(span, Severity::Warning, code, message);
    }

    pub fn add_info(&mut self, span: Span, code: DiagnosticCode, message: impl Into<String>) {
        self.add(span, Severity::Information, code, message);
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.extend(diagnostics);
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Convert into the final list of diagnostics
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_keeps_insertion_order() {
        let mut collector = DiagnosticCollector::new();
        collector.add_error(Span::new(0, 3), DiagnosticCode::UndefinedJob, "first");
        collector.add_warning(Span::new(4, 6), DiagnosticCode::Deprecated, "second");

        let diagnostics = collector.into_diagnostics();
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].message, "first");
        assert_eq!(diagnostics[0].severity, Severity::Error);
        assert_eq!(diagnostics[1].code, DiagnosticCode::Deprecated);
    }

    #[test]
    fn test_code_strings() {
        assert_eq!(DiagnosticCode::YamlSyntax.to_string(), "yaml-syntax");
        assert_eq!(DiagnosticCode::OrbResolution.as_str(), "orb-resolution");
    }
}
