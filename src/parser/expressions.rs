//! `<< parameters.x >>` and `<< pipeline.parameters.x >>` interpolations

use lazy_static::lazy_static;
use regex::Regex;

use crate::position::Span;

lazy_static! {
    static ref INTERPOLATION_RE: Regex =
        Regex::new(r"<<\s*(parameters|pipeline\.parameters)\.([A-Za-z0-9_-]+)\s*>>").unwrap();
}

/// Which parameter namespace an interpolation refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterpolationScope {
    /// `parameters.x`, scoped to the enclosing job, command or executor
    Local,
    /// `pipeline.parameters.x`
    Pipeline,
}

/// A single interpolation found in the document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpolation {
    pub scope: InterpolationScope,
    pub name: String,
    /// The whole `<< ... >>` expression
    pub span: Span,
    /// Just the parameter name
    pub name_span: Span,
}

/// Find every interpolation in `text`. Spans are shifted by `base` so a
/// slice of the document yields document offsets.
pub fn find_interpolations(text: &str, base: usize) -> Vec<Interpolation> {
    INTERPOLATION_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let scope = caps.get(1)?;
            let name = caps.get(2)?;

            Some(Interpolation {
                scope: if scope.as_str() == "parameters" {
                    InterpolationScope::Local
                } else {
                    InterpolationScope::Pipeline
                },
                name: name.as_str().to_string(),
                span: Span::new(whole.start(), whole.end()).offset(base),
                name_span: Span::new(name.start(), name.end()).offset(base),
            })
        })
        .collect()
}

/// Whether `text` contains at least one interpolation
pub fn has_interpolation(text: &str) -> bool {
    INTERPOLATION_RE.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_local_and_pipeline() {
        let text = "echo << parameters.greeting >> on <<pipeline.parameters.branch>>";
        let found = find_interpolations(text, 0);

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].scope, InterpolationScope::Local);
        assert_eq!(found[0].name, "greeting");
        assert_eq!(found[0].name_span.slice(text), "greeting");
        assert_eq!(found[0].span.slice(text), "<< parameters.greeting >>");
        assert_eq!(found[1].scope, InterpolationScope::Pipeline);
        assert_eq!(found[1].name, "branch");
    }

    #[test]
    fn test_base_offset() {
        let text = "x: << parameters.a-b_c >>";
        let found = find_interpolations(&text[3..], 3);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name_span.slice(text), "a-b_c");
    }

    #[test]
    fn test_other_pipeline_values_are_ignored() {
        assert!(find_interpolations("<< pipeline.git.branch >>", 0).is_empty());
        assert!(!has_interpolation("plain text"));
        assert!(has_interpolation("<<parameters.x>>"));
    }

    #[test]
    fn test_empty_parameter_name_is_not_an_interpolation() {
        assert!(find_interpolations("echo << parameters. >>", 0).is_empty());
        assert!(find_interpolations("<<pipeline.parameters.>>", 0).is_empty());
        assert!(!has_interpolation("<< parameters. >>"));
    }
}
