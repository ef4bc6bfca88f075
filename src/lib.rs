//! circleci-yaml-lsp: language server library for CircleCI configuration files
//!
//! This library provides the core functionality for the circleci-yaml-lsp server:
//! - YAML parsing with error recovery into a typed pipeline model
//! - Orb resolution against the CircleCI registry
//! - Reference validation, go-to-definition and find-references
//! - Document symbols and semantic tokens
//!
//! # Example
//!
//! ```
//! use circleci_yaml_lsp::document::Document;
//! use circleci_yaml_lsp::references::ReferenceIndex;
//!
//! let text = "version: 2.1\njobs:\n  build:\n    docker:\n      - image: cimg/base:current\n    steps: [checkout]\nworkflows:\n  main:\n    jobs: [build]\n";
//! let document = Document::parse(text);
//! assert!(document.diagnostics.is_empty());
//!
//! let usage = text.rfind("build").unwrap();
//! let definition = ReferenceIndex::new(&document).definition_at(usage);
//! assert_eq!(definition.len(), 1);
//! ```

pub mod builder;
pub mod cache;
pub mod config;
pub mod debounce;
pub mod diagnostics;
pub mod document;
pub mod error;
pub mod orbs;
pub mod parser;
pub mod position;
pub mod references;
pub mod schema;
pub mod semantic_tokens;
pub mod symbols;

mod backend;

pub use backend::{Backend, DiagnosticPublisher, ServerState};
