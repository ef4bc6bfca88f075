//! Integration tests for the circleci-yaml-lsp server
//!
//! These tests drive the pipeline end-to-end, from document text through
//! the model, the reference index and the server state to published
//! diagnostics.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use tower_lsp::lsp_types::{self, Url};

use circleci_yaml_lsp::cache::DocumentCache;
use circleci_yaml_lsp::config::Settings;
use circleci_yaml_lsp::diagnostics::{to_lsp_diagnostics, DiagnosticCode, Severity, DIAGNOSTIC_SOURCE};
use circleci_yaml_lsp::document::{Document, Step};
use circleci_yaml_lsp::error::FetchError;
use circleci_yaml_lsp::orbs::{FetchedOrb, NoOrbs, OrbKey, OrbSourceFetcher};
use circleci_yaml_lsp::references::ReferenceIndex;
use circleci_yaml_lsp::semantic_tokens::compute_semantic_tokens;
use circleci_yaml_lsp::symbols::document_symbols;
use circleci_yaml_lsp::{DiagnosticPublisher, ServerState};

fn fixture(path: &str) -> String {
    fs::read_to_string(format!("tests/fixtures/{}", path)).expect("Failed to read fixture")
}

fn uri(name: &str) -> Url {
    Url::parse(&format!("file:///project/{}/.circleci/config.yml", name)).unwrap()
}

/// Byte offset of the `nth` occurrence of `needle`
fn offset_of(text: &str, needle: &str, nth: usize) -> usize {
    text.match_indices(needle)
        .nth(nth)
        .map(|(offset, _)| offset)
        .expect("needle not found")
}

const NODE_ORB_SOURCE: &str = r#"version: 2.1
executors:
  default:
    docker:
      - image: cimg/node:20.0
jobs:
  test:
    executor: default
    steps:
      - checkout
      - run: npm test
"#;

/// Serves `NODE_ORB_SOURCE` for every key and counts the calls
#[derive(Default)]
struct StubRegistry {
    calls: AtomicUsize,
}

#[tower_lsp::async_trait]
impl OrbSourceFetcher for StubRegistry {
    async fn fetch_orb_source(&self, key: &OrbKey, settings: &Settings) -> Result<FetchedOrb, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        if settings.token.as_deref() == Some("revoked") {
            return Err(FetchError::NotFound(key.to_string()));
        }
        Ok(FetchedOrb {
            source: NODE_ORB_SOURCE.to_string(),
            version_info: None,
        })
    }
}

#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<(Url, i32, Vec<lsp_types::Diagnostic>)>>,
}

impl RecordingPublisher {
    fn versions(&self) -> Vec<i32> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, version, _)| *version)
            .collect()
    }

    fn last_messages(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .last()
            .map(|(_, _, diagnostics)| diagnostics.iter().map(|d| d.message.clone()).collect())
            .unwrap_or_default()
    }
}

#[tower_lsp::async_trait]
impl DiagnosticPublisher for RecordingPublisher {
    async fn publish(&self, uri: Url, diagnostics: Vec<lsp_types::Diagnostic>, version: i32) {
        self.published.lock().unwrap().push((uri, version, diagnostics));
    }
}

fn server(registry: Arc<StubRegistry>) -> Arc<ServerState> {
    let settings = Settings {
        debounce_ms: 20,
        ..Settings::default()
    };
    Arc::new(ServerState::new(settings, registry))
}

#[test]
fn test_valid_config_no_diagnostics() {
    let text = fixture("valid/config.yml");
    let document = Document::parse(&text);

    assert!(
        document.diagnostics.is_empty(),
        "Expected no diagnostics for valid config, got: {:?}",
        document.diagnostics
    );
    assert_eq!(document.jobs.len(), 2);
    assert_eq!(document.commands.len(), 1);
    assert_eq!(document.executors.len(), 1);
    assert_eq!(document.workflows.len(), 2);
    assert!(document.pipeline_parameters.contains_key("run-deploy"));
}

#[test]
fn test_clean_build() {
    let text = r#"version: 2.1
jobs:
  build:
    docker: [{image: x}]
    steps: [checkout]
workflows:
  main:
    jobs: [build]
"#;
    let document = Document::parse(text);

    assert!(document.diagnostics.is_empty(), "{:?}", document.diagnostics);
    let build = &document.jobs["build"];
    assert_eq!(build.name_span.slice(text), "build");
    assert_eq!(document.workflows[0].jobs[0].job_name, "build");
}

#[test]
fn test_dangling_job_reference() {
    let text = fixture("invalid/undefined_job.yml");
    let document = Document::parse(&text);

    assert_eq!(document.diagnostics.len(), 1, "{:?}", document.diagnostics);
    let diagnostic = &document.diagnostics[0];
    assert_eq!(diagnostic.severity, Severity::Error);
    assert_eq!(diagnostic.code, DiagnosticCode::UndefinedJob);
    assert!(diagnostic.message.contains("deploy"));

    let usage = offset_of(&text, "deploy", 0);
    assert!(ReferenceIndex::new(&document).definition_at(usage).is_empty());
}

#[test]
fn test_anchor_alias_resolves_to_definition() {
    let text = fixture("valid/anchors.yml");
    let document = Document::parse(&text);

    assert!(document.diagnostics.is_empty(), "{:?}", document.diagnostics);
    assert_eq!(document.anchors.len(), 1);
    let anchor = document.anchors.get("defaults").unwrap();
    assert_eq!(anchor.aliases.len(), 1);
    assert_eq!(anchor.definition.slice(&text), "defaults");

    let alias = offset_of(&text, "*defaults", 0) + 1;
    assert_eq!(
        ReferenceIndex::new(&document).definition_at(alias),
        vec![anchor.definition]
    );
    assert!(document.jobs["build"].inline_executor.is_some());
}

#[test]
fn test_job_usages_across_workflows() {
    let text = fixture("valid/config.yml");
    let document = Document::parse(&text);
    let index = ReferenceIndex::new(&document);

    let declaration = document.jobs["build"].name_span;
    let usages = index.references_at(declaration.start);

    // `- build` in both workflows, plus the `requires` entry of deploy
    let workflow_usages: Vec<_> = document
        .workflows
        .iter()
        .flat_map(|workflow| workflow.jobs.iter())
        .filter(|job_ref| job_ref.job_name == "build")
        .map(|job_ref| job_ref.job_name_span)
        .collect();
    assert_eq!(workflow_usages.len(), 2);
    for span in &workflow_usages {
        assert!(usages.contains(span), "missing usage at {:?}", span);
    }
    assert!(usages.iter().all(|span| span.slice(&text) == "build"));
}

#[test]
fn test_two_workflow_references() {
    let text = r#"version: 2.1
jobs:
  build:
    docker: [{image: x}]
    steps: [checkout]
workflows:
  main:
    jobs: [build]
  nightly:
    jobs: [build]
"#;
    let document = Document::parse(text);
    let index = ReferenceIndex::new(&document);

    let usages = index.references_at(offset_of(text, "build", 0));
    assert_eq!(
        usages.iter().map(|span| span.start).collect::<Vec<_>>(),
        vec![offset_of(text, "build", 1), offset_of(text, "build", 2)]
    );
}

#[test]
fn test_idempotent_build() {
    let text = fixture("valid/config.yml");
    assert_eq!(Document::parse(&text), Document::parse(&text));
}

#[test]
fn test_entity_ranges_match_source() {
    let text = fixture("valid/config.yml");
    let document = Document::parse(&text);

    for (name, job) in &document.jobs {
        assert_eq!(job.name_span.slice(&text), name);
        assert!(job.span.contains_span(job.name_span));
    }
    for (name, command) in &document.commands {
        assert_eq!(command.name_span.slice(&text), name);
    }
    for (name, orb) in &document.orbs {
        assert_eq!(orb.name_span.slice(&text), name);
    }
    for workflow in &document.workflows {
        assert_eq!(workflow.name_span.slice(&text), workflow.name);
        for job_ref in &workflow.jobs {
            assert_eq!(job_ref.job_name_span.slice(&text), job_ref.job_name);
        }
    }

    let install = &document.jobs["build"].steps[1];
    assert_matches!(install, Step::Named(named) if named.name == "install");
    assert_eq!(install.name_span().slice(&text), "install");
}

#[test]
fn test_cache_keeps_newest_version() {
    let cache = DocumentCache::new(Arc::new(NoOrbs));
    let uri = uri("monotonic");

    cache.get_or_parse(&uri, "version: 2.1\njobs: {}\n", 2);
    let stale = cache.get_or_parse(&uri, "version: 2\n", 1);

    assert_eq!(stale.content, "version: 2.1\njobs: {}\n");
    assert_eq!(cache.version(&uri), Some(2));
}

#[test]
fn test_lsp_diagnostic_fields() {
    let text = "version: 2.1\nworkflows:\n  main:\n    jobs:\n      - deploy\n";
    let document = Document::parse(text);
    let diagnostics = to_lsp_diagnostics(&document.content, &document.diagnostics);

    assert_eq!(diagnostics.len(), 1);
    let diagnostic = &diagnostics[0];
    assert_eq!(diagnostic.source.as_deref(), Some(DIAGNOSTIC_SOURCE));
    assert_eq!(diagnostic.severity, Some(lsp_types::DiagnosticSeverity::ERROR));
    assert_eq!(diagnostic.range.start, lsp_types::Position::new(4, 8));
    assert_eq!(diagnostic.range.end, lsp_types::Position::new(4, 14));
}

#[test]
fn test_invalid_yaml_produces_diagnostic() {
    let document = Document::parse("version: 2.1\njobs:\n  build: [unclosed\n");

    assert!(
        document
            .diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::YamlSyntax && d.severity == Severity::Error),
        "{:?}",
        document.diagnostics
    );
}

#[test]
fn test_empty_document() {
    let document = Document::parse("");
    assert!(document.jobs.is_empty());
    assert!(document_symbols(&document).is_empty());
    assert!(compute_semantic_tokens(&document).data.is_empty());
}

#[test]
fn test_arbitrary_input_never_panics() {
    const FRAGMENTS: &[&str] = &[
        "version: 2.1\n", "jobs:\n", "  build:\n", "    steps:\n", "      - ", "checkout",
        "run: ", "<< parameters.", "x >>", "&a ", "*a", "<<: ", "[", "]", "{", "}", "\"",
        "'", ":", "- ", "workflows:\n", "  main:\n", "    jobs: ", "requires: [", "orbs:\n",
        "  o: ns/o@1", "/", "é", "日本", "\t", "\n", "  ", "#", "|\n", "when:\n", "executor: ",
    ];

    // Deterministic xorshift so failures reproduce
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    let mut next = || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    for _ in 0..200 {
        let length = (next() % 40) as usize;
        let text: String = (0..length)
            .map(|_| FRAGMENTS[(next() % FRAGMENTS.len() as u64) as usize])
            .collect();

        let document = Document::parse(&text);
        let index = ReferenceIndex::new(&document);
        for offset in (0..=text.len()).filter(|offset| text.is_char_boundary(*offset)) {
            for span in index.definition_at(offset).into_iter().chain(index.references_at(offset)) {
                assert!(span.end <= text.len() && text.is_char_boundary(span.start));
            }
        }
        for diagnostic in &document.diagnostics {
            assert!(diagnostic.span.end <= text.len(), "{:?} in {:?}", diagnostic, text);
        }
        document_symbols(&document);
        compute_semantic_tokens(&document);
        to_lsp_diagnostics(&document.content, &document.diagnostics);
    }
}

#[tokio::test]
async fn test_orbs_resolve_and_republish() {
    let registry = Arc::new(StubRegistry::default());
    let state = server(Arc::clone(&registry));
    let publisher = Arc::new(RecordingPublisher::default());
    let uri = uri("orbs");

    let text = "version: 2.1\norbs:\n  node: circleci/node@5.1.0\nworkflows:\n  main:\n    jobs:\n      - node/test\n      - node/lint\n";
    state.record_text(&uri, text.to_string(), 1);
    Arc::clone(&state).analyze(uri.clone(), 1, false, publisher.clone()).await;

    // Unchecked while pending, then `node/lint` is missing from the orb
    assert_eq!(publisher.versions(), vec![1, 1]);
    assert_eq!(
        publisher.last_messages(),
        vec!["Cannot find declaration for job node/lint".to_string()]
    );
    assert_eq!(registry.calls.load(Ordering::SeqCst), 1);

    let document = state.document(&uri).unwrap();
    let info = document.orbs["node"].info.as_ref().unwrap();
    assert!(info.jobs.contains_key("test"));
}

#[tokio::test]
async fn test_shared_orb_is_fetched_once() {
    let registry = Arc::new(StubRegistry::default());
    let state = server(Arc::clone(&registry));
    let publisher = Arc::new(RecordingPublisher::default());

    let text = "version: 2.1\norbs:\n  node: circleci/node@5.1.0\n";
    let mut tasks = Vec::new();
    for name in ["a", "b", "c", "d"] {
        state.record_text(&uri(name), text.to_string(), 1);
        let publisher: Arc<dyn DiagnosticPublisher> = publisher.clone();
        tasks.push(tokio::spawn(Arc::clone(&state).analyze(uri(name), 1, false, publisher)));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(registry.calls.load(Ordering::SeqCst), 1);
    for name in ["a", "b", "c", "d"] {
        assert!(state.document(&uri(name)).unwrap().orbs["node"].info.is_some());
    }
}

#[tokio::test]
async fn test_edits_publish_only_latest_version() {
    let state = server(Arc::new(StubRegistry::default()));
    let publisher = Arc::new(RecordingPublisher::default());
    let uri = uri("edits");

    for version in 1..=5 {
        let text = format!("version: 2.1\nworkflows:\n  main:\n    jobs: [job{}]\n", version);
        state.record_text(&uri, text, version);
        state.schedule(uri.clone(), version, publisher.clone());
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(publisher.versions(), vec![5]);
    assert_eq!(
        publisher.last_messages(),
        vec!["Cannot find declaration for job job5".to_string()]
    );
}

#[tokio::test]
async fn test_stale_analysis_is_not_published() {
    let state = server(Arc::new(StubRegistry::default()));
    let publisher = Arc::new(RecordingPublisher::default());
    let uri = uri("stale");

    state.record_text(&uri, "version: 2.1\n".to_string(), 1);
    state.record_text(&uri, "version: 2.1\njobs: {}\n".to_string(), 2);
    Arc::clone(&state).analyze(uri.clone(), 1, false, publisher.clone()).await;
    assert!(publisher.versions().is_empty());

    Arc::clone(&state).analyze(uri.clone(), 2, false, publisher.clone()).await;
    assert_eq!(publisher.versions(), vec![2]);
}

#[tokio::test]
async fn test_token_change_re_resolves_orbs() {
    let registry = Arc::new(StubRegistry::default());
    let state = server(Arc::clone(&registry));
    let publisher = Arc::new(RecordingPublisher::default());
    let uri = uri("token");

    let text = "version: 2.1\norbs:\n  node: circleci/node@5.1.0\n";
    state.record_text(&uri, text.to_string(), 1);
    Arc::clone(&state).analyze(uri.clone(), 1, false, publisher.clone()).await;
    assert!(publisher.last_messages().is_empty());

    let revoked = state.settings().with_token(Some("revoked".to_string()));
    state.apply_settings(revoked, publisher.clone());
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(registry.calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        publisher.last_messages(),
        vec!["Orb `circleci/node@5.1.0` not found".to_string()]
    );
}
