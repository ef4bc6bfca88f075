//! LSP Backend implementation

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};

use crate::cache::DocumentCache;
use crate::config::{Settings, SettingsStore};
use crate::debounce::Debouncer;
use crate::diagnostics::{merge_diagnostics, to_lsp_diagnostics, SchemaValidator};
use crate::document::{Document, OrbKey};
use crate::orbs::{OrbLookup, OrbResolver, OrbSourceFetcher, OrbState, RegistryClient};
use crate::position::{LineIndex, Span};
use crate::references::ReferenceIndex;
use crate::semantic_tokens::{compute_semantic_tokens, legend};
use crate::symbols::document_symbols;

pub const SET_TOKEN_COMMAND: &str = "setToken";
pub const SET_HOST_COMMAND: &str = "setSelfHostedUrl";

/// Where analysis results go; the LSP client in production
#[tower_lsp::async_trait]
pub trait DiagnosticPublisher: Send + Sync {
    async fn publish(&self, uri: Url, diagnostics: Vec<Diagnostic>, version: i32);
}

#[tower_lsp::async_trait]
impl DiagnosticPublisher for Client {
    async fn publish(&self, uri: Url, diagnostics: Vec<Diagnostic>, version: i32) {
        self.publish_diagnostics(uri, diagnostics, Some(version)).await;
    }
}

struct OpenText {
    version: i32,
    text: Arc<str>,
}

/// Everything the handlers share: open texts, built documents, orbs and
/// settings
pub struct ServerState {
    settings: Arc<SettingsStore>,
    resolver: Arc<OrbResolver>,
    cache: DocumentCache,
    texts: DashMap<Url, OpenText>,
    debouncer: Debouncer,
    schema: Option<Arc<dyn SchemaValidator>>,
}

impl ServerState {
    pub fn new(settings: Settings, fetcher: Arc<dyn OrbSourceFetcher>) -> Self {
        let settings = Arc::new(SettingsStore::new(settings));
        let resolver = Arc::new(OrbResolver::new(fetcher, Arc::clone(&settings)));
        let lookup: Arc<dyn OrbLookup> = Arc::clone(&resolver) as Arc<dyn OrbLookup>;

        Self {
            settings,
            cache: DocumentCache::new(lookup),
            resolver,
            texts: DashMap::new(),
            debouncer: Debouncer::new(),
            schema: None,
        }
    }

    pub fn with_schema_validator(mut self, schema: Arc<dyn SchemaValidator>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.snapshot()
    }

    /// Record the latest text of `uri`. Older versions are ignored.
    pub fn record_text(&self, uri: &Url, text: String, version: i32) -> bool {
        if self
            .texts
            .get(uri)
            .is_some_and(|open| open.version > version)
        {
            tracing::debug!("Ignoring out-of-order version {} of {}", version, uri);
            return false;
        }
        self.texts.insert(
            uri.clone(),
            OpenText {
                version,
                text: Arc::from(text),
            },
        );
        true
    }

    pub fn close(&self, uri: &Url) {
        self.debouncer.cancel(uri);
        self.texts.remove(uri);
        self.cache.invalidate(uri);
    }

    pub fn latest_version(&self, uri: &Url) -> Option<i32> {
        self.texts.get(uri).map(|open| open.version)
    }

    pub fn document(&self, uri: &Url) -> Option<Arc<Document>> {
        self.cache.get(uri)
    }

    /// Whether results for `version` may still be published
    pub fn is_current(&self, uri: &Url, version: i32) -> bool {
        self.latest_version(uri) == Some(version) && self.cache.version(uri) == Some(version)
    }

    /// Analyze `version` of `uri` once edits stop for the debounce window
    pub fn schedule(self: &Arc<Self>, uri: Url, version: i32, publisher: Arc<dyn DiagnosticPublisher>) {
        let state = Arc::clone(self);
        let delay = self.settings.snapshot().debounce();
        self.debouncer.schedule(uri.clone(), delay, async move {
            state.analyze(uri, version, false, publisher).await;
        });
    }

    /// Build, publish, resolve the document's orbs, then rebuild and publish
    /// again. Every publish is skipped once a newer version arrived.
    pub async fn analyze(
        self: Arc<Self>,
        uri: Url,
        version: i32,
        rebuild: bool,
        publisher: Arc<dyn DiagnosticPublisher>,
    ) {
        let Some(text) = self
            .texts
            .get(&uri)
            .filter(|open| open.version == version)
            .map(|open| Arc::clone(&open.text))
        else {
            tracing::debug!("Skipping analysis of {} version {}: superseded", uri, version);
            return;
        };

        let document = if rebuild {
            match self.cache.refresh(&uri) {
                Some(document) => document,
                None => self.cache.get_or_parse(&uri, &text, version),
            }
        } else {
            self.cache.get_or_parse(&uri, &text, version)
        };
        self.publish_if_current(&uri, version, &document, publisher.as_ref())
            .await;

        let pending = self.pending_orbs(&document);
        if pending.is_empty() {
            return;
        }

        tracing::debug!("Resolving {} orbs for {}", pending.len(), uri);
        for (key, result) in self.resolver.resolve_all(pending).await {
            if let Err(err) = result {
                tracing::warn!("Could not resolve orb {}: {}", key, err);
            }
        }

        if let Some(document) = self.cache.refresh(&uri) {
            self.publish_if_current(&uri, version, &document, publisher.as_ref())
                .await;
        }
    }

    /// Swap in new settings. A changed host or token drops every resolved
    /// orb and re-analyzes the open documents.
    pub fn apply_settings(self: &Arc<Self>, settings: Settings, publisher: Arc<dyn DiagnosticPublisher>) {
        let previous = self.settings.replace(settings);
        if !previous.registry_changed(&self.settings.snapshot()) {
            return;
        }

        tracing::info!("Orb registry settings changed, re-resolving orbs");
        self.resolver.invalidate_all();

        let open: Vec<(Url, i32)> = self
            .texts
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().version))
            .collect();
        for (uri, version) in open {
            let state = Arc::clone(self);
            let publisher = Arc::clone(&publisher);
            tokio::spawn(async move {
                state.analyze(uri, version, true, publisher).await;
            });
        }
    }

    /// Registry orbs of `document` that were never requested
    fn pending_orbs(&self, document: &Document) -> Vec<OrbKey> {
        document
            .orbs
            .values()
            .filter_map(|orb| orb.key())
            .filter(|key| matches!(self.resolver.lookup(key), OrbState::Pending))
            .cloned()
            .collect()
    }

    fn diagnostics_for(&self, document: &Document) -> Vec<Diagnostic> {
        let schema = self
            .schema
            .as_ref()
            .map(|schema| schema.validate(document))
            .unwrap_or_default();
        let schema = document.suppressions.retain(&document.content, schema);
        let merged = merge_diagnostics(&document.diagnostics, schema);
        to_lsp_diagnostics(&document.content, &merged)
    }

    async fn publish_if_current(
        &self,
        uri: &Url,
        version: i32,
        document: &Document,
        publisher: &dyn DiagnosticPublisher,
    ) {
        if !self.is_current(uri, version) {
            tracing::debug!("Dropping diagnostics of {} version {}: stale", uri, version);
            return;
        }
        let diagnostics = self.diagnostics_for(document);
        tracing::debug!(
            "Publishing {} diagnostics for {} version {}",
            diagnostics.len(),
            uri,
            version
        );
        publisher.publish(uri.clone(), diagnostics, version).await;
    }
}

/// The LSP backend that handles all language server requests
pub struct Backend {
    client: Client,
    state: Arc<ServerState>,
}

impl Backend {
    /// Backend talking to the CircleCI registry, configured from the
    /// environment
    pub fn new(client: Client) -> Self {
        let state = ServerState::new(Settings::from_env(), Arc::new(RegistryClient::new()));
        Self::with_state(client, Arc::new(state))
    }

    pub fn with_state(client: Client, state: Arc<ServerState>) -> Self {
        Self { client, state }
    }

    fn publisher(&self) -> Arc<dyn DiagnosticPublisher> {
        Arc::new(self.client.clone())
    }

    /// Document and byte offset for a request position
    fn locate(&self, uri: &Url, position: Position) -> Option<(Arc<Document>, usize)> {
        let document = self.state.document(uri)?;
        let offset = LineIndex::new(&document.content).offset(position);
        Some((document, offset))
    }

    fn locations(uri: &Url, document: &Document, spans: &[Span]) -> Vec<Location> {
        let index = LineIndex::new(&document.content);
        spans
            .iter()
            .map(|span| Location::new(uri.clone(), index.range(*span)))
            .collect()
    }

    fn update_settings(&self, value: &Value) {
        match self.state.settings().merged_with(value) {
            Ok(settings) => self.state.apply_settings(settings, self.publisher()),
            Err(err) => tracing::warn!("Ignoring invalid settings: {}", err),
        }
    }
}

fn string_argument(params: &ExecuteCommandParams) -> Option<String> {
    params
        .arguments
        .first()
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        if let Some(options) = &params.initialization_options {
            self.update_settings(options);
        }

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::FULL,
                )),
                definition_provider: Some(OneOf::Left(true)),
                references_provider: Some(OneOf::Left(true)),
                document_symbol_provider: Some(OneOf::Left(true)),
                semantic_tokens_provider: Some(
                    SemanticTokensServerCapabilities::SemanticTokensOptions(
                        SemanticTokensOptions {
                            legend: legend(),
                            full: Some(SemanticTokensFullOptions::Bool(true)),
                            range: Some(false),
                            ..Default::default()
                        },
                    ),
                ),
                execute_command_provider: Some(ExecuteCommandOptions {
                    commands: vec![SET_TOKEN_COMMAND.to_string(), SET_HOST_COMMAND.to_string()],
                    ..Default::default()
                }),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: "circleci-yaml-lsp".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        tracing::info!(
            "Server initialized against {}",
            self.state.settings().host_url
        );
    }

    async fn shutdown(&self) -> Result<()> {
        tracing::info!("Server shutting down");
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;

        tracing::debug!("Document opened: {}", uri);

        if self
            .state
            .record_text(&uri, params.text_document.text, version)
        {
            let state = Arc::clone(&self.state);
            tokio::spawn(state.analyze(uri, version, false, self.publisher()));
        }
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;

        // FULL sync: the last change carries the whole text
        let Some(change) = params.content_changes.into_iter().last() else {
            return;
        };

        tracing::debug!("Document changed: {} (version {})", uri, version);

        if self.state.record_text(&uri, change.text, version) {
            self.state.schedule(uri, version, self.publisher());
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        tracing::debug!("Document saved: {}", params.text_document.uri);
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        tracing::debug!("Document closed: {}", uri);

        self.state.close(&uri);
        self.client.publish_diagnostics(uri, vec![], None).await;
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        self.update_settings(&params.settings);
    }

    async fn execute_command(&self, params: ExecuteCommandParams) -> Result<Option<Value>> {
        let current = self.state.settings();
        let settings = match params.command.as_str() {
            SET_TOKEN_COMMAND => current.with_token(string_argument(&params)),
            SET_HOST_COMMAND => match string_argument(&params) {
                Some(host) => current.with_host(host),
                None => {
                    tracing::warn!("{} called without a host", SET_HOST_COMMAND);
                    return Ok(None);
                }
            },
            other => {
                tracing::warn!("Unknown command: {}", other);
                return Ok(None);
            }
        };

        self.state.apply_settings(settings, self.publisher());
        Ok(None)
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let position = params.text_document_position_params;
        let uri = position.text_document.uri;
        let Some((document, offset)) = self.locate(&uri, position.position) else {
            return Ok(None);
        };

        let spans = ReferenceIndex::new(&document).definition_at(offset);
        if spans.is_empty() {
            return Ok(None);
        }
        Ok(Some(GotoDefinitionResponse::Array(Self::locations(
            &uri, &document, &spans,
        ))))
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let position = params.text_document_position;
        let uri = position.text_document.uri;
        let Some((document, offset)) = self.locate(&uri, position.position) else {
            return Ok(None);
        };

        let Some((_, references)) = ReferenceIndex::new(&document).lookup_at(offset) else {
            return Ok(None);
        };

        let mut spans = references.usages;
        if params.context.include_declaration {
            if let Some(declaration) = references.declaration {
                spans.insert(0, declaration);
            }
        }
        Ok(Some(Self::locations(&uri, &document, &spans)))
    }

    async fn document_symbol(
        &self,
        params: DocumentSymbolParams,
    ) -> Result<Option<DocumentSymbolResponse>> {
        let Some(document) = self.state.document(&params.text_document.uri) else {
            return Ok(None);
        };
        Ok(Some(DocumentSymbolResponse::Nested(document_symbols(
            &document,
        ))))
    }

    async fn semantic_tokens_full(
        &self,
        params: SemanticTokensParams,
    ) -> Result<Option<SemanticTokensResult>> {
        let Some(document) = self.state.document(&params.text_document.uri) else {
            return Ok(None);
        };
        Ok(Some(SemanticTokensResult::Tokens(compute_semantic_tokens(
            &document,
        ))))
    }
}
