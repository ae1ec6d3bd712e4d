//! LSP protocol handler implementations
//!
//! This module contains the `tower_lsp::LanguageServer` trait implementation
//! for the Perl backend:
//! - Lifecycle handlers (initialize, initialized, shutdown)
//! - Document lifecycle (did_open, did_change, did_close)
//! - Information providers (hover, document_symbol, symbol)
//!
//! None of the information providers surface failures as protocol errors.

use std::sync::Arc;

use ropey::Rope;
use tower_lsp::{LanguageServer, jsonrpc};
use tower_lsp::lsp_types::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DocumentSymbolParams, DocumentSymbolResponse, Hover, HoverParams,
    HoverProviderCapability, InitializeParams, InitializeResult, InitializedParams,
    MessageType, OneOf, ServerCapabilities, ServerInfo, SymbolInformation,
    TextDocumentSyncCapability, TextDocumentSyncKind, WorkspaceSymbolParams,
};
use tower_lsp::jsonrpc::Result as LspResult;
use tracing::{debug, info, warn};

use super::indexing::scan_workspace;
use super::state::PerlBackend;
use super::utils::apply_changes;
use crate::lsp::features::{get_symbols, workspace_symbols};
use crate::lsp::models::LspDocument;

#[tower_lsp::async_trait]
impl LanguageServer for PerlBackend {
    /// Handles the LSP initialize request, scanning the workspace for modules.
    async fn initialize(&self, params: InitializeParams) -> jsonrpc::Result<InitializeResult> {
        info!("Received initialize (client: {:?})", params.client_info.as_ref().map(|c| &c.name));
        debug!("Index wait contract: {:?}", self.config.index_wait);

        #[allow(deprecated)]
        let root_uri = params
            .workspace_folders
            .as_ref()
            .and_then(|folders| folders.first().map(|f| f.uri.clone()))
            .or(params.root_uri);

        if let Some(root_uri) = root_uri {
            match root_uri.to_file_path() {
                Ok(root_path) => {
                    *self.root_dir.write().await = Some(root_path.clone());

                    let scan_root = root_path.clone();
                    let (modules, sources) = tokio::task::spawn_blocking(move || scan_workspace(&scan_root))
                        .await
                        .unwrap_or_else(|e| {
                            warn!("Workspace scan failed: {}", e);
                            Default::default()
                        });
                    info!("Found {} modules under {:?}", modules.len(), root_path);
                    self.modules.publish(modules);

                    // Open documents are queued with priority 0 as they arrive
                    let mut file_count = 0;
                    for path in sources {
                        let Ok(uri) = tower_lsp::lsp_types::Url::from_file_path(&path) else {
                            continue;
                        };
                        match tokio::fs::read_to_string(&path).await {
                            Ok(text) => {
                                self.queue_indexing(uri, text, 1).await;
                                file_count += 1;
                            }
                            Err(e) => debug!("Skipping unreadable {:?}: {}", path, e),
                        }
                    }
                    info!("Queued {} Perl files for indexing", file_count);
                }
                Err(()) => {
                    warn!("Failed to convert root_uri to path: {}. Skipping workspace scan.", root_uri);
                }
            }
        }

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(TextDocumentSyncKind::INCREMENTAL)),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                document_symbol_provider: Some(OneOf::Left(true)),
                workspace_symbol_provider: Some(OneOf::Left(true)),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    /// Handles the LSP initialized notification.
    async fn initialized(&self, _: InitializedParams) {
        info!("Initialized");
        self.client
            .log_message(MessageType::INFO, "Perl language server initialized")
            .await;
    }

    /// Handles the LSP shutdown request.
    async fn shutdown(&self) -> jsonrpc::Result<()> {
        info!("Received shutdown request");

        // Signal background tasks to shut down gracefully
        let _ = self.shutdown_tx.send(());
        Ok(())
    }

    /// Handles opening a text document and queues it for indexing ahead of
    /// workspace files.
    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;
        info!("Opening document: URI={}, version={}", uri, version);

        let document = Arc::new(LspDocument {
            uri: uri.clone(),
            text: Rope::from_str(&params.text_document.text),
            version,
        });
        self.documents_by_uri.write().await.insert(uri.clone(), document);

        self.queue_indexing(uri, params.text_document.text, 0).await;
    }

    /// Handles changes to a text document, applying them and re-indexing.
    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;
        debug!("textDocument/didChange: URI={}, version={}", uri, version);

        let updated = {
            let mut documents = self.documents_by_uri.write().await;
            let Some(current) = documents.get(&uri) else {
                warn!("Failed to find document with URI={}", uri);
                return;
            };
            let updated = Arc::new(LspDocument {
                uri: uri.clone(),
                text: apply_changes(&current.text, params.content_changes),
                version,
            });
            documents.insert(uri.clone(), Arc::clone(&updated));
            updated
        };

        self.queue_indexing(uri, updated.text.to_string(), 0).await;
    }

    /// Handles closing a text document. Its last model stays in the index
    /// for cross-file lookups.
    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        if self.documents_by_uri.write().await.remove(&uri).is_some() {
            info!("Closed document: {}", uri);
        } else {
            warn!("Closed document not found: {}", uri);
        }
    }

    async fn hover(&self, params: HoverParams) -> LspResult<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        debug!("Hover request at {}:{:?}", uri, position);

        let Some(document) = self.documents_by_uri.read().await.get(&uri).cloned() else {
            debug!("Document not open: {}", uri);
            return Ok(None);
        };
        let Some(model) = self.index.get(&uri) else {
            debug!("Document not indexed yet: {}", uri);
            return Ok(None);
        };

        let modules = self.modules.snapshot();
        Ok(self
            .hover
            .hover(&uri, position, &document.text, &model, &modules)
            .await)
    }

    /// Provides document symbols, waiting for the indexer if needed.
    async fn document_symbol(&self, params: DocumentSymbolParams) -> LspResult<Option<DocumentSymbolResponse>> {
        let uri = params.text_document.uri;
        debug!("Handling documentSymbol request for {}", uri);

        let symbols = get_symbols(&self.index, &uri).await;
        debug!("Found {} symbols in document {}", symbols.len(), uri);
        Ok(Some(DocumentSymbolResponse::Flat(symbols)))
    }

    /// Lists every workspace module; the client filters by the query.
    async fn symbol(&self, params: WorkspaceSymbolParams) -> LspResult<Option<Vec<SymbolInformation>>> {
        debug!("Handling workspace symbol request with query '{}'", params.query);
        let symbols = workspace_symbols(&params.query, &self.modules.snapshot());
        debug!("Returning {} workspace symbols", symbols.len());
        Ok(Some(symbols))
    }
}
