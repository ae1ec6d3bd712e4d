//! Backend state management
//!
//! This module defines the PerlBackend struct, which holds the open document
//! texts, the shared document index and module map, and the hover feature.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tower_lsp::Client;
use tower_lsp::lsp_types::Url;

use crate::config::ServerConfig;
use crate::lsp::backend::indexing::Indexer;
use crate::lsp::document_index::DocumentIndex;
use crate::lsp::features::PerlHover;
use crate::lsp::models::{LspDocument, ModuleMap};

/// Document indexing task for the background indexer
#[derive(Debug, Clone, Eq, PartialEq)]
pub(super) struct IndexingTask {
    pub(super) uri: Url,
    pub(super) text: Arc<String>,
    pub(super) priority: u8,  // 0 = high (open document), 1 = normal (workspace scan)
    /// Queue order; only the highest sequence queued for a URI is published.
    pub(super) seq: u64,
}

/// The Perl language server backend, managing state and handling LSP requests.
#[derive(Clone)]
pub struct PerlBackend {
    pub(super) client: Client,
    pub(super) config: ServerConfig,
    pub(super) documents_by_uri: Arc<RwLock<HashMap<Url, Arc<LspDocument>>>>,
    /// Document models published by the background indexer
    pub(super) index: Arc<DocumentIndex>,
    /// Workspace module map, refreshed wholesale on initialize
    pub(super) modules: ModuleMap,
    pub(super) hover: Arc<PerlHover>,
    pub(super) indexer: Arc<dyn Indexer>,
    pub(super) indexing_tx: tokio::sync::mpsc::Sender<IndexingTask>,
    pub(super) next_seq: Arc<AtomicU64>,
    /// Sequence of the newest task queued per URI
    pub(super) latest_queued: Arc<DashMap<Url, u64>>,
    pub(super) root_dir: Arc<RwLock<Option<PathBuf>>>,
    pub(super) shutdown_tx: Arc<tokio::sync::broadcast::Sender<()>>,
}

// Manual Debug implementation since the indexer and hover seams are trait objects
impl std::fmt::Debug for PerlBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerlBackend")
            .field("indexer", &self.indexer.name())
            .field("indexed_documents", &self.index.len())
            .field("modules", &self.modules.len())
            .finish()
    }
}
