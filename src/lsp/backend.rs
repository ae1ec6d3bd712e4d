use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use dashmap::DashMap;
use tokio::sync::RwLock;
use tower_lsp::Client;
use tracing::{debug, info, trace, warn};

use crate::config::ServerConfig;
use crate::lsp::document_index::DocumentIndex;
use crate::lsp::features::{CallSiteRefiner, NameLookup, PerlHover, ScopedLookup, SignatureRefiner};
use crate::lsp::models::ModuleMap;

// Import types from backend submodules
mod state;
mod utils;
mod handlers;
pub mod indexing;

pub use state::PerlBackend;
use indexing::{DeclarationIndexer, Indexer};
use state::IndexingTask;

/// Optional replacements for the default lookup, refinement and indexing.
#[derive(Default)]
pub struct BackendParts {
    pub indexer: Option<Arc<dyn Indexer>>,
    pub lookup: Option<Arc<dyn ScopedLookup>>,
    pub refiner: Option<Arc<dyn SignatureRefiner>>,
}

impl PerlBackend {
    /// Creates a backend with the default declaration indexer, name lookup
    /// and call-site refiner.
    ///
    /// Must be called inside a tokio runtime: the background indexer is
    /// spawned here.
    pub fn new(client: Client, config: ServerConfig) -> Self {
        Self::with_parts(client, config, BackendParts::default())
    }

    pub fn with_parts(client: Client, config: ServerConfig, parts: BackendParts) -> Self {
        let index = Arc::new(DocumentIndex::new(config.index_wait));
        let indexer = parts.indexer.unwrap_or_else(|| Arc::new(DeclarationIndexer));
        let lookup = parts.lookup.unwrap_or_else(|| Arc::new(NameLookup));
        let refiner = parts
            .refiner
            .unwrap_or_else(|| Arc::new(CallSiteRefiner::new(Arc::clone(&index))));

        info!(
            "Creating backend (indexer: {}, index wait: {:?} x {})",
            indexer.name(),
            config.index_wait.poll_interval,
            config.index_wait.max_attempts
        );

        let (indexing_tx, indexing_rx) = tokio::sync::mpsc::channel::<IndexingTask>(100);
        let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

        let backend = Self {
            client,
            config,
            documents_by_uri: Arc::new(RwLock::new(HashMap::new())),
            index,
            modules: ModuleMap::new(),
            hover: Arc::new(PerlHover::new(lookup, refiner)),
            indexer,
            indexing_tx,
            next_seq: Arc::new(AtomicU64::new(0)),
            latest_queued: Arc::new(DashMap::new()),
            root_dir: Arc::new(RwLock::new(None)),
            shutdown_tx: Arc::new(shutdown_tx),
        };

        Self::spawn_progressive_indexer(backend.clone(), indexing_rx);

        backend
    }

    /// Shared document index, for collaborators that publish models directly.
    pub fn document_index(&self) -> Arc<DocumentIndex> {
        Arc::clone(&self.index)
    }

    pub fn module_map(&self) -> ModuleMap {
        self.modules.clone()
    }

    /// Spawns the background indexer task
    ///
    /// Tasks are drained in priority order: open documents first, then files
    /// queued by the workspace scan, oldest first within a priority. A task
    /// is indexed and published only while it is the newest one queued for
    /// its URI, so a superseded edit or the disk text of an open buffer never
    /// replaces a newer model.
    fn spawn_progressive_indexer(
        backend: PerlBackend,
        mut indexing_rx: tokio::sync::mpsc::Receiver<IndexingTask>,
    ) {
        let mut shutdown_rx = backend.shutdown_tx.subscribe();

        tokio::spawn(async move {
            use std::cmp::Ordering;
            use std::collections::BinaryHeap;

            #[derive(Eq, PartialEq)]
            struct PrioritizedTask(u8, IndexingTask);

            impl Ord for PrioritizedTask {
                fn cmp(&self, other: &Self) -> Ordering {
                    // Reverse order: lower priority value = higher priority,
                    // then lower sequence = queued earlier
                    other.0.cmp(&self.0).then_with(|| other.1.seq.cmp(&self.1.seq))
                }
            }

            impl PartialOrd for PrioritizedTask {
                fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                    Some(self.cmp(other))
                }
            }

            let mut queue = BinaryHeap::new();

            loop {
                tokio::select! {
                    task = indexing_rx.recv() => {
                        let Some(task) = task else {
                            debug!("Indexing channel closed");
                            break;
                        };
                        queue.push(PrioritizedTask(task.priority, task));

                        // Drain any immediately available tasks
                        while let Ok(task) = indexing_rx.try_recv() {
                            queue.push(PrioritizedTask(task.priority, task));
                        }

                        while let Some(PrioritizedTask(_, task)) = queue.pop() {
                            if !backend.is_latest(&task) {
                                trace!("Skipping superseded indexing of {} (seq {})", task.uri, task.seq);
                                continue;
                            }
                            let indexer = Arc::clone(&backend.indexer);
                            let uri = task.uri.clone();
                            let text = Arc::clone(&task.text);
                            match tokio::task::spawn_blocking(move || indexer.index(&uri, &text)).await {
                                Ok(model) if backend.is_latest(&task) => {
                                    backend.index.publish(task.uri.clone(), model);
                                    trace!("Indexed {} (priority {})", task.uri, task.priority);
                                }
                                Ok(_) => trace!("Dropping superseded model for {}", task.uri),
                                Err(e) => warn!("Failed to index {}: {}", task.uri, e),
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Progressive indexer received shutdown signal, exiting gracefully");
                        break;
                    }
                }
            }
            debug!("Progressive indexer task terminated");
        });
    }

    fn is_latest(&self, task: &IndexingTask) -> bool {
        self.latest_queued
            .get(&task.uri)
            .is_none_or(|latest| *latest == task.seq)
    }

    /// Queues `text` for indexing under `uri`, superseding any task still
    /// pending for it.
    async fn queue_indexing(&self, uri: tower_lsp::lsp_types::Url, text: String, priority: u8) {
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::SeqCst);
        self.latest_queued.insert(uri.clone(), seq);
        let task = IndexingTask {
            uri: uri.clone(),
            text: Arc::new(text),
            priority,
            seq,
        };
        if let Err(e) = self.indexing_tx.send(task).await {
            warn!("Failed to queue indexing task for {}: {}", uri, e);
        }
    }
}
