//! Concurrently populated index of document models
//!
//! The indexer publishes a [`DocumentModel`] per URI whenever a document is
//! opened or changed. Requests that arrive before the first publication wait
//! for it with [`DocumentIndex::wait_for`].
//!
//! # Wait contract
//!
//! ```text
//! wait_for(uri)
//!     ├─ model present → return immediately
//!     └─ absent → re-check on every publish notification and on every
//!                 poll tick (100ms); give up after 100 ticks (10s)
//! ```
//!
//! Publication wakes waiters early, so the poll bound only matters when the
//! document never shows up.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tower_lsp::lsp_types::Url;
use tracing::{debug, trace};

use crate::config::IndexWaitConfig;
use crate::lsp::models::DocumentModel;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("no document model for {uri} after {attempts} attempts")]
    DocumentNotFound { uri: Url, attempts: u32 },
}

/// URI-keyed document models with publish notifications.
#[derive(Debug)]
pub struct DocumentIndex {
    documents: DashMap<Url, Arc<DocumentModel>>,
    /// Bumped on every publish so waiters can re-check without polling.
    generation: watch::Sender<u64>,
    wait: IndexWaitConfig,
}

impl DocumentIndex {
    pub fn new(wait: IndexWaitConfig) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            documents: DashMap::new(),
            generation,
            wait,
        }
    }

    pub fn wait_config(&self) -> IndexWaitConfig {
        self.wait
    }

    /// Replaces the model for `uri` wholesale and wakes any waiters.
    pub fn publish(&self, uri: Url, model: DocumentModel) {
        trace!("Publishing document model for {}", uri);
        self.documents.insert(uri, Arc::new(model));
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }

    pub fn remove(&self, uri: &Url) -> Option<Arc<DocumentModel>> {
        self.documents.remove(uri).map(|(_, doc)| doc)
    }

    pub fn get(&self, uri: &Url) -> Option<Arc<DocumentModel>> {
        self.documents.get(uri).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Waits for the model of `uri` to be published.
    ///
    /// Resolves immediately if the model is already present. Otherwise fails
    /// with [`IndexError::DocumentNotFound`] once `max_attempts` poll ticks,
    /// spaced `poll_interval` apart, have passed without it appearing.
    pub async fn wait_for(&self, uri: &Url) -> Result<Arc<DocumentModel>, IndexError> {
        if let Some(doc) = self.get(uri) {
            return Ok(doc);
        }

        debug!("Waiting for document model of {}", uri);
        let mut published = self.generation.subscribe();
        let mut ticker = time::interval(self.wait.poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;

        let mut attempts = 0;
        loop {
            if let Some(doc) = self.get(uri) {
                debug!("Document model for {} available after {} attempts", uri, attempts);
                return Ok(doc);
            }
            if attempts >= self.wait.max_attempts {
                debug!("Gave up waiting for {} after {} attempts", uri, attempts);
                return Err(IndexError::DocumentNotFound {
                    uri: uri.clone(),
                    attempts,
                });
            }

            tokio::select! {
                _ = ticker.tick() => attempts += 1,
                changed = published.changed() => {
                    // The sender lives as long as `self`, so this only fails
                    // during teardown; fall back to plain polling.
                    if changed.is_err() {
                        ticker.tick().await;
                        attempts += 1;
                    }
                }
            }
        }
    }
}

impl Default for DocumentIndex {
    fn default() -> Self {
        Self::new(IndexWaitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::lsp::models::{Element, ElementKind};

    fn mock_url(name: &str) -> Url {
        Url::parse(&format!("file:///tmp/{}.pm", name)).unwrap()
    }

    fn model_with_sub(uri: &Url, name: &str) -> DocumentModel {
        let mut doc = DocumentModel::new();
        doc.add_elem(name, Element::new(name, ElementKind::LocalSub, uri.clone(), 0));
        doc
    }

    #[tokio::test(start_paused = true)]
    async fn test_present_document_resolves_immediately() {
        let index = DocumentIndex::default();
        let uri = mock_url("present");
        index.publish(uri.clone(), model_with_sub(&uri, "foo"));

        let start = time::Instant::now();
        let doc = index.wait_for(&uri).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(doc.candidates("foo").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_document_times_out_after_full_bound() {
        let index = DocumentIndex::default();
        let uri = mock_url("missing");

        let start = time::Instant::now();
        let err = index.wait_for(&uri).await.unwrap_err();
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        match err {
            IndexError::DocumentNotFound { uri: missing, attempts } => {
                assert_eq!(missing, uri);
                assert_eq!(attempts, 100);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_bound_is_respected() {
        let index = DocumentIndex::new(IndexWaitConfig::new(Duration::from_millis(10), 3));
        let start = time::Instant::now();
        assert!(index.wait_for(&mock_url("nope")).await.is_err());
        assert_eq!(start.elapsed(), Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_wakes_waiter_before_next_tick() {
        let index = Arc::new(DocumentIndex::default());
        let uri = mock_url("late");

        let publisher = {
            let index = Arc::clone(&index);
            let uri = uri.clone();
            tokio::spawn(async move {
                time::sleep(Duration::from_millis(250)).await;
                index.publish(uri.clone(), model_with_sub(&uri, "late_sub"));
            })
        };

        let start = time::Instant::now();
        let doc = index.wait_for(&uri).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(250));
        assert_eq!(doc.candidates("late_sub").len(), 1);
        publisher.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrelated_publications_do_not_shorten_the_bound() {
        let index = Arc::new(DocumentIndex::new(IndexWaitConfig::new(Duration::from_millis(100), 5)));
        let target = mock_url("target");

        let noise = {
            let index = Arc::clone(&index);
            tokio::spawn(async move {
                for i in 0..20 {
                    time::sleep(Duration::from_millis(20)).await;
                    let other = mock_url(&format!("other{}", i));
                    index.publish(other.clone(), model_with_sub(&other, "x"));
                }
            })
        };

        let start = time::Instant::now();
        assert!(index.wait_for(&target).await.is_err());
        assert_eq!(start.elapsed(), Duration::from_millis(500));
        noise.await.unwrap();
    }

    #[test]
    fn test_publish_replaces_model_wholesale() {
        let index = DocumentIndex::default();
        let uri = mock_url("replace");
        index.publish(uri.clone(), model_with_sub(&uri, "old"));
        index.publish(uri.clone(), model_with_sub(&uri, "new"));

        let doc = index.get(&uri).unwrap();
        assert!(doc.candidates("old").is_empty());
        assert_eq!(doc.candidates("new").len(), 1);
        assert_eq!(index.len(), 1);
    }
}
