//! Lookup and refinement seams for hover resolution
//!
//! Hover resolution consults two collaborators:
//!
//! ```text
//! symbol text
//!     ├─→ DocumentModel.canonical_elems   (exact, short-circuits)
//!     ├─→ ScopedLookup                    (line-aware candidates, must yield one)
//!     └─→ SignatureRefiner                (call-site signature, advisory)
//! ```
//!
//! Default implementations work purely from the document index. Richer
//! backends (for example one that asks the interpreter) plug in through the
//! same traits.

use std::sync::Arc;

use tower_lsp::lsp_types::{Position as LspPosition, Url};
use tracing::trace;

use crate::lsp::document_index::DocumentIndex;
use crate::lsp::models::{DocumentModel, Element, ElementKind, ModuleSnapshot};

/// Context for a hover request once the symbol text is known.
#[derive(Debug, Clone)]
pub struct HoverContext {
    /// URI of the document
    pub uri: Url,
    /// Cursor position (LSP coordinates)
    pub position: LspPosition,
    /// Token extracted at the cursor, sigils and arrows included
    pub symbol: String,
}

/// Scoped lookup used when the canonical map has no entry for a symbol.
pub trait ScopedLookup: Send + Sync {
    /// Return every candidate visible for `symbol` at `line`.
    ///
    /// Callers treat anything but exactly one candidate as unresolvable.
    fn lookup(
        &self,
        doc: &DocumentModel,
        modules: &ModuleSnapshot,
        symbol: &str,
        line: u32,
    ) -> Vec<Arc<Element>>;
}

/// Produces a call-site specific element, used only to shape the signature.
#[async_trait::async_trait]
pub trait SignatureRefiner: Send + Sync {
    async fn refine(
        &self,
        elem: &Arc<Element>,
        doc: &DocumentModel,
        context: &HoverContext,
    ) -> Option<Arc<Element>>;
}

/// Default lookup over the document's candidate buckets and the module map.
#[derive(Debug, Default, Clone, Copy)]
pub struct NameLookup;

impl NameLookup {
    fn method_candidates(doc: &DocumentModel, method: &str) -> Vec<Arc<Element>> {
        let qualified_suffix = format!("::{}", method);
        doc.elems
            .iter()
            .filter(|(key, _)| key.as_str() == method || key.ends_with(&qualified_suffix))
            .flat_map(|(_, elems)| elems.iter().filter(|e| e.kind.is_callable()).cloned())
            .collect()
    }
}

impl ScopedLookup for NameLookup {
    fn lookup(
        &self,
        doc: &DocumentModel,
        modules: &ModuleSnapshot,
        symbol: &str,
        line: u32,
    ) -> Vec<Arc<Element>> {
        let mut found = doc.candidates(symbol).to_vec();

        if found.is_empty() {
            if let Some((_, method)) = symbol.rsplit_once("->") {
                found = Self::method_candidates(doc, method);
            }
        }

        if found.is_empty() {
            if let Some(module_uri) = modules.get(symbol) {
                found.push(Arc::new(Element::new(
                    symbol,
                    ElementKind::Module,
                    module_uri.clone(),
                    0,
                )));
            }
        }

        // Lexicals are not in scope before their declaration.
        found.retain(|e| !(e.kind == ElementKind::LocalVar && e.line > line));

        trace!("Scoped lookup of '{}' at line {} found {} candidates", symbol, line, found.len());
        found
    }
}

/// Default refiner: prefer the element's own signature, then a same-named
/// callable in the current document, then one in the element's defining
/// document if that document has been indexed.
#[derive(Debug, Clone)]
pub struct CallSiteRefiner {
    index: Arc<DocumentIndex>,
}

impl CallSiteRefiner {
    pub fn new(index: Arc<DocumentIndex>) -> Self {
        Self { index }
    }

    fn signed_candidate(doc: &DocumentModel, elem: &Element) -> Option<Arc<Element>> {
        doc.candidates(&elem.name)
            .iter()
            .chain(doc.candidates(elem.short_name()))
            .find(|c| c.kind.is_callable() && c.signature.is_some())
            .cloned()
    }
}

#[async_trait::async_trait]
impl SignatureRefiner for CallSiteRefiner {
    async fn refine(
        &self,
        elem: &Arc<Element>,
        doc: &DocumentModel,
        context: &HoverContext,
    ) -> Option<Arc<Element>> {
        if elem.signature.is_some() {
            return Some(Arc::clone(elem));
        }
        if !elem.kind.is_callable() {
            return None;
        }

        if let Some(refined) = Self::signed_candidate(doc, elem) {
            return Some(refined);
        }

        if elem.uri != context.uri {
            let defining = self.index.get(&elem.uri)?;
            return Self::signed_candidate(&defining, elem);
        }
        None
    }
}
