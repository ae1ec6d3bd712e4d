//! Document and workspace symbol lists
//!
//! Both lists use a fixed-width location for every entry: the whole of the
//! declaration line, approximated as characters 0..100, rather than the
//! exact token span.

use tower_lsp::lsp_types::{
    Location, Position as LspPosition, Range, SymbolInformation, SymbolKind, Url,
};
use tracing::debug;

use crate::lsp::document_index::DocumentIndex;
use crate::lsp::models::{DocumentModel, ElementKind, ModuleSnapshot};

/// End character of every emitted symbol range.
pub const SYMBOL_LINE_WIDTH: u32 = 100;

fn line_location(uri: &Url, line: u32) -> Location {
    Location {
        uri: uri.clone(),
        range: Range {
            start: LspPosition { line, character: 0 },
            end: LspPosition {
                line,
                character: SYMBOL_LINE_WIDTH,
            },
        },
    }
}

#[allow(deprecated)]
fn symbol_information(name: String, kind: SymbolKind, location: Location) -> SymbolInformation {
    SymbolInformation {
        name,
        kind,
        tags: None,
        deprecated: None,
        location,
        container_name: None,
    }
}

/// Outline entries for subroutines and packages in `doc`.
///
/// Only the first candidate of each bucket is considered; same-named
/// elements are assumed interchangeable for the outline.
pub fn document_symbols(uri: &Url, doc: &DocumentModel) -> Vec<SymbolInformation> {
    doc.elems
        .iter()
        .filter_map(|(name, elems)| {
            let element = elems.first()?;
            let kind = match element.kind {
                ElementKind::Package => SymbolKind::PACKAGE,
                ElementKind::LocalSub => SymbolKind::FUNCTION,
                _ => return None,
            };
            Some(symbol_information(name.clone(), kind, line_location(uri, element.line)))
        })
        .collect()
}

/// Waits for the document model of `uri` and lists its symbols.
///
/// A document that never gets indexed yields an empty list; the timeout is
/// not reported to the client.
pub async fn get_symbols(index: &DocumentIndex, uri: &Url) -> Vec<SymbolInformation> {
    match index.wait_for(uri).await {
        Ok(doc) => document_symbols(uri, &doc),
        Err(e) => {
            debug!("No document symbols: {}", e);
            Vec::new()
        }
    }
}

/// One module entry per module map entry, in map order.
///
/// The query is not used for filtering; clients fuzzy-match the full list.
pub fn workspace_symbols(_query: &str, modules: &ModuleSnapshot) -> Vec<SymbolInformation> {
    modules
        .iter()
        .map(|(name, uri)| symbol_information(name.clone(), SymbolKind::MODULE, line_location(uri, 0)))
        .collect()
}
