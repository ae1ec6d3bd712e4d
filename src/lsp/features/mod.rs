//! LSP features backed by the document index
//!
//! # Architecture Overview
//!
//! ## 1. Traits Layer (`traits.rs`)
//! Seams to the rest of the language service:
//! - `ScopedLookup` - candidate lookup when the canonical map misses
//! - `SignatureRefiner` - call-site aware signature for the hovered element
//!
//! ## 2. Features Layer
//! - `symbol_at.rs` - token extraction at the cursor
//! - `hover.rs` - element resolution and description rendering
//! - `symbols.rs` - document and workspace symbol lists
//!
//! None of the features report failures to the client: an unresolvable
//! symbol or a document that never gets indexed simply produces no result.

pub mod hover;
pub mod symbol_at;
pub mod symbols;
pub mod traits;

pub use hover::{PerlHover, build_hover_doc, resolve_element};
pub use symbol_at::symbol_at;
pub use symbols::{document_symbols, get_symbols, workspace_symbols};
pub use traits::{CallSiteRefiner, HoverContext, NameLookup, ScopedLookup, SignatureRefiner};
