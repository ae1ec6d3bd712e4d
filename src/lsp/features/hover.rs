//! Hover descriptions for indexed elements
//!
//! # Architecture
//!
//! ```text
//! User hovers over symbol
//!       ↓
//! PerlHover::hover()
//!       ├─→ symbol_at: extract token (sigils, ::, -> included)
//!       ├─→ resolve_element: canonical map, else scoped lookup (exactly one)
//!       ├─→ SignatureRefiner: call-site signature (advisory)
//!       └─→ build_hover_doc: kind-dispatched description
//! ```
//!
//! Every failure on this path is a silent "no hover": unresolved or ambiguous
//! symbols, and kinds that intentionally render nothing.

use std::sync::Arc;

use ropey::Rope;
use tower_lsp::lsp_types::{Hover, HoverContents, MarkedString, Position as LspPosition, Url};
use tracing::{debug, warn};

use crate::lsp::features::symbol_at::symbol_at;
use crate::lsp::features::traits::{HoverContext, ScopedLookup, SignatureRefiner};
use crate::lsp::models::{DocumentModel, Element, ElementKind, ModuleSnapshot};

/// Hover feature wired to a lookup and a refiner.
pub struct PerlHover {
    lookup: Arc<dyn ScopedLookup>,
    refiner: Arc<dyn SignatureRefiner>,
}

impl PerlHover {
    pub fn new(lookup: Arc<dyn ScopedLookup>, refiner: Arc<dyn SignatureRefiner>) -> Self {
        Self { lookup, refiner }
    }

    /// Provide hover information at a given position
    ///
    /// # Returns
    /// `Some(Hover)` with the rendered description, or `None` when there is
    /// nothing worth showing
    pub async fn hover(
        &self,
        uri: &Url,
        position: LspPosition,
        text: &Rope,
        doc: &DocumentModel,
        modules: &ModuleSnapshot,
    ) -> Option<Hover> {
        let symbol = symbol_at(text, position);
        if symbol.is_empty() {
            return None;
        }
        debug!("PerlHover::hover '{}' at {:?} in {}", symbol, position, uri);

        let elem = resolve_element(doc, modules, self.lookup.as_ref(), &symbol, position.line)?;

        let context = HoverContext {
            uri: uri.clone(),
            position,
            symbol,
        };
        let refined = self.refiner.refine(&elem, doc, &context).await;

        let description = build_hover_doc(&context.symbol, &elem, refined.as_deref())?;
        Some(Hover {
            contents: HoverContents::Scalar(MarkedString::String(description)),
            range: None,
        })
    }
}

/// Resolve `symbol` to a single element.
///
/// An exact canonical entry wins without consulting `lookup`. Otherwise the
/// scoped lookup must produce exactly one candidate; zero or several mean
/// there is nothing to show.
pub fn resolve_element(
    doc: &DocumentModel,
    modules: &ModuleSnapshot,
    lookup: &dyn ScopedLookup,
    symbol: &str,
    line: u32,
) -> Option<Arc<Element>> {
    if let Some(elem) = doc.canonical_elems.get(symbol) {
        return Some(Arc::clone(elem));
    }

    let mut candidates = lookup.lookup(doc, modules, symbol, line);
    if candidates.len() != 1 {
        debug!("'{}' resolved to {} candidates, skipping hover", symbol, candidates.len());
        return None;
    }
    candidates.pop()
}

/// `Pkg::Sub::name` -> `Pkg::Sub->name`. Names without a trailing
/// `::word` segment are returned unchanged.
fn arrow_form(name: &str) -> String {
    match name.rsplit_once("::") {
        Some((package, last)) if !last.is_empty() && last.chars().all(|c| c.is_alphanumeric() || c == '_') => {
            format!("{}->{}", package, last)
        }
        _ => name.to_string(),
    }
}

/// `$self`, optionally followed by a non-word character (`$self->x`).
fn is_self_invocant(symbol: &str) -> bool {
    symbol
        .strip_prefix("$self")
        .is_some_and(|rest| !rest.starts_with(|c: char| c.is_alphanumeric() || c == '_'))
}

/// Render the description shown on hover.
///
/// `refined` only contributes its signature; the kind always comes from
/// `elem`. Returns `None` for kinds that intentionally show nothing.
pub fn build_hover_doc(symbol: &str, elem: &Element, refined: Option<&Element>) -> Option<String> {
    let mut name = elem.name.clone();
    let mut sig = String::new();

    if let Some(signature) = refined.and_then(|r| r.signature.as_ref()) {
        // Work on a copy; the refined element may be shared.
        let mut params: Vec<&str> = signature.iter().map(String::as_str).collect();
        if symbol.contains("->") {
            if !params.is_empty() {
                params.remove(0);
            }
            name = arrow_form(&name);
        }
        if !params.is_empty() {
            sig = format!("({})", params.join(", "));
        }
    }

    if elem.kind.is_object_like() {
        if let Some(type_detail) = &elem.type_detail {
            return Some(format!("(object) {}", type_detail));
        }
        // Assumes the enclosing package is the runtime class of $self.
        if is_self_invocant(symbol) {
            if let Some(package) = &elem.package {
                return Some(format!("(object) {}", package));
            }
        }
    }

    let desc = match &elem.kind {
        // Inherited methods can still be plain subs (e.g. a parent's `new`).
        ElementKind::ImportedSub | ElementKind::Inherited => {
            let mut desc = format!("(subroutine) {}{}", name, sig);
            if let Some(original) = elem.type_detail.as_ref().filter(|t| **t != elem.name) {
                desc.push_str(&format!(" ({})", original));
            }
            desc
        }
        ElementKind::LocalSub => format!("(subroutine) {}{}", name, sig),
        ElementKind::LocalMethod | ElementKind::Method => format!("(method) {}{}", name, sig),
        // Not very interesting.
        ElementKind::LocalVar => return None,
        ElementKind::Constant => format!("(constant) {}", symbol),
        ElementKind::ImportedVar => {
            let mut desc = format!("{}: {}", name, elem.value.as_deref().unwrap_or_default());
            if let Some(package) = &elem.package {
                desc.push_str(&format!(" ({})", package));
            }
            desc
        }
        ElementKind::ImportedHash => format!(
            "{}  ({})",
            elem.name,
            elem.package.as_deref().unwrap_or_default()
        ),
        ElementKind::Package => format!("(package) {}", elem.name),
        ElementKind::Module => format!("(module) {}: {}", elem.name, display_path(&elem.uri)),
        ElementKind::Label => format!("(label) {}", symbol),
        ElementKind::Class => format!("(class) {}", symbol),
        ElementKind::Role => format!("(role) {}", symbol),
        ElementKind::Field | ElementKind::PathedField => format!("(attribute) {}", symbol),
        ElementKind::Phaser => format!("(phase) {}", symbol),
        // Routes and outline-only subs cannot be navigated to or hovered.
        ElementKind::HttpRoute | ElementKind::OutlineOnlySub => return None,
        ElementKind::AutoLoadVar => format!("(autoloaded) {}", symbol),
        // Untyped canonical entries have no rendering of their own.
        ElementKind::Canonical | ElementKind::Unknown(_) => {
            warn!("{} ISA '{}', no description available", symbol, elem.kind.tag());
            format!("Unknown: {}", symbol)
        }
    };

    if desc.is_empty() { None } else { Some(desc) }
}

/// Filesystem path for a module's defining document.
fn display_path(uri: &Url) -> String {
    match uri.to_file_path() {
        Ok(path) => path.display().to_string(),
        Err(()) => uri.path().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use indexmap::IndexMap;
    use quickcheck::{Arbitrary, Gen, quickcheck};

    use crate::lsp::document_index::DocumentIndex;
    use crate::lsp::features::traits::{CallSiteRefiner, NameLookup};

    fn uri(path: &str) -> Url {
        Url::parse(&format!("file://{}", path)).unwrap()
    }

    fn elem(name: &str, kind: ElementKind) -> Element {
        Element::new(name, kind, uri("/ws/main.pl"), 0)
    }

    fn no_modules() -> ModuleSnapshot {
        Arc::new(IndexMap::new())
    }

    struct CountingLookup {
        calls: AtomicUsize,
        result: Vec<Arc<Element>>,
    }

    impl CountingLookup {
        fn returning(result: Vec<Element>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                result: result.into_iter().map(Arc::new).collect(),
            }
        }
    }

    impl ScopedLookup for CountingLookup {
        fn lookup(&self, _: &DocumentModel, _: &ModuleSnapshot, _: &str, _: u32) -> Vec<Arc<Element>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    #[test]
    fn test_local_sub_with_signature() {
        let foo = elem("foo", ElementKind::LocalSub).with_signature(["$a", "$b"]);
        assert_eq!(
            build_hover_doc("foo", &foo, Some(&foo)).as_deref(),
            Some("(subroutine) foo($a, $b)")
        );
    }

    #[test]
    fn test_method_call_drops_invocant_and_uses_arrow() {
        let bar = elem("Pkg::bar", ElementKind::Method).with_signature(["$self", "$x"]);
        assert_eq!(
            build_hover_doc("$obj->bar", &bar, Some(&bar)).as_deref(),
            Some("(method) Pkg->bar($x)")
        );
        // The shared signature is untouched.
        assert_eq!(bar.signature.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_method_call_with_only_invocant_has_no_parens() {
        let new = elem("Pkg::new", ElementKind::Method).with_signature(["$class"]);
        assert_eq!(
            build_hover_doc("Pkg->new", &new, Some(&new)).as_deref(),
            Some("(method) Pkg->new")
        );
    }

    #[test]
    fn test_without_refinement_there_is_no_signature() {
        let foo = elem("foo", ElementKind::LocalSub).with_signature(["$a"]);
        assert_eq!(build_hover_doc("foo", &foo, None).as_deref(), Some("(subroutine) foo"));
    }

    #[test]
    fn test_module_renders_file_path() {
        let module = Element::new("Foo::Bar", ElementKind::Module, uri("/a/Foo/Bar.pm"), 0);
        let expected = format!("(module) Foo::Bar: {}", std::path::Path::new("/a/Foo/Bar.pm").display());
        #[cfg(unix)]
        assert_eq!(expected, "(module) Foo::Bar: /a/Foo/Bar.pm");
        assert_eq!(build_hover_doc("Foo::Bar", &module, None), Some(expected));
    }

    #[test]
    fn test_imported_sub_shows_original_name() {
        let imported = elem("dumper", ElementKind::ImportedSub).with_type_detail("Data::Dumper::Dumper");
        assert_eq!(
            build_hover_doc("dumper", &imported, None).as_deref(),
            Some("(subroutine) dumper (Data::Dumper::Dumper)")
        );
        let same = elem("Dumper", ElementKind::ImportedSub).with_type_detail("Dumper");
        assert_eq!(build_hover_doc("Dumper", &same, None).as_deref(), Some("(subroutine) Dumper"));
    }

    #[test]
    fn test_object_type_takes_priority() {
        let var = elem("$ua", ElementKind::LocalVar).with_type_detail("LWP::UserAgent");
        assert_eq!(build_hover_doc("$ua", &var, None).as_deref(), Some("(object) LWP::UserAgent"));
    }

    #[test]
    fn test_self_falls_back_to_package() {
        let var = elem("$self", ElementKind::LocalVar).with_package("My::Class");
        assert_eq!(build_hover_doc("$self", &var, None).as_deref(), Some("(object) My::Class"));
        // Not the invocant convention.
        let other = elem("$selfish", ElementKind::LocalVar).with_package("My::Class");
        assert_eq!(build_hover_doc("$selfish", &other, None), None);
    }

    #[test]
    fn test_imported_var_and_hash() {
        let var = elem("$VERSION", ElementKind::ImportedVar)
            .with_value("1.02")
            .with_package("Foo");
        assert_eq!(build_hover_doc("$VERSION", &var, None).as_deref(), Some("$VERSION: 1.02 (Foo)"));

        let hash = elem("%ENV", ElementKind::ImportedHash).with_package("main");
        assert_eq!(build_hover_doc("%ENV", &hash, None).as_deref(), Some("%ENV  (main)"));
    }

    #[test]
    fn test_silent_kinds() {
        for kind in [ElementKind::LocalVar, ElementKind::HttpRoute, ElementKind::OutlineOnlySub] {
            assert_eq!(build_hover_doc("thing", &elem("thing", kind), None), None);
        }
    }

    #[test]
    fn test_unknown_kind_renders_diagnostic() {
        let odd = elem("weird", ElementKind::Unknown("Z".to_string()));
        assert_eq!(build_hover_doc("weird", &odd, None).as_deref(), Some("Unknown: weird"));
    }

    #[test]
    fn test_untyped_canonical_renders_diagnostic() {
        let untyped = elem("$conf", ElementKind::Canonical);
        assert_eq!(build_hover_doc("$conf", &untyped, None).as_deref(), Some("Unknown: $conf"));
        let typed = elem("$conf", ElementKind::Canonical).with_type_detail("Config::Tiny");
        assert_eq!(build_hover_doc("$conf", &typed, None).as_deref(), Some("(object) Config::Tiny"));
    }

    #[test]
    fn test_every_known_kind_renders_except_silent_ones() {
        for kind in ElementKind::ALL {
            let silent = matches!(
                kind,
                ElementKind::LocalVar | ElementKind::HttpRoute | ElementKind::OutlineOnlySub
            );
            let rendered = build_hover_doc("sym", &elem("sym", kind.clone()), None);
            assert_eq!(rendered.is_none(), silent, "kind {:?}", kind);
        }
    }

    #[derive(Debug, Clone)]
    struct MethodCase {
        params: Vec<String>,
    }

    impl Arbitrary for MethodCase {
        fn arbitrary(g: &mut Gen) -> Self {
            let n = usize::arbitrary(g) % 6 + 1;
            Self {
                params: (0..n).map(|i| format!("$p{}", i)).collect(),
            }
        }
    }

    quickcheck! {
        fn prop_arrow_call_shows_n_minus_one_params(case: MethodCase) -> bool {
            let method = elem("Pkg::m", ElementKind::Method).with_signature(case.params.clone());
            let rendered = build_hover_doc("$o->m", &method, Some(&method)).unwrap();
            let shown = case.params.len() - 1;
            let expected_sig = if shown == 0 {
                String::new()
            } else {
                format!("({})", case.params[1..].join(", "))
            };
            rendered == format!("(method) Pkg->m{}", expected_sig)
        }
    }

    #[test]
    fn test_canonical_match_short_circuits_lookup() {
        let mut doc = DocumentModel::new();
        doc.add_canonical("foo", elem("foo", ElementKind::LocalSub));
        let lookup = CountingLookup::returning(vec![]);
        let found = resolve_element(&doc, &no_modules(), &lookup, "foo", 0);
        assert!(found.is_some());
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_zero_or_many_candidates_resolve_to_nothing() {
        let doc = DocumentModel::new();
        let none = CountingLookup::returning(vec![]);
        assert!(resolve_element(&doc, &no_modules(), &none, "foo", 0).is_none());

        let many = CountingLookup::returning(vec![
            elem("foo", ElementKind::LocalSub),
            elem("foo", ElementKind::ImportedSub),
        ]);
        assert!(resolve_element(&doc, &no_modules(), &many, "foo", 0).is_none());
        assert_eq!(many.calls.load(Ordering::SeqCst), 1);
    }

    fn hover_text(hover: Hover) -> String {
        match hover.contents {
            HoverContents::Scalar(MarkedString::String(s)) => s,
            other => panic!("unexpected hover contents: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_hover_end_to_end() {
        let doc_uri = uri("/ws/main.pl");
        let mut doc = DocumentModel::new();
        doc.add_elem(
            "Pkg::bar",
            Element::new("Pkg::bar", ElementKind::Method, doc_uri.clone(), 1)
                .with_signature(["$self", "$x"]),
        );
        let text = Rope::from_str("my $obj = Pkg->new;\n$obj->bar(1);\n");
        let index = Arc::new(DocumentIndex::default());
        let hover = PerlHover::new(Arc::new(NameLookup), Arc::new(CallSiteRefiner::new(index)));

        let result = hover
            .hover(&doc_uri, LspPosition::new(1, 7), &text, &doc, &no_modules())
            .await
            .unwrap();
        assert_eq!(hover_text(result), "(method) Pkg->bar($x)");
    }

    #[tokio::test]
    async fn test_hover_on_ambiguous_symbol_is_absent() {
        let doc_uri = uri("/ws/main.pl");
        let mut doc = DocumentModel::new();
        doc.add_elem("foo", elem("foo", ElementKind::LocalSub));
        doc.add_elem("foo", elem("foo", ElementKind::ImportedSub));
        let text = Rope::from_str("foo();\n");
        let hover = PerlHover::new(
            Arc::new(NameLookup),
            Arc::new(CallSiteRefiner::new(Arc::new(DocumentIndex::default()))),
        );
        assert!(hover
            .hover(&doc_uri, LspPosition::new(0, 1), &text, &doc, &no_modules())
            .await
            .is_none());
    }
}
