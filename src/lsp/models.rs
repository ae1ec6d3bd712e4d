use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use ropey::Rope;
use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types::Url;

/// Closed set of program element kinds produced by the indexer.
///
/// Each kind travels on the wire as a single-character tag. Tags this build
/// does not recognise are preserved in [`ElementKind::Unknown`] so that a
/// renderer can flag them instead of silently dropping the element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ElementKind {
    LocalSub,
    LocalMethod,
    ImportedSub,
    Inherited,
    Method,
    LocalVar,
    ImportedVar,
    ImportedHash,
    Canonical,
    Constant,
    Package,
    Module,
    Label,
    Class,
    Role,
    Field,
    PathedField,
    Phaser,
    HttpRoute,
    OutlineOnlySub,
    AutoLoadVar,
    Unknown(String),
}

impl ElementKind {
    /// Every known kind, in tag order. Excludes [`ElementKind::Unknown`].
    pub const ALL: [ElementKind; 21] = [
        ElementKind::LocalSub,
        ElementKind::LocalMethod,
        ElementKind::ImportedSub,
        ElementKind::Inherited,
        ElementKind::Method,
        ElementKind::LocalVar,
        ElementKind::ImportedVar,
        ElementKind::ImportedHash,
        ElementKind::Canonical,
        ElementKind::Constant,
        ElementKind::Package,
        ElementKind::Module,
        ElementKind::Label,
        ElementKind::Class,
        ElementKind::Role,
        ElementKind::Field,
        ElementKind::PathedField,
        ElementKind::Phaser,
        ElementKind::HttpRoute,
        ElementKind::OutlineOnlySub,
        ElementKind::AutoLoadVar,
    ];

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "s" => ElementKind::LocalSub,
            "o" => ElementKind::LocalMethod,
            "t" => ElementKind::ImportedSub,
            "i" => ElementKind::Inherited,
            "x" => ElementKind::Method,
            "v" => ElementKind::LocalVar,
            "c" => ElementKind::ImportedVar,
            "h" => ElementKind::ImportedHash,
            "1" => ElementKind::Canonical,
            "n" => ElementKind::Constant,
            "p" => ElementKind::Package,
            "m" => ElementKind::Module,
            "l" => ElementKind::Label,
            "a" => ElementKind::Class,
            "b" => ElementKind::Role,
            "f" => ElementKind::Field,
            "d" => ElementKind::PathedField,
            "e" => ElementKind::Phaser,
            "g" => ElementKind::HttpRoute,
            "j" => ElementKind::OutlineOnlySub,
            "3" => ElementKind::AutoLoadVar,
            other => ElementKind::Unknown(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            ElementKind::LocalSub => "s",
            ElementKind::LocalMethod => "o",
            ElementKind::ImportedSub => "t",
            ElementKind::Inherited => "i",
            ElementKind::Method => "x",
            ElementKind::LocalVar => "v",
            ElementKind::ImportedVar => "c",
            ElementKind::ImportedHash => "h",
            ElementKind::Canonical => "1",
            ElementKind::Constant => "n",
            ElementKind::Package => "p",
            ElementKind::Module => "m",
            ElementKind::Label => "l",
            ElementKind::Class => "a",
            ElementKind::Role => "b",
            ElementKind::Field => "f",
            ElementKind::PathedField => "d",
            ElementKind::Phaser => "e",
            ElementKind::HttpRoute => "g",
            ElementKind::OutlineOnlySub => "j",
            ElementKind::AutoLoadVar => "3",
            ElementKind::Unknown(tag) => tag,
        }
    }

    /// Kinds whose hover shows the object type when one is known.
    pub fn is_object_like(&self) -> bool {
        matches!(
            self,
            ElementKind::LocalVar | ElementKind::ImportedVar | ElementKind::Canonical
        )
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            ElementKind::LocalSub
                | ElementKind::LocalMethod
                | ElementKind::ImportedSub
                | ElementKind::Inherited
                | ElementKind::Method
                | ElementKind::OutlineOnlySub
        )
    }
}

impl From<String> for ElementKind {
    fn from(tag: String) -> Self {
        ElementKind::from_tag(&tag)
    }
}

impl From<ElementKind> for String {
    fn from(kind: ElementKind) -> Self {
        kind.tag().to_string()
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A program entity published by the indexer. Immutable once shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub name: String,
    pub kind: ElementKind,
    /// Inferred object type, or the original name for imported subs.
    #[serde(default)]
    pub type_detail: Option<String>,
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    pub line: u32,
    pub uri: Url,
    #[serde(default)]
    pub signature: Option<Vec<String>>,
}

fn non_empty(s: impl Into<String>) -> Option<String> {
    let s = s.into();
    if s.is_empty() { None } else { Some(s) }
}

impl Element {
    pub fn new(name: impl Into<String>, kind: ElementKind, uri: Url, line: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            type_detail: None,
            package: None,
            value: None,
            line,
            uri,
            signature: None,
        }
    }

    pub fn with_type_detail(mut self, type_detail: impl Into<String>) -> Self {
        self.type_detail = non_empty(type_detail);
        self
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = non_empty(package);
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = non_empty(value);
        self
    }

    pub fn with_signature<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.signature = Some(params.into_iter().map(Into::into).collect());
        self
    }

    /// Name without its package qualifier (`Foo::Bar::baz` -> `baz`).
    pub fn short_name(&self) -> &str {
        self.name.rsplit("::").next().unwrap_or(&self.name)
    }
}

/// Per-file aggregate produced by the indexer.
///
/// Replaced wholesale on every re-index; never mutated after publication.
#[derive(Debug, Clone, Default)]
pub struct DocumentModel {
    /// Unambiguous resolutions keyed by symbol text.
    pub canonical_elems: HashMap<String, Arc<Element>>,
    /// Candidates keyed by symbol text, buckets and keys in discovery order.
    pub elems: IndexMap<String, Vec<Arc<Element>>>,
}

impl DocumentModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a candidate to the bucket for `name`.
    pub fn add_elem(&mut self, name: impl Into<String>, elem: Element) {
        self.elems.entry(name.into()).or_default().push(Arc::new(elem));
    }

    pub fn add_canonical(&mut self, symbol: impl Into<String>, elem: Element) {
        self.canonical_elems.insert(symbol.into(), Arc::new(elem));
    }

    pub fn candidates(&self, name: &str) -> &[Arc<Element>] {
        self.elems.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Snapshot of the workspace module map: module name -> defining document.
pub type ModuleSnapshot = Arc<IndexMap<String, Url>>;

/// Workspace-wide module map with publish-on-write semantics.
///
/// Readers take a cheap `Arc` snapshot; writers replace the whole map, so a
/// reader never observes a partially refreshed map.
#[derive(Debug, Clone, Default)]
pub struct ModuleMap {
    current: Arc<RwLock<ModuleSnapshot>>,
}

impl ModuleMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ModuleSnapshot {
        self.current.read().clone()
    }

    pub fn publish(&self, modules: IndexMap<String, Url>) {
        *self.current.write() = Arc::new(modules);
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.read().is_empty()
    }
}

impl FromIterator<(String, Url)> for ModuleMap {
    fn from_iter<T: IntoIterator<Item = (String, Url)>>(iter: T) -> Self {
        let map = ModuleMap::new();
        map.publish(iter.into_iter().collect());
        map
    }
}

/// Text of an open editor buffer.
#[derive(Debug, Clone)]
pub struct LspDocument {
    pub uri: Url,
    pub text: Rope,
    pub version: i32,
}
