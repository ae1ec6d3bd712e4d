//! Document indexing and workspace module discovery
//!
//! The backend hands document text to an [`Indexer`] and publishes the
//! resulting [`DocumentModel`] into the shared document index. The default
//! [`DeclarationIndexer`] is a line-oriented declaration scanner: it records
//! packages, subs, constants, object system keywords, phasers, labels and
//! lexicals, enough for outline and hover without a full parse.

use std::path::{Component, Path};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use tower_lsp::lsp_types::Url;
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::lsp::models::{DocumentModel, Element, ElementKind};

/// Builds a document model from source text.
pub trait Indexer: Send + Sync {
    fn index(&self, uri: &Url, text: &str) -> DocumentModel;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

static PACKAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*package\s+([A-Za-z_][\w:]*)").expect("valid package pattern"));
static SUB_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(sub|method)\s+([A-Za-z_]\w*)\s*(?:\(([^)]*)\))?").expect("valid sub pattern")
});
static ARGS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"my\s*\(([^)]*)\)\s*=\s*@_").expect("valid argument unpacking pattern")
});
static SHIFT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"my\s+(\$\w+)\s*=\s*shift\b").expect("valid shift pattern"));
static CONSTANT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*use\s+constant\s+([A-Za-z_]\w*)\s*=>\s*([^;]*)").expect("valid constant pattern")
});
static CLASS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(class|role)\s+([A-Za-z_][\w:]*)").expect("valid class pattern"));
static FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*(?:field\s+([$@%]\w+)|has\s+['"]?(\w+))"#).expect("valid field pattern")
});
static PHASER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(BEGIN|END|INIT|CHECK|UNITCHECK|ADJUST)\s*\{").expect("valid phaser pattern")
});
static LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Z_][A-Z0-9_]*)\s*:\s*(?:for|foreach|while|until|\{)").expect("valid label pattern")
});
static LEXICAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bmy\s+([$@%]\w+)(?:\s*=\s*([A-Za-z_][\w:]*)->new\b)?").expect("valid lexical pattern")
});
static LEXICAL_LIST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bmy\s*\(([^)]*)\)").expect("valid lexical list pattern"));

/// How many lines after a `sub` line to look for argument unpacking.
const SIGNATURE_LOOKAHEAD: usize = 3;

fn split_params(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| p.split('=').next().unwrap_or(p).trim().to_string())
        .collect()
}

/// Number of `#` delimiters still to come when `before` ends in a quote-like
/// operator (`s#a#b#`, `qw#x y#`).
fn quote_operator_delimiters(before: &str) -> Option<usize> {
    let word_start = before
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_alphanumeric() || *c == '_')
        .last()
        .map(|(i, _)| i)?;
    let preceded_by_sigil = before[..word_start]
        .chars()
        .next_back()
        .is_some_and(|c| matches!(c, '$' | '@' | '%' | '&' | '>' | ':'));
    if preceded_by_sigil {
        return None;
    }
    match &before[word_start..] {
        "s" | "tr" | "y" => Some(2),
        "m" | "q" | "qq" | "qw" | "qr" | "qx" => Some(1),
        _ => None,
    }
}

/// `line` up to its trailing comment.
///
/// A `#` inside a quoted string, as a quote-like delimiter, or in `$#array`
/// does not start a comment.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut delimiters_left = 0;
    let mut escaped = false;
    let mut prev = None;
    for (i, c) in line.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                delimiters_left -= 1;
                if delimiters_left == 0 {
                    quote = None;
                }
            }
        } else {
            match c {
                '\'' | '"' => {
                    quote = Some(c);
                    delimiters_left = 1;
                }
                '#' if prev == Some('$') => {}
                '#' => match quote_operator_delimiters(&line[..i]) {
                    Some(count) => {
                        quote = Some('#');
                        delimiters_left = count;
                    }
                    None => return &line[..i],
                },
                _ => {}
            }
        }
        prev = Some(c);
    }
    line
}

/// Line-oriented declaration scanner.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclarationIndexer;

impl DeclarationIndexer {
    /// Parameters unpacked at the top of the sub declared on `sub_line`.
    ///
    /// Scans the declaration line and up to [`SIGNATURE_LOOKAHEAD`] lines
    /// after it, stopping at the end of the sub's body or at the next
    /// declaration.
    fn signature_after(lines: &[&str], sub_line: usize) -> Option<Vec<String>> {
        let mut shifted = Vec::new();
        let mut depth = 0i32;
        let mut opened = false;
        for (offset, line) in lines.iter().skip(sub_line).take(SIGNATURE_LOOKAHEAD + 1).enumerate() {
            let code = strip_comment(line);
            if offset > 0 && SUB_RE.is_match(code) {
                break;
            }
            if let Some(caps) = ARGS_RE.captures(code) {
                shifted.extend(split_params(&caps[1]));
                return Some(shifted);
            }
            if let Some(caps) = SHIFT_RE.captures(code) {
                shifted.push(caps[1].to_string());
            }
            for c in code.chars() {
                match c {
                    '{' => {
                        depth += 1;
                        opened = true;
                    }
                    '}' => depth -= 1,
                    _ => {}
                }
            }
            if opened && depth <= 0 {
                break;
            }
        }
        if shifted.is_empty() { None } else { Some(shifted) }
    }
}

impl Indexer for DeclarationIndexer {
    fn index(&self, uri: &Url, text: &str) -> DocumentModel {
        let mut doc = DocumentModel::new();
        let lines: Vec<&str> = text.lines().collect();
        let mut package = "main".to_string();
        let mut packages_seen = Vec::new();

        for (idx, line) in lines.iter().enumerate() {
            let line_no = idx as u32;
            let code = strip_comment(line);

            if let Some(caps) = PACKAGE_RE.captures(code) {
                package = caps[1].to_string();
                packages_seen.push(package.clone());
                doc.add_elem(&package, Element::new(&package, ElementKind::Package, uri.clone(), line_no));
                continue;
            }

            if let Some(caps) = CLASS_RE.captures(code) {
                package = caps[2].to_string();
                packages_seen.push(package.clone());
                let kind = if &caps[1] == "class" { ElementKind::Class } else { ElementKind::Role };
                doc.add_elem(&package, Element::new(&package, kind, uri.clone(), line_no));
                continue;
            }

            if let Some(caps) = SUB_RE.captures(code) {
                let name = caps[2].to_string();
                let kind = if &caps[1] == "method" {
                    ElementKind::LocalMethod
                } else {
                    ElementKind::LocalSub
                };
                let signature = match caps.get(3) {
                    Some(params) => Some(split_params(params.as_str())),
                    None => Self::signature_after(&lines, idx),
                };
                let mut elem = Element::new(format!("{}::{}", package, name), kind, uri.clone(), line_no)
                    .with_package(&package);
                elem.signature = signature;
                if package == "main" {
                    elem.name = name.clone();
                }
                doc.add_elem(&name, elem);
                continue;
            }

            if let Some(caps) = CONSTANT_RE.captures(code) {
                doc.add_elem(
                    &caps[1],
                    Element::new(&caps[1], ElementKind::Constant, uri.clone(), line_no)
                        .with_package(&package)
                        .with_value(caps[2].trim()),
                );
                continue;
            }

            if let Some(caps) = PHASER_RE.captures(code) {
                doc.add_elem(&caps[1], Element::new(&caps[1], ElementKind::Phaser, uri.clone(), line_no));
            }

            if let Some(caps) = FIELD_RE.captures(code) {
                let name = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()).unwrap_or_default();
                if !name.is_empty() {
                    doc.add_elem(
                        name,
                        Element::new(name, ElementKind::Field, uri.clone(), line_no).with_package(&package),
                    );
                }
                continue;
            }

            if let Some(caps) = LABEL_RE.captures(code) {
                doc.add_elem(&caps[1], Element::new(&caps[1], ElementKind::Label, uri.clone(), line_no));
            }

            for caps in LEXICAL_RE.captures_iter(code) {
                let var = &caps[1];
                if var == "$self" {
                    continue;
                }
                let mut elem = Element::new(var, ElementKind::LocalVar, uri.clone(), line_no).with_package(&package);
                if let Some(class) = caps.get(2) {
                    elem = elem.with_type_detail(class.as_str());
                }
                doc.add_elem(var, elem);
            }
            for caps in LEXICAL_LIST_RE.captures_iter(code) {
                for var in split_params(&caps[1]) {
                    if var != "$self" {
                        doc.add_elem(&var, Element::new(&var, ElementKind::LocalVar, uri.clone(), line_no).with_package(&package));
                    }
                }
            }
        }

        // With a single package, every `$self` in the file is an instance of it.
        if let [only] = packages_seen.as_slice() {
            doc.add_canonical(
                "$self",
                Element::new("$self", ElementKind::LocalVar, uri.clone(), 0).with_package(only),
            );
        }

        trace!("Indexed {}: {} symbols", uri, doc.elems.len());
        doc
    }

    fn name(&self) -> &'static str {
        "declaration-scanner"
    }
}

/// Module name for a `.pm` file, relative to the nearest `lib` directory
/// below `root` (or to `root` itself when there is none).
pub fn module_name(root: &Path, path: &Path) -> Option<String> {
    if path.extension().is_none_or(|ext| ext != "pm") {
        return None;
    }
    let relative = path.strip_prefix(root).ok()?.with_extension("");
    let parts: Vec<&str> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    let start = parts.iter().rposition(|p| *p == "lib").map_or(0, |i| i + 1);
    if start >= parts.len() {
        return None;
    }
    Some(parts[start..].join("::"))
}

fn is_skipped_dir(name: &str) -> bool {
    name.starts_with('.') || name == "blib" || name == "node_modules"
}

/// Walk `root` for Perl modules.
///
/// Returns the module map (module name -> file URI) and the list of Perl
/// source files (`.pm`, `.pl`, `.t`) found along the way.
pub fn scan_workspace(root: &Path) -> (IndexMap<String, Url>, Vec<std::path::PathBuf>) {
    let mut modules = IndexMap::new();
    let mut sources = Vec::new();

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !(e.file_type().is_dir() && e.file_name().to_str().is_some_and(is_skipped_dir)));

    for entry in walker.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        let is_perl = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| matches!(ext, "pm" | "pl" | "t"));
        if !is_perl {
            continue;
        }
        if let (Some(name), Ok(uri)) = (module_name(root, path), Url::from_file_path(path)) {
            modules.entry(name).or_insert(uri);
        }
        sources.push(path.to_path_buf());
    }

    debug!("Workspace scan of {:?}: {} modules, {} sources", root, modules.len(), sources.len());
    (modules, sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn mock_url() -> Url {
        Url::parse("file:///ws/lib/My/Thing.pm").unwrap()
    }

    const SOURCE: &str = indoc! {r#"
        package My::Thing;
        use strict;
        use constant MAX_SIZE => 10;

        sub new {
            my ($class, %args) = @_;
            my $self = bless {}, $class;
            return $self;
        }

        sub size {
            my $self = shift;
            my $ua = LWP::UserAgent->new;
            OUTER: for my $i (1..MAX_SIZE) { }
        }

        BEGIN { }
        1;
    "#};

    #[test]
    fn test_indexes_package_and_subs() {
        let doc = DeclarationIndexer.index(&mock_url(), SOURCE);

        let package = &doc.candidates("My::Thing")[0];
        assert_eq!(package.kind, ElementKind::Package);
        assert_eq!(package.line, 0);

        let new = &doc.candidates("new")[0];
        assert_eq!(new.kind, ElementKind::LocalSub);
        assert_eq!(new.name, "My::Thing::new");
        assert_eq!(new.line, 4);
        assert_eq!(new.signature.as_deref(), Some(&["$class".to_string(), "%args".to_string()][..]));

        let size = &doc.candidates("size")[0];
        assert_eq!(size.signature.as_deref(), Some(&["$self".to_string()][..]));
    }

    #[test]
    fn test_indexes_constants_labels_phasers_and_typed_lexicals() {
        let doc = DeclarationIndexer.index(&mock_url(), SOURCE);

        let constant = &doc.candidates("MAX_SIZE")[0];
        assert_eq!(constant.kind, ElementKind::Constant);
        assert_eq!(constant.value.as_deref(), Some("10"));

        assert_eq!(doc.candidates("OUTER")[0].kind, ElementKind::Label);
        assert_eq!(doc.candidates("BEGIN")[0].kind, ElementKind::Phaser);

        let ua = &doc.candidates("$ua")[0];
        assert_eq!(ua.kind, ElementKind::LocalVar);
        assert_eq!(ua.type_detail.as_deref(), Some("LWP::UserAgent"));
    }

    #[test]
    fn test_single_package_makes_self_canonical() {
        let doc = DeclarationIndexer.index(&mock_url(), SOURCE);
        let this = doc.canonical_elems.get("$self").unwrap();
        assert_eq!(this.package.as_deref(), Some("My::Thing"));
        assert!(doc.candidates("$self").is_empty());
    }

    #[test]
    fn test_signature_syntax_and_object_pad() {
        let source = indoc! {r#"
            class Point;
            field $x;
            method move ($dx, $dy = 0) { }
        "#};
        let doc = DeclarationIndexer.index(&mock_url(), source);
        assert_eq!(doc.candidates("Point")[0].kind, ElementKind::Class);
        assert_eq!(doc.candidates("$x")[0].kind, ElementKind::Field);
        let mv = &doc.candidates("move")[0];
        assert_eq!(mv.kind, ElementKind::LocalMethod);
        assert_eq!(mv.signature.as_deref(), Some(&["$dx".to_string(), "$dy".to_string()][..]));
    }

    #[test]
    fn test_signature_stops_at_next_sub() {
        let doc = DeclarationIndexer.index(&mock_url(), "sub empty {}\nsub other { my ($x, $y) = @_; }\n");
        assert_eq!(doc.candidates("empty")[0].signature, None);
        assert_eq!(
            doc.candidates("other")[0].signature.as_deref(),
            Some(&["$x".to_string(), "$y".to_string()][..])
        );
    }

    #[test]
    fn test_signature_stops_at_end_of_body() {
        let source = indoc! {r#"
            sub short {
                return 1;
            }
            my ($late) = @_;
        "#};
        let doc = DeclarationIndexer.index(&mock_url(), source);
        assert_eq!(doc.candidates("short")[0].signature, None);
    }

    #[test]
    fn test_hash_that_does_not_start_a_comment() {
        assert_eq!(strip_comment("my $n = $#items; # last index"), "my $n = $#items; ");
        assert_eq!(strip_comment(r#"my $sep = '#'; my $x = 1;"#), r#"my $sep = '#'; my $x = 1;"#);
        assert_eq!(strip_comment("(my $path = $p) =~ s#/+#/#g; # squash"), "(my $path = $p) =~ s#/+#/#g; ");
        assert_eq!(strip_comment("my @w = qw#a b#;"), "my @w = qw#a b#;");
        assert_eq!(strip_comment(r##"my $q = "say \"#\""; # quoted"##), r##"my $q = "say \"#\""; "##);
    }

    #[test]
    fn test_declarations_after_hash_are_indexed() {
        let doc = DeclarationIndexer.index(&mock_url(), "my $last = $#list; my $total = 0;\n");
        assert_eq!(doc.candidates("$last")[0].line, 0);
        assert_eq!(doc.candidates("$total")[0].line, 0);
    }

    #[test]
    fn test_module_name_from_lib_path() {
        let root = Path::new("/ws");
        assert_eq!(module_name(root, Path::new("/ws/lib/Foo/Bar.pm")).as_deref(), Some("Foo::Bar"));
        assert_eq!(module_name(root, Path::new("/ws/Top.pm")).as_deref(), Some("Top"));
        assert_eq!(module_name(root, Path::new("/ws/script.pl")), None);
    }

    #[test]
    fn test_scan_workspace_finds_modules_and_sources() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib").join("Foo");
        std::fs::create_dir_all(&lib).unwrap();
        std::fs::write(lib.join("Bar.pm"), "package Foo::Bar;\n1;\n").unwrap();
        std::fs::write(dir.path().join("run.pl"), "use Foo::Bar;\n").unwrap();
        let hidden = dir.path().join(".git");
        std::fs::create_dir_all(&hidden).unwrap();
        std::fs::write(hidden.join("Ignored.pm"), "").unwrap();

        let (modules, sources) = scan_workspace(dir.path());
        let names: Vec<_> = modules.keys().cloned().collect();
        assert_eq!(names, vec!["Foo::Bar"]);
        assert_eq!(sources.len(), 2);
        assert_eq!(
            modules["Foo::Bar"],
            Url::from_file_path(lib.join("Bar.pm")).unwrap()
        );
    }
}
