//! Core source-side types
//!
//! Defines the immutable inputs of a migration run:
//! - File identities
//! - Parsed source files (text + AST handle + symbol table)
//! - Dependency edges and the raw dependency relation

use crate::symbols::SymbolTable;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Logical identity of a source file (its project-relative path)
///
/// Ordering is lexical and is the stable secondary key used to break cycles.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// Create a file id, normalising path separators to `/`
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        let raw: String = path.into();
        Self(raw.replace('\\', "/"))
    }

    /// Build from a path relative to the project root
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        Self::new(path.to_string_lossy().into_owned())
    }

    /// Borrow as string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name without directories and extension
    #[must_use]
    pub fn stem(&self) -> &str {
        let name = self.0.rsplit('/').next().unwrap_or(&self.0);
        match name.rfind('.') {
            Some(0) | None => name,
            Some(idx) => &name[..idx],
        }
    }

    /// Path without extension, still `/`-separated
    #[must_use]
    pub fn without_extension(&self) -> &str {
        let name_start = self.0.rfind('/').map_or(0, |i| i + 1);
        match self.0[name_start..].rfind('.') {
            Some(0) | None => &self.0,
            Some(idx) => &self.0[..name_start + idx],
        }
    }

    /// As a relative filesystem path
    #[must_use]
    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FileId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl AsRef<str> for FileId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Opaque handle to the parser's syntax tree
///
/// The tree is produced externally and only forwarded (e.g. as oracle
/// context); it is never inspected here. Cheap to clone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AstHandle(Arc<serde_json::Value>);

impl AstHandle {
    /// Wrap a parser-produced tree
    #[inline]
    #[must_use]
    pub fn new(tree: serde_json::Value) -> Self {
        Self(Arc::new(tree))
    }

    /// Handle with no tree attached
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether a tree is attached
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_null()
    }

    /// Borrow the raw tree
    #[inline]
    #[must_use]
    pub fn tree(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Parser output for one file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedSource {
    /// Syntax tree handle
    #[serde(default)]
    pub ast: AstHandle,
    /// Symbols defined and referenced by the file
    #[serde(default)]
    pub symbols: SymbolTable,
}

/// One source file of the project being migrated
///
/// Immutable once parsed; shared read-only for the whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    /// File identity
    pub id: FileId,
    /// Raw source text
    pub text: String,
    /// Parser output
    #[serde(default)]
    pub parsed: ParsedSource,
    /// Target-language test files the project defines for this unit
    #[serde(default)]
    pub tests: Vec<PathBuf>,
}

impl SourceFile {
    /// Create an unparsed source file
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<FileId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            parsed: ParsedSource::default(),
            tests: Vec::new(),
        }
    }

    /// With parser output
    #[inline]
    #[must_use]
    pub fn with_parsed(mut self, parsed: ParsedSource) -> Self {
        self.parsed = parsed;
        self
    }

    /// With symbol table (keeps the AST handle)
    #[inline]
    #[must_use]
    pub fn with_symbols(mut self, symbols: SymbolTable) -> Self {
        self.parsed.symbols = symbols;
        self
    }

    /// With a test file
    #[inline]
    #[must_use]
    pub fn with_test(mut self, test: impl Into<PathBuf>) -> Self {
        self.tests.push(test.into());
        self
    }

    /// Whether the project defines tests for this unit
    #[inline]
    #[must_use]
    pub fn has_tests(&self) -> bool {
        !self.tests.is_empty()
    }
}

/// `file` may only be finalised after `depends_on`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Dependent file
    pub file: FileId,
    /// File it depends on
    pub depends_on: FileId,
}

impl DependencyEdge {
    /// Create an edge
    #[inline]
    #[must_use]
    pub fn new(file: impl Into<FileId>, depends_on: impl Into<FileId>) -> Self {
        Self {
            file: file.into(),
            depends_on: depends_on.into(),
        }
    }

    /// Self-edges are never part of a graph
    #[inline]
    #[must_use]
    pub fn is_self_edge(&self) -> bool {
        self.file == self.depends_on
    }
}

/// Raw dependency relation: file -> files it depends on
pub type DependencyRelation = BTreeMap<FileId, BTreeSet<FileId>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_id_normalises_separators() {
        let id = FileId::new("src\\util\\list.c");
        assert_eq!(id.as_str(), "src/util/list.c");
    }

    #[test]
    fn file_id_stem_and_extension() {
        let id = FileId::new("src/util/list.c");
        assert_eq!(id.stem(), "list");
        assert_eq!(id.without_extension(), "src/util/list");

        let bare = FileId::new("Makefile");
        assert_eq!(bare.stem(), "Makefile");
        assert_eq!(bare.without_extension(), "Makefile");

        let hidden = FileId::new("dir/.config");
        assert_eq!(hidden.stem(), ".config");
        assert_eq!(hidden.without_extension(), "dir/.config");
    }

    #[test]
    fn file_ids_order_lexically() {
        let mut ids = vec![FileId::new("b.c"), FileId::new("a.c"), FileId::new("a/z.c")];
        ids.sort();
        assert_eq!(ids, vec![FileId::new("a.c"), FileId::new("a/z.c"), FileId::new("b.c")]);
    }

    #[test]
    fn source_file_builder() {
        let file = SourceFile::new("list.c", "int x;").with_test("tests/test_list.py");
        assert!(file.has_tests());
        assert!(file.parsed.ast.is_empty());
    }

    #[test]
    fn self_edge_detection() {
        assert!(DependencyEdge::new("a.c", "a.c").is_self_edge());
        assert!(!DependencyEdge::new("a.c", "b.c").is_self_edge());
    }
}
