//! Symbol table produced by the external parser
//!
//! Records what a file defines and which names it references. The
//! [`DependencyMapper`](crate::DependencyMapper) turns cross-file references
//! into dependency edges; the oracle receives definitions as context.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Symbol kind classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    /// Unknown/default kind
    #[default]
    Unknown,
    /// Function
    Function,
    /// Variable or constant
    Variable,
    /// Type alias
    Type,
    /// Struct / record
    Struct,
    /// Preprocessor macro
    Macro,
}

/// Where a symbol is visible
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Visible to other files
    #[default]
    Global,
    /// Private to the defining file
    File,
}

/// A defined symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    /// Symbol name
    pub name: String,
    /// Kind
    #[serde(default)]
    pub kind: SymbolKind,
    /// Type information as rendered by the parser
    #[serde(default)]
    pub type_info: String,
    /// Visibility
    #[serde(default)]
    pub scope: Scope,
}

impl Symbol {
    /// Create a global symbol
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, kind: SymbolKind) -> Self {
        Self {
            name: name.into(),
            kind,
            type_info: String::new(),
            scope: Scope::Global,
        }
    }

    /// With type information
    #[inline]
    #[must_use]
    pub fn with_type(mut self, type_info: impl Into<String>) -> Self {
        self.type_info = type_info.into();
        self
    }

    /// With scope
    #[inline]
    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Whether other files can reference this symbol
    #[inline]
    #[must_use]
    pub fn is_exported(&self) -> bool {
        self.scope == Scope::Global
    }
}

/// Definitions and references of a single file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolTable {
    #[serde(default)]
    definitions: BTreeMap<String, Symbol>,
    #[serde(default)]
    references: BTreeSet<String>,
}

impl SymbolTable {
    /// Create empty table
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition
    ///
    /// Returns `false` and keeps the existing entry when the name is already
    /// defined.
    pub fn define(&mut self, symbol: Symbol) -> bool {
        if self.definitions.contains_key(&symbol.name) {
            tracing::warn!(symbol = %symbol.name, "symbol already defined, keeping first definition");
            return false;
        }
        self.definitions.insert(symbol.name.clone(), symbol);
        true
    }

    /// Record a reference to a name
    pub fn reference(&mut self, name: impl Into<String>) {
        self.references.insert(name.into());
    }

    /// Builder-style definition
    #[inline]
    #[must_use]
    pub fn with_definition(mut self, symbol: Symbol) -> Self {
        self.define(symbol);
        self
    }

    /// Builder-style reference
    #[inline]
    #[must_use]
    pub fn with_reference(mut self, name: impl Into<String>) -> Self {
        self.reference(name);
        self
    }

    /// Look up a definition
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.definitions.get(name)
    }

    /// All definitions, ordered by name
    pub fn definitions(&self) -> impl Iterator<Item = &Symbol> {
        self.definitions.values()
    }

    /// Definitions visible to other files
    pub fn exported(&self) -> impl Iterator<Item = &Symbol> {
        self.definitions.values().filter(|s| s.is_exported())
    }

    /// Referenced names, ordered
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.references.iter().map(String::as_str)
    }

    /// Number of definitions
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether nothing is defined or referenced
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty() && self.references.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_definition_keeps_first() {
        let mut table = SymbolTable::new();
        assert!(table.define(Symbol::new("push", SymbolKind::Function).with_type("void")));
        assert!(!table.define(Symbol::new("push", SymbolKind::Variable)));

        let sym = table.get("push").unwrap();
        assert_eq!(sym.kind, SymbolKind::Function);
        assert_eq!(sym.type_info, "void");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn exported_excludes_file_scope() {
        let table = SymbolTable::new()
            .with_definition(Symbol::new("api", SymbolKind::Function))
            .with_definition(Symbol::new("helper", SymbolKind::Function).with_scope(Scope::File));

        let exported: Vec<_> = table.exported().map(|s| s.name.as_str()).collect();
        assert_eq!(exported, vec!["api"]);
    }

    #[test]
    fn references_are_deduplicated_and_ordered() {
        let table = SymbolTable::new()
            .with_reference("b")
            .with_reference("a")
            .with_reference("b");
        let refs: Vec<_> = table.references().collect();
        assert_eq!(refs, vec!["a", "b"]);
    }

    #[test]
    fn deserializes_from_manifest_shape() {
        let json = r#"{
            "definitions": {"node_new": {"name": "node_new", "kind": "function", "type_info": "Node*"}},
            "references": ["malloc"]
        }"#;
        let table: SymbolTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.get("node_new").unwrap().kind, SymbolKind::Function);
        assert_eq!(table.references().collect::<Vec<_>>(), vec!["malloc"]);
    }
}
