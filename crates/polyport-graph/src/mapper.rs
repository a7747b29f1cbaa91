//! Dependency mapping between project files
//!
//! Collects explicit includes and symbol-level facts and derives the
//! file-level [`DependencyRelation`] handed to
//! [`DependencyGraph::build`](crate::DependencyGraph::build).

use crate::types::{DependencyRelation, FileId, SourceFile};
use std::collections::{BTreeMap, BTreeSet};

/// Maps dependencies between files of a project
#[derive(Debug, Clone, Default)]
pub struct DependencyMapper {
    dependencies: BTreeMap<FileId, BTreeSet<FileId>>,
    dependents: BTreeMap<FileId, BTreeSet<FileId>>,
    file_symbols: BTreeMap<FileId, BTreeSet<String>>,
    symbol_files: BTreeMap<String, BTreeSet<FileId>>,
}

impl DependencyMapper {
    /// Create empty mapper
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from parsed sources
    ///
    /// Definitions are registered before references so that declaration order
    /// across files does not matter.
    #[must_use]
    pub fn from_sources<'a>(sources: impl IntoIterator<Item = &'a SourceFile> + Clone) -> Self {
        let mut mapper = Self::new();
        for source in sources.clone() {
            mapper.register_file(&source.id);
            for symbol in source.parsed.symbols.exported() {
                mapper.add_symbol_definition(&source.id, &symbol.name);
            }
        }
        for source in sources {
            for name in source.parsed.symbols.references() {
                mapper.add_symbol_reference(&source.id, name);
            }
        }
        mapper
    }

    /// Make a file known without any dependencies
    pub fn register_file(&mut self, file: &FileId) {
        self.dependencies.entry(file.clone()).or_default();
    }

    /// `file` depends on `target`; self-dependencies are ignored
    pub fn add_file_dependency(&mut self, file: &FileId, target: &FileId) {
        if file == target {
            return;
        }
        self.dependencies
            .entry(file.clone())
            .or_default()
            .insert(target.clone());
        self.dependents
            .entry(target.clone())
            .or_default()
            .insert(file.clone());
    }

    /// `file` defines `symbol`
    pub fn add_symbol_definition(&mut self, file: &FileId, symbol: &str) {
        self.file_symbols
            .entry(file.clone())
            .or_default()
            .insert(symbol.to_string());
        self.symbol_files
            .entry(symbol.to_string())
            .or_default()
            .insert(file.clone());
    }

    /// `file` references `symbol`
    ///
    /// Adds a dependency on every file currently known to define it.
    /// References to symbols nobody defines (library calls) add nothing.
    pub fn add_symbol_reference(&mut self, file: &FileId, symbol: &str) {
        let defining: Vec<FileId> = self
            .symbol_files
            .get(symbol)
            .map(|files| files.iter().cloned().collect())
            .unwrap_or_default();
        for target in &defining {
            self.add_file_dependency(file, target);
        }
    }

    /// Files that `file` depends on
    #[must_use]
    pub fn dependencies_of(&self, file: &FileId) -> BTreeSet<FileId> {
        self.dependencies.get(file).cloned().unwrap_or_default()
    }

    /// Files that depend on `file`
    #[must_use]
    pub fn dependents_of(&self, file: &FileId) -> BTreeSet<FileId> {
        self.dependents.get(file).cloned().unwrap_or_default()
    }

    /// Symbols defined in `file`
    #[must_use]
    pub fn symbols_of(&self, file: &FileId) -> BTreeSet<String> {
        self.file_symbols.get(file).cloned().unwrap_or_default()
    }

    /// Files defining `symbol`
    #[must_use]
    pub fn files_defining(&self, symbol: &str) -> BTreeSet<FileId> {
        self.symbol_files.get(symbol).cloned().unwrap_or_default()
    }

    /// The accumulated relation
    #[must_use]
    pub fn relation(&self) -> DependencyRelation {
        self.dependencies.clone()
    }

    /// Consume into the relation
    #[must_use]
    pub fn into_relation(self) -> DependencyRelation {
        self.dependencies
    }
}
