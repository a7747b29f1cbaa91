//! The immutable input of a run: sources, their graph and their addresses

use crate::addressing::{AddressingConvention, ModuleMap};
use polyport_graph::{DependencyGraph, DependencyMapper, DependencyRelation, FileId, GraphError, SourceFile};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Parsed sources plus derived structure; read-only once built
#[derive(Debug, Clone)]
pub struct Project {
    sources: BTreeMap<FileId, Arc<SourceFile>>,
    graph: Arc<DependencyGraph>,
    modules: Arc<ModuleMap>,
}

impl Project {
    /// Build from sources and an explicit dependency relation
    ///
    /// # Errors
    /// `GraphError` when the relation names a file that is not among `sources`.
    pub fn new(
        sources: impl IntoIterator<Item = SourceFile>,
        relation: &DependencyRelation,
        addressing: &dyn AddressingConvention,
    ) -> Result<Self, GraphError> {
        let mut by_id = BTreeMap::new();
        for source in sources {
            let id = source.id.clone();
            if by_id.insert(id.clone(), Arc::new(source)).is_some() {
                warn!(file = %id, "Duplicate source file, keeping the last one");
            }
        }
        let graph = DependencyGraph::build(by_id.keys().cloned(), relation)?;
        let modules = ModuleMap::new(by_id.keys(), addressing);
        info!(
            files = graph.len(),
            edges = graph.edge_count(),
            layers = graph.layer_count(),
            cycles = graph.cycles().count(),
            "Project graph built"
        );
        Ok(Self {
            sources: by_id,
            graph: Arc::new(graph),
            modules: Arc::new(modules),
        })
    }

    /// Build with the relation derived from symbol tables, plus `includes`
    pub fn from_sources(
        sources: Vec<SourceFile>,
        includes: &DependencyRelation,
        addressing: &dyn AddressingConvention,
    ) -> Result<Self, GraphError> {
        let mut mapper = DependencyMapper::from_sources(&sources);
        for (file, targets) in includes {
            for target in targets {
                mapper.add_file_dependency(file, target);
            }
        }
        let relation = mapper.into_relation();
        Self::new(sources, &relation, addressing)
    }

    /// Dependency graph
    #[inline]
    #[must_use]
    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    /// Module addresses
    #[inline]
    #[must_use]
    pub fn modules(&self) -> &Arc<ModuleMap> {
        &self.modules
    }

    /// One source
    #[must_use]
    pub fn source(&self, file: &FileId) -> Option<&Arc<SourceFile>> {
        self.sources.get(file)
    }

    /// All sources by id
    pub fn sources(&self) -> impl Iterator<Item = &Arc<SourceFile>> {
        self.sources.values()
    }

    /// Number of files
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::PythonAddressing;
    use polyport_graph::{Symbol, SymbolKind, SymbolTable};
    use std::collections::BTreeSet;

    #[test]
    fn symbols_and_includes_combine() {
        let list = SourceFile::new("list.c", "")
            .with_symbols(SymbolTable::new().with_definition(Symbol::new("list_new", SymbolKind::Function)));
        let main = SourceFile::new("main.c", "").with_symbols(SymbolTable::new().with_reference("list_new"));
        let config = SourceFile::new("config.h", "");

        let mut includes = DependencyRelation::new();
        includes
            .entry(FileId::new("list.c"))
            .or_default()
            .insert(FileId::new("config.h"));

        let project = Project::from_sources(vec![main, list, config], &includes, &PythonAddressing).unwrap();
        let order: Vec<&str> = project.graph().order().iter().map(FileId::as_str).collect();
        assert_eq!(order, vec!["config.h", "list.c", "main.c"]);
        assert_eq!(project.modules().module_of(&FileId::new("list.c")), Some("list"));
    }

    #[test]
    fn unknown_include_is_graph_error() {
        let mut includes = DependencyRelation::new();
        includes.insert(FileId::new("a.c"), BTreeSet::from([FileId::new("ghost.h")]));
        let result = Project::from_sources(vec![SourceFile::new("a.c", "")], &includes, &PythonAddressing);
        assert!(matches!(result, Err(GraphError::UnknownFile { .. })));
    }
}
