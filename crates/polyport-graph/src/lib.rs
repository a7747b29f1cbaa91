//! Polyport Graph
//!
//! Source-side model of a migration project and the ordering built on it:
//! - **SourceFile**: identity, raw text and the parser's output (AST handle
//!   plus symbol table)
//! - **DependencyMapper**: turns includes and symbol definitions/references
//!   into a file-level dependency relation
//! - **DependencyGraph**: cycle-aware, deterministic translation order with
//!   topological layers and `circular` flags
//!
//! # Example
//!
//! ```rust
//! use polyport_graph::{DependencyGraph, DependencyRelation, FileId};
//!
//! let files = [FileId::new("list.c"), FileId::new("main.c")];
//! let mut relation = DependencyRelation::new();
//! relation
//!     .entry(FileId::new("main.c"))
//!     .or_default()
//!     .insert(FileId::new("list.c"));
//!
//! let graph = DependencyGraph::build(files, &relation).unwrap();
//! assert_eq!(graph.order(), &[FileId::new("list.c"), FileId::new("main.c")]);
//! ```

pub mod dag;
pub mod error;
pub mod mapper;
pub mod symbols;
pub mod types;

// Re-exports
pub use dag::{Component, DependencyGraph};
pub use error::GraphError;
pub use mapper::DependencyMapper;
pub use symbols::{Scope, Symbol, SymbolKind, SymbolTable};
pub use types::{AstHandle, DependencyEdge, DependencyRelation, FileId, ParsedSource, SourceFile};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for building translation orders
    pub use crate::{
        DependencyGraph, DependencyMapper, DependencyRelation, FileId, GraphError, SourceFile,
        SymbolTable,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
