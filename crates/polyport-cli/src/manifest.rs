//! Project manifest: what the external parser and dependency mapper produced
//!
//! ```yaml
//! source_language: c
//! target_language: python
//! root: src
//! files:
//!   - path: list.c
//!     includes: [list.h]
//!     defines:
//!       - { name: list_new, kind: function }
//!     references: [malloc]
//!     tests: [tests/test_list.py]
//!   - path: list.h
//! ```
//!
//! Source text is read from `root/path`; `root` is relative to the manifest.

use polyport_core::{AddressingConvention, Project};
use polyport_graph::{
    AstHandle, DependencyRelation, FileId, GraphError, ParsedSource, SourceFile, Symbol, SymbolTable,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Manifest loading errors
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// File could not be read
    #[error("failed to read {path}: {message}")]
    Io {
        /// Path involved
        path: PathBuf,
        /// OS error text
        message: String,
    },

    /// File is not valid YAML/JSON for a manifest
    #[error("invalid manifest {path}: {message}")]
    Parse {
        /// Manifest path
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Manifest lists no files
    #[error("manifest lists no files")]
    Empty,

    /// Dependency input is malformed
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// One file entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Path relative to the root
    pub path: String,
    /// Project files this one includes
    #[serde(default)]
    pub includes: Vec<String>,
    /// Symbols the file defines
    #[serde(default)]
    pub defines: Vec<Symbol>,
    /// Names the file references
    #[serde(default)]
    pub references: Vec<String>,
    /// Parser tree, forwarded untouched
    #[serde(default)]
    pub ast: Option<serde_json::Value>,
    /// Target-language tests for this file
    #[serde(default)]
    pub tests: Vec<PathBuf>,
}

/// Whole-project description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Source language, overrides the configuration when set
    #[serde(default)]
    pub source_language: Option<String>,
    /// Target language, overrides the configuration when set
    #[serde(default)]
    pub target_language: Option<String>,
    /// Directory holding the sources
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Files in the project
    pub files: Vec<ManifestFile>,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

impl Manifest {
    /// Parse manifest text; JSON when `json`, YAML otherwise
    pub fn parse(text: &str, json: bool, path: &Path) -> Result<Self, ManifestError> {
        let parsed: Result<Self, String> = if json {
            serde_json::from_str(text).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(text).map_err(|e| e.to_string())
        };
        let manifest = parsed.map_err(|message| ManifestError::Parse {
            path: path.to_path_buf(),
            message,
        })?;
        if manifest.files.is_empty() {
            return Err(ManifestError::Empty);
        }
        Ok(manifest)
    }

    /// Read and parse `path`
    pub async fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ManifestError::Io {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        let json = path.extension().is_some_and(|e| e.eq_ignore_ascii_case("json"));
        Self::parse(&text, json, path)
    }

    /// Source root for a manifest located at `manifest_path`
    #[must_use]
    pub fn root_dir(&self, manifest_path: &Path) -> PathBuf {
        if self.root.is_absolute() {
            return self.root.clone();
        }
        manifest_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&self.root)
    }

    /// Include relation declared by the manifest
    #[must_use]
    pub fn includes(&self) -> DependencyRelation {
        let mut relation = DependencyRelation::new();
        for file in &self.files {
            let entry = relation.entry(FileId::new(file.path.as_str())).or_default();
            entry.extend(file.includes.iter().map(|i| FileId::new(i.as_str())));
        }
        relation
    }

    /// Read every source under `root` into parsed source files
    pub async fn read_sources(&self, root: &Path) -> Result<Vec<SourceFile>, ManifestError> {
        let mut sources = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let path = root.join(&file.path);
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| ManifestError::Io {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
            let mut symbols = SymbolTable::new();
            for symbol in &file.defines {
                symbols.define(symbol.clone());
            }
            for name in &file.references {
                symbols.reference(name.as_str());
            }
            let parsed = ParsedSource {
                ast: file.ast.clone().map_or_else(AstHandle::empty, AstHandle::new),
                symbols,
            };
            let tests = file
                .tests
                .iter()
                .map(|t| if t.is_absolute() { t.clone() } else { root.join(t) })
                .collect();
            debug!(file = %file.path, bytes = text.len(), "Read source");
            sources.push(SourceFile {
                tests,
                ..SourceFile::new(file.path.as_str(), text).with_parsed(parsed)
            });
        }
        Ok(sources)
    }

    /// Load sources and build the project
    ///
    /// # Errors
    /// `ManifestError::Graph` when an include names a file outside the manifest.
    pub async fn into_project(
        &self,
        manifest_path: &Path,
        addressing: &dyn AddressingConvention,
    ) -> Result<Project, ManifestError> {
        let root = self.root_dir(manifest_path);
        let sources = self.read_sources(&root).await?;
        info!(root = %root.display(), files = sources.len(), "Manifest loaded");
        Ok(Project::from_sources(sources, &self.includes(), addressing)?)
    }
}
