//! Error types for graph construction

use crate::types::FileId;

/// Dependency graph construction errors
///
/// Any of these is fatal for a whole run: scheduling never starts on a
/// malformed dependency relation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// The relation names a file that is not part of the input set
    #[error("unknown file {file}{}", .referenced_by.as_ref().map(|r| format!(" (referenced by {r})")).unwrap_or_default())]
    UnknownFile {
        /// The unknown file
        file: FileId,
        /// File whose dependency list mentioned it, if any
        referenced_by: Option<FileId>,
    },
}

impl GraphError {
    /// The offending file
    #[inline]
    #[must_use]
    pub fn file(&self) -> &FileId {
        match self {
            Self::UnknownFile { file, .. } => file,
        }
    }
}
