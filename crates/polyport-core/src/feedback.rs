//! Feedback and dependency context handed to the oracle

use crate::unit::AttemptRecord;
use crate::verdict::{Diagnostic, Failure};
use polyport_graph::FileId;
use std::fmt::Write as _;
use std::sync::Arc;

/// Detail lines kept per failure
const MAX_LINES_PER_FAILURE: usize = 20;

/// Structured feedback from a rejected attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Feedback {
    /// Attempt that was rejected
    pub attempt: u32,
    /// The rejected candidate
    pub previous_candidate: String,
    /// Failures, most severe first
    pub failures: Vec<Failure>,
    /// Non-failing findings
    pub warnings: Vec<Diagnostic>,
}

impl Feedback {
    /// Feedback for a failed attempt; `None` when it passed
    #[must_use]
    pub fn from_record(record: &AttemptRecord) -> Option<Self> {
        if record.verdict.is_pass() {
            return None;
        }
        Some(Self {
            attempt: record.attempt,
            previous_candidate: record.candidate.clone(),
            failures: record.verdict.failures().to_vec(),
            warnings: record.verdict.warnings().to_vec(),
        })
    }

    /// The failure to fix first
    #[must_use]
    pub fn primary(&self) -> Option<&Failure> {
        self.failures.first()
    }

    /// Prompt text
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for failure in &self.failures {
            let _ = writeln!(out, "[{}] ({})", failure.label(), failure.stage());
            let lines = failure.detail_lines();
            for line in lines.iter().take(MAX_LINES_PER_FAILURE) {
                let _ = writeln!(out, "  - {line}");
            }
            if lines.len() > MAX_LINES_PER_FAILURE {
                let _ = writeln!(out, "  ... {} more", lines.len() - MAX_LINES_PER_FAILURE);
            }
        }
        if !self.warnings.is_empty() {
            let _ = writeln!(out, "[warnings]");
            for w in self.warnings.iter().take(MAX_LINES_PER_FAILURE) {
                let _ = writeln!(out, "  - {w}");
            }
        }
        if self.previous_candidate.is_empty() {
            let _ = writeln!(out, "(no candidate was produced in the previous attempt)");
        }
        out
    }
}

/// Trust level of a dependency's text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStatus {
    /// Passed the gate
    Converged,
    /// Last candidate of a failed unit
    Unverified,
}

/// A dependency as seen by a dependent
#[derive(Debug, Clone, PartialEq)]
pub struct ContextEntry {
    /// Dependency file
    pub file: FileId,
    /// Module name to import it by
    pub module: String,
    /// Trust level
    pub status: ContextStatus,
    /// Its translation
    pub candidate: Arc<str>,
    /// Symbols it exports
    pub exports: Vec<String>,
}

/// Read-only snapshot of a unit's dependencies
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyContext {
    entries: Vec<ContextEntry>,
    pending_peers: Vec<(FileId, String)>,
}

impl DependencyContext {
    /// Empty context
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a translated dependency
    pub fn push(&mut self, entry: ContextEntry) {
        self.entries.push(entry);
    }

    /// Add a cycle peer that is not translated yet
    pub fn push_pending_peer(&mut self, file: FileId, module: String) {
        self.pending_peers.push((file, module));
    }

    /// Entries in insertion order
    #[must_use]
    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    /// Cycle peers still pending
    #[must_use]
    pub fn pending_peers(&self) -> &[(FileId, String)] {
        &self.pending_peers
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.pending_peers.is_empty()
    }

    /// Prompt text
    #[must_use]
    pub fn render(&self, target_language: &str) -> String {
        if self.is_empty() {
            return "(none)".to_string();
        }
        let mut out = String::new();
        for entry in &self.entries {
            let marker = match entry.status {
                ContextStatus::Converged => "verified",
                ContextStatus::Unverified => "UNVERIFIED, may contain errors",
            };
            let _ = writeln!(out, "module `{}` (from {}, {marker})", entry.module, entry.file);
            if !entry.exports.is_empty() {
                let _ = writeln!(out, "exports: {}", entry.exports.join(", "));
            }
            let _ = writeln!(out, "```{target_language}\n{}\n```", entry.candidate.trim_end());
        }
        for (file, module) in &self.pending_peers {
            let _ = writeln!(
                out,
                "module `{module}` (from {file}) is in a dependency cycle with this file and not translated yet"
            );
        }
        out
    }
}
