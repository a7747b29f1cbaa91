//! Run result: per-unit reports, counts and the assembled output
//!
//! Built once at the end of a run from the terminal unit snapshot.

use crate::addressing::ModuleMap;
use crate::assembler::OutputTree;
use crate::error::PipelineError;
use crate::gate::UNRESOLVED_IMPORT;
use crate::hash::ContentHash;
use crate::unit::{FailureCause, SkipReason, TranslationUnit, UnitStatus};
use crate::verdict::{Failure, Verdict};
use chrono::{DateTime, Utc};
use polyport_graph::FileId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use ulid::Ulid;

/// File name of the JSON report written next to the output tree
pub const REPORT_FILE: &str = "polyport-report.json";

/// Unique run identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Units per terminal status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Converged units
    pub converged: usize,
    /// Failed units
    pub failed: usize,
    /// Skipped units
    pub skipped: usize,
}

impl StatusCounts {
    /// Tally `units`
    #[must_use]
    pub fn of(units: &[TranslationUnit]) -> Self {
        let mut counts = Self::default();
        for unit in units {
            match unit.status() {
                UnitStatus::Converged => counts.converged += 1,
                UnitStatus::Failed => counts.failed += 1,
                UnitStatus::Skipped => counts.skipped += 1,
                UnitStatus::Pending | UnitStatus::InProgress => {}
            }
        }
        counts
    }

    /// Total units counted
    #[must_use]
    pub fn total(&self) -> usize {
        self.converged + self.failed + self.skipped
    }
}

/// One attempt, without its candidate text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    /// 1-based attempt number
    pub attempt: u32,
    /// Hash of the candidate
    pub candidate_hash: ContentHash,
    /// Gate verdict
    pub verdict: Verdict,
    /// Wall time of the cycle
    pub elapsed_ms: u64,
    /// Completion time
    pub finished_at: DateTime<Utc>,
}

/// Report for one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitReport {
    /// Source file
    pub file: FileId,
    /// Canonical target module
    pub module: String,
    /// Relative output path
    pub output_path: PathBuf,
    /// Terminal status
    pub status: UnitStatus,
    /// Attempts made
    pub attempts: u32,
    /// Attempt bound
    pub max_iterations: u32,
    /// Member of a dependency cycle
    pub circular: bool,
    /// Why the unit was skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    /// Why the unit failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_cause: Option<FailureCause>,
    /// Verdict of the last attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verdict: Option<Verdict>,
    /// Every attempt in order
    #[serde(default)]
    pub history: Vec<AttemptSummary>,
}

impl UnitReport {
    fn from_unit(unit: &TranslationUnit, modules: &ModuleMap) -> Self {
        let address = modules.address(unit.file());
        Self {
            file: unit.file().clone(),
            module: address.map(|a| a.module.clone()).unwrap_or_default(),
            output_path: address.map(|a| a.path.clone()).unwrap_or_default(),
            status: unit.status(),
            attempts: unit.attempt(),
            max_iterations: unit.max_iterations(),
            circular: unit.is_circular(),
            skip_reason: unit.skip_reason().cloned(),
            failure_cause: unit.failure_cause().cloned(),
            last_verdict: unit.last_verdict().cloned(),
            history: unit
                .history()
                .iter()
                .map(|r| AttemptSummary {
                    attempt: r.attempt,
                    candidate_hash: r.candidate_hash,
                    verdict: r.verdict.clone(),
                    elapsed_ms: r.elapsed_ms,
                    finished_at: r.finished_at,
                })
                .collect(),
        }
    }
}

/// A cross-file reference that stayed unresolved in a unit's last verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedReference {
    /// Unit containing the import
    pub file: FileId,
    /// Imported module
    pub module: String,
    /// Line of the import
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Why it did not resolve
    pub reason: String,
    /// Reported as a failure rather than a warning
    pub blocking: bool,
}

fn unresolved_of(unit: &TranslationUnit) -> Vec<UnresolvedReference> {
    let Some(verdict) = unit.last_verdict() else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for failure in verdict.failures() {
        if let Failure::Imports { unresolved } = failure {
            out.extend(unresolved.iter().map(|u| UnresolvedReference {
                file: unit.file().clone(),
                module: u.module.clone(),
                line: Some(u.line),
                reason: u.reason.clone(),
                blocking: true,
            }));
        }
    }
    for warning in verdict.warnings() {
        if warning.code.as_deref() != Some(UNRESOLVED_IMPORT) {
            continue;
        }
        let module = warning
            .message
            .split('`')
            .nth(1)
            .unwrap_or_default()
            .to_string();
        out.push(UnresolvedReference {
            file: unit.file().clone(),
            module,
            line: warning.line,
            reason: warning.message.clone(),
            blocking: false,
        });
    }
    out
}

/// Aggregate result of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectResult {
    /// Run identifier
    pub run_id: RunId,
    /// Per-unit reports in graph order
    pub units: Vec<UnitReport>,
    /// Units per terminal status
    pub counts: StatusCounts,
    /// Imports that did not resolve in the units' last verdicts
    pub unresolved_references: Vec<UnresolvedReference>,
    /// Assembled output, present when the acceptance policy allows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputTree>,
    /// Cancellation was requested during the run
    pub cancelled: bool,
    /// Wall time of the run
    pub elapsed_ms: u64,
    /// Run start
    pub started_at: DateTime<Utc>,
}

impl ProjectResult {
    /// Build from the final unit snapshot
    #[must_use]
    pub fn new(
        run_id: RunId,
        units: &[TranslationUnit],
        modules: &ModuleMap,
        output: Option<OutputTree>,
        cancelled: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        let elapsed = Utc::now().signed_duration_since(started_at);
        Self {
            run_id,
            units: units.iter().map(|u| UnitReport::from_unit(u, modules)).collect(),
            counts: StatusCounts::of(units),
            unresolved_references: units.iter().flat_map(unresolved_of).collect(),
            output,
            cancelled,
            elapsed_ms: u64::try_from(elapsed.num_milliseconds()).unwrap_or(0),
            started_at,
        }
    }

    /// Every unit converged
    #[must_use]
    pub fn is_fully_converged(&self) -> bool {
        self.counts.converged == self.units.len()
    }

    /// Report for `file`
    #[must_use]
    pub fn unit(&self, file: &FileId) -> Option<&UnitReport> {
        self.units.iter().find(|u| &u.file == file)
    }

    /// Units that did not converge
    pub fn unconverged(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|u| u.status != UnitStatus::Converged)
    }

    /// Write the output tree (if any) and [`REPORT_FILE`] below `dir`
    ///
    /// # Errors
    /// `PipelineError::Output` on serialization or file-system failure.
    pub async fn write_to(&self, dir: &Path) -> Result<PathBuf, PipelineError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| PipelineError::Output(format!("{}: {e}", dir.display())))?;
        if let Some(output) = &self.output {
            output.write_to(dir).await?;
        }
        let report = dir.join(REPORT_FILE);
        let json = serde_json::to_vec_pretty(self).map_err(|e| PipelineError::Output(e.to_string()))?;
        tokio::fs::write(&report, json)
            .await
            .map_err(|e| PipelineError::Output(format!("{}: {e}", report.display())))?;
        Ok(report)
    }
}
