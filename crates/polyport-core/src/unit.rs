//! Translation unit state
//!
//! Each source file gets one [`TranslationUnit`] that moves through
//! `Pending -> InProgress -> {Converged | Failed | Skipped}` and never back.
//! Fields are private; every mutation goes through a method that checks the
//! transition table and the attempt bound.

use crate::error::UnitStateError;
use crate::hash::ContentHash;
use crate::verdict::Verdict;
use chrono::{DateTime, Utc};
use polyport_graph::FileId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Unit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Not yet scheduled
    #[default]
    Pending,
    /// Attempt loop active
    InProgress,
    /// Passed the gate
    Converged,
    /// Did not pass within the bound
    Failed,
    /// Never attempted
    Skipped,
}

impl UnitStatus {
    /// Terminal states are never left
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Converged | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in progress",
            Self::Converged => "converged",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Get allowed transitions from a state
#[must_use]
pub fn allowed_transitions(from: UnitStatus) -> &'static [UnitStatus] {
    use UnitStatus::*;
    match from {
        Pending => &[InProgress, Skipped],
        InProgress => &[Converged, Failed],
        Converged | Failed | Skipped => &[],
    }
}

/// Validate a transition
pub fn validate_transition(from: UnitStatus, to: UnitStatus) -> Result<(), UnitStateError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(UnitStateError::IllegalTransition { from, to })
    }
}

/// Why a unit was never attempted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Some prerequisite did not converge
    DependencyNotConverged {
        /// The prerequisites that ended `Failed` or `Skipped`
        dependencies: Vec<FileId>,
    },
    /// The supervisor declined
    Declined,
    /// The run was cancelled first
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DependencyNotConverged { dependencies } => {
                let names: Vec<&str> = dependencies.iter().map(FileId::as_str).collect();
                write!(f, "dependencies did not converge: {}", names.join(", "))
            }
            Self::Declined => f.write_str("declined by supervisor"),
            Self::Cancelled => f.write_str("run cancelled"),
        }
    }
}

/// Why an attempted unit failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum FailureCause {
    /// Every allowed attempt produced a failing verdict
    IterationsExhausted,
    /// Transient oracle failures outlasted the retry bound
    OracleUnavailable {
        /// Last error
        message: String,
    },
    /// The oracle refused the request
    OracleRejected {
        /// Backend message
        message: String,
    },
    /// The supervisor rejected the passing candidate
    Declined,
    /// The run was cancelled before a passing verdict
    Cancelled,
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IterationsExhausted => f.write_str("iteration bound reached"),
            Self::OracleUnavailable { message } => write!(f, "oracle unavailable: {message}"),
            Self::OracleRejected { message } => write!(f, "oracle rejected request: {message}"),
            Self::Declined => f.write_str("candidate declined by supervisor"),
            Self::Cancelled => f.write_str("run cancelled"),
        }
    }
}

/// One translate/verify cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u32,
    /// Candidate text (empty when the oracle timed out)
    pub candidate: String,
    /// Hash of `candidate`
    pub candidate_hash: ContentHash,
    /// Gate verdict
    pub verdict: Verdict,
    /// Wall time of the cycle
    pub elapsed_ms: u64,
    /// When the cycle finished
    pub finished_at: DateTime<Utc>,
}

/// Per-file translation state
#[derive(Debug, Clone)]
pub struct TranslationUnit {
    file: FileId,
    status: UnitStatus,
    attempt: u32,
    max_iterations: u32,
    circular: bool,
    current_candidate: String,
    last_verdict: Option<Verdict>,
    history: Vec<AttemptRecord>,
    skip_reason: Option<SkipReason>,
    failure_cause: Option<FailureCause>,
}

impl TranslationUnit {
    /// New pending unit
    #[must_use]
    pub fn new(file: FileId, max_iterations: u32, circular: bool) -> Self {
        Self {
            file,
            status: UnitStatus::Pending,
            attempt: 0,
            max_iterations,
            circular,
            current_candidate: String::new(),
            last_verdict: None,
            history: Vec::new(),
            skip_reason: None,
            failure_cause: None,
        }
    }

    /// File this unit translates
    #[inline]
    #[must_use]
    pub fn file(&self) -> &FileId {
        &self.file
    }

    /// Current status
    #[inline]
    #[must_use]
    pub fn status(&self) -> UnitStatus {
        self.status
    }

    /// Attempts made so far
    #[inline]
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Iteration bound
    #[inline]
    #[must_use]
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Member of a dependency cycle
    #[inline]
    #[must_use]
    pub fn is_circular(&self) -> bool {
        self.circular
    }

    /// Latest candidate (empty before the first attempt)
    #[inline]
    #[must_use]
    pub fn current_candidate(&self) -> &str {
        &self.current_candidate
    }

    /// Latest verdict
    #[inline]
    #[must_use]
    pub fn last_verdict(&self) -> Option<&Verdict> {
        self.last_verdict.as_ref()
    }

    /// All attempts, oldest first
    #[inline]
    #[must_use]
    pub fn history(&self) -> &[AttemptRecord] {
        &self.history
    }

    /// Set when `Skipped`
    #[inline]
    #[must_use]
    pub fn skip_reason(&self) -> Option<&SkipReason> {
        self.skip_reason.as_ref()
    }

    /// Set when `Failed`
    #[inline]
    #[must_use]
    pub fn failure_cause(&self) -> Option<&FailureCause> {
        self.failure_cause.as_ref()
    }

    /// The accepted candidate, only once `Converged`
    #[must_use]
    pub fn final_candidate(&self) -> Option<&str> {
        (self.status == UnitStatus::Converged).then_some(self.current_candidate.as_str())
    }

    /// Room for another attempt
    #[inline]
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_iterations
    }

    /// `Pending -> InProgress`
    pub fn begin(&mut self) -> Result<(), UnitStateError> {
        self.transition(UnitStatus::InProgress)
    }

    /// Start the next attempt and return its number
    pub fn next_attempt(&mut self) -> Result<u32, UnitStateError> {
        self.require_in_progress()?;
        if !self.can_retry() {
            return Err(UnitStateError::AttemptBoundReached {
                max: self.max_iterations,
            });
        }
        self.attempt += 1;
        Ok(self.attempt)
    }

    /// Record the outcome of the current attempt
    ///
    /// Returns `true` when the candidate repeats an earlier one.
    pub fn record(
        &mut self,
        candidate: String,
        verdict: Verdict,
        elapsed: Duration,
    ) -> Result<bool, UnitStateError> {
        self.require_in_progress()?;
        let candidate_hash = ContentHash::of_text(&candidate);
        let repeated = !candidate.is_empty()
            && self.history.iter().any(|r| r.candidate_hash == candidate_hash);
        self.history.push(AttemptRecord {
            attempt: self.attempt,
            candidate: candidate.clone(),
            candidate_hash,
            verdict: verdict.clone(),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            finished_at: Utc::now(),
        });
        self.current_candidate = candidate;
        self.last_verdict = Some(verdict);
        Ok(repeated)
    }

    /// `InProgress -> Converged`; needs a passing last verdict
    pub fn converge(&mut self) -> Result<(), UnitStateError> {
        self.require_in_progress()?;
        if !self.last_verdict.as_ref().is_some_and(Verdict::is_pass) {
            return Err(UnitStateError::NotPassing);
        }
        self.transition(UnitStatus::Converged)
    }

    /// `InProgress -> Failed`
    pub fn fail(&mut self, cause: FailureCause) -> Result<(), UnitStateError> {
        self.transition(UnitStatus::Failed)?;
        self.failure_cause = Some(cause);
        Ok(())
    }

    /// `Pending -> Skipped`
    pub fn skip(&mut self, reason: SkipReason) -> Result<(), UnitStateError> {
        self.transition(UnitStatus::Skipped)?;
        self.skip_reason = Some(reason);
        Ok(())
    }

    fn require_in_progress(&self) -> Result<(), UnitStateError> {
        if self.status == UnitStatus::InProgress {
            Ok(())
        } else {
            Err(UnitStateError::NotInProgress(self.status))
        }
    }

    fn transition(&mut self, to: UnitStatus) -> Result<(), UnitStateError> {
        validate_transition(self.status, to)?;
        self.status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::{Diagnostic, Failure};

    fn unit(max: u32) -> TranslationUnit {
        TranslationUnit::new(FileId::new("list.c"), max, false)
    }

    fn failing() -> Verdict {
        Verdict::fail(Failure::Syntax {
            diagnostics: vec![Diagnostic::error("bad")],
        })
    }

    #[test]
    fn test_valid_transitions() {
        assert!(validate_transition(UnitStatus::Pending, UnitStatus::InProgress).is_ok());
        assert!(validate_transition(UnitStatus::Pending, UnitStatus::Skipped).is_ok());
        assert!(validate_transition(UnitStatus::InProgress, UnitStatus::Converged).is_ok());
        assert!(validate_transition(UnitStatus::InProgress, UnitStatus::Failed).is_ok());
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(validate_transition(UnitStatus::InProgress, UnitStatus::Pending).is_err());
        assert!(validate_transition(UnitStatus::Pending, UnitStatus::Converged).is_err());
        assert!(validate_transition(UnitStatus::InProgress, UnitStatus::Skipped).is_err());
        for terminal in [UnitStatus::Converged, UnitStatus::Failed, UnitStatus::Skipped] {
            assert!(allowed_transitions(terminal).is_empty());
        }
    }

    #[test]
    fn attempts_are_bounded() {
        let mut u = unit(2);
        u.begin().unwrap();
        assert_eq!(u.next_attempt().unwrap(), 1);
        assert_eq!(u.next_attempt().unwrap(), 2);
        assert_eq!(
            u.next_attempt(),
            Err(UnitStateError::AttemptBoundReached { max: 2 })
        );
        assert_eq!(u.attempt(), 2);
    }

    #[test]
    fn attempt_requires_in_progress() {
        let mut u = unit(3);
        assert_eq!(
            u.next_attempt(),
            Err(UnitStateError::NotInProgress(UnitStatus::Pending))
        );
    }

    #[test]
    fn converge_requires_pass() {
        let mut u = unit(3);
        u.begin().unwrap();
        u.next_attempt().unwrap();
        u.record("x = (".into(), failing(), Duration::ZERO).unwrap();
        assert_eq!(u.converge(), Err(UnitStateError::NotPassing));

        u.next_attempt().unwrap();
        u.record("x = 1".into(), Verdict::pass(), Duration::ZERO).unwrap();
        u.converge().unwrap();
        assert_eq!(u.final_candidate(), Some("x = 1"));
        assert_eq!(u.history().len(), 2);
    }

    #[test]
    fn repeated_candidate_detected() {
        let mut u = unit(3);
        u.begin().unwrap();
        u.next_attempt().unwrap();
        assert!(!u.record("a".into(), failing(), Duration::ZERO).unwrap());
        u.next_attempt().unwrap();
        assert!(u.record("a".into(), failing(), Duration::ZERO).unwrap());
    }

    #[test]
    fn no_backward_transitions() {
        let mut u = unit(1);
        u.begin().unwrap();
        assert!(u.begin().is_err());
        u.fail(FailureCause::IterationsExhausted).unwrap();
        assert!(u.skip(SkipReason::Cancelled).is_err());
        assert_eq!(u.status(), UnitStatus::Failed);
        assert_eq!(u.final_candidate(), None);
    }

    #[test]
    fn skip_records_reason() {
        let mut u = unit(3);
        u.skip(SkipReason::Declined).unwrap();
        assert_eq!(u.skip_reason(), Some(&SkipReason::Declined));
        assert_eq!(u.attempt(), 0);
    }
}
