//! Verdict taxonomy produced by the verification gate
//!
//! A [`Verdict`] is either `Pass` (possibly with warnings) or `Fail` with one or
//! more [`Failure`]s. Failures are ranked by the [`Stage`] that produced them:
//! syntax > imports > static analysis > tests. Oracle timeouts rank above all
//! of them since no candidate exists to check.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a single finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Info,
    /// Style or suspicious code
    #[default]
    Warning,
    /// Definite defect
    Error,
}

impl Severity {
    /// Classify a lint code by its leading letter (`E`/`F` error, `W` warning)
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code.chars().next() {
            Some('E' | 'F') => Self::Error,
            Some('W') => Self::Warning,
            Some(_) => Self::Info,
            None => Self::Warning,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Pipeline stage that produced a failure, ordered by feedback priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Test execution
    Tests,
    /// Static analysis
    StaticAnalysis,
    /// Import/reference resolution
    Imports,
    /// Syntax validity
    Syntax,
    /// The oracle call itself
    Oracle,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Tests => "tests",
            Self::StaticAnalysis => "static analysis",
            Self::Imports => "imports",
            Self::Syntax => "syntax",
            Self::Oracle => "oracle",
        };
        f.write_str(s)
    }
}

/// A located finding from a check tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// 1-based line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// 1-based column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// Tool-specific code (`E501`, `F401`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Message text
    pub message: String,
    /// Severity
    pub severity: Severity,
}

impl Diagnostic {
    /// Error-severity diagnostic without location
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            line: None,
            column: None,
            code: None,
            message: message.into(),
            severity: Severity::Error,
        }
    }

    /// Warning-severity diagnostic without location
    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(message)
        }
    }

    /// With location
    #[inline]
    #[must_use]
    pub fn at(mut self, line: u32, column: Option<u32>) -> Self {
        self.line = Some(line);
        self.column = column;
        self
    }

    /// With code
    #[inline]
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(col)) => write!(f, "{line}:{col}: ")?,
            (Some(line), None) => write!(f, "{line}: ")?,
            _ => {}
        }
        if let Some(code) = &self.code {
            write!(f, "{code} ")?;
        }
        write!(f, "{} [{}]", self.message, self.severity)
    }
}

/// An import the gate could not resolve
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnresolvedRef {
    /// Module path as written in the candidate
    pub module: String,
    /// Line of the import statement
    pub line: u32,
    /// Why it did not resolve
    pub reason: String,
}

impl fmt::Display for UnresolvedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: `{}` {}", self.line, self.module, self.reason)
    }
}

/// A failing test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    /// Test identifier
    pub name: String,
    /// Failure message
    pub message: String,
}

/// One failing check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    /// Candidate is not valid target-language code
    Syntax {
        /// Parser diagnostics
        diagnostics: Vec<Diagnostic>,
    },
    /// Imports that resolve to nothing visible
    Imports {
        /// Unresolved modules
        unresolved: Vec<UnresolvedRef>,
    },
    /// Lint findings at or above the failure threshold
    StaticAnalysis {
        /// Findings
        findings: Vec<Diagnostic>,
    },
    /// Failing tests
    Tests {
        /// Failures
        failures: Vec<TestFailure>,
    },
    /// A check tool crashed instead of reporting findings
    Tool {
        /// Stage whose tool broke
        stage: Stage,
        /// Crash description
        message: String,
    },
    /// A stage exceeded its time limit
    Timeout {
        /// Stage that timed out
        stage: Stage,
        /// Limit that expired
        after_ms: u64,
    },
}

impl Failure {
    /// Stage that produced this failure
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Syntax { .. } => Stage::Syntax,
            Self::Imports { .. } => Stage::Imports,
            Self::StaticAnalysis { .. } => Stage::StaticAnalysis,
            Self::Tests { .. } => Stage::Tests,
            Self::Tool { stage, .. } | Self::Timeout { stage, .. } => *stage,
        }
    }

    /// Tooling breakage rather than a translation defect
    #[inline]
    #[must_use]
    pub fn is_tooling(&self) -> bool {
        matches!(self, Self::Tool { .. })
    }

    /// Short label, e.g. `FailSyntax`
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Syntax { .. } => "FailSyntax",
            Self::Imports { .. } => "FailImports",
            Self::StaticAnalysis { .. } => "FailStaticAnalysis",
            Self::Tests { .. } => "FailTests",
            Self::Tool { .. } => "ToolError",
            Self::Timeout { .. } => "Timeout",
        }
    }

    /// Human-readable detail lines
    #[must_use]
    pub fn detail_lines(&self) -> Vec<String> {
        match self {
            Self::Syntax { diagnostics } => diagnostics.iter().map(ToString::to_string).collect(),
            Self::Imports { unresolved } => unresolved.iter().map(ToString::to_string).collect(),
            Self::StaticAnalysis { findings } => findings.iter().map(ToString::to_string).collect(),
            Self::Tests { failures } => failures
                .iter()
                .map(|t| format!("{}: {}", t.name, t.message))
                .collect(),
            Self::Tool { stage, message } => vec![format!("{stage} tool error: {message}")],
            Self::Timeout { stage, after_ms } => {
                vec![format!("{stage} did not finish within {after_ms}ms")]
            }
        }
    }
}

/// Result of one verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Verdict {
    /// All enabled stages passed
    Pass {
        /// Non-failing findings
        warnings: Vec<Diagnostic>,
    },
    /// At least one stage failed
    Fail {
        /// Failures, most severe first
        failures: Vec<Failure>,
        /// Non-failing findings
        warnings: Vec<Diagnostic>,
    },
}

impl Verdict {
    /// Clean pass
    #[inline]
    #[must_use]
    pub fn pass() -> Self {
        Self::Pass {
            warnings: Vec::new(),
        }
    }

    /// Single-failure verdict
    #[inline]
    #[must_use]
    pub fn fail(failure: Failure) -> Self {
        Self::Fail {
            failures: vec![failure],
            warnings: Vec::new(),
        }
    }

    /// Check if passed
    #[inline]
    #[must_use]
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass { .. })
    }

    /// Failures, most severe first
    #[must_use]
    pub fn failures(&self) -> &[Failure] {
        match self {
            Self::Pass { .. } => &[],
            Self::Fail { failures, .. } => failures,
        }
    }

    /// Warnings
    #[must_use]
    pub fn warnings(&self) -> &[Diagnostic] {
        match self {
            Self::Pass { warnings } | Self::Fail { warnings, .. } => warnings,
        }
    }

    /// The failure surfaced first in feedback
    #[must_use]
    pub fn primary(&self) -> Option<&Failure> {
        self.failures().first()
    }

    /// Any failure caused by broken tooling
    #[must_use]
    pub fn has_tooling_failure(&self) -> bool {
        self.failures().iter().any(Failure::is_tooling)
    }

    /// Label of the verdict (`Pass` or the primary failure's label)
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.primary().map_or("Pass", Failure::label)
    }

    /// Attach warnings
    #[must_use]
    pub fn with_warnings(mut self, extra: impl IntoIterator<Item = Diagnostic>) -> Self {
        match &mut self {
            Self::Pass { warnings } | Self::Fail { warnings, .. } => warnings.extend(extra),
        }
        self
    }

    /// Combine two verdicts; any failure makes the result a failure
    #[must_use]
    pub fn merge(self, other: Verdict) -> Verdict {
        let (mut failures, mut warnings) = self.into_parts();
        let (other_failures, other_warnings) = other.into_parts();
        failures.extend(other_failures);
        warnings.extend(other_warnings);
        if failures.is_empty() {
            return Verdict::Pass { warnings };
        }
        // stable: equal stages keep insertion order
        failures.sort_by(|a, b| b.stage().cmp(&a.stage()));
        Verdict::Fail { failures, warnings }
    }

    fn into_parts(self) -> (Vec<Failure>, Vec<Diagnostic>) {
        match self {
            Self::Pass { warnings } => (Vec::new(), warnings),
            Self::Fail { failures, warnings } => (failures, warnings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lint_failure() -> Failure {
        Failure::StaticAnalysis {
            findings: vec![Diagnostic::error("unused import").with_code("F401").at(1, Some(1))],
        }
    }

    fn syntax_failure() -> Failure {
        Failure::Syntax {
            diagnostics: vec![Diagnostic::error("invalid syntax").at(3, None)],
        }
    }

    #[test]
    fn severity_from_code() {
        assert_eq!(Severity::from_code("E501"), Severity::Error);
        assert_eq!(Severity::from_code("F401"), Severity::Error);
        assert_eq!(Severity::from_code("W291"), Severity::Warning);
        assert_eq!(Severity::from_code("C901"), Severity::Info);
        assert!(Severity::Error > Severity::Warning);
    }

    #[test]
    fn stage_priority_order() {
        assert!(Stage::Syntax > Stage::Imports);
        assert!(Stage::Imports > Stage::StaticAnalysis);
        assert!(Stage::StaticAnalysis > Stage::Tests);
        assert!(Stage::Oracle > Stage::Syntax);
    }

    #[test]
    fn merge_orders_by_severity() {
        let merged = Verdict::fail(lint_failure()).merge(Verdict::fail(syntax_failure()));
        assert_eq!(merged.label(), "FailSyntax");
        assert_eq!(merged.failures().len(), 2);
        assert_eq!(merged.failures()[1].stage(), Stage::StaticAnalysis);
    }

    #[test]
    fn merge_of_passes_keeps_warnings() {
        let a = Verdict::pass().with_warnings([Diagnostic::warning("w1")]);
        let b = Verdict::pass().with_warnings([Diagnostic::warning("w2")]);
        let merged = a.merge(b);
        assert!(merged.is_pass());
        assert_eq!(merged.warnings().len(), 2);
    }

    #[test]
    fn tool_failure_is_distinguished() {
        let verdict = Verdict::fail(Failure::Tool {
            stage: Stage::StaticAnalysis,
            message: "segfault".into(),
        });
        assert!(verdict.has_tooling_failure());
        assert_eq!(verdict.label(), "ToolError");
        assert!(!Verdict::fail(lint_failure()).has_tooling_failure());
    }

    #[test]
    fn diagnostic_display() {
        let d = Diagnostic::error("line too long").with_code("E501").at(4, Some(80));
        assert_eq!(d.to_string(), "4:80: E501 line too long [error]");
    }

    #[test]
    fn serde_shape_is_tagged() {
        let json = serde_json::to_value(Verdict::fail(syntax_failure())).unwrap();
        assert_eq!(json["outcome"], "fail");
        assert_eq!(json["failures"][0]["kind"], "syntax");
    }
}
