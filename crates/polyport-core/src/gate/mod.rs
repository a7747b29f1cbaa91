//! Verification gate
//!
//! Checks a candidate in a fixed order and stops at the first failing stage:
//!
//! 1. syntax validity
//! 2. import resolution against visible units and external libraries
//! 3. static analysis, split into failures and warnings by severity
//! 4. tests, when enabled and the unit has any
//!
//! The gate never mutates shared state. Tools only produce raw output; the
//! gate decides what it means.

mod imports;
mod interpret;
mod tools;

pub use imports::{ImportRef, ImportScanner, PythonImports};
pub use interpret::{lint_diagnostics, syntax_diagnostics, test_failures};
pub use tools::{CheckInput, CheckTool, CommandTool, ToolOutcome, ToolOutput};

use crate::addressing::ModuleMap;
use crate::config::PipelineConfig;
use crate::verdict::{Diagnostic, Failure, Severity, Stage, UnresolvedRef, Verdict};
use polyport_graph::FileId;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Code attached to warnings about unresolved imports
pub const UNRESOLVED_IMPORT: &str = "unresolved-import";

/// Gate strictness
#[derive(Debug, Clone, PartialEq)]
pub struct GatePolicy {
    /// Unresolved imports fail the gate
    pub strict_imports: bool,
    /// Lint findings at or above the threshold fail the gate
    pub strict_static_analysis: bool,
    /// Lowest failing lint severity
    pub lint_failure_threshold: Severity,
    /// Run tests
    pub run_tests: bool,
    /// Per-stage limit
    pub timeout: Duration,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for GatePolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            strict_imports: config.strict_imports,
            strict_static_analysis: config.strict_static_analysis,
            lint_failure_threshold: config.lint_failure_threshold,
            run_tests: config.run_tests,
            timeout: config.verify_timeout,
        }
    }
}

/// Identity of the unit under check
#[derive(Debug, Clone, Copy)]
pub struct UnitCheck<'a> {
    /// Source file
    pub file: &'a FileId,
    /// Output path
    pub output_path: &'a Path,
    /// Test files
    pub tests: &'a [PathBuf],
}

/// Read-only view of the project for one unit
#[derive(Debug, Clone, Default)]
pub struct ProjectContext {
    /// Addresses of every project file
    pub modules: Arc<ModuleMap>,
    /// Converged units this unit may import
    pub visible: BTreeSet<FileId>,
    /// Cycle peers importable without having converged
    pub relaxed: BTreeSet<FileId>,
    /// Declared external libraries
    pub external: BTreeSet<String>,
    /// Translations of `visible`, by output path
    pub artifacts: Vec<(PathBuf, Arc<str>)>,
}

#[derive(Debug, PartialEq, Eq)]
enum Resolution {
    Resolved,
    Relaxed(FileId),
    Unresolved(String),
}

impl ProjectContext {
    fn resolve(&self, module: &str, builtin: &[&str], own: &FileId) -> Resolution {
        let root = module.split('.').next().unwrap_or(module);
        if builtin.contains(&root)
            || self.external.contains(module)
            || self.external.contains(root)
        {
            return Resolution::Resolved;
        }
        if let Some(file) = self.modules.lookup(module) {
            return if file == own || self.visible.contains(file) {
                Resolution::Resolved
            } else if self.relaxed.contains(file) {
                Resolution::Relaxed(file.clone())
            } else {
                Resolution::Unresolved(format!("refers to {file}, which has not converged"))
            };
        }
        let package = format!("{module}.");
        let is_package = self.visible.iter().chain(std::iter::once(own)).any(|f| {
            self.modules
                .module_of(f)
                .is_some_and(|m| m.starts_with(&package))
        });
        if is_package {
            Resolution::Resolved
        } else {
            Resolution::Unresolved("is neither a project module nor a declared library".to_string())
        }
    }
}

/// Ordered checks producing a [`Verdict`]
#[derive(Clone)]
pub struct VerificationGate {
    policy: GatePolicy,
    imports: Arc<dyn ImportScanner>,
    syntax: Option<Arc<dyn CheckTool>>,
    lint: Option<Arc<dyn CheckTool>>,
    tests: Option<Arc<dyn CheckTool>>,
}

impl std::fmt::Debug for VerificationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationGate")
            .field("policy", &self.policy)
            .field("syntax", &self.syntax.as_ref().map(|t| t.name().to_string()))
            .field("lint", &self.lint.as_ref().map(|t| t.name().to_string()))
            .field("tests", &self.tests.as_ref().map(|t| t.name().to_string()))
            .finish_non_exhaustive()
    }
}

impl VerificationGate {
    /// Gate with import checking only
    #[must_use]
    pub fn new(policy: GatePolicy, imports: Arc<dyn ImportScanner>) -> Self {
        Self {
            policy,
            imports,
            syntax: None,
            lint: None,
            tests: None,
        }
    }

    /// Gate with the configured external commands
    #[must_use]
    pub fn from_config(config: &PipelineConfig, imports: Arc<dyn ImportScanner>) -> Self {
        let tools = &config.tools;
        let mut gate = Self::new(GatePolicy::from(config), imports);
        gate.syntax = tools
            .syntax
            .clone()
            .map(|c| Arc::new(CommandTool::new("syntax", c)) as Arc<dyn CheckTool>);
        gate.lint = tools
            .lint
            .clone()
            .map(|c| Arc::new(CommandTool::new("lint", c)) as Arc<dyn CheckTool>);
        gate.tests = tools
            .tests
            .clone()
            .map(|c| Arc::new(CommandTool::new("tests", c)) as Arc<dyn CheckTool>);
        gate
    }

    /// With syntax checker
    #[must_use]
    pub fn with_syntax(mut self, tool: Arc<dyn CheckTool>) -> Self {
        self.syntax = Some(tool);
        self
    }

    /// With linter
    #[must_use]
    pub fn with_lint(mut self, tool: Arc<dyn CheckTool>) -> Self {
        self.lint = Some(tool);
        self
    }

    /// With test runner
    #[must_use]
    pub fn with_tests(mut self, tool: Arc<dyn CheckTool>) -> Self {
        self.tests = Some(tool);
        self
    }

    /// Policy in effect
    #[must_use]
    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    /// Import scanner in use
    #[must_use]
    pub fn imports(&self) -> &Arc<dyn ImportScanner> {
        &self.imports
    }

    /// Check `candidate` for `unit`
    pub async fn verify(&self, candidate: &str, unit: &UnitCheck<'_>, project: &ProjectContext) -> Verdict {
        let input = CheckInput {
            file: unit.file,
            candidate,
            output_path: unit.output_path,
            tests: unit.tests,
            artifacts: &project.artifacts,
        };

        if let Err(failure) = self.check_syntax(&input).await {
            return Verdict::fail(failure);
        }

        let (import_failure, mut warnings) = self.check_imports(candidate, unit.file, project);
        if let Some(failure) = import_failure {
            return Verdict::fail(failure).with_warnings(warnings);
        }

        match self.check_lint(&input).await {
            Ok(lint_warnings) => warnings.extend(lint_warnings),
            Err(failure) => return Verdict::fail(failure).with_warnings(warnings),
        }

        if self.policy.run_tests && !unit.tests.is_empty() {
            if let Err(failure) = self.check_tests(&input).await {
                return Verdict::fail(failure).with_warnings(warnings);
            }
        }

        debug!(file = %unit.file, warnings = warnings.len(), "Candidate passed gate");
        Verdict::pass().with_warnings(warnings)
    }

    /// Run a tool under the stage timeout; `Ok(None)` means clean
    async fn run_tool(
        &self,
        stage: Stage,
        tool: &dyn CheckTool,
        input: &CheckInput<'_>,
    ) -> Result<Option<ToolOutput>, Failure> {
        let output = match tokio::time::timeout(self.policy.timeout, tool.run(input)).await {
            Err(_) => {
                return Err(Failure::Timeout {
                    stage,
                    after_ms: u64::try_from(self.policy.timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
            Ok(Err(err)) => {
                return Err(Failure::Tool {
                    stage,
                    message: err.to_string(),
                })
            }
            Ok(Ok(output)) => output,
        };
        match tool.classify(output) {
            Ok(ToolOutcome::Clean) => Ok(None),
            Ok(ToolOutcome::Findings(output)) => Ok(Some(output)),
            Err(err) => Err(Failure::Tool {
                stage,
                message: err.to_string(),
            }),
        }
    }

    async fn check_syntax(&self, input: &CheckInput<'_>) -> Result<(), Failure> {
        if input.candidate.trim().is_empty() {
            return Err(Failure::Syntax {
                diagnostics: vec![Diagnostic::error("candidate is empty")],
            });
        }
        let Some(tool) = &self.syntax else {
            return Ok(());
        };
        match self.run_tool(Stage::Syntax, tool.as_ref(), input).await? {
            None => Ok(()),
            Some(output) => Err(Failure::Syntax {
                diagnostics: syntax_diagnostics(&output),
            }),
        }
    }

    fn check_imports(
        &self,
        candidate: &str,
        own: &FileId,
        project: &ProjectContext,
    ) -> (Option<Failure>, Vec<Diagnostic>) {
        let builtin = self.imports.builtin_modules();
        let mut unresolved = Vec::new();
        let mut warnings = Vec::new();
        for import in self.imports.scan(candidate) {
            match project.resolve(&import.module, builtin, own) {
                Resolution::Resolved => {}
                Resolution::Relaxed(peer) => warnings.push(
                    Diagnostic::warning(format!(
                        "`{}` refers to cycle peer {peer}, which has not converged",
                        import.module
                    ))
                    .with_code(UNRESOLVED_IMPORT)
                    .at(import.line, None),
                ),
                Resolution::Unresolved(reason) => unresolved.push(UnresolvedRef {
                    module: import.module,
                    line: import.line,
                    reason,
                }),
            }
        }
        if unresolved.is_empty() {
            return (None, warnings);
        }
        if self.policy.strict_imports {
            return (Some(Failure::Imports { unresolved }), warnings);
        }
        warnings.extend(unresolved.into_iter().map(|u| {
            Diagnostic::warning(format!("`{}` {}", u.module, u.reason))
                .with_code(UNRESOLVED_IMPORT)
                .at(u.line, None)
        }));
        (None, warnings)
    }

    async fn check_lint(&self, input: &CheckInput<'_>) -> Result<Vec<Diagnostic>, Failure> {
        let Some(tool) = &self.lint else {
            return Ok(Vec::new());
        };
        let Some(output) = self.run_tool(Stage::StaticAnalysis, tool.as_ref(), input).await? else {
            return Ok(Vec::new());
        };
        let findings = lint_diagnostics(&output);
        if findings.is_empty() {
            return Err(Failure::Tool {
                stage: Stage::StaticAnalysis,
                message: format!(
                    "`{}` reported findings that could not be parsed: {}",
                    tool.name(),
                    output.last_line().unwrap_or_default()
                ),
            });
        }
        let threshold = self.policy.lint_failure_threshold;
        let (failing, warnings): (Vec<_>, Vec<_>) = findings
            .into_iter()
            .partition(|d| self.policy.strict_static_analysis && d.severity >= threshold);
        if failing.is_empty() {
            Ok(warnings)
        } else {
            Err(Failure::StaticAnalysis { findings: failing })
        }
    }

    async fn check_tests(&self, input: &CheckInput<'_>) -> Result<(), Failure> {
        let Some(tool) = &self.tests else {
            return Ok(());
        };
        match self.run_tool(Stage::Tests, tool.as_ref(), input).await? {
            None => Ok(()),
            Some(output) => Err(Failure::Tests {
                failures: test_failures(&output),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::PythonAddressing;
    use crate::error::ToolError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    /// Returns a fixed output
    struct Fixed(ToolOutput);

    #[async_trait]
    impl CheckTool for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn run(&self, _input: &CheckInput<'_>) -> Result<ToolOutput, ToolError> {
            Ok(self.0.clone())
        }
    }

    struct Hangs;

    #[async_trait]
    impl CheckTool for Hangs {
        fn name(&self) -> &str {
            "hangs"
        }

        async fn run(&self, _input: &CheckInput<'_>) -> Result<ToolOutput, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ToolOutput::clean())
        }
    }

    fn files() -> Vec<FileId> {
        ["src/list.c", "src/main.c", "src/tree.c"].map(FileId::new).to_vec()
    }

    fn project(visible: &[usize], relaxed: &[usize]) -> ProjectContext {
        let files = files();
        ProjectContext {
            modules: Arc::new(ModuleMap::new(&files, &PythonAddressing)),
            visible: visible.iter().map(|i| files[*i].clone()).collect(),
            relaxed: relaxed.iter().map(|i| files[*i].clone()).collect(),
            external: BTreeSet::from(["numpy".to_string()]),
            artifacts: Vec::new(),
        }
    }

    fn gate(policy: GatePolicy) -> VerificationGate {
        VerificationGate::new(policy, Arc::new(PythonImports))
    }

    async fn check(gate: &VerificationGate, candidate: &str, project: &ProjectContext) -> Verdict {
        let file = FileId::new("src/main.c");
        let unit = UnitCheck {
            file: &file,
            output_path: Path::new("src/main.py"),
            tests: &[],
        };
        gate.verify(candidate, &unit, project).await
    }

    #[tokio::test]
    async fn empty_candidate_fails_syntax() {
        let verdict = check(&gate(GatePolicy::default()), "  \n", &project(&[], &[])).await;
        assert_eq!(verdict.label(), "FailSyntax");
    }

    #[tokio::test]
    async fn syntax_short_circuits() {
        let g = gate(GatePolicy::default())
            .with_syntax(Arc::new(Fixed(ToolOutput::findings("x.py:1: invalid syntax"))))
            .with_lint(Arc::new(Fixed(ToolOutput::findings("x.py:1:1: E999 boom"))));
        let verdict = check(&g, "def (", &project(&[], &[])).await;
        assert_eq!(verdict.failures().len(), 1);
        assert_eq!(verdict.label(), "FailSyntax");
    }

    #[tokio::test]
    async fn imports_resolve_against_visible_and_external() {
        let g = gate(GatePolicy::default());
        let ok = "import os\nimport numpy.linalg\nfrom list import push\nimport src.list\n";
        assert!(check(&g, ok, &project(&[0], &[])).await.is_pass());

        let verdict = check(&g, "from tree import Node\nimport requests\n", &project(&[0], &[])).await;
        match verdict.primary() {
            Some(Failure::Imports { unresolved }) => {
                assert_eq!(unresolved.len(), 2);
                assert_eq!(unresolved[0].module, "tree");
                assert!(unresolved[0].reason.contains("not converged"));
                assert_eq!(unresolved[1].line, 2);
            }
            other => panic!("expected import failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn package_prefix_resolves() {
        let g = gate(GatePolicy::default());
        assert!(check(&g, "import src\n", &project(&[0], &[])).await.is_pass());
    }

    #[tokio::test]
    async fn cycle_peers_are_relaxed() {
        let g = gate(GatePolicy::default());
        let verdict = check(&g, "from tree import Node\n", &project(&[], &[2])).await;
        assert!(verdict.is_pass());
        assert_eq!(verdict.warnings()[0].code.as_deref(), Some(UNRESOLVED_IMPORT));
    }

    #[tokio::test]
    async fn lax_imports_only_warn() {
        let policy = GatePolicy {
            strict_imports: false,
            ..GatePolicy::default()
        };
        let verdict = check(&gate(policy), "import requests\n", &project(&[], &[])).await;
        assert!(verdict.is_pass());
        assert_eq!(verdict.warnings().len(), 1);
    }

    #[tokio::test]
    async fn lint_threshold_splits_findings() {
        let output = ToolOutput::findings("m.py:1:1: W291 trailing whitespace\nm.py:2:1: F821 undefined name `x`\n");
        let g = gate(GatePolicy::default()).with_lint(Arc::new(Fixed(output.clone())));
        let verdict = check(&g, "y = x\n", &project(&[], &[])).await;
        match verdict.primary() {
            Some(Failure::StaticAnalysis { findings }) => {
                assert_eq!(findings.len(), 1);
                assert_eq!(findings[0].code.as_deref(), Some("F821"));
            }
            other => panic!("expected lint failure, got {other:?}"),
        }

        let lenient = gate(GatePolicy {
            strict_static_analysis: false,
            ..GatePolicy::default()
        })
        .with_lint(Arc::new(Fixed(output)));
        let verdict = check(&lenient, "y = x\n", &project(&[], &[])).await;
        assert!(verdict.is_pass());
        assert_eq!(verdict.warnings().len(), 2);
    }

    #[tokio::test]
    async fn crash_is_tool_failure() {
        let crashed = ToolOutput {
            exit_code: Some(101),
            stdout: String::new(),
            stderr: "thread 'main' panicked".into(),
        };
        let g = gate(GatePolicy::default()).with_lint(Arc::new(Fixed(crashed)));
        let verdict = check(&g, "x = 1\n", &project(&[], &[])).await;
        assert!(verdict.has_tooling_failure());
        assert_eq!(verdict.primary().map(Failure::stage), Some(Stage::StaticAnalysis));
    }

    #[tokio::test]
    async fn unparseable_findings_are_tool_failure() {
        let g = gate(GatePolicy::default()).with_lint(Arc::new(Fixed(ToolOutput::findings("???"))));
        let verdict = check(&g, "x = 1\n", &project(&[], &[])).await;
        assert!(verdict.has_tooling_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn stage_timeout_is_failure() {
        let policy = GatePolicy {
            timeout: Duration::from_secs(2),
            ..GatePolicy::default()
        };
        let g = gate(policy).with_syntax(Arc::new(Hangs));
        let verdict = check(&g, "x = 1\n", &project(&[], &[])).await;
        assert_eq!(
            verdict.primary(),
            Some(&Failure::Timeout {
                stage: Stage::Syntax,
                after_ms: 2000
            })
        );
    }

    #[tokio::test]
    async fn tests_run_only_when_enabled_and_present() {
        let failing = Arc::new(Fixed(ToolOutput::findings("FAILED t.py::test_a - boom")));
        let file = FileId::new("src/main.c");
        let tests = vec![PathBuf::from("t.py")];
        let unit = UnitCheck {
            file: &file,
            output_path: Path::new("src/main.py"),
            tests: &tests,
        };

        let disabled = gate(GatePolicy::default()).with_tests(failing.clone());
        assert!(disabled.verify("x = 1\n", &unit, &project(&[], &[])).await.is_pass());

        let enabled = gate(GatePolicy {
            run_tests: true,
            ..GatePolicy::default()
        })
        .with_tests(failing);
        let verdict = enabled.verify("x = 1\n", &unit, &project(&[], &[])).await;
        assert_eq!(verdict.label(), "FailTests");
    }
}
