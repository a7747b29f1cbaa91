//! Testing utilities for the polyport workspace
//!
//! Deterministic oracle backends, marker-driven check tools and small
//! project fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use polyport_core::{
    CheckInput, CheckTool, GatePolicy, OracleBackend, OracleConfig, OracleRequest, PipelineConfig,
    Project, PythonAddressing, PythonImports, Supervisor, ToolError, ToolOutput, TransportError,
    ToolsConfig, TranslationUnit, Verdict, VerificationGate,
};
use polyport_graph::{DependencyRelation, FileId, SourceFile};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Syntax checker reports every line containing this
pub const SYNTAX_MARKER: &str = "SYNTAX_ERROR";
/// Linter reports an error-severity finding for every line containing this
pub const LINT_MARKER: &str = "LINT_ERROR";
/// Linter reports a warning-severity finding for every line containing this
pub const LINT_WARNING_MARKER: &str = "LINT_WARNING";
/// Test runner reports a failing test for every line containing this
pub const TEST_MARKER: &str = "TEST_FAIL";
/// Any marker tool exits with an unexpected code
pub const CRASH_MARKER: &str = "TOOL_CRASH";
/// Any marker tool hangs
pub const SLOW_MARKER: &str = "SLOW_CHECK";

/// Wrap `code` the way a chat model answers
pub fn fenced(code: &str) -> String {
    format!("Here is the translation:\n```python\n{code}\n```\n")
}

// ============================================================================
// Oracle backends
// ============================================================================

/// Replays per-file response queues
///
/// When a file's queue is empty the fallback answers; without one the
/// request is rejected.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<String, VecDeque<Result<String, TransportError>>>>,
    fallback: Option<String>,
    delay: Duration,
    requests: Mutex<Vec<OracleRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every file with `code` once its script runs out
    pub fn always(code: &str) -> Self {
        Self::new().with_fallback(code)
    }

    pub fn with_fallback(mut self, code: &str) -> Self {
        self.fallback = Some(fenced(code));
        self
    }

    /// Hold every response for `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue fenced answers for `file`
    pub fn respond(self, file: &str, codes: &[&str]) -> Self {
        {
            let mut scripts = self.scripts.lock();
            let queue = scripts.entry(file.to_string()).or_default();
            queue.extend(codes.iter().map(|c| Ok(fenced(c))));
        }
        self
    }

    /// Queue a transport error for `file`
    pub fn fail(self, file: &str, error: TransportError) -> Self {
        self.scripts
            .lock()
            .entry(file.to_string())
            .or_default()
            .push_back(Err(error));
        self
    }

    /// All requests received, in arrival order
    pub fn requests(&self) -> Vec<OracleRequest> {
        self.requests.lock().clone()
    }

    /// Requests received for `file`
    pub fn requests_for(&self, file: &str) -> Vec<OracleRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.file.as_str() == file)
            .cloned()
            .collect()
    }

    /// Number of calls for `file`
    pub fn calls_for(&self, file: &str) -> usize {
        self.requests_for(file).len()
    }

    /// Highest number of concurrent calls seen
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OracleBackend for ScriptedBackend {
    async fn complete(&self, request: &OracleRequest) -> Result<String, TransportError> {
        self.requests.lock().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self
            .scripts
            .lock()
            .get_mut(request.file.as_str())
            .and_then(VecDeque::pop_front);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match (scripted, &self.fallback) {
            (Some(answer), _) => answer,
            (None, Some(fallback)) => Ok(fallback.clone()),
            (None, None) => Err(TransportError::Rejected(format!(
                "no scripted response for {}",
                request.file
            ))),
        }
    }
}

/// Fails every call with the same error
#[derive(Debug)]
pub struct FailingBackend {
    error: TransportError,
    calls: AtomicUsize,
}

impl FailingBackend {
    pub fn new(error: TransportError) -> Self {
        Self {
            error,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn transient() -> Self {
        Self::new(TransportError::Transient("connection reset".into()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OracleBackend for FailingBackend {
    async fn complete(&self, _request: &OracleRequest) -> Result<String, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// Never answers
#[derive(Debug, Default)]
pub struct HangingBackend;

#[async_trait]
impl OracleBackend for HangingBackend {
    async fn complete(&self, _request: &OracleRequest) -> Result<String, TransportError> {
        std::future::pending().await
    }
}

// ============================================================================
// Check tools
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Syntax,
    Lint,
    Tests,
}

/// Check tool whose findings are driven by marker strings in the candidate
#[derive(Debug)]
pub struct MarkerTool {
    kind: MarkerKind,
    runs: AtomicUsize,
}

impl MarkerTool {
    pub fn new(kind: MarkerKind) -> Self {
        Self {
            kind,
            runs: AtomicUsize::new(0),
        }
    }

    pub fn syntax() -> Arc<Self> {
        Arc::new(Self::new(MarkerKind::Syntax))
    }

    pub fn lint() -> Arc<Self> {
        Arc::new(Self::new(MarkerKind::Lint))
    }

    pub fn tests() -> Arc<Self> {
        Arc::new(Self::new(MarkerKind::Tests))
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    fn finding(&self, path: &str, line_no: usize, line: &str) -> Option<String> {
        match self.kind {
            MarkerKind::Syntax if line.contains(SYNTAX_MARKER) => {
                Some(format!("{path}:{line_no}:1: invalid syntax"))
            }
            MarkerKind::Lint if line.contains(LINT_MARKER) => {
                Some(format!("{path}:{line_no}:1: E999 forbidden construct"))
            }
            MarkerKind::Lint if line.contains(LINT_WARNING_MARKER) => {
                Some(format!("{path}:{line_no}:1: W291 trailing whitespace"))
            }
            MarkerKind::Tests if line.contains(TEST_MARKER) => Some(format!(
                "FAILED tests/test_generated.py::test_line_{line_no} - assert False"
            )),
            _ => None,
        }
    }
}

#[async_trait]
impl CheckTool for MarkerTool {
    fn name(&self) -> &str {
        match self.kind {
            MarkerKind::Syntax => "marker-syntax",
            MarkerKind::Lint => "marker-lint",
            MarkerKind::Tests => "marker-tests",
        }
    }

    async fn run(&self, input: &CheckInput<'_>) -> Result<ToolOutput, ToolError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if input.candidate.contains(CRASH_MARKER) {
            return Ok(ToolOutput {
                exit_code: Some(2),
                stdout: String::new(),
                stderr: "internal error: unexpected state".into(),
            });
        }
        if input.candidate.contains(SLOW_MARKER) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let path = input.output_path.display().to_string();
        let findings: Vec<String> = input
            .candidate
            .lines()
            .enumerate()
            .filter_map(|(idx, line)| self.finding(&path, idx + 1, line))
            .collect();
        if findings.is_empty() {
            Ok(ToolOutput::clean())
        } else {
            Ok(ToolOutput::findings(findings.join("\n")))
        }
    }
}

/// Gate with marker tools for every stage
pub fn marker_gate(config: &PipelineConfig) -> VerificationGate {
    VerificationGate::new(GatePolicy::from(config), Arc::new(PythonImports))
        .with_syntax(MarkerTool::syntax())
        .with_lint(MarkerTool::lint())
        .with_tests(MarkerTool::tests())
}

// ============================================================================
// Supervisors
// ============================================================================

/// Declines chosen units and candidates; records finished units
#[derive(Debug, Default)]
pub struct RecordingSupervisor {
    decline_units: BTreeSet<String>,
    reject_candidates: BTreeSet<String>,
    finished: Mutex<Vec<(FileId, polyport_core::UnitStatus)>>,
    approvals: Mutex<Vec<FileId>>,
}

impl RecordingSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declining(mut self, file: &str) -> Self {
        self.decline_units.insert(file.to_string());
        self
    }

    pub fn rejecting(mut self, file: &str) -> Self {
        self.reject_candidates.insert(file.to_string());
        self
    }

    /// Units in the order they finished
    pub fn finished(&self) -> Vec<(FileId, polyport_core::UnitStatus)> {
        self.finished.lock().clone()
    }

    /// Units in the order they were offered for scheduling
    pub fn approvals(&self) -> Vec<FileId> {
        self.approvals.lock().clone()
    }
}

#[async_trait]
impl Supervisor for RecordingSupervisor {
    async fn approve_unit(&self, file: &FileId, _dependencies: &[FileId]) -> bool {
        self.approvals.lock().push(file.clone());
        !self.decline_units.contains(file.as_str())
    }

    async fn accept_candidate(&self, file: &FileId, _candidate: &str, _verdict: &Verdict) -> bool {
        !self.reject_candidates.contains(file.as_str())
    }

    fn unit_finished(&self, unit: &TranslationUnit) {
        self.finished.lock().push((unit.file().clone(), unit.status()));
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Defaults with millisecond backoff, short timeouts and no external tools
///
/// A gate built from this config checks imports only, so results do not
/// depend on what is installed on the host.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_tools(ToolsConfig {
            syntax: None,
            lint: None,
            tests: None,
        })
        .with_oracle(OracleConfig {
            timeout: Duration::from_secs(5),
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            ..OracleConfig::default()
        })
        .with_verify_timeout(Duration::from_secs(5))
}

/// Project from `(file, dependencies)` pairs
pub fn project(files: &[(&str, &[&str])]) -> Project {
    let mut relation = DependencyRelation::new();
    for (file, deps) in files {
        for dep in *deps {
            relation
                .entry(FileId::new(*file))
                .or_default()
                .insert(FileId::new(*dep));
        }
    }
    let sources: Vec<SourceFile> = files
        .iter()
        .map(|(file, _)| SourceFile::new(*file, format!("/* {file} */\nint placeholder;\n")))
        .collect();
    Project::new(sources, &relation, &PythonAddressing).unwrap()
}

/// `a.c` <- `b.c` <- `c.c`
pub fn chain_project() -> Project {
    project(&[("a.c", &[]), ("b.c", &["a.c"]), ("c.c", &["b.c"])])
}

/// `base.c` <- {`left.c`, `right.c`} <- `top.c`
pub fn diamond_project() -> Project {
    project(&[
        ("base.c", &[]),
        ("left.c", &["base.c"]),
        ("right.c", &["base.c"]),
        ("top.c", &["left.c", "right.c"]),
    ])
}

/// `a.c` <-> `b.c`, and `main.c` depending on `a.c`
pub fn cycle_project() -> Project {
    project(&[("a.c", &["b.c"]), ("b.c", &["a.c"]), ("main.c", &["a.c"])])
}

/// `n` files without dependencies
pub fn independent_project(n: usize) -> Project {
    let names: Vec<String> = (0..n).map(|i| format!("f{i:02}.c")).collect();
    let files: Vec<(&str, &[&str])> = names.iter().map(|n| (n.as_str(), &[][..])).collect();
    project(&files)
}
