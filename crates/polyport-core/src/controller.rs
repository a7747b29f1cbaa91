//! Refinement loop controller
//!
//! The scheduler owns every [`TranslationUnit`] in a [`RunState`]. A unit is
//! handed to a worker task (moved, not shared) once all of its prerequisites
//! are terminal, together with read-only snapshots of what it may see. The
//! worker drives the unit through its translate/verify cycles and hands it
//! back when it is terminal. At most `concurrency` units are out at once.
//!
//! Cancellation stops scheduling. Workers finish the verify step they are in
//! and then end the unit; units never started are skipped.

use crate::addressing::ModuleMap;
use crate::config::{FailedDependencyContext, PipelineConfig};
use crate::error::{OracleError, PipelineError, UnitStateError};
use crate::feedback::{ContextEntry, ContextStatus, DependencyContext, Feedback};
use crate::gate::{ProjectContext, UnitCheck, VerificationGate};
use crate::oracle::{OracleAdapter, TranslationTask};
use crate::project::Project;
use crate::unit::{FailureCause, SkipReason, TranslationUnit, UnitStatus};
use crate::verdict::{Failure, Stage, Verdict};
use async_trait::async_trait;
use polyport_graph::{FileId, SourceFile};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Human or policy hook consulted during a run
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Called before `file` is scheduled; `false` skips it
    async fn approve_unit(&self, _file: &FileId, _dependencies: &[FileId]) -> bool {
        true
    }

    /// Called when a candidate passed the gate; `false` fails the unit
    async fn accept_candidate(&self, _file: &FileId, _candidate: &str, _verdict: &Verdict) -> bool {
        true
    }

    /// Called whenever a unit reaches a terminal status
    fn unit_finished(&self, _unit: &TranslationUnit) {}
}

/// Approves everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl Supervisor for AutoApprove {}

/// Final unit snapshot of a run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Units in scheduling order, all terminal
    pub units: Vec<TranslationUnit>,
    /// Cancellation was requested during the run
    pub cancelled: bool,
}

/// Everything a worker gets for one unit
#[derive(Debug)]
struct UnitJob {
    unit: TranslationUnit,
    source: Arc<SourceFile>,
    module: String,
    output_path: PathBuf,
    context: DependencyContext,
    project: ProjectContext,
}

/// The unit set of one run, owned by the scheduler
#[derive(Debug)]
pub struct RunState {
    units: BTreeMap<FileId, TranslationUnit>,
    running: BTreeSet<FileId>,
    candidates: BTreeMap<FileId, Arc<str>>,
}

impl RunState {
    /// Every file of `project` as a pending unit
    #[must_use]
    pub fn new(project: &Project, max_iterations: u32) -> Self {
        let graph = project.graph();
        let units = graph
            .order()
            .iter()
            .map(|file| {
                let unit = TranslationUnit::new(file.clone(), max_iterations, graph.is_circular(file));
                (file.clone(), unit)
            })
            .collect();
        Self {
            units,
            running: BTreeSet::new(),
            candidates: BTreeMap::new(),
        }
    }

    /// Status of `file`; units out with a worker report `InProgress`
    #[must_use]
    pub fn status(&self, file: &FileId) -> Option<UnitStatus> {
        if self.running.contains(file) {
            return Some(UnitStatus::InProgress);
        }
        self.units.get(file).map(TranslationUnit::status)
    }

    fn is_terminal(&self, file: &FileId) -> bool {
        self.status(file).is_some_and(|s| s.is_terminal())
    }

    fn take(&mut self, file: &FileId) -> Option<TranslationUnit> {
        let unit = self.units.remove(file)?;
        self.running.insert(file.clone());
        Some(unit)
    }

    fn put_back(&mut self, unit: TranslationUnit) {
        self.running.remove(unit.file());
        if !unit.current_candidate().is_empty() {
            self.candidates
                .insert(unit.file().clone(), Arc::from(unit.current_candidate()));
        }
        self.units.insert(unit.file().clone(), unit);
    }

    fn in_flight(&self) -> usize {
        self.running.len()
    }

    fn pending(&self) -> impl Iterator<Item = &FileId> {
        self.units
            .values()
            .filter(|u| u.status() == UnitStatus::Pending)
            .map(TranslationUnit::file)
    }

    /// Context for `file`, built only from terminal units
    fn snapshot(&self, file: &FileId, project: &Project, config: &PipelineConfig) -> (DependencyContext, ProjectContext) {
        let graph = project.graph();
        let modules: &Arc<ModuleMap> = project.modules();

        let visible: BTreeSet<FileId> = graph
            .transitive_dependencies(file)
            .into_iter()
            .filter(|dep| self.status(dep) == Some(UnitStatus::Converged))
            .collect();
        let relaxed: BTreeSet<FileId> = graph
            .cycle_peers(file)
            .into_iter()
            .filter(|peer| self.status(peer) != Some(UnitStatus::Converged))
            .collect();
        let artifacts = visible
            .iter()
            .filter_map(|dep| {
                let path = modules.path_of(dep)?.clone();
                Some((path, Arc::clone(self.candidates.get(dep)?)))
            })
            .collect();

        let mut context = DependencyContext::new();
        for dep in graph.dependencies(file) {
            let module = modules.module_of(&dep).unwrap_or(dep.as_str()).to_string();
            let status = match self.status(&dep) {
                Some(UnitStatus::Converged) => ContextStatus::Converged,
                Some(UnitStatus::Failed)
                    if config.failed_dependency_context == FailedDependencyContext::LastCandidate =>
                {
                    ContextStatus::Unverified
                }
                Some(UnitStatus::Pending) if relaxed.contains(&dep) => {
                    context.push_pending_peer(dep, module);
                    continue;
                }
                _ => continue,
            };
            let Some(candidate) = self.candidates.get(&dep) else {
                continue;
            };
            let exports = project
                .source(&dep)
                .map(|s| s.parsed.symbols.exported().map(|sym| sym.name.clone()).collect())
                .unwrap_or_default();
            context.push(ContextEntry {
                file: dep,
                module,
                status,
                candidate: Arc::clone(candidate),
                exports,
            });
        }

        let project_context = ProjectContext {
            modules: Arc::clone(modules),
            visible,
            relaxed,
            external: config.external_libraries.iter().cloned().collect(),
            artifacts,
        };
        (context, project_context)
    }

    fn into_outcome(mut self, order: &[FileId], cancelled: bool) -> RunOutcome {
        let units = order.iter().filter_map(|f| self.units.remove(f)).collect();
        RunOutcome { units, cancelled }
    }
}

/// Outcome of the per-unit state machine
#[derive(Debug)]
enum Finish {
    Converged,
    Failed(FailureCause),
}

/// Per-unit loop states
#[derive(Debug)]
enum Step {
    Translate { feedback: Option<Feedback> },
    Verify { candidate: String, started: Instant },
    Judge { candidate: String, verdict: Verdict, started: Instant },
    Done(Finish),
}

/// Stateless per-unit driver shared by worker tasks
struct Worker {
    oracle: OracleAdapter,
    gate: VerificationGate,
    supervisor: Arc<dyn Supervisor>,
}

impl Worker {
    async fn drive(&self, job: UnitJob, cancel: CancellationToken) -> Result<TranslationUnit, UnitStateError> {
        let UnitJob {
            mut unit,
            source,
            module,
            output_path,
            context,
            project,
        } = job;
        unit.begin()?;
        let check = UnitCheck {
            file: &source.id,
            output_path: &output_path,
            tests: &source.tests,
        };

        let mut step = Step::Translate { feedback: None };
        let finish = loop {
            step = match step {
                Step::Translate { feedback } => {
                    let attempt = unit.next_attempt()?;
                    debug!(attempt, refinement = feedback.is_some(), "Requesting candidate");
                    let started = Instant::now();
                    let task = TranslationTask {
                        source: &source,
                        module: &module,
                        feedback: feedback.as_ref(),
                        context: &context,
                    };
                    match self.oracle.translate(&task).await {
                        Ok(candidate) => Step::Verify { candidate, started },
                        Err(OracleError::Timeout(after)) => Step::Judge {
                            candidate: String::new(),
                            verdict: Verdict::fail(Failure::Timeout {
                                stage: Stage::Oracle,
                                after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
                            }),
                            started,
                        },
                        Err(OracleError::Unavailable { attempts, last_error }) => {
                            Step::Done(Finish::Failed(FailureCause::OracleUnavailable {
                                message: format!("{last_error} (after {attempts} calls)"),
                            }))
                        }
                        Err(OracleError::Rejected(message)) => {
                            Step::Done(Finish::Failed(FailureCause::OracleRejected { message }))
                        }
                        Err(err @ OracleError::Prompt(_)) => {
                            Step::Done(Finish::Failed(FailureCause::OracleRejected {
                                message: err.to_string(),
                            }))
                        }
                    }
                }
                Step::Verify { candidate, started } => {
                    let verdict = self.gate.verify(&candidate, &check, &project).await;
                    Step::Judge {
                        candidate,
                        verdict,
                        started,
                    }
                }
                Step::Judge {
                    candidate,
                    verdict,
                    started,
                } => {
                    let passed = verdict.is_pass();
                    let label = verdict.label();
                    let accepted = passed
                        && self
                            .supervisor
                            .accept_candidate(unit.file(), &candidate, &verdict)
                            .await;
                    if unit.record(candidate, verdict, started.elapsed())? {
                        warn!(attempt = unit.attempt(), "Oracle repeated an earlier candidate");
                    }
                    debug!(attempt = unit.attempt(), verdict = label, "Attempt finished");

                    if passed {
                        Step::Done(if accepted {
                            Finish::Converged
                        } else {
                            Finish::Failed(FailureCause::Declined)
                        })
                    } else if cancel.is_cancelled() {
                        Step::Done(Finish::Failed(FailureCause::Cancelled))
                    } else if unit.can_retry() {
                        Step::Translate {
                            feedback: unit.history().last().and_then(Feedback::from_record),
                        }
                    } else {
                        Step::Done(Finish::Failed(FailureCause::IterationsExhausted))
                    }
                }
                Step::Done(finish) => break finish,
            };
        };

        match finish {
            Finish::Converged => {
                unit.converge()?;
                info!(attempts = unit.attempt(), "Unit converged");
            }
            Finish::Failed(cause) => {
                error!(attempts = unit.attempt(), %cause, "Unit failed");
                unit.fail(cause)?;
            }
        }
        Ok(unit)
    }
}

/// Drives every unit of a project to a terminal status
#[derive(Clone)]
pub struct RefinementController {
    config: Arc<PipelineConfig>,
    worker: Arc<Worker>,
}

impl std::fmt::Debug for RefinementController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefinementController")
            .field("max_iterations", &self.config.max_iterations)
            .field("concurrency", &self.config.concurrency)
            .finish_non_exhaustive()
    }
}

impl RefinementController {
    /// Create controller
    #[must_use]
    pub fn new(
        config: Arc<PipelineConfig>,
        oracle: OracleAdapter,
        gate: VerificationGate,
        supervisor: Arc<dyn Supervisor>,
    ) -> Self {
        Self {
            config,
            worker: Arc::new(Worker {
                oracle,
                gate,
                supervisor,
            }),
        }
    }

    /// Process every unit of `project`
    ///
    /// Only returns `Err` when an internal invariant breaks (a worker panics
    /// or a unit transition is rejected); unit failures are part of the
    /// outcome.
    pub async fn run(&self, project: &Project, cancel: &CancellationToken) -> Result<RunOutcome, PipelineError> {
        let graph = Arc::clone(project.graph());
        let mut state = RunState::new(project, self.config.max_iterations);
        let mut workers: JoinSet<Result<TranslationUnit, UnitStateError>> = JoinSet::new();
        info!(
            units = graph.len(),
            concurrency = self.config.concurrency,
            max_iterations = self.config.max_iterations,
            "Starting refinement run"
        );

        loop {
            if !cancel.is_cancelled() {
                self.schedule(project, &mut state, &mut workers, cancel).await?;
            }
            let Some(joined) = workers.join_next().await else {
                break;
            };
            let unit = joined.map_err(|e| PipelineError::Worker(e.to_string()))??;
            self.worker.supervisor.unit_finished(&unit);
            state.put_back(unit);
        }

        let cancelled = cancel.is_cancelled();
        let leftover: Vec<FileId> = state.pending().cloned().collect();
        if !leftover.is_empty() && !cancelled {
            return Err(PipelineError::Worker(format!(
                "scheduler stalled with {} pending units",
                leftover.len()
            )));
        }
        if cancelled {
            info!(skipped = leftover.len(), "Run cancelled");
        }
        for file in leftover {
            if let Some(unit) = state.units.get_mut(&file) {
                unit.skip(SkipReason::Cancelled)?;
                self.worker.supervisor.unit_finished(unit);
            }
        }
        Ok(state.into_outcome(graph.order(), cancelled))
    }

    /// One pass in graph order: skip blocked units, start ready ones
    async fn schedule(
        &self,
        project: &Project,
        state: &mut RunState,
        workers: &mut JoinSet<Result<TranslationUnit, UnitStateError>>,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let graph = Arc::clone(project.graph());
        for file in graph.order() {
            if cancel.is_cancelled() {
                break;
            }
            if state.status(file) != Some(UnitStatus::Pending) {
                continue;
            }
            let prerequisites = graph.prerequisites(file);
            if !prerequisites.iter().all(|p| state.is_terminal(p)) {
                continue;
            }

            let blocked: Vec<FileId> = prerequisites
                .iter()
                .filter(|p| state.status(p) != Some(UnitStatus::Converged))
                .cloned()
                .collect();
            let circular = graph.is_circular(file);
            if !blocked.is_empty() && !circular {
                warn!(file = %file, blocked = ?blocked, "Skipping unit with non-converged dependencies");
                self.skip(state, file, SkipReason::DependencyNotConverged { dependencies: blocked })?;
                continue;
            }
            if state.in_flight() >= self.config.concurrency {
                continue;
            }
            if !self.worker.supervisor.approve_unit(file, prerequisites).await {
                info!(file = %file, "Unit declined by supervisor");
                self.skip(state, file, SkipReason::Declined)?;
                continue;
            }

            let (context, project_context) = state.snapshot(file, project, &self.config);
            let (Some(source), Some(address), Some(unit)) = (
                project.source(file).cloned(),
                project.modules().address(file).cloned(),
                state.take(file),
            ) else {
                continue;
            };
            if !blocked.is_empty() {
                warn!(file = %file, blocked = ?blocked, "Best-effort attempt for circular unit");
            }
            let job = UnitJob {
                unit,
                source,
                module: address.module,
                output_path: address.path,
                context,
                project: project_context,
            };
            let worker = Arc::clone(&self.worker);
            let token = cancel.clone();
            let span = info_span!("unit", file = %file, circular);
            debug!(file = %file, position = ?graph.position(file), "Scheduling unit");
            workers.spawn(async move { worker.drive(job, token).await }.instrument(span));
        }
        Ok(())
    }

    fn skip(&self, state: &mut RunState, file: &FileId, reason: SkipReason) -> Result<(), PipelineError> {
        if let Some(unit) = state.units.get_mut(file) {
            unit.skip(reason)?;
            self.worker.supervisor.unit_finished(unit);
        }
        Ok(())
    }
}
