//! Pipeline facade: configuration in, [`ProjectResult`] out

use crate::assembler::ProjectAssembler;
use crate::config::{AcceptancePolicy, PipelineConfig};
use crate::controller::{AutoApprove, RefinementController, Supervisor};
use crate::error::PipelineError;
use crate::gate::{ImportScanner, PythonImports, VerificationGate};
use crate::oracle::{OracleAdapter, OracleBackend};
use crate::project::Project;
use crate::prompt::PromptTemplates;
use crate::result::{ProjectResult, RunId};
use crate::rules::TranslationRules;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

/// A configured migration pipeline
///
/// ```ignore
/// let pipeline = Pipeline::new(config, backend)?.with_supervisor(Arc::new(AutoApprove));
/// let result = pipeline.run(&project, CancellationToken::new()).await?;
/// ```
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    backend: Arc<dyn OracleBackend>,
    imports: Arc<dyn ImportScanner>,
    gate: Option<VerificationGate>,
    supervisor: Arc<dyn Supervisor>,
    prompts: Option<PromptTemplates>,
    rules: Option<TranslationRules>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Create pipeline with the gate described by `config`
    ///
    /// # Errors
    /// `PipelineError::Config` if `config` does not validate.
    pub fn new(config: PipelineConfig, backend: Arc<dyn OracleBackend>) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            backend,
            imports: Arc::new(PythonImports),
            gate: None,
            supervisor: Arc::new(AutoApprove),
            prompts: None,
            rules: None,
        })
    }

    /// With an explicit gate instead of the configured commands
    #[must_use]
    pub fn with_gate(mut self, gate: VerificationGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// With a supervisor
    #[must_use]
    pub fn with_supervisor(mut self, supervisor: Arc<dyn Supervisor>) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// With prompt templates
    #[must_use]
    pub fn with_prompts(mut self, prompts: PromptTemplates) -> Self {
        self.prompts = Some(prompts);
        self
    }

    /// With translation rules
    #[must_use]
    pub fn with_rules(mut self, rules: TranslationRules) -> Self {
        self.rules = Some(rules);
        self
    }

    /// With an import scanner for the target language
    #[must_use]
    pub fn with_import_scanner(mut self, imports: Arc<dyn ImportScanner>) -> Self {
        self.imports = imports;
        self
    }

    /// Configuration in effect
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn oracle(&self) -> OracleAdapter {
        let mut oracle = OracleAdapter::new(
            Arc::clone(&self.backend),
            self.config.oracle.clone(),
            &self.config.source_language,
            &self.config.target_language,
        );
        if let Some(prompts) = &self.prompts {
            oracle = oracle.with_prompts(prompts.clone());
        }
        if let Some(rules) = &self.rules {
            oracle = oracle.with_rules(rules.clone());
        }
        oracle
    }

    /// Migrate `project`
    ///
    /// Unit failures are reported in the result. `Err` means the run itself
    /// broke: a worker panicked or the output could not be assembled.
    pub async fn run(&self, project: &Project, cancel: CancellationToken) -> Result<ProjectResult, PipelineError> {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let span = info_span!("run", run_id = %run_id);

        async {
            info!(
                files = project.len(),
                source = %self.config.source_language,
                target = %self.config.target_language,
                "Migration started"
            );
            let gate = self
                .gate
                .clone()
                .unwrap_or_else(|| VerificationGate::from_config(&self.config, Arc::clone(&self.imports)));
            let controller = RefinementController::new(
                Arc::clone(&self.config),
                self.oracle(),
                gate,
                Arc::clone(&self.supervisor),
            );
            let outcome = controller.run(project, &cancel).await?;

            let tree = ProjectAssembler::new(Arc::clone(&self.imports)).assemble(project, &outcome.units)?;
            let fully_converged = tree.placeholders().next().is_none();
            let output = match self.config.acceptance {
                AcceptancePolicy::Partial => Some(tree),
                AcceptancePolicy::Full if fully_converged => Some(tree),
                AcceptancePolicy::Full => {
                    info!("Output withheld: acceptance policy requires full convergence");
                    None
                }
            };

            let result = ProjectResult::new(
                run_id,
                &outcome.units,
                project.modules(),
                output,
                outcome.cancelled,
                started_at,
            );
            info!(
                converged = result.counts.converged,
                failed = result.counts.failed,
                skipped = result.counts.skipped,
                cancelled = result.cancelled,
                elapsed_ms = result.elapsed_ms,
                "Migration finished"
            );
            Ok(result)
        }
        .instrument(span)
        .await
    }
}
