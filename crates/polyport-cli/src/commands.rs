//! Subcommand bodies, kept out of `main` so tests can drive them

use crate::manifest::Manifest;
use crate::report::Plan;
use anyhow::{Context, Result};
use polyport_core::{
    OracleBackend, Pipeline, PipelineConfig, Project, ProjectResult, PromptTemplates,
    PythonAddressing, Supervisor, TranslationRules,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Process exit code: every unit converged
pub const EXIT_CONVERGED: i32 = 0;
/// Process exit code: fatal error
pub const EXIT_FATAL: i32 = 1;
/// Process exit code: some units did not converge
pub const EXIT_UNCONVERGED: i32 = 2;

/// Options of `polyport migrate`
#[derive(Debug, Clone, Default)]
pub struct MigrateOptions {
    /// Project manifest
    pub manifest: PathBuf,
    /// Output directory
    pub output: PathBuf,
    /// Prompt templates file (JSON)
    pub prompts: Option<PathBuf>,
    /// Extra translation rules (JSON), merged over the built-in preset
    pub rules: Option<PathBuf>,
    /// Ask before scheduling and accepting units
    pub interactive: bool,
    /// Override `concurrency`
    pub concurrency: Option<usize>,
    /// Override `max_iterations`
    pub max_iterations: Option<u32>,
}

/// Configuration from `path`, or the defaults
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load configuration {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

/// Load the manifest and build the project
pub async fn load_project(manifest_path: &Path) -> Result<(Manifest, Project)> {
    let manifest = Manifest::load(manifest_path).await?;
    let project = manifest
        .into_project(manifest_path, &PythonAddressing)
        .await
        .with_context(|| format!("failed to build project from {}", manifest_path.display()))?;
    Ok((manifest, project))
}

/// Effective configuration: file, then manifest languages, then flags
pub fn effective_config(
    mut config: PipelineConfig,
    manifest: &Manifest,
    options: &MigrateOptions,
) -> Result<PipelineConfig> {
    if let Some(source) = &manifest.source_language {
        config.source_language.clone_from(source);
    }
    if let Some(target) = &manifest.target_language {
        config.target_language.clone_from(target);
    }
    if let Some(concurrency) = options.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(max) = options.max_iterations {
        config.max_iterations = max;
    }
    if options.interactive {
        config.concurrency = 1;
    }
    config.validate().context("invalid effective configuration")?;
    Ok(config)
}

/// Run a migration and write its output and report
///
/// `base` is the loaded configuration file; the manifest's language pair and
/// the option overrides are applied on top of it.
///
/// Returns the result even when units failed; `Err` is reserved for fatal
/// problems (bad input, unwritable output, broken run).
pub async fn run_migrate(
    options: &MigrateOptions,
    base: PipelineConfig,
    backend: Arc<dyn OracleBackend>,
    supervisor: Option<Arc<dyn Supervisor>>,
    cancel: CancellationToken,
) -> Result<ProjectResult> {
    let (manifest, project) = load_project(&options.manifest).await?;
    let config = effective_config(base, &manifest, options)?;

    let mut pipeline = Pipeline::new(config, backend)?;
    if let Some(path) = &options.prompts {
        let prompts = PromptTemplates::load(path)
            .with_context(|| format!("failed to load prompts {}", path.display()))?;
        pipeline = pipeline.with_prompts(prompts);
    }
    if let Some(path) = &options.rules {
        let extra = TranslationRules::load(path)
            .with_context(|| format!("failed to load rules {}", path.display()))?;
        let config = pipeline.config();
        let mut rules = TranslationRules::preset(&config.source_language, &config.target_language);
        rules.extend(extra);
        pipeline = pipeline.with_rules(rules);
    }
    if let Some(supervisor) = supervisor {
        pipeline = pipeline.with_supervisor(supervisor);
    }

    let result = pipeline.run(&project, cancel).await?;
    let report = result
        .write_to(&options.output)
        .await
        .with_context(|| format!("failed to write output to {}", options.output.display()))?;
    info!(report = %report.display(), "Report written");
    Ok(result)
}

/// Exit code for a finished run
#[must_use]
pub fn exit_code(result: &ProjectResult) -> i32 {
    if result.is_fully_converged() {
        EXIT_CONVERGED
    } else {
        EXIT_UNCONVERGED
    }
}

/// Build the processing plan without calling the oracle
pub async fn run_plan(manifest_path: &Path) -> Result<Plan> {
    let (_, project) = load_project(manifest_path).await?;
    Ok(Plan::of(&project))
}

/// Load and validate a configuration file
pub fn run_check_config(path: &Path) -> Result<PipelineConfig> {
    load_config(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(source: Option<&str>) -> Manifest {
        Manifest {
            source_language: source.map(str::to_string),
            target_language: None,
            root: PathBuf::from("."),
            files: Vec::new(),
        }
    }

    #[test]
    fn flags_override_file_and_manifest() {
        let options = MigrateOptions {
            concurrency: Some(8),
            max_iterations: Some(5),
            ..MigrateOptions::default()
        };
        let config = effective_config(PipelineConfig::default(), &manifest(Some("cpp")), &options).unwrap();
        assert_eq!(config.source_language, "cpp");
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.max_iterations, 5);
    }

    #[test]
    fn interactive_forces_single_worker() {
        let options = MigrateOptions {
            interactive: true,
            concurrency: Some(16),
            ..MigrateOptions::default()
        };
        let config = effective_config(PipelineConfig::default(), &manifest(None), &options).unwrap();
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn out_of_range_override_is_rejected() {
        let options = MigrateOptions {
            max_iterations: Some(0),
            ..MigrateOptions::default()
        };
        assert!(effective_config(PipelineConfig::default(), &manifest(None), &options).is_err());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        assert!(run_check_config(Path::new("/nonexistent/polyport.yaml")).is_err());
        assert_eq!(load_config(None).unwrap(), PipelineConfig::default());
    }
}
