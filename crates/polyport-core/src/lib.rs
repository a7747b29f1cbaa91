//! Polyport Core - dependency-ordered translate/verify/refine pipeline
//!
//! Drives every file of a project to a terminal status:
//! - **TranslationUnit**: per-file state machine with a bounded attempt count
//! - **OracleAdapter**: prompt rendering, per-call timeout and transient retry
//!   with exponential backoff over an [`OracleBackend`]
//! - **VerificationGate**: syntax, import, static analysis and test stages
//!   merged into one [`Verdict`]
//! - **RefinementController**: dependency-respecting scheduler with bounded
//!   concurrency and cooperative cancellation
//! - **ProjectAssembler**: output tree with placeholders for units that did not
//!   converge
//!
//! # Example
//!
//! ```rust,ignore
//! use polyport_core::prelude::*;
//!
//! # async fn example(project: Project, backend: Arc<dyn OracleBackend>) -> Result<(), PipelineError> {
//! let pipeline = Pipeline::new(PipelineConfig::default(), backend)?;
//! let result = pipeline.run(&project, CancellationToken::new()).await?;
//!
//! println!("{} of {} units converged", result.counts.converged, result.units.len());
//! # Ok(())
//! # }
//! ```

pub mod addressing;
pub mod assembler;
pub mod config;
pub mod controller;
pub mod error;
pub mod feedback;
pub mod gate;
pub mod hash;
pub mod oracle;
pub mod pipeline;
pub mod project;
pub mod prompt;
pub mod result;
pub mod rules;
pub mod unit;
pub mod verdict;

// Re-exports for convenience
pub use addressing::{AddressingConvention, ModuleAddress, ModuleMap, PythonAddressing};
pub use assembler::{ArtifactKind, OutputArtifact, OutputTree, ProjectAssembler};
pub use config::{
    AcceptancePolicy, FailedDependencyContext, OracleConfig, PipelineConfig, ToolCommand,
    ToolsConfig,
};
pub use controller::{AutoApprove, RefinementController, RunOutcome, Supervisor};
pub use error::{
    ConfigError, OracleError, PipelineError, PromptError, ToolError, TransportError,
    UnitStateError,
};
pub use feedback::{ContextEntry, ContextStatus, DependencyContext, Feedback};
pub use gate::{
    CheckInput, CheckTool, CommandTool, GatePolicy, ImportScanner, ProjectContext, PythonImports,
    ToolOutcome, ToolOutput, UnitCheck, VerificationGate,
};
pub use hash::ContentHash;
pub use oracle::{Backoff, OracleAdapter, OracleBackend, OracleRequest, TranslationTask};
pub use pipeline::Pipeline;
pub use project::Project;
pub use prompt::{PromptTemplate, PromptTemplates, RenderedPrompt};
pub use result::{
    AttemptSummary, ProjectResult, RunId, StatusCounts, UnitReport, UnresolvedReference, REPORT_FILE,
};
pub use rules::TranslationRules;
pub use unit::{AttemptRecord, FailureCause, SkipReason, TranslationUnit, UnitStatus};
pub use verdict::{Diagnostic, Failure, Severity, Stage, TestFailure, UnresolvedRef, Verdict};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running a migration
    pub use crate::{
        OracleBackend, Pipeline, PipelineConfig, PipelineError, Project, ProjectResult,
        PythonAddressing, Supervisor, TranslationUnit, UnitStatus, Verdict,
    };
    pub use std::sync::Arc;
    pub use tokio_util::sync::CancellationToken;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
