//! Polyport CLI - manifest loading, logging, interactive driver and reports
//!
//! The `polyport` binary is a thin layer over [`commands`]; everything it does
//! is reachable from here for tests.

pub mod commands;
pub mod interactive;
pub mod logging;
pub mod manifest;
pub mod report;

pub use commands::{exit_code, MigrateOptions, EXIT_CONVERGED, EXIT_FATAL, EXIT_UNCONVERGED};
pub use interactive::TerminalSupervisor;
pub use logging::LogOptions;
pub use manifest::{Manifest, ManifestError, ManifestFile};
pub use report::{render_json, render_text, Plan, PlannedFile};
