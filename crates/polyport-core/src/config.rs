//! Pipeline configuration
//!
//! Loaded from YAML or TOML (chosen by file extension). Durations are written
//! in milliseconds. Every field has a default, so an empty file is valid.

use crate::error::ConfigError;
use crate::verdict::Severity;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound for `max_iterations`
pub const MAX_ITERATIONS_LIMIT: u32 = 32;

/// Upper bound for `concurrency`
pub const CONCURRENCY_LIMIT: usize = 256;

/// What a dependent sees of a dependency that ended `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedDependencyContext {
    /// Nothing
    #[default]
    Omit,
    /// The last unverified candidate, marked as such
    LastCandidate,
}

/// When the assembled output tree is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptancePolicy {
    /// Only when every unit converged
    Full,
    /// Always, with placeholders for non-converged units
    #[default]
    Partial,
}

/// External command used by a gate stage
///
/// Arguments may contain `{file}` (candidate path), `{dir}` (scratch root) and
/// `{tests}` (expands to one argument per test file).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    /// Executable
    pub program: String,
    /// Argument templates
    #[serde(default)]
    pub args: Vec<String>,
    /// Exit codes meaning "ran fine, reported findings"
    #[serde(default = "default_finding_codes")]
    pub finding_codes: Vec<i32>,
}

fn default_finding_codes() -> Vec<i32> {
    vec![1]
}

impl ToolCommand {
    /// Create command
    #[must_use]
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            finding_codes: default_finding_codes(),
        }
    }
}

/// Check tool commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Syntax check
    pub syntax: Option<ToolCommand>,
    /// Static analysis
    pub lint: Option<ToolCommand>,
    /// Test runner
    pub tests: Option<ToolCommand>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            syntax: Some(ToolCommand::new("python3", ["-m", "py_compile", "{file}"])),
            lint: Some(ToolCommand::new(
                "ruff",
                ["check", "--output-format=concise", "--no-cache", "{file}"],
            )),
            tests: Some(ToolCommand::new("python3", ["-m", "pytest", "-q", "-rf", "{tests}"])),
        }
    }
}

/// Oracle call settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Per-call timeout
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
    /// Transient-failure retries after the first call
    pub max_retries: u32,
    /// First backoff delay
    #[serde(rename = "initial_backoff_ms", with = "duration_ms")]
    pub initial_backoff: Duration,
    /// Backoff cap
    #[serde(rename = "max_backoff_ms", with = "duration_ms")]
    pub max_backoff: Duration,
    /// Backoff growth factor
    pub multiplier: f64,
    /// Model name (opaque)
    pub model: String,
    /// Sampling temperature (opaque)
    pub temperature: f32,
    /// Response token limit
    pub max_tokens: u32,
    /// Base URL of the chat-completions service
    pub endpoint: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            model: "gpt-4".to_string(),
            temperature: 0.2,
            max_tokens: 4096,
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Source language name
    pub source_language: String,
    /// Target language name
    pub target_language: String,
    /// Translate/verify cycles per unit
    pub max_iterations: u32,
    /// Units processed at once
    pub concurrency: usize,
    /// Unresolved imports fail the gate
    pub strict_imports: bool,
    /// Lint findings at or above the threshold fail the gate
    pub strict_static_analysis: bool,
    /// Lowest lint severity that fails the gate
    pub lint_failure_threshold: Severity,
    /// Run unit tests when a unit has them
    pub run_tests: bool,
    /// Per-stage verification timeout
    #[serde(rename = "verify_timeout_ms", with = "duration_ms")]
    pub verify_timeout: Duration,
    /// Context from failed dependencies
    pub failed_dependency_context: FailedDependencyContext,
    /// When output is assembled
    pub acceptance: AcceptancePolicy,
    /// Modules importable without a project unit
    pub external_libraries: Vec<String>,
    /// Oracle settings
    pub oracle: OracleConfig,
    /// Check tools
    pub tools: ToolsConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_language: "c".to_string(),
            target_language: "python".to_string(),
            max_iterations: 3,
            concurrency: 4,
            strict_imports: true,
            strict_static_analysis: true,
            lint_failure_threshold: Severity::Error,
            run_tests: false,
            verify_timeout: Duration::from_secs(60),
            failed_dependency_context: FailedDependencyContext::Omit,
            acceptance: AcceptancePolicy::Partial,
            external_libraries: Vec::new(),
            oracle: OracleConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With iteration bound
    #[inline]
    #[must_use]
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// With concurrency limit
    #[inline]
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// With import strictness
    #[inline]
    #[must_use]
    pub fn with_strict_imports(mut self, strict: bool) -> Self {
        self.strict_imports = strict;
        self
    }

    /// With static analysis strictness
    #[inline]
    #[must_use]
    pub fn with_strict_static_analysis(mut self, strict: bool) -> Self {
        self.strict_static_analysis = strict;
        self
    }

    /// With lint threshold
    #[inline]
    #[must_use]
    pub fn with_lint_threshold(mut self, severity: Severity) -> Self {
        self.lint_failure_threshold = severity;
        self
    }

    /// With test execution
    #[inline]
    #[must_use]
    pub fn with_run_tests(mut self, run: bool) -> Self {
        self.run_tests = run;
        self
    }

    /// With verification timeout
    #[inline]
    #[must_use]
    pub fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = timeout;
        self
    }

    /// With failed dependency context policy
    #[inline]
    #[must_use]
    pub fn with_failed_dependency_context(mut self, policy: FailedDependencyContext) -> Self {
        self.failed_dependency_context = policy;
        self
    }

    /// With acceptance policy
    #[inline]
    #[must_use]
    pub fn with_acceptance(mut self, acceptance: AcceptancePolicy) -> Self {
        self.acceptance = acceptance;
        self
    }

    /// With an external library
    #[inline]
    #[must_use]
    pub fn with_external_library(mut self, module: impl Into<String>) -> Self {
        self.external_libraries.push(module.into());
        self
    }

    /// With oracle settings
    #[inline]
    #[must_use]
    pub fn with_oracle(mut self, oracle: OracleConfig) -> Self {
        self.oracle = oracle;
        self
    }

    /// With tool commands
    #[inline]
    #[must_use]
    pub fn with_tools(mut self, tools: ToolsConfig) -> Self {
        self.tools = tools;
        self
    }

    /// Reject out-of-range values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_ITERATIONS_LIMIT).contains(&self.max_iterations) {
            return Err(ConfigError::invalid(
                "max_iterations",
                format!("must be in 1..={MAX_ITERATIONS_LIMIT}, got {}", self.max_iterations),
            ));
        }
        if !(1..=CONCURRENCY_LIMIT).contains(&self.concurrency) {
            return Err(ConfigError::invalid(
                "concurrency",
                format!("must be in 1..={CONCURRENCY_LIMIT}, got {}", self.concurrency),
            ));
        }
        if self.verify_timeout.is_zero() {
            return Err(ConfigError::invalid("verify_timeout_ms", "must be positive"));
        }
        if self.source_language.trim().is_empty() || self.target_language.trim().is_empty() {
            return Err(ConfigError::invalid("language", "source and target must be named"));
        }
        let oracle = &self.oracle;
        if oracle.timeout.is_zero() {
            return Err(ConfigError::invalid("oracle.timeout_ms", "must be positive"));
        }
        if oracle.max_retries > 10 {
            return Err(ConfigError::invalid("oracle.max_retries", "must be at most 10"));
        }
        if !(oracle.multiplier.is_finite() && oracle.multiplier >= 1.0) {
            return Err(ConfigError::invalid("oracle.multiplier", "must be a finite value >= 1.0"));
        }
        if oracle.initial_backoff > oracle.max_backoff {
            return Err(ConfigError::invalid(
                "oracle.initial_backoff_ms",
                "must not exceed max_backoff_ms",
            ));
        }
        if oracle.max_tokens == 0 {
            return Err(ConfigError::invalid("oracle.max_tokens", "must be positive"));
        }
        for (name, tool) in [
            ("tools.syntax", &self.tools.syntax),
            ("tools.lint", &self.tools.lint),
            ("tools.tests", &self.tools.tests),
        ] {
            if tool.as_ref().is_some_and(|t| t.program.trim().is_empty()) {
                return Err(ConfigError::invalid(name, "program must not be empty"));
            }
        }
        Ok(())
    }

    /// Parse YAML
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse {
            format: "yaml",
            message: e.to_string(),
        })
    }

    /// Parse TOML
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            format: "toml",
            message: e.to_string(),
        })
    }

    /// Load and validate a file; `.toml` is TOML, anything else YAML
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&text)?,
            _ => Self::from_yaml_str(&text)?,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Serde helper writing durations as integer milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize as milliseconds
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserialize from milliseconds
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.concurrency, 4);
        assert!(config.strict_imports);
        assert_eq!(config.failed_dependency_context, FailedDependencyContext::Omit);
        assert_eq!(config.oracle.max_retries, 3);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range() {
        let zero = PipelineConfig::new().with_max_iterations(0);
        assert!(matches!(
            zero.validate(),
            Err(ConfigError::Invalid { field: "max_iterations", .. })
        ));

        let huge = PipelineConfig::new().with_concurrency(1000);
        assert!(matches!(
            huge.validate(),
            Err(ConfigError::Invalid { field: "concurrency", .. })
        ));

        let mut bad_backoff = PipelineConfig::new();
        bad_backoff.oracle.multiplier = 0.5;
        assert!(bad_backoff.validate().is_err());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = "max_iterations: 5\nrun_tests: true\nverify_timeout_ms: 1500\noracle:\n  max_retries: 1\n";
        let config = PipelineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.max_iterations, 5);
        assert!(config.run_tests);
        assert_eq!(config.verify_timeout, Duration::from_millis(1500));
        assert_eq!(config.oracle.max_retries, 1);
        assert_eq!(config.oracle.model, "gpt-4");
        assert_eq!(config.concurrency, 4);
    }

    #[test]
    fn toml_file_roundtrip() {
        let config = PipelineConfig::new()
            .with_concurrency(2)
            .with_acceptance(AcceptancePolicy::Full)
            .with_external_library("numpy");
        let text = toml::to_string(&config).unwrap();

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(text.as_bytes()).unwrap();

        let loaded = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn load_reports_parse_errors() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(b"max_iterations: [not a number]").unwrap();
        assert!(matches!(
            PipelineConfig::load(file.path()),
            Err(ConfigError::Parse { format: "yaml", .. })
        ));
    }

    #[test]
    fn load_validates() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        file.write_all(b"concurrency: 0").unwrap();
        assert!(matches!(
            PipelineConfig::load(file.path()),
            Err(ConfigError::Invalid { field: "concurrency", .. })
        ));
    }
}
