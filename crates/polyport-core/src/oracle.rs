//! Oracle adapter
//!
//! Wraps an [`OracleBackend`] (the transport seam) with prompt rendering,
//! a per-call timeout and bounded exponential backoff on transient errors.
//! A well-formed but wrong answer is returned as-is; retrying those is the
//! controller's job.

use crate::config::OracleConfig;
use crate::error::{OracleError, TransportError};
use crate::feedback::{DependencyContext, Feedback};
use crate::prompt::{PromptTemplates, REFINE, TRANSLATE};
use crate::rules::TranslationRules;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use polyport_graph::{FileId, SourceFile};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

static FENCED_BLOCK: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)```[^\n`]*\n(.*?)```").ok());

/// One request to the oracle service
#[derive(Debug, Clone, PartialEq)]
pub struct OracleRequest {
    /// File being translated
    pub file: FileId,
    /// Model name
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Response token limit
    pub max_tokens: u32,
    /// System prompt
    pub system: String,
    /// User prompt
    pub user: String,
    /// Carries feedback from a rejected attempt
    pub refinement: bool,
}

/// Transport to a translation service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OracleBackend: Send + Sync {
    /// Send one request and return the raw response text
    async fn complete(&self, request: &OracleRequest) -> Result<String, TransportError>;
}

/// Exponential backoff state for one `translate` call
#[derive(Debug, Clone)]
pub struct Backoff {
    retries: u32,
    max_retries: u32,
    initial: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    /// Fresh state from config
    #[must_use]
    pub fn new(config: &OracleConfig) -> Self {
        Self {
            retries: 0,
            max_retries: config.max_retries,
            initial: config.initial_backoff,
            max: config.max_backoff,
            multiplier: config.multiplier,
        }
    }

    /// Delay before the next retry, or `None` when retries are exhausted
    ///
    /// A server-provided `retry_after` wins over the computed delay but is
    /// still capped at the maximum.
    pub fn next_delay(&mut self, retry_after: Option<Duration>) -> Option<Duration> {
        if self.retries >= self.max_retries {
            return None;
        }
        let exponent = i32::try_from(self.retries).unwrap_or(i32::MAX);
        self.retries += 1;
        let computed = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        let delay = retry_after
            .unwrap_or_else(|| Duration::from_secs_f64(computed.min(self.max.as_secs_f64())));
        Some(delay.min(self.max))
    }

    /// Retries granted so far
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }
}

/// What to translate
#[derive(Debug, Clone, Copy)]
pub struct TranslationTask<'a> {
    /// Source file
    pub source: &'a SourceFile,
    /// Module name the translation will be imported as
    pub module: &'a str,
    /// Feedback from the previous attempt
    pub feedback: Option<&'a Feedback>,
    /// Translated dependencies
    pub context: &'a DependencyContext,
}

/// Stateless adapter over an oracle backend
#[derive(Clone)]
pub struct OracleAdapter {
    backend: Arc<dyn OracleBackend>,
    config: OracleConfig,
    source_language: String,
    target_language: String,
    prompts: Arc<PromptTemplates>,
    rules: Arc<TranslationRules>,
}

impl std::fmt::Debug for OracleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleAdapter")
            .field("model", &self.config.model)
            .field("source_language", &self.source_language)
            .field("target_language", &self.target_language)
            .finish_non_exhaustive()
    }
}

impl OracleAdapter {
    /// Create adapter with built-in prompts and the preset rules for the pair
    #[must_use]
    pub fn new(
        backend: Arc<dyn OracleBackend>,
        config: OracleConfig,
        source_language: impl Into<String>,
        target_language: impl Into<String>,
    ) -> Self {
        let source_language = source_language.into();
        let target_language = target_language.into();
        let rules = TranslationRules::preset(&source_language, &target_language);
        Self {
            backend,
            config,
            source_language,
            target_language,
            prompts: Arc::new(PromptTemplates::default()),
            rules: Arc::new(rules),
        }
    }

    /// With custom prompt templates
    #[must_use]
    pub fn with_prompts(mut self, prompts: PromptTemplates) -> Self {
        self.prompts = Arc::new(prompts);
        self
    }

    /// With custom translation rules
    #[must_use]
    pub fn with_rules(mut self, rules: TranslationRules) -> Self {
        self.rules = Arc::new(rules);
        self
    }

    /// Target language name
    #[must_use]
    pub fn target_language(&self) -> &str {
        &self.target_language
    }

    /// Produce a candidate for `task`
    ///
    /// # Errors
    /// - `Timeout` when one call exceeds the per-call limit (not retried)
    /// - `Unavailable` when transient failures outlast the retry bound
    /// - `Rejected` when the backend refuses the request
    pub async fn translate(&self, task: &TranslationTask<'_>) -> Result<String, OracleError> {
        let request = self.build_request(task)?;
        let response = self.call_with_retry(&request).await?;
        Ok(extract_code(&response))
    }

    /// Render the prompt for `task`
    pub fn build_request(&self, task: &TranslationTask<'_>) -> Result<OracleRequest, OracleError> {
        let mut values: BTreeMap<&str, String> = BTreeMap::new();
        values.insert("source_language", self.source_language.clone());
        values.insert("target_language", self.target_language.clone());
        values.insert("file", task.source.id.to_string());
        values.insert("module", task.module.to_string());
        values.insert("code", task.source.text.clone());
        values.insert("dependencies", task.context.render(&self.target_language));
        values.insert("rules", self.rules.hints_for(&task.source.text));

        let template = match task.feedback {
            Some(feedback) => {
                values.insert("previous", feedback.previous_candidate.clone());
                values.insert("feedback", feedback.render());
                REFINE
            }
            None => TRANSLATE,
        };
        let prompt = self.prompts.render(template, &values)?;

        Ok(OracleRequest {
            file: task.source.id.clone(),
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            system: prompt.system,
            user: prompt.user,
            refinement: task.feedback.is_some(),
        })
    }

    async fn call_with_retry(&self, request: &OracleRequest) -> Result<String, OracleError> {
        let mut backoff = Backoff::new(&self.config);
        loop {
            let call = self.backend.complete(request);
            let err = match tokio::time::timeout(self.config.timeout, call).await {
                Err(_) => {
                    warn!(file = %request.file, timeout_ms = u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX), "Oracle call timed out");
                    return Err(OracleError::Timeout(self.config.timeout));
                }
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(TransportError::Rejected(message))) => {
                    return Err(OracleError::Rejected(message));
                }
                Ok(Err(err)) => err,
            };

            match backoff.next_delay(err.retry_after()) {
                Some(delay) => {
                    warn!(
                        file = %request.file,
                        retry = backoff.retries(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Transient oracle failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Err(OracleError::Unavailable {
                        attempts: backoff.retries() + 1,
                        last_error: err.to_string(),
                    });
                }
            }
            debug!(file = %request.file, "Retrying oracle call");
        }
    }
}

/// Pull the first fenced code block out of a response
///
/// Responses without a fence are taken verbatim (trimmed).
#[must_use]
pub fn extract_code(response: &str) -> String {
    FENCED_BLOCK
        .as_ref()
        .and_then(|re| re.captures(response))
        .and_then(|caps| caps.get(1))
        .map_or_else(|| response.trim().to_string(), |m| m.as_str().trim_end().to_string())
}
