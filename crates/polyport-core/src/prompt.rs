//! Prompt templates for the oracle
//!
//! A template has a fixed system part and a user part with `{placeholder}`
//! fields. Rendering fails if any placeholder lacks a value.

use crate::error::{ConfigError, PromptError};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Name of the first-attempt template
pub const TRANSLATE: &str = "translate";

/// Name of the feedback-driven template
pub const REFINE: &str = "refine";

static PLACEHOLDER: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\{([a-z_][a-z0-9_]*)\}").ok());

const TRANSLATE_SYSTEM: &str = "You are an expert code translator converting {source_language} code to {target_language}.
Translate the whole file while:
1. Preserving functionality exactly
2. Using idiomatic {target_language} with type hints and docstrings
3. Importing project modules only by the names listed as available dependencies
Reply with the complete translated file in a single fenced code block.";

const TRANSLATE_USER: &str = "Translate the following {source_language} file to {target_language}.

File: {file}
Target module: {module}

```{source_language}
{code}
```

Available dependencies:
{dependencies}

Translation hints:
{rules}";

const REFINE_USER: &str = "Your previous translation of {file} (module {module}) was rejected.

Previous candidate:
```{target_language}
{previous}
```

Problems, most severe first:
{feedback}

Original {source_language} source:
```{source_language}
{code}
```

Available dependencies:
{dependencies}

Translation hints:
{rules}

Return the corrected, complete file in a single fenced code block.";

/// A system/user prompt pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// System prompt
    pub system: String,
    /// User prompt
    pub user: String,
}

/// Rendered prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    /// System prompt
    pub system: String,
    /// User prompt
    pub user: String,
}

/// Named template registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptTemplates {
    templates: BTreeMap<String, PromptTemplate>,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        let mut templates = BTreeMap::new();
        templates.insert(
            TRANSLATE.to_string(),
            PromptTemplate {
                system: TRANSLATE_SYSTEM.to_string(),
                user: TRANSLATE_USER.to_string(),
            },
        );
        templates.insert(
            REFINE.to_string(),
            PromptTemplate {
                system: TRANSLATE_SYSTEM.to_string(),
                user: REFINE_USER.to_string(),
            },
        );
        Self { templates }
    }
}

impl PromptTemplates {
    /// Built-in templates
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a template
    pub fn add(&mut self, name: impl Into<String>, system: impl Into<String>, user: impl Into<String>) {
        self.templates.insert(
            name.into(),
            PromptTemplate {
                system: system.into(),
                user: user.into(),
            },
        );
    }

    /// Remove a template, returning it
    pub fn remove(&mut self, name: &str) -> Option<PromptTemplate> {
        self.templates.remove(name)
    }

    /// Template names in order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    /// Look up a template
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PromptTemplate> {
        self.templates.get(name)
    }

    /// Fill both parts of `name` with `values`
    pub fn render(
        &self,
        name: &str,
        values: &BTreeMap<&str, String>,
    ) -> Result<RenderedPrompt, PromptError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| PromptError::UnknownTemplate(name.to_string()))?;
        Ok(RenderedPrompt {
            system: fill(name, &template.system, values)?,
            user: fill(name, &template.user, values)?,
        })
    }

    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            format: "json",
            message: e.to_string(),
        })
    }

    /// Save as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            format: "json",
            message: e.to_string(),
        })?;
        std::fs::write(path, text).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

fn fill(template: &str, text: &str, values: &BTreeMap<&str, String>) -> Result<String, PromptError> {
    let Some(re) = PLACEHOLDER.as_ref() else {
        return Ok(text.to_string());
    };
    if let Some(missing) = re
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .find(|key| !values.contains_key(key.as_str()))
    {
        return Err(PromptError::MissingPlaceholder {
            template: template.to_string(),
            placeholder: missing,
        });
    }
    Ok(re
        .replace_all(text, |caps: &Captures<'_>| {
            values.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn values() -> BTreeMap<&'static str, String> {
        [
            ("source_language", "c"),
            ("target_language", "python"),
            ("file", "src/list.c"),
            ("module", "src.list"),
            ("code", "int x;"),
            ("dependencies", "(none)"),
            ("rules", "(none)"),
            ("previous", "x: int"),
            ("feedback", "FailSyntax"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect()
    }

    #[test]
    fn builtin_templates_render() {
        let templates = PromptTemplates::new();
        assert_eq!(templates.names(), vec![REFINE, TRANSLATE]);

        let prompt = templates.render(TRANSLATE, &values()).unwrap();
        assert!(prompt.system.contains("converting c code to python"));
        assert!(prompt.user.contains("File: src/list.c"));
        assert!(prompt.user.contains("```c\nint x;\n```"));

        let refine = templates.render(REFINE, &values()).unwrap();
        assert!(refine.user.contains("FailSyntax"));
    }

    #[test]
    fn missing_placeholder_is_error() {
        let mut templates = PromptTemplates::new();
        templates.add("custom", "sys", "Hello {name}");
        let err = templates.render("custom", &BTreeMap::new()).unwrap_err();
        assert_eq!(
            err,
            PromptError::MissingPlaceholder {
                template: "custom".into(),
                placeholder: "name".into()
            }
        );
    }

    #[test]
    fn unknown_template() {
        let templates = PromptTemplates::new();
        assert_eq!(
            templates.render("nope", &values()),
            Err(PromptError::UnknownTemplate("nope".into()))
        );
    }

    #[test]
    fn literal_braces_survive() {
        let mut templates = PromptTemplates::new();
        templates.add("braces", "", "dict = {} and {Key} stay; {file} goes");
        let out = templates.render("braces", &values()).unwrap();
        assert_eq!(out.user, "dict = {} and {Key} stay; src/list.c goes");
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.json");
        let mut templates = PromptTemplates::new();
        templates.add("extra", "s", "u {file}");
        templates.remove(REFINE);
        templates.save(&path).unwrap();

        let loaded = PromptTemplates::load(&path).unwrap();
        assert_eq!(loaded, templates);
        assert!(loaded.get(REFINE).is_none());
    }
}
