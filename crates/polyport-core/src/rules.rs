//! Translation hint tables
//!
//! Type, function and macro mappings for a language pair. The adapter passes
//! only the entries whose source names occur in the file being translated.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

/// Fallback for unmapped types
pub const UNKNOWN_TYPE: &str = "Any";

/// Mapping tables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationRules {
    /// Source type -> target type
    pub types: BTreeMap<String, String>,
    /// Source function -> target callable
    pub functions: BTreeMap<String, String>,
    /// Source macro -> target expression
    pub macros: BTreeMap<String, String>,
}

impl TranslationRules {
    /// Empty tables
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in C to Python tables
    #[must_use]
    pub fn c_to_python() -> Self {
        let pairs = |items: &[(&str, &str)]| -> BTreeMap<String, String> {
            items
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect()
        };
        Self {
            types: pairs(&[
                ("int", "int"),
                ("char", "str"),
                ("float", "float"),
                ("double", "float"),
                ("void", "None"),
                ("bool", "bool"),
                ("long", "int"),
                ("short", "int"),
                ("unsigned", "int"),
                ("size_t", "int"),
                ("FILE", "TextIO"),
                ("time_t", "float"),
                ("pthread_t", "threading.Thread"),
                ("pthread_mutex_t", "threading.Lock"),
                ("pthread_cond_t", "threading.Condition"),
            ]),
            functions: pairs(&[
                ("printf", "print"),
                ("fprintf", "print"),
                ("scanf", "input"),
                ("sprintf", "str.format"),
                ("strlen", "len"),
                ("strcmp", "=="),
                ("strcat", "+"),
                ("atoi", "int"),
                ("atol", "int"),
                ("atof", "float"),
                ("rand", "random.randint"),
                ("srand", "random.seed"),
                ("time", "time.time"),
                ("sleep", "time.sleep"),
                ("exit", "sys.exit"),
                ("abort", "sys.exit"),
                ("isalpha", "str.isalpha"),
                ("isdigit", "str.isdigit"),
                ("isalnum", "str.isalnum"),
                ("tolower", "str.lower"),
                ("toupper", "str.upper"),
                ("malloc", "(drop; allocate a Python object)"),
                ("free", "(drop; garbage collected)"),
            ]),
            macros: pairs(&[
                ("NULL", "None"),
                ("TRUE", "True"),
                ("FALSE", "False"),
                ("EOF", "-1"),
                ("BUFSIZ", "8192"),
                ("EXIT_SUCCESS", "0"),
                ("EXIT_FAILURE", "1"),
            ]),
        }
    }

    /// Preset for a language pair, empty when none is built in
    #[must_use]
    pub fn preset(source: &str, target: &str) -> Self {
        match (source.to_ascii_lowercase().as_str(), target.to_ascii_lowercase().as_str()) {
            ("c", "python") => Self::c_to_python(),
            _ => Self::new(),
        }
    }

    /// Target type; unknown types map to [`UNKNOWN_TYPE`]
    #[must_use]
    pub fn map_type<'a>(&'a self, name: &str) -> &'a str {
        self.types.get(name).map_or(UNKNOWN_TYPE, String::as_str)
    }

    /// Target callable; unknown functions map to themselves
    #[must_use]
    pub fn map_function<'a>(&'a self, name: &'a str) -> &'a str {
        self.functions.get(name).map_or(name, String::as_str)
    }

    /// Target expression; unknown macros map to themselves
    #[must_use]
    pub fn map_macro<'a>(&'a self, name: &'a str) -> &'a str {
        self.macros.get(name).map_or(name, String::as_str)
    }

    /// Add a type mapping
    pub fn add_type(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.types.insert(from.into(), to.into());
    }

    /// Add a function mapping
    pub fn add_function(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.functions.insert(from.into(), to.into());
    }

    /// Add a macro mapping
    pub fn add_macro(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.macros.insert(from.into(), to.into());
    }

    /// Overlay `other` on top of these tables
    pub fn extend(&mut self, other: TranslationRules) {
        self.types.extend(other.types);
        self.functions.extend(other.functions);
        self.macros.extend(other.macros);
    }

    /// Hint text limited to names occurring in `source`
    #[must_use]
    pub fn hints_for(&self, source: &str) -> String {
        let tokens: BTreeSet<&str> = source
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .filter(|t| !t.is_empty())
            .collect();

        let mut out = String::new();
        for (label, table) in [
            ("types", &self.types),
            ("functions", &self.functions),
            ("macros", &self.macros),
        ] {
            let used: Vec<_> = table
                .iter()
                .filter(|(from, _)| tokens.contains(from.as_str()))
                .collect();
            if used.is_empty() {
                continue;
            }
            let _ = writeln!(out, "{label}:");
            for (from, to) in used {
                let _ = writeln!(out, "  {from} -> {to}");
            }
        }
        if out.is_empty() {
            out.push_str("(none)");
        }
        out
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallbacks() {
        let rules = TranslationRules::c_to_python();
        assert_eq!(rules.map_type("double"), "float");
        assert_eq!(rules.map_type("struct node"), UNKNOWN_TYPE);
        assert_eq!(rules.map_function("printf"), "print");
        assert_eq!(rules.map_function("list_push"), "list_push");
        assert_eq!(rules.map_macro("NULL"), "None");
        assert_eq!(rules.map_macro("MAX_LEN"), "MAX_LEN");
    }

    #[test]
    fn hints_only_mention_used_names() {
        let rules = TranslationRules::c_to_python();
        let hints = rules.hints_for("int main(void) { printf(\"%d\", NULL); }");
        assert!(hints.contains("printf -> print"));
        assert!(hints.contains("NULL -> None"));
        assert!(hints.contains("int -> int"));
        assert!(!hints.contains("strlen"));
        assert_eq!(TranslationRules::new().hints_for("int x;"), "(none)");
    }

    #[test]
    fn preset_by_language_pair() {
        assert_eq!(TranslationRules::preset("C", "Python"), TranslationRules::c_to_python());
        assert_eq!(TranslationRules::preset("fortran", "python"), TranslationRules::new());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        let mut rules = TranslationRules::new();
        rules.add_type("uint8_t", "int");
        rules.add_function("list_free", "del");
        rules.add_macro("MAX", "max");
        rules.save(&path).unwrap();
        assert_eq!(TranslationRules::load(&path).unwrap(), rules);
    }

    #[test]
    fn extend_overrides() {
        let mut rules = TranslationRules::c_to_python();
        let mut overlay = TranslationRules::new();
        overlay.add_type("char", "bytes");
        rules.extend(overlay);
        assert_eq!(rules.map_type("char"), "bytes");
    }
}
