//! Import scanning and rewriting for candidates

use once_cell::sync::Lazy;
use regex::Regex;

/// One imported module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    /// Module path as written
    pub module: String,
    /// 1-based line
    pub line: u32,
}

/// Finds and rewrites imports in target-language text
pub trait ImportScanner: Send + Sync {
    /// Imports in `candidate`, in order of appearance
    fn scan(&self, candidate: &str) -> Vec<ImportRef>;

    /// Modules always available in the target language
    fn builtin_modules(&self) -> &[&'static str] {
        &[]
    }

    /// Rewrite references to module `from` in one line as `to`
    fn rewrite_line(&self, line: &str, from: &str, to: &str) -> String;
}

static FROM_IMPORT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^(\s*from\s+)([A-Za-z_][\w.]*)(\s+import\b.*)$").ok());

static PLAIN_IMPORT: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^(\s*import\s+)(.+)$").ok());

const PYTHON_STDLIB: &[&str] = &[
    "__future__", "abc", "argparse", "array", "asyncio", "base64", "binascii", "bisect",
    "builtins", "calendar", "cmath", "collections", "contextlib", "copy", "csv", "ctypes",
    "dataclasses", "datetime", "decimal", "enum", "errno", "fractions", "functools", "gc",
    "getopt", "glob", "hashlib", "heapq", "hmac", "io", "itertools", "json", "locale",
    "logging", "math", "mmap", "multiprocessing", "numbers", "operator", "os", "pathlib",
    "pickle", "platform", "pprint", "queue", "random", "re", "select", "selectors", "shlex",
    "shutil", "signal", "socket", "sqlite3", "stat", "statistics", "string", "struct",
    "subprocess", "sys", "tempfile", "textwrap", "threading", "time", "timeit", "traceback",
    "types", "typing", "unittest", "uuid", "warnings", "weakref", "zlib",
];

/// Python `import x` / `from x import y` statements
///
/// Relative imports (`from . import x`) are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonImports;

impl PythonImports {
    fn split_item(item: &str) -> (&str, Option<&str>) {
        let mut parts = item.split_whitespace();
        let name = parts.next().unwrap_or_default();
        match (parts.next(), parts.next()) {
            (Some("as"), Some(alias)) => (name, Some(alias)),
            _ => (name, None),
        }
    }

    /// Rewrite `from` in an import statement with no trailing comment
    fn rewrite_statement(code: &str, from: &str, to: &str) -> String {
        if let Some(caps) = FROM_IMPORT.as_ref().and_then(|re| re.captures(code)) {
            if &caps[2] == from {
                return format!("{}{to}{}", &caps[1], &caps[3]);
            }
            return code.to_string();
        }
        let Some(caps) = PLAIN_IMPORT.as_ref().and_then(|re| re.captures(code)) else {
            return code.to_string();
        };
        let items: Vec<String> = caps[2]
            .split(',')
            .map(|item| {
                let (name, alias) = Self::split_item(item.trim());
                if name == from {
                    format!("{to} as {}", alias.unwrap_or(from))
                } else {
                    item.trim().to_string()
                }
            })
            .collect();
        format!("{}{}", &caps[1], items.join(", "))
    }
}

impl ImportScanner for PythonImports {
    fn scan(&self, candidate: &str) -> Vec<ImportRef> {
        let (Some(from_re), Some(plain_re)) = (FROM_IMPORT.as_ref(), PLAIN_IMPORT.as_ref()) else {
            return Vec::new();
        };
        let mut refs = Vec::new();
        for (idx, raw) in candidate.lines().enumerate() {
            let line = u32::try_from(idx + 1).unwrap_or(u32::MAX);
            let code = raw.split('#').next().unwrap_or_default();
            if let Some(caps) = from_re.captures(code) {
                refs.push(ImportRef {
                    module: caps[2].to_string(),
                    line,
                });
            } else if let Some(caps) = plain_re.captures(code) {
                for item in caps[2].split(',') {
                    let (name, _) = Self::split_item(item.trim().trim_end_matches('\\'));
                    if !name.is_empty() && !name.starts_with('(') {
                        refs.push(ImportRef {
                            module: name.to_string(),
                            line,
                        });
                    }
                }
            }
        }
        refs
    }

    fn builtin_modules(&self) -> &[&'static str] {
        PYTHON_STDLIB
    }

    fn rewrite_line(&self, line: &str, from: &str, to: &str) -> String {
        let (code, comment) = line.find('#').map_or((line, ""), |at| line.split_at(at));
        let statement = code.trim_end();
        let gap = &code[statement.len()..];
        format!("{}{gap}{comment}", Self::rewrite_statement(statement, from, to))
    }
}
