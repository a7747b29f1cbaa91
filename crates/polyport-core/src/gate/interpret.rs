//! Normalisation of raw tool output into verdict records
//!
//! Understands the common `path:line[:col]: [CODE] message` shape, Python
//! tracebacks, and `FAILED name - message` test summaries.

use super::tools::ToolOutput;
use crate::verdict::{Diagnostic, Severity, TestFailure};
use once_cell::sync::Lazy;
use regex::Regex;

static LOCATED: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?m)^[^:\n]+:(\d+):(?:(\d+):)?\s*(?:([A-Z]+[0-9]+)\s+)?(.+?)\s*$").ok()
});

static TRACEBACK_LINE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"File "[^"]*", line (\d+)"#).ok());

static EXCEPTION: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?m)^(\w*(?:Error|Exception)): (.+?)\s*$").ok());

static TEST_FAILURE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?m)^(?:FAILED|FAIL|ERROR):?\s+(\S+)(?:\s+-\s+(.+?))?\s*$").ok()
});

fn parse_u32(text: Option<regex::Match<'_>>) -> Option<u32> {
    text.and_then(|m| m.as_str().parse().ok())
}

/// `path:line[:col]: [CODE] message` records
#[must_use]
pub fn located_diagnostics(text: &str) -> Vec<Diagnostic> {
    let Some(re) = LOCATED.as_ref() else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|caps| {
            let line = parse_u32(caps.get(1))?;
            let code = caps.get(3).map(|m| m.as_str().to_string());
            let severity = code.as_deref().map_or(Severity::Error, Severity::from_code);
            Some(Diagnostic {
                line: Some(line),
                column: parse_u32(caps.get(2)),
                code,
                message: caps.get(4).map_or_else(String::new, |m| m.as_str().to_string()),
                severity,
            })
        })
        .collect()
}

/// The error at the bottom of a Python traceback
#[must_use]
pub fn traceback_diagnostic(text: &str) -> Option<Diagnostic> {
    let (exc_re, line_re) = (EXCEPTION.as_ref()?, TRACEBACK_LINE.as_ref()?);
    let caps = exc_re.captures_iter(text).last()?;
    let mut diagnostic = Diagnostic::error(format!("{}: {}", &caps[1], &caps[2]));
    if let Some(line) = line_re
        .captures_iter(text)
        .last()
        .and_then(|c| c[1].parse().ok())
    {
        diagnostic.line = Some(line);
    }
    Some(diagnostic)
}

/// Syntax checker findings
///
/// Falls back to the last output line so a failing check always yields at
/// least one diagnostic.
#[must_use]
pub fn syntax_diagnostics(output: &ToolOutput) -> Vec<Diagnostic> {
    let text = output.combined();
    if let Some(diagnostic) = traceback_diagnostic(&text) {
        return vec![diagnostic];
    }
    let located = located_diagnostics(&text);
    if !located.is_empty() {
        return located
            .into_iter()
            .map(|d| Diagnostic {
                severity: Severity::Error,
                ..d
            })
            .collect();
    }
    vec![Diagnostic::error(
        output
            .last_line()
            .unwrap_or_else(|| "syntax check failed without output".to_string()),
    )]
}

/// Linter findings; severity from the code prefix
#[must_use]
pub fn lint_diagnostics(output: &ToolOutput) -> Vec<Diagnostic> {
    located_diagnostics(&output.combined())
}

/// Failing tests
#[must_use]
pub fn test_failures(output: &ToolOutput) -> Vec<TestFailure> {
    let text = output.combined();
    let parsed: Vec<TestFailure> = TEST_FAILURE
        .as_ref()
        .map(|re| {
            re.captures_iter(&text)
                .map(|caps| TestFailure {
                    name: caps[1].to_string(),
                    message: caps.get(2).map_or_else(String::new, |m| m.as_str().to_string()),
                })
                .collect()
        })
        .unwrap_or_default();
    if !parsed.is_empty() {
        return parsed;
    }
    vec![TestFailure {
        name: "(test suite)".to_string(),
        message: output
            .last_line()
            .unwrap_or_else(|| "tests failed without output".to_string()),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ruff_concise_output() {
        let out = ToolOutput::findings(
            "/tmp/x/list.py:1:8: F401 [*] `os` imported but unused\n\
             /tmp/x/list.py:12:80: E501 Line too long (91 > 79)\n\
             /tmp/x/list.py:3:1: W291 Trailing whitespace\n\
             Found 3 errors.\n",
        );
        let diags = lint_diagnostics(&out);
        assert_eq!(diags.len(), 3);
        assert_eq!(diags[0].code.as_deref(), Some("F401"));
        assert_eq!(diags[0].line, Some(1));
        assert_eq!(diags[0].column, Some(8));
        assert_eq!(diags[0].message, "[*] `os` imported but unused");
        assert_eq!(diags[2].severity, Severity::Warning);
    }

    #[test]
    fn py_compile_traceback() {
        let out = ToolOutput {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "  File \"/tmp/x/list.py\", line 3\n    def f(:\n          ^\nSyntaxError: invalid syntax\n".into(),
        };
        let diags = syntax_diagnostics(&out);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].line, Some(3));
        assert_eq!(diags[0].message, "SyntaxError: invalid syntax");
    }

    #[test]
    fn syntax_falls_back_to_last_line() {
        let out = ToolOutput::findings("something odd\n\n");
        let diags = syntax_diagnostics(&out);
        assert_eq!(diags, vec![Diagnostic::error("something odd")]);
    }

    #[test]
    fn pytest_summary() {
        let out = ToolOutput::findings(
            "..F\nFAILED tests/test_list.py::test_push - assert 1 == 2\nFAILED tests/test_list.py::test_pop\n1 failed, 2 passed\n",
        );
        let failures = test_failures(&out);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].name, "tests/test_list.py::test_push");
        assert_eq!(failures[0].message, "assert 1 == 2");
        assert_eq!(failures[1].message, "");
    }

    #[test]
    fn unparseable_tests_still_fail() {
        let failures = test_failures(&ToolOutput::findings("boom"));
        assert_eq!(failures[0].name, "(test suite)");
        assert_eq!(failures[0].message, "boom");
    }
}
