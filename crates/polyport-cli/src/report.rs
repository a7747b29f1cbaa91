//! Text and JSON renderings of run results and plans

use polyport_core::{Project, ProjectResult, UnitReport, UnitStatus};
use polyport_graph::FileId;
use serde::Serialize;
use std::fmt::Write as _;

fn status_mark(status: UnitStatus) -> &'static str {
    match status {
        UnitStatus::Converged => "OK     ",
        UnitStatus::Failed => "FAILED ",
        UnitStatus::Skipped => "SKIPPED",
        UnitStatus::Pending | UnitStatus::InProgress => "?      ",
    }
}

fn unit_reason(unit: &UnitReport) -> Option<String> {
    unit.failure_cause
        .as_ref()
        .map(ToString::to_string)
        .or_else(|| unit.skip_reason.as_ref().map(ToString::to_string))
}

/// Human-readable run report
///
/// Verbose output lists every attempt with its verdict and the detail lines
/// of the failures it carried.
#[must_use]
pub fn render_text(result: &ProjectResult, verbose: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Migration Report ({})", result.run_id);
    let _ = writeln!(out, "==========================================");
    let _ = writeln!(
        out,
        "Units: {}  converged: {}  failed: {}  skipped: {}",
        result.units.len(),
        result.counts.converged,
        result.counts.failed,
        result.counts.skipped
    );
    let _ = writeln!(out, "Elapsed: {}ms", result.elapsed_ms);
    if result.cancelled {
        let _ = writeln!(out, "Run was cancelled");
    }
    let _ = writeln!(out);

    for unit in &result.units {
        let circular = if unit.circular { " [circular]" } else { "" };
        let _ = writeln!(
            out,
            "{} {} -> {} ({}/{} attempts){circular}",
            status_mark(unit.status),
            unit.file,
            unit.output_path.display(),
            unit.attempts,
            unit.max_iterations
        );
        if let Some(reason) = unit_reason(unit) {
            let _ = writeln!(out, "        reason: {reason}");
        }
        if verbose {
            for attempt in &unit.history {
                let _ = writeln!(
                    out,
                    "        #{} {} {} ({}ms)",
                    attempt.attempt,
                    attempt.verdict.label(),
                    attempt.candidate_hash.short(),
                    attempt.elapsed_ms
                );
                for failure in attempt.verdict.failures() {
                    for line in failure.detail_lines() {
                        let _ = writeln!(out, "            {line}");
                    }
                }
            }
        } else if let Some(failure) = unit.last_verdict.as_ref().and_then(|v| v.primary()) {
            let _ = writeln!(out, "        last verdict: {}", failure.label());
        }
    }

    if !result.unresolved_references.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Unresolved references:");
        for reference in &result.unresolved_references {
            let kind = if reference.blocking { "error" } else { "warning" };
            let line = reference.line.map(|l| format!(":{l}")).unwrap_or_default();
            let _ = writeln!(
                out,
                "  {kind}: {}{line} imports `{}`",
                reference.file, reference.module
            );
        }
    }

    let _ = writeln!(out);
    let outcome = match (&result.output, result.is_fully_converged()) {
        (_, true) => "all units converged",
        (Some(_), false) => "partial output written with placeholders",
        (None, false) => "output withheld, not every unit converged",
    };
    let _ = writeln!(out, "Result: {outcome}");
    out
}

/// Run report as pretty JSON
///
/// # Errors
/// Serialization failure.
pub fn render_json(result: &ProjectResult) -> serde_json::Result<String> {
    serde_json::to_string_pretty(result)
}

/// Processing plan of a project, without any oracle calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    /// Files in processing order
    pub order: Vec<PlannedFile>,
    /// Files grouped by topological layer
    pub layers: Vec<Vec<FileId>>,
    /// Strongly connected components with more than one file
    pub cycles: Vec<Vec<FileId>>,
}

/// One planned file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedFile {
    /// Source file
    pub file: FileId,
    /// Target module
    pub module: String,
    /// Files it depends on
    pub depends_on: Vec<FileId>,
    /// Member of a cycle
    pub circular: bool,
}

impl Plan {
    /// Plan for `project`
    #[must_use]
    pub fn of(project: &Project) -> Self {
        let graph = project.graph();
        let order = graph
            .order()
            .iter()
            .map(|file| PlannedFile {
                file: file.clone(),
                module: project.modules().module_of(file).unwrap_or_default().to_string(),
                depends_on: graph.dependencies(file),
                circular: graph.is_circular(file),
            })
            .collect();
        Self {
            order,
            layers: graph.layers(),
            cycles: graph.cycles().map(<[FileId]>::to_vec).collect(),
        }
    }

    /// Human-readable plan
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Processing order ({} files):", self.order.len());
        for (n, planned) in self.order.iter().enumerate() {
            let circular = if planned.circular { " [circular]" } else { "" };
            let _ = write!(out, "{:>4}. {} -> {}{circular}", n + 1, planned.file, planned.module);
            if !planned.depends_on.is_empty() {
                let deps: Vec<&str> = planned.depends_on.iter().map(FileId::as_str).collect();
                let _ = write!(out, "  (after {})", deps.join(", "));
            }
            let _ = writeln!(out);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "Layers: {}", self.layers.len());
        for (n, layer) in self.layers.iter().enumerate() {
            let files: Vec<&str> = layer.iter().map(FileId::as_str).collect();
            let _ = writeln!(out, "  {n}: {}", files.join(" "));
        }
        if self.cycles.is_empty() {
            let _ = writeln!(out, "Cycles: none");
        } else {
            let _ = writeln!(out, "Cycles: {}", self.cycles.len());
            for cycle in &self.cycles {
                let files: Vec<&str> = cycle.iter().map(FileId::as_str).collect();
                let _ = writeln!(out, "  {}", files.join(" <-> "));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyport_test_utils::{cycle_project, diamond_project};

    #[test]
    fn plan_lists_cycles_and_layers() {
        let plan = Plan::of(&cycle_project());
        assert_eq!(plan.cycles.len(), 1);
        assert!(plan.order.iter().any(|p| p.circular));
        let text = plan.render_text();
        assert!(text.contains("a.c <-> b.c"));
        assert!(text.contains("[circular]"));
    }

    #[test]
    fn plan_orders_dependencies_first() {
        let plan = Plan::of(&diamond_project());
        let position = |name: &str| plan.order.iter().position(|p| p.file.as_str() == name).unwrap();
        for planned in &plan.order {
            for dep in &planned.depends_on {
                assert!(position(dep.as_str()) < position(planned.file.as_str()));
            }
        }
        assert!(plan.render_text().contains("Cycles: none"));
    }
}
