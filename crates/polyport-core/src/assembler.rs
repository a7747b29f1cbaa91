//! Project assembly: one output artifact per source file
//!
//! Converged units contribute their final candidate, with imports that use a
//! bare alias rewritten to the canonical module name. Every other unit gets a
//! commented placeholder carrying its status, diagnostics and last candidate.

use crate::addressing::ModuleMap;
use crate::error::{PipelineError, UnitStateError};
use crate::gate::ImportScanner;
use crate::hash::ContentHash;
use crate::project::Project;
use crate::unit::{TranslationUnit, UnitStatus};
use futures::future::try_join_all;
use polyport_graph::FileId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// What an artifact holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A verified translation
    Translated,
    /// A marked stand-in for a unit that did not converge
    Placeholder,
}

/// One file of the output tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputArtifact {
    /// Source file it stands for
    pub source: FileId,
    /// Relative output path
    pub path: PathBuf,
    /// Translation or placeholder
    pub kind: ArtifactKind,
    /// Terminal status of the unit
    pub status: UnitStatus,
    /// File contents
    #[serde(skip)]
    pub content: String,
    /// Hash of `content`
    pub hash: ContentHash,
}

impl OutputArtifact {
    fn new(source: FileId, path: PathBuf, kind: ArtifactKind, status: UnitStatus, content: String) -> Self {
        let hash = ContentHash::of_text(&content);
        Self {
            source,
            path,
            kind,
            status,
            content,
            hash,
        }
    }
}

/// Assembled output, one artifact per source file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputTree {
    artifacts: Vec<OutputArtifact>,
}

impl OutputTree {
    /// All artifacts in graph order
    #[must_use]
    pub fn artifacts(&self) -> &[OutputArtifact] {
        &self.artifacts
    }

    /// Artifact for `source`
    #[must_use]
    pub fn get(&self, source: &FileId) -> Option<&OutputArtifact> {
        self.artifacts.iter().find(|a| &a.source == source)
    }

    /// Verified translations
    pub fn translated(&self) -> impl Iterator<Item = &OutputArtifact> {
        self.artifacts.iter().filter(|a| a.kind == ArtifactKind::Translated)
    }

    /// Placeholders
    pub fn placeholders(&self) -> impl Iterator<Item = &OutputArtifact> {
        self.artifacts.iter().filter(|a| a.kind == ArtifactKind::Placeholder)
    }

    /// Number of artifacts
    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Write every artifact below `dir`, creating parent directories
    ///
    /// # Errors
    /// `PipelineError::Output` on any file-system failure.
    pub async fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
        let writes = self.artifacts.iter().map(|artifact| async move {
            let target = dir.join(&artifact.path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| PipelineError::Output(format!("{}: {e}", parent.display())))?;
            }
            tokio::fs::write(&target, artifact.content.as_bytes())
                .await
                .map_err(|e| PipelineError::Output(format!("{}: {e}", target.display())))?;
            debug!(path = %target.display(), kind = ?artifact.kind, "Wrote artifact");
            Ok::<_, PipelineError>(target)
        });
        let written = try_join_all(writes).await?;
        info!(dir = %dir.display(), files = written.len(), "Output tree written");
        Ok(written)
    }
}

/// Builds the output tree from terminal units
#[derive(Clone)]
pub struct ProjectAssembler {
    imports: Arc<dyn ImportScanner>,
}

impl std::fmt::Debug for ProjectAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectAssembler").finish_non_exhaustive()
    }
}

impl ProjectAssembler {
    /// Create assembler
    #[must_use]
    pub fn new(imports: Arc<dyn ImportScanner>) -> Self {
        Self { imports }
    }

    /// Assemble `units` of `project`
    ///
    /// # Errors
    /// `UnitStateError::NotTerminal` if any unit has not finished,
    /// `UnitStateError::UnknownFile` if a unit is not part of `project`.
    pub fn assemble(&self, project: &Project, units: &[TranslationUnit]) -> Result<OutputTree, PipelineError> {
        if let Some(open) = units.iter().find(|u| !u.status().is_terminal()) {
            return Err(UnitStateError::NotTerminal {
                file: open.file().to_string(),
                status: open.status(),
            }
            .into());
        }

        let modules = project.modules();
        let converged: BTreeSet<&FileId> = units
            .iter()
            .filter(|u| u.status() == UnitStatus::Converged)
            .map(TranslationUnit::file)
            .collect();

        let mut artifacts = Vec::with_capacity(units.len());
        for unit in units {
            let Some(path) = modules.path_of(unit.file()).cloned() else {
                return Err(UnitStateError::UnknownFile {
                    file: unit.file().to_string(),
                }
                .into());
            };
            let artifact = match unit.final_candidate() {
                Some(candidate) => OutputArtifact::new(
                    unit.file().clone(),
                    path,
                    ArtifactKind::Translated,
                    unit.status(),
                    self.rewrite_imports(candidate, modules, &converged),
                ),
                None => OutputArtifact::new(
                    unit.file().clone(),
                    path,
                    ArtifactKind::Placeholder,
                    unit.status(),
                    placeholder(unit, modules.comment_prefix()),
                ),
            };
            artifacts.push(artifact);
        }

        let tree = OutputTree { artifacts };
        info!(
            translated = tree.translated().count(),
            placeholders = tree.placeholders().count(),
            "Project assembled"
        );
        Ok(tree)
    }

    /// Replace alias imports of converged project modules by canonical names
    fn rewrite_imports(&self, candidate: &str, modules: &ModuleMap, converged: &BTreeSet<&FileId>) -> String {
        let mut rewrites: BTreeMap<u32, Vec<(String, String)>> = BTreeMap::new();
        for import in self.imports.scan(candidate) {
            let Some(target) = modules.lookup(&import.module) else {
                continue;
            };
            let Some(canonical) = modules.module_of(target) else {
                continue;
            };
            if canonical != import.module && converged.contains(target) {
                rewrites
                    .entry(import.line)
                    .or_default()
                    .push((import.module, canonical.to_string()));
            }
        }
        if rewrites.is_empty() {
            return candidate.to_string();
        }

        let mut out = String::with_capacity(candidate.len());
        for (idx, line) in candidate.lines().enumerate() {
            let number = u32::try_from(idx + 1).unwrap_or(u32::MAX);
            let mut text = line.to_string();
            for (from, to) in rewrites.get(&number).into_iter().flatten() {
                text = self.imports.rewrite_line(&text, from, to);
            }
            out.push_str(&text);
            out.push('\n');
        }
        if !candidate.ends_with('\n') {
            out.pop();
        }
        out
    }
}

fn placeholder(unit: &TranslationUnit, prefix: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{prefix} polyport: {} was not translated", unit.file());
    let _ = writeln!(out, "{prefix} status: {}", unit.status());
    if let Some(reason) = unit.skip_reason() {
        let _ = writeln!(out, "{prefix} reason: {reason}");
    }
    if let Some(cause) = unit.failure_cause() {
        let _ = writeln!(out, "{prefix} reason: {cause}");
    }
    let _ = writeln!(out, "{prefix} attempts: {}/{}", unit.attempt(), unit.max_iterations());

    if let Some(verdict) = unit.last_verdict() {
        let _ = writeln!(out, "{prefix} last verdict: {}", verdict.label());
        for failure in verdict.failures() {
            for line in failure.detail_lines() {
                let _ = writeln!(out, "{prefix}   {line}");
            }
        }
    }

    let last = unit.current_candidate();
    if !last.is_empty() {
        let _ = writeln!(out, "{prefix}");
        let _ = writeln!(out, "{prefix} last candidate:");
        for line in last.lines() {
            if line.is_empty() {
                let _ = writeln!(out, "{prefix}");
            } else {
                let _ = writeln!(out, "{prefix} {line}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::PythonAddressing;
    use crate::gate::PythonImports;
    use crate::unit::{FailureCause, SkipReason};
    use crate::verdict::{Diagnostic, Failure, Verdict};
    use polyport_graph::{DependencyRelation, SourceFile};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn project() -> Project {
        let sources = [
            SourceFile::new("src/list.c", ""),
            SourceFile::new("src/main.c", ""),
            SourceFile::new("src/util.c", ""),
        ];
        Project::new(sources, &DependencyRelation::new(), &PythonAddressing).unwrap()
    }

    fn converged(file: &str, text: &str) -> TranslationUnit {
        let mut unit = TranslationUnit::new(FileId::new(file), 3, false);
        unit.begin().unwrap();
        unit.next_attempt().unwrap();
        unit.record(text.into(), Verdict::pass(), Duration::ZERO).unwrap();
        unit.converge().unwrap();
        unit
    }

    fn failed(file: &str, text: &str) -> TranslationUnit {
        let mut unit = TranslationUnit::new(FileId::new(file), 1, false);
        unit.begin().unwrap();
        unit.next_attempt().unwrap();
        let verdict = Verdict::fail(Failure::Syntax {
            diagnostics: vec![Diagnostic::error("SyntaxError: invalid syntax").at(2, Some(5))],
        });
        unit.record(text.into(), verdict, Duration::ZERO).unwrap();
        unit.fail(FailureCause::IterationsExhausted).unwrap();
        unit
    }

    fn assembler() -> ProjectAssembler {
        ProjectAssembler::new(Arc::new(PythonImports))
    }

    #[test]
    fn rewrites_aliases_of_converged_modules_only() {
        let units = vec![
            converged("src/list.c", "def push(): pass\n"),
            converged("src/main.c", "from list import push\nimport util\nimport os\n"),
            failed("src/util.c", "def helper(:\n"),
        ];
        let tree = assembler().assemble(&project(), &units).unwrap();
        assert_eq!(tree.len(), 3);
        let main = tree.get(&FileId::new("src/main.c")).unwrap();
        assert_eq!(main.content, "from src.list import push\nimport util\nimport os\n");
        assert_eq!(main.path, PathBuf::from("src/main.py"));
        assert_eq!(main.hash, ContentHash::of_text(&main.content));
    }

    #[test]
    fn failed_unit_gets_placeholder_with_diagnostics() {
        let units = vec![failed("src/util.c", "def helper(:\n    pass")];
        let tree = assembler().assemble(&project(), &units).unwrap();
        let artifact = &tree.artifacts()[0];
        assert_eq!(artifact.kind, ArtifactKind::Placeholder);
        assert_eq!(artifact.status, UnitStatus::Failed);
        assert!(artifact.content.contains("# status: failed"));
        assert!(artifact.content.contains("# reason: iteration bound reached"));
        assert!(artifact.content.contains("# last verdict: FailSyntax"));
        assert!(artifact.content.contains("#   2:5: SyntaxError: invalid syntax"));
        assert!(artifact.content.contains("# def helper(:"));
        assert!(artifact.content.lines().all(|l| l.starts_with('#')));
    }

    #[test]
    fn skipped_unit_gets_placeholder() {
        let mut unit = TranslationUnit::new(FileId::new("src/main.c"), 3, false);
        unit.skip(SkipReason::Declined).unwrap();
        let tree = assembler().assemble(&project(), &[unit]).unwrap();
        assert_eq!(tree.placeholders().count(), 1);
        assert!(tree.artifacts()[0].content.contains("declined by supervisor"));
    }

    #[test]
    fn refuses_non_terminal_units() {
        let unit = TranslationUnit::new(FileId::new("src/main.c"), 3, false);
        let err = assembler().assemble(&project(), &[unit]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnitState(UnitStateError::NotTerminal { .. })
        ));
    }

    #[test]
    fn unit_outside_project_is_an_error() {
        let units = vec![
            converged("src/list.c", "X = 1\n"),
            converged("src/stray.c", "Y = 2\n"),
        ];
        let err = assembler().assemble(&project(), &units).unwrap_err();
        match err {
            PipelineError::UnitState(UnitStateError::UnknownFile { file }) => assert_eq!(file, "src/stray.c"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn writes_tree_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let units = vec![converged("src/list.c", "X = 1\n")];
        let tree = assembler().assemble(&project(), &units).unwrap();
        let written = tree.write_to(dir.path()).await.unwrap();
        assert_eq!(written, vec![dir.path().join("src/list.py")]);
        let text = std::fs::read_to_string(dir.path().join("src/list.py")).unwrap();
        assert_eq!(text, "X = 1\n");
    }
}
