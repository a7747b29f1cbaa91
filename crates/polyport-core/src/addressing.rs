//! Target-language addressing
//!
//! An [`AddressingConvention`] decides how a source file is named once
//! translated: its importable module name, its output path and how a comment
//! line starts. [`ModuleMap`] applies a convention to a whole project and
//! resolves collisions (e.g. `list.c` and `list.h`).

use polyport_graph::FileId;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Naming rules of the target language
pub trait AddressingConvention: Send + Sync {
    /// Dotted/qualified module name for `segments` (path components without extension)
    fn module_name(&self, segments: &[String]) -> String;

    /// Relative output path for `segments`
    fn output_path(&self, segments: &[String]) -> PathBuf;

    /// Line comment prefix
    fn comment_prefix(&self) -> &str;

    /// Turn one path component into a legal identifier
    fn sanitize(&self, segment: &str) -> String {
        let mut out: String = segment
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
            out.insert(0, '_');
        }
        out
    }
}

/// Python packages and modules
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonAddressing;

impl AddressingConvention for PythonAddressing {
    fn module_name(&self, segments: &[String]) -> String {
        segments.join(".")
    }

    fn output_path(&self, segments: &[String]) -> PathBuf {
        let mut path: PathBuf = segments.iter().collect();
        path.set_extension("py");
        path
    }

    fn comment_prefix(&self) -> &str {
        "#"
    }
}

/// Resolved address of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleAddress {
    /// Canonical module name
    pub module: String,
    /// Relative output path
    pub path: PathBuf,
}

/// Addresses for every file in a project
#[derive(Debug, Clone, Default)]
pub struct ModuleMap {
    addresses: BTreeMap<FileId, ModuleAddress>,
    by_module: BTreeMap<String, FileId>,
    aliases: BTreeMap<String, FileId>,
    comment_prefix: String,
}

impl ModuleMap {
    /// Address `files` under `convention`
    ///
    /// Files whose extension-less paths collide get the extension appended
    /// to their last segment (`list.h` becomes `list_h`). A name that is still
    /// taken after that (`foo-bar.c` next to `foo_bar.c`) gets a numeric
    /// suffix, so every file has its own module and path. A bare stem is an
    /// alias only when exactly one file has it.
    pub fn new<'a>(
        files: impl IntoIterator<Item = &'a FileId>,
        convention: &dyn AddressingConvention,
    ) -> Self {
        let files: Vec<&FileId> = files.into_iter().collect();
        let segments_of = |file: &FileId| -> Vec<String> {
            file.without_extension()
                .split('/')
                .filter(|s| !s.is_empty() && *s != ".")
                .map(|s| convention.sanitize(s))
                .collect()
        };

        let mut base_counts: BTreeMap<Vec<String>, usize> = BTreeMap::new();
        for file in files.iter().copied() {
            *base_counts.entry(segments_of(file)).or_default() += 1;
        }

        let mut stem_counts: BTreeMap<String, usize> = BTreeMap::new();
        for file in &files {
            *stem_counts.entry(convention.sanitize(file.stem())).or_default() += 1;
        }

        let mut map = Self {
            comment_prefix: convention.comment_prefix().to_string(),
            ..Self::default()
        };
        let mut taken_paths: BTreeSet<PathBuf> = BTreeSet::new();
        for file in files {
            let mut segments = segments_of(file);
            if base_counts.get(&segments).copied().unwrap_or(0) > 1 {
                let name = file.as_str().rsplit('/').next().unwrap_or_default();
                let ext = name.rsplit_once('.').map_or("", |(_, e)| e);
                if let Some(last) = segments.last_mut() {
                    last.push('_');
                    last.push_str(&convention.sanitize(ext));
                }
            }
            let mut address = ModuleAddress {
                module: convention.module_name(&segments),
                path: convention.output_path(&segments),
            };
            let base = segments.last().cloned().unwrap_or_default();
            let mut n = 2;
            while map.by_module.contains_key(&address.module) || taken_paths.contains(&address.path) {
                if let Some(last) = segments.last_mut() {
                    *last = format!("{base}_{n}");
                } else {
                    segments.push(format!("{base}_{n}"));
                }
                address = ModuleAddress {
                    module: convention.module_name(&segments),
                    path: convention.output_path(&segments),
                };
                n += 1;
            }
            taken_paths.insert(address.path.clone());
            map.by_module.insert(address.module.clone(), file.clone());
            map.addresses.insert(file.clone(), address);
        }

        for file in map.addresses.keys() {
            let stem = convention.sanitize(file.stem());
            if stem_counts.get(&stem) == Some(&1) && !map.by_module.contains_key(&stem) {
                map.aliases.insert(stem, file.clone());
            }
        }
        map
    }

    /// Address of `file`
    #[must_use]
    pub fn address(&self, file: &FileId) -> Option<&ModuleAddress> {
        self.addresses.get(file)
    }

    /// Canonical module name of `file`
    #[must_use]
    pub fn module_of(&self, file: &FileId) -> Option<&str> {
        self.addresses.get(file).map(|a| a.module.as_str())
    }

    /// Output path of `file`
    #[must_use]
    pub fn path_of(&self, file: &FileId) -> Option<&PathBuf> {
        self.addresses.get(file).map(|a| &a.path)
    }

    /// File addressed by a module name or unambiguous alias
    #[must_use]
    pub fn lookup(&self, module: &str) -> Option<&FileId> {
        self.by_module.get(module).or_else(|| self.aliases.get(module))
    }

    /// Names under which `file` may be imported: canonical name first
    #[must_use]
    pub fn names_of(&self, file: &FileId) -> Vec<&str> {
        let mut names: Vec<&str> = self.module_of(file).into_iter().collect();
        names.extend(
            self.aliases
                .iter()
                .filter(|(_, f)| *f == file)
                .map(|(alias, _)| alias.as_str()),
        );
        names
    }

    /// Comment prefix of the convention
    #[must_use]
    pub fn comment_prefix(&self) -> &str {
        &self.comment_prefix
    }

    /// Number of files
    #[must_use]
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}
