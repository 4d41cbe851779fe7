use clap::ValueEnum;
use ignore::WalkBuilder;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

/// Which files a run looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FileType {
    /// Python sources only (by extension).
    #[default]
    Py,
    /// Every file; non-Python files support line-based queries only.
    All,
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub file_type: FileType,
    /// Lowercase extensions, without the dot, treated as Python.
    pub extensions: Vec<String>,
    /// Directory names skipped at any depth while walking.
    pub ignore_dirs: Vec<String>,
}

impl ScanOptions {
    pub fn is_python(&self, path: &Path) -> bool {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        self.extensions.iter().any(|e| *e == ext)
    }

    fn accepts(&self, path: &Path) -> bool {
        match self.file_type {
            FileType::All => true,
            FileType::Py => self.is_python(path),
        }
    }

    fn is_ignored_dir(&self, name: &str) -> bool {
        self.ignore_dirs.iter().any(|d| d == name)
    }
}

/// Discovered files plus warnings to surface; nothing here is fatal.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub files: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

fn has_glob_meta(root: &str) -> bool {
    root.contains(['*', '?', '['])
}

/// Expand roots into an ordered, deduplicated file list.
///
/// - an existing file is taken as-is (ignore rules do not apply to it);
/// - a directory is walked in sorted order, skipping ignored directory names;
/// - a glob is expanded; directories it yields are walked;
/// - a missing path or an empty glob produces a warning.
pub fn discover(roots: &[String], opts: &ScanOptions) -> Discovery {
    let mut out = Discovery::default();
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut seen_roots: HashSet<&str> = HashSet::new();

    let mut push = |path: PathBuf, files: &mut Vec<PathBuf>| {
        let path = clean_path(&path);
        if seen.insert(path.clone()) {
            files.push(path);
        }
    };

    for root in roots {
        if !seen_roots.insert(root.as_str()) {
            continue;
        }
        let path = Path::new(root);

        if path.is_file() {
            if opts.accepts(path) {
                push(path.to_path_buf(), &mut out.files);
            }
            continue;
        }
        if path.is_dir() {
            for file in walk_dir(path, opts) {
                push(file, &mut out.files);
            }
            continue;
        }

        if has_glob_meta(root) {
            let Ok(paths) = glob::glob(root) else {
                out.warnings.push(format!("Warning: invalid glob pattern: {root}"));
                continue;
            };
            let mut matched_any = false;
            for entry in paths.flatten() {
                matched_any = true;
                if glob_hit_is_ignored(&entry, root, opts) {
                    continue;
                }
                if entry.is_dir() {
                    for file in walk_dir(&entry, opts) {
                        push(file, &mut out.files);
                    }
                } else if opts.accepts(&entry) {
                    push(entry, &mut out.files);
                }
            }
            if !matched_any {
                out.warnings.push(format!("Warning: glob matched no files: {root}"));
            }
            continue;
        }

        out.warnings.push(format!("Warning: file not found: {root}"));
    }

    out
}

fn walk_dir(dir: &Path, opts: &ScanOptions) -> Vec<PathBuf> {
    let ignore_dirs = opts.ignore_dirs.clone();
    let walker = WalkBuilder::new(dir)
        .standard_filters(false)
        .hidden(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
            let name = entry.file_name().to_str().unwrap_or("");
            !(is_dir && ignore_dirs.iter().any(|d| d == name))
        })
        .build();

    let mut files = Vec::new();
    for item in walker {
        let Ok(dent) = item else { continue };
        if !dent.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let path = dent.into_path();
        if opts.accepts(&path) {
            files.push(path);
        }
    }
    files
}

/// A glob hit inside an ignored directory is skipped unless the pattern names
/// that directory itself.
fn glob_hit_is_ignored(hit: &Path, pattern: &str, opts: &ScanOptions) -> bool {
    let named: HashSet<&str> = pattern.split(['/', '\\']).collect();
    let parent = if hit.is_dir() { Some(hit) } else { hit.parent() };
    parent
        .into_iter()
        .flat_map(|p| p.components())
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .any(|name| opts.is_ignored_dir(name) && !named.contains(name))
}

/// Drop `./` components so `./a.py` and `a.py` are one file.
fn clean_path(path: &Path) -> PathBuf {
    let cleaned: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    if cleaned.as_os_str().is_empty() {
        path.to_path_buf()
    } else {
        cleaned
    }
}

/// Path as printed in headers: forward slashes, no leading `./`.
pub fn display_path(path: &Path) -> String {
    clean_path(path).to_string_lossy().replace('\\', "/")
}
