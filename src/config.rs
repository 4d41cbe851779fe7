use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the optional per-directory settings file.
pub const CONFIG_FILE: &str = ".printfunction.json";

/// Directory names never descended into while walking.
pub const DEFAULT_IGNORE_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".venv",
    "venv",
    "env",
    "__pycache__",
    "node_modules",
    ".mypy_cache",
    ".pytest_cache",
    ".tox",
    "build",
    "dist",
    "site-packages",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Lines of context around query results when `-C` is not given.
    pub context_lines: usize,
    /// Lines of context around module/class changes in diff mode.
    pub diff_context_lines: usize,
    /// Replaces the built-in ignore list when present.
    pub ignore_dirs: Vec<String>,
    /// Extra directory names skipped on top of `ignore_dirs`.
    pub extra_ignore_dirs: Vec<String>,
    /// Extensions (without the dot) treated as Python.
    pub extensions: Vec<String>,
    /// Use ripgrep to skip files that cannot match a name query.
    pub use_rg: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            context_lines: 0,
            diff_context_lines: 3,
            ignore_dirs: DEFAULT_IGNORE_DIRS.iter().map(|s| s.to_string()).collect(),
            extra_ignore_dirs: vec![],
            extensions: vec!["py".to_string(), "pyw".to_string()],
            use_rg: true,
        }
    }
}

impl Config {
    /// Effective ignore list: base names plus extras, deduplicated.
    pub fn ignored_dir_names(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for name in self.ignore_dirs.iter().chain(&self.extra_ignore_dirs) {
            if !name.is_empty() && !out.contains(name) {
                out.push(name.clone());
            }
        }
        out
    }

    pub fn normalized_extensions(&self) -> Vec<String> {
        self.extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect()
    }

    /// `PF_DISABLE_RG=1` turns the prefilter off; `PF_CONTEXT=N` sets the
    /// default query context.
    pub fn apply_env(mut self) -> Self {
        self.apply_env_from(|key| std::env::var(key).ok());
        self
    }

    fn apply_env_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        if get("PF_DISABLE_RG").is_some_and(|v| is_truthy(&v)) {
            self.use_rg = false;
        }
        if let Some(raw) = get("PF_CONTEXT") {
            match raw.trim().parse::<usize>() {
                Ok(n) => self.context_lines = n,
                Err(_) => eprintln!("Warning: ignoring PF_CONTEXT={raw:?} (expected a non-negative integer)"),
            }
        }
    }
}

fn is_truthy(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Read `.printfunction.json` from `dir`. A missing file yields defaults; a
/// malformed one is reported and ignored.
pub fn load_config(dir: &Path) -> Config {
    let path = dir.join(CONFIG_FILE);
    let Ok(text) = std::fs::read_to_string(&path) else {
        return Config::default();
    };

    serde_json::from_str::<Config>(&text).unwrap_or_else(|e| {
        eprintln!("Warning: ignoring {}: {e}", path.display());
        Config::default()
    })
}
