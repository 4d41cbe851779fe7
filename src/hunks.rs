use anyhow::{anyhow, Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// New-side changed lines of one file in a unified diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChanges {
    /// Path as printed after `+++ b/`, relative to the repository root.
    pub path: String,
    pub lines: BTreeSet<usize>,
}

/// Collect changed lines per file from unified diff text. Files appear in
/// first-seen order; deleted files are skipped.
///
/// A hunk `+start,count` contributes `start..start+count`; a zero-count hunk
/// (pure deletion) contributes `start` as its insertion point.
pub fn parse_unified_diff(diff: &str) -> Vec<FileChanges> {
    let mut out: Vec<FileChanges> = Vec::new();
    let mut current: Option<usize> = None;

    for line in diff.lines() {
        if line.starts_with("diff --git ") {
            current = None;
        } else if let Some(path) = line.strip_prefix("+++ ") {
            current = new_side_path(path).map(|p| {
                if let Some(i) = out.iter().position(|f| f.path == p) {
                    i
                } else {
                    out.push(FileChanges {
                        path: p,
                        lines: BTreeSet::new(),
                    });
                    out.len() - 1
                }
            });
        } else if line.starts_with("@@") {
            let (Some(idx), Some((start, count))) = (current, parse_hunk_header(line)) else {
                continue;
            };
            let lines = &mut out[idx].lines;
            if count == 0 {
                lines.insert(start.max(1));
            } else {
                lines.extend(start..start + count);
            }
        }
    }

    out
}

fn new_side_path(raw: &str) -> Option<String> {
    let raw = raw.split('\t').next().unwrap_or(raw).trim();
    if raw == "/dev/null" {
        return None;
    }
    let raw = raw.trim_matches('"');
    Some(raw.strip_prefix("b/").unwrap_or(raw).to_string())
}

/// `(new_start, new_count)` from `@@ -a,b +c,d @@ ...`.
fn parse_hunk_header(line: &str) -> Option<(usize, usize)> {
    let new = line
        .trim_start_matches('@')
        .split_whitespace()
        .find(|part| part.starts_with('+'))?
        .trim_start_matches('+');
    match new.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((new.parse().ok()?, 1)),
    }
}

/// Repository root of the working directory.
pub fn repo_toplevel(cwd: &Path) -> Result<PathBuf> {
    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .context("Failed to run `git rev-parse` (is git installed?)")?;
    if !output.status.success() {
        return Err(anyhow!(
            "not a git repository: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(PathBuf::from(String::from_utf8_lossy(&output.stdout).trim()))
}

/// Run `git diff -U0` (against `rev` when given) limited to `paths`.
pub fn git_diff(cwd: &Path, rev: Option<&str>, paths: &[String]) -> Result<String> {
    let mut cmd = Command::new("git");
    cmd.args(["diff", "-U0", "--no-color", "--no-ext-diff", "--no-renames"]);
    if let Some(rev) = rev.filter(|r| !r.trim().is_empty()) {
        cmd.arg(rev);
    }
    cmd.arg("--").args(paths);

    let output = cmd
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .context("Failed to run `git diff` (is git installed?)")?;

    if !output.status.success() {
        return Err(anyhow!(
            "git diff failed (exit {}): {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
