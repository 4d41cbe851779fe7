//! Optional ripgrep pass that narrows the files worth parsing.
//!
//! Results are advisory. Whether rg ran, failed or is missing never changes
//! what gets printed, only how many files are parsed.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Keep the argument list of a single rg invocation well below OS limits.
const FILES_PER_CALL: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prefilter {
    /// Files that contain the needle.
    Candidates(HashSet<PathBuf>),
    /// rg is not installed.
    Unavailable,
    /// rg ran but failed; carries the warning to print.
    Failed(String),
}

/// Files among `files` that contain `needle` literally, according to rg.
pub fn rg_candidates(needle: &str, files: &[PathBuf]) -> Prefilter {
    let mut found = HashSet::new();
    for chunk in files.chunks(FILES_PER_CALL) {
        let output = Command::new("rg")
            .args(["--no-config", "--files-with-matches", "--fixed-strings", "--"])
            .arg(needle)
            .args(chunk)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        let output = match output {
            Ok(o) => o,
            Err(e) if e.kind() == ErrorKind::NotFound => return Prefilter::Unavailable,
            Err(e) => return Prefilter::Failed(format!("Warning: rg failed to start: {e}; falling back to full scan.")),
        };

        match output.status.code() {
            Some(0) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                found.extend(stdout.lines().filter(|l| !l.is_empty()).map(PathBuf::from));
            }
            Some(1) => {}
            code => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let detail = stderr.split_whitespace().collect::<Vec<_>>().join(" ");
                let code = code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string());
                return Prefilter::Failed(format!(
                    "Warning: rg failed (exit {code}): {detail}; falling back to full scan."
                ));
            }
        }
    }
    Prefilter::Candidates(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_list_never_spawns_rg() {
        assert_eq!(rg_candidates("needle", &[]), Prefilter::Candidates(HashSet::new()));
    }
}
