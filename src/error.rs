use std::path::PathBuf;
use thiserror::Error;

/// Location of the first syntax problem tree-sitter reported in a file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}, column {column}: {message}")]
pub struct ParseError {
    /// 1-based line of the offending node.
    pub line: usize,
    /// 1-based column of the offending node.
    pub column: usize,
    pub message: String,
}

/// Error taxonomy for a run.
///
/// `Usage` aborts the whole run. `Read` and `Parse` are per-file: the caller
/// reports them, marks the run as having errors and moves on to the next file.
#[derive(Error, Debug)]
pub enum PfError {
    #[error("{0}")]
    Usage(String),

    #[error("Error reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
}

impl PfError {
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Per-file errors never stop the remaining files from being processed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Usage(_) => false,
            Self::Read { .. } | Self::Parse { .. } => true,
        }
    }
}
