//! Typed errors for rule loading and batch execution.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A single rule line that failed to compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPattern {
    /// Where the line came from (a file path or `<built-in>`).
    pub origin: String,
    /// 1-based line number within `origin`.
    pub line: usize,
    pub pattern: String,
    pub message: String,
}

impl fmt::Display for InvalidPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: invalid regex pattern: {}",
            self.origin, self.line, self.message
        )
    }
}

fn join_lines(errors: &[InvalidPattern]) -> String {
    errors
        .iter()
        .map(|e| format!("  {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Errors raised while loading normalization rules.
#[derive(Error, Debug)]
pub enum PatternError {
    /// An explicitly requested rule file does not exist.
    #[error("Pattern file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Could not read pattern file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// One or more lines of a strictly loaded file failed to compile.
    #[error("Invalid regex patterns found in {}:\n{}", path.display(), join_lines(.errors))]
    InvalidPatterns {
        path: PathBuf,
        errors: Vec<InvalidPattern>,
    },

    /// Neither the default file nor the built-in list produced a usable rule.
    #[error("All available patterns failed to compile:\n{}", join_lines(.0))]
    NoUsablePatterns(Vec<InvalidPattern>),

    #[error("Could not write pattern file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} already exists. Remove it first if you want to reinitialize.", .0.display())]
    AlreadyExists(PathBuf),
}

/// A batch that could not be processed; its contribution is dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("batch {batch} panicked: {message}")]
    Panicked { batch: usize, message: String },
}
