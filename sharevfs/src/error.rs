use thiserror::Error;

#[derive(Error, Debug)]
pub enum VfsError {
    /// A path segment tried to escape its parent (`..`, `.`, embedded separator, NUL).
    #[error("Bad path: {0}")]
    BadPath(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid mask pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Config parse error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("File watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VfsError {
    /// True for the errors a request handler should report as a client error
    /// rather than a missing resource.
    pub fn is_bad_path(&self) -> bool {
        matches!(self, VfsError::BadPath(_))
    }
}

pub type Result<T> = std::result::Result<T, VfsError>;
