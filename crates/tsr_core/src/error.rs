use std::path::PathBuf;

/// Lookup and I/O failures raised by resource packs.
///
/// Every variant carries the offending (normalized) path so callers can tell
/// which segment of a lookup failed.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("not a file: {0}")]
    NotAFile(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("file exists: {0}")]
    FileExists(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PackError {
    /// Virtual path the error refers to, if it is a lookup error.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::FileNotFound(p)
            | Self::NotAFile(p)
            | Self::NotADirectory(p)
            | Self::FileExists(p) => Some(p),
            Self::Io { .. } => None,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
