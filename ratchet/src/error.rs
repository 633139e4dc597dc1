/// Error type for the ratchet crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Database(#[from] rusqlite::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Archive(#[from] zip::result::ZipError),
    /// The configured migration directory could not be resolved on the
    /// filesystem or inside an archive. Fatal for any command that needs it.
    #[error("migration directory not found: {0}")]
    DirectoryNotFound(String),
    /// Cooperative cancellation was observed; remaining work was abandoned.
    #[error("migration run cancelled")]
    Cancelled,
    #[error("{0}")]
    Generic(String),
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Self::Generic(value)
    }
}
