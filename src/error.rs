use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Failed to read scheduling data from the store: {0}")]
    LoaderError(#[source] rusqlite::Error),

    #[error("Failed to build the wave model: {0}")]
    ModelError(String),

    #[error("Writeback finished with {failed} failed chunk(s) out of {total}")]
    WriterError { failed: usize, total: usize },

    #[error("Failed to emit result artifacts: {0}")]
    ArtifactError(#[from] std::io::Error),

    #[error("Failed to serialize result artifacts: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Store access failed: {0}")]
    StoreError(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
