use thiserror::Error;

pub type Result<T> = std::result::Result<T, LecternError>;

/// Crate-wide error taxonomy.
///
/// `Validation` and `Authorization` are caller mistakes and carry no side
/// effects. `Upstream` covers embedding/generation failures and timeouts:
/// the embedding client retries transient transport failures a bounded
/// number of times, and beyond that nothing is replayed automatically.
/// Persistence is idempotent, so the caller retries the whole operation.
/// `DataConsistency` marks stored state that violates an invariant, such as
/// a vector whose dimension disagrees with the index schema; watermark gaps
/// are repaired by re-embedding rather than surfaced through it.
#[derive(Error, Debug)]
pub enum LecternError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream service error: {0}")]
    Upstream(String),

    #[error("Data consistency error: {0}")]
    DataConsistency(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl LecternError {
    pub fn database(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }

    pub fn upstream(err: impl std::fmt::Display) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl From<sqlx::Error> for LecternError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<config::ConfigError> for LecternError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub mod chat;
pub mod commands;
pub mod config;
pub mod context;
pub mod database;
pub mod embeddings;
pub mod generation;
pub mod indexer;
pub mod server;
pub mod transcript;
