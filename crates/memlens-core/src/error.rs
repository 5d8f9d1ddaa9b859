use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid address: {address:#x}")]
    InvalidAddress { address: u64 },

    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Stale handle: cached {cached:#x}, observed {observed:#x}")]
    StaleHandle { cached: u64, observed: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Errors caused by the remote process (gone, moved, unmapped) rather than by us.
    ///
    /// Callers retry these on a later cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::InvalidAddress { .. }
                | Error::Transport(_)
                | Error::StaleHandle { .. }
                | Error::NotFound(_)
        )
    }

    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
