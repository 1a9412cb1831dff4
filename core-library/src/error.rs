use std::path::PathBuf;

use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    /// A host capability needed for this scan is missing.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A playlist file lists fewer paths than the index has members for it.
    #[error(
        "Playlist {playlist} is inconsistent: {members} members but only {paths} paths in {}",
        file.display()
    )]
    DataInconsistency {
        playlist: i64,
        file: PathBuf,
        members: usize,
        paths: usize,
    },

    #[error("Configuration misuse: {0}")]
    ConfigurationMisuse(String),

    /// A row is missing a column the scanner cannot do without.
    #[error("Malformed {collection} row: missing {column}")]
    MalformedRow {
        collection: &'static str,
        column: &'static str,
    },

    #[error("Bridge error: {0}")]
    Bridge(#[source] BridgeError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LibraryError {
    /// Whether retrying later (after a grant, or after the index settles) can
    /// succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LibraryError::PermissionDenied(_) | LibraryError::Bridge(_)
        )
    }
}

impl From<BridgeError> for LibraryError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::PermissionDenied(message) => LibraryError::PermissionDenied(message),
            other => LibraryError::Bridge(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
