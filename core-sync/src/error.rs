use std::sync::Arc;

use core_async::FlowError;
use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Pipeline wiring error: {0}")]
    Flow(#[from] FlowError),

    /// A scan requested through `refresh()` failed. Every caller waiting on
    /// the same scan receives the same error.
    #[error("Scan failed: {0}")]
    ScanFailed(Arc<LibraryError>),

    /// Stored playlists could not be read or resolved. Observers of the
    /// playlist collection all receive the same error.
    #[error("Playlist resolution failed: {0}")]
    PlaylistsFailed(Arc<LibraryError>),

    #[error("Invalid scan phase transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Library reader has shut down")]
    Shutdown,
}

impl ReaderError {
    /// The library error behind this one, if any.
    pub fn library_error(&self) -> Option<&LibraryError> {
        match self {
            ReaderError::Library(e) => Some(e),
            ReaderError::ScanFailed(e) | ReaderError::PlaylistsFailed(e) => Some(e.as_ref()),
            _ => None,
        }
    }

    /// Whether asking again later can succeed.
    pub fn is_recoverable(&self) -> bool {
        self.library_error().is_some_and(LibraryError::is_recoverable)
    }
}

pub type Result<T> = std::result::Result<T, ReaderError>;
