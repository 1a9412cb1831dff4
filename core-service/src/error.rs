use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Reader error: {0}")]
    Reader(#[from] core_sync::ReaderError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::error::BridgeError),
}

impl ServiceError {
    /// Whether retrying later (e.g. after a permission grant) can succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ServiceError::Reader(err) => err.is_recoverable(),
            ServiceError::Bridge(bridge_traits::error::BridgeError::PermissionDenied(_)) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
