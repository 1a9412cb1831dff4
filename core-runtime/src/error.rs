use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The configuration contradicts itself, e.g. enhanced cover reading
    /// forced on while filesystem loading is disabled.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
