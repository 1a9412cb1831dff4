use thiserror::Error;

/// Errors raised by the stream primitives in [`crate::flow`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// A stage demanded replay-cache invalidation of its parent with
    /// [`InvalidationMode::Required`](crate::flow::InvalidationMode::Required)
    /// but was wired without a parent handle.
    #[error("Stage '{stage}' requires an upstream invalidation handle but none was provided")]
    InvalidationUnavailable { stage: String },

    #[error("Stage '{stage}' has shut down")]
    Closed { stage: String },
}

pub type Result<T> = std::result::Result<T, FlowError>;
