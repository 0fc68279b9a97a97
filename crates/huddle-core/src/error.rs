use thiserror::Error;

/// Failures a caller of the messaging pipelines can observe.
///
/// Live fan-out problems are deliberately absent: once the durable write has
/// succeeded they are logged as a [`crate::FanoutOutcome`] and never returned.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Missing, malformed or expired credential
    #[error("invalid or expired credential")]
    Authentication,

    /// The two users are not an authorized coach/athlete pair, or the caller
    /// may not act on the resource
    #[error("permission denied: {0}")]
    Permission(String),

    /// The durable write or read failed; nothing was sent
    #[error("durable store failure: {0}")]
    Persistence(#[from] anyhow::Error),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),
}
