use thiserror::Error;

/// Error type returned by [`crate::sinks::sink::Sink`] implementations.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("accumulator is closed")]
    Closed,
    #[error("pending queue is full ({max_pending} items)")]
    Full { max_pending: usize },
}

#[derive(Debug, Error)]
pub enum AccumulatorError {
    #[error("invalid accumulator configuration: {0}")]
    InvalidConfig(String),
    #[error("accumulator loop terminated abnormally: {0}")]
    Join(#[from] tokio::task::JoinError),
}
