pub mod accumulator;
pub mod batch;
pub mod config;
pub mod error;
pub mod metrics;
pub mod sinks;

pub use accumulator::{Accumulator, AccumulatorConfig, OverflowPolicy, Submitter};
pub use batch::Batch;
pub use error::{AccumulatorError, SinkError, SubmitError};
