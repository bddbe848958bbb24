use async_trait::async_trait;

use crate::{batch::Batch, error::SinkError};

#[async_trait]
pub trait Sink: Send {
    /// Delivers one non-empty batch.
    async fn deliver(&mut self, batch: &Batch) -> Result<(), SinkError>;

    /// Sinks can be stateful and so want to be flushed upon graceful shutdown.
    async fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[async_trait]
impl<S: Sink + ?Sized> Sink for Box<S> {
    async fn deliver(&mut self, batch: &Batch) -> Result<(), SinkError> {
        (**self).deliver(batch).await
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        (**self).close().await
    }
}
