use async_trait::async_trait;

use crate::{batch::Batch, error::SinkError};

use super::sink::Sink;

/// Delivers every batch to each inner sink in order.
///
/// A failing sink does not stop delivery to the remaining ones; the first error
/// is returned once all sinks have been attempted.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn Sink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Box<dyn Sink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Box<dyn Sink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl Sink for FanoutSink {
    async fn deliver(&mut self, batch: &Batch) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.deliver(batch).await {
                tracing::warn!("Sink delivery of batch {} failed: {}", batch.sequence, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.close().await {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
