use std::io::Write;

use async_trait::async_trait;

use crate::{batch::Batch, error::SinkError};

use super::sink::Sink;

pub const DEFAULT_LABEL: &str = "Batched result:";

/// Writes each batch as a single labelled line, e.g. `Batched result: [a b]`.
pub struct ConsoleSink {
    label: String,
    writer: Box<dyn Write + Send>,
}

impl ConsoleSink {
    pub fn stdout(label: impl Into<String>) -> Self {
        Self::new(label, Box::new(std::io::stdout()))
    }

    pub fn new(label: impl Into<String>, writer: Box<dyn Write + Send>) -> Self {
        Self {
            label: label.into(),
            writer,
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::stdout(DEFAULT_LABEL)
    }
}

fn format_batch(label: &str, batch: &Batch) -> String {
    format!("{} [{}]", label, batch.items().join(" "))
}

#[async_trait]
impl Sink for ConsoleSink {
    #[tracing::instrument(
        skip(self, batch),
        fields(sequence = batch.sequence),
        name = "sink-deliver-console"
    )]
    async fn deliver(&mut self, batch: &Batch) -> Result<(), SinkError> {
        writeln!(self.writer, "{}", format_batch(&self.label, batch))?;
        self.writer.flush()?;
        Ok(())
    }
}
