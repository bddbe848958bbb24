use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;

use crate::{batch::Batch, error::SinkError};

use super::sink::Sink;

/// Appends every batch as one JSON object per line.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }
}

#[async_trait]
impl Sink for JsonLinesSink {
    #[tracing::instrument(
        skip(self, batch),
        fields(sequence = batch.sequence),
        name = "sink-deliver-jsonl"
    )]
    async fn deliver(&mut self, batch: &Batch) -> Result<(), SinkError> {
        jsonl::write(&mut self.writer, batch)?;
        self.writer.flush()?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        tracing::debug!("Closed {}", self.path.display());
        Ok(())
    }
}
