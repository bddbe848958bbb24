use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};

use async_trait::async_trait;

use crate::{batch::Batch, error::SinkError};

use super::sink::Sink;

/// Keeps delivered batches in memory. Clones share the same storage, so a clone
/// can be handed to the accumulator while the original is inspected.
#[derive(Clone, Default)]
pub struct MemorySink {
    batches: Arc<Mutex<Vec<Batch>>>,
    closed: Arc<AtomicBool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Batch> {
        lock(&self.batches).clone()
    }

    /// Delivered items, one `Vec` per batch.
    pub fn items(&self) -> Vec<Vec<String>> {
        lock(&self.batches)
            .iter()
            .map(|batch| batch.items().to_vec())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// Batches are only ever appended, so a poisoned lock still holds consistent data.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Sink for MemorySink {
    async fn deliver(&mut self, batch: &Batch) -> Result<(), SinkError> {
        lock(&self.batches).push(batch.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
