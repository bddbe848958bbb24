use std::{collections::VecDeque, sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    batch::Batch,
    error::{AccumulatorError, SubmitError},
    metrics::Metrics,
    sinks::sink::Sink,
};

/// What to do with a submission when the pending queue already holds `max_pending` items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Refuse the new item with [`SubmitError::Full`].
    #[default]
    Reject,
    /// Evict the oldest pending item and enqueue the new one.
    DropOldest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccumulatorConfig {
    pub flush_interval: Duration,
    /// `None` means the pending queue grows without bound.
    pub max_pending: Option<usize>,
    pub overflow: OverflowPolicy,
}

impl AccumulatorConfig {
    pub fn new(flush_interval: Duration) -> Self {
        Self {
            flush_interval,
            max_pending: None,
            overflow: OverflowPolicy::default(),
        }
    }

    pub fn with_max_pending(mut self, max_pending: usize, overflow: OverflowPolicy) -> Self {
        self.max_pending = Some(max_pending);
        self.overflow = overflow;
        self
    }

    fn validate(&self) -> Result<(), AccumulatorError> {
        if self.flush_interval.is_zero() {
            return Err(AccumulatorError::InvalidConfig(
                "flush interval must be greater than zero".into(),
            ));
        }
        if self.max_pending == Some(0) {
            return Err(AccumulatorError::InvalidConfig(
                "max pending must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

struct Submission {
    item: String,
    ack: oneshot::Sender<Result<(), SubmitError>>,
}

/// Producer side of an [`Accumulator`]. Cheap to clone, one per producer task.
#[derive(Clone)]
pub struct Submitter {
    tx: mpsc::Sender<Submission>,
}

impl Submitter {
    /// Hands `item` to the accumulator loop and waits until the loop has accepted it.
    pub async fn submit(&self, item: impl Into<String>) -> Result<(), SubmitError> {
        let (ack, accepted) = oneshot::channel();
        self.tx
            .send(Submission {
                item: item.into(),
                ack,
            })
            .await
            .map_err(|_| SubmitError::Closed)?;

        accepted.await.map_err(|_| SubmitError::Closed)?
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Collects submitted items and delivers them to a [`Sink`] as one [`Batch`]
/// every `flush_interval`.
///
/// All queue mutation happens on a single background task, producers only talk to
/// it through [`Submitter::submit`]. Dropping the accumulator stops the loop the same
/// way [`Accumulator::close`] does, without waiting for it.
pub struct Accumulator {
    submitter: Submitter,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Accumulator {
    /// Spawns the accumulator loop on the current Tokio runtime.
    pub fn new<S>(config: AccumulatorConfig, sink: S) -> Result<Self, AccumulatorError>
    where
        S: Sink + 'static,
    {
        Self::spawn(config, sink, None)
    }

    pub fn with_metrics<S>(
        config: AccumulatorConfig,
        sink: S,
        metrics: Arc<Metrics>,
    ) -> Result<Self, AccumulatorError>
    where
        S: Sink + 'static,
    {
        Self::spawn(config, sink, Some(metrics))
    }

    fn spawn<S>(
        config: AccumulatorConfig,
        sink: S,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<Self, AccumulatorError>
    where
        S: Sink + 'static,
    {
        config.validate()?;

        let (tx, rx) = mpsc::channel(1);
        let (shutdown, shutdown_rx) = oneshot::channel();
        let first_tick = Instant::now() + config.flush_interval;

        let worker = Worker {
            pending: PendingQueue::new(config.max_pending, config.overflow),
            config,
            sink,
            metrics,
            next_sequence: 0,
        };
        let handle = tokio::spawn(worker.run(rx, shutdown_rx, first_tick));

        Ok(Self {
            submitter: Submitter { tx },
            shutdown,
            handle,
        })
    }

    pub fn submitter(&self) -> Submitter {
        self.submitter.clone()
    }

    pub async fn submit(&self, item: impl Into<String>) -> Result<(), SubmitError> {
        self.submitter.submit(item).await
    }

    /// Stops accepting items, flushes whatever is still pending and waits for the
    /// loop to finish. Subsequent submissions fail with [`SubmitError::Closed`].
    pub async fn close(self) -> Result<(), AccumulatorError> {
        let Accumulator {
            submitter,
            shutdown,
            handle,
        } = self;

        // Err means the loop is already gone, the join below reports why.
        let _ = shutdown.send(());
        drop(submitter);

        handle.await?;
        Ok(())
    }
}

struct Worker<S> {
    config: AccumulatorConfig,
    pending: PendingQueue,
    sink: S,
    metrics: Option<Arc<Metrics>>,
    next_sequence: u64,
}

impl<S: Sink> Worker<S> {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<Submission>,
        mut shutdown: oneshot::Receiver<()>,
        first_tick: Instant,
    ) {
        let mut ticker = interval_at(first_tick, self.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Accumulator started, flushing every {:?}",
            self.config.flush_interval
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, draining accumulator");
                    break;
                }
                _ = ticker.tick() => self.flush().await,
                submission = rx.recv() => match submission {
                    Some(submission) => self.accept(submission),
                    None => break,
                },
            }
        }

        // Hand-offs that were already queued on the channel still count as submitted.
        rx.close();
        while let Ok(submission) = rx.try_recv() {
            self.accept(submission);
        }
        self.flush().await;

        if let Err(e) = self.sink.close().await {
            error!("Closing sink failed: {}", e);
        }

        info!("Accumulator stopped after {} batches", self.next_sequence);
    }

    fn accept(&mut self, submission: Submission) {
        let Submission { item, ack } = submission;
        let result = match self.pending.push(item) {
            Ok(evicted) => {
                if let Some(evicted) = evicted {
                    warn!(
                        "Pending queue full, dropped oldest item ({} bytes)",
                        evicted.len()
                    );
                    self.with_metrics(|m| m.items_dropped.inc());
                }
                self.with_metrics(|m| m.items_submitted.inc());
                Ok(())
            }
            Err(e) => {
                debug!("Rejected submission: {}", e);
                self.with_metrics(|m| m.items_rejected.inc());
                Err(e)
            }
        };
        self.update_pending_gauge();

        // The producer may have stopped waiting, the item is queued regardless.
        let _ = ack.send(result);
    }

    async fn flush(&mut self) {
        let Some(items) = self.pending.take() else {
            return;
        };
        self.update_pending_gauge();

        let batch = Batch::new(self.next_sequence, items);
        self.next_sequence += 1;

        debug!("Flushing batch {} ({} items)", batch.sequence, batch.len());
        self.with_metrics(|m| {
            m.batches_flushed.inc();
            m.items_flushed.inc_by(batch.len() as u64);
        });

        if let Err(e) = self.sink.deliver(&batch).await {
            error!(
                "Delivering batch {} failed, discarding {} items: {}",
                batch.sequence,
                batch.len(),
                e
            );
            self.with_metrics(|m| m.sink_failures.inc());
        }
    }

    fn update_pending_gauge(&self) {
        let pending = self.pending.len() as i64;
        self.with_metrics(|m| m.pending_items.set(pending));
    }

    fn with_metrics(&self, f: impl FnOnce(&Metrics)) {
        if let Some(metrics) = &self.metrics {
            f(metrics);
        }
    }
}

/// Items waiting for the next flush, oldest first.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    items: VecDeque<String>,
    max_pending: Option<usize>,
    overflow: OverflowPolicy,
}

impl PendingQueue {
    pub(crate) fn new(max_pending: Option<usize>, overflow: OverflowPolicy) -> Self {
        Self {
            items: VecDeque::new(),
            max_pending,
            overflow,
        }
    }

    /// Appends `item`, returning the evicted item if the queue was full under
    /// [`OverflowPolicy::DropOldest`].
    pub(crate) fn push(&mut self, item: String) -> Result<Option<String>, SubmitError> {
        let mut evicted = None;
        if let Some(max_pending) = self.max_pending {
            if self.items.len() >= max_pending {
                match self.overflow {
                    OverflowPolicy::Reject => return Err(SubmitError::Full { max_pending }),
                    OverflowPolicy::DropOldest => evicted = self.items.pop_front(),
                }
            }
        }

        self.items.push_back(item);
        Ok(evicted)
    }

    /// Takes every pending item, leaving the queue empty. `None` if nothing is pending.
    pub(crate) fn take(&mut self) -> Option<Vec<String>> {
        if self.items.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.items).into())
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}
