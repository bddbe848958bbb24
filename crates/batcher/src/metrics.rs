use prometheus_exporter::prometheus::{IntCounter, IntGauge, Registry};

pub struct Metrics {
    pub items_submitted: IntCounter,
    pub items_rejected: IntCounter,
    pub items_dropped: IntCounter,
    pub batches_flushed: IntCounter,
    pub items_flushed: IntCounter,
    pub sink_failures: IntCounter,
    pub pending_items: IntGauge,
}

impl Metrics {
    /// Creates unregistered collectors, see [`Metrics::register`].
    pub fn new() -> prometheus_exporter::prometheus::Result<Self> {
        Ok(Self {
            items_submitted: IntCounter::new(
                "batcher_items_submitted",
                "Items accepted into the pending queue",
            )?,
            items_rejected: IntCounter::new(
                "batcher_items_rejected",
                "Items rejected because the pending queue was full",
            )?,
            items_dropped: IntCounter::new(
                "batcher_items_dropped",
                "Pending items evicted to make room for newer ones",
            )?,
            batches_flushed: IntCounter::new(
                "batcher_batches_flushed",
                "Batches handed to the sink",
            )?,
            items_flushed: IntCounter::new("batcher_items_flushed", "Items handed to the sink")?,
            sink_failures: IntCounter::new("batcher_sink_failures", "Failed sink deliveries")?,
            pending_items: IntGauge::new(
                "batcher_pending_items",
                "Items waiting for the next flush",
            )?,
        })
    }

    pub fn register(&self, registry: &Registry) -> prometheus_exporter::prometheus::Result<()> {
        registry.register(Box::new(self.items_submitted.clone()))?;
        registry.register(Box::new(self.items_rejected.clone()))?;
        registry.register(Box::new(self.items_dropped.clone()))?;
        registry.register(Box::new(self.batches_flushed.clone()))?;
        registry.register(Box::new(self.items_flushed.clone()))?;
        registry.register(Box::new(self.sink_failures.clone()))?;
        registry.register(Box::new(self.pending_items.clone()))?;
        Ok(())
    }
}

/// Registers fresh collectors with the default registry and, if a port is given,
/// starts serving them on `0.0.0.0:<port>/metrics`.
pub fn setup_metrics(port: Option<u16>) -> Result<Metrics, Box<dyn std::error::Error>> {
    let metrics = Metrics::new()?;
    metrics.register(prometheus_exporter::prometheus::default_registry())?;

    if let Some(port) = port {
        let binding = format!("0.0.0.0:{port}").parse()?;
        prometheus_exporter::start(binding)?;
        tracing::info!("Serving metrics on {}", binding);
    }

    Ok(metrics)
}
