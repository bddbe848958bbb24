use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use batcher::{
    metrics::Metrics,
    sinks::{memory::MemorySink, sink::Sink},
    Accumulator, AccumulatorConfig, AccumulatorError, Batch, OverflowPolicy, SinkError,
    SubmitError,
};
use tokio::time::{sleep, sleep_until, Instant};

fn every(secs: u64) -> AccumulatorConfig {
    AccumulatorConfig::new(Duration::from_secs(secs))
}

fn at(start: Instant, secs: f64) -> Instant {
    start + Duration::from_secs_f64(secs)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_items_between_ticks_form_one_batch() {
    let sink = MemorySink::new();
    let accumulator = Accumulator::new(every(5), sink.clone()).unwrap();
    let start = Instant::now();

    sleep_until(at(start, 1.0)).await;
    accumulator.submit("a").await.unwrap();
    sleep_until(at(start, 2.0)).await;
    accumulator.submit("b").await.unwrap();

    sleep_until(at(start, 4.5)).await;
    assert!(sink.batches().is_empty());

    sleep_until(at(start, 6.0)).await;
    assert_eq!(sink.items(), vec![strings(&["a", "b"])]);

    // Queue was reset, the next tick has nothing to deliver.
    sleep_until(at(start, 11.0)).await;
    assert_eq!(sink.batches().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_delivery_without_submissions() {
    let sink = MemorySink::new();
    let _accumulator = Accumulator::new(every(5), sink.clone()).unwrap();

    sleep(Duration::from_secs(10)).await;
    sleep(Duration::from_millis(500)).await;

    assert!(sink.batches().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_batches_are_never_merged() {
    let sink = MemorySink::new();
    let accumulator = Accumulator::new(every(5), sink.clone()).unwrap();
    let start = Instant::now();

    sleep_until(at(start, 4.0)).await;
    accumulator.submit("x").await.unwrap();

    sleep_until(at(start, 5.5)).await;
    assert_eq!(sink.items(), vec![strings(&["x"])]);

    sleep_until(at(start, 6.0)).await;
    accumulator.submit("y").await.unwrap();

    sleep_until(at(start, 10.5)).await;
    let batches = sink.batches();
    assert_eq!(sink.items(), vec![strings(&["x"]), strings(&["y"])]);
    assert_eq!(batches[0].sequence, 0);
    assert_eq!(batches[1].sequence, 1);
    assert!(batches[0].flushed_at <= batches[1].flushed_at);
}

#[tokio::test(start_paused = true)]
async fn test_ticks_are_not_reset_by_arrivals() {
    let sink = MemorySink::new();
    let accumulator = Accumulator::new(every(5), sink.clone()).unwrap();
    let start = Instant::now();

    for offset in [1.0, 2.0, 3.0, 4.0, 4.9] {
        sleep_until(at(start, offset)).await;
        accumulator.submit(offset.to_string()).await.unwrap();
    }

    sleep_until(at(start, 5.1)).await;
    assert_eq!(sink.batches().len(), 1);
    assert_eq!(sink.batches()[0].len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_close_flushes_remaining_items() {
    let sink = MemorySink::new();
    let accumulator = Accumulator::new(every(60), sink.clone()).unwrap();
    let submitter = accumulator.submitter();

    submitter.submit("a").await.unwrap();
    submitter.submit("b").await.unwrap();
    accumulator.close().await.unwrap();

    assert_eq!(sink.items(), vec![strings(&["a", "b"])]);
    assert!(sink.is_closed());

    assert!(submitter.is_closed());
    assert_eq!(submitter.submit("c").await, Err(SubmitError::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_close_without_pending_items_delivers_nothing() {
    let sink = MemorySink::new();
    let accumulator = Accumulator::new(every(5), sink.clone()).unwrap();

    accumulator.close().await.unwrap();

    assert!(sink.batches().is_empty());
    assert!(sink.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_drop_drains_in_background() {
    let sink = MemorySink::new();
    let accumulator = Accumulator::new(every(60), sink.clone()).unwrap();
    let submitter = accumulator.submitter();

    submitter.submit("a").await.unwrap();
    drop(accumulator);

    sleep(Duration::from_millis(1)).await;
    assert_eq!(sink.items(), vec![strings(&["a"])]);
    assert!(sink.is_closed());
    assert_eq!(submitter.submit("b").await, Err(SubmitError::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_reject_when_full() {
    let sink = MemorySink::new();
    let config = every(5).with_max_pending(2, OverflowPolicy::Reject);
    let accumulator = Accumulator::new(config, sink.clone()).unwrap();

    accumulator.submit("a").await.unwrap();
    accumulator.submit("b").await.unwrap();
    assert_eq!(
        accumulator.submit("c").await,
        Err(SubmitError::Full { max_pending: 2 })
    );

    // Space frees up after the flush.
    sleep(Duration::from_millis(5500)).await;
    accumulator.submit("d").await.unwrap();
    accumulator.close().await.unwrap();

    assert_eq!(sink.items(), vec![strings(&["a", "b"]), strings(&["d"])]);
}

#[tokio::test(start_paused = true)]
async fn test_drop_oldest_when_full() {
    let sink = MemorySink::new();
    let metrics = Arc::new(Metrics::new().unwrap());
    let config = every(5).with_max_pending(2, OverflowPolicy::DropOldest);
    let accumulator = Accumulator::with_metrics(config, sink.clone(), metrics.clone()).unwrap();

    for item in ["a", "b", "c", "d"] {
        accumulator.submit(item).await.unwrap();
    }
    assert_eq!(metrics.pending_items.get(), 2);
    accumulator.close().await.unwrap();

    assert_eq!(sink.items(), vec![strings(&["c", "d"])]);
    assert_eq!(metrics.items_dropped.get(), 2);
    assert_eq!(metrics.items_submitted.get(), 4);
    assert_eq!(metrics.pending_items.get(), 0);
}

#[tokio::test]
async fn test_invalid_config() {
    let result = Accumulator::new(AccumulatorConfig::new(Duration::ZERO), MemorySink::new());
    assert!(matches!(result, Err(AccumulatorError::InvalidConfig(_))));

    let result = Accumulator::new(
        every(1).with_max_pending(0, OverflowPolicy::DropOldest),
        MemorySink::new(),
    );
    assert!(matches!(result, Err(AccumulatorError::InvalidConfig(_))));
}

/// Fails the first `failures` deliveries, then records like a [`MemorySink`].
struct FlakySink {
    failures: usize,
    inner: MemorySink,
}

#[async_trait]
impl Sink for FlakySink {
    async fn deliver(&mut self, batch: &Batch) -> Result<(), SinkError> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err("sink unavailable".into());
        }
        self.inner.deliver(batch).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_sink_failure_does_not_stop_the_loop() {
    let recorded = MemorySink::new();
    let sink = FlakySink {
        failures: 1,
        inner: recorded.clone(),
    };
    let metrics = Arc::new(Metrics::new().unwrap());
    let accumulator = Accumulator::with_metrics(every(5), sink, metrics.clone()).unwrap();
    let start = Instant::now();

    accumulator.submit("lost").await.unwrap();
    sleep_until(at(start, 6.0)).await;
    accumulator.submit("kept").await.unwrap();
    sleep_until(at(start, 11.0)).await;

    assert_eq!(recorded.items(), vec![strings(&["kept"])]);
    assert_eq!(metrics.sink_failures.get(), 1);
    assert_eq!(metrics.batches_flushed.get(), 2);
    assert_eq!(metrics.items_flushed.get(), 2);

    let batches = recorded.batches();
    assert_eq!(batches[0].sequence, 1);
}

/// Sleeps before every delivery so the loop stays busy inside the sink.
struct SlowSink {
    delay: Duration,
    inner: MemorySink,
}

#[async_trait]
impl Sink for SlowSink {
    async fn deliver(&mut self, batch: &Batch) -> Result<(), SinkError> {
        sleep(self.delay).await;
        self.inner.deliver(batch).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_close_with_waiting_producers() {
    let recorded = MemorySink::new();
    let sink = SlowSink {
        delay: Duration::from_secs(3),
        inner: recorded.clone(),
    };
    let accumulator = Accumulator::new(every(1), sink).unwrap();
    let start = Instant::now();

    accumulator.submit("first").await.unwrap();
    // The tick at t=1 is now stuck in the sink until t=4.
    sleep_until(at(start, 1.5)).await;

    let handles = (0..5)
        .map(|n| {
            let submitter = accumulator.submitter();
            let item = format!("waiting-{n}");
            tokio::spawn(async move {
                let result = submitter.submit(item.clone()).await;
                (item, result)
            })
        })
        .collect::<Vec<_>>();
    sleep(Duration::from_millis(10)).await;

    accumulator.close().await.unwrap();
    assert!(recorded.is_closed());

    let delivered = recorded.items().concat();
    assert_eq!(delivered[0], "first");

    let mut accepted = 0;
    for handle in handles {
        let (item, result) = handle.await.unwrap();
        match result {
            Ok(()) => {
                accepted += 1;
                assert_eq!(delivered.iter().filter(|d| **d == item).count(), 1);
            }
            Err(e) => {
                assert_eq!(e, SubmitError::Closed);
                assert!(!delivered.contains(&item));
            }
        }
    }
    assert_eq!(delivered.len(), accepted + 1);
}

fn assert_partition(batches: &[Batch], producers: usize, per_producer: usize) {
    let mut seen: HashMap<usize, Vec<usize>> = HashMap::new();
    for batch in batches {
        assert!(!batch.is_empty());
        for item in batch.items() {
            let (producer, n) = item.split_once('-').unwrap();
            seen.entry(producer.parse().unwrap())
                .or_default()
                .push(n.parse().unwrap());
        }
    }

    assert_eq!(seen.len(), producers);
    for sequence in seen.values() {
        assert_eq!(*sequence, (0..per_producer).collect::<Vec<_>>());
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_producers_interleaved() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 100;

    let sink = MemorySink::new();
    let accumulator =
        Accumulator::new(AccumulatorConfig::new(Duration::from_millis(10)), sink.clone()).unwrap();

    let handles = (0..PRODUCERS)
        .map(|producer| {
            let submitter = accumulator.submitter();
            tokio::spawn(async move {
                for n in 0..PER_PRODUCER {
                    submitter.submit(format!("{producer}-{n}")).await.unwrap();
                    if n % 7 == producer {
                        sleep(Duration::from_millis(3)).await;
                    }
                }
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        handle.await.unwrap();
    }
    accumulator.close().await.unwrap();

    let batches = sink.batches();
    assert!(batches.len() > 1);
    assert_partition(&batches, PRODUCERS, PER_PRODUCER);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_multi_thread() {
    const PRODUCERS: usize = 8;
    const PER_PRODUCER: usize = 250;

    let sink = MemorySink::new();
    let accumulator =
        Accumulator::new(AccumulatorConfig::new(Duration::from_millis(2)), sink.clone()).unwrap();

    let handles = (0..PRODUCERS)
        .map(|producer| {
            let submitter = accumulator.submitter();
            tokio::spawn(async move {
                for n in 0..PER_PRODUCER {
                    submitter.submit(format!("{producer}-{n}")).await.unwrap();
                }
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        handle.await.unwrap();
    }
    accumulator.close().await.unwrap();

    let batches = sink.batches();
    let sequences = batches.iter().map(|b| b.sequence).collect::<Vec<_>>();
    assert_eq!(sequences, (0..batches.len() as u64).collect::<Vec<_>>());
    assert_partition(&batches, PRODUCERS, PER_PRODUCER);
}
