extern crate dotenv;

use std::{
    io::BufRead,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use batch_common::telemetry::{setup_telemetry, teardown_telemetry};
use batcher::{
    config::Configuration,
    metrics::setup_metrics,
    sinks::{console::ConsoleSink, fanout::FanoutSink, jsonl::JsonLinesSink},
    Accumulator, SubmitError, Submitter,
};
use tokio::{runtime::Handle, sync::oneshot};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    setup_telemetry("batcher")?;

    let config = Configuration::from_env()?;
    tracing::info!("Chosen configuration: {:#?}", config);

    let signal_flag = setup_signal_handlers()?;
    let metrics = Arc::new(setup_metrics(config.metrics_port)?);
    let sink = setup_sinks(&config)?;

    let accumulator = Accumulator::with_metrics(config.accumulator.clone(), sink, metrics)?;

    let (input_done_tx, input_done_rx) = oneshot::channel();
    spawn_console_producer(accumulator.submitter(), Handle::current(), input_done_tx);

    tokio::select! {
        _ = input_done_rx => info!("Input closed"),
        _ = wait_for_signal(&signal_flag) => {
            info!("Shutdown signal detected. Shutting down gracefully.")
        }
    }

    info!("Flushing pending items");
    accumulator.close().await?;

    teardown_telemetry();
    Ok(())
}

/// Reads stdin line by line on a dedicated thread, blocking on every hand-off.
/// The thread is not joined, a pending read must not hold up shutdown.
fn spawn_console_producer(submitter: Submitter, runtime: Handle, done: oneshot::Sender<()>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!("Reading input failed: {}", e);
                    break;
                }
            };

            match runtime.block_on(submitter.submit(line)) {
                Ok(()) => {}
                Err(e @ SubmitError::Full { .. }) => tracing::warn!("Dropping input: {}", e),
                Err(SubmitError::Closed) => break,
            }
        }

        let _ = done.send(());
    });
}

fn setup_signal_handlers() -> Result<Arc<AtomicBool>, Box<dyn std::error::Error>> {
    let signal_flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, signal_flag.clone())?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, signal_flag.clone())?;
    Ok(signal_flag)
}

async fn wait_for_signal(signal_flag: &AtomicBool) {
    while !signal_flag.load(Ordering::Relaxed) {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}

fn setup_sinks(config: &Configuration) -> Result<FanoutSink, Box<dyn std::error::Error>> {
    let mut sinks = FanoutSink::default();

    sinks.push(Box::new(ConsoleSink::stdout(config.label.clone())));
    tracing::info!("Configured console sink");

    if let Some(path) = &config.jsonl_sink_path {
        sinks.push(Box::new(JsonLinesSink::open(path)?));
        tracing::info!("Configured JSON lines sink at {}", path.display());
    }

    Ok(sinks)
}
