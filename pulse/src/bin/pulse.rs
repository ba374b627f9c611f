//! Drive a synthetic host pipeline through the aggregator.
//!
//! Producer threads play the part of a busy host, pushing requests,
//! dependency calls and traces through a [`Processor`] into a counting sink.
//! Once per second the main task closes the reporting window and logs the
//! resulting rates. Runs until the configured duration elapses or ctrl-c.

use std::{
    path::PathBuf,
    pin::pin,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::Instant,
};

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use pulse::{
    collector::Collector,
    config::Config,
    processor::Processor,
    sample::Sample,
    telemetry::{
        DependencyTelemetry, Item, Outcome, RequestTelemetry, TelemetryProcessor, TraceTelemetry,
    },
};
use pulse_counter::AccumulatorManager;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use tokio::{
    runtime::Builder,
    signal,
    time::{self, Duration},
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

/// Reporting window length. Fixed; not a user setting.
const HARVEST_PERIOD: Duration = Duration::from_secs(1);

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to load pulse config: {0}")]
    Config(#[from] pulse::config::Error),
    #[error("Failed to start collection: {0}")]
    Collection(#[from] pulse_counter::gate::Error),
    #[error("Failed to install prometheus recorder: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
    #[error("Producer thread panicked")]
    Producer,
}

fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/pulse/pulse.yaml")
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Opts {
    /// path on disk to the configuration file
    #[arg(long, default_value_os_t = default_config_path())]
    config_path: PathBuf,
    /// number of threads pushing telemetry through the pipeline
    #[arg(long, default_value_t = 4)]
    producers: u16,
    /// seconds to run before shutting down, runs until ctrl-c if absent
    #[arg(long)]
    duration_seconds: Option<u64>,
    /// seed for the synthetic load
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn synthetic_item(rng: &mut SmallRng) -> Item {
    let duration = Duration::from_micros(rng.random_range(50..250_000));
    let success = match rng.random_range(0..20_u8) {
        0 => Outcome::Failure,
        1 => Outcome::Unknown,
        _ => Outcome::Success,
    };
    match rng.random_range(0..10_u8) {
        0..=4 => Item::Request(RequestTelemetry {
            name: "GET /orders/{id}".to_string(),
            duration,
            success,
            response_code: Some(
                if success == Outcome::Failure { "500" } else { "200" }.to_string(),
            ),
            instrumentation_key: None,
        }),
        5..=8 => Item::Dependency(DependencyTelemetry {
            name: "SELECT * FROM orders WHERE id = ?".to_string(),
            target: Some("orders-db".to_string()),
            duration,
            success,
            instrumentation_key: None,
        }),
        _ => Item::Trace(TraceTelemetry {
            message: "cache refreshed".to_string(),
            instrumentation_key: None,
        }),
    }
}

fn produce<P>(pipeline: &P, seed: u64, running: &AtomicBool) -> u64
where
    P: TelemetryProcessor<Item>,
{
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut sent = 0;
    while running.load(Ordering::Relaxed) {
        pipeline.process(synthetic_item(&mut rng));
        sent += 1;
        thread::sleep(Duration::from_micros(rng.random_range(10..200)));
    }
    sent
}

fn report(sample: &Sample) {
    info!(
        instrumentation_key = %sample.instrumentation_key,
        window = ?sample.window,
        requests_per_second = sample.requests.per_second,
        request_duration_ms = sample.requests.average_duration_ms,
        requests_failed_per_second = sample.requests.failed_per_second,
        dependency_calls_per_second = sample.dependency_calls.per_second,
        dependency_call_duration_ms = sample.dependency_calls.average_duration_ms,
        dependency_calls_failed_per_second = sample.dependency_calls.failed_per_second,
        "window closed"
    );
}

async fn inner_main(opts: Opts, config: Config) -> Result<(), Error> {
    if let Some(addr) = config.prometheus_addr {
        let mut builder = PrometheusBuilder::new().with_http_listener(addr);
        for (k, v) in &config.global_labels {
            builder = builder.add_global_label(k, v);
        }
        builder.install()?;
        info!(%addr, "prometheus exporter listening");
    }

    let forwarded = Arc::new(AtomicU64::new(0));
    let sink = {
        let forwarded = Arc::clone(&forwarded);
        move |_: Item| {
            forwarded.fetch_add(1, Ordering::Relaxed);
        }
    };
    let processor = Arc::new(Processor::new(sink));

    let manager = Arc::new(AccumulatorManager::new());
    let mut collector = Collector::new(
        Arc::clone(&manager),
        config.instrumentation_key.as_str(),
        &config.global_labels,
        Instant::now(),
    );
    processor.start_collection(manager)?;

    let running = Arc::new(AtomicBool::new(true));
    let producers: Vec<_> = (0..opts.producers.max(1))
        .map(|i| {
            let processor = Arc::clone(&processor);
            let running = Arc::clone(&running);
            let seed = opts.seed.wrapping_add(u64::from(i));
            thread::spawn(move || produce(processor.as_ref(), seed, &running))
        })
        .collect();
    info!(producers = producers.len(), "producers started");

    let deadline = opts.duration_seconds.map(Duration::from_secs);
    let mut shutdown = pin!(async move {
        let elapsed = async {
            match deadline {
                Some(d) => time::sleep(d).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            res = signal::ctrl_c() => {
                if let Err(err) = res {
                    warn!("Unable to listen for ctrl-c: {err}");
                }
                info!("ctrl-c received, shutting down");
            }
            () = elapsed => info!("run duration elapsed, shutting down"),
        }
    });

    let mut interval = time::interval(HARVEST_PERIOD);
    // The first tick completes immediately; skip the empty window.
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => report(&collector.harvest(Instant::now())),
            () = &mut shutdown => break,
        }
    }

    processor.stop_collection();
    running.store(false, Ordering::Relaxed);
    let mut sent = 0;
    for producer in producers {
        sent += producer.join().map_err(|_| Error::Producer)?;
    }
    report(&collector.harvest(Instant::now()));

    info!(
        sent,
        forwarded = forwarded.load(Ordering::Relaxed),
        "pipeline drained"
    );
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting pulse {version} run.");

    let opts = Opts::parse();
    let config = Config::from_path(&opts.config_path)?;

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(opts, config));
    info!("Bye. :)");
    res
}
