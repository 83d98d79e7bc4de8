// Simulated service instrumented with pullmetrics, scraped on an interval

use anyhow::Result;
use clap::Parser;
use log::{error, info};
use pullmetrics::config::{ConfigSource, load_settings};
use pullmetrics::prelude::*;
use pullmetrics::util::logging;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::time::{Duration, interval};

/// Command line arguments for the scrape example
#[derive(Parser, Debug)]
#[command(name = "scrape", about = "Pull-based metrics scrape example")]
struct Args {
    /// Optional TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds between scrapes
    #[arg(short, long, default_value = "5")]
    interval: u64,

    /// Number of scrapes before exiting
    #[arg(short = 'n', long, default_value = "3")]
    scrapes: u32,

    /// Number of simulated request handlers
    #[arg(short, long, default_value = "4")]
    workers: usize,

    /// Export everything as deltas instead of cumulative totals
    #[arg(long)]
    delta: bool,
}

async fn handle_requests(
    requests: Counter<i64>,
    latency: ValueRecorder<f64>,
    in_flight: UpDownCounter<i64>,
    worker: usize,
) {
    let worker_label = KeyValue::i64("worker", worker as i64);
    loop {
        let code = if rand::random_range(0..10) == 0 { "500" } else { "200" };
        let labels = [KeyValue::string("code", code), worker_label.clone()];

        in_flight.add(1, &[worker_label.clone()]);
        let millis = rand::random_range(1..250);
        tokio::time::sleep(Duration::from_millis(millis)).await;
        in_flight.add(-1, &[worker_label.clone()]);

        requests.add(1, &labels);
        latency.record(millis as f64, &[KeyValue::string("code", code)]);
    }
}

fn scrape(controller: &PullController, selector: ExportKindSelector) -> pullmetrics::error::Result<()> {
    controller.collect(&Context::with_timeout(std::time::Duration::from_secs(1)))?;
    controller.for_each(&selector, |record| {
        println!("{}", record.to_json());
        Ok(())
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut sources = vec![ConfigSource::Defaults];
    if let Some(path) = &args.config {
        sources.push(ConfigSource::File(path.to_string_lossy().to_string()));
    }
    sources.push(ConfigSource::Environment("PULLMETRICS".to_string()));
    let settings = load_settings(sources)?;

    logging::init(&settings.log_level);
    info!("Starting scrape example with {} workers", args.workers);

    let controller = Arc::new(PullController::new(settings.controller_config()?));
    let meter = controller.meter_with_library(Library::new("scrape-demo").with_version(pullmetrics::VERSION));

    let requests = meter
        .counter::<i64>("http.requests")
        .with_description("Handled requests")
        .build()?;
    let latency = meter
        .value_recorder::<f64>("http.latency")
        .with_unit("ms")
        .build()?;
    let in_flight = meter.up_down_counter::<i64>("http.in_flight").build()?;

    let heap = Arc::new(AtomicI64::new(64 * 1024 * 1024));
    let observed = Arc::clone(&heap);
    meter
        .value_observer::<i64, _>("process.heap_bytes", move |result| {
            let grown = observed.fetch_add(rand::random_range(0..4096), Ordering::Relaxed);
            result.observe(grown, &[]);
            Ok(())
        })
        .with_unit("By")
        .build()?;

    for worker in 0..args.workers {
        tokio::spawn(handle_requests(
            requests.clone(),
            latency.clone(),
            in_flight.clone(),
            worker,
        ));
    }

    let selector = if args.delta {
        ExportKindSelector::Delta
    } else {
        ExportKindSelector::Cumulative
    };

    let mut ticker = interval(Duration::from_secs(args.interval));
    ticker.tick().await;
    for n in 1..=args.scrapes {
        ticker.tick().await;
        info!("Scrape {} of {}", n, args.scrapes);
        let scraper = Arc::clone(&controller);
        match tokio::task::spawn_blocking(move || scrape(&scraper, selector)).await? {
            Ok(()) => {}
            Err(e) => error!("Scrape failed: {}", e),
        }
    }

    Ok(())
}
