use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use clap::Parser;
use serde_derive::{Deserialize, Serialize};
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::info;
use tracing_subscriber::EnvFilter;

use market_queue::record::PAYLOAD_LEN;
use market_queue::{MarketData, MarketQueue, QueueConfig, QueueEngine, QueueError};

/// Colo tag of the record that tells readers the run is over.
const END_MARKER: &str = "EOF";

#[derive(clap::Parser)]
#[clap()]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "market-writer.toml")]
    config: String,
    #[clap(short = 'n', long = "count", default_value_t = 1_000_000)]
    count: u64,
    /// Pause between writes, in microseconds.
    #[clap(long = "interval-us", default_value_t = 0)]
    interval_us: u64,
    #[clap(long)]
    read_after_write: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct WriterBenchConfig {
    queue: QueueConfig,
    capacity: u64,
    key: u32,
}

impl Default for WriterBenchConfig {
    fn default() -> Self {
        WriterBenchConfig {
            queue: QueueConfig::default(),
            capacity: 28_801,
            key: 0xFF00_0003,
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts: Opts = Opts::parse();
    let cfg: WriterBenchConfig = confy::load_path(&opts.config)?;
    let engine = QueueEngine::new(cfg.queue)?;
    let queue = engine.open::<MarketData>(cfg.capacity, cfg.key)?;
    info!("writing to {:?}", queue);

    let stop = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&stop))?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&stop))?;

    let written = run(&queue, &opts, &stop)?;
    if opts.read_after_write {
        verify(&queue, written)?;
    }
    // Leaves the segment in place for readers.
    queue.detach();
    Ok(())
}

fn now_text() -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    format!("{}.{:06}", now.as_secs(), now.subsec_micros())
}

fn bench_record(index: u64) -> MarketData {
    MarketData::new("BENCH", index as i32, &now_text(), &[(index % 251) as u8; PAYLOAD_LEN])
}

fn run(queue: &MarketQueue<MarketData>, opts: &Opts, stop: &AtomicBool) -> Result<u64, Box<dyn Error>> {
    let start_index = queue.last_index().map_or(0, |i| i + 1);
    let start = Instant::now();
    let mut called = 0u64;
    while called < opts.count && !stop.load(Ordering::Relaxed) {
        let index = start_index + called;
        queue.write(index, &bench_record(index))?;
        if called % 100_000 == 0 {
            eprint!("\rTotal {} ops (index: {})", called, index);
        }
        called += 1;
        if opts.interval_us > 0 {
            thread::sleep(Duration::from_micros(opts.interval_us));
        }
    }
    let end_index = start_index + called;
    queue.write(end_index, &MarketData::new(END_MARKER, end_index as i32, &now_text(), &[]))?;

    let duration = start.elapsed();
    let iops = (called as f64) / duration.as_secs_f64().max(f64::EPSILON);
    println!(
        "\n{:#?}K messages write/s. Total time: {:#?}",
        (iops / 1000f64) as u64,
        duration
    );
    if stop.load(Ordering::Relaxed) {
        println!("Stopped by signal after {} messages", called);
    }
    Ok(called + 1)
}

fn verify(queue: &MarketQueue<MarketData>, written: u64) -> Result<(), Box<dyn Error>> {
    let last = match queue.last_index() {
        Some(v) => v,
        None => return Err("nothing was written".into()),
    };
    let first = last + 1 - written.min(queue.capacity());
    let mut out = MarketData::default();
    let mut mismatches = 0u64;
    for index in first..=last {
        queue.read(index, &mut out)?;
        if out.tick != index as i32 {
            eprintln!("[Read Phase] MISMATCH at {}: tick {}", index, out.tick);
            mismatches += 1;
        }
    }
    if first > 0 {
        match queue.read(first - 1, &mut out) {
            Err(QueueError::Evicted { .. }) => {}
            other => {
                eprintln!("[Read Phase] index {} should be evicted, got {:?}", first - 1, other.err());
                mismatches += 1;
            }
        }
    }
    if mismatches > 0 {
        return Err(format!("{} records failed verification", mismatches).into());
    }
    println!("[Read Phase] Verified indices {}..={}", first, last);
    Ok(())
}
