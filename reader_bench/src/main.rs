use std::error::Error;
use std::thread;
use std::time::Instant;

use clap::Parser;
use serde_derive::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

use market_queue::{MarketData, MarketQueue, QueueConfig, QueueEngine, QueueError};

const END_MARKER: &str = "EOF";

#[derive(clap::Parser)]
#[clap()]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "market-reader.toml")]
    config: String,
    /// Poll the latest record instead of following every index.
    #[clap(long)]
    latest: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct ReaderBenchConfig {
    queue: QueueConfig,
    key: u32,
}

impl Default for ReaderBenchConfig {
    fn default() -> Self {
        ReaderBenchConfig {
            queue: QueueConfig::default(),
            key: 0xFF00_0003,
        }
    }
}

#[derive(Default)]
struct ReaderContext {
    called: u64,
    delivered: u64,
    evicted: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts: Opts = Opts::parse();
    let cfg: ReaderBenchConfig = confy::load_path(&opts.config)?;
    let engine = QueueEngine::new(cfg.queue)?;
    let queue = engine.attach::<MarketData>(cfg.key)?;
    info!("reading from {:?}", queue);

    let start = Instant::now();
    let ctx = if opts.latest {
        run_latest(&queue)?
    } else {
        run_tail(&queue)?
    };
    let duration = start.elapsed();
    let iops = (ctx.delivered as f64) / duration.as_secs_f64().max(f64::EPSILON);
    println!(
        "\n{:#?}K messages read/s ({} calls, {} evicted). Total time: {:#?}",
        (iops / 1000f64) as u64,
        ctx.called,
        ctx.evicted,
        duration
    );
    Ok(())
}

/// First index a tailing reader waits for. Whatever is already in the queue,
/// including a previous run's end marker, belongs to an earlier writer.
fn tail_start(last_index: Option<u64>) -> u64 {
    last_index.map_or(0, |i| i + 1)
}

/// Whether `record` at `index` ends this run. `stale` is the latest index
/// seen at startup; an end marker there is left over from the previous run.
fn is_end(index: u64, record: &MarketData, stale: Option<u64>) -> bool {
    record.colo_str() == END_MARKER && stale != Some(index)
}

/// Follows every index after the current cursor, skipping what the writer
/// evicts before we get to it.
fn run_tail(queue: &MarketQueue<MarketData>) -> Result<ReaderContext, Box<dyn Error>> {
    let mut ctx = ReaderContext::default();
    let mut out = MarketData::default();
    let mut index = tail_start(queue.last_index());
    loop {
        ctx.called += 1;
        match queue.read(index, &mut out) {
            Ok(()) => {
                ctx.delivered += 1;
                if ctx.delivered % 100_000 == 0 {
                    eprint!("\rTotal {} ops (current tick: {})", ctx.delivered, out.tick);
                }
                if is_end(index, &out, None) {
                    println!("\nFinished at index {}", index);
                    return Ok(ctx);
                }
                index += 1;
            }
            Err(QueueError::NotYetWritten { .. }) | Err(QueueError::TornRead { .. }) => thread::yield_now(),
            Err(QueueError::Evicted { cursor, .. }) => {
                let oldest = (cursor as u64 + 1).saturating_sub(queue.capacity()).max(index + 1);
                ctx.evicted += oldest - index;
                index = oldest;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn run_latest(queue: &MarketQueue<MarketData>) -> Result<ReaderContext, Box<dyn Error>> {
    let mut ctx = ReaderContext::default();
    let mut out = MarketData::default();
    let mut previous = None;
    let stale = queue.last_index();
    loop {
        ctx.called += 1;
        match queue.read_last(&mut out) {
            Ok(index) => {
                if previous != Some(index) {
                    ctx.delivered += 1;
                    previous = Some(index);
                }
                if is_end(index, &out, stale) {
                    println!("\nFinished at index {}", index);
                    return Ok(ctx);
                }
            }
            Err(e) if e.is_retryable() || matches!(e, QueueError::Empty) => thread::yield_now(),
            Err(e) => return Err(e.into()),
        }
    }
}
