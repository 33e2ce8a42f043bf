use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use persistence::{StoreConfig, TickStore};
use recorder::{Recorder, RecorderConfig, StreamSubscriber};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tickstore")]
#[command(about = "Record, inspect and compact partitioned tick storage")]
struct Args {
    /// Storage root directory
    #[arg(long, global = true, env = "TICKSTORE_ROOT", default_value = "./ticks")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a tick stream and record it
    Record {
        /// Publisher address (host:port)
        #[arg(long, env = "TICKSTORE_CONNECT")]
        connect: String,

        #[arg(long, env = "TICKSTORE_QUEUE_CAPACITY", default_value_t = 1000)]
        queue_capacity: usize,

        #[arg(long, env = "TICKSTORE_FLUSH_MS", default_value_t = 1000)]
        flush_ms: u64,

        #[arg(long, env = "TICKSTORE_BACKOFF_SECS", default_value_t = 10)]
        backoff_secs: u64,
    },

    /// List stored dates
    Dates,

    /// Merge per-second files into per-minute files
    Compact {
        /// Only this date (YYYY-MM-DD); all dates when omitted
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Count the records stored for a date
    Count {
        #[arg(long)]
        date: NaiveDate,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let store = Arc::new(
        TickStore::open(StoreConfig::new(&args.root))
            .with_context(|| format!("Failed to open store at {}", args.root.display()))?,
    );

    match args.command {
        Command::Record {
            connect,
            queue_capacity,
            flush_ms,
            backoff_secs,
        } => {
            let config = RecorderConfig {
                queue_capacity,
                flush_interval: Duration::from_millis(flush_ms),
                reconnect_backoff: Duration::from_secs(backoff_secs),
                ..RecorderConfig::default()
            };
            record(store, &connect, config).await?;
        }
        Command::Dates => {
            for date in store.dates()? {
                println!("{date}");
            }
        }
        Command::Compact { date } => {
            let report = match date {
                Some(date) => store.compact_date(date)?,
                None => store.compact_all()?,
            };
            println!(
                "groups={} merged={} removed={} written={} records={}",
                report.groups_scanned,
                report.groups_merged,
                report.files_removed,
                report.files_written,
                report.records_merged
            );
            for partial in &report.partial {
                warn!(%partial, files = ?partial.failed, "Originals kept");
            }
        }
        Command::Count { date } => {
            let stats = store.playback_date(date, |_| {})?;
            println!("{}", stats.records);
            if stats.files_skipped > 0 {
                warn!(skipped = stats.files_skipped, "Some files could not be read");
            }
        }
    }

    Ok(())
}

async fn record(store: Arc<TickStore>, addr: &str, config: RecorderConfig) -> Result<()> {
    let subscriber = Arc::new(
        StreamSubscriber::connect(addr)
            .await
            .with_context(|| format!("Failed to connect to {addr}"))?,
    );
    let recorder = Recorder::new(store, Arc::clone(&subscriber), config);
    let mut running = tokio::spawn(recorder.run());

    info!(addr, "Recording; Ctrl-C to stop");
    tokio::select! {
        finished = &mut running => {
            let stats = finished?;
            info!(?stats, "Recorder finished");
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
        }
    }

    // Ending the subscription makes the recorder flush and return.
    subscriber.shutdown().await;
    let stats = running.await?;
    info!(
        written = stats.records_written,
        dropped = stats.records_dropped,
        "Recorder stopped"
    );
    Ok(())
}
