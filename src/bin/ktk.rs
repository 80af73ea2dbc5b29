//! ktk - a small command-line tool for AWS Kinesis
//!
//! ```bash
//! # Print every record written to a stream from now on
//! ktk tail events
//!
//! # Publish lines from files (or stdin) one record per line
//! ktk cat events access.log
//!
//! # List the streams in the account
//! ktk list
//! ```
//!
//! Credentials and region come from the usual AWS environment. Set
//! `KTK_VERBOSE=1` (or pass `--verbose`) for debug logging on stderr;
//! `RUST_LOG` overrides both.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use kinesis_toolkit::client::list_streams;
use kinesis_toolkit::producer::error_counts;
use kinesis_toolkit::{
    Consumer, ConsumerConfig, FnProcessor, Message, Producer, ProducerConfig, ProducerError,
    ReaderFailurePolicy, Record,
};

const VERBOSE: &str = "KTK_VERBOSE";

#[derive(Parser)]
#[command(name = "ktk")]
#[command(about = "Kinesis toolkit: tail, publish to and list streams", long_about = None)]
struct Cli {
    /// Debug logging (also enabled by KTK_VERBOSE)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print records from every open shard of a stream, following resharding
    Tail {
        /// Stream name
        stream: String,
    },
    /// Send data to a stream one line at a time
    Cat {
        /// Stream name
        stream: String,
        /// Files to read in order; stdin when none are given
        files: Vec<PathBuf>,
    },
    /// List available streams
    List,
}

/// True when `name` holds a truthy value: 1, t, true, yes, on
fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "t" | "true" | "y" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,kinesis_toolkit={0},ktk={0}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Spread retries of concurrent readers and of parallel `ktk cat` runs
const CLI_JITTER: f64 = 0.2;

async fn wait_for_shutdown() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

async fn run_tail(client: aws_sdk_kinesis::Client, stream: String) -> Result<()> {
    let config = ConsumerConfig {
        stream_name: stream,
        failure_policy: ReaderFailurePolicy::Abort,
        throttle_jitter: CLI_JITTER,
        ..Default::default()
    };

    let processor = FnProcessor(|shard_id: &str, records: &[Record]| {
        let mut out = std::io::stdout().lock();
        for record in records {
            if let Err(e) = out
                .write_all(record.data())
                .and_then(|_| out.write_all(b"\n"))
            {
                warn!(shard_id = %shard_id, error = %e, "Failed to write record");
                return;
            }
        }
        if let Err(e) = out.flush() {
            warn!(shard_id = %shard_id, error = %e, "Failed to flush output");
        }
    });

    let (consumer, _) = Consumer::new(config, processor, client);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        wait_for_shutdown().await;
        info!("Interrupted, stopping");
        let _ = shutdown_tx.send(true);
    });

    consumer.run(shutdown_rx).await.context("ktk tail")?;
    Ok(())
}

/// Fail with a per-error-code count of everything that was not sent
fn report_failure(err: ProducerError) -> anyhow::Error {
    match &err {
        ProducerError::Transport { failures, .. } => {
            let counts = error_counts(failures);
            eprintln!("{} put(s) failed: {:?}", failures.len(), counts);
            anyhow::Error::new(err).context("ktk cat")
        }
        _ => anyhow::Error::new(err).context("ktk cat"),
    }
}

async fn cat_lines<R, C>(reader: R, producer: &mut Producer<C>) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    C: kinesis_toolkit::KinesisClientTrait,
{
    let mut lines = reader.lines();
    let mut count = 0;

    while let Some(line) = lines.next_line().await.context("reading input")? {
        if line.is_empty() {
            continue;
        }
        let message = Message::from_line(&line)?;
        producer.put_message(message).await.map_err(report_failure)?;
        count += 1;
    }
    Ok(count)
}

async fn run_cat(client: aws_sdk_kinesis::Client, stream: String, files: Vec<PathBuf>) -> Result<()> {
    let config = ProducerConfig {
        stream_name: stream,
        retry_jitter: CLI_JITTER,
        ..Default::default()
    };
    let mut producer = Producer::new(config, client)?;

    let mut count = 0;
    if files.is_empty() {
        count += cat_lines(BufReader::new(tokio::io::stdin()), &mut producer).await?;
    } else {
        // Open every file up front so a bad path fails before anything is sent
        let mut readers = Vec::with_capacity(files.len());
        for path in &files {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("ktk cat: opening {}", path.display()))?;
            readers.push(BufReader::new(file));
        }
        for reader in readers {
            count += cat_lines(reader, &mut producer).await?;
        }
    }

    let summary = producer.flush().await.map_err(report_failure)?;
    debug!(lines = count, last_batch = summary.sent, "Finished sending");
    Ok(())
}

async fn run_list(client: aws_sdk_kinesis::Client) -> Result<()> {
    let streams = list_streams(&client).await.context("ktk list")?;
    let mut out = std::io::stdout().lock();
    for stream in streams {
        writeln!(out, "{}", stream)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose || env_flag(VERBOSE));

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let client = aws_sdk_kinesis::Client::new(&aws_config);

    match cli.command {
        Commands::Tail { stream } => run_tail(client, stream).await,
        Commands::Cat { stream, files } => run_cat(client, stream, files).await,
        Commands::List => run_list(client).await,
    }
}
