//! Workload generator for the batching reactor and the read pipeline.
//!
//! Runs against the in-memory session: concurrent clients submit writes whose
//! routing keys map to random replicas, then a paged read is pushed through
//! the pipeline. A JSON summary of the batch distribution and the client
//! metrics is written at the end.

use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use holo_access::memory::MemorySession;
use holo_access::metrics::Telemetry;
use holo_access::pipeline::ResultSequence;
use holo_access::{
    BatchKind, Client, ClientConfig, ClientMetricsSnapshot, Destination, Row, Statement,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

const KEYSPACE: &str = "workload";
const READ_QUERY: &str = "SELECT bucket, seq FROM workload.events";

/// CLI entry point wrapper.
#[derive(Parser, Debug)]
#[command(name = "holo-access-workload")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

/// Top-level CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    Run(RunArgs),
}

/// CLI options for running the workload.
#[derive(Parser, Debug, Clone)]
struct RunArgs {
    /// Number of destinations in the simulated topology.
    #[arg(long, default_value_t = 3)]
    destinations: usize,

    /// Total number of write statements.
    #[arg(long, default_value_t = 10_000)]
    statements: usize,

    /// Number of concurrent writers.
    #[arg(long, default_value_t = 8)]
    clients: usize,

    /// Distinct routing keys; each gets a random primary replica.
    #[arg(long, default_value_t = 64)]
    keys: usize,

    /// Statements per batch before an accumulator drains.
    #[arg(long, default_value_t = 100)]
    batch_size: usize,

    /// Period of the flush tick.
    #[arg(long, default_value = "10ms")]
    flush_interval: humantime::Duration,

    /// Batch flavour: logged, unlogged or counter.
    #[arg(long, default_value = "unlogged")]
    batch_kind: BatchKind,

    /// Simulated backend latency per batch.
    #[arg(long, default_value = "0ms")]
    backend_delay: humantime::Duration,

    /// Rows served by the read phase (0 skips it).
    #[arg(long, default_value_t = 1_000)]
    read_rows: usize,

    /// Rows per page in the read phase.
    #[arg(long, default_value_t = 128)]
    page_size: usize,

    /// Random seed (0 picks a random seed).
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Write the JSON summary to this path.
    #[arg(long, default_value = ".tmp/holo_access/summary.json")]
    out: PathBuf,
}

/// Batch distribution for one destination.
#[derive(serde::Serialize, Debug, Clone, Default)]
struct DestinationSummary {
    address: String,
    batches: usize,
    statements: usize,
    largest_batch: usize,
}

/// Outcome of the read phase.
#[derive(serde::Serialize, Debug, Clone, Default)]
struct ReadSummary {
    rows: usize,
    groups: usize,
    distinct_buckets: usize,
}

/// Full run summary serialized as JSON.
#[derive(serde::Serialize, Debug, Clone)]
struct Summary {
    seed: u64,
    destinations: usize,
    statements: usize,
    clients: usize,
    batch_size: usize,
    flush_interval_ms: u64,
    batch_kind: BatchKind,
    elapsed_ms: u64,
    failed_statements: usize,
    by_destination: BTreeMap<usize, DestinationSummary>,
    read: Option<ReadSummary>,
    metrics: ClientMetricsSnapshot,
}

#[tokio::main]
/// Parse CLI args, initialize logging, and run the requested subcommand.
async fn main() -> anyhow::Result<()> {
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "holo_access=info,warn".into()),
        )
        .init();

    let args = Args::parse();
    match args.cmd {
        Command::Run(args) => run(args).await,
    }
}

/// Run the workload and write the summary file.
async fn run(args: RunArgs) -> anyhow::Result<()> {
    anyhow::ensure!(args.destinations > 0, "--destinations must be > 0");
    anyhow::ensure!(args.clients > 0, "--clients must be > 0");
    anyhow::ensure!(args.keys > 0, "--keys must be > 0");

    let seed = if args.seed == 0 {
        rand::thread_rng().gen()
    } else {
        args.seed
    };
    let mut rng = SmallRng::seed_from_u64(seed);

    let destinations: Vec<Destination> = (0..args.destinations)
        .map(|idx| Destination::new(idx as u64 + 1, format!("node-{idx}")))
        .collect();
    let session = Arc::new(MemorySession::new(destinations.clone()));
    session.set_delay(args.backend_delay.into());
    let keys: Vec<String> = (0..args.keys).map(|idx| format!("k{idx}")).collect();
    for key in &keys {
        let primary = rng.gen_range(0..destinations.len());
        session.assign_replicas(
            KEYSPACE,
            bytes::Bytes::from(key.clone().into_bytes()),
            vec![destinations[primary].clone()],
        );
    }

    let config = ClientConfig {
        max_batch_size: args.batch_size.max(1),
        flush_interval: Duration::from(args.flush_interval).max(Duration::from_millis(1)),
        batch_kind: args.batch_kind,
        page_size: args.page_size.max(1),
        ..ClientConfig::default()
    };
    // Writer and reader clients report into the same counters.
    let telemetry = Telemetry::default();
    let client = Arc::new(
        Client::connect_with_telemetry(session.clone(), config.clone(), telemetry.clone())
            .await
            .context("start client")?,
    );

    let start = Instant::now();
    let keys = Arc::new(keys);
    let mut tasks = Vec::with_capacity(args.clients);
    for writer in 0..args.clients {
        let client = client.clone();
        let keys = keys.clone();
        let count = args.statements / args.clients
            + usize::from(writer < args.statements % args.clients);
        // Mix the base seed with the writer id for deterministic per-writer RNG.
        let seed = seed ^ (writer as u64).wrapping_mul(0x9e3779b97f4a7c15);
        tasks.push(tokio::spawn(async move {
            run_writer(client, keys, writer, count, seed).await
        }));
    }
    let mut failed_statements = 0;
    for task in tasks {
        failed_statements += task.await.context("writer task panicked")??;
    }
    client.shutdown().await.context("stop client")?;
    let elapsed = start.elapsed();

    let mut by_destination = BTreeMap::new();
    for (idx, destination) in destinations.iter().enumerate() {
        let executed = session.executed_on(destination);
        by_destination.insert(
            idx,
            DestinationSummary {
                address: destination.address.clone(),
                batches: executed.len(),
                statements: executed.iter().map(|batch| batch.statements.len()).sum(),
                largest_batch: executed
                    .iter()
                    .map(|batch| batch.statements.len())
                    .max()
                    .unwrap_or(0),
            },
        );
    }

    let read = if args.read_rows > 0 {
        Some(run_reads(&session, &config, &telemetry, args.read_rows, &mut rng).await?)
    } else {
        None
    };

    let summary = Summary {
        seed,
        destinations: args.destinations,
        statements: args.statements,
        clients: args.clients,
        batch_size: config.max_batch_size,
        flush_interval_ms: config.flush_interval.as_millis() as u64,
        batch_kind: config.batch_kind,
        elapsed_ms: elapsed.as_millis() as u64,
        failed_statements,
        by_destination,
        read,
        metrics: telemetry.metrics().snapshot(),
    };
    write_summary(&args.out, &summary).context("write summary")?;
    eprintln!("wrote summary: {}", args.out.display());
    Ok(())
}

/// Submit `count` writes and wait for each batch outcome; returns failures.
async fn run_writer(
    client: Arc<Client>,
    keys: Arc<Vec<String>>,
    writer: usize,
    count: usize,
    seed: u64,
) -> anyhow::Result<usize> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut waiters = Vec::with_capacity(count);
    for seq in 0..count {
        let key = &keys[rng.gen_range(0..keys.len())];
        let statement = Statement::new(
            KEYSPACE,
            "INSERT INTO workload.events (key, writer, seq) VALUES (?, ?, ?)",
        )
        .bind(vec![
            key.as_str().into(),
            (writer as i64).into(),
            (seq as i64).into(),
        ])
        .with_routing_key(bytes::Bytes::from(key.clone().into_bytes()));
        waiters.push(client.reactor().perform_statement(statement)?);
        if seq % 64 == 63 {
            tokio::task::yield_now().await;
        }
    }

    let mut failed = 0;
    for waiter in waiters {
        if let Err(err) = waiter.await {
            tracing::warn!(writer, error = %err, "write failed");
            failed += 1;
        }
    }
    Ok(failed)
}

/// Read back generated rows through chunking and dedup stages.
async fn run_reads(
    session: &Arc<MemorySession>,
    config: &ClientConfig,
    telemetry: &Telemetry,
    rows: usize,
    rng: &mut SmallRng,
) -> anyhow::Result<ReadSummary> {
    let mut bucket = 0i64;
    let generated: Vec<Row> = (0..rows)
        .map(|seq| {
            if rng.gen_bool(0.1) {
                bucket += 1;
            }
            Row::new().with("bucket", bucket).with("seq", seq as i64)
        })
        .collect();
    session.insert_rows(READ_QUERY, generated);

    let client = Client::connect_with_telemetry(session.clone(), config.clone(), telemetry.clone())
        .await
        .context("start reader")?;
    let statement = Statement::new(KEYSPACE, READ_QUERY);

    // The iterator stages wait on pages synchronously.
    let (groups, distinct) = tokio::task::block_in_place(|| -> anyhow::Result<_> {
        let groups = client
            .rows(statement.clone())
            .chunk_by(["bucket"])
            .to_list()
            .context("chunked read")?;
        let distinct = client
            .rows(statement.clone())
            .dedup_by_keys(["bucket"])
            .to_list()
            .context("deduplicated read")?;
        Ok((groups, distinct))
    })?;

    let mut total = 0;
    let mut stream = std::pin::pin!(client.rows(statement).into_stream());
    while let Some(record) = stream.next().await {
        record.context("streamed read")?;
        total += 1;
    }
    client.shutdown().await.context("stop reader")?;

    Ok(ReadSummary {
        rows: total,
        groups: groups.len(),
        distinct_buckets: distinct.len(),
    })
}

/// Serialize and write the summary JSON.
fn write_summary(path: &PathBuf, summary: &Summary) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }
    let data = serde_json::to_vec_pretty(summary).context("serialize summary")?;
    std::fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
