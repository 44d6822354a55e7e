//! FenceKV CLI
//!
//! Command-line interface over an embedded FenceKV data directory.

use std::collections::{BTreeMap, HashSet};
use std::process;
use std::time::Instant;

use clap::{Parser, Subcommand};
use fencekv::key::trim_key;
use fencekv::{Command, Config, Engine, FenceError, Output, PartitionId, Result};
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing_subscriber::{fmt, EnvFilter};

/// FenceKV CLI
#[derive(Parser, Debug)]
#[command(name = "fencekv")]
#[command(about = "Embedded key-value store with range-partitioned value logs")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./fencekv_data")]
    data_dir: String,

    /// Number of key-range partitions
    #[arg(short = 'g', long, default_value = "16")]
    partitions: usize,

    /// Pending keys that trigger pivot generation
    #[arg(short, long, default_value = "100000")]
    capacity: usize,

    /// Per-partition buffer size in KB before flush
    #[arg(short, long, default_value = "4096")]
    buffer_kb: usize,

    /// Disk budget for all value logs in MB
    #[arg(long, default_value = "65536")]
    budget_mb: u64,

    /// Print collected statistics before exiting
    #[arg(long)]
    stats: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// List up to COUNT pairs starting at START
    Scan {
        start: String,

        #[arg(default_value = "10")]
        count: usize,
    },

    /// List pairs with LOWER < key <= UPPER
    Range {
        #[arg(long)]
        lower: Option<String>,

        #[arg(long)]
        upper: Option<String>,
    },

    /// Collect one partition (the busiest one by default)
    Gc {
        #[arg(short, long)]
        partition: Option<PartitionId>,
    },

    /// Collect every partition
    GcAll,

    /// Persist every buffered write
    Flush,

    /// Run a small workload: insert, read back, delete, collect, scan
    Load {
        /// Keys to insert
        #[arg(short = 'n', long, default_value = "10000")]
        count: usize,

        /// Bytes per value
        #[arg(long, default_value = "100")]
        value_size: usize,

        /// Seed for the random keys, values and delete choices
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fencekv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .partition_count(args.partitions)
        .initial_buffer_capacity(args.capacity)
        .partition_buffer_size(args.buffer_kb * 1024)
        .disk_budget(args.budget_mb * 1024 * 1024)
        .build();

    let engine = match Engine::open(config) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            process::exit(1);
        }
    };

    let outcome = run_command(&engine, args.command);

    if args.stats {
        print!("{}", engine.stats_report());
    }

    let closed = engine.close();
    if let Err(e) = outcome.and(closed) {
        tracing::error!("{}", e);
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn run_command(engine: &Engine, command: Commands) -> Result<()> {
    let command = match command {
        Commands::Put { key, value } => Command::Put {
            key: key.into_bytes(),
            value: value.into_bytes(),
        },
        Commands::Get { key } => Command::Get { key: key.into_bytes() },
        Commands::Del { key } => Command::Delete { key: key.into_bytes() },
        Commands::Scan { start, count } => Command::Scan {
            start: start.into_bytes(),
            count,
        },
        Commands::Range { lower, upper } => Command::ScanRange {
            lower: lower.map(String::into_bytes),
            upper: upper.map(String::into_bytes),
        },
        Commands::Gc { partition } => Command::Gc { partition },
        Commands::GcAll => Command::GcAll,
        Commands::Flush => Command::Flush,
        Commands::Load {
            count,
            value_size,
            seed,
        } => return run_load(engine, count, value_size, seed),
    };

    match engine.execute(command)? {
        Output::Done => println!("OK"),
        Output::Value(Some(value)) => println!("{}", String::from_utf8_lossy(&value)),
        Output::Value(None) => println!("(nil)"),
        Output::Pairs(pairs) => {
            for (key, value) in &pairs {
                println!(
                    "{} => {}",
                    String::from_utf8_lossy(trim_key(key)),
                    String::from_utf8_lossy(value)
                );
            }
            println!("({} pairs)", pairs.len());
        }
        Output::Gc(report) => println!(
            "partition {}: {} live records, {} -> {} bytes",
            report.partition, report.live_records, report.bytes_before, report.bytes_after
        ),
        Output::GcAll(reports) => {
            let mut failed = None;
            for (p, result) in reports.into_iter().enumerate() {
                match result {
                    Ok(report) => println!(
                        "partition {}: {} live records, {} -> {} bytes",
                        report.partition, report.live_records, report.bytes_before, report.bytes_after
                    ),
                    Err(e) => {
                        println!("partition {}: failed: {}", p, e);
                        failed.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = failed {
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Length range of generated keys
const LOAD_KEY_LEN: std::ops::RangeInclusive<usize> = 8..=16;

/// Insert `count` random keys with random values, read them back, delete a
/// random tenth, collect every partition, then check the survivors again
fn run_load(engine: &Engine, count: usize, value_size: usize, seed: u64) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut keys = random_keys(&mut rng, count);

    let mut model: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let start = Instant::now();
    for key in &keys {
        let value = Alphanumeric.sample_string(&mut rng, value_size).into_bytes();
        engine.put(key.as_bytes(), &value)?;
        model.insert(key.clone(), value);
    }
    println!("inserted {} keys in {:?}", count, start.elapsed());

    let start = Instant::now();
    verify(engine, &keys, &model)?;
    println!("read back {} keys in {:?}", count, start.elapsed());

    keys.shuffle(&mut rng);
    for key in keys.iter().take(count / 10) {
        engine.delete(key.as_bytes())?;
        model.remove(key);
    }

    if engine.is_partitioned() {
        let start = Instant::now();
        let results = engine.gc_all()?;
        let reclaimed: u64 = results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .map(|r| r.bytes_reclaimed())
            .sum();
        println!("collected {} partitions, reclaimed {} bytes in {:?}", results.len(), reclaimed, start.elapsed());
    }

    verify(engine, &keys, &model)?;

    let first = model.keys().next().map(String::as_str).unwrap_or("0");
    let pairs = engine.scan(first.as_bytes(), 10)?;
    println!("scan from {} returned {} pairs", first, pairs.len());
    println!("disk usage: {} bytes", engine.total_disk_size());
    Ok(())
}

/// `count` distinct alphanumeric keys
fn random_keys<R: Rng>(rng: &mut R, count: usize) -> Vec<String> {
    let mut seen = HashSet::with_capacity(count);
    let mut keys = Vec::with_capacity(count);
    while keys.len() < count {
        let len = rng.gen_range(LOAD_KEY_LEN);
        let key = Alphanumeric.sample_string(rng, len);
        if seen.insert(key.clone()) {
            keys.push(key);
        }
    }
    keys
}

/// Every key reads back as the model says; absent from the model means deleted
fn verify(engine: &Engine, keys: &[String], model: &BTreeMap<String, Vec<u8>>) -> Result<()> {
    for key in keys {
        let expected = model.get(key);
        let actual = engine.get(key.as_bytes())?;
        if actual.as_ref() != expected {
            return Err(FenceError::InvalidValue(format!(
                "key {} read back {:?} bytes, expected {:?}",
                key,
                actual.map(|v| v.len()),
                expected.map(|v| v.len())
            )));
        }
    }
    Ok(())
}
