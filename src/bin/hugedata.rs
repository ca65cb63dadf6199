//! pagekv bulk-load demo
//!
//! Fills a hash map with `i -> "aa" + i`, committing periodically, then
//! reopens the store and reads a few entries back.

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use pagekv::{Compression, DefaultSerializer, HTreeMap, Options, Store};
use tracing_subscriber::{fmt, EnvFilter};

/// Bulk insert into a pagekv hash map
#[derive(Parser, Debug)]
#[command(name = "hugedata")]
#[command(about = "Bulk-load a pagekv hash map and read it back")]
#[command(version)]
struct Args {
    /// Store file (the log goes next to it)
    #[arg(short, long, default_value = "./hugedata.db")]
    path: PathBuf,

    /// Number of entries to insert
    #[arg(short, long, default_value = "1000000")]
    count: i64,

    /// Commit after this many inserts
    #[arg(long, default_value = "10000")]
    commit_every: i64,

    /// Page cache size in pages
    #[arg(long, default_value = "1024")]
    cache_pages: u32,

    /// Skip the transaction log
    #[arg(long)]
    no_log: bool,

    /// Compress record payloads with lz4
    #[arg(long)]
    lz4: bool,
}

const MAP_NAME: &str = "huge";

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pagekv=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    tracing::info!("pagekv hugedata v{}", pagekv::VERSION);
    tracing::info!("Store file: {}", args.path.display());

    if let Err(e) = run(&args) {
        tracing::error!("hugedata failed: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> pagekv::Result<()> {
    let options = Options::builder()
        .cache_pages(args.cache_pages)
        .transaction_disable(args.no_log)
        .compression(if args.lz4 {
            Compression::Lz4
        } else {
            Compression::None
        })
        .build();

    let store = Store::open(&args.path, options.clone())?;
    let map: HTreeMap<i64, String> = match store.named_root(MAP_NAME)? {
        Some(_) => store.open_map(MAP_NAME, DefaultSerializer::new(), DefaultSerializer::new())?,
        None => store.create_hash_map(MAP_NAME, DefaultSerializer::new(), DefaultSerializer::new())?,
    };

    let started = Instant::now();
    for i in 0..args.count {
        map.put(&i, &format!("aa{}", i))?;
        if (i + 1) % args.commit_every.max(1) == 0 {
            store.commit()?;
            tracing::info!(
                inserted = i + 1,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "committed"
            );
        }
    }
    store.close()?;
    tracing::info!(
        count = args.count,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "bulk load finished"
    );

    let store = Store::open(&args.path, options)?;
    let map: HTreeMap<i64, String> =
        store.open_map(MAP_NAME, DefaultSerializer::new(), DefaultSerializer::new())?;
    for probe in [0, 42, args.count / 2, args.count - 1] {
        if probe >= 0 {
            tracing::info!(key = probe, value = ?map.get(&probe)?, "read back");
        }
    }
    store.close()
}
