//! Compute Cache Soak Runner
//!
//! Hammers a [`ComputeCache`] of file summaries from many threads while
//! files are rewritten underneath it, then shuts the cache down and checks
//! that every handle it opened was closed.
//!
//! ```text
//! ┌──────────────┐   get / invalidate   ┌──────────────┐   open / read   ┌─────────┐
//! │ worker × N   │─────────────────────▶│ ComputeCache │────────────────▶│  files  │
//! └──────────────┘                      └──────────────┘                 └─────────┘
//!        │                                                                    ▲
//!        └──────────────────────── rewrite in place ─────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use compute_cache::probe::FileSummaryKey;
use compute_cache::{CacheConfig, ComputeCache};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Compute Cache soak runner - concurrent get/invalidate load over real files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of worker threads
    #[arg(long, env = "SOAK_THREADS", default_value = "8")]
    threads: usize,

    /// Number of distinct files (cache keys)
    #[arg(long, env = "SOAK_FILES", default_value = "32")]
    files: usize,

    /// Requests issued by each worker
    #[arg(long, env = "SOAK_ITERATIONS", default_value = "10000")]
    iterations: usize,

    /// Expiry window of each summary in milliseconds (0 = drop when unused)
    #[arg(long, env = "SOAK_EXPIRY_MS", default_value = "250")]
    expiry_ms: u64,

    /// Reclamation sweep interval in milliseconds
    #[arg(long, env = "SOAK_SWEEP_INTERVAL_MS", default_value = "100")]
    sweep_interval_ms: u64,

    /// Rewrite a file every N requests per worker (0 = never)
    #[arg(long, env = "SOAK_REWRITE_EVERY", default_value = "500")]
    rewrite_every: usize,

    /// Invalidate a key every N requests per worker (0 = never)
    #[arg(long, env = "SOAK_INVALIDATE_EVERY", default_value = "1000")]
    invalidate_every: usize,

    /// Directory for the probed files (default: fresh directory under the system temp dir)
    #[arg(long, env = "SOAK_DIR")]
    dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print final cache statistics as JSON on stdout
    #[arg(long)]
    stats_json: bool,
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    if args.threads == 0 || args.files == 0 {
        bail!("--threads and --files must be at least 1");
    }

    info!("Starting compute cache soak");
    info!("  Threads: {}", args.threads);
    info!("  Files: {}", args.files);
    info!("  Iterations per thread: {}", args.iterations);
    info!("  Expiry: {} ms", args.expiry_ms);
    info!("  Sweep interval: {} ms", args.sweep_interval_ms);

    let (dir, owned_dir) = match &args.dir {
        Some(dir) => (dir.clone(), false),
        None => (
            std::env::temp_dir().join(format!("compute-cache-soak-{}", std::process::id())),
            true,
        ),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let result = soak(&args, &dir);

    if owned_dir {
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            warn!("Failed to remove {}: {}", dir.display(), e);
        }
    }

    result
}

fn soak(args: &Args, dir: &Path) -> Result<()> {
    let paths: Vec<PathBuf> = (0..args.files)
        .map(|i| dir.join(format!("probe-{:04}.txt", i)))
        .collect();
    for (i, path) in paths.iter().enumerate() {
        write_contents(path, i)?;
    }

    let expiry = Duration::from_millis(args.expiry_ms);
    let keys: Vec<FileSummaryKey> = paths
        .iter()
        .map(|path| FileSummaryKey::new(path).with_expiry(expiry))
        .collect();

    let config =
        CacheConfig::default().with_sweep_interval(Duration::from_millis(args.sweep_interval_ms));
    let cache = ComputeCache::with_config(config);

    let started = Instant::now();
    thread::scope(|scope| -> Result<()> {
        let workers: Vec<_> = (0..args.threads)
            .map(|t| {
                let cache = &cache;
                let keys = &keys;
                scope.spawn(move || worker(t, args, cache, keys))
            })
            .collect();

        for worker in workers {
            match worker.join() {
                Ok(result) => result?,
                Err(_) => bail!("Soak worker panicked"),
            }
        }
        Ok(())
    })?;
    let elapsed = started.elapsed();

    cache.close();
    let stats = cache.stats();

    let requests = (args.threads * args.iterations) as f64;
    info!(
        "Completed {} requests in {:?} ({:.0} req/s)",
        requests,
        elapsed,
        requests / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    info!(
        "  allocations={} regenerations={} reallocations={} hits={} hit_ratio={:.3}",
        stats.allocations, stats.regenerations, stats.reallocations, stats.hits, stats.hit_ratio
    );
    info!(
        "  invalidations={} reclamations={} closes={} close_failures={}",
        stats.invalidations, stats.reclamations, stats.closes, stats.close_failures
    );

    if args.stats_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }

    if stats.open_handles() != 0 {
        bail!(
            "{} handles left open after shutdown ({} allocated, {} closed)",
            stats.open_handles(),
            stats.allocations,
            stats.closes
        );
    }
    Ok(())
}

fn worker(
    thread_id: usize,
    args: &Args,
    cache: &ComputeCache<FileSummaryKey>,
    keys: &[FileSummaryKey],
) -> Result<()> {
    for i in 0..args.iterations {
        let index = (i * 7 + thread_id) % keys.len();
        let key = &keys[index];

        // Readers may race a rewrite and see a truncated file; only errors count
        cache
            .get(key)
            .with_context(|| format!("Failed to summarize {}", key.path().display()))?;

        if args.rewrite_every > 0 && i % args.rewrite_every == args.rewrite_every - 1 {
            write_contents(key.path(), i + thread_id)?;
        }
        if args.invalidate_every > 0 && i % args.invalidate_every == args.invalidate_every - 1 {
            cache.invalidate(key);
        }
    }
    Ok(())
}

/// Write a file with `seed % 16 + 1` lines.
fn write_contents(path: &Path, seed: usize) -> Result<()> {
    let lines = seed % 16 + 1;
    let body: String = (0..lines).map(|n| format!("line {}\n", n)).collect();
    std::fs::write(path, body).with_context(|| format!("Failed to write {}", path.display()))
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
