// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Storage core CLI: opens a database directory against its catalog and
//! reports pool sizing, for operators sanity-checking a deployment before
//! a server process attaches to the same directory.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use mdb_storage_core::{Engine, StorageConfig};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "mdb-storage")]
#[command(about = "MillenniumDB storage core diagnostics")]
#[command(version)]
struct Cli {
    /// Existing database directory.
    database: PathBuf,

    /// Scope open timeout in seconds.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=36000), default_value_t = 60)]
    timeout: u64,

    /// String manager budget, accepts KB/MB/GB/TB suffixes.
    #[arg(long = "load-strings", value_parser = parse_byte_size, default_value = "2GB")]
    load_strings: u64,

    /// Versioned page pool budget, accepts KB/MB/GB/TB suffixes.
    #[arg(long = "versioned-buffer", value_parser = parse_byte_size, default_value = "1GB")]
    versioned_buffer: u64,

    /// Private (per-worker) page pool budget, accepts KB/MB/GB/TB suffixes.
    #[arg(long = "private-buffer", value_parser = parse_byte_size, default_value = "64MB")]
    private_buffer: u64,

    /// Unversioned page pool budget, accepts KB/MB/GB/TB suffixes.
    #[arg(long = "unversioned-buffer", value_parser = parse_byte_size, default_value = "128MB")]
    unversioned_buffer: u64,

    /// Number of worker threads (and private pool partitions).
    #[arg(long, default_value_t = default_workers())]
    workers: usize,
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        error!("{e}");
        process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let _ = cli.timeout;
    let _ = cli.load_strings;

    let config = StorageConfig {
        vp_pool_bytes: cli.versioned_buffer,
        up_pool_bytes: cli.unversioned_buffer,
        pp_pool_bytes_per_worker: cli.private_buffer,
        workers: cli.workers,
    };

    let engine = Engine::open(&cli.database, config)?;

    println!(
        "opened {} ({:?} model) — vp={} up={} pp={}x{} workers={}",
        cli.database.display(),
        engine.model,
        cli.versioned_buffer,
        cli.unversioned_buffer,
        cli.private_buffer,
        cli.workers,
        cli.workers,
    );
    println!(
        "vp hit ratio={:.3} up hit ratio={:.3}",
        engine.vpool.stats().hit_ratio(),
        engine.upool.stats().hit_ratio(),
    );
    info!(last_stable_version = engine.last_stable_version(), "storage core ready");
    Ok(())
}

/// Parses sizes like `2GB`, `512MB`, `4096` (bytes) into a byte count.
fn parse_byte_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (digits, suffix) = s
        .find(|c: char| !c.is_ascii_digit())
        .map(|i| s.split_at(i))
        .unwrap_or((s, ""));

    let value: u64 = digits.parse().map_err(|_| format!("invalid size: {s}"))?;
    let multiplier: u64 = match suffix.to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "KB" => 1 << 10,
        "MB" => 1 << 20,
        "GB" => 1 << 30,
        "TB" => 1 << 40,
        other => return Err(format!("unknown size suffix: {other}")),
    };
    Ok(value * multiplier)
}
