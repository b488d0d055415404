//! Artifact Cache CLI
//!
//! Operator tooling for an on-disk artifact cache directory.
//!
//! # Commands
//!
//! ```text
//! artifact-cache [--cache-dir DIR] [--config FILE] <COMMAND>
//!
//!   health                 Run health checks (exit code 2 when unhealthy)
//!   stats                  Show disk footprint
//!   maintain [--orphans]   Expire, recompact and prune; --orphans also
//!                          drops files this process has not touched
//!   clear                  Delete every cached entry
//!   invalidate KEY         Delete every version of KEY
//!   invalidate-prefix P    Delete every key starting with P
//!   purge-older-than -H N  Delete entries older than N hours
//!   fingerprint FILE       Print the content hash of FILE
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use artifact_cache::cache::clock::epoch_millis;
use artifact_cache::{ArtifactCache, CacheConfig, Fingerprint, WriteMode};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Artifact Cache - inspect and maintain a persistent artifact cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cache directory (overrides the config file)
    #[arg(long, env = "ARTIFACT_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// YAML configuration file
    #[arg(long, env = "ARTIFACT_CACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Cache(CacheCommand),
    /// Print the content hash of a file
    Fingerprint {
        file: PathBuf,
        /// Digest algorithm (sha256, sha512)
        #[arg(long, default_value = "sha256")]
        algorithm: String,
    },
}

/// Commands that open the cache directory
#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Run health checks
    Health,
    /// Show disk footprint
    Stats,
    /// Run the maintenance passes
    Maintain {
        /// Also delete disk entries older than the grace period that are not
        /// in memory. A fresh process has an empty memory tier, so this
        /// removes every such entry.
        #[arg(long)]
        orphans: bool,
    },
    /// Delete every cached entry
    Clear,
    /// Delete every stored version of a key
    Invalidate {
        key: String,
    },
    /// Delete every key starting with a prefix
    InvalidatePrefix {
        prefix: String,
    },
    /// Delete entries older than the given age
    PurgeOlderThan {
        #[arg(long, short = 'H')]
        hours: u64,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Removed {
    removed: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Footprint {
    cache_directory: PathBuf,
    disk_enabled: bool,
    disk_files: usize,
    disk_size_bytes: u64,
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let command = match &args.command {
        Command::Fingerprint { file, algorithm } => return fingerprint(file, algorithm),
        Command::Cache(command) => command,
    };

    let config = load_config(&args, command)?;
    debug!(dir = %config.cache_directory.display(), "Using cache directory");

    let cache = ArtifactCache::open(config).context("opening cache")?;
    let exit_code = run(&cache, command)?;
    cache.shutdown();

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

fn fingerprint(file: &Path, algorithm: &str) -> Result<()> {
    let fingerprint = Fingerprint::from_name(algorithm)?;
    let reader = File::open(file).with_context(|| format!("opening {}", file.display()))?;
    println!("{}", fingerprint.of_reader(reader)?);
    Ok(())
}

fn load_config(args: &Args, command: &CacheCommand) -> Result<CacheConfig> {
    let mut config = match &args.config {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => CacheConfig::default(),
    };
    if let Some(dir) = &args.cache_dir {
        config.cache_directory = dir.clone();
    }
    // Memory is empty in a fresh process, so only an explicit request may
    // treat disk entries as orphans
    config.maintenance.clean_orphans = matches!(command, CacheCommand::Maintain { orphans: true });
    // One-shot commands have nothing to overlap disk writes with
    Ok(config.with_write_mode(WriteMode::Sync))
}

fn run(cache: &ArtifactCache, command: &CacheCommand) -> Result<i32> {
    match command {
        CacheCommand::Health => {
            let report = cache.health();
            print_json(&report)?;
            return Ok(if report.healthy { 0 } else { 2 });
        }
        CacheCommand::Stats => {
            let disk = cache.disk();
            print_json(&Footprint {
                cache_directory: cache.config().cache_directory.clone(),
                disk_enabled: disk.is_some(),
                disk_files: disk.map(|d| d.file_count()).unwrap_or(0),
                disk_size_bytes: disk.map(|d| d.size_bytes()).unwrap_or(0),
            })?;
        }
        CacheCommand::Maintain { .. } => {
            print_json(&cache.run_maintenance())?;
        }
        CacheCommand::Clear => {
            cache.clear();
            info!("Cache cleared");
        }
        CacheCommand::Invalidate { key } => {
            print_json(&Removed {
                removed: cache.invalidate(key),
            })?;
        }
        CacheCommand::InvalidatePrefix { prefix } => {
            print_json(&Removed {
                removed: cache.invalidate_prefix(prefix),
            })?;
        }
        CacheCommand::PurgeOlderThan { hours } => {
            let age = Duration::from_secs(hours.saturating_mul(3600));
            let cutoff = SystemTime::now()
                .checked_sub(age)
                .map(epoch_millis)
                .unwrap_or(0);
            print_json(&Removed {
                removed: cache.invalidate_older_than(cutoff),
            })?;
        }
    }
    Ok(0)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Logging Setup
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

    // Logs go to stderr so stdout stays valid JSON
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn config_for(argv: &[&str]) -> CacheConfig {
        let args = Args::try_parse_from(argv).unwrap();
        let Command::Cache(command) = &args.command else {
            panic!("expected a cache command, got {:?}", args.command);
        };
        load_config(&args, command).unwrap()
    }

    #[test]
    fn test_maintain_skips_orphans_by_default() {
        let config = config_for(&["artifact-cache", "--cache-dir", "/tmp/ac", "maintain"]);
        assert!(!config.maintenance.clean_orphans);
        assert_eq!(config.write_mode, WriteMode::Sync);

        let config = config_for(&["artifact-cache", "--cache-dir", "/tmp/ac", "maintain", "--orphans"]);
        assert!(config.maintenance.clean_orphans);
    }

    #[test]
    fn test_stats_output_is_disk_footprint() {
        let json = serde_json::to_value(Footprint {
            cache_directory: PathBuf::from("/tmp/ac"),
            disk_enabled: true,
            disk_files: 2,
            disk_size_bytes: 10,
        })
        .unwrap();
        assert_eq!(json["diskFiles"], 2);
        assert_eq!(json["diskSizeBytes"], 10);
        assert!(json.get("stats").is_none());
        assert!(json.get("memoryEntries").is_none());
    }

    #[test]
    fn test_fingerprint_is_not_a_cache_command() {
        let args = Args::try_parse_from(["artifact-cache", "fingerprint", "Cargo.toml"]).unwrap();
        assert_matches!(args.command, Command::Fingerprint { ref algorithm, .. } if algorithm == "sha256");

        let args = Args::try_parse_from(["artifact-cache", "purge-older-than", "-H", "48"]).unwrap();
        assert_matches!(args.command, Command::Cache(CacheCommand::PurgeOlderThan { hours: 48 }));
    }
}
