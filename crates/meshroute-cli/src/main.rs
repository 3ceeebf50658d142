//! # meshroute CLI Entry Point
//!
//! Loads a property dump and prints routing reports as JSON.
//!
//! ## Usage
//!
//! ```bash
//! # Hosts and ring points of every partition
//! meshroute partitions --dump props.json --service articles
//!
//! # Point distribution of one partition's ring
//! meshroute ring --dump props.json --service articles --partition 2
//!
//! # Where keys go, one host each
//! meshroute map-keys --dump props.json --service articles 17 42 1001
//!
//! # Up to three hosts per partition, stable for one sticky key
//! meshroute map-keys --dump props.json --service articles --hosts 3 --sticky session-1 17 42
//!
//! # Resolve a single request
//! meshroute resolve --dump props.json d2://articles/items?id=17
//! ```

use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;
use meshroute_cli::inspect::{self, PropertyDump};
use serde::Serialize;

#[derive(FromArgs)]
/// meshroute - inspect client-side routing decisions
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Partitions(PartitionsArgs),
    Ring(RingArgs),
    MapKeys(MapKeysArgs),
    Resolve(ResolveArgs),
}

/// Arguments for listing the partitions of a service.
#[derive(FromArgs)]
#[argh(subcommand, name = "partitions")]
/// list the hosts of every partition of a service
struct PartitionsArgs {
    /// JSON file with `clusters`, `services` and `uris` arrays
    #[argh(option, short = 'd')]
    dump: PathBuf,

    /// service to inspect
    #[argh(option, short = 's')]
    service: String,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "ring")]
/// show the hash ring of one partition
struct RingArgs {
    /// JSON file with `clusters`, `services` and `uris` arrays
    #[argh(option, short = 'd')]
    dump: PathBuf,

    /// service to inspect
    #[argh(option, short = 's')]
    service: String,

    /// partition id; defaults to 0
    #[argh(option, short = 'p', default = "0")]
    partition: i32,
}

/// Arguments for mapping keys to hosts.
///
/// Without `--hosts` each key gets one host. With it, keys are grouped by
/// partition and each partition lists up to that many hosts in preference
/// order; with `--hosts` and no keys every partition is listed.
#[derive(FromArgs)]
#[argh(subcommand, name = "map-keys")]
/// map keys of a service to hosts
struct MapKeysArgs {
    /// JSON file with `clusters`, `services` and `uris` arrays
    #[argh(option, short = 'd')]
    dump: PathBuf,

    /// service the keys belong to
    #[argh(option, short = 's')]
    service: String,

    /// hosts wanted per partition
    #[argh(option, short = 'n')]
    hosts: Option<usize>,

    /// key fixing the host order when listing several hosts
    #[argh(option)]
    sticky: Option<String>,

    /// keys to map
    #[argh(positional)]
    keys: Vec<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "resolve")]
/// resolve a d2:// request URI to a host
struct ResolveArgs {
    /// JSON file with `clusters`, `services` and `uris` arrays
    #[argh(option, short = 'd')]
    dump: PathBuf,

    /// request URI, e.g. d2://articles/items?id=17
    #[argh(positional)]
    request: String,
}

fn print_json<T: Serialize>(report: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Logs go to stderr so stdout stays valid JSON.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Partitions(args) => {
            let state = PropertyDump::load(&args.dump)?.into_state().await?;
            print_json(&inspect::partitions_report(&state, &args.service)?)?;
            state.shutdown().await;
        }
        Commands::Ring(args) => {
            let state = PropertyDump::load(&args.dump)?.into_state().await?;
            print_json(&inspect::ring_report(&state, &args.service, args.partition)?)?;
            state.shutdown().await;
        }
        Commands::MapKeys(args) => {
            let state = PropertyDump::load(&args.dump)?.into_state().await?;
            match args.hosts {
                Some(hosts) => print_json(&inspect::multi_host_report(
                    &state,
                    &args.service,
                    args.keys,
                    hosts,
                    args.sticky.as_deref(),
                )?)?,
                None => {
                    anyhow::ensure!(!args.keys.is_empty(), "No keys given");
                    print_json(&inspect::map_keys_report(&state, &args.service, args.keys)?)?
                }
            }
            state.shutdown().await;
        }
        Commands::Resolve(args) => {
            let state = PropertyDump::load(&args.dump)?.into_state().await?;
            print_json(&inspect::resolve_report(&state, &args.request)?)?;
            state.shutdown().await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests;
