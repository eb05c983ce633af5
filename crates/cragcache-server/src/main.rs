//! cragcache - offline crag cache and API gateway for a climbing topo backend.
//!
//! `cragcache serve` runs the HTTP gateway; `download`, `remove` and `list`
//! manage the offline copy of crags on this machine.

mod cli;
mod error;
mod extract;
mod routes;
mod server;
mod state;

use std::io;
use std::path::Path;

use anyhow::Result;
use cragcache_core::Config;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "\
Usage: cragcache [COMMAND]

Commands:
  serve              Run the HTTP gateway (default)
  download <crag-id> Download a crag for offline use
  remove <crag-id>   Remove the offline copy of a crag
  list               List downloaded crags";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Serve,
    Download(String),
    Remove(String),
    List,
    Help,
}

fn parse_args(args: &[String]) -> Result<Command> {
    let command = match args.get(1).map(String::as_str) {
        None | Some("serve") => Command::Serve,
        Some("download") => Command::Download(crag_id_arg(args, "download")?),
        Some("remove") => Command::Remove(crag_id_arg(args, "remove")?),
        Some("list") => Command::List,
        Some("-h") | Some("--help") | Some("help") => Command::Help,
        Some(other) => anyhow::bail!("Unknown command: {}\n\n{}", other, USAGE),
    };
    Ok(command)
}

fn crag_id_arg(args: &[String], command: &str) -> Result<String> {
    args.get(2)
        .filter(|id| !id.trim().is_empty())
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("{} needs a crag id\n\n{}", command, USAGE))
}

/// Initialize the tracing subscriber. Logs go to stderr, and also to a daily
/// rolling file when `log_dir` is set; keep the returned guard alive so the
/// file writer flushes.
fn init_tracing(log_dir: Option<&Path>, default_level: &str) -> Option<WorkerGuard> {
    // RUST_LOG overrides the default level (e.g., RUST_LOG=cragcache=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "cragcache.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    let command = parse_args(&args)?;
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load()?;
    let default_level = if command == Command::Serve { "info" } else { "warn" };
    let _log_guard = init_tracing(config.log_dir.as_deref(), default_level);

    match command {
        Command::Serve => {
            info!(version = env!("CARGO_PKG_VERSION"), "cragcache starting");
            server::start_server(&config).await
        }
        Command::Download(crag_id) => cli::download(&config, &crag_id).await,
        Command::Remove(crag_id) => cli::remove(&config, &crag_id).await,
        Command::List => cli::list(&config).await,
        Command::Help => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        std::iter::once("cragcache")
            .chain(items.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_args() {
        assert_eq!(parse_args(&args(&[])).unwrap(), Command::Serve);
        assert_eq!(parse_args(&args(&["serve"])).unwrap(), Command::Serve);
        assert_eq!(parse_args(&args(&["list"])).unwrap(), Command::List);
        assert_eq!(
            parse_args(&args(&["download", "c1"])).unwrap(),
            Command::Download("c1".to_string())
        );
        assert_eq!(
            parse_args(&args(&["remove", "c1"])).unwrap(),
            Command::Remove("c1".to_string())
        );
        assert_eq!(parse_args(&args(&["--help"])).unwrap(), Command::Help);
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse_args(&args(&["download"])).is_err());
        assert!(parse_args(&args(&["frobnicate"])).is_err());
    }
}
