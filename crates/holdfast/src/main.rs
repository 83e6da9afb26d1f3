#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use clap::{Parser, Subcommand};
use eyre::Context as _;
use tracing_subscriber::prelude::*;

use holdfast::{config::ConfigStore, hd, paths::HoldfastPaths, serve};

#[derive(Parser, Debug)]
#[command(name = "holdfast", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the worker host behind a line-delimited JSON-RPC loop on stdio.
    ///
    /// Holds a single-instance lock so only one process at a time owns the
    /// vault and its persisted blob.
    Serve,

    /// Print a fresh 12-word recovery phrase.
    Mnemonic,

    /// Print resolved paths (useful for debugging).
    Paths,
}

fn init_logging(paths: &HoldfastPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("holdfast.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = HoldfastPaths::discover()?;
    std::fs::create_dir_all(&paths.data_dir).context("create data dir")?;
    let _log_guard = init_logging(&paths);

    match cli.cmd {
        Command::Serve => {
            let cfg = ConfigStore::new(&paths).load_or_init_default()?;
            serve::run(&paths, &cfg).await.context("serve failed")
        }
        Command::Mnemonic => {
            use std::io::Write as _;
            let phrase = hd::random_mnemonic()?;
            writeln!(std::io::stdout().lock(), "{phrase}").context("write mnemonic")?;
            Ok(())
        }
        Command::Paths => {
            use std::io::Write as _;
            let s = serde_json::to_string(&serde_json::json!({
              "config_dir": paths.config_dir,
              "data_dir": paths.data_dir,
              "log_file": paths.log_file,
            }))
            .context("serialize paths")?;
            writeln!(std::io::stdout().lock(), "{s}").context("write paths")?;
            Ok(())
        }
    }
}
