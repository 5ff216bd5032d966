//! CLI entrypoint for ptyhub.
#![deny(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod commands;
mod serve;
mod telemetry;

use anyhow::Context;
use clap::Parser;

use ptyhub_daemon::DaemonConfig;
use ptyhub_daemon::DaemonError;
use ptyhub_daemon::ErrorCategory;
use ptyhub_ipc::Appearance;

use crate::commands::Cli;
use crate::commands::Commands;
use crate::commands::ServeArgs;
use crate::telemetry::init_tracing;

fn main() {
    if let Err(e) = run() {
        if let Some(daemon_error) = e.downcast_ref::<DaemonError>() {
            eprintln!("Error: {}", daemon_error);
            eprintln!("Suggestion: {}", daemon_error.suggestion());
            std::process::exit(exit_code_for_category(daemon_error.category()));
        }
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn exit_code_for_category(category: ErrorCategory) -> i32 {
    match category {
        ErrorCategory::InvalidInput => 64, // EX_USAGE
        ErrorCategory::NotFound => 69,     // EX_UNAVAILABLE
        ErrorCategory::Busy => 73,         // EX_CANTCREAT
        ErrorCategory::External => 74,     // EX_IOERR
        ErrorCategory::Timeout => 75,      // EX_TEMPFAIL
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("ptyhub {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Serve(args) => run_serve(args),
    }
}

fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    let _telemetry = init_tracing("info");

    let config = args.apply(DaemonConfig::from_env());
    let appearance = match &args.appearance {
        Some(path) => Appearance::load(path)
            .with_context(|| format!("Failed to load appearance from {}", path.display()))?,
        None => Appearance::default(),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("ptyhub")
        .build()
        .context("Failed to build async runtime")?;

    runtime.block_on(serve::run(config, appearance))?;
    Ok(())
}
