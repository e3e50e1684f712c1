//! CLI entry point for the DBFS transfer engine.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use fastdbfs_core::config;
use fastdbfs_core::session::Session;
use fastdbfs_core::{ApiError, ConfigError, TransferError, WalkError};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments before touching tracing, so --help works without logs.
    let args = Args::parse();

    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    match run(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("Operation failed: {} - {e}", error_kind(&e));
            error!(error = %e, "operation failed");
            std::process::exit(1);
        }
    }
}

/// Names the root typed error for the `Operation failed: <Kind> - <message>`
/// rendering, falling back to "Error" for anything not one of our own
/// error enums (HOME missing, profile lookup, etc).
fn error_kind(e: &anyhow::Error) -> &'static str {
    if e.downcast_ref::<ApiError>().is_some() {
        "ApiError"
    } else if e.downcast_ref::<TransferError>().is_some() {
        "TransferError"
    } else if e.downcast_ref::<WalkError>().is_some() {
        "WalkError"
    } else if e.downcast_ref::<ConfigError>().is_some() {
        "ConfigError"
    } else {
        "Error"
    }
}

async fn run(args: Args) -> Result<()> {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .context("HOME is not set")?;
    let config = match &args.config {
        Some(path) => config::load_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => config::load_default(&home).context("loading configuration")?,
    };
    let profile = config
        .profiles
        .get(&args.profile)
        .with_context(|| format!("profile `{}` not found in configuration", args.profile))?;

    info!(profile = %args.profile, host = %profile.host, "connecting");
    let session = Session::open(profile, config.engine.clone())
        .await
        .context("connecting to backend")?;

    match args.command {
        Command::Ls { path } => {
            let entries = session.ls(&path).await.context("ls")?;
            for fi in entries {
                println!("{:>12}  {}  {}", fi.size(), fi.type_str(), fi.abspath());
            }
        }
        Command::Mkdir { path } => {
            session.mkdir(&path).await.context("mkdir")?;
        }
        Command::Rm { path, recursive } => {
            session.rm(&path, recursive).await.context("rm")?;
        }
        Command::Mv { src, dst, overwrite } => {
            session.mv(&src, &dst, overwrite).await.context("mv")?;
        }
        Command::Put { src, target, overwrite } => {
            session.put(&src, &target, overwrite).await.context("put")?;
        }
        Command::Get { src, target, overwrite } => {
            session.get(&src, &target, overwrite).await.context("get")?;
        }
        Command::Rget { src, target, overwrite, sync } => {
            let bar = progress_bar();
            let live_bar = bar.clone();
            let outcomes = session
                .rget(
                    &src,
                    &target.to_string_lossy(),
                    overwrite,
                    sync,
                    Default::default(),
                    None,
                    move |outcome: fastdbfs_core::MirrorOutcome| live_bar.set_message(outcome.relpath),
                )
                .await
                .context("rget")?;
            report_outcomes(&bar, &outcomes);
        }
        Command::Rput { src, target, overwrite } => {
            let bar = progress_bar();
            let live_bar = bar.clone();
            let outcomes = session
                .rput(&src, &target, overwrite, move |outcome: fastdbfs_core::MirrorOutcome| {
                    live_bar.set_message(outcome.relpath)
                })
                .await
                .context("rput")?;
            report_outcomes(&bar, &outcomes);
        }
    }
    Ok(())
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar
}

fn report_outcomes(bar: &ProgressBar, outcomes: &[fastdbfs_core::MirrorOutcome]) {
    let failed = outcomes.iter().filter(|o| !o.good).count();
    bar.finish_with_message(format!("{} entries, {} failed", outcomes.len(), failed));
    for outcome in outcomes {
        if let Some(err) = &outcome.err {
            eprintln!("{}: {}", outcome.relpath, err);
        }
    }
}
