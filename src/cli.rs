//! CLI argument definitions using clap derive macros.
//!
//! This binary is a thin, non-interactive front end over
//! [`fastdbfs_core::session::Session`] — one subcommand per public
//! operation. The interactive shell itself (command history, `!shell`,
//! pagers/editors) is out of scope for this crate; see `SPEC_FULL.md`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Non-interactive front end for the DBFS transfer engine.
#[derive(Parser, Debug)]
#[command(name = "fastdbfs")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Config profile to connect with.
    #[arg(short, long, default_value = "DEFAULT")]
    pub profile: String,

    /// Path to an explicit config file, bypassing the default search path.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List a remote path.
    Ls { path: String },
    /// Create a remote directory.
    Mkdir { path: String },
    /// Remove a remote path.
    Rm {
        path: String,
        #[arg(short = 'R', long)]
        recursive: bool,
    },
    /// Move/rename a remote path.
    Mv {
        src: String,
        dst: String,
        #[arg(short, long)]
        overwrite: bool,
    },
    /// Upload a single local file.
    Put {
        src: PathBuf,
        target: String,
        #[arg(short, long)]
        overwrite: bool,
    },
    /// Download a single remote file.
    Get {
        src: String,
        target: PathBuf,
        #[arg(short, long)]
        overwrite: bool,
    },
    /// Recursively download a remote tree.
    Rget {
        src: String,
        target: PathBuf,
        #[arg(short, long)]
        overwrite: bool,
        #[arg(long)]
        sync: bool,
    },
    /// Recursively upload a local tree.
    Rput {
        src: PathBuf,
        target: String,
        #[arg(short, long)]
        overwrite: bool,
    },
}
