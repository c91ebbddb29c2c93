//! Command-line arguments.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `kiln`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "kiln",
    version,
    about = "Compile, serve, bundle and publish a static site.",
    long_about = None
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Project directory.
    #[arg(long, global = true, value_name = "PATH", default_value = ".")]
    pub root: Utf8PathBuf,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `KILN_LOG` or `info` is used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Print the task graph of the command instead of running it.
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Remove the staging and artifact trees.
    Clean,
    /// Style-check the scripts, failing on any violation.
    Lint,
    /// Compile once, then serve with watch and live reload.
    Start {
        /// Port of the dev server.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Serve with watch and live reload, without compiling first.
    Serve {
        /// Port of the dev server.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Clean, compile and bundle into the artifact tree.
    Build,
    /// Build, then publish the artifact tree.
    Deploy {
        /// Target branch.
        #[arg(long, value_name = "NAME")]
        branch: Option<String>,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
