#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod bundle;
pub mod cli;
pub mod config;
pub mod data;
pub mod deploy;
mod error;
mod io;
pub mod logging;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod task;
pub mod transform;
pub mod watch;

use std::sync::Arc;
use std::sync::mpsc::channel;
use std::time::Instant;

use console::style;

pub use crate::error::*;
pub use crate::io::{Matched, as_overhead, expand};
use crate::cli::{CliArgs, Command};
use crate::config::Config;
use crate::data::SiteData;
use crate::deploy::GitPublisher;
use crate::pipeline::Project;
use crate::session::Session;
use crate::task::{TaskNode, series};
use crate::transform::TransformRegistry;

/// High-level entry point used by `main.rs`: loads the project at
/// `args.root` and runs the requested command.
pub fn run(args: CliArgs) -> Result<(), KilnError> {
    let root = args
        .root
        .canonicalize_utf8()
        .map_err(|source| ConfigError::Read {
            path: args.root.clone(),
            source,
        })?;

    let mut config = Config::load(&root)?;
    if let Command::Start { port: Some(port) } | Command::Serve { port: Some(port) } =
        args.command
    {
        config.server.port = port;
    }

    let data = SiteData::load(&root, config.site.menus.clone())?;
    let project = Project::new(config, TransformRegistry::builtin(), data);

    let node = graph(&project, &args.command);
    let serves = matches!(args.command, Command::Start { .. } | Command::Serve { .. });

    if args.dry_run {
        println!("{node}");
        if serves {
            println!("then serve on port {}", project.config().server.port);
        }
        return Ok(());
    }

    let start = Instant::now();
    node.run()?;
    tracing::info!("{} {}", style("done").green(), as_overhead(start));

    if serves {
        serve(&project)?;
    }

    Ok(())
}

/// The task graph behind each command.
fn graph(project: &Project, command: &Command) -> TaskNode {
    match command {
        Command::Clean => project.clean().into(),
        Command::Lint => project.lint().into(),
        Command::Start { .. } => project.compile(),
        Command::Serve { .. } => series(Vec::<TaskNode>::new()),
        Command::Build => project.build(),
        Command::Deploy { branch } => {
            let config = project.config();
            let publisher = GitPublisher {
                repo: config.root.clone(),
                remote: config.deploy.remote.clone(),
                cache_dir: config.deploy.cache_dir.clone(),
                message: config.deploy.message.clone(),
            };
            let branch = branch.clone().unwrap_or_else(|| config.deploy.branch.clone());
            project.deploy(Arc::new(publisher), branch)
        }
    }
}

/// Serves until the process is interrupted.
fn serve(project: &Project) -> Result<(), KilnError> {
    let session = Session::start(project)?;

    let (tx, rx) = channel();
    ctrlc::set_handler(move || {
        tx.send(()).ok();
    })?;

    tracing::info!("watching for changes, press Ctrl-C to stop");
    rx.recv().ok();

    tracing::info!("shutting down");
    drop(session);
    Ok(())
}
