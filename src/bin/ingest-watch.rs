//! ingest-watch - recursive directory watcher feeding an ingestion command
//!
//! Watches a directory tree and runs the configured handler for every new file.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use ingest_watch::{
    logging, CommandHandler, Dispatcher, IngestHandler, Inotify, LogHandler, Settings,
};
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser, Debug)]
#[command(name = "ingest-watch")]
#[command(version)]
#[command(about = "Watch a directory tree and hand new files to an ingestion command", long_about = None)]
struct Args {
    /// Directory to watch recursively
    #[arg(value_name = "PATH")]
    path: Option<PathBuf>,

    /// Configuration file (default: ./ingest-watch.toml if present)
    #[arg(short = 'c', long = "config", value_name = "FILE", env = "INGEST_WATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Prefix for the path passed to the handler instead of PATH
    #[arg(short = 'b', long = "base", value_name = "DIR")]
    base: Option<PathBuf>,

    /// Zero-based path component passed to the handler as the root token
    #[arg(short = 't', long = "token-component", value_name = "N")]
    token_component: Option<usize>,

    /// Program to run for each new file (receives ARGS..., token, path)
    #[arg(short = 'x', long = "exec", value_name = "PROGRAM")]
    exec: Option<String>,

    /// Argument passed to the program before token and path (repeatable)
    #[arg(short = 'a', long = "arg", value_name = "ARG", allow_hyphen_values = true)]
    args: Vec<String>,

    /// Only watch directories created after startup
    #[arg(long = "no-scan")]
    no_scan: bool,

    /// Default log level (overridden by RUST_LOG)
    #[arg(short = 'l', long = "log-level", value_name = "LEVEL")]
    log_level: Option<String>,

    /// Quiet mode (warnings and errors only)
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

impl Args {
    fn apply(self, settings: &mut Settings) {
        if let Some(path) = self.path {
            settings.watch.root = path;
        }
        if let Some(base) = self.base {
            settings.watch.base = Some(base);
        }
        if let Some(index) = self.token_component {
            settings.watch.token_component = index;
        }
        if let Some(program) = self.exec {
            settings.handler.program = Some(program);
            settings.handler.args = self.args;
        } else if !self.args.is_empty() {
            settings.handler.args = self.args;
        }
        if self.no_scan {
            settings.watch.scan_existing = false;
        }
        if let Some(level) = self.log_level {
            settings.logging.default = level;
        }
        if self.quiet {
            settings.logging.default = "warn".to_string();
        }
    }
}

async fn shutdown_signal() -> anyhow::Result<&'static str> {
    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("listening for Ctrl-C")?;
            Ok("interrupt")
        }
        _ = terminate.recv() => Ok("terminate"),
    }
}

async fn serve<H: IngestHandler>(settings: &Settings, handler: H) -> anyhow::Result<()> {
    let inotify = Inotify::new().context("cannot start watching")?;
    let mut dispatcher = Dispatcher::new(inotify, handler, settings.dispatch_options());
    dispatcher
        .watch_root()
        .with_context(|| format!("cannot watch {}", settings.watch.root.display()))?;

    let reason = tokio::select! {
        _ = dispatcher.run() => None,
        reason = shutdown_signal() => Some(reason?),
    };
    if let Some(reason) = reason {
        tracing::info!(
            "[main] received {}, releasing {} watches",
            reason,
            dispatcher.registry().len()
        );
    }

    // Dropping the dispatcher closes the inotify descriptor and its watches
    drop(dispatcher);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref()).context("loading configuration")?;
    args.apply(&mut settings);
    let settings = settings.validate()?;

    logging::init_with_config(&settings.logging);

    tracing::info!("[main] watching {}", settings.watch.root.display());
    if let Some(base) = &settings.watch.base {
        tracing::info!("[main] handler paths rebased onto {}", base.display());
    }
    tracing::info!("[main] root token component: {}", settings.watch.token_component);

    match settings.handler.program.clone() {
        Some(program) => {
            tracing::info!("[main] handler: {} {:?}", program, settings.handler.args);
            let handler = CommandHandler::new(program).args(settings.handler.args.clone());
            serve(&settings, handler).await
        }
        None => {
            tracing::warn!("[main] no handler program configured, new files are only logged");
            serve(&settings, LogHandler).await
        }
    }
}
