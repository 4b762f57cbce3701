//! Language server binary.
//!
//! Speaks the editor protocol over stdio; stdout belongs to the
//! transport, so all logging goes to stderr and (optionally) a file.

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tofuls_core::fsview::OsFileSystem;
use tofuls_langserver::{schemas::BundledSchemas, server, session::Session};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "tofu-ls", about = "Language server for OpenTofu configuration", version)]
struct Cli {
  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
  /// Start the language server on stdin/stdout (the default).
  Serve {
    /// Also write logs to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Override the bundled provider schema directory.
    #[arg(long)]
    schema_dir: Option<PathBuf>,
  },
}

fn init_logging(log_file: Option<&PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
  let env_filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
  let stderr_layer = tracing_subscriber::fmt::layer()
    .with_target(true)
    .with_ansi(false)
    .with_writer(std::io::stderr);

  match log_file {
    Some(path) => {
      let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
      let filename = path.file_name().map(|f| f.to_os_string()).unwrap_or_default();
      let appender = tracing_appender::rolling::never(dir, filename);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(writer);
      tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
      Some(guard)
    }
    None => {
      tracing_subscriber::registry().with(env_filter).with(stderr_layer).init();
      None
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  let (log_file, schema_dir) = match cli.command {
    Some(Command::Serve { log_file, schema_dir }) => (log_file, schema_dir),
    None => (None, None),
  };

  let _guard = init_logging(log_file.as_ref());
  tracing::info!(version = env!("CARGO_PKG_VERSION"), "tofu-ls starting");

  let fs = Arc::new(OsFileSystem);
  let bundled = match schema_dir {
    Some(root) => BundledSchemas::new(fs.clone(), root),
    None => BundledSchemas::discover(),
  };
  let registry = tofuls_registry::Client::default();

  let (session, changes) = Session::new(fs, bundled, registry);
  server::serve_stdio(session, changes).await;

  tracing::info!("tofu-ls exiting");
  Ok(())
}
