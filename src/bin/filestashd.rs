use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use filestash::cli::DaemonOpts;
use filestash::config::{read_port_file, ServerConfig};
use filestash::logger::{Logger, NoopLogger, TextLogger};
use filestash::session::ServerContext;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();

    let default_level = if opts.verbose { "filestash=debug" } else { "filestash=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let port = match opts.port {
        Some(p) => p,
        None => read_port_file(&opts.port_file)?,
    };

    // Validate root directory exists and is a directory
    if !opts.root.is_dir() {
        anyhow::bail!("Root path is not a directory: {}", opts.root.display());
    }
    let canonical_root = std::fs::canonicalize(&opts.root)
        .with_context(|| format!("Failed to canonicalize root path: {}", opts.root.display()))?;

    let logger: Arc<dyn Logger> = match &opts.audit_log {
        Some(path) => Arc::new(
            TextLogger::new(path)
                .with_context(|| format!("Failed to open audit log: {}", path.display()))?,
        ),
        None => Arc::new(NoopLogger),
    };

    let mut config = ServerConfig::new(canonical_root);
    config.max_store_size = opts.max_file_size;
    let ctx = Arc::new(ServerContext::new(&config, logger));
    let bind = format!("{}:{}", opts.host, port);

    info!(root = %config.root.display(), bind = %bind, "starting backup server");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(filestash::net_async::server::serve(&bind, ctx))
}
