//! Filestash client: one request per connection against a filestashd server.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use filestash::cli::{ClientCommand, ClientOpts};
use filestash::config::{parse_server_info, read_server_info};
use filestash::net_async::client::{BackupClient, FetchOutcome, ListOutcome};
use filestash::protocol::Status;

fn main() -> Result<()> {
    let opts = ClientOpts::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("filestash=warn")),
        )
        .init();

    let (host, port) = match &opts.server {
        Some(addr) => parse_server_info(addr)?,
        None => read_server_info(&opts.server_info)?,
    };
    let uid = opts.uid.unwrap_or_else(rand::random::<u32>);
    println!("Client id: {}", uid);

    let client = BackupClient::new(&host, port);
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(run(&client, uid, opts.command))
}

async fn run(client: &BackupClient, uid: u32, command: ClientCommand) -> Result<()> {
    match command {
        ClientCommand::Backup { files } => {
            let mut failed = 0usize;
            for path in &files {
                match client.store_file(uid, path).await {
                    Ok(Status::Stored) => println!("Backed up {}", path.display()),
                    Ok(status) => {
                        failed += 1;
                        eprintln!("Error while backing up {}: {}", path.display(), status);
                    }
                    Err(e) => {
                        failed += 1;
                        eprintln!("Error while backing up {}: {:#}", path.display(), e);
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} backups failed", failed, files.len());
            }
        }
        ClientCommand::Get { name, save_as } => {
            let dest = save_as.unwrap_or_else(|| PathBuf::from(&name));
            match client.fetch(uid, name.as_bytes()).await? {
                FetchOutcome::Found { data, .. } => {
                    tokio::fs::write(&dest, &data)
                        .await
                        .with_context(|| format!("write {}", dest.display()))?;
                    println!("Received {} ({} bytes) -> {}", name, data.len(), dest.display());
                }
                FetchOutcome::Failed(status) => bail!("Can't get {}: {}", name, status),
            }
        }
        ClientCommand::Delete { name } => match client.delete(uid, name.as_bytes()).await? {
            Status::Erased => println!("Erased {}", name),
            status => bail!("Can't erase {}: {}", name, status),
        },
        ClientCommand::List => match client.list(uid).await? {
            ListOutcome::Listed { label, names } => {
                println!("Backed up files ({}, {} entries):", label, names.len());
                for name in names {
                    println!("{}", String::from_utf8_lossy(&name));
                }
            }
            ListOutcome::Failed(Status::NoContent) => println!("No files backed up"),
            ListOutcome::Failed(status) => bail!("Can't list backups: {}", status),
        },
    }
    Ok(())
}
