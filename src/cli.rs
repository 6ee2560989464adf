//! Shared CLI helpers and small reusable Clap fragments

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{DEFAULT_PORT_FILE, DEFAULT_SERVER_INFO};
use crate::protocol::MAX_STORE_SIZE;

/// Daemon options used by filestashd
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Filestash backup daemon")]
pub struct DaemonOpts {
    /// File whose first line is the listening port
    #[arg(long, default_value = DEFAULT_PORT_FILE)]
    pub port_file: PathBuf,

    /// Listening port (overrides --port-file)
    #[arg(long)]
    pub port: Option<u16>,

    /// Interface to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Storage root; one subdirectory per client id
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Largest payload a store request may declare (bytes)
    #[arg(long, default_value_t = MAX_STORE_SIZE)]
    pub max_file_size: u64,

    /// Append one line per session to this file
    #[arg(long)]
    pub audit_log: Option<PathBuf>,

    /// Debug-level console logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Client options used by the filestash binary
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Filestash backup client")]
pub struct ClientOpts {
    /// Server as host:port (overrides --server-info)
    #[arg(long)]
    pub server: Option<String>,

    /// File whose first line is host:port
    #[arg(long, default_value = DEFAULT_SERVER_INFO)]
    pub server_info: PathBuf,

    /// Client id (random when omitted)
    #[arg(long)]
    pub uid: Option<u32>,

    #[command(subcommand)]
    pub command: ClientCommand,
}

#[derive(Clone, Debug, Subcommand)]
pub enum ClientCommand {
    /// Back up local files
    Backup {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Download a backed-up file
    Get {
        name: String,
        /// Local destination (defaults to the same name)
        #[arg(long)]
        save_as: Option<PathBuf>,
    },
    /// Erase a backed-up file
    Delete { name: String },
    /// List backed-up files
    List,
}
