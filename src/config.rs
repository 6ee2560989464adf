//! Bootstrap configuration: port file for the daemon, server-info file for the client.

use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::protocol::MAX_STORE_SIZE;

pub const DEFAULT_PORT_FILE: &str = "port.info";
pub const DEFAULT_SERVER_INFO: &str = "server.info";

/// Settings every session reads.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Directory holding one subdirectory per client id
    pub root: PathBuf,
    /// Largest payload a store request may declare
    pub max_store_size: u64,
}

impl ServerConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_store_size: MAX_STORE_SIZE,
        }
    }
}

/// Parse the first line of a port file.
pub fn parse_port(text: &str) -> Result<u16> {
    let line = text.lines().next().unwrap_or("").trim();
    if line.is_empty() {
        bail!("port file is empty");
    }
    let port: u16 = line
        .parse()
        .map_err(|e| anyhow!("invalid port {:?}: {}", line, e))?;
    if port == 0 {
        bail!("port 0 is not a valid listening port");
    }
    Ok(port)
}

/// Read the listening port from `path`. Missing or unparsable content is fatal.
pub fn read_port_file(path: &Path) -> Result<u16> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("{} doesn't exist or can't be read", path.display()))?;
    parse_port(&text).with_context(|| format!("bad port file {}", path.display()))
}

/// Parse `host:port` from the first line of a server-info file.
pub fn parse_server_info(text: &str) -> Result<(String, u16)> {
    let line = text.lines().next().unwrap_or("").trim();
    let (host, port) = line
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("expected host:port, got {:?}", line))?;
    if host.is_empty() {
        bail!("missing host in {:?}", line);
    }
    Ok((host.to_string(), parse_port(port)?))
}

pub fn read_server_info(path: &Path) -> Result<(String, u16)> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_server_info(&text).with_context(|| format!("bad server info file {}", path.display()))
}
