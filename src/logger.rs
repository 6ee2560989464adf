use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex;

use crate::error::SessionError;
use crate::protocol::{Operation, Status};

/// Per-session audit sink. Console output goes through `tracing`; this records one
/// line per finished session.
pub trait Logger: Send + Sync {
    fn handled(&self, _peer: SocketAddr, _uid: u32, _op: Operation, _status: Status, _bytes: u64) {}
    fn rejected(&self, _peer: SocketAddr, _err: &SessionError) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn handled(&self, peer: SocketAddr, uid: u32, op: Operation, status: Status, bytes: u64) {
        self.line(&format!(
            "SESSION peer={} uid={} op={} status={} bytes={}",
            peer,
            uid,
            op,
            status.code(),
            bytes
        ));
    }
    fn rejected(&self, peer: SocketAddr, err: &SessionError) {
        self.line(&format!("REJECT peer={} reason={} msg={}", peer, err.kind(), err));
    }
}
