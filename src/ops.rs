//! Operation handlers: store, fetch, delete, list.
//!
//! Each handler owns the rest of the connection once dispatched: it reads any payload,
//! consults the [`ClientStore`], writes its own response header (and payload for fetch
//! and list), and returns the status it ended with. Failures never escape a handler.
//! Once a success header is on the wire a later failure can only close the
//! connection, so the returned status is then for the server log only.

use anyhow::{bail, Context, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::protocol::{Status, CHUNK_SIZE, LIST_NAME_EXT, LIST_NAME_RANDOM_LEN};
use crate::protocol_core::{encode_response, Reply, Request};
use crate::store::ClientStore;

/// What a handler finished with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handled {
    pub status: Status,
    /// Payload bytes moved (received for store, sent for fetch/list)
    pub bytes: u64,
}

impl Handled {
    fn status(status: Status) -> Self {
        Self { status, bytes: 0 }
    }
}

pub(crate) async fn send_reply<S>(stream: &mut S, reply: &Reply) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&encode_response(reply)).await?;
    stream.flush().await
}

/// Write a header-only response and hand back `status`.
async fn reply_with<S>(stream: &mut S, status: Status, filename: Option<&[u8]>) -> Handled
where
    S: AsyncWrite + Unpin,
{
    let mut reply = Reply::new(status);
    if let Some(name) = filename {
        reply = reply.with_filename(name);
    }
    if let Err(e) = send_reply(stream, &reply).await {
        warn!(status = status.code(), error = %e, "failed to send response");
    }
    Handled::status(status)
}

/// Store: receive `req.size` bytes into `<client dir>/<filename>`.
///
/// `early` holds payload bytes that arrived together with the header.
pub async fn store<S>(
    stream: &mut S,
    store: &ClientStore,
    req: &Request,
    early: &[u8],
    max_size: u64,
) -> Handled
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let uid = req.client_id;
    let name = req.filename.as_slice();
    let declared = req.size.unwrap_or(0);
    info!(uid, file = %req.filename_lossy(), declared, "backing up");

    if u64::from(declared) > max_size {
        warn!(uid, declared, max_size, "declared size exceeds limit");
        return reply_with(stream, Status::InternalError, None).await;
    }

    let path = match store.file_path(uid, name) {
        Ok(p) => p,
        Err(e) => {
            warn!(uid, error = %e, "refusing store");
            return reply_with(stream, Status::InternalError, None).await;
        }
    };

    if let Err(e) = store.ensure_client_dir(uid).await {
        warn!(uid, error = %e, "cannot open client directory");
        return reply_with(stream, Status::InternalError, None).await;
    }

    match receive_to_file(stream, &path, declared, early).await {
        Ok(received) => {
            debug!(uid, received, path = %path.display(), "stored");
            let mut handled = reply_with(stream, Status::Stored, Some(name)).await;
            handled.bytes = received;
            handled
        }
        Err(e) => {
            warn!(uid, error = %e, "store failed");
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                debug!(path = %path.display(), error = %rm, "partial file not removed");
            }
            reply_with(stream, Status::InternalError, Some(name)).await
        }
    }
}

async fn receive_to_file<S>(stream: &mut S, path: &Path, declared: u32, early: &[u8]) -> Result<u64>
where
    S: AsyncRead + Unpin,
{
    let declared = u64::from(declared);
    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("create {}", path.display()))?;

    let mut received = early.len() as u64;
    if !early.is_empty() {
        file.write_all(early).await?;
    }

    let mut chunk = vec![0u8; CHUNK_SIZE];
    while received < declared {
        let n = stream.read(&mut chunk).await.context("receive payload")?;
        if n == 0 {
            bail!("end of stream after {} of {} bytes", received, declared);
        }
        file.write_all(&chunk[..n]).await?;
        received += n as u64;
    }
    file.flush().await?;

    if received != declared {
        bail!("received {} bytes, declared {}", received, declared);
    }
    Ok(received)
}

/// Fetch: send the file back as header + raw payload.
pub async fn fetch<S>(stream: &mut S, store: &ClientStore, req: &Request) -> Handled
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let uid = req.client_id;
    let name = req.filename.as_slice();
    info!(uid, file = %req.filename_lossy(), "retrieving");

    if !store.client_dir_exists(uid).await {
        debug!(uid, "no files stored for client");
        return reply_with(stream, Status::NoContent, None).await;
    }

    let path = match store.file_path(uid, name) {
        Ok(p) => p,
        Err(e) => {
            warn!(uid, error = %e, "refusing fetch");
            return reply_with(stream, Status::FileNotFound, Some(name)).await;
        }
    };

    let size = match store.file_size(&path).await {
        Ok(Some(0)) | Ok(None) => {
            debug!(uid, path = %path.display(), "missing or empty");
            return reply_with(stream, Status::FileNotFound, Some(name)).await;
        }
        Ok(Some(n)) => n,
        Err(e) => {
            warn!(uid, error = %e, "cannot stat file");
            return reply_with(stream, Status::InternalError, Some(name)).await;
        }
    };
    let Ok(wire_size) = u32::try_from(size) else {
        warn!(uid, size, "file too large for protocol size field");
        return reply_with(stream, Status::InternalError, Some(name)).await;
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) => {
            warn!(uid, error = %e, "cannot open file");
            return reply_with(stream, Status::InternalError, Some(name)).await;
        }
    };

    let header = Reply::new(Status::Fetched)
        .with_filename(name)
        .with_size(wire_size);
    if let Err(e) = send_reply(stream, &header).await {
        warn!(uid, error = %e, "failed to send fetch header");
        return Handled::status(Status::InternalError);
    }

    // Header is out: failures from here on only end the connection
    match send_file(stream, file, size).await {
        Ok(sent) => {
            debug!(uid, sent, "fetch complete");
            Handled {
                status: Status::Fetched,
                bytes: sent,
            }
        }
        Err(e) => {
            warn!(uid, error = %e, "fetch aborted after header");
            Handled::status(Status::InternalError)
        }
    }
}

async fn send_file<S>(stream: &mut S, mut file: tokio::fs::File, size: u64) -> Result<u64>
where
    S: AsyncWrite + Unpin,
{
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut sent = 0u64;
    while sent < size {
        let want = (size - sent).min(CHUNK_SIZE as u64) as usize;
        let n = file.read(&mut chunk[..want]).await.context("read file")?;
        if n == 0 {
            bail!("file ended after {} of {} bytes", sent, size);
        }
        // Only the bytes read this round
        stream.write_all(&chunk[..n]).await.context("send payload")?;
        sent += n as u64;
    }
    stream.flush().await?;
    Ok(sent)
}

/// Delete: remove one file from the client directory.
pub async fn delete<S>(stream: &mut S, store: &ClientStore, req: &Request) -> Handled
where
    S: AsyncWrite + Unpin,
{
    let uid = req.client_id;
    let name = req.filename.as_slice();
    info!(uid, file = %req.filename_lossy(), "erasing");

    if !store.client_dir_exists(uid).await {
        return reply_with(stream, Status::NoContent, None).await;
    }

    let path = match store.file_path(uid, name) {
        Ok(p) => p,
        Err(e) => {
            warn!(uid, error = %e, "refusing delete");
            return reply_with(stream, Status::FileNotFound, Some(name)).await;
        }
    };

    match store.file_size(&path).await {
        Ok(Some(_)) => {}
        Ok(None) => return reply_with(stream, Status::FileNotFound, Some(name)).await,
        Err(e) => {
            warn!(uid, error = %e, "cannot stat file");
            return reply_with(stream, Status::InternalError, Some(name)).await;
        }
    }

    let status = match store.remove_file(&path).await {
        Ok(()) => Status::Erased,
        Err(e) => {
            warn!(uid, error = %e, "remove failed");
            Status::InternalError
        }
    };
    reply_with(stream, status, Some(name)).await
}

/// Random label for the listing payload, e.g. `Xa3...9Q.txt`.
pub fn listing_name() -> String {
    let mut name: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(LIST_NAME_RANDOM_LEN)
        .map(char::from)
        .collect();
    name.push_str(LIST_NAME_EXT);
    name
}

/// List: header with the entry count, then one newline-terminated name per entry.
pub async fn list<S>(stream: &mut S, store: &ClientStore, req: &Request) -> Handled
where
    S: AsyncWrite + Unpin,
{
    let uid = req.client_id;
    info!(uid, "listing backups");

    if !store.client_dir_exists(uid).await {
        return reply_with(stream, Status::NoContent, None).await;
    }

    let names = match store.list_names(uid).await {
        Ok(names) => names,
        Err(e) => {
            warn!(uid, error = %e, "cannot read client directory");
            return reply_with(stream, Status::InternalError, None).await;
        }
    };
    if names.is_empty() {
        debug!(uid, "client directory is empty");
        return reply_with(stream, Status::NoContent, None).await;
    }
    let Ok(count) = u32::try_from(names.len()) else {
        return reply_with(stream, Status::InternalError, None).await;
    };

    let label = listing_name();
    let header = Reply::new(Status::Listed)
        .with_filename(label.as_bytes())
        .with_size(count);
    if let Err(e) = send_reply(stream, &header).await {
        warn!(uid, error = %e, "failed to send list header");
        return Handled::status(Status::InternalError);
    }

    let mut sent = 0u64;
    for name in &names {
        let mut line = Vec::with_capacity(name.len() + 1);
        line.extend_from_slice(name);
        line.push(b'\n');
        if let Err(e) = stream.write_all(&line).await {
            warn!(uid, sent, error = %e, "list aborted after header");
            return Handled {
                status: Status::InternalError,
                bytes: sent,
            };
        }
        sent += line.len() as u64;
    }
    if let Err(e) = stream.flush().await {
        warn!(uid, error = %e, "list flush failed");
    }
    debug!(uid, entries = count, label = %label, "list sent");
    Handled {
        status: Status::Listed,
        bytes: sent,
    }
}
