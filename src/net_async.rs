//! Tokio transport for the backup daemon and its client.
//!
//! The server accepts forever and gives every connection its own task; the client
//! opens one connection per request.

use anyhow::{bail, Context, Result};
use std::sync::Arc;

pub mod server {
    use super::*;
    use crate::session::{record, run_session, ServerContext};
    use std::net::SocketAddr;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};
    use tracing::{debug, info, warn};

    pub async fn serve(bind: &str, ctx: Arc<ServerContext>) -> Result<()> {
        let listener = TcpListener::bind(bind)
            .await
            .with_context(|| format!("bind {}", bind))?;
        serve_listener(listener, ctx).await
    }

    /// Accept loop over an already-bound listener. Runs until the process ends.
    pub async fn serve_listener(listener: TcpListener, ctx: Arc<ServerContext>) -> Result<()> {
        let local = listener.local_addr()?;
        info!(
            addr = %local,
            root = %ctx.store.root().display(),
            "filestash daemon listening"
        );
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);
            debug!(%peer, "accepted connection");
            // Spawn per-connection task, detached from the accept loop.
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                handle_connection(stream, peer, &ctx).await;
            });
        }
    }

    /// Run one session to completion, then close both directions.
    pub async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, ctx: &ServerContext) {
        let outcome = run_session(&mut stream, ctx).await;
        record(ctx, peer, &outcome);
        if let Err(e) = stream.shutdown().await {
            debug!(%peer, error = %e, "shutdown after session");
        }
    }
}

pub mod client {
    use super::*;
    use crate::protocol::{
        Operation, Status, CHUNK_SIZE, HEADER_SIZE, MAX_STORE_SIZE, SIZE_FIELD, VERSION,
    };
    use crate::protocol_core::{
        encode_request, parse_response_prefix, Reply, Request, RESPONSE_PREFIX_SIZE,
    };
    use std::path::Path;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tracing::debug;

    /// Result of a fetch request.
    #[derive(Debug, PartialEq, Eq)]
    pub enum FetchOutcome {
        Found { name: Vec<u8>, data: Vec<u8> },
        Failed(Status),
    }

    /// Result of a list request.
    #[derive(Debug, PartialEq, Eq)]
    pub enum ListOutcome {
        Listed { label: String, names: Vec<Vec<u8>> },
        Failed(Status),
    }

    #[derive(Clone, Debug)]
    pub struct BackupClient {
        addr: String,
    }

    impl BackupClient {
        pub fn new(host: &str, port: u16) -> Self {
            Self {
                addr: format!("{}:{}", host, port),
            }
        }

        pub fn from_addr(addr: std::net::SocketAddr) -> Self {
            Self {
                addr: addr.to_string(),
            }
        }

        pub fn addr(&self) -> &str {
            &self.addr
        }

        async fn connect(&self) -> Result<TcpStream> {
            let stream = TcpStream::connect(&self.addr)
                .await
                .with_context(|| format!("connect {}", self.addr))?;
            let _ = stream.set_nodelay(true);
            Ok(stream)
        }

        /// Back up `data` under `name`.
        pub async fn store(&self, uid: u32, name: &[u8], data: &[u8]) -> Result<Status> {
            let size = u32::try_from(data.len()).context("payload larger than 2^32 - 1 bytes")?;
            self.store_reader(uid, name, data, size).await
        }

        /// Back up a local file under its base name.
        pub async fn store_file(&self, uid: u32, path: &Path) -> Result<Status> {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("no usable file name in {}", path.display()))?;
            let meta = tokio::fs::metadata(path)
                .await
                .with_context(|| format!("stat {}", path.display()))?;
            if meta.len() == 0 {
                bail!("{} is empty; nothing to back up", path.display());
            }
            if meta.len() > MAX_STORE_SIZE {
                bail!("{} is too large: {} bytes", path.display(), meta.len());
            }
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("open {}", path.display()))?;
            self.store_reader(uid, name.as_bytes(), file, meta.len() as u32)
                .await
        }

        /// Back up exactly `size` bytes read from `reader`.
        pub async fn store_reader<R>(&self, uid: u32, name: &[u8], mut reader: R, size: u32) -> Result<Status>
        where
            R: AsyncRead + Unpin,
        {
            let req = build_request(uid, Operation::Store, name, Some(size))?;
            let mut first = encode_request(&req);

            // Fill the rest of the server's first receive with payload
            let room = CHUNK_SIZE.saturating_sub(first.len()).min(size as usize);
            let head_start = first.len();
            first.resize(head_start + room, 0);
            let mut filled = 0;
            while filled < room {
                let n = reader.read(&mut first[head_start + filled..]).await?;
                if n == 0 {
                    bail!("source ended after {} of {} bytes", filled, size);
                }
                filled += n;
            }

            let mut stream = self.connect().await?;
            stream.write_all(&first).await?;

            let rest = u64::from(size) - room as u64;
            let sent = send_payload(&mut stream, &mut reader, rest).await;
            // The server may answer early (e.g. size rejected) and drop the rest
            let reply = read_reply(&mut stream, Operation::Store).await;
            let _ = stream.shutdown().await;
            store_result(sent, reply)
        }

        pub async fn fetch(&self, uid: u32, name: &[u8]) -> Result<FetchOutcome> {
            let req = build_request(uid, Operation::Fetch, name, None)?;
            let mut stream = self.connect().await?;
            stream.write_all(&encode_request(&req)).await?;

            let (status, reply) = read_reply(&mut stream, Operation::Fetch).await?;
            if status != Status::Fetched {
                let _ = stream.shutdown().await;
                return Ok(FetchOutcome::Failed(status));
            }
            let mut data = vec![0u8; reply.size as usize];
            stream
                .read_exact(&mut data)
                .await
                .with_context(|| format!("payload truncated (expected {} bytes)", reply.size))?;
            let _ = stream.shutdown().await;
            Ok(FetchOutcome::Found {
                name: reply.filename,
                data,
            })
        }

        /// Fetch straight into a local file. On a non-success status nothing is written.
        pub async fn fetch_to(&self, uid: u32, name: &[u8], dest: &Path) -> Result<Status> {
            let req = build_request(uid, Operation::Fetch, name, None)?;
            let mut stream = self.connect().await?;
            stream.write_all(&encode_request(&req)).await?;

            let (status, reply) = read_reply(&mut stream, Operation::Fetch).await?;
            if status != Status::Fetched {
                let _ = stream.shutdown().await;
                return Ok(status);
            }
            let mut file = tokio::fs::File::create(dest)
                .await
                .with_context(|| format!("create {}", dest.display()))?;
            let expected = u64::from(reply.size);
            let mut limited = (&mut stream).take(expected);
            let copied = tokio::io::copy(&mut limited, &mut file).await?;
            file.flush().await?;
            let _ = stream.shutdown().await;
            if copied != expected {
                bail!("received {} of {} bytes", copied, expected);
            }
            Ok(status)
        }

        pub async fn delete(&self, uid: u32, name: &[u8]) -> Result<Status> {
            let req = build_request(uid, Operation::Delete, name, None)?;
            let mut stream = self.connect().await?;
            stream.write_all(&encode_request(&req)).await?;
            let (status, _) = read_reply(&mut stream, Operation::Delete).await?;
            let _ = stream.shutdown().await;
            Ok(status)
        }

        pub async fn list(&self, uid: u32) -> Result<ListOutcome> {
            let req = build_request(uid, Operation::List, b"", None)?;
            let mut stream = self.connect().await?;
            stream.write_all(&encode_request(&req)).await?;

            let (status, reply) = read_reply(&mut stream, Operation::List).await?;
            if status != Status::Listed {
                let _ = stream.shutdown().await;
                return Ok(ListOutcome::Failed(status));
            }
            let mut body = Vec::new();
            stream.read_to_end(&mut body).await?;
            let _ = stream.shutdown().await;

            let mut names: Vec<Vec<u8>> = body.split(|b| *b == b'\n').map(<[u8]>::to_vec).collect();
            // Every entry is newline-terminated, so the last split is empty
            if names.last().is_some_and(|n| n.is_empty()) {
                names.pop();
            }
            if names.len() != reply.size as usize {
                debug!(expected = reply.size, got = names.len(), "list entry count differs");
            }
            Ok(ListOutcome::Listed {
                label: String::from_utf8_lossy(&reply.filename).into_owned(),
                names,
            })
        }
    }

    /// The server decodes the header from its first 1024-byte receive, so the whole
    /// header has to fit in one chunk.
    fn build_request(uid: u32, op: Operation, name: &[u8], size: Option<u32>) -> Result<Request> {
        let room = CHUNK_SIZE - HEADER_SIZE - size.map_or(0, |_| SIZE_FIELD);
        if name.len() > room {
            bail!(
                "filename is {} bytes; at most {} fit in a {} request",
                name.len(),
                room,
                op
            );
        }
        Ok(Request::new(uid, op, name, size))
    }

    /// A reply wins over a send failure; when both fail, keep both errors.
    fn store_result(sent: Result<()>, reply: Result<(Status, Reply)>) -> Result<Status> {
        match (sent, reply) {
            (_, Ok((status, _))) => Ok(status),
            (Err(send), Err(read)) => Err(send.context(format!("{:#}", read))),
            (Ok(()), Err(read)) => Err(read),
        }
    }

    async fn send_payload<R>(stream: &mut TcpStream, reader: &mut R, size: u64) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = vec![0u8; CHUNK_SIZE];
        let mut sent = 0u64;
        while sent < size {
            let want = (size - sent).min(CHUNK_SIZE as u64) as usize;
            let n = reader.read(&mut chunk[..want]).await?;
            if n == 0 {
                bail!("source ended after {} of {} bytes", sent, size);
            }
            stream.write_all(&chunk[..n]).await.context("send payload")?;
            sent += n as u64;
        }
        stream.flush().await?;
        Ok(())
    }

    /// Read one response header. The size field is only on the wire for fetch and
    /// list successes.
    async fn read_reply(stream: &mut TcpStream, sent: Operation) -> Result<(Status, Reply)> {
        let mut prefix = [0u8; RESPONSE_PREFIX_SIZE];
        stream
            .read_exact(&mut prefix)
            .await
            .context("connection closed without a response")?;
        let (version, code, name_len) = parse_response_prefix(&prefix);
        if version != VERSION {
            bail!("protocol version mismatch: got {}, need {}", version, VERSION);
        }
        let status = Status::from_wire(code, sent)
            .with_context(|| format!("unknown status code {}", code))?;

        let mut filename = vec![0u8; name_len as usize];
        stream.read_exact(&mut filename).await?;

        let mut size = 0u32;
        if matches!(status, Status::Fetched | Status::Listed) {
            let mut field = [0u8; SIZE_FIELD];
            stream.read_exact(&mut field).await?;
            size = u32::from_le_bytes(field);
        }
        Ok((
            status,
            Reply {
                status: code,
                filename,
                size,
            },
        ))
    }
    #[cfg(test)]
    mod tests {
        use super::*;
        use anyhow::anyhow;

        #[test]
        fn test_build_request_name_limits() {
            let fits = vec![b'n'; CHUNK_SIZE - HEADER_SIZE - SIZE_FIELD];
            let req = build_request(1, Operation::Store, &fits, Some(1)).unwrap();
            assert_eq!(encode_request(&req).len(), CHUNK_SIZE);

            let too_long = vec![b'n'; fits.len() + 1];
            let err = build_request(1, Operation::Store, &too_long, Some(1)).unwrap_err();
            assert!(err.to_string().contains("at most 1012"));

            // Fetch and delete carry no size field
            assert!(build_request(1, Operation::Fetch, &too_long, None).is_ok());
            let huge = vec![b'n'; u16::MAX as usize + 1];
            assert!(build_request(1, Operation::Delete, &huge, None).is_err());
        }

        #[tokio::test]
        async fn test_overlong_name_fails_before_connecting() {
            // Nothing listens here; the name check must fail first
            let client = BackupClient::new("127.0.0.1", 9);
            let name = vec![b'x'; 2000];
            let err = client.fetch(1, &name).await.unwrap_err();
            assert!(err.to_string().contains("filename is 2000 bytes"));
            let err = client.store(1, &name, b"data").await.unwrap_err();
            assert!(err.to_string().contains("filename is 2000 bytes"));
        }

        #[test]
        fn test_store_result_keeps_both_errors() {
            let err = store_result(
                Err(anyhow!("send payload")),
                Err(anyhow!("connection closed without a response")),
            )
            .unwrap_err();
            let msg = format!("{:#}", err);
            assert!(msg.contains("send payload"));
            assert!(msg.contains("connection closed without a response"));

            let reply = Reply::new(Status::InternalError);
            let status = store_result(Err(anyhow!("send payload")), Ok((Status::InternalError, reply)));
            assert_eq!(status.unwrap(), Status::InternalError);
        }
    }
}
