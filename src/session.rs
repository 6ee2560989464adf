//! One request per connection.
//!
//! A session reads a single datagram, decodes and validates the header, routes the
//! request to its handler, and ends. Malformed requests get no response at all.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::SessionError;
use crate::logger::{Logger, NoopLogger};
use crate::ops::{self, Handled};
use crate::protocol::{Operation, CHUNK_SIZE};
use crate::protocol_core::{decode_request, validate};
use crate::registry::KnownClients;
use crate::store::ClientStore;

/// State shared by every session of a running server.
pub struct ServerContext {
    pub store: ClientStore,
    pub clients: KnownClients,
    pub logger: Arc<dyn Logger>,
    pub max_store_size: u64,
}

impl ServerContext {
    pub fn new(config: &ServerConfig, logger: Arc<dyn Logger>) -> Self {
        Self {
            store: ClientStore::new(config.root.clone()),
            clients: KnownClients::new(),
            logger,
            max_store_size: config.max_store_size,
        }
    }

    /// Context with defaults and no audit log, rooted at `root`.
    pub fn with_root(root: impl Into<std::path::PathBuf>) -> Self {
        Self::new(&ServerConfig::new(root), Arc::new(NoopLogger))
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// Dispatched; a response was attempted
    Handled {
        uid: u32,
        op: Operation,
        result: Handled,
    },
    /// Aborted before dispatch; nothing was sent
    Rejected(SessionError),
}

/// Drive one session over `stream`. The caller closes the connection afterwards.
pub async fn run_session<S>(stream: &mut S, ctx: &ServerContext) -> SessionOutcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match dispatch(stream, ctx).await {
        Ok(outcome) => outcome,
        Err(e) => SessionOutcome::Rejected(e),
    }
}

async fn dispatch<S>(stream: &mut S, ctx: &ServerContext) -> Result<SessionOutcome, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // The whole header must arrive in this first receive
    let mut datagram = vec![0u8; CHUNK_SIZE];
    let n = stream.read(&mut datagram).await?;
    if n == 0 {
        return Err(SessionError::EmptyConnection);
    }
    let datagram = &datagram[..n];

    let (req, consumed) = decode_request(datagram)?;
    if ctx.clients.observe(req.client_id) {
        info!(uid = req.client_id, known = ctx.clients.len(), "new client");
    }

    let op = validate(&req)?;
    debug!(uid = req.client_id, op = %op, "request validated");

    let result = match op {
        Operation::Store => {
            let early = &datagram[consumed..];
            ops::store(stream, &ctx.store, &req, early, ctx.max_store_size).await
        }
        Operation::Fetch => ops::fetch(stream, &ctx.store, &req).await,
        Operation::Delete => ops::delete(stream, &ctx.store, &req).await,
        Operation::List => ops::list(stream, &ctx.store, &req).await,
    };

    Ok(SessionOutcome::Handled {
        uid: req.client_id,
        op,
        result,
    })
}

/// Log a finished session to the console and the audit sink.
pub fn record(ctx: &ServerContext, peer: SocketAddr, outcome: &SessionOutcome) {
    match outcome {
        SessionOutcome::Handled { uid, op, result } => {
            info!(
                %peer,
                uid,
                op = %op,
                status = result.status.code(),
                bytes = result.bytes,
                "session ended with status {}",
                result.status
            );
            ctx.logger.handled(peer, *uid, *op, result.status, result.bytes);
        }
        SessionOutcome::Rejected(err) => {
            warn!(%peer, reason = err.kind(), "request rejected: {}", err);
            ctx.logger.rejected(peer, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Status, VERSION};
    use crate::protocol_core::{decode_response, encode_request, Request};
    use tempfile::TempDir;
    use tokio::io::{duplex, AsyncWriteExt};

    async fn session_with(ctx: &ServerContext, input: Vec<u8>) -> (SessionOutcome, Vec<u8>) {
        let (mut client, mut server) = duplex(64 * 1024);
        client.write_all(&input).await.unwrap();
        let outcome = run_session(&mut server, ctx).await;
        drop(server);
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        (outcome, out)
    }

    #[tokio::test]
    async fn test_store_with_coalesced_payload() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = ServerContext::with_root(temp_dir.path());

        let mut wire = encode_request(&Request::new(5, Operation::Store, b"hello.txt", Some(11)));
        wire.extend_from_slice(b"hello world");
        let (outcome, out) = session_with(&ctx, wire).await;

        match outcome {
            SessionOutcome::Handled { uid, op, result } => {
                assert_eq!(uid, 5);
                assert_eq!(op, Operation::Store);
                assert_eq!(result.status, Status::Stored);
                assert_eq!(result.bytes, 11);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let (_, reply) = decode_response(&out).unwrap();
        assert_eq!(reply.status, 212);
        assert_eq!(
            std::fs::read(temp_dir.path().join("5/hello.txt")).unwrap(),
            b"hello world"
        );
        assert!(ctx.clients.contains(5));
    }

    #[tokio::test]
    async fn test_rejections_send_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = ServerContext::with_root(temp_dir.path());

        let mut bad_version = Request::new(1, Operation::List, b"", None);
        bad_version.version = VERSION + 1;
        let mut bad_op = Request::new(2, Operation::List, b"", None);
        bad_op.op = 150;
        // Declares more filename bytes than were sent
        let mut bad_len = Request::new(3, Operation::Fetch, b"abc", None);
        bad_len.name_len = 10;

        for req in [bad_version, bad_op, bad_len] {
            let (outcome, out) = session_with(&ctx, encode_request(&req)).await;
            assert!(matches!(outcome, SessionOutcome::Rejected(_)));
            assert!(out.is_empty());
        }
        // Seen, even though rejected
        assert_eq!(ctx.clients.len(), 3);
        // Nothing was created on disk
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_declared_length_shorter_than_sent_name() {
        // name_len=2 but 3 name bytes follow: the third byte is not part of the
        // filename, so this decodes as "ab" and is dispatched as a fetch of "ab".
        let temp_dir = TempDir::new().unwrap();
        let ctx = ServerContext::with_root(temp_dir.path());
        let mut req = Request::new(3, Operation::Fetch, b"abc", None);
        req.name_len = 2;
        let (outcome, _) = session_with(&ctx, encode_request(&req)).await;
        assert!(matches!(
            outcome,
            SessionOutcome::Handled {
                op: Operation::Fetch,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_store_without_size_field_is_empty_store() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = ServerContext::with_root(temp_dir.path());

        let wire = encode_request(&Request::new(1, Operation::Store, b"abc", None));
        let (outcome, out) = session_with(&ctx, wire).await;
        match outcome {
            SessionOutcome::Handled { op, result, .. } => {
                assert_eq!(op, Operation::Store);
                assert_eq!(result.status, Status::Stored);
                assert_eq!(result.bytes, 0);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let (_, reply) = decode_response(&out).unwrap();
        assert_eq!(reply.status, 212);
        assert_eq!(reply.filename, b"abc");
        assert_eq!(std::fs::read(temp_dir.path().join("1/abc")).unwrap(), b"");
    }

    #[tokio::test]
    async fn test_truncated_header_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = ServerContext::with_root(temp_dir.path());
        let (outcome, out) = session_with(&ctx, vec![1, 0, 0]).await;
        assert!(matches!(
            outcome,
            SessionOutcome::Rejected(SessionError::Truncated { .. })
        ));
        assert!(out.is_empty());
        assert!(ctx.clients.is_empty());
    }
}
