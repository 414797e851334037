//! Multiplexing FBM client.
//!
//! Wraps one negotiated WebSocket and multiplexes concurrent requests over
//! it: every request gets a fresh positive message id, responses are
//! matched back to their waiter through the pending map, and arrival order
//! on the wire does not matter.
//!
//! Architecture follows the split-pump socket actor: one task drains the
//! outbound mailbox into the sink, one task reads frames and completes
//! waiters. Dropping the client (or any transport error) cancels both and
//! fails every in-flight request locally.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{FbmError, Result};
use crate::frame::{self, FrameLimits, Request, Response};
use crate::header::{Action, Status};

/// The stream type produced by a negotiated outbound connection.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default deadline for synchronous requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A connected cache client. Cheap to share; all methods take `&self`.
pub struct FbmClient {
    next_id: AtomicU32,
    pending: DashMap<u32, oneshot::Sender<Response>>,
    out_tx: flume::Sender<Message>,
    limits: FrameLimits,
    closed: CancellationToken,
}

impl std::fmt::Debug for FbmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FbmClient")
            .field("next_id", &self.next_id)
            .field("pending", &self.pending.len())
            .field("limits", &self.limits)
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

impl FbmClient {
    /// Take ownership of a negotiated WebSocket and start the pump tasks.
    pub fn start(stream: WsStream, limits: FrameLimits) -> Arc<Self> {
        let (out_tx, out_rx) = flume::unbounded::<Message>();
        let closed = CancellationToken::new();

        let client = Arc::new(Self {
            next_id: AtomicU32::new(1),
            pending: DashMap::new(),
            out_tx,
            limits,
            closed: closed.clone(),
        });

        let (mut sink, mut source) = stream.split();

        // Write pump: mailbox -> socket.
        let write_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = write_closed.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    msg = out_rx.recv_async() => match msg {
                        Ok(m) => {
                            if let Err(e) = sink.send(m).await {
                                debug!(error = %e, "client write failed");
                                write_closed.cancel();
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
            }
        });

        // Read pump: socket -> pending waiters.
        let reader = Arc::clone(&client);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = reader.closed.cancelled() => break,
                    next = source.next() => match next {
                        Some(Ok(Message::Binary(buf))) => reader.dispatch(buf),
                        Some(Ok(Message::Close(_))) | None => {
                            reader.closed.cancel();
                            break;
                        }
                        // Pings are answered by the WebSocket stack.
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(error = %e, "client read failed");
                            reader.closed.cancel();
                            break;
                        }
                    }
                }
            }
            // Dropping the senders wakes every waiter with an error.
            reader.pending.clear();
        });

        client
    }

    /// The limits this connection was negotiated with.
    #[must_use]
    pub const fn limits(&self) -> &FrameLimits {
        &self.limits
    }

    /// True once the connection is unusable.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Close the connection and fail all in-flight requests.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Issue a raw request and wait for its response. `deadline` of `None`
    /// waits until the response arrives or the connection dies. Used by
    /// change-dequeue, which blocks by design.
    pub async fn request(
        &self,
        action: Action,
        object_id: Option<&str>,
        new_object_id: Option<&str>,
        body: Bytes,
        deadline: Option<Duration>,
    ) -> Result<Response> {
        if self.is_closed() {
            return Err(FbmError::closed("client already closed"));
        }

        let id = self.allocate_id();
        let req = Request {
            id,
            action,
            object_id: object_id.map(str::to_string),
            new_object_id: new_object_id.map(str::to_string),
            body,
        };
        // The encoder enforces the negotiated limits, so an oversize body
        // is refused before anything hits the wire.
        let wire = frame::encode_request(&req, &self.limits)?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        trace!(id, action = action.token(), "request queued");

        if self.out_tx.send(Message::Binary(wire)).is_err() {
            self.pending.remove(&id);
            return Err(FbmError::closed("write pump gone"));
        }

        match deadline {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(Ok(resp)) => Ok(resp),
                Ok(Err(_)) => Err(FbmError::closed("connection lost")),
                Err(_) => {
                    self.pending.remove(&id);
                    Err(FbmError::Timeout(limit))
                }
            },
            None => {
                tokio::select! {
                    () = self.closed.cancelled() => {
                        self.pending.remove(&id);
                        Err(FbmError::closed("connection lost"))
                    }
                    resp = rx => resp.map_err(|_| FbmError::closed("connection lost")),
                }
            }
        }
    }

    /// GET `key` with the default deadline. `Ok(None)` on a miss.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.get_with_timeout(key, DEFAULT_REQUEST_TIMEOUT).await
    }

    /// GET `key` with an explicit deadline.
    pub async fn get_with_timeout(&self, key: &str, deadline: Duration) -> Result<Option<Bytes>> {
        let resp = self
            .request(Action::Get, Some(key), None, Bytes::new(), Some(deadline))
            .await?;
        match resp.status {
            Status::Ok => Ok(Some(resp.body)),
            Status::NotFound => Ok(None),
            _ => Err(FbmError::Rejected),
        }
    }

    /// Insert or overwrite `key`.
    pub async fn upsert(&self, key: &str, body: Bytes) -> Result<()> {
        let resp = self
            .request(
                Action::Upsert,
                Some(key),
                None,
                body,
                Some(DEFAULT_REQUEST_TIMEOUT),
            )
            .await?;
        match resp.status {
            Status::Ok => Ok(()),
            _ => Err(FbmError::Rejected),
        }
    }

    /// Atomically rename `old_key` to `new_key`, overwriting the contents
    /// with `body`.
    pub async fn rename(&self, old_key: &str, new_key: &str, body: Bytes) -> Result<()> {
        let resp = self
            .request(
                Action::Upsert,
                Some(old_key),
                Some(new_key),
                body,
                Some(DEFAULT_REQUEST_TIMEOUT),
            )
            .await?;
        match resp.status {
            Status::Ok => Ok(()),
            _ => Err(FbmError::Rejected),
        }
    }

    /// DELETE `key`. `Ok(true)` when the key existed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let resp = self
            .request(
                Action::Delete,
                Some(key),
                None,
                Bytes::new(),
                Some(DEFAULT_REQUEST_TIMEOUT),
            )
            .await?;
        match resp.status {
            Status::Ok => Ok(true),
            Status::NotFound => Ok(false),
            _ => Err(FbmError::Rejected),
        }
    }

    /// Block until the server hands this peer the next change event.
    ///
    /// The response status is `deleted`/`modified` for events, or `nf` when
    /// the remote side does not serve change streams to this session.
    pub async fn dequeue_event(&self) -> Result<Response> {
        self.request(Action::Dequeue, None, None, Bytes::new(), None)
            .await
    }

    fn dispatch(&self, buf: Bytes) {
        match frame::decode_response(&buf, &self.limits) {
            Ok(resp) => {
                if let Some((_, waiter)) = self.pending.remove(&resp.id) {
                    let _ = waiter.send(resp);
                } else {
                    debug!(id = resp.id, "response without a pending waiter");
                }
            }
            Err(e) => debug!(error = %e, "discarding undecodable response"),
        }
    }

    fn allocate_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

impl Drop for FbmClient {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}
