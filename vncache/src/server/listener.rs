//! Per-connection cache listener.
//!
//! One read loop per accepted WebSocket dispatches frames strictly in
//! arrival order. GET/UPSERT/DELETE complete inline; a change-dequeue may
//! block for minutes, so it is handed to a task of its own and the read
//! loop keeps going; that is what lets a peer run several dequeue loops
//! and a synchronous GET over one connection.
//!
//! Responses funnel through a single write pump, which also owns the 30 s
//! keep-alive ping. Request-scoped failures answer `err`/`nf` and keep the
//! connection; transport failures cancel it.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use vncache_core::events::queue::QueueSubscription;
use vncache_core::store::valid_key;
use vncache_fbm::frame::{self, FrameLimits, Request, Response};
use vncache_fbm::header::{Action, Status};
use vncache_fbm::KEEPALIVE_INTERVAL;

use crate::auth::negotiate::NegotiatedSession;
use crate::node::{ConnectionPermit, NodeState};

pub(crate) async fn run_session(
    state: Arc<NodeState>,
    session: NegotiatedSession,
    permit: ConnectionPermit,
    socket: WebSocket,
) {
    // Held for the whole session; dropping it frees the admission slot.
    let _permit = permit;
    let conn = state.exit.child_token();
    let limits = session.limits;

    // Peer sessions join the monitor and attach to their change queue.
    if let Some(ad) = &session.advertisement {
        state.monitor.register(ad.clone());
    }
    let subscription = match (&session.node_id, session.is_peer) {
        (Some(node_id), true) => Some(Arc::new(state.queues.subscribe(node_id))),
        _ => None,
    };

    debug!(
        peer = session.is_peer,
        node = session.node_id.as_deref().unwrap_or("-"),
        "session open"
    );

    let (out_tx, out_rx) = flume::unbounded::<Message>();
    let (mut sink, mut source) = socket.split();

    // Write pump: responses and keep-alive pings.
    let write_conn = conn.clone();
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(KEEPALIVE_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ping.tick().await;
        loop {
            tokio::select! {
                () = write_conn.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                        write_conn.cancel();
                        break;
                    }
                }
                msg = out_rx.recv_async() => match msg {
                    Ok(m) => {
                        if sink.send(m).await.is_err() {
                            write_conn.cancel();
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    });

    // Read loop: one frame at a time, dispatched in arrival order.
    loop {
        let msg = tokio::select! {
            () = conn.cancelled() => break,
            msg = source.next() => msg,
        };
        match msg {
            Some(Ok(Message::Binary(buf))) => {
                handle_frame(
                    &state,
                    &session,
                    &limits,
                    buf,
                    &out_tx,
                    subscription.as_ref(),
                    &conn,
                )
                .await;
            }
            Some(Ok(Message::Close(_))) | None => break,
            // Pings are answered by the WebSocket layer.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(error = %e, "session read failed");
                break;
            }
        }
    }

    conn.cancel();
    let _ = writer.await;
    if let Some(ad) = &session.advertisement {
        state.monitor.unregister(&ad.iss);
    }
    debug!(node = session.node_id.as_deref().unwrap_or("-"), "session closed");
}

async fn handle_frame(
    state: &Arc<NodeState>,
    session: &NegotiatedSession,
    limits: &FrameLimits,
    buf: Bytes,
    out_tx: &flume::Sender<Message>,
    subscription: Option<&Arc<QueueSubscription>>,
    conn: &CancellationToken,
) {
    if buf.len() < 4 {
        debug!("discarding runt frame");
        return;
    }
    let id = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if id == 0 {
        // Reserved for out-of-band control; nothing is specified over it.
        return;
    }

    let request = match frame::decode_request(&buf, limits) {
        Ok(request) => request,
        Err(e) => {
            debug!(id, error = %e, "malformed request");
            send(out_tx, limits, Response::status(id, Status::Err));
            return;
        }
    };
    trace!(id, action = request.action.token(), "dispatch");

    match request.action {
        Action::Get => send(out_tx, limits, get(state, &request).await),
        Action::Upsert => send(out_tx, limits, upsert(state, &request).await),
        Action::Delete => send(out_tx, limits, delete(state, &request).await),
        Action::Dequeue => dequeue(id, out_tx, limits, subscription, conn),
    }
}

async fn get(state: &Arc<NodeState>, request: &Request) -> Response {
    match request.object_id.as_deref() {
        // Undersized keys never reach the store.
        Some(key) if valid_key(key) => match state.lookup(key).await {
            Some(blob) => Response::ok_with_body(request.id, blob),
            None => Response::status(request.id, Status::NotFound),
        },
        Some(_) => Response::status(request.id, Status::NotFound),
        None => Response::status(request.id, Status::Err),
    }
}

async fn upsert(state: &Arc<NodeState>, request: &Request) -> Response {
    let Some(key) = request.object_id.as_deref() else {
        return Response::status(request.id, Status::Err);
    };
    if !valid_key(key) {
        return Response::status(request.id, Status::NotFound);
    }

    let result = match request.new_object_id.as_deref() {
        None => state.apply_upsert(key, request.body.clone()).await,
        Some(new_key) if valid_key(new_key) => {
            state
                .apply_rename(key, new_key, request.body.clone())
                .await
        }
        Some(_) => return Response::status(request.id, Status::NotFound),
    };
    match result {
        Ok(()) => Response::status(request.id, Status::Ok),
        // Conflict (rename destination occupied) and anything else the
        // store refuses surface as `err`; the connection stays up.
        Err(e) => {
            debug!(id = request.id, error = %e, "upsert refused");
            Response::status(request.id, Status::Err)
        }
    }
}

async fn delete(state: &Arc<NodeState>, request: &Request) -> Response {
    match request.object_id.as_deref() {
        Some(key) if valid_key(key) => {
            if state.apply_delete(key).await {
                Response::status(request.id, Status::Ok)
            } else {
                Response::status(request.id, Status::NotFound)
            }
        }
        Some(_) => Response::status(request.id, Status::NotFound),
        None => Response::status(request.id, Status::Err),
    }
}

/// Change-dequeue blocks until an event arrives, so it runs in its own
/// task; the read loop continues and later requests are not starved.
/// Non-peer sessions get `nf` immediately.
fn dequeue(
    id: u32,
    out_tx: &flume::Sender<Message>,
    limits: &FrameLimits,
    subscription: Option<&Arc<QueueSubscription>>,
    conn: &CancellationToken,
) {
    let Some(subscription) = subscription else {
        send(out_tx, limits, Response::status(id, Status::NotFound));
        return;
    };

    let subscription = Arc::clone(subscription);
    let out_tx = out_tx.clone();
    let limits = *limits;
    let conn = conn.clone();
    tokio::spawn(async move {
        let event = tokio::select! {
            () = conn.cancelled() => return,
            ev = subscription.dequeue() => ev,
        };
        if let Some(event) = event {
            send(
                &out_tx,
                &limits,
                Response::change_event(
                    id,
                    event.deleted,
                    &event.current_id,
                    event.alternate_id.as_deref(),
                ),
            );
        }
    });
}

/// Encode and queue a response. A response that cannot fit the negotiated
/// limits degrades to a bare `err` status with the same id.
fn send(out_tx: &flume::Sender<Message>, limits: &FrameLimits, response: Response) {
    let id = response.id;
    let wire = match frame::encode_response(&response, limits) {
        Ok(wire) => wire,
        Err(e) => {
            debug!(id, error = %e, "response exceeds session limits");
            match frame::encode_response(&Response::status(id, Status::Err), limits) {
                Ok(wire) => wire,
                Err(_) => return,
            }
        }
    };
    let _ = out_tx.send(Message::Binary(wire));
}
