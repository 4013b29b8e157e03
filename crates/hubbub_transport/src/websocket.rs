//! WebSocket transport.
//!
//! This file implements the WebSocket server that translates protocol JSON
//! frames into registry operations. Responsibilities:
//! - Accept TCP/WebSocket connections and run one session controller per
//!   connection
//! - Assign each session a server-generated identity and send the
//!   `connected` welcome frame
//! - Parse and validate inbound frames, dispatch them to the registry, and
//!   reply with `ack`/`error` frames
//! - Run the per-session send loop (delivery, replies, heartbeat, close
//!   commands) that owns the socket's write half
//! - On shutdown, stop accepting, flush each subscriber's outbound queue
//!   within a bounded deadline, and close every session with code 1001
//!
//! Locking discipline: the registry lock is taken only inside synchronous
//! blocks; nothing awaits while holding it. The send loop talks to the
//! socket and re-drains the registry queue after each successful write, so
//! a slow consumer backs up into its own bounded queue instead of stalling
//! publishers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, info, warn};
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::frame::CloseFrame;
use tungstenite::protocol::Message as WsMessage;
use tungstenite::Bytes;
use uuid::Uuid;

use hubbub_broker::engine::SharedBroker;
use hubbub_broker::message::{ErrorCode, EventMessage, ServerFrame};
use hubbub_broker::subscriber::{SessionControl, TransportHandle, CLOSE_GOING_AWAY, CLOSE_NORMAL};
use hubbub_broker::BrokerError;

use crate::message::{parse_frame, ClientRequest};

/// Liveness probe period. A session that has not ponged for one full
/// interval is terminated at the following tick.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Ceiling on the per-session outbound flush attempted at shutdown.
pub const SHUTDOWN_DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// Frames the send loop buffers ahead of the socket. Once this hop is full
/// the registry-side queue starts filling and backpressure takes over.
const SEND_BUFFER: usize = 8;

type ClientIds = Arc<Mutex<HashSet<String>>>;

/// Accept connections until `shutdown` fires, then wait for the sessions
/// to finish their bounded drain.
pub async fn start_websocket_server(
    addr: String,
    broker: SharedBroker,
    mut shutdown: watch::Receiver<bool>,
) {
    let listener = TcpListener::bind(addr.clone()).await.expect("Can't bind");

    info!("WebSocket server listening on ws://{addr}");

    let mut sessions: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    sessions.spawn(handle_session(stream, broker.clone(), shutdown.clone()));
                }
                Err(e) => {
                    warn!("accept failed: {e}");
                }
            },
            _ = shutdown.changed() => break,
        }
    }

    // Sessions get the drain deadline plus a beat of slack, then whatever
    // is left is torn down.
    let ceiling = tokio::time::sleep(SHUTDOWN_DRAIN_DEADLINE + Duration::from_secs(1));
    tokio::pin!(ceiling);
    loop {
        tokio::select! {
            joined = sessions.join_next() => {
                if joined.is_none() {
                    break;
                }
            }
            _ = &mut ceiling => {
                sessions.abort_all();
                break;
            }
        }
    }
    info!("WebSocket server stopped");
}

async fn handle_session(stream: TcpStream, broker: SharedBroker, shutdown: watch::Receiver<bool>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake error: {e}");
            return;
        }
    };
    let (mut ws_sender, ws_receiver) = ws_stream.split();

    // CONNECTING -> OPEN: the welcome frame carries the server identity.
    let session_id = Uuid::new_v4().to_string();
    let welcome = serde_json::to_string(&ServerFrame::connected(&session_id)).unwrap();
    if ws_sender.send(WsMessage::text(welcome)).await.is_err() {
        return;
    }
    debug!(%session_id, "session open");

    let (frames_tx, mut frames_rx) = mpsc::channel::<ServerFrame>(SEND_BUFFER);
    let (control_tx, mut control_rx) = mpsc::unbounded_channel::<SessionControl>();
    let alive = Arc::new(AtomicBool::new(true));
    let handle = TransportHandle {
        frames: frames_tx,
        control: control_tx,
        alive: alive.clone(),
    };

    // client_ids this session has registered with the broker
    let owned: ClientIds = Arc::new(Mutex::new(HashSet::new()));

    let cleanup_called = Arc::new(AtomicBool::new(false));
    let do_cleanup = {
        let broker = broker.clone();
        let owned = owned.clone();
        let handle = handle.clone();

        move || {
            if !cleanup_called.swap(true, Ordering::SeqCst) {
                let ids: Vec<String> = owned.lock().unwrap().iter().cloned().collect();
                let mut broker = broker.lock().unwrap();
                for client_id in &ids {
                    // A record rebound to a newer transport for the same
                    // client identity is left alone.
                    broker.remove_subscriber_if_bound(client_id, &handle);
                }
            }
        }
    };

    // Send loop: owns the write half. Delivery frames, replies and close
    // commands, the heartbeat, and the shutdown drain all funnel through
    // here so the registry never blocks on the socket.
    let mut send_task = {
        let broker = broker.clone();
        let owned = owned.clone();
        let alive = alive.clone();
        let do_cleanup = do_cleanup.clone();
        let session_id = session_id.clone();
        let mut shutdown = shutdown.clone();

        tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            heartbeat.tick().await; // the first tick is immediate

            loop {
                tokio::select! {
                    cmd = control_rx.recv() => match cmd {
                        Some(SessionControl::Reply(frame)) => {
                            let text = serde_json::to_string(&frame).unwrap();
                            if ws_sender.send(WsMessage::text(text)).await.is_err() {
                                break;
                            }
                        }
                        Some(SessionControl::Close { code, reason, frame }) => {
                            if let Some(frame) = frame {
                                let text = serde_json::to_string(&frame).unwrap();
                                let _ = ws_sender.send(WsMessage::text(text)).await;
                            }
                            let _ = ws_sender
                                .send(WsMessage::Close(Some(CloseFrame {
                                    code: CloseCode::from(code),
                                    reason: reason.into(),
                                })))
                                .await;
                            info!(%session_id, code, "session closed by server");
                            break;
                        }
                        None => break,
                    },
                    frame = frames_rx.recv() => match frame {
                        Some(frame) => {
                            let text = serde_json::to_string(&frame).unwrap();
                            if ws_sender.send(WsMessage::text(text)).await.is_err() {
                                break;
                            }
                            // The transport freed a slot; pull queued frames
                            // toward it.
                            let ids: Vec<String> =
                                owned.lock().unwrap().iter().cloned().collect();
                            let mut broker = broker.lock().unwrap();
                            for client_id in &ids {
                                broker.drain_subscriber(client_id);
                            }
                        }
                        None => break,
                    },
                    _ = heartbeat.tick() => {
                        if !alive.swap(false, Ordering::SeqCst) {
                            info!(%session_id, "heartbeat missed; terminating session");
                            let _ = ws_sender.send(WsMessage::Close(None)).await;
                            break;
                        }
                        if ws_sender.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                            break;
                        }
                    }
                    _ = shutdown.changed() => {
                        drain_for_shutdown(
                            &mut ws_sender,
                            &mut frames_rx,
                            &broker,
                            &owned,
                        )
                        .await;
                        let _ = ws_sender
                            .send(WsMessage::Close(Some(CloseFrame {
                                code: CloseCode::from(CLOSE_GOING_AWAY),
                                reason: "Server shutting down".into(),
                            })))
                            .await;
                        info!(%session_id, "session closed for shutdown");
                        break;
                    }
                }
            }
            do_cleanup();
        })
    };

    let peer_closed = tokio::select! {
        // Close ordered by the server (slow consumer, heartbeat, shutdown)
        // or the socket died; the read half goes with it.
        _ = &mut send_task => false,
        _ = read_loop(ws_receiver, &broker, &handle, &owned, &alive, &session_id) => true,
    };
    if peer_closed {
        do_cleanup();
        // Order the send loop down explicitly; the cleanup closure keeps a
        // transport handle alive, so channel closure alone cannot end it.
        handle.close(CLOSE_NORMAL, "", None);
        drop(handle);
        let _ = send_task.await;
    }
    debug!(%session_id, "session closed");
}

/// Flush what the registry still holds for this session, bounded by
/// `SHUTDOWN_DRAIN_DEADLINE`. The deadline is a ceiling, not a promise
/// that every queue empties.
async fn drain_for_shutdown(
    ws_sender: &mut SplitSink<WebSocketStream<TcpStream>, WsMessage>,
    frames_rx: &mut mpsc::Receiver<ServerFrame>,
    broker: &SharedBroker,
    owned: &ClientIds,
) {
    let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN_DEADLINE;
    loop {
        let left: usize = {
            let ids: Vec<String> = owned.lock().unwrap().iter().cloned().collect();
            let mut broker = broker.lock().unwrap();
            ids.iter()
                .map(|id| {
                    broker.drain_subscriber(id);
                    broker.pending_frames(id)
                })
                .sum()
        };

        match frames_rx.try_recv() {
            Ok(frame) => {
                let text = serde_json::to_string(&frame).unwrap();
                match tokio::time::timeout_at(deadline, ws_sender.send(WsMessage::text(text)))
                    .await
                {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
            Err(_) if left == 0 => break,
            Err(_) => {
                // Queued frames exist but have not crossed into the channel
                // yet; yield briefly and retry until the deadline.
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        if tokio::time::Instant::now() >= deadline {
            break;
        }
    }
}

/// Read half of the session: parse, validate, dispatch, and track
/// transport-level pongs for the heartbeat.
async fn read_loop(
    mut ws_receiver: SplitStream<WebSocketStream<TcpStream>>,
    broker: &SharedBroker,
    handle: &TransportHandle,
    owned: &ClientIds,
    alive: &Arc<AtomicBool>,
    session_id: &str,
) {
    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            WsMessage::Text(text) => {
                handle_text_frame(text.as_str(), broker, handle, owned, session_id);
            }
            WsMessage::Pong(_) => {
                alive.store(true, Ordering::SeqCst);
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }
}

/// One inbound text frame: validate, dispatch to the registry, reply.
/// Validation failures are reported to this client only and touch no
/// registry state.
fn handle_text_frame(
    text: &str,
    broker: &SharedBroker,
    handle: &TransportHandle,
    owned: &ClientIds,
    session_id: &str,
) {
    let request = match parse_frame(text) {
        Ok(request) => request,
        Err(err) => {
            debug!(session_id, error = %err.message, "rejected invalid frame");
            handle.reply(ServerFrame::error(err.request_id, err.code, &err.message));
            return;
        }
    };

    match request {
        ClientRequest::Subscribe {
            topic,
            client_id,
            last_n,
            request_id,
        } => {
            let (result, bound) = {
                let mut broker = broker.lock().unwrap();
                let result = broker.subscribe(&client_id, handle.clone(), &topic, last_n);
                // The record stays bound to an earlier, still-open transport
                // when the same client identity subscribes from a second
                // session; only the binding session owns the record's
                // lifetime.
                let bound = result.is_ok() && broker.is_bound_to(&client_id, handle);
                (result, bound)
            };
            match result {
                Ok(()) => {
                    if bound {
                        owned.lock().unwrap().insert(client_id.clone());
                    }
                    debug!(session_id, %client_id, %topic, "subscribe ok");
                    handle.reply(ServerFrame::ack(request_id, &topic));
                }
                Err(e) => handle.reply(registry_error(request_id, &e)),
            }
        }
        ClientRequest::Unsubscribe {
            topic,
            client_id,
            request_id,
        } => {
            let result = {
                let mut broker = broker.lock().unwrap();
                broker.unsubscribe(&client_id, &topic)
            };
            match result {
                Ok(()) => {
                    debug!(session_id, %client_id, %topic, "unsubscribe ok");
                    handle.reply(ServerFrame::ack(request_id, &topic));
                }
                Err(e) => handle.reply(registry_error(request_id, &e)),
            }
        }
        ClientRequest::Publish {
            topic,
            message,
            request_id,
        } => {
            let result = {
                let mut broker = broker.lock().unwrap();
                broker.publish(
                    &topic,
                    EventMessage {
                        id: message.id,
                        payload: message.payload,
                    },
                )
            };
            match result {
                Ok(receipt) => {
                    debug!(
                        session_id,
                        %topic,
                        reached = receipt.subscribers_reached,
                        failed = receipt.failed.len(),
                        "publish ok"
                    );
                    handle.reply(ServerFrame::ack(request_id, &topic));
                }
                Err(e) => handle.reply(registry_error(request_id, &e)),
            }
        }
        ClientRequest::Ping { request_id } => {
            handle.reply(ServerFrame::pong(request_id));
        }
    }
}

/// Map a registry failure onto the wire error taxonomy.
fn registry_error(request_id: Option<serde_json::Value>, err: &BrokerError) -> ServerFrame {
    let code = match err {
        BrokerError::TopicNotFound(_) | BrokerError::SubscriptionNotFound { .. } => {
            ErrorCode::TopicNotFound
        }
        BrokerError::TopicAlreadyExists(_) | BrokerError::InvalidTopicName => ErrorCode::BadRequest,
    };
    ServerFrame::error(request_id, code, &err.to_string())
}
