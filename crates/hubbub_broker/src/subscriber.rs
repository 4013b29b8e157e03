//! Subscriber records.
//!
//! A `Subscriber` is the per-client mailbox and lifecycle object: the set of
//! joined topics, a bounded FIFO of frames awaiting delivery, a liveness
//! flag driven by the session heartbeat, and non-owning handles into the
//! session's transport. The transport itself (the WebSocket) is owned by
//! the session controller; the registry only pushes frames toward it.
//!
//! Delivery is two-staged. `enqueue` places a frame on the bounded outbound
//! queue (applying the configured backpressure policy on overflow) and then
//! `drain` moves as many queued frames as the transport will accept without
//! blocking. Frames the transport refuses stay queued; the session send
//! loop re-drains after each successful write, so a queue that filled while
//! the transport was slow empties once it catches up.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::mpsc;

use hubbub_config::BackpressurePolicy;

use crate::message::{ErrorCode, ServerFrame};
use crate::topic::SubscriberId;

/// WebSocket close code for an ordinary close handshake.
pub const CLOSE_NORMAL: u16 = 1000;
/// WebSocket close code sent when the backpressure policy disconnects a
/// subscriber that cannot keep up.
pub const CLOSE_SLOW_CONSUMER: u16 = 1008;
/// WebSocket close code sent to every session on graceful shutdown.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Out-of-band commands for the session controller. Carried on an
/// unbounded channel so a close order is deliverable even when the data
/// path is saturated.
#[derive(Debug)]
pub enum SessionControl {
    /// A request/reply frame (ack, error, pong).
    Reply(ServerFrame),
    /// Close the transport with the given status code and reason. When
    /// `frame` is present it is sent best-effort before the close.
    Close {
        code: u16,
        reason: String,
        frame: Option<ServerFrame>,
    },
}

/// Non-owning handles into one session's transport.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    /// Bounded hop toward the session send loop; `try_send` only.
    pub frames: mpsc::Sender<ServerFrame>,
    /// Unbounded control path for replies and close commands.
    pub control: mpsc::UnboundedSender<SessionControl>,
    /// Heartbeat liveness flag; cleared on each tick, set on transport pong.
    pub alive: Arc<AtomicBool>,
}

impl TransportHandle {
    pub fn is_open(&self) -> bool {
        !self.frames.is_closed()
    }

    /// Whether this handle and `other` belong to the same session. The
    /// liveness flag is allocated once per session, so pointer identity is
    /// session identity; unlike the channel handles, holding the flag does
    /// not keep the transport open.
    pub fn same_session(&self, other: &TransportHandle) -> bool {
        Arc::ptr_eq(&self.alive, &other.alive)
    }

    pub fn reply(&self, frame: ServerFrame) {
        let _ = self.control.send(SessionControl::Reply(frame));
    }

    pub fn close(&self, code: u16, reason: &str, frame: Option<ServerFrame>) {
        let _ = self.control.send(SessionControl::Close {
            code,
            reason: reason.to_string(),
            frame,
        });
    }
}

/// Outcome of an enqueue attempt for one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Queued (and possibly already handed to the transport).
    Enqueued,
    /// Queue was full under DROP_OLDEST; the oldest queued frame was
    /// discarded to make room and the subscriber stays connected.
    DroppedOldest,
    /// Queue was full under DISCONNECT; the subscriber was ordered closed
    /// and must be removed from the registry. The frame was not delivered.
    Disconnected,
    /// The transport was observed closed; the subscriber must be removed.
    TransportClosed,
}

#[derive(Debug)]
pub struct Subscriber {
    pub client_id: SubscriberId,
    pub transport: TransportHandle,
    /// Topic names this subscriber is currently joined to.
    pub topics: HashSet<String>,
    outbound: VecDeque<ServerFrame>,
    max_queue: usize,
}

impl Subscriber {
    pub fn new(client_id: &str, transport: TransportHandle, max_queue: usize) -> Self {
        Self {
            client_id: client_id.to_string(),
            transport,
            topics: HashSet::new(),
            outbound: VecDeque::new(),
            max_queue,
        }
    }

    /// Frames still waiting for the transport to accept them.
    pub fn pending(&self) -> usize {
        self.outbound.len()
    }

    /// Enqueue one frame, applying the backpressure policy on overflow,
    /// then drain toward the transport. Never blocks.
    pub fn enqueue(&mut self, frame: ServerFrame, policy: BackpressurePolicy) -> EnqueueOutcome {
        if !self.transport.is_open() {
            return EnqueueOutcome::TransportClosed;
        }

        if self.max_queue > 0 && self.outbound.len() >= self.max_queue {
            match policy {
                BackpressurePolicy::DropOldest => {
                    self.outbound.pop_front();
                    self.outbound.push_back(frame);
                    self.drain();
                    return EnqueueOutcome::DroppedOldest;
                }
                BackpressurePolicy::Disconnect => {
                    let err = ServerFrame::error(
                        None,
                        ErrorCode::SlowConsumer,
                        "outbound queue overflow; disconnecting",
                    );
                    self.transport
                        .close(CLOSE_SLOW_CONSUMER, "SLOW_CONSUMER", Some(err));
                    return EnqueueOutcome::Disconnected;
                }
            }
        }

        self.outbound.push_back(frame);
        self.drain();
        EnqueueOutcome::Enqueued
    }

    /// Move queued frames into the transport until it stops accepting.
    /// A full transport leaves the unsent suffix queued for a later drain;
    /// a closed transport returns `false` so the caller can remove the
    /// record.
    pub fn drain(&mut self) -> bool {
        while let Some(frame) = self.outbound.pop_front() {
            match self.transport.frames.try_send(frame) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(frame)) => {
                    self.outbound.push_front(frame);
                    break;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    return false;
                }
            }
        }
        true
    }
}
