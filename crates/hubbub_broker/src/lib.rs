//! hubbub_broker
//!
//! The broker crate contains the kernel of the pub/sub fabric: the
//! topic/subscription registry, the fan-out engine with per-subscriber
//! outbound queues and backpressure, the bounded replay ring per topic,
//! and the wire frame model.
//!
//! Public types:
//! - `Broker`: the registry; every state-changing operation goes through it
//!   so the cross-reference invariants hold atomically.
//! - `Subscriber` / `TransportHandle`: the per-client mailbox and the
//!   non-owning handles the registry uses to push frames toward a session.
//! - `ServerFrame` / `Event`: the frames a session transport carries.
//!
//! This crate is intended to be used by transport crates (WebSocket
//! sessions, the admin HTTP surface) or binary crates that wire together
//! network and configuration.

pub mod engine;
pub mod error;
pub mod message;
pub mod subscriber;
pub mod topic;

pub use engine::{Broker, SharedBroker};
pub use error::BrokerError;
