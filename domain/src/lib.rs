//! Broker-facing logic of the bridge: the broker client abstraction, the send and drain
//! operations built on it, and the concrete gateways that talk to real brokers.
//!
//! `web` depends on this crate only through [`broker::Broker`] and the two operations
//! [`send::send_messages`] and [`receive::drain_messages`].
pub mod broker;
pub mod error;
pub mod gateway;
pub mod message;
pub mod receive;
pub mod send;

pub use broker::{Broker, ReceiveSource, ReceiverSettings, SendTarget, SessionRequest};
pub use message::SendOutcome;
