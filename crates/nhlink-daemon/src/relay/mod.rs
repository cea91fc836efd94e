//! Cross-session relay transports
//!
//! A relay carries [`Envelope`]s between sessions. Delivery is best-effort,
//! at-most-once and unordered across sessions; a publisher may also receive
//! its own envelopes back. Callers own timeouts and self-filtering.
//!
//! - [`LoopbackRelay`] - in-process hub shared by sessions in one process
//! - [`SocketRelay`] - newline-delimited JSON over TCP to a [`Broker`]
//! - [`Broker`] - the TCP hub that fans every frame out to all connections

pub mod broker;
pub mod loopback;
pub mod socket;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use nhlink_core::prelude::*;
use nhlink_core::Envelope;

pub use broker::Broker;
pub use loopback::{LoopbackHub, LoopbackRelay};
pub use socket::SocketRelay;

/// Capacity of the channel handed out by [`Relay::subscribe`].
pub const INBOUND_CAPACITY: usize = 256;

/// Transport bridging otherwise-isolated sessions.
pub trait Relay: Send + Sync {
    /// Transport name for logging.
    fn name(&self) -> &'static str;

    /// Send an envelope to every session listening on the channel.
    fn publish<'a>(&'a self, envelope: &'a Envelope) -> BoxFuture<'a, Result<()>>;

    /// Open the inbound side of the channel.
    ///
    /// The receiver yields envelopes published by any session, this one
    /// included. Dropping it stops delivery.
    fn subscribe(&self) -> BoxFuture<'_, Result<mpsc::Receiver<Envelope>>>;
}
