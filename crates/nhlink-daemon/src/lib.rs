//! # nhlink-daemon - External Collaborators
//!
//! Everything that crosses the process boundary: running the `nhctl` binary
//! and carrying bus envelopes between sessions.
//!
//! Depends on [`nhlink_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### nhctl
//! - [`NhctlCommand`] - nhctl subcommands and their argument lists
//! - [`NhctlRunner`] - Trait for running nhctl (real or recorded)
//! - [`Nhctl`] - Runs the real binary via `tokio::process`
//! - [`KubeContext`] - Kubeconfig + namespace every call is scoped to
//!
//! ### Relay
//! - [`Relay`] - Cross-session publish/subscribe transport
//! - [`LoopbackHub`], [`LoopbackRelay`] - In-process transport
//! - [`SocketRelay`], [`Broker`] - Newline-delimited JSON over TCP

pub mod nhctl;
pub mod relay;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use nhctl::{
    DevStartFlags, KubeContext, LocalNhctlRunner, Nhctl, NhctlCommand, NhctlOutput, NhctlRunner,
};
pub use relay::{Broker, LoopbackHub, LoopbackRelay, Relay, SocketRelay, INBOUND_CAPACITY};
