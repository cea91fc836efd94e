//! nhlink-app - Session orchestration for nhlink
//!
//! Everything one editor session needs to stay consistent with its peers:
//! the durable state store, the event bus, the workload tree and the trackers
//! that update it, the command registry with its nhctl-backed commands, deep
//! links, and the [`Engine`] that wires them to a relay.

pub mod bus;
pub mod commands;
pub mod config;
pub mod deep_link;
pub mod engine;
pub mod keys;
pub mod launch;
pub mod lock;
pub mod redispatch;
pub mod refresh;
pub mod report;
pub mod signals;
pub mod store;
pub mod tracker;
pub mod tree;

// Re-export primary types
pub use bus::EventBus;
pub use commands::{CommandRegistry, CommandTarget, ResourceCapability};
pub use config::Settings;
pub use deep_link::DeepLink;
pub use engine::Engine;
pub use launch::{DevStartMarkers, Launcher};
pub use lock::SessionLock;
pub use redispatch::Redispatcher;
pub use refresh::RefreshControl;
pub use report::{LogNotifier, NoticeLevel, Notifier, RecordingNotifier};
pub use store::{FileStore, MemoryStore, Scope, StateStore, StateStoreExt};
pub use tracker::Tracker;
pub use tree::{TreeUpdate, WorkloadTree};
