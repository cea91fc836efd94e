//! # nhlink-core - Core Domain Types
//!
//! Foundation crate for nhlink. Provides session identity, resource
//! references, the closed set of bus events with their wire format, error
//! handling and logging setup.
//!
//! This crate has **zero internal dependencies**.
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`Session`], [`SessionId`] - One running editor session and its identity
//! - [`WorkloadRef`], [`AppRef`] - Keys of tracked cluster resources
//! - [`WorkloadPhase`] - Tracked lifecycle phase of a workload node
//!
//! ### Events (`events`)
//! - [`Event`], [`EventKind`] - The closed set of bus events
//! - [`Envelope`], [`Delivery`] - An event tagged with its origin session
//! - [`CommandDescriptor`] - A deferred command invocation
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with fatal / relay-transient / benign classification
//! - [`BenignCondition`] - Known transient conditions hidden from the user
//! - [`Result`], [`ResultExt`]

pub mod error;
pub mod events;
pub mod logging;
pub mod types;

/// Prelude for common imports used throughout all nhlink crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

pub use error::{BenignCondition, Error, Result, ResultExt};
pub use events::{
    CommandDescriptor, CommandEvent, CommandParameter, Delivery, DevStart, EndDevMode, Envelope,
    Event, EventKind, Install, InstallStatus, RefreshTree, Uninstall, INSTALL_LOADING,
};
pub use types::{AppRef, Session, SessionId, WorkloadPhase, WorkloadRef};
