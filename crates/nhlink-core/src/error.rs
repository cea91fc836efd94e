//! Error types shared by every nhlink crate

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Message fragments the process boundary treats as benign.
///
/// These come from opaque sources (socket layers, TLS stacks, nhctl stderr)
/// where only the text is available.
const SOCKET_NOT_CONNECTED_MARKER: &str = "read ENOTCONN";
const TLS_VERSION_MISMATCH_MARKER: &str = "OPENSSL_internal:WRONG_VERSION_NUMBER";

/// Known transient conditions that are logged but never shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenignCondition {
    /// A socket was read after its peer went away
    SocketNotConnected,
    /// A TLS handshake hit a plain-text endpoint (or the reverse)
    TlsVersionMismatch,
}

impl BenignCondition {
    /// Classify a raw error message.
    pub fn classify(message: &str) -> Option<Self> {
        if message == SOCKET_NOT_CONNECTED_MARKER {
            Some(Self::SocketNotConnected)
        } else if message.contains(TLS_VERSION_MISMATCH_MARKER) {
            Some(Self::TlsVersionMismatch)
        } else {
            None
        }
    }
}

/// Application error types organized by layer
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Durable State Errors
    // ─────────────────────────────────────────────────────────────
    #[error("State store error for '{key}': {message}")]
    Store { key: String, message: String },

    #[error("Failed to serialize value for '{key}': {message}")]
    StoreSerialize { key: String, message: String },

    #[error("Workspace-scoped state requires a workspace root")]
    NoWorkspace,

    #[error("Failed to acquire lock {path}: {message}")]
    Lock { path: PathBuf, message: String },

    // ─────────────────────────────────────────────────────────────
    // Relay Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Relay error: {message}")]
    Relay { message: String },

    #[error("Relay operation timed out after {millis}ms")]
    RelayTimeout { millis: u64 },

    #[error("Relay frame error: {message}")]
    Frame { message: String },

    // ─────────────────────────────────────────────────────────────
    // Command Errors
    // ─────────────────────────────────────────────────────────────
    #[error("No command registered under '{0}'")]
    UnknownCommand(String),

    #[error("Command '{name}' failed: {message}")]
    Command { name: String, message: String },

    #[error("Event handler '{handler}' failed: {message}")]
    Handler { handler: String, message: String },

    // ─────────────────────────────────────────────────────────────
    // nhctl Errors
    // ─────────────────────────────────────────────────────────────
    #[error("nhctl not found. Ensure 'nhctl' is in your PATH or set [nhctl] binary.")]
    NhctlNotFound,

    #[error("Failed to spawn nhctl: {reason}")]
    NhctlSpawn { reason: String },

    #[error("nhctl exited with code {code:?}: {stderr}")]
    NhctlFailed { code: Option<i32>, stderr: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration / Input Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid deep link: {message}")]
    DeepLink { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn store(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn store_serialize(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StoreSerialize {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn lock(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Lock {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn relay(message: impl Into<String>) -> Self {
        Self::Relay {
            message: message.into(),
        }
    }

    pub fn frame(message: impl Into<String>) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    pub fn command(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn handler(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            handler: handler.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn deep_link(message: impl Into<String>) -> Self {
        Self::DeepLink {
            message: message.into(),
        }
    }

    /// Check if this is a transient relay condition (best-effort delivery)
    pub fn is_relay_transient(&self) -> bool {
        matches!(
            self,
            Error::Relay { .. } | Error::RelayTimeout { .. } | Error::Frame { .. }
        )
    }

    /// Check if this error must never be swallowed (state would be lost)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Store { .. } | Error::StoreSerialize { .. } | Error::NoWorkspace
        )
    }

    /// Known benign condition, if any.
    ///
    /// Typed sources are checked first; opaque messages fall back to the
    /// preserved marker strings.
    pub fn benign(&self) -> Option<BenignCondition> {
        match self {
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotConnected => {
                Some(BenignCondition::SocketNotConnected)
            }
            Error::Io(e) => BenignCondition::classify(&e.to_string()),
            Error::NhctlFailed { stderr, .. } => BenignCondition::classify(stderr.trim()),
            Error::Relay { message } | Error::Command { message, .. } => {
                BenignCondition::classify(message)
            }
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = Error::store("tmpApp", "disk full");
        assert_eq!(
            err.to_string(),
            "State store error for 'tmpApp': disk full"
        );

        let err = Error::NhctlNotFound;
        assert!(err.to_string().contains("nhctl not found"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_store_errors_are_fatal() {
        assert!(Error::store("k", "m").is_fatal());
        assert!(Error::store_serialize("k", "m").is_fatal());
        assert!(!Error::relay("down").is_fatal());
    }

    #[test]
    fn test_relay_errors_are_transient() {
        assert!(Error::relay("refused").is_relay_transient());
        assert!(Error::RelayTimeout { millis: 3000 }.is_relay_transient());
        assert!(!Error::UnknownCommand("x".into()).is_relay_transient());
    }

    #[test]
    fn test_benign_socket_not_connected() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotConnected, "whatever");
        assert_eq!(
            Error::from(io_err).benign(),
            Some(BenignCondition::SocketNotConnected)
        );
        assert_eq!(
            Error::relay("read ENOTCONN").benign(),
            Some(BenignCondition::SocketNotConnected)
        );
    }

    #[test]
    fn test_benign_tls_version_mismatch() {
        let err = Error::NhctlFailed {
            code: Some(1),
            stderr: "error:100000f7:SSL routines:OPENSSL_internal:WRONG_VERSION_NUMBER\n"
                .to_string(),
        };
        assert_eq!(err.benign(), Some(BenignCondition::TlsVersionMismatch));
    }

    #[test]
    fn test_socket_marker_requires_exact_match() {
        assert_eq!(BenignCondition::classify("read ENOTCONN on fd 4"), None);
        assert_eq!(Error::command("x", "connection refused").benign(), None);
    }
}
