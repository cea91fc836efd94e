//! Headless mode - NDJSON event output
//!
//! Every subcommand reports what it does as structured JSON on stdout, one
//! event per line, so scripts and editor front-ends can follow a session
//! without scraping logs.
//!
//! # Example Output
//!
//! ```json
//! {"event":"session_started","session_id":"/work/shop","workspace":"/work/shop","broker":true,"timestamp":1704700001000}
//! {"event":"tree_updated","update":{"update":"nodes","ids":["team-a","team-a/shop","team-a/shop/api"]},"timestamp":1704700002000}
//! {"event":"notice","level":"error","message":"nhctl exited with code Some(1): ...","timestamp":1704700003000}
//! ```

pub mod runner;

use chrono::Utc;
use serde::Serialize;
use std::io::{self, Write};
use tracing::error;

use nhlink_app::report::{LogNotifier, NoticeLevel, Notifier};
use nhlink_app::TreeUpdate;

/// Events emitted in headless mode
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HeadlessEvent {
    /// Session engine started and joined the relay
    SessionStarted {
        session_id: String,
        workspace: String,
        broker: bool,
        timestamp: i64,
    },

    /// Session engine stopped
    SessionStopped { session_id: String, timestamp: i64 },

    /// Standalone broker is accepting connections
    BrokerListening { addr: String, timestamp: i64 },

    /// Workload tree nodes need re-rendering
    TreeUpdated { update: TreeUpdate, timestamp: i64 },

    /// User-facing notification
    Notice {
        level: NoticeLevel,
        message: String,
        timestamp: i64,
    },

    /// An event was published on the relay
    Emitted {
        id: String,
        kind: String,
        timestamp: i64,
    },

    /// A deep link was processed
    DeepLinkHandled { dev_started: bool, timestamp: i64 },

    /// Error occurred
    Error {
        message: String,
        fatal: bool,
        timestamp: i64,
    },
}

impl HeadlessEvent {
    /// Emit this event to stdout as JSON
    pub fn emit(&self) {
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize headless event: {}", e);
                return;
            }
        };

        // NDJSON: one event per line
        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", json) {
            error!("Failed to write headless event to stdout: {}", e);
            return;
        }

        if let Err(e) = stdout.flush() {
            error!("Failed to flush headless stdout: {}", e);
        }
    }

    /// Get current timestamp in milliseconds
    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    // ─────────────────────────────────────────────────────────
    // Convenience constructors
    // ─────────────────────────────────────────────────────────

    pub fn session_started(session_id: &str, workspace: &str, broker: bool) -> Self {
        Self::SessionStarted {
            session_id: session_id.to_string(),
            workspace: workspace.to_string(),
            broker,
            timestamp: Self::now(),
        }
    }

    pub fn session_stopped(session_id: &str) -> Self {
        Self::SessionStopped {
            session_id: session_id.to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn broker_listening(addr: &str) -> Self {
        Self::BrokerListening {
            addr: addr.to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn tree_updated(update: TreeUpdate) -> Self {
        Self::TreeUpdated {
            update,
            timestamp: Self::now(),
        }
    }

    pub fn notice(level: NoticeLevel, message: &str) -> Self {
        Self::Notice {
            level,
            message: message.to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn emitted(id: &str, kind: &str) -> Self {
        Self::Emitted {
            id: id.to_string(),
            kind: kind.to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn deep_link_handled(dev_started: bool) -> Self {
        Self::DeepLinkHandled {
            dev_started,
            timestamp: Self::now(),
        }
    }

    pub fn error(message: String, fatal: bool) -> Self {
        Self::Error {
            message,
            fatal,
            timestamp: Self::now(),
        }
    }
}

/// Notifier that logs and prints each notice as a headless event.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessNotifier;

impl Notifier for HeadlessNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        LogNotifier.notify(level, message);
        HeadlessEvent::notice(level, message).emit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_value(event: &HeadlessEvent) -> serde_json::Value {
        let json = serde_json::to_string(event).expect("serialization failed");
        serde_json::from_str(&json).expect("invalid JSON")
    }

    #[test]
    fn test_session_started_serialization() {
        let value = to_value(&HeadlessEvent::session_started("/work/a", "/work/a", true));

        assert_eq!(value["event"], "session_started");
        assert_eq!(value["session_id"], "/work/a");
        assert_eq!(value["broker"], true);
        assert!(value["timestamp"].is_number());
    }

    #[test]
    fn test_tree_updated_nests_update() {
        let value = to_value(&HeadlessEvent::tree_updated(TreeUpdate::Nodes {
            ids: vec!["space".into(), "space/shop".into()],
        }));

        assert_eq!(value["event"], "tree_updated");
        assert_eq!(value["update"]["update"], "nodes");
        assert_eq!(value["update"]["ids"][1], "space/shop");
    }

    #[test]
    fn test_notice_serialization() {
        let value = to_value(&HeadlessEvent::notice(NoticeLevel::Warning, "slow relay"));

        assert_eq!(value["event"], "notice");
        assert_eq!(value["level"], "warning");
        assert_eq!(value["message"], "slow relay");
    }

    #[test]
    fn test_error_serialization() {
        let value = to_value(&HeadlessEvent::error("Connection failed".to_string(), true));

        assert_eq!(value["event"], "error");
        assert_eq!(value["message"], "Connection failed");
        assert_eq!(value["fatal"], true);
    }
}
