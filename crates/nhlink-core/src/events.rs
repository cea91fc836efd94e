//! Bus events and the envelope they travel in
//!
//! The set of event kinds is closed. Each kind has a typed payload whose JSON
//! shape is the wire contract shared by every session:
//!
//! ```json
//! {"kind": "endDevMode", "payload": {"devSpaceName": "..", "appName": "..", "workloadName": "..", "source": ".."}}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{AppRef, SessionId, WorkloadRef};

/// Install status value that suspends background polling.
pub const INSTALL_LOADING: &str = "loading";

// ─────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTree {
    pub is_current_workspace: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevStart {
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndDevMode {
    #[serde(flatten)]
    pub workload: WorkloadRef,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uninstall {
    #[serde(flatten)]
    pub app: AppRef,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallStatus {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Install {
    pub value: InstallStatus,
}

impl Install {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            value: InstallStatus {
                status: status.into(),
            },
        }
    }

    pub fn loading() -> Self {
        Self::new(INSTALL_LOADING)
    }

    pub fn is_loading(&self) -> bool {
        self.value.status == INSTALL_LOADING
    }
}

/// Parameter bag of a deferred command invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandParameter {
    /// Workspace path of the session that must execute the command
    #[serde(default)]
    pub associate: String,
    #[serde(default)]
    pub kubeconfig: String,
    #[serde(default, rename = "nameSpace")]
    pub name_space: String,
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub status: String,
}

/// A command invocation to be replayed by the session named in `associate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub name: String,
    pub parameter: CommandParameter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEvent {
    pub value: CommandDescriptor,
}

// ─────────────────────────────────────────────────────────────────
// Event
// ─────────────────────────────────────────────────────────────────

/// Every event the bus carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum Event {
    RefreshTree(RefreshTree),
    DevStart(DevStart),
    EndDevMode(EndDevMode),
    Uninstall(Uninstall),
    Install(Install),
    Command(CommandEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::RefreshTree(_) => EventKind::RefreshTree,
            Event::DevStart(_) => EventKind::DevStart,
            Event::EndDevMode(_) => EventKind::EndDevMode,
            Event::Uninstall(_) => EventKind::Uninstall,
            Event::Install(_) => EventKind::Install,
            Event::Command(_) => EventKind::Command,
        }
    }
}

/// Discriminant of [`Event`], used to register handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RefreshTree,
    DevStart,
    EndDevMode,
    Uninstall,
    Install,
    Command,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::RefreshTree,
        EventKind::DevStart,
        EventKind::EndDevMode,
        EventKind::Uninstall,
        EventKind::Install,
        EventKind::Command,
    ];

    /// Wire name of this kind.
    pub fn label(self) -> &'static str {
        match self {
            EventKind::RefreshTree => "refreshTree",
            EventKind::DevStart => "devStart",
            EventKind::EndDevMode => "endDevMode",
            EventKind::Uninstall => "uninstall",
            EventKind::Install => "install",
            EventKind::Command => "command",
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────

/// How an envelope reached the local handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Emitted by this session
    Local,
    /// Received from the cross-session relay
    Relayed,
}

/// An immutable event tagged with its origin session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub id: String,
    pub origin: SessionId,
    pub sent_at: DateTime<Utc>,
    pub event: Event,
}

impl Envelope {
    pub fn new(id: impl Into<String>, origin: SessionId, event: Event) -> Self {
        Self {
            id: id.into(),
            origin,
            sent_at: Utc::now(),
            event,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    /// Whether this is our own event coming back through the relay.
    ///
    /// Such events were already applied when they were emitted locally.
    pub fn is_echo(&self, local: &SessionId, delivery: Delivery) -> bool {
        delivery == Delivery::Relayed && &self.origin == local
    }

    /// Encode as one newline-terminated JSON frame.
    pub fn to_frame(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Decode one JSON frame (trailing whitespace allowed).
    pub fn from_frame(line: &str) -> Result<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(Error::frame("empty frame"));
        }
        serde_json::from_str(trimmed).map_err(|e| Error::frame(e.to_string()))
    }
}
