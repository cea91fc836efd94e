//! Event bus
//!
//! Handlers are registered per [`EventKind`] and run one after another in
//! registration order. `emit` delivers to local handlers first and then
//! forwards the envelope to the cross-session relay; envelopes coming back
//! from the relay go through [`EventBus::deliver_remote`] and are never
//! re-published.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::mpsc;

use crate::report;
use nhlink_core::prelude::*;
use nhlink_core::{Delivery, Envelope, Event, EventKind, SessionId};
use nhlink_daemon::Relay;

/// Envelopes emitted before `init` that are still waiting for the relay.
pub const PENDING_CAPACITY: usize = 256;

type Handler =
    Arc<dyn Fn(Arc<Envelope>, Delivery) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Clone)]
struct Registration {
    name: String,
    handler: Handler,
}

enum Outbound {
    /// Relay not opened yet; oldest first
    Queued(VecDeque<Envelope>),
    Ready(Arc<dyn Relay>),
}

/// Per-session event bus.
pub struct EventBus {
    session: SessionId,
    seq: AtomicU64,
    handlers: RwLock<HashMap<EventKind, Vec<Registration>>>,
    outbound: Mutex<Outbound>,
    publish_timeout: Duration,
}

impl EventBus {
    pub fn new(session: SessionId, publish_timeout: Duration) -> Self {
        Self {
            session,
            seq: AtomicU64::new(0),
            handlers: RwLock::new(HashMap::new()),
            outbound: Mutex::new(Outbound::Queued(VecDeque::new())),
            publish_timeout,
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Register a handler for one event kind.
    ///
    /// `name` only appears in logs.
    pub fn on<F, Fut>(&self, kind: EventKind, name: impl Into<String>, handler: F)
    where
        F: Fn(Arc<Envelope>, Delivery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let registration = Registration {
            name: name.into(),
            handler: Arc::new(move |envelope, delivery| Box::pin(handler(envelope, delivery))),
        };
        debug!(
            "Registered bus handler '{}' for {}",
            registration.name,
            kind.label()
        );
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(kind)
            .or_default()
            .push(registration);
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Deliver locally, then forward to the relay.
    ///
    /// Never fails: handler errors are isolated and relay trouble is logged.
    pub async fn emit(&self, event: Event) -> Envelope {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let envelope = Envelope::new(
            format!("{}#{}", self.session, seq),
            self.session.clone(),
            event,
        );
        debug!("Emit {} ({})", envelope.id, envelope.kind().label());

        self.dispatch(Arc::new(envelope.clone()), Delivery::Local).await;

        let relay = {
            let mut outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
            match &mut *outbound {
                Outbound::Ready(relay) => Arc::clone(relay),
                Outbound::Queued(queue) => {
                    if queue.len() >= PENDING_CAPACITY {
                        if let Some(dropped) = queue.pop_front() {
                            warn!("Relay not open yet, dropping queued envelope {}", dropped.id);
                        }
                    }
                    queue.push_back(envelope.clone());
                    return envelope;
                }
            }
        };

        self.publish(relay.as_ref(), &envelope).await;
        envelope
    }

    /// Open the relay and flush everything emitted before now.
    ///
    /// Returns the stream of envelopes published by any session; feed them to
    /// [`deliver_remote`](Self::deliver_remote).
    pub async fn init(&self, relay: Arc<dyn Relay>) -> Result<mpsc::Receiver<Envelope>> {
        let inbound = relay.subscribe().await?;

        let queued = {
            let mut outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
            match std::mem::replace(&mut *outbound, Outbound::Ready(Arc::clone(&relay))) {
                Outbound::Queued(queue) => queue,
                Outbound::Ready(_) => {
                    warn!("Event bus initialized twice; using relay '{}'", relay.name());
                    VecDeque::new()
                }
            }
        };

        info!(
            "Event bus on relay '{}' ({} queued envelopes)",
            relay.name(),
            queued.len()
        );
        for envelope in queued {
            self.publish(relay.as_ref(), &envelope).await;
        }

        Ok(inbound)
    }

    pub fn is_initialized(&self) -> bool {
        matches!(
            *self.outbound.lock().unwrap_or_else(|e| e.into_inner()),
            Outbound::Ready(_)
        )
    }

    /// Run local handlers for an envelope received from the relay.
    pub async fn deliver_remote(&self, envelope: Envelope) {
        trace!(
            "Relayed {} ({}) from {}",
            envelope.id,
            envelope.kind().label(),
            envelope.origin
        );
        self.dispatch(Arc::new(envelope), Delivery::Relayed).await;
    }

    async fn publish(&self, relay: &dyn Relay, envelope: &Envelope) {
        match tokio::time::timeout(self.publish_timeout, relay.publish(envelope)).await {
            Ok(Ok(())) => trace!("Published {} via {}", envelope.id, relay.name()),
            Ok(Err(e)) => warn!(
                "Relay '{}' publish of {} failed: {}",
                relay.name(),
                envelope.id,
                e
            ),
            Err(_) => {
                let e = Error::RelayTimeout {
                    millis: self.publish_timeout.as_millis() as u64,
                };
                warn!("Relay '{}' publish of {}: {}", relay.name(), envelope.id, e);
            }
        }
    }

    async fn dispatch(&self, envelope: Arc<Envelope>, delivery: Delivery) {
        let kind = envelope.kind();
        // Snapshot so no lock is held while handlers run
        let registrations = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        for registration in registrations {
            let fut = (registration.handler)(Arc::clone(&envelope), delivery);
            let mut fut = std::pin::pin!(AssertUnwindSafe(fut).catch_unwind());
            // Each poll is marked so the panic hook knows the unwind is caught here
            let outcome =
                std::future::poll_fn(|cx| report::isolated(|| fut.as_mut().poll(cx))).await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let e = Error::handler(&registration.name, e.to_string());
                    error!("{} ({} {})", e, kind.label(), envelope.id);
                }
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(
                        "Bus handler '{}' panicked on {} {}: {}",
                        registration.name,
                        kind.label(),
                        envelope.id,
                        message
                    );
                }
            }
        }
    }
}
