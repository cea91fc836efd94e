//! In-process relay
//!
//! Sessions created from the same [`LoopbackHub`] see each other's envelopes.
//! Used when several sessions share one process, and by tests.

use futures_util::future::BoxFuture;
use tokio::sync::{broadcast, mpsc};

use super::{Relay, INBOUND_CAPACITY};
use nhlink_core::prelude::*;
use nhlink_core::Envelope;

/// Shared broadcast channel behind a set of loopback relays.
#[derive(Debug, Clone)]
pub struct LoopbackHub {
    tx: broadcast::Sender<Envelope>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(INBOUND_CAPACITY);
        Self { tx }
    }

    /// A relay endpoint attached to this hub.
    pub fn relay(&self) -> LoopbackRelay {
        LoopbackRelay {
            tx: self.tx.clone(),
        }
    }
}

impl Default for LoopbackHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One session's endpoint on a [`LoopbackHub`].
#[derive(Debug, Clone)]
pub struct LoopbackRelay {
    tx: broadcast::Sender<Envelope>,
}

impl Relay for LoopbackRelay {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn publish<'a>(&'a self, envelope: &'a Envelope) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            // No subscribers is fine
            if self.tx.send(envelope.clone()).is_err() {
                trace!("loopback publish of {} had no subscribers", envelope.id);
            }
            Ok(())
        })
    }

    fn subscribe(&self) -> BoxFuture<'_, Result<mpsc::Receiver<Envelope>>> {
        Box::pin(async move {
            let mut rx = self.tx.subscribe();
            let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(envelope) => {
                            if inbound_tx.send(envelope).await.is_err() {
                                debug!("loopback subscriber dropped");
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("loopback subscriber lagged, {} envelopes dropped", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });

            Ok(inbound_rx)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nhlink_core::{Event, RefreshTree, SessionId};

    fn envelope(origin: &str, seq: u64) -> Envelope {
        Envelope::new(
            format!("{}-{}", origin, seq),
            SessionId::new(origin),
            Event::RefreshTree(RefreshTree {
                is_current_workspace: false,
            }),
        )
    }

    #[tokio::test]
    async fn test_publisher_and_peer_both_receive() {
        let hub = LoopbackHub::new();
        let a = hub.relay();
        let b = hub.relay();
        let mut a_rx = a.subscribe().await.unwrap();
        let mut b_rx = b.subscribe().await.unwrap();

        a.publish(&envelope("a", 1)).await.unwrap();

        assert_eq!(a_rx.recv().await.unwrap().id, "a-1");
        assert_eq!(b_rx.recv().await.unwrap().id, "a-1");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let hub = LoopbackHub::new();
        assert!(hub.relay().publish(&envelope("a", 1)).await.is_ok());
    }
}
