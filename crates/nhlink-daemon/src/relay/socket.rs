//! TCP relay client
//!
//! Connects lazily to a [`Broker`](super::Broker). A lost connection is
//! re-established on the next publish, and by the reader task while someone
//! is still subscribed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

use super::{Relay, INBOUND_CAPACITY};
use nhlink_core::prelude::*;
use nhlink_core::Envelope;

/// Relay endpoint speaking newline-delimited JSON to a broker.
#[derive(Clone)]
pub struct SocketRelay {
    shared: Arc<Shared>,
}

struct Shared {
    addr: String,
    reconnect_interval: Duration,
    /// Current connection's write half, tagged with its generation
    writer: Mutex<Option<(u64, OwnedWriteHalf)>>,
    /// Where inbound envelopes go once someone subscribed
    inbound: std::sync::Mutex<Option<mpsc::Sender<Envelope>>>,
    generation: AtomicU64,
}

impl SocketRelay {
    pub fn new(addr: impl Into<String>, reconnect_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                addr: addr.into(),
                reconnect_interval,
                writer: Mutex::new(None),
                inbound: std::sync::Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn addr(&self) -> &str {
        &self.shared.addr
    }
}

impl Shared {
    fn inbound_sender(&self) -> Option<mpsc::Sender<Envelope>> {
        self.inbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Connect if there is no live connection. Caller holds the writer lock.
    async fn connect_locked(
        self: &Arc<Self>,
        slot: &mut Option<(u64, OwnedWriteHalf)>,
    ) -> Result<()> {
        if slot.is_some() {
            return Ok(());
        }

        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| Error::relay(format!("connect {}: {}", self.addr, e)))?;
        let (read_half, write_half) = stream.into_split();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        *slot = Some((generation, write_half));
        debug!("Relay connected to {} (generation {})", self.addr, generation);

        tokio::spawn(Arc::clone(self).read_loop(read_half, generation));
        Ok(())
    }

    /// Boxed so the connect -> read -> reconnect cycle has a nameable type.
    fn read_loop(
        self: Arc<Self>,
        read_half: OwnedReadHalf,
        generation: u64,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let mut lines = BufReader::new(read_half).lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let envelope = match Envelope::from_frame(&line) {
                            Ok(envelope) => envelope,
                            Err(e) => {
                                warn!("Relay dropped inbound frame: {}", e);
                                continue;
                            }
                        };
                        // Not subscribed yet: nobody to hand it to
                        let Some(tx) = self.inbound_sender() else {
                            continue;
                        };
                        if tx.send(envelope).await.is_err() {
                            debug!("Relay subscriber dropped");
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!("Relay read error: {}", e);
                        break;
                    }
                }
            }

            {
                let mut writer = self.writer.lock().await;
                if matches!(writer.as_ref(), Some((current, _)) if *current == generation) {
                    *writer = None;
                }
            }
            warn!("Relay connection to {} lost", self.addr);

            self.reconnect_while_subscribed().await;
        })
    }

    async fn reconnect_while_subscribed(self: Arc<Self>) {
        loop {
            match self.inbound_sender() {
                Some(tx) if !tx.is_closed() => {}
                _ => return,
            }

            tokio::time::sleep(self.reconnect_interval).await;

            let mut writer = self.writer.lock().await;
            if writer.is_some() {
                // A publish already reconnected
                return;
            }
            match self.connect_locked(&mut writer).await {
                Ok(()) => {
                    info!("Relay reconnected to {}", self.addr);
                    return;
                }
                Err(e) => debug!("Relay reconnect failed: {}", e),
            }
        }
    }
}

/// Drops the connection unless disarmed.
///
/// A publish that fails or is cancelled part way through a frame must not
/// leave a partial line for the next writer on the same stream.
struct PendingWrite<'a> {
    slot: &'a mut Option<(u64, OwnedWriteHalf)>,
    armed: bool,
}

impl Drop for PendingWrite<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.slot = None;
        }
    }
}

impl Relay for SocketRelay {
    fn name(&self) -> &'static str {
        "socket"
    }

    fn publish<'a>(&'a self, envelope: &'a Envelope) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let frame = envelope.to_frame()?;
            let mut writer = self.shared.writer.lock().await;
            self.shared.connect_locked(&mut writer).await?;

            let mut pending = PendingWrite {
                slot: &mut *writer,
                armed: true,
            };
            let Some((_, write_half)) = pending.slot.as_mut() else {
                return Err(Error::relay("no connection"));
            };

            let written = async {
                write_half.write_all(frame.as_bytes()).await?;
                write_half.flush().await
            }
            .await;

            if let Err(e) = written {
                return Err(Error::relay(format!("write to {}: {}", self.shared.addr, e)));
            }
            pending.armed = false;

            trace!("Relay published {}", envelope.id);
            Ok(())
        })
    }

    fn subscribe(&self) -> BoxFuture<'_, Result<mpsc::Receiver<Envelope>>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
            *self
                .shared
                .inbound
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(tx);

            let mut writer = self.shared.writer.lock().await;
            if let Err(e) = self.shared.connect_locked(&mut writer).await {
                // Channel unavailable at startup; keep trying in the background
                warn!("Relay not reachable yet: {}", e);
                drop(writer);
                tokio::spawn(Arc::clone(&self.shared).reconnect_while_subscribed());
            }

            Ok(rx)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::Broker;
    use nhlink_core::{DevStart, Event, Install, SessionId};
    use tokio::sync::watch;

    fn envelope(id: &str) -> Envelope {
        Envelope::new(id, SessionId::new("a"), Event::Install(Install::loading()))
    }

    #[tokio::test]
    async fn test_round_trip_through_broker() {
        let broker = Broker::bind("127.0.0.1:0").await.unwrap();
        let addr = broker.local_addr().unwrap().to_string();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(broker.run(shutdown_rx));

        let a = SocketRelay::new(&addr, Duration::from_millis(50));
        let b = SocketRelay::new(&addr, Duration::from_millis(50));
        let mut a_rx = a.subscribe().await.unwrap();
        let mut b_rx = b.subscribe().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        a.publish(&envelope("a-1")).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), b_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.id, "a-1");
        let echo = tokio::time::timeout(Duration::from_secs(2), a_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(echo.id, "a-1");
    }

    #[tokio::test]
    async fn test_cancelled_publish_drops_connection() {
        // Accepts but never reads, so a large frame stalls part way through
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let peer = tokio::spawn(async move { listener.accept().await.map(|(stream, _)| stream) });

        let relay = SocketRelay::new(&addr, Duration::from_millis(50));
        let large = Envelope::new(
            "a-1",
            SessionId::new("a"),
            Event::DevStart(DevStart {
                source: "x".repeat(32 * 1024 * 1024),
            }),
        );
        let outcome = tokio::time::timeout(Duration::from_millis(300), relay.publish(&large)).await;
        assert!(outcome.is_err());

        assert!(relay.shared.writer.lock().await.is_none());
        drop(peer);
    }

    #[tokio::test]
    async fn test_publish_reconnects_after_cancelled_publish() {
        let broker = Broker::bind("127.0.0.1:0").await.unwrap();
        let addr = broker.local_addr().unwrap().to_string();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(broker.run(shutdown_rx));

        let a = SocketRelay::new(&addr, Duration::from_millis(50));
        let b = SocketRelay::new(&addr, Duration::from_millis(50));
        let mut b_rx = b.subscribe().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        a.publish(&envelope("a-1")).await.unwrap();
        let first_generation = a.shared.generation.load(Ordering::Relaxed);

        // Holding the lock parks the next publish before it writes anything
        let held = a.shared.writer.lock().await;
        let parked = tokio::time::timeout(Duration::from_millis(50), a.publish(&envelope("a-2"))).await;
        assert!(parked.is_err());
        drop(held);

        a.publish(&envelope("a-3")).await.unwrap();
        assert_eq!(a.shared.generation.load(Ordering::Relaxed), first_generation);

        let mut ids = Vec::new();
        while ids.len() < 2 {
            let got = tokio::time::timeout(Duration::from_secs(2), b_rx.recv())
                .await
                .unwrap()
                .unwrap();
            ids.push(got.id);
        }
        assert_eq!(ids, vec!["a-1", "a-3"]);
    }

    #[tokio::test]
    async fn test_publish_fails_when_broker_unreachable() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let relay = SocketRelay::new(format!("127.0.0.1:{}", port), Duration::from_millis(50));
        let err = relay.publish(&envelope("a-1")).await.unwrap_err();
        assert!(err.is_relay_transient());
    }

    #[tokio::test]
    async fn test_subscribe_tolerates_missing_broker() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let relay = SocketRelay::new(format!("127.0.0.1:{}", port), Duration::from_millis(50));
        assert!(relay.subscribe().await.is_ok());
    }
}
