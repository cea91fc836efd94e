//! TCP broker for [`SocketRelay`](super::SocketRelay) clients
//!
//! Each connection sends newline-delimited JSON envelopes. Every valid frame
//! is fanned out to all connections, the sender included. Malformed frames
//! are logged and dropped; they never reach other sessions.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, RwLock};

use nhlink_core::prelude::*;
use nhlink_core::Envelope;

/// Per-connection outbound queue depth. Slow clients lose frames beyond this.
const CLIENT_QUEUE: usize = 256;

/// A bound broker, ready to [`run`](Broker::run).
pub struct Broker {
    listener: TcpListener,
    hub: Arc<Hub>,
}

#[derive(Default)]
struct Hub {
    conn_counter: AtomicU64,
    clients: RwLock<HashMap<u64, mpsc::Sender<Arc<str>>>>,
}

impl Broker {
    /// Bind the broker's listening socket.
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::relay(format!("Failed to bind broker on {}: {}", addr, e)))?;
        Ok(Self {
            listener,
            hub: Arc::new(Hub::default()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` turns true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr = self.local_addr()?;
        info!("Relay broker listening on {}", addr);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accept = self.listener.accept() => {
                    match accept {
                        Ok((stream, peer)) => {
                            let hub = Arc::clone(&self.hub);
                            tokio::spawn(async move {
                                hub.handle_connection(stream, peer).await;
                            });
                        }
                        Err(e) => warn!("Broker accept error: {}", e),
                    }
                }
            }
        }

        self.hub.clients.write().await.clear();
        info!("Relay broker on {} stopped", addr);
        Ok(())
    }
}

impl Hub {
    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let conn_id = self.conn_counter.fetch_add(1, Ordering::Relaxed);
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel::<Arc<str>>(CLIENT_QUEUE);

        self.clients.write().await.insert(conn_id, tx);
        debug!("Broker connection {} from {}", conn_id, peer);

        let writer = tokio::spawn(Self::write_loop(write_half, rx));

        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match Envelope::from_frame(&line) {
                        Ok(envelope) => {
                            trace!(
                                "Broker fan-out {} ({}) from {}",
                                envelope.id,
                                envelope.kind().label(),
                                envelope.origin
                            );
                            self.fan_out(Arc::from(line.as_str())).await;
                        }
                        Err(e) => warn!("Broker dropped frame from {}: {}", peer, e),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("Broker read error on connection {}: {}", conn_id, e);
                    break;
                }
            }
        }

        self.clients.write().await.remove(&conn_id);
        writer.abort();
        debug!("Broker connection {} closed", conn_id);
    }

    async fn fan_out(&self, frame: Arc<str>) {
        let clients = self.clients.read().await;
        for (id, tx) in clients.iter() {
            if tx.try_send(Arc::clone(&frame)).is_err() {
                warn!("Broker dropped frame for slow connection {}", id);
            }
        }
    }

    async fn write_loop(mut write_half: OwnedWriteHalf, mut rx: mpsc::Receiver<Arc<str>>) {
        while let Some(frame) = rx.recv().await {
            let result = async {
                write_half.write_all(frame.as_bytes()).await?;
                write_half.write_all(b"\n").await?;
                write_half.flush().await
            }
            .await;

            if let Err(e) = result {
                debug!("Broker write failed: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nhlink_core::{DevStart, Event, SessionId};
    use std::time::Duration;

    async fn start_broker() -> (SocketAddr, watch::Sender<bool>) {
        let broker = Broker::bind("127.0.0.1:0").await.unwrap();
        let addr = broker.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(broker.run(shutdown_rx));
        (addr, shutdown_tx)
    }

    #[tokio::test]
    async fn test_fans_out_to_every_connection() {
        let (addr, _shutdown) = start_broker().await;

        let a = TcpStream::connect(addr).await.unwrap();
        let b = TcpStream::connect(addr).await.unwrap();
        let (a_read, mut a_write) = a.into_split();
        let (b_read, _b_write) = b.into_split();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let envelope = Envelope::new(
            "a-1",
            SessionId::new("a"),
            Event::DevStart(DevStart {
                source: "/work/a".into(),
            }),
        );
        a_write
            .write_all(envelope.to_frame().unwrap().as_bytes())
            .await
            .unwrap();

        let mut a_lines = BufReader::new(a_read).lines();
        let mut b_lines = BufReader::new(b_read).lines();
        let got_b = b_lines.next_line().await.unwrap().unwrap();
        let got_a = a_lines.next_line().await.unwrap().unwrap();
        assert_eq!(Envelope::from_frame(&got_b).unwrap(), envelope);
        assert_eq!(Envelope::from_frame(&got_a).unwrap(), envelope);
    }

    #[tokio::test]
    async fn test_malformed_frames_are_not_forwarded() {
        let (addr, _shutdown) = start_broker().await;

        let a = TcpStream::connect(addr).await.unwrap();
        let b = TcpStream::connect(addr).await.unwrap();
        let (_a_read, mut a_write) = a.into_split();
        let (b_read, _b_write) = b.into_split();
        tokio::time::sleep(Duration::from_millis(50)).await;

        a_write.write_all(b"{garbage\n").await.unwrap();

        let mut b_lines = BufReader::new(b_read).lines();
        let next = tokio::time::timeout(Duration::from_millis(200), b_lines.next_line()).await;
        assert!(next.is_err(), "malformed frame must not be relayed");
    }
}
