//! Headless subcommand runners
//!
//! `session` hosts a full engine, `broker` runs only the relay hub, `emit`
//! publishes a single event and `open` handles one deep link.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use nhlink_app::config::{init_config_dir, load_settings, Settings, CONFIG_DIR};
use nhlink_app::report::{self, install_panic_hook};
use nhlink_app::signals::spawn_signal_handler;
use nhlink_app::{Engine, FileStore, SessionLock, StateStore, TreeUpdate, WorkloadTree};
use nhlink_core::prelude::*;
use nhlink_core::{Envelope, Event, Session};
use nhlink_daemon::{Broker, Nhctl, Relay, SocketRelay};

use super::{HeadlessEvent, HeadlessNotifier};

/// Run one session until SIGINT/SIGTERM.
///
/// The first session on the machine takes the broker lock and hosts the relay
/// broker; every session connects to it as a client.
pub async fn run_session(workspace: &Path) -> Result<()> {
    info!("═══════════════════════════════════════════════════════");
    info!("nhlink session starting");
    info!("Workspace: {}", workspace.display());
    info!("═══════════════════════════════════════════════════════");

    if let Err(e) = init_config_dir(workspace) {
        warn!("Could not create {}: {}", CONFIG_DIR, e);
    }
    let settings = load_settings(workspace);
    let session = Session::new(Some(workspace));
    let state_dir = state_dir(&settings);
    let store: Arc<dyn StateStore> = Arc::new(FileStore::new(
        state_dir.clone(),
        session.workspace_root.as_deref(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    let lock = SessionLock::try_acquire(&state_dir)?.map(Arc::new);
    install_panic_hook(lock.clone());

    let notifier = Arc::new(HeadlessNotifier);
    let broker = match &lock {
        Some(_) => spawn_broker(&settings.relay.addr, shutdown_rx.clone()).await,
        None => {
            info!("Another session hosts the relay broker");
            None
        }
    };

    let nhctl = Nhctl::resolve(settings.nhctl.binary())?;
    nhctl.check_version().await;

    let relay = Arc::new(SocketRelay::new(
        settings.relay.addr.clone(),
        settings.relay.reconnect_interval(),
    ));
    let engine = Engine::new(
        session.clone(),
        settings,
        store,
        nhctl,
        notifier.clone(),
    );
    let updates = forward_tree_updates(engine.tree());

    let inbound = match engine.start(relay).await {
        Ok(inbound) => inbound,
        Err(e) => {
            report::surface(&e, notifier.as_ref());
            HeadlessEvent::error(e.to_string(), true).emit();
            release(lock.as_deref());
            return Err(e);
        }
    };
    HeadlessEvent::session_started(
        session.id.as_str(),
        &session.source_path(),
        broker.is_some(),
    )
    .emit();

    engine.run(inbound, shutdown_rx).await;

    updates.abort();
    if let Some(broker) = broker {
        if let Ok(Err(e)) = broker.await {
            warn!("Relay broker stopped with error: {}", e);
        }
    }
    release(lock.as_deref());

    HeadlessEvent::session_stopped(session.id.as_str()).emit();
    info!("nhlink session exiting");
    Ok(())
}

/// Run only the relay broker until SIGINT/SIGTERM.
pub async fn run_broker(workspace: &Path, addr: Option<String>) -> Result<()> {
    let settings = load_settings(workspace);
    let addr = addr.unwrap_or(settings.relay.addr);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    let broker = Broker::bind(&addr).await?;
    HeadlessEvent::broker_listening(&broker.local_addr()?.to_string()).emit();
    broker.run(shutdown_rx).await
}

/// Publish one event, given as its wire JSON, and exit.
pub async fn emit_event(workspace: &Path, json: &str) -> Result<()> {
    let settings = load_settings(workspace);
    let event: Event = serde_json::from_str(json)?;

    // Fresh identity so a session on the same workspace does not take this
    // envelope for its own echo
    let origin = Session::new(None).id;
    let envelope = Envelope::new(format!("{}#1", origin), origin, event);

    let relay = SocketRelay::new(
        settings.relay.addr.clone(),
        settings.relay.reconnect_interval(),
    );
    let timeout = settings.relay.timeout();
    match tokio::time::timeout(timeout, relay.publish(&envelope)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(Error::RelayTimeout {
                millis: timeout.as_millis() as u64,
            })
        }
    }

    HeadlessEvent::emitted(&envelope.id, envelope.kind().label()).emit();
    Ok(())
}

/// Handle a `vscode://` deep link for the workspace.
pub async fn open_link(workspace: &Path, uri: &str) -> Result<()> {
    let settings = load_settings(workspace);
    let session = Session::new(Some(workspace));
    let store: Arc<dyn StateStore> = Arc::new(FileStore::new(
        state_dir(&settings),
        session.workspace_root.as_deref(),
    ));
    let notifier = Arc::new(HeadlessNotifier);

    let nhctl = Nhctl::resolve(settings.nhctl.binary())?;
    let relay = Arc::new(SocketRelay::new(
        settings.relay.addr.clone(),
        settings.relay.reconnect_interval(),
    ));
    let engine = Engine::new(session, settings, store, nhctl, notifier.clone());
    // Only the outbound side is needed; the inbound stream is dropped
    engine.bus().init(relay).await?;

    match engine.handle_deep_link(uri).await {
        Ok(started) => {
            HeadlessEvent::deep_link_handled(started).emit();
            Ok(())
        }
        Err(e) => {
            report::surface(&e, notifier.as_ref());
            Err(e)
        }
    }
}

fn state_dir(settings: &Settings) -> PathBuf {
    settings.store.dir().unwrap_or_else(FileStore::default_dir)
}

async fn spawn_broker(
    addr: &str,
    shutdown: watch::Receiver<bool>,
) -> Option<JoinHandle<Result<()>>> {
    match Broker::bind(addr).await {
        Ok(broker) => Some(tokio::spawn(broker.run(shutdown))),
        Err(e) => {
            // Something else owns the port; sessions can still use it
            error!("Could not host relay broker: {}", e);
            None
        }
    }
}

fn forward_tree_updates(tree: &WorkloadTree) -> JoinHandle<()> {
    let mut rx = tree.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(update) => HeadlessEvent::tree_updated(update).emit(),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Tree update stream lagged by {}", skipped);
                    HeadlessEvent::tree_updated(TreeUpdate::Full).emit();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn release(lock: Option<&SessionLock>) {
    if let Some(lock) = lock {
        lock.release();
    }
}
