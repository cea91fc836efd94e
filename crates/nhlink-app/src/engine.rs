//! Engine - wires one session's components together
//!
//! The engine owns the bus, tree, refresh control, command registry, launcher,
//! tracker and re-dispatcher for a single session. [`Engine::start`] opens the
//! relay and performs the startup resumptions; [`Engine::run`] delivers relayed
//! envelopes one at a time until shutdown.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::bus::EventBus;
use crate::commands::{register_builtins, CommandContext, CommandRegistry};
use crate::config::Settings;
use crate::deep_link::{self, DeepLink};
use crate::keys;
use crate::launch::Launcher;
use crate::redispatch::Redispatcher;
use crate::refresh::{spawn_refresh_timer, RefreshControl};
use crate::report::{self, NoticeLevel, Notifier};
use crate::store::{Scope, StateStore, StateStoreExt};
use crate::tracker::Tracker;
use crate::tree::WorkloadTree;
use nhlink_core::prelude::*;
use nhlink_core::{CommandDescriptor, Delivery, Envelope, Event, EventKind, Session};
use nhlink_daemon::{NhctlRunner, Relay};

const WELCOME_MESSAGE: &str =
    "nhlink is coordinating this workspace with your other editor sessions.";

/// One session, fully wired.
pub struct Engine {
    session: Session,
    settings: Settings,
    store: Arc<dyn StateStore>,
    bus: Arc<EventBus>,
    tree: Arc<WorkloadTree>,
    refresh: Arc<RefreshControl>,
    registry: Arc<CommandRegistry>,
    launcher: Arc<Launcher>,
    tracker: Arc<Tracker>,
    redispatcher: Arc<Redispatcher>,
    notifier: Arc<dyn Notifier>,
}

impl Engine {
    /// Build every component and bind the bus handlers.
    pub fn new<R>(
        session: Session,
        settings: Settings,
        store: Arc<dyn StateStore>,
        runner: R,
        notifier: Arc<dyn Notifier>,
    ) -> Self
    where
        R: NhctlRunner + Sync + 'static,
    {
        let bus = Arc::new(EventBus::new(
            session.id.clone(),
            settings.relay.timeout(),
        ));
        let tree = Arc::new(WorkloadTree::new());
        let refresh = Arc::new(RefreshControl::new(Arc::clone(&tree)));

        let registry = Arc::new(CommandRegistry::new());
        let context = Arc::new(CommandContext::new(
            runner,
            Arc::clone(&bus),
            Arc::clone(&tree),
            session.clone(),
        ));
        register_builtins(&registry, context);

        let launcher = Arc::new(Launcher::new(
            Arc::clone(&store),
            session.clone(),
            Arc::clone(&refresh),
            Arc::clone(&registry),
        ));
        let tracker = Arc::new(Tracker::new(
            session.clone(),
            Arc::clone(&tree),
            Arc::clone(&refresh),
            Arc::clone(&launcher),
        ));
        let redispatcher = Arc::new(Redispatcher::new(
            Arc::clone(&store),
            session.clone(),
            Arc::clone(&registry),
        ));

        let engine = Self {
            session,
            settings,
            store,
            bus,
            tree,
            refresh,
            registry,
            launcher,
            tracker,
            redispatcher,
            notifier,
        };
        engine.bind_events();
        engine
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn tree(&self) -> &Arc<WorkloadTree> {
        &self.tree
    }

    pub fn refresh(&self) -> &Arc<RefreshControl> {
        &self.refresh
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    fn bind_events(&self) {
        for kind in EventKind::ALL {
            match kind {
                EventKind::RefreshTree => {
                    let tracker = Arc::clone(&self.tracker);
                    self.bus.on(kind, "tracker.refreshTree", move |envelope, _| {
                        let tracker = Arc::clone(&tracker);
                        async move {
                            if let Event::RefreshTree(event) = &envelope.event {
                                tracker.on_refresh_tree(event);
                            }
                            Ok(())
                        }
                    });
                }
                EventKind::DevStart => {
                    let tracker = Arc::clone(&self.tracker);
                    let notifier = Arc::clone(&self.notifier);
                    self.bus.on(kind, "tracker.devStart", move |envelope, _| {
                        let tracker = Arc::clone(&tracker);
                        let notifier = Arc::clone(&notifier);
                        async move {
                            let Event::DevStart(event) = &envelope.event else {
                                return Ok(());
                            };
                            reported(tracker.on_dev_start(event).await, notifier.as_ref())
                        }
                    });
                }
                EventKind::EndDevMode => {
                    let tracker = Arc::clone(&self.tracker);
                    self.bus.on(kind, "tracker.endDevMode", move |envelope, _| {
                        let tracker = Arc::clone(&tracker);
                        async move {
                            if let Event::EndDevMode(event) = &envelope.event {
                                tracker.on_end_dev_mode(event);
                            }
                            Ok(())
                        }
                    });
                }
                EventKind::Uninstall => {
                    let tracker = Arc::clone(&self.tracker);
                    self.bus.on(kind, "tracker.uninstall", move |envelope, _| {
                        let tracker = Arc::clone(&tracker);
                        async move {
                            if let Event::Uninstall(event) = &envelope.event {
                                tracker.on_uninstall(event);
                            }
                            Ok(())
                        }
                    });
                }
                EventKind::Install => {
                    let tracker = Arc::clone(&self.tracker);
                    self.bus.on(kind, "tracker.install", move |envelope, _| {
                        let tracker = Arc::clone(&tracker);
                        async move {
                            if let Event::Install(event) = &envelope.event {
                                tracker.on_install(event);
                            }
                            Ok(())
                        }
                    });
                }
                EventKind::Command => {
                    let redispatcher = Arc::clone(&self.redispatcher);
                    let notifier = Arc::clone(&self.notifier);
                    self.bus.on(kind, "redispatch.command", move |envelope, delivery| {
                        let redispatcher = Arc::clone(&redispatcher);
                        let notifier = Arc::clone(&notifier);
                        async move {
                            let result = redispatcher.on_command(&envelope, delivery).await;
                            reported(result, notifier.as_ref())
                        }
                    });
                }
            }
        }
    }

    /// Open the relay and run the startup resumptions.
    ///
    /// Returns the inbound envelope stream to pass to [`run`](Self::run).
    pub async fn start(&self, relay: Arc<dyn Relay>) -> Result<mpsc::Receiver<Envelope>> {
        let inbound = self.bus.init(relay).await?;

        self.show_welcome_once()?;
        self.refresh.request_refresh();

        if let Err(e) = self.launcher.launch_dev_space().await {
            report::surface(&e, self.notifier.as_ref());
        }
        if let Err(e) = self.redispatcher.resume_pending().await {
            report::surface(&e, self.notifier.as_ref());
        }

        info!("Session {} started", self.session.id);
        Ok(inbound)
    }

    fn show_welcome_once(&self) -> Result<()> {
        if self.store.get_flag(Scope::Global, keys::WELCOME_DID_SHOW)? {
            return Ok(());
        }
        self.notifier.notify(NoticeLevel::Info, WELCOME_MESSAGE);
        self.store.set_as(Scope::Global, keys::WELCOME_DID_SHOW, &true)
    }

    /// Deliver relayed envelopes until `shutdown` turns true.
    ///
    /// A closed inbound stream is logged; the loop keeps running so local
    /// emits and the refresh timer still work.
    pub async fn run(
        &self,
        mut inbound: mpsc::Receiver<Envelope>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let timer = spawn_refresh_timer(
            Arc::clone(&self.refresh),
            self.settings.refresh.interval(),
            shutdown.clone(),
        );
        let mut inbound_open = true;

        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                received = inbound.recv(), if inbound_open => {
                    match received {
                        Some(envelope) => {
                            if envelope.is_echo(&self.session.id, Delivery::Relayed) {
                                trace!("Skipping relayed echo {}", envelope.id);
                                continue;
                            }
                            self.bus.deliver_remote(envelope).await;
                        }
                        None => {
                            warn!("Relay inbound stream closed");
                            inbound_open = false;
                        }
                    }
                }
            }
        }

        timer.abort();
        info!("Session {} stopped", self.session.id);
    }

    /// Emit an event from this session.
    pub async fn emit(&self, event: Event) -> Envelope {
        self.bus.emit(event).await
    }

    /// Persist a command to replay after the next start.
    pub fn defer(&self, descriptor: &CommandDescriptor) -> Result<()> {
        self.redispatcher.defer(descriptor)
    }

    /// Handle a `vscode://` deep link. Returns whether dev mode was started.
    pub async fn handle_deep_link(&self, uri: &str) -> Result<bool> {
        let link = DeepLink::parse(uri)?;
        deep_link::handle(&link, self.store.as_ref(), &self.session, &self.launcher).await
    }
}

/// Surface a handler failure to the user. Store failures still propagate.
fn reported(result: Result<bool>, notifier: &dyn Notifier) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) => {
            report::surface(&e, notifier);
            if e.is_fatal() {
                Err(e)
            } else {
                Ok(())
            }
        }
    }
}
