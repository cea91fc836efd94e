//! Replaying command invocations in the session they belong to
//!
//! A `command` event (or a deferred `tmpCommand` record) names the workspace
//! that must run it in `parameter.associate`. Only that session executes it;
//! everyone else ignores it.

use std::sync::Arc;

use crate::commands::{CommandOptions, CommandRegistry, CommandTarget};
use crate::keys;
use crate::store::{Scope, StateStore, StateStoreExt};
use nhlink_core::prelude::*;
use nhlink_core::{CommandDescriptor, Delivery, Envelope, Event, Session};

pub struct Redispatcher {
    store: Arc<dyn StateStore>,
    session: Session,
    registry: Arc<CommandRegistry>,
}

impl Redispatcher {
    pub fn new(
        store: Arc<dyn StateStore>,
        session: Session,
        registry: Arc<CommandRegistry>,
    ) -> Self {
        Self {
            store,
            session,
            registry,
        }
    }

    /// Handle a `command` envelope from the bus.
    pub async fn on_command(&self, envelope: &Envelope, delivery: Delivery) -> Result<bool> {
        if envelope.is_echo(&self.session.id, delivery) {
            trace!("Skipping relayed echo {}", envelope.id);
            return Ok(false);
        }
        match &envelope.event {
            Event::Command(command) => self.dispatch(&command.value).await,
            other => {
                warn!("Re-dispatcher got a {} event", other.kind().label());
                Ok(false)
            }
        }
    }

    /// Run the described command if it belongs to this session.
    ///
    /// Returns `Ok(false)` without side effects when `associate` names another
    /// workspace or none at all. After the command completes the deferred record is removed.
    pub async fn dispatch(&self, descriptor: &CommandDescriptor) -> Result<bool> {
        if !self.owns(&descriptor.parameter.associate) {
            trace!(
                "Command {} is for {:?}, not {:?}",
                descriptor.name,
                descriptor.parameter.associate,
                self.session.workspace_root
            );
            return Ok(false);
        }

        let target = CommandTarget::from_parameter(&descriptor.parameter);
        let result = self
            .registry
            .execute(&descriptor.name, &target, &CommandOptions::default())
            .await;

        match result {
            Ok(()) => {
                self.store.remove(Scope::Global, keys::TMP_COMMAND)?;
                Ok(true)
            }
            Err(e @ Error::UnknownCommand(_)) => {
                // Can never succeed; don't replay it on every start
                self.store.remove(Scope::Global, keys::TMP_COMMAND)?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// An empty `associate` names no workspace, and a session without one
    /// owns nothing.
    fn owns(&self, associate: &str) -> bool {
        match &self.session.workspace_root {
            Some(root) => !associate.is_empty() && associate == root.to_string_lossy(),
            None => false,
        }
    }

    /// Persist a descriptor to replay after a forced reload.
    pub fn defer(&self, descriptor: &CommandDescriptor) -> Result<()> {
        self.store
            .set_as(Scope::Global, keys::TMP_COMMAND, descriptor)
            .context("Failed to defer command")?;
        info!(
            "Deferred {} for {:?}",
            descriptor.name, descriptor.parameter.associate
        );
        Ok(())
    }

    /// Replay the deferred command left by a previous session, if any.
    pub async fn resume_pending(&self) -> Result<bool> {
        let Some(descriptor) = self
            .store
            .get_as::<CommandDescriptor>(Scope::Global, keys::TMP_COMMAND)?
        else {
            return Ok(false);
        };
        debug!("Found deferred command {}", descriptor.name);
        self.dispatch(&descriptor).await
    }
}
