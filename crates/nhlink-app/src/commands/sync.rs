//! Overriding remote file sync state

use std::sync::Arc;

use futures_util::future::BoxFuture;

use super::registry::CommandHandler;
use super::target::{CommandOptions, ResourceCapability};
use super::{CommandContext, OVERRIDE_SYNC};
use nhlink_core::prelude::*;
use nhlink_daemon::{NhctlCommand, NhctlRunner};

/// `Forkmain.overrideSyncFolders`: push local folders over remote changes.
pub struct OverrideSyncCommand<R> {
    context: Arc<CommandContext<R>>,
}

impl<R> OverrideSyncCommand<R> {
    pub fn new(context: Arc<CommandContext<R>>) -> Self {
        Self { context }
    }
}

impl<R: NhctlRunner + Sync + 'static> CommandHandler for OverrideSyncCommand<R> {
    fn name(&self) -> &'static str {
        OVERRIDE_SYNC
    }

    fn execute<'a>(
        &'a self,
        target: &'a dyn ResourceCapability,
        _options: &'a CommandOptions,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if target.app_name().is_empty() || target.name().is_empty() {
                debug!("{} skipped: no app or service", OVERRIDE_SYNC);
                return Ok(());
            }

            let command = NhctlCommand::OverrideSync {
                app: target.app_name().to_string(),
                workload: target.name().to_string(),
                resource_type: target.resource_type().to_string(),
            };
            self.context
                .runner
                .run(&command, target.kube_context().as_ref())
                .await?;
            Ok(())
        })
    }
}
