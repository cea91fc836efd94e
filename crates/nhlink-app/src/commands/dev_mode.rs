//! Entering and leaving dev mode

use std::sync::Arc;

use futures_util::future::BoxFuture;

use super::registry::CommandHandler;
use super::target::{CommandOptions, ResourceCapability};
use super::{CommandContext, END_DEV_MODE, START_DEV_MODE};
use nhlink_core::prelude::*;
use nhlink_core::{DevStart, EndDevMode, Event, WorkloadPhase};
use nhlink_daemon::{NhctlCommand, NhctlRunner};

fn require_workload(command: &str, target: &dyn ResourceCapability) -> Result<()> {
    if target.app_name().is_empty() || target.name().is_empty() {
        return Err(Error::command(command, "target has no app or workload"));
    }
    Ok(())
}

/// `Forkmain.startDevMode`: `nhctl dev start`, then announce it.
pub struct StartDevModeCommand<R> {
    context: Arc<CommandContext<R>>,
}

impl<R> StartDevModeCommand<R> {
    pub fn new(context: Arc<CommandContext<R>>) -> Self {
        Self { context }
    }
}

impl<R: NhctlRunner + Sync + 'static> CommandHandler for StartDevModeCommand<R> {
    fn name(&self) -> &'static str {
        START_DEV_MODE
    }

    fn execute<'a>(
        &'a self,
        target: &'a dyn ResourceCapability,
        options: &'a CommandOptions,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            require_workload(START_DEV_MODE, target)?;
            let workload = target.workload_ref();

            let command = NhctlCommand::DevStart {
                app: target.app_name().to_string(),
                workload: target.name().to_string(),
                resource_type: target.resource_type().to_string(),
                flags: options.dev_start.to_flags(target),
            };
            self.context
                .runner
                .run(&command, target.kube_context().as_ref())
                .await?;

            if let Some(run) = options.dev_start.command.as_deref() {
                info!("Dev container command for {}: {}", workload, run);
            }

            self.context.tree.transition(&workload, WorkloadPhase::DevMode);
            self.context
                .bus
                .emit(Event::DevStart(DevStart {
                    source: self.context.session.source_path(),
                }))
                .await;
            Ok(())
        })
    }
}

/// `Forkmain.endDevMode`: dispose locally, tell the others, then `nhctl dev end`.
pub struct EndDevModeCommand<R> {
    context: Arc<CommandContext<R>>,
}

impl<R> EndDevModeCommand<R> {
    pub fn new(context: Arc<CommandContext<R>>) -> Self {
        Self { context }
    }
}

impl<R: NhctlRunner + Sync + 'static> CommandHandler for EndDevModeCommand<R> {
    fn name(&self) -> &'static str {
        END_DEV_MODE
    }

    fn execute<'a>(
        &'a self,
        target: &'a dyn ResourceCapability,
        _options: &'a CommandOptions,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            require_workload(END_DEV_MODE, target)?;
            let workload = target.workload_ref();

            self.context.tree.dispose_workload(&workload);

            info!("Emit endDevMode event from {} command", END_DEV_MODE);
            self.context
                .bus
                .emit(Event::EndDevMode(EndDevMode {
                    workload: workload.clone(),
                    source: self.context.session.source_path(),
                }))
                .await;

            let command = NhctlCommand::DevEnd {
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
