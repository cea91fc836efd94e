//! Installing and uninstalling applications

use std::sync::Arc;

use futures_util::future::BoxFuture;

use super::registry::CommandHandler;
use super::target::{CommandOptions, ResourceCapability};
use super::{CommandContext, INSTALL_APP, UNINSTALL_APP};
use nhlink_core::prelude::*;
use nhlink_core::{Event, Install, Uninstall};
use nhlink_daemon::{NhctlCommand, NhctlRunner};

const INSTALL_DONE: &str = "done";
const INSTALL_FAILED: &str = "failed";

/// `Forkmain.installApp`: brackets `nhctl install` with install status events.
pub struct InstallCommand<R> {
    context: Arc<CommandContext<R>>,
}

impl<R> InstallCommand<R> {
    pub fn new(context: Arc<CommandContext<R>>) -> Self {
        Self { context }
    }
}

impl<R: NhctlRunner + Sync + 'static> CommandHandler for InstallCommand<R> {
    fn name(&self) -> &'static str {
        INSTALL_APP
    }

    fn execute<'a>(
        &'a self,
        target: &'a dyn ResourceCapability,
        options: &'a CommandOptions,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let install = options
                .install
                .as_ref()
                .ok_or_else(|| Error::command(INSTALL_APP, "no install source given"))?;
            if target.app_name().is_empty() {
                return Err(Error::command(INSTALL_APP, "target has no app"));
            }
            let app = target.app_ref();

            self.context.bus.emit(Event::Install(Install::loading())).await;
            self.context.tree.begin_install(&app);

            let command = NhctlCommand::Install {
                app: app.app_name.clone(),
                git_url: install.git_url.clone(),
                install_type: install.install_type.clone(),
                resource_dir: install.resource_dir.clone(),
                values: install.values.clone(),
            };
            let result = self
                .context
                .runner
                .run(&command, target.kube_context().as_ref())
                .await;

            // The closing status always goes out so background refresh resumes
            let status = if result.is_ok() {
                INSTALL_DONE
            } else {
                INSTALL_FAILED
            };
            self.context.tree.finish_install(&app, result.is_ok());
            self.context.bus.emit(Event::Install(Install::new(status))).await;

            result.map(|_| ())
        })
    }
}

/// `Forkmain.uninstallApp`: dispose locally, tell the others, then uninstall.
pub struct UninstallCommand<R> {
    context: Arc<CommandContext<R>>,
}

impl<R> UninstallCommand<R> {
    pub fn new(context: Arc<CommandContext<R>>) -> Self {
        Self { context }
    }
}

impl<R: NhctlRunner + Sync + 'static> CommandHandler for UninstallCommand<R> {
    fn name(&self) -> &'static str {
        UNINSTALL_APP
    }

    fn execute<'a>(
        &'a self,
        target: &'a dyn ResourceCapability,
        _options: &'a CommandOptions,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if target.app_name().is_empty() {
                return Err(Error::command(UNINSTALL_APP, "target has no app"));
            }
            let app = target.app_ref();

            self.context.tree.dispose_app(&app);
            self.context
                .bus
                .emit(Event::Uninstall(Uninstall {
                    app: app.clone(),
                    source: self.context.session.source_path(),
                }))
                .await;

            let command = NhctlCommand::Uninstall {
                app: app.app_name.clone(),
            };
            self.context
                .runner
                .run(&command, target.kube_context().as_ref())
                .await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures::{harness, target};
    use crate::commands::InstallOptions;
    use nhlink_core::WorkloadPhase;

    fn install_options() -> CommandOptions {
        CommandOptions::install(InstallOptions {
            git_url: "https://example.com/shop.git".into(),
            install_type: "rawManifest".into(),
            resource_dir: "deploy".into(),
            values: None,
        })
    }

    fn statuses(h: &crate::commands::fixtures::Harness) -> Vec<String> {
        h.emitted
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match &e.event {
                Event::Install(install) => Some(install.value.status.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_install_brackets_nhctl_with_status() {
        let h = harness();
        let command = InstallCommand::new(Arc::clone(&h.context));

        command.execute(&target(), &install_options()).await.unwrap();

        assert_eq!(statuses(&h), vec!["loading", "done"]);
        assert_eq!(h.runner.labels(), vec!["install"]);
    }

    #[tokio::test]
    async fn test_install_failure_still_closes() {
        let h = harness();
        h.runner.fail_with("chart not found");
        let command = InstallCommand::new(Arc::clone(&h.context));

        let err = command
            .execute(&target(), &install_options())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NhctlFailed { .. }));
        assert_eq!(statuses(&h), vec!["loading", "failed"]);
    }

    #[tokio::test]
    async fn test_install_requires_source() {
        let h = harness();
        let command = InstallCommand::new(Arc::clone(&h.context));
        let err = command
            .execute(&target(), &CommandOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Command { .. }));
        assert!(statuses(&h).is_empty());
    }

    #[tokio::test]
    async fn test_uninstall_disposes_and_emits() {
        let h = harness();
        h.context
            .tree
            .transition(&target().workload_ref(), WorkloadPhase::DevMode);
        let command = UninstallCommand::new(Arc::clone(&h.context));

        command
            .execute(&target(), &CommandOptions::default())
            .await
            .unwrap();

        assert!(h.context.tree.is_app_uninstalled(&target().app_ref()));
        let emitted = h.emitted.lock().unwrap();
        assert_eq!(
            emitted[0].event,
            Event::Uninstall(Uninstall {
                app: target().app_ref(),
                source: "/work/a".into(),
            })
        );
        assert!(matches!(
            h.runner.calls()[0].command,
            NhctlCommand::Uninstall { ref app } if app == "shop"
        ));
    }
}
