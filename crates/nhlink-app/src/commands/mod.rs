//! Command registry and the built-in nhctl commands
//!
//! Every built-in is generic over [`NhctlRunner`] so tests can record the
//! nhctl calls instead of spawning a process.

pub mod app;
pub mod dev_mode;
pub mod registry;
pub mod sync;
pub mod target;

use std::sync::Arc;

use nhlink_core::Session;
use nhlink_daemon::NhctlRunner;

use crate::bus::EventBus;
use crate::tree::WorkloadTree;

pub use app::{InstallCommand, UninstallCommand};
pub use dev_mode::{EndDevModeCommand, StartDevModeCommand};
pub use registry::{CommandHandler, CommandRegistry};
pub use sync::OverrideSyncCommand;
pub use target::{CommandOptions, CommandTarget, DevStartOptions, InstallOptions, ResourceCapability};

pub const START_DEV_MODE: &str = "Forkmain.startDevMode";
pub const END_DEV_MODE: &str = "Forkmain.endDevMode";
pub const OVERRIDE_SYNC: &str = "Forkmain.overrideSyncFolders";
pub const INSTALL_APP: &str = "Forkmain.installApp";
pub const UNINSTALL_APP: &str = "Forkmain.uninstallApp";

/// Everything a built-in command touches.
pub struct CommandContext<R> {
    pub runner: R,
    pub bus: Arc<EventBus>,
    pub tree: Arc<WorkloadTree>,
    pub session: Session,
}

impl<R> CommandContext<R> {
    pub fn new(runner: R, bus: Arc<EventBus>, tree: Arc<WorkloadTree>, session: Session) -> Self {
        Self {
            runner,
            bus,
            tree,
            session,
        }
    }
}

/// Register the five built-in commands.
pub fn register_builtins<R>(registry: &CommandRegistry, context: Arc<CommandContext<R>>)
where
    R: NhctlRunner + Sync + 'static,
{
    registry.register(Arc::new(StartDevModeCommand::new(Arc::clone(&context))));
    registry.register(Arc::new(EndDevModeCommand::new(Arc::clone(&context))));
    registry.register(Arc::new(OverrideSyncCommand::new(Arc::clone(&context))));
    registry.register(Arc::new(InstallCommand::new(Arc::clone(&context))));
    registry.register(Arc::new(UninstallCommand::new(context)));
}
