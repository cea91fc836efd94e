//! Name-keyed command registry

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures_util::future::BoxFuture;

use super::target::{CommandOptions, ResourceCapability};
use nhlink_core::prelude::*;

/// A named command that can be executed against a resource.
pub trait CommandHandler: Send + Sync {
    /// Registered name, e.g. `Forkmain.startDevMode`
    fn name(&self) -> &'static str;

    fn execute<'a>(
        &'a self,
        target: &'a dyn ResourceCapability,
        options: &'a CommandOptions,
    ) -> BoxFuture<'a, Result<()>>;
}

#[derive(Default)]
pub struct CommandRegistry {
    handlers: RwLock<HashMap<&'static str, Arc<dyn CommandHandler>>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its name, replacing any previous one.
    pub fn register(&self, handler: Arc<dyn CommandHandler>) {
        let name = handler.name();
        let previous = self
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, handler);
        if previous.is_some() {
            warn!("Command '{}' registered twice; keeping the newest", name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        names.sort_unstable();
        names
    }

    /// Run a command to completion.
    pub async fn execute(
        &self,
        name: &str,
        target: &dyn ResourceCapability,
        options: &CommandOptions,
    ) -> Result<()> {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownCommand(name.to_string()))?;

        info!(
            "{} command executed on {}/{}",
            name,
            target.app_name(),
            target.name()
        );
        handler.execute(target, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandTarget;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
    }

    impl CommandHandler for Counting {
        fn name(&self) -> &'static str {
            "Test.count"
        }

        fn execute<'a>(
            &'a self,
            _target: &'a dyn ResourceCapability,
            _options: &'a CommandOptions,
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_execute_registered_command() {
        let registry = CommandRegistry::new();
        let handler = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        registry.register(handler.clone());

        registry
            .execute("Test.count", &CommandTarget::default(), &CommandOptions::default())
            .await
            .unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.names(), vec!["Test.count"]);
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let registry = CommandRegistry::new();
        let err = registry
            .execute("Nope.nothing", &CommandTarget::default(), &CommandOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownCommand(name) if name == "Nope.nothing"));
    }
}
