//! Test doubles for nhctl and relay consumers
//!
//! Enabled for this crate's tests and, through the `test-helpers` feature,
//! for downstream crates' tests.

use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use crate::nhctl::{KubeContext, NhctlCommand, NhctlOutput, NhctlRunner};
use crate::relay::Relay;
use nhlink_core::prelude::*;
use nhlink_core::Envelope;

/// One recorded nhctl invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub command: NhctlCommand,
    pub kube: Option<KubeContext>,
}

/// nhctl runner that records calls instead of spawning a process.
#[derive(Debug, Clone, Default)]
pub struct RecordingRunner {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    fail_with: Arc<Mutex<Option<String>>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with exit code 1 and this stderr.
    pub fn fail_with(&self, stderr: impl Into<String>) {
        *self.fail_with.lock().unwrap() = Some(stderr.into());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Labels of recorded commands, in call order.
    pub fn labels(&self) -> Vec<&'static str> {
        self.calls().iter().map(|c| c.command.label()).collect()
    }
}

impl NhctlRunner for RecordingRunner {
    async fn run(
        &self,
        command: &NhctlCommand,
        kube: Option<&KubeContext>,
    ) -> Result<NhctlOutput> {
        self.calls.lock().unwrap().push(RecordedCall {
            command: command.clone(),
            kube: kube.cloned(),
        });

        match self.fail_with.lock().unwrap().clone() {
            Some(stderr) => Err(Error::NhctlFailed {
                code: Some(1),
                stderr,
            }),
            None => Ok(NhctlOutput::default()),
        }
    }
}

/// Relay whose channel is always down.
#[derive(Debug, Clone, Default)]
pub struct UnreachableRelay {
    attempts: Arc<Mutex<usize>>,
}

impl UnreachableRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

impl Relay for UnreachableRelay {
    fn name(&self) -> &'static str {
        "unreachable"
    }

    fn publish<'a>(&'a self, _envelope: &'a Envelope) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            *self.attempts.lock().unwrap() += 1;
            Err(Error::relay("read ENOTCONN"))
        })
    }

    fn subscribe(&self) -> BoxFuture<'_, Result<mpsc::Receiver<Envelope>>> {
        Box::pin(async move {
            // Sender dropped immediately: the stream simply ends
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        })
    }
}

/// Relay that never answers, to exercise publish timeouts.
#[derive(Debug, Clone, Default)]
pub struct StalledRelay;

impl Relay for StalledRelay {
    fn name(&self) -> &'static str {
        "stalled"
    }

    fn publish<'a>(&'a self, _envelope: &'a Envelope) -> BoxFuture<'a, Result<()>> {
        Box::pin(std::future::pending())
    }

    fn subscribe(&self) -> BoxFuture<'_, Result<mpsc::Receiver<Envelope>>> {
        Box::pin(async move {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        })
    }
}

/// Relay that records every published envelope.
#[derive(Debug, Clone, Default)]
pub struct RecordingRelay {
    published: Arc<Mutex<Vec<Envelope>>>,
}

impl RecordingRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<Envelope> {
        self.published.lock().unwrap().clone()
    }
}

impl Relay for RecordingRelay {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn publish<'a>(&'a self, envelope: &'a Envelope) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.published.lock().unwrap().push(envelope.clone());
            Ok(())
        })
    }

    fn subscribe(&self) -> BoxFuture<'_, Result<mpsc::Receiver<Envelope>>> {
        Box::pin(async move {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_runner_records_and_fails() {
        let runner = RecordingRunner::new();
        NhctlRunner::run(&runner, &NhctlCommand::Uninstall { app: "shop".into() }, None)
            .await
            .unwrap();
        runner.fail_with("boom");
        let err = NhctlRunner::run(&runner, &NhctlCommand::Version, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NhctlFailed { .. }));
        assert_eq!(runner.labels(), vec!["uninstall", "version"]);
    }
}
