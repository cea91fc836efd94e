//! nhctl invocation
//!
//! nhctl is an opaque external binary: we build its argument list, run it,
//! stream its output into the log, and interpret the exit code. Nothing here
//! knows how dev mode, sync or port-forwarding actually work.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use nhlink_core::prelude::*;

/// Cluster connection every nhctl call is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeContext {
    pub kubeconfig: PathBuf,
    pub namespace: Option<String>,
}

impl KubeContext {
    pub fn new(kubeconfig: impl Into<PathBuf>, namespace: Option<String>) -> Self {
        Self {
            kubeconfig: kubeconfig.into(),
            namespace: namespace.filter(|ns| !ns.is_empty()),
        }
    }
}

/// Optional flags for `nhctl dev start`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevStartFlags {
    pub mode: Option<String>,
    pub image: Option<String>,
    pub container: Option<String>,
    pub storage_class: Option<String>,
    pub header: Option<String>,
    pub syncs: Vec<String>,
}

/// An nhctl subcommand and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NhctlCommand {
    Install {
        app: String,
        git_url: String,
        install_type: String,
        resource_dir: String,
        values: Option<PathBuf>,
    },
    Uninstall {
        app: String,
    },
    DevStart {
        app: String,
        workload: String,
        resource_type: String,
        flags: DevStartFlags,
    },
    DevEnd {
        app: String,
        workload: String,
        resource_type: String,
    },
    OverrideSync {
        app: String,
        workload: String,
        resource_type: String,
    },
    Version,
}

impl NhctlCommand {
    /// Short name for logging.
    pub fn label(&self) -> &'static str {
        match self {
            NhctlCommand::Install { .. } => "install",
            NhctlCommand::Uninstall { .. } => "uninstall",
            NhctlCommand::DevStart { .. } => "dev start",
            NhctlCommand::DevEnd { .. } => "dev end",
            NhctlCommand::OverrideSync { .. } => "sync-status --override",
            NhctlCommand::Version => "version",
        }
    }

    /// Build the full argument list, cluster flags included.
    pub fn args(&self, kube: Option<&KubeContext>) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        fn push(args: &mut Vec<String>, items: &[&str]) {
            args.extend(items.iter().map(|s| s.to_string()));
        }

        match self {
            NhctlCommand::Install {
                app,
                git_url,
                install_type,
                resource_dir,
                values,
            } => {
                push(&mut args, &["install", app, "-u", git_url, "-t", install_type]);
                if let Some(values) = values {
                    push(&mut args, &["-f", &values.to_string_lossy()]);
                }
                push(&mut args, &["--resource-path", resource_dir]);
            }
            NhctlCommand::Uninstall { app } => push(&mut args, &["uninstall", app, "--force"]),
            NhctlCommand::DevStart {
                app,
                workload,
                resource_type,
                flags,
            } => {
                push(&mut args, &["dev", "start", app, "-d", workload, "-t", resource_type]);
                if let Some(mode) = &flags.mode {
                    push(&mut args, &["--dev-mode", mode]);
                }
                if let Some(image) = &flags.image {
                    push(&mut args, &["-i", image]);
                }
                if let Some(container) = &flags.container {
                    push(&mut args, &["-c", container]);
                }
                if let Some(storage_class) = &flags.storage_class {
                    push(&mut args, &["--storage-class", storage_class]);
                }
                if let Some(header) = &flags.header {
                    push(&mut args, &["--header", header]);
                }
                for sync in &flags.syncs {
                    push(&mut args, &["-s", sync]);
                }
            }
            NhctlCommand::DevEnd {
                app,
                workload,
                resource_type,
            } => push(&mut args, &["dev", "end", app, "-d", workload, "-t", resource_type]),
            NhctlCommand::OverrideSync {
                app,
                workload,
                resource_type,
            } => push(&mut args, &[
                "sync-status",
                app,
                "-d",
                workload,
                "-t",
                resource_type,
                "--override",
            ]),
            NhctlCommand::Version => push(&mut args, &["version"]),
        }

        if let Some(kube) = kube {
            args.push("--kubeconfig".to_string());
            args.push(kube.kubeconfig.to_string_lossy().into_owned());
            if let Some(ns) = &kube.namespace {
                args.push("-n".to_string());
                args.push(ns.clone());
            }
        }

        args
    }
}

/// Captured output of a successful nhctl run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NhctlOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs nhctl commands.
///
/// Commands are generic over this trait so tests can substitute a recorder.
#[trait_variant::make(NhctlRunner: Send)]
pub trait LocalNhctlRunner {
    /// Run a command to completion.
    ///
    /// A non-zero exit status is an error carrying the captured stderr.
    async fn run(&self, command: &NhctlCommand, kube: Option<&KubeContext>)
        -> Result<NhctlOutput>;
}

/// The real nhctl binary.
#[derive(Debug, Clone)]
pub struct Nhctl {
    binary: PathBuf,
}

impl Nhctl {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Use the configured binary, or find `nhctl` on PATH.
    pub fn resolve(configured: Option<&str>) -> Result<Self> {
        match configured.map(str::trim).filter(|s| !s.is_empty()) {
            Some(path) => Ok(Self::new(path)),
            None => which::which("nhctl")
                .map(Self::new)
                .map_err(|_| Error::NhctlNotFound),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Log the installed nhctl version. Failure is not fatal.
    pub async fn check_version(&self) -> Option<String> {
        match NhctlRunner::run(self, &NhctlCommand::Version, None).await {
            Ok(output) => {
                let version = output.stdout.trim().to_string();
                info!("nhctl version: {}", version);
                Some(version)
            }
            Err(e) => {
                warn!("Could not determine nhctl version: {}", e);
                None
            }
        }
    }

    /// Forward each line of a child stream to the log and collect it.
    async fn collect_lines<R: AsyncRead + Unpin>(stream: R, label: &'static str) -> String {
        let mut reader = BufReader::new(stream).lines();
        let mut collected = String::new();

        while let Ok(Some(line)) = reader.next_line().await {
            info!("[nhctl {}] {}", label, line);
            collected.push_str(&line);
            collected.push('\n');
        }

        collected
    }
}

impl NhctlRunner for Nhctl {
    async fn run(
        &self,
        command: &NhctlCommand,
        kube: Option<&KubeContext>,
    ) -> Result<NhctlOutput> {
        let args = command.args(kube);
        info!("[cmd] {} {}", self.binary.display(), args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::NhctlNotFound
                } else {
                    Error::NhctlSpawn {
                        reason: e.to_string(),
                    }
                }
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::NhctlSpawn {
                reason: "stdout was not captured".to_string(),
            })?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::NhctlSpawn {
                reason: "stderr was not captured".to_string(),
            })?;

        let (stdout, stderr) = tokio::join!(
            Self::collect_lines(stdout, "stdout"),
            Self::collect_lines(stderr, "stderr")
        );

        let status = child.wait().await?;
        debug!("nhctl {} exited with {:?}", command.label(), status);

        if status.success() {
            Ok(NhctlOutput { stdout, stderr })
        } else {
            Err(Error::NhctlFailed {
                code: status.code(),
                stderr: stderr.trim().to_string(),
            })
        }
    }
}
