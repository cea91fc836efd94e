//! In-memory workload tree
//!
//! Dev spaces contain apps, apps contain workloads. Only apps and workloads
//! carry state; a dev space is just the first segment of a node path. Every
//! change is announced on a broadcast channel as the list of node paths to
//! redraw, root first.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use serde::Serialize;
use tokio::sync::broadcast;

use nhlink_core::prelude::*;
use nhlink_core::{AppRef, WorkloadPhase, WorkloadRef};

const UPDATE_CAPACITY: usize = 64;

/// What part of the tree needs redrawing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "update", rename_all = "camelCase")]
pub enum TreeUpdate {
    /// Re-fetch everything
    Full,
    /// These node paths changed, ancestors first
    Nodes { ids: Vec<String> },
}

#[derive(Debug, Default)]
struct AppNode {
    uninstalled: bool,
    workloads: BTreeMap<String, WorkloadPhase>,
}

#[derive(Debug)]
pub struct WorkloadTree {
    apps: RwLock<HashMap<AppRef, AppNode>>,
    updates: broadcast::Sender<TreeUpdate>,
}

impl WorkloadTree {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            apps: RwLock::new(HashMap::new()),
            updates,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TreeUpdate> {
        self.updates.subscribe()
    }

    fn publish(&self, update: TreeUpdate) {
        // No listener is fine; headless sessions may not render
        let _ = self.updates.send(update);
    }

    /// Ask every view to re-fetch the whole tree.
    pub fn request_full(&self) {
        self.publish(TreeUpdate::Full);
    }

    /// Start tracking a workload in `Unknown`. Returns false if already known.
    pub fn track(&self, workload: &WorkloadRef) -> bool {
        let mut apps = self.apps.write().unwrap_or_else(|e| e.into_inner());
        let app = apps.entry(workload.app()).or_default();
        if app.workloads.contains_key(&workload.workload_name) {
            return false;
        }
        app.workloads
            .insert(workload.workload_name.clone(), WorkloadPhase::Unknown);
        drop(apps);

        self.publish(TreeUpdate::Nodes {
            ids: workload.ancestor_chain(),
        });
        true
    }

    pub fn phase(&self, workload: &WorkloadRef) -> Option<WorkloadPhase> {
        self.apps
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&workload.app())
            .and_then(|app| app.workloads.get(&workload.workload_name).copied())
    }

    pub fn is_app_uninstalled(&self, app: &AppRef) -> bool {
        self.apps
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(app)
            .is_some_and(|node| node.uninstalled)
    }

    /// Move a workload to `next`, tracking it first if needed.
    ///
    /// Returns whether the phase changed. Illegal transitions are refused.
    pub fn transition(&self, workload: &WorkloadRef, next: WorkloadPhase) -> bool {
        let mut apps = self.apps.write().unwrap_or_else(|e| e.into_inner());
        let app = apps.entry(workload.app()).or_default();
        let phase = app
            .workloads
            .entry(workload.workload_name.clone())
            .or_default();

        if *phase == next {
            return false;
        }
        if !phase.can_transition_to(next) {
            warn!(
                "Refusing {} transition {} -> {}",
                workload,
                phase.label(),
                next.label()
            );
            return false;
        }

        debug!("{}: {} -> {}", workload, phase.label(), next.label());
        *phase = next;
        if next == WorkloadPhase::Installing {
            app.uninstalled = false;
        }
        drop(apps);

        self.publish(TreeUpdate::Nodes {
            ids: workload.ancestor_chain(),
        });
        true
    }

    /// Return a workload to `Unknown` after dev mode ended elsewhere.
    ///
    /// Absent, already-disposed and uninstalled workloads are left alone.
    pub fn dispose_workload(&self, workload: &WorkloadRef) -> bool {
        match self.phase(workload) {
            Some(WorkloadPhase::DevMode) | Some(WorkloadPhase::Installing) => {
                self.transition(workload, WorkloadPhase::Unknown)
            }
            _ => {
                trace!("dispose_workload({}) is a no-op", workload);
                false
            }
        }
    }

    /// Mark an app and all its workloads `Uninstalled`.
    ///
    /// Returns false for unknown or already-uninstalled apps.
    pub fn dispose_app(&self, app: &AppRef) -> bool {
        let mut apps = self.apps.write().unwrap_or_else(|e| e.into_inner());
        let Some(node) = apps.get_mut(app) else {
            trace!("dispose_app({}/{}) on unknown app", app.dev_space_name, app.app_name);
            return false;
        };
        if node.uninstalled {
            return false;
        }

        node.uninstalled = true;
        for phase in node.workloads.values_mut() {
            *phase = WorkloadPhase::Uninstalled;
        }
        drop(apps);

        info!("App {}/{} uninstalled", app.dev_space_name, app.app_name);
        self.publish(TreeUpdate::Nodes {
            ids: app.ancestor_chain(),
        });
        true
    }

    /// Put every workload of an app into `Installing`.
    pub fn begin_install(&self, app: &AppRef) {
        for workload in self.workloads_of(app) {
            self.transition(&workload, WorkloadPhase::Installing);
        }
        let mut apps = self.apps.write().unwrap_or_else(|e| e.into_inner());
        apps.entry(app.clone()).or_default().uninstalled = false;
    }

    /// Settle installing workloads: `Unknown` on success, `Uninstalled` otherwise.
    pub fn finish_install(&self, app: &AppRef, succeeded: bool) {
        let next = if succeeded {
            WorkloadPhase::Unknown
        } else {
            WorkloadPhase::Uninstalled
        };
        for workload in self.workloads_of(app) {
            if self.phase(&workload) == Some(WorkloadPhase::Installing) {
                self.transition(&workload, next);
            }
        }
        if !succeeded {
            let mut apps = self.apps.write().unwrap_or_else(|e| e.into_inner());
            if let Some(node) = apps.get_mut(app) {
                node.uninstalled = true;
            }
        }
    }

    fn workloads_of(&self, app: &AppRef) -> Vec<WorkloadRef> {
        self.apps
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(app)
            .map(|node| {
                node.workloads
                    .keys()
                    .map(|name| WorkloadRef::new(&app.dev_space_name, &app.app_name, name))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every tracked workload and its phase, sorted by path.
    pub fn snapshot(&self) -> Vec<(WorkloadRef, WorkloadPhase)> {
        let apps = self.apps.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<(WorkloadRef, WorkloadPhase)> = apps
            .iter()
            .flat_map(|(app, node)| {
                node.workloads.iter().map(move |(name, phase)| {
                    (
                        WorkloadRef::new(&app.dev_space_name, &app.app_name, name),
                        *phase,
                    )
                })
            })
            .collect();
        out.sort_by_key(|(workload, _)| workload.to_string());
        out
    }
}

impl Default for WorkloadTree {
    fn default() -> Self {
        Self::new()
    }
}
