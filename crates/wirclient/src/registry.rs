// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Target registry: the `app → page → target` map.
//!
//! The demultiplexer writes to it as `Target.*` notifications arrive; the
//! orchestrator reads it to resolve the live target for a page. Newly
//! adopted targets are queued as [`InitJob`]s for the orchestrator's
//! initialization worker, which serializes all work for one page behind
//! that page's lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, warn};

use crate::model::{ProvisionalCommit, TargetInfo, TargetKind};

/// Work queued for the orchestrator after a target is adopted.
#[derive(Debug, Clone)]
pub struct InitJob {
    pub app_id: String,
    pub page_id: u32,
    pub target_id: String,
    pub provisional: bool,
    pub paused: bool,
    /// Set when the page already went through a provisional handover; the
    /// regular target that follows must not be initialized twice.
    pub skip_init: bool,
}

#[derive(Default)]
struct AppTargets {
    pages: HashMap<u32, String>,
    /// Outstanding provisional handover, at most one per app.
    provisional: Option<ProvisionalCommit>,
    /// Pages whose current target came in provisional.
    provisioned: HashSet<u32>,
}

/// Registry of live targets plus the page-selection tickets that bind
/// incoming targets to pages.
pub struct TargetRegistry {
    apps: RwLock<HashMap<String, AppTargets>>,
    /// Most recent page selection per app. `Target.targetCreated` events
    /// for an app with no ticket are protocol noise and are dropped.
    tickets: RwLock<HashMap<String, u32>>,
    page_locks: Mutex<HashMap<(String, u32), Arc<Mutex<()>>>>,
    lock_timeout: Duration,
    init_tx: mpsc::UnboundedSender<InitJob>,
}

impl TargetRegistry {
    pub fn new(lock_timeout: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<InitJob>) {
        let (init_tx, init_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            apps: RwLock::new(HashMap::new()),
            tickets: RwLock::new(HashMap::new()),
            page_locks: Mutex::new(HashMap::new()),
            lock_timeout,
            init_tx,
        });
        (registry, init_rx)
    }

    // -- Page-selection tickets ----------------------------------------------

    /// Record that `select_page(app, page)` is under way (or was the most
    /// recent selection). Later targets for the app bind to this page.
    pub async fn open_ticket(&self, app_id: &str, page_id: u32) {
        self.tickets.write().await.insert(app_id.to_owned(), page_id);
    }

    pub async fn ticket_for(&self, app_id: &str) -> Option<u32> {
        self.tickets.read().await.get(app_id).copied()
    }

    // -- Lifecycle writes (driven by the demultiplexer) ----------------------

    /// Adopt a target announced by `Target.targetCreated`.
    ///
    /// Only `page`-kind targets for an app with an open ticket mutate the
    /// map; frame and worker targets must never clobber a page target.
    pub async fn add(&self, app_id: &str, info: &TargetInfo) {
        let Some(page_id) = self.ticket_for(app_id).await else {
            debug!(app = app_id, target = %info.target_id, "target for unselected app, ignoring");
            return;
        };
        if info.kind != TargetKind::Page {
            debug!(
                app = app_id,
                target = %info.target_id,
                kind = ?info.kind,
                "non-page target, ignoring",
            );
            return;
        }

        let mut apps = self.apps.write().await;
        let entry = apps.entry(app_id.to_owned()).or_default();
        let previous = entry.pages.insert(page_id, info.target_id.clone());
        if let Some(previous) = previous.filter(|p| *p != info.target_id) {
            // Protocol anomaly, not fatal: the newer target wins.
            warn!(
                app = app_id,
                page = page_id,
                old = %previous,
                new = %info.target_id,
                "target replaced for page",
            );
        }
        let skip_init = !info.is_provisional && entry.provisioned.contains(&page_id);
        if info.is_provisional {
            entry.provisioned.insert(page_id);
        }
        drop(apps);

        let _ = self.init_tx.send(InitJob {
            app_id: app_id.to_owned(),
            page_id,
            target_id: info.target_id.clone(),
            provisional: info.is_provisional,
            paused: info.is_paused,
            skip_init,
        });
    }

    /// Record a `Target.didCommitProvisionalTarget` descriptor. The actual
    /// repoint happens when the old target is destroyed.
    pub async fn commit(&self, app_id: &str, commit: ProvisionalCommit) {
        let mut apps = self.apps.write().await;
        let entry = apps.entry(app_id.to_owned()).or_default();
        if let Some(pending) = entry.provisional.replace(commit) {
            warn!(
                app = app_id,
                old = %pending.old,
                new = %pending.new,
                "provisional commit superseded before destroy",
            );
        }
    }

    /// Drop a destroyed target. When it is the `old` side of a pending
    /// provisional commit, the page is repointed to `new` atomically.
    pub async fn remove(&self, app_id: &str, target_id: &str) {
        let mut apps = self.apps.write().await;
        let Some(entry) = apps.get_mut(app_id) else {
            debug!(app = app_id, target = target_id, "destroy for unknown app");
            return;
        };

        if entry.provisional.as_ref().is_some_and(|p| p.old == target_id) {
            let Some(commit) = entry.provisional.take() else {
                return;
            };
            match entry.pages.iter_mut().find(|(_, t)| **t == commit.old) {
                Some((page, target)) => {
                    debug!(
                        app = app_id,
                        page,
                        old = %commit.old,
                        new = %commit.new,
                        "provisional target committed",
                    );
                    *target = commit.new;
                }
                None => {
                    warn!(app = app_id, old = %commit.old, "no page held the committed target");
                }
            }
            return;
        }

        match entry.pages.iter().find(|(_, t)| **t == target_id).map(|(p, _)| *p) {
            Some(page) => {
                entry.pages.remove(&page);
                debug!(app = app_id, page, target = target_id, "target destroyed");
            }
            None => {
                debug!(app = app_id, target = target_id, "destroy for untracked target");
            }
        }
    }

    // -- Reads ---------------------------------------------------------------

    pub async fn get(&self, app_id: &str, page_id: u32) -> Option<String> {
        self.apps.read().await.get(app_id)?.pages.get(&page_id).cloned()
    }

    /// Whether any page of the app currently maps to `target_id`.
    pub async fn holds_target(&self, app_id: &str, target_id: &str) -> bool {
        self.apps
            .read()
            .await
            .get(app_id)
            .is_some_and(|e| e.pages.values().any(|t| t == target_id))
    }

    // -- Per-page serialization ----------------------------------------------

    /// Acquire the `(app, page)` lock, bounded by the configured holding
    /// time. On timeout the caller proceeds unserialized; a stuck holder
    /// must not wedge page selection forever.
    pub async fn lock_page(&self, app_id: &str, page_id: u32) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.page_locks.lock().await;
            Arc::clone(
                locks.entry((app_id.to_owned(), page_id)).or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        match tokio::time::timeout(self.lock_timeout, lock.lock_owned()).await {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!(app = app_id, page = page_id, "page lock acquisition timed out");
                None
            }
        }
    }

    /// Drop all state. Used on disconnect.
    pub async fn clear(&self) {
        self.apps.write().await.clear();
        self.tickets.write().await.clear();
        self.page_locks.lock().await.clear();
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
