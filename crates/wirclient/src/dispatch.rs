// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request dispatcher: sequence-id allocation, the correlation map, and the
//! send path with its protocol downgrade/upgrade retries.
//!
//! The correlation map is keyed by integer message id and holds nothing but
//! pending request waiters; spontaneous events travel on the typed event
//! stream instead, so the two can never collide.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{CommandError, Error, Result};
use crate::message::{self, Envelope, Shape, Wrap};
use crate::registry::TargetRegistry;
use crate::transport::TransportTx;

/// Resolution of one protocol command.
pub type CommandOutcome = std::result::Result<serde_json::Value, CommandError>;

/// Substrings of command errors that trigger a protocol-level retry.
const TARGET_DOMAIN_MISSING: &str = "'target' domain was not found";
const RETRY_AFTER_TARGET: [&str; 3] =
    ["domain was not found", "some arguments of method", "missing target"];

// -- Correlation map ----------------------------------------------------------

enum Waiter {
    /// Resolves the caller with the outcome.
    Response(oneshot::Sender<CommandOutcome>),
    /// Ack of a `Target.sendMessageToTarget` wrapper: an error fails the
    /// primary waiter, success is ignored.
    WrapperOf(u64),
    /// Fire-and-forget send: errors are surfaced in the log only.
    ErrorLog { method: String },
}

/// Pending request waiters keyed by message id. Entries are removed on
/// first delivery; a send that times out removes its own entries.
#[derive(Default)]
pub struct CorrelationMap {
    inner: Mutex<HashMap<u64, Waiter>>,
}

impl CorrelationMap {
    pub async fn register_response(&self, id: u64) -> oneshot::Receiver<CommandOutcome> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().await.insert(id, Waiter::Response(tx));
        rx
    }

    pub async fn register_wrapper(&self, wrapper_id: u64, primary_id: u64) {
        self.inner.lock().await.insert(wrapper_id, Waiter::WrapperOf(primary_id));
    }

    pub async fn register_error_log(&self, id: u64, method: &str) {
        self.inner.lock().await.insert(id, Waiter::ErrorLog { method: method.to_owned() });
    }

    /// Deliver an outcome to the waiter for `id`. Returns false when no
    /// waiter was registered (stale or unknown reply).
    pub async fn deliver(&self, id: u64, outcome: CommandOutcome) -> bool {
        let mut current = (id, outcome);
        loop {
            let waiter = self.inner.lock().await.remove(&current.0);
            match waiter {
                Some(Waiter::Response(tx)) => {
                    let _ = tx.send(current.1);
                    return true;
                }
                Some(Waiter::WrapperOf(primary)) => match current.1 {
                    // Wrapper acks are ignored unless they carry an error.
                    Ok(_) => return true,
                    Err(err) => current = (primary, Err(err)),
                },
                Some(Waiter::ErrorLog { method }) => {
                    if let Err(err) = current.1 {
                        warn!(method, %err, "fire-and-forget command failed");
                    }
                    return true;
                }
                None => return false,
            }
        }
    }

    pub async fn remove(&self, id: u64) -> bool {
        self.inner.lock().await.remove(&id).is_some()
    }

    pub async fn contains(&self, id: u64) -> bool {
        self.inner.lock().await.contains_key(&id)
    }

    /// Drop every waiter. Outstanding sends are left to their timeouts.
    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }
}

// -- Dispatcher ---------------------------------------------------------------

/// Per-send routing options.
#[derive(Debug, Clone, Default)]
pub struct SendOpts {
    pub app_id: Option<String>,
    pub page_id: Option<u32>,
    /// Explicit target, overriding the registry lookup.
    pub target_id: Option<String>,
    pub timeout: Option<Duration>,
}

impl SendOpts {
    pub fn page(app_id: impl Into<String>, page_id: u32) -> Self {
        Self { app_id: Some(app_id.into()), page_id: Some(page_id), ..Default::default() }
    }
}

/// Owns the write half of the connection and the correlation map.
pub struct Dispatcher {
    next_id: AtomicU64,
    correlation: Arc<CorrelationMap>,
    registry: Arc<TargetRegistry>,
    tx: TransportTx,
    /// Whether commands are wrapped in `Target.sendMessageToTarget`. Starts
    /// true and is flipped once when the daemon reports no Target domain.
    target_based: AtomicBool,
    identity: RwLock<Envelope>,
    send_timeout: Duration,
    target_wait: Duration,
}

impl Dispatcher {
    pub fn new(
        correlation: Arc<CorrelationMap>,
        registry: Arc<TargetRegistry>,
        tx: TransportTx,
        send_timeout: Duration,
        target_wait: Duration,
    ) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            correlation,
            registry,
            tx,
            target_based: AtomicBool::new(true),
            identity: RwLock::new(Envelope::default()),
            send_timeout,
            target_wait,
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn is_target_based(&self) -> bool {
        self.target_based.load(Ordering::Relaxed)
    }

    pub fn set_target_based(&self, enabled: bool) {
        self.target_based.store(enabled, Ordering::Relaxed);
    }

    pub fn correlation(&self) -> &Arc<CorrelationMap> {
        &self.correlation
    }

    /// Install the session identity used in every envelope.
    pub async fn set_identity(&self, connection_id: &str, sender_id: &str) {
        let mut identity = self.identity.write().await;
        identity.connection_id = Some(connection_id.to_owned());
        identity.sender_id = Some(sender_id.to_owned());
    }

    async fn envelope(&self, opts: &SendOpts) -> Envelope {
        let mut envelope = self.identity.read().await.clone();
        envelope.app_id = opts.app_id.clone();
        envelope.page_id = opts.page_id;
        envelope
    }

    /// Send a prebuilt meta-command record. Replies (when any) arrive as
    /// selector events and are awaited by the orchestrator.
    pub async fn send_record(&self, record: &plist::Value) -> Result<()> {
        self.tx.send_record(record).await
    }

    /// Issue one WebKit protocol command and await its reply.
    ///
    /// With `wait_for_response = false` the future resolves as soon as the
    /// transport accepts the bytes; a later error reply is only logged.
    pub async fn send(
        &self,
        method: &str,
        params: serde_json::Value,
        opts: &SendOpts,
        wait_for_response: bool,
    ) -> Result<serde_json::Value> {
        let timeout = opts.timeout.unwrap_or(self.send_timeout);
        let mut target = self.resolve_target(opts).await;
        let mut waited_for_target = false;

        loop {
            let outcome =
                self.send_once(method, params.clone(), opts, target.as_deref(), wait_for_response, timeout).await?;
            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            // Old devices have no Target domain at all: unwrap and stay
            // unwrapped for the rest of the session.
            if self.is_target_based() && err.message_contains(TARGET_DOMAIN_MISSING) {
                debug!(method, "no Target domain, downgrading to direct protocol");
                self.set_target_based(false);
                continue;
            }

            // The target may simply not exist yet; give it one chance to
            // appear, then retry.
            let retryable = RETRY_AFTER_TARGET.iter().any(|probe| err.message_contains(probe));
            if retryable && opts.app_id.is_some() && !waited_for_target {
                waited_for_target = true;
                target = self.wait_for_target(opts).await.or(target);
                continue;
            }

            return Err(Error::Command(err));
        }
    }

    async fn send_once(
        &self,
        method: &str,
        params: serde_json::Value,
        opts: &SendOpts,
        target: Option<&str>,
        wait_for_response: bool,
        timeout: Duration,
    ) -> Result<CommandOutcome> {
        let envelope = self.envelope(opts).await;
        let msg_id = self.next_id();

        let wrap_target = if self.is_target_based() && message::shape_for(method) != Shape::Direct
        {
            target
        } else {
            None
        };
        let wrapper_id = wrap_target.map(|_| self.next_id());
        let wrap = match (wrap_target, wrapper_id) {
            (Some(target_id), Some(wrapper_msg_id)) => Some(Wrap { target_id, wrapper_msg_id }),
            _ => None,
        };

        let record = message::protocol_command(&envelope, method, params, msg_id, wrap)?;

        let rx = if wait_for_response {
            let rx = self.correlation.register_response(msg_id).await;
            if let Some(wrapper_id) = wrapper_id {
                self.correlation.register_wrapper(wrapper_id, msg_id).await;
            }
            Some(rx)
        } else {
            self.correlation.register_error_log(msg_id, method).await;
            if let Some(wrapper_id) = wrapper_id {
                self.correlation.register_error_log(wrapper_id, method).await;
            }
            None
        };

        if let Err(err) = self.tx.send_record(&record).await {
            self.correlation.remove(msg_id).await;
            if let Some(wrapper_id) = wrapper_id {
                self.correlation.remove(wrapper_id).await;
            }
            return Err(err);
        }

        let Some(rx) = rx else {
            return Ok(Ok(serde_json::Value::Null));
        };

        // A dropped sender (disconnect) leaves the wait to its timeout.
        let reply = async move {
            match rx.await {
                Ok(outcome) => outcome,
                Err(_) => std::future::pending().await,
            }
        };
        let outcome = match tokio::time::timeout(timeout, reply).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.correlation.remove(msg_id).await;
                if let Some(wrapper_id) = wrapper_id {
                    self.correlation.remove(wrapper_id).await;
                }
                return Err(Error::Timeout(format!("{method} after {timeout:?}")));
            }
        };
        // The primary waiter is gone; drop the wrapper entry with it.
        if let Some(wrapper_id) = wrapper_id {
            self.correlation.remove(wrapper_id).await;
        }
        Ok(outcome)
    }

    async fn resolve_target(&self, opts: &SendOpts) -> Option<String> {
        if let Some(target) = opts.target_id.clone() {
            return Some(target);
        }
        match (opts.app_id.as_deref(), opts.page_id) {
            (Some(app), Some(page)) => self.registry.get(app, page).await,
            _ => None,
        }
    }

    /// Poll the registry until a target exists for the addressed page.
    async fn wait_for_target(&self, opts: &SendOpts) -> Option<String> {
        let (Some(app), Some(page)) = (opts.app_id.as_deref(), opts.page_id) else {
            return None;
        };
        let deadline = tokio::time::Instant::now() + self.target_wait;
        loop {
            if let Some(target) = self.registry.get(app, page).await {
                return Some(target);
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(app, page, "no target appeared within {:?}", self.target_wait);
                return None;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
