// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session orchestrator.
//!
//! One [`Inspector`] owns the whole connection: the reader task that feeds
//! the demultiplexer, the state task that mirrors application and listing
//! events, and the initialization worker that brings newly created targets
//! up to a debuggable state. Consumers drive it through `select_app`,
//! `select_page`, and `send_command`, and observe it through the typed
//! event stream.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use indexmap::IndexMap;
use serde_json::json;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::InspectorConfig;
use crate::demux::{Demux, InspectorEvent};
use crate::dispatch::{CorrelationMap, Dispatcher, SendOpts};
use crate::error::{Error, Result};
use crate::message::{self, methods, Envelope};
use crate::model::{AppRecord, PageRecord, SetupInfo};
use crate::registry::{InitJob, TargetRegistry};
use crate::transport::Transport;
use crate::wire::{self, FrameDecoder};

/// Bundle suffixes probed during app selection, in priority order.
const WEB_CONTENT_PROBES: [&str; 4] = [
    "com.apple.WebKit.WebContent",
    "process-com.apple.WebKit.WebContent",
    "process-SafariViewService",
    "com.apple.SafariViewService",
];
/// Wildcard probe: bypasses bundle filtering entirely.
const ANY_APP: &str = "*";

pub const SAFARI_BUNDLE_ID: &str = "com.apple.mobilesafari";

const APP_RETRY_INTERVAL: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const CANDIDATE_LISTING_WAIT: Duration = Duration::from_millis(500);

/// Outcome of a cancellable bounded wait. Cancellation is cooperative and
/// distinct from a timeout; the caller observes partial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waited<T> {
    Done(T),
    TimedOut,
    Cancelled,
}

/// Caller-supplied predicate over `document.readyState` gating page
/// selection.
#[derive(Clone)]
pub struct ReadinessDetector {
    pub predicate: Arc<dyn Fn(&str) -> bool + Send + Sync>,
    pub timeout: Duration,
}

impl ReadinessDetector {
    /// Waits until the document reports `interactive` or `complete`.
    pub fn interactive(timeout: Duration) -> Self {
        Self {
            predicate: Arc::new(|state| state == "interactive" || state == "complete"),
            timeout,
        }
    }
}

/// Options for [`Inspector::select_app`].
#[derive(Debug, Clone, Default)]
pub struct SelectAppOpts {
    /// Extra bundle ids appended to the probe set.
    pub bundle_ids: Vec<String>,
    /// Bundles never selected, even when matched.
    pub ignore_bundle_ids: Vec<String>,
    /// Overrides the configured retry count.
    pub max_tries: Option<u32>,
    /// Drop `about:blank` pages from listings.
    pub ignore_about_blank: bool,
}

enum TryOutcome {
    Selected { app_id: String, pages: Vec<PageRecord> },
    /// No candidate produced a non-empty listing yet.
    Pending,
    /// A different application connected mid-selection; retry from scratch.
    NewApp(String),
}

/// A live Web Inspector session.
pub struct Inspector {
    config: InspectorConfig,
    connection_id: String,
    sender_id: String,
    events: broadcast::Sender<InspectorEvent>,
    correlation: Arc<CorrelationMap>,
    registry: Arc<TargetRegistry>,
    dispatcher: Arc<Dispatcher>,
    demux: Arc<Demux>,
    apps: RwLock<IndexMap<String, AppRecord>>,
    pages: RwLock<HashMap<String, Vec<PageRecord>>>,
    setup: RwLock<Option<SetupInfo>>,
    detectors: Mutex<HashMap<(String, u32), ReadinessDetector>>,
    initialized: RwLock<HashSet<(String, u32)>>,
    cancel: CancellationToken,
    transport_cancel: CancellationToken,
    connected: AtomicBool,
}

impl Inspector {
    /// Drive the connect handshake over an established transport: announce
    /// our connection key, then materialize the reported application list.
    /// An empty list still yields a usable session; applications may
    /// connect later.
    pub async fn connect(transport: Transport, config: InspectorConfig) -> Result<Arc<Self>> {
        let Transport { tx, inbound, cancel: transport_cancel, preframed } = transport;

        let (events, _) = broadcast::channel(256);
        let correlation = Arc::new(CorrelationMap::default());
        let (registry, init_rx) = TargetRegistry::new(config.target_creation());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&correlation),
            Arc::clone(&registry),
            tx,
            config.send_timeout(),
            config.target_wait(),
        ));
        let demux =
            Arc::new(Demux::new(events.clone(), Arc::clone(&correlation), Arc::clone(&registry)));

        let connection_id = Uuid::new_v4().to_string().to_uppercase();
        let sender_id = Uuid::new_v4().to_string().to_uppercase();
        dispatcher.set_identity(&connection_id, &sender_id).await;

        let inspector = Arc::new(Self {
            config,
            connection_id,
            sender_id,
            events,
            correlation,
            registry,
            dispatcher,
            demux: Arc::clone(&demux),
            apps: RwLock::new(IndexMap::new()),
            pages: RwLock::new(HashMap::new()),
            setup: RwLock::new(None),
            detectors: Mutex::new(HashMap::new()),
            initialized: RwLock::new(HashSet::new()),
            cancel: CancellationToken::new(),
            transport_cancel,
            connected: AtomicBool::new(true),
        });

        // Subscriptions are taken before the reader starts so no event can
        // slip past the state mirror or the handshake wait.
        let state_rx = inspector.events.subscribe();
        let mut rx = inspector.events.subscribe();
        tokio::spawn(Self::read_loop(Arc::clone(&inspector), inbound, preframed, demux));
        tokio::spawn(Self::state_loop(Arc::clone(&inspector), state_rx));
        tokio::spawn(Self::init_loop(Arc::clone(&inspector), init_rx));

        let record = message::set_connection_key(&inspector.base_envelope())?;
        inspector.dispatcher.send_record(&record).await?;

        let timeout = inspector.config.send_timeout();
        let waited = inspector
            .wait_event(&mut rx, timeout, |event| match event {
                InspectorEvent::AppList { apps } => Some(apps.clone()),
                _ => None,
            })
            .await;
        match waited {
            Waited::Done(apps) => {
                *inspector.apps.write().await = apps;
            }
            Waited::TimedOut => {
                inspector.teardown(Some("no application list from daemon".to_owned())).await;
                return Err(Error::Timeout("connected application list".to_owned()));
            }
            Waited::Cancelled => return Err(Error::Disconnected),
        }

        info!(connection = %inspector.connection_id, "inspector session established");
        Ok(inspector)
    }

    // -- Accessors -----------------------------------------------------------

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Subscribe to the typed event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<InspectorEvent> {
        self.events.subscribe()
    }

    /// Handle for cancelling every outstanding wait of this session.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current application table.
    pub async fn apps(&self) -> IndexMap<String, AppRecord> {
        self.apps.read().await.clone()
    }

    /// Last listing received for an application.
    pub async fn pages(&self, app_id: &str) -> Vec<PageRecord> {
        self.pages.read().await.get(app_id).cloned().unwrap_or_default()
    }

    /// Device identity, once `_rpc_reportSetup:` arrived.
    pub async fn setup_info(&self) -> Option<SetupInfo> {
        self.setup.read().await.clone()
    }

    /// Execution-context ids observed so far (diagnostics).
    pub async fn contexts(&self) -> Vec<i64> {
        self.demux.contexts().await
    }

    pub(crate) fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub(crate) fn config(&self) -> &InspectorConfig {
        &self.config
    }

    // -- Commands ------------------------------------------------------------

    /// Issue one WebKit protocol command.
    pub async fn send_command(
        &self,
        method: &str,
        params: serde_json::Value,
        opts: &SendOpts,
        wait_for_response: bool,
    ) -> Result<serde_json::Value> {
        self.ensure_connected()?;
        self.dispatcher.send(method, params, opts, wait_for_response).await
    }

    /// Tear the session down. Idempotent.
    pub async fn disconnect(&self) {
        self.teardown(None).await;
    }

    // -- App selection -------------------------------------------------------

    /// Pick a debuggable application and return its page listing.
    ///
    /// Candidates are collected by bundle-suffix probes (WebContent hosts,
    /// Safari view services, the wildcard, plus any requested bundles) and
    /// extended with proxies whose host is itself a candidate. Each try
    /// sends `connectToApp` per candidate; an empty listing means the app
    /// is still wiring up, so the next candidate (or the next round, 500 ms
    /// later) gets its chance.
    pub async fn select_app(
        &self,
        opts: &SelectAppOpts,
    ) -> Result<Option<(String, Vec<PageRecord>)>> {
        self.ensure_connected()?;

        let mut probes: Vec<String> = WEB_CONTENT_PROBES.map(str::to_owned).to_vec();
        probes.push(ANY_APP.to_owned());
        for bundle in &opts.bundle_ids {
            if !probes.contains(bundle) {
                probes.push(bundle.clone());
            }
        }

        let max_tries = opts.max_tries.unwrap_or(self.config.max_app_tries).max(1);
        let mut rx = self.events.subscribe();

        for attempt in 1..=max_tries {
            let raw = self.candidate_apps(&probes).await;
            let candidates: Vec<String> = {
                let apps = self.apps.read().await;
                raw.iter()
                    .filter(|id| {
                        apps.get(id.as_str())
                            .is_some_and(|app| !opts.ignore_bundle_ids.contains(&app.bundle_id))
                    })
                    .cloned()
                    .collect()
            };
            if !raw.is_empty() && candidates.is_empty() {
                debug!("every candidate application is on the ignore list");
                return Ok(None);
            }

            match self.try_candidates(&candidates, opts.ignore_about_blank, &mut rx).await? {
                TryOutcome::Selected { app_id, pages } => {
                    info!(app = %app_id, pages = pages.len(), "application selected");
                    self.pages.write().await.insert(app_id.clone(), pages.clone());
                    return Ok(Some((app_id, pages)));
                }
                TryOutcome::NewApp(app_id) => {
                    debug!(app = %app_id, attempt, "new application connected mid-selection");
                    continue;
                }
                TryOutcome::Pending => {}
            }

            if attempt < max_tries {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Ok(None),
                    _ = tokio::time::sleep(APP_RETRY_INTERVAL) => {}
                }
            }
        }
        Ok(None)
    }

    /// Apps matched by the probe set, plus proxies hosted by a match. A
    /// proxy whose host id names no known record is skipped.
    async fn candidate_apps(&self, probes: &[String]) -> Vec<String> {
        let apps = self.apps.read().await;
        let mut out: Vec<String> = Vec::new();
        for probe in probes {
            for (id, app) in apps.iter() {
                let matched = probe == ANY_APP || app.bundle_id.ends_with(probe.as_str());
                if matched && !out.contains(id) {
                    out.push(id.clone());
                }
            }
        }
        for (id, app) in apps.iter().filter(|(_, app)| app.is_proxy) {
            let Some(host) = app.host_id.as_deref() else {
                continue;
            };
            if !apps.contains_key(host) {
                continue;
            }
            if out.iter().any(|c| c == host) && !out.contains(id) {
                out.push(id.clone());
            }
        }
        out
    }

    async fn try_candidates(
        &self,
        candidates: &[String],
        ignore_about_blank: bool,
        rx: &mut broadcast::Receiver<InspectorEvent>,
    ) -> Result<TryOutcome> {
        for candidate in candidates {
            debug!(app = %candidate, "requesting page listing");
            let record = message::connect_to_app(&self.base_envelope(), candidate)?;
            self.dispatcher.send_record(&record).await?;

            let waited = self
                .wait_event(rx, CANDIDATE_LISTING_WAIT, |event| match event {
                    InspectorEvent::Listing { app_id, pages } if app_id == candidate => {
                        Some(Ok(pages.clone()))
                    }
                    InspectorEvent::AppConnected { app } if app.id != *candidate => {
                        Some(Err(app.id.clone()))
                    }
                    _ => None,
                })
                .await;

            match waited {
                Waited::Done(Ok(pages)) => {
                    let pages: Vec<PageRecord> = if ignore_about_blank {
                        pages.into_iter().filter(|p| p.url != "about:blank").collect()
                    } else {
                        pages
                    };
                    if !pages.is_empty() {
                        return Ok(TryOutcome::Selected { app_id: candidate.clone(), pages });
                    }
                    debug!(app = %candidate, "empty page listing, connection still pending");
                }
                Waited::Done(Err(new_app)) => return Ok(TryOutcome::NewApp(new_app)),
                Waited::TimedOut => {}
                Waited::Cancelled => return Ok(TryOutcome::Pending),
            }
        }
        Ok(TryOutcome::Pending)
    }

    // -- Page selection ------------------------------------------------------

    /// Attach to one page: flash the highlight, open the sender socket,
    /// then wait for its target and the initialization signal. Mirrors the
    /// sequence Desktop Safari performs when a page is picked in the
    /// inspector UI.
    pub async fn select_page(
        &self,
        app_id: &str,
        page_id: u32,
        readiness: Option<ReadinessDetector>,
    ) -> Result<()> {
        self.ensure_connected()?;

        if let Some(detector) = readiness {
            self.detectors.lock().await.insert((app_id.to_owned(), page_id), detector);
        }
        self.registry.open_ticket(app_id, page_id).await;

        // Already selected and initialized once: nothing to drive.
        if self.registry.get(app_id, page_id).await.is_some()
            && self.initialized.read().await.contains(&(app_id.to_owned(), page_id))
        {
            return Ok(());
        }

        let guard = self.registry.lock_page(app_id, page_id).await;
        let mut rx = self.events.subscribe();

        let envelope = self.page_envelope(app_id, page_id);
        self.dispatcher.send_record(&message::indicate_web_view(&envelope, true)?).await?;
        self.dispatcher.send_record(&message::indicate_web_view(&envelope, false)?).await?;
        self.dispatcher.send_record(&message::set_sender_key(&envelope)?).await?;

        // Wait for Target.targetCreated to populate the registry.
        let deadline = tokio::time::Instant::now() + self.config.target_wait();
        loop {
            if self.registry.get(app_id, page_id).await.is_some() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(app = app_id, page = page_id, "no target appeared for page");
                break;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
        drop(guard);

        let waited = self
            .wait_event(&mut rx, self.config.init_wait(), |event| match event {
                InspectorEvent::PageInitialized { app_id: a, page_id: p }
                    if a == app_id && *p == page_id =>
                {
                    Some(())
                }
                _ => None,
            })
            .await;
        match waited {
            Waited::Done(()) => {}
            // Non-fatal: the page may still become usable, and callers can
            // bound their own commands.
            Waited::TimedOut => {
                warn!(app = app_id, page = page_id, "page initialization signal timed out");
            }
            Waited::Cancelled => {}
        }
        Ok(())
    }

    // -- Background loops ----------------------------------------------------

    async fn read_loop(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<Bytes>,
        preframed: bool,
        demux: Arc<Demux>,
    ) {
        let mut decoder = FrameDecoder::new(self.config.max_frame_len);
        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => return,
                chunk = inbound.recv() => chunk,
            };
            let Some(chunk) = chunk else {
                self.teardown(Some("transport closed".to_owned())).await;
                return;
            };

            let records = if preframed {
                wire::decode_record(&chunk).map(|record| vec![record])
            } else {
                decoder.feed(&chunk)
            };
            let records = match records {
                Ok(records) => records,
                Err(err) => {
                    self.teardown(Some(err.to_string())).await;
                    return;
                }
            };
            for record in records {
                if let Err(err) = demux.handle_record(&record).await {
                    self.teardown(Some(err.to_string())).await;
                    return;
                }
            }
        }
    }

    /// Mirror application, listing, and setup events into session state.
    async fn state_loop(self: Arc<Self>, mut rx: broadcast::Receiver<InspectorEvent>) {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => return,
                event = rx.recv() => event,
            };
            match event {
                Ok(InspectorEvent::AppList { apps }) => {
                    *self.apps.write().await = apps;
                }
                Ok(InspectorEvent::AppConnected { app })
                | Ok(InspectorEvent::AppUpdated { app }) => {
                    self.apps.write().await.insert(app.id.clone(), app);
                }
                Ok(InspectorEvent::AppDisconnected { app_id }) => {
                    self.apps.write().await.shift_remove(&app_id);
                    self.pages.write().await.remove(&app_id);
                }
                Ok(InspectorEvent::Listing { app_id, pages }) => {
                    self.pages.write().await.insert(app_id, pages);
                }
                Ok(InspectorEvent::ReportSetup(setup)) => {
                    *self.setup.write().await = Some(setup);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "state loop lagged behind the event stream");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// Consume queued initialization jobs, one at a time.
    async fn init_loop(self: Arc<Self>, mut init_rx: mpsc::UnboundedReceiver<InitJob>) {
        loop {
            let job = tokio::select! {
                _ = self.cancel.cancelled() => return,
                job = init_rx.recv() => job,
            };
            let Some(job) = job else { return };
            self.run_init_job(job).await;
        }
    }

    async fn run_init_job(&self, job: InitJob) {
        let _guard = self.registry.lock_page(&job.app_id, job.page_id).await;
        let opts = SendOpts {
            app_id: Some(job.app_id.clone()),
            page_id: Some(job.page_id),
            target_id: Some(job.target_id.clone()),
            timeout: None,
        };

        if job.provisional {
            if !self.initialize_page(&job, &opts).await {
                return;
            }
            if job.paused {
                let params = json!({ "targetId": job.target_id });
                if let Err(err) = self.dispatcher.send(methods::RESUME, params, &opts, true).await
                {
                    warn!(target = %job.target_id, %err, "provisional target resume failed");
                }
            }
            let detector =
                self.detectors.lock().await.get(&(job.app_id.clone(), job.page_id)).cloned();
            if let Some(detector) = detector {
                self.wait_for_page_readiness(&job, &opts, &detector).await;
            }
        } else {
            // Ask for new-page pauses right away so navigations hand us
            // their provisional targets pre-paused. Failures are harmless.
            let params = json!({ "pauseOnStart": true });
            if let Err(err) =
                self.dispatcher.send(methods::SET_PAUSE_ON_START, params, &opts, true).await
            {
                debug!(target = %job.target_id, %err, "setPauseOnStart failed");
            }
            if !job.skip_init && !self.initialize_page(&job, &opts).await {
                // The target died mid-sequence; targetDestroyed will clean
                // the registry up.
                return;
            }
        }

        self.initialized.write().await.insert((job.app_id.clone(), job.page_id));
        let _ = self
            .events
            .send(InspectorEvent::PageInitialized { app_id: job.app_id, page_id: job.page_id });
    }

    /// Run the enable sequence for one target. Order is significant:
    /// `Inspector.enable` first, `Page.enable` before `Runtime.enable`,
    /// `Inspector.initialized` last.
    async fn initialize_page(&self, job: &InitJob, opts: &SendOpts) -> bool {
        let mut steps: Vec<(&str, serde_json::Value)> = vec![
            ("Inspector.enable", json!({})),
            ("Page.enable", json!({})),
            ("Runtime.enable", json!({})),
            ("Network.enable", json!({})),
            ("Heap.enable", json!({})),
            ("Debugger.enable", json!({})),
            ("Console.enable", json!({})),
        ];
        if self.config.full_page_init {
            steps.extend([
                ("Page.getResourceTree", json!({})),
                ("Network.setResourceCachingDisabled", json!({ "disabled": false })),
                ("DOMStorage.enable", json!({})),
                ("Database.enable", json!({})),
                ("IndexedDB.enable", json!({})),
                ("CSS.enable", json!({})),
                ("Memory.enable", json!({})),
                ("ApplicationCache.enable", json!({})),
                ("ApplicationCache.getFramesWithManifests", json!({})),
                (
                    "Timeline.setInstruments",
                    json!({ "instruments": ["Timeline", "ScriptProfiler", "CPU"] }),
                ),
                ("Timeline.setAutoCaptureEnabled", json!({ "enabled": false })),
                ("Debugger.setBreakpointsActive", json!({ "active": true })),
                ("Debugger.setPauseOnExceptions", json!({ "state": "none" })),
                ("Debugger.setPauseOnAssertions", json!({ "enabled": false })),
                ("Debugger.setAsyncStackTraceDepth", json!({ "depth": 200 })),
                ("Debugger.setPauseForInternalScripts", json!({ "shouldPause": false })),
                ("LayerTree.enable", json!({})),
                ("Worker.enable", json!({})),
                ("Canvas.enable", json!({})),
                ("DOM.getDocument", json!({})),
                ("Console.getLoggingChannels", json!({})),
            ]);
        }
        steps.push(("Inspector.initialized", json!({})));

        for (method, params) in steps {
            match self.dispatcher.send(method, params, opts, true).await {
                Ok(value) => {
                    if method == "Console.getLoggingChannels" {
                        self.raise_logging_channels(opts, &value).await;
                    }
                }
                Err(Error::Command(err)) if err.message_contains("missing target") => {
                    debug!(
                        app = %job.app_id,
                        page = job.page_id,
                        target = %job.target_id,
                        "target destroyed during initialization",
                    );
                    return false;
                }
                Err(Error::Transport(err)) => {
                    debug!(%err, "transport lost during initialization");
                    return false;
                }
                Err(err) => {
                    warn!(method, %err, "initialization step failed");
                }
            }
        }
        true
    }

    /// Turn every reported logging channel up to verbose.
    async fn raise_logging_channels(&self, opts: &SendOpts, value: &serde_json::Value) {
        let channels = value
            .get("channels")
            .and_then(serde_json::Value::as_array)
            .cloned()
            .unwrap_or_default();
        for channel in channels {
            let Some(source) = channel.get("source").and_then(serde_json::Value::as_str) else {
                continue;
            };
            let params = json!({ "source": source, "level": "verbose" });
            if let Err(err) =
                self.dispatcher.send("Console.setLoggingChannelLevel", params, opts, true).await
            {
                debug!(source, %err, "setLoggingChannelLevel failed");
            }
        }
    }

    /// Poll `document.readyState` until the detector accepts it or its
    /// budget runs out. Each probe gets 80 % of the remaining budget,
    /// floored at the poll interval; timing out is not an error.
    async fn wait_for_page_readiness(
        &self,
        job: &InitJob,
        opts: &SendOpts,
        detector: &ReadinessDetector,
    ) {
        let deadline = tokio::time::Instant::now() + detector.timeout;
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                warn!(app = %job.app_id, page = job.page_id, "page readiness wait timed out");
                return;
            }
            let eval_timeout = (deadline - now).mul_f64(0.8).max(POLL_INTERVAL);
            let probe = SendOpts { timeout: Some(eval_timeout), ..opts.clone() };
            let params = json!({ "expression": "document.readyState" });
            match self.dispatcher.send(methods::RUNTIME_EVALUATE, params, &probe, true).await {
                Ok(value) => {
                    let state = value.as_str().unwrap_or_default();
                    if (detector.predicate)(state) {
                        debug!(app = %job.app_id, page = job.page_id, state, "page is ready");
                        return;
                    }
                }
                Err(err) => debug!(%err, "readyState probe failed"),
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }

    // -- Internals -----------------------------------------------------------

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::Disconnected)
        }
    }

    pub(crate) fn base_envelope(&self) -> Envelope {
        Envelope {
            connection_id: Some(self.connection_id.clone()),
            sender_id: Some(self.sender_id.clone()),
            app_id: None,
            page_id: None,
        }
    }

    fn page_envelope(&self, app_id: &str, page_id: u32) -> Envelope {
        Envelope {
            app_id: Some(app_id.to_owned()),
            page_id: Some(page_id),
            ..self.base_envelope()
        }
    }

    /// Await the first event the matcher accepts, bounded by `timeout` and
    /// the session cancel token.
    pub(crate) async fn wait_event<T>(
        &self,
        rx: &mut broadcast::Receiver<InspectorEvent>,
        timeout: Duration,
        mut matcher: impl FnMut(&InspectorEvent) -> Option<T>,
    ) -> Waited<T> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Waited::Cancelled,
                _ = tokio::time::sleep_until(deadline) => return Waited::TimedOut,
                event = rx.recv() => match event {
                    Ok(event) => {
                        if let Some(value) = matcher(&event) {
                            return Waited::Done(value);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return Waited::Cancelled,
                },
            }
        }
    }

    /// Tear down every task, waiter, and record. Emits the terminal
    /// `Disconnected` event exactly once.
    async fn teardown(&self, error: Option<String>) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(ref err) = error {
            warn!(err = %err, "inspector session terminated");
        } else {
            debug!(connection = %self.connection_id, "inspector session closed");
        }
        self.cancel.cancel();
        self.transport_cancel.cancel();
        self.correlation.clear().await;
        self.registry.clear().await;
        self.apps.write().await.clear();
        self.pages.write().await.clear();
        self.detectors.lock().await.clear();
        self.initialized.write().await.clear();
        let _ = self.events.send(InspectorEvent::Disconnected { error });
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
