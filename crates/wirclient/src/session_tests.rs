// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use plist::{Dictionary, Value};
use tokio::sync::Mutex as TokioMutex;

use crate::wire::keys;

const APP: &str = "PID:42";
const BUNDLE: &str = "io.appium.bundle";

// ── fake daemon ───────────────────────────────────────────────────────

struct DaemonSpec {
    apps: Vec<(&'static str, &'static str)>,
    pages: Vec<(u32, &'static str, &'static str)>,
    target_id: &'static str,
}

impl Default for DaemonSpec {
    fn default() -> Self {
        Self {
            apps: vec![(APP, BUNDLE)],
            pages: vec![(1, "https://x", "x")],
            target_id: "page-3",
        }
    }
}

/// Handle into the scripted daemon: what it saw, plus a sender for
/// injecting extra records mid-test.
struct DaemonHandle {
    selectors: Arc<TokioMutex<Vec<String>>>,
    methods: Arc<TokioMutex<Vec<String>>>,
    inbound: mpsc::Sender<Bytes>,
    shutdown: CancellationToken,
}

impl DaemonHandle {
    /// Kill the daemon: every inbound sender drops, so the client observes
    /// a closed transport.
    fn kill(self) {
        self.shutdown.cancel();
    }

    async fn selectors(&self) -> Vec<String> {
        self.selectors.lock().await.clone()
    }

    async fn methods(&self) -> Vec<String> {
        self.methods.lock().await.clone()
    }

    async fn push(&self, record: &Value) -> anyhow::Result<()> {
        self.inbound.send(wire::encode_record(record)?).await?;
        Ok(())
    }

    async fn push_data(&self, app_id: &str, msg: &serde_json::Value) -> anyhow::Result<()> {
        self.push(&data_record(app_id, msg)).await
    }

    /// Wait until the daemon has observed `method`.
    async fn await_method(&self, method: &str) -> anyhow::Result<()> {
        for _ in 0..100 {
            if self.methods.lock().await.iter().any(|m| m == method) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        anyhow::bail!("daemon never saw {method}");
    }
}

fn record(selector: &str, argument: Dictionary) -> Value {
    let mut dict = Dictionary::new();
    dict.insert(keys::SELECTOR.to_owned(), Value::String(selector.to_owned()));
    dict.insert(keys::ARGUMENT.to_owned(), Value::Dictionary(argument));
    Value::Dictionary(dict)
}

fn data_record(app_id: &str, msg: &serde_json::Value) -> Value {
    let mut argument = Dictionary::new();
    argument.insert(keys::APPLICATION_ID.to_owned(), Value::String(app_id.to_owned()));
    argument.insert(keys::MESSAGE_DATA.to_owned(), Value::Data(msg.to_string().into_bytes()));
    record(keys::APPLICATION_SENT_DATA, argument)
}

fn app_entry(bundle: &str) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.insert(keys::APPLICATION_BUNDLE_ID.to_owned(), Value::String(bundle.to_owned()));
    dict.insert(keys::IS_APPLICATION_ACTIVE.to_owned(), Value::Integer(1.into()));
    dict.insert(keys::IS_APPLICATION_PROXY.to_owned(), Value::Boolean(false));
    dict
}

fn app_list_record(apps: &[(&str, &str)]) -> Value {
    let mut table = Dictionary::new();
    for (id, bundle) in apps {
        table.insert((*id).to_owned(), Value::Dictionary(app_entry(bundle)));
    }
    let mut argument = Dictionary::new();
    argument.insert(keys::APPLICATION_DICTIONARY.to_owned(), Value::Dictionary(table));
    record(keys::REPORT_CONNECTED_APPLICATION_LIST, argument)
}

fn listing_record(app_id: &str, pages: &[(u32, &str, &str)]) -> Value {
    let mut listing = Dictionary::new();
    for (page_id, url, title) in pages {
        let mut page = Dictionary::new();
        page.insert(keys::TYPE.to_owned(), Value::String(keys::TYPE_WEB.to_owned()));
        page.insert(keys::PAGE_ID.to_owned(), Value::Integer((*page_id).into()));
        page.insert(keys::URL.to_owned(), Value::String((*url).to_owned()));
        page.insert(keys::TITLE.to_owned(), Value::String((*title).to_owned()));
        listing.insert(page_id.to_string(), Value::Dictionary(page));
    }
    let mut argument = Dictionary::new();
    argument.insert(keys::APPLICATION_ID.to_owned(), Value::String(app_id.to_owned()));
    argument.insert(keys::LISTING.to_owned(), Value::Dictionary(listing));
    record(keys::APPLICATION_SENT_LISTING, argument)
}

/// Spawn a daemon that answers the handshake, serves listings, announces
/// a page target on socket setup, and acks every protocol command.
fn spawn_daemon(spec: DaemonSpec) -> (Transport, DaemonHandle) {
    let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(64);
    let (in_tx, in_rx) = mpsc::channel::<Bytes>(64);
    let cancel = CancellationToken::new();
    let transport = Transport::from_parts(out_tx, in_rx, cancel, false);

    let selectors = Arc::new(TokioMutex::new(Vec::new()));
    let methods = Arc::new(TokioMutex::new(Vec::new()));
    let shutdown = CancellationToken::new();
    let handle = DaemonHandle {
        selectors: Arc::clone(&selectors),
        methods: Arc::clone(&methods),
        inbound: in_tx.clone(),
        shutdown: shutdown.clone(),
    };

    tokio::spawn(async move {
        let mut decoder = FrameDecoder::default();
        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => return anyhow::Ok(()),
                frame = out_rx.recv() => frame,
            };
            let Some(frame) = frame else { return anyhow::Ok(()) };
            let records = match decoder.feed(&frame) {
                Ok(records) => records,
                Err(_) => return anyhow::Ok(()),
            };
            for rec in records {
                let Some(dict) = rec.as_dictionary() else { continue };
                let selector = dict
                    .get(keys::SELECTOR)
                    .and_then(Value::as_string)
                    .unwrap_or_default()
                    .to_owned();
                selectors.lock().await.push(selector.clone());
                let empty = Dictionary::new();
                let argument =
                    dict.get(keys::ARGUMENT).and_then(Value::as_dictionary).unwrap_or(&empty);
                let app_id = argument
                    .get(keys::APPLICATION_ID)
                    .and_then(Value::as_string)
                    .unwrap_or(APP)
                    .to_owned();

                match selector.as_str() {
                    keys::REPORT_IDENTIFIER => {
                        let mut setup = Dictionary::new();
                        setup.insert(
                            keys::SIMULATOR_NAME.to_owned(),
                            Value::String("iPhone Simulator".to_owned()),
                        );
                        setup.insert(
                            keys::SIMULATOR_BUILD.to_owned(),
                            Value::String("WP42FJ".to_owned()),
                        );
                        let _ = in_tx
                            .send(wire::encode_record(&record(keys::REPORT_SETUP, setup))?)
                            .await;
                        let _ = in_tx
                            .send(wire::encode_record(&app_list_record(&spec.apps))?)
                            .await;
                    }
                    keys::FORWARD_GET_LISTING => {
                        let _ = in_tx
                            .send(wire::encode_record(&listing_record(&app_id, &spec.pages))?)
                            .await;
                    }
                    keys::FORWARD_SOCKET_SETUP => {
                        let created = serde_json::json!({
                            "method": "Target.targetCreated",
                            "params": {
                                "targetInfo": { "targetId": spec.target_id, "type": "page" }
                            },
                        });
                        let _ = in_tx
                            .send(wire::encode_record(&data_record(&app_id, &created))?)
                            .await;
                    }
                    keys::FORWARD_SOCKET_DATA => {
                        let data = argument
                            .get(keys::SOCKET_DATA)
                            .and_then(Value::as_data)
                            .map(<[u8]>::to_vec)
                            .unwrap_or_default();
                        let Ok(outer) = serde_json::from_slice::<serde_json::Value>(&data) else {
                            continue;
                        };
                        // Unwrap target-based commands down to the inner id.
                        let (reply_id, method) =
                            if outer["method"] == "Target.sendMessageToTarget" {
                                let inner: serde_json::Value = serde_json::from_str(
                                    outer["params"]["message"].as_str().unwrap_or_default(),
                                )
                                .unwrap_or_default();
                                (inner["id"].as_u64(), inner["method"].as_str().map(str::to_owned))
                            } else {
                                (outer["id"].as_u64(), outer["method"].as_str().map(str::to_owned))
                            };
                        if let Some(method) = method {
                            methods.lock().await.push(method);
                        }
                        if let Some(id) = reply_id {
                            let ack = serde_json::json!({ "id": id, "result": {} });
                            let _ = in_tx
                                .send(wire::encode_record(&data_record(&app_id, &ack))?)
                                .await;
                        }
                    }
                    _ => {}
                }
            }
        }
    });

    (transport, handle)
}

fn test_config() -> InspectorConfig {
    InspectorConfig {
        target_creation_ms: 2_000,
        send_timeout_ms: 2_000,
        page_load_ms: 2_000,
        ..Default::default()
    }
}

// ── handshake ─────────────────────────────────────────────────────────

#[tokio::test]
async fn connect_handshake_materializes_the_app_table() -> anyhow::Result<()> {
    let (transport, daemon) = spawn_daemon(DaemonSpec::default());
    let inspector = Inspector::connect(transport, test_config()).await?;

    assert!(inspector.is_connected());
    assert_eq!(daemon.selectors().await, vec![keys::REPORT_IDENTIFIER.to_owned()]);

    let apps = inspector.apps().await;
    assert_eq!(apps.len(), 1);
    let app = &apps[APP];
    assert_eq!(app.id, APP);
    assert_eq!(app.bundle_id, BUNDLE);
    assert!(app.is_active);
    assert!(!app.is_proxy);
    assert!(!app.is_automation_enabled());

    let setup = inspector.setup_info().await;
    assert_eq!(setup.map(|s| s.device_name), Some("iPhone Simulator".to_owned()));

    inspector.disconnect().await;
    Ok(())
}

// ── app selection ─────────────────────────────────────────────────────

#[tokio::test]
async fn select_app_returns_the_listing() -> anyhow::Result<()> {
    let (transport, _daemon) = spawn_daemon(DaemonSpec::default());
    let inspector = Inspector::connect(transport, test_config()).await?;

    let selected = inspector.select_app(&SelectAppOpts::default()).await?;
    let (app_id, pages) = selected.ok_or_else(|| anyhow::anyhow!("no app selected"))?;
    assert_eq!(app_id, APP);
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].id, 1);
    assert_eq!(pages[0].url, "https://x");

    inspector.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn select_app_short_circuits_when_everything_is_ignored() -> anyhow::Result<()> {
    let (transport, daemon) = spawn_daemon(DaemonSpec {
        apps: vec![("PID:88535", "com.apple.amsengagementd")],
        ..Default::default()
    });
    let inspector = Inspector::connect(transport, test_config()).await?;

    let opts = SelectAppOpts {
        ignore_bundle_ids: vec!["com.apple.amsengagementd".to_owned()],
        ..Default::default()
    };
    let selected = inspector.select_app(&opts).await?;
    assert!(selected.is_none());

    // No connectToApp ever reached the wire.
    let selectors = daemon.selectors().await;
    assert!(!selectors.iter().any(|s| s == keys::FORWARD_GET_LISTING));

    inspector.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn select_app_drops_about_blank_when_asked() -> anyhow::Result<()> {
    let (transport, _daemon) = spawn_daemon(DaemonSpec {
        pages: vec![(1, "about:blank", ""), (2, "https://x", "x")],
        ..Default::default()
    });
    let inspector = Inspector::connect(transport, test_config()).await?;

    let opts = SelectAppOpts { ignore_about_blank: true, ..Default::default() };
    let selected = inspector.select_app(&opts).await?;
    let (_, pages) = selected.ok_or_else(|| anyhow::anyhow!("no app selected"))?;
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].id, 2);

    inspector.disconnect().await;
    Ok(())
}

// ── page selection & initialization ───────────────────────────────────

#[tokio::test]
async fn select_page_runs_the_initialization_sequence() -> anyhow::Result<()> {
    let (transport, daemon) = spawn_daemon(DaemonSpec::default());
    let inspector = Inspector::connect(transport, test_config()).await?;

    inspector.select_page(APP, 1, None).await?;

    // The highlight flash and the sender-key handoff went out, in order.
    let selectors = daemon.selectors().await;
    let flashes =
        selectors.iter().filter(|s| *s == keys::FORWARD_INDICATE_WEB_VIEW).count();
    assert_eq!(flashes, 2);
    assert!(selectors.iter().any(|s| s == keys::FORWARD_SOCKET_SETUP));

    // The registry adopted the announced target.
    let methods = daemon.methods().await;
    assert_eq!(methods.first().map(String::as_str), Some("Target.setPauseOnStart"));
    let enable_at = |m: &str| methods.iter().position(|x| x == m);
    let inspector_enable =
        enable_at("Inspector.enable").ok_or_else(|| anyhow::anyhow!("no Inspector.enable"))?;
    let page_enable =
        enable_at("Page.enable").ok_or_else(|| anyhow::anyhow!("no Page.enable"))?;
    let runtime_enable =
        enable_at("Runtime.enable").ok_or_else(|| anyhow::anyhow!("no Runtime.enable"))?;
    let initialized = enable_at("Inspector.initialized")
        .ok_or_else(|| anyhow::anyhow!("no Inspector.initialized"))?;
    assert!(inspector_enable < page_enable);
    assert!(page_enable < runtime_enable);
    assert_eq!(initialized, methods.len() - 1);

    inspector.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn provisional_target_is_initialized_and_resumed() -> anyhow::Result<()> {
    let (transport, daemon) = spawn_daemon(DaemonSpec::default());
    let inspector = Inspector::connect(transport, test_config()).await?;
    inspector.select_page(APP, 1, None).await?;

    // A cross-origin navigation hands us a paused provisional target.
    let provisional = serde_json::json!({
        "method": "Target.targetCreated",
        "params": {
            "targetInfo": {
                "targetId": "page-4",
                "type": "page",
                "isProvisional": true,
                "isPaused": true,
            }
        },
    });
    daemon.push_data(APP, &provisional).await?;
    daemon.await_method("Target.resume").await?;

    // Commit and destroy repoint the page.
    let mut rx = inspector.subscribe();
    let committed = serde_json::json!({
        "method": "Target.didCommitProvisionalTarget",
        "params": { "oldTargetId": "page-3", "newTargetId": "page-4" },
    });
    daemon.push_data(APP, &committed).await?;
    let destroyed = serde_json::json!({
        "method": "Target.targetDestroyed",
        "params": { "targetId": "page-3" },
    });
    daemon.push_data(APP, &destroyed).await?;

    let waited = inspector
        .wait_event(&mut rx, Duration::from_secs(2), |event| match event {
            InspectorEvent::TargetDestroyed { target_id, .. } if target_id == "page-3" => Some(()),
            _ => None,
        })
        .await;
    assert!(matches!(waited, Waited::Done(())));

    let value = inspector.execute(APP, 1, "1").await;
    assert!(value.is_ok());

    inspector.disconnect().await;
    Ok(())
}

// ── teardown ──────────────────────────────────────────────────────────

#[tokio::test]
async fn transport_loss_tears_the_session_down() -> anyhow::Result<()> {
    let (transport, daemon) = spawn_daemon(DaemonSpec::default());
    let inspector = Inspector::connect(transport, test_config()).await?;
    let mut rx = inspector.subscribe();

    daemon.kill();

    let waited = inspector
        .wait_event(&mut rx, Duration::from_secs(2), |event| match event {
            InspectorEvent::Disconnected { error } => Some(error.clone()),
            _ => None,
        })
        .await;
    match waited {
        Waited::Done(error) => assert!(error.is_some()),
        other => anyhow::bail!("expected disconnect, got {other:?}"),
    }
    assert!(!inspector.is_connected());

    let result = inspector.execute(APP, 1, "1").await;
    assert!(matches!(result, Err(Error::Disconnected)));
    Ok(())
}

#[tokio::test]
async fn disconnect_is_idempotent_and_clears_state() -> anyhow::Result<()> {
    let (transport, _daemon) = spawn_daemon(DaemonSpec::default());
    let inspector = Inspector::connect(transport, test_config()).await?;

    inspector.disconnect().await;
    inspector.disconnect().await;

    assert!(!inspector.is_connected());
    assert!(inspector.apps().await.is_empty());
    Ok(())
}
