// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness: a scripted `webinspectord` stand-in served on a real
//! Unix-domain socket, so end-to-end scenarios exercise the full stack:
//! socket transport, framing codec, demultiplexer, registry, dispatcher,
//! and orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use plist::{Dictionary, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;

use wirclient::wire::{self, keys, FrameDecoder};

/// Behavior knobs for the fake daemon.
#[derive(Debug, Clone)]
pub struct DaemonSpec {
    /// `(app_id, bundle_id)` pairs reported on the handshake.
    pub apps: Vec<(String, String)>,
    /// `(page_id, url, title)` listing entries served per app.
    pub pages: Vec<(u32, String, String)>,
    /// Target announced after a sender-key handoff.
    pub target_id: String,
    /// When false, wrapped commands are rejected with the no-Target-domain
    /// error, forcing the client to downgrade.
    pub supports_targets: bool,
}

impl Default for DaemonSpec {
    fn default() -> Self {
        Self {
            apps: vec![("PID:42".to_owned(), "io.appium.bundle".to_owned())],
            pages: vec![(1, "https://x".to_owned(), "x".to_owned())],
            target_id: "page-3".to_owned(),
            supports_targets: true,
        }
    }
}

/// A fake daemon listening on a Unix socket in a temp directory.
pub struct FakeInspectord {
    pub socket_path: PathBuf,
    /// Selectors received, in order.
    pub selectors: Arc<Mutex<Vec<String>>>,
    /// Protocol methods received (inner methods for wrapped commands).
    pub methods: Arc<Mutex<Vec<String>>>,
    _dir: tempfile::TempDir,
}

impl FakeInspectord {
    /// Bind the socket and serve a single connection with the given spec.
    pub async fn spawn(spec: DaemonSpec) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let socket_path = dir.path().join("webinspectord.sock");
        let listener = UnixListener::bind(&socket_path)?;

        let selectors = Arc::new(Mutex::new(Vec::new()));
        let methods = Arc::new(Mutex::new(Vec::new()));

        let task_selectors = Arc::clone(&selectors);
        let task_methods = Arc::clone(&methods);
        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let _ = serve(stream, spec, task_selectors, task_methods).await;
        });

        Ok(Self { socket_path, selectors, methods, _dir: dir })
    }

    pub async fn saw_selector(&self, selector: &str) -> bool {
        self.selectors.lock().await.iter().any(|s| s == selector)
    }

    pub async fn methods(&self) -> Vec<String> {
        self.methods.lock().await.clone()
    }
}

async fn serve(
    mut stream: UnixStream,
    spec: DaemonSpec,
    selectors: Arc<Mutex<Vec<String>>>,
    methods: Arc<Mutex<Vec<String>>>,
) -> anyhow::Result<()> {
    let mut decoder = FrameDecoder::default();
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        for record in decoder.feed(&buf[..n])? {
            for reply in
                respond(&record, &spec, &selectors, &methods).await?
            {
                stream.write_all(&wire::encode_record(&reply)?).await?;
            }
        }
    }
}

/// Compute the scripted replies for one inbound record.
async fn respond(
    record: &Value,
    spec: &DaemonSpec,
    selectors: &Arc<Mutex<Vec<String>>>,
    methods: &Arc<Mutex<Vec<String>>>,
) -> anyhow::Result<Vec<Value>> {
    let Some(dict) = record.as_dictionary() else {
        return Ok(Vec::new());
    };
    let selector =
        dict.get(keys::SELECTOR).and_then(Value::as_string).unwrap_or_default().to_owned();
    selectors.lock().await.push(selector.clone());

    let empty = Dictionary::new();
    let argument = dict.get(keys::ARGUMENT).and_then(Value::as_dictionary).unwrap_or(&empty);
    let app_id = argument
        .get(keys::APPLICATION_ID)
        .and_then(Value::as_string)
        .unwrap_or("PID:42")
        .to_owned();

    match selector.as_str() {
        keys::REPORT_IDENTIFIER => {
            let mut setup = Dictionary::new();
            setup.insert(
                keys::SIMULATOR_NAME.to_owned(),
                Value::String("iPhone Simulator".to_owned()),
            );
            setup.insert(keys::SIMULATOR_BUILD.to_owned(), Value::String("WP42FJ".to_owned()));
            Ok(vec![
                wire_record(keys::REPORT_SETUP, setup),
                app_list_record(&spec.apps),
            ])
        }
        keys::FORWARD_GET_LISTING => Ok(vec![listing_record(&app_id, &spec.pages)]),
        keys::FORWARD_SOCKET_SETUP => {
            let created = serde_json::json!({
                "method": "Target.targetCreated",
                "params": { "targetInfo": { "targetId": spec.target_id, "type": "page" } },
            });
            Ok(vec![data_record(&app_id, &created)])
        }
        keys::FORWARD_SOCKET_DATA => {
            let data = argument
                .get(keys::SOCKET_DATA)
                .and_then(Value::as_data)
                .map(<[u8]>::to_vec)
                .unwrap_or_default();
            let Ok(outer) = serde_json::from_slice::<serde_json::Value>(&data) else {
                return Ok(Vec::new());
            };

            let wrapped = outer["method"] == "Target.sendMessageToTarget";
            if wrapped && !spec.supports_targets {
                let reject = serde_json::json!({
                    "id": outer["id"],
                    "error": { "message": "'Target' domain was not found" },
                });
                return Ok(vec![data_record(&app_id, &reject)]);
            }

            let inner = if wrapped {
                serde_json::from_str(outer["params"]["message"].as_str().unwrap_or_default())
                    .unwrap_or_default()
            } else {
                outer.clone()
            };
            let method = inner["method"].as_str().unwrap_or_default().to_owned();
            methods.lock().await.push(method.clone());

            let Some(id) = inner["id"].as_u64() else {
                return Ok(Vec::new());
            };
            let ack = if method == "Runtime.evaluate" {
                // Canned evaluation result; the client unwraps to `1`.
                serde_json::json!({
                    "id": id,
                    "result": { "result": { "type": "number", "value": 1 } },
                })
            } else {
                serde_json::json!({ "id": id, "result": {} })
            };
            Ok(vec![data_record(&app_id, &ack)])
        }
        _ => Ok(Vec::new()),
    }
}

// -- Record builders ----------------------------------------------------------

fn wire_record(selector: &str, argument: Dictionary) -> Value {
    let mut dict = Dictionary::new();
    dict.insert(keys::SELECTOR.to_owned(), Value::String(selector.to_owned()));
    dict.insert(keys::ARGUMENT.to_owned(), Value::Dictionary(argument));
    Value::Dictionary(dict)
}

fn app_list_record(apps: &[(String, String)]) -> Value {
    let mut table = Dictionary::new();
    for (id, bundle) in apps {
        let mut entry = Dictionary::new();
        entry.insert(keys::APPLICATION_BUNDLE_ID.to_owned(), Value::String(bundle.clone()));
        entry.insert(keys::IS_APPLICATION_ACTIVE.to_owned(), Value::Integer(1.into()));
        entry.insert(keys::IS_APPLICATION_PROXY.to_owned(), Value::Boolean(false));
        table.insert(id.clone(), Value::Dictionary(entry));
    }
    let mut argument = Dictionary::new();
    argument.insert(keys::APPLICATION_DICTIONARY.to_owned(), Value::Dictionary(table));
    wire_record(keys::REPORT_CONNECTED_APPLICATION_LIST, argument)
}

fn listing_record(app_id: &str, pages: &[(u32, String, String)]) -> Value {
    let mut listing = Dictionary::new();
    for (page_id, url, title) in pages {
        let mut page = Dictionary::new();
        page.insert(keys::TYPE.to_owned(), Value::String(keys::TYPE_WEB.to_owned()));
        page.insert(keys::PAGE_ID.to_owned(), Value::Integer((*page_id).into()));
        page.insert(keys::URL.to_owned(), Value::String(url.clone()));
        page.insert(keys::TITLE.to_owned(), Value::String(title.clone()));
        listing.insert(page_id.to_string(), Value::Dictionary(page));
    }
    let mut argument = Dictionary::new();
    argument.insert(keys::APPLICATION_ID.to_owned(), Value::String(app_id.to_owned()));
    argument.insert(keys::LISTING.to_owned(), Value::Dictionary(listing));
    wire_record(keys::APPLICATION_SENT_LISTING, argument)
}

/// Wrap a JSON message the way the daemon forwards app data.
pub fn data_record(app_id: &str, msg: &serde_json::Value) -> Value {
    let mut argument = Dictionary::new();
    argument.insert(keys::APPLICATION_ID.to_owned(), Value::String(app_id.to_owned()));
    argument.insert(keys::MESSAGE_DATA.to_owned(), Value::Data(msg.to_string().into_bytes()));
    wire_record(keys::APPLICATION_SENT_DATA, argument)
}
