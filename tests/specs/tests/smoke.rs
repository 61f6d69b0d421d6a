// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios against a scripted daemon on a real Unix socket.

use std::time::Duration;

use wirclient::transport::socket::{self, SocketOpts};
use wirclient::{Inspector, InspectorConfig, SelectAppOpts};
use wirclient_specs::{DaemonSpec, FakeInspectord};

fn config() -> InspectorConfig {
    InspectorConfig {
        target_creation_ms: 2_000,
        send_timeout_ms: 2_000,
        page_load_ms: 2_000,
        ..Default::default()
    }
}

async fn connect(daemon: &FakeInspectord) -> anyhow::Result<std::sync::Arc<Inspector>> {
    let path = daemon.socket_path.to_string_lossy().into_owned();
    let transport = socket::connect_unix(&path, SocketOpts::default()).await?;
    Ok(Inspector::connect(transport, config()).await?)
}

#[tokio::test]
async fn handshake_reports_the_connected_applications() -> anyhow::Result<()> {
    let daemon = FakeInspectord::spawn(DaemonSpec::default()).await?;
    let inspector = connect(&daemon).await?;

    let apps = inspector.apps().await;
    assert_eq!(apps.len(), 1);
    let app = &apps["PID:42"];
    assert_eq!(app.bundle_id, "io.appium.bundle");
    assert!(app.is_active);
    assert!(!app.is_proxy);
    assert!(!app.is_automation_enabled());

    let setup = inspector.setup_info().await;
    assert_eq!(setup.map(|s| s.build), Some("WP42FJ".to_owned()));

    inspector.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn app_selection_filters_about_blank_listings() -> anyhow::Result<()> {
    let daemon = FakeInspectord::spawn(DaemonSpec {
        pages: vec![
            (1, "about:blank".to_owned(), String::new()),
            (2, "https://x".to_owned(), "x".to_owned()),
        ],
        ..Default::default()
    })
    .await?;
    let inspector = connect(&daemon).await?;

    let opts = SelectAppOpts { ignore_about_blank: true, ..Default::default() };
    let (app_id, pages) = inspector
        .select_app(&opts)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no app selected"))?;
    assert_eq!(app_id, "PID:42");
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].id, 2);
    assert_eq!(pages[0].url, "https://x");

    inspector.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn page_selection_initializes_and_evaluates() -> anyhow::Result<()> {
    let daemon = FakeInspectord::spawn(DaemonSpec::default()).await?;
    let inspector = connect(&daemon).await?;

    inspector.select_page("PID:42", 1, None).await?;

    let methods = daemon.methods().await;
    assert!(methods.iter().any(|m| m == "Inspector.enable"));
    assert_eq!(methods.last().map(String::as_str), Some("Inspector.initialized"));

    // Wrapped evaluation resolves with the unwrapped value.
    let value = inspector.execute("PID:42", 1, "1").await?;
    assert_eq!(value, serde_json::json!(1));

    inspector.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn missing_target_domain_downgrades_the_protocol() -> anyhow::Result<()> {
    let daemon = FakeInspectord::spawn(DaemonSpec {
        supports_targets: false,
        ..Default::default()
    })
    .await?;
    let inspector = connect(&daemon).await?;
    inspector.select_page("PID:42", 1, None).await?;

    let value = inspector.execute("PID:42", 1, "1").await?;
    assert_eq!(value, serde_json::json!(1));

    // After the downgrade, every command travels unwrapped.
    let methods = daemon.methods().await;
    assert!(methods.iter().any(|m| m == "Runtime.evaluate"));

    let cookies = inspector.get_cookies("PID:42", 1).await;
    assert!(cookies.is_ok());

    inspector.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn garbage_collect_timeout_is_non_fatal() -> anyhow::Result<()> {
    let daemon = FakeInspectord::spawn(DaemonSpec::default()).await?;
    let inspector = connect(&daemon).await?;
    inspector.select_page("PID:42", 1, None).await?;

    // The fake daemon acks Heap.gc like everything else, so this resolves
    // quickly; the call must never error either way.
    inspector.garbage_collect("PID:42", 1, Duration::from_millis(500)).await;

    assert!(inspector.is_connected());
    inspector.disconnect().await;
    Ok(())
}
