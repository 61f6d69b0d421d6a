// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Consumer facade: the high-level operations an automation driver uses,
//! all thin compositions of `send_command` and the event stream.

use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use crate::demux::InspectorEvent;
use crate::dispatch::SendOpts;
use crate::error::Result;
use crate::message;
use crate::session::{Inspector, Waited, SAFARI_BUNDLE_ID};

impl Inspector {
    /// Evaluate a JavaScript expression on the page.
    pub async fn execute(
        &self,
        app_id: &str,
        page_id: u32,
        expression: &str,
    ) -> Result<serde_json::Value> {
        let params = json!({ "expression": expression });
        self.send_command("Runtime.evaluate", params, &SendOpts::page(app_id, page_id), true).await
    }

    /// Navigate the page and wait for the navigation signal. The wait is
    /// best-effort: some pages never finish loading, and the caller can
    /// verify with its own readiness probe.
    pub async fn navigate_to(&self, app_id: &str, page_id: u32, url: &str) -> Result<()> {
        let mut rx = self.subscribe();
        let params = json!({ "url": url });
        self.send_command("Page.navigate", params, &SendOpts::page(app_id, page_id), true).await?;

        let waited = self
            .wait_event(&mut rx, self.config().page_load(), |event| match event {
                InspectorEvent::FrameNavigated { .. } => Some(()),
                _ => None,
            })
            .await;
        if matches!(waited, Waited::TimedOut) {
            warn!(url, "no navigation signal within the page-load budget");
        }
        Ok(())
    }

    /// All cookies visible to the page.
    pub async fn get_cookies(&self, app_id: &str, page_id: u32) -> Result<serde_json::Value> {
        self.send_command("Page.getCookies", json!({}), &SendOpts::page(app_id, page_id), true)
            .await
    }

    /// Set one cookie. `cookie` follows the protocol's `Page.Cookie` shape.
    pub async fn set_cookie(
        &self,
        app_id: &str,
        page_id: u32,
        cookie: serde_json::Value,
    ) -> Result<()> {
        let params = json!({ "cookie": cookie });
        self.send_command("Page.setCookie", params, &SendOpts::page(app_id, page_id), true)
            .await?;
        Ok(())
    }

    /// Delete one cookie by name for the given URL.
    pub async fn delete_cookie(
        &self,
        app_id: &str,
        page_id: u32,
        name: &str,
        url: &str,
    ) -> Result<()> {
        let params = json!({ "cookieName": name, "url": url });
        self.send_command("Page.deleteCookie", params, &SendOpts::page(app_id, page_id), true)
            .await?;
        Ok(())
    }

    /// Override the user-agent string reported by the page.
    pub async fn override_user_agent(
        &self,
        app_id: &str,
        page_id: u32,
        value: &str,
    ) -> Result<()> {
        let params = json!({ "value": value });
        self.send_command("Page.overrideUserAgent", params, &SendOpts::page(app_id, page_id), true)
            .await?;
        Ok(())
    }

    /// Ask the page's heap for a garbage collection. Failures and timeouts
    /// are logged, not raised; collection is advisory.
    pub async fn garbage_collect(&self, app_id: &str, page_id: u32, timeout: Duration) {
        let opts =
            SendOpts { timeout: Some(timeout), ..SendOpts::page(app_id, page_id) };
        if let Err(err) = self.send_command("Heap.gc", json!({}), &opts, true).await {
            debug!(%err, "garbage collection did not complete");
        }
    }

    /// Ask the daemon to launch Safari, then wait for it to connect.
    pub async fn launch_safari(&self, timeout: Duration) -> Result<String> {
        let mut rx = self.subscribe();
        let record = message::launch_application(&self.base_envelope(), SAFARI_BUNDLE_ID)?;
        self.dispatcher().send_record(&record).await?;

        let waited = self
            .wait_event(&mut rx, timeout, |event| match event {
                InspectorEvent::AppConnected { app } if app.bundle_id == SAFARI_BUNDLE_ID => {
                    Some(app.id.clone())
                }
                _ => None,
            })
            .await;
        match waited {
            Waited::Done(app_id) => Ok(app_id),
            Waited::TimedOut => {
                Err(crate::error::Error::Timeout("safari did not connect".to_owned()))
            }
            Waited::Cancelled => Err(crate::error::Error::Disconnected),
        }
    }

    /// Begin timeline capture; records arrive as
    /// [`InspectorEvent::TimelineEvent`]s.
    pub async fn start_timeline(&self, app_id: &str, page_id: u32) -> Result<()> {
        self.send_command("Timeline.start", json!({}), &SendOpts::page(app_id, page_id), true)
            .await?;
        Ok(())
    }

    pub async fn stop_timeline(&self, app_id: &str, page_id: u32) -> Result<()> {
        self.send_command("Timeline.stop", json!({}), &SendOpts::page(app_id, page_id), true)
            .await?;
        Ok(())
    }

    /// (Re)enable console delivery; messages arrive as
    /// [`InspectorEvent::ConsoleMessage`]s.
    pub async fn start_console(&self, app_id: &str, page_id: u32) -> Result<()> {
        self.send_command("Console.enable", json!({}), &SendOpts::page(app_id, page_id), true)
            .await?;
        Ok(())
    }

    pub async fn stop_console(&self, app_id: &str, page_id: u32) -> Result<()> {
        self.send_command("Console.disable", json!({}), &SendOpts::page(app_id, page_id), true)
            .await?;
        Ok(())
    }

    /// (Re)enable network instrumentation; events arrive as
    /// [`InspectorEvent::NetworkEvent`]s.
    pub async fn start_network(&self, app_id: &str, page_id: u32) -> Result<()> {
        self.send_command("Network.enable", json!({}), &SendOpts::page(app_id, page_id), true)
            .await?;
        Ok(())
    }

    pub async fn stop_network(&self, app_id: &str, page_id: u32) -> Result<()> {
        self.send_command("Network.disable", json!({}), &SendOpts::page(app_id, page_id), true)
            .await?;
        Ok(())
    }
}
