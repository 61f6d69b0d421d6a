// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound record demultiplexer.
//!
//! Every record is classified by its `__selector`. Replies carrying a
//! message id go to the correlation map and nowhere else; spontaneous
//! notifications become typed [`InspectorEvent`]s on the broadcast stream.
//! `Target.*` lifecycle notifications additionally write the registry
//! before their events are published.

use std::sync::Arc;

use indexmap::IndexMap;
use plist::{Dictionary, Value};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, warn};

use crate::dispatch::CorrelationMap;
use crate::error::{CommandError, Error, Result};
use crate::message::methods;
use crate::model::{
    parse_app_dictionary, parse_page_listing, AppRecord, PageRecord, ProvisionalCommit, SetupInfo,
    TargetInfo,
};
use crate::registry::TargetRegistry;
use crate::wire::keys;

/// Typed inbound events, fanned out to every subscriber.
#[derive(Debug, Clone)]
pub enum InspectorEvent {
    /// Device identity from `_rpc_reportSetup:`.
    ReportSetup(SetupInfo),
    /// Full connected-application snapshot.
    AppList { apps: IndexMap<String, AppRecord> },
    AppConnected { app: AppRecord },
    AppDisconnected { app_id: String },
    AppUpdated { app: AppRecord },
    /// Page listing for one application (surfaced page types only).
    Listing { app_id: String, pages: Vec<PageRecord> },
    DriverList { drivers: Value },
    CurrentState { state: Value },
    TargetCreated { app_id: String, target: TargetInfo },
    TargetDestroyed { app_id: String, target_id: String },
    ProvisionalCommitted { app_id: String, commit: ProvisionalCommit },
    /// Navigation signal; `origin` is the protocol method that produced it.
    FrameNavigated { origin: String },
    TimelineEvent { record: serde_json::Value },
    ConsoleMessage { method: String, message: serde_json::Value },
    NetworkEvent { method: String, params: serde_json::Value },
    ExecutionContextCreated { context: serde_json::Value },
    /// Any other spontaneous protocol method.
    Method { method: String, params: serde_json::Value },
    /// A page finished its post-target initialization sequence.
    PageInitialized { app_id: String, page_id: u32 },
    /// Terminal event: the session is gone, with the fatal error if any.
    Disconnected { error: Option<String> },
}

/// Routes inbound records. One instance per session, driven solely by the
/// reader task.
pub struct Demux {
    events: broadcast::Sender<InspectorEvent>,
    correlation: Arc<CorrelationMap>,
    registry: Arc<TargetRegistry>,
    /// Execution-context ids, kept for diagnostics only.
    contexts: Mutex<Vec<i64>>,
}

impl Demux {
    pub fn new(
        events: broadcast::Sender<InspectorEvent>,
        correlation: Arc<CorrelationMap>,
        registry: Arc<TargetRegistry>,
    ) -> Self {
        Self { events, correlation, registry, contexts: Mutex::new(Vec::new()) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InspectorEvent> {
        self.events.subscribe()
    }

    /// Execution-context ids seen so far.
    pub async fn contexts(&self) -> Vec<i64> {
        self.contexts.lock().await.clone()
    }

    fn emit(&self, event: InspectorEvent) {
        let _ = self.events.send(event);
    }

    /// Route one decoded record. An error return is fatal to the session.
    pub async fn handle_record(&self, record: &Value) -> Result<()> {
        let dict = record
            .as_dictionary()
            .ok_or_else(|| Error::Protocol("record is not a dictionary".to_owned()))?;
        let selector = dict
            .get(keys::SELECTOR)
            .and_then(Value::as_string)
            .ok_or_else(|| Error::Protocol("record has no __selector".to_owned()))?;
        let empty = Dictionary::new();
        let argument =
            dict.get(keys::ARGUMENT).and_then(Value::as_dictionary).unwrap_or(&empty);

        match selector {
            keys::REPORT_SETUP => {
                self.emit(InspectorEvent::ReportSetup(SetupInfo::from_dict(argument)));
            }
            keys::REPORT_CONNECTED_APPLICATION_LIST => {
                let apps = argument
                    .get(keys::APPLICATION_DICTIONARY)
                    .and_then(Value::as_dictionary)
                    .map(parse_app_dictionary)
                    .unwrap_or_default();
                self.emit(InspectorEvent::AppList { apps });
            }
            keys::APPLICATION_SENT_LISTING => {
                let app_id = required_app_id(argument)?;
                let pages = argument
                    .get(keys::LISTING)
                    .and_then(Value::as_dictionary)
                    .map(|listing| parse_page_listing(listing, false))
                    .unwrap_or_default();
                self.emit(InspectorEvent::Listing { app_id, pages });
            }
            keys::APPLICATION_CONNECTED => match AppRecord::from_dict(None, argument) {
                Some(app) => self.emit(InspectorEvent::AppConnected { app }),
                None => warn!("applicationConnected without an identifier"),
            },
            keys::APPLICATION_DISCONNECTED => {
                let app_id = required_app_id(argument)?;
                self.emit(InspectorEvent::AppDisconnected { app_id });
            }
            keys::APPLICATION_UPDATED => match AppRecord::from_dict(None, argument) {
                Some(app) => self.emit(InspectorEvent::AppUpdated { app }),
                None => warn!("applicationUpdated without an identifier"),
            },
            keys::REPORT_CONNECTED_DRIVER_LIST => {
                self.emit(InspectorEvent::DriverList {
                    drivers: Value::Dictionary(argument.clone()),
                });
            }
            keys::REPORT_CURRENT_STATE => {
                self.emit(InspectorEvent::CurrentState {
                    state: Value::Dictionary(argument.clone()),
                });
            }
            keys::APPLICATION_SENT_DATA => {
                self.handle_application_data(record, argument).await?;
            }
            other => {
                return Err(Error::Protocol(format!("unknown selector {other:?}")));
            }
        }
        Ok(())
    }

    /// `_rpc_applicationSentData:`, the JSON layer of the protocol.
    async fn handle_application_data(&self, record: &Value, argument: &Dictionary) -> Result<()> {
        let app_id = required_app_id(argument)?;
        let data = match argument.get(keys::MESSAGE_DATA) {
            Some(Value::Data(bytes)) => bytes.clone(),
            Some(Value::String(text)) => text.clone().into_bytes(),
            _ => return Err(Error::Protocol("applicationSentData without message data".to_owned())),
        };
        let msg: serde_json::Value = serde_json::from_slice(&data)
            .map_err(|e| Error::Protocol(format!("message data is not JSON: {e}")))?;

        // Target lifecycle notifications maintain the registry.
        match msg.get("method").and_then(serde_json::Value::as_str) {
            Some(methods::TARGET_CREATED) => {
                let params = msg.get("params").cloned().unwrap_or_default();
                match TargetInfo::from_params(&params) {
                    Some(target) => {
                        self.registry.add(&app_id, &target).await;
                        self.emit(InspectorEvent::TargetCreated { app_id, target });
                    }
                    None => debug!(app = %app_id, "targetCreated without a target id, ignoring"),
                }
                return Ok(());
            }
            Some(methods::DID_COMMIT_PROVISIONAL_TARGET) => {
                let params = msg.get("params").cloned().unwrap_or_default();
                match serde_json::from_value::<ProvisionalCommit>(params) {
                    Ok(commit) => {
                        self.registry.commit(&app_id, commit.clone()).await;
                        self.emit(InspectorEvent::ProvisionalCommitted { app_id, commit });
                    }
                    Err(e) => warn!(app = %app_id, err = %e, "malformed provisional commit"),
                }
                return Ok(());
            }
            Some(methods::TARGET_DESTROYED) => {
                let target_id = msg
                    .get("params")
                    .and_then(|p| p.get("targetId"))
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                self.registry.remove(&app_id, &target_id).await;
                self.emit(InspectorEvent::TargetDestroyed { app_id, target_id });
                return Ok(());
            }
            _ => {}
        }

        // Unwrap the target-dispatch envelope: the inner message carries the
        // effective id/method/params/result.
        let effective = if msg.get("method").and_then(serde_json::Value::as_str)
            == Some(methods::DISPATCH_MESSAGE_FROM_TARGET)
        {
            let raw = msg
                .get("params")
                .and_then(|p| p.get("message"))
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| {
                    error!(?record, "target dispatch without a message payload");
                    Error::Protocol("dispatchMessageFromTarget without message".to_owned())
                })?;
            serde_json::from_str::<serde_json::Value>(raw).map_err(|e| {
                error!(?record, "unparseable target dispatch payload");
                Error::Protocol(format!("dispatchMessageFromTarget payload: {e}"))
            })?
        } else {
            msg
        };

        // Replies go to the correlation map and nowhere else.
        if let Some(id) = effective_id(&effective) {
            let outcome = extract_outcome(&effective);
            if !self.correlation.deliver(id, outcome).await {
                debug!(id, "reply for an unknown message id");
            }
            return Ok(());
        }

        self.dispatch_method(&effective).await;
        Ok(())
    }

    /// Spontaneous domain events, keyed by method.
    async fn dispatch_method(&self, effective: &serde_json::Value) {
        let method = effective.get("method").and_then(serde_json::Value::as_str).unwrap_or("");
        let params = effective.get("params").cloned().unwrap_or_default();

        match method {
            // Some iOS versions never emit frameNavigated; synthesize it
            // from the stop-loading signal.
            methods::FRAME_STOPPED_LOADING | methods::FRAME_NAVIGATED => {
                self.emit(InspectorEvent::FrameNavigated { origin: method.to_owned() });
            }
            methods::TIMELINE_EVENT_RECORDED => {
                let record = params.get("record").cloned().unwrap_or(params);
                self.emit(InspectorEvent::TimelineEvent { record });
            }
            methods::CONSOLE_MESSAGE_ADDED => {
                let message = params.get("message").cloned().unwrap_or_default();
                self.emit(InspectorEvent::ConsoleMessage { method: method.to_owned(), message });
            }
            methods::EXECUTION_CONTEXT_CREATED => {
                let context = params.get("context").cloned().unwrap_or_default();
                if let Some(id) = context.get("id").and_then(serde_json::Value::as_i64) {
                    self.contexts.lock().await.push(id);
                }
                self.emit(InspectorEvent::ExecutionContextCreated { context });
            }
            _ if method.starts_with("Network.") => {
                self.emit(InspectorEvent::NetworkEvent { method: method.to_owned(), params });
            }
            "" => debug!("message with neither id nor method"),
            _ => {
                self.emit(InspectorEvent::Method { method: method.to_owned(), params });
            }
        }
    }
}

fn required_app_id(argument: &Dictionary) -> Result<String> {
    argument
        .get(keys::APPLICATION_ID)
        .and_then(Value::as_string)
        .map(str::to_owned)
        .ok_or_else(|| Error::Protocol("record has no application identifier".to_owned()))
}

/// The effective message id, when present and non-empty. The protocol
/// stringifies ids in some paths and leaves them numeric in others.
fn effective_id(msg: &serde_json::Value) -> Option<u64> {
    match msg.get("id") {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.parse().ok(),
        _ => None,
    }
}

/// Split a reply into a delivered value or a [`CommandError`].
fn extract_outcome(msg: &serde_json::Value) -> std::result::Result<serde_json::Value, CommandError>
{
    if let Some(error) = msg.get("error").filter(|e| !e.is_null()) {
        return Err(command_error(error));
    }

    let result = msg.get("result");
    let was_thrown = result
        .and_then(|r| r.get("wasThrown"))
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    if was_thrown {
        let detail = result.and_then(|r| r.get("result"));
        let message = detail
            .and_then(|d| d.get("value"))
            .map(json_to_message)
            .or_else(|| detail.and_then(|d| d.get("description")).map(json_to_message))
            .unwrap_or_else(|| "JavaScript evaluation threw".to_owned());
        return Err(CommandError::new(message));
    }

    // Evaluations nest the interesting value one level down; unwrap it.
    if let Some(value) = result.and_then(|r| r.get("result")).and_then(|r| r.get("value")) {
        return Ok(value.clone());
    }
    Ok(result.cloned().unwrap_or(serde_json::Value::Null))
}

fn command_error(error: &serde_json::Value) -> CommandError {
    match error {
        serde_json::Value::String(message) => CommandError::new(message.clone()),
        _ => CommandError {
            code: error.get("code").and_then(serde_json::Value::as_i64),
            message: error
                .get("message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("command failed")
                .to_owned(),
            data: error.get("data").cloned(),
        },
    }
}

fn json_to_message(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[path = "demux_tests.rs"]
mod tests;
