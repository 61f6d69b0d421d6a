// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Builds outbound wire records.
//!
//! Two layers produce traffic: meta commands, which are fixed plist
//! envelopes with no WebKit payload (`setConnectionKey`, `connectToApp`,
//! `setSenderKey`, `indicateWebView`, `launchApplication`), and protocol
//! commands, which carry an inner `{id, method, params}` JSON message under
//! `WIRSocketDataKey`, either verbatim (*direct*) or wrapped in
//! `Target.sendMessageToTarget` (*minimal*/*full*).

use plist::{Dictionary, Value};
use serde_json::json;

use crate::error::{Error, Result};
use crate::wire::keys;

/// WebKit protocol method names the client itself produces or matches on.
pub mod methods {
    pub const SEND_MESSAGE_TO_TARGET: &str = "Target.sendMessageToTarget";
    pub const DISPATCH_MESSAGE_FROM_TARGET: &str = "Target.dispatchMessageFromTarget";
    pub const TARGET_CREATED: &str = "Target.targetCreated";
    pub const TARGET_DESTROYED: &str = "Target.targetDestroyed";
    pub const DID_COMMIT_PROVISIONAL_TARGET: &str = "Target.didCommitProvisionalTarget";
    pub const TARGET_EXISTS: &str = "Target.exists";
    pub const SET_PAUSE_ON_START: &str = "Target.setPauseOnStart";
    pub const RESUME: &str = "Target.resume";
    pub const RUNTIME_EVALUATE: &str = "Runtime.evaluate";
    pub const FRAME_NAVIGATED: &str = "Page.frameNavigated";
    pub const FRAME_STOPPED_LOADING: &str = "Page.frameStoppedLoading";
    pub const TIMELINE_EVENT_RECORDED: &str = "Timeline.eventRecorded";
    pub const CONSOLE_MESSAGE_ADDED: &str = "Console.messageAdded";
    pub const EXECUTION_CONTEXT_CREATED: &str = "Runtime.executionContextCreated";
}

// -- Command shapes -----------------------------------------------------------

/// How a protocol command is laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// `{id, method, params}` verbatim under `WIRSocketDataKey`.
    Direct,
    /// Wrapped in `Target.sendMessageToTarget`.
    Minimal,
    /// Wrapped, with the Runtime defaults merged into the inner params.
    Full,
}

/// Static per-method shape table.
pub fn shape_for(method: &str) -> Shape {
    match method {
        methods::TARGET_EXISTS | methods::SET_PAUSE_ON_START | methods::RESUME => Shape::Direct,
        "Page.getCookies"
        | "Runtime.awaitPromise"
        | "Runtime.callFunctionOn"
        | "Runtime.evaluate"
        | "Timeline.start"
        | "Timeline.stop" => Shape::Full,
        _ => Shape::Minimal,
    }
}

/// Flag defaults merged into full-shape params (alongside
/// `objectGroup: "console"`). `emulateUserGesture: false` is required on
/// iOS 13+ because `true` breaks popup blocking.
const FULL_SHAPE_DEFAULTS: [(&str, bool); 5] = [
    ("includeCommandLineAPI", true),
    ("doNotPauseOnExceptionsAndMuteConsole", false),
    ("emulateUserGesture", false),
    ("generatePreview", false),
    ("saveResult", false),
];

// -- Envelope -----------------------------------------------------------------

/// Session identity fields that outbound records draw from. Builders fail
/// with [`Error::Argument`] when a record needs a field that is unset, so
/// nothing malformed reaches the wire.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub connection_id: Option<String>,
    pub sender_id: Option<String>,
    pub app_id: Option<String>,
    pub page_id: Option<u32>,
}

impl Envelope {
    fn connection_id(&self) -> Result<&str> {
        self.connection_id.as_deref().ok_or_else(|| missing("connection id"))
    }

    fn sender_id(&self) -> Result<&str> {
        self.sender_id.as_deref().ok_or_else(|| missing("sender key"))
    }

    fn app_id(&self) -> Result<&str> {
        self.app_id.as_deref().ok_or_else(|| missing("application id"))
    }

    fn page_id(&self) -> Result<u32> {
        self.page_id.ok_or_else(|| missing("page id"))
    }
}

fn missing(field: &str) -> Error {
    Error::Argument(format!("{field} is required but not set"))
}

fn record(selector: &str, argument: Dictionary) -> Value {
    let mut dict = Dictionary::new();
    dict.insert(keys::SELECTOR.to_owned(), Value::String(selector.to_owned()));
    dict.insert(keys::ARGUMENT.to_owned(), Value::Dictionary(argument));
    Value::Dictionary(dict)
}

// -- Meta commands ------------------------------------------------------------

/// `setConnectionKey`: announce our connection UUID.
pub fn set_connection_key(envelope: &Envelope) -> Result<Value> {
    let mut argument = Dictionary::new();
    argument.insert(
        keys::CONNECTION_ID.to_owned(),
        Value::String(envelope.connection_id()?.to_owned()),
    );
    Ok(record(keys::REPORT_IDENTIFIER, argument))
}

/// `connectToApp`: request the page listing for one application.
pub fn connect_to_app(envelope: &Envelope, app_id: &str) -> Result<Value> {
    let mut argument = Dictionary::new();
    argument.insert(
        keys::CONNECTION_ID.to_owned(),
        Value::String(envelope.connection_id()?.to_owned()),
    );
    argument.insert(keys::APPLICATION_ID.to_owned(), Value::String(app_id.to_owned()));
    Ok(record(keys::FORWARD_GET_LISTING, argument))
}

/// `setSenderKey`: open the socket-level session for one page.
pub fn set_sender_key(envelope: &Envelope) -> Result<Value> {
    let mut argument = Dictionary::new();
    argument.insert(
        keys::CONNECTION_ID.to_owned(),
        Value::String(envelope.connection_id()?.to_owned()),
    );
    argument.insert(keys::APPLICATION_ID.to_owned(), Value::String(envelope.app_id()?.to_owned()));
    argument.insert(keys::SENDER.to_owned(), Value::String(envelope.sender_id()?.to_owned()));
    argument.insert(keys::PAGE_ID.to_owned(), Value::Integer(envelope.page_id()?.into()));
    argument.insert(keys::AUTOMATICALLY_PAUSE.to_owned(), Value::Boolean(false));
    Ok(record(keys::FORWARD_SOCKET_SETUP, argument))
}

/// `indicateWebView`: flash the inspection highlight on or off.
pub fn indicate_web_view(envelope: &Envelope, enabled: bool) -> Result<Value> {
    let mut argument = Dictionary::new();
    argument.insert(
        keys::CONNECTION_ID.to_owned(),
        Value::String(envelope.connection_id()?.to_owned()),
    );
    argument.insert(keys::APPLICATION_ID.to_owned(), Value::String(envelope.app_id()?.to_owned()));
    argument.insert(keys::PAGE_ID.to_owned(), Value::Integer(envelope.page_id()?.into()));
    if let Some(sender) = envelope.sender_id.as_deref() {
        argument.insert(keys::SENDER.to_owned(), Value::String(sender.to_owned()));
    }
    argument.insert(keys::INDICATE_ENABLED.to_owned(), Value::Boolean(enabled));
    Ok(record(keys::FORWARD_INDICATE_WEB_VIEW, argument))
}

/// `launchApplication`: ask the inspector daemon to launch a bundle.
pub fn launch_application(envelope: &Envelope, bundle_id: &str) -> Result<Value> {
    let mut argument = Dictionary::new();
    argument.insert(
        keys::CONNECTION_ID.to_owned(),
        Value::String(envelope.connection_id()?.to_owned()),
    );
    argument
        .insert(keys::APPLICATION_BUNDLE_ID.to_owned(), Value::String(bundle_id.to_owned()));
    Ok(record(keys::REQUEST_APPLICATION_LAUNCH, argument))
}

// -- Protocol commands --------------------------------------------------------

/// Target wrapping for a minimal/full-shape command.
#[derive(Debug, Clone, Copy)]
pub struct Wrap<'a> {
    pub target_id: &'a str,
    pub wrapper_msg_id: u64,
}

/// Build the `_rpc_forwardSocketData:` record for one protocol command.
///
/// `wrap` is `None` for direct-shape methods and for sessions downgraded to
/// the pre-target protocol; the inner message then travels verbatim.
pub fn protocol_command(
    envelope: &Envelope,
    method: &str,
    params: serde_json::Value,
    msg_id: u64,
    wrap: Option<Wrap<'_>>,
) -> Result<Value> {
    let mut params = normalize_params(params)?;
    if shape_for(method) == Shape::Full {
        merge_full_defaults(&mut params);
    }
    prune_nulls(&mut params);

    let inner = json!({ "id": msg_id, "method": method, "params": params });
    let outer = match wrap {
        Some(wrap) => {
            let message = serde_json::to_string(&inner)
                .map_err(|e| Error::Protocol(format!("inner message serialize: {e}")))?;
            json!({
                "id": wrap.wrapper_msg_id,
                "method": methods::SEND_MESSAGE_TO_TARGET,
                "params": { "targetId": wrap.target_id, "message": message },
            })
        }
        None => inner,
    };

    let data = serde_json::to_vec(&outer)
        .map_err(|e| Error::Protocol(format!("socket data serialize: {e}")))?;

    let mut argument = Dictionary::new();
    argument.insert(
        keys::CONNECTION_ID.to_owned(),
        Value::String(envelope.connection_id()?.to_owned()),
    );
    argument.insert(keys::APPLICATION_ID.to_owned(), Value::String(envelope.app_id()?.to_owned()));
    argument.insert(keys::SENDER.to_owned(), Value::String(envelope.sender_id()?.to_owned()));
    argument.insert(keys::PAGE_ID.to_owned(), Value::Integer(envelope.page_id()?.into()));
    argument.insert(keys::SOCKET_DATA.to_owned(), Value::Data(data));
    Ok(record(keys::FORWARD_SOCKET_DATA, argument))
}

/// Coerce caller params into an object map. `null` becomes empty.
fn normalize_params(params: serde_json::Value) -> Result<serde_json::Map<String, serde_json::Value>> {
    match params {
        serde_json::Value::Object(map) => Ok(map),
        serde_json::Value::Null => Ok(serde_json::Map::new()),
        other => Err(Error::Argument(format!("params must be an object, got {other}"))),
    }
}

fn merge_full_defaults(params: &mut serde_json::Map<String, serde_json::Value>) {
    if !params.contains_key("objectGroup") {
        params.insert("objectGroup".to_owned(), json!("console"));
    }
    for (key, default) in FULL_SHAPE_DEFAULTS {
        if !params.contains_key(key) {
            params.insert(key.to_owned(), json!(default));
        }
    }
}

/// Drop null-valued top-level argument keys before send.
fn prune_nulls(params: &mut serde_json::Map<String, serde_json::Value>) {
    params.retain(|_, v| !v.is_null());
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
