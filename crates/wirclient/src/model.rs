// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Records materialized from the wire: applications, pages, and targets.
//!
//! Application and page data arrive as plist dictionaries; target data
//! arrives as JSON inside `_rpc_applicationSentData:` payloads.

use indexmap::IndexMap;
use plist::{Dictionary, Value};
use serde::Deserialize;

use crate::wire::keys;

// -- Applications -------------------------------------------------------------

/// Tri-state remote-automation availability of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomationAvailability {
    Available,
    NotAvailable,
    Unknown,
}

/// One debuggable application process, keyed by an opaque id (often `PID:n`).
#[derive(Debug, Clone, PartialEq)]
pub struct AppRecord {
    pub id: String,
    pub bundle_id: String,
    pub name: String,
    /// For proxy apps, the id of the hosting application.
    pub host_id: Option<String>,
    pub is_active: bool,
    pub is_proxy: bool,
    pub automation: AutomationAvailability,
}

impl AppRecord {
    pub fn is_automation_enabled(&self) -> bool {
        self.automation == AutomationAvailability::Available
    }

    /// Parse one application dictionary. `fallback_id` is the key the entry
    /// was listed under when the dictionary itself omits the identifier.
    pub fn from_dict(fallback_id: Option<&str>, dict: &Dictionary) -> Option<Self> {
        let id = dict
            .get(keys::APPLICATION_ID)
            .and_then(Value::as_string)
            .or(fallback_id)?
            .to_owned();
        let bundle_id = dict
            .get(keys::APPLICATION_BUNDLE_ID)
            .and_then(Value::as_string)
            .unwrap_or_default()
            .to_owned();
        let name = dict
            .get(keys::APPLICATION_NAME)
            .and_then(Value::as_string)
            .unwrap_or_default()
            .to_owned();
        let host_id = dict
            .get(keys::HOST_APPLICATION_ID)
            .and_then(Value::as_string)
            .map(str::to_owned);

        let automation = match dict.get(keys::AUTOMATION_AVAILABILITY).and_then(Value::as_string) {
            Some(keys::AUTOMATION_AVAILABILITY_AVAILABLE) => AutomationAvailability::Available,
            Some(keys::AUTOMATION_AVAILABILITY_UNKNOWN) => AutomationAvailability::Unknown,
            Some(_) => AutomationAvailability::NotAvailable,
            None => {
                if dict.get(keys::REMOTE_AUTOMATION_ENABLED).and_then(as_flag).unwrap_or(false) {
                    AutomationAvailability::Available
                } else {
                    AutomationAvailability::NotAvailable
                }
            }
        };

        Some(Self {
            id,
            bundle_id,
            name,
            host_id,
            is_active: dict.get(keys::IS_APPLICATION_ACTIVE).and_then(as_flag).unwrap_or(false),
            is_proxy: dict.get(keys::IS_APPLICATION_PROXY).and_then(as_flag).unwrap_or(false),
            automation,
        })
    }
}

/// Parse a `WIRApplicationDictionaryKey` value: `{app_id: {fields}}`.
/// Entries that cannot be parsed are skipped.
pub fn parse_app_dictionary(dict: &Dictionary) -> IndexMap<String, AppRecord> {
    let mut apps = IndexMap::new();
    for (id, entry) in dict {
        let Some(entry) = entry.as_dictionary() else {
            continue;
        };
        if let Some(app) = AppRecord::from_dict(Some(id.as_str()), entry) {
            apps.insert(app.id.clone(), app);
        }
    }
    apps
}

/// Booleans arrive as plist booleans or as 0/1 integers depending on the
/// iOS version.
fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Boolean(b) => Some(*b),
        Value::Integer(n) => n.as_signed().map(|n| n != 0),
        _ => None,
    }
}

// -- Pages --------------------------------------------------------------------

/// Surfaced page types; everything else in a listing is filtered out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Web,
    WebPage,
    Page,
}

impl PageKind {
    fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            keys::TYPE_WEB => Some(Self::Web),
            keys::TYPE_WEB_PAGE => Some(Self::WebPage),
            keys::TYPE_PAGE => Some(Self::Page),
            _ => None,
        }
    }
}

/// One inspectable page inside an application.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRecord {
    pub id: u32,
    pub title: String,
    pub url: String,
    pub kind: PageKind,
    /// Whether some connection (possibly ours) already owns the page.
    pub is_key: bool,
}

/// Parse a `WIRListingKey` dictionary into surfaced pages, preserving wire
/// order. Listings replace prior state wholesale; they are never merged.
pub fn parse_page_listing(listing: &Dictionary, ignore_about_blank: bool) -> Vec<PageRecord> {
    let mut pages = Vec::new();
    for (_, entry) in listing {
        let Some(entry) = entry.as_dictionary() else {
            continue;
        };
        let Some(kind) =
            entry.get(keys::TYPE).and_then(Value::as_string).and_then(PageKind::from_wire)
        else {
            continue;
        };
        let Some(id) = entry.get(keys::PAGE_ID).and_then(Value::as_unsigned_integer) else {
            continue;
        };
        let url = entry.get(keys::URL).and_then(Value::as_string).unwrap_or_default().to_owned();
        if ignore_about_blank && url == "about:blank" {
            continue;
        }
        pages.push(PageRecord {
            id: id as u32,
            title: entry
                .get(keys::TITLE)
                .and_then(Value::as_string)
                .unwrap_or_default()
                .to_owned(),
            url,
            kind,
            is_key: entry.get(keys::CONNECTION_ID).is_some(),
        });
    }
    pages
}

// -- Targets ------------------------------------------------------------------

/// Target kinds reported by `Target.targetCreated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    Page,
    Frame,
    Worker,
    ServiceWorker,
    #[default]
    #[serde(other)]
    Other,
}

/// The inspector's session handle for a page, frame, or worker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TargetInfo {
    #[serde(rename = "targetId")]
    pub target_id: String,
    #[serde(rename = "type", default)]
    pub kind: TargetKind,
    #[serde(rename = "isProvisional", default)]
    pub is_provisional: bool,
    #[serde(rename = "isPaused", default)]
    pub is_paused: bool,
}

impl TargetInfo {
    /// Extract the `targetInfo` object from `Target.targetCreated` params.
    /// `None` when the info is absent or carries no target id.
    pub fn from_params(params: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(params.get("targetInfo")?.clone()).ok()
    }
}

/// `Target.didCommitProvisionalTarget` parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProvisionalCommit {
    #[serde(rename = "oldTargetId")]
    pub old: String,
    #[serde(rename = "newTargetId")]
    pub new: String,
}

/// Device/simulator identity reported by `_rpc_reportSetup:`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SetupInfo {
    pub device_name: String,
    pub build: String,
    pub product_version: String,
}

impl SetupInfo {
    pub fn from_dict(dict: &Dictionary) -> Self {
        let field = |key: &str| {
            dict.get(key).and_then(Value::as_string).unwrap_or_default().to_owned()
        };
        Self {
            device_name: field(keys::SIMULATOR_NAME),
            build: field(keys::SIMULATOR_BUILD),
            product_version: field(keys::SIMULATOR_PRODUCT_VERSION),
        }
    }
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
