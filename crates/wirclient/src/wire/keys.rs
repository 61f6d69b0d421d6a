// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key and selector vocabulary of the Web Inspector wire protocol.
//!
//! Every record is `{__selector: "<verb>", __argument: {WIR… keys}}`.

pub const SELECTOR: &str = "__selector";
pub const ARGUMENT: &str = "__argument";

// -- Envelope keys ------------------------------------------------------------

pub const CONNECTION_ID: &str = "WIRConnectionIdentifierKey";
pub const SENDER: &str = "WIRSenderKey";
pub const APPLICATION_ID: &str = "WIRApplicationIdentifierKey";
pub const PAGE_ID: &str = "WIRPageIdentifierKey";
pub const HOST_APPLICATION_ID: &str = "WIRHostApplicationIdentifierKey";
pub const APPLICATION_NAME: &str = "WIRApplicationNameKey";
pub const APPLICATION_BUNDLE_ID: &str = "WIRApplicationBundleIdentifierKey";
pub const IS_APPLICATION_PROXY: &str = "WIRIsApplicationProxyKey";
pub const IS_APPLICATION_ACTIVE: &str = "WIRIsApplicationActiveKey";
pub const REMOTE_AUTOMATION_ENABLED: &str = "WIRRemoteAutomationEnabledKey";
pub const AUTOMATION_AVAILABILITY: &str = "WIRAutomationAvailabilityKey";
pub const SIMULATOR_NAME: &str = "WIRSimulatorNameKey";
pub const SIMULATOR_BUILD: &str = "WIRSimulatorBuildKey";
pub const SIMULATOR_PRODUCT_VERSION: &str = "WIRSimulatorProductVersionKey";
pub const APPLICATION_DICTIONARY: &str = "WIRApplicationDictionaryKey";
pub const LISTING: &str = "WIRListingKey";
pub const TYPE: &str = "WIRTypeKey";
pub const URL: &str = "WIRURLKey";
pub const TITLE: &str = "WIRTitleKey";
pub const SOCKET_DATA: &str = "WIRSocketDataKey";
pub const MESSAGE_DATA: &str = "WIRMessageDataKey";
pub const DESTINATION: &str = "WIRDestinationKey";
pub const AUTOMATICALLY_PAUSE: &str = "WIRAutomaticallyPause";
pub const INDICATE_ENABLED: &str = "WIRIndicateEnabledKey";

// -- Key values ---------------------------------------------------------------

pub const AUTOMATION_AVAILABILITY_UNKNOWN: &str = "WIRAutomationAvailabilityUnknown";
pub const AUTOMATION_AVAILABILITY_AVAILABLE: &str = "WIRAutomationAvailabilityAvailable";

/// Page types surfaced to consumers; every other `WIRTypeKey` is filtered.
pub const TYPE_WEB: &str = "WIRTypeWeb";
pub const TYPE_WEB_PAGE: &str = "WIRTypeWebPage";
pub const TYPE_PAGE: &str = "WIRTypePage";

// -- Inbound selectors --------------------------------------------------------

pub const REPORT_SETUP: &str = "_rpc_reportSetup:";
pub const REPORT_CONNECTED_APPLICATION_LIST: &str = "_rpc_reportConnectedApplicationList:";
pub const APPLICATION_SENT_LISTING: &str = "_rpc_applicationSentListing:";
pub const APPLICATION_CONNECTED: &str = "_rpc_applicationConnected:";
pub const APPLICATION_DISCONNECTED: &str = "_rpc_applicationDisconnected:";
pub const APPLICATION_UPDATED: &str = "_rpc_applicationUpdated:";
pub const REPORT_CONNECTED_DRIVER_LIST: &str = "_rpc_reportConnectedDriverList:";
pub const REPORT_CURRENT_STATE: &str = "_rpc_reportCurrentState:";
pub const APPLICATION_SENT_DATA: &str = "_rpc_applicationSentData:";

// -- Outbound selectors -------------------------------------------------------

pub const REPORT_IDENTIFIER: &str = "_rpc_reportIdentifier:";
pub const FORWARD_GET_LISTING: &str = "_rpc_forwardGetListing:";
pub const FORWARD_SOCKET_SETUP: &str = "_rpc_forwardSocketSetup:";
pub const FORWARD_SOCKET_DATA: &str = "_rpc_forwardSocketData:";
pub const FORWARD_INDICATE_WEB_VIEW: &str = "_rpc_forwardIndicateWebView:";
pub const REQUEST_APPLICATION_LAUNCH: &str = "_rpc_requestApplicationLaunch:";
