// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Configuration for an inspector session.
#[derive(Debug, Clone, clap::Args)]
pub struct InspectorConfig {
    /// Unix-domain socket of the simulator's webinspectord.
    #[arg(long, env = "WIR_SOCKET")]
    pub socket: Option<String>,

    /// TCP address of the daemon when reached through port forwarding.
    #[arg(long, default_value = "[::1]:27753", env = "WIR_TCP_ADDR")]
    pub tcp_addr: String,

    /// User-space proxy address; the proxy gets a JSON socketPath preamble.
    #[arg(long, env = "WIR_PROXY_ADDR")]
    pub proxy_addr: Option<String>,

    /// Page-load timeout in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "WIR_PAGE_LOAD_MS")]
    pub page_load_ms: u64,

    /// How long to wait for `Target.targetCreated` after page selection,
    /// in milliseconds. Also bounds per-page lock acquisition.
    #[arg(long, default_value_t = 10_000, env = "WIR_TARGET_CREATION_MS")]
    pub target_creation_ms: u64,

    /// Reply timeout for one protocol command, in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "WIR_SEND_TIMEOUT_MS")]
    pub send_timeout_ms: u64,

    /// Attempts at `connectToApp` before giving up on app selection.
    #[arg(long, default_value_t = 20, env = "WIR_APP_CONNECT_RETRIES")]
    pub max_app_tries: u32,

    /// Run the extended page-initialization sequence (resource tree,
    /// storage domains, instruments) instead of the minimal one.
    #[arg(long, env = "WIR_FULL_PAGE_INIT")]
    pub full_page_init: bool,

    /// Dump every frame at trace level.
    #[arg(long, env = "WIR_HEXDUMP")]
    pub hexdump: bool,

    /// Reject frames larger than this many bytes.
    #[arg(long, default_value_t = 32 * 1024 * 1024, env = "WIR_MAX_FRAME_LEN")]
    pub max_frame_len: usize,

    /// Socket read size per chunk.
    #[arg(long, default_value_t = 16 * 1024, env = "WIR_CHUNK_SIZE")]
    pub chunk_size: usize,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            socket: None,
            tcp_addr: "[::1]:27753".to_owned(),
            proxy_addr: None,
            page_load_ms: 30_000,
            target_creation_ms: 10_000,
            send_timeout_ms: 30_000,
            max_app_tries: 20,
            full_page_init: false,
            hexdump: false,
            max_frame_len: 32 * 1024 * 1024,
            chunk_size: 16 * 1024,
        }
    }
}

impl InspectorConfig {
    pub fn page_load(&self) -> Duration {
        Duration::from_millis(self.page_load_ms)
    }

    pub fn target_creation(&self) -> Duration {
        Duration::from_millis(self.target_creation_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Bound on the wait for a page's target to appear: at least 30 s,
    /// stretched by a longer configured page-load budget.
    pub fn target_wait(&self) -> Duration {
        self.page_load().max(Duration::from_secs(30))
    }

    /// Bound on the wait for the page-initialized signal.
    pub fn init_wait(&self) -> Duration {
        self.target_creation() * 6 / 5
    }
}
