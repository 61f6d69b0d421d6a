// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Duplex transport contract.
//!
//! The core consumes a minimal interface: queue outbound records, receive
//! inbound bytes, observe closure. Simulator connections carry raw chunks
//! that the wire codec reframes. Device-mode connections are *preframed*:
//! the USB-mux Web Inspector service strips and applies the length prefix
//! itself, so each inbound message is one whole record.

pub mod socket;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::wire;

/// Write half of a connected transport. Cheap to clone.
#[derive(Clone)]
pub struct TransportTx {
    tx: mpsc::Sender<Bytes>,
    preframed: bool,
}

impl TransportTx {
    pub fn new(tx: mpsc::Sender<Bytes>, preframed: bool) -> Self {
        Self { tx, preframed }
    }

    pub fn is_preframed(&self) -> bool {
        self.preframed
    }

    /// Encode one record and queue it as a single atomic write.
    pub async fn send_record(&self, record: &plist::Value) -> Result<()> {
        let bytes = if self.preframed {
            Bytes::from(wire::encode_body(record)?)
        } else {
            wire::encode_record(record)?
        };
        self.tx
            .send(bytes)
            .await
            .map_err(|_| Error::Transport("connection closed".to_owned()))
    }
}

/// A connected duplex transport, handed to [`crate::session::Inspector`].
pub struct Transport {
    pub tx: TransportTx,
    /// Inbound chunks; whole records when `preframed`.
    pub inbound: mpsc::Receiver<Bytes>,
    /// Cancelled when the connection is torn down from either side.
    pub cancel: CancellationToken,
    pub preframed: bool,
}

impl Transport {
    /// Assemble a transport from raw channel halves. Used by the socket
    /// implementations and by in-memory test harnesses.
    pub fn from_parts(
        outbound: mpsc::Sender<Bytes>,
        inbound: mpsc::Receiver<Bytes>,
        cancel: CancellationToken,
        preframed: bool,
    ) -> Self {
        Self { tx: TransportTx::new(outbound, preframed), inbound, cancel, preframed }
    }
}

/// Render a frame as `offset  hex  ascii` lines for wire tracing.
pub fn hexdump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
            .collect();
        out.push_str(&format!("{:08x}  {:<47}  {ascii}\n", row * 16, hex.join(" ")));
    }
    out
}
