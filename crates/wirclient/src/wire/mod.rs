// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire layer: the `bplist00` record codec with its 4-byte length framing,
//! and the WIR key/selector vocabulary.

pub mod codec;
pub mod keys;

pub use codec::{decode_record, encode_body, encode_record, FrameDecoder};
