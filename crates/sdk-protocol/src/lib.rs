// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! This crate contains the code-generation-free model of the service
//! protocol: the frame header, the protobuf message payloads, and the
//! encoder/decoder used by the SDK core to talk to the runtime over a
//! duplex byte stream.

mod encoding;
mod header;
mod message;
pub mod pb;
mod stream;

pub use encoding::{Decoder, Encoder, EncodingError};
pub use header::{MessageHeader, MessageKind, MessageType, UnknownMessageType};
pub use message::{EntryMessage, ProtocolMessage};
pub use stream::{ProtocolReader, ProtocolWriter, ReadError};

/// Index of a journal entry, unique within an invocation.
///
/// The input entry occupies index 1; the first operation performed by user
/// code gets index 2.
pub type EntryIndex = u32;
