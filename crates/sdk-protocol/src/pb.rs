// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Protobuf model of the service protocol messages.
//!
//! These structs are kept in sync with the runtime's service protocol
//! definitions. They are written out as plain prost derives so the build
//! does not need a protoc toolchain.

use bytes::Bytes;

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct Failure {
    #[prost(uint32, tag = "1")]
    pub code: u32,
    #[prost(string, tag = "2")]
    pub message: String,
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct Empty {}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct StateEntry {
    #[prost(bytes = "bytes", tag = "1")]
    pub key: Bytes,
    #[prost(bytes = "bytes", tag = "2")]
    pub value: Bytes,
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct StartMessage {
    #[prost(bytes = "bytes", tag = "1")]
    pub id: Bytes,
    #[prost(string, tag = "2")]
    pub debug_id: String,
    #[prost(uint32, tag = "3")]
    pub known_entries: u32,
    #[prost(message, repeated, tag = "4")]
    pub state_map: Vec<StateEntry>,
    #[prost(bool, tag = "5")]
    pub partial_state: bool,
    #[prost(string, tag = "6")]
    pub key: String,
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct CompletionMessage {
    #[prost(uint32, tag = "1")]
    pub entry_index: u32,
    #[prost(oneof = "completion_message::Result", tags = "13, 14, 15")]
    pub result: Option<completion_message::Result>,
}

pub mod completion_message {
    use super::*;

    #[derive(Clone, PartialEq, ::prost::Oneof, serde::Serialize)]
    pub enum Result {
        #[prost(message, tag = "13")]
        Empty(super::Empty),
        #[prost(bytes = "bytes", tag = "14")]
        Value(Bytes),
        #[prost(message, tag = "15")]
        Failure(super::Failure),
    }
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct SuspensionMessage {
    #[prost(uint32, repeated, tag = "1")]
    pub entry_indexes: Vec<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct ErrorMessage {
    #[prost(uint32, tag = "1")]
    pub code: u32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(string, tag = "3")]
    pub description: String,
    #[prost(uint32, optional, tag = "4")]
    pub related_entry_index: Option<u32>,
    #[prost(uint32, optional, tag = "5")]
    pub related_entry_type: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct EntryAckMessage {
    #[prost(uint32, tag = "1")]
    pub entry_index: u32,
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct EndMessage {}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct InputEntryMessage {
    #[prost(bytes = "bytes", tag = "14")]
    pub value: Bytes,
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct OutputEntryMessage {
    #[prost(oneof = "output_entry_message::Result", tags = "14, 15")]
    pub result: Option<output_entry_message::Result>,
}

pub mod output_entry_message {
    use super::*;

    #[derive(Clone, PartialEq, ::prost::Oneof, serde::Serialize)]
    pub enum Result {
        #[prost(bytes = "bytes", tag = "14")]
        Value(Bytes),
        #[prost(message, tag = "15")]
        Failure(super::Failure),
    }
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct GetStateEntryMessage {
    #[prost(bytes = "bytes", tag = "1")]
    pub key: Bytes,
    #[prost(oneof = "get_state_entry_message::Result", tags = "13, 14")]
    pub result: Option<get_state_entry_message::Result>,
}

pub mod get_state_entry_message {
    use super::*;

    #[derive(Clone, PartialEq, ::prost::Oneof, serde::Serialize)]
    pub enum Result {
        #[prost(message, tag = "13")]
        Empty(super::Empty),
        #[prost(bytes = "bytes", tag = "14")]
        Value(Bytes),
    }
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct SetStateEntryMessage {
    #[prost(bytes = "bytes", tag = "1")]
    pub key: Bytes,
    #[prost(bytes = "bytes", tag = "3")]
    pub value: Bytes,
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct ClearStateEntryMessage {
    #[prost(bytes = "bytes", tag = "1")]
    pub key: Bytes,
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct ClearAllStateEntryMessage {}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct GetStateKeysEntryMessage {
    #[prost(oneof = "get_state_keys_entry_message::Result", tags = "14, 15")]
    pub result: Option<get_state_keys_entry_message::Result>,
}

pub mod get_state_keys_entry_message {
    use super::*;

    #[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
    pub struct StateKeys {
        #[prost(bytes = "bytes", repeated, tag = "1")]
        pub keys: Vec<Bytes>,
    }

    #[derive(Clone, PartialEq, ::prost::Oneof, serde::Serialize)]
    pub enum Result {
        #[prost(message, tag = "14")]
        Value(StateKeys),
        #[prost(message, tag = "15")]
        Failure(super::Failure),
    }
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct SleepEntryMessage {
    /// Wake up time, as duration since UNIX_EPOCH in millis.
    #[prost(uint64, tag = "1")]
    pub wake_up_time: u64,
    #[prost(oneof = "sleep_entry_message::Result", tags = "13, 15")]
    pub result: Option<sleep_entry_message::Result>,
}

pub mod sleep_entry_message {
    use super::*;

    #[derive(Clone, PartialEq, ::prost::Oneof, serde::Serialize)]
    pub enum Result {
        #[prost(message, tag = "13")]
        Empty(super::Empty),
        #[prost(message, tag = "15")]
        Failure(super::Failure),
    }
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct CallEntryMessage {
    #[prost(string, tag = "1")]
    pub service_name: String,
    #[prost(string, tag = "2")]
    pub handler_name: String,
    #[prost(bytes = "bytes", tag = "3")]
    pub parameter: Bytes,
    #[prost(string, tag = "4")]
    pub key: String,
    #[prost(oneof = "call_entry_message::Result", tags = "14, 15")]
    pub result: Option<call_entry_message::Result>,
}

pub mod call_entry_message {
    use super::*;

    #[derive(Clone, PartialEq, ::prost::Oneof, serde::Serialize)]
    pub enum Result {
        #[prost(bytes = "bytes", tag = "14")]
        Value(Bytes),
        #[prost(message, tag = "15")]
        Failure(super::Failure),
    }
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct OneWayCallEntryMessage {
    #[prost(string, tag = "1")]
    pub service_name: String,
    #[prost(string, tag = "2")]
    pub handler_name: String,
    #[prost(bytes = "bytes", tag = "3")]
    pub parameter: Bytes,
    /// Time to execute the call, as duration since UNIX_EPOCH in millis.
    /// Zero means immediately.
    #[prost(uint64, tag = "4")]
    pub invoke_time: u64,
    #[prost(string, tag = "5")]
    pub key: String,
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct AwakeableEntryMessage {
    #[prost(oneof = "awakeable_entry_message::Result", tags = "14, 15")]
    pub result: Option<awakeable_entry_message::Result>,
}

pub mod awakeable_entry_message {
    use super::*;

    #[derive(Clone, PartialEq, ::prost::Oneof, serde::Serialize)]
    pub enum Result {
        #[prost(bytes = "bytes", tag = "14")]
        Value(Bytes),
        #[prost(message, tag = "15")]
        Failure(super::Failure),
    }
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct CompleteAwakeableEntryMessage {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(oneof = "complete_awakeable_entry_message::Result", tags = "14, 15")]
    pub result: Option<complete_awakeable_entry_message::Result>,
}

pub mod complete_awakeable_entry_message {
    use super::*;

    #[derive(Clone, PartialEq, ::prost::Oneof, serde::Serialize)]
    pub enum Result {
        #[prost(bytes = "bytes", tag = "14")]
        Value(Bytes),
        #[prost(message, tag = "15")]
        Failure(super::Failure),
    }
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct SideEffectEntryMessage {
    #[prost(oneof = "side_effect_entry_message::Result", tags = "14, 15")]
    pub result: Option<side_effect_entry_message::Result>,
}

pub mod side_effect_entry_message {
    use super::*;

    #[derive(Clone, PartialEq, ::prost::Oneof, serde::Serialize)]
    pub enum Result {
        #[prost(bytes = "bytes", tag = "14")]
        Value(Bytes),
        #[prost(message, tag = "15")]
        Failure(super::Failure),
    }
}
