// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Typed model of the protocol messages flowing on an invocation stream.

use bytes::{Buf, BufMut};
use prost::Message;

use crate::header::MessageType;
use crate::pb;

/// Any message that can appear on the wire, fully decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolMessage {
    Start(pb::StartMessage),
    Completion(pb::CompletionMessage),
    Suspension(pb::SuspensionMessage),
    Error(pb::ErrorMessage),
    EntryAck(pb::EntryAckMessage),
    End(pb::EndMessage),
    Entry(EntryMessage),
}

/// A journal entry message.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryMessage {
    Input(pb::InputEntryMessage),
    Output(pb::OutputEntryMessage),
    GetState(pb::GetStateEntryMessage),
    SetState(pb::SetStateEntryMessage),
    ClearState(pb::ClearStateEntryMessage),
    ClearAllState(pb::ClearAllStateEntryMessage),
    GetStateKeys(pb::GetStateKeysEntryMessage),
    Sleep(pb::SleepEntryMessage),
    Call(pb::CallEntryMessage),
    OneWayCall(pb::OneWayCallEntryMessage),
    Awakeable(pb::AwakeableEntryMessage),
    CompleteAwakeable(pb::CompleteAwakeableEntryMessage),
    SideEffect(pb::SideEffectEntryMessage),
}

impl ProtocolMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            ProtocolMessage::Start(_) => MessageType::Start,
            ProtocolMessage::Completion(_) => MessageType::Completion,
            ProtocolMessage::Suspension(_) => MessageType::Suspension,
            ProtocolMessage::Error(_) => MessageType::Error,
            ProtocolMessage::EntryAck(_) => MessageType::EntryAck,
            ProtocolMessage::End(_) => MessageType::End,
            ProtocolMessage::Entry(entry) => entry.message_type(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            ProtocolMessage::Start(m) => m.encoded_len(),
            ProtocolMessage::Completion(m) => m.encoded_len(),
            ProtocolMessage::Suspension(m) => m.encoded_len(),
            ProtocolMessage::Error(m) => m.encoded_len(),
            ProtocolMessage::EntryAck(m) => m.encoded_len(),
            ProtocolMessage::End(m) => m.encoded_len(),
            ProtocolMessage::Entry(entry) => entry.encoded_len(),
        }
    }

    pub(crate) fn encode_to_buf(&self, buf: &mut impl BufMut) -> Result<(), prost::EncodeError> {
        match self {
            ProtocolMessage::Start(m) => m.encode(buf),
            ProtocolMessage::Completion(m) => m.encode(buf),
            ProtocolMessage::Suspension(m) => m.encode(buf),
            ProtocolMessage::Error(m) => m.encode(buf),
            ProtocolMessage::EntryAck(m) => m.encode(buf),
            ProtocolMessage::End(m) => m.encode(buf),
            ProtocolMessage::Entry(entry) => entry.encode_to_buf(buf),
        }
    }

    pub(crate) fn decode(
        ty: MessageType,
        buf: impl Buf,
    ) -> Result<ProtocolMessage, prost::DecodeError> {
        Ok(match ty {
            MessageType::Start => ProtocolMessage::Start(pb::StartMessage::decode(buf)?),
            MessageType::Completion => {
                ProtocolMessage::Completion(pb::CompletionMessage::decode(buf)?)
            }
            MessageType::Suspension => {
                ProtocolMessage::Suspension(pb::SuspensionMessage::decode(buf)?)
            }
            MessageType::Error => ProtocolMessage::Error(pb::ErrorMessage::decode(buf)?),
            MessageType::EntryAck => ProtocolMessage::EntryAck(pb::EntryAckMessage::decode(buf)?),
            MessageType::End => ProtocolMessage::End(pb::EndMessage::decode(buf)?),
            _ => ProtocolMessage::Entry(EntryMessage::decode(ty, buf)?),
        })
    }

    /// The completed flag for the frame header. `None` for non completable messages.
    pub fn completed(&self) -> Option<bool> {
        match self {
            ProtocolMessage::Entry(entry) => entry.completed(),
            _ => None,
        }
    }

    /// Entries requiring a runtime ack before the result may be considered durable.
    pub fn requires_ack(&self) -> bool {
        matches!(
            self,
            ProtocolMessage::Entry(EntryMessage::OneWayCall(_))
                | ProtocolMessage::Entry(EntryMessage::SideEffect(_))
        )
    }
}

impl EntryMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            EntryMessage::Input(_) => MessageType::InputEntry,
            EntryMessage::Output(_) => MessageType::OutputEntry,
            EntryMessage::GetState(_) => MessageType::GetStateEntry,
            EntryMessage::SetState(_) => MessageType::SetStateEntry,
            EntryMessage::ClearState(_) => MessageType::ClearStateEntry,
            EntryMessage::ClearAllState(_) => MessageType::ClearAllStateEntry,
            EntryMessage::GetStateKeys(_) => MessageType::GetStateKeysEntry,
            EntryMessage::Sleep(_) => MessageType::SleepEntry,
            EntryMessage::Call(_) => MessageType::CallEntry,
            EntryMessage::OneWayCall(_) => MessageType::OneWayCallEntry,
            EntryMessage::Awakeable(_) => MessageType::AwakeableEntry,
            EntryMessage::CompleteAwakeable(_) => MessageType::CompleteAwakeableEntry,
            EntryMessage::SideEffect(_) => MessageType::SideEffectEntry,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            EntryMessage::Input(m) => m.encoded_len(),
            EntryMessage::Output(m) => m.encoded_len(),
            EntryMessage::GetState(m) => m.encoded_len(),
            EntryMessage::SetState(m) => m.encoded_len(),
            EntryMessage::ClearState(m) => m.encoded_len(),
            EntryMessage::ClearAllState(m) => m.encoded_len(),
            EntryMessage::GetStateKeys(m) => m.encoded_len(),
            EntryMessage::Sleep(m) => m.encoded_len(),
            EntryMessage::Call(m) => m.encoded_len(),
            EntryMessage::OneWayCall(m) => m.encoded_len(),
            EntryMessage::Awakeable(m) => m.encoded_len(),
            EntryMessage::CompleteAwakeable(m) => m.encoded_len(),
            EntryMessage::SideEffect(m) => m.encoded_len(),
        }
    }

    fn encode_to_buf(&self, buf: &mut impl BufMut) -> Result<(), prost::EncodeError> {
        match self {
            EntryMessage::Input(m) => m.encode(buf),
            EntryMessage::Output(m) => m.encode(buf),
            EntryMessage::GetState(m) => m.encode(buf),
            EntryMessage::SetState(m) => m.encode(buf),
            EntryMessage::ClearState(m) => m.encode(buf),
            EntryMessage::ClearAllState(m) => m.encode(buf),
            EntryMessage::GetStateKeys(m) => m.encode(buf),
            EntryMessage::Sleep(m) => m.encode(buf),
            EntryMessage::Call(m) => m.encode(buf),
            EntryMessage::OneWayCall(m) => m.encode(buf),
            EntryMessage::Awakeable(m) => m.encode(buf),
            EntryMessage::CompleteAwakeable(m) => m.encode(buf),
            EntryMessage::SideEffect(m) => m.encode(buf),
        }
    }

    fn decode(ty: MessageType, buf: impl Buf) -> Result<EntryMessage, prost::DecodeError> {
        Ok(match ty {
            MessageType::InputEntry => EntryMessage::Input(pb::InputEntryMessage::decode(buf)?),
            MessageType::OutputEntry => EntryMessage::Output(pb::OutputEntryMessage::decode(buf)?),
            MessageType::GetStateEntry => {
                EntryMessage::GetState(pb::GetStateEntryMessage::decode(buf)?)
            }
            MessageType::SetStateEntry => {
                EntryMessage::SetState(pb::SetStateEntryMessage::decode(buf)?)
            }
            MessageType::ClearStateEntry => {
                EntryMessage::ClearState(pb::ClearStateEntryMessage::decode(buf)?)
            }
            MessageType::ClearAllStateEntry => {
                EntryMessage::ClearAllState(pb::ClearAllStateEntryMessage::decode(buf)?)
            }
            MessageType::GetStateKeysEntry => {
                EntryMessage::GetStateKeys(pb::GetStateKeysEntryMessage::decode(buf)?)
            }
            MessageType::SleepEntry => EntryMessage::Sleep(pb::SleepEntryMessage::decode(buf)?),
            MessageType::CallEntry => EntryMessage::Call(pb::CallEntryMessage::decode(buf)?),
            MessageType::OneWayCallEntry => {
                EntryMessage::OneWayCall(pb::OneWayCallEntryMessage::decode(buf)?)
            }
            MessageType::AwakeableEntry => {
                EntryMessage::Awakeable(pb::AwakeableEntryMessage::decode(buf)?)
            }
            MessageType::CompleteAwakeableEntry => {
                EntryMessage::CompleteAwakeable(pb::CompleteAwakeableEntryMessage::decode(buf)?)
            }
            MessageType::SideEffectEntry => {
                EntryMessage::SideEffect(pb::SideEffectEntryMessage::decode(buf)?)
            }
            ty => {
                debug_assert!(!ty.is_entry());
                return Err(prost::DecodeError::new("not an entry message"));
            }
        })
    }

    fn completed(&self) -> Option<bool> {
        match self {
            EntryMessage::GetState(m) => Some(m.result.is_some()),
            EntryMessage::GetStateKeys(m) => Some(m.result.is_some()),
            EntryMessage::Sleep(m) => Some(m.result.is_some()),
            EntryMessage::Call(m) => Some(m.result.is_some()),
            EntryMessage::Awakeable(m) => Some(m.result.is_some()),
            _ => None,
        }
    }
}

impl From<EntryMessage> for ProtocolMessage {
    fn from(value: EntryMessage) -> Self {
        ProtocolMessage::Entry(value)
    }
}

macro_rules! impl_from_pb {
    ($pb:ty, $variant:ident) => {
        impl From<$pb> for ProtocolMessage {
            fn from(value: $pb) -> Self {
                ProtocolMessage::$variant(value)
            }
        }
    };
}

impl_from_pb!(pb::StartMessage, Start);
impl_from_pb!(pb::CompletionMessage, Completion);
impl_from_pb!(pb::SuspensionMessage, Suspension);
impl_from_pb!(pb::ErrorMessage, Error);
impl_from_pb!(pb::EntryAckMessage, EntryAck);
impl_from_pb!(pb::EndMessage, End);

macro_rules! impl_from_entry_pb {
    ($pb:ty, $variant:ident) => {
        impl From<$pb> for EntryMessage {
            fn from(value: $pb) -> Self {
                EntryMessage::$variant(value)
            }
        }

        impl From<$pb> for ProtocolMessage {
            fn from(value: $pb) -> Self {
                ProtocolMessage::Entry(EntryMessage::$variant(value))
            }
        }
    };
}

impl_from_entry_pb!(pb::InputEntryMessage, Input);
impl_from_entry_pb!(pb::OutputEntryMessage, Output);
impl_from_entry_pb!(pb::GetStateEntryMessage, GetState);
impl_from_entry_pb!(pb::SetStateEntryMessage, SetState);
impl_from_entry_pb!(pb::ClearStateEntryMessage, ClearState);
impl_from_entry_pb!(pb::ClearAllStateEntryMessage, ClearAllState);
impl_from_entry_pb!(pb::GetStateKeysEntryMessage, GetStateKeys);
impl_from_entry_pb!(pb::SleepEntryMessage, Sleep);
impl_from_entry_pb!(pb::CallEntryMessage, Call);
impl_from_entry_pb!(pb::OneWayCallEntryMessage, OneWayCall);
impl_from_entry_pb!(pb::AwakeableEntryMessage, Awakeable);
impl_from_entry_pb!(pb::CompleteAwakeableEntryMessage, CompleteAwakeable);
impl_from_entry_pb!(pb::SideEffectEntryMessage, SideEffect);
