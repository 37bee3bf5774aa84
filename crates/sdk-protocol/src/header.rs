// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

const COMPLETED_MASK: u64 = 0x0001_0000_0000;
const REQUIRES_ACK_MASK: u64 = 0x8000_0000_0000;

type MessageTypeId = u16;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Core,
    IO,
    State,
    Syscall,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    Start,
    Completion,
    Suspension,
    Error,
    EntryAck,
    End,
    InputEntry,
    OutputEntry,
    GetStateEntry,
    SetStateEntry,
    ClearStateEntry,
    ClearAllStateEntry,
    GetStateKeysEntry,
    SleepEntry,
    CallEntry,
    OneWayCallEntry,
    AwakeableEntry,
    CompleteAwakeableEntry,
    SideEffectEntry,
}

impl MessageType {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageType::Start
            | MessageType::Completion
            | MessageType::Suspension
            | MessageType::Error
            | MessageType::EntryAck
            | MessageType::End => MessageKind::Core,
            MessageType::InputEntry | MessageType::OutputEntry => MessageKind::IO,
            MessageType::GetStateEntry
            | MessageType::SetStateEntry
            | MessageType::ClearStateEntry
            | MessageType::ClearAllStateEntry
            | MessageType::GetStateKeysEntry => MessageKind::State,
            MessageType::SleepEntry
            | MessageType::CallEntry
            | MessageType::OneWayCallEntry
            | MessageType::AwakeableEntry
            | MessageType::CompleteAwakeableEntry
            | MessageType::SideEffectEntry => MessageKind::Syscall,
        }
    }

    pub fn is_entry(&self) -> bool {
        !matches!(self.kind(), MessageKind::Core)
    }

    fn has_completed_flag(&self) -> bool {
        matches!(
            self,
            MessageType::GetStateEntry
                | MessageType::GetStateKeysEntry
                | MessageType::SleepEntry
                | MessageType::CallEntry
                | MessageType::AwakeableEntry
        )
    }

    fn has_requires_ack_flag(&self) -> bool {
        self.is_entry()
    }
}

const START_MESSAGE_TYPE: u16 = 0x0000;
const COMPLETION_MESSAGE_TYPE: u16 = 0x0001;
const SUSPENSION_MESSAGE_TYPE: u16 = 0x0002;
const ERROR_MESSAGE_TYPE: u16 = 0x0003;
const ENTRY_ACK_MESSAGE_TYPE: u16 = 0x0004;
const END_MESSAGE_TYPE: u16 = 0x0005;
const INPUT_ENTRY_MESSAGE_TYPE: u16 = 0x0400;
const OUTPUT_ENTRY_MESSAGE_TYPE: u16 = 0x0401;
const GET_STATE_ENTRY_MESSAGE_TYPE: u16 = 0x0800;
const SET_STATE_ENTRY_MESSAGE_TYPE: u16 = 0x0801;
const CLEAR_STATE_ENTRY_MESSAGE_TYPE: u16 = 0x0802;
const CLEAR_ALL_STATE_ENTRY_MESSAGE_TYPE: u16 = 0x0803;
const GET_STATE_KEYS_ENTRY_MESSAGE_TYPE: u16 = 0x0804;
const SLEEP_ENTRY_MESSAGE_TYPE: u16 = 0x0C00;
const CALL_ENTRY_MESSAGE_TYPE: u16 = 0x0C01;
const ONE_WAY_CALL_ENTRY_MESSAGE_TYPE: u16 = 0x0C02;
const AWAKEABLE_ENTRY_MESSAGE_TYPE: u16 = 0x0C03;
const COMPLETE_AWAKEABLE_ENTRY_MESSAGE_TYPE: u16 = 0x0C04;
const SIDE_EFFECT_ENTRY_MESSAGE_TYPE: u16 = 0x0C05;

impl From<MessageType> for MessageTypeId {
    fn from(mt: MessageType) -> Self {
        match mt {
            MessageType::Start => START_MESSAGE_TYPE,
            MessageType::Completion => COMPLETION_MESSAGE_TYPE,
            MessageType::Suspension => SUSPENSION_MESSAGE_TYPE,
            MessageType::Error => ERROR_MESSAGE_TYPE,
            MessageType::EntryAck => ENTRY_ACK_MESSAGE_TYPE,
            MessageType::End => END_MESSAGE_TYPE,
            MessageType::InputEntry => INPUT_ENTRY_MESSAGE_TYPE,
            MessageType::OutputEntry => OUTPUT_ENTRY_MESSAGE_TYPE,
            MessageType::GetStateEntry => GET_STATE_ENTRY_MESSAGE_TYPE,
            MessageType::SetStateEntry => SET_STATE_ENTRY_MESSAGE_TYPE,
            MessageType::ClearStateEntry => CLEAR_STATE_ENTRY_MESSAGE_TYPE,
            MessageType::ClearAllStateEntry => CLEAR_ALL_STATE_ENTRY_MESSAGE_TYPE,
            MessageType::GetStateKeysEntry => GET_STATE_KEYS_ENTRY_MESSAGE_TYPE,
            MessageType::SleepEntry => SLEEP_ENTRY_MESSAGE_TYPE,
            MessageType::CallEntry => CALL_ENTRY_MESSAGE_TYPE,
            MessageType::OneWayCallEntry => ONE_WAY_CALL_ENTRY_MESSAGE_TYPE,
            MessageType::AwakeableEntry => AWAKEABLE_ENTRY_MESSAGE_TYPE,
            MessageType::CompleteAwakeableEntry => COMPLETE_AWAKEABLE_ENTRY_MESSAGE_TYPE,
            MessageType::SideEffectEntry => SIDE_EFFECT_ENTRY_MESSAGE_TYPE,
        }
    }
}

impl From<MessageType> for u32 {
    fn from(mt: MessageType) -> Self {
        MessageTypeId::from(mt) as u32
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown message code {0:#x}")]
pub struct UnknownMessageType(pub u16);

impl TryFrom<MessageTypeId> for MessageType {
    type Error = UnknownMessageType;

    fn try_from(value: MessageTypeId) -> Result<Self, UnknownMessageType> {
        match value {
            START_MESSAGE_TYPE => Ok(MessageType::Start),
            COMPLETION_MESSAGE_TYPE => Ok(MessageType::Completion),
            SUSPENSION_MESSAGE_TYPE => Ok(MessageType::Suspension),
            ERROR_MESSAGE_TYPE => Ok(MessageType::Error),
            ENTRY_ACK_MESSAGE_TYPE => Ok(MessageType::EntryAck),
            END_MESSAGE_TYPE => Ok(MessageType::End),
            INPUT_ENTRY_MESSAGE_TYPE => Ok(MessageType::InputEntry),
            OUTPUT_ENTRY_MESSAGE_TYPE => Ok(MessageType::OutputEntry),
            GET_STATE_ENTRY_MESSAGE_TYPE => Ok(MessageType::GetStateEntry),
            SET_STATE_ENTRY_MESSAGE_TYPE => Ok(MessageType::SetStateEntry),
            CLEAR_STATE_ENTRY_MESSAGE_TYPE => Ok(MessageType::ClearStateEntry),
            CLEAR_ALL_STATE_ENTRY_MESSAGE_TYPE => Ok(MessageType::ClearAllStateEntry),
            GET_STATE_KEYS_ENTRY_MESSAGE_TYPE => Ok(MessageType::GetStateKeysEntry),
            SLEEP_ENTRY_MESSAGE_TYPE => Ok(MessageType::SleepEntry),
            CALL_ENTRY_MESSAGE_TYPE => Ok(MessageType::CallEntry),
            ONE_WAY_CALL_ENTRY_MESSAGE_TYPE => Ok(MessageType::OneWayCallEntry),
            AWAKEABLE_ENTRY_MESSAGE_TYPE => Ok(MessageType::AwakeableEntry),
            COMPLETE_AWAKEABLE_ENTRY_MESSAGE_TYPE => Ok(MessageType::CompleteAwakeableEntry),
            SIDE_EFFECT_ENTRY_MESSAGE_TYPE => Ok(MessageType::SideEffectEntry),
            v => Err(UnknownMessageType(v)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    ty: MessageType,
    length: u32,

    // --- Flags
    /// Only completable entries have the completed flag. See [`MessageType::has_completed_flag`].
    completed_flag: Option<bool>,
    /// All entry messages may have the requires ack flag.
    requires_ack_flag: Option<bool>,
}

impl MessageHeader {
    #[inline]
    pub fn new(ty: MessageType, length: u32) -> Self {
        Self::_new(ty, None, None, length)
    }

    #[inline]
    pub fn new_entry_header(
        ty: MessageType,
        completed_flag: Option<bool>,
        requires_ack_flag: bool,
        length: u32,
    ) -> Self {
        debug_assert!(completed_flag.is_some() == ty.has_completed_flag());
        debug_assert!(ty.is_entry());

        MessageHeader {
            ty,
            length,
            completed_flag,
            requires_ack_flag: Some(requires_ack_flag),
        }
    }

    #[inline]
    fn _new(
        ty: MessageType,
        completed_flag: Option<bool>,
        requires_ack_flag: Option<bool>,
        length: u32,
    ) -> Self {
        MessageHeader {
            ty,
            length,
            completed_flag,
            requires_ack_flag,
        }
    }

    #[inline]
    pub fn message_kind(&self) -> MessageKind {
        self.ty.kind()
    }

    #[inline]
    pub fn message_type(&self) -> MessageType {
        self.ty
    }

    #[inline]
    pub fn completed(&self) -> Option<bool> {
        self.completed_flag
    }

    #[inline]
    pub fn requires_ack(&self) -> Option<bool> {
        self.requires_ack_flag
    }

    #[inline]
    pub fn frame_length(&self) -> u32 {
        self.length
    }
}

macro_rules! read_flag_if {
    ($cond:expr, $value:expr, $mask:expr) => {
        if $cond {
            Some(($value & $mask) != 0)
        } else {
            None
        }
    };
}

impl TryFrom<u64> for MessageHeader {
    type Error = UnknownMessageType;

    /// Deserialize the protocol header.
    fn try_from(value: u64) -> Result<Self, Self::Error> {
        let ty_code = (value >> 48) as u16;
        let ty: MessageType = ty_code.try_into()?;

        let completed_flag = read_flag_if!(ty.has_completed_flag(), value, COMPLETED_MASK);
        let requires_ack_flag = read_flag_if!(ty.has_requires_ack_flag(), value, REQUIRES_ACK_MASK);
        let length = value as u32;

        Ok(MessageHeader::_new(
            ty,
            completed_flag,
            requires_ack_flag,
            length,
        ))
    }
}

macro_rules! write_flag {
    ($flag:expr, $value:expr, $mask:expr) => {
        if let Some(true) = $flag {
            *$value |= $mask;
        }
    };
}

impl From<MessageHeader> for u64 {
    /// Serialize the protocol header.
    fn from(message_header: MessageHeader) -> Self {
        let mut res =
            ((u16::from(message_header.ty) as u64) << 48) | (message_header.length as u64);

        write_flag!(message_header.completed_flag, &mut res, COMPLETED_MASK);
        write_flag!(
            message_header.requires_ack_flag,
            &mut res,
            REQUIRES_ACK_MASK
        );

        res
    }
}

#[cfg(test)]
mod tests {

    use super::{MessageKind::*, MessageType::*, *};

    impl MessageHeader {
        fn new_completable_entry(ty: MessageType, completed: bool, length: u32) -> Self {
            Self::new_entry_header(ty, Some(completed), false, length)
        }
    }

    macro_rules! roundtrip_test {
        ($test_name:ident, $header:expr, $ty:expr, $kind:expr, $len:expr) => {
            roundtrip_test!($test_name, $header, $ty, $kind, $len, None, None);
        };
        ($test_name:ident, $header:expr, $ty:expr, $kind:expr, $len:expr, completed: $completed:expr) => {
            roundtrip_test!($test_name, $header, $ty, $kind, $len, Some($completed), None);
        };
        ($test_name:ident, $header:expr, $ty:expr, $kind:expr, $len:expr, requires_ack: $requires_ack:expr) => {
            roundtrip_test!($test_name, $header, $ty, $kind, $len, None, Some($requires_ack));
        };
        ($test_name:ident, $header:expr, $ty:expr, $kind:expr, $len:expr, requires_ack: $requires_ack:expr, completed: $completed:expr) => {
            roundtrip_test!(
                $test_name,
                $header,
                $ty,
                $kind,
                $len,
                Some($completed),
                Some($requires_ack)
            );
        };
        ($test_name:ident, $header:expr, $ty:expr, $kind:expr, $len:expr, $completed:expr, $requires_ack:expr) => {
            #[test]
            fn $test_name() {
                let serialized: u64 = $header.into();
                let header: MessageHeader = serialized.try_into().unwrap();

                assert_eq!(header.message_type(), $ty);
                assert_eq!(header.message_kind(), $kind);
                assert_eq!(header.completed(), $completed);
                assert_eq!(header.requires_ack(), $requires_ack);
                assert_eq!(header.frame_length(), $len);
            }
        };
    }

    roundtrip_test!(start, MessageHeader::new(Start, 25), Start, Core, 25);

    roundtrip_test!(
        completion,
        MessageHeader::new(Completion, 22),
        Completion,
        Core,
        22
    );

    roundtrip_test!(
        completed_get_state,
        MessageHeader::new_completable_entry(GetStateEntry, true, 0),
        GetStateEntry,
        State,
        0,
        requires_ack: false,
        completed: true
    );

    roundtrip_test!(
        not_completed_get_state,
        MessageHeader::new_completable_entry(GetStateEntry, false, 0),
        GetStateEntry,
        State,
        0,
        requires_ack: false,
        completed: false
    );

    roundtrip_test!(
        completed_call_with_len,
        MessageHeader::new_completable_entry(CallEntry, true, 10341),
        CallEntry,
        Syscall,
        10341,
        requires_ack: false,
        completed: true
    );

    roundtrip_test!(
        set_state_with_requires_ack,
        MessageHeader::new_entry_header(SetStateEntry, None, true, 10341),
        SetStateEntry,
        State,
        10341,
        requires_ack: true
    );

    roundtrip_test!(
        side_effect_with_requires_ack,
        MessageHeader::new_entry_header(SideEffectEntry, None, true, 97),
        SideEffectEntry,
        Syscall,
        97,
        requires_ack: true
    );

    #[test]
    fn unknown_message_type() {
        let serialized: u64 = 0x1234_0000_0000_0000;
        assert!(MessageHeader::try_from(serialized).is_err());
    }
}
