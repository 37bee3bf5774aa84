// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::mem;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytes_utils::SegmentedBuf;
use tracing::warn;

use crate::header::{MessageHeader, MessageType, UnknownMessageType};
use crate::message::ProtocolMessage;

#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("cannot decode message type {0:?}: {1}")]
    DecodeMessage(MessageType, #[source] prost::DecodeError),
    #[error(transparent)]
    UnknownMessageType(#[from] UnknownMessageType),
    #[error("hit message size limit: {0} >= {1}")]
    MessageSizeLimit(usize, usize),
}

// --- Message encoder

#[derive(Debug, Default, Clone, Copy)]
pub struct Encoder {}

impl Encoder {
    pub fn new() -> Self {
        Self {}
    }

    /// Encodes a message to bytes, header included.
    pub fn encode(&self, msg: &ProtocolMessage) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len(msg));
        self.encode_to_buf_mut(&mut buf, msg)
            .expect("encoding into a pre-sized buffer cannot fail");
        buf.freeze()
    }

    /// Includes the header length.
    pub fn encoded_len(&self, msg: &ProtocolMessage) -> usize {
        8 + msg.encoded_len()
    }

    pub fn encode_to_buf_mut(
        &self,
        buf: &mut impl BufMut,
        msg: &ProtocolMessage,
    ) -> Result<(), prost::EncodeError> {
        let header = generate_header(msg);
        buf.put_u64(header.into());
        msg.encode_to_buf(buf)
    }
}

fn generate_header(msg: &ProtocolMessage) -> MessageHeader {
    let len: u32 = msg
        .encoded_len()
        .try_into()
        .expect("protocol messages can't be larger than u32");
    let ty = msg.message_type();
    if ty.is_entry() {
        MessageHeader::new_entry_header(ty, msg.completed(), msg.requires_ack(), len)
    } else {
        MessageHeader::new(ty, len)
    }
}

// --- Message decoder

/// Stateful decoder to decode [`ProtocolMessage`]s out of a chunked byte stream.
pub struct Decoder {
    buf: SegmentedBuf<Bytes>,
    state: DecoderState,
    message_size_warning: usize,
    message_size_limit: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Decoder::new(usize::MAX, None)
    }
}

impl Decoder {
    pub fn new(message_size_warning: usize, message_size_limit: Option<usize>) -> Self {
        Self {
            buf: SegmentedBuf::new(),
            state: DecoderState::WaitingHeader,
            message_size_warning,
            message_size_limit: message_size_limit.unwrap_or(usize::MAX),
        }
    }

    pub fn has_remaining(&self) -> bool {
        self.buf.has_remaining()
    }

    /// Concatenate a new chunk in the internal buffer.
    pub fn push(&mut self, buf: Bytes) {
        self.buf.push(buf)
    }

    /// Try to consume the next message in the internal buffer.
    pub fn consume_next(
        &mut self,
    ) -> Result<Option<(MessageHeader, ProtocolMessage)>, EncodingError> {
        loop {
            let remaining = self.buf.remaining();

            if remaining >= self.message_size_warning {
                warn!(
                    "Message size warning: {} >= {}",
                    remaining, self.message_size_warning
                );
            }
            if remaining >= self.message_size_limit {
                return Err(EncodingError::MessageSizeLimit(
                    remaining,
                    self.message_size_limit,
                ));
            }

            if remaining < self.state.needs_bytes() {
                return Ok(None);
            }

            if let Some(res) = self.state.decode(&mut self.buf)? {
                return Ok(Some(res));
            }
        }
    }
}

#[derive(Default)]
enum DecoderState {
    #[default]
    WaitingHeader,
    WaitingPayload(MessageHeader),
}

impl DecoderState {
    fn needs_bytes(&self) -> usize {
        match self {
            DecoderState::WaitingHeader => 8,
            DecoderState::WaitingPayload(h) => h.frame_length() as usize,
        }
    }

    fn decode(
        &mut self,
        mut buf: impl Buf,
    ) -> Result<Option<(MessageHeader, ProtocolMessage)>, EncodingError> {
        let mut res = None;

        *self = match mem::take(self) {
            DecoderState::WaitingHeader => DecoderState::WaitingPayload(buf.get_u64().try_into()?),
            DecoderState::WaitingPayload(h) => {
                let msg = ProtocolMessage::decode(
                    h.message_type(),
                    buf.take(h.frame_length() as usize),
                )
                .map_err(|e| EncodingError::DecodeMessage(h.message_type(), e))?;
                res = Some((h, msg));
                DecoderState::WaitingHeader
            }
        };

        Ok(res)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::pb;
    use bytes::Bytes;

    fn input_entry() -> ProtocolMessage {
        pb::InputEntryMessage {
            value: Bytes::from_static(b"input"),
        }
        .into()
    }

    #[test]
    fn fill_decoder_with_several_messages() {
        let encoder = Encoder::new();
        let mut decoder = Decoder::default();

        let expected_msg_0: ProtocolMessage = pb::StartMessage {
            id: Bytes::from_static(b"abc"),
            debug_id: "abc".to_owned(),
            known_entries: 1,
            state_map: vec![],
            partial_state: true,
            key: "key".to_owned(),
        }
        .into();
        let expected_msg_1 = input_entry();
        let expected_msg_2: ProtocolMessage = pb::CompletionMessage {
            entry_index: 2,
            result: Some(pb::completion_message::Result::Empty(pb::Empty {})),
        }
        .into();

        decoder.push(encoder.encode(&expected_msg_0));
        decoder.push(encoder.encode(&expected_msg_1));
        decoder.push(encoder.encode(&expected_msg_2));

        let (actual_msg_header_0, actual_msg_0) = decoder.consume_next().unwrap().unwrap();
        assert_eq!(actual_msg_header_0.message_type(), MessageType::Start);
        assert_eq!(actual_msg_0, expected_msg_0);

        let (actual_msg_header_1, actual_msg_1) = decoder.consume_next().unwrap().unwrap();
        assert_eq!(actual_msg_header_1.message_type(), MessageType::InputEntry);
        assert_eq!(actual_msg_1, expected_msg_1);

        let (actual_msg_header_2, actual_msg_2) = decoder.consume_next().unwrap().unwrap();
        assert_eq!(actual_msg_header_2.message_type(), MessageType::Completion);
        assert_eq!(actual_msg_2, expected_msg_2);

        assert!(decoder.consume_next().unwrap().is_none());
    }

    #[test]
    fn fill_decoder_with_partial_header() {
        partial_decoding_test(4)
    }

    #[test]
    fn fill_decoder_with_partial_body() {
        partial_decoding_test(10)
    }

    fn partial_decoding_test(split_index: usize) {
        let encoder = Encoder::new();
        let mut decoder = Decoder::default();

        let expected_msg = input_entry();
        let expected_msg_encoded = encoder.encode(&expected_msg);

        decoder.push(expected_msg_encoded.slice(0..split_index));
        assert!(decoder.consume_next().unwrap().is_none());

        decoder.push(expected_msg_encoded.slice(split_index..));

        let (actual_msg_header, actual_msg) = decoder.consume_next().unwrap().unwrap();
        assert_eq!(actual_msg_header.message_type(), MessageType::InputEntry);
        assert_eq!(actual_msg, expected_msg);

        assert!(decoder.consume_next().unwrap().is_none());
    }

    #[test]
    fn completed_flag_on_completable_entries() {
        let encoder = Encoder::new();
        let mut decoder = Decoder::default();

        let completed: ProtocolMessage = pb::GetStateEntryMessage {
            key: Bytes::from_static(b"k"),
            result: Some(pb::get_state_entry_message::Result::Value(
                Bytes::from_static(b"v"),
            )),
        }
        .into();
        let uncompleted: ProtocolMessage = pb::GetStateEntryMessage {
            key: Bytes::from_static(b"k"),
            result: None,
        }
        .into();

        decoder.push(encoder.encode(&completed));
        decoder.push(encoder.encode(&uncompleted));

        let (header, _) = decoder.consume_next().unwrap().unwrap();
        assert_eq!(header.completed(), Some(true));
        let (header, _) = decoder.consume_next().unwrap().unwrap();
        assert_eq!(header.completed(), Some(false));
    }

    #[test]
    fn requires_ack_flag_on_side_effects() {
        let encoder = Encoder::new();
        let mut decoder = Decoder::default();

        decoder.push(
            encoder.encode(
                &pb::SideEffectEntryMessage {
                    result: Some(pb::side_effect_entry_message::Result::Value(
                        Bytes::from_static(b"res"),
                    )),
                }
                .into(),
            ),
        );

        let (header, _) = decoder.consume_next().unwrap().unwrap();
        assert_eq!(header.requires_ack(), Some(true));
    }

    #[test]
    fn hit_message_size_limit() {
        let mut decoder = Decoder::new((u8::MAX / 2) as usize, Some(u8::MAX as usize));

        let encoder = Encoder::new();
        let msg = encoder.encode(
            &pb::InputEntryMessage {
                value: (0..=u8::MAX).collect::<Vec<_>>().into(),
            }
            .into(),
        );

        decoder.push(msg.clone());
        let err = decoder.consume_next().unwrap_err();
        match err {
            EncodingError::MessageSizeLimit(msg_size, limit) => {
                assert_eq!(msg_size, msg.len());
                assert_eq!(limit, u8::MAX as usize)
            }
            e => panic!("unexpected error {e:?}"),
        }
    }
}
