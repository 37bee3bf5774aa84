// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Awakeables: named completable futures, resolvable by a peer through a
//! stable identifier.

use std::mem::size_of;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::{BufMut, Bytes, BytesMut};

use restate_sdk_protocol::{pb, EntryIndex};

use crate::errors::{EntryDescription, Error, ErrorInner, TerminalError};
use crate::futures::{Completable, CompletionValue, Sealed, Selectable};
use crate::journal::{replay_or_new, JournalEntry};
use crate::machine::Machine;

/// Prefix marking awakeable identifiers.
const AWAKEABLE_ID_PREFIX: &str = "prom_1";

/// An awakeable: hand out [`AwakeableFuture::id`] to a peer, await the
/// result here. The identifier stays stable across retries because it is
/// derived from the invocation id and the entry index.
pub struct AwakeableFuture {
    id: String,
    inner: Completable,
    entry_index: EntryIndex,
}

impl AwakeableFuture {
    /// The stable identifier a peer uses to complete this awakeable.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn entry_index(&self) -> EntryIndex {
        self.entry_index
    }

    /// Wait for the peer to resolve or reject the awakeable.
    pub async fn result(&self) -> Result<Bytes, Error> {
        match self.inner.value().await.map_err(Error)? {
            CompletionValue::Success(value) => Ok(value),
            CompletionValue::Empty => Ok(Bytes::new()),
            CompletionValue::Failure(failure) => Err(Error(ErrorInner::Terminal(failure))),
        }
    }
}

impl Sealed for AwakeableFuture {
    fn completable(&self) -> &Completable {
        &self.inner
    }
}

impl Selectable for AwakeableFuture {}

/// Encode the identifier of the awakeable journaled at `entry_index`.
pub(crate) fn awakeable_identifier(invocation_id: &[u8], entry_index: EntryIndex) -> String {
    let mut input_buf = BytesMut::with_capacity(invocation_id.len() + size_of::<EntryIndex>());
    input_buf.put_slice(invocation_id);
    input_buf.put_u32(entry_index);
    format!("{AWAKEABLE_ID_PREFIX}{}", URL_SAFE_NO_PAD.encode(input_buf))
}

impl Machine {
    pub(crate) fn awakeable(&self) -> Result<AwakeableFuture, ErrorInner> {
        enum AwakeableStep {
            Done(CompletionValue),
            Pending,
        }

        let (step, index) = replay_or_new::<pb::AwakeableEntryMessage, _>(
            self,
            |_, entry| {
                Ok(match &entry.result {
                    Some(pb::awakeable_entry_message::Result::Value(value)) => {
                        AwakeableStep::Done(CompletionValue::Success(value.clone()))
                    }
                    Some(pb::awakeable_entry_message::Result::Failure(f)) => AwakeableStep::Done(
                        CompletionValue::Failure(TerminalError::with_code(
                            f.code,
                            f.message.clone(),
                        )),
                    ),
                    None => AwakeableStep::Pending,
                })
            },
            |index| {
                self.write_entry(index, pb::AwakeableEntryMessage { result: None })?;
                Ok(AwakeableStep::Pending)
            },
        )?;

        let inner = match step {
            AwakeableStep::Done(value) => Completable::ready(value),
            AwakeableStep::Pending => Completable::pending(&self.completions, index),
        };
        Ok(AwakeableFuture {
            id: awakeable_identifier(&self.id, index),
            inner,
            entry_index: index,
        })
    }

    pub(crate) fn resolve_awakeable(&self, id: &str, value: Bytes) -> Result<(), ErrorInner> {
        self.complete_awakeable(
            id,
            pb::complete_awakeable_entry_message::Result::Value(value),
        )
    }

    pub(crate) fn reject_awakeable(&self, id: &str, reason: TerminalError) -> Result<(), ErrorInner> {
        self.complete_awakeable(
            id,
            pb::complete_awakeable_entry_message::Result::Failure(pb::Failure {
                code: reason.code,
                message: reason.message,
            }),
        )
    }

    fn complete_awakeable(
        &self,
        id: &str,
        result: pb::complete_awakeable_entry_message::Result,
    ) -> Result<(), ErrorInner> {
        let expected = pb::CompleteAwakeableEntryMessage {
            id: id.to_owned(),
            result: Some(result),
        };
        replay_or_new::<pb::CompleteAwakeableEntryMessage, _>(
            self,
            |index, entry| {
                if *entry != expected {
                    return Err(ErrorInner::journal_mismatch(
                        index,
                        EntryDescription::new(pb::CompleteAwakeableEntryMessage::TY, &expected),
                        EntryDescription::new(pb::CompleteAwakeableEntryMessage::TY, entry),
                    ));
                }
                Ok(())
            },
            |index| self.write_entry(index, expected.clone()),
        )?;
        Ok(())
    }
}
