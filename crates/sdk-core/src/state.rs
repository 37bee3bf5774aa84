// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The eagerly populated state view and the state operations.

use std::collections::HashMap;

use bytes::Bytes;
use prost::Message;

use restate_sdk_protocol::pb;

use crate::errors::{
    EntryDescription, ErrorInner, TerminalError, PROTOCOL_VIOLATION_ERROR_CODE,
};
use crate::futures::{Completable, CompletionValue};
use crate::journal::{replay_or_new, JournalEntry};
use crate::machine::Machine;

/// State of the keyed object this invocation runs against, as delivered in
/// the start message.
///
/// With `partial` set, a key missing from the map may still exist on the
/// runtime; without it, absence is authoritative.
#[derive(Debug)]
pub(crate) struct StateStore {
    current: HashMap<String, Bytes>,
    partial: bool,
}

impl StateStore {
    pub(crate) fn new(state_map: Vec<pb::StateEntry>, partial: bool) -> Self {
        let current = state_map
            .into_iter()
            .map(|entry| {
                (
                    String::from_utf8_lossy(&entry.key).into_owned(),
                    entry.value,
                )
            })
            .collect();
        Self { current, partial }
    }
}

enum GetStep {
    /// The value (or its absence) is known without asking the runtime.
    Known(Option<Bytes>),
    /// The runtime has to answer.
    Pending,
}

impl Machine {
    pub(crate) async fn get(&self, key: &str) -> Result<Option<Bytes>, ErrorInner> {
        let (step, index) = replay_or_new::<pb::GetStateEntryMessage, _>(
            self,
            |index, entry| {
                if entry.key != key.as_bytes() {
                    return Err(ErrorInner::journal_mismatch(
                        index,
                        EntryDescription::new(
                            pb::GetStateEntryMessage::TY,
                            &pb::GetStateEntryMessage {
                                key: Bytes::copy_from_slice(key.as_bytes()),
                                result: None,
                            },
                        ),
                        EntryDescription::new(pb::GetStateEntryMessage::TY, entry),
                    ));
                }
                Ok(match &entry.result {
                    Some(pb::get_state_entry_message::Result::Value(value)) => {
                        GetStep::Known(Some(value.clone()))
                    }
                    Some(pb::get_state_entry_message::Result::Empty(_)) => GetStep::Known(None),
                    None => GetStep::Pending,
                })
            },
            |index| {
                let store = self.state.lock();
                if let Some(value) = store.current.get(key) {
                    let value = value.clone();
                    self.write_entry(
                        index,
                        pb::GetStateEntryMessage {
                            key: Bytes::copy_from_slice(key.as_bytes()),
                            result: Some(pb::get_state_entry_message::Result::Value(value.clone())),
                        },
                    )?;
                    Ok(GetStep::Known(Some(value)))
                } else if !store.partial {
                    // The state view is complete: absence is authoritative.
                    self.write_entry(
                        index,
                        pb::GetStateEntryMessage {
                            key: Bytes::copy_from_slice(key.as_bytes()),
                            result: Some(pb::get_state_entry_message::Result::Empty(pb::Empty {})),
                        },
                    )?;
                    Ok(GetStep::Known(None))
                } else {
                    self.write_entry(
                        index,
                        pb::GetStateEntryMessage {
                            key: Bytes::copy_from_slice(key.as_bytes()),
                            result: None,
                        },
                    )?;
                    Ok(GetStep::Pending)
                }
            },
        )?;

        match step {
            GetStep::Known(value) => Ok(value),
            GetStep::Pending => {
                let fut = Completable::pending(&self.completions, index);
                match fut.value().await? {
                    CompletionValue::Success(value) => {
                        self.state
                            .lock()
                            .current
                            .insert(key.to_owned(), value.clone());
                        Ok(Some(value))
                    }
                    CompletionValue::Empty => Ok(None),
                    CompletionValue::Failure(failure) => Err(ErrorInner::Terminal(failure)),
                }
            }
        }
    }

    pub(crate) fn set(&self, key: &str, value: Bytes) -> Result<(), ErrorInner> {
        replay_or_new::<pb::SetStateEntryMessage, _>(
            self,
            |index, entry| {
                if entry.key != key.as_bytes() || entry.value != value {
                    return Err(ErrorInner::journal_mismatch(
                        index,
                        EntryDescription::new(
                            pb::SetStateEntryMessage::TY,
                            &pb::SetStateEntryMessage {
                                key: Bytes::copy_from_slice(key.as_bytes()),
                                value: value.clone(),
                            },
                        ),
                        EntryDescription::new(pb::SetStateEntryMessage::TY, entry),
                    ));
                }
                Ok(())
            },
            |index| {
                self.write_entry(
                    index,
                    pb::SetStateEntryMessage {
                        key: Bytes::copy_from_slice(key.as_bytes()),
                        value: value.clone(),
                    },
                )
            },
        )?;

        // The local view changes only once the journal mutation went through.
        self.state.lock().current.insert(key.to_owned(), value);
        Ok(())
    }

    pub(crate) fn clear(&self, key: &str) -> Result<(), ErrorInner> {
        replay_or_new::<pb::ClearStateEntryMessage, _>(
            self,
            |index, entry| {
                if entry.key != key.as_bytes() {
                    return Err(ErrorInner::journal_mismatch(
                        index,
                        EntryDescription::new(
                            pb::ClearStateEntryMessage::TY,
                            &pb::ClearStateEntryMessage {
                                key: Bytes::copy_from_slice(key.as_bytes()),
                            },
                        ),
                        EntryDescription::new(pb::ClearStateEntryMessage::TY, entry),
                    ));
                }
                Ok(())
            },
            |index| {
                self.write_entry(
                    index,
                    pb::ClearStateEntryMessage {
                        key: Bytes::copy_from_slice(key.as_bytes()),
                    },
                )
            },
        )?;

        self.state.lock().current.remove(key);
        Ok(())
    }

    pub(crate) fn clear_all(&self) -> Result<(), ErrorInner> {
        replay_or_new::<pb::ClearAllStateEntryMessage, _>(
            self,
            |_, _| Ok(()),
            |index| self.write_entry(index, pb::ClearAllStateEntryMessage {}),
        )?;

        let mut store = self.state.lock();
        store.current.clear();
        // From here on the local view is complete: gets never consult the
        // runtime again.
        store.partial = false;
        Ok(())
    }

    pub(crate) async fn keys(&self) -> Result<Vec<String>, ErrorInner> {
        enum KeysStep {
            Known(Vec<String>),
            Pending,
        }

        let (step, index) = replay_or_new::<pb::GetStateKeysEntryMessage, _>(
            self,
            |_, entry| {
                Ok(match &entry.result {
                    Some(pb::get_state_keys_entry_message::Result::Value(state_keys)) => {
                        KeysStep::Known(decode_keys(state_keys))
                    }
                    Some(pb::get_state_keys_entry_message::Result::Failure(f)) => {
                        return Err(ErrorInner::Terminal(TerminalError::with_code(
                            f.code,
                            f.message.clone(),
                        )))
                    }
                    None => KeysStep::Pending,
                })
            },
            |index| {
                // The local map may hide keys when the state is partial, so
                // the runtime always answers this one.
                self.write_entry(index, pb::GetStateKeysEntryMessage { result: None })?;
                Ok(KeysStep::Pending)
            },
        )?;

        match step {
            KeysStep::Known(keys) => Ok(keys),
            KeysStep::Pending => {
                let fut = Completable::pending(&self.completions, index);
                match fut.value().await? {
                    CompletionValue::Success(buf) => {
                        let state_keys =
                            pb::get_state_keys_entry_message::StateKeys::decode(buf).map_err(
                                |e| {
                                    ErrorInner::Terminal(TerminalError::with_code(
                                        PROTOCOL_VIOLATION_ERROR_CODE,
                                        format!("cannot decode the state keys: {e}"),
                                    ))
                                },
                            )?;
                        Ok(decode_keys(&state_keys))
                    }
                    CompletionValue::Empty => Ok(vec![]),
                    CompletionValue::Failure(failure) => Err(ErrorInner::Terminal(failure)),
                }
            }
        }
    }
}

fn decode_keys(state_keys: &pb::get_state_keys_entry_message::StateKeys) -> Vec<String> {
    state_keys
        .keys
        .iter()
        .map(|key| String::from_utf8_lossy(key).into_owned())
        .collect()
}
