// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The replay journal and the replay-or-new primitive every operation goes
//! through.

use restate_sdk_protocol::{pb, EntryIndex, EntryMessage, MessageType};

use crate::errors::{EntryDescription, ErrorInner};
use crate::machine::Machine;

/// Journal of a single invocation: the fixed replay array and the cursor of
/// the last assigned entry index.
///
/// The input entry is consumed during the start negotiation and occupies
/// index 1, so the cursor starts there and `entries` holds the replayed
/// entries from index 2 onwards.
#[derive(Debug)]
pub(crate) struct Journal {
    entries: Vec<EntryMessage>,
    index: EntryIndex,
    /// Once a failure escapes an operation it is latched here, and every
    /// subsequent operation re-raises it.
    pub(crate) failure: Option<ErrorInner>,
}

impl Journal {
    pub(crate) fn new(entries: Vec<EntryMessage>) -> Self {
        Self {
            entries,
            index: 1,
            failure: None,
        }
    }

    fn current_entry(&self) -> Option<&EntryMessage> {
        debug_assert!(self.index >= 2);
        self.entries.get(self.index as usize - 2)
    }
}

/// Marker for messages that are journal entries, connecting the typed
/// protobuf payload with its position in [`EntryMessage`].
pub(crate) trait JournalEntry: Default + serde::Serialize + Sized {
    const TY: MessageType;

    fn from_entry(entry: &EntryMessage) -> Option<&Self>;
    fn into_entry(self) -> EntryMessage;
}

macro_rules! impl_journal_entry {
    ($message:ty, $variant:ident, $ty:expr) => {
        impl JournalEntry for $message {
            const TY: MessageType = $ty;

            fn from_entry(entry: &EntryMessage) -> Option<&Self> {
                match entry {
                    EntryMessage::$variant(m) => Some(m),
                    _ => None,
                }
            }

            fn into_entry(self) -> EntryMessage {
                EntryMessage::$variant(self)
            }
        }
    };
}

impl_journal_entry!(pb::InputEntryMessage, Input, MessageType::InputEntry);
impl_journal_entry!(pb::OutputEntryMessage, Output, MessageType::OutputEntry);
impl_journal_entry!(
    pb::GetStateEntryMessage,
    GetState,
    MessageType::GetStateEntry
);
impl_journal_entry!(
    pb::SetStateEntryMessage,
    SetState,
    MessageType::SetStateEntry
);
impl_journal_entry!(
    pb::ClearStateEntryMessage,
    ClearState,
    MessageType::ClearStateEntry
);
impl_journal_entry!(
    pb::ClearAllStateEntryMessage,
    ClearAllState,
    MessageType::ClearAllStateEntry
);
impl_journal_entry!(
    pb::GetStateKeysEntryMessage,
    GetStateKeys,
    MessageType::GetStateKeysEntry
);
impl_journal_entry!(pb::SleepEntryMessage, Sleep, MessageType::SleepEntry);
impl_journal_entry!(pb::CallEntryMessage, Call, MessageType::CallEntry);
impl_journal_entry!(
    pb::OneWayCallEntryMessage,
    OneWayCall,
    MessageType::OneWayCallEntry
);
impl_journal_entry!(
    pb::AwakeableEntryMessage,
    Awakeable,
    MessageType::AwakeableEntry
);
impl_journal_entry!(
    pb::CompleteAwakeableEntryMessage,
    CompleteAwakeable,
    MessageType::CompleteAwakeableEntry
);
impl_journal_entry!(
    pb::SideEffectEntryMessage,
    SideEffect,
    MessageType::SideEffectEntry
);

/// Either replay the journal entry at the next index, or create a new one.
///
/// Takes the journal lock, checks the sticky failure, assigns the next entry
/// index and dispatches: while inside the replayed prefix the entry tag must
/// match `M`, otherwise the operation fails with a journal mismatch; past
/// the replayed prefix `new` runs, which may enqueue an outbound frame and
/// register futures but never blocks. The lock is released before any await.
///
/// This is a free function so it can be generic over the entry type.
pub(crate) fn replay_or_new<M, O>(
    machine: &Machine,
    replay: impl FnOnce(EntryIndex, &M) -> Result<O, ErrorInner>,
    new: impl FnOnce(EntryIndex) -> Result<O, ErrorInner>,
) -> Result<(O, EntryIndex), ErrorInner>
where
    M: JournalEntry,
{
    let mut journal = machine.journal.lock();

    if let Some(failure) = &journal.failure {
        return Err(failure.clone());
    }

    journal.index += 1;
    let index = journal.index;

    let result = match journal.current_entry() {
        Some(entry) => match M::from_entry(entry) {
            Some(m) => replay(index, m),
            None => Err(ErrorInner::journal_mismatch(
                index,
                EntryDescription::new(M::TY, &M::default()),
                EntryDescription::of_entry(entry),
            )),
        },
        None => new(index),
    };

    match result {
        Ok(output) => Ok((output, index)),
        Err(e) => {
            if !e.is_suspension() {
                journal.failure = Some(e.clone());
            }
            Err(e)
        }
    }
}
