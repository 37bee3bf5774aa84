// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Durable timers: sleep and its selectable handle.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use restate_sdk_protocol::{pb, EntryIndex};

use crate::errors::{Error, ErrorInner, TerminalError};
use crate::futures::{Completable, CompletionValue, Sealed, Selectable};
use crate::journal::replay_or_new;
use crate::machine::Machine;

/// Handle of a durable timer, obtained with `after`. The timer keeps
/// running whether the handle is awaited or not, so it can be set early and
/// awaited later, or raced inside a selector.
pub struct AfterFuture {
    inner: Completable,
    entry_index: EntryIndex,
}

impl AfterFuture {
    /// Wait for the timer to fire.
    pub async fn done(&self) -> Result<(), Error> {
        match self.inner.value().await.map_err(Error)? {
            CompletionValue::Empty | CompletionValue::Success(_) => Ok(()),
            CompletionValue::Failure(failure) => Err(Error(ErrorInner::Terminal(failure))),
        }
    }

    pub fn entry_index(&self) -> EntryIndex {
        self.entry_index
    }
}

impl Sealed for AfterFuture {
    fn completable(&self) -> &Completable {
        &self.inner
    }
}

impl Selectable for AfterFuture {}

enum SleepStep {
    Fired,
    Failed(TerminalError),
    Pending,
}

impl Machine {
    pub(crate) fn after(&self, duration: Duration) -> Result<AfterFuture, ErrorInner> {
        let (step, index) = replay_or_new::<pb::SleepEntryMessage, _>(
            self,
            |_, entry| {
                Ok(match &entry.result {
                    Some(pb::sleep_entry_message::Result::Empty(_)) => SleepStep::Fired,
                    Some(pb::sleep_entry_message::Result::Failure(f)) => SleepStep::Failed(
                        TerminalError::with_code(f.code, f.message.clone()),
                    ),
                    None => SleepStep::Pending,
                })
            },
            |index| {
                let wake_up_time = SystemTime::now() + duration;
                let wake_up_time = wake_up_time
                    .duration_since(UNIX_EPOCH)
                    .expect("the wake up time is after the epoch")
                    .as_millis() as u64;
                self.write_entry(
                    index,
                    pb::SleepEntryMessage {
                        wake_up_time,
                        result: None,
                    },
                )?;
                Ok(SleepStep::Pending)
            },
        )?;

        let inner = match step {
            SleepStep::Fired => Completable::ready(CompletionValue::Empty),
            SleepStep::Failed(failure) => Completable::ready(CompletionValue::Failure(failure)),
            SleepStep::Pending => Completable::pending(&self.completions, index),
        };
        Ok(AfterFuture {
            inner,
            entry_index: index,
        })
    }

    pub(crate) async fn sleep(&self, duration: Duration) -> Result<(), ErrorInner> {
        let timer = self.after(duration)?;
        timer.done().await.map_err(|e| e.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use restate_sdk_protocol::{EntryMessage, ProtocolMessage};

    use crate::futures::Delivery;
    use crate::machine::{Machine, WriterCommand};

    fn fired_sleep_entry() -> EntryMessage {
        EntryMessage::Sleep(pb::SleepEntryMessage {
            wake_up_time: 1234,
            result: Some(pb::sleep_entry_message::Result::Empty(pb::Empty {})),
        })
    }

    #[tokio::test]
    async fn new_sleep_writes_an_entry_and_waits() {
        let (machine, mut outbox) = Machine::mock(vec![]);

        machine.completions.deliver(
            2,
            Delivery::Completion(CompletionValue::Empty),
        );
        machine.sleep(Duration::from_secs(1)).await.unwrap();

        match outbox.try_recv().unwrap() {
            WriterCommand::Frame {
                message: ProtocolMessage::Entry(EntryMessage::Sleep(m)),
                ..
            } => {
                assert!(m.wake_up_time > 0);
                assert_eq!(m.result, None);
            }
            other => panic!("expected a sleep entry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn replayed_fired_sleep_returns_immediately() {
        let (machine, mut outbox) = Machine::mock(vec![fired_sleep_entry()]);

        machine.sleep(Duration::from_secs(3600)).await.unwrap();
        assert!(outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn after_can_be_awaited_later() {
        let (machine, _outbox) = Machine::mock(vec![]);

        let timer = machine.after(Duration::from_secs(1)).unwrap();
        assert_eq!(timer.entry_index(), 2);

        machine
            .completions
            .deliver(2, Delivery::Completion(CompletionValue::Empty));
        timer.done().await.unwrap();
    }
}
