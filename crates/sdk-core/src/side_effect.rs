// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Durable side effects: run-once computations whose result is journaled.

use std::future::Future;

use bytes::Bytes;

use restate_sdk_protocol::pb;

use crate::errors::{ErrorInner, HandlerError, TerminalError};
use crate::futures::Ackable;
use crate::journal::replay_or_new;
use crate::machine::Machine;

enum SideEffectStep {
    Replayed(Result<Bytes, TerminalError>),
    New,
}

impl Machine {
    /// Run `f` at most once across all attempts of this invocation.
    ///
    /// On the first execution the outcome, success or terminal failure, is
    /// written to the journal and acknowledged by the runtime; replays
    /// return the journaled outcome without running `f` again. A transient
    /// failure of `f` aborts the attempt without journaling anything, so
    /// the runtime retries the whole invocation.
    pub(crate) async fn side_effect<F, Fut>(&self, f: F) -> Result<Bytes, ErrorInner>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, HandlerError>>,
    {
        let (step, index) = replay_or_new::<pb::SideEffectEntryMessage, _>(
            self,
            |_, entry| {
                Ok(SideEffectStep::Replayed(match &entry.result {
                    Some(pb::side_effect_entry_message::Result::Value(value)) => {
                        Ok(value.clone())
                    }
                    Some(pb::side_effect_entry_message::Result::Failure(f)) => Err(
                        TerminalError::with_code(f.code, f.message.clone()),
                    ),
                    None => Ok(Bytes::new()),
                }))
            },
            |_| Ok(SideEffectStep::New),
        )?;

        let outcome = match step {
            SideEffectStep::Replayed(outcome) => outcome,
            SideEffectStep::New => {
                // The entry index is assigned, nothing else can interleave:
                // run the closure exactly once, outside the journal lock.
                match f().await {
                    Ok(value) => {
                        self.write_entry(
                            index,
                            pb::SideEffectEntryMessage {
                                result: Some(pb::side_effect_entry_message::Result::Value(
                                    value.clone(),
                                )),
                            },
                        )?;
                        let ack = Ackable::pending(&self.completions, index);
                        ack.acked().await?;
                        Ok(value)
                    }
                    Err(HandlerError::Terminal(failure)) => {
                        // Terminal outcomes are durable too: journal the
                        // failure before raising it.
                        self.write_entry(
                            index,
                            pb::SideEffectEntryMessage {
                                result: Some(pb::side_effect_entry_message::Result::Failure(
                                    pb::Failure {
                                        code: failure.code,
                                        message: failure.message.clone(),
                                    },
                                )),
                            },
                        )?;
                        let ack = Ackable::pending(&self.completions, index);
                        ack.acked().await?;
                        Err(failure)
                    }
                    Err(HandlerError::Sdk(err)) => return Err(self.latch_failure(err.0)),
                    Err(HandlerError::Retryable(err)) => {
                        return Err(self.latch_failure(ErrorInner::Retryable {
                            message: format!("side effect failed: {err:#}"),
                        }))
                    }
                }
            }
        };

        outcome.map_err(|failure| {
            self.latch_failure(ErrorInner::SideEffect { index, failure })
        })
    }

    /// Store a failure raised outside replay-or-new so subsequent
    /// operations re-raise it.
    pub(crate) fn latch_failure(&self, failure: ErrorInner) -> ErrorInner {
        let mut journal = self.journal.lock();
        if journal.failure.is_none() && !failure.is_suspension() {
            journal.failure = Some(failure.clone());
        }
        failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use restate_sdk_protocol::{EntryMessage, ProtocolMessage};

    use crate::futures::Delivery;
    use crate::machine::{Machine, WriterCommand};

    #[tokio::test]
    async fn runs_once_and_journals_the_result() {
        let (machine, mut outbox) = Machine::mock(vec![]);
        let runs = AtomicUsize::new(0);

        machine.completions.deliver(2, Delivery::Ack);
        let value = machine
            .side_effect(|| async {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(Bytes::from_static(b"result"))
            })
            .await
            .unwrap();

        assert_eq!(value, Bytes::from_static(b"result"));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        match outbox.try_recv().unwrap() {
            WriterCommand::Frame {
                message: ProtocolMessage::Entry(EntryMessage::SideEffect(m)),
                ..
            } => assert_eq!(
                m.result,
                Some(pb::side_effect_entry_message::Result::Value(
                    Bytes::from_static(b"result")
                ))
            ),
            other => panic!("expected a side effect entry, got {other:?}"),
        }
    }

    async fn must_not_run() -> Result<Bytes, HandlerError> {
        panic!("the side effect closure must not run on replay")
    }

    #[tokio::test]
    async fn replay_does_not_run_the_closure() {
        let replayed = EntryMessage::SideEffect(pb::SideEffectEntryMessage {
            result: Some(pb::side_effect_entry_message::Result::Value(
                Bytes::from_static(b"journaled"),
            )),
        });
        let (machine, mut outbox) = Machine::mock(vec![replayed]);

        let value = machine.side_effect(must_not_run).await.unwrap();

        assert_eq!(value, Bytes::from_static(b"journaled"));
        assert!(outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn terminal_failure_is_journaled_and_raised() {
        let (machine, mut outbox) = Machine::mock(vec![]);

        machine.completions.deliver(2, Delivery::Ack);
        let err = machine
            .side_effect(|| async {
                Err(HandlerError::Terminal(TerminalError::with_code(
                    409, "conflict",
                )))
            })
            .await
            .unwrap_err();

        match err {
            ErrorInner::SideEffect { index, failure } => {
                assert_eq!(index, 2);
                assert_eq!(failure.code, 409);
            }
            e => panic!("unexpected error {e:?}"),
        }

        match outbox.try_recv().unwrap() {
            WriterCommand::Frame {
                message: ProtocolMessage::Entry(EntryMessage::SideEffect(m)),
                ..
            } => assert!(matches!(
                m.result,
                Some(pb::side_effect_entry_message::Result::Failure(_))
            )),
            other => panic!("expected a side effect entry, got {other:?}"),
        }

        // The failure is sticky: the next operation re-raises it.
        let err = machine.set("x", Bytes::from_static(b"1")).unwrap_err();
        assert!(matches!(err, ErrorInner::SideEffect { .. }));
    }

    #[tokio::test]
    async fn transient_failure_journals_nothing() {
        let (machine, mut outbox) = Machine::mock(vec![]);

        let err = machine
            .side_effect(|| async {
                Err(HandlerError::Retryable(anyhow::anyhow!("flaky downstream")))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ErrorInner::Retryable { .. }));
        assert!(outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn replayed_terminal_failure_is_raised_again() {
        let replayed = EntryMessage::SideEffect(pb::SideEffectEntryMessage {
            result: Some(pb::side_effect_entry_message::Result::Failure(pb::Failure {
                code: 409,
                message: "conflict".to_owned(),
            })),
        });
        let (machine, _outbox) = Machine::mock(vec![replayed]);

        let err = machine.side_effect(must_not_run).await.unwrap_err();
        assert!(matches!(err, ErrorInner::SideEffect { .. }));
    }
}
