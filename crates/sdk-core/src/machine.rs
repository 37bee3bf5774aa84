// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The per-invocation state machine.
//!
//! An invocation moves through the phases await-start, await-input, replay,
//! running and terminating. User code runs as a single cooperative task;
//! a second task (the completion router) reads completions and acks off the
//! stream, and a third owns the write half so outbound frames are serialized.

use std::sync::Arc;

use ::futures::FutureExt;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use restate_sdk_protocol::{
    pb, EntryIndex, EntryMessage, MessageType, ProtocolMessage, ProtocolReader, ProtocolWriter,
    ReadError,
};

use crate::context::{Context, Handler};
use crate::errors::{
    Error, ErrorInner, HandlerError, INTERNAL_ERROR_CODE, JOURNAL_MISMATCH_ERROR_CODE,
    PROTOCOL_VIOLATION_ERROR_CODE,
};
use crate::futures::{Completions, CompletionValue, Delivery, StreamClosed};
use crate::journal::Journal;
use crate::rand::RandomSource;
use crate::state::StateStore;

/// Failure of the start negotiation, before user code runs. Later failures
/// are reported to the runtime as protocol frames instead.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error("received unexpected message {actual:?}, expected {expected:?}")]
    UnexpectedMessage {
        expected: MessageType,
        actual: MessageType,
    },
    #[error("expected a journal entry during replay, got {actual:?}")]
    NotAnEntry { actual: MessageType },
}

#[derive(Debug)]
pub(crate) enum WriterCommand {
    Frame {
        index: Option<EntryIndex>,
        message: ProtocolMessage,
    },
    Shutdown,
}

/// Shared core of one invocation, wrapped by [`Context`].
pub(crate) struct Machine {
    pub(crate) id: Bytes,
    pub(crate) debug_id: String,
    pub(crate) key: String,
    pub(crate) journal: Mutex<Journal>,
    pub(crate) state: Mutex<StateStore>,
    pub(crate) completions: Arc<Completions>,
    pub(crate) random: Mutex<RandomSource>,
    write_tx: mpsc::UnboundedSender<WriterCommand>,
}

impl Machine {
    fn new(
        start: pb::StartMessage,
        entries: Vec<EntryMessage>,
        write_tx: mpsc::UnboundedSender<WriterCommand>,
    ) -> Self {
        let random = RandomSource::new(&start.id);
        Machine {
            id: start.id,
            debug_id: start.debug_id,
            key: start.key,
            journal: Mutex::new(Journal::new(entries)),
            state: Mutex::new(StateStore::new(start.state_map, start.partial_state)),
            completions: Arc::new(Completions::default()),
            random: Mutex::new(random),
            write_tx,
        }
    }

    fn enqueue(&self, index: Option<EntryIndex>, message: ProtocolMessage) -> Result<(), ErrorInner> {
        let ty = message.message_type();
        self.write_tx
            .send(WriterCommand::Frame { index, message })
            .map_err(|_| ErrorInner::WriteFailed {
                index: index.unwrap_or_default(),
                ty,
                message: "the writer is gone".to_owned(),
            })
    }

    /// Enqueue a new journal entry frame. The write itself happens on the
    /// writer task; a write failure surfaces through the sticky failure and
    /// the completion stream.
    pub(crate) fn write_entry(
        &self,
        index: EntryIndex,
        entry: impl Into<EntryMessage>,
    ) -> Result<(), ErrorInner> {
        let entry = entry.into();
        trace!(entry_index = index, entry_type = ?entry.message_type(), "Writing journal entry");
        self.enqueue(Some(index), entry.into())
    }

    /// Best-effort write of a control frame during termination.
    fn send_control(&self, message: impl Into<ProtocolMessage>) {
        let _ = self.enqueue(None, message.into());
    }

    #[cfg(test)]
    pub(crate) fn mock(
        entries: Vec<EntryMessage>,
    ) -> (Self, mpsc::UnboundedReceiver<WriterCommand>) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        (
            Machine::new(
                pb::StartMessage {
                    id: Bytes::from_static(b"mock-invocation"),
                    debug_id: "mock-invocation".to_owned(),
                    known_entries: entries.len() as u32 + 1,
                    state_map: vec![],
                    partial_state: false,
                    key: String::new(),
                },
                entries,
                write_tx,
            ),
            write_rx,
        )
    }
}

/// Drive one invocation over the given stream halves until it terminates.
///
/// Returns an error only when the start negotiation fails; anything that
/// happens once user code is running is reported to the runtime as the
/// appropriate protocol frame and the function returns `Ok`.
pub async fn run_invocation<R, W>(
    handler: Arc<dyn Handler>,
    read: R,
    write: W,
    cancellation: CancellationToken,
    target: &str,
) -> Result<(), InvocationError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut reader = ProtocolReader::new(read);

    // AwaitStart: the first frame must be Start.
    let start = match reader.read_message().await? {
        (_, ProtocolMessage::Start(m)) => m,
        (_, other) => {
            return Err(InvocationError::UnexpectedMessage {
                expected: MessageType::Start,
                actual: other.message_type(),
            });
        }
    };

    let span = info_span!(
        "sdk_invocation",
        restate.invocation.id = %start.debug_id,
        restate.invocation.target = %target,
    );

    process(handler, reader, write, cancellation, start)
        .instrument(span)
        .await
}

async fn process<R, W>(
    handler: Arc<dyn Handler>,
    mut reader: ProtocolReader<R>,
    write: W,
    cancellation: CancellationToken,
    start: pb::StartMessage,
) -> Result<(), InvocationError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    debug!(known_entries = start.known_entries, "Start invocation");

    // AwaitInput: the input entry follows Start.
    let input = match reader.read_message().await? {
        (_, ProtocolMessage::Entry(EntryMessage::Input(m))) => m.value,
        (_, other) => {
            return Err(InvocationError::UnexpectedMessage {
                expected: MessageType::InputEntry,
                actual: other.message_type(),
            });
        }
    };

    // Replay: the remaining known entries. The input entry is not tracked
    // in the journal array.
    let mut entries = Vec::with_capacity(start.known_entries.saturating_sub(1) as usize);
    let mut output_seen = false;
    for _ in 1..start.known_entries {
        match reader.read_message().await? {
            (_, ProtocolMessage::Entry(entry)) => {
                trace!(entry_type = ?entry.message_type(), "Replay journal entry");
                if matches!(entry, EntryMessage::Output(_)) {
                    output_seen = true;
                }
                entries.push(entry);
            }
            (_, other) => {
                return Err(InvocationError::NotAnEntry {
                    actual: other.message_type(),
                });
            }
        }
    }

    let (write_tx, write_rx) = mpsc::unbounded_channel();
    let machine = Arc::new(Machine::new(start, entries, write_tx));

    let writer_handle = tokio::spawn(writer_task(
        ProtocolWriter::new(write),
        write_rx,
        Arc::clone(&machine),
    ));
    let router_handle = tokio::spawn(completion_router(
        reader,
        Arc::clone(&machine.completions),
    ));

    // Running + Terminating.
    invoke(&machine, handler, input, output_seen, cancellation).await;
    debug!("Invocation ended");

    // Flush whatever the terminating phase produced, then stop reading.
    let _ = machine.enqueue_shutdown();
    let _ = writer_handle.await;
    router_handle.abort();

    Ok(())
}

impl Machine {
    fn enqueue_shutdown(&self) -> Result<(), ErrorInner> {
        self.write_tx
            .send(WriterCommand::Shutdown)
            .map_err(|_| ErrorInner::ReadFailed {
                message: "the writer is gone".to_owned(),
            })
    }
}

/// Run the user handler and translate its outcome into terminal frames.
async fn invoke(
    machine: &Arc<Machine>,
    handler: Arc<dyn Handler>,
    input: Bytes,
    output_seen: bool,
    cancellation: CancellationToken,
) {
    if output_seen {
        // The journal already contains the output: user code must not run
        // again, the invocation goes straight to its end.
        debug!("Output entry already in the journal, skipping the handler");
        machine.send_control(pb::EndMessage {});
        return;
    }

    let ctx = Context::new(Arc::clone(machine));
    let handler_fut = std::panic::AssertUnwindSafe(handler.call(ctx, input)).catch_unwind();

    let outcome = tokio::select! {
        _ = cancellation.cancelled() => {
            // The runtime cancelled the stream: nobody is listening for a
            // response anymore.
            debug!("Invocation stream cancelled, dropping the invocation");
            return;
        }
        result = handler_fut => match result {
            Ok(outcome) => outcome,
            Err(panic) => Err(HandlerError::Retryable(anyhow::anyhow!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        },
    };

    terminate(machine, outcome);
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}

/// Terminating: map the handler outcome onto the closing frame sequence.
fn terminate(machine: &Arc<Machine>, outcome: Result<Bytes, HandlerError>) {
    match outcome {
        Ok(value) => {
            machine.send_control(pb::OutputEntryMessage {
                result: Some(pb::output_entry_message::Result::Value(value)),
            });
            machine.send_control(pb::EndMessage {});
        }
        Err(HandlerError::Terminal(failure)) => {
            error!(code = failure.code, "Handler returned a terminal failure: {}", failure.message);
            machine.send_control(pb::OutputEntryMessage {
                result: Some(pb::output_entry_message::Result::Failure(pb::Failure {
                    code: failure.code,
                    message: failure.message,
                })),
            });
            machine.send_control(pb::EndMessage {});
        }
        Err(HandlerError::Retryable(err)) => {
            error!("Handler failed: {err:#}");
            machine.send_control(pb::ErrorMessage {
                code: INTERNAL_ERROR_CODE,
                message: format!("{err:#}"),
                ..Default::default()
            });
        }
        Err(HandlerError::Sdk(Error(inner))) => terminate_with_sdk_failure(machine, inner),
    }
}

fn terminate_with_sdk_failure(machine: &Arc<Machine>, inner: ErrorInner) {
    match inner {
        ErrorInner::Suspended { indexes } => {
            info!(entry_indexes = ?indexes, "Suspending");
            machine.send_control(pb::SuspensionMessage {
                entry_indexes: indexes,
            });
        }
        ErrorInner::JournalMismatch {
            index,
            expected,
            actual,
            description,
        } => {
            error!(
                entry_index = index,
                expected = %expected,
                actual = %actual,
                "Journal mismatch: replayed journal entries did not correspond to the user code. \
                 The user code has to be deterministic!"
            );
            machine.send_control(pb::ErrorMessage {
                code: JOURNAL_MISMATCH_ERROR_CODE,
                message: format!(
                    "Journal mismatch: replayed journal entries did not correspond to the user code. \
                     The user code has to be deterministic!\n\
                     The journal entry at position {index} was:\n\
                     - In the user code: {expected}\n\
                     - In the replayed messages: {actual}"
                ),
                description,
                related_entry_index: Some(index),
                related_entry_type: Some(u32::from(actual.ty)),
            });
        }
        ErrorInner::WriteFailed { index, ty, message } => {
            error!(entry_index = index, "Failed to write entry to the runtime, shutting down: {message}");
            // Most likely the stream is gone anyhow, but try to report it.
            machine.send_control(pb::ErrorMessage {
                code: PROTOCOL_VIOLATION_ERROR_CODE,
                message,
                related_entry_index: Some(index),
                related_entry_type: Some(u32::from(ty)),
                ..Default::default()
            });
        }
        ErrorInner::SideEffect { index, failure } => {
            error!(entry_index = index, "Side effect returned a terminal failure: {failure}");
            machine.send_control(pb::ErrorMessage {
                code: failure.code,
                message: failure.message,
                related_entry_index: Some(index),
                related_entry_type: Some(u32::from(MessageType::SideEffectEntry)),
                ..Default::default()
            });
        }
        ErrorInner::ReadFailed { message } => {
            error!("Unexpected error reading completions, shutting down: {message}");
            machine.send_control(pb::ErrorMessage {
                code: INTERNAL_ERROR_CODE,
                message: format!("problem reading completions: {message}"),
                ..Default::default()
            });
        }
        ErrorInner::UnexpectedMessage { ty } => {
            machine.send_control(pb::ErrorMessage {
                code: PROTOCOL_VIOLATION_ERROR_CODE,
                message: format!("received unexpected message {ty:?} while waiting for completions"),
                ..Default::default()
            });
        }
        ErrorInner::Terminal(failure) => {
            machine.send_control(pb::OutputEntryMessage {
                result: Some(pb::output_entry_message::Result::Failure(pb::Failure {
                    code: failure.code,
                    message: failure.message,
                })),
            });
            machine.send_control(pb::EndMessage {});
        }
        ErrorInner::Retryable { message } => {
            error!("Invocation failed: {message}");
            machine.send_control(pb::ErrorMessage {
                code: INTERNAL_ERROR_CODE,
                message,
                ..Default::default()
            });
        }
    }
}

/// Reads frames after the replay phase and routes them to waiting futures.
/// On clean end of stream all outstanding awaits turn into suspensions.
async fn completion_router<R>(mut reader: ProtocolReader<R>, completions: Arc<Completions>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match reader.read_message().await {
            Ok((_, ProtocolMessage::Completion(completion))) => {
                let value = match completion.result {
                    None | Some(pb::completion_message::Result::Empty(_)) => CompletionValue::Empty,
                    Some(pb::completion_message::Result::Value(b)) => CompletionValue::Success(b),
                    Some(pb::completion_message::Result::Failure(f)) => {
                        CompletionValue::Failure(crate::errors::TerminalError::with_code(
                            f.code, f.message,
                        ))
                    }
                };
                trace!(entry_index = completion.entry_index, "Received completion");
                completions.deliver(completion.entry_index, Delivery::Completion(value));
            }
            Ok((_, ProtocolMessage::EntryAck(ack))) => {
                trace!(entry_index = ack.entry_index, "Received entry ack");
                completions.deliver(ack.entry_index, Delivery::Ack);
            }
            Ok((_, other)) => {
                warn!(message_type = ?other.message_type(), "Received unexpected message");
                completions.close(StreamClosed::ReadFailed {
                    message: format!("unexpected message {:?}", other.message_type()),
                });
                return;
            }
            Err(err) if err.is_end_of_stream() => {
                debug!("Completion stream closed");
                completions.close(StreamClosed::EndOfStream);
                return;
            }
            Err(err) => {
                warn!("Error reading completions: {err}");
                completions.close(StreamClosed::ReadFailed {
                    message: err.to_string(),
                });
                return;
            }
        }
    }
}

/// Owns the write half: all outbound frames funnel through here, one
/// in-flight write at a time, in enqueue order.
async fn writer_task<W>(
    mut writer: ProtocolWriter<W>,
    mut write_rx: mpsc::UnboundedReceiver<WriterCommand>,
    machine: Arc<Machine>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = write_rx.recv().await {
        match command {
            WriterCommand::Frame { index, message } => {
                if let Err(err) = writer.write_message(&message).await {
                    error!(message_type = ?message.message_type(), "Failed to write message: {err}");
                    if let Some(index) = index {
                        // Latch the failure so the next journal operation
                        // re-raises it, and fail the in-flight awaits.
                        let failure = ErrorInner::WriteFailed {
                            index,
                            ty: message.message_type(),
                            message: err.to_string(),
                        };
                        let mut journal = machine.journal.lock();
                        if journal.failure.is_none() {
                            journal.failure = Some(failure);
                        }
                        drop(journal);
                        machine.completions.close(StreamClosed::WriteFailed {
                            index,
                            ty: message.message_type(),
                            message: err.to_string(),
                        });
                    }
                    break;
                }
            }
            WriterCommand::Shutdown => break,
        }
    }
    let _ = writer.shutdown().await;
}
