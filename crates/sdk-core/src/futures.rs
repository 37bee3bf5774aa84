// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Completable and ackable futures, and the registry the completion router
//! delivers into.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::OnceLock;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tokio::sync::Notify;

use restate_sdk_protocol::{EntryIndex, MessageType};

use crate::context::Codec;
use crate::errors::{Error, ErrorInner, TerminalError, PROTOCOL_VIOLATION_ERROR_CODE};

/// Result of a completable journal entry, as delivered by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CompletionValue {
    Empty,
    Success(Bytes),
    Failure(TerminalError),
}

#[derive(Debug, Clone)]
pub(crate) enum Delivery {
    Completion(CompletionValue),
    Ack,
}

/// Why the completion stream is no longer delivering.
#[derive(Debug, Clone)]
pub(crate) enum StreamClosed {
    /// The runtime closed the stream on a frame boundary: awaiting entries
    /// must suspend.
    EndOfStream,
    /// Reading completions failed.
    ReadFailed { message: String },
    /// Writing an entry failed; carries the offending entry.
    WriteFailed {
        index: EntryIndex,
        ty: MessageType,
        message: String,
    },
}

#[derive(Debug)]
enum Slot {
    Pending,
    Done(Delivery),
}

/// Registry of pending completions and acks, shared between the user task
/// and the completion router. Deliveries are buffered, so a completion
/// arriving before user code reaches the corresponding entry is not lost.
#[derive(Debug, Default)]
pub(crate) struct Completions {
    slots: RwLock<HashMap<EntryIndex, Slot>>,
    closed: OnceLock<StreamClosed>,
    notify: Notify,
}

impl Completions {
    /// Register interest in an entry index. A delivery that arrived earlier
    /// is kept.
    pub(crate) fn register(&self, index: EntryIndex) {
        self.slots.write().entry(index).or_insert(Slot::Pending);
    }

    /// First delivery wins; later ones are dropped.
    pub(crate) fn deliver(&self, index: EntryIndex, delivery: Delivery) {
        let mut slots = self.slots.write();
        match slots.get(&index) {
            Some(Slot::Done(_)) => {
                tracing::warn!(entry_index = index, "Dropping duplicate delivery");
                return;
            }
            _ => {
                slots.insert(index, Slot::Done(delivery));
            }
        }
        drop(slots);
        self.notify.notify_waiters();
    }

    /// Mark the stream closed. All outstanding awaits observe the cause.
    pub(crate) fn close(&self, cause: StreamClosed) {
        let _ = self.closed.set(cause);
        self.notify.notify_waiters();
    }

    pub(crate) fn is_resolved(&self, index: EntryIndex) -> bool {
        matches!(self.slots.read().get(&index), Some(Slot::Done(_)))
    }

    fn peek(&self, index: EntryIndex) -> Option<Delivery> {
        match self.slots.read().get(&index) {
            Some(Slot::Done(delivery)) => Some(delivery.clone()),
            _ => None,
        }
    }

    fn closed_error(&self, cause: &StreamClosed, indexes: Vec<EntryIndex>) -> ErrorInner {
        match cause {
            StreamClosed::EndOfStream => ErrorInner::Suspended { indexes },
            StreamClosed::ReadFailed { message } => ErrorInner::ReadFailed {
                message: message.clone(),
            },
            StreamClosed::WriteFailed { index, ty, message } => ErrorInner::WriteFailed {
                index: *index,
                ty: *ty,
                message: message.clone(),
            },
        }
    }

    pub(crate) async fn await_completion(
        &self,
        index: EntryIndex,
    ) -> Result<CompletionValue, ErrorInner> {
        loop {
            // The waiter must be registered before checking the slot, so a
            // delivery racing with this check still wakes us.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(Delivery::Completion(value)) = self.peek(index) {
                return Ok(value);
            }
            if let Some(cause) = self.closed.get() {
                return Err(self.closed_error(cause, vec![index]));
            }
            notified.await;
        }
    }

    pub(crate) async fn await_ack(&self, index: EntryIndex) -> Result<(), ErrorInner> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(Delivery::Ack) = self.peek(index) {
                return Ok(());
            }
            if let Some(cause) = self.closed.get() {
                return Err(self.closed_error(cause, vec![index]));
            }
            notified.await;
        }
    }
}

/// A one-shot slot for an externally delivered result.
///
/// Entries replayed with their result produce an already resolved future;
/// everything else resolves through [`Completions`].
#[derive(Debug)]
pub(crate) enum Completable {
    Ready(CompletionValue),
    Pending {
        index: EntryIndex,
        completions: std::sync::Arc<Completions>,
    },
}

impl Completable {
    pub(crate) fn ready(value: CompletionValue) -> Self {
        Completable::Ready(value)
    }

    pub(crate) fn pending(completions: &std::sync::Arc<Completions>, index: EntryIndex) -> Self {
        completions.register(index);
        Completable::Pending {
            index,
            completions: std::sync::Arc::clone(completions),
        }
    }

    pub(crate) async fn value(&self) -> Result<CompletionValue, ErrorInner> {
        match self {
            Completable::Ready(value) => Ok(value.clone()),
            Completable::Pending { index, completions } => {
                completions.await_completion(*index).await
            }
        }
    }

    pub(crate) fn is_resolved(&self) -> bool {
        match self {
            Completable::Ready(_) => true,
            Completable::Pending { index, completions } => completions.is_resolved(*index),
        }
    }

    pub(crate) fn pending_index(&self) -> Option<EntryIndex> {
        match self {
            Completable::Ready(_) => None,
            Completable::Pending { index, .. } => Some(*index),
        }
    }
}

/// Future for entries whose only delivery is a runtime acknowledgement.
#[derive(Debug)]
pub(crate) enum Ackable {
    Ready,
    Pending {
        index: EntryIndex,
        completions: std::sync::Arc<Completions>,
    },
}

impl Ackable {
    pub(crate) fn ready() -> Self {
        Ackable::Ready
    }

    pub(crate) fn pending(completions: &std::sync::Arc<Completions>, index: EntryIndex) -> Self {
        completions.register(index);
        Ackable::Pending {
            index,
            completions: std::sync::Arc::clone(completions),
        }
    }

    pub(crate) async fn acked(&self) -> Result<(), ErrorInner> {
        match self {
            Ackable::Ready => Ok(()),
            Ackable::Pending { index, completions } => completions.await_ack(*index).await,
        }
    }
}

mod private {
    /// Sealed: selectables expose their inner completable to the selector,
    /// nothing else.
    pub trait Sealed {
        fn completable(&self) -> &super::Completable;
    }
}

pub(crate) use private::Sealed;

/// A future that can be raced inside a [`Selector`].
pub trait Selectable: private::Sealed + Sync {}

/// Returns the first of the registered futures to resolve. Registration
/// order breaks ties: when several futures are already resolved, the
/// earliest registered one wins.
pub struct Selector<'a> {
    completions: std::sync::Arc<Completions>,
    futures: Vec<&'a dyn Selectable>,
}

impl<'a> Selector<'a> {
    pub(crate) fn new(
        completions: std::sync::Arc<Completions>,
        futures: Vec<&'a dyn Selectable>,
    ) -> Self {
        Self {
            completions,
            futures,
        }
    }

    /// Wait until one of the futures resolves and return its registration
    /// position.
    pub async fn select(&self) -> Result<usize, Error> {
        if self.futures.is_empty() {
            return Err(Error(ErrorInner::Terminal(TerminalError::new(
                "cannot select over an empty set of futures",
            ))));
        }
        loop {
            let notified = self.completions.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            for (position, fut) in self.futures.iter().enumerate() {
                if fut.completable().is_resolved() {
                    return Ok(position);
                }
            }
            if let Some(cause) = self.completions.closed.get() {
                let indexes = self
                    .futures
                    .iter()
                    .filter_map(|f| f.completable().pending_index())
                    .collect();
                return Err(Error(self.completions.closed_error(cause, indexes)));
            }
            notified.await;
        }
    }
}

/// Response of a call, decoded lazily with the codec `C`.
pub struct ResponseFuture<T, C = crate::context::Json> {
    inner: Completable,
    _marker: PhantomData<fn() -> (T, C)>,
}

impl<T, C> ResponseFuture<T, C> {
    pub(crate) fn new(inner: Completable) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// Wait for the raw response bytes, without decoding.
    pub async fn raw(&self) -> Result<Bytes, Error> {
        match self.inner.value().await? {
            CompletionValue::Success(bytes) => Ok(bytes),
            CompletionValue::Empty => Ok(Bytes::new()),
            CompletionValue::Failure(failure) => Err(Error(ErrorInner::Terminal(failure))),
        }
    }
}

impl<T: DeserializeOwned, C: Codec> ResponseFuture<T, C> {
    /// Wait for the response and decode it. A payload that cannot be
    /// decoded is a terminal protocol violation.
    pub async fn response(&self) -> Result<T, Error> {
        let bytes = self.raw().await?;
        C::unmarshal(&bytes).map_err(|e| {
            Error(ErrorInner::Terminal(TerminalError::with_code(
                PROTOCOL_VIOLATION_ERROR_CODE,
                format!("cannot decode the response payload: {e}"),
            )))
        })
    }
}

impl<T, C> private::Sealed for ResponseFuture<T, C> {
    fn completable(&self) -> &Completable {
        &self.inner
    }
}

impl<T, C> Selectable for ResponseFuture<T, C> {}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    fn success(b: &'static [u8]) -> Delivery {
        Delivery::Completion(CompletionValue::Success(Bytes::from_static(b)))
    }

    #[tokio::test]
    async fn completion_delivered_before_await() {
        let completions = Arc::new(Completions::default());
        let fut = Completable::pending(&completions, 2);

        completions.deliver(2, success(b"out"));

        let value = fut.value().await.unwrap();
        assert_eq!(value, CompletionValue::Success(Bytes::from_static(b"out")));
    }

    #[tokio::test]
    async fn completion_buffered_before_registration() {
        let completions = Arc::new(Completions::default());
        completions.deliver(2, success(b"out"));

        let fut = Completable::pending(&completions, 2);
        let value = fut.value().await.unwrap();
        assert_eq!(value, CompletionValue::Success(Bytes::from_static(b"out")));
    }

    #[tokio::test]
    async fn first_delivery_wins() {
        let completions = Arc::new(Completions::default());
        let fut = Completable::pending(&completions, 2);

        completions.deliver(2, success(b"first"));
        completions.deliver(2, success(b"second"));

        let value = fut.value().await.unwrap();
        assert_eq!(
            value,
            CompletionValue::Success(Bytes::from_static(b"first"))
        );
    }

    #[tokio::test]
    async fn end_of_stream_suspends_with_pending_index() {
        let completions = Arc::new(Completions::default());
        let fut = Completable::pending(&completions, 3);

        completions.close(StreamClosed::EndOfStream);

        let err = fut.value().await.unwrap_err();
        match err {
            ErrorInner::Suspended { indexes } => assert_eq!(indexes, vec![3]),
            e => panic!("unexpected error {e:?}"),
        }
    }

    #[tokio::test]
    async fn transport_error_is_not_a_suspension() {
        let completions = Arc::new(Completions::default());
        let fut = Completable::pending(&completions, 3);

        completions.close(StreamClosed::ReadFailed {
            message: "connection reset".to_owned(),
        });

        let err = fut.value().await.unwrap_err();
        assert!(matches!(err, ErrorInner::ReadFailed { .. }));
    }

    #[tokio::test]
    async fn resolved_future_wins_over_end_of_stream() {
        let completions = Arc::new(Completions::default());
        let fut = Completable::pending(&completions, 2);

        completions.deliver(2, success(b"out"));
        completions.close(StreamClosed::EndOfStream);

        // A delivered result is returned even after the stream closed.
        assert!(fut.value().await.is_ok());
    }

    #[tokio::test]
    async fn selector_tie_break_follows_registration_order() {
        let completions = Arc::new(Completions::default());
        let first: ResponseFuture<()> =
            ResponseFuture::new(Completable::pending(&completions, 2));
        let second: ResponseFuture<()> =
            ResponseFuture::new(Completable::pending(&completions, 3));

        // Both resolved before selecting, the later index first.
        completions.deliver(3, success(b"b"));
        completions.deliver(2, success(b"a"));

        let selector = Selector::new(Arc::clone(&completions), vec![&first, &second]);
        assert_eq!(selector.select().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn selector_resolves_to_the_only_ready_future() {
        let completions = Arc::new(Completions::default());
        let first: ResponseFuture<()> =
            ResponseFuture::new(Completable::pending(&completions, 2));
        let second: ResponseFuture<()> =
            ResponseFuture::new(Completable::pending(&completions, 3));

        completions.deliver(3, success(b"b"));

        let selector = Selector::new(Arc::clone(&completions), vec![&first, &second]);
        assert_eq!(selector.select().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn selector_suspends_with_the_union_of_pending_indexes() {
        let completions = Arc::new(Completions::default());
        let first: ResponseFuture<()> =
            ResponseFuture::new(Completable::pending(&completions, 2));
        let second: ResponseFuture<()> =
            ResponseFuture::new(Completable::pending(&completions, 3));

        completions.close(StreamClosed::EndOfStream);

        let selector = Selector::new(Arc::clone(&completions), vec![&first, &second]);
        let err = selector.select().await.unwrap_err();
        match err.0 {
            ErrorInner::Suspended { indexes } => assert_eq!(indexes, vec![2, 3]),
            e => panic!("unexpected error {e:?}"),
        }
    }

    #[tokio::test]
    async fn empty_selector_is_refused() {
        let completions = Arc::new(Completions::default());
        let selector = Selector::new(completions, vec![]);
        assert!(selector.select().await.is_err());
    }

    #[tokio::test]
    async fn ack_release() {
        let completions = Arc::new(Completions::default());
        let fut = Ackable::pending(&completions, 4);

        completions.deliver(4, Delivery::Ack);
        fut.acked().await.unwrap();
    }
}
