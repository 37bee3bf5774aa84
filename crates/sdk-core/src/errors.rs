// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::backtrace::Backtrace;
use std::fmt;

use restate_sdk_protocol::{EntryIndex, EntryMessage, MessageType};

/// Error code used for retryable failures and for terminal failures
/// carrying no explicit code.
pub const INTERNAL_ERROR_CODE: u32 = 500;
/// Error code signalling that replayed journal entries did not correspond
/// to the user code.
pub const JOURNAL_MISMATCH_ERROR_CODE: u32 = 570;
/// Error code signalling a violation of the service protocol.
pub const PROTOCOL_VIOLATION_ERROR_CODE: u32 = 571;

/// A failure that must not be retried by the runtime. Returning it from a
/// handler produces a failed output entry rather than a retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct TerminalError {
    pub code: u32,
    pub message: String,
}

impl TerminalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_code(INTERNAL_ERROR_CODE, message)
    }

    pub fn with_code(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error returned by user handlers and side effect closures.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// A terminal failure: the runtime will record it as the invocation
    /// output and will not retry.
    #[error(transparent)]
    Terminal(#[from] TerminalError),
    /// A transient failure: the runtime will retry the invocation.
    #[error(transparent)]
    Retryable(#[from] anyhow::Error),
    /// A failure raised by one of the context operations, to be decoded at
    /// the invocation boundary.
    #[error(transparent)]
    Sdk(#[from] Error),
}

impl HandlerError {
    pub fn retryable(err: impl Into<anyhow::Error>) -> Self {
        HandlerError::Retryable(err.into())
    }

    pub fn terminal(code: u32, message: impl Into<String>) -> Self {
        HandlerError::Terminal(TerminalError::with_code(code, message))
    }

    /// The code reported to the runtime: terminal failures carry their own,
    /// everything else is internal.
    pub fn code(&self) -> u32 {
        match self {
            HandlerError::Terminal(failure) => failure.code,
            _ => INTERNAL_ERROR_CODE,
        }
    }
}

/// Failure raised by the context operations.
///
/// Most variants mean the invocation cannot make further progress: once one
/// of them has been raised, every subsequent journal operation re-raises it,
/// so swallowing this error in handler code does not resume execution.
#[derive(Debug, Clone, thiserror::Error)]
#[error(transparent)]
pub struct Error(pub(crate) ErrorInner);

impl Error {
    /// True when this is the clean "waiting for the runtime" termination,
    /// not a real failure.
    pub fn is_suspension(&self) -> bool {
        matches!(self.0, ErrorInner::Suspended { .. })
    }
}

impl From<ErrorInner> for Error {
    fn from(value: ErrorInner) -> Self {
        Error(value)
    }
}

/// Rendering of a journal entry in mismatch reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EntryDescription {
    pub ty: MessageType,
    pub json: String,
}

impl EntryDescription {
    pub(crate) fn new<M: serde::Serialize>(ty: MessageType, entry: &M) -> Self {
        EntryDescription {
            ty,
            json: serde_json::to_string(entry).unwrap_or_else(|_| "<unserializable>".to_owned()),
        }
    }

    pub(crate) fn of_entry(entry: &EntryMessage) -> Self {
        let ty = entry.message_type();
        match entry {
            EntryMessage::Input(m) => EntryDescription::new(ty, m),
            EntryMessage::Output(m) => EntryDescription::new(ty, m),
            EntryMessage::GetState(m) => EntryDescription::new(ty, m),
            EntryMessage::SetState(m) => EntryDescription::new(ty, m),
            EntryMessage::ClearState(m) => EntryDescription::new(ty, m),
            EntryMessage::ClearAllState(m) => EntryDescription::new(ty, m),
            EntryMessage::GetStateKeys(m) => EntryDescription::new(ty, m),
            EntryMessage::Sleep(m) => EntryDescription::new(ty, m),
            EntryMessage::Call(m) => EntryDescription::new(ty, m),
            EntryMessage::OneWayCall(m) => EntryDescription::new(ty, m),
            EntryMessage::Awakeable(m) => EntryDescription::new(ty, m),
            EntryMessage::CompleteAwakeable(m) => EntryDescription::new(ty, m),
            EntryMessage::SideEffect(m) => EntryDescription::new(ty, m),
        }
    }
}

impl fmt::Display for EntryDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type: {:?}, message: {}", self.ty, self.json)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub(crate) enum ErrorInner {
    #[error(
        "Journal mismatch: replayed journal entries did not correspond to the user code. \
        The user code has to be deterministic! The journal entry at position {index} was: \
        in the user code: {expected}; in the replayed messages: {actual}"
    )]
    JournalMismatch {
        index: EntryIndex,
        expected: EntryDescription,
        actual: EntryDescription,
        description: String,
    },
    #[error("failed writing entry {index} ({ty:?}) to the runtime: {message}")]
    WriteFailed {
        index: EntryIndex,
        ty: MessageType,
        message: String,
    },
    #[error("side effect at entry {index} failed: {failure}")]
    SideEffect {
        index: EntryIndex,
        failure: TerminalError,
    },
    #[error("suspended while awaiting entries {indexes:?}")]
    Suspended { indexes: Vec<EntryIndex> },
    #[error("problem reading completions: {message}")]
    ReadFailed { message: String },
    #[error("received unexpected message {ty:?} while waiting for completions")]
    UnexpectedMessage { ty: MessageType },
    #[error(transparent)]
    Terminal(TerminalError),
    #[error("{message}")]
    Retryable { message: String },
}

impl ErrorInner {
    pub(crate) fn journal_mismatch(
        index: EntryIndex,
        expected: EntryDescription,
        actual: EntryDescription,
    ) -> Self {
        ErrorInner::JournalMismatch {
            index,
            expected,
            actual,
            description: Backtrace::force_capture().to_string(),
        }
    }

    pub(crate) fn is_suspension(&self) -> bool {
        matches!(self, ErrorInner::Suspended { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use restate_sdk_protocol::pb;

    #[test]
    fn entry_description_renders_payload_as_json() {
        let desc = EntryDescription::of_entry(&EntryMessage::SetState(pb::SetStateEntryMessage {
            key: "a".into(),
            value: "1".into(),
        }));

        assert_eq!(desc.ty, MessageType::SetStateEntry);
        let parsed: serde_json::Value = serde_json::from_str(&desc.json).unwrap();
        assert!(parsed.is_object());
    }

    #[test]
    fn suspension_is_not_a_failure() {
        let err = Error(ErrorInner::Suspended { indexes: vec![2] });
        assert!(err.is_suspension());

        let err = Error(ErrorInner::ReadFailed {
            message: "boom".to_owned(),
        });
        assert!(!err.is_suspension());
    }
}
