// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! SDK core: turns ordinary handler code into a deterministic, replayable,
//! suspendable computation.
//!
//! Every externally observable effect of a handler goes through the
//! invocation journal. On the first execution an effect is performed and
//! recorded; when the runtime re-invokes the handler, the journal is
//! replayed and each operation returns its recorded result without
//! re-performing the effect. When an effect has no result yet and the
//! runtime closes the stream, the invocation suspends; it resumes in a
//! fresh invocation once the results are in.
//!
//! The server glue owning the transport hands each invocation stream to
//! [`run_invocation`] together with the target [`Handler`].

mod awakeable;
mod call;
mod context;
mod errors;
mod futures;
mod journal;
mod machine;
mod rand;
mod side_effect;
mod sleep;
mod state;

pub use awakeable::AwakeableFuture;
pub use context::{
    CallClient, Codec, Context, Handler, Json, Rand, SendClient, ServiceClient, ServiceSendClient,
};
pub use errors::{
    Error, HandlerError, TerminalError, INTERNAL_ERROR_CODE, JOURNAL_MISMATCH_ERROR_CODE,
    PROTOCOL_VIOLATION_ERROR_CODE,
};
pub use self::futures::{ResponseFuture, Selectable, Selector};
pub use machine::{run_invocation, InvocationError};
pub use sleep::AfterFuture;
