// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Calls to other services: request/response and one-way.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use restate_sdk_protocol::pb;

use crate::errors::{EntryDescription, ErrorInner, TerminalError};
use crate::futures::{Ackable, Completable, CompletionValue};
use crate::journal::{replay_or_new, JournalEntry};
use crate::machine::Machine;

enum CallStep {
    Completed(CompletionValue),
    Pending,
}

impl Machine {
    /// Invoke another handler and return the completable carrying its
    /// response.
    pub(crate) fn call(
        &self,
        service: &str,
        key: &str,
        method: &str,
        parameter: Bytes,
    ) -> Result<Completable, ErrorInner> {
        let (step, index) = replay_or_new::<pb::CallEntryMessage, _>(
            self,
            |index, entry| {
                if entry.service_name != service
                    || entry.key != key
                    || entry.handler_name != method
                    || entry.parameter != parameter
                {
                    return Err(ErrorInner::journal_mismatch(
                        index,
                        EntryDescription::new(
                            pb::CallEntryMessage::TY,
                            &call_entry(service, key, method, parameter.clone()),
                        ),
                        EntryDescription::new(pb::CallEntryMessage::TY, entry),
                    ));
                }
                Ok(match &entry.result {
                    Some(pb::call_entry_message::Result::Value(value)) => {
                        CallStep::Completed(CompletionValue::Success(value.clone()))
                    }
                    Some(pb::call_entry_message::Result::Failure(f)) => CallStep::Completed(
                        CompletionValue::Failure(TerminalError::with_code(
                            f.code,
                            f.message.clone(),
                        )),
                    ),
                    None => CallStep::Pending,
                })
            },
            |index| {
                self.write_entry(index, call_entry(service, key, method, parameter.clone()))?;
                Ok(CallStep::Pending)
            },
        )?;

        Ok(match step {
            CallStep::Completed(value) => Completable::ready(value),
            CallStep::Pending => Completable::pending(&self.completions, index),
        })
    }

    /// Invoke another handler without waiting for its response; only the
    /// runtime ack is awaited.
    pub(crate) async fn send(
        &self,
        service: &str,
        key: &str,
        method: &str,
        parameter: Bytes,
        delay: Duration,
    ) -> Result<(), ErrorInner> {
        let (ack, _) = replay_or_new::<pb::OneWayCallEntryMessage, _>(
            self,
            |index, entry| {
                if entry.service_name != service
                    || entry.key != key
                    || entry.handler_name != method
                    || entry.parameter != parameter
                {
                    return Err(ErrorInner::journal_mismatch(
                        index,
                        EntryDescription::new(
                            pb::OneWayCallEntryMessage::TY,
                            &one_way_call_entry(service, key, method, parameter.clone(), 0),
                        ),
                        EntryDescription::new(pb::OneWayCallEntryMessage::TY, entry),
                    ));
                }
                Ok(Ackable::ready())
            },
            |index| {
                let invoke_time = if delay.is_zero() {
                    0
                } else {
                    (SystemTime::now() + delay)
                        .duration_since(UNIX_EPOCH)
                        .expect("the invoke time is after the epoch")
                        .as_millis() as u64
                };
                self.write_entry(
                    index,
                    one_way_call_entry(service, key, method, parameter.clone(), invoke_time),
                )?;
                Ok(Ackable::pending(&self.completions, index))
            },
        )?;

        ack.acked().await
    }
}

fn call_entry(service: &str, key: &str, method: &str, parameter: Bytes) -> pb::CallEntryMessage {
    pb::CallEntryMessage {
        service_name: service.to_owned(),
        handler_name: method.to_owned(),
        parameter,
        key: key.to_owned(),
        result: None,
    }
}

fn one_way_call_entry(
    service: &str,
    key: &str,
    method: &str,
    parameter: Bytes,
    invoke_time: u64,
) -> pb::OneWayCallEntryMessage {
    pb::OneWayCallEntryMessage {
        service_name: service.to_owned(),
        handler_name: method.to_owned(),
        parameter,
        invoke_time,
        key: key.to_owned(),
    }
}
