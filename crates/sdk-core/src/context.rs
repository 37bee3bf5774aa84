// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The handler-facing context, wrapping one invocation's state machine.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ::futures::future::BoxFuture;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::awakeable::AwakeableFuture;
use crate::errors::{Error, HandlerError, TerminalError};
use crate::futures::{ResponseFuture, Selectable, Selector};
use crate::machine::Machine;
use crate::sleep::AfterFuture;

/// A handler attached to a service or a keyed object. The server glue
/// resolves the target handler and hands the invocation to the state
/// machine, which drives this interface.
pub trait Handler: Send + Sync {
    fn call(&self, ctx: Context, input: Bytes) -> BoxFuture<'static, Result<Bytes, HandlerError>>;
}

/// Payload (de)serialization used by the typed operation surface. The
/// journal itself only ever sees bytes.
pub trait Codec {
    type Error: std::error::Error + Send + Sync + 'static;

    fn marshal<T: Serialize>(value: &T) -> Result<Bytes, Self::Error>;
    fn unmarshal<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Self::Error>;
}

/// The default JSON codec.
pub struct Json;

impl Codec for Json {
    type Error = serde_json::Error;

    fn marshal<T: Serialize>(value: &T) -> Result<Bytes, Self::Error> {
        serde_json::to_vec(value).map(Bytes::from)
    }

    fn unmarshal<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Self::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Invocation context handed to handlers. All durable operations go through
/// here; from the handler's perspective they are plain sequential calls.
#[derive(Clone)]
pub struct Context {
    machine: Arc<Machine>,
}

impl Context {
    pub(crate) fn new(machine: Arc<Machine>) -> Self {
        Self { machine }
    }

    /// Key of the object this invocation runs against. Empty for unkeyed
    /// services.
    pub fn key(&self) -> &str {
        &self.machine.key
    }

    // --- State

    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, Error> {
        self.machine.get(key).await.map_err(Error)
    }

    pub fn set(&self, key: &str, value: impl Into<Bytes>) -> Result<(), Error> {
        self.machine.set(key, value.into()).map_err(Error)
    }

    pub fn clear(&self, key: &str) -> Result<(), Error> {
        self.machine.clear(key).map_err(Error)
    }

    /// Drop all state of the object. Afterwards gets resolve locally.
    pub fn clear_all(&self) -> Result<(), Error> {
        self.machine.clear_all().map_err(Error)
    }

    pub async fn keys(&self) -> Result<Vec<String>, Error> {
        self.machine.keys().await.map_err(Error)
    }

    // --- Timers

    /// Durably sleep for `duration`. Survives suspension: the runtime wakes
    /// the invocation up when the timer fires.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Error> {
        self.machine.sleep(duration).await.map_err(Error)
    }

    /// Set a durable timer without waiting for it. The returned handle can
    /// be awaited later or raced in [`Context::select`].
    pub fn after(&self, duration: Duration) -> Result<AfterFuture, Error> {
        self.machine.after(duration).map_err(Error)
    }

    // --- Calls

    /// Client for request/response calls to an unkeyed service.
    pub fn service(&self, service: impl Into<String>) -> ServiceClient {
        ServiceClient {
            machine: Arc::clone(&self.machine),
            service: service.into(),
            key: String::new(),
        }
    }

    /// Client for request/response calls to a keyed object.
    pub fn object(&self, service: impl Into<String>, key: impl Into<String>) -> ServiceClient {
        ServiceClient {
            machine: Arc::clone(&self.machine),
            service: service.into(),
            key: key.into(),
        }
    }

    /// Client for one-way calls to an unkeyed service, dispatched after
    /// `delay` (zero means immediately).
    pub fn service_send(&self, service: impl Into<String>, delay: Duration) -> ServiceSendClient {
        ServiceSendClient {
            machine: Arc::clone(&self.machine),
            service: service.into(),
            key: String::new(),
            delay,
        }
    }

    /// Client for one-way calls to a keyed object.
    pub fn object_send(
        &self,
        service: impl Into<String>,
        key: impl Into<String>,
        delay: Duration,
    ) -> ServiceSendClient {
        ServiceSendClient {
            machine: Arc::clone(&self.machine),
            service: service.into(),
            key: key.into(),
            delay,
        }
    }

    /// Request/response call with raw bytes, bypassing the codec.
    pub fn call_raw(
        &self,
        service: &str,
        key: &str,
        method: &str,
        parameter: impl Into<Bytes>,
    ) -> Result<ResponseFuture<()>, Error> {
        let inner = self
            .machine
            .call(service, key, method, parameter.into())
            .map_err(Error)?;
        Ok(ResponseFuture::new(inner))
    }

    /// One-way call with raw bytes, bypassing the codec.
    pub async fn send_raw(
        &self,
        service: &str,
        key: &str,
        method: &str,
        parameter: impl Into<Bytes>,
        delay: Duration,
    ) -> Result<(), Error> {
        self.machine
            .send(service, key, method, parameter.into(), delay)
            .await
            .map_err(Error)
    }

    // --- Side effects

    /// Run a closure whose result is journaled; see the machine-level
    /// semantics for retry behavior.
    pub async fn side_effect<F, Fut>(&self, f: F) -> Result<Bytes, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, HandlerError>>,
    {
        self.machine.side_effect(f).await.map_err(Error)
    }

    // --- Awakeables

    pub fn awakeable(&self) -> Result<AwakeableFuture, Error> {
        self.machine.awakeable().map_err(Error)
    }

    pub fn resolve_awakeable(&self, id: &str, value: impl Into<Bytes>) -> Result<(), Error> {
        self.machine
            .resolve_awakeable(id, value.into())
            .map_err(Error)
    }

    pub fn reject_awakeable(&self, id: &str, reason: TerminalError) -> Result<(), Error> {
        self.machine.reject_awakeable(id, reason).map_err(Error)
    }

    // --- Combinators

    /// Race the given futures; resolves to the position of the first ready
    /// one, breaking ties by registration order.
    pub async fn select(&self, futures: Vec<&dyn Selectable>) -> Result<usize, Error> {
        Selector::new(Arc::clone(&self.machine.completions), futures)
            .select()
            .await
    }

    // --- Randomness

    /// Deterministic randomness: the same invocation id always yields the
    /// same sequence, including across retries.
    pub fn rand(&self) -> Rand {
        Rand {
            machine: Arc::clone(&self.machine),
        }
    }
}

/// Deterministic random values scoped to the invocation.
pub struct Rand {
    machine: Arc<Machine>,
}

impl Rand {
    pub fn u64(&self) -> u64 {
        self.machine.random.lock().next_u64()
    }

    pub fn f64(&self) -> f64 {
        self.machine.random.lock().next_f64()
    }

    pub fn uuid(&self) -> Uuid {
        self.machine.random.lock().next_uuid()
    }
}

/// Request/response client bound to a service (and key, for objects).
pub struct ServiceClient {
    machine: Arc<Machine>,
    service: String,
    key: String,
}

impl ServiceClient {
    pub fn method(&self, method: impl Into<String>) -> CallClient {
        CallClient {
            machine: Arc::clone(&self.machine),
            service: self.service.clone(),
            key: self.key.clone(),
            method: method.into(),
        }
    }
}

/// One-way client bound to a service (and key, for objects).
pub struct ServiceSendClient {
    machine: Arc<Machine>,
    service: String,
    key: String,
    delay: Duration,
}

impl ServiceSendClient {
    pub fn method(&self, method: impl Into<String>) -> SendClient {
        SendClient {
            machine: Arc::clone(&self.machine),
            service: self.service.clone(),
            key: self.key.clone(),
            method: method.into(),
            delay: self.delay,
        }
    }
}

pub struct CallClient {
    machine: Arc<Machine>,
    service: String,
    key: String,
    method: String,
}

impl CallClient {
    /// Issue the call and return the future of its response.
    pub fn request<T, R>(&self, input: &T) -> Result<ResponseFuture<R>, Error>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let parameter = Json::marshal(input).map_err(|e| {
            Error(crate::errors::ErrorInner::Terminal(TerminalError::new(
                format!("cannot encode the request payload: {e}"),
            )))
        })?;
        let inner = self
            .machine
            .call(&self.service, &self.key, &self.method, parameter)
            .map_err(Error)?;
        Ok(ResponseFuture::new(inner))
    }
}

pub struct SendClient {
    machine: Arc<Machine>,
    service: String,
    key: String,
    method: String,
    delay: Duration,
}

impl SendClient {
    /// Issue the one-way call; returns once the runtime acknowledged the
    /// entry.
    pub async fn request<T: Serialize>(&self, input: &T) -> Result<(), Error> {
        let parameter = Json::marshal(input).map_err(|e| {
            Error(crate::errors::ErrorInner::Terminal(TerminalError::new(
                format!("cannot encode the request payload: {e}"),
            )))
        })?;
        self.machine
            .send(&self.service, &self.key, &self.method, parameter, self.delay)
            .await
            .map_err(Error)
    }
}
