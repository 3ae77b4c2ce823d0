//! In-process object store with fault injection

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};

use crate::models::error::StoreError;
use crate::models::types::{ObjectBody, RemoteKey};
use crate::stores::object_store::{ObjectStore, ObjectStream};
use crate::stores::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Op {
    Put,
    Get,
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Fail this many more calls with a network error.
    Transient(u32),
    /// Reject every call with the given status.
    Reject(u16),
}

/// Object store backed by a map. Shared between simulated nodes via `Arc`.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<RemoteKey, Bytes>>,
    faults: Mutex<HashMap<(Op, RemoteKey), Fault>>,
    attempts: Mutex<HashMap<(Op, RemoteKey), u32>>,
    retry: RetryPolicy,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(retry: RetryPolicy) -> Self {
        Self {
            retry,
            ..Self::default()
        }
    }

    /// The next `times` PUTs of `key` fail transiently.
    pub async fn fail_puts(&self, key: &RemoteKey, times: u32) {
        self.inject(Op::Put, key, Fault::Transient(times)).await;
    }

    /// Every PUT of `key` is rejected with `status`.
    pub async fn reject_puts(&self, key: &RemoteKey, status: u16) {
        self.inject(Op::Put, key, Fault::Reject(status)).await;
    }

    /// The next `times` GETs of `key` fail transiently.
    pub async fn fail_gets(&self, key: &RemoteKey, times: u32) {
        self.inject(Op::Get, key, Fault::Transient(times)).await;
    }

    pub async fn put_attempts(&self, key: &RemoteKey) -> u32 {
        self.attempts_of(Op::Put, key).await
    }

    pub async fn get_attempts(&self, key: &RemoteKey) -> u32 {
        self.attempts_of(Op::Get, key).await
    }

    pub async fn keys(&self) -> Vec<RemoteKey> {
        let mut keys: Vec<RemoteKey> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn object(&self, key: &RemoteKey) -> Option<Bytes> {
        self.objects.read().await.get(key).cloned()
    }

    async fn inject(&self, op: Op, key: &RemoteKey, fault: Fault) {
        self.faults.lock().await.insert((op, key.clone()), fault);
    }

    async fn attempts_of(&self, op: Op, key: &RemoteKey) -> u32 {
        self.attempts.lock().await.get(&(op, key.clone())).copied().unwrap_or(0)
    }

    /// Count the attempt and fail it if a fault is armed for it.
    async fn check_fault(&self, op: Op, key: &RemoteKey) -> Result<(), StoreError> {
        let slot = (op, key.clone());
        *self.attempts.lock().await.entry(slot.clone()).or_insert(0) += 1;

        let mut faults = self.faults.lock().await;
        match faults.get_mut(&slot) {
            Some(Fault::Reject(status)) => Err(StoreError::RemoteRejected {
                key: key.to_string(),
                status: *status,
            }),
            Some(Fault::Transient(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::network(key.as_str(), "injected connection reset"))
            }
            _ => Ok(()),
        }
    }

    async fn try_put(&self, key: &RemoteKey, body: &ObjectBody) -> Result<(), StoreError> {
        self.check_fault(Op::Put, key).await?;

        let data = match body {
            ObjectBody::Bytes(bytes) => bytes.clone(),
            ObjectBody::File(path) => Bytes::from(tokio::fs::read(path).await?),
        };
        self.objects.write().await.insert(key.clone(), data);
        Ok(())
    }

    async fn try_get(&self, key: &RemoteKey) -> Result<Bytes, StoreError> {
        self.check_fault(Op::Get, key).await?;
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &RemoteKey, body: ObjectBody) -> Result<(), StoreError> {
        let body = &body;
        let this = self;
        self.retry
            .run("put", key.as_str(), move || this.try_put(key, body))
            .await
    }

    async fn get(&self, key: &RemoteKey) -> Result<ObjectStream, StoreError> {
        let this = self;
        let data = self
            .retry
            .run("get", key.as_str(), move || this.try_get(key))
            .await?;
        Ok(stream::once(async move { Ok(data) }).boxed())
    }

    async fn exists(&self, key: &RemoteKey) -> Result<bool, StoreError> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn delete(&self, key: &RemoteKey) -> Result<(), StoreError> {
        self.objects
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}
