//! In-memory doubles for the remote issuer and failing storage
//!
//! [`FakeIssuerService`] behaves like a tiny key database: a call is accepted
//! only while the caller's secret belongs to a live key, so deleting the key a
//! client was built from locks that client out. Failures can be queued per
//! operation, and a mint can be made to "lose" its response after the key was
//! created to simulate a crash between the remote call and local bookkeeping.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::host::{MemoryStorage, Storage, StorageError};
use crate::issuer::{
    CORRELATION_HASH_FIELD, ClientSettings, CreateKeyRequest, IssuedKey, IssuerConnector,
    IssuerError, KeyIssuer, KeyRole,
};
use crate::secret::SecretValue;

/// Issuer operations, for failure injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    /// `create_key`
    Create,
    /// `delete_key`
    Delete,
    /// `delete_key_by_secret`
    DeleteBySecret,
    /// `delete_key_by_correlation`
    DeleteByCorrelation,
}

/// A key held by the fake issuer
#[derive(Debug, Clone, PartialEq)]
pub struct FakeKey {
    /// Issuer-assigned reference
    pub reference: String,
    /// Key secret
    pub secret: String,
    /// Role granted to the key
    pub role: KeyRole,
    /// Database scope
    pub database: Option<String>,
    /// Attached data
    pub data: Map<String, Value>,
}

impl FakeKey {
    /// Correlation hash stored in the key's data, if any
    pub fn correlation_hash(&self) -> Option<&str> {
        self.data.get(CORRELATION_HASH_FIELD).and_then(Value::as_str)
    }
}

#[derive(Default)]
struct FakeState {
    keys: BTreeMap<String, FakeKey>,
    next_id: u64,
    failures: HashMap<FakeOp, VecDeque<IssuerError>>,
    lose_create_responses: usize,
    calls: HashMap<FakeOp, usize>,
    latency: Duration,
    op_latency: HashMap<FakeOp, Duration>,
}

/// Shared in-memory key database
#[derive(Clone, Default)]
pub struct FakeIssuerService {
    state: Arc<Mutex<FakeState>>,
}

impl FakeIssuerService {
    /// Empty service; no secret is accepted
    pub fn new() -> Self {
        Self::default()
    }

    /// Service holding one admin key with the given secret
    pub fn with_root(secret: &str) -> Self {
        let service = Self::new();
        service.insert_key(KeyRole::admin(), secret);
        service
    }

    /// Insert a key directly, returning its reference
    pub fn insert_key(&self, role: KeyRole, secret: &str) -> String {
        let mut state = self.state.lock();
        state.next_id += 1;
        let reference = state.next_id.to_string();
        state.keys.insert(
            reference.clone(),
            FakeKey {
                reference: reference.clone(),
                secret: secret.to_string(),
                role,
                database: None,
                data: Map::new(),
            },
        );
        reference
    }

    /// Fail the next call of `op` with `error`. Queued errors are consumed in
    /// order.
    pub fn fail_next(&self, op: FakeOp, error: IssuerError) {
        self.state
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Let the next `count` mints create their key but report
    /// [`IssuerError::Unavailable`] to the caller.
    pub fn lose_create_responses(&self, count: usize) {
        self.state.lock().lose_create_responses = count;
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Delay calls of one kind by `latency`, overriding [`Self::set_latency`]
    pub fn set_op_latency(&self, op: FakeOp, latency: Duration) {
        self.state.lock().op_latency.insert(op, latency);
    }

    /// Every live key
    pub fn keys(&self) -> Vec<FakeKey> {
        self.state.lock().keys.values().cloned().collect()
    }

    /// Number of live keys
    pub fn key_count(&self) -> usize {
        self.state.lock().keys.len()
    }

    /// Whether a live key holds `secret`
    pub fn has_secret(&self, secret: &str) -> bool {
        self.state.lock().keys.values().any(|k| k.secret == secret)
    }

    /// Number of calls made for `op`, including failed ones
    pub fn calls(&self, op: FakeOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// A client acting with `secret`
    pub fn client(&self, secret: &str) -> FakeClient {
        FakeClient {
            service: self.clone(),
            secret: secret.to_string(),
        }
    }

    /// Record the call, then apply latency, injected failures and the
    /// authentication check, in that order.
    async fn enter(&self, op: FakeOp, secret: &str) -> Result<(), IssuerError> {
        let latency = {
            let mut state = self.state.lock();
            *state.calls.entry(op).or_default() += 1;
            state.op_latency.get(&op).copied().unwrap_or(state.latency)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        if let Some(error) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        if secret.is_empty() || !state.keys.values().any(|k| k.secret == secret) {
            return Err(IssuerError::Unauthorized);
        }
        Ok(())
    }

    fn remove_where(&self, predicate: impl Fn(&FakeKey) -> bool, what: &str) -> Result<(), IssuerError> {
        let mut state = self.state.lock();
        let reference = state
            .keys
            .values()
            .find(|k| predicate(k))
            .map(|k| k.reference.clone())
            .ok_or_else(|| IssuerError::NotFound(what.to_string()))?;
        state.keys.remove(&reference);
        Ok(())
    }
}

/// [`KeyIssuer`] bound to one secret of a [`FakeIssuerService`]
#[derive(Clone)]
pub struct FakeClient {
    service: FakeIssuerService,
    secret: String,
}

#[async_trait]
impl KeyIssuer for FakeClient {
    async fn create_key(&self, request: &CreateKeyRequest) -> Result<IssuedKey, IssuerError> {
        self.service.enter(FakeOp::Create, &self.secret).await?;

        let mut state = self.service.state.lock();
        state.next_id += 1;
        let reference = state.next_id.to_string();
        let secret = format!("fnFAKE{reference}");
        state.keys.insert(
            reference.clone(),
            FakeKey {
                reference: reference.clone(),
                secret: secret.clone(),
                role: request.role.clone(),
                database: request.database.clone(),
                data: request.data.clone(),
            },
        );

        if state.lose_create_responses > 0 {
            state.lose_create_responses -= 1;
            return Err(IssuerError::Unavailable("connection reset".into()));
        }

        Ok(IssuedKey {
            secret: SecretValue::new(secret),
            reference,
        })
    }

    async fn delete_key(&self, reference: &str) -> Result<(), IssuerError> {
        self.service.enter(FakeOp::Delete, &self.secret).await?;
        self.service
            .remove_where(|k| k.reference == reference, reference)
    }

    async fn delete_key_by_secret(&self, secret: &SecretValue) -> Result<(), IssuerError> {
        self.service
            .enter(FakeOp::DeleteBySecret, &self.secret)
            .await?;
        self.service
            .remove_where(|k| k.secret == secret.expose(), "key for secret")
    }

    async fn delete_key_by_correlation(&self, hash: &str) -> Result<(), IssuerError> {
        self.service
            .enter(FakeOp::DeleteByCorrelation, &self.secret)
            .await?;
        self.service
            .remove_where(|k| k.correlation_hash() == Some(hash), hash)
    }
}

/// [`IssuerConnector`] handing out [`FakeClient`]s
#[derive(Clone)]
pub struct FakeConnector {
    service: FakeIssuerService,
    connects: Arc<AtomicUsize>,
    endpoints: Arc<Mutex<Vec<String>>>,
    next_failure: Arc<Mutex<Option<IssuerError>>>,
}

impl FakeConnector {
    /// Connector over `service`
    pub fn new(service: FakeIssuerService) -> Self {
        Self {
            service,
            connects: Arc::new(AtomicUsize::new(0)),
            endpoints: Arc::new(Mutex::new(Vec::new())),
            next_failure: Arc::new(Mutex::new(None)),
        }
    }

    /// The service clients are bound to
    pub fn service(&self) -> &FakeIssuerService {
        &self.service
    }

    /// Number of `connect` calls so far
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Endpoints passed to `connect`, oldest first
    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().clone()
    }

    /// Fail the next `connect` call with `error`
    pub fn fail_next_connect(&self, error: IssuerError) {
        *self.next_failure.lock() = Some(error);
    }
}

impl IssuerConnector for FakeConnector {
    fn connect(&self, settings: &ClientSettings) -> Result<Arc<dyn KeyIssuer>, IssuerError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.endpoints.lock().push(settings.endpoint.clone());

        if let Some(error) = self.next_failure.lock().take() {
            return Err(error);
        }
        Ok(Arc::new(self.service.client(settings.secret.expose())))
    }
}

/// Storage operations, for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    /// `get`
    Get,
    /// `put`
    Put,
    /// `delete`
    Delete,
    /// `list`
    List,
}

struct FailRule {
    op: StorageOp,
    prefix: String,
    remaining: Option<usize>,
}

/// [`MemoryStorage`] wrapper that fails selected operations
#[derive(Clone, Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    rules: Arc<Mutex<Vec<FailRule>>>,
}

impl FlakyStorage {
    /// Wrap `inner`
    pub fn new(inner: MemoryStorage) -> Self {
        Self {
            inner,
            rules: Arc::default(),
        }
    }

    /// The wrapped store
    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }

    /// Fail every `op` on paths starting with `prefix` until [`heal`](Self::heal)
    pub fn fail(&self, op: StorageOp, prefix: &str) {
        self.push_rule(op, prefix, None);
    }

    /// Fail the next `op` on a path starting with `prefix`
    pub fn fail_once(&self, op: StorageOp, prefix: &str) {
        self.push_rule(op, prefix, Some(1));
    }

    /// Remove every failure rule
    pub fn heal(&self) {
        self.rules.lock().clear();
    }

    fn push_rule(&self, op: StorageOp, prefix: &str, remaining: Option<usize>) {
        self.rules.lock().push(FailRule {
            op,
            prefix: prefix.to_string(),
            remaining,
        });
    }

    fn check(&self, op: StorageOp, path: &str) -> Result<(), StorageError> {
        let mut rules = self.rules.lock();
        let Some(idx) = rules
            .iter()
            .position(|r| r.op == op && path.starts_with(&r.prefix))
        else {
            return Ok(());
        };

        if let Some(remaining) = rules[idx].remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                rules.remove(idx);
            }
        }
        Err(StorageError::backend(path, format!("injected {op:?} failure")))
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.check(StorageOp::Get, path)?;
        self.inner.get(path).await
    }

    async fn put(&self, path: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.check(StorageOp::Put, path)?;
        self.inner.put(path, value).await
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.check(StorageOp::Delete, path)?;
        self.inner.delete(path).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.check(StorageOp::List, prefix)?;
        self.inner.list(prefix).await
    }
}
