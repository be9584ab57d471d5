//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use faunakeys_engine::host::StaticSystemView;
use faunakeys_engine::prelude::*;
use faunakeys_engine::testing::{FakeConnector, FakeIssuerService, FlakyStorage};

pub const ROOT_SECRET: &str = "fnAEroot";

/// A backend wired to in-memory doubles, with handles on each of them
pub struct Harness {
    pub backend: Backend,
    pub storage: FlakyStorage,
    pub service: FakeIssuerService,
    pub connector: FakeConnector,
}

impl Harness {
    /// Backend on a standalone node with no root configuration yet
    pub fn new() -> Self {
        Self::with_system(StaticSystemView::default())
    }

    pub fn with_system(system: StaticSystemView) -> Self {
        let storage = FlakyStorage::default();
        let service = FakeIssuerService::with_root(ROOT_SECRET);
        let connector = FakeConnector::new(service.clone());

        let backend = Backend::builder()
            .storage(Arc::new(storage.clone()))
            .connector(Arc::new(connector.clone()))
            .system_view(Arc::new(system))
            .build()
            .unwrap();

        Self {
            backend,
            storage,
            service,
            connector,
        }
    }

    /// Backend with root configuration and a `deploy` role in place
    pub async fn configured() -> Self {
        let harness = Self::new();
        harness.set_root(ROOT_SECRET).await;
        harness.write_role("deploy", "server", Some("db1")).await;
        harness
    }

    pub async fn set_root(&self, secret: &str) {
        self.backend
            .handle_request(&ctx(), Request::update("config/root").with("secret", secret))
            .await
            .unwrap();
    }

    pub async fn write_role(&self, name: &str, key_role: &str, database: Option<&str>) {
        let mut request = Request::update(format!("roles/{name}")).with("key_role", key_role);
        if let Some(database) = database {
            request = request.with("database", database);
        }
        self.backend.handle_request(&ctx(), request).await.unwrap();
    }

    pub async fn set_lease(&self, ttl: u64, max_ttl: u64) {
        self.backend
            .handle_request(
                &ctx(),
                Request::update("config/lease")
                    .with("ttl", ttl)
                    .with("max_ttl", max_ttl),
            )
            .await
            .unwrap();
    }

    /// Stored root secret
    pub async fn stored_root_secret(&self) -> Option<String> {
        let response = self
            .backend
            .handle_request(&ctx(), Request::read("config/root"))
            .await
            .unwrap()?;
        response.data["secret"].as_str().map(str::to_string)
    }

    /// Ids of intent records still in storage
    pub async fn wal_ids(&self) -> Vec<String> {
        faunakeys_engine::wal::list_wal(self.storage.inner())
            .await
            .unwrap()
    }

    /// Number of live keys minted through the backend
    pub fn issued_key_count(&self) -> usize {
        self.service
            .keys()
            .into_iter()
            .filter(|k| k.data.contains_key("correlation_hash"))
            .count()
    }
}

pub fn ctx() -> RequestContext {
    RequestContext::new("tester")
}

/// A clock far enough ahead that every intent record is old enough to replay
pub fn later() -> DateTime<Utc> {
    Utc::now() + chrono::Duration::seconds(60)
}
