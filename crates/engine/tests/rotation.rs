//! Integration tests for root key rotation

mod common;

use std::time::Duration;

use common::{Harness, ROOT_SECRET, ctx, later};
use faunakeys_engine::issuer::IssuerError;
use faunakeys_engine::prelude::*;
use faunakeys_engine::testing::{FakeOp, StorageOp};
use faunakeys_engine::Phase;
use pretty_assertions::assert_eq;

async fn rotate(harness: &Harness) -> Result<Option<Response>> {
    harness
        .backend
        .handle_request(&ctx(), Request::update("config/rotate-root"))
        .await
}

#[tokio::test]
async fn test_rotation_swaps_root_and_retires_old_key() {
    // GIVEN: A mount configured with S1 and a cached client
    let harness = Harness::configured().await;
    harness
        .backend
        .handle_request(&ctx(), Request::read("deploy"))
        .await
        .unwrap();
    let connects_before = harness.connector.connect_count();

    // WHEN: The root is rotated
    rotate(&harness).await.unwrap();

    // THEN: S2 is stored and live, S1 is deleted
    let new_secret = harness.stored_root_secret().await.unwrap();
    assert_ne!(new_secret, ROOT_SECRET);
    assert!(harness.service.has_secret(&new_secret));
    assert!(!harness.service.has_secret(ROOT_SECRET));
    assert!(harness.wal_ids().await.is_empty());

    // AND: The next use builds a client with S2
    assert!(!harness.backend.client_cache().is_cached().await);
    harness
        .backend
        .handle_request(&ctx(), Request::read("deploy"))
        .await
        .unwrap();
    assert_eq!(harness.connector.connect_count(), connects_before + 1);
}

#[tokio::test]
async fn test_rotated_key_is_admin_and_named() {
    let harness = Harness::configured().await;
    rotate(&harness).await.unwrap();

    let new_secret = harness.stored_root_secret().await.unwrap();
    let key = harness
        .service
        .keys()
        .into_iter()
        .find(|k| k.secret == new_secret)
        .unwrap();
    assert_eq!(key.role, faunakeys_engine::issuer::KeyRole::admin());
    assert!(key.data["name"].as_str().unwrap().starts_with("lease-root-"));
}

#[tokio::test]
async fn test_old_key_delete_failure_keeps_swap() {
    // GIVEN: The issuer refuses to delete the old key
    let harness = Harness::configured().await;
    harness.service.fail_next(
        FakeOp::DeleteBySecret,
        IssuerError::Unavailable("overloaded".into()),
    );

    // WHEN: The root is rotated
    let err = rotate(&harness).await.unwrap_err();

    // THEN: Orphan cleanup error, yet the new root is stored and live
    assert!(matches!(err, BackendError::OrphanCleanup { .. }));
    let new_secret = harness.stored_root_secret().await.unwrap();
    assert_ne!(new_secret, ROOT_SECRET);
    assert!(harness.service.has_secret(&new_secret));
    assert!(harness.service.has_secret(ROOT_SECRET));

    // AND: Issuance keeps working with the new root
    harness
        .backend
        .handle_request(&ctx(), Request::read("deploy"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_root_write_failure_keeps_old_root() {
    // GIVEN: Storage refuses the root config write
    let harness = Harness::configured().await;
    harness.storage.fail_once(StorageOp::Put, "config/root");

    // WHEN: The root is rotated
    let err = rotate(&harness).await.unwrap_err();

    // THEN: Bookkeeping error; S1 still stored and live, the new key taken back
    assert!(matches!(
        err,
        BackendError::Bookkeeping {
            phase: Phase::WriteRootConfig,
            ..
        }
    ));
    assert_eq!(harness.stored_root_secret().await.unwrap(), ROOT_SECRET);
    assert!(harness.service.has_secret(ROOT_SECRET));
    assert_eq!(harness.service.key_count(), 1);
}

#[tokio::test]
async fn test_mint_failure_changes_nothing() {
    let harness = Harness::configured().await;
    harness
        .service
        .fail_next(FakeOp::Create, IssuerError::PermissionDenied("not admin".into()));

    let err = rotate(&harness).await.unwrap_err();

    assert!(matches!(
        err,
        BackendError::RemoteIssuer {
            phase: Phase::Mint,
            ..
        }
    ));
    assert_eq!(harness.stored_root_secret().await.unwrap(), ROOT_SECRET);
    assert_eq!(harness.service.calls(FakeOp::DeleteBySecret), 0);
}

#[tokio::test]
async fn test_rotation_without_root_is_configuration_error() {
    let harness = Harness::new();

    let err = rotate(&harness).await.unwrap_err();

    assert!(matches!(err, BackendError::Configuration(_)));
    assert_eq!(harness.service.calls(FakeOp::Create), 0);
}

#[tokio::test]
async fn test_repeated_rotation_always_leaves_one_root() {
    let harness = Harness::configured().await;

    for _ in 0..3 {
        rotate(&harness).await.unwrap();
        let stored = harness.stored_root_secret().await.unwrap();
        assert!(harness.service.has_secret(&stored));
        assert_eq!(harness.service.key_count(), 1);
    }
}

#[tokio::test]
async fn test_rotation_preserves_endpoint() {
    let harness = Harness::new();
    harness
        .backend
        .handle_request(
            &ctx(),
            Request::update("config/root")
                .with("secret", ROOT_SECRET)
                .with("endpoint", "http://localhost:8443"),
        )
        .await
        .unwrap();

    rotate(&harness).await.unwrap();

    let response = harness
        .backend
        .handle_request(&ctx(), Request::read("config/root"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.data["endpoint"], "http://localhost:8443");
    assert_eq!(
        harness.connector.endpoints().last().map(String::as_str),
        Some("http://localhost:8443")
    );
}

#[tokio::test]
async fn test_replayed_rotation_intent_spares_current_root() {
    // GIVEN: Two rotations in quick succession, the second unable to clear its intent
    let harness = Harness::configured().await;
    rotate(&harness).await.unwrap();
    let first_rotated = harness.stored_root_secret().await.unwrap();

    harness.storage.fail_once(StorageOp::Delete, "wal/");
    let err = rotate(&harness).await.unwrap_err();
    assert!(matches!(
        err,
        BackendError::Bookkeeping {
            phase: Phase::ClearIntent,
            ..
        }
    ));
    assert_eq!(harness.service.key_count(), 2);

    // WHEN: The surviving intent is replayed
    let report = harness.backend.rollback_sweep_at(later()).await.unwrap();

    // THEN: Only the second rotation's key is removed; the stored root stays live
    assert_eq!(report.replayed, 1);
    assert_eq!(harness.stored_root_secret().await.unwrap(), first_rotated);
    assert!(harness.service.has_secret(&first_rotated));
    assert_eq!(harness.service.key_count(), 1);
    assert!(harness.wal_ids().await.is_empty());
}

#[tokio::test]
async fn test_deadline_while_retiring_old_key_names_the_phase() {
    // GIVEN: Deleting the old root key outlasts the request deadline
    let harness = Harness::configured().await;
    harness
        .service
        .set_op_latency(FakeOp::DeleteBySecret, Duration::from_millis(500));
    let ctx = ctx().with_timeout(Duration::from_millis(100));

    // WHEN: The root is rotated
    let err = harness
        .backend
        .handle_request(&ctx, Request::update("config/rotate-root"))
        .await
        .unwrap_err();

    // THEN: The deadline error names the retire step and the swap stands
    assert!(matches!(
        err,
        BackendError::DeadlineExceeded {
            phase: Phase::RetireRootKey
        }
    ));
    let new_secret = harness.stored_root_secret().await.unwrap();
    assert_ne!(new_secret, ROOT_SECRET);
    assert!(harness.service.has_secret(&new_secret));
    assert!(harness.service.has_secret(ROOT_SECRET));
}
