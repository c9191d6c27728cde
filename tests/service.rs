mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine;
use common::{Harness, DAY};
use ctsync_lib::engine::api::{create_router, ApiState};
use ctsync_lib::engine::config::NAMESPACE_NETWORK_SECURITY;
use ctsync_lib::engine::updater::logger::FailureKind;
use ctsync_lib::engine::updater::CycleOutcome;
use ed25519_dalek::SigningKey;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

#[tokio::test]
async fn test_flag_changes_drive_scheduling() {
    let h = Harness::new();
    let service = h.service();

    service.on_flag_changed("some_other_namespace", Some(true)).unwrap();
    assert!(!service.is_enabled());
    assert_eq!(h.scheduler.registrations(), 0);

    // Absent flag falls back to the default, which is enabled
    service.on_boot_completed(None).unwrap();
    assert!(service.is_enabled());

    service.on_flag_changed(NAMESPACE_NETWORK_SECURITY, Some(true)).unwrap();
    assert_eq!(h.scheduler.registrations(), 1);

    service.on_flag_changed(NAMESPACE_NETWORK_SECURITY, Some(false)).unwrap();
    assert!(!service.is_enabled());
    service.on_flag_changed(NAMESPACE_NETWORK_SECURITY, Some(false)).unwrap();
    assert_eq!(h.scheduler.deregistrations(), 1);
    assert_eq!(h.scheduler.active(), 0);
}

#[tokio::test]
async fn test_status_reports_versions_and_metrics() {
    let h = Harness::new();
    h.publish("v1", 4);
    h.job.run_version("v1").await.unwrap();

    let status = h.service().status();
    assert!(!status.enabled);
    assert!(status.trusted_key_loaded);
    assert_eq!(status.versions.len(), 2);
    assert_eq!(status.versions[0].version_id, "v1");
    assert_eq!(status.versions[0].state.content_version, 4);
    assert_eq!(status.versions[0].next_due, common::T0 + DAY);
    assert_eq!(status.versions[1].next_due, 0);
    assert_eq!(status.metrics["v1"].installs, 1);
}

#[tokio::test]
async fn test_key_rotation_applies_to_next_cycle() {
    let h = Harness::new();
    let service = h.service();

    let rotated = SigningKey::from_bytes(&[9; 32]);
    let encoded = base64::engine::general_purpose::STANDARD.encode(rotated.verifying_key().to_bytes());
    service.rotate_public_key(&encoded).unwrap();

    // Still signed with the old key
    h.publish("v1", 1);
    let outcome = h.job.run_version("v1").await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Failed { kind: FailureKind::Signature, .. }));

    assert!(service.rotate_public_key("not base64!").is_err());
    assert!(service.status().trusted_key_loaded);
}

fn router(h: &Harness) -> axum::Router {
    create_router(ApiState {
        service: Arc::new(h.service()),
    })
}

async fn call(router: axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_api_health() {
    let h = Harness::new();
    let (status, body) = call(router(&h), "GET", "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_api_enable_disable() {
    let h = Harness::new();
    let app = router(&h);

    let (status, body) = call(app.clone(), "POST", "/api/enable").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], true);
    assert_eq!(h.scheduler.active(), 1);

    let (_, body) = call(app.clone(), "GET", "/api/status").await;
    assert_eq!(body["enabled"], true);
    assert_eq!(body["versions"].as_array().unwrap().len(), 2);

    let (_, body) = call(app, "POST", "/api/disable").await;
    assert_eq!(body["enabled"], false);
    assert_eq!(h.scheduler.active(), 0);
}

#[tokio::test]
async fn test_api_update_runs_cycle() {
    let h = Harness::new();
    h.publish("v1", 3);
    h.publish_tampered("v2", 3);

    let (status, body) = call(router(&h), "POST", "/api/update").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"]["v1"]["outcome"], "installed");
    assert_eq!(body["results"]["v1"]["content_version"], 3);
    assert_eq!(body["results"]["v2"]["outcome"], "failed");
    assert_eq!(body["results"]["v2"]["kind"], "signature");
}
