//! Hosted coordinator client against a local mock of its HTTP interface.

use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use serde_json::json;
use streamlock_core::config::{CoordinatorConfig, StaleLockPolicy, StreamLockConfig};
use streamlock_core::{
    CoordinatorError, DeviceId, HttpCoordinator, LockCoordinator, LockStatus, PollingFeed,
    RemoteStatus,
};
use url::Url;

use crate::support::{Device, MockCoordinatorServer, STREAM_URL, lock_config, session, user};

fn coordinator(base_url: Url) -> Arc<HttpCoordinator> {
    let config = CoordinatorConfig {
        base_url: Some(base_url),
        api_key: "anon-key".to_string(),
        ..StreamLockConfig::for_testing().coordinator
    };
    Arc::new(HttpCoordinator::new(&config).unwrap())
}

fn device_over_http(base_url: &Url, device_id: &str) -> Device {
    let coordinator = coordinator(base_url.clone());
    let feed = Arc::new(PollingFeed::new(
        coordinator.clone(),
        Duration::from_millis(10),
    ));
    Device::spawn(
        device_id,
        &format!("{device_id}-instance"),
        lock_config(StaleLockPolicy::default()),
        coordinator,
        feed,
    )
}

#[tokio::test]
async fn test_request_lock_calls_edge_function() {
    let (server, base_url) = MockCoordinatorServer::start().await;
    let client = coordinator(base_url);

    client
        .request_lock(&session(), &DeviceId::new("tv"))
        .await
        .unwrap();

    let calls = server.calls_to("/functions/v1/request-stream-lock");
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.method, Method::POST);
    assert_eq!(call.api_key.as_deref(), Some("anon-key"));
    assert_eq!(call.authorization.as_deref(), Some("Bearer access-token"));
    assert_eq!(call.body, Some(json!({ "requestingDeviceId": "tv" })));

    let record = server.memory.record(&user()).unwrap();
    assert_eq!(record.status, RemoteStatus::Locked);
}

#[tokio::test]
async fn test_release_lock_calls_edge_function() {
    let (server, base_url) = MockCoordinatorServer::start().await;
    let client = coordinator(base_url);
    let tv = DeviceId::new("tv");
    client.request_lock(&session(), &tv).await.unwrap();

    client.release_lock(&session(), &tv).await.unwrap();

    let calls = server.calls_to("/functions/v1/release-stream-lock");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].body, Some(json!({ "releasingDeviceId": "tv" })));
    assert_eq!(
        server.memory.record(&user()).unwrap().status,
        RemoteStatus::Available
    );
}

#[tokio::test]
async fn test_rejected_request_reports_status() {
    let (server, base_url) = MockCoordinatorServer::start().await;
    server.reject_requests();
    let client = coordinator(base_url);

    let result = client.request_lock(&session(), &DeviceId::new("tv")).await;

    match result {
        Err(CoordinatorError::Rejected { reason }) => {
            assert!(reason.starts_with("409"), "unexpected reason: {reason}");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_release_without_lock_is_rejected() {
    let (_server, base_url) = MockCoordinatorServer::start().await;
    let client = coordinator(base_url);

    let result = client.release_lock(&session(), &DeviceId::new("tv")).await;

    assert!(matches!(result, Err(CoordinatorError::Rejected { .. })));
}

#[tokio::test]
async fn test_fetch_record_filters_by_account() {
    let (server, base_url) = MockCoordinatorServer::start().await;
    let client = coordinator(base_url);
    assert_eq!(client.fetch_record(&session()).await.unwrap(), None);

    client
        .request_lock(&session(), &DeviceId::new("tv"))
        .await
        .unwrap();
    let record = client.fetch_record(&session()).await.unwrap().unwrap();

    assert_eq!(record.locked_by_device_id, Some(DeviceId::new("tv")));
    let reads = server.calls_to("/rest/v1/stream_lock");
    let query = reads[0].query.clone().unwrap_or_default();
    assert!(query.contains("user_id=eq.user-1"), "query was {query}");
    assert!(query.contains("select=*"), "query was {query}");
}

#[tokio::test]
async fn test_fetch_record_rejects_inconsistent_row() {
    let (server, base_url) = MockCoordinatorServer::start().await;
    server.override_rows(json!([{ "user_id": "user-1", "status": "LOCKED" }]));
    let client = coordinator(base_url);

    let result = client.fetch_record(&session()).await;

    assert!(matches!(result, Err(CoordinatorError::InvalidRecord { .. })));
}

#[tokio::test]
async fn test_heartbeat_patches_own_row() {
    let (server, base_url) = MockCoordinatorServer::start().await;
    let client = coordinator(base_url);
    let tv = DeviceId::new("tv");
    client.request_lock(&session(), &tv).await.unwrap();

    client.heartbeat(&session(), &tv).await.unwrap();

    let patches: Vec<_> = server
        .calls()
        .into_iter()
        .filter(|call| call.method == Method::PATCH)
        .collect();
    assert_eq!(patches.len(), 1);
    let query = patches[0].query.clone().unwrap_or_default();
    assert!(query.contains("locked_by_device_id=eq.tv"), "query was {query}");
    assert!(
        patches[0]
            .body
            .as_ref()
            .is_some_and(|body| body.get("last_heartbeat_at").is_some())
    );
    assert_eq!(server.memory.heartbeat_count(&user()), 1);
}

#[tokio::test]
async fn test_takeover_over_http_with_polling_feed() {
    let (server, base_url) = MockCoordinatorServer::start().await;
    let tv = device_over_http(&base_url, "tv");
    let phone = device_over_http(&base_url, "phone");

    assert_eq!(tv.sign_in().await.status, LockStatus::Available);
    tv.handle.play(STREAM_URL).await.unwrap();
    tv.wait_for(LockStatus::Acquired).await;
    phone.sign_in().await;
    phone.wait_for(LockStatus::LockedByOther).await;

    phone.handle.play(STREAM_URL).await.unwrap();

    phone.wait_for(LockStatus::Acquired).await;
    tv.wait_for(LockStatus::LockedByOther).await;
    assert_eq!(tv.playback.now_playing(), None);
    assert_eq!(phone.playback.now_playing().as_deref(), Some(STREAM_URL));
    assert_eq!(
        server.memory.record(&user()).unwrap().locked_by_device_id,
        Some(DeviceId::new("phone"))
    );
}
