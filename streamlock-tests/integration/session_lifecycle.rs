//! Session start/stop, account switches and the heartbeat lifecycle.

use std::time::Duration;

use streamlock_core::config::StaleLockPolicy;
use streamlock_core::test_mocks::CountingCoordinator;
use streamlock_core::{
    DeviceId, InMemoryCoordinator, LockError, LockRecord, LockStatus, Session, UserId,
};

use crate::support::{Device, STREAM_URL, lock_config, session, user};

fn heartbeat_period() -> Duration {
    lock_config(StaleLockPolicy::default()).heartbeat_interval
}

#[tokio::test]
async fn test_stop_unsubscribes_and_resets() {
    let coordinator = InMemoryCoordinator::new();
    let tv = Device::on(&coordinator, "tv");
    tv.sign_in().await;
    tv.handle.play(STREAM_URL).await.unwrap();
    tv.wait_for(LockStatus::Acquired).await;
    assert_eq!(coordinator.subscriber_count(&user()), 1);

    tv.client.stop().await.unwrap();

    assert_eq!(tv.status(), LockStatus::Initial);
    assert_eq!(tv.handle.view().current_stream_url, None);
    assert_eq!(tv.playback.now_playing(), None);
    assert_eq!(coordinator.subscriber_count(&user()), 0);
}

#[tokio::test]
async fn test_no_updates_after_sign_out() {
    let coordinator = InMemoryCoordinator::new();
    let tv = Device::on(&coordinator, "tv");
    let phone = Device::on(&coordinator, "phone");
    tv.sign_in().await;
    phone.sign_in().await;

    tv.client.stop().await.unwrap();
    phone.handle.request_lock().await.unwrap();
    phone.wait_for(LockStatus::Acquired).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(tv.status(), LockStatus::Initial);
}

#[tokio::test]
async fn test_operations_after_sign_out_need_session() {
    let coordinator = InMemoryCoordinator::new();
    let tv = Device::on(&coordinator, "tv");
    tv.sign_in().await;
    tv.client.stop().await.unwrap();

    let result = tv.handle.request_lock().await;
    assert!(matches!(result, Err(LockError::NoSession)));
}

#[tokio::test]
async fn test_sign_in_again_reads_current_record() {
    let coordinator = InMemoryCoordinator::new();
    let tv = Device::on(&coordinator, "tv");
    let phone = Device::on(&coordinator, "phone");
    tv.sign_in().await;
    tv.client.stop().await.unwrap();

    phone.sign_in().await;
    phone.handle.request_lock().await.unwrap();
    phone.wait_for(LockStatus::Acquired).await;

    let view = tv.sign_in().await;
    assert_eq!(view.status, LockStatus::LockedByOther);
    assert_eq!(coordinator.subscriber_count(&user()), 2);
}

#[tokio::test]
async fn test_repeated_start_keeps_single_subscription() {
    let coordinator = InMemoryCoordinator::new();
    let tv = Device::on(&coordinator, "tv");
    tv.sign_in().await;

    tv.client.start(session()).await.unwrap();
    tv.client.start(session()).await.unwrap();

    assert_eq!(coordinator.subscriber_count(&user()), 1);
    assert_eq!(tv.status(), LockStatus::Available);
}

#[tokio::test]
async fn test_account_switch_replaces_subscription() {
    let coordinator = InMemoryCoordinator::new();
    let other_user = UserId::new("user-2");
    coordinator.seed(LockRecord::locked(other_user.clone(), DeviceId::new("box")));
    let tv = Device::on(&coordinator, "tv");
    tv.sign_in().await;

    tv.client
        .start(Session::new(other_user.clone(), "other-token"))
        .await
        .unwrap();

    tv.wait_for(LockStatus::LockedByOther).await;
    assert_eq!(coordinator.subscriber_count(&user()), 0);
    assert_eq!(coordinator.subscriber_count(&other_user), 1);
}

#[tokio::test]
async fn test_heartbeat_runs_only_while_acquired() {
    let coordinator = InMemoryCoordinator::new();
    let counting = CountingCoordinator::new(coordinator.clone());
    let tv = Device::spawn(
        "tv",
        "tv-instance",
        lock_config(StaleLockPolicy::default()),
        counting.clone(),
        coordinator.clone(),
    );
    let phone = Device::on(&coordinator, "phone");
    tv.sign_in().await;
    phone.sign_in().await;

    tokio::time::sleep(heartbeat_period() * 3).await;
    assert_eq!(counting.heartbeat_attempts(), 0);

    tv.handle.request_lock().await.unwrap();
    tv.wait_for(LockStatus::Acquired).await;
    tokio::time::sleep(heartbeat_period() * 5).await;
    assert!(counting.heartbeat_attempts() >= 2);
    assert!(coordinator.record(&user()).unwrap().last_heartbeat_at.is_some());

    phone.handle.request_lock().await.unwrap();
    tv.wait_for(LockStatus::LockedByOther).await;
    // One tick may already be in flight when the lock is lost.
    tokio::time::sleep(heartbeat_period()).await;
    let after_loss = counting.heartbeat_attempts();
    tokio::time::sleep(heartbeat_period() * 5).await;
    assert_eq!(counting.heartbeat_attempts(), after_loss);
}

#[tokio::test]
async fn test_heartbeat_stops_on_sign_out() {
    let coordinator = InMemoryCoordinator::new();
    let counting = CountingCoordinator::new(coordinator.clone());
    let tv = Device::spawn(
        "tv",
        "tv-instance",
        lock_config(StaleLockPolicy::default()),
        counting.clone(),
        coordinator.clone(),
    );
    tv.sign_in().await;
    tv.handle.request_lock().await.unwrap();
    tv.wait_for(LockStatus::Acquired).await;

    tv.client.stop().await.unwrap();
    tokio::time::sleep(heartbeat_period()).await;
    let after_stop = counting.heartbeat_attempts();
    tokio::time::sleep(heartbeat_period() * 5).await;

    assert_eq!(counting.heartbeat_attempts(), after_stop);
}

#[tokio::test]
async fn test_failed_heartbeats_keep_lock() {
    let coordinator = InMemoryCoordinator::new();
    let counting = CountingCoordinator::with_failing_heartbeats(coordinator.clone());
    let tv = Device::spawn(
        "tv",
        "tv-instance",
        lock_config(StaleLockPolicy::default()),
        counting.clone(),
        coordinator.clone(),
    );
    tv.sign_in().await;
    tv.handle.request_lock().await.unwrap();
    tv.wait_for(LockStatus::Acquired).await;

    tokio::time::sleep(heartbeat_period() * 5).await;

    assert!(counting.heartbeat_attempts() >= 2);
    assert_eq!(tv.status(), LockStatus::Acquired);
}
