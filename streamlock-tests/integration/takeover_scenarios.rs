//! Lock handover between devices and instances sharing one account.

use std::time::Duration;

use streamlock_core::config::StaleLockPolicy;
use streamlock_core::test_mocks::CountingCoordinator;
use streamlock_core::{
    DeviceId, InMemoryCoordinator, LockRecord, LockStatus, PlaybackCall, RemoteStatus,
};

use crate::support::{Device, STREAM_URL, lock_config, session, user};

#[tokio::test]
async fn test_fresh_account_starts_available() {
    let coordinator = InMemoryCoordinator::new();
    let tv = Device::on(&coordinator, "tv");

    let view = tv.sign_in().await;

    assert_eq!(view.status, LockStatus::Available);
    assert_eq!(view.current_stream_url, None);
    assert!(coordinator.record(&user()).is_none());
}

#[tokio::test]
async fn test_request_on_available_locks_for_requester_only() {
    let coordinator = InMemoryCoordinator::new();
    let tv = Device::on(&coordinator, "tv");
    let phone = Device::on(&coordinator, "phone");
    tv.sign_in().await;
    phone.sign_in().await;

    tv.handle.request_lock().await.unwrap();

    tv.wait_for(LockStatus::Acquired).await;
    phone.wait_for(LockStatus::LockedByOther).await;
    let record = coordinator.record(&user()).unwrap();
    assert_eq!(record.status, RemoteStatus::Locked);
    assert_eq!(record.locked_by_device_id, Some(DeviceId::new("tv")));
}

#[tokio::test]
async fn test_play_starts_only_after_acquire() {
    let coordinator = InMemoryCoordinator::new();
    let tv = Device::on(&coordinator, "tv");
    tv.sign_in().await;

    tv.handle.play(STREAM_URL).await.unwrap();
    let view = tv.wait_for(LockStatus::Acquired).await;

    assert_eq!(view.current_stream_url.as_deref(), Some(STREAM_URL));
    assert_eq!(
        tv.playback.calls(),
        vec![PlaybackCall::Play(STREAM_URL.to_string())]
    );
}

#[tokio::test]
async fn test_takeover_moves_playback_to_requester() {
    let coordinator = InMemoryCoordinator::new();
    let tv = Device::on(&coordinator, "tv");
    let phone = Device::on(&coordinator, "phone");
    tv.sign_in().await;
    tv.handle.play(STREAM_URL).await.unwrap();
    tv.wait_for(LockStatus::Acquired).await;
    phone.sign_in().await;
    assert_eq!(phone.status(), LockStatus::LockedByOther);

    phone.handle.play(STREAM_URL).await.unwrap();

    let phone_view = phone.wait_for(LockStatus::Acquired).await;
    let tv_view = tv.wait_for(LockStatus::LockedByOther).await;
    assert_eq!(phone_view.current_stream_url.as_deref(), Some(STREAM_URL));
    assert_eq!(tv_view.current_stream_url, None);
    assert_eq!(tv.playback.now_playing(), None);
    assert_eq!(phone.playback.now_playing().as_deref(), Some(STREAM_URL));

    let record = coordinator.record(&user()).unwrap();
    assert_eq!(record.locked_by_device_id, Some(DeviceId::new("phone")));
    assert_eq!(record.requested_by_device_id, None);
}

#[tokio::test]
async fn test_at_most_one_device_acquired_through_takeovers() {
    let coordinator = InMemoryCoordinator::new();
    let devices = [
        Device::on(&coordinator, "tv"),
        Device::on(&coordinator, "phone"),
        Device::on(&coordinator, "laptop"),
    ];
    for device in &devices {
        device.sign_in().await;
    }

    let watchers: Vec<_> = devices.iter().map(|device| device.handle.watch()).collect();
    let (done, mut finished) = tokio::sync::oneshot::channel::<()>();
    let monitor = tokio::spawn(async move {
        let mut worst = 0;
        let mut sample = tokio::time::interval(Duration::from_millis(1));
        loop {
            tokio::select! {
                _ = &mut finished => return worst,
                _ = sample.tick() => {
                    let acquired = watchers
                        .iter()
                        .filter(|watcher| watcher.borrow().status == LockStatus::Acquired)
                        .count();
                    worst = worst.max(acquired);
                }
            }
        }
    });

    for round in 0..6 {
        let device = &devices[round % devices.len()];
        device.handle.play(STREAM_URL).await.unwrap();
        device.wait_for(LockStatus::Acquired).await;
    }
    let _ = done.send(());

    let worst = tokio::time::timeout(Duration::from_secs(3), monitor)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(worst, 1);
}

#[tokio::test]
async fn test_yield_releases_exactly_once() {
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
    tv.handle.play(STREAM_URL).await.unwrap();
    tv.wait_for(LockStatus::Acquired).await;
    phone.sign_in().await;

    phone.handle.request_lock().await.unwrap();
    phone.wait_for(LockStatus::Acquired).await;
    tv.wait_for(LockStatus::LockedByOther).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(counting.request_count(), 1);
    assert_eq!(counting.release_count(), 1);
    assert_eq!(tv.status(), LockStatus::LockedByOther);
    assert_eq!(tv.playback.now_playing(), None);
}

#[tokio::test]
async fn test_failed_release_does_not_block_other_devices() {
    let coordinator = InMemoryCoordinator::new();
    let counting = CountingCoordinator::with_failing_releases(coordinator.clone(), 1);
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
    tv.handle.play(STREAM_URL).await.unwrap();
    tv.wait_for(LockStatus::Acquired).await;

    tv.handle.stop_and_release().await.unwrap();
    tv.wait_for(LockStatus::Error).await;
    assert_eq!(
        coordinator.record(&user()).unwrap().locked_by_device_id,
        Some(DeviceId::new("tv"))
    );

    phone.handle.play(STREAM_URL).await.unwrap();

    phone.wait_for(LockStatus::Acquired).await;
    tv.wait_for(LockStatus::LockedByOther).await;
    assert_eq!(counting.release_count(), 2);
    assert_eq!(phone.playback.now_playing().as_deref(), Some(STREAM_URL));
    assert_eq!(
        coordinator.record(&user()).unwrap().locked_by_device_id,
        Some(DeviceId::new("phone"))
    );
}

#[tokio::test]
async fn test_second_instance_of_same_device_takes_over() {
    let coordinator = InMemoryCoordinator::new();
    let first = Device::spawn(
        "tv",
        "tab-1",
        lock_config(StaleLockPolicy::Observe),
        coordinator.clone(),
        coordinator.clone(),
    );
    let second = Device::spawn(
        "tv",
        "tab-2",
        lock_config(StaleLockPolicy::Observe),
        coordinator.clone(),
        coordinator.clone(),
    );
    first.sign_in().await;
    second.sign_in().await;

    first.handle.play(STREAM_URL).await.unwrap();
    first.wait_for(LockStatus::Acquired).await;
    second.wait_for(LockStatus::LockedByOther).await;

    second.handle.play(STREAM_URL).await.unwrap();
    second.wait_for(LockStatus::Acquired).await;
    first.wait_for(LockStatus::LockedByOther).await;

    assert_eq!(first.playback.now_playing(), None);
    assert_eq!(second.playback.now_playing().as_deref(), Some(STREAM_URL));
}

#[tokio::test]
async fn test_release_makes_account_available_everywhere() {
    let coordinator = InMemoryCoordinator::new();
    let tv = Device::on(&coordinator, "tv");
    let phone = Device::on(&coordinator, "phone");
    tv.sign_in().await;
    phone.sign_in().await;
    tv.handle.play(STREAM_URL).await.unwrap();
    tv.wait_for(LockStatus::Acquired).await;
    phone.wait_for(LockStatus::LockedByOther).await;

    tv.handle.stop_and_release().await.unwrap();

    tv.wait_for(LockStatus::Available).await;
    phone.wait_for(LockStatus::Available).await;
    assert_eq!(tv.playback.now_playing(), None);
    assert_eq!(
        coordinator.record(&user()).unwrap().status,
        RemoteStatus::Available
    );
}

#[tokio::test]
async fn test_stop_and_release_ignored_unless_acquired() {
    let coordinator = InMemoryCoordinator::new();
    let tv = Device::on(&coordinator, "tv");
    let phone = Device::on(&coordinator, "phone");
    tv.sign_in().await;
    phone.sign_in().await;
    tv.handle.request_lock().await.unwrap();
    phone.wait_for(LockStatus::LockedByOther).await;

    phone.handle.stop_and_release().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(phone.status(), LockStatus::LockedByOther);
    assert_eq!(tv.status(), LockStatus::Acquired);
}

#[tokio::test]
async fn test_stale_own_lock_is_released_by_default() {
    let coordinator = InMemoryCoordinator::new();
    coordinator.seed(LockRecord::locked(user(), DeviceId::new("tv")));
    let tv = Device::on(&coordinator, "tv");

    tv.client.start(session()).await.unwrap();

    tv.wait_for(LockStatus::Available).await;
    assert_eq!(
        coordinator.record(&user()).unwrap().status,
        RemoteStatus::Available
    );
}

#[tokio::test]
async fn test_stale_own_lock_is_observed_when_configured() {
    let coordinator = InMemoryCoordinator::new();
    coordinator.seed(LockRecord::locked(user(), DeviceId::new("tv")));
    let tv = Device::spawn(
        "tv",
        "tab-1",
        lock_config(StaleLockPolicy::Observe),
        coordinator.clone(),
        coordinator.clone(),
    );

    let view = tv.sign_in().await;

    assert_eq!(view.status, LockStatus::LockedByOther);
    assert_eq!(
        coordinator.record(&user()).unwrap().locked_by_device_id,
        Some(DeviceId::new("tv"))
    );
}

#[tokio::test]
async fn test_takeover_from_locked_by_other_via_request() {
    let coordinator = InMemoryCoordinator::new();
    coordinator.seed(LockRecord::locked(user(), DeviceId::new("crashed-box")));
    let phone = Device::on(&coordinator, "phone");
    phone.sign_in().await;
    assert_eq!(phone.status(), LockStatus::LockedByOther);

    phone.handle.request_lock().await.unwrap();

    // Holder is gone, so the handover waits in PENDING.
    phone.wait_for(LockStatus::Pending).await;
    let record = coordinator.record(&user()).unwrap();
    assert_eq!(record.status, RemoteStatus::AwaitingRelease);
    assert_eq!(record.requested_by_device_id, Some(DeviceId::new("phone")));
}
