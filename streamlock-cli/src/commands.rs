//! CLI command implementations

use std::sync::Arc;
use std::time::Duration;

use clap::Subcommand;
use streamlock_core::config::LockConfig;
use streamlock_core::{
    DeviceId, HttpCoordinator, Identity, InMemoryCoordinator, LockError, LockHandle, LockStatus,
    PollingFeed, Result, Session, StreamLockConfig, StreamLockError, TracingPlayback, UserId,
    spawn_lock_client,
};

/// How long `watch` waits for its own release to land before exiting.
const RELEASE_GRACE: Duration = Duration::from_secs(2);

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Play out a two-device takeover against an in-memory coordinator
    Simulate {
        /// Stream both devices try to play
        #[arg(long, default_value = "http://provider.example/live/42.ts")]
        url: String,
        /// Heartbeat interval in milliseconds
        #[arg(long, default_value = "500")]
        heartbeat_ms: u64,
    },
    /// Follow the lock for an account on a remote coordinator
    Watch {
        /// Account whose lock to follow
        #[arg(long)]
        user_id: String,
        /// Access token for the coordinator
        #[arg(long)]
        access_token: String,
        /// Request the lock once subscribed
        #[arg(long)]
        request: bool,
        /// Play this stream once subscribed
        #[arg(long)]
        play: Option<String>,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns the error of the first lock or coordinator operation that fails
pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Simulate { url, heartbeat_ms } => simulate(url, heartbeat_ms).await,
        Commands::Watch {
            user_id,
            access_token,
            request,
            play,
        } => watch(user_id, access_token, request, play).await,
    }
}

/// Runs two devices on one account: the second one takes the stream over.
///
/// # Errors
/// - `StreamLockError::Lock` - A device failed to reach the expected status
async fn simulate(url: String, heartbeat_ms: u64) -> Result<()> {
    let coordinator = InMemoryCoordinator::new();
    let config = LockConfig {
        heartbeat_interval: Duration::from_millis(heartbeat_ms),
        ..Default::default()
    };
    let session = Session::new(UserId::new("demo-account"), "demo-token");

    let living_room = spawn_lock_client(
        config.clone(),
        Identity::for_device(DeviceId::new("living-room-tv")),
        coordinator.clone(),
        coordinator.clone(),
        Arc::new(TracingPlayback::new("living-room-tv")),
    );
    let phone = spawn_lock_client(
        config,
        Identity::for_device(DeviceId::new("phone")),
        coordinator.clone(),
        coordinator.clone(),
        Arc::new(TracingPlayback::new("phone")),
    );

    println!("Living room TV signs in and starts {url}");
    living_room.start(session.clone()).await?;
    let tv = living_room.handle();
    tv.wait_for_status(LockStatus::Available).await?;
    tv.play(url.as_str()).await?;
    tv.wait_for_status(LockStatus::Acquired).await?;
    print_status("living-room-tv", &tv);

    println!("Phone signs in to the same account");
    phone.start(session.clone()).await?;
    let mobile = phone.handle();
    mobile.wait_for_status(LockStatus::LockedByOther).await?;
    print_status("phone", &mobile);

    println!("Phone takes the stream over");
    mobile.play(url.as_str()).await?;
    mobile.wait_for_status(LockStatus::Acquired).await?;
    tv.wait_for_status(LockStatus::LockedByOther).await?;
    print_status("living-room-tv", &tv);
    print_status("phone", &mobile);

    tokio::time::sleep(Duration::from_millis(heartbeat_ms.saturating_mul(2))).await;
    println!(
        "Heartbeats recorded for the account: {}",
        coordinator.heartbeat_count(&session.user_id)
    );

    println!("Phone stops playback");
    mobile.stop_and_release().await?;
    mobile.wait_for_status(LockStatus::Available).await?;
    tv.wait_for_status(LockStatus::Available).await?;
    print_status("living-room-tv", &tv);
    print_status("phone", &mobile);

    phone.shutdown().await?;
    living_room.shutdown().await?;
    Ok(())
}

/// Subscribes to a real account and prints every status change until ctrl-c.
///
/// # Errors
/// - `StreamLockError::Configuration` - No coordinator URL configured
/// - `StreamLockError::Io` - Device id file could not be read or written
/// - `StreamLockError::Lock` - Request or play was rejected locally
async fn watch(
    user_id: String,
    access_token: String,
    request: bool,
    play: Option<String>,
) -> Result<()> {
    let config = StreamLockConfig::from_env();
    if config.coordinator.base_url.is_none() {
        return Err(StreamLockError::Configuration {
            reason: "STREAMLOCK_COORDINATOR_URL is not set".to_string(),
        });
    }

    let identity = Identity::load_or_create(&config.identity.device_id_path)?;
    println!(
        "Device {} instance {}",
        identity.device_id, identity.instance_id
    );

    let coordinator = Arc::new(HttpCoordinator::new(&config.coordinator)?);
    let feed = Arc::new(PollingFeed::new(
        coordinator.clone(),
        config.coordinator.poll_interval,
    ));
    let client = spawn_lock_client(
        config.lock,
        identity,
        coordinator,
        feed,
        Arc::new(TracingPlayback::new("watch")),
    );
    let handle = client.handle();

    client
        .start(Session::new(UserId::new(user_id), access_token))
        .await?;

    let mut view = handle.watch();
    if request || play.is_some() {
        view.wait_for(|current| current.status != LockStatus::Initial)
            .await
            .map_err(|_| LockError::ClientShutdown)?;
        match play {
            Some(url) => handle.play(url).await?,
            None => handle.request_lock().await?,
        }
    }

    print_status("this device", &handle);
    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                print_status("this device", &handle);
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Releasing and signing out");
                let held = handle.status() == LockStatus::Acquired;
                handle.stop_and_release().await?;
                if held {
                    let released = handle.wait_for_status(LockStatus::Available);
                    if tokio::time::timeout(RELEASE_GRACE, released).await.is_err() {
                        tracing::warn!("Release not confirmed before exit");
                    }
                }
                break;
            }
        }
    }

    client.shutdown().await?;
    Ok(())
}

fn print_status(label: &str, handle: &LockHandle) {
    let view = handle.view();
    match view.current_stream_url {
        Some(url) => println!("  {label}: {} (playing {url})", view.status),
        None => println!("  {label}: {}", view.status),
    }
}
