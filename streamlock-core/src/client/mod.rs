//! Lock client: actor, handles and heartbeat.
//!
//! One [`LockClient`] per running instance. It holds exactly one change-feed
//! subscription while a session is active and drives the reducer in
//! [`crate::lock`] from commands, feed messages and RPC completions.

pub mod actor;
pub mod commands;
pub mod handle;
pub mod heartbeat;

pub use actor::spawn_lock_client;
pub use handle::{LockClient, LockHandle, LockView};
pub use heartbeat::Heartbeat;
