//! Integration tests for Streamlock
//!
//! Several lock clients share one coordinator and exercise the handover
//! paths end to end: in-memory for the lock protocol itself, and through a
//! local HTTP mock for the hosted coordinator client.

#[path = "integration/support.rs"]
mod support;

#[path = "integration/takeover_scenarios.rs"]
mod takeover_scenarios;

#[path = "integration/session_lifecycle.rs"]
mod session_lifecycle;

#[path = "integration/http_coordinator.rs"]
mod http_coordinator;
