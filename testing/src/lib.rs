//! # Teamseat Testing
//!
//! Test doubles and fixtures for the Teamseat engine.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - A scripted in-memory roster client ([`FakeRoster`])
//! - Builders for Teams and codes
//!
//! ## Example
//!
//! ```ignore
//! use teamseat_testing::{FakeRoster, TeamFixture, code_fixture};
//!
//! #[tokio::test]
//! async fn redeems_once() {
//!     let store = Arc::new(MemoryStore::new());
//!     store.insert_team(TeamFixture::new(1).max_seats(5).build())?;
//!     store.insert_code(code_fixture("ABC123", 1)).await?;
//!
//!     let engine = SeatEngine::new(store, Arc::new(FakeRoster::new()), Arc::new(test_clock()), config);
//!     assert!(engine.redeem("ABC123", "user@example.com").await.is_ok());
//! }
//! ```

pub mod fixtures;
pub mod mocks;
pub mod roster;

// Re-export commonly used items
pub use fixtures::{TeamFixture, code_fixture, direct_code_fixture};
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use roster::{FakeRoster, InviteScript};

/// Install a `tracing` subscriber honouring `RUST_LOG`, once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
