//! # Teamseat Engine
//!
//! Seat allocation and redemption consistency for resold Team subscriptions.
//!
//! A redemption claims one use of a code, reserves one seat on the least
//! occupied eligible Team, sends the external invite and then either commits or
//! gives everything back. Both counters are only ever mutated through single
//! atomic check-and-set operations, so concurrent redemptions can neither
//! overspend a code nor overfill a Team.
//!
//! ## Components
//!
//! - [`ledger::RedemptionLedger`]: code uses (`claim` / `commit` / `release`)
//! - [`capacity::CapacityTracker`]: Team seat counters and candidate ordering
//! - [`dispatcher::InviteDispatcher`]: bounded, classified external invites
//! - [`coordinator::RedemptionCoordinator`]: the redemption state machine
//! - [`reconcile::ReconciliationJob`]: converges local counts on external truth
//! - [`SeatEngine`]: the facade exposed to the surrounding application
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use teamseat_core::environment::SystemClock;
//! use teamseat_engine::{EngineConfig, SeatEngine, memory::MemoryStore};
//! # use teamseat_core::roster::RosterClient;
//!
//! # async fn example<R: RosterClient>(client: R) -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::from_env();
//! config.validate()?;
//!
//! let engine = SeatEngine::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(client),
//!     Arc::new(SystemClock),
//!     config,
//! );
//!
//! let redemption = engine.redeem("ABC123", "user@example.com").await?;
//! println!("Invited to {}", redemption.team_name);
//! # Ok(())
//! # }
//! ```

pub mod capacity;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod reconcile;

pub use config::EngineConfig;
pub use coordinator::Redemption;
pub use engine::SeatEngine;
pub use error::{ClaimError, RedeemError, SyncError};
