//! # Teamseat Core
//!
//! Core types and traits for the Teamseat seat allocation engine.
//!
//! Teamseat resells seats on externally-owned group subscriptions ("Teams") through
//! single-use redemption codes. This crate holds everything the engine and its
//! storage backends agree on, and nothing that performs I/O.
//!
//! ## Core Concepts
//!
//! - **Code**: a redemption token permitting up to `max_uses` seat allocations
//! - **Team**: an external subscription with a locally configured `max_seats`
//! - **Seat**: one unit of Team capacity, held by a member or a pending invite
//! - **Invite record**: the durable, append-only trace of every dispatch attempt
//! - **Roster client**: the external collaborator that owns the real membership
//!
//! ## Architecture Principles
//!
//! - Explicit dependency injection (stores, roster client and clock are traits)
//! - Atomic counters: every shared counter is mutated by a single check-and-set
//! - Tagged outcomes instead of exceptions for external calls
//!
//! ## Example
//!
//! ```ignore
//! use teamseat_core::model::{Email, normalize_code};
//!
//! let email = Email::parse("  Someone@Example.com ")?;
//! assert_eq!(email.as_str(), "someone@example.com");
//! assert_eq!(normalize_code(" abc123 "), "ABC123");
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod environment;
pub mod ids;
pub mod model;
pub mod roster;
pub mod store;

pub use ids::{CodeId, GroupId, InviteId, TeamId};
