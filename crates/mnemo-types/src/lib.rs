//! Shared domain types for Mnemo.
//!
//! This crate contains the core domain types used across the Mnemo workspace:
//! records and their version history, list/search queries, configuration,
//! and the error taxonomy shared by the store, distiller and capture flow.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod config;
pub mod error;
pub mod query;
pub mod record;
