//! Business logic and backend trait definitions for Mnemo.
//!
//! This crate defines the "ports" (backend, extractor, flag store, confirmer
//! traits) that the infrastructure layer implements, plus the policies built
//! on top of them: the dual-backend store, the distiller, retrieval, migration
//! and capture orchestration. It depends only on `mnemo-types` -- never on
//! `mnemo-infra` or any database/IO crate.

pub mod capture;
pub mod distill;
pub mod migrate;
pub mod retrieval;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
