//! Infrastructure layer for Mnemo.
//!
//! Contains implementations of the ports defined in `mnemo-core`: the SQLite
//! and file record backends, the durable flag table, and the HTTP extraction
//! collaborator, plus the config loader and the wiring that assembles a
//! `Store` from configuration.

pub mod config;
pub mod extraction;
pub mod file;
pub mod flags;
pub mod sqlite;
pub mod wiring;
