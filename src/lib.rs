//! lucefact-fixtures library crate.
//!
//! Exposes the fixture builders, the pickle codec and the generate/verify
//! drivers so that integration tests in tests/ can import them via
//! `lucefact_fixtures::`.
//!
//! The binary entry point (src/main.rs) uses these same modules.
pub mod fixtures;
pub mod generator;
pub mod pickle;
pub mod report;
pub mod utils;
pub mod verify;
