//! tokengate: access token issuance over a small REST resource framework.
//!
//! The library exposes every module so the binary and the integration tests
//! in `tests/` build on the same code.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod errors;
pub mod models;
pub mod resource;
pub mod store;
pub mod token;
