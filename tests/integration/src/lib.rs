//! Integration test utilities for the gateway client
//!
//! This crate provides helpers for driving sessions against in-memory
//! peers and against a loopback gateway served over real TCP.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
