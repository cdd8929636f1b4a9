// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Unit tests for the reconcile harness
//!
//! These run against the in-memory client with paused tokio time, covering:
//! - Lifecycle tracking and reverse-order cleanup
//! - Condition waits, timeouts and cancellation
//! - Conflict-safe updates
//! - Condition queries
//! - Configuration parsing

#[path = "../common/mod.rs"]
mod common;

mod config;
mod tracker;
