// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Integration tests for reconcile-harness
//!
//! These tests require a running Kubernetes cluster accessible via kubeconfig.
//! Tests are marked with #[ignore] and must be run explicitly:
//!
//! ```bash
//! cargo test --test integration -- --ignored
//! ```
//!
//! The tests use your existing kubeconfig (~/.kube/config or KUBECONFIG env var).
//! Every test works in its own namespace, so they can run in parallel.

#[path = "../common/mod.rs"]
mod common;


mod wait_tests;

pub use cluster::*;
