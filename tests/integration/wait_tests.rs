//! Waiting on state written by cluster controllers

use std::time::Duration;

use kube::api::DynamicObject;
use reconcile_harness::{ErrorKind, TestNamespace, WaitOptions};
use tokio_util::sync::CancellationToken;

use crate::cluster_tracker;
use crate::common::*;

/// Short timeout - controllers publish these objects within seconds
const FAST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::test]
#[ignore = "requires a Kubernetes cluster"]
async fn test_waits_for_controller_created_config_map() {
    let tracker = cluster_tracker().await.expect("Failed to connect to cluster");

    tracker
        .scope(async {
            let ns = TestNamespace::create(&tracker, "root-ca").await?;
            // Published into every namespace by kube-controller-manager
            let root_ca = ns.scoped(config_map("kube-root-ca.crt", "unused"));

            let found = tracker
                .waiter()
                .until_condition(
                    &root_ca,
                    |obj: &DynamicObject| -> reconcile_harness::Result<bool> {
                        Ok(obj.data.pointer("/data/ca.crt").is_some())
                    },
                    WaitOptions::new().with_timeout(FAST_TIMEOUT),
                )
                .await?;

            assert!(found.metadata.resource_version.is_some());
            Ok(())
        })
        .await
        .expect("Test body or cleanup failed");
}

#[tokio::test]
#[ignore = "requires a Kubernetes cluster"]
async fn test_timeout_reports_last_observed_state() {
    let tracker = cluster_tracker().await.expect("Failed to connect to cluster");

    tracker
        .scope(async {
            let ns = TestNamespace::create(&tracker, "timeout").await?;
            let cm = tracker
                .create(&ns.scoped(config_map("static", "unused")))
                .await?;

            // Nothing ever reports a Ready condition on a ConfigMap
            let err = tracker
                .waiter()
                .until_ready(&cm, WaitOptions::new().with_timeout(Duration::from_secs(2)))
                .await
                .unwrap_err();

            assert_eq!(err.kind(), ErrorKind::Timeout);
            assert!(err.to_string().contains("last observed"));
            Ok(())
        })
        .await
        .expect("Test body or cleanup failed");
}

#[tokio::test]
#[ignore = "requires a Kubernetes cluster"]
async fn test_cancellation_stops_wait() {
    let tracker = cluster_tracker().await.expect("Failed to connect to cluster");

    tracker
        .scope(async {
            let ns = TestNamespace::create(&tracker, "cancel").await?;
            let missing = ns.scoped(config_map("never-created", "unused"));
            let token = CancellationToken::new();
            let trigger = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                trigger.cancel();
            });

            let err = tracker
                .waiter()
                .until_found(
                    &missing,
                    WaitOptions::new()
                        .with_timeout(FAST_TIMEOUT)
                        .with_cancellation(token),
                )
                .await
                .unwrap_err();

            assert_eq!(err.kind(), ErrorKind::Cancelled);
            Ok(())
        })
        .await
        .expect("Test body or cleanup failed");
}
