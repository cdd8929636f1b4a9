//! Lifecycle tracker behavior: registration, deletion and the cleanup driver

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use reconcile_harness::client::ResourceClient;
use reconcile_harness::{
    CleanupStrategy, Error, ErrorKind, FaultKind, InMemoryClient, TestNamespace, TestOutcome, Verb,
    WaitOptions,
};

use crate::common::*;

mod registration {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_create_registers_in_order() {
        let (_client, tracker) = memory_harness(fast_config());

        let mut expected = Vec::new();
        for name in names("cm", 3) {
            let created = tracker.create(&config_map(&name, "default")).await.unwrap();
            expected.push(id_of(&created));
        }

        assert_eq!(tracker.tracked(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_create_is_not_registered() {
        let (client, tracker) = memory_harness(fast_config());
        client.fail_next(Verb::Create, FaultKind::ServerError, 1);

        let err = tracker.create(&config_map("cm", "default")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert!(tracker.tracked().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_with_generate_name_tracks_assigned_name() {
        let (client, tracker) = memory_harness(fast_config());
        let mut cm = config_map("ignored", "default");
        cm.metadata.name = None;
        cm.metadata.generate_name = Some("gen-".to_string());

        let created = tracker.create(&cm).await.unwrap();

        let id = id_of(&created);
        assert!(id.name.starts_with("gen-"));
        assert_eq!(tracker.tracked(), vec![id.clone()]);
        assert!(client.contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_twice_does_not_duplicate() {
        let (client, tracker) = memory_harness(fast_config());
        let cm = client.seed(config_map("seeded", "default")).unwrap();

        tracker.register_for_cleanup(&cm).unwrap();
        tracker.register_for_cleanup(&cm).unwrap();
        assert_eq!(tracker.tracked(), vec![id_of(&cm)]);

        tracker.cleanup(TestOutcome::Passed).await.unwrap();
        assert_eq!(client.calls_for(Verb::Delete), vec![id_of(&cm)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_removes_from_cleanup() {
        let (client, tracker) = memory_harness(fast_config());
        let a = tracker.create(&config_map("a", "default")).await.unwrap();
        let b = tracker.create(&config_map("b", "default")).await.unwrap();

        tracker.unregister_for_cleanup(&a).unwrap();
        // Second unregister is a no-op
        tracker.unregister_for_cleanup(&a).unwrap();
        assert_eq!(tracker.tracked(), vec![id_of(&b)]);

        tracker.cleanup(TestOutcome::Passed).await.unwrap();

        assert_eq!(client.calls_for(Verb::Delete), vec![id_of(&b)]);
        assert!(client.contains(&id_of(&a)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration_keeps_order_consistent() {
        let (client, tracker) = memory_harness(fast_config());
        let tracker = Arc::new(tracker);
        let mut tasks = Vec::new();
        for name in names("created", 32) {
            let tracker = tracker.clone();
            tasks.push(tokio::spawn(async move {
                tracker.create(&config_map(&name, "default")).await.map(|_| ())
            }));
        }
        for name in names("seeded", 8) {
            let cm = client.seed(config_map(&name, "default")).unwrap();
            let tracker = tracker.clone();
            tasks.push(tokio::spawn(async move { tracker.register_for_cleanup(&cm) }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let tracked = tracker.tracked();
        assert_eq!(tracked.len(), 40);
        let unique: HashSet<_> = tracked.iter().collect();
        assert_eq!(unique.len(), tracked.len());
        for id in &tracked {
            assert!(client.contains(id));
        }

        let report = tracker.cleanup(TestOutcome::Passed).await.unwrap();

        let mut expected = tracked;
        expected.reverse();
        assert_eq!(report.deleted, expected);
        assert_eq!(client.calls_for(Verb::Delete), expected);
        assert!(client.is_empty());
        assert!(tracker.tracked().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_requires_name() {
        let (_client, tracker) = memory_harness(fast_config());
        let mut cm = config_map("x", "default");
        cm.metadata.name = None;

        let err = tracker.register_for_cleanup(&cm).unwrap_err();
        assert!(matches!(err, Error::MissingMetadata("metadata.name")));
    }
}

mod ensure_created {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_creates_when_missing() {
        let (client, tracker) = memory_harness(fast_config());

        let created = tracker.ensure_created(&widget("w", "default")).await.unwrap();

        assert_eq!(client.calls_for(Verb::Create).len(), 1);
        assert!(client.calls_for(Verb::Update).is_empty());
        assert_eq!(tracker.tracked(), vec![id_of(&created)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_object_is_updated_and_registered() {
        let (client, tracker) = memory_harness(fast_config());
        let existing = client
            .seed(WidgetBuilder::new("w", "default").with_replicas(1).build())
            .unwrap();
        let desired = WidgetBuilder::new("w", "default").with_replicas(5).build();

        let updated = tracker.ensure_created(&desired).await.unwrap();

        assert_eq!(client.calls_for(Verb::Create).len(), 1);
        assert_eq!(client.calls_for(Verb::Update), vec![id_of(&existing)]);
        assert_eq!(replicas(&updated), Some(5));
        assert_eq!(replicas(&client.object(&id_of(&existing)).unwrap()), Some(5));
        assert_eq!(tracker.tracked(), vec![id_of(&existing)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_create_errors_propagate() {
        let (client, tracker) = memory_harness(fast_config());
        client.fail_next(Verb::Create, FaultKind::ServerError, 1);

        let err = tracker.ensure_created(&widget("w", "default")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert!(client.calls_for(Verb::Update).is_empty());
        assert!(tracker.tracked().is_empty());
    }
}

mod delete {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_delete_unregisters_and_deletes() {
        let (client, tracker) = memory_harness(fast_config());
        let cm = tracker.create(&config_map("cm", "default")).await.unwrap();

        tracker.delete(&cm).await.unwrap();

        assert!(tracker.tracked().is_empty());
        assert!(!client.contains(&id_of(&cm)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delete_is_not_retried_by_cleanup() {
        let (client, tracker) = memory_harness(fast_config());
        let cm = tracker.create(&config_map("cm", "default")).await.unwrap();
        client.fail_next(Verb::Delete, FaultKind::ServerError, 1);

        let err = tracker.delete(&cm).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert!(tracker.tracked().is_empty());

        let report = tracker.cleanup(TestOutcome::Passed).await.unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(client.calls_for(Verb::Delete).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_of_missing_object_succeeds() {
        let (_client, tracker) = memory_harness(fast_config());
        tracker.delete(&config_map("ghost", "default")).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_and_wait_blocks_until_gone() {
        let (client, tracker) = memory_harness_with(
            InMemoryClient::new().with_deletion_delay(3),
            fast_config(),
        );
        let cm = tracker.create(&config_map("cm", "default")).await.unwrap();

        tracker.delete_and_wait(&cm, WaitOptions::new()).await.unwrap();

        assert!(!client.contains(&id_of(&cm)));
        assert!(client.calls_for(Verb::Get).len() >= 3);
    }
}

mod cleanup {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deletes_in_reverse_creation_order() {
        let (client, tracker) = memory_harness(fast_config());
        let mut created = Vec::new();
        for name in names("cm", 5) {
            let obj = tracker.create(&config_map(&name, "default")).await.unwrap();
            created.push(id_of(&obj));
        }

        let report = tracker.cleanup(TestOutcome::Passed).await.unwrap();

        let mut expected = created.clone();
        expected.reverse();
        assert!(report.ran);
        assert_eq!(report.deleted, expected);
        assert_eq!(client.calls_for(Verb::Delete), expected);
        assert!(client.is_empty());
        assert!(tracker.tracked().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_success_skips_failed_tests() {
        let (client, tracker) =
            memory_harness(fast_config().with_cleanup_strategy(CleanupStrategy::OnSuccess));
        let cm = tracker.create(&config_map("cm", "default")).await.unwrap();

        let report = tracker.cleanup(TestOutcome::Failed).await.unwrap();

        assert!(!report.ran);
        assert!(client.calls_for(Verb::Delete).is_empty());
        assert!(client.contains(&id_of(&cm)));
        assert_eq!(tracker.tracked(), vec![id_of(&cm)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_success_cleans_passed_tests() {
        let (client, tracker) =
            memory_harness(fast_config().with_cleanup_strategy(CleanupStrategy::OnSuccess));
        tracker.create(&config_map("cm", "default")).await.unwrap();

        let report = tracker.cleanup(TestOutcome::Passed).await.unwrap();

        assert!(report.ran);
        assert!(client.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_cleans_failed_tests() {
        let (client, tracker) = memory_harness(fast_config());
        tracker.create(&config_map("cm", "default")).await.unwrap();

        tracker.cleanup(TestOutcome::Failed).await.unwrap();

        assert_eq!(client.calls_for(Verb::Delete).len(), 1);
        assert!(client.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_leaves_everything() {
        let (client, tracker) =
            memory_harness(fast_config().with_cleanup_strategy(CleanupStrategy::Never));
        tracker.create(&config_map("cm", "default")).await.unwrap();

        let report = tracker.cleanup(TestOutcome::Passed).await.unwrap();

        assert!(!report.ran);
        assert_eq!(client.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_collected_after_full_walk() {
        let (client, tracker) = memory_harness(fast_config());
        let a = tracker.create(&config_map("a", "default")).await.unwrap();
        let b = tracker.create(&config_map("b", "default")).await.unwrap();
        let c = tracker.create(&config_map("c", "default")).await.unwrap();
        client.fail_next_for(Verb::Delete, id_of(&b), FaultKind::ServerError, 1);

        let err = tracker.cleanup(TestOutcome::Passed).await.unwrap_err();

        let Error::CleanupFailed(failures) = &err else {
            panic!("expected CleanupFailed, got {err:?}");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].identity, id_of(&b));
        assert_eq!(
            client.calls_for(Verb::Delete),
            vec![id_of(&c), id_of(&b), id_of(&a)]
        );
        assert!(!client.contains(&id_of(&a)));
        assert!(client.contains(&id_of(&b)));
        assert!(!client.contains(&id_of(&c)));
        assert!(err.to_string().contains("ConfigMap default/b"));
        // The failed object stays tracked
        assert_eq!(tracker.tracked(), vec![id_of(&b)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_deleted_counts_as_success() {
        let (client, tracker) = memory_harness(fast_config());
        let cm = tracker.create(&config_map("cm", "default")).await.unwrap();
        client.delete(&cm).await.unwrap();

        let report = tracker.cleanup(TestOutcome::Passed).await.unwrap();

        assert_eq!(report.deleted, vec![id_of(&cm)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_finalizers() {
        let (client, tracker) = memory_harness_with(
            InMemoryClient::new().with_deletion_delay(4),
            fast_config(),
        );
        let cm = tracker.create(&config_map("cm", "default")).await.unwrap();

        tracker.cleanup(TestOutcome::Passed).await.unwrap();

        assert!(!client.contains(&id_of(&cm)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_deletion_times_out() {
        let (client, tracker) = memory_harness_with(
            InMemoryClient::new().with_deletion_delay(usize::MAX),
            fast_config(),
        );
        let cm = tracker.create(&config_map("cm", "default")).await.unwrap();

        let err = tracker.cleanup(TestOutcome::Passed).await.unwrap_err();

        let Error::CleanupFailed(failures) = err else {
            panic!("expected CleanupFailed");
        };
        assert_eq!(failures[0].error.kind(), ErrorKind::Timeout);
        assert!(client.contains(&id_of(&cm)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_namespace_is_deleted_last() {
        let (client, tracker) = memory_harness(fast_config());
        let ns = TestNamespace::create(&tracker, "order").await.unwrap();
        let cm = tracker
            .create(&ns.scoped(config_map("cm", "ignored")))
            .await
            .unwrap();

        tracker.cleanup(TestOutcome::Passed).await.unwrap();

        assert_eq!(
            client.calls_for(Verb::Delete),
            vec![id_of(&cm), id_of(ns.object())]
        );
    }
}

mod scope {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_passing_body_is_cleaned_up() {
        let (client, tracker) = memory_harness(fast_config());

        let value = tracker
            .scope(async {
                tracker.create(&config_map("cm", "default")).await?;
                Ok(42)
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert!(client.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_body_error_is_returned() {
        let (client, tracker) =
            memory_harness(fast_config().with_cleanup_strategy(CleanupStrategy::OnSuccess));

        let err = tracker
            .scope(async {
                tracker.create(&config_map("cm", "default")).await?;
                Err::<(), _>(Error::InvalidConfig("boom".to_string()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidConfig(_)));
        // OnSuccess keeps the evidence of a failed test
        assert_eq!(client.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_resumed_after_cleanup() {
        let (client, tracker) = memory_harness(fast_config());

        let result = AssertUnwindSafe(tracker.scope(async {
            tracker.create(&config_map("cm", "default")).await?;
            if client.len() == 1 {
                panic!("assertion in test body");
            }
            Ok(())
        }))
        .catch_unwind()
        .await;

        assert!(result.is_err());
        assert!(client.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_failure_fails_passing_body() {
        let (client, tracker) = memory_harness(fast_config());

        let err = tracker
            .scope(async {
                let cm = tracker.create(&config_map("cm", "default")).await?;
                client.fail_next_for(Verb::Delete, id_of(&cm), FaultKind::ServerError, 1);
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CleanupFailed(_)));
    }
}
