//! Harness configuration parsing

use std::collections::HashMap;
use std::time::Duration;

use reconcile_harness::config::{CLEANUP_STRATEGY_ENV, POLL_INTERVAL_ENV, WAIT_TIMEOUT_ENV};
use reconcile_harness::{CleanupStrategy, Error, HarnessConfig, TestOutcome};

fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
    vars.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_defaults() {
    let config = HarnessConfig::default();
    assert_eq!(config.cleanup_strategy, CleanupStrategy::Always);
    assert_eq!(config.poll_interval, Duration::from_secs(1));
    assert_eq!(config.wait_timeout, Duration::from_secs(60));
    assert_eq!(config.update_timeout, Duration::from_secs(30));
    assert_eq!(config.cleanup_timeout, Duration::from_secs(60));
}

#[test]
fn test_lookup_overrides() {
    let vars = env(&[
        (CLEANUP_STRATEGY_ENV, "never"),
        (POLL_INTERVAL_ENV, "50"),
        (WAIT_TIMEOUT_ENV, "3"),
    ]);

    let config = HarnessConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();

    assert_eq!(config.cleanup_strategy, CleanupStrategy::Never);
    assert_eq!(config.poll_interval, Duration::from_millis(50));
    assert_eq!(config.wait_timeout, Duration::from_secs(3));
    assert_eq!(config.update_timeout, Duration::from_secs(30));
}

#[test]
fn test_bad_values_are_invalid_config() {
    for (key, value) in [
        (CLEANUP_STRATEGY_ENV, "sometimes"),
        (POLL_INTERVAL_ENV, "-1"),
        (WAIT_TIMEOUT_ENV, "1.5"),
    ] {
        let vars = env(&[(key, value)]);
        let err = HarnessConfig::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)), "{key}={value}: {err}");
    }
}

#[test]
fn test_serde_round_trip() {
    let config = HarnessConfig::default().with_cleanup_strategy(CleanupStrategy::OnSuccess);

    let json = serde_json::to_value(&config).unwrap();
    assert_eq!(json["cleanupStrategy"], "on-success");

    let parsed: HarnessConfig = serde_json::from_value(json).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_partial_json_uses_defaults() {
    let parsed: HarnessConfig =
        serde_json::from_str(r#"{ "cleanupStrategy": "never" }"#).unwrap();
    assert_eq!(parsed.cleanup_strategy, CleanupStrategy::Never);
    assert_eq!(parsed.wait_timeout, Duration::from_secs(60));
}

#[test]
fn test_strategy_decides_by_outcome() {
    assert!(CleanupStrategy::Always.should_run(TestOutcome::Failed));
    assert!(!CleanupStrategy::OnSuccess.should_run(TestOutcome::Failed));
    assert!(!CleanupStrategy::Never.should_run(TestOutcome::Passed));
}
