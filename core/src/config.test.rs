use pretty_assertions::assert_eq;

use super::*;

#[test]
fn defaults_match_contract() {
    let config = EventBusConfig::default();
    assert!(config.thread_pool_size >= 1);
    assert!(config.process_pool_max >= 1);
    assert_eq!(config.process_idle_timeout_secs, 600);
    assert_eq!(config.health_interval_secs, 5);
    assert_eq!(config.health_grace_misses, 1);
    assert_eq!(config.default_timeout_secs, 30);
    assert_eq!(config.default_max_retries, 3);
    assert_eq!(config.shutdown_grace_secs, 5);
    assert!(config.worker_program.is_none());
    assert!(config.worker_args.is_empty());
}

#[test]
fn partial_document_fills_defaults() {
    let config: EventBusConfig =
        serde_json::from_str(r#"{"thread_pool_size": 2, "health_interval_secs": 1}"#).unwrap();
    assert_eq!(config.thread_pool_size, 2);
    assert_eq!(config.health_interval_secs, 1);
    assert_eq!(config.process_idle_timeout_secs, 600);
    assert_eq!(config.default_max_retries, 3);
}

#[test]
fn worker_program_round_trips() {
    let config: EventBusConfig =
        serde_json::from_str(r#"{"worker_program": "/usr/local/bin/app-worker"}"#).unwrap();
    assert_eq!(
        config.worker_program.as_deref(),
        Some(std::path::Path::new("/usr/local/bin/app-worker"))
    );
}
