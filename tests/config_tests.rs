
use paywall_sync::config::{DEFAULT_KEY_EXPIRY_SKEW_MS, DEFAULT_REQUIRED_CONFIRMATIONS};
use paywall_sync::{HandlerConfig, SyncError};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use test_helpers::*;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_config_from_file() {
    let file = write_config(&format!(
        r#"{{
            "locks": {{
                "{}": {{ "name": "Weekly" }},
                "{}": {{}}
            }},
            "defaultNetwork": 1984,
            "pollingIntervalMs": 500,
            "locksmithHost": "{}"
        }}"#,
        L1.to_uppercase().replace("0X", "0x"),
        L0,
        HOST
    ));

    let config = HandlerConfig::from_file(file.path()).unwrap();
    assert_eq!(config.lock_addresses(), lock_list(&[L0, L1]));
    assert_eq!(config.lock_name(L1), Some("Weekly"));
    assert_eq!(config.default_network, 1984);
    assert_eq!(config.polling_interval(), Duration::from_millis(500));
    assert_eq!(config.key_expiry_skew_ms, DEFAULT_KEY_EXPIRY_SKEW_MS);
    assert_eq!(config.required_confirmations, DEFAULT_REQUIRED_CONFIRMATIONS);
    assert_eq!(config.locksmith_host, HOST);
}

#[test]
fn test_config_file_errors() {
    assert!(matches!(
        HandlerConfig::from_file("/nonexistent/paywall.json"),
        Err(SyncError::Config(_))
    ));

    let file = write_config(r#"{ "locks": { "0x1234": {} } }"#);
    assert!(matches!(HandlerConfig::from_file(file.path()), Err(SyncError::Config(_))));

    let file = write_config(&format!(r#"{{ "locks": {{ "{}": {{}} }}, "defaultNetwork": 0 }}"#, L0));
    assert!(matches!(HandlerConfig::from_file(file.path()), Err(SyncError::Config(_))));
}

#[test]
fn test_config_round_trips_through_json() {
    let config = HandlerConfig::new([L0]).with_required_confirmations(6);
    let json = serde_json::to_string(&config).unwrap();
    assert!(json.contains("\"requiredConfirmations\":6"));
    assert_eq!(HandlerConfig::from_json(&json).unwrap(), config);
}

#[tokio::test]
async fn test_handler_uses_file_config() {
    let file = write_config(&format!(
        r#"{{ "locks": {{ "{}": {{}} }}, "defaultNetwork": 4 }}"#,
        L0
    ));
    let config = HandlerConfig::from_file(file.path()).unwrap();
    let mut helper = MockHandlerHelper::new(config);

    helper.handler.retrieve_current_blockchain_data();
    let snapshot = helper.sink.last_snapshot().unwrap();
    assert_eq!(snapshot.network, 4);
    assert_eq!(snapshot.keys.len(), 1);
    helper.settle().await;
}
