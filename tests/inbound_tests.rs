
use paywall_sync::inbound::InboundMessage;
use paywall_sync::{Event, OutboundMessage, NATIVE_CURRENCY};
use serde_json::json;
use test_helpers::*;

fn inbound(message: serde_json::Value) -> Event {
    Event::Inbound(InboundMessage::parse(&message).expect("well-formed message"))
}

#[tokio::test]
async fn test_send_updates_answers_each_section() {
    let mut helper = MockHandlerHelper::with_locks(&[L0]);
    helper.handler.handle_event(Event::AccountChanged(Some(ME.into())));
    helper.settle().await;
    helper.sink.clear();

    for kind in ["account", "network", "balance", "locks"] {
        helper
            .handler
            .handle_event(inbound(json!({ "type": "sendUpdates", "payload": kind })));
    }

    let messages = helper.sink.messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0], OutboundMessage::UpdateAccount(Some(ME.to_string())));
    assert_eq!(messages[1], OutboundMessage::UpdateNetwork(1));
    match &messages[2] {
        OutboundMessage::UpdateBalance(balance) => assert_eq!(balance[NATIVE_CURRENCY], "0"),
        other => panic!("unexpected: {:?}", other),
    }
    match &messages[3] {
        OutboundMessage::UpdateLocks(locks) => {
            assert_eq!(locks[L0].lock.name.as_deref(), Some("Lock 0"));
            assert_eq!(locks[L0].key.status, paywall_sync::KeyStatus::None);
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn test_purchase_key_request() {
    let mut helper = MockHandlerHelper::with_locks(&[L0]);

    helper
        .handler
        .handle_event(inbound(json!({ "type": "purchaseKey", "payload": { "lock": L0 } })));
    assert_eq!(helper.sink.errors(), vec!["Cannot purchase, no account".to_string()]);

    helper.handler.handle_event(Event::AccountChanged(Some(ME.into())));
    helper.settle().await;
    helper.sink.clear();

    helper
        .handler
        .handle_event(inbound(json!({ "type": "purchaseKey", "payload": { "lock": L0 } })));
    helper.settle().await;

    assert!(helper.sink.errors().is_empty());
    let purchases = helper.wallet.purchases();
    assert_eq!(purchases.len(), 1);
    assert_eq!(purchases[0].lock, L0);
    assert_eq!(purchases[0].owner, ME);
    assert_eq!(purchases[0].key_price, "0.01");
    assert!(purchases[0].currency_contract_address.is_none());
}

#[tokio::test]
async fn test_web3_calls() {
    let mut helper = MockHandlerHelper::with_locks(&[L0]);
    helper.handler.handle_event(Event::AccountChanged(Some(ME.into())));
    helper.settle().await;
    helper.sink.clear();

    for (method, id) in [("eth_accounts", 1), ("net_version", 2), ("eth_sendTransaction", 3)] {
        helper.handler.handle_event(inbound(json!({
            "type": "web3Call",
            "payload": { "method": method, "params": [], "id": id }
        })));
    }

    let results: Vec<serde_json::Value> = helper
        .sink
        .messages()
        .into_iter()
        .filter_map(|m| match m {
            OutboundMessage::Web3Result(value) => Some(value),
            _ => None,
        })
        .collect();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["result"][0].as_str().map(str::to_lowercase), Some(ME.to_string()));
    assert_eq!(results[1]["result"], "1");
    assert_eq!(results[2]["error"], "\"eth_sendTransaction\" is not supported");
}

#[test]
fn test_malformed_messages_are_dropped() {
    let malformed = [
        json!(null),
        json!({ "type": "web3Call", "payload": { "method": "eth_accounts", "params": [] } }),
        json!({ "type": "web3Call", "payload": { "method": "eth_accounts", "params": "x", "id": 1 } }),
        json!({ "type": "purchaseKey", "payload": {} }),
        json!({ "payload": "locks" }),
    ];
    for message in malformed {
        assert!(InboundMessage::parse(&message).is_none(), "{}", message);
    }
}
