//! Packaging the store for the UI context.

use crate::abstractions::MessageSink;
use crate::inbound::UpdateKind;
use crate::keys::{key_status, latest_purchase, paywall_status, KeyStatus, PaywallStatus};
use crate::store::Store;
use crate::types::{Balance, Key, KeyMap, Lock, Transaction};
use crate::SyncError;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Local observer invoked with every dispatched snapshot.
pub type ChangeCallback = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// A lock's key as the UI shows it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyView {
    #[serde(flatten)]
    pub key: Key,
    pub status: KeyStatus,
    pub confirmations: u64,
    /// Latest key purchase for the lock
    pub transaction_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockView {
    #[serde(flatten)]
    pub lock: Lock,
    pub key: KeyView,
}

/// Copy of the store taken at dispatch time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub locks: HashMap<String, LockView>,
    pub account: Option<String>,
    pub balance: Balance,
    pub network: u64,
    pub keys: KeyMap,
    pub transactions: HashMap<String, Transaction>,
}

impl Snapshot {
    pub fn from_store(store: &Store, required_confirmations: u64, now: u64) -> Self {
        Self {
            locks: lock_views(store, required_confirmations, now),
            account: store.account.clone(),
            balance: store.balance.clone(),
            network: store.network,
            keys: store.keys.clone(),
            transactions: store.transactions.clone(),
        }
    }
}

/// Links every known lock with its key and most recent purchase.
pub fn lock_views(store: &Store, required_confirmations: u64, now: u64) -> HashMap<String, LockView> {
    store
        .locks
        .iter()
        .map(|(address, lock)| {
            let key = store.keys.get(address).cloned().unwrap_or_else(|| Key {
                lock: address.clone(),
                owner: store.account.clone(),
                expiration: 0,
            });
            let purchase = latest_purchase(store.transactions.values(), address);
            let view = KeyView {
                status: key_status(&key, purchase, required_confirmations, now),
                confirmations: purchase.map(|tx| tx.confirmations).unwrap_or_default(),
                transaction_hash: purchase.map(|tx| tx.hash.clone()),
                key,
            };
            (
                address.clone(),
                LockView {
                    lock: lock.clone(),
                    key: view,
                },
            )
        })
        .collect()
}

/// Everything posted to the UI context, as `{ "type": ..., "payload": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum OutboundMessage {
    Snapshot(Snapshot),
    Locked,
    Unlocked(Vec<String>),
    Error(String),
    UpdateLocks(HashMap<String, LockView>),
    UpdateAccount(Option<String>),
    UpdateBalance(Balance),
    UpdateNetwork(u64),
    Web3Result(Value),
}

pub struct Dispatcher {
    sink: Arc<dyn MessageSink>,
    on_change: Option<ChangeCallback>,
    lock_addresses: Vec<String>,
    required_confirmations: u64,
}

impl Dispatcher {
    pub fn new(
        sink: Arc<dyn MessageSink>,
        on_change: Option<ChangeCallback>,
        lock_addresses: Vec<String>,
        required_confirmations: u64,
    ) -> Self {
        Self {
            sink,
            on_change,
            lock_addresses,
            required_confirmations,
        }
    }

    /// Posts the snapshot, then the paywall status when it can be decided, then
    /// runs the local callback.
    pub fn dispatch(&self, store: &Store, now: u64) {
        let snapshot = Snapshot::from_store(store, self.required_confirmations, now);

        self.sink.post_message(OutboundMessage::Snapshot(snapshot.clone()));
        match paywall_status(&store.keys, &self.lock_addresses, &store.resolved_keys, now) {
            PaywallStatus::Unlocked(locks) => self.sink.post_message(OutboundMessage::Unlocked(locks)),
            PaywallStatus::Locked => self.sink.post_message(OutboundMessage::Locked),
            PaywallStatus::Undetermined => debug!("Paywall status undetermined"),
        }

        if let Some(on_change) = &self.on_change {
            on_change(&snapshot);
        }
    }

    /// Answers a `sendUpdates` request with one section of the store.
    pub fn send_update(&self, kind: UpdateKind, store: &Store, now: u64) {
        let message = match kind {
            UpdateKind::Locks => {
                OutboundMessage::UpdateLocks(lock_views(store, self.required_confirmations, now))
            }
            UpdateKind::Account => OutboundMessage::UpdateAccount(store.account.clone()),
            UpdateKind::Balance => OutboundMessage::UpdateBalance(store.balance.clone()),
            UpdateKind::Network => OutboundMessage::UpdateNetwork(store.network),
        };
        self.sink.post_message(message);
    }

    pub fn emit_error(&self, error: &SyncError) {
        self.emit_error_message(&error.to_string());
    }

    /// Forwards `message` to the error channel unchanged.
    pub fn emit_error_message(&self, message: &str) {
        warn!("{}", message);
        self.sink.post_message(OutboundMessage::Error(message.to_string()));
    }

    pub fn post(&self, message: OutboundMessage) {
        self.sink.post_message(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingSink;
    use crate::types::{LockPatch, TransactionPatch, TransactionStatus, TransactionType};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn locks() -> Vec<String> {
        vec!["0xl0".to_string(), "0xl1".to_string()]
    }

    fn dispatcher(sink: &Arc<RecordingSink>, on_change: Option<ChangeCallback>) -> Dispatcher {
        Dispatcher::new(sink.clone(), on_change, locks(), 3)
    }

    #[test]
    fn test_dispatch_without_chain_data() {
        let sink = Arc::new(RecordingSink::new());
        let store = Store::new(&locks(), 1);

        dispatcher(&sink, None).dispatch(&store, 1000);

        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        let snapshot = sink.last_snapshot().unwrap();
        assert_eq!(snapshot.keys, store.keys);
        assert_eq!(snapshot.balance, store.balance);
        assert!(snapshot.transactions.is_empty());
    }

    #[test]
    fn test_dispatch_reports_paywall_status() {
        let sink = Arc::new(RecordingSink::new());
        let mut store = Store::new(&locks(), 1);
        store.set_key(Key { lock: "0xl0".into(), owner: None, expiration: 0 });
        store.set_key(Key { lock: "0xl1".into(), owner: None, expiration: 0 });

        let dispatcher = dispatcher(&sink, None);
        dispatcher.dispatch(&store, 1000);
        assert_eq!(sink.messages()[1], OutboundMessage::Locked);

        store.set_key(Key { lock: "0xl1".into(), owner: None, expiration: 5000 });
        dispatcher.dispatch(&store, 1000);
        assert_eq!(
            sink.messages()[3],
            OutboundMessage::Unlocked(vec!["0xl1".to_string()])
        );
    }

    #[test]
    fn test_dispatch_runs_callback() {
        let sink = Arc::new(RecordingSink::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let callback: ChangeCallback = Arc::new(move |snapshot: &Snapshot| {
            assert_eq!(snapshot.network, 1);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher(&sink, Some(callback)).dispatch(&Store::new(&locks(), 1), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lock_view_links_pending_purchase() {
        let mut store = Store::new(&locks(), 1);
        store.merge_lock("0xl0", LockPatch { key_price: Some("0.01".into()), ..Default::default() }, None);
        store.merge_transaction(
            "0xh1",
            TransactionPatch {
                kind: Some(TransactionType::KeyPurchase),
                status: Some(TransactionStatus::Mined),
                block_number: Some(12),
                confirmations: Some(1),
                lock: Some("0xL0".into()),
                ..Default::default()
            },
        );

        let views = lock_views(&store, 3, 1000);
        let view = &views["0xl0"];
        assert_eq!(view.key.status, KeyStatus::Confirming);
        assert_eq!(view.key.confirmations, 1);
        assert_eq!(view.key.transaction_hash.as_deref(), Some("0xh1"));

        let value = serde_json::to_value(view).unwrap();
        assert_eq!(value["keyPrice"], "0.01");
        assert_eq!(value["key"]["status"], "confirming");
        assert_eq!(value["key"]["transactionHash"], "0xh1");
        assert_eq!(value["key"]["expiration"], 0);
    }

    #[test]
    fn test_outbound_message_shape() {
        assert_eq!(
            serde_json::to_value(OutboundMessage::Error("purchase failed".into())).unwrap(),
            json!({ "type": "error", "payload": "purchase failed" })
        );
        assert_eq!(
            serde_json::to_value(OutboundMessage::Locked).unwrap(),
            json!({ "type": "locked" })
        );
        assert_eq!(
            serde_json::to_value(OutboundMessage::UpdateNetwork(4)).unwrap(),
            json!({ "type": "updateNetwork", "payload": 4 })
        );
    }

    #[test]
    fn test_send_update_and_errors() {
        let sink = Arc::new(RecordingSink::new());
        let store = Store::new(&locks(), 7);
        let dispatcher = dispatcher(&sink, None);

        dispatcher.send_update(UpdateKind::Network, &store, 0);
        dispatcher.send_update(UpdateKind::Account, &store, 0);
        dispatcher.emit_error(&SyncError::PurchaseFailed);

        assert_eq!(
            sink.messages(),
            vec![
                OutboundMessage::UpdateNetwork(7),
                OutboundMessage::UpdateAccount(None),
                OutboundMessage::Error("purchase failed".into()),
            ]
        );
    }
}
