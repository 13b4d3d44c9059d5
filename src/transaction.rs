//! Merging partial transaction updates into stored records.

use crate::address::normalize_address;
use crate::types::{PurchaseKey, Transaction, TransactionPatch, TransactionStatus, TransactionType, UNMINED_BLOCK_NUMBER};
use serde::{Deserialize, Serialize};

/// Wire names of the typed [`Transaction`] fields. An update's unknown
/// attributes never shadow these.
const TYPED_FIELDS: &[&str] = &[
    "hash",
    "status",
    "type",
    "blockNumber",
    "confirmations",
    "lock",
    "to",
    "from",
    "for",
    "input",
    "network",
    "key",
];

/// A transaction the wallet just sent, as reported by `transaction.new`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub hash: String,
    pub from: String,
    pub to: String,
    pub input: Option<String>,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub status: TransactionStatus,
}

/// Merges `incoming` over `existing`, field by field.
///
/// Without an existing record the result carries the unmined defaults
/// (`blockNumber = UNMINED_BLOCK_NUMBER`, `status = submitted`,
/// `confirmations = 0`) unless the update supplies them. Fields the update does
/// not mention are kept. `lock` and `to` are normalized. Unknown attributes
/// named like a typed field are dropped, so the record keeps its own hash.
///
/// # Example
///
/// ```
/// use paywall_sync::{merge_transaction, TransactionPatch, TransactionStatus, UNMINED_BLOCK_NUMBER};
/// let tx = merge_transaction("0x1", None, TransactionPatch::default());
/// assert_eq!(tx.status, TransactionStatus::Submitted);
/// assert_eq!(tx.block_number, UNMINED_BLOCK_NUMBER);
/// ```
pub fn merge_transaction(hash: &str, existing: Option<&Transaction>, incoming: TransactionPatch) -> Transaction {
    let mut merged = existing.cloned().unwrap_or_else(|| Transaction {
        hash: hash.to_string(),
        status: TransactionStatus::Submitted,
        kind: None,
        block_number: UNMINED_BLOCK_NUMBER,
        confirmations: 0,
        lock: None,
        to: None,
        from: None,
        beneficiary: None,
        input: None,
        network: None,
        key: None,
        extra: Default::default(),
    });
    merged.hash = hash.to_string();

    let TransactionPatch {
        status,
        kind,
        block_number,
        confirmations,
        lock,
        to,
        from,
        beneficiary,
        input,
        network,
        key,
        extra,
    } = incoming;

    if let Some(status) = status {
        merged.status = status;
    }
    if let Some(kind) = kind {
        merged.kind = Some(kind);
    }
    if let Some(block_number) = block_number {
        merged.block_number = block_number;
    }
    if let Some(confirmations) = confirmations {
        merged.confirmations = confirmations;
    }
    if let Some(lock) = lock {
        merged.lock = Some(normalize_address(&lock));
    }
    if let Some(to) = to {
        merged.to = Some(normalize_address(&to));
    }
    if from.is_some() {
        merged.from = from;
    }
    if beneficiary.is_some() {
        merged.beneficiary = beneficiary;
    }
    if input.is_some() {
        merged.input = input;
    }
    if network.is_some() {
        merged.network = network;
    }
    if key.is_some() {
        merged.key = key;
    }
    merged.extra.extend(
        extra
            .into_iter()
            .filter(|(name, _)| !TYPED_FIELDS.contains(&name.as_str())),
    );

    merged
}

/// The lock a key purchase acted on, by priority: the update's lock, the stored
/// lock, the update's recipient, the stored recipient. Empty values are skipped.
/// The result is normalized.
pub fn resolve_purchase_lock(existing: Option<&Transaction>, incoming: &TransactionPatch) -> Option<String> {
    let non_empty = |value: Option<&String>| value.filter(|s| !s.is_empty()).cloned();

    non_empty(incoming.lock.as_ref())
        .or_else(|| non_empty(existing.and_then(|tx| tx.lock.as_ref())))
        .or_else(|| non_empty(incoming.to.as_ref()))
        .or_else(|| non_empty(existing.and_then(|tx| tx.to.as_ref())))
        .map(|lock| normalize_address(&lock))
}

impl NewTransaction {
    /// Builds the stored record for a freshly sent transaction on `network`.
    pub fn into_transaction(self, network: u64) -> Transaction {
        let lock = normalize_address(&self.to);
        let key = PurchaseKey {
            lock: self.to.clone(),
            owner: self.from.clone(),
        };

        Transaction {
            hash: self.hash,
            status: self.status,
            kind: Some(self.kind),
            block_number: UNMINED_BLOCK_NUMBER,
            confirmations: 0,
            lock: Some(lock.clone()),
            to: Some(lock),
            beneficiary: Some(self.from.clone()),
            from: Some(self.from),
            input: self.input,
            network: Some(network),
            key: Some(key),
            extra: Default::default(),
        }
    }
}
