//! The canonical state the handler reconciles.

use crate::address::normalize_address;
use crate::keys::{backfill_keys, make_default_keys};
use crate::transaction::merge_transaction;
use crate::types::{
    is_valid_balance, Balance, Key, KeyMap, Lock, LockPatch, Transaction, TransactionPatch,
    TransactionStatus, NATIVE_CURRENCY,
};
use crate::{SyncError, SyncResult};
use std::collections::{HashMap, HashSet};

/// Owned by the handler and only mutated from its event loop. Readers get a
/// [`Snapshot`](crate::Snapshot) copy.
#[derive(Debug, Clone, PartialEq)]
pub struct Store {
    pub account: Option<String>,
    pub network: u64,
    pub balance: Balance,
    pub locks: HashMap<String, Lock>,
    /// Total over the configured locks at all times.
    pub keys: KeyMap,
    pub transactions: HashMap<String, Transaction>,
    /// Locks whose key came from the chain rather than the default factory.
    pub resolved_keys: HashSet<String>,
}

pub fn default_balance() -> Balance {
    let mut balance = Balance::new();
    balance.insert(NATIVE_CURRENCY.to_string(), "0".to_string());
    balance
}

impl Store {
    pub fn new(lock_addresses: &[String], default_network: u64) -> Self {
        Self {
            account: None,
            network: default_network,
            balance: default_balance(),
            locks: HashMap::new(),
            keys: make_default_keys(lock_addresses, None),
            transactions: HashMap::new(),
            resolved_keys: HashSet::new(),
        }
    }

    /// Drops everything tied to the previous account or network. Lock records
    /// are kept; they are refreshed by the next full refresh.
    pub fn reset(&mut self, lock_addresses: &[String]) {
        self.keys = make_default_keys(lock_addresses, self.account.as_deref());
        self.resolved_keys.clear();
        self.transactions.clear();
        self.balance = default_balance();
    }

    pub fn backfill_keys(&mut self, lock_addresses: &[String]) -> usize {
        backfill_keys(&mut self.keys, lock_addresses, self.account.as_deref())
    }

    /// Stores a key from the chain under its normalized lock. Returns that lock.
    pub fn set_key(&mut self, mut key: Key) -> String {
        key.lock = normalize_address(&key.lock);
        let lock = key.lock.clone();
        self.resolved_keys.insert(lock.clone());
        self.keys.insert(lock.clone(), key);
        lock
    }

    /// Merges a lock update, creating the record if needed. A configured
    /// display name replaces whatever name the chain reported.
    pub fn merge_lock(&mut self, address: &str, mut patch: LockPatch, configured_name: Option<&str>) -> &Lock {
        let address = normalize_address(address);
        if let Some(name) = configured_name {
            patch.name = Some(name.to_string());
        }
        if let Some(currency) = patch.currency_contract_address.as_mut() {
            *currency = normalize_address(currency);
        }
        let lock = self
            .locks
            .entry(address.clone())
            .or_insert_with(|| Lock::new(address));
        lock.merge(patch);
        lock
    }

    pub fn merge_transaction(&mut self, hash: &str, patch: TransactionPatch) -> &Transaction {
        let merged = merge_transaction(hash, self.transactions.get(hash), patch);
        self.transactions.insert(hash.to_string(), merged);
        &self.transactions[hash]
    }

    pub fn insert_transaction(&mut self, transaction: Transaction) {
        self.transactions.insert(transaction.hash.clone(), transaction);
    }

    /// Removes every transaction still in `submitted`. Returns how many were dropped.
    pub fn drop_submitted(&mut self) -> usize {
        let before = self.transactions.len();
        self.transactions
            .retain(|_, tx| tx.status != TransactionStatus::Submitted);
        before - self.transactions.len()
    }

    /// Records a balance. Returns false when the stored amount was already equal.
    pub fn set_balance(&mut self, currency: &str, amount: String) -> SyncResult<bool> {
        if !is_valid_balance(&amount) {
            return Err(SyncError::InvalidBalance(amount));
        }
        let currency = normalize_address(currency);
        if self.balance.get(&currency) == Some(&amount) {
            return Ok(false);
        }
        self.balance.insert(currency, amount);
        Ok(true)
    }
}
