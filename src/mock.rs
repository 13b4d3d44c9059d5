//! In-memory collaborators for deterministic testing.
//!
//! Each mock keeps its state behind `Mutex`es so a test can hold an `Arc` to it,
//! hand a clone to the handler and then script or inspect it while the handler
//! runs.

use crate::abstractions::{
    ChainReader, Fetch, MessageSink, PurchaseRequest, TimeProvider, WalletProvider,
};
use crate::address::normalize_address;
use crate::dispatch::{OutboundMessage, Snapshot};
use crate::types::{Key, LockPatch, TransactionPatch};
use crate::{SyncError, SyncResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wallet whose readiness, account and purchase outcome are set by the test.
pub struct MockWallet {
    ready: AtomicBool,
    provider: AtomicBool,
    account: Mutex<Option<String>>,
    account_error: Mutex<Option<SyncError>>,
    purchase_error: Mutex<Option<SyncError>>,
    purchases: Mutex<Vec<PurchaseRequest>>,
    account_calls: AtomicUsize,
}

impl MockWallet {
    /// A ready wallet with a provider attached and no account.
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(true),
            provider: AtomicBool::new(true),
            account: Mutex::new(None),
            account_error: Mutex::new(None),
            purchase_error: Mutex::new(None),
            purchases: Mutex::new(Vec::new()),
            account_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_provider(&self, attached: bool) {
        self.provider.store(attached, Ordering::SeqCst);
    }

    pub fn set_account(&self, account: Option<&str>) {
        *guard(&self.account) = account.map(str::to_string);
    }

    /// Makes `get_account` fail until cleared with `None`.
    pub fn fail_account(&self, error: Option<SyncError>) {
        *guard(&self.account_error) = error;
    }

    /// Makes `purchase_key` fail until cleared with `None`.
    pub fn fail_purchases(&self, error: Option<SyncError>) {
        *guard(&self.purchase_error) = error;
    }

    pub fn purchases(&self) -> Vec<PurchaseRequest> {
        guard(&self.purchases).clone()
    }

    pub fn account_calls(&self) -> usize {
        self.account_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockWallet {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn has_provider(&self) -> bool {
        self.provider.load(Ordering::SeqCst)
    }

    async fn get_account(&self) -> SyncResult<Option<String>> {
        self.account_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = guard(&self.account_error).clone() {
            return Err(error);
        }
        Ok(guard(&self.account).clone())
    }

    async fn purchase_key(&self, request: PurchaseRequest) -> SyncResult<()> {
        guard(&self.purchases).push(request);
        match guard(&self.purchase_error).clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Chain reader answering from maps the test fills in.
///
/// Unknown keys come back with `expiration == 0` and unknown balances as `"0"`,
/// which is what the chain reports for an account that owns nothing.
#[derive(Default)]
pub struct MockChainReader {
    locks: Mutex<HashMap<String, LockPatch>>,
    keys: Mutex<HashMap<(String, String), Key>>,
    transactions: Mutex<HashMap<String, TransactionPatch>>,
    balances: Mutex<HashMap<String, String>>,
    token_balances: Mutex<HashMap<(String, String), String>>,
    failures: Mutex<HashMap<&'static str, SyncError>>,
    calls: Mutex<Vec<String>>,
    transaction_lookups: Mutex<Vec<(String, Option<TransactionPatch>)>>,
}

impl MockChainReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_lock(&self, address: &str, lock: LockPatch) {
        guard(&self.locks).insert(normalize_address(address), lock);
    }

    pub fn set_key(&self, owner: &str, key: Key) {
        let index = (normalize_address(&key.lock), normalize_address(owner));
        guard(&self.keys).insert(index, key);
    }

    pub fn set_transaction(&self, hash: &str, transaction: TransactionPatch) {
        guard(&self.transactions).insert(hash.to_string(), transaction);
    }

    pub fn set_balance(&self, account: &str, amount: &str) {
        guard(&self.balances).insert(normalize_address(account), amount.to_string());
    }

    pub fn set_token_balance(&self, token: &str, account: &str, amount: &str) {
        guard(&self.token_balances).insert(
            (normalize_address(token), normalize_address(account)),
            amount.to_string(),
        );
    }

    /// Makes every call to `method` (e.g. `"get_lock"`) fail with `error`.
    pub fn fail(&self, method: &'static str, error: SyncError) {
        guard(&self.failures).insert(method, error);
    }

    pub fn clear_failures(&self) {
        guard(&self.failures).clear();
    }

    /// Every call so far, formatted as `"<method> <args>"`.
    pub fn calls(&self) -> Vec<String> {
        guard(&self.calls).clone()
    }

    pub fn calls_to(&self, method: &str) -> usize {
        let prefix = format!("{} ", method);
        guard(&self.calls).iter().filter(|c| c.starts_with(&prefix)).count()
    }

    /// Hashes looked up and the defaults each lookup was seeded with.
    pub fn transaction_lookups(&self) -> Vec<(String, Option<TransactionPatch>)> {
        guard(&self.transaction_lookups).clone()
    }

    fn record(&self, method: &'static str, args: &[&str]) -> SyncResult<()> {
        guard(&self.calls).push(format!("{} {}", method, args.join(" ")));
        match guard(&self.failures).get(method) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChainReader for MockChainReader {
    async fn get_lock(&self, address: &str) -> SyncResult<LockPatch> {
        self.record("get_lock", &[address])?;
        guard(&self.locks)
            .get(&normalize_address(address))
            .cloned()
            .ok_or_else(|| SyncError::Lookup(format!("unknown lock {}", address)))
    }

    async fn get_key_by_lock_for_owner(&self, lock: &str, owner: &str) -> SyncResult<Key> {
        self.record("get_key_by_lock_for_owner", &[lock, owner])?;
        let index = (normalize_address(lock), normalize_address(owner));
        Ok(guard(&self.keys).get(&index).cloned().unwrap_or_else(|| Key {
            lock: lock.to_string(),
            owner: Some(owner.to_string()),
            expiration: 0,
        }))
    }

    async fn get_transaction(
        &self,
        hash: &str,
        defaults: Option<TransactionPatch>,
    ) -> SyncResult<TransactionPatch> {
        self.record("get_transaction", &[hash])?;
        guard(&self.transaction_lookups).push((hash.to_string(), defaults.clone()));
        match guard(&self.transactions).get(hash) {
            Some(transaction) => Ok(transaction.clone()),
            None => Ok(defaults.unwrap_or_default()),
        }
    }

    async fn get_balance(&self, account: &str) -> SyncResult<String> {
        self.record("get_balance", &[account])?;
        Ok(guard(&self.balances)
            .get(&normalize_address(account))
            .cloned()
            .unwrap_or_else(|| "0".to_string()))
    }

    async fn get_token_balance(&self, token: &str, account: &str) -> SyncResult<String> {
        self.record("get_token_balance", &[token, account])?;
        let index = (normalize_address(token), normalize_address(account));
        Ok(guard(&self.token_balances)
            .get(&index)
            .cloned()
            .unwrap_or_else(|| "0".to_string()))
    }
}

/// A canned `GET` response, matched by URL prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedResponse {
    pub url: String,
    pub body: String,
}

/// Backend transport that serves registered bodies and records posts.
#[derive(Default)]
pub struct MockFetch {
    responses: Mutex<Vec<RecordedResponse>>,
    gets: Mutex<Vec<String>>,
    posts: Mutex<Vec<(String, Vec<u8>)>>,
    post_error: Mutex<Option<SyncError>>,
}

impl MockFetch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads canned responses from a JSON array of `{url, body}` records.
    pub fn from_file(file_path: impl AsRef<Path>) -> SyncResult<Self> {
        let content = std::fs::read_to_string(file_path.as_ref())
            .map_err(|e| SyncError::Config(format!("Failed to read recording file: {}", e)))?;
        let responses: Vec<RecordedResponse> = serde_json::from_str(&content)?;
        Ok(Self {
            responses: Mutex::new(responses),
            ..Self::default()
        })
    }

    /// Serves `body` for every `GET` whose URL starts with `url_prefix`. Later
    /// registrations win over earlier ones.
    pub fn respond_get(&self, url_prefix: &str, body: String) {
        guard(&self.responses).push(RecordedResponse {
            url: url_prefix.to_string(),
            body,
        });
    }

    pub fn fail_posts(&self, error: Option<SyncError>) {
        *guard(&self.post_error) = error;
    }

    pub fn gets(&self) -> Vec<String> {
        guard(&self.gets).clone()
    }

    pub fn posts(&self) -> Vec<(String, Vec<u8>)> {
        guard(&self.posts).clone()
    }
}

#[async_trait]
impl Fetch for MockFetch {
    async fn get(&self, url: &str) -> SyncResult<Vec<u8>> {
        guard(&self.gets).push(url.to_string());
        guard(&self.responses)
            .iter()
            .rev()
            .find(|response| url.starts_with(&response.url))
            .map(|response| response.body.as_bytes().to_vec())
            .ok_or_else(|| SyncError::History(format!("no response recorded for {}", url)))
    }

    async fn post(&self, url: &str, body: Vec<u8>) -> SyncResult<Vec<u8>> {
        guard(&self.posts).push((url.to_string(), body));
        match guard(&self.post_error).clone() {
            Some(error) => Err(error),
            None => Ok(b"{}".to_vec()),
        }
    }
}

/// Message sink that keeps everything posted to it.
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<OutboundMessage>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        guard(&self.messages).clone()
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        guard(&self.messages)
            .iter()
            .filter_map(|message| match message {
                OutboundMessage::Snapshot(snapshot) => Some(snapshot.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_snapshot(&self) -> Option<Snapshot> {
        self.snapshots().pop()
    }

    pub fn errors(&self) -> Vec<String> {
        guard(&self.messages)
            .iter()
            .filter_map(|message| match message {
                OutboundMessage::Error(error) => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        guard(&self.messages).clear();
    }
}

impl MessageSink for RecordingSink {
    fn post_message(&self, message: OutboundMessage) {
        guard(&self.messages).push(message);
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct FixedClock {
    now_ms: AtomicU64,
}

impl FixedClock {
    /// Starts at `now` Unix seconds.
    pub fn new(now: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now.saturating_mul(1000)),
        }
    }

    pub fn set(&self, now: u64) {
        self.now_ms.store(now.saturating_mul(1000), Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u64) {
        self.now_ms.fetch_add(seconds.saturating_mul(1000), Ordering::SeqCst);
    }
}

impl TimeProvider for FixedClock {
    fn now(&self) -> u64 {
        self.now_ms() / 1000
    }

    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
