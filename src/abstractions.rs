//! Collaborator traits the handler is wired against.
//!
//! Each upstream service is reached through an async trait so tests and embedders
//! can supply their own transport. Results of the lookups come back into the
//! handler's mailbox as [`Event`](crate::Event)s; the services may also push
//! events on their own through an [`EventSender`](crate::EventSender).

use crate::dispatch::OutboundMessage;
use crate::types::{Key, LockPatch, TransactionPatch};
use crate::SyncResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A key purchase handed to the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub lock: String,
    pub owner: String,
    pub key_price: String,
    /// None to pay in the native currency
    pub currency_contract_address: Option<String>,
}

/// The user's wallet.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Whether the wallet finished connecting.
    fn is_ready(&self) -> bool;

    /// Whether a provider handle is attached. Polling stops without one.
    fn has_provider(&self) -> bool;

    async fn get_account(&self) -> SyncResult<Option<String>>;

    async fn purchase_key(&self, request: PurchaseRequest) -> SyncResult<()>;
}

/// Read access to the chain.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn get_lock(&self, address: &str) -> SyncResult<LockPatch>;

    async fn get_key_by_lock_for_owner(&self, lock: &str, owner: &str) -> SyncResult<Key>;

    /// Looks up a transaction. `defaults` seeds fields the chain cannot recover
    /// on its own, such as the decoded input of a purchase.
    async fn get_transaction(
        &self,
        hash: &str,
        defaults: Option<TransactionPatch>,
    ) -> SyncResult<TransactionPatch>;

    /// Native currency balance as a decimal string.
    async fn get_balance(&self, account: &str) -> SyncResult<String>;

    async fn get_token_balance(&self, token: &str, account: &str) -> SyncResult<String>;
}

/// HTTP-style access to the backend history service.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn get(&self, url: &str) -> SyncResult<Vec<u8>>;

    /// Posts a JSON body.
    async fn post(&self, url: &str, body: Vec<u8>) -> SyncResult<Vec<u8>>;
}

/// Outbound side of the message channel to the UI context.
pub trait MessageSink: Send + Sync {
    fn post_message(&self, message: OutboundMessage);
}

pub trait TimeProvider: Send + Sync {
    /// Unix seconds
    fn now(&self) -> u64;
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeProvider for SystemClock {
    fn now(&self) -> u64 {
        self.now_ms() / 1000
    }

    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}
