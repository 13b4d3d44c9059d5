//! Blockchain state reconciliation for an embedded paywall widget.
//!
//! A [`BlockchainHandler`] owns the canonical view of the current account, network,
//! balances, locks, keys and transactions. Upstream collaborators push [`Event`]s into
//! its mailbox; every state change is packaged as a [`Snapshot`] and posted through a
//! [`MessageSink`] to the UI context.

pub mod abstractions;
pub mod address;
pub mod config;
pub mod dispatch;
pub mod events;
pub mod handler;
pub mod history;
pub mod inbound;
pub mod keys;
pub mod mock;
pub mod store;
pub mod timers;
pub mod transaction;
pub mod types;

pub use abstractions::{ChainReader, Fetch, MessageSink, SystemClock, TimeProvider, WalletProvider};
pub use address::normalize_address;
pub use config::{HandlerConfig, LockConfig};
pub use dispatch::{ChangeCallback, OutboundMessage, Snapshot};
pub use events::{Event, EventSender};
pub use handler::{BlockchainHandler, Collaborators};
pub use keys::{make_default_keys, KeyStatus, PaywallStatus};
pub use transaction::merge_transaction;
pub use types::{
    Balance, Key, KeyMap, Lock, LockPatch, Transaction, TransactionPatch, TransactionStatus,
    TransactionType, NATIVE_CURRENCY, UNMINED_BLOCK_NUMBER,
};

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("Wallet provider error: {0}")]
    Provider(String),

    #[error("Chain lookup failed: {0}")]
    Lookup(String),

    #[error("History service error: {0}")]
    History(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid balance: {0}")]
    InvalidBalance(String),

    /// The wallet reported that a key purchase did not go through.
    #[error("purchase failed")]
    PurchaseFailed,

    #[error("Cannot purchase, {0}")]
    InvalidPurchase(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}
