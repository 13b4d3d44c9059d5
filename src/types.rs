//! Store record types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Balance map key for the chain's native currency.
pub const NATIVE_CURRENCY: &str = "eth";

/// Block number carried by transactions that are not mined yet, so they sort
/// after every mined one.
pub const UNMINED_BLOCK_NUMBER: u64 = u64::MAX;

/// Keys indexed by normalized lock address.
pub type KeyMap = HashMap<String, Key>;

/// Decimal-string amounts indexed by currency (`eth` or a normalized token address).
pub type Balance = HashMap<String, String>;

/// One account's access grant to a lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub lock: String,
    pub owner: Option<String>,
    /// Unix seconds; 0 means no key is known.
    pub expiration: u64,
}

impl Key {
    pub fn is_unexpired(&self, now: u64) -> bool {
        self.expiration > now
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lock {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_price: Option<String>,
    /// Key duration in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_duration: Option<u64>,
    /// None for locks priced in the native currency
    #[serde(default)]
    pub currency_contract_address: Option<String>,
    /// Attributes the chain service supplied that this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Partial lock update as delivered by `lock.updated`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockPatch {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub key_price: Option<String>,
    #[serde(default)]
    pub expiration_duration: Option<u64>,
    #[serde(default)]
    pub currency_contract_address: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Lock {
    pub fn new(address: String) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }

    /// Applies every field present in `patch`. The record's address is never
    /// changed by a patch.
    pub fn merge(&mut self, patch: LockPatch) {
        if let Some(name) = patch.name {
            self.name = Some(name);
        }
        if let Some(key_price) = patch.key_price {
            self.key_price = Some(key_price);
        }
        if let Some(duration) = patch.expiration_duration {
            self.expiration_duration = Some(duration);
        }
        if let Some(currency) = patch.currency_contract_address {
            self.currency_contract_address = Some(currency);
        }
        self.extra.extend(patch.extra);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    #[default]
    Submitted,
    Pending,
    Mined,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    LockCreation,
    KeyPurchase,
    Withdrawal,
    UpdateKeyPrice,
    #[serde(other)]
    Unknown,
}

/// Identifies the purchase a transaction was created for: the lock it was sent
/// to and the wallet that paid, exactly as the wallet reported them.
///
/// Also accepts the `"<lock>-<owner>"` string id older wallets send.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PurchaseKeyRepr")]
pub struct PurchaseKey {
    pub lock: String,
    pub owner: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PurchaseKeyRepr {
    Id(String),
    Parts { lock: String, owner: String },
}

impl TryFrom<PurchaseKeyRepr> for PurchaseKey {
    type Error = String;

    fn try_from(repr: PurchaseKeyRepr) -> Result<Self, Self::Error> {
        match repr {
            PurchaseKeyRepr::Parts { lock, owner } => Ok(Self { lock, owner }),
            PurchaseKeyRepr::Id(id) => match id.split_once('-') {
                Some((lock, owner)) if !lock.is_empty() && !owner.is_empty() => Ok(Self {
                    lock: lock.to_string(),
                    owner: owner.to_string(),
                }),
                _ => Err(format!("invalid key id: {}", id)),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub status: TransactionStatus,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TransactionType>,
    pub block_number: u64,
    pub confirmations: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Who the key was bought for
    #[serde(rename = "for", default, skip_serializing_if = "Option::is_none")]
    pub beneficiary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<PurchaseKey>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Transaction {
    pub fn is_mined(&self) -> bool {
        self.block_number != UNMINED_BLOCK_NUMBER
    }

    pub fn is_key_purchase(&self) -> bool {
        self.kind == Some(TransactionType::KeyPurchase)
    }

    /// The lock this transaction acted on, if it names one.
    pub fn recipient(&self) -> Option<&str> {
        self.lock
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.to.as_deref().filter(|s| !s.is_empty()))
    }
}

/// Partial transaction update; `None` fields leave the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPatch {
    #[serde(default)]
    pub status: Option<TransactionStatus>,
    #[serde(rename = "type", default)]
    pub kind: Option<TransactionType>,
    #[serde(default)]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub confirmations: Option<u64>,
    #[serde(default)]
    pub lock: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(rename = "for", default)]
    pub beneficiary: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub network: Option<u64>,
    #[serde(default)]
    pub key: Option<PurchaseKey>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// True for non-negative decimal strings such as `"0"`, `"12"` or `"0.25"`.
pub fn is_valid_balance(amount: &str) -> bool {
    let mut parts = amount.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next();

    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    match fraction {
        None => digits(whole),
        Some(fraction) => digits(whole) && digits(fraction),
    }
}
