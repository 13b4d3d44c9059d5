//! Default keys and key status derivation.

use crate::types::{Key, KeyMap, Transaction, TransactionStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Builds the "no data yet" key for every lock address.
///
/// Addresses must already be normalized. The result has exactly one entry per
/// address, each with `expiration == 0`.
///
/// # Example
///
/// ```
/// use paywall_sync::make_default_keys;
/// let locks = vec!["0xaaa".to_string(), "0xbbb".to_string()];
/// let keys = make_default_keys(&locks, None);
/// assert_eq!(keys.len(), 2);
/// assert_eq!(keys["0xaaa"].expiration, 0);
/// ```
pub fn make_default_keys(lock_addresses: &[String], owner: Option<&str>) -> KeyMap {
    lock_addresses
        .iter()
        .map(|address| {
            (
                address.clone(),
                Key {
                    lock: address.clone(),
                    owner: owner.map(str::to_string),
                    expiration: 0,
                },
            )
        })
        .collect()
}

/// Inserts a default key for every lock address missing from `keys`.
/// Returns the number of keys added.
pub fn backfill_keys(keys: &mut KeyMap, lock_addresses: &[String], owner: Option<&str>) -> usize {
    let mut added = 0;
    for (address, key) in make_default_keys(lock_addresses, owner) {
        if !keys.contains_key(&address) {
            keys.insert(address, key);
            added += 1;
        }
    }
    added
}

/// What the UI should show for one lock's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    None,
    Submitted,
    Pending,
    Confirming,
    Valid,
    Expired,
    Failed,
}

/// Derives a key's status from the key itself and the most recent purchase
/// transaction for its lock.
///
/// A purchase in flight wins over the key, since the key lookup lags the
/// transaction. Once the purchase has `required_confirmations` the key decides.
pub fn key_status(
    key: &Key,
    purchase: Option<&Transaction>,
    required_confirmations: u64,
    now: u64,
) -> KeyStatus {
    if let Some(tx) = purchase {
        match tx.status {
            TransactionStatus::Submitted => return KeyStatus::Submitted,
            TransactionStatus::Pending => return KeyStatus::Pending,
            TransactionStatus::Failed => return KeyStatus::Failed,
            TransactionStatus::Mined if tx.confirmations < required_confirmations => {
                return KeyStatus::Confirming
            }
            TransactionStatus::Mined | TransactionStatus::Confirmed => {}
        }
    }

    if key.is_unexpired(now) {
        KeyStatus::Valid
    } else if key.expiration == 0 {
        KeyStatus::None
    } else {
        KeyStatus::Expired
    }
}

/// Most recent key purchase aimed at `lock`. Unmined purchases carry the
/// largest block number and therefore count as most recent.
pub fn latest_purchase<'a, I>(transactions: I, lock: &str) -> Option<&'a Transaction>
where
    I: IntoIterator<Item = &'a Transaction>,
{
    transactions
        .into_iter()
        .filter(|tx| tx.is_key_purchase() && tx.recipient() == Some(lock))
        .max_by(|a, b| a.block_number.cmp(&b.block_number).then_with(|| a.hash.cmp(&b.hash)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaywallStatus {
    /// Some configured lock has an unexpired key; carries those lock addresses.
    Unlocked(Vec<String>),
    /// Every configured lock has a key confirmed by the chain and none is valid.
    Locked,
    /// Not enough chain data yet to tell.
    Undetermined,
}

/// Decides whether the page is locked.
///
/// `resolved` holds the locks whose key came from the chain rather than the
/// default factory.
pub fn paywall_status(
    keys: &KeyMap,
    lock_addresses: &[String],
    resolved: &HashSet<String>,
    now: u64,
) -> PaywallStatus {
    if lock_addresses.is_empty() {
        return PaywallStatus::Undetermined;
    }

    let mut unlocked: Vec<String> = lock_addresses
        .iter()
        .filter(|address| keys.get(*address).is_some_and(|key| key.is_unexpired(now)))
        .cloned()
        .collect();
    if !unlocked.is_empty() {
        unlocked.sort();
        return PaywallStatus::Unlocked(unlocked);
    }

    if lock_addresses.iter().all(|address| resolved.contains(address)) {
        PaywallStatus::Locked
    } else {
        PaywallStatus::Undetermined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TransactionType, UNMINED_BLOCK_NUMBER};
    use serde_json::Map;

    fn locks() -> Vec<String> {
        vec!["0xl0".to_string(), "0xl1".to_string(), "0xl2".to_string()]
    }

    fn purchase(hash: &str, lock: &str, status: TransactionStatus, block: u64, confirmations: u64) -> Transaction {
        Transaction {
            hash: hash.to_string(),
            status,
            kind: Some(TransactionType::KeyPurchase),
            block_number: block,
            confirmations,
            lock: Some(lock.to_string()),
            to: Some(lock.to_string()),
            from: None,
            beneficiary: None,
            input: None,
            network: None,
            key: None,
            extra: Map::new(),
        }
    }

    #[test]
    fn test_default_keys_are_pure() {
        let first = make_default_keys(&locks(), Some("0xowner"));
        let second = make_default_keys(&locks(), Some("0xowner"));
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        for address in locks() {
            let key = &first[&address];
            assert_eq!(key.lock, address);
            assert_eq!(key.owner.as_deref(), Some("0xowner"));
            assert_eq!(key.expiration, 0);
        }
    }

    #[test]
    fn test_backfill_only_adds_missing() {
        let mut keys = KeyMap::new();
        keys.insert(
            "0xl1".into(),
            Key { lock: "0xl1".into(), owner: Some("0xowner".into()), expiration: 500 },
        );

        let added = backfill_keys(&mut keys, &locks(), Some("0xowner"));
        assert_eq!(added, 2);
        assert_eq!(keys.len(), 3);
        assert_eq!(keys["0xl1"].expiration, 500);
    }

    #[test]
    fn test_key_status_without_purchase() {
        let mut key = Key { lock: "0xl0".into(), owner: None, expiration: 0 };
        assert_eq!(key_status(&key, None, 3, 1000), KeyStatus::None);

        key.expiration = 2000;
        assert_eq!(key_status(&key, None, 3, 1000), KeyStatus::Valid);

        key.expiration = 500;
        assert_eq!(key_status(&key, None, 3, 1000), KeyStatus::Expired);
    }

    #[test]
    fn test_key_status_follows_purchase() {
        let key = Key { lock: "0xl0".into(), owner: None, expiration: 0 };

        let tx = purchase("0x1", "0xl0", TransactionStatus::Pending, UNMINED_BLOCK_NUMBER, 0);
        assert_eq!(key_status(&key, Some(&tx), 3, 1000), KeyStatus::Pending);

        let tx = purchase("0x1", "0xl0", TransactionStatus::Mined, 10, 1);
        assert_eq!(key_status(&key, Some(&tx), 3, 1000), KeyStatus::Confirming);

        let valid = Key { expiration: 5000, ..key };
        let tx = purchase("0x1", "0xl0", TransactionStatus::Mined, 10, 3);
        assert_eq!(key_status(&valid, Some(&tx), 3, 1000), KeyStatus::Valid);
    }

    #[test]
    fn test_latest_purchase_prefers_unmined() {
        let mined = purchase("0x1", "0xl0", TransactionStatus::Mined, 10, 5);
        let pending = purchase("0x2", "0xl0", TransactionStatus::Submitted, UNMINED_BLOCK_NUMBER, 0);
        let other = purchase("0x3", "0xl1", TransactionStatus::Submitted, UNMINED_BLOCK_NUMBER, 0);

        let txs = [mined, pending, other];
        assert_eq!(latest_purchase(txs.iter(), "0xl0").map(|t| t.hash.as_str()), Some("0x2"));
        assert!(latest_purchase(txs.iter(), "0xl2").is_none());
    }

    #[test]
    fn test_paywall_status() {
        let now = 1000;
        let mut keys = make_default_keys(&locks(), Some("0xowner"));
        let mut resolved = HashSet::new();

        assert_eq!(paywall_status(&keys, &locks(), &resolved, now), PaywallStatus::Undetermined);

        resolved.extend(locks());
        assert_eq!(paywall_status(&keys, &locks(), &resolved, now), PaywallStatus::Locked);

        keys.get_mut("0xl2").unwrap().expiration = 2000;
        assert_eq!(
            paywall_status(&keys, &locks(), &resolved, now),
            PaywallStatus::Unlocked(vec!["0xl2".to_string()])
        );

        assert_eq!(paywall_status(&keys, &[], &resolved, now), PaywallStatus::Undetermined);
    }
}
