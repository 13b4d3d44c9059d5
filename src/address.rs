//! Chain address helpers.

use sha3::{Digest, Keccak256};
use std::collections::HashMap;

/// Converts an address to the form used for every map key in the store.
///
/// Lower-casing is idempotent, so values that are already normalized pass through
/// unchanged.
///
/// # Example
///
/// ```
/// use paywall_sync::normalize_address;
/// let lock = normalize_address("0xAbCdEf0000000000000000000000000000000001");
/// assert_eq!(lock, "0xabcdef0000000000000000000000000000000001");
/// assert_eq!(normalize_address(&lock), lock);
/// ```
pub fn normalize_address(address: &str) -> String {
    address.to_ascii_lowercase()
}

/// Re-keys a map by normalized address. Later entries win when two keys collide
/// after normalization.
pub fn normalize_address_keys<V>(map: HashMap<String, V>) -> HashMap<String, V> {
    map.into_iter()
        .map(|(address, value)| (normalize_address(&address), value))
        .collect()
}

/// True for a `0x`-prefixed, 20-byte hex address in any casing.
pub fn is_address(value: &str) -> bool {
    let Some(body) = value.strip_prefix("0x") else {
        return false;
    };
    body.len() == 40 && hex::decode(body).is_ok()
}

/// EIP-55 mixed-case form of an address, used when handing the account back to
/// web3 callers. Returns `None` for strings that are not addresses.
pub fn to_checksum_address(address: &str) -> Option<String> {
    if !is_address(address) {
        return None;
    }
    let lower = normalize_address(&address[2..]);
    let hash = Keccak256::digest(lower.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let byte = hash[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    Some(out)
}
