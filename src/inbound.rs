//! Requests arriving from the UI context.
//!
//! Messages have the shape `{ "type": <string>, "payload": <value> }`. Anything
//! that does not match structurally is dropped without a reply: a malformed
//! message comes from a sender that does not follow the protocol, not from a
//! user action that needs an error.

use crate::address::to_checksum_address;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Section of the snapshot the UI asks to have re-sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Locks,
    Account,
    Balance,
    Network,
}

/// A JSON-RPC call proxied from the page's web3 shim.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    SendUpdates(UpdateKind),
    PurchaseKey { lock: String },
    /// A purchase was started elsewhere; re-read the transaction history.
    InitiatedTransaction,
    Web3Call(MethodCall),
}

impl InboundMessage {
    /// Parses a raw message, returning `None` for anything malformed.
    pub fn parse(message: &Value) -> Option<Self> {
        let object = message.as_object()?;
        let kind = object.get("type")?.as_str()?;
        let payload = object.get("payload")?;

        match kind {
            "sendUpdates" => serde_json::from_value(payload.clone())
                .ok()
                .map(InboundMessage::SendUpdates),
            "purchaseKey" => {
                let lock = payload.get("lock")?.as_str()?;
                Some(InboundMessage::PurchaseKey {
                    lock: lock.to_string(),
                })
            }
            "initiatedTransaction" => Some(InboundMessage::InitiatedTransaction),
            "web3Call" => validate_method_call(payload).map(InboundMessage::Web3Call),
            _ => None,
        }
    }
}

/// Checks a JSON-RPC call: a non-empty string method, a params array and an
/// integer id.
pub fn validate_method_call(payload: &Value) -> Option<MethodCall> {
    let object = payload.as_object()?;
    let method = object.get("method")?.as_str().filter(|m| !m.is_empty())?;
    let params = object.get("params")?.as_array()?;
    let id = object.get("id")?.as_u64()?;

    Some(MethodCall {
        method: method.to_string(),
        params: params.clone(),
        id,
    })
}

/// Answers the two calls the proxy supports from the current store values.
pub fn web3_response(call: &MethodCall, account: Option<&str>, network: u64) -> Value {
    match call.method.as_str() {
        "eth_accounts" => {
            let accounts: Vec<String> = account
                .map(|a| to_checksum_address(a).unwrap_or_else(|| a.to_string()))
                .into_iter()
                .collect();
            json!({ "id": call.id, "jsonrpc": "2.0", "result": accounts })
        }
        "net_version" => json!({ "id": call.id, "jsonrpc": "2.0", "result": network.to_string() }),
        other => json!({
            "id": call.id,
            "jsonrpc": "2.0",
            "error": format!("\"{}\" is not supported", other),
        }),
    }
}
