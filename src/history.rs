//! Transaction history kept by the backend, so pending purchases survive a reload.

use crate::abstractions::Fetch;
use crate::types::{Transaction, TransactionPatch};
use crate::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One row returned by `GET transactions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub transaction_hash: String,
    pub chain: u64,
    pub recipient: String,
    pub sender: String,
    #[serde(rename = "for", default)]
    pub beneficiary: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    transactions: Option<Vec<HistoryRecord>>,
}

/// Body of `POST transaction`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTransaction {
    pub transaction_hash: String,
    pub sender: String,
    #[serde(rename = "for")]
    pub beneficiary: String,
    pub recipient: String,
    pub data: Option<String>,
    pub chain: u64,
}

impl HistoryRecord {
    /// Fields the chain lookup should start from. Only records with input data
    /// carry enough to decode the transaction, so others get no defaults.
    pub fn lookup_defaults(&self) -> Option<TransactionPatch> {
        self.data.as_ref()?;
        Some(TransactionPatch {
            to: Some(self.recipient.clone()),
            from: Some(self.sender.clone()),
            beneficiary: self.beneficiary.clone(),
            input: self.data.clone(),
            network: Some(self.chain),
            ..Default::default()
        })
    }
}

impl StoredTransaction {
    /// Payload for a purchase made by `account`, who paid and receives the key.
    pub fn for_purchase(transaction: &Transaction, account: &str, network: u64) -> Self {
        Self {
            transaction_hash: transaction.hash.clone(),
            sender: account.to_string(),
            beneficiary: account.to_string(),
            recipient: transaction.recipient().unwrap_or_default().to_string(),
            data: transaction.input.clone(),
            chain: network,
        }
    }
}

#[derive(Clone)]
pub struct HistoryClient {
    host: String,
    fetch: Arc<dyn Fetch>,
}

impl HistoryClient {
    pub fn new(host: impl Into<String>, fetch: Arc<dyn Fetch>) -> Self {
        Self {
            host: host.into().trim_end_matches('/').to_string(),
            fetch,
        }
    }

    /// `GET` URL for the account's transactions to any of `locks`.
    pub fn transactions_url(&self, account: &str, locks: &[String]) -> String {
        let mut url = format!("{}/transactions?for={}", self.host, urlencoding::encode(account));
        for lock in locks {
            url.push_str("&recipient[]=");
            url.push_str(&urlencoding::encode(lock));
        }
        url
    }

    pub fn store_url(&self) -> String {
        format!("{}/transaction", self.host)
    }

    /// Fetches stored records. A transport failure or a body without a
    /// `transactions` array is an error, not an empty history.
    pub async fn fetch_transactions(&self, account: &str, locks: &[String]) -> SyncResult<Vec<HistoryRecord>> {
        let url = self.transactions_url(account, locks);
        let body = self
            .fetch
            .get(&url)
            .await
            .map_err(|e| SyncError::History(format!("Failed to fetch transactions: {}", e)))?;

        let response: HistoryResponse = serde_json::from_slice(&body)
            .map_err(|e| SyncError::History(format!("Malformed transactions response: {}", e)))?;
        response
            .transactions
            .ok_or_else(|| SyncError::History("Response has no transactions".into()))
    }

    pub async fn store_transaction(&self, payload: &StoredTransaction) -> SyncResult<()> {
        let body = serde_json::to_vec(payload)?;
        self.fetch
            .post(&self.store_url(), body)
            .await
            .map_err(|e| SyncError::History(format!("Failed to store transaction: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockFetch;
    use serde_json::json;

    fn client(fetch: &Arc<MockFetch>) -> HistoryClient {
        HistoryClient::new("https://locksmith.test/", fetch.clone())
    }

    #[test]
    fn test_transactions_url() {
        let fetch = Arc::new(MockFetch::new());
        let url = client(&fetch).transactions_url("0xme", &["0xl0".to_string(), "0xl1".to_string()]);
        assert_eq!(
            url,
            "https://locksmith.test/transactions?for=0xme&recipient[]=0xl0&recipient[]=0xl1"
        );
    }

    #[tokio::test]
    async fn test_fetch_transactions() {
        let fetch = Arc::new(MockFetch::new());
        fetch.respond_get(
            "https://locksmith.test/transactions",
            json!({
                "transactions": [{
                    "transactionHash": "0xhash",
                    "chain": 1984,
                    "recipient": "0xl0",
                    "sender": "0xme",
                    "for": "0xme",
                    "data": "0xinput",
                    "createdAt": "2019-08-01T00:00:00.000Z"
                }]
            })
            .to_string(),
        );

        let records = client(&fetch).fetch_transactions("0xme", &["0xl0".to_string()]).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].transaction_hash, "0xhash");
        assert_eq!(records[0].chain, 1984);

        let defaults = records[0].lookup_defaults().unwrap();
        assert_eq!(defaults.input.as_deref(), Some("0xinput"));
        assert_eq!(defaults.to.as_deref(), Some("0xl0"));
    }

    #[tokio::test]
    async fn test_fetch_failures_are_errors() {
        let fetch = Arc::new(MockFetch::new());
        let history = client(&fetch);
        let locks = vec!["0xl0".to_string()];

        // no response registered
        assert!(matches!(history.fetch_transactions("0xme", &locks).await, Err(SyncError::History(_))));

        fetch.respond_get("https://locksmith.test/transactions", "{}".to_string());
        assert!(matches!(history.fetch_transactions("0xme", &locks).await, Err(SyncError::History(_))));

        fetch.respond_get("https://locksmith.test/transactions", "<html>".to_string());
        assert!(matches!(history.fetch_transactions("0xme", &locks).await, Err(SyncError::History(_))));
    }

    #[test]
    fn test_records_without_input_have_no_defaults() {
        let record = HistoryRecord {
            transaction_hash: "0xhash".into(),
            chain: 1,
            recipient: "0xl0".into(),
            sender: "0xme".into(),
            beneficiary: None,
            data: None,
            created_at: None,
        };
        assert!(record.lookup_defaults().is_none());
    }

    #[tokio::test]
    async fn test_store_transaction_posts_payload() {
        let fetch = Arc::new(MockFetch::new());
        let payload = StoredTransaction {
            transaction_hash: "0xhash".into(),
            sender: "0xme".into(),
            beneficiary: "0xme".into(),
            recipient: "0xl0".into(),
            data: Some("0xinput".into()),
            chain: 1,
        };
        client(&fetch).store_transaction(&payload).await.unwrap();

        let posts = fetch.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "https://locksmith.test/transaction");
        let body: serde_json::Value = serde_json::from_slice(&posts[0].1).unwrap();
        assert_eq!(body["transactionHash"], "0xhash");
        assert_eq!(body["for"], "0xme");
        assert_eq!(body["chain"], 1);
    }
}
