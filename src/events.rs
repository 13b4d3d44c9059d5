//! Everything that can change the store arrives as an [`Event`].

use crate::inbound::InboundMessage;
use crate::transaction::NewTransaction;
use crate::types::{Key, LockPatch, TransactionPatch};
use crate::SyncError;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Counter bumped by every account or network reset. Lookups carry the value
/// current when they were issued so late answers can be recognised.
pub type Epoch = u64;

/// Balance change reported by the wallet for some address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUpdate {
    /// Native currency balance
    pub balance: Option<String>,
}

#[derive(Debug)]
pub enum Event {
    /// `account.changed`: the wallet switched accounts (or disconnected).
    AccountChanged(Option<String>),
    /// `network.changed`
    NetworkChanged(u64),
    /// `account.updated`
    AccountUpdated {
        address: Option<String>,
        update: AccountUpdate,
    },
    /// `key.updated`
    KeyUpdated(Key),
    /// `lock.updated`
    LockUpdated { address: String, update: LockPatch },
    /// `transaction.updated`
    TransactionUpdated {
        hash: String,
        update: TransactionPatch,
    },
    /// `transaction.new`
    TransactionNew(NewTransaction),
    /// `error` from the wallet, carrying its message text.
    ProviderError(String),
    /// Answer to a balance lookup.
    BalanceUpdated { currency: String, amount: String },
    /// A collaborator call failed; goes to the error channel.
    Failed(SyncError),
    /// A key's expiry timer fired.
    KeyExpired { lock: String },
    /// Request from the UI context.
    Inbound(InboundMessage),
    /// Result of a lookup issued during `epoch`.
    Resolved { epoch: Epoch, event: Box<Event> },
    /// Stops timers and ends [`BlockchainHandler::run`](crate::BlockchainHandler::run).
    Shutdown,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::AccountChanged(_) => "account.changed",
            Event::NetworkChanged(_) => "network.changed",
            Event::AccountUpdated { .. } => "account.updated",
            Event::KeyUpdated(_) => "key.updated",
            Event::LockUpdated { .. } => "lock.updated",
            Event::TransactionUpdated { .. } => "transaction.updated",
            Event::TransactionNew(_) => "transaction.new",
            Event::ProviderError(_) => "error",
            Event::BalanceUpdated { .. } => "balance.updated",
            Event::Failed(_) => "lookup.failed",
            Event::KeyExpired { .. } => "key.expired",
            Event::Inbound(_) => "inbound",
            Event::Resolved { event, .. } => event.name(),
            Event::Shutdown => "shutdown",
        }
    }
}

/// Handle for pushing events into a handler's mailbox.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    /// Returns false once the handler is gone.
    pub fn send(&self, event: Event) -> bool {
        let name = event.name();
        if self.tx.send(event).is_err() {
            debug!("Handler mailbox closed, dropping {}", name);
            return false;
        }
        true
    }

    /// Sends the result of a lookup issued during `epoch`.
    pub fn resolved(&self, epoch: Epoch, event: Event) -> bool {
        self.send(Event::Resolved {
            epoch,
            event: Box::new(event),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sender_delivers_and_detects_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = EventSender::new(tx);

        assert!(sender.resolved(3, Event::NetworkChanged(4)));
        match rx.recv().await {
            Some(Event::Resolved { epoch, event }) => {
                assert_eq!(epoch, 3);
                assert_eq!(event.name(), "network.changed");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        drop(rx);
        assert!(sender.is_closed());
        assert!(!sender.send(Event::Shutdown));
    }
}
