//! Account polling and key expiry wake-ups.
//!
//! Both timers run as tokio tasks whose `JoinHandle` is kept by the owner and
//! aborted before anything replaces them.

use crate::abstractions::WalletProvider;
use crate::events::{Event, EventSender};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Asks the wallet for its account every `interval` while the wallet is ready
/// and has a provider attached. The first check runs immediately.
pub struct AccountPoller {
    handle: Option<JoinHandle<()>>,
}

impl AccountPoller {
    pub fn start(wallet: Arc<dyn WalletProvider>, events: EventSender, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                if !wallet.is_ready() || !wallet.has_provider() {
                    debug!("Wallet provider unavailable, account polling stopped");
                    break;
                }

                let event = match wallet.get_account().await {
                    Ok(account) => Event::AccountChanged(account),
                    Err(e) => Event::Failed(e),
                };
                if !events.send(event) {
                    break;
                }

                tokio::time::sleep(interval).await;
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for AccountPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One pending wake-up per lock, fired `skew` after the key expires.
pub struct KeyExpiryWatcher {
    skew: Duration,
    timers: HashMap<String, JoinHandle<()>>,
}

impl KeyExpiryWatcher {
    pub fn new(skew: Duration) -> Self {
        Self {
            skew,
            timers: HashMap::new(),
        }
    }

    /// Replaces the lock's pending wake-up. Nothing is scheduled for a key that
    /// does not exist yet (`expiration == 0`) or has already expired.
    ///
    /// Returns whether a timer was started.
    pub fn schedule(&mut self, lock: &str, expiration: u64, now_ms: u64, events: &EventSender) -> bool {
        self.cancel(lock);
        self.timers.retain(|_, handle| !handle.is_finished());

        if expiration == 0 {
            return false;
        }
        let expires_at_ms = expiration.saturating_mul(1000);
        if expires_at_ms <= now_ms {
            return false;
        }

        let delay = Duration::from_millis(expires_at_ms - now_ms) + self.skew;
        let events = events.clone();
        let lock_address = lock.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            events.send(Event::KeyExpired { lock: lock_address });
        });

        debug!("Key for {} expires in {:?}", lock, delay);
        self.timers.insert(lock.to_string(), handle);
        true
    }

    pub fn cancel(&mut self, lock: &str) {
        if let Some(handle) = self.timers.remove(lock) {
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }

    /// Number of wake-ups that have not fired yet.
    pub fn pending(&self) -> usize {
        self.timers.values().filter(|h| !h.is_finished()).count()
    }
}

impl Drop for KeyExpiryWatcher {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
