//! The reconciliation handler.
//!
//! [`BlockchainHandler`] owns the [`Store`] and is its only writer. Collaborators
//! and timers talk to it through its mailbox; lookups it starts itself run as
//! spawned tasks and report back as [`Event::Resolved`], tagged with the reset
//! epoch they were issued in. Every method that may start a lookup must be
//! called from inside a tokio runtime.

use crate::abstractions::{
    ChainReader, Fetch, MessageSink, PurchaseRequest, TimeProvider, WalletProvider,
};
use crate::address::normalize_address;
use crate::config::HandlerConfig;
use crate::dispatch::{ChangeCallback, Dispatcher, OutboundMessage, Snapshot};
use crate::events::{AccountUpdate, Epoch, Event, EventSender};
use crate::history::{HistoryClient, StoredTransaction};
use crate::inbound::{web3_response, InboundMessage};
use crate::store::Store;
use crate::timers::{AccountPoller, KeyExpiryWatcher};
use crate::transaction::{resolve_purchase_lock, NewTransaction};
use crate::types::{Key, LockPatch, Transaction, TransactionPatch, NATIVE_CURRENCY};
use crate::{SyncError, SyncResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Text the wallet puts in its error when a key purchase did not go through.
pub const KEY_PURCHASE_FAILURE: &str = "FAILED_TO_PURCHASE_KEY";

/// The services a handler is wired against.
#[derive(Clone)]
pub struct Collaborators {
    pub wallet: Arc<dyn WalletProvider>,
    pub chain: Arc<dyn ChainReader>,
    pub fetch: Arc<dyn Fetch>,
    pub sink: Arc<dyn MessageSink>,
    pub clock: Arc<dyn TimeProvider>,
    pub on_change: Option<ChangeCallback>,
}

pub struct BlockchainHandler {
    config: HandlerConfig,
    lock_addresses: Vec<String>,
    store: Store,
    /// Bumped by every account or network reset.
    epoch: Epoch,
    wallet: Arc<dyn WalletProvider>,
    chain: Arc<dyn ChainReader>,
    clock: Arc<dyn TimeProvider>,
    history: HistoryClient,
    dispatcher: Dispatcher,
    events: EventSender,
    mailbox: mpsc::UnboundedReceiver<Event>,
    poller: Option<AccountPoller>,
    expiry: KeyExpiryWatcher,
    stopped: bool,
}

impl BlockchainHandler {
    pub fn new(config: HandlerConfig, collaborators: Collaborators) -> SyncResult<Self> {
        config.validate()?;

        let lock_addresses = config.lock_addresses();
        let (tx, mailbox) = mpsc::unbounded_channel();
        let Collaborators {
            wallet,
            chain,
            fetch,
            sink,
            clock,
            on_change,
        } = collaborators;

        Ok(Self {
            store: Store::new(&lock_addresses, config.default_network),
            epoch: 0,
            history: HistoryClient::new(config.locksmith_host.clone(), fetch),
            dispatcher: Dispatcher::new(
                sink,
                on_change,
                lock_addresses.clone(),
                config.required_confirmations,
            ),
            events: EventSender::new(tx),
            mailbox,
            poller: None,
            expiry: KeyExpiryWatcher::new(config.key_expiry_skew()),
            stopped: false,
            lock_addresses,
            wallet,
            chain,
            clock,
            config,
        })
    }

    /// Handle for collaborators that push events.
    pub fn event_sender(&self) -> EventSender {
        self.events.clone()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(AccountPoller::is_running)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::from_store(&self.store, self.config.required_confirmations, self.clock.now())
    }

    /// Starts the account poller and the first full refresh.
    pub fn init(&mut self) {
        info!(
            "Starting blockchain handler for {} lock(s) on network {}",
            self.lock_addresses.len(),
            self.store.network
        );
        self.start_polling();
        self.retrieve_current_blockchain_data();
    }

    /// (Re)starts the account poller. It stops on its own once the wallet is no
    /// longer ready, so embedders call this again after the wallet reconnects.
    pub fn start_polling(&mut self) {
        self.stop_polling();
        self.poller = Some(AccountPoller::start(
            self.wallet.clone(),
            self.events.clone(),
            self.config.polling_interval(),
        ));
    }

    pub fn stop_polling(&mut self) {
        if let Some(mut poller) = self.poller.take() {
            poller.stop();
        }
    }

    /// Processes mailbox events until [`Event::Shutdown`] or until every sender
    /// is gone.
    pub async fn run(&mut self) {
        while !self.stopped {
            match self.mailbox.recv().await {
                Some(event) => self.handle_event(event),
                None => break,
            }
        }
    }

    /// Processes events until none arrives for `quiet`. Returns how many were
    /// handled.
    pub async fn run_until_idle(&mut self, quiet: Duration) -> usize {
        let mut handled = 0;
        while !self.stopped {
            match tokio::time::timeout(quiet, self.mailbox.recv()).await {
                Ok(Some(event)) => {
                    self.handle_event(event);
                    handled += 1;
                }
                Ok(None) | Err(_) => break,
            }
        }
        handled
    }

    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Resolved { epoch, event } => {
                if epoch != self.epoch {
                    debug!(
                        "Dropping stale {} from epoch {} (current {})",
                        event.name(),
                        epoch,
                        self.epoch
                    );
                    return;
                }
                self.handle_event(*event);
            }
            Event::AccountChanged(account) => self.on_account_changed(account),
            Event::NetworkChanged(network) => self.on_network_changed(network),
            Event::AccountUpdated { address, update } => self.on_account_updated(address, update),
            Event::KeyUpdated(key) => self.on_key_updated(key),
            Event::LockUpdated { address, update } => self.on_lock_updated(&address, update),
            Event::TransactionUpdated { hash, update } => self.on_transaction_updated(&hash, update),
            Event::TransactionNew(transaction) => self.on_transaction_new(transaction),
            Event::ProviderError(message) => self.on_provider_error(&message),
            Event::BalanceUpdated { currency, amount } => self.on_balance_updated(&currency, amount),
            Event::Failed(error) => self.dispatcher.emit_error(&error),
            Event::KeyExpired { lock } => {
                debug!("Key for {} expired", lock);
                self.dispatch();
            }
            Event::Inbound(message) => self.on_inbound(message),
            Event::Shutdown => self.shutdown(),
        }
    }

    /// Full refresh. Without an account the store is reset and dispatched right
    /// away; with one, lock, key, balance and history lookups are started and
    /// their results converge the store as they arrive.
    pub fn retrieve_current_blockchain_data(&mut self) {
        self.backfill_keys();
        match self.store.account.clone() {
            None => {
                self.reset();
                self.dispatch();
            }
            Some(account) => self.request_chain_data(&account),
        }
    }

    /// Reads the account's stored transactions from the backend and looks each
    /// one up on chain. Does nothing without an account.
    pub fn retrieve_transactions(&self) {
        let Some(account) = self.store.account.clone() else {
            return;
        };

        let history = self.history.clone();
        let chain = self.chain.clone();
        let events = self.events.clone();
        let epoch = self.epoch;
        let network = self.store.network;
        let locks = self.lock_addresses.clone();

        tokio::spawn(async move {
            let records = match history.fetch_transactions(&account, &locks).await {
                Ok(records) => records,
                Err(e) => {
                    events.resolved(epoch, Event::Failed(e));
                    return;
                }
            };

            let lookups = records
                .into_iter()
                .filter(|record| record.chain == network)
                .map(|record| {
                    let chain = chain.clone();
                    let events = events.clone();
                    async move {
                        let defaults = record.lookup_defaults();
                        let hash = record.transaction_hash;
                        let event = match chain.get_transaction(&hash, defaults).await {
                            Ok(update) => Event::TransactionUpdated { hash, update },
                            Err(e) => Event::Failed(e),
                        };
                        events.resolved(epoch, event);
                    }
                });
            futures::future::join_all(lookups).await;
        });
    }

    /// Persists a new transaction so it can be recovered after a reload. Does
    /// nothing without an account; a failed write is only logged.
    pub fn store_transaction(&self, transaction: &Transaction) {
        let Some(account) = self.store.account.as_deref() else {
            return;
        };

        let payload = StoredTransaction::for_purchase(transaction, account, self.store.network);
        let history = self.history.clone();
        tokio::spawn(async move {
            if let Err(e) = history.store_transaction(&payload).await {
                warn!("Could not store transaction {}: {}", payload.transaction_hash, e);
            }
        });
    }

    /// Schedules a re-dispatch for when the key on `lock` expires, replacing
    /// any earlier wake-up for that lock.
    pub fn send_data_when_key_expires(&mut self, lock: &str, expiration: u64) -> bool {
        self.expiry
            .schedule(lock, expiration, self.clock.now_ms(), &self.events)
    }

    /// Asks the wallet to buy a key on `lock` for the current account.
    pub fn purchase_key(&self, lock: &str) -> SyncResult<()> {
        let account = self
            .store
            .account
            .clone()
            .ok_or_else(|| SyncError::InvalidPurchase("no account".into()))?;
        if normalize_address(lock) != lock {
            return Err(SyncError::InvalidPurchase(format!(
                "lock address {} is not normalized",
                lock
            )));
        }
        if !self.config.locks.contains_key(lock) {
            return Err(SyncError::InvalidPurchase(format!(
                "lock {} is not configured",
                lock
            )));
        }
        let record = self
            .store
            .locks
            .get(lock)
            .ok_or_else(|| SyncError::InvalidPurchase(format!("lock {} is not loaded", lock)))?;
        let key_price = record.key_price.clone().ok_or_else(|| {
            SyncError::InvalidPurchase(format!("lock {} has no key price", lock))
        })?;

        let request = PurchaseRequest {
            lock: lock.to_string(),
            owner: account,
            key_price,
            currency_contract_address: record.currency_contract_address.clone(),
        };
        info!("Purchasing key on {}", lock);

        let wallet = self.wallet.clone();
        let events = self.events.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            if let Err(e) = wallet.purchase_key(request).await {
                events.resolved(
                    epoch,
                    Event::ProviderError(format!("{}: {}", KEY_PURCHASE_FAILURE, e)),
                );
            }
        });
        Ok(())
    }

    fn dispatch(&self) {
        self.dispatcher.dispatch(&self.store, self.clock.now());
    }

    /// Invalidates everything tied to the previous account or network. Lookups
    /// still in flight belong to the old epoch and are dropped on arrival.
    fn reset(&mut self) {
        self.epoch += 1;
        self.expiry.cancel_all();
        self.store.reset(&self.lock_addresses);
        debug!("Store reset, epoch {}", self.epoch);
    }

    /// Gives every configured lock without a key the default one.
    fn backfill_keys(&mut self) {
        let added = self.store.backfill_keys(&self.lock_addresses);
        if added > 0 {
            debug!("Backfilled default keys for {} lock(s)", added);
        }
    }

    /// Reset followed by exactly one dispatch.
    fn reset_and_refresh(&mut self) {
        self.reset();
        if let Some(account) = self.store.account.clone() {
            self.request_chain_data(&account);
        }
        self.dispatch();
    }

    fn request_chain_data(&self, account: &str) {
        info!("Refreshing chain data for {}", account);

        for lock in self.lock_addresses.clone() {
            let chain = self.chain.clone();
            let address = lock.clone();
            self.spawn_lookup("get_lock", async move {
                let update = chain.get_lock(&address).await?;
                Ok::<_, SyncError>(Event::LockUpdated { address, update })
            });
            self.request_key(&lock, account);
        }

        let currencies = self.config.configured_currencies();
        if currencies.is_empty() {
            self.request_balance(NATIVE_CURRENCY, account);
        }
        for token in currencies {
            self.request_balance(&token, account);
        }

        self.retrieve_transactions();
    }

    fn request_key(&self, lock: &str, owner: &str) {
        let chain = self.chain.clone();
        let lock = lock.to_string();
        let owner = owner.to_string();
        self.spawn_lookup("get_key_by_lock_for_owner", async move {
            let key = chain.get_key_by_lock_for_owner(&lock, &owner).await?;
            Ok::<_, SyncError>(Event::KeyUpdated(key))
        });
    }

    fn request_balance(&self, currency: &str, account: &str) {
        let chain = self.chain.clone();
        let currency = currency.to_string();
        let account = account.to_string();
        self.spawn_lookup("balance", async move {
            let amount = if currency == NATIVE_CURRENCY {
                chain.get_balance(&account).await?
            } else {
                chain.get_token_balance(&currency, &account).await?
            };
            Ok::<_, SyncError>(Event::BalanceUpdated { currency, amount })
        });
    }

    fn request_transaction(&self, hash: &str, defaults: Option<TransactionPatch>) {
        let chain = self.chain.clone();
        let hash = hash.to_string();
        self.spawn_lookup("get_transaction", async move {
            let update = chain.get_transaction(&hash, defaults).await?;
            Ok::<_, SyncError>(Event::TransactionUpdated { hash, update })
        });
    }

    /// Runs `lookup` in the background and mails its outcome back tagged with
    /// the current epoch. Failures become [`Event::Failed`].
    fn spawn_lookup<F>(&self, name: &'static str, lookup: F)
    where
        F: Future<Output = SyncResult<Event>> + Send + 'static,
    {
        let events = self.events.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let event = match lookup.await {
                Ok(event) => event,
                Err(e) => {
                    debug!("{} failed: {}", name, e);
                    Event::Failed(e)
                }
            };
            events.resolved(epoch, event);
        });
    }

    fn on_account_changed(&mut self, account: Option<String>) {
        let account = account.map(|a| normalize_address(&a));
        if account == self.store.account {
            return;
        }
        info!("Account changed to {:?}", account);
        self.store.account = account;
        self.reset_and_refresh();
    }

    fn on_network_changed(&mut self, network: u64) {
        if network == self.store.network {
            return;
        }
        info!("Network changed to {}", network);
        self.store.network = network;
        self.reset_and_refresh();
    }

    fn on_account_updated(&mut self, address: Option<String>, update: AccountUpdate) {
        let address = address.map(|a| normalize_address(&a));
        if address.is_none() || address != self.store.account {
            debug!("Ignoring update for account {:?}", address);
            return;
        }
        if let Some(balance) = update.balance {
            self.apply_balance(NATIVE_CURRENCY, balance);
        }
    }

    fn on_balance_updated(&mut self, currency: &str, amount: String) {
        self.apply_balance(currency, amount);
    }

    fn apply_balance(&mut self, currency: &str, amount: String) {
        match self.store.set_balance(currency, amount) {
            Ok(true) => self.dispatch(),
            Ok(false) => debug!("Balance for {} unchanged", currency),
            Err(e) => self.dispatcher.emit_error(&e),
        }
    }

    fn on_key_updated(&mut self, key: Key) {
        let expiration = key.expiration;
        let lock = self.store.set_key(key);
        self.backfill_keys();
        self.dispatch();
        self.send_data_when_key_expires(&lock, expiration);
    }

    fn on_lock_updated(&mut self, address: &str, update: LockPatch) {
        let address = normalize_address(address);
        let token = update
            .currency_contract_address
            .as_deref()
            .filter(|token| !token.is_empty())
            .map(normalize_address);
        let configured_name = self.config.lock_name(&address).map(str::to_string);

        self.store
            .merge_lock(&address, update, configured_name.as_deref());
        self.dispatch();

        if let (Some(token), Some(account)) = (token, self.store.account.clone()) {
            self.request_balance(&token, &account);
        }
    }

    fn on_transaction_updated(&mut self, hash: &str, update: TransactionPatch) {
        let purchase_lock = resolve_purchase_lock(self.store.transactions.get(hash), &update);
        let is_purchase = self.store.merge_transaction(hash, update).is_key_purchase();
        self.dispatch();

        if !is_purchase {
            return;
        }
        match (purchase_lock, self.store.account.clone()) {
            (Some(lock), Some(account)) => self.request_key(&lock, &account),
            (None, _) => debug!("Key purchase {} names no lock", hash),
            (_, None) => {}
        }
    }

    fn on_transaction_new(&mut self, transaction: NewTransaction) {
        let transaction = transaction.into_transaction(self.store.network);
        let hash = transaction.hash.clone();
        debug!("New transaction {}", hash);

        self.store_transaction(&transaction);
        self.store.insert_transaction(transaction);
        self.dispatch();
        self.request_transaction(&hash, None);
    }

    fn on_provider_error(&mut self, message: &str) {
        if !message.contains(KEY_PURCHASE_FAILURE) {
            self.dispatcher.emit_error_message(message);
            return;
        }

        self.dispatcher.emit_error(&SyncError::PurchaseFailed);
        let dropped = self.store.drop_submitted();
        info!("Key purchase failed, dropped {} submitted transaction(s)", dropped);
        if self.store.account.is_some() {
            self.dispatch();
        }
        self.retrieve_current_blockchain_data();
    }

    fn on_inbound(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::SendUpdates(kind) => {
                self.dispatcher.send_update(kind, &self.store, self.clock.now())
            }
            InboundMessage::PurchaseKey { lock } => {
                if let Err(e) = self.purchase_key(&lock) {
                    self.dispatcher.emit_error(&e);
                }
            }
            InboundMessage::InitiatedTransaction => self.retrieve_transactions(),
            InboundMessage::Web3Call(call) => {
                let response = web3_response(&call, self.store.account.as_deref(), self.store.network);
                self.dispatcher.post(OutboundMessage::Web3Result(response));
            }
        }
    }

    fn shutdown(&mut self) {
        info!("Stopping blockchain handler");
        self.stopped = true;
        self.stop_polling();
        self.expiry.cancel_all();
    }
}
