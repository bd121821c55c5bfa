use ethers_core::types::{Address, U256};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::models::ChatId;

/// Interest criteria of one subscriber. A stored entry always has at least one field set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserSubs {
    pub large_tx_min_wei: Option<U256>,
    pub wallet: Option<Address>,
}

impl UserSubs {
    pub fn is_empty(&self) -> bool {
        self.large_tx_min_wei.is_none() && self.wallet.is_none()
    }

    fn matches(&self, sender: Address, receiver: Option<Address>, value_wei: U256) -> bool {
        if let Some(min) = self.large_tx_min_wei {
            if !value_wei.is_zero() && value_wei >= min {
                return true;
            }
        }
        match self.wallet {
            Some(wallet) => sender == wallet || receiver == Some(wallet),
            None => false,
        }
    }
}

/// In-memory registry of subscriber interests, shared between the watcher
/// and whatever manages subscriptions.
#[derive(Debug, Default)]
pub struct SubscriptionStore {
    data: RwLock<HashMap<ChatId, UserSubs>>,
}

impl SubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Every write is a whole-entry replacement, so a poisoned lock still guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<ChatId, UserSubs>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ChatId, UserSubs>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `change` to the subscriber's entry (created if absent) and drops
    /// the entry when no criterion is left.
    fn update<F>(&self, chat_id: ChatId, change: F)
    where
        F: FnOnce(&mut UserSubs),
    {
        let mut data = self.write();
        let mut subs = data.get(&chat_id).cloned().unwrap_or_default();
        change(&mut subs);
        if subs.is_empty() {
            data.remove(&chat_id);
        } else {
            data.insert(chat_id, subs);
        }
    }

    pub fn set_large_tx_min(&self, chat_id: ChatId, min_wei: Option<U256>) {
        self.update(chat_id, |subs| subs.large_tx_min_wei = min_wei);
    }

    pub fn set_wallet(&self, chat_id: ChatId, wallet: Option<Address>) {
        self.update(chat_id, |subs| subs.wallet = wallet);
    }

    pub fn clear_large_tx(&self, chat_id: ChatId) {
        self.set_large_tx_min(chat_id, None);
    }

    pub fn clear_wallet(&self, chat_id: ChatId) {
        self.set_wallet(chat_id, None);
    }

    pub fn clear_all(&self, chat_id: ChatId) {
        self.write().remove(&chat_id);
    }

    /// Returns an independent copy of the subscriber's criteria.
    pub fn get_copy(&self, chat_id: ChatId) -> Option<UserSubs> {
        self.read().get(&chat_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn chat_ids(&self) -> Vec<ChatId> {
        self.read().keys().copied().collect()
    }

    /// Returns every subscriber interested in a transaction, each at most once.
    /// Order is unspecified.
    pub fn match_tx(&self, sender: Address, receiver: Option<Address>, value_wei: U256) -> Vec<ChatId> {
        self.read()
            .iter()
            .filter(|(_, subs)| subs.matches(sender, receiver, value_wei))
            .map(|(chat_id, _)| *chat_id)
            .collect()
    }
}
