use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{DocumentStore, StoreError, Subscription};
use crate::schemas::{
    new_id, Account, Expense, Group, GroupId, NewExpense, NewGroup, NewSettlement, Settlement,
    UserId, UserProfile,
};

/// Senders of every open subscription on one collection.
struct Listeners<T> {
    senders: Vec<mpsc::UnboundedSender<Vec<T>>>,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            senders: Vec::new(),
        }
    }
}

impl<T: Clone> Listeners<T> {
    fn subscribe(&mut self, current: &[T]) -> Subscription<T> {
        self.senders.retain(|sender| !sender.is_closed());
        let (tx, rx) = mpsc::unbounded_channel();
        // Can't fail, the receiver is still in scope
        let _ = tx.send(current.to_vec());
        self.senders.push(tx);
        Subscription::new(rx)
    }

    fn publish(&mut self, current: &[T]) {
        self.senders
            .retain(|sender| sender.send(current.to_vec()).is_ok());
    }
}

#[derive(Default)]
struct State {
    groups: Vec<Group>,
    expenses: HashMap<GroupId, Vec<Expense>>,
    settlements: HashMap<GroupId, Vec<Settlement>>,
    expense_listeners: HashMap<GroupId, Listeners<Expense>>,
    settlement_listeners: HashMap<GroupId, Listeners<Settlement>>,
    profiles: HashMap<UserId, UserProfile>,
    accounts: HashMap<String, Account>,
    revision: u64,
}

impl State {
    fn group_mut(&mut self, id: &str) -> Option<&mut Group> {
        self.groups.iter_mut().find(|group| group.id == id)
    }

    fn ensure_group(&self, id: &str) -> Result<(), StoreError> {
        if self.groups.iter().any(|group| group.id == id) {
            Ok(())
        } else {
            Err(StoreError::NotFound("Group not found.".to_string()))
        }
    }
}

/// In-process document store. Writes are serialized by a single lock.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes applied so far.
    pub async fn revision(&self) -> u64 {
        self.state.lock().await.revision
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn add_group(&self, group: NewGroup) -> Result<Group, StoreError> {
        let mut state = self.state.lock().await;
        let group = group.into_group(new_id());
        state.groups.push(group.clone());
        state.revision += 1;
        Ok(group)
    }

    async fn get_group(&self, id: &str) -> Result<Option<Group>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.groups.iter().find(|group| group.id == id).cloned())
    }

    async fn groups_for_member(&self, user: &str) -> Result<Vec<Group>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .groups
            .iter()
            .filter(|group| group.has_member(user))
            .cloned()
            .collect())
    }

    async fn add_member(&self, group_id: &str, user: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let group = state
            .group_mut(group_id)
            .ok_or_else(|| StoreError::NotFound("Group not found.".to_string()))?;
        if group.add_member(user) {
            state.revision += 1;
        }
        Ok(())
    }

    async fn add_expense(&self, group_id: &str, expense: NewExpense) -> Result<Expense, StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_group(group_id)?;
        let expense = expense.into_expense(new_id(), group_id.to_string());
        let State {
            expenses,
            expense_listeners,
            revision,
            ..
        } = &mut *state;
        let list = expenses.entry(group_id.to_string()).or_default();
        list.push(expense.clone());
        if let Some(listeners) = expense_listeners.get_mut(group_id) {
            listeners.publish(list);
        }
        *revision += 1;
        Ok(expense)
    }

    async fn expenses(&self, group_id: &str) -> Result<Vec<Expense>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.expenses.get(group_id).cloned().unwrap_or_default())
    }

    async fn watch_expenses(&self, group_id: &str) -> Result<Subscription<Expense>, StoreError> {
        let mut state = self.state.lock().await;
        let State {
            expenses,
            expense_listeners,
            ..
        } = &mut *state;
        let current = expenses.get(group_id).map(Vec::as_slice).unwrap_or_default();
        Ok(expense_listeners
            .entry(group_id.to_string())
            .or_default()
            .subscribe(current))
    }

    async fn add_settlement(
        &self,
        group_id: &str,
        settlement: NewSettlement,
    ) -> Result<Settlement, StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_group(group_id)?;
        let settlement = settlement.into_settlement(new_id(), group_id.to_string());
        let State {
            settlements,
            settlement_listeners,
            revision,
            ..
        } = &mut *state;
        let list = settlements.entry(group_id.to_string()).or_default();
        list.push(settlement.clone());
        if let Some(listeners) = settlement_listeners.get_mut(group_id) {
            listeners.publish(list);
        }
        *revision += 1;
        Ok(settlement)
    }

    async fn settlements(&self, group_id: &str) -> Result<Vec<Settlement>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.settlements.get(group_id).cloned().unwrap_or_default())
    }

    async fn watch_settlements(
        &self,
        group_id: &str,
    ) -> Result<Subscription<Settlement>, StoreError> {
        let mut state = self.state.lock().await;
        let State {
            settlements,
            settlement_listeners,
            ..
        } = &mut *state;
        let current = settlements.get(group_id).map(Vec::as_slice).unwrap_or_default();
        Ok(settlement_listeners
            .entry(group_id.to_string())
            .or_default()
            .subscribe(current))
    }

    async fn put_user_profile(&self, profile: UserProfile) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.profiles.insert(profile.uid.clone(), profile);
        state.revision += 1;
        Ok(())
    }

    async fn get_user_profile(&self, uid: &str) -> Result<Option<UserProfile>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.profiles.get(uid).cloned())
    }

    async fn add_account(&self, account: Account) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.accounts.contains_key(&account.email) {
            return Err(StoreError::Conflict("Email is already in use.".to_string()));
        }
        state.accounts.insert(account.email.clone(), account);
        state.revision += 1;
        Ok(())
    }

    async fn find_account(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.accounts.get(email).cloned())
    }

    async fn close(&self) {
        let mut state = self.state.lock().await;
        state.expense_listeners.clear();
        state.settlement_listeners.clear();
    }
}
