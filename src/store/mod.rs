//! Document store seam. Everything the app persists goes through [`DocumentStore`].

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::schemas::{
    Account, Expense, Group, NewExpense, NewGroup, NewSettlement, Settlement, UserProfile,
};

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),
}

/// Live view of a collection. Every item is the full current list, delivered in
/// the order the store emitted it. Dropping or disposing the handle releases it.
pub struct Subscription<T> {
    updates: mpsc::UnboundedReceiver<Vec<T>>,
    task: Option<AbortHandle>,
}

impl<T> Subscription<T> {
    pub fn new(updates: mpsc::UnboundedReceiver<Vec<T>>) -> Self {
        Self {
            updates,
            task: None,
        }
    }

    /// A subscription fed by a background task, aborted on release.
    pub fn with_task(updates: mpsc::UnboundedReceiver<Vec<T>>, task: AbortHandle) -> Self {
        Self {
            updates,
            task: Some(task),
        }
    }

    pub async fn next_snapshot(&mut self) -> Option<Vec<T>> {
        self.updates.recv().await
    }

    pub fn dispose(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.updates.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Vec<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().updates.poll_recv(cx)
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn add_group(&self, group: NewGroup) -> Result<Group, StoreError>;

    async fn get_group(&self, id: &str) -> Result<Option<Group>, StoreError>;

    /// Groups whose member set contains `user`.
    async fn groups_for_member(&self, user: &str) -> Result<Vec<Group>, StoreError>;

    /// Appends `user` to the member set of an existing group. Idempotent.
    async fn add_member(&self, group_id: &str, user: &str) -> Result<(), StoreError>;

    async fn add_expense(&self, group_id: &str, expense: NewExpense) -> Result<Expense, StoreError>;

    async fn expenses(&self, group_id: &str) -> Result<Vec<Expense>, StoreError>;

    async fn watch_expenses(&self, group_id: &str) -> Result<Subscription<Expense>, StoreError>;

    async fn add_settlement(
        &self,
        group_id: &str,
        settlement: NewSettlement,
    ) -> Result<Settlement, StoreError>;

    async fn settlements(&self, group_id: &str) -> Result<Vec<Settlement>, StoreError>;

    async fn watch_settlements(&self, group_id: &str)
        -> Result<Subscription<Settlement>, StoreError>;

    async fn put_user_profile(&self, profile: UserProfile) -> Result<(), StoreError>;

    async fn get_user_profile(&self, uid: &str) -> Result<Option<UserProfile>, StoreError>;

    /// Fails with [`StoreError::Conflict`] when the email is already registered.
    async fn add_account(&self, account: Account) -> Result<(), StoreError>;

    async fn find_account(&self, email: &str) -> Result<Option<Account>, StoreError>;

    /// Releases live resources. Open subscriptions end.
    async fn close(&self) {}
}
