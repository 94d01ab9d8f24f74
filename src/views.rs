//! Read-side view models: the live group detail and the one-shot dashboard.

use std::sync::Arc;

use futures::future::{try_join, try_join_all};
use serde::Serialize;
use tracing::{debug, warn};

use crate::balance::{compute_balance, summarize, GroupLedger, Summary};
use crate::context::AppContext;
use crate::error::AppError;
use crate::identity::CurrentUser;
use crate::profiles::ProfileResolver;
use crate::schemas::{Expense, Group, Settlement};
use crate::store::{DocumentStore, Subscription};

/// Loads a group the viewer belongs to.
pub async fn member_group(
    store: &dyn DocumentStore,
    group_id: &str,
    viewer: &CurrentUser,
) -> Result<Group, AppError> {
    let group = store
        .get_group(group_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Group not found.".to_string()))?;
    if !group.has_member(&viewer.uid) {
        return Err(AppError::NotMember);
    }
    Ok(group)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseRow {
    #[serde(flatten)]
    pub expense: Expense,
    pub payer_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRow {
    #[serde(flatten)]
    pub settlement: Settlement,
    pub from_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDetailSnapshot {
    pub group: Group,
    pub expenses: Vec<ExpenseRow>,
    pub settlements: Vec<SettlementRow>,
    pub total_owed: f64,
}

enum Update {
    Expenses(Vec<Expense>),
    Settlements(Vec<Settlement>),
}

/// Live view of one group.
///
/// Each delivery replaces the whole list for its collection, so the balance is
/// always computed from complete lists. Disposing or dropping the view
/// releases both subscriptions.
pub struct GroupDetailView {
    group: Group,
    viewer: CurrentUser,
    expenses: Vec<Expense>,
    settlements: Vec<Settlement>,
    expense_updates: Subscription<Expense>,
    settlement_updates: Subscription<Settlement>,
    seen_expenses: bool,
    seen_settlements: bool,
    profiles: ProfileResolver,
}

impl GroupDetailView {
    pub async fn open(
        context: &AppContext,
        group_id: &str,
        viewer: &CurrentUser,
    ) -> Result<Self, AppError> {
        let store: &Arc<dyn DocumentStore> = context.store();
        let group = member_group(&**store, group_id, viewer).await?;
        let expense_updates = store.watch_expenses(&group.id).await?;
        let settlement_updates = store.watch_settlements(&group.id).await?;
        debug!(group_id = %group.id, uid = %viewer.uid, "Opened group detail");

        Ok(Self {
            group,
            viewer: viewer.clone(),
            expenses: Vec::new(),
            settlements: Vec::new(),
            expense_updates,
            settlement_updates,
            seen_expenses: false,
            seen_settlements: false,
            profiles: ProfileResolver::new(store.clone(), viewer.uid.clone()),
        })
    }

    /// Opens the view and waits for its first complete snapshot. Both steps
    /// share the configured fetch timeout.
    pub async fn load(
        context: &AppContext,
        group_id: &str,
        viewer: &CurrentUser,
    ) -> Result<(Self, GroupDetailSnapshot), AppError> {
        let load = async {
            let mut view = Self::open(context, group_id, viewer).await?;
            let snapshot = view.ready().await.ok_or(AppError::Interrupted)?;
            Ok::<_, AppError>((view, snapshot))
        };
        tokio::time::timeout(context.config.fetch_timeout, load)
            .await
            .map_err(|_| AppError::Timeout)?
    }

    /// Waits for the next change to either collection. `None` as soon as
    /// either subscription ends.
    pub async fn next_update(&mut self) -> Option<GroupDetailSnapshot> {
        let update = tokio::select! {
            expenses = self.expense_updates.next_snapshot() => expenses.map(Update::Expenses),
            settlements = self.settlement_updates.next_snapshot() => settlements.map(Update::Settlements),
        };
        let Some(update) = update else {
            warn!(group_id = %self.group.id, "Live updates ended");
            return None;
        };
        match update {
            Update::Expenses(expenses) => {
                self.expenses = expenses;
                self.seen_expenses = true;
                let payers: Vec<String> = self.expenses.iter().map(|e| e.payer_id.clone()).collect();
                self.profiles.prefetch(payers.iter().map(String::as_str)).await;
            }
            Update::Settlements(settlements) => {
                self.settlements = settlements;
                self.seen_settlements = true;
                let payers: Vec<String> = self
                    .settlements
                    .iter()
                    .map(|s| s.from_user_id.clone())
                    .collect();
                self.profiles.prefetch(payers.iter().map(String::as_str)).await;
            }
        }
        Some(self.snapshot())
    }

    /// Waits until both collections have been delivered once.
    pub async fn ready(&mut self) -> Option<GroupDetailSnapshot> {
        while !(self.seen_expenses && self.seen_settlements) {
            self.next_update().await?;
        }
        Some(self.snapshot())
    }

    pub fn total_owed(&self) -> f64 {
        compute_balance(&self.expenses, &self.settlements, &self.viewer.uid)
    }

    pub fn snapshot(&self) -> GroupDetailSnapshot {
        GroupDetailSnapshot {
            group: self.group.clone(),
            expenses: self
                .expenses
                .iter()
                .map(|expense| ExpenseRow {
                    payer_name: self.profiles.display_name(&expense.payer_id),
                    expense: expense.clone(),
                })
                .collect(),
            settlements: self
                .settlements
                .iter()
                .map(|settlement| SettlementRow {
                    from_name: self.profiles.display_name(&settlement.from_user_id),
                    settlement: settlement.clone(),
                })
                .collect(),
            total_owed: self.total_owed(),
        }
    }

    pub fn dispose(self) {
        debug!(group_id = %self.group.id, "Closed group detail");
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCard {
    pub id: String,
    pub group_name: String,
    pub member_count: usize,
    pub invite_link: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub groups: Vec<GroupCard>,
    pub total_groups: usize,
    #[serde(flatten)]
    pub summary: Summary,
}

/// Fetches the viewer's groups and their records once and aggregates them.
/// Gives up with [`AppError::Timeout`] after the configured fetch timeout.
pub async fn load_dashboard(
    context: &AppContext,
    viewer: &CurrentUser,
) -> Result<Dashboard, AppError> {
    tokio::time::timeout(context.config.fetch_timeout, fetch_dashboard(context, viewer))
        .await
        .map_err(|_| AppError::Timeout)?
}

async fn fetch_dashboard(context: &AppContext, viewer: &CurrentUser) -> Result<Dashboard, AppError> {
    let store = context.store();
    let groups = store.groups_for_member(&viewer.uid).await?;
    let records = try_join_all(
        groups
            .iter()
            .map(|group| try_join(store.expenses(&group.id), store.settlements(&group.id))),
    )
    .await?;

    let ledgers: Vec<GroupLedger> = groups
        .iter()
        .zip(&records)
        .map(|(group, (expenses, settlements))| GroupLedger {
            group_name: &group.group_name,
            expenses,
            settlements,
        })
        .collect();
    let summary = summarize(&ledgers, &viewer.uid);

    let cards = groups
        .iter()
        .map(|group| GroupCard {
            id: group.id.clone(),
            group_name: group.group_name.clone(),
            member_count: group.member_ids.len(),
            invite_link: context.invite_link(&group.id),
        })
        .collect::<Vec<_>>();
    Ok(Dashboard {
        total_groups: cards.len(),
        groups: cards,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::schemas::{Account, NewExpense, NewGroup, NewSettlement, Timestamp, UserProfile};
    use crate::store::{MemoryStore, StoreError};

    /// How the settlements feed of [`FlakyStore`] misbehaves.
    enum SettlementFeed {
        /// Never answers the watch call.
        Stall,
        /// Delivers the current list and stays open until [`FlakyStore::end_feeds`].
        Closable,
    }

    /// Memory store whose settlement watch misbehaves.
    struct FlakyStore {
        inner: MemoryStore,
        feed: SettlementFeed,
        senders: std::sync::Mutex<Vec<mpsc::UnboundedSender<Vec<Settlement>>>>,
    }

    impl FlakyStore {
        fn end_feeds(&self) {
            self.senders.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        async fn add_group(&self, group: NewGroup) -> Result<Group, StoreError> {
            self.inner.add_group(group).await
        }

        async fn get_group(&self, id: &str) -> Result<Option<Group>, StoreError> {
            self.inner.get_group(id).await
        }

        async fn groups_for_member(&self, user: &str) -> Result<Vec<Group>, StoreError> {
            self.inner.groups_for_member(user).await
        }

        async fn add_member(&self, group_id: &str, user: &str) -> Result<(), StoreError> {
            self.inner.add_member(group_id, user).await
        }

        async fn add_expense(
            &self,
            group_id: &str,
            expense: NewExpense,
        ) -> Result<Expense, StoreError> {
            self.inner.add_expense(group_id, expense).await
        }

        async fn expenses(&self, group_id: &str) -> Result<Vec<Expense>, StoreError> {
            self.inner.expenses(group_id).await
        }

        async fn watch_expenses(
            &self,
            group_id: &str,
        ) -> Result<Subscription<Expense>, StoreError> {
            self.inner.watch_expenses(group_id).await
        }

        async fn add_settlement(
            &self,
            group_id: &str,
            settlement: NewSettlement,
        ) -> Result<Settlement, StoreError> {
            self.inner.add_settlement(group_id, settlement).await
        }

        async fn settlements(&self, group_id: &str) -> Result<Vec<Settlement>, StoreError> {
            self.inner.settlements(group_id).await
        }

        async fn watch_settlements(
            &self,
            group_id: &str,
        ) -> Result<Subscription<Settlement>, StoreError> {
            match self.feed {
                SettlementFeed::Stall => futures::future::pending().await,
                SettlementFeed::Closable => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    tx.send(self.inner.settlements(group_id).await?).unwrap();
                    self.senders.lock().unwrap().push(tx);
                    Ok(Subscription::new(rx))
                }
            }
        }

        async fn put_user_profile(&self, profile: UserProfile) -> Result<(), StoreError> {
            self.inner.put_user_profile(profile).await
        }

        async fn get_user_profile(&self, uid: &str) -> Result<Option<UserProfile>, StoreError> {
            self.inner.get_user_profile(uid).await
        }

        async fn add_account(&self, account: Account) -> Result<(), StoreError> {
            self.inner.add_account(account).await
        }

        async fn find_account(&self, email: &str) -> Result<Option<Account>, StoreError> {
            self.inner.find_account(email).await
        }
    }

    async fn flaky_setup(feed: SettlementFeed) -> (AppContext, Arc<FlakyStore>, Group) {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            feed,
            senders: std::sync::Mutex::new(Vec::new()),
        });
        let group = store
            .add_group(NewGroup {
                group_name: "Flat".to_string(),
                creator: "alice".to_string(),
            })
            .await
            .unwrap();
        let config = Config {
            fetch_timeout: Duration::from_millis(50),
            ..Config::default()
        };
        (AppContext::with_store(config, store.clone()), store, group)
    }

    async fn setup() -> (AppContext, Group) {
        let store = Arc::new(MemoryStore::new());
        let context = AppContext::with_store(Config::default(), store);
        let group = context
            .store()
            .add_group(NewGroup {
                group_name: "Flat".to_string(),
                creator: "alice".to_string(),
            })
            .await
            .unwrap();
        context.store().add_member(&group.id, "bob").await.unwrap();
        context
            .store()
            .put_user_profile(UserProfile {
                uid: "bob".to_string(),
                email: "bob@example.com".to_string(),
                display_name: "Bob".to_string(),
            })
            .await
            .unwrap();
        (context, group)
    }

    fn expense(payer: &str, amount: f64, millis: i64) -> NewExpense {
        NewExpense {
            description: format!("{payer} paid {amount}"),
            amount,
            payer_id: payer.to_string(),
            split_with: vec![payer.to_string()],
            date: Timestamp::from_millis(millis),
        }
    }

    fn settlement(from: &str, amount: f64, millis: i64) -> NewSettlement {
        NewSettlement {
            from_user_id: from.to_string(),
            to_user_id: None,
            reason: "settle".to_string(),
            amount,
            date: Timestamp::from_millis(millis),
        }
    }

    fn alice() -> CurrentUser {
        CurrentUser {
            uid: "alice".to_string(),
        }
    }

    #[tokio::test]
    async fn detail_recomputes_on_every_change() {
        let (context, group) = setup().await;
        context.store().add_expense(&group.id, expense("alice", 50.0, 1)).await.unwrap();

        let mut view = GroupDetailView::open(&context, &group.id, &alice()).await.unwrap();
        let snapshot = view.ready().await.unwrap();
        assert_eq!(snapshot.total_owed, 50.0);
        assert_eq!(snapshot.expenses[0].payer_name, "You");

        context.store().add_settlement(&group.id, settlement("alice", 20.0, 2)).await.unwrap();
        let snapshot = view.next_update().await.unwrap();
        assert_eq!(snapshot.total_owed, 30.0);

        context.store().add_expense(&group.id, expense("bob", 10.0, 3)).await.unwrap();
        let snapshot = view.next_update().await.unwrap();
        assert_eq!(snapshot.expenses.len(), 2);
        assert_eq!(snapshot.expenses[1].payer_name, "Bob");
        assert_eq!(snapshot.total_owed, 30.0);
        view.dispose();
    }

    #[tokio::test]
    async fn load_waits_for_both_collections() {
        let (context, group) = setup().await;
        context.store().add_expense(&group.id, expense("alice", 50.0, 1)).await.unwrap();
        context.store().add_settlement(&group.id, settlement("alice", 20.0, 2)).await.unwrap();

        for _ in 0..10 {
            let (view, snapshot) = GroupDetailView::load(&context, &group.id, &alice())
                .await
                .unwrap();
            assert_eq!(snapshot.expenses.len(), 1);
            assert_eq!(snapshot.settlements.len(), 1);
            assert_eq!(snapshot.total_owed, 30.0);
            view.dispose();
        }
    }

    #[tokio::test]
    async fn load_times_out_when_a_watch_never_opens() {
        let (context, _, group) = flaky_setup(SettlementFeed::Stall).await;
        assert!(matches!(
            GroupDetailView::load(&context, &group.id, &alice()).await,
            Err(AppError::Timeout)
        ));
    }

    #[tokio::test]
    async fn view_ends_when_one_feed_ends() {
        let (context, store, group) = flaky_setup(SettlementFeed::Closable).await;
        let mut view = GroupDetailView::open(&context, &group.id, &alice()).await.unwrap();
        assert!(view.ready().await.is_some());

        store.end_feeds();
        let update = tokio::time::timeout(Duration::from_secs(1), view.next_update()).await;
        assert!(matches!(update, Ok(None)));
    }

    #[tokio::test]
    async fn detail_requires_membership() {
        let (context, group) = setup().await;
        let stranger = CurrentUser {
            uid: "mallory".to_string(),
        };
        assert!(matches!(
            GroupDetailView::open(&context, &group.id, &stranger).await,
            Err(AppError::NotMember)
        ));
        assert!(matches!(
            GroupDetailView::open(&context, "missing", &alice()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn dashboard_aggregates_all_groups() {
        let (context, flat) = setup().await;
        let trip = context
            .store()
            .add_group(NewGroup {
                group_name: "Trip".to_string(),
                creator: "alice".to_string(),
            })
            .await
            .unwrap();
        context.store().add_expense(&flat.id, expense("alice", 40.0, 10)).await.unwrap();
        context.store().add_expense(&trip.id, expense("bob", 40.0, 20)).await.unwrap();
        context.store().add_settlement(&trip.id, settlement("alice", 15.0, 30)).await.unwrap();

        let dashboard = load_dashboard(&context, &alice()).await.unwrap();
        assert_eq!(dashboard.total_groups, 2);
        assert_eq!(dashboard.groups[0].member_count, 2);
        assert_eq!(
            dashboard.groups[1].invite_link,
            format!("http://localhost:8080/join?groupId={}", trip.id)
        );
        assert_eq!(dashboard.summary.total_owed, 25.0);
        // Tie on 40, the Flat expense came first
        assert_eq!(
            dashboard.summary.largest_expense.map(|e| e.group_id),
            Some(flat.id.clone())
        );
        let feed: Vec<&str> = dashboard
            .summary
            .recent_activity
            .iter()
            .map(|item| item.group_name.as_str())
            .collect();
        assert_eq!(feed, vec!["Trip", "Trip", "Flat"]);
    }

    #[tokio::test]
    async fn empty_dashboard() {
        let context = AppContext::with_store(Config::default(), Arc::new(MemoryStore::new()));
        let dashboard = load_dashboard(&context, &alice()).await.unwrap();
        assert_eq!(dashboard.total_groups, 0);
        assert_eq!(dashboard.summary, Summary::default());
    }
}
