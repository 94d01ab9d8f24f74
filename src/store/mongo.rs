use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use mongodb::{
    bson::{doc, Document},
    error::{ErrorKind, WriteFailure},
    options::{FindOptions, IndexOptions},
    Client, Collection, Database, IndexModel,
};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::{DocumentStore, StoreError, Subscription};
use crate::schemas::{
    new_id, Account, Expense, Group, NewExpense, NewGroup, NewSettlement, Settlement, UserProfile,
};

const DUPLICATE_KEY: i32 = 11000;

/// Document store backed by MongoDB.
///
/// Expenses and settlements live in their own collections keyed by `groupId`.
/// Watching needs a replica set, change streams are not available otherwise.
#[derive(Clone)]
pub struct MongoStore {
    database: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await?;
        let store = Self {
            database: client.database(database),
        };
        store.ensure_indexes().await?;
        info!(database, "Connected to MongoDB");
        Ok(store)
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let unique = || IndexOptions::builder().unique(true).build();
        self.groups()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "id": 1 })
                    .options(unique())
                    .build(),
                None,
            )
            .await?;
        self.accounts()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "email": 1 })
                    .options(unique())
                    .build(),
                None,
            )
            .await?;
        for collection in ["expenses", "settlements"] {
            self.database
                .collection::<Document>(collection)
                .create_index(IndexModel::builder().keys(doc! { "groupId": 1 }).build(), None)
                .await?;
        }
        Ok(())
    }

    fn groups(&self) -> Collection<Group> {
        self.database.collection("groups")
    }

    fn expense_collection(&self) -> Collection<Expense> {
        self.database.collection("expenses")
    }

    fn settlement_collection(&self) -> Collection<Settlement> {
        self.database.collection("settlements")
    }

    fn users(&self) -> Collection<UserProfile> {
        self.database.collection("users")
    }

    fn accounts(&self) -> Collection<Account> {
        self.database.collection("accounts")
    }

    async fn group_exists(&self, id: &str) -> Result<(), StoreError> {
        match self.groups().find_one(doc! { "id": id }, None).await? {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound("Group not found.".to_string())),
        }
    }
}

/// Reads a whole group-scoped collection in insertion order.
async fn list_for_group<T>(collection: &Collection<T>, group_id: &str) -> Result<Vec<T>, StoreError>
where
    T: DeserializeOwned + Unpin + Send + Sync,
{
    let options = FindOptions::builder().sort(doc! { "_id": 1 }).build();
    let cursor = collection
        .find(doc! { "groupId": group_id }, options)
        .await?;
    Ok(cursor.try_collect().await?)
}

/// Opens a change stream on the group's records and re-reads the full list
/// after every change, so subscribers always see a complete snapshot. The
/// subscription ends if the stream or a refresh fails.
async fn watch_group<T>(
    collection: Collection<T>,
    group_id: &str,
) -> Result<Subscription<T>, StoreError>
where
    T: DeserializeOwned + Unpin + Send + Sync + 'static,
{
    // Opened before the first read so no insert falls in between
    let mut changes = collection
        .watch(
            vec![doc! { "$match": { "fullDocument.groupId": group_id } }],
            None,
        )
        .await?;
    let initial = list_for_group(&collection, group_id).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    // Can't fail, the receiver is still in scope
    let _ = tx.send(initial);

    let group_id = group_id.to_string();
    let task = tokio::spawn(async move {
        while let Some(change) = changes.next().await {
            if let Err(err) = change {
                error!(%group_id, collection = collection.name(), "Change stream failed: {err}");
                break;
            }
            match list_for_group(&collection, &group_id).await {
                Ok(snapshot) => {
                    if tx.send(snapshot).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    error!(%group_id, collection = collection.name(), "Refreshing snapshot failed: {err}");
                    break;
                }
            }
        }
        debug!(%group_id, collection = collection.name(), "Change stream closed");
    });
    Ok(Subscription::with_task(rx, task.abort_handle()))
}

fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    matches!(
        error.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn add_group(&self, group: NewGroup) -> Result<Group, StoreError> {
        let group = group.into_group(new_id());
        self.groups().insert_one(&group, None).await?;
        Ok(group)
    }

    async fn get_group(&self, id: &str) -> Result<Option<Group>, StoreError> {
        Ok(self.groups().find_one(doc! { "id": id }, None).await?)
    }

    async fn groups_for_member(&self, user: &str) -> Result<Vec<Group>, StoreError> {
        let options = FindOptions::builder().sort(doc! { "_id": 1 }).build();
        let cursor = self
            .groups()
            .find(doc! { "memberIds": user }, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn add_member(&self, group_id: &str, user: &str) -> Result<(), StoreError> {
        let result = self
            .groups()
            .update_one(
                doc! { "id": group_id },
                doc! { "$addToSet": { "memberIds": user } },
                None,
            )
            .await?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound("Group not found.".to_string()));
        }
        Ok(())
    }

    async fn add_expense(&self, group_id: &str, expense: NewExpense) -> Result<Expense, StoreError> {
        self.group_exists(group_id).await?;
        let expense = expense.into_expense(new_id(), group_id.to_string());
        self.expense_collection().insert_one(&expense, None).await?;
        Ok(expense)
    }

    async fn expenses(&self, group_id: &str) -> Result<Vec<Expense>, StoreError> {
        list_for_group(&self.expense_collection(), group_id).await
    }

    async fn watch_expenses(&self, group_id: &str) -> Result<Subscription<Expense>, StoreError> {
        watch_group(self.expense_collection(), group_id).await
    }

    async fn add_settlement(
        &self,
        group_id: &str,
        settlement: NewSettlement,
    ) -> Result<Settlement, StoreError> {
        self.group_exists(group_id).await?;
        let settlement = settlement.into_settlement(new_id(), group_id.to_string());
        self.settlement_collection()
            .insert_one(&settlement, None)
            .await?;
        Ok(settlement)
    }

    async fn settlements(&self, group_id: &str) -> Result<Vec<Settlement>, StoreError> {
        list_for_group(&self.settlement_collection(), group_id).await
    }

    async fn watch_settlements(
        &self,
        group_id: &str,
    ) -> Result<Subscription<Settlement>, StoreError> {
        watch_group(self.settlement_collection(), group_id).await
    }

    async fn put_user_profile(&self, profile: UserProfile) -> Result<(), StoreError> {
        let options = mongodb::options::ReplaceOptions::builder()
            .upsert(true)
            .build();
        self.users()
            .replace_one(doc! { "uid": profile.uid.as_str() }, &profile, options)
            .await?;
        Ok(())
    }

    async fn get_user_profile(&self, uid: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.users().find_one(doc! { "uid": uid }, None).await?)
    }

    async fn add_account(&self, account: Account) -> Result<(), StoreError> {
        match self.accounts().insert_one(&account, None).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => {
                Err(StoreError::Conflict("Email is already in use.".to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn find_account(&self, email: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts().find_one(doc! { "email": email }, None).await?)
    }
}
