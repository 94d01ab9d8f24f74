use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = String;
pub type GroupId = String;

/// A point in time as stored in documents: milliseconds since the Unix epoch.
///
/// Records without a timestamp are treated as [`Timestamp::EPOCH`] when
/// ordering, so they sort as the oldest entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp(0);

    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn millis(self) -> i64 {
        self.0
    }

    /// Sort key for an optional timestamp.
    pub fn or_epoch(timestamp: Option<Timestamp>) -> Timestamp {
        timestamp.unwrap_or(Self::EPOCH)
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.timestamp_millis())
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub group_name: String,
    pub member_ids: Vec<UserId>,
}

impl Group {
    pub fn has_member(&self, user: &str) -> bool {
        self.member_ids.iter().any(|member| member == user)
    }

    /// Adds `user` to the member set, keeping identifiers unique.
    pub fn add_member(&mut self, user: &str) -> bool {
        if self.has_member(user) {
            return false;
        }
        self.member_ids.push(user.to_string());
        true
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    pub group_id: GroupId,
    pub description: String,
    pub amount: f64,
    pub payer_id: UserId,
    #[serde(default)]
    pub date: Option<Timestamp>,
    #[serde(default)]
    pub split_with: Vec<UserId>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub id: String,
    pub group_id: GroupId,
    pub from_user_id: UserId,
    #[serde(default)]
    pub to_user_id: Option<UserId>,
    #[serde(default)]
    pub reason: String,
    pub amount: f64,
    #[serde(default)]
    pub date: Option<Timestamp>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: UserId,
    pub email: String,
    pub display_name: String,
}

/// Credentials held by the identity provider. Never leaves the server.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub uid: UserId,
    pub email: String,
    pub salt: String,
    pub password_hash: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewGroup {
    pub group_name: String,
    pub creator: UserId,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewExpense {
    pub description: String,
    pub amount: f64,
    pub payer_id: UserId,
    pub split_with: Vec<UserId>,
    pub date: Timestamp,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewSettlement {
    pub from_user_id: UserId,
    pub to_user_id: Option<UserId>,
    pub reason: String,
    pub amount: f64,
    pub date: Timestamp,
}

/// Fresh document identifier, shared by every store backend.
pub fn new_id() -> String {
    bson::oid::ObjectId::new().to_hex()
}

impl NewGroup {
    pub fn into_group(self, id: GroupId) -> Group {
        Group {
            id,
            group_name: self.group_name,
            member_ids: vec![self.creator],
        }
    }
}

impl NewExpense {
    pub fn into_expense(self, id: String, group_id: GroupId) -> Expense {
        Expense {
            id,
            group_id,
            description: self.description,
            amount: self.amount,
            payer_id: self.payer_id,
            date: Some(self.date),
            split_with: self.split_with,
        }
    }
}

impl NewSettlement {
    pub fn into_settlement(self, id: String, group_id: GroupId) -> Settlement {
        Settlement {
            id,
            group_id,
            from_user_id: self.from_user_id,
            to_user_id: self.to_user_id,
            reason: self.reason,
            amount: self.amount,
            date: Some(self.date),
        }
    }
}
