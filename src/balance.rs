use serde::Serialize;

use crate::schemas::{Expense, Settlement, Timestamp};

pub const RECENT_ACTIVITY_LIMIT: usize = 5;

/// The records of one group, tagged with the name shown in the activity feed.
#[derive(Clone, Copy, Debug)]
pub struct GroupLedger<'a> {
    pub group_name: &'a str,
    pub expenses: &'a [Expense],
    pub settlements: &'a [Settlement],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Expense,
    Settlement,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityItem {
    pub kind: ActivityKind,
    pub group_name: String,
    pub description: String,
    pub amount: f64,
    pub date: Option<Timestamp>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_owed: f64,
    pub largest_expense: Option<Expense>,
    pub recent_activity: Vec<ActivityItem>,
}

/// What `user` is owed: everything they paid for minus everything they settled.
///
/// Expenses are credited in full to the payer, the split list is not looked at.
pub fn compute_balance(expenses: &[Expense], settlements: &[Settlement], user: &str) -> f64 {
    let paid: f64 = expenses
        .iter()
        .filter(|expense| expense.payer_id == user)
        .map(|expense| expense.amount)
        .sum();
    let settled: f64 = settlements
        .iter()
        .filter(|settlement| settlement.from_user_id == user)
        .map(|settlement| settlement.amount)
        .sum();
    paid - settled
}

pub fn compute_balance_across(ledgers: &[GroupLedger], user: &str) -> f64 {
    ledgers
        .iter()
        .map(|ledger| compute_balance(ledger.expenses, ledger.settlements, user))
        .sum()
}

pub fn largest_expense<'a>(ledgers: &[GroupLedger<'a>]) -> Option<&'a Expense> {
    let mut largest: Option<&Expense> = None;
    for expense in ledgers.iter().flat_map(|ledger| ledger.expenses) {
        // Strictly greater keeps the first one seen on ties
        if largest.map_or(true, |current| expense.amount > current.amount) {
            largest = Some(expense);
        }
    }
    largest
}

pub fn recent_activity(ledgers: &[GroupLedger], limit: usize) -> Vec<ActivityItem> {
    let mut activity = Vec::new();
    for ledger in ledgers {
        activity.extend(ledger.expenses.iter().map(|expense| ActivityItem {
            kind: ActivityKind::Expense,
            group_name: ledger.group_name.to_string(),
            description: expense.description.clone(),
            amount: expense.amount,
            date: expense.date,
        }));
        activity.extend(ledger.settlements.iter().map(|settlement| ActivityItem {
            kind: ActivityKind::Settlement,
            group_name: ledger.group_name.to_string(),
            description: settlement.reason.clone(),
            amount: settlement.amount,
            date: settlement.date,
        }));
    }
    // Stable sort, newest first
    activity.sort_by(|a, b| Timestamp::or_epoch(b.date).cmp(&Timestamp::or_epoch(a.date)));
    activity.truncate(limit);
    activity
}

pub fn summarize(ledgers: &[GroupLedger], user: &str) -> Summary {
    Summary {
        total_owed: compute_balance_across(ledgers, user),
        largest_expense: largest_expense(ledgers).cloned(),
        recent_activity: recent_activity(ledgers, RECENT_ACTIVITY_LIMIT),
    }
}
