//! Form submissions. Every check runs before the single write a form issues.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::AppContext;
use crate::error::AppError;
use crate::identity::{CurrentUser, SignedIn};
use crate::schemas::{Expense, Group, NewExpense, NewGroup, NewSettlement, Settlement, Timestamp};
use crate::validation::{
    parse_amount, validate_credentials, validate_display_name, validate_group_name,
    validate_join, FieldError,
};
use crate::views::member_group;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupForm {
    pub group_name: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddExpenseForm {
    #[serde(default)]
    pub description: String,
    pub amount: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleUpForm {
    #[serde(default)]
    pub reason: String,
    pub amount: String,
    #[serde(default)]
    pub to_user_id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinGroupForm {
    #[serde(default)]
    pub group_id: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterForm {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Joined {
    pub message: &'static str,
    pub group: Group,
}

pub async fn create_group(
    context: &AppContext,
    user: &CurrentUser,
    form: CreateGroupForm,
) -> Result<Group, AppError> {
    let group_name = validate_group_name(&form.group_name)?;
    let group = context
        .store()
        .add_group(NewGroup {
            group_name,
            creator: user.uid.clone(),
        })
        .await?;
    info!(group_id = %group.id, uid = %user.uid, "Created group");
    Ok(group)
}

pub async fn add_expense(
    context: &AppContext,
    user: &CurrentUser,
    group_id: &str,
    form: AddExpenseForm,
) -> Result<Expense, AppError> {
    let amount = parse_amount(&form.amount)?;
    let group = member_group(&**context.store(), group_id, user).await?;
    let expense = context
        .store()
        .add_expense(
            &group.id,
            NewExpense {
                description: form.description,
                amount,
                payer_id: user.uid.clone(),
                split_with: vec![user.uid.clone()],
                date: Timestamp::now(),
            },
        )
        .await?;
    info!(group_id = %group.id, expense_id = %expense.id, "Added expense");
    Ok(expense)
}

pub async fn settle_up(
    context: &AppContext,
    user: &CurrentUser,
    group_id: &str,
    form: SettleUpForm,
) -> Result<Settlement, AppError> {
    let amount = parse_amount(&form.amount)?;
    let group = member_group(&**context.store(), group_id, user).await?;
    let to_user_id = form
        .to_user_id
        .map(|to| to.trim().to_string())
        .filter(|to| !to.is_empty());
    if let Some(to) = &to_user_id {
        if !group.has_member(to) {
            return Err(FieldError::new("toUserId", "Recipient is not a member of this group.").into());
        }
    }
    let settlement = context
        .store()
        .add_settlement(
            &group.id,
            NewSettlement {
                from_user_id: user.uid.clone(),
                to_user_id,
                reason: form.reason,
                amount,
                date: Timestamp::now(),
            },
        )
        .await?;
    info!(group_id = %group.id, settlement_id = %settlement.id, "Recorded settlement");
    Ok(settlement)
}

/// Adds the user to an existing group. Nothing is written when the group
/// doesn't exist.
pub async fn join_group(
    context: &AppContext,
    user: Option<&CurrentUser>,
    form: JoinGroupForm,
) -> Result<Joined, AppError> {
    let group_id = validate_join(&form.group_id, user.is_some())?;
    let Some(user) = user else {
        return Err(FieldError::new("groupId", "Missing group ID or not logged in.").into());
    };

    let store = context.store();
    if store.get_group(&group_id).await?.is_none() {
        return Err(AppError::NotFound("Group not found.".to_string()));
    }
    store.add_member(&group_id, &user.uid).await?;
    let group = store
        .get_group(&group_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Group not found.".to_string()))?;
    info!(%group_id, uid = %user.uid, "Joined group");
    Ok(Joined {
        message: "Successfully joined the group!",
        group,
    })
}

/// Pre-fills the join form from an invite link's query.
pub fn join_prefill(query: JoinGroupForm) -> JoinGroupForm {
    JoinGroupForm {
        group_id: query.group_id.trim().to_string(),
    }
}

pub async fn register(context: &AppContext, form: RegisterForm) -> Result<SignedIn, AppError> {
    let display_name = validate_display_name(&form.display_name)?;
    validate_credentials(&form.email, &form.password)?;
    Ok(context
        .identity()
        .register(&form.email, &form.password, &display_name)
        .await?)
}

pub async fn login(context: &AppContext, form: LoginForm) -> Result<SignedIn, AppError> {
    validate_credentials(&form.email, &form.password)?;
    Ok(context.identity().sign_in(&form.email, &form.password).await?)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::store::{DocumentStore, MemoryStore};

    fn context_with(store: Arc<MemoryStore>) -> AppContext {
        AppContext::with_store(Config::default(), store)
    }

    fn user(uid: &str) -> CurrentUser {
        CurrentUser {
            uid: uid.to_string(),
        }
    }

    #[tokio::test]
    async fn blank_group_name_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let context = context_with(store.clone());
        let error = create_group(
            &context,
            &user("a"),
            CreateGroupForm {
                group_name: "   ".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(error, AppError::Invalid(ref e) if e.field == "groupName"));
        assert_eq!(store.revision().await, 0);
    }

    #[tokio::test]
    async fn creator_is_first_member() {
        let context = context_with(Arc::new(MemoryStore::new()));
        let group = create_group(
            &context,
            &user("a"),
            CreateGroupForm {
                group_name: " Rent ".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(group.group_name, "Rent");
        assert_eq!(group.member_ids, vec!["a"]);
    }

    #[tokio::test]
    async fn invalid_amount_is_rejected_before_writing() {
        let store = Arc::new(MemoryStore::new());
        let context = context_with(store.clone());
        let group = create_group(&context, &user("a"), CreateGroupForm { group_name: "Flat".into() })
            .await
            .unwrap();
        let before = store.revision().await;

        for amount in ["", "abc", "-NaN", "-5"] {
            let error = add_expense(
                &context,
                &user("a"),
                &group.id,
                AddExpenseForm {
                    description: "Milk".into(),
                    amount: amount.into(),
                },
            )
            .await
            .unwrap_err();
            assert!(matches!(error, AppError::Invalid(ref e) if e.field == "amount"));
        }
        assert_eq!(store.revision().await, before);

        let expense = add_expense(
            &context,
            &user("a"),
            &group.id,
            AddExpenseForm {
                description: "Milk".into(),
                amount: "12.50".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(expense.amount, 12.5);
        assert_eq!(expense.split_with, vec!["a"]);
        assert!(expense.date.is_some());
    }

    #[tokio::test]
    async fn outsiders_cannot_write() {
        let context = context_with(Arc::new(MemoryStore::new()));
        let group = create_group(&context, &user("a"), CreateGroupForm { group_name: "Flat".into() })
            .await
            .unwrap();
        let error = settle_up(
            &context,
            &user("z"),
            &group.id,
            SettleUpForm {
                reason: "rent".into(),
                amount: "5".into(),
                to_user_id: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(error, AppError::NotMember));
    }

    #[tokio::test]
    async fn settlement_recipient_must_be_member() {
        let context = context_with(Arc::new(MemoryStore::new()));
        let group = create_group(&context, &user("a"), CreateGroupForm { group_name: "Flat".into() })
            .await
            .unwrap();
        let error = settle_up(
            &context,
            &user("a"),
            &group.id,
            SettleUpForm {
                reason: "rent".into(),
                amount: "5".into(),
                to_user_id: Some("stranger".into()),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(error, AppError::Invalid(ref e) if e.field == "toUserId"));
    }

    #[tokio::test]
    async fn joining_missing_group_mutates_nothing() {
        let store = Arc::new(MemoryStore::new());
        let context = context_with(store.clone());
        create_group(&context, &user("a"), CreateGroupForm { group_name: "Flat".into() })
            .await
            .unwrap();
        let before = store.revision().await;

        let error = join_group(
            &context,
            Some(&user("b")),
            JoinGroupForm {
                group_id: "does-not-exist".into(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(error.to_string(), "Group not found.");
        assert_eq!(store.revision().await, before);
        assert!(store.groups_for_member("b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn joining_needs_id_and_user() {
        let context = context_with(Arc::new(MemoryStore::new()));
        let error = join_group(&context, Some(&user("b")), JoinGroupForm::default())
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "Missing group ID or not logged in.");

        let error = join_group(&context, None, JoinGroupForm { group_id: "x".into() })
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "Missing group ID or not logged in.");
    }

    #[tokio::test]
    async fn join_is_idempotent() {
        let context = context_with(Arc::new(MemoryStore::new()));
        let group = create_group(&context, &user("a"), CreateGroupForm { group_name: "Flat".into() })
            .await
            .unwrap();
        let form = JoinGroupForm {
            group_id: format!(" {} ", group.id),
        };
        join_group(&context, Some(&user("b")), form.clone()).await.unwrap();
        let joined = join_group(&context, Some(&user("b")), form).await.unwrap();
        assert_eq!(joined.message, "Successfully joined the group!");
        assert_eq!(joined.group.member_ids, vec!["a", "b"]);
    }

    #[test]
    fn prefill_trims_the_query() {
        let form = join_prefill(JoinGroupForm {
            group_id: " abc ".into(),
        });
        assert_eq!(form.group_id, "abc");
    }

    #[tokio::test]
    async fn register_requires_display_name() {
        let context = context_with(Arc::new(MemoryStore::new()));
        let error = register(
            &context,
            RegisterForm {
                email: "a@b.co".into(),
                password: "hunter22".into(),
                display_name: "  ".into(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(error.to_string(), "Display name is required.");

        let signed_in = register(
            &context,
            RegisterForm {
                email: "a@b.co".into(),
                password: "hunter22".into(),
                display_name: "Ana".into(),
            },
        )
        .await
        .unwrap();
        let again = login(
            &context,
            LoginForm {
                email: "a@b.co".into(),
                password: "hunter22".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(again.user.uid, signed_in.user.uid);
    }

    #[tokio::test]
    async fn login_surfaces_provider_message() {
        let context = context_with(Arc::new(MemoryStore::new()));
        let error = login(
            &context,
            LoginForm {
                email: "a@b.co".into(),
                password: "whatever".into(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(error.to_string(), "Invalid email or password.");
    }
}
