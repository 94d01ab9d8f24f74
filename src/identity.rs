//! Identity provider seam and the client-side session built on it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::auth::{hash_password, new_salt, verify_password, TokenSigner};
use crate::schemas::{new_id, Account, UserId, UserProfile};
use crate::store::{DocumentStore, StoreError};

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Email is already in use.")]
    EmailInUse,

    #[error("Invalid email or password.")]
    InvalidCredentials,

    #[error("Password should be at least 6 characters.")]
    WeakPassword,

    #[error("Invalid email address.")]
    InvalidEmail,

    #[error("Session is invalid or has expired.")]
    InvalidSession,

    #[error("Could not create a session.")]
    Signing,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => AuthError::EmailInUse,
            other => AuthError::Store(other),
        }
    }
}

/// The signed-in user a request or a session acts for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurrentUser {
    pub uid: UserId,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SignedIn {
    pub token: String,
    pub user: UserProfile,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<SignedIn, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<SignedIn, AuthError>;

    async fn sign_out(&self, token: &str);

    /// The user a live session token belongs to.
    fn verify(&self, token: &str) -> Option<UserId>;

    async fn current_user(&self, token: &str) -> Result<Option<UserProfile>, AuthError>;
}

/// Email/password identity provider keeping its accounts in the document store.
pub struct LocalIdentityProvider {
    store: Arc<dyn DocumentStore>,
    signer: TokenSigner,
    revoked: RwLock<HashSet<String>>,
}

impl LocalIdentityProvider {
    pub fn new(store: Arc<dyn DocumentStore>, signer: TokenSigner) -> Self {
        Self {
            store,
            signer,
            revoked: RwLock::new(HashSet::new()),
        }
    }

    fn issue(&self, user: UserProfile) -> Result<SignedIn, AuthError> {
        let token = self
            .signer
            .issue(&user.uid, Utc::now())
            .ok_or(AuthError::Signing)?;
        Ok(SignedIn { token, user })
    }

    fn is_revoked(&self, token: &str) -> bool {
        // A poisoned lock fails closed
        self.revoked
            .read()
            .map(|revoked| revoked.contains(token))
            .unwrap_or(true)
    }
}

fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(AuthError::InvalidEmail),
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<SignedIn, AuthError> {
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }

        let salt = new_salt();
        let account = Account {
            uid: new_id(),
            email: email.clone(),
            password_hash: hash_password(&salt, password).ok_or(AuthError::Signing)?,
            salt,
        };
        let profile = UserProfile {
            uid: account.uid.clone(),
            email,
            display_name: display_name.trim().to_string(),
        };
        self.store.add_account(account).await?;
        self.store.put_user_profile(profile.clone()).await?;
        info!(uid = %profile.uid, "Registered user");
        self.issue(profile)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<SignedIn, AuthError> {
        let email = email.trim().to_lowercase();
        let account = self
            .store
            .find_account(&email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if !verify_password(&account.salt, password, &account.password_hash) {
            debug!(uid = %account.uid, "Rejected sign-in");
            return Err(AuthError::InvalidCredentials);
        }
        let profile = self
            .store
            .get_user_profile(&account.uid)
            .await?
            .unwrap_or_else(|| UserProfile {
                uid: account.uid.clone(),
                display_name: account.email.clone(),
                email: account.email.clone(),
            });
        self.issue(profile)
    }

    async fn sign_out(&self, token: &str) {
        let Some(uid) = self.verify(token) else {
            return;
        };
        let now = Utc::now();
        if let Ok(mut revoked) = self.revoked.write() {
            // Expired tokens fail verification anyway
            revoked.retain(|old| self.signer.verify(old, now).is_some());
            revoked.insert(token.to_string());
        }
        info!(%uid, "Signed out");
    }

    fn verify(&self, token: &str) -> Option<UserId> {
        if self.is_revoked(token) {
            return None;
        }
        self.signer.verify(token, Utc::now())
    }

    async fn current_user(&self, token: &str) -> Result<Option<UserProfile>, AuthError> {
        let uid = self.verify(token).ok_or(AuthError::InvalidSession)?;
        Ok(self.store.get_user_profile(&uid).await?)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AuthState {
    /// No state known yet.
    Loading,
    SignedOut,
    SignedIn(UserProfile),
}

/// One client's view of authentication. Every auth-state change is published
/// to subscribers, starting from [`AuthState::Loading`].
pub struct Session {
    identity: Arc<dyn IdentityProvider>,
    state: watch::Sender<AuthState>,
    token: Mutex<Option<String>>,
}

impl Session {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        let (state, _) = watch::channel(AuthState::Loading);
        Self {
            identity,
            state,
            token: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn token(&self) -> Option<String> {
        self.token.lock().ok().and_then(|token| token.clone())
    }

    pub fn current_user(&self) -> Option<CurrentUser> {
        match &*self.state.borrow() {
            AuthState::SignedIn(profile) => Some(CurrentUser {
                uid: profile.uid.clone(),
            }),
            _ => None,
        }
    }

    /// Resolves the first known state from a previously stored token.
    pub async fn restore(&self, token: Option<&str>) -> AuthState {
        let profile = match token {
            Some(token) => self.identity.current_user(token).await.ok().flatten(),
            None => None,
        };
        match profile {
            Some(profile) => self.set(token.map(str::to_string), AuthState::SignedIn(profile)),
            None => self.set(None, AuthState::SignedOut),
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<UserProfile, AuthError> {
        let signed_in = self.identity.sign_in(email, password).await?;
        self.set(Some(signed_in.token), AuthState::SignedIn(signed_in.user.clone()));
        Ok(signed_in.user)
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<UserProfile, AuthError> {
        let signed_in = self.identity.register(email, password, display_name).await?;
        self.set(Some(signed_in.token), AuthState::SignedIn(signed_in.user.clone()));
        Ok(signed_in.user)
    }

    pub async fn sign_out(&self) {
        if let Some(token) = self.token() {
            self.identity.sign_out(&token).await;
        }
        self.set(None, AuthState::SignedOut);
    }

    fn set(&self, token: Option<String>, state: AuthState) -> AuthState {
        if let Ok(mut current) = self.token.lock() {
            *current = token;
        }
        self.state.send_replace(state.clone());
        state
    }
}
