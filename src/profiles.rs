use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::schemas::{UserId, UserProfile};
use crate::store::DocumentStore;

pub const SELF_LABEL: &str = "You";

/// Turns user ids into display names for one view.
///
/// Found profiles are cached for the resolver's lifetime and never fetched
/// twice. A missing profile falls back to the raw id and is retried on the
/// next lookup.
pub struct ProfileResolver {
    store: Arc<dyn DocumentStore>,
    viewer: UserId,
    cache: HashMap<UserId, UserProfile>,
}

impl ProfileResolver {
    pub fn new(store: Arc<dyn DocumentStore>, viewer: impl Into<UserId>) -> Self {
        Self {
            store,
            viewer: viewer.into(),
            cache: HashMap::new(),
        }
    }

    pub async fn resolve(&mut self, uid: &str) -> Option<&UserProfile> {
        if !self.cache.contains_key(uid) {
            match self.store.get_user_profile(uid).await {
                Ok(Some(profile)) => {
                    self.cache.insert(uid.to_string(), profile);
                }
                Ok(None) => {}
                Err(err) => warn!(%uid, "Error fetching user: {err}"),
            }
        }
        self.cache.get(uid)
    }

    /// Resolves every id not seen yet, the viewer excluded.
    pub async fn prefetch<'a>(&mut self, uids: impl IntoIterator<Item = &'a str>) {
        for uid in uids {
            if uid != self.viewer {
                self.resolve(uid).await;
            }
        }
    }

    /// Display name from what has been resolved so far.
    pub fn display_name(&self, uid: &str) -> String {
        if uid == self.viewer {
            return SELF_LABEL.to_string();
        }
        self.cache
            .get(uid)
            .map(|profile| profile.display_name.clone())
            .unwrap_or_else(|| uid.to_string())
    }

    pub async fn resolve_name(&mut self, uid: &str) -> String {
        if uid != self.viewer {
            self.resolve(uid).await;
        }
        self.display_name(uid)
    }
}
