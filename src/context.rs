use std::sync::Arc;

use tracing::info;

use crate::auth::TokenSigner;
use crate::config::{Config, StoreBackend};
use crate::identity::{IdentityProvider, LocalIdentityProvider};
use crate::store::{DocumentStore, MemoryStore, MongoStore, StoreError};

/// Everything a handler or view model needs, built once at startup.
pub struct AppContext {
    pub config: Config,
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
}

impl AppContext {
    /// Connects the configured store backend.
    pub async fn connect(config: Config) -> Result<Self, StoreError> {
        let store: Arc<dyn DocumentStore> = match &config.store {
            StoreBackend::Mongo { uri, database } => {
                Arc::new(MongoStore::connect(uri, database).await?)
            }
            StoreBackend::Memory => {
                info!("Using the in-memory store, data is lost on shutdown");
                Arc::new(MemoryStore::new())
            }
        };
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: Config, store: Arc<dyn DocumentStore>) -> Self {
        let signer = TokenSigner::new(&config.session_secret, config.session_ttl);
        let identity = Arc::new(LocalIdentityProvider::new(store.clone(), signer));
        Self {
            config,
            store,
            identity,
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    pub fn invite_link(&self, group_id: &str) -> String {
        invite_link(&self.config.public_origin, group_id)
    }

    pub async fn shutdown(&self) {
        self.store.close().await;
        info!("Store closed");
    }
}

pub fn invite_link(origin: &str, group_id: &str) -> String {
    format!("{}/join?groupId={}", origin.trim_end_matches('/'), group_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_links_point_at_join() {
        assert_eq!(
            invite_link("https://split.example/", "abc123"),
            "https://split.example/join?groupId=abc123"
        );
    }

    #[tokio::test]
    async fn memory_backend_needs_no_connection() {
        let context = AppContext::connect(Config::default()).await.unwrap();
        assert_eq!(
            context.invite_link("g1"),
            "http://localhost:8080/join?groupId=g1"
        );
        context.shutdown().await;
    }
}
