//! Shared daemon state.

use crate::config::Config;
use crate::engine::EngineHandle;
use crate::poller::PollerHandle;
use crate::publisher::Publisher;
use facegate_core::Catalog;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Label served by `GET /user` before any verification succeeds.
pub const NO_USER: &str = "NONE";

pub type SharedState = Arc<AppState>;

/// State shared by the HTTP handlers and the poller.
///
/// The catalog is held as an immutable snapshot behind a lock: readers
/// clone the inner `Arc`, mutations build a full replacement and swap it,
/// so a reader never observes a partially-updated catalog.
pub struct AppState {
    pub config: Config,
    pub engine: EngineHandle,
    pub publisher: Publisher,
    pub poller: PollerHandle,
    catalog: RwLock<Arc<Catalog>>,
    last_user: RwLock<String>,
}

impl AppState {
    pub fn new(
        config: Config,
        engine: EngineHandle,
        publisher: Publisher,
        catalog: Catalog,
    ) -> Self {
        Self {
            config,
            engine,
            publisher,
            poller: PollerHandle::new(),
            catalog: RwLock::new(Arc::new(catalog)),
            last_user: RwLock::new(NO_USER.to_string()),
        }
    }

    /// Current catalog snapshot.
    pub async fn catalog(&self) -> Arc<Catalog> {
        self.catalog.read().await.clone()
    }

    /// Atomically publish a replacement catalog.
    pub async fn swap_catalog(&self, catalog: Catalog) {
        *self.catalog.write().await = Arc::new(catalog);
    }

    /// Most recently verified identity (single-slot, last-write-wins).
    pub async fn last_user(&self) -> String {
        self.last_user.read().await.clone()
    }

    /// Record a verified identity. Only successful verifications update
    /// the slot; failed or unknown outcomes leave it untouched.
    pub async fn record_verified(&self, user: &str) {
        *self.last_user.write().await = user.to_string();
    }
}
