//! Application state management

use std::path::Path;
use std::sync::Arc;

use crate::access::{AccessCheck, Permissions};
use crate::config::Config;
use crate::upload::ChunkStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    chunk_store: ChunkStore,
    checker: Arc<dyn AccessCheck>,
    permissions: Permissions,
}

impl AppState {
    /// Create a new application state
    pub fn new(config: Config, checker: Arc<dyn AccessCheck>) -> Self {
        let chunk_store = ChunkStore::new(config.files.staging.clone());
        let permissions = Permissions::from(&config.permissions);
        Self {
            inner: Arc::new(AppStateInner {
                config,
                chunk_store,
                checker,
                permissions,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Host directory backing the virtual root
    pub fn root(&self) -> &Path {
        &self.inner.config.files.root
    }

    /// Get the chunk staging store
    pub fn chunk_store(&self) -> &ChunkStore {
        &self.inner.chunk_store
    }

    /// Get the access checker
    pub fn checker(&self) -> &Arc<dyn AccessCheck> {
        &self.inner.checker
    }

    /// Get the per-operation permission flags
    pub fn permissions(&self) -> Permissions {
        self.inner.permissions
    }
}
