use std::sync::Arc;

use crate::auth::AuthKeys;
use crate::config::MaintenanceSettings;
use crate::db::JobStore;
use crate::services::{queue::JobDispatcher, storage::BlobStore};

const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub storage: Arc<dyn BlobStore>,
    pub dispatcher: Arc<dyn JobDispatcher>,
    pub auth: Arc<AuthKeys>,
    pub max_image_bytes: usize,
    pub maintenance: MaintenanceSettings,
}

impl AppState {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        storage: Arc<dyn BlobStore>,
        dispatcher: Arc<dyn JobDispatcher>,
        auth: AuthKeys,
    ) -> Self {
        Self {
            jobs,
            storage,
            dispatcher,
            auth: Arc::new(auth),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            maintenance: MaintenanceSettings::default(),
        }
    }

    pub fn with_max_image_bytes(mut self, max_image_bytes: usize) -> Self {
        self.max_image_bytes = max_image_bytes;
        self
    }

    pub fn with_maintenance(mut self, maintenance: MaintenanceSettings) -> Self {
        self.maintenance = maintenance;
        self
    }
}
