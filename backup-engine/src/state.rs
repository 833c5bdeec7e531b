//! Shared collaborators handed to the processor and the coordinator.

use crate::config::Config;
use crate::database::Database;
use crate::scheduler::Scheduler;
use crate::store::JobStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct EngineState {
    pub config: Arc<Config>,
    pub store: Arc<dyn JobStore>,
    pub scheduler: Arc<dyn Scheduler>,
    /// Site database; `None` disables database export and restore
    pub database: Option<Arc<dyn Database>>,
}

impl EngineState {
    pub fn new(
        config: Config,
        store: Arc<dyn JobStore>,
        scheduler: Arc<dyn Scheduler>,
        database: Option<Arc<dyn Database>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            scheduler,
            database,
        }
    }
}
