use std::sync::Arc;

use crate::scheduler::CronScheduleSpec;
use crate::storage::SqliteRunStore;

#[derive(Clone)]
pub struct AppState {
    pub workflows: Arc<Vec<CronScheduleSpec>>,
    pub store: SqliteRunStore,
}

impl AppState {
    pub fn new(workflows: Vec<CronScheduleSpec>, store: SqliteRunStore) -> Self {
        Self {
            workflows: Arc::new(workflows),
            store,
        }
    }

    pub fn workflow(&self, name: &str) -> Option<&CronScheduleSpec> {
        self.workflows.iter().find(|s| s.name == name)
    }
}
