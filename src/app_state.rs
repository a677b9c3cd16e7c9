use sqlx::PgPool;
use std::sync::Arc;

use crate::db::JobStore;
use crate::services::orchestrator::Orchestrator;
use crate::services::scanner::ScanBackend;
use crate::services::sink::ResultSink;

/// Shared application state passed to all route handlers. Collaborators are
/// held as trait objects so the orchestrator's dependencies stay injectable.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub store: Arc<dyn JobStore>,
    pub scanner: Arc<dyn ScanBackend>,
    pub sink: Arc<dyn ResultSink>,
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub fn new(
        db: PgPool,
        store: Arc<dyn JobStore>,
        scanner: Arc<dyn ScanBackend>,
        sink: Arc<dyn ResultSink>,
        orchestrator: Orchestrator,
    ) -> Self {
        Self {
            db,
            store,
            scanner,
            sink,
            orchestrator,
        }
    }
}
