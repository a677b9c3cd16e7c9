use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{JobState, JobTransition, NewScanJob, ScanJob};

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Outcome of a reservation attempt for a (url, requester) pair.
#[derive(Debug)]
pub enum Reservation {
    /// A new job row was created; the caller owns its lifecycle.
    Fresh(ScanJob),
    /// A non-terminal job already exists for the pair.
    Existing(ScanJob),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The compare-and-swap found the job in a different state than
    /// expected. Indicates a duplicate signal or a lost race; logged by the
    /// caller, never surfaced to API clients.
    #[error("job {id} is no longer in state {expected}")]
    Stale { id: Uuid, expected: JobState },

    #[error("job {0} not found")]
    NotFound(Uuid),

    /// Could not settle a reservation against concurrent terminal
    /// transitions.
    #[error("reservation contention for ({url}, {requester})")]
    Contention { url: String, requester: String },

    #[error("job row carries unknown state text: {0}")]
    InvalidState(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable record of job lifecycle state, owned exclusively by the
/// orchestrator. `transition` is a compare-and-swap on the `from` state and
/// is the at-most-once guarantee for terminal transitions.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically create a new pending job for the pair, or return the
    /// existing non-terminal one. Exactly one caller wins a race on the same
    /// pair. The reservation is released implicitly when the job reaches a
    /// terminal state.
    async fn reserve(&self, new: NewScanJob) -> Result<Reservation, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<ScanJob>, StoreError>;

    async fn list_by_state(&self, state: JobState) -> Result<Vec<ScanJob>, StoreError>;

    async fn list_for_requester(&self, requester: &str) -> Result<Vec<ScanJob>, StoreError>;

    /// Apply a transition if and only if the job is currently in `from`.
    async fn transition(
        &self,
        id: Uuid,
        from: JobState,
        transition: JobTransition,
    ) -> Result<ScanJob, StoreError>;
}

pub mod queries;
