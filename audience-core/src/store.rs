//! Append-only observation log
//!
//! The log is the only state that outlives a submission. Observations are appended,
//! never updated or deleted, and read back in insertion order so "latest" is
//! well-defined when two observations share a date.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::AudienceError;
use crate::models::{Observation, Platform};

#[async_trait]
pub trait ObservationStore: Send + Sync {
    async fn append(&self, observation: &Observation) -> Result<(), AudienceError>;

    /// All observations for exactly this `(account, identity)` pair, oldest insert first.
    async fn query_by_identity(
        &self,
        account: &str,
        identity: &str,
    ) -> Result<Vec<Observation>, AudienceError>;

    /// Store name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Postgres
// ============================================================================

#[derive(Debug, Clone)]
pub struct PgObservationStore {
    pool: PgPool,
}

impl PgObservationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ObservationRow {
    id: Uuid,
    recorded_at: DateTime<Utc>,
    date: NaiveDate,
    identity: String,
    platform: String,
    account: String,
    followers: i64,
    evolution: Option<i64>,
}

impl From<ObservationRow> for Observation {
    fn from(row: ObservationRow) -> Self {
        Observation {
            id: row.id,
            recorded_at: row.recorded_at,
            date: row.date,
            identity: row.identity,
            platform: row.platform.parse().unwrap_or(Platform::Unknown),
            account: row.account,
            followers: row.followers,
            evolution: row.evolution,
        }
    }
}

#[async_trait]
impl ObservationStore for PgObservationStore {
    async fn append(&self, observation: &Observation) -> Result<(), AudienceError> {
        sqlx::query(
            r#"
            INSERT INTO observations (id, recorded_at, date, identity, platform, account, followers, evolution)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(observation.id)
        .bind(observation.recorded_at)
        .bind(observation.date)
        .bind(&observation.identity)
        .bind(observation.platform.as_str())
        .bind(&observation.account)
        .bind(observation.followers)
        .bind(observation.evolution)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query_by_identity(
        &self,
        account: &str,
        identity: &str,
    ) -> Result<Vec<Observation>, AudienceError> {
        let rows = sqlx::query_as::<_, ObservationRow>(
            r#"
            SELECT id, recorded_at, date, identity, platform, account, followers, evolution
            FROM observations
            WHERE account = $1 AND identity = $2
            ORDER BY seq ASC
            "#,
        )
        .bind(account)
        .bind(identity)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Observation::from).collect())
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local store, used by tests and `--dry-run`.
#[derive(Debug, Default)]
pub struct InMemoryObservationStore {
    rows: Mutex<Vec<Observation>>,
}

impl InMemoryObservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observations(observations: Vec<Observation>) -> Self {
        Self {
            rows: Mutex::new(observations),
        }
    }

    pub async fn snapshot(&self) -> Vec<Observation> {
        self.rows.lock().await.clone()
    }
}

#[async_trait]
impl ObservationStore for InMemoryObservationStore {
    async fn append(&self, observation: &Observation) -> Result<(), AudienceError> {
        self.rows.lock().await.push(observation.clone());
        Ok(())
    }

    async fn query_by_identity(
        &self,
        account: &str,
        identity: &str,
    ) -> Result<Vec<Observation>, AudienceError> {
        Ok(self
            .rows
            .lock()
            .await
            .iter()
            .filter(|o| o.account == account && o.identity == identity)
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
