//! # critique-db
//!
//! Durable profile and job stores for the critique pipeline.
//!
//! Two implementations of each repository trait from `critique-core` ship
//! here: PostgreSQL (via `sqlx`) for deployments, and in-process stores with
//! the same contracts for tests and database-less runs. [`Stores`] bundles
//! either pair behind trait objects so the orchestrator never cares which.

pub mod jobs;
pub mod memory;
pub mod pool;
pub mod profiles;

use std::sync::Arc;

use tokio::sync::Notify;

pub use critique_core::*;
pub use jobs::PgJobRepository;
pub use memory::{MemoryJobRepository, MemoryProfileRepository};
pub use pool::PoolConfig;
pub use profiles::PgProfileRepository;

/// PostgreSQL-backed repositories sharing one pool.
#[derive(Clone)]
pub struct Database {
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub profiles: Arc<PgProfileRepository>,
    pub jobs: Arc<PgJobRepository>,
}

impl Database {
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            profiles: Arc::new(PgProfileRepository::new(pool.clone())),
            jobs: Arc::new(PgJobRepository::new(pool.clone())),
            pool,
        }
    }

    /// Connect with the default pool configuration.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(url, PoolConfig::default()).await
    }

    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = pool::connect(url, &config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

/// The profile and job stores the pipeline runs against.
#[derive(Clone)]
pub struct Stores {
    pub profiles: Arc<dyn ProfileRepository>,
    pub jobs: Arc<dyn JobRepository>,
    /// Signalled whenever a job is queued.
    pub job_notify: Arc<Notify>,
    /// Present when backed by PostgreSQL.
    pub database: Option<Database>,
}

impl Stores {
    pub fn postgres(db: Database) -> Self {
        Self {
            profiles: db.profiles.clone(),
            jobs: db.jobs.clone(),
            job_notify: db.jobs.job_notify(),
            database: Some(db),
        }
    }

    pub fn in_memory() -> Self {
        let jobs = Arc::new(MemoryJobRepository::new());
        Self {
            profiles: Arc::new(MemoryProfileRepository::new()),
            job_notify: jobs.job_notify(),
            jobs,
            database: None,
        }
    }

    /// `true` when the backing store answers (always for in-process stores).
    pub async fn is_healthy(&self) -> bool {
        match &self.database {
            Some(db) => db.ping().await.is_ok(),
            None => true,
        }
    }
}
