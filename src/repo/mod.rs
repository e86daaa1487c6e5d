//! Repository layer: a thin wrapper over the ledger database. The teacher's
//! `Repositories` aggregate (many Postgres-backed repos behind a `db`
//! feature) collapses to one, since this crate has exactly one store.

pub mod ledger;

use anyhow::Result;

use crate::config::DatabaseConfig;
use crate::database::Database;

pub use ledger::LedgerRepository;

/// Owns the ledger database and hands out the repository that reads/writes
/// it. A single `system_id`'s worth of state lives behind this one pool;
/// there is no multi-tenant registry to assemble.
pub struct Repositories {
    pub ledger: LedgerRepository,
}

impl Repositories {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let db = Database::new(config).await?;
        Ok(Self {
            ledger: LedgerRepository::new(db.pool().clone()),
        })
    }
}
