/// Core Database Backend
///
/// Serves raw ledger close meta straight out of a core node's PostgreSQL database,
/// from a `ledger_close_meta (sequence INTEGER, meta BYTEA)` table.
use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::BackendError;
use crate::rpc::LedgerBackend;

pub struct DatabaseBackend {
    pool: PgPool,
}

impl DatabaseBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerBackend for DatabaseBackend {
    async fn get_ledger(&self, sequence: u32) -> Result<Option<Vec<u8>>, BackendError> {
        tracing::debug!("Loading ledger {} from core database", sequence);

        let sequence = i32::try_from(sequence).map_err(|_| BackendError::SequenceOutOfRange(sequence as i64))?;
        let meta: Option<Vec<u8>> = sqlx::query_scalar("SELECT meta FROM ledger_close_meta WHERE sequence = $1")
            .bind(sequence)
            .fetch_optional(&self.pool)
            .await?;

        Ok(meta)
    }

    async fn latest_ledger_sequence(&self) -> Result<u32, BackendError> {
        let latest: Option<i32> =
            sqlx::query_scalar("SELECT MAX(sequence) FROM ledger_close_meta").fetch_one(&self.pool).await?;

        let latest = latest.ok_or_else(|| BackendError::InvalidResponse("core database has no ledgers".to_string()))?;
        u32::try_from(latest).map_err(|_| BackendError::SequenceOutOfRange(latest as i64))
    }
}
