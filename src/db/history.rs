/// History Ledger Queries
///
/// The gateway the processing stage writes through ([`LedgersQ`]) and the read queries
/// over `history_ledgers` that operators and the runner use.
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use crate::error::StorageError;
use crate::etl::load::{insert_ledger_row, to_i32, HistoryLedgerRow};
use crate::models::LedgerHeaderHistoryEntry;
use crate::toid::{Toid, MAX_LEDGER_SEQUENCE};

#[cfg(test)]
use mockall::automock;

/// Number of trailing ledgers averaged by [`HistoryQ::ledger_capacity_usage_stats`].
pub const CAPACITY_USAGE_LEDGERS: u32 = 5;

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 200;

/// Ledger writes needed by the processing stage.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LedgersQ: Send + Sync {
    /// Insert the history row for `ledger`. Returns the number of rows affected.
    async fn insert_ledger(
        &self,
        ledger: &LedgerHeaderHistoryEntry,
        close_time: i64,
        successful_tx_count: usize,
        failed_tx_count: usize,
        op_count: usize,
    ) -> Result<u64, StorageError>;

    /// Hex hash of an already ingested ledger, if present.
    async fn ledger_hash_by_sequence(&self, sequence: u32) -> Result<Option<String>, StorageError>;
}

/// Share of the maximum transaction set size used by recent ledgers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerCapacityUsageStats {
    pub capacity_usage: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOrder {
    Asc,
    Desc,
}

/// Keyset paging over `history_ledgers.id`.
///
/// Rows strictly after the cursor in `order` are returned; no cursor starts at the
/// first (ascending) or last (descending) ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    pub cursor: Option<i64>,
    pub order: PageOrder,
    pub limit: u32,
}

impl PageQuery {
    pub fn new(cursor: Option<i64>, order: PageOrder, limit: u32) -> Result<Self, StorageError> {
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(StorageError::Other(format!("limit must be between 1 and {}", MAX_PAGE_LIMIT)));
        }

        if let Some(id) = cursor {
            if Toid::parse(id).is_none() {
                return Err(StorageError::Other(format!("invalid cursor: {}", id)));
            }
        }

        Ok(Self { cursor, order, limit })
    }

    /// Page whose first row is ledger `sequence` (when present), walking in `order`.
    pub fn from_ledger(sequence: u32, order: PageOrder, limit: u32) -> Result<Self, StorageError> {
        if sequence > MAX_LEDGER_SEQUENCE {
            return Err(StorageError::OutOfRange { column: "sequence", value: sequence as u64 });
        }

        let cursor = match order {
            PageOrder::Asc => Toid::new(sequence, 0, 0).to_i64().checked_sub(1).filter(|id| *id >= 0),
            // Past the last representable ledger there is nothing to bound.
            PageOrder::Desc => Toid::after_ledger(sequence),
        };

        Self::new(cursor, order, limit)
    }

    fn sql(&self) -> String {
        let (comparison, direction) = match self.order {
            PageOrder::Asc => (">", "ASC"),
            PageOrder::Desc => ("<", "DESC"),
        };
        let filter = if self.cursor.is_some() { format!("WHERE hl.id {} $1", comparison) } else { String::new() };

        format!("{} {} ORDER BY hl.id {} LIMIT {}", SELECT_LEDGER, filter, direction, self.limit)
    }
}

impl Default for PageQuery {
    fn default() -> Self {
        Self { cursor: None, order: PageOrder::Asc, limit: DEFAULT_PAGE_LIMIT }
    }
}

fn sequence_param(sequence: u32) -> Result<i32, StorageError> {
    to_i32("sequence", sequence as u64)
}

fn sequence_from_row(sequence: i32) -> Result<u32, StorageError> {
    u32::try_from(sequence)
        .map_err(|_| StorageError::Other(format!("negative ledger sequence {} in history", sequence)))
}

/// History queries backed by PostgreSQL.
#[derive(Clone)]
pub struct HistoryQ {
    pool: PgPool,
}

const SELECT_LEDGER: &str = r#"
    SELECT
        hl.id,
        hl.sequence,
        hl.importer_version,
        hl.ledger_hash,
        hl.previous_ledger_hash,
        hl.transaction_count,
        hl.successful_transaction_count,
        hl.failed_transaction_count,
        hl.operation_count,
        hl.closed_at,
        hl.created_at,
        hl.updated_at,
        hl.total_coins,
        hl.fee_pool,
        hl.base_fee,
        hl.base_reserve,
        hl.max_tx_set_size,
        hl.protocol_version,
        hl.ledger_header
    FROM history_ledgers hl
"#;

impl HistoryQ {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load the single ledger at `sequence`
    pub async fn ledger_by_sequence(&self, sequence: u32) -> Result<Option<HistoryLedgerRow>, StorageError> {
        let sql = format!("{} WHERE hl.sequence = $1 LIMIT 1", SELECT_LEDGER);
        let sequence = sequence_param(sequence)?;
        let row = sqlx::query_as::<_, HistoryLedgerRow>(&sql).bind(sequence).fetch_optional(&self.pool).await?;

        Ok(row)
    }

    /// Load the ledgers with the given sequences, ordered by sequence
    pub async fn ledgers_by_sequence(&self, sequences: &[u32]) -> Result<Vec<HistoryLedgerRow>, StorageError> {
        if sequences.is_empty() {
            return Err(StorageError::Other("no sequence arguments provided".to_string()));
        }

        let sequences = sequences.iter().map(|s| sequence_param(*s)).collect::<Result<Vec<i32>, _>>()?;
        let sql = format!("{} WHERE hl.sequence = ANY($1) ORDER BY hl.sequence", SELECT_LEDGER);
        let rows = sqlx::query_as::<_, HistoryLedgerRow>(&sql).bind(sequences).fetch_all(&self.pool).await?;

        Ok(rows)
    }

    /// Highest ingested sequence, or `None` for an empty store
    pub async fn latest_ledger_sequence(&self) -> Result<Option<u32>, StorageError> {
        let latest: Option<i32> =
            sqlx::query_scalar("SELECT MAX(sequence) FROM history_ledgers").fetch_one(&self.pool).await?;

        latest.map(sequence_from_row).transpose()
    }

    /// One page of ledgers ordered by id
    pub async fn ledgers_page(&self, page: &PageQuery) -> Result<Vec<HistoryLedgerRow>, StorageError> {
        let sql = page.sql();
        let mut query = sqlx::query_as::<_, HistoryLedgerRow>(&sql);
        if let Some(cursor) = page.cursor {
            query = query.bind(cursor);
        }

        Ok(query.fetch_all(&self.pool).await?)
    }

    /// Operation count over max transaction set size for the last
    /// [`CAPACITY_USAGE_LEDGERS`] ledgers up to and including `current_sequence`.
    pub async fn ledger_capacity_usage_stats(
        &self,
        current_sequence: u32,
    ) -> Result<LedgerCapacityUsageStats, StorageError> {
        let first = current_sequence.saturating_sub(CAPACITY_USAGE_LEDGERS - 1);
        let ids = Toid::ledger_range_inclusive(first, current_sequence)
            .ok_or(StorageError::OutOfRange { column: "sequence", value: current_sequence as u64 })?;

        let capacity_usage: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT CAST(
                ROUND(SUM(CAST(operation_count AS DECIMAL)) / NULLIF(SUM(max_tx_set_size), 0), 2)
                AS DOUBLE PRECISION
            )
            FROM history_ledgers
            WHERE id BETWEEN $1 AND $2
            "#,
        )
        .bind(*ids.start())
        .bind(*ids.end())
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerCapacityUsageStats { capacity_usage })
    }
}

#[async_trait]
impl LedgersQ for HistoryQ {
    async fn insert_ledger(
        &self,
        ledger: &LedgerHeaderHistoryEntry,
        close_time: i64,
        successful_tx_count: usize,
        failed_tx_count: usize,
        op_count: usize,
    ) -> Result<u64, StorageError> {
        let row =
            HistoryLedgerRow::new(ledger, close_time, successful_tx_count, failed_tx_count, op_count, Utc::now())?;
        insert_ledger_row(&self.pool, &row).await
    }

    async fn ledger_hash_by_sequence(&self, sequence: u32) -> Result<Option<String>, StorageError> {
        let sequence = sequence_param(sequence)?;
        let hash: Option<String> = sqlx::query_scalar("SELECT ledger_hash FROM history_ledgers WHERE sequence = $1")
            .bind(sequence)
            .fetch_optional(&self.pool)
            .await?;

        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_history() -> HistoryQ {
        HistoryQ::new(PgPoolOptions::new().connect_lazy("postgres://localhost/history").unwrap())
    }

    #[tokio::test]
    async fn test_ledgers_by_sequence_requires_arguments() {
        let err = lazy_history().ledgers_by_sequence(&[]).await.unwrap_err();
        assert_eq!(err.to_string(), "no sequence arguments provided");
    }

    #[tokio::test]
    async fn test_sequence_beyond_column_is_rejected() {
        let q = lazy_history();
        let too_big = MAX_LEDGER_SEQUENCE + 1;

        let err = q.ledger_by_sequence(too_big).await.unwrap_err();
        assert!(matches!(err, StorageError::OutOfRange { column: "sequence", .. }));
        assert!(matches!(q.ledgers_by_sequence(&[1, u32::MAX]).await, Err(StorageError::OutOfRange { .. })));
        assert!(matches!(q.ledger_hash_by_sequence(too_big).await, Err(StorageError::OutOfRange { .. })));
        for current in [too_big, too_big + 4, u32::MAX] {
            assert!(matches!(q.ledger_capacity_usage_stats(current).await, Err(StorageError::OutOfRange { .. })));
        }
    }

    #[test]
    fn test_negative_row_sequence_is_an_error() {
        assert_eq!(sequence_from_row(42).unwrap(), 42);
        assert!(sequence_from_row(-1).is_err());
    }

    #[test]
    fn test_page_limits() {
        assert!(PageQuery::new(None, PageOrder::Asc, 0).is_err());
        assert!(PageQuery::new(None, PageOrder::Asc, MAX_PAGE_LIMIT + 1).is_err());
        assert!(PageQuery::new(Some(-5), PageOrder::Desc, 10).is_err());
        assert_eq!(PageQuery::default().limit, DEFAULT_PAGE_LIMIT);
    }

    #[test]
    fn test_page_from_ledger_includes_that_ledger() {
        let asc = PageQuery::from_ledger(8, PageOrder::Asc, 5).unwrap();
        assert_eq!(asc.cursor, Some(Toid::new(8, 0, 0).to_i64() - 1));

        let desc = PageQuery::from_ledger(8, PageOrder::Desc, 5).unwrap();
        assert_eq!(desc.cursor, Some(Toid::new(9, 0, 0).to_i64()));

        assert_eq!(PageQuery::from_ledger(0, PageOrder::Asc, 5).unwrap().cursor, None);
    }

    #[test]
    fn test_page_from_last_ledger_is_unbounded() {
        let page = PageQuery::from_ledger(MAX_LEDGER_SEQUENCE, PageOrder::Desc, 5).unwrap();
        assert_eq!(page.cursor, None);
        assert!(PageQuery::from_ledger(MAX_LEDGER_SEQUENCE + 1, PageOrder::Desc, 5).is_err());
    }

    #[test]
    fn test_page_sql() {
        let sql = PageQuery::from_ledger(8, PageOrder::Desc, 5).unwrap().sql();
        assert!(sql.contains("WHERE hl.id < $1 ORDER BY hl.id DESC LIMIT 5"));

        let sql = PageQuery::default().sql();
        assert!(!sql.contains("WHERE"));
        assert!(sql.contains("ORDER BY hl.id ASC LIMIT 10"));
    }
}
