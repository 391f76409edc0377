/// Load Module
///
/// Turns a decoded ledger header plus its counts into a `history_ledgers` row and
/// writes it. Row building is pure so it can be checked without a database; the insert
/// reports rows affected and leaves judging that number to the caller.
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::StorageError;
use crate::models::LedgerHeaderHistoryEntry;
use crate::toid::Toid;

/// Version tag written on every ingested row. Bump it whenever the row layout or the
/// way values are derived changes, so old rows can be found and re-ingested.
pub const INGESTION_VERSION: i32 = 16;

/// One row of the `history_ledgers` table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct HistoryLedgerRow {
    pub id: i64,
    pub sequence: i32,
    pub importer_version: i32,
    pub ledger_hash: String,
    /// Absent for the first ledger, which has no predecessor.
    pub previous_ledger_hash: Option<String>,
    pub total_coins: i64,
    pub fee_pool: i64,
    pub base_fee: i32,
    pub base_reserve: i32,
    pub max_tx_set_size: i32,
    pub closed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub transaction_count: i32,
    pub successful_transaction_count: i32,
    pub failed_transaction_count: i32,
    pub operation_count: i32,
    pub protocol_version: i32,
    pub ledger_header: String,
}

impl HistoryLedgerRow {
    /// Build the row for `ledger`. `now` stamps `created_at` and `updated_at`.
    pub fn new(
        ledger: &LedgerHeaderHistoryEntry,
        close_time: i64,
        successful_tx_count: usize,
        failed_tx_count: usize,
        op_count: usize,
        now: DateTime<Utc>,
    ) -> Result<Self, StorageError> {
        let header = &ledger.header;
        let sequence = to_i32("sequence", header.ledger_seq as u64)?;

        let closed_at = DateTime::from_timestamp(close_time, 0)
            .ok_or_else(|| StorageError::Other(format!("close time {} is not a valid timestamp", close_time)))?;

        let previous_ledger_hash = if header.ledger_seq > 1 { Some(ledger.previous_hash_hex()) } else { None };

        Ok(Self {
            id: Toid::new(header.ledger_seq, 0, 0).to_i64(),
            sequence,
            importer_version: INGESTION_VERSION,
            ledger_hash: ledger.hash_hex(),
            previous_ledger_hash,
            total_coins: header.total_coins,
            fee_pool: header.fee_pool,
            base_fee: to_i32("base_fee", header.base_fee as u64)?,
            base_reserve: to_i32("base_reserve", header.base_reserve as u64)?,
            max_tx_set_size: to_i32("max_tx_set_size", header.max_tx_set_size as u64)?,
            closed_at,
            created_at: now,
            updated_at: now,
            transaction_count: to_i32("transaction_count", successful_tx_count as u64)?,
            successful_transaction_count: to_i32("successful_transaction_count", successful_tx_count as u64)?,
            failed_transaction_count: to_i32("failed_transaction_count", failed_tx_count as u64)?,
            operation_count: to_i32("operation_count", op_count as u64)?,
            protocol_version: to_i32("protocol_version", header.ledger_version as u64)?,
            ledger_header: header.to_base64()?,
        })
    }
}

pub(crate) fn to_i32(column: &'static str, value: u64) -> Result<i32, StorageError> {
    i32::try_from(value).map_err(|_| StorageError::OutOfRange { column, value })
}

/// Only a repeated sequence is tolerated; any other unique violation is a database error.
const INSERT_LEDGER: &str = r#"
    INSERT INTO history_ledgers (
        id,
        sequence,
        importer_version,
        ledger_hash,
        previous_ledger_hash,
        total_coins,
        fee_pool,
        base_fee,
        base_reserve,
        max_tx_set_size,
        closed_at,
        created_at,
        updated_at,
        transaction_count,
        successful_transaction_count,
        failed_transaction_count,
        operation_count,
        protocol_version,
        ledger_header
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
    ON CONFLICT (sequence) DO NOTHING
    "#;

/// Insert a ledger row into the database
///
/// A row whose sequence is already present is left untouched and reported as zero rows
/// affected; deciding what that means is up to the caller. A hash already recorded for a
/// different sequence fails the insert.
///
/// Returns the number of rows affected.
pub async fn insert_ledger_row(pool: &PgPool, row: &HistoryLedgerRow) -> Result<u64, StorageError> {
    let result = sqlx::query(INSERT_LEDGER)
        .bind(row.id)
        .bind(row.sequence)
        .bind(row.importer_version)
        .bind(&row.ledger_hash)
        .bind(&row.previous_ledger_hash)
        .bind(row.total_coins)
        .bind(row.fee_pool)
        .bind(row.base_fee)
        .bind(row.base_reserve)
        .bind(row.max_tx_set_size)
        .bind(row.closed_at)
        .bind(row.created_at)
        .bind(row.updated_at)
        .bind(row.transaction_count)
        .bind(row.successful_transaction_count)
        .bind(row.failed_transaction_count)
        .bind(row.operation_count)
        .bind(row.protocol_version)
        .bind(&row.ledger_header)
        .execute(pool)
        .await?;

    tracing::debug!("Inserted ledger {} ({} rows affected)", row.sequence, result.rows_affected());
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LedgerHeader;
    use chrono::TimeZone;

    fn entry(seq: u32) -> LedgerHeaderHistoryEntry {
        LedgerHeaderHistoryEntry {
            hash: [0xab; 32],
            header: LedgerHeader {
                ledger_version: 13,
                previous_ledger_hash: [0x01; 32],
                ledger_seq: seq,
                total_coins: 1_000_000,
                fee_pool: 500,
                base_fee: 100,
                base_reserve: 5_000_000,
                max_tx_set_size: 1_000,
            },
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn test_row_fields() {
        let row = HistoryLedgerRow::new(&entry(69_859), 1_234, 2, 1, 5, now()).unwrap();

        assert_eq!(row.id, Toid::new(69_859, 0, 0).to_i64());
        assert_eq!(row.sequence, 69_859);
        assert_eq!(row.importer_version, INGESTION_VERSION);
        assert_eq!(row.ledger_hash, "ab".repeat(32));
        assert_eq!(row.previous_ledger_hash, Some("01".repeat(32)));
        assert_eq!(row.total_coins, 1_000_000);
        assert_eq!(row.fee_pool, 500);
        assert_eq!(row.base_fee, 100);
        assert_eq!(row.base_reserve, 5_000_000);
        assert_eq!(row.max_tx_set_size, 1_000);
        assert_eq!(row.closed_at, Utc.timestamp_opt(1_234, 0).unwrap());
        assert_eq!(row.created_at, now());
        assert_eq!(row.updated_at, now());
        assert_eq!(row.transaction_count, 2);
        assert_eq!(row.successful_transaction_count, 2);
        assert_eq!(row.failed_transaction_count, 1);
        assert_eq!(row.operation_count, 5);
        assert_eq!(row.protocol_version, 13);
        assert_eq!(row.ledger_header, entry(69_859).header.to_base64().unwrap());
    }

    #[test]
    fn test_first_ledger_has_no_previous_hash() {
        let row = HistoryLedgerRow::new(&entry(1), 0, 0, 0, 0, now()).unwrap();
        assert_eq!(row.previous_ledger_hash, None);

        let row = HistoryLedgerRow::new(&entry(2), 0, 0, 0, 0, now()).unwrap();
        assert_eq!(row.previous_ledger_hash, Some("01".repeat(32)));
    }

    #[test]
    fn test_row_is_deterministic() {
        let a = HistoryLedgerRow::new(&entry(10), 99, 1, 1, 1, now()).unwrap();
        let b = HistoryLedgerRow::new(&entry(10), 99, 1, 1, 1, now()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_out_of_range_values() {
        let err = HistoryLedgerRow::new(&entry(u32::MAX), 0, 0, 0, 0, now()).unwrap_err();
        assert!(matches!(err, StorageError::OutOfRange { column: "sequence", .. }));

        let err = HistoryLedgerRow::new(&entry(3), 0, 0, 0, usize::MAX, now()).unwrap_err();
        assert!(matches!(err, StorageError::OutOfRange { column: "operation_count", .. }));
    }

    #[test]
    fn test_insert_only_tolerates_repeated_sequence() {
        assert!(INSERT_LEDGER.contains("ON CONFLICT (sequence) DO NOTHING"));
        assert!(!INSERT_LEDGER.contains("ON CONFLICT DO NOTHING"));
    }
}
