/// Extract Module
///
/// Fetches one ledger from the backend, decodes it, and exposes it through [`LedgerReader`].
use chrono::DateTime;
use std::vec::IntoIter;

use crate::error::ReaderError;
use crate::etl::{transform::LedgerCounts, LedgerReader};
use crate::models::{Change, LedgerCloseMeta, LedgerHeaderHistoryEntry, LedgerTransaction};
use crate::rpc::LedgerBackend;

/// Reader over a single ledger fetched from a [`LedgerBackend`].
///
/// Construction performs the only fetch and decode; everything after that is in memory.
#[derive(Debug)]
pub struct BackendLedgerReader {
    sequence: u32,
    header: LedgerHeaderHistoryEntry,
    close_time: i64,
    counts: LedgerCounts,
    transactions: IntoIter<LedgerTransaction>,
    upgrade_changes: IntoIter<Change>,
    closed: bool,
}

impl BackendLedgerReader {
    pub async fn new(sequence: u32, backend: &dyn LedgerBackend) -> Result<Self, ReaderError> {
        let raw = backend
            .get_ledger(sequence)
            .await
            .map_err(|source| ReaderError::Backend { sequence, source })?
            .ok_or(ReaderError::NotFound { sequence })?;

        let meta = LedgerCloseMeta::from_bytes(&raw)
            .map_err(|e| ReaderError::Decode { sequence, reason: e.to_string() })?;

        Self::from_meta(sequence, meta)
    }

    /// Build a reader from an already decoded payload.
    ///
    /// The payload must describe `sequence` and carry a representable close time; anything
    /// else is a decode error for this request, never a row for some other ledger.
    pub fn from_meta(sequence: u32, meta: LedgerCloseMeta) -> Result<Self, ReaderError> {
        check_header(sequence, &meta)?;
        let transactions = pair_transactions(sequence, &meta)?;
        let counts = LedgerCounts::from_transactions(&transactions);

        let upgrade_changes: Vec<Change> =
            meta.upgrades.iter().flat_map(|upgrade| Change::from_entry_changes(&upgrade.changes)).collect();

        tracing::debug!(
            "Decoded ledger {}: {} transactions ({} failed), {} operations, {} upgrade changes",
            sequence,
            counts.total_transactions(),
            counts.failed_transactions,
            counts.successful_operations,
            upgrade_changes.len()
        );

        Ok(Self {
            sequence,
            header: meta.ledger,
            close_time: meta.close_time,
            counts,
            transactions: transactions.into_iter(),
            upgrade_changes: upgrade_changes.into_iter(),
            closed: false,
        })
    }
}

fn check_header(sequence: u32, meta: &LedgerCloseMeta) -> Result<(), ReaderError> {
    let header_sequence = meta.ledger.sequence();
    if header_sequence != sequence {
        return Err(ReaderError::Decode {
            sequence,
            reason: format!("payload header is for ledger {}", header_sequence),
        });
    }

    if DateTime::from_timestamp(meta.close_time, 0).is_none() {
        return Err(ReaderError::Decode {
            sequence,
            reason: format!("close time {} is not a valid timestamp", meta.close_time),
        });
    }

    Ok(())
}

/// Zip the parallel per-transaction sequences into one record per transaction.
fn pair_transactions(sequence: u32, meta: &LedgerCloseMeta) -> Result<Vec<LedgerTransaction>, ReaderError> {
    let count = meta.transaction_envelope.len();
    if meta.transaction_result.len() != count
        || meta.transaction_meta.len() != count
        || meta.transaction_fee_changes.len() != count
    {
        return Err(ReaderError::Decode {
            sequence,
            reason: format!(
                "mismatched transaction data: {} envelopes, {} results, {} metas, {} fee changes",
                count,
                meta.transaction_result.len(),
                meta.transaction_meta.len(),
                meta.transaction_fee_changes.len()
            ),
        });
    }

    let transactions = meta
        .transaction_envelope
        .iter()
        .zip(&meta.transaction_result)
        .zip(&meta.transaction_meta)
        .zip(&meta.transaction_fee_changes)
        .enumerate()
        .map(|(i, (((envelope, result), tx_meta), fee_changes))| LedgerTransaction {
            index: i as u32 + 1,
            envelope: envelope.clone(),
            result: result.clone(),
            meta: tx_meta.clone(),
            fee_changes: fee_changes.clone(),
        })
        .collect();

    Ok(transactions)
}

impl LedgerReader for BackendLedgerReader {
    fn get_sequence(&self) -> u32 {
        self.sequence
    }

    fn get_header(&self) -> LedgerHeaderHistoryEntry {
        self.header.clone()
    }

    fn close_time(&self) -> i64 {
        self.close_time
    }

    fn successful_transaction_count(&self) -> usize {
        self.counts.successful_transactions
    }

    fn failed_transaction_count(&self) -> usize {
        self.counts.failed_transactions
    }

    fn successful_ledger_operation_count(&self) -> usize {
        self.counts.successful_operations
    }

    fn read(&mut self) -> Result<Option<LedgerTransaction>, ReaderError> {
        if self.closed {
            return Err(ReaderError::Closed);
        }
        Ok(self.transactions.next())
    }

    fn read_upgrade_change(&mut self) -> Result<Option<Change>, ReaderError> {
        if self.closed {
            return Err(ReaderError::Closed);
        }
        Ok(self.upgrade_changes.next())
    }

    fn close(&mut self) -> Result<(), ReaderError> {
        self.closed = true;
        // Drop whatever the caller did not drain.
        self.transactions = Vec::new().into_iter();
        self.upgrade_changes = Vec::new().into_iter();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::models::{
        LedgerEntry, LedgerEntryChange, Operation, TransactionEnvelope, TransactionMeta, TransactionResultCode,
        TransactionResultPair, UpgradeEntryMeta,
    };
    use crate::rpc::MockLedgerBackend;
    use mockall::predicate::eq;

    /// `meta` stamped as the close of ledger `sequence`.
    fn at(sequence: u32, meta: &LedgerCloseMeta) -> LedgerCloseMeta {
        let mut meta = meta.clone();
        meta.ledger.header.ledger_seq = sequence;
        meta
    }

    fn backend_returning(sequence: u32, meta: &LedgerCloseMeta) -> MockLedgerBackend {
        let bytes = at(sequence, meta).to_bytes().unwrap();
        let mut backend = MockLedgerBackend::new();
        backend.expect_get_ledger().with(eq(sequence)).times(1).returning(move |_| Ok(Some(bytes.clone())));
        backend
    }

    fn envelope(ops: usize) -> TransactionEnvelope {
        let mut envelope = TransactionEnvelope::default();
        envelope.tx.operations = vec![Operation::default(); ops];
        envelope
    }

    fn result(code: TransactionResultCode) -> TransactionResultPair {
        let mut pair = TransactionResultPair::default();
        pair.result.code = code;
        pair
    }

    fn three_transactions() -> LedgerCloseMeta {
        LedgerCloseMeta {
            transaction_envelope: vec![envelope(1), envelope(2), envelope(3)],
            transaction_result: vec![
                result(TransactionResultCode::TxSuccess),
                result(TransactionResultCode::TxBadAuth),
                result(TransactionResultCode::TxSuccess),
            ],
            transaction_meta: vec![TransactionMeta::default(); 3],
            transaction_fee_changes: vec![vec![]; 3],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_close_time() {
        let backend = backend_returning(1, &LedgerCloseMeta { close_time: 1234, ..Default::default() });

        let reader = BackendLedgerReader::new(1, &backend).await.unwrap();
        assert_eq!(reader.close_time(), 1234);
        assert_eq!(reader.get_sequence(), 1);
    }

    #[tokio::test]
    async fn test_empty_ledger_counts() {
        let backend = backend_returning(1, &LedgerCloseMeta::default());

        let mut reader = BackendLedgerReader::new(1, &backend).await.unwrap();
        assert_eq!(reader.successful_transaction_count(), 0);
        assert_eq!(reader.failed_transaction_count(), 0);
        assert_eq!(reader.successful_ledger_operation_count(), 0);
        assert!(reader.read().unwrap().is_none());
        assert!(reader.read_upgrade_change().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ledger_reader_counts() {
        let backend = backend_returning(1, &three_transactions());

        let reader = BackendLedgerReader::new(1, &backend).await.unwrap();
        assert_eq!(reader.successful_transaction_count(), 2);
        assert_eq!(reader.failed_transaction_count(), 1);
        assert_eq!(reader.successful_ledger_operation_count(), 4);
    }

    #[tokio::test]
    async fn test_read_yields_paired_transactions_once() {
        let backend = backend_returning(8, &three_transactions());
        let mut reader = BackendLedgerReader::new(8, &backend).await.unwrap();

        let mut seen = Vec::new();
        while let Some(tx) = reader.read().unwrap() {
            seen.push((tx.index, tx.envelope.operation_count(), tx.successful()));
        }

        assert_eq!(seen, vec![(1, 1, true), (2, 2, false), (3, 3, true)]);
        assert!(reader.read().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_upgrade_changes() {
        let entry = LedgerEntry { last_modified_ledger_seq: 4, key: vec![7], data: vec![1, 2] };
        let meta = LedgerCloseMeta {
            upgrades: vec![
                UpgradeEntryMeta { upgrade: vec![1], changes: vec![LedgerEntryChange::Updated(entry.clone())] },
                UpgradeEntryMeta { upgrade: vec![2], changes: vec![LedgerEntryChange::Created(entry.clone())] },
            ],
            ..Default::default()
        };
        let backend = backend_returning(4, &meta);
        let mut reader = BackendLedgerReader::new(4, &backend).await.unwrap();

        let mut count = 0;
        while let Some(change) = reader.read_upgrade_change().unwrap() {
            assert_eq!(change.post.as_ref(), Some(&entry));
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_not_found() {
        let mut backend = MockLedgerBackend::new();
        backend.expect_get_ledger().with(eq(5)).times(1).returning(|_| Ok(None));

        let err = BackendLedgerReader::new(5, &backend).await.unwrap_err();
        assert!(matches!(err, ReaderError::NotFound { sequence: 5 }));
    }

    #[tokio::test]
    async fn test_backend_error() {
        let mut backend = MockLedgerBackend::new();
        backend.expect_get_ledger().times(1).returning(|_| Err(BackendError::Status { status: 503 }));

        let err = BackendLedgerReader::new(5, &backend).await.unwrap_err();
        assert!(matches!(err, ReaderError::Backend { sequence: 5, source: BackendError::Status { status: 503 } }));
    }

    #[tokio::test]
    async fn test_garbage_payload_is_decode_error() {
        let mut backend = MockLedgerBackend::new();
        backend.expect_get_ledger().times(1).returning(|_| Ok(Some(vec![0xde, 0xad])));

        let err = BackendLedgerReader::new(5, &backend).await.unwrap_err();
        assert!(matches!(err, ReaderError::Decode { sequence: 5, .. }));
    }

    #[tokio::test]
    async fn test_misaligned_sequences_are_decode_error() {
        let mut meta = three_transactions();
        meta.transaction_meta.pop();
        let backend = backend_returning(6, &meta);

        let err = BackendLedgerReader::new(6, &backend).await.unwrap_err();
        match err {
            ReaderError::Decode { sequence, reason } => {
                assert_eq!(sequence, 6);
                assert!(reason.contains("2 metas"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_payload_for_another_ledger_is_decode_error() {
        let bytes = at(7, &three_transactions()).to_bytes().unwrap();
        let mut backend = MockLedgerBackend::new();
        backend.expect_get_ledger().with(eq(1)).times(1).returning(move |_| Ok(Some(bytes.clone())));

        let err = BackendLedgerReader::new(1, &backend).await.unwrap_err();
        match err {
            ReaderError::Decode { sequence, reason } => {
                assert_eq!(sequence, 1);
                assert_eq!(reason, "payload header is for ledger 7");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_close_time_is_decode_error() {
        let meta = LedgerCloseMeta { close_time: i64::MAX, ..at(3, &LedgerCloseMeta::default()) };

        let err = BackendLedgerReader::from_meta(3, meta).unwrap_err();
        assert!(matches!(err, ReaderError::Decode { sequence: 3, .. }));
    }

    #[test]
    fn test_read_after_close() {
        let mut reader = BackendLedgerReader::from_meta(2, at(2, &three_transactions())).unwrap();
        reader.close().unwrap();
        reader.close().unwrap();

        assert!(matches!(reader.read(), Err(ReaderError::Closed)));
        assert!(matches!(reader.read_upgrade_change(), Err(ReaderError::Closed)));
    }
}
