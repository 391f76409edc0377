/// Transform Module
///
/// Derives the aggregate counts stored on each history ledger row.
use crate::models::{LedgerHeaderHistoryEntry, LedgerTransaction};

/// Transaction and operation counts for one ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerCounts {
    pub successful_transactions: usize,
    pub failed_transactions: usize,
    /// Operations belonging to successful transactions.
    pub successful_operations: usize,
}

impl LedgerCounts {
    pub fn from_transactions(transactions: &[LedgerTransaction]) -> Self {
        let mut counts = Self::default();

        for tx in transactions {
            if tx.successful() {
                counts.successful_transactions += 1;
                counts.successful_operations += tx.envelope.operation_count();
            } else {
                counts.failed_transactions += 1;
            }
        }

        counts
    }

    pub fn total_transactions(&self) -> usize {
        self.successful_transactions + self.failed_transactions
    }
}

/// Immutable per-ledger summary handed from the reader to the history gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSummary {
    pub sequence: u32,
    pub close_time: i64,
    pub counts: LedgerCounts,
    pub header: LedgerHeaderHistoryEntry,
}

impl LedgerSummary {
    pub fn from_reader(reader: &dyn crate::etl::LedgerReader) -> Self {
        Self {
            sequence: reader.get_sequence(),
            close_time: reader.close_time(),
            counts: LedgerCounts {
                successful_transactions: reader.successful_transaction_count(),
                failed_transactions: reader.failed_transaction_count(),
                successful_operations: reader.successful_ledger_operation_count(),
            },
            header: reader.get_header(),
        }
    }
}
