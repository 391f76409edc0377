/// ETL Module
///
/// Reading, summarising, and loading one ledger at a time:
/// - Extract: fetch a ledger from the backend and decode it ([`extract::BackendLedgerReader`])
/// - Transform: derive the per-ledger counts ([`transform::LedgerCounts`])
/// - Load: build the history row and insert it ([`load`])
///
/// The reader and writer capabilities live here so the processing stage can be driven
/// by in-memory fakes in tests.
pub mod extract;
pub mod load;
pub mod transform;

#[cfg(test)]
use mockall::automock;

use crate::error::{ReaderError, WriterError};
use crate::models::{Change, LedgerHeaderHistoryEntry, LedgerTransaction};

/// Read access to one decoded ledger.
///
/// `read` and `read_upgrade_change` are single-pass: each returns `Ok(None)` once the
/// ledger is exhausted and keeps returning it afterwards.
#[cfg_attr(test, automock)]
pub trait LedgerReader: Send {
    fn get_sequence(&self) -> u32;

    fn get_header(&self) -> LedgerHeaderHistoryEntry;

    /// Close time in seconds since the Unix epoch.
    fn close_time(&self) -> i64;

    fn successful_transaction_count(&self) -> usize;

    fn failed_transaction_count(&self) -> usize;

    /// Operations of successful transactions only.
    fn successful_ledger_operation_count(&self) -> usize;

    fn read(&mut self) -> Result<Option<LedgerTransaction>, ReaderError>;

    fn read_upgrade_change(&mut self) -> Result<Option<Change>, ReaderError>;

    fn close(&mut self) -> Result<(), ReaderError>;
}

/// Sink for per-transaction records handed on to later stages.
#[cfg_attr(test, automock)]
pub trait LedgerWriter: Send {
    fn write(&mut self, transaction: LedgerTransaction) -> Result<(), WriterError>;

    fn close(&mut self) -> Result<(), WriterError>;
}

/// Writer that keeps running totals of what passed through it.
#[derive(Debug, Default)]
pub struct TallyWriter {
    pub transactions: usize,
    pub successful_transactions: usize,
    pub operations: usize,
    closed: bool,
}

impl TallyWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl LedgerWriter for TallyWriter {
    fn write(&mut self, transaction: LedgerTransaction) -> Result<(), WriterError> {
        if self.closed {
            return Err(WriterError("write to closed writer".to_string()));
        }

        self.transactions += 1;
        self.operations += transaction.envelope.operation_count();
        if transaction.successful() {
            self.successful_transactions += 1;
        }

        Ok(())
    }

    fn close(&mut self) -> Result<(), WriterError> {
        self.closed = true;
        Ok(())
    }
}
