/// Ledger Processing Stage
///
/// Drives one ledger through drain, summarize, and persist, then closes the reader and
/// writer no matter how the earlier steps ended.
use tokio_util::sync::CancellationToken;

use crate::db::history::LedgersQ;
use crate::error::{CleanupError, IngestError, ReaderError};
use crate::etl::{transform::LedgerSummary, LedgerReader, LedgerWriter};
use crate::models::Change;
use crate::verify;

/// Scratch space shared by the stages working on one ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStore {
    pub ledger_sequence: Option<u32>,
    /// Upgrade changes drained from the reader, for stages that run after this one.
    pub upgrade_changes: Vec<Change>,
    pub transactions_forwarded: usize,
    /// Set once the ledger row is durably written.
    pub should_commit: bool,
}

impl PipelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Closes the reader and writer exactly once, including on panic or when the
/// processing future is dropped.
struct CloseOnExit<'a> {
    reader: &'a mut dyn LedgerReader,
    writer: &'a mut dyn LedgerWriter,
    closed: bool,
}

impl<'a> CloseOnExit<'a> {
    fn new(reader: &'a mut dyn LedgerReader, writer: &'a mut dyn LedgerWriter) -> Self {
        Self { reader, writer, closed: false }
    }

    fn close(&mut self) -> Result<(), CleanupError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let reader = self.reader.close().map_err(CleanupError::Reader);
        let writer = self.writer.close().map_err(CleanupError::Writer);

        match (reader, writer) {
            (Err(reader_err), Err(writer_err)) => {
                tracing::warn!("Suppressed cleanup error: {}", writer_err);
                Err(reader_err)
            }
            (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}

impl Drop for CloseOnExit<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Cleanup after aborted ledger processing failed: {}", e);
        }
    }
}

/// Writes the `history_ledgers` row for each ledger it is given.
pub struct LedgersProcessor<Q> {
    ledgers_q: Q,
}

impl<Q: LedgersQ> LedgersProcessor<Q> {
    pub fn new(ledgers_q: Q) -> Self {
        Self { ledgers_q }
    }

    pub fn ledgers_q(&self) -> &Q {
        &self.ledgers_q
    }

    /// Process a single ledger.
    ///
    /// The reader and writer are closed before this returns, on every path. A close
    /// failure is only returned when nothing else went wrong first.
    pub async fn process_ledger(
        &self,
        cancel: &CancellationToken,
        store: &mut PipelineStore,
        reader: &mut dyn LedgerReader,
        writer: &mut dyn LedgerWriter,
    ) -> Result<(), IngestError> {
        let mut scope = CloseOnExit::new(reader, writer);
        let outcome = self.process(cancel, store, &mut scope).await;
        let cleanup = scope.close();

        match (outcome, cleanup) {
            (Err(err), Err(cleanup_err)) => {
                tracing::warn!("Suppressed cleanup error after failed ledger: {}", cleanup_err);
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
            (Ok(()), Err(cleanup_err)) => Err(cleanup_err.into()),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    async fn process(
        &self,
        cancel: &CancellationToken,
        store: &mut PipelineStore,
        scope: &mut CloseOnExit<'_>,
    ) -> Result<(), IngestError> {
        store.ledger_sequence = Some(scope.reader.get_sequence());

        drain(cancel, store, scope)?;

        let summary = LedgerSummary::from_reader(&*scope.reader);
        if summary.header.sequence() != summary.sequence {
            return Err(ReaderError::Decode {
                sequence: summary.sequence,
                reason: format!("reader header is for ledger {}", summary.header.sequence()),
            }
            .into());
        }
        self.persist(cancel, &summary).await?;

        store.should_commit = true;
        tracing::info!(
            "Ingested ledger {}: {} successful / {} failed transactions, {} operations",
            summary.sequence,
            summary.counts.successful_transactions,
            summary.counts.failed_transactions,
            summary.counts.successful_operations
        );

        Ok(())
    }

    async fn persist(&self, cancel: &CancellationToken, summary: &LedgerSummary) -> Result<(), IngestError> {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        if summary.sequence > 1 {
            let previous = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IngestError::Cancelled),
                hash = self.ledgers_q.ledger_hash_by_sequence(summary.sequence - 1) => {
                    hash.map_err(IngestError::PreviousLedger)?
                }
            };
            verify::check_hash_chain(summary.sequence, &summary.header, previous.as_deref())?;

            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }
        }

        let rows = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            rows = self.ledgers_q.insert_ledger(
                &summary.header,
                summary.close_time,
                summary.counts.successful_transactions,
                summary.counts.failed_transactions,
                summary.counts.successful_operations,
            ) => rows.map_err(IngestError::Insert)?,
        };

        if let Err(state_err) = verify::check_rows_affected(summary.sequence, rows) {
            tracing::error!("State error while ingesting ledger {}: {}", summary.sequence, state_err);
            return Err(state_err.into());
        }

        Ok(())
    }
}

/// Exhaust upgrade changes and transactions, handing transactions to the writer.
fn drain(
    cancel: &CancellationToken,
    store: &mut PipelineStore,
    scope: &mut CloseOnExit<'_>,
) -> Result<(), IngestError> {
    while let Some(change) = scope.reader.read_upgrade_change()? {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        store.upgrade_changes.push(change);
    }

    while let Some(transaction) = scope.reader.read()? {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        scope.writer.write(transaction)?;
        store.transactions_forwarded += 1;
    }

    Ok(())
}
