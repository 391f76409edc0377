/// Pipeline Module
///
/// Runs the ledger processing stage over a range of ledgers, one at a time, with
/// retry logic driven by error classification and statistics tracking.
pub mod processor;

use anyhow::Result;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::db::history::LedgersQ;
use crate::error::{BackendError, ErrorKind, IngestError, ReaderError};
use crate::etl::{extract::BackendLedgerReader, TallyWriter};
use crate::rpc::LedgerBackend;
use processor::{LedgersProcessor, PipelineStore};

/// Pipeline execution statistics
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub ledgers_attempted: usize,
    pub ledgers_committed: usize,
    pub ledgers_failed: usize,
    pub retries: usize,
    pub transactions_processed: usize,
    pub operations_processed: usize,
    /// Last committed ledger sequence.
    pub watermark: Option<u32>,
    /// The run stopped on a shutdown request rather than reaching its end ledger.
    pub cancelled: bool,
    pub elapsed_time: Duration,
    pub errors: Vec<PipelineError>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ledgers_per_second(&self) -> f64 {
        let secs = self.elapsed_time.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.ledgers_committed as f64 / secs
        }
    }

    pub fn transactions_per_second(&self) -> f64 {
        let secs = self.elapsed_time.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.transactions_processed as f64 / secs
        }
    }
}

/// Pipeline error with context
#[derive(Debug, Clone)]
pub struct PipelineError {
    pub stage: PipelineStage,
    pub kind: ErrorKind,
    pub ledger: u32,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Extract,
    Transform,
    Load,
}

impl PipelineStage {
    fn from_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NotFound | ErrorKind::Backend | ErrorKind::Decode => PipelineStage::Extract,
            ErrorKind::Downstream | ErrorKind::Cancelled => PipelineStage::Transform,
            ErrorKind::Storage | ErrorKind::State | ErrorKind::Cleanup => PipelineStage::Load,
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStage::Extract => write!(f, "Extract"),
            PipelineStage::Transform => write!(f, "Transform"),
            PipelineStage::Load => write!(f, "Load"),
        }
    }
}

/// Configuration for pipeline execution
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub start_ledger: u32,
    /// Last ledger to ingest. `None` keeps following the backend tip.
    pub end_ledger: Option<u32>,
    pub max_retries: usize,
    pub retry_delay: Duration,
    /// Wait between polls for a ledger the backend does not have yet.
    pub poll_interval: Duration,
    /// Upper bound on a single backend fetch.
    pub fetch_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            start_ledger: 1,
            end_ledger: None,
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            poll_interval: Duration::from_secs(1),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// What one committed ledger contributed.
struct LedgerOutcome {
    transactions: usize,
    operations: usize,
}

/// Main ingestion pipeline
pub struct Pipeline<Q> {
    backend: Box<dyn LedgerBackend>,
    processor: LedgersProcessor<Q>,
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl<Q: LedgersQ> Pipeline<Q> {
    /// Create a new pipeline instance
    pub fn new(
        backend: Box<dyn LedgerBackend>,
        processor: LedgersProcessor<Q>,
        config: PipelineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self { backend, processor, config, cancel }
    }

    /// Run the pipeline for the configured ledger range
    ///
    /// Stops at the first ledger that cannot be committed: a state error stops right away,
    /// anything else after `max_retries` attempts. Cancellation ends the run without an
    /// error. The watermark never moves past a ledger that was not committed.
    pub async fn run(&self) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let mut stats = PipelineStats::new();
        let mut sequence = self.config.start_ledger;

        tracing::info!("Starting pipeline at ledger {} (end: {:?})", sequence, self.config.end_ledger);

        while self.config.end_ledger.map_or(true, |end| sequence <= end) {
            if self.cancel.is_cancelled() {
                tracing::info!("Pipeline cancelled before ledger {}", sequence);
                stats.cancelled = true;
                break;
            }

            stats.ledgers_attempted += 1;
            if let Err(e) = self.ingest_with_retry(sequence, &mut stats).await {
                if matches!(e.downcast_ref::<IngestError>(), Some(IngestError::Cancelled)) {
                    tracing::info!("Pipeline cancelled while ingesting ledger {}, it was not committed", sequence);
                    stats.cancelled = true;
                    break;
                }

                stats.ledgers_failed += 1;
                stats.elapsed_time = start_time.elapsed();
                let halted = format!("Pipeline halted at ledger {} (watermark {:?})", sequence, stats.watermark);
                return Err(e.context(halted));
            }

            stats.ledgers_committed += 1;
            stats.watermark = Some(sequence);
            sequence += 1;
        }

        stats.elapsed_time = start_time.elapsed();
        Ok(stats)
    }

    /// Ingest one ledger, waiting for it if the backend does not have it yet
    async fn ingest_with_retry(&self, sequence: u32, stats: &mut PipelineStats) -> Result<()> {
        let mut retry_count = 0;

        loop {
            let err = match self.ingest_ledger(sequence).await {
                Ok(outcome) => {
                    stats.transactions_processed += outcome.transactions;
                    stats.operations_processed += outcome.operations;
                    return Ok(());
                }
                Err(e) => e,
            };

            let kind = err.kind();
            match kind {
                ErrorKind::NotFound => {
                    tracing::debug!("Ledger {} not available yet, polling again", sequence);
                    self.wait(self.config.poll_interval).await?;
                    continue;
                }
                ErrorKind::Cancelled => return Err(err.into()),
                _ => {}
            }

            let retryable = err.is_retryable();
            retry_count += 1;
            stats.errors.push(PipelineError {
                stage: PipelineStage::from_kind(kind),
                kind,
                ledger: sequence,
                message: err.to_string(),
                retryable,
            });

            if !retryable {
                tracing::error!("Ledger {} hit a state error, stopping ingestion: {}", sequence, err);
                return Err(err.into());
            }

            if retry_count >= self.config.max_retries {
                return Err(anyhow::Error::new(err)
                    .context(format!("Failed to ingest ledger {} after {} attempts", sequence, retry_count)));
            }

            stats.retries += 1;
            tracing::warn!(
                "Ledger {} failed ({}), retrying ({}/{}): {}",
                sequence,
                kind,
                retry_count,
                self.config.max_retries,
                err
            );
            self.wait(self.config.retry_delay * retry_count as u32).await?;
        }
    }

    async fn ingest_ledger(&self, sequence: u32) -> Result<LedgerOutcome, IngestError> {
        let fetch = tokio::time::timeout(self.config.fetch_timeout, BackendLedgerReader::new(sequence, &*self.backend));
        let mut reader = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(IngestError::Cancelled),
            fetched = fetch => match fetched {
                Ok(reader) => reader?,
                Err(_) => {
                    return Err(ReaderError::Backend {
                        sequence,
                        source: BackendError::Timeout(self.config.fetch_timeout),
                    }
                    .into())
                }
            },
        };

        let mut writer = TallyWriter::new();
        let mut store = PipelineStore::new();
        self.processor.process_ledger(&self.cancel, &mut store, &mut reader, &mut writer).await?;

        Ok(LedgerOutcome { transactions: writer.transactions, operations: writer.operations })
    }

    async fn wait(&self, delay: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(IngestError::Cancelled.into()),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Print final statistics
    pub fn print_final_stats(&self, stats: &PipelineStats) {
        println!("\n📊 Pipeline Statistics:");
        println!("   ⏱️  Total time: {:.2}s", stats.elapsed_time.as_secs_f64());
        println!(
            "   📦 Ledgers: {} attempted, {} committed, {} failed ({} retries)",
            stats.ledgers_attempted, stats.ledgers_committed, stats.ledgers_failed, stats.retries
        );
        println!("   🎯 Watermark: {:?}", stats.watermark);
        if stats.cancelled {
            println!("   🛑 Stopped early on shutdown request");
        }
        println!("   📝 Transactions processed: {}", stats.transactions_processed);
        println!("   🔧 Operations processed: {}", stats.operations_processed);
        println!("   ⚡ Speed: {:.2} ledgers/sec", stats.ledgers_per_second());
        println!("   ⚡ Throughput: {:.0} txs/sec", stats.transactions_per_second());

        if !stats.errors.is_empty() {
            println!("\n❌ Errors encountered: {}", stats.errors.len());
            for (i, error) in stats.errors.iter().take(5).enumerate() {
                println!("   {}. [{}/{}] Ledger {}: {}", i + 1, error.stage, error.kind, error.ledger, error.message);
            }
            if stats.errors.len() > 5 {
                println!("   ... and {} more errors", stats.errors.len() - 5);
            }
        }
    }
}
