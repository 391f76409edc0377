/// Ledger History Ingester
///
/// Fetches ledger close meta from a backend, decodes it, and writes one summary row per
/// ledger into the `history_ledgers` table, refusing to advance when the store and the
/// ledgers disagree.
pub mod db;
pub mod error;
pub mod etl;
pub mod models;
pub mod pipeline;
pub mod rpc;
pub mod toid;
pub mod verify;

pub use error::{ErrorKind, IngestError};
pub use pipeline::processor::{LedgersProcessor, PipelineStore};
pub use pipeline::{Pipeline, PipelineConfig, PipelineStats};
pub use toid::Toid;
