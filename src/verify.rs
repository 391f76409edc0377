/// Verification Module
///
/// Checks that hold between what a ledger says about itself and what the history store
/// already contains. A failed check means the store or the input is inconsistent, which
/// no amount of retrying will fix.
use thiserror::Error;

use crate::models::LedgerHeaderHistoryEntry;

/// An invariant violation. Ingestion must stop and an operator has to look at it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("No rows affected when ingesting new ledger: {sequence}")]
    NoRowsAffected { sequence: u32 },

    #[error("Unexpected {rows} rows affected when ingesting new ledger: {sequence}")]
    TooManyRowsAffected { sequence: u32, rows: u64 },

    #[error("Previous ledger hash {actual} of ledger {sequence} does not match stored hash {expected}")]
    HashChainMismatch { sequence: u32, expected: String, actual: String },
}

impl StateError {
    pub fn sequence(&self) -> u32 {
        match self {
            StateError::NoRowsAffected { sequence }
            | StateError::TooManyRowsAffected { sequence, .. }
            | StateError::HashChainMismatch { sequence, .. } => *sequence,
        }
    }
}

/// Exactly one row must be written per new ledger.
pub fn check_rows_affected(sequence: u32, rows: u64) -> Result<(), StateError> {
    match rows {
        1 => Ok(()),
        0 => Err(StateError::NoRowsAffected { sequence }),
        rows => Err(StateError::TooManyRowsAffected { sequence, rows }),
    }
}

/// Compare a header's previous-ledger hash with the hash stored for its predecessor.
///
/// `stored_previous` is `None` when the predecessor has not been ingested (first ledger of
/// a fresh store, or a gap), in which case there is nothing to compare against.
pub fn check_hash_chain(
    sequence: u32,
    ledger: &LedgerHeaderHistoryEntry,
    stored_previous: Option<&str>,
) -> Result<(), StateError> {
    let Some(expected) = stored_previous else {
        return Ok(());
    };

    let actual = ledger.previous_hash_hex();
    if !expected.eq_ignore_ascii_case(&actual) {
        return Err(StateError::HashChainMismatch { sequence, expected: expected.to_string(), actual });
    }

    Ok(())
}
