/// Total Order ID Module
///
/// Packs a (ledger sequence, transaction order, operation order) triple into a single
/// 64-bit id that sorts the same way the triple does. Every row written to the history
/// store that belongs to a ledger, transaction, or operation is keyed by one of these.
///
/// Layout, most significant bit first:
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// |                       ledger sequence (32)                    |
/// |     transaction order (20)            | operation order (12)  |
/// ```
///
/// The sign bit belongs to the ledger sequence, so sequences above `i32::MAX` do not fit.
use std::fmt;
use std::ops::RangeInclusive;

pub const LEDGER_BITS: u32 = 32;
pub const TRANSACTION_BITS: u32 = 20;
pub const OPERATION_BITS: u32 = 12;

pub const LEDGER_SHIFT: u32 = TRANSACTION_BITS + OPERATION_BITS;
pub const TRANSACTION_SHIFT: u32 = OPERATION_BITS;

pub const LEDGER_MASK: i64 = (1 << LEDGER_BITS) - 1;
pub const TRANSACTION_MASK: i64 = (1 << TRANSACTION_BITS) - 1;
pub const OPERATION_MASK: i64 = (1 << OPERATION_BITS) - 1;

/// Largest ledger sequence that keeps the id non-negative.
pub const MAX_LEDGER_SEQUENCE: u32 = i32::MAX as u32;
/// Largest transaction order that fits in the reserved bits.
pub const MAX_TRANSACTION_ORDER: u32 = TRANSACTION_MASK as u32;
/// Largest operation order that fits in the reserved bits.
pub const MAX_OPERATION_ORDER: u32 = OPERATION_MASK as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Toid {
    pub ledger_sequence: u32,
    pub transaction_order: u32,
    pub operation_order: u32,
}

impl Toid {
    /// Create a new id.
    ///
    /// Panics when any component exceeds its reserved width. Callers are expected to
    /// validate counts up front; use [`Toid::try_new`] when the input is untrusted.
    pub fn new(ledger_sequence: u32, transaction_order: u32, operation_order: u32) -> Self {
        match Self::try_new(ledger_sequence, transaction_order, operation_order) {
            Some(id) => id,
            None => panic!(
                "toid out of range: ledger {} (max {}), transaction {} (max {}), operation {} (max {})",
                ledger_sequence,
                MAX_LEDGER_SEQUENCE,
                transaction_order,
                MAX_TRANSACTION_ORDER,
                operation_order,
                MAX_OPERATION_ORDER
            ),
        }
    }

    pub fn try_new(ledger_sequence: u32, transaction_order: u32, operation_order: u32) -> Option<Self> {
        if ledger_sequence > MAX_LEDGER_SEQUENCE
            || transaction_order > MAX_TRANSACTION_ORDER
            || operation_order > MAX_OPERATION_ORDER
        {
            return None;
        }

        Some(Self { ledger_sequence, transaction_order, operation_order })
    }

    pub fn to_i64(self) -> i64 {
        ((self.ledger_sequence as i64) << LEDGER_SHIFT)
            | ((self.transaction_order as i64) << TRANSACTION_SHIFT)
            | self.operation_order as i64
    }

    /// Inverse of [`Toid::to_i64`]. Negative ids were never produced by the encoder.
    pub fn parse(id: i64) -> Option<Self> {
        if id < 0 {
            return None;
        }

        Some(Self {
            ledger_sequence: ((id >> LEDGER_SHIFT) & LEDGER_MASK) as u32,
            transaction_order: ((id >> TRANSACTION_SHIFT) & TRANSACTION_MASK) as u32,
            operation_order: (id & OPERATION_MASK) as u32,
        })
    }

    /// The smallest id greater than every id belonging to `ledger_sequence`.
    ///
    /// `None` when no such id exists: the sequence does not fit, or it is the last
    /// ledger the layout can hold.
    pub fn after_ledger(ledger_sequence: u32) -> Option<i64> {
        Toid::try_new(ledger_sequence, MAX_TRANSACTION_ORDER, MAX_OPERATION_ORDER)?.to_i64().checked_add(1)
    }

    /// Id range covering every row of ledgers `start..=end`.
    pub fn ledger_range_inclusive(start: u32, end: u32) -> Option<RangeInclusive<i64>> {
        if start > end {
            return None;
        }

        // Ledger 0 does not exist; starting there just means "from the beginning".
        let from = if start <= 1 { 0 } else { Toid::try_new(start, 0, 0)?.to_i64() };
        let to = Toid::try_new(end, MAX_TRANSACTION_ORDER, MAX_OPERATION_ORDER)?.to_i64();
        Some(from..=to)
    }
}

impl From<Toid> for i64 {
    fn from(id: Toid) -> Self {
        id.to_i64()
    }
}

impl fmt::Display for Toid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_i64())
    }
}
