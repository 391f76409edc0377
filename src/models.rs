/// Data Models Module
///
/// This module defines the ledger records produced by consensus (headers, transaction
/// envelopes, results, metadata, and ledger entry changes) together with the binary
/// codec used to move them between the backend and the ingester.
///
/// Payloads are encoded with bincode, which is deterministic for these types, so the
/// same header always encodes to the same bytes.
use base64::Engine;
use serde::{Deserialize, Serialize};

/// 32-byte hash as produced by consensus.
pub type Hash = [u8; 32];

/// Consensus-produced ledger header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerHeader {
    pub ledger_version: u32,
    pub previous_ledger_hash: Hash,
    pub ledger_seq: u32,
    pub total_coins: i64,
    pub fee_pool: i64,
    pub base_fee: u32,
    pub base_reserve: u32,
    pub max_tx_set_size: u32,
}

impl LedgerHeader {
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Base64 form of the encoded header, as stored in the history table.
    pub fn to_base64(&self) -> Result<String, bincode::Error> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.to_bytes()?))
    }
}

/// A header together with the hash consensus assigned to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerHeaderHistoryEntry {
    pub hash: Hash,
    pub header: LedgerHeader,
}

impl LedgerHeaderHistoryEntry {
    pub fn sequence(&self) -> u32 {
        self.header.ledger_seq
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    pub fn previous_hash_hex(&self) -> String {
        hex::encode(self.header.previous_ledger_hash)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub source_account: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub source_account: String,
    pub fee: u32,
    pub seq_num: i64,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEnvelope {
    pub tx: Transaction,
    pub signatures: Vec<Vec<u8>>,
}

impl TransactionEnvelope {
    pub fn operation_count(&self) -> usize {
        self.tx.operations.len()
    }
}

/// Outcome codes a transaction can end with. Only `TxSuccess` counts as successful.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionResultCode {
    #[default]
    TxSuccess,
    TxFailed,
    TxTooEarly,
    TxTooLate,
    TxMissingOperation,
    TxBadSeq,
    TxBadAuth,
    TxInsufficientBalance,
    TxNoAccount,
    TxInsufficientFee,
    TxBadAuthExtra,
    TxInternalError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResult {
    pub fee_charged: i64,
    pub code: TransactionResultCode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResultPair {
    pub transaction_hash: Hash,
    pub result: TransactionResult,
}

impl TransactionResultPair {
    pub fn successful(&self) -> bool {
        self.result.code == TransactionResultCode::TxSuccess
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub last_modified_ledger_seq: u32,
    pub key: Vec<u8>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEntryChange {
    Created(LedgerEntry),
    Updated(LedgerEntry),
    Removed(Vec<u8>),
    State(LedgerEntry),
}

pub type LedgerEntryChanges = Vec<LedgerEntryChange>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMeta {
    pub changes: LedgerEntryChanges,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMeta {
    pub tx_changes: LedgerEntryChanges,
    pub operations: Vec<OperationMeta>,
}

/// Changes applied by one protocol upgrade at the ledger boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeEntryMeta {
    pub upgrade: Vec<u8>,
    pub changes: LedgerEntryChanges,
}

/// Raw payload for one ledger as the backend stores it.
///
/// The four transaction sequences are parallel: entry `i` of each describes the `i`th
/// transaction applied in the ledger. They are all empty for an empty ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCloseMeta {
    pub ledger: LedgerHeaderHistoryEntry,
    pub close_time: i64,
    pub transaction_envelope: Vec<TransactionEnvelope>,
    pub transaction_result: Vec<TransactionResultPair>,
    pub transaction_meta: Vec<TransactionMeta>,
    pub transaction_fee_changes: Vec<LedgerEntryChanges>,
    pub upgrades: Vec<UpgradeEntryMeta>,
}

impl LedgerCloseMeta {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }
}

/// Everything known about one transaction, assembled once at decode time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerTransaction {
    /// 1-based order in which the transaction was applied in the ledger.
    pub index: u32,
    pub envelope: TransactionEnvelope,
    pub result: TransactionResultPair,
    pub meta: TransactionMeta,
    pub fee_changes: LedgerEntryChanges,
}

impl LedgerTransaction {
    pub fn successful(&self) -> bool {
        self.result.successful()
    }
}

/// A single ledger entry change, flattened out of an upgrade or transaction meta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub pre: Option<LedgerEntry>,
    pub post: Option<LedgerEntry>,
}

impl Change {
    /// Fold a raw change list into pre/post pairs. A `State` entry records the value
    /// before the change that immediately follows it.
    pub fn from_entry_changes(changes: &[LedgerEntryChange]) -> Vec<Change> {
        let mut out = Vec::new();
        let mut pending_state: Option<LedgerEntry> = None;

        for change in changes {
            match change {
                LedgerEntryChange::State(entry) => pending_state = Some(entry.clone()),
                LedgerEntryChange::Created(entry) => {
                    out.push(Change { pre: pending_state.take(), post: Some(entry.clone()) })
                }
                LedgerEntryChange::Updated(entry) => {
                    out.push(Change { pre: pending_state.take(), post: Some(entry.clone()) })
                }
                LedgerEntryChange::Removed(_) => out.push(Change { pre: pending_state.take(), post: None }),
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seq: u32) -> LedgerEntry {
        LedgerEntry { last_modified_ledger_seq: seq, key: vec![1], data: vec![seq as u8] }
    }

    #[test]
    fn test_close_meta_decodes_what_it_encodes() {
        let meta = LedgerCloseMeta {
            close_time: 1234,
            transaction_envelope: vec![TransactionEnvelope::default()],
            transaction_result: vec![TransactionResultPair::default()],
            transaction_meta: vec![TransactionMeta::default()],
            transaction_fee_changes: vec![vec![]],
            ..Default::default()
        };

        let bytes = meta.to_bytes().unwrap();
        assert_eq!(LedgerCloseMeta::from_bytes(&bytes).unwrap(), meta);
    }

    #[test]
    fn test_truncated_payload_fails_to_decode() {
        let bytes = LedgerCloseMeta { close_time: 99, ..Default::default() }.to_bytes().unwrap();
        assert!(LedgerCloseMeta::from_bytes(&bytes[..bytes.len() / 2]).is_err());
        assert!(LedgerCloseMeta::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_header_encoding_is_deterministic() {
        let header = LedgerHeader { ledger_seq: 7, total_coins: 100, ..Default::default() };
        assert_eq!(header.to_base64().unwrap(), header.clone().to_base64().unwrap());
        assert_ne!(header.to_base64().unwrap(), LedgerHeader::default().to_base64().unwrap());
    }

    #[test]
    fn test_result_code_success() {
        let mut pair = TransactionResultPair::default();
        assert!(pair.successful());
        pair.result.code = TransactionResultCode::TxBadAuth;
        assert!(!pair.successful());
    }

    #[test]
    fn test_changes_pair_state_with_following_change() {
        let changes = vec![
            LedgerEntryChange::Created(entry(1)),
            LedgerEntryChange::State(entry(2)),
            LedgerEntryChange::Updated(entry(3)),
            LedgerEntryChange::State(entry(4)),
            LedgerEntryChange::Removed(vec![1]),
        ];

        let folded = Change::from_entry_changes(&changes);
        assert_eq!(
            folded,
            vec![
                Change { pre: None, post: Some(entry(1)) },
                Change { pre: Some(entry(2)), post: Some(entry(3)) },
                Change { pre: Some(entry(4)), post: None },
            ]
        );
    }
}
