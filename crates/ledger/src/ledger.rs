//! Append-only audit ledger.
//!
//! Transactions queue in a pending pool and are sealed into hash-chained
//! blocks, either when the pool reaches the batch size or on an explicit
//! `mine_block`. The ledger has a single writer; callers sharing it across
//! threads wrap it in a lock.
//!
//! # Chain Structure
//!
//! - `hash`: BLAKE3 (hex) of the canonical block body
//! - `previous_hash`: hash of the preceding block, or [`GENESIS_PREVIOUS_HASH`]
//!   for block 0
//!
//! The body is serialized with a fixed field order, so hashes are
//! reproducible.

use crate::transaction::{PendingTransaction, TransactionPayload};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};
use voltmesh_core::{current_timestamp_ms, Timestamp};

/// `previous_hash` of the first block.
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Block not found: {0}")]
    BlockNotFound(u64),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Failed to serialize block for hashing: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerBlock {
    pub index: u64,
    pub timestamp: Timestamp,
    pub transactions: Vec<PendingTransaction>,
    pub previous_hash: String,
    pub hash: String,
}

/// Hashed portion of a block. Field order is the canonical encoding.
#[derive(Serialize)]
struct BlockBody<'a> {
    index: u64,
    timestamp: Timestamp,
    transactions: &'a [PendingTransaction],
    previous_hash: &'a str,
}

impl LedgerBlock {
    /// Recompute the hash from the block's current contents.
    pub fn compute_hash(&self) -> Result<String> {
        compute_block_hash(&BlockBody {
            index: self.index,
            timestamp: self.timestamp,
            transactions: &self.transactions,
            previous_hash: &self.previous_hash,
        })
    }
}

fn compute_block_hash(body: &BlockBody<'_>) -> Result<String> {
    let serialized = serde_json::to_vec(body)?;
    Ok(blake3::hash(&serialized).to_hex().to_string())
}

/// First inconsistency found while walking the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainBreak {
    /// `previous_hash` does not match the preceding block
    BrokenLink { index: u64 },
    /// Stored hash does not match the recomputed one
    HashMismatch { index: u64 },
    /// Block index out of sequence
    IndexGap { index: u64, expected: u64 },
}

impl fmt::Display for ChainBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainBreak::BrokenLink { index } => write!(f, "broken link at block {}", index),
            ChainBreak::HashMismatch { index } => write!(f, "hash mismatch at block {}", index),
            ChainBreak::IndexGap { index, expected } => {
                write!(f, "block index {} where {} expected", index, expected)
            }
        }
    }
}

/// Where a transaction was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionLocation {
    Block(u64),
    Pending,
}

#[derive(Debug)]
pub struct AuditLedger {
    blocks: Vec<LedgerBlock>,
    pending: Vec<PendingTransaction>,
    batch_size: usize,
}

impl Default for AuditLedger {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl AuditLedger {
    /// A batch size of zero is treated as one.
    pub fn new(batch_size: usize) -> Self {
        Self {
            blocks: Vec::new(),
            pending: Vec::new(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Queue a payload; seals a block once the batch is full.
    ///
    /// Returns the new transaction id.
    pub fn add_transaction(&mut self, payload: TransactionPayload) -> Result<String> {
        let tx = PendingTransaction::new(payload, current_timestamp_ms());
        let id = tx.id.clone();
        debug!(tx_id = %id, tx_type = tx.payload.type_name(), "Transaction queued");
        self.pending.push(tx);

        if self.pending.len() >= self.batch_size {
            self.mine_block()?;
        }
        Ok(id)
    }

    /// Seal all pending transactions into a new block.
    ///
    /// Returns `false` when nothing was pending.
    pub fn mine_block(&mut self) -> Result<bool> {
        if self.pending.is_empty() {
            return Ok(false);
        }

        let index = self.blocks.len() as u64;
        let previous_hash = self
            .blocks
            .last()
            .map(|b| b.hash.clone())
            .unwrap_or_else(|| GENESIS_PREVIOUS_HASH.to_string());
        let timestamp = current_timestamp_ms();

        let hash = compute_block_hash(&BlockBody {
            index,
            timestamp,
            transactions: &self.pending,
            previous_hash: &previous_hash,
        })?;

        let transactions = std::mem::take(&mut self.pending);
        info!(
            index,
            transactions = transactions.len(),
            hash = %hash,
            "Block sealed"
        );
        self.blocks.push(LedgerBlock {
            index,
            timestamp,
            transactions,
            previous_hash,
            hash,
        });
        Ok(true)
    }

    pub fn get_block(&self, index: u64) -> Result<&LedgerBlock> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.blocks.get(i))
            .ok_or(LedgerError::BlockNotFound(index))
    }

    /// Find a transaction in sealed blocks, then in the pending pool.
    pub fn get_transaction(&self, id: &str) -> Result<(&PendingTransaction, TransactionLocation)> {
        for block in &self.blocks {
            if let Some(tx) = block.transactions.iter().find(|tx| tx.id == id) {
                return Ok((tx, TransactionLocation::Block(block.index)));
            }
        }
        self.pending
            .iter()
            .find(|tx| tx.id == id)
            .map(|tx| (tx, TransactionLocation::Pending))
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))
    }

    pub fn blocks(&self) -> &[LedgerBlock] {
        &self.blocks
    }

    pub fn pending(&self) -> &[PendingTransaction] {
        &self.pending
    }

    pub fn chain_length(&self) -> usize {
        self.blocks.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// All transactions, sealed first, in insertion order.
    pub fn transactions(&self) -> impl Iterator<Item = &PendingTransaction> {
        self.blocks
            .iter()
            .flat_map(|b| b.transactions.iter())
            .chain(self.pending.iter())
    }

    /// Walk the chain and report the first inconsistency.
    pub fn find_chain_break(&self) -> Option<ChainBreak> {
        let mut expected_previous = GENESIS_PREVIOUS_HASH;
        for (position, block) in self.blocks.iter().enumerate() {
            let expected = position as u64;
            if block.index != expected {
                return Some(ChainBreak::IndexGap {
                    index: block.index,
                    expected,
                });
            }
            if block.previous_hash != expected_previous {
                return Some(ChainBreak::BrokenLink { index: block.index });
            }
            match block.compute_hash() {
                Ok(hash) if hash == block.hash => {}
                _ => return Some(ChainBreak::HashMismatch { index: block.index }),
            }
            expected_previous = block.hash.as_str();
        }
        None
    }

    /// True when every block links to its predecessor and hashes correctly.
    pub fn verify_chain(&self) -> bool {
        self.find_chain_break().is_none()
    }

    #[cfg(test)]
    pub(crate) fn blocks_mut(&mut self) -> &mut Vec<LedgerBlock> {
        &mut self.blocks
    }
}
