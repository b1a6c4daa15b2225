//! Hash-chained audit ledger for VoltMesh protocol events.
//!
//! Registrations, credential issuance, authentication outcomes, session
//! ends, and model updates are recorded as typed transactions and sealed
//! into BLAKE3-linked blocks.

pub mod ledger;
pub mod transaction;

pub use ledger::{
    AuditLedger, ChainBreak, LedgerBlock, LedgerError, Result, TransactionLocation,
    DEFAULT_BATCH_SIZE, GENESIS_PREVIOUS_HASH,
};
pub use transaction::{AuthenticationMode, PendingTransaction, TransactionPayload};
