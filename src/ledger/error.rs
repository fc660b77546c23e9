//! Error types for ledger operations.

use super::account::AccountId;
use thiserror::Error;

/// Ledger operation errors.
///
/// Business failures (missing account, insufficient funds, ...) are reported
/// to clients as unsuccessful results. Storage failures are faults.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: u64, requested: u64 },

    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    #[error("cannot transfer to the same account")]
    SameAccount,

    #[error("balance would overflow")]
    BalanceOverflow,

    #[error("credential already registered")]
    DuplicateCredential,

    #[error("field is read-only: {0}")]
    ReadOnlyField(String),

    #[error("wrong value type for field: {0}")]
    FieldType(String),

    #[error("corrupt journal at line {line}: {reason}")]
    CorruptJournal { line: usize, reason: String },

    #[error("journal is unavailable after a failed rollback")]
    JournalPoisoned,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    /// Whether the error comes from storage rather than from the request.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            LedgerError::CorruptJournal { .. }
                | LedgerError::JournalPoisoned
                | LedgerError::Io(_)
                | LedgerError::Serialization(_)
        )
    }
}
