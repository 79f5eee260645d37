//! Error taxonomy for the lending core
use crate::gateway::TxHash;
use crate::loan::LoanStatus;
use crate::orchestrator::AttemptKey;

/// Local, pre-submission failures. These never reach the ledger.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Wallet not connected")]
    WalletNotConnected,
    #[error("Loan amount must be greater than zero")]
    ZeroAmount,
    #[error("Due date {due} is not after the current time {now}")]
    DueDateNotInFuture { due: i64, now: i64 },
    #[error("{0} is not set")]
    MissingField(&'static str),
    #[error("Malformed mortgage content identifier: {0}")]
    MalformedMortgageCid(String),
    #[error("Malformed amount: {0}")]
    MalformedAmount(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Loan {0} does not exist")]
    LoanNotFound(u64),
    #[error("Loan {index} cannot move from {from} to {to}")]
    InvalidState {
        index: u64,
        from: LoanStatus,
        to: LoanStatus,
    },
    #[error("Borrower cannot fund their own loan")]
    SelfFunding,
    #[error("Only the borrower can repay loan {0}")]
    NotBorrower(u64),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LoanError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Another {key} is already in flight")]
    Busy { key: AttemptKey },
    #[error("Transaction was not submitted: {0}")]
    SubmissionRejected(String),
    #[error("Transaction {hash} reverted: {reason}")]
    LedgerExecutionFailed { hash: TxHash, reason: String },
    #[error("Timed out waiting for {hash}; it may still complete")]
    ConfirmationTimedOut { hash: TxHash },
    #[error("Receipt stream for {hash} closed before it was mined")]
    ConfirmationDropped { hash: TxHash },
    #[error("Ledger read was stale or malformed: {0}")]
    StaleRead(String),
    #[error("Wallet is on chain {actual}, expected {expected}")]
    WrongNetwork { expected: u64, actual: u64 },
    #[error("Transaction attempt aborted: {0}")]
    Aborted(String),
}
