//! Interface to the external lending ledger.
//!
//! Mutating calls return a [`TxHandle`] as soon as the ledger has accepted the
//! submission; the handle's event stream then reports observation and the
//! mined receipt. Reads return the ledger's raw, untyped result which
//! [`crate::wire`] turns into the typed loan model.
use crate::address::Address;
use crate::error::LoanError;
use crate::money::Wei;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxHash(String);

impl TxHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxEvent {
    /// The transaction has been seen in the ledger's pool or a block.
    Observed,
    Mined(ReceiptStatus),
}

/// An accepted submission. Events may repeat; consumers must be idempotent.
#[derive(Debug)]
pub struct TxHandle {
    pub hash: TxHash,
    pub events: mpsc::UnboundedReceiver<TxEvent>,
}

#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn request_loan(
        &self,
        from: Address,
        amount: Wei,
        mortgage_cid: &str,
        due_date: u64,
    ) -> Result<TxHandle, LoanError>;

    /// `value` is transferred with the call and must equal the loan amount.
    async fn fund_loan(&self, from: Address, loan_index: u64, value: Wei)
    -> Result<TxHandle, LoanError>;

    /// `value` is transferred with the call and must cover principal plus interest.
    async fn repay_loan(
        &self,
        from: Address,
        loan_index: u64,
        value: Wei,
    ) -> Result<TxHandle, LoanError>;

    /// `[accountType, [loan, ...]]`
    async fn get_account_details(&self, address: Address) -> anyhow::Result<serde_json::Value>;

    /// `[loan, ...]` in ledger index order.
    async fn get_all_loans(&self) -> anyhow::Result<serde_json::Value>;
}
