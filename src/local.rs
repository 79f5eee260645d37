//! In-process ledger for the local development network.
//!
//! Loans are kept as CBOR records in a sled tree keyed by their big-endian
//! index. Submissions are accepted immediately; their effects are applied only
//! when the transaction is mined, after the configured confirmation delay. The
//! fault controls let tests reproduce rejected submissions, reverted
//! transactions, duplicated receipts and slow confirmations.
use crate::address::Address;
use crate::clock::{Clock, TimeStamp};
use crate::error::LoanError;
use crate::gateway::{LedgerGateway, ReceiptStatus, TxEvent, TxHandle, TxHash};
use crate::loan::{self, Loan, LoanStatus};
use crate::money::Wei;
use crate::wire;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid7::uuid7;

pub const DEFAULT_CONFIRMATION_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
enum PendingCall {
    Request {
        amount: Wei,
        mortgage_cid: String,
        due_date: u64,
    },
    Fund {
        loan_index: u64,
        value: Wei,
    },
    Repay {
        loan_index: u64,
        value: Wei,
    },
}

// hashed to derive the transaction id
#[derive(minicbor::Encode, Debug)]
struct TxEnvelope {
    #[n(0)]
    from: Address,
    #[n(1)]
    function: String,
    #[n(2)]
    loan_index: Option<u64>,
    #[n(3)]
    value: Wei,
    #[n(4)]
    nonce: String, // uuid7
}

#[derive(Debug, Default)]
struct FaultPlan {
    reject_next: Option<String>,
    revert_next: Option<String>,
    duplicate_receipts: bool,
}

struct Inner {
    loans: sled::Tree,
    clock: Arc<dyn Clock>,
    confirmation_delay: Mutex<Duration>,
    faults: Mutex<FaultPlan>,
    gate: watch::Sender<bool>, // open when true
    submissions: AtomicUsize,
    apply_lock: Mutex<()>,
}

#[derive(Clone)]
pub struct LocalLedger {
    inner: Arc<Inner>,
}

fn key(index: u64) -> [u8; 8] {
    index.to_be_bytes()
}

impl Inner {
    fn next_index(&self) -> anyhow::Result<u64> {
        match self.loans.last()? {
            Some((k, _)) => Ok(u64::from_be_bytes(<[u8; 8]>::try_from(k.as_ref())?) + 1),
            None => Ok(0),
        }
    }

    fn load(&self, index: u64) -> anyhow::Result<Option<Loan>> {
        match self.loans.get(key(index))? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn store(&self, loan: &Loan) -> anyhow::Result<()> {
        self.loans.insert(key(loan.index), minicbor::to_vec(loan)?)?;
        Ok(())
    }

    fn all(&self) -> anyhow::Result<Vec<Loan>> {
        let mut loans = vec![];
        for entry in self.loans.iter() {
            let (_, bytes) = entry?;
            loans.push(minicbor::decode(&bytes)?);
        }
        Ok(loans)
    }

    fn load_existing(&self, index: u64) -> Result<Loan, String> {
        self.load(index)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Loan {index} does not exist"))
    }

    /// Applies a mined call. The error is the revert reason.
    fn execute(&self, from: Address, call: &PendingCall) -> Result<(), String> {
        let _guard = self.apply_lock.lock();
        let now = self.clock.now();

        let loan = match call {
            PendingCall::Request {
                amount,
                mortgage_cid,
                due_date,
            } => {
                if amount.is_zero() {
                    return Err("Loan amount must be greater than zero".into());
                }
                let due_date = TimeStamp::from_ledger(*due_date)
                    .filter(|due| *due > now)
                    .ok_or("Due date must be in the future")?;
                let index = self.next_index().map_err(|e| e.to_string())?;
                Loan::requested(index, from, *amount, mortgage_cid.clone(), due_date, now)
            }
            PendingCall::Fund { loan_index, value } => {
                let mut loan = self.load_existing(*loan_index)?;
                if loan.borrower == from {
                    return Err("Borrower cannot fund their own loan".into());
                }
                if *value != loan.amount {
                    return Err(format!("Funding value {value} does not match amount {}", loan.amount));
                }
                loan.fund(from, now).map_err(|e| e.to_string())?;
                loan
            }
            PendingCall::Repay { loan_index, value } => {
                let mut loan = self.load_existing(*loan_index)?;
                if loan.borrower != from {
                    return Err("Only the borrower can repay".into());
                }
                if loan.status != LoanStatus::Funded {
                    return Err(format!("Loan {loan_index} is {}", loan.status));
                }
                let owed = loan.total_repayment_at(now);
                if *value < owed {
                    return Err(format!("Insufficient repayment: owed {owed}, sent {value}"));
                }
                loan.repay(now).map_err(|e| e.to_string())?;
                loan
            }
        };

        self.store(&loan).map_err(|e| e.to_string())
    }
}

async fn mine(
    inner: Arc<Inner>,
    hash: TxHash,
    from: Address,
    call: PendingCall,
    forced_revert: Option<String>,
    duplicate: bool,
    events: mpsc::UnboundedSender<TxEvent>,
) {
    let delay = *inner.confirmation_delay.lock();
    tokio::time::sleep(delay).await;
    let _ = events.send(TxEvent::Observed);

    let mut gate = inner.gate.subscribe();
    let open = gate.wait_for(|open| *open).await.is_ok();
    if !open {
        return;
    }

    let status = match forced_revert {
        Some(reason) => ReceiptStatus::Reverted { reason },
        None => match inner.execute(from, &call) {
            Ok(()) => ReceiptStatus::Success,
            Err(reason) => ReceiptStatus::Reverted { reason },
        },
    };
    match &status {
        ReceiptStatus::Success => info!(%hash, "transaction mined"),
        ReceiptStatus::Reverted { reason } => warn!(%hash, %reason, "transaction reverted"),
    }

    let _ = events.send(TxEvent::Mined(status.clone()));
    if duplicate {
        let _ = events.send(TxEvent::Mined(status));
    }
}

impl LocalLedger {
    pub fn new(db: Arc<sled::Db>, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let loans = db.open_tree("loans")?;
        let (gate, _) = watch::channel(true);

        Ok(Self {
            inner: Arc::new(Inner {
                loans,
                clock,
                confirmation_delay: Mutex::new(DEFAULT_CONFIRMATION_DELAY),
                faults: Mutex::new(FaultPlan::default()),
                gate,
                submissions: AtomicUsize::new(0),
                apply_lock: Mutex::new(()),
            }),
        })
    }

    pub fn set_confirmation_delay(&self, delay: Duration) {
        *self.inner.confirmation_delay.lock() = delay;
    }
    pub fn reject_next_submission(&self, reason: impl Into<String>) {
        self.inner.faults.lock().reject_next = Some(reason.into());
    }
    pub fn revert_next(&self, reason: impl Into<String>) {
        self.inner.faults.lock().revert_next = Some(reason.into());
    }
    /// Every receipt is delivered twice while enabled.
    pub fn duplicate_receipts(&self, enabled: bool) {
        self.inner.faults.lock().duplicate_receipts = enabled;
    }
    /// Transactions are observed but not mined until released.
    pub fn hold_confirmations(&self) {
        self.inner.gate.send_replace(false);
    }
    pub fn release_confirmations(&self) {
        self.inner.gate.send_replace(true);
    }
    /// Number of mutating calls that reached this ledger, accepted or not.
    pub fn submission_count(&self) -> usize {
        self.inner.submissions.load(Ordering::SeqCst)
    }

    pub fn loan(&self, index: u64) -> anyhow::Result<Option<Loan>> {
        self.inner.load(index)
    }
    pub fn loans(&self) -> anyhow::Result<Vec<Loan>> {
        self.inner.all()
    }

    /// Ledger-side `Funded -> Defaulted` for loans past due. Returns the affected indices.
    pub fn mark_overdue_defaults(&self) -> anyhow::Result<Vec<u64>> {
        let _guard = self.inner.apply_lock.lock();
        let now = self.inner.clock.now();

        let mut defaulted = vec![];
        for mut loan in self.inner.all()? {
            if loan.is_overdue(now) {
                loan.mark_defaulted()?;
                self.inner.store(&loan)?;
                defaulted.push(loan.index);
            }
        }
        Ok(defaulted)
    }

    fn transaction_hash(&self, from: Address, function: &str, loan_index: Option<u64>, value: Wei) -> anyhow::Result<TxHash> {
        let envelope = TxEnvelope {
            from,
            function: function.to_string(),
            loan_index,
            value,
            nonce: uuid7().to_string(),
        };
        let cbor = minicbor::to_vec(&envelope)?;
        Ok(TxHash::new(format!("0x{}", sha256::digest(&cbor))))
    }

    fn submit(&self, from: Address, call: PendingCall) -> Result<TxHandle, LoanError> {
        self.inner.submissions.fetch_add(1, Ordering::SeqCst);

        let (forced_revert, duplicate) = {
            let mut faults = self.inner.faults.lock();
            if let Some(reason) = faults.reject_next.take() {
                warn!(%from, %reason, "submission rejected");
                return Err(LoanError::SubmissionRejected(reason));
            }
            (faults.revert_next.take(), faults.duplicate_receipts)
        };

        let (function, loan_index, value) = match &call {
            PendingCall::Request { .. } => ("requestLoan", None, Wei::ZERO),
            PendingCall::Fund { loan_index, value } => ("fundLoan", Some(*loan_index), *value),
            PendingCall::Repay { loan_index, value } => ("repayLoan", Some(*loan_index), *value),
        };
        let hash = self
            .transaction_hash(from, function, loan_index, value)
            .map_err(|e| LoanError::SubmissionRejected(e.to_string()))?;
        debug!(%hash, %from, function, "transaction accepted");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(mine(
            Arc::clone(&self.inner),
            hash.clone(),
            from,
            call,
            forced_revert,
            duplicate,
            events_tx,
        ));

        Ok(TxHandle {
            hash,
            events: events_rx,
        })
    }
}

#[async_trait]
impl LedgerGateway for LocalLedger {
    async fn request_loan(
        &self,
        from: Address,
        amount: Wei,
        mortgage_cid: &str,
        due_date: u64,
    ) -> Result<TxHandle, LoanError> {
        self.submit(
            from,
            PendingCall::Request {
                amount,
                mortgage_cid: mortgage_cid.to_string(),
                due_date,
            },
        )
    }

    async fn fund_loan(&self, from: Address, loan_index: u64, value: Wei) -> Result<TxHandle, LoanError> {
        self.submit(from, PendingCall::Fund { loan_index, value })
    }

    async fn repay_loan(&self, from: Address, loan_index: u64, value: Wei) -> Result<TxHandle, LoanError> {
        self.submit(from, PendingCall::Repay { loan_index, value })
    }

    async fn get_account_details(&self, address: Address) -> anyhow::Result<serde_json::Value> {
        let all = self.inner.all()?;
        let account_type = loan::account_type(&address, &all);
        let mine: Vec<Loan> = all.into_iter().filter(|l| l.involves(&address)).collect();
        wire::encode_account_details(account_type, &mine)
    }

    async fn get_all_loans(&self) -> anyhow::Result<serde_json::Value> {
        wire::encode_loan_list(&self.inner.all()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use tempfile::tempdir;

    const CID: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";

    async fn mined(mut handle: TxHandle) -> ReceiptStatus {
        loop {
            match handle.events.recv().await {
                Some(TxEvent::Mined(status)) => return status,
                Some(TxEvent::Observed) => continue,
                None => panic!("receipt stream closed"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn request_then_fund_applies_on_mining() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let db = Arc::new(sled::open(temp_dir.path().join("local_ledger.db"))?);
        let clock = ManualClock::new(TimeStamp::from_unix(1_700_000_000));
        let ledger = LocalLedger::new(db, Arc::new(clock))?;

        let borrower = Address::new([1u8; 20]);
        let lender = Address::new([2u8; 20]);

        let handle = ledger
            .request_loan(borrower, Wei::new(1_000), CID, 1_800_000_000)
            .await?;
        assert!(ledger.loans()?.is_empty());
        assert_eq!(mined(handle).await, ReceiptStatus::Success);
        assert_eq!(ledger.loans()?.len(), 1);

        let handle = ledger.fund_loan(lender, 0, Wei::new(999)).await?;
        assert!(matches!(mined(handle).await, ReceiptStatus::Reverted { .. }));

        let handle = ledger.fund_loan(lender, 0, Wei::new(1_000)).await?;
        assert_eq!(mined(handle).await, ReceiptStatus::Success);

        let loan = ledger.loan(0)?.unwrap();
        assert_eq!(loan.status, LoanStatus::Funded);
        assert_eq!(loan.lender, Some(lender));
        assert_eq!(ledger.submission_count(), 3);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_submission_has_no_handle() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let db = Arc::new(sled::open(temp_dir.path().join("local_ledger.db"))?);
        let ledger = LocalLedger::new(db, Arc::new(ManualClock::new(TimeStamp::from_unix(0))))?;

        ledger.reject_next_submission("user denied transaction");
        let result = ledger
            .request_loan(Address::new([1u8; 20]), Wei::new(1), CID, 100)
            .await;

        assert!(matches!(result, Err(LoanError::SubmissionRejected(_))));
        assert_eq!(ledger.submission_count(), 1);
        Ok(())
    }
}
