//! Shared fixtures: a local ledger on a throwaway sled db, a pinned clock and
//! an effect sink that records what it is given.
#![allow(dead_code)]

use p2p_lending::{
    address::Address,
    clock::{Clock, ManualClock, TimeStamp},
    config::LedgerConfig,
    context::ConnectionContext,
    local::LocalLedger,
    money::Wei,
    orchestrator::{EffectSink, Navigation, Notification, OrchestratorConfig, TransactionOrchestrator},
    sync::ViewSynchronizer,
    validator::{self, LoanRequest},
};
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

pub const CID_V0: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";
pub const CID_V1: &str = "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi";
pub const START: i64 = 1_700_000_000;
pub const DAY: i64 = 24 * 60 * 60;
pub const GANACHE_CHAIN_ID: u64 = 1337;

pub const CONTRACT: Address = Address::new([0xC0; 20]);
pub const BORROWER: Address = Address::new([0x11; 20]);
pub const LENDER: Address = Address::new([0x22; 20]);
pub const STRANGER: Address = Address::new([0x33; 20]);

#[derive(Default)]
pub struct RecordingSink {
    pub notifications: Mutex<Vec<Notification>>,
    pub navigations: Mutex<Vec<Navigation>>,
}

impl RecordingSink {
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }
    pub fn navigations(&self) -> Vec<Navigation> {
        self.navigations.lock().clone()
    }
    pub fn is_silent(&self) -> bool {
        self.notifications.lock().is_empty() && self.navigations.lock().is_empty()
    }
}

impl EffectSink for RecordingSink {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().push(notification);
    }
    fn navigate(&self, navigation: Navigation) {
        self.navigations.lock().push(navigation);
    }
}

pub struct Harness {
    // keeps the db directory alive for the test's duration
    _temp_dir: TempDir,
    pub ledger: LocalLedger,
    pub clock: Arc<ManualClock>,
    pub config: LedgerConfig,
    pub synchronizer: Arc<ViewSynchronizer>,
}

impl Harness {
    pub fn new(name: &str) -> anyhow::Result<Self> {
        // Sled locks its files, so every test gets its own db under a temp dir.
        let temp_dir = tempdir()?;
        let db = Arc::new(sled::open(temp_dir.path().join(format!("{name}.db")))?);

        let clock = Arc::new(ManualClock::new(TimeStamp::from_unix(START)));
        let ledger = LocalLedger::new(db, clock.clone())?;
        let synchronizer = Arc::new(ViewSynchronizer::new(Arc::new(ledger.clone())));

        Ok(Self {
            _temp_dir: temp_dir,
            ledger,
            clock,
            config: LedgerConfig::local(CONTRACT),
            synchronizer,
        })
    }

    pub fn context(&self, address: Address) -> anyhow::Result<ConnectionContext> {
        Ok(ConnectionContext::connect(
            &self.config,
            address,
            GANACHE_CHAIN_ID,
            Arc::new(self.ledger.clone()),
            self.clock.clone(),
        )?)
    }

    pub fn orchestrator(&self, address: Address) -> anyhow::Result<TransactionOrchestrator> {
        Ok(TransactionOrchestrator::new(
            self.context(address)?,
            Arc::clone(&self.synchronizer),
            OrchestratorConfig::from(&self.config),
        ))
    }

    pub fn now(&self) -> TimeStamp {
        self.clock.now()
    }

    /// Requests a loan as [`BORROWER`] due in 30 days and waits for it to be mined.
    pub async fn requested_loan(&self, amount: u128) -> anyhow::Result<u64> {
        let orchestrator = self.orchestrator(BORROWER)?;
        let draft = LoanRequest::new()
            .set_amount(Wei::new(amount))
            .set_mortgage_cid(CID_V0)
            .set_due_date(self.now().plus_secs(30 * DAY));
        let action = validator::validate_request(orchestrator.context(), &draft)?;
        orchestrator
            .execute(action, Arc::new(RecordingSink::default()))
            .await?;

        let newest = self
            .synchronizer
            .snapshot()
            .last()
            .map(|loan| loan.index)
            .ok_or_else(|| anyhow::anyhow!("requested loan is not in the cache"))?;
        Ok(newest)
    }

    /// Requests and funds a loan as [`LENDER`].
    pub async fn funded_loan(&self, amount: u128) -> anyhow::Result<u64> {
        let index = self.requested_loan(amount).await?;
        let orchestrator = self.orchestrator(LENDER)?;
        let action = validator::validate_fund(orchestrator.context(), &*self.synchronizer, index)?;
        orchestrator
            .execute(action, Arc::new(RecordingSink::default()))
            .await?;
        Ok(index)
    }
}
