//! Keeps the local loan cache in step with what the ledger reports
use crate::address::Address;
use crate::clock::TimeStamp;
use crate::error::LoanError;
use crate::gateway::LedgerGateway;
use crate::loan::{self, AccountRoles, AccountType, Loan, LoanStatus};
use crate::validator::{LedgerCall, LoanSource, ValidatedAction};
use crate::wire;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A list of loans plus whatever went wrong producing it. A degraded view is
/// still usable; it may be partial or out of date.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoanView {
    pub loans: Vec<Loan>,
    pub degraded: Vec<LoanError>,
}

impl LoanView {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
    pub fn filter(&self, status: Option<LoanStatus>) -> Vec<Loan> {
        loan::filter_by_status(&self.loans, status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountView {
    pub address: Address,
    pub account_type: AccountType,
    pub roles: AccountRoles,
    pub loans: Vec<Loan>,
    pub degraded: Vec<LoanError>,
}

impl AccountView {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

/// Sole writer of the loan cache.
pub struct ViewSynchronizer {
    gateway: Arc<dyn LedgerGateway>,
    cache: RwLock<BTreeMap<u64, Loan>>,
}

impl ViewSynchronizer {
    pub fn new(gateway: Arc<dyn LedgerGateway>) -> Self {
        Self {
            gateway,
            cache: RwLock::new(BTreeMap::new()),
        }
    }

    /// Cached loans in index order.
    pub fn snapshot(&self) -> Vec<Loan> {
        self.cache.read().values().cloned().collect()
    }
    pub fn loans(&self, status: Option<LoanStatus>) -> Vec<Loan> {
        loan::filter_by_status(&self.snapshot(), status)
    }
    pub fn loan(&self, index: u64) -> Option<Loan> {
        self.cache.read().get(&index).cloned()
    }
    pub fn account_roles(&self, address: &Address) -> AccountRoles {
        AccountRoles::of(address, &self.snapshot())
    }

    pub async fn refresh_all(&self) -> LoanView {
        match self.gateway.get_all_loans().await {
            Ok(raw) => {
                let (fresh, mut degraded) = wire::decode_loan_list(&raw);
                degraded.extend(self.merge(fresh));
                if !degraded.is_empty() {
                    warn!(problems = degraded.len(), "loan list read was partly unusable");
                }
                LoanView {
                    loans: self.snapshot(),
                    degraded,
                }
            }
            Err(err) => {
                warn!(error = %err, "loan list read failed, serving cached loans");
                LoanView {
                    loans: self.snapshot(),
                    degraded: vec![LoanError::StaleRead(err.to_string())],
                }
            }
        }
    }

    pub async fn refresh_account(&self, address: Address) -> AccountView {
        let read = match self.gateway.get_account_details(address).await {
            Ok(raw) => wire::decode_account_details(&raw),
            Err(err) => Err(LoanError::StaleRead(err.to_string())),
        };

        let (reported, degraded) = match read {
            Ok((reported, fresh, mut degraded)) => {
                degraded.extend(self.merge(fresh));
                (Some(reported), degraded)
            }
            Err(err) => {
                warn!(%address, error = %err, "account read failed, serving cached loans");
                (None, vec![err])
            }
        };

        let loans: Vec<Loan> = self
            .snapshot()
            .into_iter()
            .filter(|l| l.involves(&address))
            .collect();
        let roles = AccountRoles::of(&address, &loans);
        let account_type = match reported {
            Some(reported) => {
                if reported != roles.primary() {
                    debug!(%address, %reported, derived = %roles.primary(), "ledger and cache disagree on account type");
                }
                reported
            }
            None => roles.primary(),
        };

        AccountView {
            address,
            account_type,
            roles,
            loans,
            degraded,
        }
    }

    /// Re-reads the ledger after a confirmed action. If the read has not caught
    /// up with the confirmation yet, or does not answer within `read_timeout`,
    /// the confirmed transition is applied to the cached copy so the view never
    /// shows the pre-action state.
    pub(crate) async fn apply_confirmed(
        &self,
        action: &ValidatedAction,
        now: TimeStamp,
        read_timeout: Option<Duration>,
    ) {
        let view = match read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.refresh_all()).await.ok(),
            None => Some(self.refresh_all().await),
        };
        match view {
            Some(view) if view.is_degraded() => {
                debug!(problems = view.degraded.len(), "post-confirmation read was degraded");
            }
            Some(_) => {}
            None => warn!("post-confirmation read timed out"),
        }

        let mut cache = self.cache.write();
        let applied = match action.call() {
            LedgerCall::RequestLoan { .. } => return,
            LedgerCall::FundLoan { loan_index, .. } => match cache.get_mut(loan_index) {
                Some(loan) if loan.status == LoanStatus::Requested => loan.fund(action.actor(), now),
                _ => return,
            },
            LedgerCall::RepayLoan { loan_index, .. } => match cache.get_mut(loan_index) {
                Some(loan) if loan.status == LoanStatus::Funded => loan.repay(now),
                _ => return,
            },
        };
        match applied {
            Ok(()) => debug!(loan = ?action.target(), "ledger read lags confirmation, applied locally"),
            Err(err) => warn!(error = %err, "could not apply confirmed action to cache"),
        }
    }

    /// Folds fresh records into the cache, refusing ones that would rewrite
    /// immutable terms or move a status backward.
    fn merge(&self, fresh: Vec<Loan>) -> Vec<LoanError> {
        let mut cache = self.cache.write();
        let mut rejected = vec![];

        for loan in fresh {
            let conflict = cache.get(&loan.index).and_then(|cached| {
                if !cached.same_terms(&loan) {
                    Some(format!("loan {}: terms differ from the cached copy", loan.index))
                } else if !cached.status.permits_observation(loan.status) {
                    Some(format!(
                        "loan {}: status went from {} back to {}",
                        loan.index, cached.status, loan.status
                    ))
                } else {
                    None
                }
            });

            match conflict {
                Some(reason) => {
                    warn!(%reason, "ignoring stale loan record");
                    rejected.push(LoanError::StaleRead(reason));
                }
                None => {
                    cache.insert(loan.index, loan);
                }
            }
        }
        rejected
    }
}

impl LoanSource for ViewSynchronizer {
    fn find_loan(&self, index: u64) -> Option<Loan> {
        self.loan(index)
    }
}
