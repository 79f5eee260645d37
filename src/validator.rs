//! Pre-flight checks run before any mutating call leaves the process
use crate::address::Address;
use crate::clock::TimeStamp;
use crate::context::ConnectionContext;
use crate::error::ValidationError;
use crate::loan::{Loan, LoanStatus, MortgageCid};
use crate::money::Wei;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Request,
    Fund,
    Repay,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActionKind::Request => "request",
            ActionKind::Fund => "fund",
            ActionKind::Repay => "repay",
        })
    }
}

/// The exact ledger call a validated action will make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    RequestLoan {
        amount: Wei,
        mortgage_cid: MortgageCid,
        due_date: TimeStamp,
    },
    FundLoan {
        loan_index: u64,
        value: Wei,
    },
    RepayLoan {
        loan_index: u64,
        value: Wei,
    },
}

/// An action that passed validation. Only the validators construct these
/// outside the crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedAction {
    pub(crate) actor: Address,
    pub(crate) call: LedgerCall,
}

impl ValidatedAction {
    pub fn actor(&self) -> Address {
        self.actor
    }
    pub fn call(&self) -> &LedgerCall {
        &self.call
    }
    pub fn kind(&self) -> ActionKind {
        match self.call {
            LedgerCall::RequestLoan { .. } => ActionKind::Request,
            LedgerCall::FundLoan { .. } => ActionKind::Fund,
            LedgerCall::RepayLoan { .. } => ActionKind::Repay,
        }
    }
    pub fn target(&self) -> Option<u64> {
        match self.call {
            LedgerCall::RequestLoan { .. } => None,
            LedgerCall::FundLoan { loan_index, .. } | LedgerCall::RepayLoan { loan_index, .. } => {
                Some(loan_index)
            }
        }
    }
}

/// Lookup of the locally known copy of a loan.
pub trait LoanSource {
    fn find_loan(&self, index: u64) -> Option<Loan>;
}

impl LoanSource for [Loan] {
    fn find_loan(&self, index: u64) -> Option<Loan> {
        self.iter().find(|loan| loan.index == index).cloned()
    }
}

impl LoanSource for Vec<Loan> {
    fn find_loan(&self, index: u64) -> Option<Loan> {
        self.as_slice().find_loan(index)
    }
}

/// Draft of a loan request, filled in field by field.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoanRequest {
    amount: Option<Wei>,
    mortgage_cid: Option<String>,
    due_date: Option<TimeStamp>,
}

impl LoanRequest {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_amount(mut self, amount: Wei) -> Self {
        self.amount = Some(amount);
        self
    }
    pub fn set_mortgage_cid(mut self, cid: impl Into<String>) -> Self {
        self.mortgage_cid = Some(cid.into());
        self
    }
    pub fn set_due_date(mut self, due_date: TimeStamp) -> Self {
        self.due_date = Some(due_date);
        self
    }
}

pub fn validate_request(
    ctx: &ConnectionContext,
    draft: &LoanRequest,
) -> Result<ValidatedAction, ValidationError> {
    let actor = ctx.require_address()?;

    let amount = draft.amount.ok_or(ValidationError::MissingField("Loan amount"))?;
    if amount.is_zero() {
        return Err(ValidationError::ZeroAmount);
    }
    let due_date = draft.due_date.ok_or(ValidationError::MissingField("Due date"))?;
    let now = ctx.now();
    if due_date <= now {
        return Err(ValidationError::DueDateNotInFuture {
            due: due_date.unix(),
            now: now.unix(),
        });
    }
    let mortgage_cid = match draft.mortgage_cid.as_deref() {
        None | Some("") => return Err(ValidationError::MissingField("Mortgage CID")),
        Some(cid) => MortgageCid::parse(cid)?,
    };

    Ok(ValidatedAction {
        actor,
        call: LedgerCall::RequestLoan {
            amount,
            mortgage_cid,
            due_date,
        },
    })
}

fn expect_status(loan: &Loan, required: LoanStatus, next: LoanStatus) -> Result<(), ValidationError> {
    if loan.status != required {
        return Err(ValidationError::InvalidState {
            index: loan.index,
            from: loan.status,
            to: next,
        });
    }
    Ok(())
}

/// The transferred value is the loan's principal.
pub fn validate_fund<S: LoanSource + ?Sized>(
    ctx: &ConnectionContext,
    loans: &S,
    loan_index: u64,
) -> Result<ValidatedAction, ValidationError> {
    let actor = ctx.require_address()?;
    let loan = loans
        .find_loan(loan_index)
        .ok_or(ValidationError::LoanNotFound(loan_index))?;
    expect_status(&loan, LoanStatus::Requested, LoanStatus::Funded)?;
    if loan.borrower == actor {
        return Err(ValidationError::SelfFunding);
    }

    Ok(ValidatedAction {
        actor,
        call: LedgerCall::FundLoan {
            loan_index,
            value: loan.amount,
        },
    })
}

/// The transferred value is principal plus interest accrued up to now.
pub fn validate_repay<S: LoanSource + ?Sized>(
    ctx: &ConnectionContext,
    loans: &S,
    loan_index: u64,
) -> Result<ValidatedAction, ValidationError> {
    let actor = ctx.require_address()?;
    let loan = loans
        .find_loan(loan_index)
        .ok_or(ValidationError::LoanNotFound(loan_index))?;
    expect_status(&loan, LoanStatus::Funded, LoanStatus::Closed)?;
    if loan.borrower != actor {
        return Err(ValidationError::NotBorrower(loan_index));
    }

    Ok(ValidatedAction {
        actor,
        call: LedgerCall::RepayLoan {
            loan_index,
            value: loan.total_repayment_at(ctx.now()),
        },
    })
}
