//! Loan model, its status machine and the derived account views
use crate::address::Address;
use crate::clock::TimeStamp;
use crate::error::ValidationError;
use crate::money::{self, Wei};
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoanStatus {
    #[n(0)]
    Requested,
    #[n(1)]
    Funded,
    #[n(2)]
    Closed,
    #[n(3)]
    Defaulted,
}

impl LoanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoanStatus::Closed | LoanStatus::Defaulted)
    }

    // Closed and Defaulted share a rank; neither can become the other.
    fn rank(&self) -> u8 {
        match self {
            LoanStatus::Requested => 0,
            LoanStatus::Funded => 1,
            LoanStatus::Closed | LoanStatus::Defaulted => 2,
        }
    }

    /// A single legal step of the status machine.
    pub fn can_transition_to(&self, next: LoanStatus) -> bool {
        matches!(
            (self, next),
            (LoanStatus::Requested, LoanStatus::Funded)
                | (LoanStatus::Funded, LoanStatus::Closed)
                | (LoanStatus::Funded, LoanStatus::Defaulted)
        )
    }

    /// Whether a later observation of `next` is consistent with having seen
    /// `self` first. Steps may be skipped between reads, never reversed.
    pub fn permits_observation(&self, next: LoanStatus) -> bool {
        *self == next || (next.rank() > self.rank())
    }

    pub fn code(&self) -> u8 {
        match self {
            LoanStatus::Requested => 0,
            LoanStatus::Funded => 1,
            LoanStatus::Closed => 2,
            LoanStatus::Defaulted => 3,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LoanStatus::Requested => "Requested",
            LoanStatus::Funded => "Funded",
            LoanStatus::Closed => "Closed",
            LoanStatus::Defaulted => "Defaulted",
        }
    }
}

impl TryFrom<u8> for LoanStatus {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LoanStatus::Requested),
            1 => Ok(LoanStatus::Funded),
            2 => Ok(LoanStatus::Closed),
            3 => Ok(LoanStatus::Defaulted),
            other => Err(other),
        }
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Off-ledger collateral documentation handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MortgageCid(String);

impl MortgageCid {
    /// `Qm` + 44 alphanumerics (v0), or a multibase prefix + 58 alphanumerics (v1).
    pub fn parse(cid: &str) -> Result<Self, ValidationError> {
        let alnum = |s: &str| s.bytes().all(|b| b.is_ascii_alphanumeric());
        let well_formed = match cid.strip_prefix("Qm") {
            Some(rest) if rest.len() == 44 && alnum(rest) => true,
            _ => match cid.as_bytes().split_first() {
                Some((first, rest)) => {
                    b"bafykzce".contains(first)
                        && rest.len() == 58
                        && rest.iter().all(u8::is_ascii_alphanumeric)
                }
                None => false,
            },
        };

        if well_formed {
            Ok(Self(cid.to_string()))
        } else {
            Err(ValidationError::MalformedMortgageCid(cid.to_string()))
        }
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MortgageCid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read-through copy of a loan recorded on the ledger.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Loan {
    #[n(0)]
    pub index: u64,
    #[n(1)]
    pub borrower: Address,
    #[n(2)]
    pub lender: Option<Address>, // None until funded
    #[n(3)]
    pub amount: Wei,
    #[n(4)]
    pub mortgage_cid: String,
    #[n(5)]
    pub due_date: TimeStamp,
    #[n(6)]
    pub status: LoanStatus,
    #[n(7)]
    pub request_date: Option<TimeStamp>,
    #[n(8)]
    pub fund_date: Option<TimeStamp>,
    #[n(9)]
    pub repay_date: Option<TimeStamp>,
    #[n(10)]
    pub interest_accrued: Wei, // as last reported by the ledger
    #[n(11)]
    pub is_repaid: bool,
}

impl Loan {
    pub fn requested(
        index: u64,
        borrower: Address,
        amount: Wei,
        mortgage_cid: impl Into<String>,
        due_date: TimeStamp,
        now: TimeStamp,
    ) -> Self {
        Self {
            index,
            borrower,
            lender: None,
            amount,
            mortgage_cid: mortgage_cid.into(),
            due_date,
            status: LoanStatus::Requested,
            request_date: Some(now),
            fund_date: None,
            repay_date: None,
            interest_accrued: Wei::ZERO,
            is_repaid: false,
        }
    }

    fn transition(&mut self, to: LoanStatus) -> Result<(), ValidationError> {
        if !self.status.can_transition_to(to) {
            return Err(ValidationError::InvalidState {
                index: self.index,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn fund(&mut self, lender: Address, now: TimeStamp) -> Result<(), ValidationError> {
        self.transition(LoanStatus::Funded)?;
        self.lender = Some(lender);
        self.fund_date = Some(now);
        Ok(())
    }

    pub fn repay(&mut self, now: TimeStamp) -> Result<(), ValidationError> {
        self.transition(LoanStatus::Closed)?;
        self.repay_date = Some(now);
        self.interest_accrued = self.accrued_interest_at(now);
        self.is_repaid = true;
        Ok(())
    }

    pub fn mark_defaulted(&mut self) -> Result<(), ValidationError> {
        self.transition(LoanStatus::Defaulted)
    }

    /// Interest accrued since funding. Frozen at the repayment date once closed.
    pub fn accrued_interest_at(&self, now: TimeStamp) -> Wei {
        match self.fund_date {
            Some(funded) => {
                let until = self.repay_date.unwrap_or(now);
                money::accrued_interest(funded, self.amount, until)
            }
            None => Wei::ZERO,
        }
    }

    pub fn total_repayment_at(&self, now: TimeStamp) -> Wei {
        self.amount.saturating_add(self.accrued_interest_at(now))
    }

    pub fn is_overdue(&self, now: TimeStamp) -> bool {
        self.status == LoanStatus::Funded && now > self.due_date
    }

    pub fn involves(&self, address: &Address) -> bool {
        self.borrower == *address || self.lender.as_ref() == Some(address)
    }

    /// Fields fixed at request time.
    pub fn same_terms(&self, other: &Loan) -> bool {
        self.index == other.index
            && self.borrower == other.borrower
            && self.amount == other.amount
            && self.mortgage_cid == other.mortgage_cid
            && self.due_date == other.due_date
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountType {
    None,
    Lender,
    Borrower,
}

impl AccountType {
    pub fn code(&self) -> u8 {
        match self {
            AccountType::None => 0,
            AccountType::Lender => 1,
            AccountType::Borrower => 2,
        }
    }
    pub fn label(&self) -> &'static str {
        match self {
            AccountType::None => "None",
            AccountType::Lender => "Lender",
            AccountType::Borrower => "Borrower",
        }
    }
}

impl TryFrom<u8> for AccountType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AccountType::None),
            1 => Ok(AccountType::Lender),
            2 => Ok(AccountType::Borrower),
            other => Err(other),
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Every role an address holds across the known loans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccountRoles {
    pub borrower: bool,
    pub lender: bool,
}

impl AccountRoles {
    pub fn of(address: &Address, loans: &[Loan]) -> Self {
        loans.iter().fold(Self::default(), |roles, loan| Self {
            borrower: roles.borrower || loan.borrower == *address,
            lender: roles.lender || loan.lender.as_ref() == Some(address),
        })
    }

    /// Collapses to the single dashboard role; borrowing wins.
    pub fn primary(&self) -> AccountType {
        if self.borrower {
            AccountType::Borrower
        } else if self.lender {
            AccountType::Lender
        } else {
            AccountType::None
        }
    }
}

pub fn account_type(address: &Address, loans: &[Loan]) -> AccountType {
    AccountRoles::of(address, loans).primary()
}

/// All loans when `status` is `None`, otherwise the matching ones, in source order.
pub fn filter_by_status(loans: &[Loan], status: Option<LoanStatus>) -> Vec<Loan> {
    loans
        .iter()
        .filter(|loan| status.is_none_or(|s| loan.status == s))
        .cloned()
        .collect()
}
