//! Conversion between the ledger's untyped read results and the loan model.
//!
//! Nothing outside this module looks at a raw ledger response. Every record is
//! checked for shape and internal consistency; a record that fails is reported
//! as [`LoanError::StaleRead`] and left out, so callers can still show the
//! records that did decode.
use crate::address::Address;
use crate::clock::TimeStamp;
use crate::error::LoanError;
use crate::loan::{AccountType, Loan, LoanStatus};
use crate::money::Wei;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ledger integers arrive as JSON numbers or, when too wide, as decimal or
/// `0x` hex strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawUint {
    Number(u64),
    Text(String),
}

impl RawUint {
    pub fn to_u128(&self) -> Option<u128> {
        match self {
            RawUint::Number(n) => Some(u128::from(*n)),
            RawUint::Text(s) => match s.strip_prefix("0x") {
                Some(hex) => u128::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            },
        }
    }
    pub fn to_u64(&self) -> Option<u64> {
        self.to_u128().and_then(|n| u64::try_from(n).ok())
    }
}

impl From<u128> for RawUint {
    fn from(value: u128) -> Self {
        match u64::try_from(value) {
            Ok(n) => RawUint::Number(n),
            Err(_) => RawUint::Text(value.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLoan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
    pub borrower: String,
    #[serde(default)]
    pub lender: Option<String>,
    pub amount: RawUint,
    #[serde(rename = "mortgageCID")]
    pub mortgage_cid: String,
    pub due_date: RawUint,
    pub status: u8,
    #[serde(default)]
    pub request_date: Option<RawUint>,
    #[serde(default)]
    pub fund_date: Option<RawUint>,
    #[serde(default)]
    pub repay_date: Option<RawUint>,
    #[serde(default)]
    pub interest_accrued: Option<RawUint>,
    #[serde(default)]
    pub is_repaid: bool,
}

impl From<&Loan> for RawLoan {
    fn from(loan: &Loan) -> Self {
        let date = |d: Option<TimeStamp>| Some(RawUint::Number(d.map_or(0, |t| t.unix_seconds())));
        Self {
            index: Some(loan.index),
            borrower: loan.borrower.to_string(),
            lender: Some(loan.lender.unwrap_or(Address::ZERO).to_string()),
            amount: loan.amount.get().into(),
            mortgage_cid: loan.mortgage_cid.clone(),
            due_date: RawUint::Number(loan.due_date.unix_seconds()),
            status: loan.status.code(),
            request_date: date(loan.request_date),
            fund_date: date(loan.fund_date),
            repay_date: date(loan.repay_date),
            interest_accrued: Some(loan.interest_accrued.get().into()),
            is_repaid: loan.is_repaid,
        }
    }
}

fn stale(index: u64, reason: impl std::fmt::Display) -> LoanError {
    LoanError::StaleRead(format!("loan {index}: {reason}"))
}

fn ledger_date(index: u64, field: &str, raw: Option<&RawUint>) -> Result<Option<TimeStamp>, LoanError> {
    match raw {
        None => Ok(None),
        Some(raw) => raw
            .to_u64()
            .map(TimeStamp::from_ledger)
            .ok_or_else(|| stale(index, format!("{field} is not a timestamp"))),
    }
}

impl RawLoan {
    /// `position` stands in for the index when the ledger omits it.
    pub fn into_loan(self, position: u64) -> Result<Loan, LoanError> {
        let index = self.index.unwrap_or(position);

        let borrower = Address::parse(&self.borrower).map_err(|e| stale(index, e))?;
        if borrower.is_zero() {
            return Err(stale(index, "borrower is unset"));
        }
        let lender = match self.lender.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(Address::parse(raw).map_err(|e| stale(index, e))?),
        }
        .filter(|lender| !lender.is_zero());

        let amount = self
            .amount
            .to_u128()
            .map(Wei::new)
            .ok_or_else(|| stale(index, "amount is not an unsigned integer"))?;
        let status =
            LoanStatus::try_from(self.status).map_err(|code| stale(index, format!("unknown status {code}")))?;
        let due_date = ledger_date(index, "dueDate", Some(&self.due_date))?
            .ok_or_else(|| stale(index, "dueDate is unset"))?;
        let request_date = ledger_date(index, "requestDate", self.request_date.as_ref())?;
        let fund_date = ledger_date(index, "fundDate", self.fund_date.as_ref())?;
        let repay_date = ledger_date(index, "repayDate", self.repay_date.as_ref())?;
        let interest_accrued = match &self.interest_accrued {
            None => Wei::ZERO,
            Some(raw) => raw
                .to_u128()
                .map(Wei::new)
                .ok_or_else(|| stale(index, "interestAccrued is not an unsigned integer"))?,
        };

        let ordered = |a: Option<TimeStamp>, b: Option<TimeStamp>| match (a, b) {
            (Some(a), Some(b)) => a <= b,
            _ => true,
        };
        if !ordered(request_date, fund_date) || !ordered(fund_date, repay_date) || !ordered(request_date, repay_date) {
            return Err(stale(index, "requestDate <= fundDate <= repayDate does not hold"));
        }
        match status {
            LoanStatus::Requested if lender.is_some() => {
                return Err(stale(index, "requested loan already has a lender"));
            }
            LoanStatus::Funded | LoanStatus::Closed | LoanStatus::Defaulted
                if lender.is_none() || fund_date.is_none() =>
            {
                return Err(stale(index, format!("{status} loan has no lender or fund date")));
            }
            _ => {}
        }
        if self.is_repaid && status != LoanStatus::Closed {
            return Err(stale(index, format!("isRepaid set on a {status} loan")));
        }

        Ok(Loan {
            index,
            borrower,
            lender,
            amount,
            mortgage_cid: self.mortgage_cid,
            due_date,
            status,
            request_date,
            fund_date,
            repay_date,
            interest_accrued,
            is_repaid: self.is_repaid,
        })
    }
}

/// Decodes a `[loan, ...]` list, keeping every record that passes.
pub fn decode_loan_list(value: &Value) -> (Vec<Loan>, Vec<LoanError>) {
    let Some(items) = value.as_array() else {
        return (
            vec![],
            vec![LoanError::StaleRead("loan list is not an array".into())],
        );
    };

    let mut loans = Vec::with_capacity(items.len());
    let mut errors = vec![];
    for (position, item) in items.iter().enumerate() {
        let position = position as u64;
        let decoded = serde_json::from_value::<RawLoan>(item.clone())
            .map_err(|e| stale(position, e))
            .and_then(|raw| raw.into_loan(position));
        match decoded {
            Ok(loan) => loans.push(loan),
            Err(err) => errors.push(err),
        }
    }
    (loans, errors)
}

/// Decodes `[accountType, [loan, ...]]`.
pub fn decode_account_details(value: &Value) -> Result<(AccountType, Vec<Loan>, Vec<LoanError>), LoanError> {
    let pair = value
        .as_array()
        .filter(|pair| pair.len() == 2)
        .ok_or_else(|| LoanError::StaleRead("account details are not an [accountType, loans] pair".into()))?;

    let account_type = pair[0]
        .as_u64()
        .and_then(|code| u8::try_from(code).ok())
        .and_then(|code| AccountType::try_from(code).ok())
        .ok_or_else(|| LoanError::StaleRead(format!("unknown account type {}", pair[0])))?;
    let (loans, errors) = decode_loan_list(&pair[1]);

    Ok((account_type, loans, errors))
}

pub fn encode_loan_list(loans: &[Loan]) -> anyhow::Result<Value> {
    let raw: Vec<RawLoan> = loans.iter().map(RawLoan::from).collect();
    Ok(serde_json::to_value(raw)?)
}

pub fn encode_account_details(account_type: AccountType, loans: &[Loan]) -> anyhow::Result<Value> {
    Ok(Value::Array(vec![
        Value::from(account_type.code()),
        encode_loan_list(loans)?,
    ]))
}
