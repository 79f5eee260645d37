//! Integer money arithmetic: interest accrual and unit conversion.
//!
//! Amounts are always held in the smallest indivisible unit ([`Wei`]). No
//! floating point value ever feeds a monetary calculation; the human-readable
//! forms produced here are for display only.
use crate::clock::TimeStamp;
use crate::error::ValidationError;
use num_bigint::BigUint;
use std::fmt;

pub const SECONDS_PER_YEAR: u64 = 365 * 24 * 60 * 60;
/// 20% per annum.
pub const ANNUAL_RATE_NUMERATOR: u64 = 20;
pub const ANNUAL_RATE_DENOMINATOR: u64 = 100;
pub const ETHER_DECIMALS: u32 = 18;

/// An amount in the smallest monetary unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Wei(u128);

impl Wei {
    pub const ZERO: Wei = Wei(0);

    pub const fn new(amount: u128) -> Self {
        Self(amount)
    }
    pub const fn get(&self) -> u128 {
        self.0
    }
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
    pub fn checked_add(self, other: Wei) -> Option<Wei> {
        self.0.checked_add(other.0).map(Wei)
    }
    pub fn saturating_add(self, other: Wei) -> Wei {
        Wei(self.0.saturating_add(other.0))
    }
}

impl From<u64> for Wei {
    fn from(value: u64) -> Self {
        Wei(u128::from(value))
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// u128 is carried as 16 big-endian bytes.
impl<C> minicbor::Encode<C> for Wei {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.0.to_be_bytes())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Wei {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let bytes = d.bytes()?;

        <[u8; 16]>::try_from(bytes)
            .map(|b| Wei(u128::from_be_bytes(b)))
            .map_err(|_| minicbor::decode::Error::message("amount must be 16 bytes"))
    }
}

/// Simple interest on `principal` for `elapsed_secs` at the fixed annual rate.
///
/// The product is formed in arbitrary precision and divided exactly once, so
/// truncation happens only in the final step. Results that would not fit a
/// `u128` saturate.
pub fn interest_for(principal: Wei, elapsed_secs: u64) -> Wei {
    if elapsed_secs == 0 || principal.is_zero() {
        return Wei::ZERO;
    }
    let numerator = BigUint::from(principal.get())
        * BigUint::from(ANNUAL_RATE_NUMERATOR)
        * BigUint::from(elapsed_secs);
    let denominator = BigUint::from(ANNUAL_RATE_DENOMINATOR) * BigUint::from(SECONDS_PER_YEAR);
    let interest = numerator / denominator;

    Wei(u128::try_from(&interest).unwrap_or(u128::MAX))
}

/// Interest accrued from `funded_at` until `now`.
///
/// A funding time ahead of `now` (local clock skew) counts as zero elapsed
/// time rather than an error.
pub fn accrued_interest(funded_at: TimeStamp, principal: Wei, now: TimeStamp) -> Wei {
    let elapsed = u64::try_from(now.seconds_since(&funded_at)).unwrap_or(0);
    interest_for(principal, elapsed)
}

/// Principal plus interest owed at `now`.
pub fn total_repayment(principal: Wei, funded_at: Option<TimeStamp>, now: TimeStamp) -> Wei {
    match funded_at {
        Some(funded_at) => principal.saturating_add(accrued_interest(funded_at, principal, now)),
        None => principal,
    }
}

/// Renders `amount` with `decimals` fractional digits, trimming trailing zeros.
pub fn format_units(amount: Wei, decimals: u32) -> String {
    let raw = amount.get().to_string();
    let decimals = decimals as usize;
    if decimals == 0 {
        return raw;
    }
    let padded = if raw.len() <= decimals {
        format!("{}{}", "0".repeat(decimals + 1 - raw.len()), raw)
    } else {
        raw
    };
    let (whole, fraction) = padded.split_at(padded.len() - decimals);
    let fraction = fraction.trim_end_matches('0');

    if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{fraction}")
    }
}

pub fn format_ether(amount: Wei) -> String {
    format_units(amount, ETHER_DECIMALS)
}

/// Parses a human decimal string exactly. More fractional digits than
/// `decimals` is an error rather than a rounding.
pub fn parse_units(input: &str, decimals: u32) -> Result<Wei, ValidationError> {
    let malformed = || ValidationError::MalformedAmount(input.to_string());
    let trimmed = input.trim();
    let (whole, fraction) = match trimmed.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (trimmed, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(malformed());
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || !all_digits(fraction) || fraction.len() > decimals as usize {
        return Err(malformed());
    }

    let scale = 10u128.checked_pow(decimals).ok_or_else(malformed)?;
    let whole = if whole.is_empty() {
        0
    } else {
        whole.parse::<u128>().map_err(|_| malformed())?
    };
    let fraction = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{fraction:0<width$}", width = decimals as usize);
        padded.parse::<u128>().map_err(|_| malformed())?
    };

    whole
        .checked_mul(scale)
        .and_then(|w| w.checked_add(fraction))
        .map(Wei)
        .ok_or_else(malformed)
}

pub fn parse_ether(input: &str) -> Result<Wei, ValidationError> {
    parse_units(input, ETHER_DECIMALS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_year_at_twenty_percent() {
        assert_eq!(
            interest_for(Wei::new(1_000_000), SECONDS_PER_YEAR),
            Wei::new(200_000)
        );
    }

    #[test]
    fn clock_skew_counts_as_zero_elapsed() {
        let funded = TimeStamp::from_unix(2_000);
        let now = TimeStamp::from_unix(1_000);

        assert_eq!(accrued_interest(funded, Wei::new(5_000), now), Wei::ZERO);
    }

    #[test]
    fn huge_principal_does_not_overflow() {
        let interest = interest_for(Wei::new(u128::MAX), SECONDS_PER_YEAR);
        assert_eq!(interest, Wei::new(u128::MAX / 5));
    }

    #[test]
    fn formats_ether() {
        assert_eq!(format_ether(Wei::new(1_500_000_000_000_000_000)), "1.5");
        assert_eq!(format_ether(Wei::new(1)), "0.000000000000000001");
        assert_eq!(format_ether(Wei::ZERO), "0");
        assert_eq!(format_ether(Wei::new(2_000_000_000_000_000_000)), "2");
    }

    #[test]
    fn parses_ether_exactly() {
        assert_eq!(parse_ether("1.5").unwrap(), Wei::new(1_500_000_000_000_000_000));
        assert_eq!(parse_ether(".25").unwrap(), Wei::new(250_000_000_000_000_000));
        assert_eq!(parse_ether("3").unwrap(), Wei::new(3_000_000_000_000_000_000));
        assert!(parse_ether("0.0000000000000000001").is_err());
        assert!(parse_ether("-1").is_err());
        assert!(parse_ether("1e3").is_err());
        assert!(parse_ether("").is_err());
    }
}
