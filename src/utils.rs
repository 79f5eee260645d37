//! Small helpers for identifiers and display

use crate::address::Address;
use uuid7::uuid7;

// time-ordered id for a transaction attempt, used in logs and confirmations
pub fn new_attempt_id() -> String {
    format!("att_{}", uuid7())
}

/// Keeps the first five and everything from the fortieth character on, so
/// `0x1234567890abcdef1234567890abcdef12345678` becomes `0x123...678`.
/// Shorter input is returned as is.
pub fn shorten(s: &str) -> String {
    match (s.get(..5), s.get(39..)) {
        (Some(head), Some(tail)) if !tail.is_empty() => format!("{head}...{tail}"),
        _ => s.to_string(),
    }
}

pub fn short_address(address: &Address) -> String {
    shorten(&address.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_ids_are_unique() {
        let a = new_attempt_id();
        let b = new_attempt_id();
        assert!(a.starts_with("att_"));
        assert_ne!(a, b);
    }

    #[test]
    fn shortens_full_addresses() {
        let address = Address::parse("0x1234567890abcdef1234567890abcdef12345678").unwrap();
        assert_eq!(short_address(&address), "0x123...678");
        assert_eq!(shorten("0xabc"), "0xabc");
    }
}
