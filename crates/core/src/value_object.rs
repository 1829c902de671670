//! Value objects: equality by value, not identity.
//!
//! Value objects are domain objects that have **no identity** - they are defined entirely
//! by their attribute values. Two value objects with the same values are considered equal.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// A review score, constrained to `[1, 5]`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Rating(u8);

impl Rating {
    pub const MIN: i32 = 1;
    pub const MAX: i32 = 5;

    pub fn new(value: i32) -> DomainResult<Self> {
        if !Self::is_valid(value) {
            return Err(DomainError::validation(format!(
                "rating must be between {} and {}, got {value}",
                Self::MIN,
                Self::MAX
            )));
        }
        Ok(Self(value as u8))
    }

    pub fn is_valid(value: i32) -> bool {
        (Self::MIN..=Self::MAX).contains(&value)
    }

    pub fn value(self) -> i32 {
        i32::from(self.0)
    }
}

impl TryFrom<i32> for Rating {
    type Error = DomainError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Rating> for i32 {
    fn from(value: Rating) -> Self {
        value.value()
    }
}

impl core::fmt::Display for Rating {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A price kept as a decimal string so it never goes through float rounding.
///
/// Accepted shape: `digits` or `digits.digits` (e.g. `10`, `9.99`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Price(String);

impl Price {
    pub fn parse(raw: impl AsRef<str>) -> DomainResult<Self> {
        let raw = raw.as_ref().trim();
        if raw.is_empty() {
            return Err(DomainError::validation("product price is not specified"));
        }

        let (whole, fraction) = match raw.split_once('.') {
            Some((w, f)) => (w, Some(f)),
            None => (raw, None),
        };
        let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(whole) || fraction.is_some_and(|f| !all_digits(f)) {
            return Err(DomainError::validation(format!(
                "product price must be a decimal number, got '{raw}'"
            )));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Price {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Price> for String {
    fn from(value: Price) -> Self {
        value.0
    }
}

impl core::fmt::Display for Price {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_bounds_are_inclusive() {
        assert!(Rating::new(1).is_ok());
        assert!(Rating::new(5).is_ok());
        assert!(matches!(Rating::new(0), Err(DomainError::Validation(_))));
        assert!(matches!(Rating::new(6), Err(DomainError::Validation(_))));
    }

    #[test]
    fn rating_deserialization_enforces_range() {
        let ok: Rating = serde_json::from_str("4").unwrap();
        assert_eq!(ok.value(), 4);
        assert!(serde_json::from_str::<Rating>("9").is_err());
    }

    #[test]
    fn price_accepts_decimal_strings() {
        assert_eq!(Price::parse("9.99").unwrap().as_str(), "9.99");
        assert_eq!(Price::parse(" 10 ").unwrap().as_str(), "10");
    }

    #[test]
    fn price_rejects_malformed_input() {
        for raw in ["", "abc", "1.", ".5", "1.2.3", "-3", "1e5"] {
            assert!(Price::parse(raw).is_err(), "accepted {raw:?}");
        }
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: every in-range integer is a rating and round-trips its value.
            #[test]
            fn rating_accepts_exactly_the_closed_range(value in -100i32..100) {
                let parsed = Rating::new(value);
                prop_assert_eq!(parsed.is_ok(), (1..=5).contains(&value));
                if let Ok(r) = parsed {
                    prop_assert_eq!(r.value(), value);
                }
            }

            /// Property: well-formed decimals are kept verbatim.
            #[test]
            fn price_keeps_decimal_text(whole in "[0-9]{1,6}", frac in proptest::option::of("[0-9]{1,2}")) {
                let raw = match &frac {
                    Some(f) => format!("{whole}.{f}"),
                    None => whole.clone(),
                };
                let price = Price::parse(&raw).unwrap();
                prop_assert_eq!(price.as_str(), raw.as_str());
            }
        }
    }
}
