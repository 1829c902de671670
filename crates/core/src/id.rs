//! Strongly-typed identifiers used across the domain.
//!
//! Identifiers are opaque strings prefixed by the record type (`product-…`,
//! `review-…`) so they stay recognisable in logs and event messages.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a product.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

/// Identifier of a review.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewId(String);

macro_rules! impl_prefixed_id {
    ($t:ty, $name:literal, $prefix:literal) => {
        impl $t {
            /// Prefix prepended to generated identifiers.
            pub const PREFIX: &'static str = $prefix;

            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(format!("{}{}", $prefix, Uuid::now_v7()))
            }

            /// Wrap a caller-supplied identifier.
            ///
            /// Identifiers are opaque: anything non-blank is accepted, so records
            /// created by other writers stay addressable.
            pub fn parse(raw: impl AsRef<str>) -> Result<Self, DomainError> {
                let raw = raw.as_ref().trim();
                if raw.is_empty() {
                    return Err(DomainError::invalid_id(concat!($name, " is not specified")));
                }
                Ok(Self(raw.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

impl_prefixed_id!(ProductId, "product ID", "product-");
impl_prefixed_id!(ReviewId, "review ID", "review-");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_type_prefix() {
        assert!(ProductId::new().as_str().starts_with("product-"));
        assert!(ReviewId::new().as_str().starts_with("review-"));
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(ProductId::new(), ProductId::new());
    }

    #[test]
    fn parse_rejects_blank_input() {
        assert!(matches!(ProductId::parse(""), Err(DomainError::InvalidId(_))));
        assert!(matches!(ReviewId::parse("   "), Err(DomainError::InvalidId(_))));
    }

    #[test]
    fn parse_accepts_opaque_ids() {
        let id: ProductId = "legacy-42".parse().unwrap();
        assert_eq!(id.as_str(), "legacy-42");
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = ReviewId::parse("review-abc").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"review-abc\"");
    }
}
