//! Review change notification, rendered as a single text line.

use serde::{Deserialize, Serialize};

use prodreview_core::{ProductId, Rating};

/// What happened to a review.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    Created,
    Modified,
    Deleted,
}

impl ReviewAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewAction::Created => "created",
            ReviewAction::Modified => "modified",
            ReviewAction::Deleted => "deleted",
        }
    }
}

impl core::fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification published after a committed review mutation.
///
/// Renders as `"<ACTION>: Review scoring <rating> from <first> <last> for product <id>"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewNotification {
    pub action: ReviewAction,
    pub rating: Rating,
    pub first_name: String,
    pub last_name: String,
    pub product_id: ProductId,
}

impl ReviewNotification {
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl core::fmt::Display for ReviewNotification {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}: Review scoring {} from {} {} for product {}",
            self.action.as_str().to_uppercase(),
            self.rating,
            self.first_name,
            self.last_name,
            self.product_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(action: ReviewAction) -> ReviewNotification {
        ReviewNotification {
            action,
            rating: Rating::new(4).unwrap(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            product_id: ProductId::parse("product-123").unwrap(),
        }
    }

    #[test]
    fn message_matches_wire_format() {
        assert_eq!(
            notification(ReviewAction::Created).message(),
            "CREATED: Review scoring 4 from Ada Lovelace for product product-123"
        );
    }

    #[test]
    fn action_is_upper_cased() {
        assert!(notification(ReviewAction::Modified).message().starts_with("MODIFIED: "));
        assert!(notification(ReviewAction::Deleted).message().starts_with("DELETED: "));
    }
}
