use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{FIELD_SEPARATOR, FLAG_FAIL, FLAG_IN_CHAT, FLAG_OK, MAX_SCORE, MIN_SCORE};
use crate::error::ProtocolError;

/// Usernames are case-insensitive; every protocol entry point folds them
/// to trimmed lower case before they reach the store or the registries.
pub fn normalize_username(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Reject usernames that cannot be represented unambiguously on the wire.
pub fn validate_username(name: &str) -> Result<(), ProtocolError> {
    if name.is_empty() {
        return Err(ProtocolError::Malformed("empty username".into()));
    }
    if name.contains(FIELD_SEPARATOR) {
        return Err(ProtocolError::Malformed(format!(
            "username may not contain '{FIELD_SEPARATOR}'"
        )));
    }
    Ok(())
}

/// Check that a rating lies in the accepted 1..=5 range.
pub fn validate_score(score: i64) -> Result<i64, ProtocolError> {
    if (MIN_SCORE..=MAX_SCORE).contains(&score) {
        Ok(score)
    } else {
        Err(ProtocolError::Malformed(format!(
            "score {score} outside {MIN_SCORE}..={MAX_SCORE}"
        )))
    }
}

/// A `name|seller` product lookup. The seller part is optional for
/// clients that predate per-seller product identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRef {
    pub name: String,
    pub seller: Option<String>,
}

impl ProductRef {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let (name, seller) = match raw.split_once(FIELD_SEPARATOR) {
            Some((name, seller)) => (name.trim(), Some(normalize_username(seller))),
            None => (raw.trim(), None),
        };
        if name.is_empty() {
            return Err(ProtocolError::Malformed("empty product name".into()));
        }
        Ok(Self {
            name: name.to_string(),
            seller: seller.filter(|s| !s.is_empty()),
        })
    }

    pub fn to_field(&self) -> String {
        match &self.seller {
            Some(seller) => format!("{}{FIELD_SEPARATOR}{seller}", self.name),
            None => self.name.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Lifecycle of a purchase transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Approved,
    Declined,
    Completed,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Declined => "declined",
            Self::Completed => "completed",
        }
    }

    /// The only legal moves are pending -> approved | declined and
    /// approved -> completed.
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved)
                | (Self::Pending, Self::Declined)
                | (Self::Approved, Self::Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Declined | Self::Completed)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "declined" => Ok(Self::Declined),
            "completed" => Ok(Self::Completed),
            other => Err(ProtocolError::Malformed(format!(
                "unknown transaction status {other:?}"
            ))),
        }
    }
}

/// How a transaction record came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionOrigin {
    /// Created through propose-transaction.
    Explicit,
    /// Created by the chat interceptor from a free-text proposal.
    Chat,
    /// Recorded by a legacy stock decrement with no prior proposal.
    Direct,
}

impl TransactionOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Chat => "chat",
            Self::Direct => "direct",
        }
    }
}

impl FromStr for TransactionOrigin {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "explicit" => Ok(Self::Explicit),
            "chat" => Ok(Self::Chat),
            "direct" => Ok(Self::Direct),
            other => Err(ProtocolError::Malformed(format!(
                "unknown transaction origin {other:?}"
            ))),
        }
    }
}

/// A seller's answer to a pending transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Decline,
}

impl Decision {
    pub fn target_status(self) -> TransactionStatus {
        match self {
            Self::Approve => TransactionStatus::Approved,
            Self::Decline => TransactionStatus::Declined,
        }
    }
}

impl FromStr for Decision {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approved" | "approve" | "accept" | "accepted" | "confirm" => Ok(Self::Approve),
            "declined" | "decline" | "deny" | "denied" | "reject" => Ok(Self::Decline),
            other => Err(ProtocolError::Malformed(format!(
                "unknown transaction response {other:?}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Visibility of one user as seen by another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatStatus {
    Offline,
    Online,
    InChatWithViewer,
}

impl ChatStatus {
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Offline => FLAG_FAIL,
            Self::Online => FLAG_OK,
            Self::InChatWithViewer => FLAG_IN_CHAT,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            FLAG_FAIL => Some(Self::Offline),
            FLAG_OK => Some(Self::Online),
            FLAG_IN_CHAT => Some(Self::InChatWithViewer),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use TransactionStatus::*;
        let all = [Pending, Approved, Declined, Completed];
        let legal: Vec<_> = all
            .iter()
            .flat_map(|from| all.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .collect();
        assert_eq!(
            legal,
            vec![(Pending, Approved), (Pending, Declined), (Approved, Completed)]
        );
    }

    #[test]
    fn test_product_ref_parsing() {
        let full = ProductRef::parse("Widget|Alice").unwrap();
        assert_eq!(full.name, "Widget");
        assert_eq!(full.seller.as_deref(), Some("alice"));

        let bare = ProductRef::parse(" Widget ").unwrap();
        assert_eq!(bare.seller, None);

        assert!(ProductRef::parse("|alice").is_err());
    }

    #[test]
    fn test_decision_aliases() {
        assert_eq!("approved".parse::<Decision>().unwrap(), Decision::Approve);
        assert_eq!("DENY".parse::<Decision>().unwrap(), Decision::Decline);
        assert!("maybe".parse::<Decision>().is_err());
    }

    #[test]
    fn test_username_rules() {
        assert_eq!(normalize_username("  Alice "), "alice");
        assert!(validate_username("").is_err());
        assert!(validate_username("a|b").is_err());
        assert!(validate_username("bob").is_ok());
    }

    #[test]
    fn test_chat_status_bytes() {
        for status in [
            ChatStatus::Offline,
            ChatStatus::Online,
            ChatStatus::InChatWithViewer,
        ] {
            assert_eq!(ChatStatus::from_byte(status.to_byte()), Some(status));
        }
        assert_eq!(ChatStatus::from_byte(b'x'), None);
    }
}
