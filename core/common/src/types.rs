//! Identifier types used throughout tallyfeed.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// Identifier of one linked upstream item (an institution login grouping).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(String);

impl ItemId {
    /// Create a new ItemId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty or only whitespace
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "ItemId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque, provider-defined position in an item's change feed.
///
/// The empty cursor means "from the beginning".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncCursor(String);

impl SyncCursor {
    /// Cursor that starts the feed from the beginning.
    pub fn beginning() -> Self {
        Self(String::new())
    }

    /// Wrap a cursor string as returned by the upstream.
    pub fn new(cursor: impl Into<String>) -> Self {
        Self(cursor.into())
    }

    /// Whether this cursor points at the beginning of the feed.
    pub fn is_beginning(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_beginning() {
            write!(f, "<beginning>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Globally unique upstream transaction identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Access credential for one item. Zeroized on drop and never printed.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct ItemCredential(String);

impl ItemCredential {
    /// Wrap an access token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Expose the token for use in an upstream request.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ItemCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemCredential([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_id_creation() {
        let id = ItemId::new("item-1").unwrap();
        assert_eq!(id.as_str(), "item-1");
    }

    #[test]
    fn test_item_id_empty_fails() {
        assert!(ItemId::new("").is_err());
        assert!(ItemId::new("   ").is_err());
    }

    #[test]
    fn test_cursor_beginning() {
        assert!(SyncCursor::beginning().is_beginning());
        assert!(SyncCursor::default().is_beginning());
        assert!(!SyncCursor::new("c1").is_beginning());
        assert_eq!(SyncCursor::beginning().to_string(), "<beginning>");
    }

    #[test]
    fn test_cursor_serializes_as_plain_string() {
        let json = serde_json::to_string(&SyncCursor::new("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
    }

    #[test]
    fn test_credential_is_redacted() {
        let cred = ItemCredential::new("access-sandbox-secret");
        let printed = format!("{:?}", cred);
        assert!(!printed.contains("secret"));
        assert_eq!(cred.expose(), "access-sandbox-secret");
    }
}
