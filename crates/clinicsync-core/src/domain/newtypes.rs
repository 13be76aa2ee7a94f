//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for domain identifiers.
//! Each newtype ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

/// Length of the random suffix appended to operation ids
const OPERATION_ID_SUFFIX_LEN: usize = 9;

/// Maximum length of a remote table name (PostgreSQL identifier limit)
const MAX_TARGET_LEN: usize = 63;

// ============================================================================
// OperationId
// ============================================================================

/// Identifier of a queued operation
///
/// Formatted as `<unix-millis>-<random suffix>` so ids sort roughly by
/// creation time while staying unique across rapid successive writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OperationId(String);

impl OperationId {
    /// Generate a fresh id anchored at `now`
    #[must_use]
    pub fn generate(now: DateTime<Utc>) -> Self {
        let suffix: String = Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(OPERATION_ID_SUFFIX_LEN)
            .collect();
        Self(format!("{}-{}", now.timestamp_millis().max(0), suffix))
    }

    /// Returns the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Millisecond timestamp encoded in the id
    pub fn timestamp_millis(&self) -> i64 {
        self.0
            .split_once('-')
            .and_then(|(millis, _)| millis.parse().ok())
            .unwrap_or_default()
    }
}

impl Display for OperationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OperationId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (millis, suffix) = s
            .split_once('-')
            .ok_or_else(|| DomainError::InvalidOperationId(s.to_string()))?;

        let millis_ok = !millis.is_empty() && millis.chars().all(|c| c.is_ascii_digit());
        let suffix_ok = !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_alphanumeric());

        if millis_ok && suffix_ok {
            Ok(Self(s.to_string()))
        } else {
            Err(DomainError::InvalidOperationId(s.to_string()))
        }
    }
}

impl TryFrom<String> for OperationId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OperationId> for String {
    fn from(id: OperationId) -> Self {
        id.0
    }
}

// ============================================================================
// TargetName
// ============================================================================

/// Name of a remote collection (table) targeted by an operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetName(String);

impl TargetName {
    /// Create a validated table name
    ///
    /// # Errors
    /// Returns `DomainError::InvalidTarget` for empty names, names longer
    /// than 63 characters, or names containing anything other than ASCII
    /// letters, digits and underscores.
    pub fn new(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_TARGET_LEN {
            return Err(DomainError::InvalidTarget(name));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DomainError::InvalidTarget(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TargetName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TargetName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TargetName> for String {
    fn from(target: TargetName) -> Self {
        target.0
    }
}

// ============================================================================
// RecordId
// ============================================================================

/// Identifier of a record in the remote store
///
/// Remote ids may be strings (uuid) or integers; both are carried as text
/// because they are only ever used in equality filters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "record id must not be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Extract the `id` field of a JSON payload, if present and usable
    pub fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        match payload.get("id")? {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(Self(s.clone())),
            serde_json::Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
