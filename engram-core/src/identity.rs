//! Identity types for Engram entities
//!
//! Two kinds of identity coexist in the data model. Rows the service mints
//! itself (memories, working items, relationship edges, access entries)
//! carry timestamp-sortable UUID keys. Sessions and users are identified
//! by the caller, so their keys are opaque strings: the service never
//! derives meaning from them and applies structural validation only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::ValidationError;

// ============================================================================
// GENERATED ROW KEYS
// ============================================================================

/// Define a UUID row key minted by the service. Only the operations the
/// store gateway and managers need are generated: minting, wrapping a row
/// read back from the store, and the raw UUID for store parameters.
macro_rules! define_row_key {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Wrap a UUID read back from the store.
            pub fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Mint a fresh timestamp-sortable key.
            pub fn now_v7() -> Self {
                Self(Uuid::now_v7())
            }

            /// The raw UUID, for store parameters.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::from_str(s).map(Self)
            }
        }
    };
}

define_row_key!(MemoryId, "Key of a long-term memory row.");
define_row_key!(ItemId, "Key of a working-memory item row.");
define_row_key!(RelationshipId, "Key of a memory-relationship edge.");
define_row_key!(AccessId, "Key of an access-log entry.");

// ============================================================================
// CALLER-SUPPLIED KEYS
// ============================================================================

/// Longest accepted caller-supplied key, in bytes.
pub const KEY_MAX_LEN: usize = 256;

/// Define an opaque caller-supplied key. Blank or unbounded keys would
/// corrupt row identity, so construction stays infallible (keys flow in
/// from the wire) and managers call `validate` at their entry points.
macro_rules! define_opaque_key {
    ($name:ident, $field:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw key string.
            pub fn new(key: impl Into<String>) -> Self {
                Self(key.into())
            }

            /// View the raw key string.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Structural validation: non-blank, bounded length.
            pub fn validate(&self) -> Result<(), ValidationError> {
                if self.0.trim().is_empty() {
                    return Err(ValidationError::RequiredFieldMissing {
                        field: $field.to_string(),
                    });
                }
                if self.0.len() > KEY_MAX_LEN {
                    return Err(ValidationError::InvalidValue {
                        field: $field.to_string(),
                        reason: format!("longer than {} bytes", KEY_MAX_LEN),
                    });
                }
                Ok(())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

define_opaque_key!(
    SessionKey,
    "session_id",
    "Opaque session key chosen by the caller. Sessions are created on first reference."
);
define_opaque_key!(
    UserId,
    "user_id",
    "Opaque user identifier owning sessions and long-term memories."
);

// ============================================================================
// OTHER IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// SHA-256 content hash used to key the embedding cache.
pub type ContentHash = [u8; 32];

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

// ============================================================================
// TESTS
// ============================================================================
