//! Opaque identifiers for sessions, messages, interacts, and output blocks.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Source of statistically unique opaque tokens.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Random UUIDv4 tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uuid4Generator;

impl IdGenerator for Uuid4Generator {
    fn generate(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Prefixed counter tokens (`<prefix>-1`, `<prefix>-2`, ...). Deterministic, for tests and replays.
#[derive(Debug)]
pub struct SequentialGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequentialGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequentialGenerator {
    fn generate(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", self.prefix)
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn generate(ids: &dyn IdGenerator) -> Self {
                Self(ids.generate())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifies one execution conversation and groups its output.
    SessionId
);
string_id!(
    /// Identifies one `execute_request`; inbound messages point back at it via `parent_header`.
    MsgId
);
string_id!(
    /// Server-assigned identity of an interactive function.
    InteractId
);
string_id!(
    /// A named render target.
    BlockId
);

impl From<&SessionId> for BlockId {
    fn from(id: &SessionId) -> Self {
        Self(id.0.clone())
    }
}

impl From<&InteractId> for BlockId {
    fn from(id: &InteractId) -> Self {
        Self(id.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_uuid_ids_are_unique() {
        let ids = Uuid4Generator;
        let sample: HashSet<String> = (0..10_000).map(|_| ids.generate()).collect();
        assert_eq!(sample.len(), 10_000);
    }

    #[test]
    fn test_uuid_shape() {
        let id = SessionId::generate(&Uuid4Generator);
        assert_eq!(id.as_str().len(), 36);
        assert_eq!(id.as_str().chars().nth(14), Some('4'));
    }

    #[test]
    fn test_sequential_ids() {
        let ids = SequentialGenerator::new("msg");
        assert_eq!(MsgId::generate(&ids).as_str(), "msg-1");
        assert_eq!(MsgId::generate(&ids).as_str(), "msg-2");
    }

    #[test]
    fn test_block_from_session_and_interact() {
        let session = SessionId::from("abc");
        let interact = InteractId::from("42");
        assert_eq!(BlockId::from(&session).as_str(), "abc");
        assert_eq!(BlockId::from(&interact).as_str(), "42");
    }

    #[test]
    fn test_serde_transparent() {
        let id = MsgId::from("m-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""m-1""#);
    }
}
