//! Typed identifiers.
//!
//! Prompt and user ids cross store boundaries without foreign keys, so every
//! id gets its own newtype: a `PromptId` cannot be handed to a function that
//! wants an `EvaluationId`. All integer ids are row ids; user ids are opaque
//! 36-character strings minted elsewhere.

use rusqlite::ToSql;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! int_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map(Self)
            }
        }
    };
}

int_id!(
    /// A stored prompt in the prompt store.
    PromptId
);
int_id!(
    /// One scheduling intent in the execution queue.
    QueueEntryId
);
int_id!(
    /// One attempt by one assistant plan to answer one prompt.
    EvaluationId
);
int_id!(
    /// An AI assistant (ChatGPT, Claude, ...).
    AssistantId
);
int_id!(
    /// A plan of an assistant (FREE, PLUS, ...).
    PlanId
);
int_id!(
    /// A user-owned prompt group.
    GroupId
);
int_id!(
    /// A generated group report snapshot.
    ReportId
);
int_id!(
    /// A credit grant in the users store.
    GrantId
);
int_id!(
    /// A balance audit-log entry.
    TransactionId
);

/// Opaque 36-character user identifier (no FK into the users store).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

impl ToSql for UserId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.as_str()))
    }
}

impl FromSql for UserId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()
            .map(|s| Self(s.to_owned()))
            .map_err(|_| FromSqlError::InvalidType)
    }
}
