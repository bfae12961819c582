//! Canonical identifier types.
//!
//! Every identifier that crosses the connection boundary is parsed into one
//! of these newtypes exactly once. They serialize as decimal strings so that
//! JavaScript clients never lose precision, and deserialize from either a
//! string or a JSON number.
//!
//! ```text
//! 64                         22          17          12          0
//! +---------------------------+-----------+-----------+-----------+
//! |         timestamp         |  worker   |  process  |  sequence |
//! |          (42 bits)        |  (5 bits) |  (5 bits) |  (12 bits)|
//! +---------------------------+-----------+-----------+-----------+
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::shared::snowflake::MARKETPLACE_EPOCH;

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub i64);

        impl $name {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn as_i64(&self) -> i64 {
                self.0
            }

            /// Creation time embedded in the snowflake bits.
            pub fn created_at(&self) -> DateTime<Utc> {
                let millis = ((self.0 as u64) >> 22) + MARKETPLACE_EPOCH;
                Utc.timestamp_millis_opt(millis as i64)
                    .single()
                    .unwrap_or_else(Utc::now)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<i64>().map(Self)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                match RawId::deserialize(deserializer)? {
                    RawId::Number(n) => Ok(Self(n)),
                    RawId::Text(s) => s.parse().map_err(serde::de::Error::custom),
                }
            }
        }
    };
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(i64),
    Text(String),
}

snowflake_id!(
    /// Canonical principal identifier. The only user id representation the
    /// chat core accepts.
    UserId
);

snowflake_id!(
    /// Conversation (room) identifier.
    ConversationId
);

snowflake_id!(
    /// Server-assigned message identifier.
    MessageId
);
