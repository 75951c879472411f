//! Identifier and time types shared by every entity.
//!
//! Time types are re-exported here so users don't need to add `chrono` to their `Cargo.toml`.

use std::fmt;
use std::str::FromStr;

/// Date and time types for message timestamps and member join dates.
pub use chrono::{DateTime, TimeZone, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 64-bit entity identifier.
///
/// Structure:
/// - Bits 63-22: milliseconds since [`Snowflake::EPOCH`]
/// - Bits 21-17: internal worker ID
/// - Bits 16-12: internal process ID
/// - Bits 11-0:  per-process increment
///
/// Serialized as a decimal string; deserialized from either a string or a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Snowflake(u64);

impl Snowflake {
    /// Platform epoch, 2015-01-01T00:00:00Z, in Unix milliseconds
    pub const EPOCH: u64 = 1_420_070_400_000;

    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Unix timestamp in milliseconds at which this identifier was minted.
    #[must_use]
    pub const fn timestamp_millis(self) -> u64 {
        (self.0 >> 22) + Self::EPOCH
    }

    /// Creation time encoded in the identifier.
    #[must_use]
    pub fn created_at(self) -> Option<DateTime<Utc>> {
        let millis = i64::try_from(self.timestamp_millis()).ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Snowflake {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<Snowflake> for u64 {
    fn from(id: Snowflake) -> Self {
        id.0
    }
}

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self)
    }
}

impl Serialize for Snowflake {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SnowflakeVisitor;

        impl Visitor<'_> for SnowflakeVisitor {
            type Value = Snowflake;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("snowflake as string or integer")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Snowflake(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u64::try_from(v)
                    .map(Snowflake)
                    .map_err(|_e| E::custom(format!("negative snowflake: {v}")))
            }
        }

        deserializer.deserialize_any(SnowflakeVisitor)
    }
}
