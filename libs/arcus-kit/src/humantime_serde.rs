//! Serde support for `Duration` fields written as human-readable strings (`500ms`, `20s`).
//!
//! ```
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct Policy {
//!     #[serde(with = "arcus_kit::humantime_serde")]
//!     backoff: Duration,
//! }
//! ```

use serde::{Deserialize, Deserializer, Serializer, de};
use std::time::Duration;

/// # Errors
/// Fails when the value is not a string `humantime` can parse.
pub fn deserialize<'de, D>(d: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(d)?;
    humantime::parse_duration(&raw).map_err(de::Error::custom)
}

/// # Errors
/// Propagates serializer errors.
pub fn serialize<S>(d: &Duration, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.collect_str(&humantime::format_duration(*d))
}

/// Same as the parent module for `Option<Duration>`.
pub mod option {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use std::time::Duration;

    /// # Errors
    /// Fails when the value is present but not a parseable duration.
    pub fn deserialize<'de, D>(d: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(d)?
            .map(|raw| humantime::parse_duration(&raw).map_err(de::Error::custom))
            .transpose()
    }

    /// # Errors
    /// Propagates serializer errors.
    #[allow(clippy::ref_option)]
    pub fn serialize<S>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match d {
            Some(d) => s.collect_str(&humantime::format_duration(*d)),
            None => s.serialize_none(),
        }
    }
}
