//! ISO-8601 timestamps stamped on settlement receipts.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A UTC instant with millisecond precision.
///
/// Serialized as an RFC 3339 string with exactly three fractional digits and a `Z` suffix,
/// e.g. `"2025-01-31T12:00:00.123Z"`. Sub-millisecond precision is dropped at construction
/// so a value survives a serialize/deserialize cycle unchanged.
///
/// ```
/// use paygate_types::timestamp::IsoTimestamp;
///
/// let ts: IsoTimestamp = "2025-01-31T12:00:00.123Z".parse().unwrap();
/// assert_eq!(ts.to_string(), "2025-01-31T12:00:00.123Z");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct IsoTimestamp(DateTime<Utc>);

impl IsoTimestamp {
    /// Current wall-clock time, truncated to milliseconds.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(datetime: DateTime<Utc>) -> Self {
        Self(datetime.trunc_subsecs(3))
    }

    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl Display for IsoTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

impl FromStr for IsoTimestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = DateTime::parse_from_rfc3339(s)?;
        Ok(Self::from_datetime(parsed.with_timezone(&Utc)))
    }
}

impl Serialize for IsoTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IsoTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse()
            .map_err(|e| serde::de::Error::custom(format!("invalid ISO-8601 timestamp: {e}")))
    }
}
