//! Fixed-width harvest timestamps
//!
//! The upstream action API and the checkpoint store both exchange timestamps as
//! `YYYYMMDDHHMMSS` strings. That format sorts lexicographically in time order,
//! which is what makes the persisted value usable as a watermark.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{HarvestError, Result};

/// `strftime` pattern of the watermark format
pub const WATERMARK_FORMAT: &str = "%Y%m%d%H%M%S";

const WATERMARK_DESCRIPTION: &str = "YYYYMMDDHHMMSS";

/// A point in time rendered as `YYYYMMDDHHMMSS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(NaiveDateTime);

impl Watermark {
    /// Parse a `YYYYMMDDHHMMSS` string
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let invalid = || HarvestError::InvalidTimestamp {
            value: value.to_string(),
            expected: WATERMARK_DESCRIPTION,
        };

        if trimmed.len() != 14 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        NaiveDateTime::parse_from_str(trimmed, WATERMARK_FORMAT)
            .map(Self)
            .map_err(|_| invalid())
    }

    /// Parse an upstream creation time (RFC 3339, with offset).
    ///
    /// The watermark keeps the wall-clock time of the offset the upstream reported,
    /// which is the zone its query parameters are interpreted in.
    pub fn from_rfc3339(value: &str) -> Result<Self> {
        DateTime::parse_from_rfc3339(value.trim())
            .map(|dt| Self(dt.naive_local()))
            .map_err(|_| HarvestError::InvalidTimestamp {
                value: value.to_string(),
                expected: "an RFC 3339 date-time",
            })
    }

    /// Wall-clock time of `dt` in its own zone
    pub fn from_datetime<Tz: TimeZone>(dt: &DateTime<Tz>) -> Self {
        Self(dt.naive_local())
    }

    pub fn from_naive(naive: NaiveDateTime) -> Self {
        Self(naive)
    }

    pub fn as_naive(&self) -> NaiveDateTime {
        self.0
    }

    /// Signed distance from `earlier` to `self`
    pub fn since(&self, earlier: &Watermark) -> Duration {
        self.0 - earlier.0
    }

    pub fn checked_sub(&self, span: Duration) -> Option<Self> {
        self.0.checked_sub_signed(span).map(Self)
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(WATERMARK_FORMAT))
    }
}

impl FromStr for Watermark {
    type Err = HarvestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Watermark {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Watermark {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
