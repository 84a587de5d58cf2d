//! Rotation schedule types.
//!
//! The settings record maps each token to the time of day its key rotates.
//! Times are written `HHhMM` with a literal `H`, e.g. `17H30`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::Timelike;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::Document;

/// Separator between hour and minute.
pub const TIME_DELIMITER: char = 'H';

/// Time assigned to newly created tokens when nothing else is configured.
pub const DEFAULT_ROTATION_TIME: RotationTime = RotationTime {
    hour: 17,
    minute: 30,
};

/// A minute-granularity time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RotationTime {
    hour: u8,
    minute: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid rotation time {0:?}, expected a time like 17H30")]
pub struct InvalidRotationTime(pub String);

impl RotationTime {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    /// Current local wall-clock time, truncated to the minute.
    pub fn now_local() -> Self {
        let now = chrono::Local::now();
        // chrono guarantees hour < 24 and minute < 60
        Self {
            hour: now.hour() as u8,
            minute: now.minute() as u8,
        }
    }
}

impl fmt::Display for RotationTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}{}{:02}", self.hour, TIME_DELIMITER, self.minute)
    }
}

impl FromStr for RotationTime {
    type Err = InvalidRotationTime;

    /// Accepts exactly two zero-padded digits on each side of the delimiter.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidRotationTime(s.to_string());

        let (hour, minute) = s.split_once(TIME_DELIMITER).ok_or_else(invalid)?;
        let two_digits = |part: &str| part.len() == 2 && part.bytes().all(|b| b.is_ascii_digit());
        if !two_digits(hour) || !two_digits(minute) {
            return Err(invalid());
        }

        let hour = hour.parse().map_err(|_| invalid())?;
        let minute = minute.parse().map_err(|_| invalid())?;
        RotationTime::new(hour, minute).ok_or_else(invalid)
    }
}

impl TryFrom<String> for RotationTime {
    type Error = InvalidRotationTime;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RotationTime> for String {
    fn from(time: RotationTime) -> Self {
        time.to_string()
    }
}

/// Token to rotation time mapping held in the settings record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RotationSchedule(BTreeMap<String, RotationTime>);

impl RotationSchedule {
    /// Read the schedule from the stored settings document.
    ///
    /// Entries whose value is not a well-formed time can never match a
    /// formatted clock reading, so they are skipped.
    pub fn from_document(doc: &Document) -> Self {
        let entries = doc
            .iter()
            .filter_map(|(token, value)| match value {
                Value::String(raw) => match raw.parse() {
                    Ok(time) => Some((token.clone(), time)),
                    Err(err) => {
                        tracing::warn!("Skipping schedule entry for {}: {}", token, err);
                        None
                    }
                },
                _ => None,
            })
            .collect();
        Self(entries)
    }

    pub fn get(&self, token: &str) -> Option<RotationTime> {
        self.0.get(token).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tokens scheduled exactly at `time`.
    pub fn due_at(&self, time: RotationTime) -> BTreeSet<String> {
        self.0
            .iter()
            .filter(|(_, scheduled)| **scheduled == time)
            .map(|(token, _)| token.clone())
            .collect()
    }
}
