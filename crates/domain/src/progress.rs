//! Course progress percentage.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// A progress percentage guaranteed to lie within 0..=100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct Progress(u8);

impl Progress {
    /// Upper bound of a progress percentage.
    pub const MAX: u8 = 100;

    /// Validates a raw percentage.
    pub fn new(percentage: i64) -> Result<Self, DomainError> {
        if !(0..=i64::from(Self::MAX)).contains(&percentage) {
            return Err(DomainError::ProgressOutOfRange(percentage));
        }
        Ok(Self(percentage as u8))
    }

    /// Returns the percentage value.
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl<'de> Deserialize<'de> for Progress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Progress::new(raw).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.0)
    }
}
