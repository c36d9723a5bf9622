// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Millisecond time spans used for every timeout and interval of the engine.
#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]

mod error;
pub use error::TimeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Time structure used everywhere in configuration.
/// Milliseconds, either as a span or since 01/01/1970.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EngineTime(u64);

impl fmt::Display for EngineTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.to_millis())
    }
}

impl TryFrom<Duration> for EngineTime {
    type Error = TimeError;

    /// Conversion from `std::time::Duration`.
    /// ```
    /// # use std::time::Duration;
    /// # use engine_time::*;
    /// let duration: Duration = Duration::from_millis(42);
    /// let time : EngineTime = EngineTime::from_millis(42);
    /// assert_eq!(time, EngineTime::try_from(duration).unwrap());
    /// ```
    fn try_from(value: Duration) -> Result<Self, Self::Error> {
        Ok(EngineTime(
            value
                .as_millis()
                .try_into()
                .map_err(|_| TimeError::ConversionError)?,
        ))
    }
}

impl From<EngineTime> for Duration {
    fn from(value: EngineTime) -> Self {
        value.to_duration()
    }
}

impl FromStr for EngineTime {
    type Err = TimeError;

    /// Conversion from `&str`, either plain milliseconds or with a `ms`/`s` suffix.
    ///
    /// ```
    /// # use engine_time::*;
    /// # use std::str::FromStr;
    /// assert_eq!(EngineTime::from_millis(42), EngineTime::from_str("42").unwrap());
    /// assert_eq!(EngineTime::from_millis(42), EngineTime::from_str("42ms").unwrap());
    /// assert_eq!(EngineTime::from_millis(3000), EngineTime::from_str("3s").unwrap());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (digits, factor) = if let Some(ms) = s.strip_suffix("ms") {
            (ms, 1)
        } else if let Some(secs) = s.strip_suffix('s') {
            (secs, 1000)
        } else {
            (s, 1)
        };
        u64::from_str(digits.trim())
            .map_err(|_| TimeError::ConversionError)?
            .checked_mul(factor)
            .map(EngineTime)
            .ok_or(TimeError::TimeOverflowError)
    }
}

impl EngineTime {
    /// Zero length span
    pub const ZERO: EngineTime = EngineTime(0);

    /// Conversion from `u64`, representing milliseconds.
    pub const fn from_millis(value: u64) -> Self {
        EngineTime(value)
    }

    /// Conversion from `u64`, representing seconds.
    pub const fn from_secs(value: u64) -> Self {
        EngineTime(value.saturating_mul(1000))
    }

    /// Gets current UNIX timestamp (resolution: milliseconds).
    pub fn now() -> Result<Self, TimeError> {
        let now: u64 = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| TimeError::TimeOverflowError)?
            .as_millis()
            .try_into()
            .map_err(|_| TimeError::TimeOverflowError)?;
        Ok(EngineTime(now))
    }

    /// Conversion to `std::time::Duration`.
    /// ```
    /// # use std::time::Duration;
    /// # use engine_time::*;
    /// let time : EngineTime = EngineTime::from_millis(42);
    /// assert_eq!(time.to_duration(), Duration::from_millis(42));
    /// ```
    pub fn to_duration(&self) -> Duration {
        Duration::from_millis(self.0)
    }

    /// Conversion to `u64`, representing milliseconds.
    pub const fn to_millis(&self) -> u64 {
        self.0
    }

    /// Instant at which a span started now will elapse.
    /// Saturates instead of overflowing the monotonic clock.
    pub fn deadline_from(&self, start: Instant) -> Instant {
        start
            .checked_add(self.to_duration())
            .unwrap_or_else(|| start + Duration::from_secs(86_400 * 365))
    }

    /// ```
    /// # use engine_time::*;
    /// let res = EngineTime::from_millis(42).saturating_sub(EngineTime::from_millis(50));
    /// assert_eq!(res, EngineTime::ZERO)
    /// ```
    #[must_use]
    pub fn saturating_sub(self, t: EngineTime) -> Self {
        EngineTime(self.0.saturating_sub(t.0))
    }

    /// ```
    /// # use engine_time::*;
    /// let res = EngineTime::from_millis(42).saturating_add(EngineTime::from_millis(7));
    /// assert_eq!(res, EngineTime::from_millis(49))
    /// ```
    #[must_use]
    pub fn saturating_add(self, t: EngineTime) -> Self {
        EngineTime(self.0.saturating_add(t.0))
    }

    /// Multiplication that saturates at `u64::MAX` milliseconds.
    #[must_use]
    pub const fn saturating_mul(self, n: u64) -> EngineTime {
        EngineTime(self.0.saturating_mul(n))
    }

    /// ```
    /// # use engine_time::*;
    /// assert!(EngineTime::from_millis(7).checked_sub(EngineTime::from_millis(42)).is_err());
    /// ```
    pub fn checked_sub(self, t: EngineTime) -> Result<Self, TimeError> {
        self.0
            .checked_sub(t.0)
            .ok_or_else(|| TimeError::CheckedOperationError("subtraction error".to_string()))
            .map(EngineTime)
    }

    /// Addition that reports overflow.
    pub fn checked_add(self, t: EngineTime) -> Result<Self, TimeError> {
        self.0
            .checked_add(t.0)
            .ok_or_else(|| TimeError::CheckedOperationError("addition error".to_string()))
            .map(EngineTime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_from_plain_millis() {
        let time: EngineTime = serde_json::from_str("1500").unwrap();
        assert_eq!(time, EngineTime::from_millis(1500));
        assert_eq!(time.to_duration(), Duration::from_millis(1500));
    }

    #[test]
    fn test_deadline_from_never_overflows() {
        let start = Instant::now();
        let deadline = EngineTime::from_millis(u64::MAX).deadline_from(start);
        assert!(deadline > start);
        assert_eq!(
            EngineTime::from_millis(10).deadline_from(start),
            start + Duration::from_millis(10)
        );
    }

    #[test]
    fn test_from_str_rejects_garbage() {
        assert!(EngineTime::from_str("abc").is_err());
        assert!(EngineTime::from_str("").is_err());
        assert_eq!(EngineTime::from_secs(2), EngineTime::from_str("2s").unwrap());
    }
}
