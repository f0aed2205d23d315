// Copyright 2026 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! DRKey validity epochs.
//!
//! Every delegation secret is valid for exactly one epoch, a half-open interval
//! `[not_before, not_after)` of unix seconds. The key service is authoritative for epoch
//! boundaries; the [EpochCalculator] only produces the local estimate used to coordinate
//! concurrent fetches before the service has answered.

use std::{
    fmt::Display,
    time::{Duration, SystemTime},
};

use chrono::DateTime;

/// Default epoch duration of the key service.
pub const DEFAULT_EPOCH_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Validity window of a DRKey, `[not_before, not_after)` in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Epoch {
    not_before: i64,
    not_after: i64,
}

/// Error returned for an empty or inverted validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid epoch: not_before ({not_before}) must be before not_after ({not_after})")]
pub struct InvalidEpochError {
    /// Start of the rejected window.
    pub not_before: i64,
    /// End of the rejected window.
    pub not_after: i64,
}

impl Epoch {
    /// Creates a new epoch. Fails unless `not_before < not_after`.
    pub fn new(not_before: i64, not_after: i64) -> Result<Self, InvalidEpochError> {
        if not_before >= not_after {
            return Err(InvalidEpochError {
                not_before,
                not_after,
            });
        }
        Ok(Epoch {
            not_before,
            not_after,
        })
    }

    /// Start of the window (inclusive), unix seconds.
    pub fn not_before(&self) -> i64 {
        self.not_before
    }

    /// End of the window (exclusive), unix seconds.
    pub fn not_after(&self) -> i64 {
        self.not_after
    }

    /// Returns true if `t` lies within the window.
    pub fn contains(&self, t: i64) -> bool {
        self.not_before <= t && t < self.not_after
    }

    /// Returns true if the window has ended at `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.not_after
    }

    /// Seconds of validity left at `now`, zero if expired.
    pub fn remaining(&self, now: i64) -> Duration {
        Duration::from_secs(self.not_after.saturating_sub(now).max(0) as u64)
    }
}

impl Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fmt_time = |secs: i64| {
            match DateTime::from_timestamp(secs, 0) {
                Some(time) => time.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                None => secs.to_string(),
            }
        };
        write!(
            f,
            "[{}, {})",
            fmt_time(self.not_before),
            fmt_time(self.not_after)
        )
    }
}

/// Error returned for timestamps whose epoch bounds are not representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid timestamp {0}: epoch bounds are out of range")]
pub struct InvalidTimestampError(pub i64);

/// Maps timestamps to the epoch they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochCalculator {
    duration_secs: i64,
}

impl EpochCalculator {
    /// Creates a calculator for the given epoch duration.
    ///
    /// The duration must be at least one second; sub-second parts are ignored.
    pub fn new(duration: Duration) -> Result<Self, &'static str> {
        let duration_secs = i64::try_from(duration.as_secs())
            .map_err(|_| "epoch duration does not fit into i64 seconds")?;
        if duration_secs < 1 {
            return Err("epoch duration must be at least one second");
        }
        Ok(Self { duration_secs })
    }

    /// Returns the epoch duration.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs as u64)
    }

    /// Returns the epoch containing `t`.
    pub fn epoch(&self, t: i64) -> Result<Epoch, InvalidTimestampError> {
        let not_before = t
            .div_euclid(self.duration_secs)
            .checked_mul(self.duration_secs)
            .ok_or(InvalidTimestampError(t))?;
        let not_after = not_before
            .checked_add(self.duration_secs)
            .ok_or(InvalidTimestampError(t))?;

        Ok(Epoch {
            not_before,
            not_after,
        })
    }
}

impl Default for EpochCalculator {
    fn default() -> Self {
        Self {
            duration_secs: DEFAULT_EPOCH_DURATION.as_secs() as i64,
        }
    }
}

/// Converts a [SystemTime] to unix seconds, negative before the epoch.
pub fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(since) => i64::try_from(since.as_secs()).unwrap_or(i64::MAX),
        Err(before) => {
            let before = before.duration();
            // Round towards negative infinity.
            let secs = i64::try_from(before.as_secs()).unwrap_or(i64::MAX);
            if before.subsec_nanos() > 0 {
                -secs - 1
            } else {
                -secs
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn should_bucket_timestamps() {
        let calc = EpochCalculator::new(HOUR).unwrap();
        assert_eq!(calc.duration(), HOUR);

        let epoch = calc.epoch(7200).unwrap();
        assert_eq!((epoch.not_before(), epoch.not_after()), (7200, 10800));

        let epoch = calc.epoch(10799).unwrap();
        assert_eq!((epoch.not_before(), epoch.not_after()), (7200, 10800));
        assert!(epoch.contains(10799));
        assert!(!epoch.contains(10800));
    }

    #[test]
    fn should_floor_negative_timestamps() {
        let calc = EpochCalculator::new(HOUR).unwrap();
        let epoch = calc.epoch(-1).unwrap();
        assert_eq!((epoch.not_before(), epoch.not_after()), (-3600, 0));
        assert!(epoch.contains(-1));
    }

    #[test]
    fn should_reject_unrepresentable_timestamps() {
        let calc = EpochCalculator::default();
        assert_eq!(calc.epoch(i64::MAX), Err(InvalidTimestampError(i64::MAX)));
        assert_eq!(calc.epoch(i64::MIN), Err(InvalidTimestampError(i64::MIN)));

        // Unit epochs cover the whole domain except the last second.
        let calc = EpochCalculator::new(Duration::from_secs(1)).unwrap();
        assert!(calc.epoch(i64::MIN).is_ok());
        assert!(calc.epoch(i64::MAX).is_err());
    }

    #[test]
    fn should_reject_zero_duration() {
        assert!(EpochCalculator::new(Duration::from_millis(500)).is_err());
        assert!(EpochCalculator::new(Duration::from_secs(u64::MAX)).is_err());
    }

    #[test]
    fn should_validate_epoch_bounds() {
        assert!(Epoch::new(10, 10).is_err());
        assert!(Epoch::new(11, 10).is_err());

        let epoch = Epoch::new(10, 20).unwrap();
        assert!(!epoch.is_expired(19));
        assert!(epoch.is_expired(20));
        assert_eq!(epoch.remaining(15), Duration::from_secs(5));
        assert_eq!(epoch.remaining(25), Duration::ZERO);
    }

    #[test]
    fn should_display_epoch_in_utc() {
        let epoch = Epoch::new(0, 86400).unwrap();
        assert_eq!(
            epoch.to_string(),
            "[1970-01-01T00:00:00Z, 1970-01-02T00:00:00Z)"
        );
    }

    #[test]
    fn should_convert_system_time() {
        assert_eq!(unix_seconds(SystemTime::UNIX_EPOCH), 0);
        assert_eq!(
            unix_seconds(SystemTime::UNIX_EPOCH + Duration::from_millis(1500)),
            1
        );
        assert_eq!(
            unix_seconds(SystemTime::UNIX_EPOCH - Duration::from_millis(1500)),
            -2
        );
    }
}
