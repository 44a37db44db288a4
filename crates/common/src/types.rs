use std::{
    fmt,
    time::{
        Duration,
        SystemTime,
    },
};

use serde::{
    Deserialize,
    Serialize,
};

/// A point on a single log's time axis, in nanoseconds since the Unix epoch.
///
/// Timestamps are allocated by the log, which seeds them from the wall clock
/// and bumps with `succ()` whenever the clock repeats or regresses, so within
/// one log they are strictly increasing. They are persisted as plain JSON
/// integers: float seconds cannot round-trip adjacent values.
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const MAX: Timestamp = Timestamp(u64::MAX);
    pub const MIN: Timestamp = Timestamp(0);

    /// Current wall clock reading. Monotonicity is the log's responsibility,
    /// not the clock's.
    pub fn wall_clock() -> Self {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self(nanos)
    }

    pub const fn must(ts: u64) -> Self {
        Self(ts)
    }

    pub fn succ(&self) -> anyhow::Result<Self> {
        let result = self
            .0
            .checked_add(1)
            .ok_or_else(|| anyhow::anyhow!("timestamp {} at maximum", self.0))?;
        Ok(Self(result))
    }

    pub fn pred(&self) -> anyhow::Result<Self> {
        let result = self
            .0
            .checked_sub(1)
            .ok_or_else(|| anyhow::anyhow!("timestamp {} at minimum", self.0))?;
        Ok(Self(result))
    }

    pub fn add(&self, duration: Duration) -> anyhow::Result<Self> {
        let nanos = u64::try_from(duration.as_nanos())?;
        let result = self
            .0
            .checked_add(nanos)
            .ok_or_else(|| anyhow::anyhow!("timestamp {} + {:?} overflows", self.0, duration))?;
        Ok(Self(result))
    }

    pub fn sub(&self, duration: Duration) -> anyhow::Result<Self> {
        let nanos = u64::try_from(duration.as_nanos())?;
        let result = self
            .0
            .checked_sub(nanos)
            .ok_or_else(|| anyhow::anyhow!("timestamp {} - {:?} underflows", self.0, duration))?;
        Ok(Self(result))
    }

    /// Seconds since the epoch, for human-facing output only.
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1e9
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> u64 {
        ts.0
    }
}

impl From<u64> for Timestamp {
    fn from(ts: u64) -> Timestamp {
        Timestamp(ts)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
