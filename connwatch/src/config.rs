use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for a [`crate::Monitor`].
///
/// Durations are written as (fractional) seconds when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Consecutive events of the same kind received within this window of
    /// each other collapse into one transition. `None` collapses them always.
    #[serde(with = "secs::option")]
    pub dedup_window: Option<Duration>,

    /// How far back a newly registered waiter looks for a transition it has
    /// not been handed yet. This only covers the race between triggering a
    /// change and calling `wait_*`; anything older is stale state and never
    /// satisfies a plain wait. Anchor on a [`crate::monitor::Checkpoint`] to
    /// look further back.
    #[serde(with = "secs")]
    pub lookback: Duration,

    /// Upper bound on the recent-transitions log.
    pub recent_capacity: usize,

    pub reconnect: BackoffPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            dedup_window: Some(Duration::from_secs(10)),
            lookback: Duration::from_secs(2),
            recent_capacity: 64,
            reconnect: BackoffPolicy::default(),
        }
    }
}

/// Exponential backoff used to re-subscribe after the event feed fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    #[serde(with = "secs")]
    pub initial: Duration,
    #[serde(with = "secs")]
    pub max: Duration,
    pub multiplier: u32,
    /// Failed attempts tolerated before waiters are told the feed is gone.
    pub attempts_before_unavailable: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(5),
            multiplier: 2,
            attempts_before_unavailable: 3,
        }
    }
}

impl BackoffPolicy {
    /// Delay before re-subscription attempt number `attempt` (zero based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(attempt);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => s.serialize_some(&d.as_secs_f64()),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            Option::<f64>::deserialize(d)?
                .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
