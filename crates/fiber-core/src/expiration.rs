//! Priority / time model.
//!
//! An [`ExpirationTime`] is an opaque, totally ordered value. Larger values are
//! more urgent: [`ExpirationTime::SYNC`] must finish now and
//! [`ExpirationTime::NO_WORK`] means nothing is pending. Wall-clock times are
//! mapped into the same space by counting down from a fixed offset in units of
//! [`UNIT_SIZE_MS`], so a time computed later compares as lower priority than
//! one computed earlier with the same horizon.

use std::fmt;

use crate::config::ReconcilerConfig;

pub const UNIT_SIZE_MS: u64 = 10;

const MAX_SIGNED_31_BIT_INT: u32 = 1_073_741_823;
const MAGIC_NUMBER_OFFSET: u32 = MAX_SIGNED_31_BIT_INT - 2;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ExpirationTime(u32);

impl ExpirationTime {
    pub const NO_WORK: ExpirationTime = ExpirationTime(0);
    /// Offscreen work that is never required to finish.
    pub const NEVER: ExpirationTime = ExpirationTime(1);
    pub const IDLE: ExpirationTime = ExpirationTime(2);
    pub const SYNC: ExpirationTime = ExpirationTime(MAX_SIGNED_31_BIT_INT);
    /// Legacy-mode batched updates: synchronous, but flushed at the end of the batch.
    pub const BATCHED: ExpirationTime = ExpirationTime(MAX_SIGNED_31_BIT_INT - 1);

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_no_work(self) -> bool {
        self == Self::NO_WORK
    }

    /// `true` when work at `self` is at least as urgent as `other`.
    #[inline]
    pub fn is_same_or_higher_priority(self, other: ExpirationTime) -> bool {
        self >= other
    }

    /// The adjacent, slightly more urgent time. Saturates at `SYNC`.
    #[inline]
    pub fn bump_higher(self) -> ExpirationTime {
        if self >= Self::SYNC {
            Self::SYNC
        } else {
            Self(self.0 + 1)
        }
    }

    /// The adjacent, slightly less urgent time. Never produces `NO_WORK`.
    #[inline]
    pub fn nudge_later(self) -> ExpirationTime {
        if self.0 <= Self::NEVER.0 {
            Self::NEVER
        } else {
            Self(self.0 - 1)
        }
    }

    pub fn from_ms(ms: u64) -> ExpirationTime {
        let units = (ms / UNIT_SIZE_MS).min(MAGIC_NUMBER_OFFSET as u64 - 3) as u32;
        ExpirationTime(MAGIC_NUMBER_OFFSET - units)
    }

    /// Inverse of [`ExpirationTime::from_ms`] for times in the bucketed range.
    pub fn to_ms(self) -> u64 {
        (MAGIC_NUMBER_OFFSET.saturating_sub(self.0) as u64) * UNIT_SIZE_MS
    }

    pub fn max(self, other: ExpirationTime) -> ExpirationTime {
        std::cmp::max(self, other)
    }

    pub fn min(self, other: ExpirationTime) -> ExpirationTime {
        std::cmp::min(self, other)
    }
}

impl fmt::Debug for ExpirationTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NO_WORK => f.write_str("NoWork"),
            Self::NEVER => f.write_str("Never"),
            Self::IDLE => f.write_str("Idle"),
            Self::SYNC => f.write_str("Sync"),
            Self::BATCHED => f.write_str("Batched"),
            ExpirationTime(raw) => write!(f, "Expiration({raw})"),
        }
    }
}

impl fmt::Display for ExpirationTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Coarse scheduler priority, used when handing work to the host scheduler
/// and to pick an expiration horizon for new updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityLevel {
    Idle,
    Low,
    Normal,
    UserBlocking,
    Immediate,
}

impl Default for PriorityLevel {
    fn default() -> Self {
        PriorityLevel::Normal
    }
}

fn ceiling(num: u64, precision: u64) -> u64 {
    (num / precision + 1) * precision
}

fn compute_expiration_bucket(
    current_time: ExpirationTime,
    expiration_ms: u64,
    bucket_size_ms: u64,
) -> ExpirationTime {
    let offset = MAGIC_NUMBER_OFFSET as u64;
    let elapsed_units = offset - current_time.raw().min(MAGIC_NUMBER_OFFSET) as u64;
    let bucket = ceiling(
        elapsed_units + expiration_ms / UNIT_SIZE_MS,
        (bucket_size_ms / UNIT_SIZE_MS).max(1),
    );
    ExpirationTime(offset.saturating_sub(bucket).max(ExpirationTime::IDLE.0 as u64 + 1) as u32)
}

impl ReconcilerConfig {
    /// Expiration time for a user interaction observed at `current_time`.
    pub fn compute_for_interaction(&self, current_time: ExpirationTime) -> ExpirationTime {
        compute_expiration_bucket(
            current_time,
            self.interactive_expiration_ms,
            self.interactive_bucket_ms,
        )
    }

    /// Expiration time for ordinary asynchronous work observed at `current_time`.
    pub fn compute_for_async(&self, current_time: ExpirationTime) -> ExpirationTime {
        compute_expiration_bucket(current_time, self.async_expiration_ms, self.async_bucket_ms)
    }

    pub fn compute_for_suspense(
        &self,
        current_time: ExpirationTime,
        timeout_ms: u64,
    ) -> ExpirationTime {
        compute_expiration_bucket(current_time, timeout_ms, self.suspense_bucket_ms)
    }

    pub fn infer_priority(
        &self,
        current_time: ExpirationTime,
        expiration_time: ExpirationTime,
    ) -> PriorityLevel {
        if expiration_time == ExpirationTime::SYNC {
            return PriorityLevel::Immediate;
        }
        if expiration_time == ExpirationTime::NEVER || expiration_time == ExpirationTime::IDLE {
            return PriorityLevel::Idle;
        }
        let ms_until = expiration_time.to_ms() as i64 - current_time.to_ms() as i64;
        if ms_until <= 0 {
            return PriorityLevel::Immediate;
        }
        let ms_until = ms_until as u64;
        if ms_until <= self.interactive_expiration_ms + self.interactive_bucket_ms {
            return PriorityLevel::UserBlocking;
        }
        if ms_until <= self.async_expiration_ms + self.async_bucket_ms {
            return PriorityLevel::Normal;
        }
        PriorityLevel::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn distinguished_values_are_ordered() {
        assert!(ExpirationTime::SYNC > ExpirationTime::BATCHED);
        assert!(ExpirationTime::BATCHED > ExpirationTime::from_ms(0));
        assert!(ExpirationTime::from_ms(0) > ExpirationTime::IDLE);
        assert!(ExpirationTime::IDLE > ExpirationTime::NEVER);
        assert!(ExpirationTime::NEVER > ExpirationTime::NO_WORK);
    }

    #[test]
    fn ms_round_trip_is_unit_aligned() {
        let t = ExpirationTime::from_ms(1234);
        assert_eq!(t.to_ms(), 1230);
    }

    #[test]
    fn updates_within_one_bucket_coalesce() {
        let config = ReconcilerConfig::default();
        let a = config.compute_for_async(ExpirationTime::from_ms(1000));
        let b = config.compute_for_async(ExpirationTime::from_ms(1100));
        assert_eq!(a, b);
        let c = config.compute_for_async(ExpirationTime::from_ms(1300));
        assert!(c < a, "later bucket must be lower priority");
    }

    #[test]
    fn interaction_is_more_urgent_than_async() {
        let config = ReconcilerConfig::default();
        let now = ExpirationTime::from_ms(500);
        assert!(config.compute_for_interaction(now) > config.compute_for_async(now));
    }

    #[test]
    fn infer_priority_maps_horizons() {
        let config = ReconcilerConfig::default();
        let now = ExpirationTime::from_ms(0);
        assert_eq!(
            config.infer_priority(now, ExpirationTime::SYNC),
            PriorityLevel::Immediate
        );
        assert_eq!(
            config.infer_priority(now, config.compute_for_interaction(now)),
            PriorityLevel::UserBlocking
        );
        assert_eq!(
            config.infer_priority(now, config.compute_for_async(now)),
            PriorityLevel::Normal
        );
        assert_eq!(
            config.infer_priority(now, ExpirationTime::IDLE),
            PriorityLevel::Idle
        );
    }

    #[test]
    fn bump_and_nudge_saturate() {
        assert_eq!(ExpirationTime::SYNC.bump_higher(), ExpirationTime::SYNC);
        assert_eq!(ExpirationTime::NEVER.nudge_later(), ExpirationTime::NEVER);
        let t = ExpirationTime::from_ms(100);
        assert!(t.bump_higher() > t);
        assert!(t.nudge_later() < t);
    }

    proptest! {
        #[test]
        fn later_observations_never_outrank_earlier(a in 0u64..1_000_000, delta in 0u64..100_000) {
            let config = ReconcilerConfig::default();
            let earlier = config.compute_for_async(ExpirationTime::from_ms(a));
            let later = config.compute_for_async(ExpirationTime::from_ms(a + delta));
            prop_assert!(later <= earlier);
        }

        #[test]
        fn computed_times_stay_between_idle_and_batched(now in 0u64..10_000_000) {
            let config = ReconcilerConfig::default();
            let current = ExpirationTime::from_ms(now);
            for t in [config.compute_for_async(current), config.compute_for_interaction(current)] {
                prop_assert!(t > ExpirationTime::IDLE);
                prop_assert!(t < ExpirationTime::BATCHED);
            }
        }
    }
}
