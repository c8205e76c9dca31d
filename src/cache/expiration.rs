//! Expiration Module
//!
//! Turns a caller-supplied expiration (duration, moment, or predicate) into
//! the staleness record stored alongside a cache key.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::{CacheError, Result};

/// Predicate deciding whether the current entry must be evicted, given the
/// candidate value about to be written and the currently stored value.
pub type StalenessFn<V> = dyn Fn(&V, &V) -> bool + Send + Sync;

// == Expiration ==
/// When a cached entry should be considered stale.
pub enum Expiration<V> {
    /// Stale once this much time has passed since the expiration was supplied.
    /// Zero or negative durations are stale immediately.
    After(TimeDelta),
    /// Stale once the current time is past this moment.
    At(DateTime<Utc>),
    /// Stale whenever the predicate returns true for `(new, current)`.
    When(Arc<StalenessFn<V>>),
}

impl<V> Expiration<V> {
    /// Expires after a signed duration.
    pub fn after(duration: TimeDelta) -> Self {
        Self::After(duration)
    }

    /// Expires after `ms` milliseconds. Negative values are already expired.
    pub fn after_millis(ms: i64) -> Self {
        Self::After(TimeDelta::milliseconds(ms))
    }

    /// Expires at an absolute moment.
    pub fn at(moment: DateTime<Utc>) -> Self {
        Self::At(moment)
    }

    /// Expires whenever `predicate(new, current)` holds.
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(&V, &V) -> bool + Send + Sync + 'static,
    {
        Self::When(Arc::new(predicate))
    }

    // == Normalize ==
    /// Resolves the expiration into a staleness record.
    ///
    /// Durations are anchored to the current time here, once; later checks
    /// compare against the resulting deadline.
    pub fn normalize(self) -> Staleness<V> {
        self.normalize_at(Utc::now())
    }

    pub(crate) fn normalize_at(self, now: DateTime<Utc>) -> Staleness<V> {
        match self {
            Self::After(duration) => Staleness::Deadline(
                now.checked_add_signed(duration).unwrap_or(if duration < TimeDelta::zero() {
                    DateTime::<Utc>::MIN_UTC
                } else {
                    DateTime::<Utc>::MAX_UTC
                }),
            ),
            Self::At(moment) => Staleness::Deadline(moment),
            Self::When(predicate) => Staleness::Predicate(predicate),
        }
    }
}

impl<V> Clone for Expiration<V> {
    fn clone(&self) -> Self {
        match self {
            Self::After(duration) => Self::After(*duration),
            Self::At(moment) => Self::At(*moment),
            Self::When(predicate) => Self::When(Arc::clone(predicate)),
        }
    }
}

impl<V> fmt::Debug for Expiration<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::After(duration) => f.debug_tuple("After").field(duration).finish(),
            Self::At(moment) => f.debug_tuple("At").field(moment).finish(),
            Self::When(_) => f.write_str("When(<predicate>)"),
        }
    }
}

impl<V> From<TimeDelta> for Expiration<V> {
    fn from(duration: TimeDelta) -> Self {
        Self::After(duration)
    }
}

impl<V> From<DateTime<Utc>> for Expiration<V> {
    fn from(moment: DateTime<Utc>) -> Self {
        Self::At(moment)
    }
}

impl<V> TryFrom<std::time::Duration> for Expiration<V> {
    type Error = CacheError;

    fn try_from(duration: std::time::Duration) -> Result<Self> {
        TimeDelta::from_std(duration)
            .map(Self::After)
            .map_err(|_| CacheError::InvalidExpiration(format!("{:?} is out of range", duration)))
    }
}

// == Staleness ==
/// Normalized staleness record kept in the metadata store.
pub enum Staleness<V> {
    /// Stale once the current time is strictly past the deadline.
    Deadline(DateTime<Utc>),
    /// Stale whenever the predicate holds for `(new, current)`.
    Predicate(Arc<StalenessFn<V>>),
}

impl<V> Staleness<V> {
    // == Is Stale ==
    /// Checks the record against the candidate and current values.
    ///
    /// `candidate` is `None` when the new value has not been produced yet; a
    /// predicate that needs it treats the entry as fresh in that case, so
    /// callers force the candidate first whenever [`observes_candidate`]
    /// returns true.
    ///
    /// [`observes_candidate`]: Staleness::observes_candidate
    pub fn is_stale(&self, candidate: Option<&V>, current: &V) -> bool {
        match self {
            Self::Deadline(deadline) => Utc::now() > *deadline,
            Self::Predicate(predicate) => candidate.is_some_and(|new| predicate(new, current)),
        }
    }

    /// Returns true if evaluating the record requires the candidate value.
    pub fn observes_candidate(&self) -> bool {
        matches!(self, Self::Predicate(_))
    }

    /// Returns the deadline for time-based records.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Deadline(deadline) => Some(*deadline),
            Self::Predicate(_) => None,
        }
    }

    /// Remaining time before a deadline passes, zero once it has.
    pub fn remaining(&self) -> Option<TimeDelta> {
        self.deadline()
            .map(|deadline| (deadline - Utc::now()).max(TimeDelta::zero()))
    }
}

impl<V> Clone for Staleness<V> {
    fn clone(&self) -> Self {
        match self {
            Self::Deadline(deadline) => Self::Deadline(*deadline),
            Self::Predicate(predicate) => Self::Predicate(Arc::clone(predicate)),
        }
    }
}

impl<V> fmt::Debug for Staleness<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deadline(deadline) => f.debug_tuple("Deadline").field(deadline).finish(),
            Self::Predicate(_) => f.write_str("Predicate(<fn>)"),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_duration_becomes_deadline_once() {
        let now = Utc::now();
        let record = Expiration::<i32>::after_millis(50).normalize_at(now);

        assert_eq!(record.deadline(), Some(now + TimeDelta::milliseconds(50)));
        assert!(!record.observes_candidate());
    }

    #[test]
    fn test_duration_expiry() {
        let record = Expiration::<i32>::after_millis(20).normalize();
        assert!(!record.is_stale(None, &1));

        sleep(Duration::from_millis(30));
        assert!(record.is_stale(None, &1));
    }

    #[test]
    fn test_negative_duration_is_stale_immediately() {
        let record = Expiration::<i32>::after_millis(-10).normalize();
        assert!(record.is_stale(None, &1));
        assert_eq!(record.remaining(), Some(TimeDelta::zero()));
    }

    #[test]
    fn test_zero_duration_becomes_stale_after_any_delay() {
        let record = Expiration::<i32>::after(TimeDelta::zero()).normalize();
        sleep(Duration::from_millis(2));
        assert!(record.is_stale(None, &1));
    }

    #[test]
    fn test_absolute_moment() {
        let past = Expiration::<i32>::at(Utc::now() - TimeDelta::seconds(1)).normalize();
        let future = Expiration::<i32>::at(Utc::now() + TimeDelta::seconds(60)).normalize();

        assert!(past.is_stale(None, &0));
        assert!(!future.is_stale(None, &0));

        let remaining = future.remaining().unwrap();
        assert!(remaining <= TimeDelta::seconds(60));
        assert!(remaining >= TimeDelta::seconds(59));
    }

    #[test]
    fn test_deadline_boundary_is_exclusive() {
        let deadline = Utc::now() + TimeDelta::seconds(3600);
        let record = Expiration::<i32>::at(deadline).normalize();
        assert!(!record.is_stale(None, &0), "not stale before the deadline");
    }

    #[test]
    fn test_predicate_receives_new_then_current() {
        let record = Expiration::when(|new: &i32, current: &i32| *new > *current).normalize();

        assert!(record.observes_candidate());
        assert!(record.deadline().is_none());
        assert!(record.is_stale(Some(&5), &3));
        assert!(!record.is_stale(Some(&2), &3));
        assert!(!record.is_stale(None, &3), "unproduced candidate is never stale");
    }

    #[test]
    fn test_overflowing_duration_saturates() {
        let record = Expiration::<i32>::after(TimeDelta::MAX).normalize();
        assert_eq!(record.deadline(), Some(DateTime::<Utc>::MAX_UTC));
        assert!(!record.is_stale(None, &0));

        let record = Expiration::<i32>::after(TimeDelta::MIN).normalize();
        assert!(record.is_stale(None, &0));
    }

    #[test]
    fn test_conversions() {
        let from_delta: Expiration<i32> = TimeDelta::seconds(2).into();
        assert!(matches!(from_delta, Expiration::After(d) if d == TimeDelta::seconds(2)));

        let moment = Utc::now();
        let from_moment: Expiration<i32> = moment.into();
        assert!(matches!(from_moment, Expiration::At(m) if m == moment));

        let from_std = Expiration::<i32>::try_from(Duration::from_millis(1500)).unwrap();
        assert!(matches!(from_std, Expiration::After(d) if d == TimeDelta::milliseconds(1500)));

        let too_long = Expiration::<i32>::try_from(Duration::MAX);
        assert!(matches!(too_long, Err(CacheError::InvalidExpiration(_))));
    }

    #[test]
    fn test_debug_hides_predicate() {
        let expiration = Expiration::when(|_: &i32, _: &i32| true);
        assert_eq!(format!("{:?}", expiration), "When(<predicate>)");
        assert_eq!(format!("{:?}", expiration.normalize()), "Predicate(<fn>)");
    }
}
