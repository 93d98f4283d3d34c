//! Offset buckets and the wall-clock math behind report ticks.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    time::Duration,
};

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use tokio::sync::RwLock;

use crate::domain::UtcOffset;

#[derive(Default)]
struct Inner {
    by_offset: BTreeMap<UtcOffset, BTreeSet<String>>,
    by_user: HashMap<String, UtcOffset>,
}

/// Users grouped by UTC offset.
///
/// Ticks read concurrently; registration takes the write lock.
#[derive(Default)]
pub struct TimezoneTable {
    inner: RwLock<Inner>,
}

impl TimezoneTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put `username` in the bucket for `offset`, leaving any previous bucket.
    pub async fn add(&self, username: &str, offset: UtcOffset) {
        let mut inner = self.inner.write().await;
        if let Some(prev) = inner.by_user.insert(username.to_string(), offset) {
            if prev == offset {
                return;
            }
            if let Some(users) = inner.by_offset.get_mut(&prev) {
                users.remove(username);
                if users.is_empty() {
                    inner.by_offset.remove(&prev);
                }
            }
        }
        inner
            .by_offset
            .entry(offset)
            .or_default()
            .insert(username.to_string());
    }

    /// Offset groups whose local day starts within `[at, at + interval)`.
    pub async fn day_rollovers(
        &self,
        at: DateTime<Utc>,
        interval: Duration,
    ) -> Vec<(UtcOffset, Vec<String>)> {
        self.select(|offset| is_day_rollover(offset, at, interval))
            .await
    }

    /// Offset groups whose local month starts within `[at, at + interval)`.
    pub async fn month_rollovers(
        &self,
        at: DateTime<Utc>,
        interval: Duration,
    ) -> Vec<(UtcOffset, Vec<String>)> {
        self.select(|offset| is_month_rollover(offset, at, interval))
            .await
    }

    async fn select(&self, pred: impl Fn(UtcOffset) -> bool) -> Vec<(UtcOffset, Vec<String>)> {
        let inner = self.inner.read().await;
        inner
            .by_offset
            .iter()
            .filter(|(offset, _)| pred(**offset))
            .map(|(offset, users)| (*offset, users.iter().cloned().collect()))
            .collect()
    }
}

/// Whether local midnight at `offset` falls in the tick window starting at `at`.
///
/// With 30-minute ticks on :00/:30 this is exactly "local time is 00:00" for whole
/// and half-hour offsets, and still fires once a day for 45-minute offsets.
pub fn is_day_rollover(offset: UtcOffset, at: DateTime<Utc>, interval: Duration) -> bool {
    let local = offset.local_time(at);
    u64::from(local.num_seconds_from_midnight()) < interval.as_secs()
}

pub fn is_month_rollover(offset: UtcOffset, at: DateTime<Utc>, interval: Duration) -> bool {
    is_day_rollover(offset, at, interval) && offset.local_time(at).day() == 1
}

/// The local calendar day that just ended for a rollover at `at`.
pub fn ended_local_day(offset: UtcOffset, at: DateTime<Utc>) -> NaiveDate {
    let today = offset.local_time(at).date();
    today.pred_opt().unwrap_or(today)
}

/// First tick boundary strictly after `now`.
///
/// Boundaries are multiples of `interval` since the Unix epoch, which land on
/// :00/:30 for the default interval since the interval divides a day.
pub fn next_boundary(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = interval.as_secs().max(1) as i64;
    let next = (now.timestamp().div_euclid(step) + 1) * step;
    DateTime::from_timestamp(next, 0).unwrap_or(now)
}

/// Boundary for the tick after `last`.
///
/// A sleep that wakes a little early would otherwise land on `last` again and
/// fire the same rollover twice.
pub fn next_tick(
    now: DateTime<Utc>,
    last: Option<DateTime<Utc>>,
    interval: Duration,
) -> DateTime<Utc> {
    let from = match last {
        Some(last) if last > now => last,
        _ => now,
    };
    next_boundary(from, interval)
}
