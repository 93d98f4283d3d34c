//! Hierarchical expense totals per user per time bucket.

mod store;
mod tree;

pub use store::{AggregateStore, Leaves, MemoryAggregateStore};
pub use tree::CategoryTree;

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use tracing::warn;

use crate::{domain::UtcOffset, settings::with_timeout, Result};

/// Aggregation window.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BucketKey {
    /// Rolling day; reset when the user's local day rolls over.
    Daily,
    /// A calendar month in the user's local time.
    Month { year: i32, month: u32 },
}

impl BucketKey {
    pub fn month_of(date: NaiveDate) -> Self {
        Self::Month {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketKey::Daily => f.write_str("daily"),
            BucketKey::Month { year, month } => write!(f, "{year:04}-{month:02}"),
        }
    }
}

/// One expense, folded into buckets immediately and never stored on its own.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub username: String,
    pub category: String,
    pub amount: f64,
    pub at: DateTime<Utc>,
    /// The user's offset at the time of the entry; picks the local month bucket.
    pub offset: UtcOffset,
}

impl Entry {
    pub fn month_bucket(&self) -> BucketKey {
        BucketKey::month_of(self.offset.local_time(self.at).date())
    }
}

/// Materialize every ancestor of the given leaf paths with amount 0.
pub fn zero_fill(leaves: Leaves) -> HashMap<String, f64> {
    CategoryTree::from_leaves(leaves).flatten()
}

/// Aggregation service in front of an [`AggregateStore`].
///
/// Every store call runs under the configured deadline.
#[derive(Clone)]
pub struct Aggregator {
    store: Arc<dyn AggregateStore>,
    timeout: Duration,
}

impl Aggregator {
    pub fn new(store: Arc<dyn AggregateStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Fold an entry into the rolling daily bucket and its local month bucket.
    ///
    /// Daily goes first. If the month write then fails the daily increment is
    /// reverted, so a failed record leaves neither bucket changed.
    pub async fn record(&self, entry: &Entry) -> Result<()> {
        with_timeout(
            "increment daily",
            self.timeout,
            self.store.increment(&BucketKey::Daily, entry),
        )
        .await?;

        let month = entry.month_bucket();
        let Err(e) =
            with_timeout("increment month", self.timeout, self.store.increment(&month, entry)).await
        else {
            return Ok(());
        };
        let undo = Entry {
            amount: -entry.amount,
            ..entry.clone()
        };
        if let Err(undo_err) = with_timeout(
            "revert daily",
            self.timeout,
            self.store.increment(&BucketKey::Daily, &undo),
        )
        .await
        {
            warn!(username = %entry.username, "daily total left ahead of month: {undo_err}");
        }
        Err(e)
    }

    pub async fn read(&self, username: &str, bucket: &BucketKey) -> Result<HashMap<String, f64>> {
        let leaves = with_timeout("read", self.timeout, self.store.read(username, bucket)).await?;
        Ok(zero_fill(leaves))
    }

    pub async fn read_many(
        &self,
        usernames: &[String],
        bucket: &BucketKey,
    ) -> Result<HashMap<String, HashMap<String, f64>>> {
        let per_user = with_timeout(
            "read many",
            self.timeout,
            self.store.read_many(usernames, bucket),
        )
        .await?;
        Ok(per_user
            .into_iter()
            .map(|(user, leaves)| (user, zero_fill(leaves)))
            .collect())
    }

    pub async fn clear(&self, usernames: &[String], bucket: &BucketKey) -> Result<()> {
        with_timeout(
            "delete many",
            self.timeout,
            self.store.delete_many(usernames, bucket),
        )
        .await
    }

    pub async fn purge_stale_daily(&self, older_than: DateTime<Utc>) -> Result<usize> {
        with_timeout(
            "purge stale",
            self.timeout,
            self.store.purge_stale(&BucketKey::Daily, older_than),
        )
        .await
    }
}
