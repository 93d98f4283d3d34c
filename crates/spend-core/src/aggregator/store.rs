use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    aggregator::{tree::CategoryTree, BucketKey, Entry},
    Result,
};

/// Leaf amounts of one user's bucket, keyed by category path.
pub type Leaves = HashMap<String, f64>;

/// Port for the document store holding aggregate buckets.
///
/// Implementations store and return *leaf* amounts only; zero-fill of
/// ancestors happens in [`crate::aggregator::Aggregator`].
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Upsert-increment the leaf at `entry.category` in `bucket`.
    async fn increment(&self, bucket: &BucketKey, entry: &Entry) -> Result<()>;

    /// Leaves of one user's bucket; empty when the bucket does not exist.
    async fn read(&self, username: &str, bucket: &BucketKey) -> Result<Leaves>;

    /// Leaves for several users; users without a bucket are absent.
    async fn read_many(
        &self,
        usernames: &[String],
        bucket: &BucketKey,
    ) -> Result<HashMap<String, Leaves>>;

    async fn delete_many(&self, usernames: &[String], bucket: &BucketKey) -> Result<()>;

    /// Delete every bucket under `bucket` whose last write is before `older_than`.
    async fn purge_stale(&self, bucket: &BucketKey, older_than: DateTime<Utc>) -> Result<usize>;
}

#[derive(Debug)]
struct StoredBucket {
    tree: CategoryTree,
    updated_at: DateTime<Utc>,
}

/// In-process aggregate store: one category trie per (bucket, user).
#[derive(Default)]
pub struct MemoryAggregateStore {
    buckets: RwLock<HashMap<BucketKey, HashMap<String, StoredBucket>>>,
}

impl MemoryAggregateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AggregateStore for MemoryAggregateStore {
    async fn increment(&self, bucket: &BucketKey, entry: &Entry) -> Result<()> {
        let mut buckets = self.buckets.write().await;
        let stored = buckets
            .entry(bucket.clone())
            .or_default()
            .entry(entry.username.clone())
            .or_insert_with(|| StoredBucket {
                tree: CategoryTree::new(),
                updated_at: entry.at,
            });
        stored.tree.increment(&entry.category, entry.amount);
        stored.updated_at = stored.updated_at.max(entry.at);
        Ok(())
    }

    async fn read(&self, username: &str, bucket: &BucketKey) -> Result<Leaves> {
        let buckets = self.buckets.read().await;
        Ok(buckets
            .get(bucket)
            .and_then(|users| users.get(username))
            .map(|stored| stored.tree.leaves())
            .unwrap_or_default())
    }

    async fn read_many(
        &self,
        usernames: &[String],
        bucket: &BucketKey,
    ) -> Result<HashMap<String, Leaves>> {
        let buckets = self.buckets.read().await;
        let Some(users) = buckets.get(bucket) else {
            return Ok(HashMap::new());
        };
        Ok(usernames
            .iter()
            .filter_map(|name| {
                users
                    .get(name)
                    .map(|stored| (name.clone(), stored.tree.leaves()))
            })
            .collect())
    }

    async fn delete_many(&self, usernames: &[String], bucket: &BucketKey) -> Result<()> {
        let mut buckets = self.buckets.write().await;
        if let Some(users) = buckets.get_mut(bucket) {
            for name in usernames {
                users.remove(name);
            }
        }
        Ok(())
    }

    async fn purge_stale(&self, bucket: &BucketKey, older_than: DateTime<Utc>) -> Result<usize> {
        let mut buckets = self.buckets.write().await;
        let Some(users) = buckets.get_mut(bucket) else {
            return Ok(0);
        };
        let before = users.len();
        users.retain(|_, stored| stored.updated_at >= older_than);
        Ok(before - users.len())
    }
}
