use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::backends::{ObjectReader, ObjectStore};
use crate::common::{ObjectKey, ObjectListing};

/// 🪣 A bucket that fits in a `BTreeMap`.
///
/// Keys come back in lexicographic order, `page_size` at a time, with a
/// continuation token that is just the last key of the page. Close enough to
/// S3 that the enumerator cannot tell the difference.
///
/// Built up front with the `with_*` methods, then frozen behind an `Arc` for
/// the run. No interior mutability needed: a bill that changes mid-run is a
/// different test.
#[derive(Debug)]
pub(crate) struct InMemoryObjectStore {
    objects: BTreeMap<(String, String), (Vec<u8>, DateTime<Utc>)>,
    regions: HashMap<String, String>,
    failing_buckets: HashSet<String>,
    page_size: usize,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self {
            objects: BTreeMap::new(),
            regions: HashMap::new(),
            failing_buckets: HashSet::new(),
            // 📄 S3's own page size. We are method actors.
            page_size: 1000,
        }
    }
}

impl InMemoryObjectStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub(crate) fn with_region(mut self, bucket: &str, region: &str) -> Self {
        self.regions.insert(bucket.to_string(), region.to_string());
        self
    }

    pub(crate) fn with_object(
        mut self,
        bucket: &str,
        key: &str,
        body: impl Into<Vec<u8>>,
        last_modified: DateTime<Utc>,
    ) -> Self {
        self.objects
            .insert((bucket.to_string(), key.to_string()), (body.into(), last_modified));
        self
    }

    /// 💀 Every call touching `bucket` fails. For testing the sad paths.
    pub(crate) fn with_failing_bucket(mut self, bucket: &str) -> Self {
        self.failing_buckets.insert(bucket.to_string());
        self
    }

    fn check_bucket(&self, bucket: &str) -> Result<()> {
        if self.failing_buckets.contains(bucket) {
            anyhow::bail!("💀 in-memory bucket '{}' is configured to fail. It is very committed to the bit.", bucket);
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn bucket_region(&self, bucket: &str) -> Result<String> {
        self.check_bucket(bucket)?;
        Ok(self
            .regions
            .get(bucket)
            .cloned()
            .unwrap_or_else(|| "us-east-1".to_string()))
    }

    async fn list_page(
        &self,
        region: &str,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ObjectListing> {
        self.check_bucket(bucket)?;
        let the_matching = self
            .objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .filter(|((_, k), _)| continuation.as_ref().is_none_or(|after| k > after));

        let mut the_keys = Vec::new();
        let mut has_more = false;
        for ((b, k), (_, last_modified)) in the_matching {
            if the_keys.len() == self.page_size {
                has_more = true;
                break;
            }
            the_keys.push(ObjectKey {
                region: region.to_string(),
                bucket: b.clone(),
                key: k.clone(),
                last_modified: *last_modified,
            });
        }

        let the_next = if has_more {
            the_keys.last().map(|k| k.key.clone())
        } else {
            None
        };
        Ok(ObjectListing {
            keys: the_keys,
            next_continuation: the_next,
        })
    }

    async fn get_object(&self, _region: &str, bucket: &str, key: &str) -> Result<ObjectReader> {
        self.check_bucket(bucket)?;
        let (the_body, _) = self
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| anyhow::anyhow!("💀 s3://{}/{} does not exist, not even in RAM", bucket, key))?;
        Ok(Box::new(std::io::Cursor::new(the_body.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn the_store() -> InMemoryObjectStore {
        let now = Utc::now();
        InMemoryObjectStore::new()
            .with_page_size(2)
            .with_object("b", "p/a", "A", now)
            .with_object("b", "p/b", "B", now)
            .with_object("b", "p/c", "C", now)
            .with_object("b", "q/d", "D", now)
            .with_object("other", "p/e", "E", now)
    }

    #[tokio::test]
    async fn the_one_where_listings_page_like_the_real_thing() {
        let the_store = the_store();
        let the_first = the_store.list_page("r", "b", "p/", None).await.unwrap();
        assert_eq!(the_first.keys.len(), 2);
        assert_eq!(the_first.next_continuation.as_deref(), Some("p/b"));

        let the_second = the_store
            .list_page("r", "b", "p/", the_first.next_continuation)
            .await
            .unwrap();
        assert_eq!(the_second.keys.len(), 1);
        assert_eq!(the_second.keys[0].key, "p/c");
        assert!(the_second.next_continuation.is_none());
    }

    #[tokio::test]
    async fn the_one_where_objects_can_be_read_back() {
        let mut the_reader = the_store().get_object("r", "b", "p/b").await.unwrap();
        let mut the_body = String::new();
        the_reader.read_to_string(&mut the_body).await.unwrap();
        assert_eq!(the_body, "B");
    }

    #[tokio::test]
    async fn the_one_where_a_failing_bucket_fails() {
        let the_store = the_store().with_failing_bucket("b");
        assert!(the_store.bucket_region("b").await.is_err());
        assert!(the_store.list_page("r", "b", "", None).await.is_err());
        assert_eq!(the_store.bucket_region("other").await.unwrap(), "us-east-1");
    }
}
