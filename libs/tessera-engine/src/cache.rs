use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::error::DriverError;
use crate::statement::PreparedStatement;

/// Statements are cached per (query text, keyspace).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub query: String,
    pub keyspace: Option<String>,
}

impl CacheKey {
    pub fn new(query: impl Into<String>, keyspace: Option<&str>) -> Self {
        Self {
            query: query.into(),
            keyspace: keyspace.map(str::to_string),
        }
    }
}

/// One cache entry. The cell is filled at most once; callers that arrive
/// while it is being filled wait on the same in-flight prepare.
#[derive(Debug)]
struct Slot {
    seq: u64,
    cell: OnceCell<Arc<PreparedStatement>>,
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone)]
pub struct Lookup {
    pub statement: Arc<PreparedStatement>,
    /// `false` when this call performed the prepare round trip.
    pub hit: bool,
}

/// Prepared statements of one session.
///
/// Sharded map of per-key once-cells: unrelated keys never contend, and no
/// map guard is held while a prepare is in flight.
#[derive(Debug, Default)]
pub struct StatementCache {
    slots: DashMap<CacheKey, Arc<Slot>>,
    seq: AtomicU64,
    max_entries: Option<usize>,
}

impl StatementCache {
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            slots: DashMap::new(),
            seq: AtomicU64::new(0),
            max_entries,
        }
    }

    /// Cached statement for `key`, or the result of `prepare`.
    ///
    /// Concurrent misses on one key run `prepare` once. A failed prepare
    /// leaves no entry behind.
    pub async fn get_or_prepare<F, Fut>(&self, key: &CacheKey, prepare: F) -> Result<Lookup, DriverError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PreparedStatement, DriverError>>,
    {
        let slot = self.slot(key);
        if let Some(statement) = slot.cell.get() {
            return Ok(Lookup {
                statement: statement.clone(),
                hit: true,
            });
        }

        let mut ran = false;
        let result = slot
            .cell
            .get_or_try_init(|| {
                ran = true;
                let fut = prepare();
                async move { fut.await.map(Arc::new) }
            })
            .await
            .cloned();

        match result {
            Ok(statement) => {
                if ran {
                    self.evict_over_limit(key);
                }
                Ok(Lookup { statement, hit: !ran })
            }
            Err(e) => {
                self.slots
                    .remove_if(key, |_, current| Arc::ptr_eq(current, &slot) && !current.cell.initialized());
                Err(e)
            }
        }
    }

    /// Drop the entry still carrying `stale`'s server id and prepare again.
    ///
    /// Staleness is decided by id, not identity: a metadata update installs
    /// a new statement under the old id, which the server may forget just
    /// the same. Refreshes that arrive while a prepare is in flight share
    /// it; one arriving after a prepare that returned the same id prepares
    /// once more.
    pub async fn refresh<F, Fut>(
        &self,
        key: &CacheKey,
        stale: &Arc<PreparedStatement>,
        prepare: F,
    ) -> Result<Lookup, DriverError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PreparedStatement, DriverError>>,
    {
        self.slots.remove_if(key, |_, current| {
            current.cell.get().is_some_and(|cached| cached.id() == stale.id())
        });
        self.get_or_prepare(key, prepare).await
    }

    /// Cached statement for `key`, without preparing.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<PreparedStatement>> {
        self.slots.get(key).and_then(|slot| slot.cell.get().cloned())
    }

    /// Install `statement` under `key`, replacing any entry.
    pub fn replace(&self, key: CacheKey, statement: Arc<PreparedStatement>) {
        let slot = Arc::new(Slot {
            seq: self.next_seq(),
            cell: OnceCell::new_with(Some(statement)),
        });
        self.slots.insert(key.clone(), slot);
        self.evict_over_limit(&key);
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.slots.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.slots.clear();
    }

    /// Number of prepared statements held (in-flight prepares excluded).
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|entry| entry.value().cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: &CacheKey) -> Arc<Slot> {
        if let Some(slot) = self.slots.get(key) {
            return slot.clone();
        }
        self.slots
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(Slot {
                    seq: self.next_seq(),
                    cell: OnceCell::new(),
                })
            })
            .clone()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Evict the oldest filled entries until the bound holds. `keep` is the
    /// entry that was just filled.
    fn evict_over_limit(&self, keep: &CacheKey) {
        let Some(max) = self.max_entries else {
            return;
        };
        let mut filled = 0;
        let mut candidates = Vec::new();
        for entry in self.slots.iter() {
            if !entry.value().cell.initialized() {
                continue;
            }
            filled += 1;
            if entry.key() != keep {
                candidates.push((entry.value().seq, entry.key().clone()));
            }
        }
        if filled <= max {
            return;
        }

        let excess = filled - max;
        if excess < candidates.len() {
            candidates.select_nth_unstable_by_key(excess, |(seq, _)| *seq);
            candidates.truncate(excess);
        }
        for (_, key) in candidates {
            tracing::debug!(query = %key.query, "evicting prepared statement");
            self.slots.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use bytes::Bytes;
    use tessera_codec::{ErrorCode, PreparedBody, RowsMetadata};

    use super::*;

    fn statement(query: &str) -> PreparedStatement {
        statement_with_id(query, query)
    }

    fn statement_with_id(query: &str, id: &str) -> PreparedStatement {
        PreparedStatement::new(
            query,
            None,
            PreparedBody {
                id: Bytes::copy_from_slice(id.as_bytes()),
                result_metadata_id: Bytes::new(),
                parameters: vec![],
                pk_indices: vec![],
                result: RowsMetadata::default(),
            },
        )
    }

    #[tokio::test]
    async fn second_lookup_hits() {
        let cache = StatementCache::default();
        let key = CacheKey::new("SELECT 1", None);

        let first = cache
            .get_or_prepare(&key, || async { Ok(statement("SELECT 1")) })
            .await
            .unwrap();
        assert!(!first.hit);

        let second = cache
            .get_or_prepare(&key, || async { Err(DriverError::Cancelled) })
            .await
            .unwrap();
        assert!(second.hit);
        assert!(Arc::ptr_eq(&first.statement, &second.statement));
    }

    #[tokio::test]
    async fn keyspace_is_part_of_the_key() {
        let cache = StatementCache::default();
        for ks in [None, Some("a"), Some("b")] {
            cache
                .get_or_prepare(&CacheKey::new("SELECT 1", ks), || async { Ok(statement("SELECT 1")) })
                .await
                .unwrap();
        }
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_prepare() {
        let cache = Arc::new(StatementCache::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::new("SELECT 1", None);

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                let key = key.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_prepare(&key, || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(statement("SELECT 1"))
                        })
                        .await
                        .unwrap()
                        .statement
                })
            })
            .collect();

        let mut statements = Vec::new();
        for task in tasks {
            statements.push(task.await.unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(statements.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn failed_prepare_leaves_nothing() {
        let cache = StatementCache::default();
        let key = CacheKey::new("SELEC 1", None);
        let err = cache
            .get_or_prepare(&key, || async {
                Err(DriverError::QueryInvalid {
                    code: ErrorCode::SyntaxError,
                    message: "line 1".into(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::QueryInvalid { .. }));
        assert!(cache.is_empty());
        assert!(cache.get(&key).is_none());
    }

    #[tokio::test]
    async fn refresh_replaces_only_the_stale_entry() {
        let cache = StatementCache::default();
        let key = CacheKey::new("SELECT 1", None);
        let stale = cache
            .get_or_prepare(&key, || async { Ok(statement("SELECT 1")) })
            .await
            .unwrap()
            .statement;

        let fresh = cache
            .refresh(&key, &stale, || async { Ok(statement_with_id("SELECT 1", "second")) })
            .await
            .unwrap();
        assert!(!fresh.hit);
        assert!(!Arc::ptr_eq(&fresh.statement, &stale));

        // A second refresh against the same stale statement reuses the new one.
        let again = cache
            .refresh(&key, &stale, || async { Err(DriverError::Cancelled) })
            .await
            .unwrap();
        assert!(again.hit);
        assert!(Arc::ptr_eq(&again.statement, &fresh.statement));
    }

    #[tokio::test]
    async fn refresh_sees_through_a_metadata_update() {
        let cache = StatementCache::default();
        let key = CacheKey::new("SELECT 1", None);
        let stale = cache
            .get_or_prepare(&key, || async { Ok(statement("SELECT 1")) })
            .await
            .unwrap()
            .statement;

        // Same server id, new result metadata.
        let updated = Arc::new(stale.with_result_metadata(Bytes::from_static(b"m2"), vec![]));
        cache.replace(key.clone(), updated.clone());

        let fresh = cache
            .refresh(&key, &stale, || async { Ok(statement_with_id("SELECT 1", "second")) })
            .await
            .unwrap();
        assert!(!fresh.hit);
        assert_eq!(&fresh.statement.id()[..], b"second");
        assert!(!Arc::ptr_eq(&fresh.statement, &updated));
    }

    #[tokio::test]
    async fn oldest_entries_are_evicted() {
        let cache = StatementCache::new(Some(2));
        for q in ["q1", "q2", "q3"] {
            cache
                .get_or_prepare(&CacheKey::new(q, None), || async { Ok(statement(q)) })
                .await
                .unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&CacheKey::new("q1", None)).is_none());
        assert!(cache.get(&CacheKey::new("q3", None)).is_some());
    }

    #[tokio::test]
    async fn eviction_drops_as_many_entries_as_needed() {
        let cache = StatementCache::default();
        for q in ["q1", "q2", "q3", "q4"] {
            cache.replace(CacheKey::new(q, None), Arc::new(statement(q)));
        }
        let bounded = StatementCache {
            slots: cache.slots,
            seq: cache.seq,
            max_entries: Some(2),
        };
        bounded
            .get_or_prepare(&CacheKey::new("q5", None), || async { Ok(statement("q5")) })
            .await
            .unwrap();

        assert_eq!(bounded.len(), 2);
        assert!(bounded.get(&CacheKey::new("q4", None)).is_some());
        assert!(bounded.get(&CacheKey::new("q5", None)).is_some());
    }

    #[test]
    fn replace_and_invalidate() {
        let cache = StatementCache::default();
        let key = CacheKey::new("q", None);
        cache.replace(key.clone(), Arc::new(statement("q")));
        assert_eq!(cache.len(), 1);
        assert!(cache.invalidate(&key));
        assert!(!cache.invalidate(&key));
        assert!(cache.is_empty());
    }
}
