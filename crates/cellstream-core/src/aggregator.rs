//! Aggregation stage: fold feature records into per-cell collections.
//!
//! For every token of a record the aggregator reads the stored collection,
//! upserts the record's entry by feature id, and replaces the stored value
//! with a delete followed by a put. A failed step abandons the remaining
//! tokens of that record only; the next record starts fresh.
//!
//! The aggregator assumes it is the only writer for its keys. Two writers
//! sharing a store would race on the read-merge-write sequence.

use std::time::Duration;

use cellstream_db::{CellStore, StoreError, display_key};
use cellstream_types::{CellCollection, CellToken, FeatureRecord, Payload};
use tracing::{debug, info, warn};

/// Failure while aggregating one token of a record.
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    /// The merged collection could not be encoded.
    #[error("failed to serialize collection for cell {token}: {source}")]
    Serialization {
        /// Cell being written.
        token: CellToken,
        /// The underlying encoder error.
        source: serde_json::Error,
    },

    /// A store operation failed.
    #[error("store operation failed for cell {token}: {source}")]
    Store {
        /// Cell being written.
        token: CellToken,
        /// The underlying store error.
        source: StoreError,
    },
}

/// Tuning for the aggregation stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorOptions {
    /// Pause after every successful token write.
    pub write_pacing: Duration,
    /// A milestone is reported every this many successful writes.
    pub milestone_every: u64,
    /// Attempts for the delete/put replace of one token.
    pub max_write_attempts: u32,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            write_pacing: Duration::from_millis(500),
            milestone_every: 10,
            max_write_attempts: 1,
        }
    }
}

/// Receives progress milestones from the aggregator.
pub trait ProgressObserver: Send {
    /// Called once each time the successful-write total reaches a multiple
    /// of the milestone interval.
    fn on_milestone(&mut self, total: u64);
}

/// Default observer: one log line per milestone.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_milestone(&mut self, total: u64) {
        info!(total_writes = total, "write milestone reached");
    }
}

/// What happened to one record.
#[derive(Debug, Default)]
pub struct FeatureOutcome {
    /// Tokens successfully written before completion or failure.
    pub tokens_written: usize,
    /// The failure that abandoned the remaining tokens, if any.
    pub failure: Option<AggregateError>,
}

impl FeatureOutcome {
    /// Whether every token of the record was written.
    pub const fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// Running totals kept by the aggregator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    /// Records handed to [`CellAggregator::process`].
    pub features_processed: u64,
    /// Records whose tokens were not all written.
    pub failed_features: u64,
    /// Successful token writes.
    pub tokens_written: u64,
    /// Stored values that could not be decoded and were replaced.
    pub decode_failures: u64,
}

/// Read-merge-write consumer of feature records.
pub struct CellAggregator<S, P = LogProgress> {
    store: S,
    progress: P,
    options: AggregatorOptions,
    stats: AggregatorStats,
}

impl<S: CellStore> CellAggregator<S> {
    /// Aggregator logging its milestones.
    pub const fn new(store: S, options: AggregatorOptions) -> Self {
        Self::with_progress(store, options, LogProgress)
    }
}

impl<S: CellStore, P: ProgressObserver> CellAggregator<S, P> {
    /// Aggregator reporting milestones to `progress`.
    pub const fn with_progress(store: S, options: AggregatorOptions, progress: P) -> Self {
        Self {
            store,
            progress,
            options,
            stats: AggregatorStats {
                features_processed: 0,
                failed_features: 0,
                tokens_written: 0,
                decode_failures: 0,
            },
        }
    }

    /// Totals so far.
    pub const fn stats(&self) -> AggregatorStats {
        self.stats
    }

    /// The backing store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Fold `record` into the collection of each of its tokens, in order.
    pub async fn process(&mut self, record: &FeatureRecord) -> FeatureOutcome {
        self.stats.features_processed = self.stats.features_processed.saturating_add(1);
        let mut outcome = FeatureOutcome::default();

        for token in &record.tokens {
            let written = match self.prepare_payload(token, record).await {
                Ok(payload) => self.replace(&payload).await,
                Err(e) => Err(e),
            };

            match written {
                Ok(()) => {
                    info!(token = %token, feature_id = %record.id, "cell written");
                    outcome.tokens_written = outcome.tokens_written.saturating_add(1);
                    self.account();
                    tokio::time::sleep(self.options.write_pacing).await;
                }
                Err(e) => {
                    warn!(
                        token = %token,
                        feature_id = %record.id,
                        error = %e,
                        "cell write failed, abandoning remaining cells of this feature"
                    );
                    outcome.failure = Some(e);
                    break;
                }
            }
        }

        if outcome.failure.is_some() {
            self.stats.failed_features = self.stats.failed_features.saturating_add(1);
        }
        outcome
    }

    /// Read, decode, merge, and encode the collection for one token.
    async fn prepare_payload(
        &mut self,
        token: &CellToken,
        record: &FeatureRecord,
    ) -> Result<Payload, AggregateError> {
        let stored = self
            .store
            .get(token.as_bytes())
            .await
            .map_err(|source| AggregateError::Store {
                token: token.clone(),
                source,
            })?;

        let current = match stored {
            None => CellCollection::new(),
            Some(bytes) => CellCollection::from_slice(&bytes).unwrap_or_else(|e| {
                self.stats.decode_failures = self.stats.decode_failures.saturating_add(1);
                warn!(token = %token, error = %e, "stored collection unreadable, starting empty");
                CellCollection::new()
            }),
        };
        debug!(token = %token, features = ?current.ids().collect::<Vec<_>>(), "inbound collection");

        let merged = current.merged_with(record.to_entry());
        debug!(token = %token, features = ?merged.ids().collect::<Vec<_>>(), "outbound collection");

        let value = merged
            .to_vec()
            .map_err(|source| AggregateError::Serialization {
                token: token.clone(),
                source,
            })?;
        Ok(Payload {
            token: token.clone(),
            value,
        })
    }

    /// Delete, confirm the delete, then put; retried as a unit.
    async fn replace(&self, payload: &Payload) -> Result<(), AggregateError> {
        let attempts = self.options.max_write_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.replace_once(payload).await {
                Ok(()) => return Ok(()),
                Err(source) if attempt < attempts => {
                    debug!(
                        token = %payload.token,
                        attempt,
                        error = %source,
                        "replace failed, retrying"
                    );
                    attempt = attempt.saturating_add(1);
                }
                Err(source) => {
                    return Err(AggregateError::Store {
                        token: payload.token.clone(),
                        source,
                    });
                }
            }
        }
    }

    async fn replace_once(&self, payload: &Payload) -> Result<(), StoreError> {
        let key = payload.token.as_bytes();
        self.store.delete(key).await?;
        if self.store.get(key).await?.is_some() {
            return Err(StoreError::NotDeleted(display_key(key)));
        }
        self.store.put(key, &payload.value).await
    }

    fn account(&mut self) {
        self.stats.tokens_written = self.stats.tokens_written.saturating_add(1);
        if self
            .stats
            .tokens_written
            .checked_rem(self.options.milestone_every)
            == Some(0)
        {
            self.progress.on_milestone(self.stats.tokens_written);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use cellstream_db::MemoryStore;
    use cellstream_spatial::{CoveringConfig, SpatialIndexer, WebMercator};
    use cellstream_types::{FeatureId, Geometry, PointReading};

    use super::*;
    use crate::ingest::FeatureBuilder;

    fn builder(id: &str) -> FeatureBuilder {
        FeatureBuilder::new(
            FeatureId::new(id),
            Box::new(WebMercator),
            SpatialIndexer::new(CoveringConfig::default()).unwrap(),
        )
    }

    fn point(id: &str, x: f64, y: f64) -> FeatureRecord {
        builder(id).build(PointReading::new(x, y, 0.0)).unwrap()
    }

    async fn stored(store: &MemoryStore, token: &CellToken) -> CellCollection {
        let bytes = store.get(token.as_bytes()).await.unwrap().unwrap();
        CellCollection::from_slice(&bytes).unwrap()
    }

    struct Recorder(Arc<Mutex<Vec<u64>>>);

    impl ProgressObserver for Recorder {
        fn on_milestone(&mut self, total: u64) {
            self.0.lock().unwrap().push(total);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_id_replaces_and_new_id_appends() {
        let store = MemoryStore::new();
        let mut aggregator = CellAggregator::new(store.clone(), AggregatorOptions::default());

        let first = point("p1", 0.0, 0.0);
        let moved = point("p1", 1.0, 1.0);
        let other = point("p2", 0.0, 0.0);
        assert_eq!(first.tokens, moved.tokens);

        for record in [&first, &moved, &other] {
            assert!(aggregator.process(record).await.is_complete());
        }

        let token = &first.tokens[0];
        let collection = stored(&store, token).await;
        assert_eq!(collection.len(), 2);
        let ids: Vec<&str> = collection.ids().map(FeatureId::as_str).collect();
        assert_eq!(ids, ["p1", "p2"]);
        assert_eq!(
            collection.get(&FeatureId::new("p1")).unwrap().geometry,
            Geometry::Point([1.0, 1.0, 0.0])
        );
        assert_eq!(store.len().await, 1);
        assert_eq!(aggregator.stats().tokens_written, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn milestone_fires_at_ten_writes_not_nine() {
        let totals = Arc::new(Mutex::new(Vec::new()));
        let mut aggregator = CellAggregator::with_progress(
            MemoryStore::new(),
            AggregatorOptions::default(),
            Recorder(Arc::clone(&totals)),
        );
        let record = point("p1", 0.0, 0.0);

        for _ in 0..9 {
            aggregator.process(&record).await;
        }
        assert!(totals.lock().unwrap().is_empty());

        aggregator.process(&record).await;
        assert_eq!(*totals.lock().unwrap(), vec![10]);

        for _ in 0..10 {
            aggregator.process(&record).await;
        }
        assert_eq!(*totals.lock().unwrap(), vec![10, 20]);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_are_paced() {
        let mut aggregator = CellAggregator::new(MemoryStore::new(), AggregatorOptions::default());
        let record = point("p1", 0.0, 0.0);

        let started = tokio::time::Instant::now();
        for _ in 0..4 {
            aggregator.process(&record).await;
        }
        // Four writes at no more than two per second.
        assert!(started.elapsed() >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_value_is_replaced_with_fresh_collection() {
        let store = MemoryStore::new();
        let record = point("p1", 0.0, 0.0);
        let token = record.tokens[0].clone();
        store.put(token.as_bytes(), b"not json").await.unwrap();

        let mut aggregator = CellAggregator::new(store.clone(), AggregatorOptions::default());
        assert!(aggregator.process(&record).await.is_complete());

        let collection = stored(&store, &token).await;
        assert_eq!(collection.len(), 1);
        assert_eq!(aggregator.stats().decode_failures, 1);
    }

    /// Store whose reads or writes can be made to fail, or deletes ignored.
    #[derive(Default)]
    struct FaultyStore {
        inner: MemoryStore,
        fail_gets_after: Option<u32>,
        fail_puts_after: Option<u32>,
        gets: AtomicU32,
        ignore_deletes: bool,
        puts: AtomicU32,
        deletes: AtomicU32,
    }

    impl CellStore for FaultyStore {
        async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
            let done = self.gets.fetch_add(1, Ordering::SeqCst);
            if self.fail_gets_after.is_some_and(|limit| done >= limit) {
                return Err(StoreError::Unavailable("get refused".to_owned()));
            }
            self.inner.get(key).await
        }

        async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
            let done = self.puts.fetch_add(1, Ordering::SeqCst);
            if self.fail_puts_after.is_some_and(|limit| done >= limit) {
                return Err(StoreError::Unavailable("put refused".to_owned()));
            }
            self.inner.put(key, value).await
        }

        async fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            if self.ignore_deletes {
                return Ok(());
            }
            self.inner.delete(key).await
        }
    }

    fn two_cell_record() -> FeatureRecord {
        let mut record = point("p1", 0.0, 0.0);
        let far = point("p1", 5_000_000.0, 5_000_000.0);
        record.tokens.extend(far.tokens);
        assert_eq!(record.tokens.len(), 2);
        record
    }

    #[tokio::test(start_paused = true)]
    async fn store_failure_abandons_remaining_tokens() {
        let store = FaultyStore {
            fail_puts_after: Some(1),
            ..FaultyStore::default()
        };
        let mut aggregator = CellAggregator::new(store, AggregatorOptions::default());
        let record = two_cell_record();

        let outcome = aggregator.process(&record).await;
        assert_eq!(outcome.tokens_written, 1);
        assert!(matches!(
            outcome.failure,
            Some(AggregateError::Store { ref token, .. }) if token == &record.tokens[1]
        ));
        assert_eq!(aggregator.stats().failed_features, 1);
        assert_eq!(aggregator.store().inner.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_read_abandons_remaining_tokens() {
        // The first cell takes two reads: the merge read and the delete check.
        let store = FaultyStore {
            fail_gets_after: Some(2),
            ..FaultyStore::default()
        };
        let mut aggregator = CellAggregator::new(store, AggregatorOptions::default());
        let record = two_cell_record();

        let outcome = aggregator.process(&record).await;
        assert_eq!(outcome.tokens_written, 1);
        assert!(matches!(
            outcome.failure,
            Some(AggregateError::Store {
                ref token,
                source: StoreError::Unavailable(_),
            }) if token == &record.tokens[1]
        ));
        let store = aggregator.store();
        assert_eq!(store.puts.load(Ordering::SeqCst), 1);
        assert_eq!(store.deletes.load(Ordering::SeqCst), 1);
        assert_eq!(store.inner.get(record.tokens[1].as_bytes()).await.unwrap(), None);
        assert_eq!(aggregator.stats().failed_features, 1);
        assert_eq!(aggregator.stats().tokens_written, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lingering_key_after_delete_is_reported() {
        let store = FaultyStore {
            ignore_deletes: true,
            ..FaultyStore::default()
        };
        let record = point("p1", 0.0, 0.0);
        store
            .inner
            .put(record.tokens[0].as_bytes(), br#"{"features":[]}"#)
            .await
            .unwrap();

        let options = AggregatorOptions {
            max_write_attempts: 3,
            ..AggregatorOptions::default()
        };
        let mut aggregator = CellAggregator::new(store, options);
        let outcome = aggregator.process(&record).await;

        assert!(matches!(
            outcome.failure,
            Some(AggregateError::Store {
                source: StoreError::NotDeleted(_),
                ..
            })
        ));
        assert_eq!(aggregator.store().deletes.load(Ordering::SeqCst), 3);
        assert_eq!(aggregator.store().puts.load(Ordering::SeqCst), 0);
    }
}
