//! Ingestion stage: feed readings in, indexed feature records out.
//!
//! The producer makes passes over its [`FeedSource`] as allowed by its
//! [`CyclePolicy`], converts each reading into a [`FeatureRecord`], and
//! hands it to the consumer. Failures are per record: a malformed line, a
//! coordinate outside the projection, or a failed covering is logged and the
//! record is dropped. Only the stop signal or a vanished consumer ends the
//! loop early.

use std::time::Duration;

use cellstream_spatial::{CoordinateTransform, SpatialError, SpatialIndexer};
use cellstream_types::{BBox, FeatureId, FeatureRecord, Geometry, LngLat, PointReading, Srid};
use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::control::StopSignal;
use crate::feed::{CyclePolicy, FeedError, FeedSource};
use crate::handoff::HandoffSender;

/// Why a single feed record was dropped by the producer.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The record could not be read or parsed.
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// The reading could not be converted or indexed.
    #[error(transparent)]
    Spatial(#[from] SpatialError),
}

/// Turns raw readings into indexed feature records.
pub struct FeatureBuilder {
    feature_id: FeatureId,
    transform: Box<dyn CoordinateTransform>,
    indexer: SpatialIndexer,
}

impl FeatureBuilder {
    /// Builder stamping `feature_id` on every record it produces.
    pub fn new(
        feature_id: FeatureId,
        transform: Box<dyn CoordinateTransform>,
        indexer: SpatialIndexer,
    ) -> Self {
        Self {
            feature_id,
            transform,
            indexer,
        }
    }

    /// The reference system stamped on every record.
    pub fn srid(&self) -> Srid {
        self.transform.source_srid()
    }

    /// The feature id stamped by [`Self::build`].
    pub const fn feature_id(&self) -> &FeatureId {
        &self.feature_id
    }

    /// Build a point record under the configured feature id.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::Conversion`] if the reading is outside the
    /// source system, or [`SpatialError::IndexComputation`] if no covering
    /// can be computed.
    pub fn build(&self, reading: PointReading) -> Result<FeatureRecord, SpatialError> {
        self.build_geometry(self.feature_id.clone(), reading.to_geometry())
    }

    /// Build a record for any geometry under an explicit id.
    ///
    /// # Errors
    ///
    /// Same as [`Self::build`], for any position of the geometry.
    pub fn build_geometry(
        &self,
        id: FeatureId,
        geometry: Geometry,
    ) -> Result<FeatureRecord, SpatialError> {
        let degrees: Vec<LngLat> = geometry
            .positions()
            .iter()
            .map(|[x, y, _]| self.transform.to_degrees(*x, *y))
            .collect::<Result<_, _>>()?;
        let tokens = self.indexer.cover(&degrees)?;
        let bbox = BBox::from_points(&degrees).ok_or_else(|| {
            SpatialError::IndexComputation("geometry has no positions".to_owned())
        })?;

        Ok(FeatureRecord {
            id,
            geometry_type: geometry.geometry_type(),
            srid: self.srid(),
            geometry,
            bbox,
            tokens,
            observed_at: Utc::now(),
        })
    }
}

/// Shortest pause after a pass that emitted nothing.
pub const MIN_RETRY_BACKOFF: Duration = Duration::from_millis(1);

/// Pass policy for the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerOptions {
    /// How many passes to make.
    pub cycle: CyclePolicy,
    /// Pause between the end of one pass and the start of the next.
    pub restart_delay: Duration,
    /// First pause after a pass that failed to open or emitted nothing.
    /// Doubles on every further idle pass.
    pub retry_backoff: Duration,
    /// Upper bound for the idle-pass pause.
    pub max_retry_backoff: Duration,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            cycle: CyclePolicy::Endless,
            restart_delay: Duration::ZERO,
            retry_backoff: Duration::from_millis(100),
            max_retry_backoff: Duration::from_secs(30),
        }
    }
}

impl ProducerOptions {
    /// Pause before the next pass after `idle_passes` consecutive passes
    /// that emitted nothing.
    pub fn pause_after(&self, idle_passes: u32) -> Duration {
        if idle_passes == 0 {
            return self.restart_delay;
        }
        let first = self.retry_backoff.max(MIN_RETRY_BACKOFF);
        let cap = self.max_retry_backoff.max(first);
        let factor = 2u32.saturating_pow(idle_passes.saturating_sub(1));
        let backoff = first.saturating_mul(factor).min(cap);
        backoff.max(self.restart_delay)
    }
}

/// Whether a repeated idle-pass warning should be logged: on the 1st, 2nd,
/// 4th, 8th... consecutive occurrence.
const fn should_warn(idle_passes: u32) -> bool {
    idle_passes.is_power_of_two()
}

/// Counters reported by the producer when it exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerSummary {
    /// Passes started, including those whose open failed.
    pub passes: u32,
    /// Passes that failed to open or emitted nothing.
    pub idle_passes: u32,
    /// Passes that could not be opened.
    pub open_failures: u32,
    /// Records accepted by the consumer.
    pub emitted: u64,
    /// Records dropped because of feed, conversion, or covering errors.
    pub skipped: u64,
}

/// Run the ingestion stage until the cycle policy is exhausted, a stop is
/// requested, or the consumer goes away.
///
/// The sender is dropped on return, which closes the handoff.
pub async fn run_producer<F: FeedSource>(
    source: &F,
    builder: &FeatureBuilder,
    options: ProducerOptions,
    sender: HandoffSender<FeatureRecord>,
    stop: &StopSignal,
) -> ProducerSummary {
    let mut summary = ProducerSummary::default();
    info!(
        feed = source.describe(),
        feature_id = %builder.feature_id(),
        srid = %builder.srid(),
        cycle = ?options.cycle,
        "producer starting"
    );

    let mut idle_streak: u32 = 0;

    'passes: while options.cycle.allows(summary.passes) && !stop.is_stop_requested() {
        summary.passes = summary.passes.saturating_add(1);
        let pass = summary.passes;
        let emitted_before = summary.emitted;
        let mut opened = false;

        match source.open().await {
            Err(e) => {
                summary.open_failures = summary.open_failures.saturating_add(1);
                if should_warn(idle_streak.saturating_add(1)) {
                    warn!(
                        pass,
                        failures = summary.open_failures,
                        error = %e,
                        "could not open feed"
                    );
                } else {
                    debug!(pass, error = %e, "could not open feed");
                }
            }
            Ok(mut readings) => {
                opened = true;
                while let Some(item) = readings.next().await {
                    if stop.is_stop_requested() {
                        break 'passes;
                    }
                    let record = match item
                        .map_err(IngestError::from)
                        .and_then(|reading| builder.build(reading).map_err(IngestError::from))
                    {
                        Ok(record) => record,
                        Err(e) => {
                            summary.skipped = summary.skipped.saturating_add(1);
                            if idle_streak == 0 {
                                warn!(pass, error = %e, "skipping feed record");
                            } else {
                                debug!(pass, error = %e, "skipping feed record");
                            }
                            continue;
                        }
                    };

                    tokio::select! {
                        biased;
                        () = stop.stopped() => break 'passes,
                        sent = sender.send(record) => {
                            if sent.is_err() {
                                warn!(pass, "consumer is gone, stopping producer");
                                break 'passes;
                            }
                            summary.emitted = summary.emitted.saturating_add(1);
                        }
                    }
                }
                debug!(pass, emitted = summary.emitted, "feed pass complete");
            }
        }

        if summary.emitted == emitted_before {
            idle_streak = idle_streak.saturating_add(1);
            summary.idle_passes = summary.idle_passes.saturating_add(1);
            if opened && should_warn(idle_streak) {
                warn!(pass, idle_passes = idle_streak, "feed pass produced no records");
            }
        } else {
            idle_streak = 0;
        }

        if !options.cycle.allows(summary.passes) {
            break;
        }
        let pause = options.pause_after(idle_streak);
        if idle_streak > 0 {
            debug!(
                pass,
                idle_passes = idle_streak,
                retry_in_ms = u64::try_from(pause.as_millis()).unwrap_or(u64::MAX),
                "backing off before next pass"
            );
        }
        if pause.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                biased;
                () = stop.stopped() => break,
                () = tokio::time::sleep(pause) => {}
            }
        }
    }

    drop(sender);
    info!(
        passes = summary.passes,
        emitted = summary.emitted,
        skipped = summary.skipped,
        stop_requested = stop.is_stop_requested(),
        "producer finished, handoff closed"
    );
    summary
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use std::sync::Arc;

    use cellstream_spatial::{CoveringConfig, WebMercator};
    use cellstream_types::GeometryType;

    use super::*;
    use crate::feed::MemoryFeed;
    use crate::handoff::{HandoffPolicy, handoff};

    fn builder() -> FeatureBuilder {
        FeatureBuilder::new(
            FeatureId::new("endless circle"),
            Box::new(WebMercator),
            SpatialIndexer::new(CoveringConfig::default()).unwrap(),
        )
    }

    #[test]
    fn build_stamps_id_srid_and_one_token() {
        let record = builder().build(PointReading::new(0.0, 0.0, 12.0)).unwrap();
        assert_eq!(record.id.as_str(), "endless circle");
        assert_eq!(record.srid, Srid::WEB_MERCATOR);
        assert_eq!(record.geometry_type, GeometryType::Point);
        assert_eq!(record.geometry, Geometry::Point([0.0, 0.0, 12.0]));
        assert_eq!(record.tokens.len(), 1);
    }

    #[test]
    fn build_rejects_out_of_domain_reading() {
        let err = builder().build(PointReading::new(9.0e7, 0.0, 0.0)).unwrap_err();
        assert!(matches!(err, SpatialError::Conversion { .. }));
    }

    #[test]
    fn build_geometry_covers_every_position() {
        let record = builder()
            .build_geometry(
                FeatureId::new("track"),
                Geometry::LineString(vec![[0.0, 0.0, 0.0], [50_000.0, 50_000.0, 0.0]]),
            )
            .unwrap();
        assert_eq!(record.geometry_type, GeometryType::LineString);
        assert!(!record.tokens.is_empty());
        assert!(record.bbox.max_lng > record.bbox.min_lng);
    }

    #[tokio::test]
    async fn producer_skips_bad_records_and_closes_handoff() {
        let feed = MemoryFeed::new(["0,0,0", "oops", "99999999999,0,0", "1,1,0"]);
        let (tx, mut rx) = handoff(HandoffPolicy::Rendezvous);
        let stop = Arc::new(StopSignal::new());
        let options = ProducerOptions {
            cycle: CyclePolicy::Passes(2),
            ..ProducerOptions::default()
        };

        let producer = tokio::spawn({
            let stop = Arc::clone(&stop);
            async move { run_producer(&feed, &builder(), options, tx, &stop).await }
        });

        let mut received = Vec::new();
        while let Some(record) = rx.recv().await {
            received.push(record);
        }
        let summary = producer.await.unwrap();

        assert_eq!(received.len(), 4);
        assert_eq!(summary.passes, 2);
        assert_eq!(summary.emitted, 4);
        assert_eq!(summary.skipped, 4);
        assert_eq!(received[0].tokens, received[1].tokens);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_an_endless_producer() {
        let feed = MemoryFeed::new(["0,0,0"]);
        let (tx, mut rx) = handoff(HandoffPolicy::Rendezvous);
        let stop = Arc::new(StopSignal::new());

        let producer = tokio::spawn({
            let stop = Arc::clone(&stop);
            async move {
                run_producer(&feed, &builder(), ProducerOptions::default(), tx, &stop).await
            }
        });

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        stop.request_stop();

        // At most one already-emitted record may still be in the slot.
        let mut drained = 0;
        while rx.recv().await.is_some() {
            drained += 1;
        }
        let summary = producer.await.unwrap();
        assert!(drained <= 1);
        assert!(summary.emitted >= 2);
    }

    #[tokio::test]
    async fn unopenable_feed_counts_failed_passes() {
        let feed = crate::feed::CsvFileFeed::new("/nonexistent/cellstream.csv");
        let (tx, mut rx) = handoff::<FeatureRecord>(HandoffPolicy::Rendezvous);
        let stop = StopSignal::new();
        let options = ProducerOptions {
            cycle: CyclePolicy::Passes(3),
            retry_backoff: Duration::from_millis(1),
            ..ProducerOptions::default()
        };

        let summary = run_producer(&feed, &builder(), options, tx, &stop).await;

        assert_eq!(summary.passes, 3);
        assert_eq!(summary.open_failures, 3);
        assert_eq!(summary.idle_passes, 3);
        assert!(rx.recv().await.is_none());
    }

    /// A source whose every open fails.
    struct UnreachableFeed;

    impl FeedSource for UnreachableFeed {
        fn describe(&self) -> String {
            "unreachable".to_owned()
        }

        async fn open(&self) -> Result<crate::feed::ReadingStream, FeedError> {
            Err(FeedError::Open {
                path: "unreachable".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }
    }

    /// Run an endless producer against `feed` for `window` of virtual time.
    async fn passes_within<F: FeedSource>(feed: F, window: Duration) -> ProducerSummary {
        let (tx, mut rx) = handoff::<FeatureRecord>(HandoffPolicy::Rendezvous);
        let stop = Arc::new(StopSignal::new());
        let options = ProducerOptions {
            retry_backoff: Duration::from_millis(100),
            max_retry_backoff: Duration::from_secs(30),
            ..ProducerOptions::default()
        };

        let stopper = tokio::spawn({
            let stop = Arc::clone(&stop);
            async move {
                tokio::time::sleep(window).await;
                stop.request_stop();
            }
        });
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let summary = run_producer(&feed, &builder(), options, tx, &stop).await;
        stopper.await.unwrap();
        drain.await.unwrap();
        summary
    }

    #[tokio::test(start_paused = true)]
    async fn unopenable_feed_backs_off_between_passes() {
        // 100 + 200 + ... + 6400 ms fits seven pauses in ten seconds.
        let summary = passes_within(UnreachableFeed, Duration::from_secs(10)).await;

        assert!(summary.passes >= 5, "passes: {}", summary.passes);
        assert!(summary.passes <= 8, "passes: {}", summary.passes);
        assert_eq!(summary.open_failures, summary.passes);
        assert_eq!(summary.idle_passes, summary.passes);
    }

    #[tokio::test(start_paused = true)]
    async fn all_malformed_feed_backs_off_between_passes() {
        let feed = MemoryFeed::new(["oops", "still not a record"]);
        let summary = passes_within(feed, Duration::from_secs(10)).await;

        assert!(summary.passes >= 5, "passes: {}", summary.passes);
        assert!(summary.passes <= 8, "passes: {}", summary.passes);
        assert_eq!(summary.emitted, 0);
        assert_eq!(summary.skipped, u64::from(summary.passes) * 2);
    }

    #[test]
    fn pause_doubles_to_the_cap_and_resets() {
        let options = ProducerOptions {
            restart_delay: Duration::from_millis(250),
            retry_backoff: Duration::from_millis(100),
            max_retry_backoff: Duration::from_secs(1),
            ..ProducerOptions::default()
        };
        assert_eq!(options.pause_after(0), Duration::from_millis(250));
        assert_eq!(options.pause_after(1), Duration::from_millis(250));
        assert_eq!(options.pause_after(2), Duration::from_millis(400));
        assert_eq!(options.pause_after(3), Duration::from_millis(800));
        assert_eq!(options.pause_after(4), Duration::from_secs(1));
        assert_eq!(options.pause_after(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn zero_backoff_still_pauses_idle_passes() {
        let options = ProducerOptions {
            retry_backoff: Duration::ZERO,
            max_retry_backoff: Duration::ZERO,
            ..ProducerOptions::default()
        };
        assert_eq!(options.pause_after(0), Duration::ZERO);
        assert_eq!(options.pause_after(1), MIN_RETRY_BACKOFF);
        assert_eq!(options.pause_after(50), MIN_RETRY_BACKOFF);
    }

    #[test]
    fn repeated_warnings_thin_out() {
        let warned: Vec<u32> = (1..=20).filter(|n| should_warn(*n)).collect();
        assert_eq!(warned, vec![1, 2, 4, 8, 16]);
    }
}
