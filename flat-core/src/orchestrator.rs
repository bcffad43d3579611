use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tracing::{info, warn};

use crate::error::{FetchError, StoreError};
use crate::listing::{Listing, Source};
use crate::notify::NotificationSink;
use crate::sources::SourceFetcher;
use crate::tracker::NoveltyTracker;

/// A "still nothing new" notice goes out every this many empty cycles.
pub const EMPTY_CYCLE_HEARTBEAT: u64 = 5;

/// What one fetcher produced this cycle.
#[derive(Debug)]
pub enum SourceOutcome {
    Fetched(Vec<Listing>),
    Failed(FetchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    /// Cold start: the baseline is recorded and nobody is notified.
    Bootstrap,
    Steady,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub source: Source,
    pub fetched: usize,
    pub fresh: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub phase: CyclePhase,
    pub sources: Vec<SourceReport>,
    pub new_listings: Vec<Listing>,
    pub empty_cycles: u64,
    pub duration: Duration,
}

impl CycleReport {
    pub fn has_new_listings(&self) -> bool {
        !self.new_listings.is_empty()
    }

    fn sources_summary(&self) -> String {
        self.sources
            .iter()
            .map(|r| match &r.error {
                Some(_) => format!("{} failed", r.source),
                None => format!("{} fetched={} new={}", r.source, r.fetched, r.fresh),
            })
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// Runs polling cycles: fetch every source, keep what the tracker has not
/// seen, record it, and tell the sink.
pub struct CycleOrchestrator {
    tracker: NoveltyTracker,
    fetchers: Vec<Arc<dyn SourceFetcher>>,
    sink: Arc<dyn NotificationSink>,
}

impl CycleOrchestrator {
    pub fn new(
        tracker: NoveltyTracker,
        fetchers: Vec<Arc<dyn SourceFetcher>>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            tracker,
            fetchers,
            sink,
        }
    }

    pub fn tracker(&self) -> &NoveltyTracker {
        &self.tracker
    }

    /// Fetch failures are per source. A persistence failure is returned once the
    /// cycle has finished and every listing already recorded has been broadcast.
    pub async fn run_cycle(&self) -> Result<CycleReport, StoreError> {
        let started = Instant::now();
        let bootstrap = !self.tracker.has_any_seen_ids().await;
        let outcomes = self.fetch_all().await;

        let report = if bootstrap {
            self.bootstrap(outcomes, started).await?
        } else {
            self.steady(outcomes, started).await?
        };

        info!(
            phase = ?report.phase,
            duration_ms = report.duration.as_millis() as u64,
            sources = %report.sources_summary(),
            total_new = report.new_listings.len(),
            empty_cycles = report.empty_cycles,
            "cycle finished"
        );
        Ok(report)
    }

    async fn fetch_all(&self) -> Vec<(Source, SourceOutcome)> {
        join_all(self.fetchers.iter().map(|fetcher| async move {
            let source = fetcher.source();
            let outcome = match fetcher.fetch().await {
                Ok(listings) => SourceOutcome::Fetched(listings),
                Err(err) => {
                    warn!(%source, error = %err, "source fetch failed");
                    SourceOutcome::Failed(err)
                }
            };
            (source, outcome)
        }))
        .await
    }

    async fn bootstrap(
        &self,
        outcomes: Vec<(Source, SourceOutcome)>,
        started: Instant,
    ) -> Result<CycleReport, StoreError> {
        let mut sources = Vec::with_capacity(outcomes.len());
        for (source, outcome) in outcomes {
            match outcome {
                SourceOutcome::Fetched(listings) => {
                    let newest = listings.iter().filter_map(|l| l.created_at).max();
                    self.tracker
                        .mark_seen(source, listings.iter().map(|l| l.id.clone()))
                        .await?;
                    self.tracker.update_last_date(source, newest).await?;
                    sources.push(SourceReport {
                        source,
                        fetched: listings.len(),
                        fresh: 0,
                        error: None,
                    });
                }
                SourceOutcome::Failed(err) => sources.push(failed_report(source, &err)),
            }
        }
        info!("baseline recorded, notifications start with the next cycle");
        Ok(CycleReport {
            phase: CyclePhase::Bootstrap,
            sources,
            new_listings: Vec::new(),
            empty_cycles: self.tracker.empty_cycles().await,
            duration: started.elapsed(),
        })
    }

    async fn steady(
        &self,
        outcomes: Vec<(Source, SourceOutcome)>,
        started: Instant,
    ) -> Result<CycleReport, StoreError> {
        let mut sources = Vec::with_capacity(outcomes.len());
        let mut new_listings = Vec::new();
        let mut store_error: Option<StoreError> = None;

        for (source, outcome) in outcomes {
            let listings = match outcome {
                SourceOutcome::Fetched(listings) => listings,
                SourceOutcome::Failed(err) => {
                    sources.push(failed_report(source, &err));
                    continue;
                }
            };
            let fetched = listings.len();
            let fresh = self.select_fresh(source, listings).await;
            if !fresh.is_empty() {
                // Unrecorded listings stay new and come back next cycle.
                if let Err(err) = self
                    .tracker
                    .mark_seen(source, fresh.iter().map(|l| l.id.clone()))
                    .await
                {
                    warn!(%source, error = %err, "failed to record new listings");
                    sources.push(SourceReport {
                        source,
                        fetched,
                        fresh: 0,
                        error: Some(err.to_string()),
                    });
                    store_error.get_or_insert(err);
                    continue;
                }
                let newest = fresh.iter().filter_map(|l| l.created_at).max();
                if let Err(err) = self.tracker.update_last_date(source, newest).await {
                    warn!(%source, error = %err, "failed to advance high-water-mark");
                    store_error.get_or_insert(err);
                }
            }
            sources.push(SourceReport {
                source,
                fetched,
                fresh: fresh.len(),
                error: None,
            });
            new_listings.extend(fresh);
        }

        // Anything recorded as seen is sent, even if a later write failed.
        if !new_listings.is_empty() {
            self.sink.broadcast(&new_listings).await;
        }
        if let Some(err) = store_error {
            return Err(err);
        }

        let empty_cycles = if new_listings.is_empty() {
            let count = self.tracker.increment_empty_cycle().await?;
            if count % EMPTY_CYCLE_HEARTBEAT == 0 {
                self.sink.notify_no_updates(count).await;
            }
            count
        } else {
            self.tracker.reset_empty_cycles().await?;
            0
        };

        Ok(CycleReport {
            phase: CyclePhase::Steady,
            sources,
            new_listings,
            empty_cycles,
            duration: started.elapsed(),
        })
    }

    // An id repeated within one fetch only counts once: the first occurrence decides.
    async fn select_fresh(&self, source: Source, listings: Vec<Listing>) -> Vec<Listing> {
        let mut batch_ids = HashSet::with_capacity(listings.len());
        let mut fresh = Vec::new();
        for listing in listings {
            if !batch_ids.insert(listing.id.clone()) {
                continue;
            }
            if self
                .tracker
                .is_new(source, &listing.id, listing.created_at)
                .await
            {
                fresh.push(listing);
            }
        }
        fresh
    }
}

fn failed_report(source: Source, err: &FetchError) -> SourceReport {
    SourceReport {
        source,
        fetched: 0,
        fresh: 0,
        error: Some(err.to_string()),
    }
}
