use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::{CacheConfig, RetryPolicy};
use crate::error::{AppError, Result};
use crate::types::Market;
use crate::venue::MarketListing;

// ---------------------------------------------------------------------------
// CacheEntry
// ---------------------------------------------------------------------------

/// One immutable snapshot of the listing. Refreshes build a new entry and swap
/// it in whole; an entry is never edited after construction.
#[derive(Debug)]
pub struct CacheEntry {
    generation: u64,
    markets: Vec<Arc<Market>>,
    fetched_at: Instant,
    fetched_wall: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(generation: u64, markets: Vec<Market>, fetched_wall: DateTime<Utc>) -> Self {
        Self {
            generation,
            markets: markets.into_iter().map(Arc::new).collect(),
            fetched_at: Instant::now(),
            fetched_wall,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn markets(&self) -> &[Arc<Market>] {
        &self.markets
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }

    /// Wall-clock time of the fetch. Ranking uses this as "now".
    pub fn fetched_wall(&self) -> DateTime<Utc> {
        self.fetched_wall
    }

    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age() >= ttl
    }

    pub fn find(&self, market_id: &str) -> Option<&Arc<Market>> {
        self.markets.iter().find(|m| m.id == market_id)
    }
}

/// What `get_markets` hands out: a snapshot plus whether it outlived its TTL
/// because the refresh behind it failed.
#[derive(Debug, Clone)]
pub struct CacheView {
    pub entry: Arc<CacheEntry>,
    pub stale: bool,
}

// ---------------------------------------------------------------------------
// MarketCache
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Slot {
    entry: Option<Arc<CacheEntry>>,
    invalidated: bool,
}

/// TTL-bounded owner of market snapshots.
///
/// Lifecycle: empty (expired) → refreshed → expired → refreshed … A failed
/// refresh keeps the previous snapshot as a stale fallback for read-only
/// search; trade paths go through [`MarketCache::get_markets_for_trade`],
/// which refuses to proceed on stale data.
pub struct MarketCache {
    listing: Arc<dyn MarketListing>,
    ttl: Duration,
    retry: RetryPolicy,
    call_timeout: Duration,
    slot: RwLock<Slot>,
    /// Serializes refreshes so concurrent callers share one fetch.
    refresh_gate: Mutex<()>,
    next_generation: AtomicU64,
}

impl MarketCache {
    pub fn new(
        listing: Arc<dyn MarketListing>,
        cfg: &CacheConfig,
        retry: RetryPolicy,
        call_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            listing,
            ttl: cfg.ttl,
            retry,
            call_timeout,
            slot: RwLock::new(Slot::default()),
            refresh_gate: Mutex::new(()),
            next_generation: AtomicU64::new(1),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The current snapshot, expired or not, without triggering a fetch.
    pub fn current(&self) -> Option<Arc<CacheEntry>> {
        self.slot.read().entry.clone()
    }

    fn current_fresh(&self) -> Option<Arc<CacheEntry>> {
        let slot = self.slot.read();
        if slot.invalidated {
            return None;
        }
        slot.entry
            .as_ref()
            .filter(|e| !e.is_expired(self.ttl))
            .cloned()
    }

    /// Returns the current snapshot if still within TTL, otherwise refreshes.
    /// If that refresh fails and an older snapshot exists, the older snapshot
    /// is returned with `stale = true`.
    pub async fn get_markets(&self) -> Result<CacheView> {
        if let Some(entry) = self.current_fresh() {
            return Ok(CacheView { entry, stale: false });
        }

        match self.refresh_if_expired().await {
            Ok(entry) => Ok(CacheView { entry, stale: false }),
            Err(err) => match self.current() {
                Some(entry) => {
                    warn!(
                        generation = entry.generation,
                        age_secs = entry.age().as_secs(),
                        "Market refresh failed, serving stale snapshot: {err}"
                    );
                    Ok(CacheView { entry, stale: true })
                }
                None => Err(err),
            },
        }
    }

    /// Snapshot for a price-sensitive path. A stale view forces one more
    /// refresh attempt; if that fails the error is surfaced.
    pub async fn get_markets_for_trade(&self) -> Result<Arc<CacheEntry>> {
        let view = self.get_markets().await?;
        if !view.stale {
            return Ok(view.entry);
        }
        warn!(generation = view.entry.generation, "Snapshot is stale, forcing refresh before trading");
        self.refresh().await
    }

    /// Marks the current snapshot expired. It stays available as a stale fallback.
    pub fn invalidate(&self) {
        let mut slot = self.slot.write();
        slot.invalidated = true;
    }

    /// Fetches the full listing and swaps in a new snapshot. On failure, or if
    /// the caller abandons the future mid-fetch, the previous snapshot is untouched.
    pub async fn refresh(&self) -> Result<Arc<CacheEntry>> {
        let _gate = self.refresh_gate.lock().await;
        self.fetch_and_swap().await
    }

    async fn refresh_if_expired(&self) -> Result<Arc<CacheEntry>> {
        let _gate = self.refresh_gate.lock().await;
        // Another caller may have refreshed while we waited on the gate.
        if let Some(entry) = self.current_fresh() {
            return Ok(entry);
        }
        self.fetch_and_swap().await
    }

    async fn fetch_and_swap(&self) -> Result<Arc<CacheEntry>> {
        let listing = &self.listing;
        let markets = self
            .retry
            .run("list_markets", self.call_timeout, move || listing.list_markets())
            .await
            .map_err(|e| match e {
                e @ AppError::Fetch { .. } => e,
                other => AppError::fetch("market listing", other),
            })?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(CacheEntry::new(generation, markets, Utc::now()));

        {
            let mut slot = self.slot.write();
            slot.entry = Some(Arc::clone(&entry));
            slot.invalidated = false;
        }

        info!(
            generation,
            markets = entry.len(),
            ttl_secs = self.ttl.as_secs(),
            "Market cache refreshed: generation {generation}, {} markets",
            entry.len()
        );
        Ok(entry)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
