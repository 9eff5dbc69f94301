use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::fetcher::short_id;
use crate::state::MarketCache;
use crate::types::Market;

/// Shortest period `run` will tick at.
const MIN_POLL_PERIOD: Duration = Duration::from_secs(1);

/// Result of one poll, mostly for logging and tests.
#[derive(Debug, Clone)]
pub struct PollReport {
    pub generation: u64,
    pub stale: bool,
    pub added: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub total: usize,
    /// Tradable markets by 24h volume, highest first.
    pub hot: Vec<Arc<Market>>,
}

/// Background reader that keeps the market cache warm and reports which
/// markets came and went between snapshots. It only ever reads whole
/// snapshots, so it never sees a half-built list.
pub struct HotMarketPoller {
    cache: Arc<MarketCache>,
    every: Duration,
    top_n: usize,
    known: HashSet<String>,
    last_generation: Option<u64>,
}

impl HotMarketPoller {
    pub fn new(cache: Arc<MarketCache>, every: Duration, top_n: usize) -> Self {
        Self {
            cache,
            every,
            top_n,
            known: HashSet::new(),
            last_generation: None,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = interval(self.every.max(MIN_POLL_PERIOD));

        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_once().await {
                error!("Hot market poll failed: {e}");
            }
        }
    }

    pub async fn poll_once(&mut self) -> Result<PollReport> {
        let view = self.cache.get_markets().await?;
        let entry = view.entry;

        if view.stale {
            warn!(
                generation = entry.generation(),
                age_secs = entry.age().as_secs(),
                "Listing unreachable, hot list is from an old snapshot"
            );
        }

        let fresh_ids: HashSet<String> = entry.markets().iter().map(|m| m.id.clone()).collect();
        let (added, removed) = if self.last_generation == Some(entry.generation()) {
            (0, 0)
        } else {
            (
                fresh_ids.difference(&self.known).count(),
                self.known.difference(&fresh_ids).count(),
            )
        };
        let unchanged = fresh_ids.len() - added;

        let mut hot: Vec<Arc<Market>> = entry
            .markets()
            .iter()
            .filter(|m| m.is_tradable())
            .cloned()
            .collect();
        hot.sort_by(|a, b| b.volume_24h.total_cmp(&a.volume_24h).then_with(|| a.id.cmp(&b.id)));
        hot.truncate(self.top_n);

        if self.last_generation != Some(entry.generation()) {
            info!(
                generation = entry.generation(),
                added,
                removed,
                unchanged,
                total = fresh_ids.len(),
                "Market poll: +{added} added, -{removed} removed, {unchanged} unchanged",
            );
            for (rank, m) in hot.iter().enumerate() {
                info!(
                    market_id = short_id(&m.id),
                    volume_24h = m.volume_24h,
                    "[Hot #{}] {}",
                    rank + 1,
                    m.question
                );
            }
        }

        self.known = fresh_ids;
        self.last_generation = Some(entry.generation());

        Ok(PollReport {
            generation: entry.generation(),
            stale: view.stale,
            added,
            removed,
            unchanged,
            total: self.known.len(),
            hot,
        })
    }
}
