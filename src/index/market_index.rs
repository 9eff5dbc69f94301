use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::{ScoringWeights, MIN_SUBSTRING_TERM_LEN};
use crate::index::tokenize::question_words;
use crate::state::CacheEntry;
use crate::types::{Category, Market};

/// Narrowing applied before scoring.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Also consider closed or inactive markets.
    pub include_closed: bool,
    pub category: Option<Category>,
    pub min_volume_24h: Option<f64>,
}

impl SearchFilters {
    fn admits(&self, market: &Market) -> bool {
        if !self.include_closed && !market.is_tradable() {
            return false;
        }
        if self.category.is_some_and(|c| c != market.category) {
            return false;
        }
        if self.min_volume_24h.is_some_and(|min| market.volume_24h < min) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct SearchCandidate {
    pub market: Arc<Market>,
    pub score: f64,
    pub matched: BTreeSet<String>,
}

struct IndexedMarket {
    market: Arc<Market>,
    text: String,
    words: BTreeSet<String>,
}

/// Keyword + activity index over one cache snapshot. Cheap to rebuild, so it
/// is never persisted; every search recomputes scores from scratch.
pub struct MarketIndex {
    entries: Vec<IndexedMarket>,
    weights: ScoringWeights,
    generation: u64,
    /// Snapshot fetch time, so ranking depends on the snapshot alone.
    now: DateTime<Utc>,
    max_volume: f64,
}

impl MarketIndex {
    pub fn build(entry: &CacheEntry, weights: &ScoringWeights) -> Self {
        let entries: Vec<IndexedMarket> = entry
            .markets()
            .iter()
            .map(|m| IndexedMarket {
                market: Arc::clone(m),
                text: m.question.to_lowercase(),
                words: question_words(&m.question),
            })
            .collect();

        let max_volume = entries
            .iter()
            .map(|e| e.market.volume_24h)
            .filter(|v| v.is_finite())
            .fold(0.0_f64, f64::max);

        Self {
            entries,
            weights: weights.clone(),
            generation: entry.generation(),
            now: entry.fetched_wall(),
            max_volume,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Candidates with at least one matched term, best first. Ties go to
    /// higher volume, then earlier close time, then market id.
    pub fn search(
        &self,
        terms: &BTreeSet<String>,
        filters: &SearchFilters,
    ) -> std::vec::IntoIter<SearchCandidate> {
        let mut candidates: Vec<SearchCandidate> = self
            .entries
            .iter()
            .filter(|e| filters.admits(&e.market))
            .filter_map(|e| {
                let matched = keyword_overlap(terms, &e.text, &e.words);
                if matched.is_empty() {
                    return None;
                }
                let score = self.score(&e.market, matched.len());
                Some(SearchCandidate {
                    market: Arc::clone(&e.market),
                    score,
                    matched,
                })
            })
            .collect();

        candidates.sort_by(rank);

        debug!(
            generation = self.generation,
            terms = ?terms,
            hits = candidates.len(),
            top = ?candidates.first().map(|c| (&c.market.id, c.score)),
            "index search"
        );
        candidates.into_iter()
    }

    fn score(&self, market: &Market, overlap: usize) -> f64 {
        let volume = if self.max_volume > 0.0 && market.volume_24h.is_finite() {
            (market.volume_24h / self.max_volume).clamp(0.0, 1.0)
        } else {
            0.0
        };
        overlap as f64 * self.weights.text
            + volume * self.weights.volume
            + recency_bonus(market.close_time, self.now, &self.weights)
    }
}

/// Terms that occur in the question. Short terms must equal a whole word;
/// longer ones may match inside a word ("elect" → "election").
pub fn keyword_overlap(
    terms: &BTreeSet<String>,
    text: &str,
    words: &BTreeSet<String>,
) -> BTreeSet<String> {
    terms
        .iter()
        .filter(|t| {
            if t.chars().count() < MIN_SUBSTRING_TERM_LEN {
                words.contains(*t)
            } else {
                text.contains(t.as_str())
            }
        })
        .cloned()
        .collect()
}

/// Linear bonus for markets closing within the recency window after `now`.
/// Already-closed or undated markets get nothing.
pub fn recency_bonus(close_time: Option<DateTime<Utc>>, now: DateTime<Utc>, weights: &ScoringWeights) -> f64 {
    let Some(close) = close_time else {
        return 0.0;
    };
    let window = weights.recency_window.as_secs_f64();
    if window <= 0.0 || close <= now {
        return 0.0;
    }
    let remaining = (close - now).num_milliseconds() as f64 / 1000.0;
    if remaining >= window {
        return 0.0;
    }
    weights.recency_bonus * (1.0 - remaining / window)
}

fn rank(a: &SearchCandidate, b: &SearchCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.market.volume_24h.total_cmp(&a.market.volume_24h))
        .then_with(|| match (a.market.close_time, b.market.close_time) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.market.id.cmp(&b.market.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tokenize::normalize_query;
    use crate::testkit::{market, market_closing};
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap()
    }

    fn index_of(markets: Vec<Market>) -> MarketIndex {
        let entry = CacheEntry::new(1, markets, now());
        MarketIndex::build(&entry, &ScoringWeights::default())
    }

    fn ids(index: &MarketIndex, query: &str) -> Vec<String> {
        let q = normalize_query(query);
        index
            .search(&q.terms, &SearchFilters::default())
            .map(|c| c.market.id.clone())
            .collect()
    }

    #[test]
    fn more_overlap_ranks_higher() {
        let index = index_of(vec![
            market("a", "Will the Fed cut rates in March?", 100.0),
            market("b", "Will the Fed hike in June?", 100_000.0),
        ]);
        assert_eq!(ids(&index, "fed cut rates"), vec!["a", "b"]);
    }

    #[test]
    fn non_matching_markets_are_not_candidates() {
        let index = index_of(vec![
            market("a", "Will it rain in Paris?", 1_000_000.0),
            market("b", "Will BTC hit 100k?", 10.0),
        ]);
        assert_eq!(ids(&index, "btc"), vec!["b"]);
        assert!(ids(&index, "ethereum").is_empty());
    }

    #[test]
    fn long_terms_match_inside_words() {
        let index = index_of(vec![market("a", "Presidential election winner 2024", 10.0)]);
        assert_eq!(ids(&index, "elect"), vec!["a"]);
    }

    #[test]
    fn short_terms_need_a_whole_word() {
        let index = index_of(vec![
            market("a", "Will AI pass the bar exam?", 10.0),
            market("b", "Will Spain win the final?", 10.0),
        ]);
        assert_eq!(ids(&index, "ai"), vec!["a"]);
    }

    #[test]
    fn equal_scores_break_on_volume_then_close_time() {
        let soon = now() + ChronoDuration::days(30);
        let later = now() + ChronoDuration::days(60);
        let index = index_of(vec![
            market_closing("late", "Trump tweet count", 500.0, later),
            market_closing("early", "Trump tweet total", 500.0, soon),
        ]);
        // Both outside the recency window, same volume: earlier close wins.
        assert_eq!(ids(&index, "trump tweet"), vec!["early", "late"]);
    }

    #[test]
    fn full_ties_fall_back_to_market_id() {
        let index = index_of(vec![
            market("small", "Trump speech", 0.0),
            market("big", "Trump rally", 0.0),
        ]);
        // Equal scores and volumes fall through to id order.
        assert_eq!(ids(&index, "trump"), vec!["big", "small"]);
    }

    #[test]
    fn recency_bonus_favours_markets_closing_soon() {
        let w = ScoringWeights::default();
        let in_six_hours = now() + ChronoDuration::hours(6);
        let in_sixty_hours = now() + ChronoDuration::hours(60);
        let near = recency_bonus(Some(in_six_hours), now(), &w);
        let far = recency_bonus(Some(in_sixty_hours), now(), &w);
        assert!(near > far && far > 0.0);
        assert_eq!(recency_bonus(Some(now() - ChronoDuration::hours(1)), now(), &w), 0.0);
        assert_eq!(recency_bonus(None, now(), &w), 0.0);
    }

    #[test]
    fn closed_markets_are_filtered_unless_requested() {
        let mut closed = market("c", "Bitcoin above 50k", 10.0);
        closed.closed = true;
        let index = index_of(vec![closed, market("o", "Bitcoin above 60k", 10.0)]);

        let q = normalize_query("bitcoin");
        let default: Vec<_> = index.search(&q.terms, &SearchFilters::default()).collect();
        assert_eq!(default.len(), 1);

        let all = SearchFilters { include_closed: true, ..Default::default() };
        assert_eq!(index.search(&q.terms, &all).count(), 2);
    }

    #[test]
    fn category_and_volume_filters() {
        let mut politics = market("p", "Senate control 2024", 10.0);
        politics.category = Category::Politics;
        let index = index_of(vec![politics, market("o", "Senate hearing", 5_000.0)]);
        let q = normalize_query("senate");

        let by_cat = SearchFilters { category: Some(Category::Politics), ..Default::default() };
        let hits: Vec<_> = index.search(&q.terms, &by_cat).map(|c| c.market.id.clone()).collect();
        assert_eq!(hits, vec!["p"]);

        let by_vol = SearchFilters { min_volume_24h: Some(1_000.0), ..Default::default() };
        let hits: Vec<_> = index.search(&q.terms, &by_vol).map(|c| c.market.id.clone()).collect();
        assert_eq!(hits, vec!["o"]);
    }

    #[test]
    fn search_is_deterministic_and_restartable() {
        let index = index_of(vec![
            market("a", "Trump wins 2024", 500_000.0),
            market("b", "Trump debates Biden", 20_000.0),
            market("c", "Trump popular vote", 15_000.0),
            market("d", "Trump popular vote margin", 15_000.0),
        ]);
        let first = ids(&index, "trump popular");
        for _ in 0..5 {
            assert_eq!(ids(&index, "trump popular"), first);
        }
    }

    #[test]
    fn matched_terms_are_reported() {
        let index = index_of(vec![market("a", "Will the Fed cut rates?", 1.0)]);
        let q = normalize_query("fed cut june");
        let top = index.search(&q.terms, &SearchFilters::default()).next().unwrap();
        let matched: Vec<_> = top.matched.into_iter().collect();
        assert_eq!(matched, vec!["cut", "fed"]);
    }
}
