//! Free-text instruction → one market outcome token, or a short list for the
//! user to choose from.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{ResolverThresholds, ScoringWeights, MAX_DISAMBIGUATION_CANDIDATES};
use crate::error::{AppError, Result};
use crate::index::tokenize::normalized_question;
use crate::index::{normalize_query, MarketIndex, SearchCandidate, SearchFilters};
use crate::state::CacheEntry;
use crate::types::{Market, Outcome};

/// Where the traded outcome came from. Reported back so the user can confirm it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeSource {
    /// Passed by the caller.
    Explicit,
    /// A lone "yes"/"no" in the instruction text.
    Inferred,
    /// Nothing said; YES assumed.
    Default,
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub token_id: String,
    pub market: Arc<Market>,
    pub outcome: Outcome,
    pub outcome_source: OutcomeSource,
    /// Snapshot generation the market was read from.
    pub generation: u64,
}

#[derive(Debug, Clone)]
pub enum ResolutionResult {
    Unambiguous(Resolved),
    /// Two or three candidates, best first.
    NeedsDisambiguation(Vec<SearchCandidate>),
    NotFound,
}

pub struct Resolver {
    thresholds: ResolverThresholds,
    weights: ScoringWeights,
    filters: SearchFilters,
}

impl Resolver {
    pub fn new(thresholds: ResolverThresholds, weights: ScoringWeights) -> Self {
        Self {
            thresholds,
            weights,
            filters: SearchFilters::default(),
        }
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Ranked candidates for `text`, duplicates removed. Read-only lookups use
    /// this directly; `resolve` applies the confidence policy on top.
    pub fn search(&self, entry: &CacheEntry, text: &str, filters: &SearchFilters) -> Vec<SearchCandidate> {
        let query = normalize_query(text);
        if query.is_empty() {
            return Vec::new();
        }
        let index = MarketIndex::build(entry, &self.weights);
        dedupe_questions(index.search(&query.terms, filters))
    }

    pub fn resolve(&self, entry: &CacheEntry, text: &str, hint: Option<Outcome>) -> ResolutionResult {
        let query = normalize_query(text);
        let (outcome, outcome_source) = pick_outcome(hint, query.outcome);

        if query.is_empty() {
            debug!(text, "instruction has no searchable terms");
            return ResolutionResult::NotFound;
        }

        let index = MarketIndex::build(entry, &self.weights);
        let candidates = dedupe_questions(index.search(&query.terms, &self.filters));

        match decide(candidates, &self.thresholds) {
            Decision::NotFound => ResolutionResult::NotFound,
            Decision::Confident(top) => {
                info!(
                    market_id = %top.market.id,
                    score = top.score,
                    outcome = %outcome,
                    "Resolved \"{text}\" → {}",
                    top.market.question
                );
                ResolutionResult::Unambiguous(resolved(top.market, outcome, outcome_source, entry.generation()))
            }
            Decision::Ambiguous(shortlist) => {
                debug!(
                    candidates = shortlist.len(),
                    top_score = shortlist[0].score,
                    second_score = shortlist[1].score,
                    "\"{text}\" needs disambiguation"
                );
                ResolutionResult::NeedsDisambiguation(shortlist)
            }
        }
    }

    /// Resolves a market the caller already picked, e.g. from a disambiguation
    /// prompt. `text` is the original instruction, still used for the outcome.
    pub fn resolve_by_id(
        &self,
        entry: &CacheEntry,
        market_id: &str,
        text: &str,
        hint: Option<Outcome>,
    ) -> Result<Resolved> {
        let market = entry
            .find(market_id)
            .cloned()
            .ok_or_else(|| AppError::UnknownMarket(market_id.to_string()))?;
        let (outcome, source) = pick_outcome(hint, normalize_query(text).outcome);
        Ok(resolved(market, outcome, source, entry.generation()))
    }
}

fn resolved(market: Arc<Market>, outcome: Outcome, outcome_source: OutcomeSource, generation: u64) -> Resolved {
    Resolved {
        token_id: market.token(outcome).token_id.clone(),
        market,
        outcome,
        outcome_source,
        generation,
    }
}

fn pick_outcome(hint: Option<Outcome>, inferred: Option<Outcome>) -> (Outcome, OutcomeSource) {
    match (hint, inferred) {
        (Some(o), _) => (o, OutcomeSource::Explicit),
        (None, Some(o)) => (o, OutcomeSource::Inferred),
        (None, None) => (Outcome::Yes, OutcomeSource::Default),
    }
}

/// Markets sharing a normalized question are one market; the best-ranked copy wins.
fn dedupe_questions(ranked: impl Iterator<Item = SearchCandidate>) -> Vec<SearchCandidate> {
    let mut seen = HashSet::new();
    ranked
        .filter(|c| seen.insert(normalized_question(&c.market.question)))
        .collect()
}

#[derive(Debug)]
pub enum Decision {
    NotFound,
    Confident(SearchCandidate),
    Ambiguous(Vec<SearchCandidate>),
}

/// Two-threshold policy over ranked candidates: the top must clear the
/// absolute floor AND beat the runner-up by the ratio or the gap. A lone
/// candidate is confident by construction.
pub fn decide(mut ranked: Vec<SearchCandidate>, t: &ResolverThresholds) -> Decision {
    match ranked.len() {
        0 => Decision::NotFound,
        1 => Decision::Confident(ranked.remove(0)),
        _ => {
            let top = ranked[0].score;
            let second = ranked[1].score;
            let ratio = if second > 0.0 { top / second } else { f64::INFINITY };
            let clears_margin = top > second && (ratio >= t.min_ratio || top - second >= t.min_gap);

            if clears_margin && top >= t.confidence_floor {
                Decision::Confident(ranked.remove(0))
            } else {
                ranked.truncate(MAX_DISAMBIGUATION_CANDIDATES);
                Decision::Ambiguous(ranked)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::market;
    use chrono::Utc;

    fn entry(markets: Vec<Market>) -> CacheEntry {
        CacheEntry::new(7, markets, Utc::now())
    }

    fn resolver() -> Resolver {
        Resolver::new(ResolverThresholds::default(), ScoringWeights::default())
    }

    fn candidate(id: &str, score: f64) -> SearchCandidate {
        SearchCandidate {
            market: Arc::new(market(id, id, 0.0)),
            score,
            matched: Default::default(),
        }
    }

    fn trump_markets() -> Vec<Market> {
        vec![
            market("m1", "Trump wins 2024", 500_000.0),
            market("m2", "Trump debates Biden", 20_000.0),
            market("m3", "Trump popular vote", 15_000.0),
        ]
    }

    #[test]
    fn scenario_trump_election_needs_disambiguation_under_default_gap() {
        let e = entry(trump_markets());
        match resolver().resolve(&e, "Trump election", None) {
            ResolutionResult::NeedsDisambiguation(c) => {
                let ids: Vec<_> = c.iter().map(|c| c.market.id.as_str()).collect();
                assert_eq!(ids, vec!["m1", "m2", "m3"]);
            }
            other => panic!("expected disambiguation, got {other:?}"),
        }
    }

    #[test]
    fn scenario_trump_election_resolves_when_gap_clears_threshold() {
        let e = entry(trump_markets());
        let t = ResolverThresholds { min_gap: 4.0, ..Default::default() };
        let r = Resolver::new(t, ScoringWeights::default());
        match r.resolve(&e, "Trump election", None) {
            ResolutionResult::Unambiguous(res) => {
                assert_eq!(res.market.id, "m1");
                assert_eq!(res.token_id, "m1-yes");
                assert_eq!(res.generation, 7);
            }
            other => panic!("expected unambiguous, got {other:?}"),
        }
    }

    #[test]
    fn clear_winner_by_margin_is_unambiguous() {
        let d = decide(vec![candidate("a", 30.0), candidate("b", 10.0)], &ResolverThresholds::default());
        assert!(matches!(d, Decision::Confident(c) if c.market.id == "a"));
    }

    #[test]
    fn equal_top_scores_are_never_unambiguous() {
        for score in [1.0, 10.0, 50.0, 1_000.0] {
            let d = decide(
                vec![candidate("a", score), candidate("b", score), candidate("c", 0.5)],
                &ResolverThresholds::default(),
            );
            assert!(matches!(d, Decision::Ambiguous(ref c) if c.len() == 3), "score {score}");
        }
    }

    #[test]
    fn zero_score_tie_is_ambiguous_even_without_a_floor() {
        let t = ResolverThresholds { confidence_floor: 0.0, ..Default::default() };
        t.validate().unwrap();
        let d = decide(vec![candidate("a", 0.0), candidate("b", 0.0)], &t);
        assert!(matches!(d, Decision::Ambiguous(ref c) if c.len() == 2));

        let d = decide(vec![candidate("a", 0.5), candidate("b", 0.0)], &t);
        assert!(matches!(d, Decision::Confident(ref c) if c.market.id == "a"));
    }

    #[test]
    fn weak_field_stays_ambiguous_below_floor() {
        // 2.5× the runner-up, but under the absolute floor.
        let d = decide(vec![candidate("a", 5.0), candidate("b", 2.0)], &ResolverThresholds::default());
        assert!(matches!(d, Decision::Ambiguous(_)));
    }

    #[test]
    fn disambiguation_is_capped_at_three() {
        let d = decide(
            (0..6).map(|i| candidate(&format!("m{i}"), 10.0)).collect(),
            &ResolverThresholds::default(),
        );
        match d {
            Decision::Ambiguous(c) => assert_eq!(c.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn single_candidate_is_unambiguous() {
        let e = entry(vec![market("m1", "Will it snow in Denver?", 10.0), market("m2", "Fed rates", 10.0)]);
        assert!(matches!(
            resolver().resolve(&e, "snow denver", None),
            ResolutionResult::Unambiguous(r) if r.market.id == "m1"
        ));
    }

    #[test]
    fn no_match_is_not_found() {
        let e = entry(trump_markets());
        assert!(matches!(resolver().resolve(&e, "ethereum merge", None), ResolutionResult::NotFound));
        assert!(matches!(resolver().resolve(&e, "buy $20 at 0.5", None), ResolutionResult::NotFound));
    }

    #[test]
    fn duplicate_questions_collapse_to_one_market() {
        let e = entry(vec![
            market("m1", "Will it snow in Denver?", 100.0),
            market("m1-dup", "will it snow in denver", 10.0),
        ]);
        match resolver().resolve(&e, "snow denver", None) {
            ResolutionResult::Unambiguous(r) => assert_eq!(r.market.id, "m1"),
            other => panic!("expected unambiguous, got {other:?}"),
        }
    }

    #[test]
    fn outcome_defaults_to_yes_and_says_so() {
        let e = entry(vec![market("m1", "Will it snow in Denver?", 10.0)]);
        let ResolutionResult::Unambiguous(r) = resolver().resolve(&e, "snow denver", None) else {
            panic!("expected unambiguous");
        };
        assert_eq!(r.outcome, Outcome::Yes);
        assert_eq!(r.outcome_source, OutcomeSource::Default);
    }

    #[test]
    fn outcome_from_text_and_hint() {
        let e = entry(vec![market("m1", "Will it snow in Denver?", 10.0)]);
        let ResolutionResult::Unambiguous(r) = resolver().resolve(&e, "buy no snow denver", None) else {
            panic!("expected unambiguous");
        };
        assert_eq!((r.outcome, r.outcome_source), (Outcome::No, OutcomeSource::Inferred));
        assert_eq!(r.token_id, "m1-no");

        let ResolutionResult::Unambiguous(r) = resolver().resolve(&e, "buy no snow denver", Some(Outcome::Yes)) else {
            panic!("expected unambiguous");
        };
        assert_eq!((r.outcome, r.outcome_source), (Outcome::Yes, OutcomeSource::Explicit));
    }

    #[test]
    fn resolve_by_id_picks_the_requested_market() {
        let e = entry(trump_markets());
        let r = resolver().resolve_by_id(&e, "m2", "trump", Some(Outcome::No)).unwrap();
        assert_eq!(r.token_id, "m2-no");

        let r = resolver().resolve_by_id(&e, "m3", "buy no trump", None).unwrap();
        assert_eq!((r.outcome, r.outcome_source), (Outcome::No, OutcomeSource::Inferred));

        assert!(matches!(
            resolver().resolve_by_id(&e, "nope", "trump", None),
            Err(AppError::UnknownMarket(_))
        ));
    }
}
