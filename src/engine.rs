//! The single entry point the CLI drives: resolve an instruction, price it
//! against the live book, and hand back either an order or the question the
//! user has to answer next.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::guard::{BlockReason, GuardReport, GuardResult, PriceGuard};
use crate::index::{SearchCandidate, SearchFilters};
use crate::intent::{OrderIntent, OrderIntentBuilder};
use crate::resolver::{ResolutionResult, Resolved, Resolver};
use crate::state::MarketCache;
use crate::types::{OrderId, OrderKind, Outcome, Side};
use crate::venue::{BookSource, MarketListing, OrderVenue};

#[derive(Debug, Clone)]
pub struct TradeRequest {
    pub text: String,
    pub outcome_hint: Option<Outcome>,
    pub side: Side,
    pub size: Decimal,
    pub kind: OrderKind,
    pub limit_price: Option<Decimal>,
    pub post_only: bool,
    pub confirm_warn: bool,
    /// Skips fuzzy resolution, e.g. after the user picked from a shortlist.
    pub market_id: Option<String>,
}

impl TradeRequest {
    pub fn limit(text: impl Into<String>, side: Side, size: Decimal, price: Decimal) -> Self {
        Self {
            text: text.into(),
            outcome_hint: None,
            side,
            size,
            kind: OrderKind::Limit,
            limit_price: Some(price),
            post_only: false,
            confirm_warn: false,
            market_id: None,
        }
    }

    pub fn market(text: impl Into<String>, side: Side, size: Decimal) -> Self {
        Self {
            kind: OrderKind::Market,
            limit_price: None,
            ..Self::limit(text, side, size, Decimal::ZERO)
        }
    }
}

#[derive(Debug, Clone)]
pub struct PricedOrder {
    pub resolved: Resolved,
    pub report: GuardReport,
    pub intent: OrderIntent,
}

/// What `resolve_and_price` hands back when it does not fail outright.
#[derive(Debug, Clone)]
pub enum EngineOutcome {
    Ready(PricedOrder),
    /// Pick one and retry with `market_id` set.
    NeedsInput(Vec<SearchCandidate>),
    /// Retry with `confirm_warn` set to proceed.
    NeedsConfirmation { resolved: Resolved, report: GuardReport },
}

#[derive(Debug, Clone)]
pub struct SearchResults {
    pub candidates: Vec<SearchCandidate>,
    pub generation: u64,
    /// The listing could not be refreshed; results come from an older snapshot.
    pub stale: bool,
}

pub struct TradeEngine {
    cache: Arc<MarketCache>,
    resolver: Resolver,
    guard: PriceGuard,
    venue: Arc<dyn OrderVenue>,
    submit_timeout: Duration,
}

impl TradeEngine {
    pub fn new(
        cfg: &Config,
        listing: Arc<dyn MarketListing>,
        book: Arc<dyn BookSource>,
        venue: Arc<dyn OrderVenue>,
    ) -> Self {
        let cache = MarketCache::new(listing, &cfg.cache, cfg.retry.clone(), cfg.request_timeout);
        Self {
            cache,
            resolver: Resolver::new(cfg.resolver.clone(), cfg.scoring.clone()),
            guard: PriceGuard::new(book, cfg.guard.clone(), cfg.retry.clone(), cfg.request_timeout),
            venue,
            submit_timeout: cfg.request_timeout,
        }
    }

    pub fn cache(&self) -> &Arc<MarketCache> {
        &self.cache
    }

    pub fn venue_name(&self) -> &'static str {
        self.venue.venue_name()
    }

    /// Read-only lookup. Falls back to a stale snapshot when the listing is down.
    pub async fn search(&self, text: &str, filters: &SearchFilters, limit: usize) -> Result<SearchResults> {
        let view = self.cache.get_markets().await?;
        let mut candidates = self.resolver.search(&view.entry, text, filters);
        candidates.truncate(limit);
        Ok(SearchResults {
            candidates,
            generation: view.entry.generation(),
            stale: view.stale,
        })
    }

    /// Resolves `req.text` to one outcome token, checks the price against the
    /// live book and builds the order.
    ///
    /// No match is `Err(NotFound)`. A blocked price is `Err(EmptyBook)` or
    /// `Err(PriceOutOfBounds)` whatever the confirmation flag says.
    pub async fn resolve_and_price(&self, req: &TradeRequest) -> Result<EngineOutcome> {
        let entry = self.cache.get_markets_for_trade().await?;

        let resolved = match &req.market_id {
            Some(id) => self.resolver.resolve_by_id(&entry, id, &req.text, req.outcome_hint)?,
            None => match self.resolver.resolve(&entry, &req.text, req.outcome_hint) {
                ResolutionResult::Unambiguous(r) => r,
                ResolutionResult::NeedsDisambiguation(candidates) => {
                    return Ok(EngineOutcome::NeedsInput(candidates))
                }
                ResolutionResult::NotFound => return Err(AppError::NotFound(req.text.clone())),
            },
        };

        let report = self
            .guard
            .evaluate(&resolved.market, resolved.outcome, req.side, req.limit_price, req.kind)
            .await?;

        match report.result {
            GuardResult::Block(BlockReason::EmptyBook) => return Err(AppError::EmptyBook(report.token_id)),
            GuardResult::Block(BlockReason::PriceOutOfBounds(p)) => return Err(AppError::PriceOutOfBounds(p)),
            GuardResult::Warn { .. } if !req.confirm_warn => {
                return Ok(EngineOutcome::NeedsConfirmation { resolved, report })
            }
            _ => {}
        }

        let intent = OrderIntentBuilder::new()
            .confirm_warn(req.confirm_warn)
            .post_only(req.post_only)
            .build(&resolved, &report, req.size, req.side)?;

        info!(
            market_id = %resolved.market.id,
            generation = resolved.generation,
            "Order ready: {intent}"
        );
        Ok(EngineOutcome::Ready(PricedOrder { resolved, report, intent }))
    }

    /// Places the order once. A timeout is reported as uncertain, never retried.
    pub async fn submit(&self, intent: &OrderIntent) -> Result<OrderId> {
        match timeout(self.submit_timeout, self.venue.submit(intent)).await {
            Ok(res) => res,
            Err(_) => {
                warn!("[Submit] no answer from {} within {:?}", self.venue.venue_name(), self.submit_timeout);
                Err(AppError::SubmitUncertain(format!(
                    "{} did not answer within {}ms",
                    self.venue.venue_name(),
                    self.submit_timeout.as_millis()
                )))
            }
        }
    }

    pub async fn cancel(&self, order_id: &OrderId) -> Result<()> {
        match timeout(self.submit_timeout, self.venue.cancel(order_id)).await {
            Ok(res) => res,
            Err(_) => Err(AppError::SubmitUncertain(format!("cancel of {order_id} did not complete"))),
        }
    }

    pub async fn cancel_all(&self) -> Result<usize> {
        match timeout(self.submit_timeout, self.venue.cancel_all()).await {
            Ok(res) => res,
            Err(_) => Err(AppError::SubmitUncertain("cancel-all did not complete".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use crate::paper::PaperVenue;
    use crate::testkit::{market, FakeBook, FakeListing};

    fn engine_with(listing: Arc<FakeListing>, book: Arc<FakeBook>, venue: Arc<dyn OrderVenue>) -> TradeEngine {
        let cfg = Config {
            retry: crate::config::RetryPolicy::once(),
            request_timeout: Duration::from_secs(1),
            ..Config::default()
        };
        TradeEngine::new(&cfg, listing, book, venue)
    }

    fn snow_listing() -> Arc<FakeListing> {
        FakeListing::new(vec![
            market("snow", "Will it snow in Denver on Christmas?", 1_000.0),
            market("fed", "Will the Fed cut rates in March?", 50_000.0),
        ])
    }

    fn trump_listing() -> Arc<FakeListing> {
        FakeListing::new(vec![
            market("m1", "Trump wins 2024", 500_000.0),
            market("m2", "Trump debates Biden", 20_000.0),
            market("m3", "Trump popular vote", 15_000.0),
        ])
    }

    #[tokio::test]
    async fn clear_instruction_yields_an_order() {
        let book = FakeBook::new();
        book.set_quote("snow-no", Some(dec!(0.70)), Some(dec!(0.72)));
        let engine = engine_with(snow_listing(), book, Arc::new(PaperVenue::new()));

        let req = TradeRequest::limit("buy NO on snow in denver", Side::Buy, dec!(20), dec!(0.72));
        let EngineOutcome::Ready(order) = engine.resolve_and_price(&req).await.unwrap() else {
            panic!("expected an order");
        };
        assert_eq!(order.intent.token_id(), "snow-no");
        assert_eq!(order.intent.price(), dec!(0.72));

        let id = engine.submit(&order.intent).await.unwrap();
        engine.cancel(&id).await.unwrap();
    }

    #[tokio::test]
    async fn ambiguous_instruction_asks_then_resolves_by_id() {
        let book = FakeBook::new();
        book.set_quote("m2-yes", Some(dec!(0.30)), Some(dec!(0.31)));
        let engine = engine_with(trump_listing(), book, Arc::new(PaperVenue::new()));

        let mut req = TradeRequest::limit("Trump election", Side::Buy, dec!(10), dec!(0.31));
        let EngineOutcome::NeedsInput(candidates) = engine.resolve_and_price(&req).await.unwrap() else {
            panic!("expected disambiguation");
        };
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].market.id, "m1");

        req.market_id = Some(candidates[1].market.id.clone());
        let EngineOutcome::Ready(order) = engine.resolve_and_price(&req).await.unwrap() else {
            panic!("expected an order");
        };
        assert_eq!(order.intent.market_id(), "m2");
    }

    #[tokio::test]
    async fn unknown_instruction_is_not_found() {
        let engine = engine_with(snow_listing(), FakeBook::new(), Arc::new(PaperVenue::new()));
        let req = TradeRequest::market("ethereum merge", Side::Buy, dec!(5));
        assert!(matches!(engine.resolve_and_price(&req).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn warning_round_trip_through_confirmation() {
        let book = FakeBook::new();
        book.set_quote("snow-yes", Some(dec!(0.48)), Some(dec!(0.50)));
        let engine = engine_with(snow_listing(), book, Arc::new(PaperVenue::new()));

        let mut req = TradeRequest::limit("snow denver", Side::Buy, dec!(10), dec!(0.60));
        let outcome = engine.resolve_and_price(&req).await.unwrap();
        let EngineOutcome::NeedsConfirmation { report, .. } = outcome else {
            panic!("expected a confirmation request");
        };
        assert_eq!(report.result, GuardResult::Warn { deviation: dec!(0.2) });

        req.confirm_warn = true;
        assert!(matches!(engine.resolve_and_price(&req).await.unwrap(), EngineOutcome::Ready(_)));
    }

    #[tokio::test]
    async fn empty_book_fails_even_when_confirmed() {
        let engine = engine_with(snow_listing(), FakeBook::new(), Arc::new(PaperVenue::new()));
        let mut req = TradeRequest::limit("snow denver", Side::Buy, dec!(10), dec!(0.5));
        req.confirm_warn = true;
        assert!(matches!(engine.resolve_and_price(&req).await, Err(AppError::EmptyBook(_))));
    }

    #[tokio::test]
    async fn build_rejections_surface_as_errors() {
        let book = FakeBook::new();
        book.set_quote("snow-yes", Some(dec!(0.48)), Some(dec!(0.50)));
        let engine = engine_with(snow_listing(), book, Arc::new(PaperVenue::new()));

        let req = TradeRequest::limit("snow denver", Side::Buy, dec!(0), dec!(0.5));
        assert!(matches!(
            engine.resolve_and_price(&req).await,
            Err(AppError::Build(crate::error::BuildError::NonPositiveSize(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_listing_is_refused_for_trading_but_served_for_search() {
        let listing = snow_listing();
        let book = FakeBook::new();
        book.set_quote("snow-yes", Some(dec!(0.48)), Some(dec!(0.50)));
        let engine = engine_with(listing.clone(), book, Arc::new(PaperVenue::new()));

        let results = engine.search("snow", &SearchFilters::default(), 5).await.unwrap();
        assert!(!results.stale);

        tokio::time::advance(engine.cache().ttl() + Duration::from_secs(1)).await;
        listing.set_failing(true);

        let results = engine.search("snow", &SearchFilters::default(), 5).await.unwrap();
        assert!(results.stale);
        assert_eq!(results.candidates.len(), 1);

        let req = TradeRequest::limit("snow denver", Side::Buy, dec!(10), dec!(0.5));
        assert!(matches!(engine.resolve_and_price(&req).await, Err(AppError::Fetch { .. })));
    }

    struct HangingVenue {
        submits: AtomicUsize,
    }

    #[async_trait]
    impl OrderVenue for HangingVenue {
        async fn submit(&self, _intent: &OrderIntent) -> Result<OrderId> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }

        async fn cancel(&self, _order_id: &OrderId) -> Result<()> {
            std::future::pending().await
        }

        async fn cancel_all(&self) -> Result<usize> {
            Ok(0)
        }

        fn venue_name(&self) -> &'static str {
            "hanging"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn submit_timeout_is_uncertain_and_not_retried() {
        let book = FakeBook::new();
        book.set_quote("snow-yes", Some(dec!(0.48)), Some(dec!(0.50)));
        let venue = Arc::new(HangingVenue { submits: AtomicUsize::new(0) });
        let engine = engine_with(snow_listing(), book, venue.clone());

        let req = TradeRequest::limit("snow denver", Side::Buy, dec!(10), dec!(0.5));
        let EngineOutcome::Ready(order) = engine.resolve_and_price(&req).await.unwrap() else {
            panic!("expected an order");
        };

        let err = engine.submit(&order.intent).await.unwrap_err();
        assert!(matches!(err, AppError::SubmitUncertain(_)));
        assert!(!err.is_retryable());
        assert_eq!(venue.submits.load(Ordering::SeqCst), 1);

        assert!(matches!(
            engine.cancel(&OrderId("x".into())).await,
            Err(AppError::SubmitUncertain(_))
        ));
    }
}
