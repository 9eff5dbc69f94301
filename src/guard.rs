//! Pre-trade price protection against the live order book.
//!
//! Every evaluation reads the book fresh. Cached listing prices are never used
//! for a price decision.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::RoundingStrategy;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{GuardConfig, RetryPolicy};
use crate::error::{AppError, Result};
use crate::fetcher::short_id;
use crate::types::{Market, OrderKind, Outcome, Side, SizeUnit};
use crate::venue::{BookQuote, BookSource};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BlockReason {
    EmptyBook,
    PriceOutOfBounds(Decimal),
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::EmptyBook => write!(f, "EmptyBook"),
            BlockReason::PriceOutOfBounds(p) => write!(f, "PriceOutOfBounds({p})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum GuardResult {
    Accept,
    /// Fractional deviation from the reference price (0.2 = 20%).
    Warn { deviation: Decimal },
    Block(BlockReason),
}

impl GuardResult {
    pub fn is_block(&self) -> bool {
        matches!(self, GuardResult::Block(_))
    }

    pub fn needs_confirmation(&self) -> bool {
        matches!(self, GuardResult::Warn { .. })
    }
}

/// Illustration of what the order risks and could win if it fills in full.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payoff {
    pub shares: Decimal,
    pub upside: Decimal,
    pub at_risk: Decimal,
}

/// The guard's verdict plus everything the caller needs to show the user.
#[derive(Debug, Clone, Serialize)]
pub struct GuardReport {
    pub token_id: String,
    pub outcome: Outcome,
    pub side: Side,
    pub kind: OrderKind,
    /// Price the order would carry, already on the tick grid.
    pub price: Decimal,
    /// Best ask for BUY, best bid for SELL.
    pub reference_price: Option<Decimal>,
    pub quote: BookQuote,
    pub tick_size: Decimal,
    pub result: GuardResult,
    pub implied_probability: Decimal,
}

impl GuardReport {
    pub fn payoff(&self, size: Decimal, unit: SizeUnit) -> Option<Payoff> {
        if self.price <= Decimal::ZERO || self.price >= Decimal::ONE || size <= Decimal::ZERO {
            return None;
        }
        let shares = match unit {
            SizeUnit::Shares => size,
            SizeUnit::Quote => size.checked_div(self.price)?,
        };
        Some(Payoff {
            shares: shares.round_dp(4),
            upside: shares.checked_mul(Decimal::ONE - self.price)?.round_dp(4),
            at_risk: shares.checked_mul(self.price)?.round_dp(4),
        })
    }
}

/// Rounds half away from zero onto the `tick` grid. A non-positive tick
/// leaves the price untouched.
pub fn round_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    let steps = (price / tick).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    (steps * tick).normalize()
}

fn in_unit_interval(price: Decimal) -> bool {
    price >= Decimal::ZERO && price <= Decimal::ONE
}

pub struct PriceGuard {
    book: Arc<dyn BookSource>,
    config: GuardConfig,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl PriceGuard {
    pub fn new(book: Arc<dyn BookSource>, config: GuardConfig, retry: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            book,
            config,
            retry,
            call_timeout,
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Checks a proposed order against the live book.
    ///
    /// Market conditions (empty book, out-of-range price) come back as
    /// `GuardResult::Block` inside `Ok`. `Err` is reserved for a malformed
    /// request or a book that could not be read.
    pub async fn evaluate(
        &self,
        market: &Market,
        outcome: Outcome,
        side: Side,
        proposed_price: Option<Decimal>,
        kind: OrderKind,
    ) -> Result<GuardReport> {
        let token_id = market.token(outcome).token_id.clone();

        let proposed = match kind {
            OrderKind::Limit => Some(proposed_price.ok_or(AppError::InvalidRequest {
                kind,
                what: "a limit price",
            })?),
            OrderKind::Market => None,
        };

        // Hopeless prices are rejected without touching the network.
        if let Some(p) = proposed.filter(|p| !in_unit_interval(*p)) {
            let report = self.report(token_id, outcome, side, kind, p, BookQuote::default(), None);
            return Ok(self.blocked(report, BlockReason::PriceOutOfBounds(p)));
        }

        let quote = self.fetch_book(&token_id).await?;
        let tick = quote.tick_size.filter(|t| *t > Decimal::ZERO).unwrap_or(self.config.default_tick_size);
        let reference = match side {
            Side::Buy => quote.best_ask,
            Side::Sell => quote.best_bid,
        }
        .filter(|r| *r > Decimal::ZERO);

        let Some(reference) = reference else {
            let price = proposed.map(|p| round_to_tick(p, tick)).unwrap_or_default();
            let report = self.report(token_id, outcome, side, kind, price, quote, None);
            return Ok(self.blocked(report, BlockReason::EmptyBook));
        };

        let (price, result) = match proposed {
            Some(p) => {
                let price = round_to_tick(p, tick);
                (price, self.check_deviation(price, reference))
            }
            None => {
                let price = match side {
                    Side::Buy => reference + tick,
                    Side::Sell => reference - tick,
                };
                let price = round_to_tick(price, tick);
                let result = if in_unit_interval(price) {
                    GuardResult::Accept
                } else {
                    GuardResult::Block(BlockReason::PriceOutOfBounds(price))
                };
                (price, result)
            }
        };

        let mut report = self.report(token_id, outcome, side, kind, price, quote, Some(reference));
        report.result = result;

        match &report.result {
            GuardResult::Accept => debug!(
                token = short_id(&report.token_id),
                %price,
                %reference,
                "guard accept"
            ),
            GuardResult::Warn { deviation } => info!(
                "[Guard] {side} {outcome} @ {price} is {}% away from {reference}; confirmation required",
                (deviation * Decimal::ONE_HUNDRED).round_dp(2)
            ),
            GuardResult::Block(reason) => warn!("[Guard] {side} {outcome} blocked: {reason}"),
        }
        Ok(report)
    }

    fn check_deviation(&self, price: Decimal, reference: Decimal) -> GuardResult {
        let deviation = (price - reference).abs() / reference;
        if deviation > self.config.max_slippage {
            GuardResult::Warn { deviation }
        } else {
            GuardResult::Accept
        }
    }

    async fn fetch_book(&self, token_id: &str) -> Result<BookQuote> {
        self.retry
            .run("book", self.call_timeout, || self.book.get_book(token_id))
            .await
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        token_id: String,
        outcome: Outcome,
        side: Side,
        kind: OrderKind,
        price: Decimal,
        quote: BookQuote,
        reference_price: Option<Decimal>,
    ) -> GuardReport {
        let tick_size = quote
            .tick_size
            .filter(|t| *t > Decimal::ZERO)
            .unwrap_or(self.config.default_tick_size);
        GuardReport {
            token_id,
            outcome,
            side,
            kind,
            price,
            reference_price,
            quote,
            tick_size,
            result: GuardResult::Accept,
            implied_probability: price,
        }
    }

    fn blocked(&self, mut report: GuardReport, reason: BlockReason) -> GuardReport {
        warn!("[Guard] {} {} on {} blocked: {reason}", report.side, report.outcome, short_id(&report.token_id));
        report.result = GuardResult::Block(reason);
        report
    }
}
