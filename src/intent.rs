use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use crate::error::BuildError;
use crate::guard::{round_to_tick, GuardReport, GuardResult};
use crate::resolver::Resolved;
use crate::types::{OrderKind, Outcome, Side, SizeUnit};

/// A fully validated order, ready for a venue. Immutable once built; a
/// replacement order is a new intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderIntent {
    market_id: String,
    token_id: String,
    outcome: Outcome,
    side: Side,
    price: Decimal,
    size: Decimal,
    size_unit: SizeUnit,
    shares: Decimal,
    kind: OrderKind,
    post_only: bool,
    implied_probability: Decimal,
    created_at: DateTime<Utc>,
}

impl OrderIntent {
    pub fn market_id(&self) -> &str {
        &self.market_id
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn size(&self) -> Decimal {
        self.size
    }

    pub fn size_unit(&self) -> SizeUnit {
        self.size_unit
    }

    pub fn kind(&self) -> OrderKind {
        self.kind
    }

    pub fn post_only(&self) -> bool {
        self.post_only
    }

    pub fn implied_probability(&self) -> Decimal {
        self.implied_probability
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Size expressed in shares, whatever unit the order was sized in.
    pub fn shares(&self) -> Decimal {
        self.shares
    }
}

impl std::fmt::Display for OrderIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {} @ {} ({}{})",
            self.side,
            self.size,
            self.size_unit,
            self.outcome,
            self.price,
            self.kind,
            if self.post_only { ", post-only" } else { "" }
        )
    }
}

/// Turns an unambiguous resolution and a guard report into an `OrderIntent`.
///
/// A WARN report only passes with `confirm_warn(true)`. A BLOCK never passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderIntentBuilder {
    confirm_warn: bool,
    post_only: bool,
}

impl OrderIntentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn confirm_warn(mut self, confirmed: bool) -> Self {
        self.confirm_warn = confirmed;
        self
    }

    pub fn post_only(mut self, post_only: bool) -> Self {
        self.post_only = post_only;
        self
    }

    pub fn build(
        &self,
        resolved: &Resolved,
        report: &GuardReport,
        size: Decimal,
        side: Side,
    ) -> Result<OrderIntent, BuildError> {
        if size <= Decimal::ZERO {
            return Err(BuildError::NonPositiveSize(size));
        }
        if resolved.token_id != report.token_id {
            return Err(BuildError::TokenMismatch {
                resolved: resolved.token_id.clone(),
                guarded: report.token_id.clone(),
            });
        }
        if side != report.side {
            return Err(BuildError::SideMismatch {
                requested: side,
                guarded: report.side,
            });
        }

        match &report.result {
            GuardResult::Accept => {}
            GuardResult::Warn { deviation } if self.confirm_warn => {
                info!(deviation = %deviation, "price warning confirmed by caller");
            }
            GuardResult::Warn { deviation } => {
                return Err(BuildError::UnconfirmedWarning {
                    deviation_pct: (deviation * Decimal::ONE_HUNDRED).round_dp(2),
                })
            }
            GuardResult::Block(reason) => return Err(BuildError::Blocked(reason.to_string())),
        }

        let price = round_to_tick(report.price, report.tick_size);
        if price <= Decimal::ZERO || price >= Decimal::ONE {
            return Err(BuildError::PriceOutOfBounds(price));
        }

        let size_unit = SizeUnit::for_order(report.kind, side);
        let shares = match size_unit {
            SizeUnit::Shares => Some(size),
            SizeUnit::Quote => size.checked_div(price),
        }
        .filter(|s| s.checked_mul(price).is_some())
        .ok_or(BuildError::SizeTooLarge(size))?;
        if let Some(minimum) = report.quote.min_order_size {
            if shares < minimum {
                return Err(BuildError::BelowMinimumSize { size: shares.round_dp(4), minimum });
            }
        }

        if self.post_only {
            check_passive(report, side, price)?;
        }

        Ok(OrderIntent {
            market_id: resolved.market.id.clone(),
            token_id: resolved.token_id.clone(),
            outcome: resolved.outcome,
            side,
            price,
            size,
            size_unit,
            shares,
            kind: report.kind,
            post_only: self.post_only,
            implied_probability: price,
            created_at: Utc::now(),
        })
    }
}

/// A post-only order must rest. Any price at or through the opposite touch
/// would take liquidity instead.
fn check_passive(report: &GuardReport, side: Side, price: Decimal) -> Result<(), BuildError> {
    let opposite = match side {
        Side::Buy => report.quote.best_ask,
        Side::Sell => report.quote.best_bid,
    };
    let crosses = match (report.kind, side, opposite) {
        (OrderKind::Market, _, _) => true,
        (OrderKind::Limit, Side::Buy, Some(ask)) => price >= ask,
        (OrderKind::Limit, Side::Sell, Some(bid)) => price <= bid,
        (OrderKind::Limit, _, None) => false,
    };
    if crosses {
        return Err(BuildError::WouldCross {
            side,
            price,
            opposite: opposite.unwrap_or(price),
        });
    }
    Ok(())
}
