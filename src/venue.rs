//! Contracts for the external collaborators: market listing, live order book
//! and order placement. The core only ever talks to these traits.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::Result;
use crate::intent::OrderIntent;
use crate::types::{Market, OrderId};

/// Top of book for one outcome token, plus the venue's trading constraints
/// when it reports them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BookQuote {
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub tick_size: Option<Decimal>,
    pub min_order_size: Option<Decimal>,
}

impl BookQuote {
    pub fn is_empty(&self) -> bool {
        self.best_bid.is_none() && self.best_ask.is_none()
    }
}

#[async_trait]
pub trait MarketListing: Send + Sync {
    /// Full list of markets known to the venue. Idempotent.
    async fn list_markets(&self) -> Result<Vec<Market>>;
}

#[async_trait]
pub trait BookSource: Send + Sync {
    /// Live top of book. An empty book is `Ok` with both sides `None`.
    async fn get_book(&self, token_id: &str) -> Result<BookQuote>;
}

#[async_trait]
pub trait OrderVenue: Send + Sync {
    /// Places an order. Never retried by the caller.
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderId>;

    /// Fails with `AppError::OrderNotFound` for unknown ids.
    async fn cancel(&self, order_id: &OrderId) -> Result<()>;

    /// Returns how many orders were cancelled.
    async fn cancel_all(&self) -> Result<usize>;

    fn venue_name(&self) -> &'static str;
}
