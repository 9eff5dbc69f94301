//! Fakes and builders shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::error::{AppError, Result};
use crate::types::{Category, Market, OutcomeToken};
use crate::venue::{BookQuote, BookSource, MarketListing};

pub fn market(id: &str, question: &str, volume_24h: f64) -> Market {
    Market {
        id: id.to_string(),
        question: question.to_string(),
        slug: id.to_string(),
        category: Category::Other,
        yes: OutcomeToken {
            token_id: format!("{id}-yes"),
            best_bid: None,
            best_ask: None,
        },
        no: OutcomeToken {
            token_id: format!("{id}-no"),
            best_bid: None,
            best_ask: None,
        },
        volume_24h,
        active: true,
        closed: false,
        close_time: None,
    }
}

pub fn market_closing(id: &str, question: &str, volume_24h: f64, close_time: DateTime<Utc>) -> Market {
    Market {
        close_time: Some(close_time),
        ..market(id, question, volume_24h)
    }
}

// ---------------------------------------------------------------------------
// FakeListing
// ---------------------------------------------------------------------------

pub struct FakeListing {
    markets: Mutex<Vec<Market>>,
    calls: AtomicUsize,
    failing: AtomicBool,
    fail_next: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl FakeListing {
    pub fn new(markets: Vec<Market>) -> Arc<Self> {
        Arc::new(Self {
            markets: Mutex::new(markets),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            delay: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn set_markets(&self, markets: Vec<Market>) {
        *self.markets.lock() = markets;
    }
}

#[async_trait]
impl MarketListing for FakeListing {
    async fn list_markets(&self) -> Result<Vec<Market>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::fetch("fake listing", "unreachable"));
        }
        let pending = self.fail_next.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next.store(pending - 1, Ordering::SeqCst);
            return Err(AppError::fetch("fake listing", "flaky"));
        }
        Ok(self.markets.lock().clone())
    }
}

// ---------------------------------------------------------------------------
// FakeBook
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeBook {
    quotes: Mutex<HashMap<String, BookQuote>>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl FakeBook {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_quote(&self, token_id: &str, best_bid: Option<Decimal>, best_ask: Option<Decimal>) {
        self.quotes.lock().insert(
            token_id.to_string(),
            BookQuote {
                best_bid,
                best_ask,
                tick_size: None,
                min_order_size: None,
            },
        );
    }

    pub fn set_full_quote(&self, token_id: &str, quote: BookQuote) {
        self.quotes.lock().insert(token_id.to_string(), quote);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl BookSource for FakeBook {
    async fn get_book(&self, token_id: &str) -> Result<BookQuote> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::fetch("fake book", "unreachable"));
        }
        Ok(self.quotes.lock().get(token_id).cloned().unwrap_or_default())
    }
}
