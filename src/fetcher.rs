use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::config::{Config, LISTING_PAGE_SIZE};
use crate::error::{AppError, Result};
use crate::types::{Category, Market, OutcomeToken};
use crate::venue::{BookQuote, BookSource, MarketListing};

// ---------------------------------------------------------------------------
// Gamma listing
// ---------------------------------------------------------------------------

/// Market listing backed by the Gamma REST API.
pub struct GammaListing {
    client: reqwest::Client,
    base_url: String,
    max_markets: usize,
}

impl GammaListing {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.gamma_api_url.trim_end_matches('/').to_string(),
            max_markets: cfg.cache.max_markets,
        })
    }
}

#[async_trait]
impl MarketListing for GammaListing {
    /// Pages through active markets by 24h volume descending so the cap keeps
    /// the busiest markets.
    async fn list_markets(&self) -> Result<Vec<Market>> {
        let mut pages = ListingPages::new(self.max_markets, LISTING_PAGE_SIZE);

        loop {
            let url = format!(
                "{}/markets?active=true&closed=false&limit={}&offset={}&order=volume24hr&ascending=false",
                self.base_url,
                LISTING_PAGE_SIZE,
                pages.offset()
            );

            let resp = self.client.get(&url).send().await?;
            if !resp.status().is_success() {
                return Err(AppError::fetch("gamma /markets", format!("HTTP {}", resp.status())));
            }
            let body: serde_json::Value = resp.json().await?;

            let Some(items) = body.as_array() else {
                return Err(AppError::fetch("gamma /markets", "response was not an array"));
            };
            if !pages.push_page(items) {
                break;
            }
        }

        let (markets, skipped) = pages.finish();
        info!(
            markets = markets.len(),
            skipped,
            "Gamma listing fetched {} markets ({skipped} unusable)",
            markets.len()
        );
        Ok(markets)
    }
}

/// Collects parsed markets across listing pages and stops at the cap.
#[derive(Debug)]
pub struct ListingPages {
    markets: Vec<Market>,
    skipped: usize,
    fetched: usize,
    max_markets: usize,
    page_size: usize,
}

impl ListingPages {
    pub fn new(max_markets: usize, page_size: usize) -> Self {
        Self {
            markets: Vec::new(),
            skipped: 0,
            fetched: 0,
            max_markets,
            page_size,
        }
    }

    /// Offset of the next page to request.
    pub fn offset(&self) -> usize {
        self.fetched
    }

    /// Adds one page of raw items. Returns whether another page is worth fetching.
    pub fn push_page(&mut self, items: &[serde_json::Value]) -> bool {
        self.fetched += items.len();
        for item in items {
            match parse_gamma_market(item) {
                Some(market) => {
                    self.markets.push(market);
                    if self.markets.len() >= self.max_markets {
                        return false;
                    }
                }
                None => self.skipped += 1,
            }
        }
        items.len() >= self.page_size
    }

    /// Markets kept plus the count of unusable items.
    pub fn finish(self) -> (Vec<Market>, usize) {
        (self.markets, self.skipped)
    }
}

/// Parse a Gamma market JSON object.
/// Returns None if the market is structurally unusable (missing ids, non-binary outcomes).
pub fn parse_gamma_market(v: &serde_json::Value) -> Option<Market> {
    let id = v.get("conditionId")?.as_str()?.to_string();
    if id.is_empty() {
        return None;
    }

    let token_ids: Vec<String> = json_string_list(v.get("clobTokenIds")?)?;
    let outcomes: Vec<String> = json_string_list(v.get("outcomes")?)?;
    if token_ids.len() != 2 || outcomes.len() != 2 {
        return None;
    }

    let yes_idx = outcomes.iter().position(|o| {
        o.eq_ignore_ascii_case("Yes") || o.eq_ignore_ascii_case("Up")
    });
    let (yes_idx, no_idx) = match yes_idx {
        Some(y) => (y, 1 - y),
        None => (0, 1),
    };

    // Gamma quotes the first listed outcome; the other side mirrors it.
    let first_bid = number_field(v, "bestBid");
    let first_ask = number_field(v, "bestAsk");
    let mirrored_bid = first_ask.map(|a| 1.0 - a);
    let mirrored_ask = first_bid.map(|b| 1.0 - b);
    let quote = |idx: usize| {
        if idx == 0 {
            (first_bid, first_ask)
        } else {
            (mirrored_bid, mirrored_ask)
        }
    };
    let (yes_bid, yes_ask) = quote(yes_idx);
    let (no_bid, no_ask) = quote(no_idx);

    let question = v
        .get("question")
        .and_then(|q| q.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    if question.is_empty() {
        return None;
    }

    let slug = v
        .get("slug")
        .and_then(|s| s.as_str())
        .unwrap_or("")
        .to_string();

    let category = v
        .get("category")
        .and_then(|c| c.as_str())
        .or_else(|| {
            v.get("events")
                .and_then(|e| e.as_array())
                .and_then(|a| a.first())
                .and_then(|e| e.get("category"))
                .and_then(|c| c.as_str())
        })
        .and_then(|c| c.parse::<Category>().ok())
        .unwrap_or(Category::Other);

    let close_time = v
        .get("endDate")
        .or_else(|| v.get("endDateIso"))
        .and_then(|e| e.as_str())
        .and_then(parse_close_time);

    Some(Market {
        id,
        question,
        slug,
        category,
        yes: OutcomeToken {
            token_id: token_ids[yes_idx].clone(),
            best_bid: yes_bid,
            best_ask: yes_ask,
        },
        no: OutcomeToken {
            token_id: token_ids[no_idx].clone(),
            best_bid: no_bid,
            best_ask: no_ask,
        },
        volume_24h: number_field(v, "volume24hr").unwrap_or(0.0),
        active: v.get("active").and_then(|a| a.as_bool()).unwrap_or(true),
        closed: v.get("closed").and_then(|c| c.as_bool()).unwrap_or(false),
        close_time,
    })
}

/// Gamma encodes lists as JSON strings (`"[\"Yes\", \"No\"]"`), sometimes as real arrays.
fn json_string_list(v: &serde_json::Value) -> Option<Vec<String>> {
    match v {
        serde_json::Value::String(s) => serde_json::from_str(s).ok(),
        serde_json::Value::Array(_) => serde_json::from_value(v.clone()).ok(),
        _ => None,
    }
}

fn number_field(v: &serde_json::Value, key: &str) -> Option<f64> {
    v.get(key)
        .and_then(|x| x.as_f64().or_else(|| x.as_str().and_then(|s| s.parse().ok())))
}

/// Accepts full RFC 3339 timestamps and bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_close_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

// ---------------------------------------------------------------------------
// CLOB order book
// ---------------------------------------------------------------------------

/// Live top of book from the CLOB REST `/book` endpoint.
pub struct ClobBook {
    client: reqwest::Client,
    base_url: String,
}

impl ClobBook {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.clob_api_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BookSource for ClobBook {
    async fn get_book(&self, token_id: &str) -> Result<BookQuote> {
        let url = format!("{}/book?token_id={}", self.base_url, token_id);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            debug!(token_id, "no orderbook for token");
        }
        let body = resp.text().await?;
        book_from_response(status, &body)
    }
}

/// The CLOB answers 404 "No orderbook exists" for tokens nobody quotes; that
/// is an empty book, not a failure.
pub fn book_from_response(status: StatusCode, body: &str) -> Result<BookQuote> {
    if status == StatusCode::NOT_FOUND {
        return Ok(BookQuote::default());
    }
    if !status.is_success() {
        return Err(AppError::fetch("clob /book", format!("HTTP {status}")));
    }
    let v: serde_json::Value = serde_json::from_str(body)?;
    Ok(parse_book(&v))
}

/// Best levels are taken as the max bid / min ask rather than by position,
/// since the CLOB does not promise a level ordering.
pub fn parse_book(v: &serde_json::Value) -> BookQuote {
    BookQuote {
        best_bid: levels(v, "bids").max(),
        best_ask: levels(v, "asks").min(),
        tick_size: decimal_field(v, "tick_size").filter(|t| *t > Decimal::ZERO),
        min_order_size: decimal_field(v, "min_order_size").filter(|m| *m > Decimal::ZERO),
    }
}

fn levels<'a>(v: &'a serde_json::Value, side: &str) -> impl Iterator<Item = Decimal> + 'a {
    v.get(side)
        .and_then(|a| a.as_array())
        .map(|a| a.as_slice())
        .unwrap_or(&[])
        .iter()
        .filter(|level| decimal_field(level, "size").is_some_and(|s| s > Decimal::ZERO))
        .filter_map(|level| decimal_field(level, "price"))
}

fn decimal_field(v: &serde_json::Value, key: &str) -> Option<Decimal> {
    match v.get(key)? {
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok(),
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

/// Used for log lines.
pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
