use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    /// Condition id.
    pub id: String,
    pub question: String,
    pub slug: String,
    pub category: Category,
    pub yes: OutcomeToken,
    pub no: OutcomeToken,
    pub volume_24h: f64,
    pub active: bool,
    pub closed: bool,
    pub close_time: Option<DateTime<Utc>>,
}

/// One tradable side of a binary market, with the listing's last known quote.
/// These prices are metadata only; order decisions always read the live book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeToken {
    pub token_id: String,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
}

impl Market {
    pub fn token(&self, outcome: Outcome) -> &OutcomeToken {
        match outcome {
            Outcome::Yes => &self.yes,
            Outcome::No => &self.no,
        }
    }

    pub fn is_tradable(&self) -> bool {
        self.active && !self.closed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Sports,
    Weather,
    Crypto,
    Politics,
    Economics,
    Other,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Sports => "sports",
            Category::Weather => "weather",
            Category::Crypto => "crypto",
            Category::Politics => "politics",
            Category::Economics => "economics",
            Category::Other => "other",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "sports" => Category::Sports,
            "weather" => Category::Weather,
            "crypto" => Category::Crypto,
            "politics" => Category::Politics,
            "economics" => Category::Economics,
            _ => Category::Other,
        })
    }
}

// ---------------------------------------------------------------------------
// Trading vocabulary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    /// Recognizes a bare outcome word as typed by a user.
    pub fn from_word(word: &str) -> Option<Self> {
        match word.to_lowercase().as_str() {
            "yes" | "y" => Some(Outcome::Yes),
            "no" | "n" => Some(Outcome::No),
            _ => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Yes => write!(f, "YES"),
            Outcome::No => write!(f, "NO"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// LIMIT rests at the caller's price; MARKET is a synthetic aggressive limit
/// priced one tick through the touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderKind {
    Limit,
    Market,
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderKind::Limit => write!(f, "LIMIT"),
            OrderKind::Market => write!(f, "MARKET"),
        }
    }
}

/// What an intent's `size` counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeUnit {
    Shares,
    /// Quote currency (USDC) to spend.
    Quote,
}

impl SizeUnit {
    /// Market buys are sized in quote currency; everything else in shares.
    pub fn for_order(kind: OrderKind, side: Side) -> Self {
        match (kind, side) {
            (OrderKind::Market, Side::Buy) => SizeUnit::Quote,
            _ => SizeUnit::Shares,
        }
    }
}

impl std::fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SizeUnit::Shares => write!(f, "shares"),
            SizeUnit::Quote => write!(f, "USDC"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
