use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::OrderKind;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Fetch error ({what}): {reason}")]
    Fetch { what: String, reason: String },

    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("No market matches \"{0}\"")]
    NotFound(String),

    #[error("Unknown market id {0}")]
    UnknownMarket(String),

    #[error("Price {0} is outside [0, 1]")]
    PriceOutOfBounds(Decimal),

    #[error("Order book for token {0} is empty")]
    EmptyBook(String),

    #[error("{kind} order needs {what}")]
    InvalidRequest { kind: OrderKind, what: &'static str },

    #[error("Order build rejected: {0}")]
    Build(#[from] BuildError),

    #[error("Order submission failed: {0}")]
    Submit(String),

    #[error("Order submission outcome unknown: {0}")]
    SubmitUncertain(String),

    #[error("Order {0} not found")]
    OrderNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn fetch(what: impl Into<String>, reason: impl ToString) -> Self {
        AppError::Fetch {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// True for transient read-path failures. Only these are retried, and only
    /// on idempotent calls.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Http(_) | AppError::Json(_) | AppError::Fetch { .. } | AppError::Timeout { .. }
        )
    }

    /// Follow-up text shown to the user alongside the error.
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            AppError::Http(_) | AppError::Json(_) | AppError::Fetch { .. } | AppError::Timeout { .. } => {
                Some("market data is unreachable right now; try again shortly")
            }
            AppError::NotFound(_) => Some("rephrase the instruction with words from the market question"),
            AppError::UnknownMarket(_) => Some("the market list changed; search again"),
            AppError::PriceOutOfBounds(_) => Some("prices are probabilities and must lie strictly between 0 and 1"),
            AppError::EmptyBook(_) => Some("nobody is quoting this outcome; place no order or try later"),
            AppError::InvalidRequest { .. } => Some("pass --price for limit orders"),
            AppError::Build(e) => Some(e.guidance()),
            AppError::Submit(_) | AppError::SubmitUncertain(_) => {
                Some("check your open orders before resubmitting to avoid a duplicate")
            }
            AppError::OrderNotFound(_) => Some("the order may already be filled or cancelled"),
            AppError::Config(_) | AppError::Io(_) => None,
        }
    }
}

/// Reasons an order intent cannot be built from a resolution and guard report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("size must be positive, got {0}")]
    NonPositiveSize(Decimal),

    #[error("size {0} is too large to price")]
    SizeTooLarge(Decimal),

    #[error("price {0} is outside (0, 1)")]
    PriceOutOfBounds(Decimal),

    #[error("price deviates {deviation_pct}% from the book and was not confirmed")]
    UnconfirmedWarning { deviation_pct: Decimal },

    #[error("price guard blocked the order: {0}")]
    Blocked(String),

    #[error("post-only {side} at {price} would cross the book at {opposite}")]
    WouldCross {
        side: crate::types::Side,
        price: Decimal,
        opposite: Decimal,
    },

    #[error("size {size} is below the minimum order size {minimum}")]
    BelowMinimumSize { size: Decimal, minimum: Decimal },

    #[error("guard report is for token {guarded}, resolution is for {resolved}")]
    TokenMismatch { resolved: String, guarded: String },

    #[error("guard report priced a {guarded} order, not {requested}")]
    SideMismatch {
        requested: crate::types::Side,
        guarded: crate::types::Side,
    },
}

impl BuildError {
    pub fn guidance(&self) -> &'static str {
        match self {
            BuildError::NonPositiveSize(_) => "use a size greater than zero",
            BuildError::SizeTooLarge(_) => "use a realistic order size",
            BuildError::PriceOutOfBounds(_) => "pick a price strictly between 0 and 1",
            BuildError::UnconfirmedWarning { .. } => "confirm the price or move it closer to the book",
            BuildError::Blocked(_) => "this order cannot be placed in the current market state",
            BuildError::WouldCross { .. } => "adjust the price to rest behind the book, or send a market order instead",
            BuildError::BelowMinimumSize { .. } => "increase the size to at least the market minimum",
            BuildError::TokenMismatch { .. } | BuildError::SideMismatch { .. } => {
                "re-run the price check for the resolved market"
            }
        }
    }
}
