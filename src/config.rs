use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::{AppError, Result};

pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";
pub const CLOB_API_URL: &str = "https://clob.polymarket.com";

/// Gamma `/markets` page size.
pub const LISTING_PAGE_SIZE: usize = 500;

/// Maximum candidates offered when a query is ambiguous.
pub const MAX_DISAMBIGUATION_CANDIDATES: usize = 3;

/// Query terms shorter than this only match whole question words.
pub const MIN_SUBSTRING_TERM_LEN: usize = 3;

/// Upper bound on one retry sleep regardless of attempt count.
pub const RETRY_MAX_DELAY_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub gamma_api_url: String,
    pub clob_api_url: String,
    pub log_level: String,
    /// Per-call timeout for every external request (REQUEST_TIMEOUT_SECS)
    pub request_timeout: Duration,
    pub cache: CacheConfig,
    pub scoring: ScoringWeights,
    pub resolver: ResolverThresholds,
    pub guard: GuardConfig,
    pub retry: RetryPolicy,
    /// Background refresh period for `watch`, at least 1s (HOT_POLL_SECS)
    pub hot_poll_secs: u64,
    /// Markets listed per hot-markets tick (HOT_TOP_N)
    pub hot_top_n: usize,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Snapshot lifetime (CACHE_TTL_SECS)
    pub ttl: Duration,
    /// Cap on markets pulled from the listing per refresh (LISTING_MAX_MARKETS)
    pub max_markets: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_markets: 2_000,
        }
    }
}

/// Relevance score = overlap × text + normalized volume × volume + recency bonus.
#[derive(Debug, Clone)]
pub struct ScoringWeights {
    pub text: f64,
    pub volume: f64,
    /// Bonus awarded to a market closing right now, decaying to 0 at the window edge.
    pub recency_bonus: f64,
    pub recency_window: Duration,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            text: 10.0,
            volume: 5.0,
            recency_bonus: 2.0,
            recency_window: Duration::from_secs(72 * 3600),
        }
    }
}

/// A top candidate is unambiguous when it clears the floor AND beats the
/// runner-up by `min_ratio` times or by `min_gap` points.
#[derive(Debug, Clone)]
pub struct ResolverThresholds {
    pub min_ratio: f64,
    pub min_gap: f64,
    pub confidence_floor: f64,
}

impl Default for ResolverThresholds {
    fn default() -> Self {
        Self {
            min_ratio: 2.0,
            min_gap: 5.0,
            confidence_floor: 10.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Relative deviation above which a limit price needs confirmation (MAX_SLIPPAGE)
    pub max_slippage: Decimal,
    /// Used when the book does not report a tick size (DEFAULT_TICK_SIZE)
    pub default_tick_size: Decimal,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_slippage: dec!(0.05),
            default_tick_size: dec!(0.01),
        }
    }
}

/// Bounded exponential backoff for idempotent reads.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first (RETRY_MAX_ATTEMPTS)
    pub max_attempts: u32,
    /// Delay after the first failure, doubled each attempt (RETRY_BASE_DELAY_MS)
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of each delay randomized, 0.0–1.0.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(RETRY_MAX_DELAY_MS),
            jitter: 0.2,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gamma_api_url: GAMMA_API_URL.to_string(),
            clob_api_url: CLOB_API_URL.to_string(),
            log_level: "info".to_string(),
            request_timeout: Duration::from_secs(10),
            cache: CacheConfig::default(),
            scoring: ScoringWeights::default(),
            resolver: ResolverThresholds::default(),
            guard: GuardConfig::default(),
            retry: RetryPolicy::default(),
            hot_poll_secs: 60,
            hot_top_n: 10,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let scoring = ScoringWeights {
            text: env_parse("SCORE_WEIGHT_TEXT", 10.0)?,
            volume: env_parse("SCORE_WEIGHT_VOLUME", 5.0)?,
            recency_bonus: env_parse("SCORE_RECENCY_BONUS", 2.0)?,
            recency_window: hours(env_parse("RECENCY_WINDOW_HOURS", 72)?)?,
        };
        let resolver = ResolverThresholds {
            min_ratio: env_parse("RESOLVE_MIN_RATIO", 2.0)?,
            min_gap: env_parse("RESOLVE_MIN_GAP", 5.0)?,
            confidence_floor: env_parse("RESOLVE_CONFIDENCE_FLOOR", 10.0)?,
        };
        let guard = GuardConfig {
            max_slippage: env_parse("MAX_SLIPPAGE", dec!(0.05))?,
            default_tick_size: env_parse("DEFAULT_TICK_SIZE", dec!(0.01))?,
        };
        let retry = RetryPolicy {
            max_attempts: env_parse("RETRY_MAX_ATTEMPTS", 3)?,
            base_delay: Duration::from_millis(env_parse("RETRY_BASE_DELAY_MS", 200)?),
            ..RetryPolicy::default()
        };

        let cfg = Self {
            gamma_api_url: std::env::var("GAMMA_API_URL")
                .unwrap_or_else(|_| GAMMA_API_URL.to_string()),
            clob_api_url: std::env::var("CLOB_API_URL")
                .unwrap_or_else(|_| CLOB_API_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            request_timeout: Duration::from_secs(env_parse("REQUEST_TIMEOUT_SECS", 10)?),
            cache: CacheConfig {
                ttl: Duration::from_secs(env_parse("CACHE_TTL_SECS", 300)?),
                max_markets: env_parse("LISTING_MAX_MARKETS", 2_000)?,
            },
            scoring,
            resolver,
            guard,
            retry,
            hot_poll_secs: env_parse("HOT_POLL_SECS", 60)?,
            hot_top_n: env_parse("HOT_TOP_N", 10)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.resolver.validate()?;
        self.scoring.validate()?;
        self.guard.validate()?;
        if self.retry.max_attempts == 0 {
            return Err(AppError::Config("RETRY_MAX_ATTEMPTS must be at least 1".to_string()));
        }
        if self.cache.max_markets == 0 {
            return Err(AppError::Config("LISTING_MAX_MARKETS must be at least 1".to_string()));
        }
        if self.hot_poll_secs == 0 {
            return Err(AppError::Config("HOT_POLL_SECS must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl ResolverThresholds {
    /// Both margins must be strict, otherwise a tie at the top could resolve.
    pub fn validate(&self) -> Result<()> {
        if self.min_ratio <= 1.0 {
            return Err(AppError::Config("RESOLVE_MIN_RATIO must be greater than 1".to_string()));
        }
        if self.min_gap <= 0.0 {
            return Err(AppError::Config("RESOLVE_MIN_GAP must be positive".to_string()));
        }
        if !(self.confidence_floor >= 0.0) {
            return Err(AppError::Config("RESOLVE_CONFIDENCE_FLOOR must not be negative".to_string()));
        }
        Ok(())
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> Result<()> {
        if !(self.text > 0.0) {
            return Err(AppError::Config("SCORE_WEIGHT_TEXT must be positive".to_string()));
        }
        if !(self.volume >= 0.0) || !(self.recency_bonus >= 0.0) {
            return Err(AppError::Config(
                "SCORE_WEIGHT_VOLUME and SCORE_RECENCY_BONUS must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

impl GuardConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_slippage <= Decimal::ZERO || self.max_slippage >= Decimal::ONE {
            return Err(AppError::Config("MAX_SLIPPAGE must be between 0 and 1".to_string()));
        }
        if self.default_tick_size <= Decimal::ZERO || self.default_tick_size >= Decimal::ONE {
            return Err(AppError::Config("DEFAULT_TICK_SIZE must be between 0 and 1".to_string()));
        }
        Ok(())
    }
}

fn hours(n: u64) -> Result<Duration> {
    n.checked_mul(3600)
        .map(Duration::from_secs)
        .ok_or_else(|| AppError::Config(format!("RECENCY_WINDOW_HOURS is too large: {n}")))
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw:?}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ResolverThresholds::default().validate().unwrap();
        GuardConfig::default().validate().unwrap();
    }

    #[test]
    fn non_strict_margins_are_rejected() {
        let t = ResolverThresholds { min_ratio: 1.0, ..Default::default() };
        assert!(t.validate().is_err());
        let t = ResolverThresholds { min_gap: 0.0, ..Default::default() };
        assert!(t.validate().is_err());
    }

    #[test]
    fn negative_floor_and_non_positive_text_weight_are_rejected() {
        let t = ResolverThresholds { confidence_floor: -1.0, ..Default::default() };
        assert!(t.validate().is_err());
        let t = ResolverThresholds { confidence_floor: 0.0, ..Default::default() };
        assert!(t.validate().is_ok());

        for text in [0.0, -2.0, f64::NAN] {
            let w = ScoringWeights { text, ..Default::default() };
            assert!(w.validate().is_err(), "text weight {text} accepted");
        }
        let w = ScoringWeights { volume: -1.0, ..Default::default() };
        assert!(w.validate().is_err());
        ScoringWeights::default().validate().unwrap();
    }

    #[test]
    fn zero_poll_period_is_rejected() {
        let cfg = Config { hot_poll_secs: 0, ..Config::default() };
        assert!(matches!(cfg.validate(), Err(AppError::Config(_))));
        Config::default().validate().unwrap();
    }

    #[test]
    fn huge_recency_window_is_a_config_error() {
        assert!(matches!(hours(u64::MAX), Err(AppError::Config(_))));
        assert_eq!(hours(72).unwrap(), Duration::from_secs(72 * 3600));
    }

    #[test]
    fn slippage_must_be_a_fraction() {
        let g = GuardConfig { max_slippage: dec!(1.5), ..Default::default() };
        assert!(g.validate().is_err());
    }

    #[test]
    fn env_parse_falls_back_to_default() {
        let v: u64 = env_parse("POLYMARKET_RESOLVER_TEST_UNSET_KEY", 42).unwrap();
        assert_eq!(v, 42);
    }
}
