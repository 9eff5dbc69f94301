pub mod market_cache;

pub use market_cache::{CacheEntry, CacheView, MarketCache};
