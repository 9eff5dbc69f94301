pub mod market_index;
pub mod tokenize;

pub use market_index::{MarketIndex, SearchCandidate, SearchFilters};
pub use tokenize::{normalize_query, QueryTerms};
