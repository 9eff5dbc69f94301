pub mod config;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod guard;
pub mod index;
pub mod intent;
pub mod market_refresh;
pub mod paper;
pub mod resolver;
pub mod retry;
pub mod state;
pub mod types;
pub mod venue;

#[cfg(test)]
mod testkit;
