pub mod aggregator;
pub mod alpha_vantage;
pub mod indicators;
pub mod limiter;
pub mod news;
pub mod provider;
pub mod types;
pub mod yahoo;
