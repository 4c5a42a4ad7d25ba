//! Poloniex exchange integration.

mod client;
mod exchange;

pub use exchange::{EXCHANGE_NAME, PoloniexExchange};
