//! Bybit V5 public streams (topic dialect)
//!
//! Constructors return idle [`StreamSession`]s; call `start` to connect.
//! Spot and linear contracts live on separate endpoints, pick the URL that
//! matches the symbols.

pub mod types;

pub use types::{
    Liquidation, LiquidationData, OrderbookUpdate, OrderbookUpdateMessage, SpotTicker,
    SpotTickerData, Trade, Trades,
};

use crate::stream::{decode_json, Dialect, StreamSession};
use crate::ws::Subscription;

/// Spot public endpoint
pub const SPOT_URL: &str = "wss://stream.bybit.com/v5/public/spot";
/// Linear (USDT perpetual) public endpoint
pub const LINEAR_URL: &str = "wss://stream.bybit.com/v5/public/linear";
/// Linear testnet endpoint
pub const LINEAR_TESTNET_URL: &str = "wss://stream-testnet.bybit.com/v5/public/linear";

/// Public trades for one symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TradesSub {
    pub symbol: String,
}

impl Subscription for TradesSub {
    fn channel(&self) -> String {
        format!("publicTrade.{}", self.symbol)
    }
}

/// Order book updates at a fixed depth (1, 50, 200 or 500)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderbookSub {
    pub symbol: String,
    pub depth: u32,
}

impl Subscription for OrderbookSub {
    fn channel(&self) -> String {
        format!("orderbook.{}.{}", self.depth, self.symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TickerSub {
    pub symbol: String,
}

impl Subscription for TickerSub {
    fn channel(&self) -> String {
        format!("tickers.{}", self.symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LiquidationSub {
    pub symbol: String,
}

impl Subscription for LiquidationSub {
    fn channel(&self) -> String {
        format!("liquidation.{}", self.symbol)
    }
}

/// Stream of public trades
pub fn trades_stream(url: impl Into<String>, subs: Vec<TradesSub>) -> StreamSession<Trades, TradesSub> {
    StreamSession::new("bybit TradesStream", url, Dialect::Topic, decode_json::<Trades>, subs)
}

/// Stream of order book snapshots and deltas
pub fn orderbook_stream(
    url: impl Into<String>,
    subs: Vec<OrderbookSub>,
) -> StreamSession<OrderbookUpdateMessage, OrderbookSub> {
    StreamSession::new(
        "bybit OrderbookStream",
        url,
        Dialect::Topic,
        decode_json::<OrderbookUpdateMessage>,
        subs,
    )
}

/// Stream of spot ticker snapshots
pub fn spot_ticker_stream(
    url: impl Into<String>,
    subs: Vec<TickerSub>,
) -> StreamSession<SpotTicker, TickerSub> {
    StreamSession::new(
        "bybit SpotTickerStream",
        url,
        Dialect::Topic,
        decode_json::<SpotTicker>,
        subs,
    )
}

/// Stream of liquidations (linear endpoint)
pub fn liquidation_stream(
    url: impl Into<String>,
    subs: Vec<LiquidationSub>,
) -> StreamSession<Liquidation, LiquidationSub> {
    StreamSession::new(
        "bybit LiquidationStream",
        url,
        Dialect::Topic,
        decode_json::<Liquidation>,
        subs,
    )
}
