//! Bybit V5 public stream records
//!
//! Each record is the whole data frame: `topic`, `type`, `ts` plus the
//! channel-specific `data`.

use crate::exchanges::parsing::{flex_f64, Level};
use serde::{Deserialize, Serialize};

/// `publicTrade.{symbol}` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trades {
    pub topic: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "ts")]
    pub timestamp: i64,
    pub data: Vec<Trade>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    #[serde(rename = "T")]
    pub timestamp: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p", with = "flex_f64")]
    pub price: f64,
    #[serde(rename = "v", with = "flex_f64")]
    pub amount: f64,
    /// `Buy` or `Sell`
    #[serde(rename = "S")]
    pub direction: String,
    #[serde(rename = "i", default)]
    pub trade_id: String,
    #[serde(rename = "BT", default)]
    pub block_trade: bool,
}

/// `orderbook.{depth}.{symbol}` frame, snapshot or delta
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderbookUpdateMessage {
    pub topic: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "ts")]
    pub timestamp: i64,
    pub data: OrderbookUpdate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderbookUpdate {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "b", default)]
    pub bids: Vec<Level>,
    #[serde(rename = "a", default)]
    pub asks: Vec<Level>,
    #[serde(rename = "u", default)]
    pub update_id: i64,
    #[serde(rename = "seq", default)]
    pub sequence: i64,
}

impl OrderbookUpdateMessage {
    pub fn is_snapshot(&self) -> bool {
        self.kind == "snapshot"
    }
}

/// `tickers.{symbol}` frame on the spot endpoint (snapshots only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotTicker {
    pub topic: String,
    #[serde(rename = "ts")]
    pub timestamp: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "cs", default)]
    pub cross_sequence: i64,
    pub data: SpotTickerData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotTickerData {
    pub symbol: String,
    #[serde(with = "flex_f64")]
    pub last_price: f64,
    #[serde(rename = "highPrice24h", with = "flex_f64")]
    pub high_price_24h: f64,
    #[serde(rename = "lowPrice24h", with = "flex_f64")]
    pub low_price_24h: f64,
    #[serde(rename = "prevPrice24h", with = "flex_f64")]
    pub prev_price_24h: f64,
    #[serde(rename = "volume24h", with = "flex_f64")]
    pub volume_24h: f64,
    #[serde(rename = "turnover24h", with = "flex_f64")]
    pub turnover_24h: f64,
    #[serde(rename = "price24hPcnt", with = "flex_f64")]
    pub price_24h_pcnt: f64,
    /// Empty for pairs without a USD index
    #[serde(default, with = "flex_f64")]
    pub usd_index_price: f64,
}

/// `liquidation.{symbol}` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Liquidation {
    pub topic: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "ts")]
    pub timestamp: i64,
    pub data: LiquidationData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidationData {
    #[serde(with = "flex_f64")]
    pub price: f64,
    #[serde(rename = "size", with = "flex_f64")]
    pub amount: f64,
    #[serde(rename = "side")]
    pub direction: String,
    pub symbol: String,
    pub updated_time: i64,
}
