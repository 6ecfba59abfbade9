//! Deribit subscription notification payloads
//!
//! Records decode from `params.data` of a `subscription` notification.

use crate::exchanges::parsing::Level;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `ticker.{instrument}.{interval}`
///
/// Fields that only exist for some instrument kinds (options, futures,
/// perpetuals) are optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub timestamp: i64,
    #[serde(rename = "instrument_name")]
    pub instrument: String,
    #[serde(default)]
    pub best_ask_price: f64,
    #[serde(default)]
    pub best_ask_amount: f64,
    #[serde(default)]
    pub best_bid_price: f64,
    #[serde(default)]
    pub best_bid_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_price: Option<f64>,
    #[serde(default)]
    pub mark_price: f64,
    #[serde(default)]
    pub index_price: f64,
    #[serde(default)]
    pub open_interest: f64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub stats: TickerStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greeks: Option<TickerGreeks>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_delivery_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underlying_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underlying_index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask_iv: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_iv: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark_iv: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_funding: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funding_8h: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interest_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interest_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_price: Option<f64>,
}

/// 24h statistics; values are null before the first trade
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TickerStats {
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub price_change: Option<f64>,
    #[serde(default)]
    pub volume: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_usd: Option<f64>,
}

/// Option greeks
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TickerGreeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    #[serde(default)]
    pub rho: f64,
}

/// `deribit_price_index.{index_name}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceIndex {
    pub timestamp: i64,
    pub price: f64,
    pub index_name: String,
}

/// `book.{instrument}.{group}.{depth}.{interval}` snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderbookDepth {
    pub timestamp: i64,
    #[serde(rename = "instrument_name")]
    pub instrument: String,
    #[serde(default)]
    pub change_id: i64,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

/// One element of a `trades.{instrument}.{interval}` notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicTrade {
    pub trade_seq: i64,
    pub trade_id: String,
    pub timestamp: i64,
    #[serde(rename = "instrument_name")]
    pub instrument: String,
    pub price: f64,
    pub amount: f64,
    /// `buy` or `sell`
    pub direction: String,
    /// 0 plus tick, 1 zero-plus, 2 minus, 3 zero-minus
    #[serde(default)]
    pub tick_direction: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liquidation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<f64>,
}

/// `user.portfolio.{currency}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPortfolio {
    pub currency: String,
    pub balance: f64,
    pub equity: f64,
    pub available_funds: f64,
    pub available_withdrawal_funds: f64,
    pub margin_balance: f64,
    pub initial_margin: f64,
    pub maintenance_margin: f64,
    pub projected_initial_margin: f64,
    pub projected_maintenance_margin: f64,
    pub delta_total: f64,
    pub projected_delta_total: f64,
    pub session_rpl: f64,
    pub session_upl: f64,
    pub total_pl: f64,
    pub futures_pl: f64,
    pub futures_session_rpl: f64,
    pub futures_session_upl: f64,
    pub options_pl: f64,
    pub options_session_rpl: f64,
    pub options_session_upl: f64,
    pub options_value: f64,
    pub options_delta: f64,
    pub options_gamma: f64,
    pub options_theta: f64,
    pub options_vega: f64,
    pub fee_balance: f64,
    pub additional_reserve: f64,
    pub estimated_liquidation_ratio: f64,
    pub margin_model: String,
    pub cross_collateral_enabled: bool,
    pub portfolio_margining_enabled: bool,
    pub total_equity_usd: f64,
    pub total_initial_margin_usd: f64,
    pub total_maintenance_margin_usd: f64,
    pub total_margin_balance_usd: f64,
    pub total_delta_total_usd: f64,
    pub delta_total_map: HashMap<String, f64>,
    pub options_gamma_map: HashMap<String, f64>,
    pub options_theta_map: HashMap<String, f64>,
    pub options_vega_map: HashMap<String, f64>,
    pub estimated_liquidation_ratio_map: HashMap<String, f64>,
}
