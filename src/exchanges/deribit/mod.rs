//! Deribit JSON-RPC streams
//!
//! Public channels use `public/subscribe`; the portfolio stream authenticates
//! with client credentials on every connect and uses `private/subscribe`.

pub mod types;

pub use types::{
    OrderbookDepth, PriceIndex, PublicTrade, Ticker, TickerGreeks, TickerStats, UserPortfolio,
};

use crate::stream::{decode_json, Credentials, Dialect, StreamSession};
use crate::ws::Subscription;

/// Public market data endpoint
pub const PUBLIC_URL: &str = "wss://streams.deribit.com/ws/api/v2";
/// Endpoint for authenticated sessions
pub const PRIVATE_URL: &str = "wss://www.deribit.com/ws/api/v2";
pub const TESTNET_URL: &str = "wss://test.deribit.com/ws/api/v2";

/// Environment variables read by [`Credentials::from_env`] callers
pub const CLIENT_ID_ENV: &str = "DERIBIT_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "DERIBIT_CLIENT_SECRET";

/// Ticker for one instrument; `interval` is `100ms`, `agg2` or `raw`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TickerSub {
    pub instrument: String,
    pub interval: String,
}

impl Subscription for TickerSub {
    fn channel(&self) -> String {
        format!("ticker.{}.{}", self.instrument, self.interval)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PriceIndexSub {
    pub index_name: String,
}

impl Subscription for PriceIndexSub {
    fn channel(&self) -> String {
        format!("deribit_price_index.{}", self.index_name)
    }
}

/// Grouped order book snapshot; `group == 0` means no price grouping
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderbookDepthSub {
    pub instrument: String,
    pub depth: u32,
    pub group: u32,
}

impl Subscription for OrderbookDepthSub {
    fn channel(&self) -> String {
        if self.group == 0 {
            format!("book.{}.none.{}.100ms", self.instrument, self.depth)
        } else {
            format!("book.{}.{}.{}.100ms", self.instrument, self.group, self.depth)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TradesSub {
    pub instrument: String,
    pub interval: String,
}

impl Subscription for TradesSub {
    fn channel(&self) -> String {
        format!("trades.{}.{}", self.instrument, self.interval)
    }
}

/// Portfolio updates for one currency, e.g. `BTC`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserPortfolioSub {
    pub currency: String,
}

impl Subscription for UserPortfolioSub {
    fn channel(&self) -> String {
        format!("user.portfolio.{}", self.currency)
    }
}

const PUBLIC: Dialect = Dialect::Rpc { private: false };

pub fn ticker_stream(url: impl Into<String>, subs: Vec<TickerSub>) -> StreamSession<Ticker, TickerSub> {
    StreamSession::new("deribit TickerStream", url, PUBLIC, decode_json::<Ticker>, subs)
}

pub fn price_index_stream(
    url: impl Into<String>,
    subs: Vec<PriceIndexSub>,
) -> StreamSession<PriceIndex, PriceIndexSub> {
    StreamSession::new(
        "deribit PriceIndexStream",
        url,
        PUBLIC,
        decode_json::<PriceIndex>,
        subs,
    )
}

pub fn orderbook_depth_stream(
    url: impl Into<String>,
    subs: Vec<OrderbookDepthSub>,
) -> StreamSession<OrderbookDepth, OrderbookDepthSub> {
    StreamSession::new(
        "deribit OrderbookDepthStream",
        url,
        PUBLIC,
        decode_json::<OrderbookDepth>,
        subs,
    )
}

/// Each record is the batch of trades from one notification
pub fn trades_stream(
    url: impl Into<String>,
    subs: Vec<TradesSub>,
) -> StreamSession<Vec<PublicTrade>, TradesSub> {
    StreamSession::new(
        "deribit TradesStream",
        url,
        PUBLIC,
        decode_json::<Vec<PublicTrade>>,
        subs,
    )
}

/// Authenticated portfolio stream
pub fn user_portfolio_stream(
    url: impl Into<String>,
    credentials: Credentials,
    subs: Vec<UserPortfolioSub>,
) -> StreamSession<UserPortfolio, UserPortfolioSub> {
    let mut session = StreamSession::new(
        "deribit UserPortfolioStream",
        url,
        Dialect::Rpc { private: true },
        decode_json::<UserPortfolio>,
        subs,
    );
    session.set_credentials(credentials);
    session
}
