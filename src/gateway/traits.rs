use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::OptionSide;
use crate::error::Result;

/// A last-traded-price observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub price: Decimal,
    pub ts: DateTime<Utc>,
}

/// One strike's quote inside an option chain snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct OptionQuote {
    pub instrument_key: String,
    pub side: OptionSide,
    pub strike: Decimal,
    pub premium: Decimal,
}

/// Chain snapshot around the spot, split by leg
#[derive(Debug, Clone, Default)]
pub struct OptionChain {
    pub ce: Vec<OptionQuote>,
    pub pe: Vec<OptionQuote>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Broker-side order state. A partial fill is never treated as done; the
/// caller keeps polling until the order resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillState {
    Pending,
    PartiallyFilled,
    Filled,
    Rejected,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct OrderReport {
    pub order_id: String,
    pub state: FillState,
    pub average_price: Option<Decimal>,
    pub filled_quantity: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone)]
pub struct BrokerPosition {
    pub instrument_key: String,
    pub quantity: i64,
    pub average_price: Decimal,
}

/// Market data feed; failures are transient and retryable.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn ltp(&self, instrument_key: &str) -> Result<Quote>;

    async fn option_chain(&self, symbol: &str, spot: Decimal) -> Result<OptionChain>;
}

/// Order execution. A timeout is never confirmation of either outcome;
/// the true result is reconciled through `order_status`.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_market(
        &self,
        instrument_key: &str,
        side: OrderSide,
        quantity: i64,
    ) -> Result<String>;

    async fn order_status(&self, order_id: &str) -> Result<OrderReport>;

    async fn cancel(&self, order_id: &str) -> Result<bool>;

    async fn positions(&self) -> Result<Vec<BrokerPosition>>;
}
