//! Simulated execution over the live data feed.
//!
//! PAPER mode trades with real quotes and fake money: market orders fill
//! immediately at the feed's LTP and a small in-memory book tracks the
//! resulting net positions. Without a feed the gateway is blind and every
//! call fails as transient.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{BotError, Result};
use crate::gateway::traits::{
    BrokerPosition, FillState, MarketData, OptionChain, OrderGateway, OrderReport, OrderSide,
    Quote,
};

#[derive(Default)]
struct PaperBook {
    orders: HashMap<String, OrderReport>,
    positions: HashMap<String, BrokerPosition>,
}

pub struct PaperGateway {
    feed: Option<Arc<dyn MarketData>>,
    book: Mutex<PaperBook>,
}

impl PaperGateway {
    pub fn new(feed: Option<Arc<dyn MarketData>>) -> Self {
        if feed.is_none() {
            warn!("paper gateway has no live data feed; quotes and fills will fail until a session token is set");
        }
        Self {
            feed,
            book: Mutex::new(PaperBook::default()),
        }
    }

    fn feed(&self) -> Result<&Arc<dyn MarketData>> {
        self.feed
            .as_ref()
            .ok_or_else(|| BotError::MarketDataUnavailable("paper gateway has no data feed".into()))
    }
}

#[async_trait]
impl MarketData for PaperGateway {
    async fn ltp(&self, instrument_key: &str) -> Result<Quote> {
        self.feed()?.ltp(instrument_key).await
    }

    async fn option_chain(&self, symbol: &str, spot: Decimal) -> Result<OptionChain> {
        self.feed()?.option_chain(symbol, spot).await
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn place_market(
        &self,
        instrument_key: &str,
        side: OrderSide,
        quantity: i64,
    ) -> Result<String> {
        // Fill at the live price; no fill without a quote.
        let quote = self.ltp(instrument_key).await?;
        let order_id = format!("PAPER-{}", Uuid::new_v4().simple());

        let mut book = self.book.lock().await;
        book.orders.insert(
            order_id.clone(),
            OrderReport {
                order_id: order_id.clone(),
                state: FillState::Filled,
                average_price: Some(quote.price),
                filled_quantity: quantity,
                quantity,
            },
        );

        let signed = match side {
            OrderSide::Buy => quantity,
            OrderSide::Sell => -quantity,
        };
        let entry = book
            .positions
            .entry(instrument_key.to_string())
            .or_insert_with(|| BrokerPosition {
                instrument_key: instrument_key.to_string(),
                quantity: 0,
                average_price: quote.price,
            });
        entry.quantity += signed;
        if entry.quantity != 0 {
            entry.average_price = quote.price;
        } else {
            book.positions.remove(instrument_key);
        }

        info!(
            order_id = %order_id,
            %side,
            instrument_key,
            quantity,
            fill = %quote.price,
            "paper order filled"
        );
        Ok(order_id)
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderReport> {
        self.book
            .lock()
            .await
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| BotError::OrderNotFound(order_id.to_string()))
    }

    async fn cancel(&self, order_id: &str) -> Result<bool> {
        let mut book = self.book.lock().await;
        match book.orders.get_mut(order_id) {
            Some(report) if report.state == FillState::Pending => {
                report.state = FillState::Cancelled;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(BotError::OrderNotFound(order_id.to_string())),
        }
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>> {
        Ok(self.book.lock().await.positions.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    struct FixedFeed(Decimal);

    #[async_trait]
    impl MarketData for FixedFeed {
        async fn ltp(&self, _instrument_key: &str) -> Result<Quote> {
            Ok(Quote {
                price: self.0,
                ts: Utc::now(),
            })
        }

        async fn option_chain(&self, _symbol: &str, _spot: Decimal) -> Result<OptionChain> {
            Ok(OptionChain::default())
        }
    }

    #[tokio::test]
    async fn market_order_fills_at_feed_price() {
        let gw = PaperGateway::new(Some(Arc::new(FixedFeed(dec!(182.5)))));
        let id = gw
            .place_market("NSE_FO|50201", OrderSide::Buy, 50)
            .await
            .unwrap();

        let report = gw.order_status(&id).await.unwrap();
        assert_eq!(report.state, FillState::Filled);
        assert_eq!(report.average_price, Some(dec!(182.5)));

        let positions = gw.positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, 50);
    }

    #[tokio::test]
    async fn round_trip_flattens_position() {
        let gw = PaperGateway::new(Some(Arc::new(FixedFeed(dec!(190)))));
        gw.place_market("NSE_FO|50201", OrderSide::Buy, 50).await.unwrap();
        gw.place_market("NSE_FO|50201", OrderSide::Sell, 50).await.unwrap();
        assert!(gw.positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blind_gateway_rejects_orders() {
        let gw = PaperGateway::new(None);
        let err = gw
            .place_market("NSE_FO|50201", OrderSide::Buy, 50)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
