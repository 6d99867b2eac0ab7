pub mod factory;
pub mod paper;
pub mod traits;
pub mod upstox;

pub use factory::GatewayFactory;
pub use paper::PaperGateway;
pub use traits::{
    BrokerPosition, FillState, MarketData, OptionChain, OptionQuote, OrderGateway, OrderReport,
    OrderSide, Quote,
};
pub use upstox::UpstoxGateway;

use std::sync::Arc;
use tokio::sync::RwLock;

/// Current market-data and order gateways. Held behind locks so mode
/// switches and token rotations swap both atomically without restarting
/// the loops that poll them.
pub struct GatewaySet {
    market: RwLock<Arc<dyn MarketData>>,
    orders: RwLock<Arc<dyn OrderGateway>>,
}

impl GatewaySet {
    pub fn new(market: Arc<dyn MarketData>, orders: Arc<dyn OrderGateway>) -> Self {
        Self {
            market: RwLock::new(market),
            orders: RwLock::new(orders),
        }
    }

    pub async fn market(&self) -> Arc<dyn MarketData> {
        self.market.read().await.clone()
    }

    pub async fn orders(&self) -> Arc<dyn OrderGateway> {
        self.orders.read().await.clone()
    }

    pub async fn swap(&self, market: Arc<dyn MarketData>, orders: Arc<dyn OrderGateway>) {
        *self.market.write().await = market;
        *self.orders.write().await = orders;
    }
}
