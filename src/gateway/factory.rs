use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{ExecutionConfig, MarketConfig};
use crate::domain::TradeMode;
use crate::error::{BotError, Result};
use crate::gateway::paper::PaperGateway;
use crate::gateway::traits::{MarketData, OrderGateway};
use crate::gateway::upstox::UpstoxGateway;

/// Builds the gateway pair for a mode. LIVE uses the broker for data and
/// execution; PAPER uses the broker for data only and simulates fills.
/// Rebuilt (and swapped into the `GatewaySet`) on mode switches and token
/// rotations.
#[derive(Clone)]
pub struct GatewayFactory {
    rest_url: String,
    underlying: String,
    request_timeout: Duration,
}

impl GatewayFactory {
    pub fn new(market: &MarketConfig, execution: &ExecutionConfig) -> Self {
        Self {
            rest_url: market.rest_url.clone(),
            underlying: market.underlying.clone(),
            request_timeout: Duration::from_millis(execution.request_timeout_ms),
        }
    }

    pub fn build(
        &self,
        mode: TradeMode,
        access_token: Option<&str>,
    ) -> Result<(Arc<dyn MarketData>, Arc<dyn OrderGateway>)> {
        let live = match access_token {
            Some(token) if !token.trim().is_empty() => Some(Arc::new(UpstoxGateway::new(
                &self.rest_url,
                token.trim(),
                &self.underlying,
                self.request_timeout,
            )?)),
            _ => None,
        };

        match mode {
            TradeMode::Live => {
                let live = live.ok_or_else(|| {
                    BotError::Validation(
                        "live mode requires a broker session token; set one first".into(),
                    )
                })?;
                info!("execution mode: LIVE");
                Ok((live.clone() as Arc<dyn MarketData>, live as Arc<dyn OrderGateway>))
            }
            TradeMode::Paper => {
                let feed = live.map(|l| l as Arc<dyn MarketData>);
                let paper = Arc::new(PaperGateway::new(feed));
                info!("execution mode: PAPER (live data, simulated fills)");
                Ok((paper.clone() as Arc<dyn MarketData>, paper as Arc<dyn OrderGateway>))
            }
        }
    }
}
