//! Upstox v2 REST adapter.
//!
//! Serves both gateway roles: LTP/option-chain quotes and order execution.
//! Contracts for the nearest weekly expiry are cached on first use so chain
//! snapshots cost one batch-quote call.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domain::OptionSide;
use crate::error::{BotError, Result};
use crate::gateway::traits::{
    BrokerPosition, FillState, MarketData, OptionChain, OptionQuote, OrderGateway, OrderReport,
    OrderSide, Quote,
};

/// Strikes per leg included in a chain snapshot, nearest to spot first
const CHAIN_WIDTH: usize = 10;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self, context: &str) -> Result<T> {
        if self.status != "success" {
            return Err(BotError::InvalidMarketData(format!(
                "{}: broker replied status={}",
                context, self.status
            )));
        }
        self.data
            .ok_or_else(|| BotError::InvalidMarketData(format!("{}: empty payload", context)))
    }
}

#[derive(Debug, Deserialize)]
struct LtpRow {
    last_price: f64,
    #[serde(default)]
    instrument_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContractRow {
    instrument_key: String,
    #[serde(default)]
    strike_price: Option<f64>,
    #[serde(default)]
    instrument_type: Option<String>,
    #[serde(default)]
    expiry: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderIdData {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct OrderDetails {
    order_id: String,
    status: String,
    #[serde(default)]
    average_price: Option<f64>,
    #[serde(default)]
    filled_quantity: Option<i64>,
    quantity: i64,
}

#[derive(Debug, Deserialize)]
struct PositionRow {
    instrument_token: String,
    quantity: i64,
    #[serde(default)]
    average_price: Option<f64>,
}

#[derive(Debug, Clone)]
struct Contract {
    instrument_key: String,
    strike: Decimal,
}

#[derive(Debug, Clone)]
struct ContractBook {
    expiry: NaiveDate,
    ce: Vec<Contract>,
    pe: Vec<Contract>,
}

pub struct UpstoxGateway {
    http: reqwest::Client,
    base_url: String,
    /// Spot instrument key the contract lookup is anchored to
    underlying: String,
    contracts: RwLock<Option<ContractBook>>,
}

fn dec(v: f64, context: &str) -> Result<Decimal> {
    Decimal::try_from(v)
        .map_err(|_| BotError::InvalidMarketData(format!("{}: bad price {}", context, v)))
}

impl UpstoxGateway {
    pub fn new(
        base_url: &str,
        access_token: &str,
        underlying: &str,
        request_timeout: Duration,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let mut auth =
            reqwest::header::HeaderValue::from_str(&format!("Bearer {}", access_token))
                .map_err(|_| BotError::Validation("access token contains invalid bytes".into()))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            underlying: underlying.to_string(),
            contracts: RwLock::new(None),
        })
    }

    async fn fetch_ltp_batch(&self, keys: &[String]) -> Result<HashMap<String, Decimal>> {
        let url = format!(
            "{}/market-quote/ltp?instrument_key={}",
            self.base_url,
            keys.join(",")
        );
        let envelope: Envelope<HashMap<String, LtpRow>> = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let rows = envelope.into_data("ltp")?;

        // Response keys come back in exchange:symbol form; map rows back to
        // the requested instrument keys via the embedded token.
        let mut out = HashMap::new();
        for row in rows.into_values() {
            if let Some(token) = row.instrument_token {
                out.insert(token, dec(row.last_price, "ltp")?);
            }
        }
        Ok(out)
    }

    /// Download the option contracts for the underlying and keep the ones
    /// on the nearest future expiry.
    async fn load_contracts(&self) -> Result<ContractBook> {
        let url = format!(
            "{}/option/contract?instrument_key={}",
            self.base_url, self.underlying
        );
        let envelope: Envelope<Vec<ContractRow>> = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let rows = envelope.into_data("option contracts")?;

        let today = Utc::now().date_naive();
        let mut expiries: Vec<NaiveDate> = rows
            .iter()
            .filter_map(|r| r.expiry.as_deref())
            .filter_map(|e| NaiveDate::parse_from_str(e, "%Y-%m-%d").ok())
            .filter(|e| *e >= today)
            .collect();
        expiries.sort_unstable();
        let expiry = *expiries
            .first()
            .ok_or_else(|| BotError::InvalidMarketData("no future expiry in contract list".into()))?;

        let mut book = ContractBook {
            expiry,
            ce: Vec::new(),
            pe: Vec::new(),
        };
        for row in rows {
            let matches_expiry = row
                .expiry
                .as_deref()
                .and_then(|e| NaiveDate::parse_from_str(e, "%Y-%m-%d").ok())
                .is_some_and(|e| e == expiry);
            if !matches_expiry {
                continue;
            }
            let Some(strike) = row.strike_price else { continue };
            let contract = Contract {
                instrument_key: row.instrument_key,
                strike: dec(strike, "strike")?,
            };
            match row.instrument_type.as_deref() {
                Some("CE") => book.ce.push(contract),
                Some("PE") => book.pe.push(contract),
                _ => {}
            }
        }

        info!(
            expiry = %book.expiry,
            ce = book.ce.len(),
            pe = book.pe.len(),
            "option contract map loaded"
        );
        Ok(book)
    }

    async fn contracts(&self) -> Result<ContractBook> {
        if let Some(book) = self.contracts.read().await.as_ref() {
            // Rolls over the expiry after the weekly settlement
            if book.expiry >= Utc::now().date_naive() {
                return Ok(book.clone());
            }
        }
        let book = self.load_contracts().await?;
        *self.contracts.write().await = Some(book.clone());
        Ok(book)
    }

    fn map_status(details: &OrderDetails) -> FillState {
        let filled = details.filled_quantity.unwrap_or(0);
        match details.status.to_ascii_lowercase().as_str() {
            "complete" => FillState::Filled,
            "rejected" => FillState::Rejected,
            "cancelled" | "canceled" => FillState::Cancelled,
            _ if filled > 0 && filled < details.quantity => FillState::PartiallyFilled,
            _ => FillState::Pending,
        }
    }
}

fn nearest_strikes(contracts: &[Contract], spot: Decimal, width: usize) -> Vec<Contract> {
    let mut sorted: Vec<Contract> = contracts.to_vec();
    sorted.sort_by_key(|c| (c.strike - spot).abs());
    sorted.truncate(width);
    sorted
}

#[async_trait]
impl MarketData for UpstoxGateway {
    async fn ltp(&self, instrument_key: &str) -> Result<Quote> {
        let url = format!(
            "{}/market-quote/ltp?instrument_key={}",
            self.base_url, instrument_key
        );
        let envelope: Envelope<HashMap<String, LtpRow>> = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let rows = envelope.into_data("ltp")?;
        let row = rows.into_values().next().ok_or_else(|| {
            BotError::MarketDataUnavailable(format!("no quote for {}", instrument_key))
        })?;

        Ok(Quote {
            price: dec(row.last_price, "ltp")?,
            ts: Utc::now(),
        })
    }

    async fn option_chain(&self, symbol: &str, spot: Decimal) -> Result<OptionChain> {
        let book = self.contracts().await?;

        let ce = nearest_strikes(&book.ce, spot, CHAIN_WIDTH);
        let pe = nearest_strikes(&book.pe, spot, CHAIN_WIDTH);
        let keys: Vec<String> = ce
            .iter()
            .chain(pe.iter())
            .map(|c| c.instrument_key.clone())
            .collect();
        if keys.is_empty() {
            return Err(BotError::MarketDataUnavailable(format!(
                "no contracts near spot {} for {}",
                spot, symbol
            )));
        }

        let quotes = self.fetch_ltp_batch(&keys).await?;
        debug!(requested = keys.len(), quoted = quotes.len(), "chain snapshot");

        let build = |contracts: Vec<Contract>, side: OptionSide| -> Vec<OptionQuote> {
            contracts
                .into_iter()
                .filter_map(|c| {
                    quotes.get(&c.instrument_key).map(|premium| OptionQuote {
                        instrument_key: c.instrument_key,
                        side,
                        strike: c.strike,
                        premium: *premium,
                    })
                })
                .collect()
        };

        Ok(OptionChain {
            ce: build(ce, OptionSide::Ce),
            pe: build(pe, OptionSide::Pe),
        })
    }
}

#[async_trait]
impl OrderGateway for UpstoxGateway {
    async fn place_market(
        &self,
        instrument_key: &str,
        side: OrderSide,
        quantity: i64,
    ) -> Result<String> {
        let body = serde_json::json!({
            "quantity": quantity,
            "product": "I",
            "validity": "DAY",
            "price": 0,
            "instrument_token": instrument_key,
            "order_type": "MARKET",
            "transaction_type": side.as_str(),
            "disclosed_quantity": 0,
            "trigger_price": 0,
            "is_amo": false,
        });

        let envelope: Envelope<OrderIdData> = self
            .http
            .post(format!("{}/order/place", self.base_url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let data = envelope.into_data("place order").map_err(|e| {
            BotError::OrderSubmission(format!("{} {} x{}: {}", side, instrument_key, quantity, e))
        })?;

        info!(order_id = %data.order_id, %side, instrument_key, quantity, "order placed");
        Ok(data.order_id)
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderReport> {
        let envelope: Envelope<OrderDetails> = self
            .http
            .get(format!("{}/order/details?order_id={}", self.base_url, order_id))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let details = envelope.into_data("order details")?;

        let average_price = match details.average_price {
            Some(p) if p > 0.0 => Some(dec(p, "fill price")?),
            _ => None,
        };
        Ok(OrderReport {
            state: UpstoxGateway::map_status(&details),
            average_price,
            filled_quantity: details.filled_quantity.unwrap_or(0),
            quantity: details.quantity,
            order_id: details.order_id,
        })
    }

    async fn cancel(&self, order_id: &str) -> Result<bool> {
        let envelope: Envelope<OrderIdData> = self
            .http
            .delete(format!("{}/order/cancel?order_id={}", self.base_url, order_id))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if envelope.status == "success" {
            Ok(true)
        } else {
            warn!(order_id, "cancel refused by broker");
            Ok(false)
        }
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>> {
        let envelope: Envelope<Vec<PositionRow>> = self
            .http
            .get(format!("{}/portfolio/short-term-positions", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let rows = envelope.into_data("positions")?;

        rows.into_iter()
            .map(|r| {
                Ok(BrokerPosition {
                    instrument_key: r.instrument_token,
                    quantity: r.quantity,
                    average_price: dec(r.average_price.unwrap_or(0.0), "avg price")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec as d;

    fn contract(key: &str, strike: i64) -> Contract {
        Contract {
            instrument_key: key.to_string(),
            strike: Decimal::from(strike),
        }
    }

    #[test]
    fn nearest_strikes_picks_around_spot() {
        let contracts: Vec<Contract> = (0..40)
            .map(|i| contract(&format!("NSE_FO|{}", i), 24_000 + i * 50))
            .collect();
        let picked = nearest_strikes(&contracts, d!(24520), 5);
        assert_eq!(picked.len(), 5);
        for c in &picked {
            assert!((c.strike - d!(24520)).abs() <= d!(150));
        }
    }

    #[test]
    fn status_mapping() {
        let mut details = OrderDetails {
            order_id: "1".into(),
            status: "complete".into(),
            average_price: Some(181.5),
            filled_quantity: Some(50),
            quantity: 50,
        };
        assert_eq!(UpstoxGateway::map_status(&details), FillState::Filled);

        details.status = "open".into();
        details.filled_quantity = Some(20);
        assert_eq!(UpstoxGateway::map_status(&details), FillState::PartiallyFilled);

        details.filled_quantity = Some(0);
        assert_eq!(UpstoxGateway::map_status(&details), FillState::Pending);

        details.status = "rejected".into();
        assert_eq!(UpstoxGateway::map_status(&details), FillState::Rejected);
    }
}
