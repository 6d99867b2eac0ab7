//! End-to-end lifecycle tests over an in-memory store and scripted
//! market data: entry through trailing to exit, the exit-claim race,
//! pause/kill semantics, and crash recovery.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use optix::alerts::AlertBus;
use optix::config::SessionConfig;
use optix::control::ControlFlags;
use optix::domain::params::{
    LOT_SIZE, SL_POINTS, TARGET_POINTS, TARGET_PREMIUM, TRAILING_GAP, TRAILING_ON,
    TRAILING_TRIGGER,
};
use optix::domain::{EngineState, OptionSide, TradeMode, TradeStatus};
use optix::engine::{Engine, EngineConfig};
use optix::error::{BotError, Result};
use optix::gateway::{
    GatewaySet, MarketData, OptionChain, OptionQuote, OrderGateway, PaperGateway, Quote,
};
use optix::store::{Bootstrapper, SqliteStore};

const SPOT: &str = "SPOT";
const CE_KEY: &str = "NSE_FO|CE50201";
const PE_KEY: &str = "NSE_FO|PE50195";

/// Feed with test-controlled prices and a fixed chain snapshot
struct ScriptedMarket {
    prices: Mutex<HashMap<String, Decimal>>,
    chain: OptionChain,
}

impl ScriptedMarket {
    fn new() -> Arc<Self> {
        let chain = OptionChain {
            ce: vec![OptionQuote {
                instrument_key: CE_KEY.to_string(),
                side: OptionSide::Ce,
                strike: dec!(24500),
                premium: dec!(171),
            }],
            pe: vec![OptionQuote {
                instrument_key: PE_KEY.to_string(),
                side: OptionSide::Pe,
                strike: dec!(24450),
                premium: dec!(176),
            }],
        };
        let mut prices = HashMap::new();
        prices.insert(SPOT.to_string(), dec!(24480));
        prices.insert(CE_KEY.to_string(), dec!(171));
        prices.insert(PE_KEY.to_string(), dec!(176));
        Arc::new(Self {
            prices: Mutex::new(prices),
            chain,
        })
    }

    fn set_price(&self, key: &str, price: Decimal) {
        self.prices.lock().unwrap().insert(key.to_string(), price);
    }
}

#[async_trait]
impl MarketData for ScriptedMarket {
    async fn ltp(&self, instrument_key: &str) -> Result<Quote> {
        let prices = self.prices.lock().unwrap();
        match prices.get(instrument_key) {
            Some(price) => Ok(Quote {
                price: *price,
                ts: Utc::now(),
            }),
            None => Err(BotError::MarketDataUnavailable(instrument_key.to_string())),
        }
    }

    async fn option_chain(&self, _symbol: &str, _spot: Decimal) -> Result<OptionChain> {
        Ok(self.chain.clone())
    }
}

fn session() -> SessionConfig {
    SessionConfig {
        market_open: NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
        observation_start: NaiveTime::from_hms_opt(9, 25, 0).unwrap(),
        entry_start: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
        entry_end: NaiveTime::from_hms_opt(9, 32, 0).unwrap(),
        breakeven_checkpoint: NaiveTime::from_hms_opt(9, 45, 0).unwrap(),
        square_off: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        market_close: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
    }
}

fn engine_config() -> EngineConfig {
    EngineConfig {
        underlying: SPOT.to_string(),
        symbol: "NIFTY".to_string(),
        session: session(),
        premium_tolerance: dec!(25),
        entry_cap_buffer: dec!(10),
        request_timeout: Duration::from_millis(200),
        order_poll_interval: Duration::from_millis(5),
        order_fill_timeout: Duration::from_millis(100),
    }
}

/// Monday, 2025-06-02, exchange-local
fn at(h: u32, m: u32, s: u32) -> DateTime<FixedOffset> {
    let tz = FixedOffset::east_opt(330 * 60).unwrap();
    tz.with_ymd_and_hms(2025, 6, 2, h, m, s).unwrap()
}

struct Harness {
    store: SqliteStore,
    market: Arc<ScriptedMarket>,
    flags: Arc<ControlFlags>,
    engine: Engine,
}

async fn harness() -> Harness {
    let store = SqliteStore::in_memory().await.unwrap();
    store
        .seed_params(&[
            (TARGET_PREMIUM.to_string(), "180".to_string()),
            (TARGET_POINTS.to_string(), "40".to_string()),
            (SL_POINTS.to_string(), "20".to_string()),
            (LOT_SIZE.to_string(), "50".to_string()),
            (TRAILING_ON.to_string(), "1".to_string()),
            (TRAILING_TRIGGER.to_string(), "20".to_string()),
            (TRAILING_GAP.to_string(), "15".to_string()),
        ])
        .await
        .unwrap();

    let market = ScriptedMarket::new();
    let paper = Arc::new(PaperGateway::new(Some(
        market.clone() as Arc<dyn MarketData>
    )));
    let gateways = Arc::new(GatewaySet::new(
        market.clone() as Arc<dyn MarketData>,
        paper as Arc<dyn OrderGateway>,
    ));
    let flags = Arc::new(ControlFlags::new(TradeMode::Paper, false, false));
    let engine = Engine::new(
        store.clone(),
        gateways,
        AlertBus::new(),
        flags.clone(),
        engine_config(),
    );

    Harness {
        store,
        market,
        flags,
        engine,
    }
}

/// Walk the engine to an open position: watchlist at 09:26, breakout and
/// order at 09:30:30, fill confirmed a tick later. Entry lands at 181.
async fn enter_position(h: &mut Harness) {
    h.engine.on_tick(at(9, 26, 0)).await.unwrap();
    h.market.set_price(CE_KEY, dec!(181));
    h.engine.on_tick(at(9, 30, 30)).await.unwrap();
    assert_eq!(h.engine.state(), EngineState::Armed);
    h.engine.on_tick(at(9, 30, 31)).await.unwrap();
    assert_eq!(h.engine.state(), EngineState::Entered);
    assert!(h.engine.has_open_position());
}

#[tokio::test]
async fn entry_persists_open_trade_with_stop() {
    let mut h = harness().await;
    enter_position(&mut h).await;

    let (trade, state) = h.store.open_trade().await.unwrap().expect("open trade");
    assert_eq!(trade.status, TradeStatus::Open);
    assert_eq!(trade.entry_price, dec!(181));
    assert_eq!(trade.quantity, 50);
    assert_eq!(trade.side, OptionSide::Ce);

    let state = state.expect("stop persisted atomically with the trade");
    assert_eq!(state.current_stop, dec!(161));
    assert_eq!(state.target_price, dec!(221));
    assert!(!state.trailing_active);
}

#[tokio::test]
async fn no_breakout_no_entry() {
    let mut h = harness().await;
    h.engine.on_tick(at(9, 26, 0)).await.unwrap();

    // 179 never crosses the 180 trigger; 215 is beyond the price cap.
    h.market.set_price(CE_KEY, dec!(179));
    h.engine.on_tick(at(9, 30, 30)).await.unwrap();
    h.market.set_price(CE_KEY, dec!(215));
    h.engine.on_tick(at(9, 30, 31)).await.unwrap();

    assert_eq!(h.engine.state(), EngineState::Idle);
    assert!(h.store.open_trade().await.unwrap().is_none());
}

#[tokio::test]
async fn trailing_stop_ratchets_and_exits_on_dip() {
    let mut h = harness().await;
    // Widen the target so trailing, not the target, closes the trade.
    h.store.set_param(TARGET_POINTS, "100").await.unwrap();
    enter_position(&mut h).await;

    h.market.set_price(CE_KEY, dec!(205));
    h.engine.on_tick(at(9, 33, 0)).await.unwrap();
    assert_eq!(h.engine.state(), EngineState::Trailing);
    let (_, state) = h.store.open_trade().await.unwrap().unwrap();
    assert_eq!(state.unwrap().current_stop, dec!(190));

    h.market.set_price(CE_KEY, dec!(230));
    h.engine.on_tick(at(9, 33, 1)).await.unwrap();
    let (_, state) = h.store.open_trade().await.unwrap().unwrap();
    assert_eq!(state.unwrap().current_stop, dec!(215));

    // Dip to 200: through the 215 stop, position closes there.
    h.market.set_price(CE_KEY, dec!(200));
    h.engine.on_tick(at(9, 33, 2)).await.unwrap();

    assert!(h.store.open_trade().await.unwrap().is_none());
    let trades = h.store.recent_trades(1).await.unwrap();
    assert_eq!(trades[0].status, TradeStatus::Win);
    assert_eq!(trades[0].exit_price, Some(dec!(200)));
    assert_eq!(trades[0].pnl, Some(dec!(950)));
}

#[tokio::test]
async fn target_hit_closes_the_trade() {
    let mut h = harness().await;
    enter_position(&mut h).await;

    h.market.set_price(CE_KEY, dec!(221));
    h.engine.on_tick(at(9, 34, 0)).await.unwrap();

    let trades = h.store.recent_trades(1).await.unwrap();
    assert_eq!(trades[0].status, TradeStatus::Win);
    assert_eq!(trades[0].exit_price, Some(dec!(221)));
    assert_eq!(h.engine.state(), EngineState::Closed);
}

#[tokio::test]
async fn exit_claim_race_has_one_winner() {
    let mut h = harness().await;
    enter_position(&mut h).await;
    let (trade, _) = h.store.open_trade().await.unwrap().unwrap();
    let id = trade.id.unwrap();

    // A concurrent failsafe path claims the exit first.
    assert!(h
        .store
        .claim_exit(id, Utc::now(), dec!(150), dec!(-1550), TradeStatus::Loss)
        .await
        .unwrap());

    // The engine sees the stop breached and tries to exit too.
    h.market.set_price(CE_KEY, dec!(150));
    h.engine.on_tick(at(9, 35, 0)).await.unwrap();
    assert_eq!(h.engine.state(), EngineState::Closed);

    // Exactly one closed record with one exit price.
    let trades = h.store.recent_trades(10).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].exit_price, Some(dec!(150)));
    assert_eq!(trades[0].pnl, Some(dec!(-1550)));
}

#[tokio::test]
async fn pause_blocks_entry_but_not_management() {
    let mut h = harness().await;
    h.flags.set_paused(true);

    // Entry window with a valid breakout: nothing may happen.
    h.engine.on_tick(at(9, 26, 0)).await.unwrap();
    h.market.set_price(CE_KEY, dec!(181));
    h.engine.on_tick(at(9, 30, 30)).await.unwrap();
    assert_eq!(h.engine.state(), EngineState::Idle);
    assert!(h.store.open_trade().await.unwrap().is_none());

    // With a position on, pause must not stop exit management.
    h.flags.set_paused(false);
    enter_position(&mut h).await;
    h.flags.set_paused(true);

    h.store.set_param(TARGET_POINTS, "100").await.unwrap();
    h.market.set_price(CE_KEY, dec!(205));
    h.engine.on_tick(at(9, 33, 0)).await.unwrap();
    let (_, state) = h.store.open_trade().await.unwrap().unwrap();
    assert_eq!(state.unwrap().current_stop, dec!(190));

    h.market.set_price(CE_KEY, dec!(150));
    h.engine.on_tick(at(9, 33, 1)).await.unwrap();
    assert!(h.store.open_trade().await.unwrap().is_none());
}

#[tokio::test]
async fn kill_forces_exit_and_blocks_entries() {
    let mut h = harness().await;
    enter_position(&mut h).await;

    h.flags.set_killed(true);
    h.engine.on_tick(at(9, 33, 0)).await.unwrap();

    assert!(h.store.open_trade().await.unwrap().is_none());
    let trades = h.store.recent_trades(1).await.unwrap();
    assert!(trades[0].status.is_terminal());

    // Entries stay rejected while killed, even inside the window.
    h.market.set_price(CE_KEY, dec!(185));
    h.engine.on_tick(at(9, 31, 0)).await.unwrap();
    assert_eq!(h.store.recent_trades(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn manual_exit_closes_on_next_tick() {
    let mut h = harness().await;
    enter_position(&mut h).await;

    h.flags.request_exit();
    h.engine.on_tick(at(9, 33, 0)).await.unwrap();

    assert!(h.store.open_trade().await.unwrap().is_none());
    assert_eq!(h.engine.state(), EngineState::Closed);
}

#[tokio::test]
async fn breakeven_checkpoint_locks_cost() {
    let mut h = harness().await;
    enter_position(&mut h).await;

    // Profitable but short of the trailing trigger at the checkpoint.
    h.market.set_price(CE_KEY, dec!(188));
    h.engine.on_tick(at(9, 45, 1)).await.unwrap();

    assert_eq!(h.engine.state(), EngineState::BreakevenLocked);
    let (_, state) = h.store.open_trade().await.unwrap().unwrap();
    let state = state.unwrap();
    assert_eq!(state.current_stop, dec!(181));
    assert!(state.breakeven_locked);
}

#[tokio::test]
async fn breakeven_checkpoint_dumps_a_loser() {
    let mut h = harness().await;
    enter_position(&mut h).await;

    // Below cost at the checkpoint: no reason to keep holding.
    h.market.set_price(CE_KEY, dec!(175));
    h.engine.on_tick(at(9, 45, 1)).await.unwrap();

    assert!(h.store.open_trade().await.unwrap().is_none());
    let trades = h.store.recent_trades(1).await.unwrap();
    assert_eq!(trades[0].status, TradeStatus::Loss);
    assert_eq!(trades[0].exit_price, Some(dec!(175)));
}

#[tokio::test]
async fn square_off_time_flattens() {
    let mut h = harness().await;
    enter_position(&mut h).await;

    h.market.set_price(CE_KEY, dec!(190));
    h.engine.on_tick(at(10, 0, 1)).await.unwrap();

    assert!(h.store.open_trade().await.unwrap().is_none());
    let trades = h.store.recent_trades(1).await.unwrap();
    assert_eq!(trades[0].status, TradeStatus::Win);
}

#[tokio::test]
async fn one_trade_per_day_is_strict() {
    let mut h = harness().await;
    h.store.set_param(TARGET_POINTS, "100").await.unwrap();
    enter_position(&mut h).await;

    // Close it out, then offer another breakout the same day.
    h.market.set_price(CE_KEY, dec!(150));
    h.engine.on_tick(at(9, 33, 0)).await.unwrap();
    assert!(h.store.open_trade().await.unwrap().is_none());

    h.market.set_price(CE_KEY, dec!(185));
    h.engine.on_tick(at(9, 31, 0)).await.unwrap();
    assert_eq!(h.store.recent_trades(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn restart_resumes_with_persisted_stop() {
    let mut h = harness().await;
    h.store.set_param(TARGET_POINTS, "100").await.unwrap();
    enter_position(&mut h).await;

    // Trail the stop up to 215, then "crash".
    h.market.set_price(CE_KEY, dec!(230));
    h.engine.on_tick(at(9, 33, 0)).await.unwrap();

    let today = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
    let recovered = Bootstrapper::new(h.store.clone(), AlertBus::new())
        .recover(today, TradeMode::Paper)
        .await
        .unwrap();
    let position = recovered.position.clone().expect("position recovered");
    assert_eq!(position.snapshot.current_stop, dec!(215));
    assert_eq!(position.state, EngineState::Trailing);
    assert!(recovered.trade_done_today);

    // A fresh engine picks it up and honors the recovered stop.
    let market = h.market.clone();
    let paper = Arc::new(PaperGateway::new(Some(
        market.clone() as Arc<dyn MarketData>
    )));
    let gateways = Arc::new(GatewaySet::new(
        market.clone() as Arc<dyn MarketData>,
        paper as Arc<dyn OrderGateway>,
    ));
    let mut engine = Engine::new(
        h.store.clone(),
        gateways,
        AlertBus::new(),
        Arc::new(ControlFlags::new(TradeMode::Paper, false, false)),
        engine_config(),
    )
    .with_recovered(recovered);

    assert_eq!(engine.state(), EngineState::Trailing);

    // 218 sits above the stop: still open. 214 is through it: closed.
    market.set_price(CE_KEY, dec!(218));
    engine.on_tick(at(9, 40, 0)).await.unwrap();
    assert!(h.store.open_trade().await.unwrap().is_some());

    market.set_price(CE_KEY, dec!(214));
    engine.on_tick(at(9, 40, 1)).await.unwrap();
    assert!(h.store.open_trade().await.unwrap().is_none());
    let trades = h.store.recent_trades(1).await.unwrap();
    assert_eq!(trades[0].exit_price, Some(dec!(214)));
    assert_eq!(trades[0].status, TradeStatus::Win);
}
