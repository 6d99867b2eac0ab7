//! Recovery bootstrapper.
//!
//! Runs once at process start and rebuilds everything the engine and the
//! watchdog need from the store: the open position's working stop, the
//! inferred lifecycle state, and the one-trade-per-day flag. Ambiguity is
//! always resolved toward the tighter stop.

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::alerts::{AlertBus, AlertLevel};
use crate::domain::{EngineState, StopSnapshot, StrategyParams, Trade, TradeMode};
use crate::error::Result;
use crate::store::SqliteStore;

#[derive(Debug, Clone)]
pub struct RecoveredPosition {
    pub trade: Trade,
    pub snapshot: StopSnapshot,
    pub state: EngineState,
}

#[derive(Debug, Clone, Default)]
pub struct RecoveredState {
    pub position: Option<RecoveredPosition>,
    pub trade_done_today: bool,
}

pub struct Bootstrapper {
    store: SqliteStore,
    alerts: AlertBus,
}

impl Bootstrapper {
    pub fn new(store: SqliteStore, alerts: AlertBus) -> Self {
        Self { store, alerts }
    }

    pub async fn recover(&self, today: NaiveDate, mode: TradeMode) -> Result<RecoveredState> {
        let params = StrategyParams::from_map(&self.store.all_params().await?)?;
        let trade_done_today = self.store.trade_count_on(today, mode).await? > 0;
        if trade_done_today {
            info!("a trade is already recorded for today; entries stay closed");
        }

        let Some((trade, stored)) = self.store.open_trade().await? else {
            info!("no open trade found; starting idle");
            return Ok(RecoveredState {
                position: None,
                trade_done_today,
            });
        };

        if trade.mode != mode {
            self.alerts.notify(
                AlertLevel::Warning,
                "recovery",
                "mode mismatch",
                &format!(
                    "open {} trade resumed while running in {} mode",
                    trade.mode, mode
                ),
            );
        }

        let trade_id = trade.id.expect("persisted trade always has an id");
        let snapshot = match stored {
            Some(mut snap) => {
                if snap.trailing_active {
                    // Peak is re-derivable from the persisted stop; never
                    // let a stale peak loosen the trail.
                    snap.peak_price = snap
                        .peak_price
                        .max(snap.current_stop + params.trailing_gap)
                        .max(trade.entry_price);
                }
                snap
            }
            None => {
                // No state row: assume the most protective applicable
                // state rather than risk a wider stop.
                self.alerts.notify(
                    AlertLevel::Warning,
                    "recovery",
                    "stop state missing",
                    "position_state row absent for the open trade; assuming trailing already active",
                );
                let stop = trade.entry_price - params.sl_points;
                StopSnapshot {
                    current_stop: stop,
                    peak_price: (stop + params.trailing_gap).max(trade.entry_price),
                    trailing_active: true,
                    breakeven_locked: false,
                    target_price: trade.entry_price + params.target_points,
                }
            }
        };

        // Write the reconstructed snapshot back so the watchdog enforces
        // exactly what the engine resumes with.
        self.store.update_position_state(trade_id, &snapshot).await?;

        let state = if snapshot.trailing_active {
            EngineState::Trailing
        } else if snapshot.breakeven_locked {
            EngineState::BreakevenLocked
        } else {
            EngineState::Entered
        };

        warn!(
            trade_id,
            symbol = %trade.symbol,
            entry = %trade.entry_price,
            stop = %snapshot.current_stop,
            %state,
            "active position detected; resuming management"
        );
        self.alerts.notify(
            AlertLevel::Info,
            "recovery",
            "resumed open position",
            &format!(
                "{} qty {} @ {}; stop {}, target {}",
                trade.symbol, trade.quantity, trade.entry_price, snapshot.current_stop, snapshot.target_price
            ),
        );

        Ok(RecoveredState {
            position: Some(RecoveredPosition {
                trade,
                snapshot,
                state,
            }),
            trade_done_today: true,
        })
    }
}
