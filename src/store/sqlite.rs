//! SQLite storage adapter.
//!
//! Sole durable owner of settings, strategy parameters, trades, working
//! position state, the audit trail and the daily-run marker. The
//! conditional update in `claim_exit` is the only mutual-exclusion
//! primitive shared by the engine and the watchdog.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info};

use crate::domain::{OptionSide, StopSnapshot, Trade, TradeMode, TradeStatus};
use crate::error::{BotError, Result};

pub const SETTING_MODE: &str = "BOT_MODE";
pub const SETTING_PAUSED: &str = "PAUSED";
pub const SETTING_KILLED: &str = "KILLED";
pub const SETTING_ACCESS_TOKEN: &str = "UPSTOX_ACCESS_TOKEN";

/// Aggregate of one session's closed trades
#[derive(Debug, Clone, PartialEq)]
pub struct DailySummary {
    pub trades: i64,
    pub wins: i64,
    pub losses: i64,
    pub net_pnl: Decimal,
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

fn parse_decimal(raw: &str, col: &str) -> Result<Decimal> {
    Decimal::from_str(raw.trim())
        .map_err(|_| BotError::Internal(format!("corrupt decimal in {}: {:?}", col, raw)))
}

fn decimal_col(row: &SqliteRow, col: &str) -> Result<Decimal> {
    let raw: String = row.get(col);
    parse_decimal(&raw, col)
}

fn opt_decimal_col(row: &SqliteRow, col: &str) -> Result<Option<Decimal>> {
    let raw: Option<String> = row.get(col);
    raw.map(|r| parse_decimal(&r, col)).transpose()
}

fn trade_from_row(row: &SqliteRow) -> Result<Trade> {
    let mode: String = row.get("mode");
    let side: String = row.get("side");
    let status: String = row.get("status");

    Ok(Trade {
        id: Some(row.get("id")),
        date: row.get("date"),
        mode: TradeMode::try_from(mode.as_str()).map_err(BotError::Internal)?,
        symbol: row.get("symbol"),
        side: OptionSide::try_from(side.as_str()).map_err(BotError::Internal)?,
        entry_time: row.get("entry_time"),
        entry_price: decimal_col(row, "entry_price")?,
        exit_time: row.get("exit_time"),
        exit_price: opt_decimal_col(row, "exit_price")?,
        quantity: row.get("quantity"),
        pnl: opt_decimal_col(row, "pnl")?,
        status: TradeStatus::try_from(status.as_str()).map_err(BotError::Internal)?,
    })
}

fn snapshot_from_row(row: &SqliteRow) -> Result<StopSnapshot> {
    Ok(StopSnapshot {
        current_stop: decimal_col(row, "current_stop")?,
        peak_price: decimal_col(row, "peak_price")?,
        trailing_active: row.get("trailing_active"),
        breakeven_locked: row.get("breakeven_locked"),
        target_price: decimal_col(row, "target_price")?,
    })
}

const TRADE_COLUMNS: &str =
    "id, date, mode, symbol, side, entry_time, entry_price, exit_time, exit_price, quantity, pnl, status";

impl SqliteStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("connected to sqlite store");
        Ok(Self { pool })
    }

    /// In-memory store for tests; a single connection keeps the database
    /// alive and shared.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ==================== Settings ====================

    pub async fn setting(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT v FROM settings WHERE k = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("v")))
    }

    /// Last-write-wins per key
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (k, v, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT (k) DO UPDATE SET v = excluded.v, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Write a setting only if the key does not exist yet
    pub async fn seed_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO settings (k, v, updated_at) VALUES (?1, ?2, ?3)")
            .bind(key)
            .bind(value)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn flag_setting(&self, key: &str) -> Result<bool> {
        Ok(self.setting(key).await?.as_deref() == Some("1"))
    }

    // ==================== Strategy params ====================

    pub async fn param(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT v FROM strategy_params WHERE k = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("v")))
    }

    pub async fn set_param(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO strategy_params (k, v) VALUES (?1, ?2)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn all_params(&self) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT k, v FROM strategy_params")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get("k"), r.get("v")))
            .collect())
    }

    /// Seed defaults on a fresh database; existing values win.
    pub async fn seed_params(&self, pairs: &[(String, String)]) -> Result<()> {
        for (key, value) in pairs {
            sqlx::query("INSERT OR IGNORE INTO strategy_params (k, v) VALUES (?1, ?2)")
                .bind(key)
                .bind(value)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    // ==================== Trades ====================

    /// Persist a freshly filled entry: the OPEN trade row and its working
    /// stop state land in one transaction, so the watchdog never sees a
    /// position without a stop.
    pub async fn insert_trade(&self, trade: &Trade, state: &StopSnapshot) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO trades (date, mode, symbol, side, entry_time, entry_price, quantity, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(trade.date)
        .bind(trade.mode.as_str())
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.entry_time)
        .bind(trade.entry_price.to_string())
        .bind(trade.quantity)
        .bind(trade.status.as_str())
        .execute(&mut *tx)
        .await?;
        let trade_id = result.last_insert_rowid();

        sqlx::query(
            r#"
            INSERT INTO position_state
                (trade_id, current_stop, peak_price, trailing_active, breakeven_locked, target_price, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(trade_id)
        .bind(state.current_stop.to_string())
        .bind(state.peak_price.to_string())
        .bind(state.trailing_active)
        .bind(state.breakeven_locked)
        .bind(state.target_price.to_string())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(trade_id, symbol = %trade.symbol, "trade recorded");
        Ok(trade_id)
    }

    /// The open trade (if any) with its persisted working state
    pub async fn open_trade(&self) -> Result<Option<(Trade, Option<StopSnapshot>)>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM trades WHERE status = 'OPEN' ORDER BY id DESC LIMIT 1",
            TRADE_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };
        let trade = trade_from_row(&row)?;

        let state = sqlx::query(
            r#"
            SELECT current_stop, peak_price, trailing_active, breakeven_locked, target_price
            FROM position_state WHERE trade_id = ?1
            "#,
        )
        .bind(trade.id.expect("trade row always has an id"))
        .fetch_optional(&self.pool)
        .await?
        .map(|r| snapshot_from_row(&r))
        .transpose()?;

        Ok(Some((trade, state)))
    }

    pub async fn update_position_state(&self, trade_id: i64, state: &StopSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO position_state
                (trade_id, current_stop, peak_price, trailing_active, breakeven_locked, target_price, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (trade_id) DO UPDATE SET
                current_stop = excluded.current_stop,
                peak_price = excluded.peak_price,
                trailing_active = excluded.trailing_active,
                breakeven_locked = excluded.breakeven_locked,
                target_price = excluded.target_price,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(trade_id)
        .bind(state.current_stop.to_string())
        .bind(state.peak_price.to_string())
        .bind(state.trailing_active)
        .bind(state.breakeven_locked)
        .bind(state.target_price.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically move the trade off OPEN. Returns true when this caller
    /// won the claim; a false return means another exit path owns the
    /// close and the caller must stand down.
    pub async fn claim_exit(
        &self,
        trade_id: i64,
        exit_time: DateTime<Utc>,
        exit_price: Decimal,
        pnl: Decimal,
        status: TradeStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE trades SET status = ?1, exit_time = ?2, exit_price = ?3, pnl = ?4
            WHERE id = ?5 AND status = 'OPEN'
            "#,
        )
        .bind(status.as_str())
        .bind(exit_time)
        .bind(exit_price.to_string())
        .bind(pnl.to_string())
        .bind(trade_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Re-stamp a claimed exit with the actual fill. Guarded on the row
    /// already being closed so it can never resurrect an OPEN trade.
    pub async fn finalize_exit(
        &self,
        trade_id: i64,
        exit_price: Decimal,
        pnl: Decimal,
        status: TradeStatus,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trades SET exit_price = ?1, pnl = ?2, status = ?3
            WHERE id = ?4 AND status != 'OPEN'
            "#,
        )
        .bind(exit_price.to_string())
        .bind(pnl.to_string())
        .bind(status.as_str())
        .bind(trade_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn trade_count_on(&self, date: NaiveDate, mode: TradeMode) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM trades WHERE date = ?1 AND mode = ?2")
            .bind(date)
            .bind(mode.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("cnt"))
    }

    pub async fn recent_trades(&self, limit: i64) -> Result<Vec<Trade>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM trades ORDER BY id DESC LIMIT ?1",
            TRADE_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(trade_from_row).collect()
    }

    pub async fn trades_on(&self, date: NaiveDate) -> Result<Vec<Trade>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM trades WHERE date = ?1 ORDER BY id",
            TRADE_COLUMNS
        ))
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(trade_from_row).collect()
    }

    /// Net realized pnl across closed trades on or after `start`
    pub async fn pnl_since(&self, start: NaiveDate) -> Result<Decimal> {
        let rows = sqlx::query("SELECT pnl FROM trades WHERE date >= ?1 AND status != 'OPEN'")
            .bind(start)
            .fetch_all(&self.pool)
            .await?;

        let mut total = Decimal::ZERO;
        for row in &rows {
            if let Some(pnl) = opt_decimal_col(row, "pnl")? {
                total += pnl;
            }
        }
        Ok(total)
    }

    pub async fn daily_summary(&self, date: NaiveDate) -> Result<DailySummary> {
        let trades = self.trades_on(date).await?;
        let mut summary = DailySummary {
            trades: 0,
            wins: 0,
            losses: 0,
            net_pnl: Decimal::ZERO,
        };
        for trade in trades.iter().filter(|t| t.status.is_terminal()) {
            summary.trades += 1;
            let pnl = trade.pnl.unwrap_or(Decimal::ZERO);
            summary.net_pnl += pnl;
            if pnl > Decimal::ZERO {
                summary.wins += 1;
            } else {
                summary.losses += 1;
            }
        }
        Ok(summary)
    }

    // ==================== Audit log ====================

    /// Append-only; every accepted command lands here before it is applied
    pub async fn append_audit(&self, actor_chat_id: i64, command: &str, details: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_log (ts, actor_chat_id, command, details) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(Utc::now())
        .bind(actor_chat_id)
        .bind(command)
        .bind(details)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn purge_audit_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM audit_log WHERE ts < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        let purged = result.rows_affected();
        if purged > 0 {
            info!(purged, "old audit rows purged");
        }
        Ok(purged)
    }

    // ==================== Daily run ====================

    /// (summary_sent, recorded pnl) for a date, if the day was seen
    pub async fn daily_run(&self, date: NaiveDate) -> Result<Option<(bool, Decimal)>> {
        let row = sqlx::query("SELECT summary_sent, pnl FROM daily_run WHERE date = ?1")
            .bind(date)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let sent: bool = r.get("summary_sent");
            Ok((sent, decimal_col(&r, "pnl")?))
        })
        .transpose()
    }

    pub async fn mark_summary_sent(&self, date: NaiveDate, pnl: Decimal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_run (date, summary_sent, pnl) VALUES (?1, 1, ?2)
            ON CONFLICT (date) DO UPDATE SET summary_sent = 1, pnl = excluded.pnl
            "#,
        )
        .bind(date)
        .bind(pnl.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OptionSide;
    use rust_decimal_macros::dec;

    fn sample_trade() -> Trade {
        Trade {
            id: None,
            date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            mode: TradeMode::Paper,
            symbol: "NSE_FO|50201".to_string(),
            side: OptionSide::Ce,
            entry_time: Utc::now(),
            entry_price: dec!(180),
            exit_time: None,
            exit_price: None,
            quantity: 50,
            pnl: None,
            status: TradeStatus::Open,
        }
    }

    fn sample_snapshot() -> StopSnapshot {
        StopSnapshot {
            current_stop: dec!(160),
            peak_price: dec!(180),
            trailing_active: false,
            breakeven_locked: false,
            target_price: dec!(220),
        }
    }

    #[tokio::test]
    async fn settings_last_write_wins() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.set_setting(SETTING_PAUSED, "0").await.unwrap();
        store.set_setting(SETTING_PAUSED, "1").await.unwrap();
        assert!(store.flag_setting(SETTING_PAUSED).await.unwrap());

        store.seed_setting(SETTING_PAUSED, "0").await.unwrap();
        assert!(store.flag_setting(SETTING_PAUSED).await.unwrap());
    }

    #[tokio::test]
    async fn params_seed_does_not_clobber() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.set_param("TARGET_PREMIUM", "200").await.unwrap();
        store
            .seed_params(&[("TARGET_PREMIUM".into(), "180".into()), ("SL_POINTS".into(), "20".into())])
            .await
            .unwrap();

        let params = store.all_params().await.unwrap();
        assert_eq!(params["TARGET_PREMIUM"], "200");
        assert_eq!(params["SL_POINTS"], "20");
    }

    #[tokio::test]
    async fn entry_persists_trade_and_stop_atomically() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store
            .insert_trade(&sample_trade(), &sample_snapshot())
            .await
            .unwrap();

        let (trade, state) = store.open_trade().await.unwrap().expect("open trade");
        assert_eq!(trade.id, Some(id));
        assert_eq!(trade.entry_price, dec!(180));
        assert_eq!(trade.status, TradeStatus::Open);
        let state = state.expect("stop state stored with the trade");
        assert_eq!(state.current_stop, dec!(160));
        assert!(!state.trailing_active);
    }

    #[tokio::test]
    async fn claim_exit_has_exactly_one_winner() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store
            .insert_trade(&sample_trade(), &sample_snapshot())
            .await
            .unwrap();

        let now = Utc::now();
        let first = store
            .claim_exit(id, now, dec!(195), dec!(750), TradeStatus::Win)
            .await
            .unwrap();
        let second = store
            .claim_exit(id, now, dec!(160), dec!(-1000), TradeStatus::Loss)
            .await
            .unwrap();

        assert!(first);
        assert!(!second);

        let trades = store.recent_trades(1).await.unwrap();
        assert_eq!(trades[0].status, TradeStatus::Win);
        assert_eq!(trades[0].exit_price, Some(dec!(195)));
        assert!(store.open_trade().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn finalize_updates_claimed_row_only() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store
            .insert_trade(&sample_trade(), &sample_snapshot())
            .await
            .unwrap();

        // Finalizing before a claim must not touch the OPEN row.
        store
            .finalize_exit(id, dec!(200), dec!(1000), TradeStatus::Win)
            .await
            .unwrap();
        assert!(store.open_trade().await.unwrap().is_some());

        store
            .claim_exit(id, Utc::now(), dec!(195), dec!(750), TradeStatus::Win)
            .await
            .unwrap();
        store
            .finalize_exit(id, dec!(196.4), dec!(820), TradeStatus::Win)
            .await
            .unwrap();

        let trades = store.recent_trades(1).await.unwrap();
        assert_eq!(trades[0].exit_price, Some(dec!(196.4)));
        assert_eq!(trades[0].pnl, Some(dec!(820)));
    }

    #[tokio::test]
    async fn counts_trades_per_mode_and_date() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .insert_trade(&sample_trade(), &sample_snapshot())
            .await
            .unwrap();

        let date = sample_trade().date;
        assert_eq!(store.trade_count_on(date, TradeMode::Paper).await.unwrap(), 1);
        assert_eq!(store.trade_count_on(date, TradeMode::Live).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn daily_run_marker_is_idempotent() {
        let store = SqliteStore::in_memory().await.unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();

        assert!(store.daily_run(date).await.unwrap().is_none());
        store.mark_summary_sent(date, dec!(750)).await.unwrap();
        store.mark_summary_sent(date, dec!(750)).await.unwrap();

        let (sent, pnl) = store.daily_run(date).await.unwrap().unwrap();
        assert!(sent);
        assert_eq!(pnl, dec!(750));
    }

    #[tokio::test]
    async fn audit_purge_respects_cutoff() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.append_audit(7, "PAUSE", "").await.unwrap();

        let purged = store
            .purge_audit_before(Utc::now() - chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(purged, 0);

        let purged = store
            .purge_audit_before(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
    }

    #[tokio::test]
    async fn daily_summary_aggregates_closed_trades() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store
            .insert_trade(&sample_trade(), &sample_snapshot())
            .await
            .unwrap();
        store
            .claim_exit(id, Utc::now(), dec!(195), dec!(750), TradeStatus::Win)
            .await
            .unwrap();

        let summary = store.daily_summary(sample_trade().date).await.unwrap();
        assert_eq!(summary.trades, 1);
        assert_eq!(summary.wins, 1);
        assert_eq!(summary.net_pnl, dec!(750));
    }
}
