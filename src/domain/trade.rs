use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Option leg: call or put
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionSide {
    Ce,
    Pe,
}

impl OptionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionSide::Ce => "CE",
            OptionSide::Pe => "PE",
        }
    }
}

impl fmt::Display for OptionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for OptionSide {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "CE" => Ok(OptionSide::Ce),
            "PE" => Ok(OptionSide::Pe),
            _ => Err(format!("unknown option side: {}", s)),
        }
    }
}

/// Execution mode: real money or simulated fills over live data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeMode {
    Live,
    Paper,
}

impl TradeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeMode::Live => "LIVE",
            TradeMode::Paper => "PAPER",
        }
    }
}

impl fmt::Display for TradeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for TradeMode {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "LIVE" => Ok(TradeMode::Live),
            "PAPER" => Ok(TradeMode::Paper),
            _ => Err(format!("unknown mode: {}", s)),
        }
    }
}

/// Trade row status. `Open` is the mutual-exclusion guard for exits:
/// whichever path moves the row off `Open` first owns the close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Win,
    Loss,
    Cost,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "OPEN",
            TradeStatus::Win => "WIN",
            TradeStatus::Loss => "LOSS",
            TradeStatus::Cost => "COST",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeStatus::Open)
    }

    /// Terminal status implied by a realized pnl
    pub fn for_pnl(pnl: Decimal) -> Self {
        if pnl > Decimal::ZERO {
            TradeStatus::Win
        } else if pnl < Decimal::ZERO {
            TradeStatus::Loss
        } else {
            TradeStatus::Cost
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for TradeStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "OPEN" => Ok(TradeStatus::Open),
            "WIN" => Ok(TradeStatus::Win),
            "LOSS" => Ok(TradeStatus::Loss),
            "COST" => Ok(TradeStatus::Cost),
            _ => Err(format!("unknown trade status: {}", s)),
        }
    }
}

/// Why a position was closed; recorded in the audit trail and alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopHit,
    TargetHit,
    Manual,
    Failsafe,
    Kill,
    SquareOff,
    /// Below cost at the breakeven checkpoint
    CheckpointAbort,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopHit => "stop hit",
            ExitReason::TargetHit => "target hit",
            ExitReason::Manual => "manual exit",
            ExitReason::Failsafe => "failsafe exit",
            ExitReason::Kill => "kill switch",
            ExitReason::SquareOff => "square-off time",
            ExitReason::CheckpointAbort => "below cost at checkpoint",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One position instance, as persisted in the trades table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Option<i64>,
    pub date: NaiveDate,
    pub mode: TradeMode,
    /// Instrument key of the traded option contract
    pub symbol: String,
    pub side: OptionSide,
    pub entry_time: DateTime<Utc>,
    pub entry_price: Decimal,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    pub quantity: i64,
    pub pnl: Option<Decimal>,
    pub status: TradeStatus,
}

impl Trade {
    /// Realized pnl for an exit at `exit_price`
    pub fn pnl_at(&self, exit_price: Decimal) -> Decimal {
        (exit_price - self.entry_price) * Decimal::from(self.quantity)
    }
}

/// Durable working state of the open position: the stop the watchdog
/// enforces and the fields recovery rebuilds the engine from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopSnapshot {
    pub current_stop: Decimal,
    pub peak_price: Decimal,
    pub trailing_active: bool,
    pub breakeven_locked: bool,
    pub target_price: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn status_for_pnl() {
        assert_eq!(TradeStatus::for_pnl(dec!(250)), TradeStatus::Win);
        assert_eq!(TradeStatus::for_pnl(dec!(-10)), TradeStatus::Loss);
        assert_eq!(TradeStatus::for_pnl(Decimal::ZERO), TradeStatus::Cost);
    }

    #[test]
    fn status_roundtrip() {
        for s in ["OPEN", "WIN", "LOSS", "COST"] {
            let status = TradeStatus::try_from(s).unwrap();
            assert_eq!(status.as_str(), s);
        }
        assert!(TradeStatus::try_from("CLOSING").is_err());
    }

    #[test]
    fn pnl_scales_by_quantity() {
        let trade = Trade {
            id: Some(1),
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
        };
        assert_eq!(trade.pnl_at(dec!(195)), dec!(750));
        assert_eq!(trade.pnl_at(dec!(160)), dec!(-1000));
    }
}
