pub mod params;
pub mod state;
pub mod trade;

pub use params::StrategyParams;
pub use state::EngineState;
pub use trade::{ExitReason, OptionSide, StopSnapshot, Trade, TradeMode, TradeStatus};
