pub mod engine;
pub mod selector;
pub mod stops;

pub use engine::{Engine, EngineConfig};
pub use selector::{build_watchlist, breakout_signal, WatchLeg, Watchlist};
pub use stops::{StopBook, TrailRule};
