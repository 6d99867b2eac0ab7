pub mod alerts;
pub mod cli;
pub mod command;
pub mod config;
pub mod control;
pub mod domain;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod runtime;
pub mod store;
pub mod watchdog;

pub use alerts::{Alert, AlertBus, AlertLevel};
pub use config::AppConfig;
pub use control::ControlFlags;
pub use engine::{Engine, EngineConfig};
pub use error::{BotError, Result};
pub use gateway::{GatewayFactory, GatewaySet};
pub use store::{Bootstrapper, SqliteStore};
pub use watchdog::Watchdog;
