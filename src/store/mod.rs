pub mod recovery;
pub mod sqlite;

pub use recovery::{Bootstrapper, RecoveredPosition, RecoveredState};
pub use sqlite::{
    DailySummary, SqliteStore, SETTING_ACCESS_TOKEN, SETTING_KILLED, SETTING_MODE, SETTING_PAUSED,
};
