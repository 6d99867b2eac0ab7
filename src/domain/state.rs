use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the engine for its single symbol-leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineState {
    /// No position; waiting for the entry window and a qualifying premium
    Idle,
    /// Entry order in flight, waiting for fill confirmation
    Armed,
    /// Position open, initial stop in force
    Entered,
    /// Stop raised to at least cost by the checkpoint rule
    BreakevenLocked,
    /// Stop follows the peak favorable price at a fixed gap
    Trailing,
    /// Position closed; terminal for the day
    Closed,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Idle => "IDLE",
            EngineState::Armed => "ARMED",
            EngineState::Entered => "ENTERED",
            EngineState::BreakevenLocked => "BREAKEVEN_LOCKED",
            EngineState::Trailing => "TRAILING",
            EngineState::Closed => "CLOSED",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: EngineState) -> bool {
        use EngineState::*;

        match (self, target) {
            // From Idle
            (Idle, Armed) => true,

            // From Armed
            (Armed, Entered) => true, // Fill confirmed
            (Armed, Idle) => true,    // Rejected/cancelled, window may rearm
            (Armed, Closed) => true,  // Killed while in flight

            // From Entered
            (Entered, BreakevenLocked) => true,
            (Entered, Trailing) => true,
            (Entered, Closed) => true,

            // From BreakevenLocked
            (BreakevenLocked, Trailing) => true,
            (BreakevenLocked, Closed) => true,

            // From Trailing
            (Trailing, Closed) => true,

            // From Closed
            (Closed, Idle) => true, // Next session

            // All other transitions are invalid
            _ => false,
        }
    }

    /// Is a position currently under management?
    pub fn is_managing(&self) -> bool {
        matches!(
            self,
            EngineState::Entered | EngineState::BreakevenLocked | EngineState::Trailing
        )
    }

    /// Can a new entry signal be acted on from here?
    pub fn accepts_entries(&self) -> bool {
        matches!(self, EngineState::Idle)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for EngineState {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "IDLE" => Ok(EngineState::Idle),
            "ARMED" => Ok(EngineState::Armed),
            "ENTERED" => Ok(EngineState::Entered),
            "BREAKEVEN_LOCKED" => Ok(EngineState::BreakevenLocked),
            "TRAILING" => Ok(EngineState::Trailing),
            "CLOSED" => Ok(EngineState::Closed),
            _ => Err(format!("unknown state: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        use EngineState::*;

        assert!(Idle.can_transition_to(Armed));
        assert!(Armed.can_transition_to(Entered));
        assert!(Armed.can_transition_to(Idle));
        assert!(Entered.can_transition_to(BreakevenLocked));
        assert!(Entered.can_transition_to(Trailing));
        assert!(BreakevenLocked.can_transition_to(Trailing));
        assert!(Trailing.can_transition_to(Closed));
        assert!(Closed.can_transition_to(Idle));

        // Invalid transitions
        assert!(!Idle.can_transition_to(Entered));
        assert!(!Trailing.can_transition_to(BreakevenLocked));
        assert!(!Trailing.can_transition_to(Entered));
        assert!(!Closed.can_transition_to(Armed));
    }

    #[test]
    fn managing_states() {
        assert!(!EngineState::Idle.is_managing());
        assert!(!EngineState::Armed.is_managing());
        assert!(EngineState::Entered.is_managing());
        assert!(EngineState::BreakevenLocked.is_managing());
        assert!(EngineState::Trailing.is_managing());
        assert!(!EngineState::Closed.is_managing());
    }

    #[test]
    fn state_from_str() {
        assert_eq!(
            EngineState::try_from("breakeven_locked").unwrap(),
            EngineState::BreakevenLocked
        );
        assert!(EngineState::try_from("LIMBO").is_err());
    }
}
