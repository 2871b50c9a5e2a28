//! State-event bus shared by the daemon subsystems
//!
//! Every observable transition (audio-mode change, connection health
//! change, timer edge) is published here as a structured event. Outer
//! surfaces such as the broker publisher subscribe to this bus; the core
//! never waits on subscribers.

use serde::{Deserialize, Serialize};

use crate::connection::{ConnectionKind, ConnectionState};
use crate::orchestrator::AudioMode;

/// Events broadcast by the orchestration core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// The audio hardware changed owners
    ModeChanged {
        from: AudioMode,
        to: AudioMode,
    },

    /// A managed connection changed health state
    ConnectionChanged {
        kind: ConnectionKind,
        state: ConnectionState,
        retry_count: u32,
    },

    /// A countdown timer reached zero
    TimerExpired {
        id: u8,
        label: String,
    },

    /// A running timer crossed a warning boundary
    TimerWarning {
        id: u8,
        remaining_seconds: u32,
    },
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateEvent::ModeChanged { from, to } => write!(f, "MODE {from} -> {to}"),
            StateEvent::ConnectionChanged {
                kind,
                state,
                retry_count,
            } => write!(f, "CONNECTION {kind} {state:?} (retries: {retry_count})"),
            StateEvent::TimerExpired { id, label } => write!(f, "TIMER #{id} '{label}' expired"),
            StateEvent::TimerWarning {
                id,
                remaining_seconds,
            } => write!(f, "TIMER #{id} warning ({remaining_seconds}s remaining)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = StateEvent::ModeChanged {
            from: AudioMode::Idle,
            to: AudioMode::ListeningForWakeWord,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("mode_changed"));
        assert!(json.contains("listening_for_wake_word"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"timer_expired","id":2,"label":"Pasta"}"#;
        let event: StateEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, StateEvent::TimerExpired { id: 2, .. }));
    }

    #[test]
    fn test_display() {
        let event = StateEvent::TimerWarning {
            id: 1,
            remaining_seconds: 30,
        };
        assert_eq!(event.to_string(), "TIMER #1 warning (30s remaining)");
    }
}
