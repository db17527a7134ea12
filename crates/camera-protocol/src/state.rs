//! Session lifecycle state machine

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SessionError;

/// Camera protocol lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SessionState {
    /// Hardware not open
    Removed = 0,
    /// Hardware detected, not opened
    Inserted = 1,
    /// Hardware opened
    Connected = 2,
    /// Opened, no stream configuration applied
    Unconfigured = 3,
    /// Stream configuration accepted, sensor powered
    Configured = 4,
    /// Capture worker running a capture
    Streaming = 5,
}

/// Protocol operations as seen by the admissibility table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Version,
    Capabilities,
    /// CONFIGURE_STREAMS with a non-empty stream list
    ConfigureStreams,
    /// CONFIGURE_STREAMS with an empty stream list
    QueryStreams,
    Capture,
    Flush,
    MetaData,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Version => "protocol version",
            Operation::Capabilities => "capabilities",
            Operation::ConfigureStreams => "configure streams",
            Operation::QueryStreams => "query streams",
            Operation::Capture => "capture",
            Operation::Flush => "flush",
            Operation::MetaData => "meta data",
        };
        f.write_str(name)
    }
}

impl SessionState {
    /// Whether `op` may run in this state
    pub fn admits(&self, op: Operation) -> bool {
        use SessionState::*;

        match op {
            Operation::Version => true,
            Operation::Capabilities => *self == Connected,
            Operation::ConfigureStreams => matches!(self, Connected | Unconfigured),
            Operation::QueryStreams => matches!(self, Connected | Configured),
            Operation::Capture => matches!(self, Configured | Streaming),
            Operation::Flush => matches!(self, Streaming | Connected),
            Operation::MetaData => matches!(self, Connected | Unconfigured | Configured | Streaming),
        }
    }
}

/// Lifecycle state plus the capture id high-water mark.
///
/// Guarded by the session's state lock; handlers hold it for the whole
/// operation, the worker only for its Configured/Streaming transitions.
#[derive(Debug)]
pub struct StateMachine {
    state: SessionState,
    last_accepted_id: u32,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Removed,
            last_accepted_id: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_accepted_id(&self) -> u32 {
        self.last_accepted_id
    }

    /// Reject `op` unless the current state admits it
    pub fn check(&self, op: Operation) -> Result<(), SessionError> {
        if self.state.admits(op) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                op,
                state: self.state,
            })
        }
    }

    pub fn transition(&mut self, to: SessionState) {
        if self.state != to {
            debug!("Session state {:?} -> {:?}", self.state, to);
            self.state = to;
        }
    }

    /// Reject ids at or below the high-water mark
    pub fn check_request_id(&self, request_id: u32) -> Result<(), SessionError> {
        if request_id <= self.last_accepted_id {
            return Err(SessionError::StaleRequest {
                request_id,
                last_accepted: self.last_accepted_id,
            });
        }
        Ok(())
    }

    /// Advance the high-water mark after a request was queued
    pub fn record_accepted(&mut self, request_id: u32) {
        self.last_accepted_id = self.last_accepted_id.max(request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL_STATES: [SessionState; 6] = [
        SessionState::Removed,
        SessionState::Inserted,
        SessionState::Connected,
        SessionState::Unconfigured,
        SessionState::Configured,
        SessionState::Streaming,
    ];

    #[test]
    fn test_admissibility_table() {
        let admitted = |op| -> Vec<SessionState> {
            ALL_STATES.iter().copied().filter(|s| s.admits(op)).collect()
        };

        assert_eq!(admitted(Operation::Version).len(), 6);
        assert_eq!(admitted(Operation::Capabilities), vec![SessionState::Connected]);
        assert_eq!(
            admitted(Operation::ConfigureStreams),
            vec![SessionState::Connected, SessionState::Unconfigured]
        );
        assert_eq!(
            admitted(Operation::QueryStreams),
            vec![SessionState::Connected, SessionState::Configured]
        );
        assert_eq!(
            admitted(Operation::Capture),
            vec![SessionState::Configured, SessionState::Streaming]
        );
        assert_eq!(
            admitted(Operation::Flush),
            vec![SessionState::Connected, SessionState::Streaming]
        );
        assert!(!SessionState::Removed.admits(Operation::MetaData));
        assert!(!SessionState::Inserted.admits(Operation::MetaData));
    }

    #[test]
    fn test_check_reports_state() {
        let machine = StateMachine::new();
        match machine.check(Operation::Capture) {
            Err(SessionError::InvalidState { op, state }) => {
                assert_eq!(op, Operation::Capture);
                assert_eq!(state, SessionState::Removed);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    proptest! {
        #[test]
        fn prop_stale_ids_always_rejected(ids in proptest::collection::vec(any::<u32>(), 1..64)) {
            let mut machine = StateMachine::new();
            let mut accepted: Vec<u32> = Vec::new();

            for id in ids {
                match machine.check_request_id(id) {
                    Ok(()) => {
                        prop_assert!(accepted.iter().all(|prev| *prev < id));
                        machine.record_accepted(id);
                        accepted.push(id);
                    }
                    Err(_) => {
                        prop_assert!(id == 0 || accepted.iter().any(|prev| *prev >= id));
                    }
                }
            }
            for id in &accepted {
                prop_assert!(machine.check_request_id(*id).is_err());
            }
        }
    }
}
