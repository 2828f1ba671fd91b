//! Super-transaction state and the cluster-wide event log. Grounded on the state
//! machine narrative and `EventLogger.h`/`.cc` in the original implementation.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Unique, monotonic-within-a-database identifier for a super-transaction. It doubles as the
/// MySQL partition key (`qserv_trans_id`) on every partitioned user table and on the director
/// index.
pub type TransactionId = u32;

/// The super-transaction lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// Being created; not yet visible to ingest.
    IsStarting,
    /// Visible and accepting contributions.
    Started,
    /// Commit protocol running.
    IsFinishing,
    /// Abort protocol running.
    IsAborting,
    /// Terminal: committed successfully.
    Finished,
    /// Terminal: aborted successfully.
    Aborted,
    /// Terminal: `begin` failed.
    StartFailed,
    /// Terminal: commit protocol failed.
    FinishFailed,
    /// Terminal: abort protocol failed.
    AbortFailed,
}

impl TransactionState {
    /// Terminal states are immutable: no further transition is ever allowed out of them
    ///
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Finished | Self::Aborted | Self::StartFailed | Self::FinishFailed | Self::AbortFailed
        )
    }

    /// Validates `self -> next` against the allowed transition table.
    pub fn can_transition_to(self, next: Self) -> bool {
        use TransactionState::*;
        matches!(
            (self, next),
            (IsStarting, Started)
                | (IsStarting, StartFailed)
                | (Started, IsFinishing)
                | (Started, IsAborting)
                | (IsFinishing, Finished)
                | (IsFinishing, FinishFailed)
                | (IsAborting, Aborted)
                | (IsAborting, AbortFailed)
        )
    }
}

/// One append-only entry in a transaction's event log, recording a named step of the begin/end
/// protocol together with its outcome. Modeled on `ControllerEvent`/`EventLogger`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerEvent {
    /// Milliseconds since epoch.
    pub timestamp: u64,
    /// Short event name, e.g. `"begin add dir idx part"`.
    pub name: String,
    /// `true` unless `error` is set.
    pub success: bool,
    /// Present on failure.
    pub error: Option<String>,
    /// Free-form structured data attached to the event (job ids, progress snapshots, etc).
    pub data: Json,
}

impl ControllerEvent {
    /// Records a successful step.
    pub fn ok(timestamp: u64, name: impl Into<String>, data: Json) -> Self {
        Self {
            timestamp,
            name: name.into(),
            success: true,
            error: None,
            data,
        }
    }

    /// Records a failed step.
    pub fn failed(timestamp: u64, name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            timestamp,
            name: name.into(),
            success: false,
            error: Some(error.into()),
            data: Json::Null,
        }
    }
}

/// The persistent record of one super-transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionInfo {
    /// Unique id.
    pub id: TransactionId,
    /// Owning database.
    pub database: String,
    /// Current state.
    pub state: TransactionState,
    /// Optional free-form context supplied at `begin`/`end`.
    pub context: Option<Json>,
    /// Append-only event log.
    pub log: Vec<ControllerEvent>,
    /// Set when the transaction enters `IsStarting`.
    pub begin_time: u64,
    /// Set when the transaction reaches a terminal state.
    pub end_time: u64,
}

impl TransactionInfo {
    /// Creates a new transaction in `IsStarting`.
    pub fn new(id: TransactionId, database: impl Into<String>, context: Option<Json>, now: u64) -> Self {
        Self {
            id,
            database: database.into(),
            state: TransactionState::IsStarting,
            context,
            log: Vec::new(),
            begin_time: now,
            end_time: 0,
        }
    }

    /// Attempts `self.state -> next`, appending the transition as an event. Fails without
    /// mutating anything if the transition is not allowed by the state diagram, or if the
    /// current state is already terminal
    pub fn transition(&mut self, next: TransactionState, now: u64) -> Result<(), TransitionError> {
        if self.state.is_terminal() {
            return Err(TransitionError::Terminal { from: self.state });
        }
        if !self.state.can_transition_to(next) {
            return Err(TransitionError::NotAllowed {
                from: self.state,
                to: next,
            });
        }
        self.log.push(ControllerEvent::ok(
            now,
            format!("{:?} -> {:?}", self.state, next),
            Json::Null,
        ));
        self.state = next;
        if next.is_terminal() {
            self.end_time = now;
        }
        Ok(())
    }
}

/// Error returned by [`TransactionInfo::transition`].
#[derive(Debug, snafu::Snafu, PartialEq, Eq)]
pub enum TransitionError {
    /// The transaction is already in a terminal state.
    #[snafu(display("transaction is already in terminal state {from:?}"))]
    Terminal {
        /// The terminal state it was in.
        from: TransactionState,
    },
    /// `from -> to` is not a defined edge in the state diagram.
    #[snafu(display("no transition from {from:?} to {to:?}"))]
    NotAllowed {
        /// Source state.
        from: TransactionState,
        /// Attempted destination.
        to: TransactionState,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionState::*;

    #[test]
    fn happy_path_commit() {
        let mut t = TransactionInfo::new(1, "db", None, 0);
        t.transition(Started, 1).unwrap();
        t.transition(IsFinishing, 2).unwrap();
        t.transition(Finished, 3).unwrap();
        assert_eq!(t.state, Finished);
        assert_eq!(t.end_time, 3);
    }

    #[test]
    fn happy_path_abort() {
        let mut t = TransactionInfo::new(1, "db", None, 0);
        t.transition(Started, 1).unwrap();
        t.transition(IsAborting, 2).unwrap();
        t.transition(Aborted, 3).unwrap();
        assert_eq!(t.state, Aborted);
    }

    #[test]
    fn begin_failure_path() {
        let mut t = TransactionInfo::new(1, "db", None, 0);
        t.transition(StartFailed, 1).unwrap();
        assert_eq!(t.state, StartFailed);
    }

    /// Terminal states reject any further transition.
    #[test]
    fn terminal_states_are_immutable() {
        let mut t = TransactionInfo::new(1, "db", None, 0);
        t.transition(StartFailed, 1).unwrap();
        assert_eq!(
            t.transition(Started, 2),
            Err(TransitionError::Terminal { from: StartFailed })
        );
    }

    #[test]
    fn skipping_the_transitional_state_is_rejected() {
        let mut t = TransactionInfo::new(1, "db", None, 0);
        t.transition(Started, 1).unwrap();
        // Started -> Finished directly is not a defined edge; IsFinishing must be observed.
        assert_eq!(
            t.transition(Finished, 2),
            Err(TransitionError::NotAllowed {
                from: Started,
                to: Finished
            })
        );
    }
}
