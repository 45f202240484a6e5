use thiserror::Error;

use crate::models::CollectionKind;

/// Failure taxonomy for a report run.
///
/// Fetch and timestamp failures abort the run (or degrade, per the selected
/// fetch policy); ledger and classifier code never error on well-formed
/// input, so a `Classification` error always points at the goal table.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("fatal fetch failure for {collection} in blocks {from}-{to}: {reason}")]
    FatalFetch {
        collection: CollectionKind,
        from: u64,
        to: u64,
        reason: String,
    },

    #[error("window fetch failure for {collection} in blocks {from}-{to}: {reason}")]
    TransientWindow {
        collection: CollectionKind,
        from: u64,
        to: u64,
        reason: String,
    },

    #[error("fatal balance sweep failure for {collection} token {token_id}: {reason}")]
    SweepFetch {
        collection: CollectionKind,
        token_id: u64,
        reason: String,
    },

    #[error("timestamp for block {block} unavailable: {reason}")]
    Timestamp { block: u64, reason: String },

    #[error("goal `{goal}` is inconsistent with the snapshot: {reason}")]
    Classification { goal: String, reason: String },
}

impl IndexError {
    /// Escalate a skippable window failure into a run-aborting one. Used by
    /// the strict fetch policy; the best-effort policy logs and moves on.
    pub fn into_fatal(self) -> IndexError {
        match self {
            IndexError::TransientWindow {
                collection,
                from,
                to,
                reason,
            } => IndexError::FatalFetch {
                collection,
                from,
                to,
                reason,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::IndexError;
    use crate::models::CollectionKind;

    #[test]
    fn test_window_failure_escalates_to_fatal() {
        let err = IndexError::TransientWindow {
            collection: CollectionKind::Pets,
            from: 100,
            to: 200,
            reason: "timeout".to_string(),
        };
        match err.into_fatal() {
            IndexError::FatalFetch { from, to, .. } => {
                assert_eq!(from, 100);
                assert_eq!(to, 200);
            }
            other => panic!("expected FatalFetch, got {other:?}"),
        }
    }

    #[test]
    fn test_non_window_errors_pass_through_escalation() {
        let err = IndexError::Timestamp {
            block: 42,
            reason: "gone".to_string(),
        };
        assert!(matches!(
            err.into_fatal(),
            IndexError::Timestamp { block: 42, .. }
        ));
    }
}
