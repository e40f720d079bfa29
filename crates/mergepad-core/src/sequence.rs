//! Optimistic-concurrency tracking of server revision numbers.

use serde::{Deserialize, Serialize};

/// How the local revision relates to the last one the server reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceStatus {
    /// No server revision seen yet.
    Unknown,
    InSync,
    /// Local is past the server. Not reachable through the tracker's own
    /// transitions; reported for completeness.
    Ahead,
    /// The server has moved on; a sync is needed.
    Stale,
}

/// Last-acknowledged server revision and the revision the local baseline reflects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceTracker {
    local: u64,
    server: Option<u64>,
}

impl SequenceTracker {
    /// Tracker for a baseline at revision `local`, before any server contact.
    pub fn new(local: u64) -> Self {
        Self {
            local,
            server: None,
        }
    }

    /// Tracker for a baseline freshly fetched at `sequence`.
    pub fn synced(sequence: u64) -> Self {
        Self {
            local: sequence,
            server: Some(sequence),
        }
    }

    pub fn local(&self) -> u64 {
        self.local
    }

    pub fn server(&self) -> Option<u64> {
        self.server
    }

    pub fn is_stale(&self) -> bool {
        self.server.is_some_and(|server| server != self.local)
    }

    pub fn status(&self) -> SequenceStatus {
        match self.server {
            None => SequenceStatus::Unknown,
            Some(server) if server == self.local => SequenceStatus::InSync,
            Some(server) if server < self.local => SequenceStatus::Ahead,
            Some(_) => SequenceStatus::Stale,
        }
    }

    /// Record the server's answer to a pushed delta.
    ///
    /// Fast-forwards only when the server revision is exactly one past the
    /// local one, meaning no other writer got in between. Any other value is
    /// remembered as the server revision (so [`Self::is_stale`] turns true) but
    /// leaves `local` alone. Returns whether `local` advanced.
    pub fn on_save_acknowledged(&mut self, new_server_sequence: u64) -> bool {
        self.server = Some(new_server_sequence);
        if self.local.checked_add(1) == Some(new_server_sequence) {
            self.local = new_server_sequence;
            true
        } else {
            tracing::debug!(
                local = self.local,
                server = new_server_sequence,
                "save not fast-forwarded"
            );
            false
        }
    }

    /// Adopt the server's revision after a full reconciliation.
    pub fn on_sync_completed(&mut self, server_sequence: u64) {
        self.local = server_sequence;
        self.server = Some(server_sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_until_first_contact() {
        let tracker = SequenceTracker::new(4);
        assert_eq!(tracker.server(), None);
        assert!(!tracker.is_stale());
        assert_eq!(tracker.status(), SequenceStatus::Unknown);
    }

    #[test]
    fn test_save_fast_forward() {
        let mut tracker = SequenceTracker::synced(7);
        assert!(tracker.on_save_acknowledged(8));
        assert_eq!(tracker.local(), 8);
        assert_eq!(tracker.server(), Some(8));
        assert_eq!(tracker.status(), SequenceStatus::InSync);
    }

    #[test]
    fn test_save_with_interleaved_writer() {
        let mut tracker = SequenceTracker::synced(7);
        assert!(!tracker.on_save_acknowledged(9));
        assert_eq!(tracker.local(), 7);
        assert!(tracker.is_stale());
        assert_eq!(tracker.status(), SequenceStatus::Stale);

        // Same revision again is not a fast-forward either.
        let mut tracker = SequenceTracker::synced(7);
        assert!(!tracker.on_save_acknowledged(7));
        assert_eq!(tracker.local(), 7);
    }

    #[test]
    fn test_sync_jumps() {
        let mut tracker = SequenceTracker::synced(3);
        tracker.on_save_acknowledged(6);
        tracker.on_sync_completed(6);
        assert_eq!(tracker.local(), 6);
        assert!(!tracker.is_stale());

        tracker.on_sync_completed(11);
        assert_eq!(tracker.local(), 11);
        assert_eq!(tracker.server(), Some(11));
    }

    #[test]
    fn test_fast_forward_from_unknown() {
        let mut tracker = SequenceTracker::new(0);
        assert!(tracker.on_save_acknowledged(1));
        assert_eq!(tracker.status(), SequenceStatus::InSync);
    }
}
