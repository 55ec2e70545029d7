//! Live sessions keyed by CDP session id, so target lifecycle events can close them.

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tabwright_core_types::{SessionId, TargetId};

#[derive(Clone, Debug)]
pub struct SessionEntry {
    pub target_id: TargetId,
    pub closed: CancellationToken,
}

#[derive(Default)]
pub struct Registry {
    sessions: DashMap<SessionId, SessionEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly attached session and hand back its close signal.
    pub fn insert(&self, session: SessionId, target: TargetId) -> CancellationToken {
        let closed = CancellationToken::new();
        self.sessions.insert(
            session,
            SessionEntry {
                target_id: target,
                closed: closed.clone(),
            },
        );
        closed
    }

    pub fn get(&self, session: &SessionId) -> Option<SessionEntry> {
        self.sessions.get(session).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close one session; returns false if it was not tracked.
    pub fn close_session(&self, session: &SessionId) -> bool {
        match self.sessions.remove(session) {
            Some((_, entry)) => {
                entry.closed.cancel();
                debug!(target: "cdp-registry", %session, target = %entry.target_id, "session closed");
                true
            }
            None => false,
        }
    }

    /// Close every session attached to `target`.
    pub fn close_target(&self, target: &TargetId) -> usize {
        let mut closed = 0;
        self.sessions.retain(|session, entry| {
            if &entry.target_id != target {
                return true;
            }
            entry.closed.cancel();
            debug!(target: "cdp-registry", %session, %target, "session closed with its target");
            closed += 1;
            false
        });
        closed
    }

    /// Close everything, e.g. when the connection is gone.
    pub fn close_all(&self) {
        self.sessions.retain(|_, entry| {
            entry.closed.cancel();
            false
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_destruction_closes_all_its_sessions() {
        let registry = Registry::new();
        let a = registry.insert("S1".into(), "T1".into());
        let b = registry.insert("S2".into(), "T1".into());
        let other = registry.insert("S3".into(), "T2".into());

        assert_eq!(registry.close_target(&"T1".into()), 2);
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert!(!other.is_cancelled());
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&"S3".into()).is_some());
    }

    #[test]
    fn closing_unknown_session_is_a_no_op() {
        let registry = Registry::new();
        assert!(!registry.close_session(&"nope".into()));
        let token = registry.insert("S1".into(), "T1".into());
        assert!(registry.close_session(&"S1".into()));
        assert!(token.is_cancelled());
        registry.close_all();
        assert!(registry.is_empty());
    }
}
