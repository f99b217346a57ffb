//! Session identity carried across reconnects.

use std::time::Duration;

/// What the client needs to resume: session id, last sequence, cadence.
///
/// Only the controller task mutates a `Session`; everyone else sees clones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    session_id: Option<String>,
    sequence: Option<u64>,
    resume_url: Option<String>,
    heartbeat_interval: Option<Duration>,
}

impl Session {
    /// An empty session.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            session_id: None,
            sequence: None,
            resume_url: None,
            heartbeat_interval: None,
        }
    }

    /// Session id assigned by the server, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Last sequence number seen.
    #[must_use]
    pub const fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    /// URL the server asked resumes to use.
    #[must_use]
    pub fn resume_url(&self) -> Option<&str> {
        self.resume_url.as_deref()
    }

    /// Heartbeat cadence negotiated on the last HELLO.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval
    }

    /// Whether a RESUME can be attempted.
    #[must_use]
    pub const fn can_resume(&self) -> bool {
        self.session_id.is_some()
    }

    /// Record a session id (and resume URL) from READY.
    pub fn assign(&mut self, session_id: impl Into<String>, resume_url: Option<String>) {
        self.session_id = Some(session_id.into());
        self.resume_url = resume_url;
    }

    /// Record a dispatch sequence. Never moves backwards.
    pub fn observe_sequence(&mut self, sequence: u64) {
        self.sequence = Some(self.sequence.map_or(sequence, |current| current.max(sequence)));
    }

    /// Record the cadence from HELLO.
    pub fn set_heartbeat_interval(&mut self, interval: Duration) {
        self.heartbeat_interval = Some(interval);
    }

    /// Abandon the session: the next handshake will IDENTIFY.
    pub fn reset(&mut self) {
        self.session_id = None;
        self.sequence = None;
        self.resume_url = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_empty() {
        let session = Session::new();
        assert!(session.session_id().is_none());
        assert!(session.sequence().is_none());
        assert!(!session.can_resume());
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let mut session = Session::new();
        session.observe_sequence(5);
        session.observe_sequence(3);
        assert_eq!(session.sequence(), Some(5));
        session.observe_sequence(6);
        assert_eq!(session.sequence(), Some(6));
    }

    #[test]
    fn test_assign_enables_resume() {
        let mut session = Session::new();
        session.assign("abc", Some("wss://resume.example".into()));
        assert!(session.can_resume());
        assert_eq!(session.session_id(), Some("abc"));
        assert_eq!(session.resume_url(), Some("wss://resume.example"));
    }

    #[test]
    fn test_reset_clears_identity_but_keeps_interval() {
        let mut session = Session::new();
        session.assign("abc", None);
        session.observe_sequence(9);
        session.set_heartbeat_interval(Duration::from_millis(45_000));

        session.reset();

        assert!(!session.can_resume());
        assert!(session.sequence().is_none());
        assert_eq!(session.heartbeat_interval(), Some(Duration::from_millis(45_000)));
    }
}
