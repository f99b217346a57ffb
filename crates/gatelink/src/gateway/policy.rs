//! Failure classification: resume, start over, or stop.

use std::collections::BTreeSet;
use std::fmt;

use gatelink_proto::CloseCode;

/// Why the current connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectSignal {
    /// The previous heartbeat was never acknowledged.
    HeartbeatAckTimeout,
    /// Transport closed with a code other than normal closure.
    AbnormalClose(u16),
    /// Transport closed normally, by either side.
    NormalClose,
    /// Server invalidated the session.
    InvalidSession {
        /// Whether the server allows a resume.
        resumable: bool,
    },
    /// Server asked the client to reconnect.
    ReconnectRequested,
    /// Transport failed without a close frame.
    TransportError,
}

impl DisconnectSignal {
    /// Build a signal from a close frame code. No code counts as a transport
    /// error.
    #[must_use]
    pub fn from_close(code: Option<u16>) -> Self {
        match code {
            Some(code) if CloseCode::from(code).is_normal() => Self::NormalClose,
            Some(code) => Self::AbnormalClose(code),
            None => Self::TransportError,
        }
    }
}

impl fmt::Display for DisconnectSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeartbeatAckTimeout => write!(f, "heartbeat ack timeout"),
            Self::AbnormalClose(code) => write!(f, "closed with {}", CloseCode::from(*code)),
            Self::NormalClose => write!(f, "closed normally"),
            Self::InvalidSession { resumable } => {
                write!(f, "invalid session (resumable: {resumable})")
            }
            Self::ReconnectRequested => write!(f, "server requested reconnect"),
            Self::TransportError => write!(f, "transport error"),
        }
    }
}

/// What the controller does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAction {
    /// Reconnect and RESUME; the server decides whether it succeeds.
    Resume,
    /// Discard session id and sequence, reconnect and IDENTIFY.
    FreshIdentify,
    /// Stop for good.
    Terminal {
        /// Whether the stop is a clean shutdown rather than a failure.
        graceful: bool,
    },
}

impl fmt::Display for ReconnectAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resume => write!(f, "resume"),
            Self::FreshIdentify => write!(f, "fresh_identify"),
            Self::Terminal { graceful: true } => write!(f, "stop"),
            Self::Terminal { graceful: false } => write!(f, "terminal"),
        }
    }
}

/// Close codes after which reconnecting cannot help.
pub const DEFAULT_TERMINAL_CODES: [u16; 6] = [4004, 4010, 4011, 4012, 4013, 4014];

/// Classification rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Abnormal close codes that stop the client.
    pub terminal_codes: BTreeSet<u16>,
    /// Whether other abnormal closes attempt a resume (true) or start a
    /// fresh session (false).
    pub resume_on_abnormal_close: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            terminal_codes: DEFAULT_TERMINAL_CODES.into_iter().collect(),
            resume_on_abnormal_close: true,
        }
    }
}

impl ReconnectPolicy {
    /// Set whether ordinary abnormal closes resume.
    #[must_use]
    pub fn with_resume_on_abnormal_close(mut self, resume: bool) -> Self {
        self.resume_on_abnormal_close = resume;
        self
    }

    /// Replace the terminal close code set.
    #[must_use]
    pub fn with_terminal_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.terminal_codes = codes.into_iter().collect();
        self
    }

    /// Decide what to do after `signal`.
    #[must_use]
    pub fn classify(&self, signal: DisconnectSignal) -> ReconnectAction {
        match signal {
            DisconnectSignal::HeartbeatAckTimeout
            | DisconnectSignal::ReconnectRequested
            | DisconnectSignal::TransportError
            | DisconnectSignal::InvalidSession { resumable: true } => ReconnectAction::Resume,
            DisconnectSignal::InvalidSession { resumable: false } => {
                ReconnectAction::FreshIdentify
            }
            DisconnectSignal::NormalClose => ReconnectAction::Terminal { graceful: true },
            DisconnectSignal::AbnormalClose(code) if self.terminal_codes.contains(&code) => {
                ReconnectAction::Terminal { graceful: false }
            }
            DisconnectSignal::AbnormalClose(_) if self.resume_on_abnormal_close => {
                ReconnectAction::Resume
            }
            DisconnectSignal::AbnormalClose(_) => ReconnectAction::FreshIdentify,
        }
    }
}

/// Classify with the default policy.
#[must_use]
pub fn classify(signal: DisconnectSignal) -> ReconnectAction {
    ReconnectPolicy::default().classify(signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(DisconnectSignal::AbnormalClose(4014), ReconnectAction::Terminal { graceful: false } ; "disallowed intent stops")]
    #[test_case(DisconnectSignal::AbnormalClose(4004), ReconnectAction::Terminal { graceful: false } ; "bad token stops")]
    #[test_case(DisconnectSignal::AbnormalClose(4009), ReconnectAction::Resume ; "session timeout resumes")]
    #[test_case(DisconnectSignal::AbnormalClose(4000), ReconnectAction::Resume ; "unknown error resumes")]
    #[test_case(DisconnectSignal::AbnormalClose(1006), ReconnectAction::Resume ; "abnormal websocket close resumes")]
    #[test_case(DisconnectSignal::NormalClose, ReconnectAction::Terminal { graceful: true } ; "normal close stops cleanly")]
    #[test_case(DisconnectSignal::HeartbeatAckTimeout, ReconnectAction::Resume ; "ack timeout resumes")]
    #[test_case(DisconnectSignal::TransportError, ReconnectAction::Resume ; "transport error resumes")]
    #[test_case(DisconnectSignal::ReconnectRequested, ReconnectAction::Resume ; "server reconnect resumes")]
    #[test_case(DisconnectSignal::InvalidSession { resumable: true }, ReconnectAction::Resume ; "resumable invalid session")]
    #[test_case(DisconnectSignal::InvalidSession { resumable: false }, ReconnectAction::FreshIdentify ; "non resumable invalid session")]
    fn test_default_classification(signal: DisconnectSignal, expected: ReconnectAction) {
        assert_eq!(classify(signal), expected);
    }

    #[test]
    fn test_abnormal_close_can_start_fresh() {
        let policy = ReconnectPolicy::default().with_resume_on_abnormal_close(false);
        assert_eq!(
            policy.classify(DisconnectSignal::AbnormalClose(4009)),
            ReconnectAction::FreshIdentify
        );
        assert_eq!(
            policy.classify(DisconnectSignal::AbnormalClose(4014)),
            ReconnectAction::Terminal { graceful: false }
        );
        assert_eq!(
            policy.classify(DisconnectSignal::TransportError),
            ReconnectAction::Resume
        );
    }

    #[test]
    fn test_custom_terminal_codes() {
        let policy = ReconnectPolicy::default().with_terminal_codes([4014]);
        assert_eq!(
            policy.classify(DisconnectSignal::AbnormalClose(4004)),
            ReconnectAction::Resume
        );
    }

    #[test]
    fn test_signal_from_close() {
        assert_eq!(DisconnectSignal::from_close(Some(1000)), DisconnectSignal::NormalClose);
        assert_eq!(
            DisconnectSignal::from_close(Some(4014)),
            DisconnectSignal::AbnormalClose(4014)
        );
        assert_eq!(DisconnectSignal::from_close(None), DisconnectSignal::TransportError);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            DisconnectSignal::AbnormalClose(4014).to_string(),
            "closed with 4014 (disallowed intent)"
        );
        assert_eq!(ReconnectAction::FreshIdentify.to_string(), "fresh_identify");
    }
}
