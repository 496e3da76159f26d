//! Operator-facing events and the incoming-call policy
//!
//! Everything the dispatcher observes is republished as a [`UaEvent`] on a
//! `tokio::sync::broadcast` channel. Events are serializable so a front end can
//! forward them as JSON lines.
//!
//! # Incoming call policy
//!
//! An account decides what to do with each new INVITE through an
//! [`IncomingCallPolicy`]. The default [`AcceptAll`] answers every call with 200.
//! Closures work too:
//!
//! ```rust
//! use sipua_core::events::{CallAction, IncomingCallInfo, IncomingCallPolicy};
//!
//! let only_alice = |call: &IncomingCallInfo| {
//!     if call.remote_uri.contains("alice") {
//!         CallAction::Accept
//!     } else {
//!         CallAction::Reject
//!     }
//! };
//! # fn assert_policy<P: IncomingCallPolicy>(_: &P) {}
//! # assert_policy(&only_alice);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::call::{CallHandle, CallId, CallState};
use crate::registration::RegistrationStatusInfo;

/// Action to take for an incoming call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallAction {
    /// Answer with 200 OK
    Accept,
    /// Reject with 486 Busy Here
    Reject,
    /// Leave the call ringing
    Ignore,
}

impl CallAction {
    /// SIP status sent for this action, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            CallAction::Accept => Some(200),
            CallAction::Reject => Some(486),
            CallAction::Ignore => None,
        }
    }
}

/// Decides how an account responds to incoming calls
///
/// Runs on the dispatcher task; implementations must not block.
pub trait IncomingCallPolicy: Send + Sync {
    fn decide(&self, call: &IncomingCallInfo) -> CallAction;
}

/// Answer every incoming call
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl IncomingCallPolicy for AcceptAll {
    fn decide(&self, _call: &IncomingCallInfo) -> CallAction {
        CallAction::Accept
    }
}

/// Reject every incoming call
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAll;

impl IncomingCallPolicy for RejectAll {
    fn decide(&self, _call: &IncomingCallInfo) -> CallAction {
        CallAction::Reject
    }
}

impl<F> IncomingCallPolicy for F
where
    F: Fn(&IncomingCallInfo) -> CallAction + Send + Sync,
{
    fn decide(&self, call: &IncomingCallInfo) -> CallAction {
        self(call)
    }
}

/// Information about an incoming call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingCallInfo {
    /// Call identifier assigned by the account
    pub call_id: CallId,
    pub account_id: AccountId,
    pub handle: CallHandle,
    /// SIP URI of the caller
    pub remote_uri: String,
    /// SIP URI the call was addressed to
    pub local_uri: String,
    /// Engine state text at arrival
    pub state_text: String,
    pub received_at: DateTime<Utc>,
}

/// Information about a call state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallStatusInfo {
    pub call_id: CallId,
    pub account_id: AccountId,
    pub handle: Option<CallHandle>,
    /// State before the transition
    pub previous_state: CallState,
    pub new_state: CallState,
    /// Engine state text
    pub reason: String,
    /// Last SIP status code seen on the dialog
    pub status_code: u16,
    pub timestamp: DateTime<Utc>,
}

/// Events published to operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UaEvent {
    /// An account's registration state changed
    RegistrationChanged { info: RegistrationStatusInfo },
    /// A new call arrived; the policy decision follows as a state change
    IncomingCall { info: IncomingCallInfo },
    /// A call moved to a new signaling state
    CallStateChanged { info: CallStatusInfo },
    /// Media became active and the graph was wired
    MediaConnected { call_id: CallId, edges: usize },
    /// Media could not be wired for a call
    MediaFailed { call_id: CallId, reason: String },
    /// A call reached its terminal state and was released
    CallRemoved { call_id: CallId, account_id: AccountId },
    /// A command issued by the core failed
    Error { context: String, message: String },
}

impl UaEvent {
    /// Call this event refers to, if any
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            UaEvent::IncomingCall { info } => Some(info.call_id),
            UaEvent::CallStateChanged { info } => Some(info.call_id),
            UaEvent::MediaConnected { call_id, .. }
            | UaEvent::MediaFailed { call_id, .. }
            | UaEvent::CallRemoved { call_id, .. } => Some(*call_id),
            UaEvent::RegistrationChanged { .. } | UaEvent::Error { .. } => None,
        }
    }

    /// Create an error event
    pub fn error(context: impl Into<String>, message: impl ToString) -> Self {
        UaEvent::Error {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incoming(remote: &str) -> IncomingCallInfo {
        IncomingCallInfo {
            call_id: CallId::new(),
            account_id: AccountId::new(),
            handle: CallHandle(1),
            remote_uri: remote.to_string(),
            local_uri: "sip:ff@192.168.3.99".to_string(),
            state_text: "INCOMING".to_string(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_builtin_policies() {
        let call = incoming("sip:alice@example.com");
        assert_eq!(AcceptAll.decide(&call), CallAction::Accept);
        assert_eq!(RejectAll.decide(&call), CallAction::Reject);
        assert_eq!(CallAction::Reject.status_code(), Some(486));
        assert_eq!(CallAction::Ignore.status_code(), None);
    }

    #[test]
    fn test_closure_policy() {
        let policy = |call: &IncomingCallInfo| {
            if call.remote_uri.starts_with("sip:alice") {
                CallAction::Accept
            } else {
                CallAction::Ignore
            }
        };
        assert_eq!(policy.decide(&incoming("sip:alice@example.com")), CallAction::Accept);
        assert_eq!(policy.decide(&incoming("sip:mallory@example.com")), CallAction::Ignore);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let call_id = CallId::new();
        let event = UaEvent::MediaConnected { call_id, edges: 3 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "media_connected");
        assert_eq!(json["edges"], 3);
        assert_eq!(event.call_id(), Some(call_id));
    }
}
