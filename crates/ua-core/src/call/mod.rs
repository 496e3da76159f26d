//! Call types and the per-call state machine
//!
//! This module holds the identifiers and snapshots exchanged with the signaling
//! engine ([`CallHandle`], [`CallInfo`], [`CallMediaInfo`]) and the call objects
//! that react to them:
//!
//! - [`CallHandler`] - the capability interface the account dispatches to
//! - [`Call`] - the media-wiring call variant (player, recorder, verification recorder)
//! - [`CallFactory`] - constructs call variants for an account
//!
//! # Lifecycle
//!
//! ```text
//! Null -> Calling | Incoming -> Early | Connecting -> Confirmed -> Disconnected
//! ```
//!
//! Only the distinction between non-terminal states and `Disconnected` matters to
//! the core. Reaching `Disconnected` removes the call from its account, tears down
//! its media graph, closes its endpoints and drops it.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod handler;
mod media_call;

pub use handler::{CallContext, CallFactory, CallHandler, MediaCallFactory};
pub use media_call::Call;

/// Locally assigned call identifier
///
/// Stable for the whole life of the call, including the window where an
/// outgoing call has no engine handle yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(Uuid);

impl CallId {
    /// Generate a new random call id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle the signaling engine assigns to a dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallHandle(pub u32);

impl fmt::Display for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Signaling state of a call, as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// Before INVITE is sent or received
    Null,
    /// INVITE sent
    Calling,
    /// INVITE received
    Incoming,
    /// Provisional response with a to-tag sent or received
    Early,
    /// 2xx sent or received, waiting for ACK
    Connecting,
    /// Dialog established
    Confirmed,
    /// Dialog terminated; no further events follow
    Disconnected,
}

impl CallState {
    /// Check if this is the terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Disconnected)
    }

    /// Check if the dialog is established
    pub fn is_confirmed(&self) -> bool {
        matches!(self, CallState::Confirmed)
    }

    /// Engine-style state text
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Null => "NULL",
            CallState::Calling => "CALLING",
            CallState::Incoming => "INCOMING",
            CallState::Early => "EARLY",
            CallState::Connecting => "CONNECTING",
            CallState::Confirmed => "CONFIRMED",
            CallState::Disconnected => "DISCONNCTD",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a call from this user agent's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// Kind of a negotiated media stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    Audio,
    Video,
    Application,
    Unknown,
}

/// Status of a negotiated media stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaStatus {
    /// No media negotiated for this entry
    None,
    /// Media is flowing
    Active,
    /// Held by us
    LocalHold,
    /// Held by the remote party
    RemoteHold,
    /// Media failed to start
    Error,
}

impl MediaStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, MediaStatus::Active)
    }
}

/// One entry of a call's negotiated media list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallMediaInfo {
    /// Index in the negotiated media list; used to look up the engine port
    pub index: usize,
    pub media_type: MediaType,
    pub status: MediaStatus,
}

impl CallMediaInfo {
    /// Active audio entry at `index`
    pub fn audio(index: usize) -> Self {
        Self {
            index,
            media_type: MediaType::Audio,
            status: MediaStatus::Active,
        }
    }

    /// Active video entry at `index`
    pub fn video(index: usize) -> Self {
        Self {
            index,
            media_type: MediaType::Video,
            status: MediaStatus::Active,
        }
    }

    /// Whether this entry can carry wired audio
    pub fn is_active_audio(&self) -> bool {
        self.media_type == MediaType::Audio && self.status.is_active()
    }
}

/// Snapshot of a call as reported by the engine with each notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallInfo {
    pub handle: CallHandle,
    /// Local party URI
    pub local_uri: String,
    /// Remote party URI
    pub remote_uri: String,
    pub state: CallState,
    /// Human readable state text, e.g. "CONFIRMED"
    pub state_text: String,
    /// Last SIP status code seen on the dialog (0 if none yet)
    pub last_status_code: u16,
    /// Negotiated media entries in SDP order
    pub media: Vec<CallMediaInfo>,
}

impl CallInfo {
    /// Create a snapshot with the default state text for `state`
    pub fn new(handle: CallHandle, state: CallState) -> Self {
        Self {
            handle,
            local_uri: String::new(),
            remote_uri: String::new(),
            state,
            state_text: state.as_str().to_string(),
            last_status_code: 0,
            media: Vec::new(),
        }
    }

    pub fn with_local_uri(mut self, uri: impl Into<String>) -> Self {
        self.local_uri = uri.into();
        self
    }

    pub fn with_remote_uri(mut self, uri: impl Into<String>) -> Self {
        self.remote_uri = uri.into();
        self
    }

    pub fn with_media(mut self, media: Vec<CallMediaInfo>) -> Self {
        self.media = media;
        self
    }

    /// Move to a new state, resetting the state text
    pub fn transition(&mut self, state: CallState) {
        self.state = state;
        self.state_text = state.as_str().to_string();
    }

    /// Active audio entries in SDP order
    pub fn active_audio(&self) -> impl Iterator<Item = &CallMediaInfo> + '_ {
        self.media.iter().filter(|m| m.is_active_audio())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_disconnected_is_terminal() {
        let states = [
            CallState::Null,
            CallState::Calling,
            CallState::Incoming,
            CallState::Early,
            CallState::Connecting,
            CallState::Confirmed,
        ];
        for state in states {
            assert!(!state.is_terminal(), "{state} must not be terminal");
        }
        assert!(CallState::Disconnected.is_terminal());
    }

    #[test]
    fn test_active_audio_filters_type_and_status() {
        let info = CallInfo::new(CallHandle(3), CallState::Confirmed).with_media(vec![
            CallMediaInfo::video(0),
            CallMediaInfo {
                index: 1,
                media_type: MediaType::Audio,
                status: MediaStatus::RemoteHold,
            },
            CallMediaInfo::audio(2),
        ]);

        let indexes: Vec<usize> = info.active_audio().map(|m| m.index).collect();
        assert_eq!(indexes, vec![2]);
    }

    #[test]
    fn test_transition_updates_state_text() {
        let mut info = CallInfo::new(CallHandle(1), CallState::Calling);
        info.transition(CallState::Disconnected);
        assert_eq!(info.state_text, "DISCONNCTD");
    }
}
