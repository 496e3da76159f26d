//! Engine interfaces
//!
//! The SIP stack and the audio bridge are external collaborators. The core talks
//! to them through two synchronous traits and receives their notifications as
//! [`EngineEvent`]s on an unbounded channel drained by the dispatcher.
//!
//! Commands never block on network I/O: an implementation queues the work and
//! reports progress later through events.

use std::path::Path;

use tokio::sync::mpsc;

use crate::account::AccountId;
use crate::call::{CallHandle, CallInfo};
use crate::config::{AccountConfig, CallOptions, TransportConfig};
use crate::error::{MediaResourceError, SignalingError};
use crate::media::MediaPortId;
use crate::registration::RegStateInfo;

/// Identifier of a transport created by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportId(pub u32);

/// Signaling commands accepted by the SIP stack
pub trait SignalingEngine: Send + Sync {
    /// Open a listening transport
    fn create_transport(&self, config: &TransportConfig) -> Result<TransportId, SignalingError>;

    /// Add an account to the stack, starting registration if one is configured
    fn register_account(
        &self,
        account: AccountId,
        config: &AccountConfig,
    ) -> Result<(), SignalingError>;

    /// Remove an account, unregistering it if needed
    fn unregister_account(&self, account: AccountId) -> Result<(), SignalingError>;

    /// Send an INVITE to `target` on behalf of `account`
    fn make_call(
        &self,
        account: AccountId,
        target: &str,
        options: &CallOptions,
    ) -> Result<CallHandle, SignalingError>;

    /// Respond to an incoming INVITE with `status`
    fn answer(&self, handle: CallHandle, status: u16) -> Result<(), SignalingError>;

    /// Terminate a call, or reject it when still unanswered
    fn hangup(&self, handle: CallHandle, status: u16) -> Result<(), SignalingError>;

    /// Terminate every call the engine knows about
    fn hangup_all(&self) -> Result<(), SignalingError>;
}

/// Audio bridge primitives
pub trait MediaEngine: Send + Sync {
    /// Open a file player
    fn open_player(&self, path: &Path, looping: bool) -> Result<MediaPortId, MediaResourceError>;

    /// Open (create or truncate) a file recorder
    fn open_recorder(&self, path: &Path) -> Result<MediaPortId, MediaResourceError>;

    /// Audio port of the call's negotiated media entry `media_index`, if it has one
    fn call_audio_port(&self, handle: CallHandle, media_index: usize) -> Option<MediaPortId>;

    fn start_transmit(&self, from: MediaPortId, to: MediaPortId) -> Result<(), MediaResourceError>;

    fn stop_transmit(&self, from: MediaPortId, to: MediaPortId) -> Result<(), MediaResourceError>;

    /// Close a player or recorder, flushing recorders
    fn close_port(&self, port: MediaPortId) -> Result<(), MediaResourceError>;
}

/// A complete engine: signaling and media
pub trait Engine: SignalingEngine + MediaEngine {}

impl<T: SignalingEngine + MediaEngine + ?Sized> Engine for T {}

/// Notification emitted by the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Registration progress for an account
    RegState { account: AccountId, info: RegStateInfo },
    /// New INVITE for an account
    IncomingCall {
        account: AccountId,
        handle: CallHandle,
        info: CallInfo,
    },
    /// Signaling state change of a call
    CallState { handle: CallHandle, info: CallInfo },
    /// Media negotiation result of a call
    CallMediaState { handle: CallHandle, info: CallInfo },
}

impl EngineEvent {
    /// Short event name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::RegState { .. } => "reg_state",
            EngineEvent::IncomingCall { .. } => "incoming_call",
            EngineEvent::CallState { .. } => "call_state",
            EngineEvent::CallMediaState { .. } => "call_media_state",
        }
    }
}

pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;
pub type EngineEventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Create the channel an engine publishes its events on
pub fn event_channel() -> (EngineEventSender, EngineEventReceiver) {
    mpsc::unbounded_channel()
}
