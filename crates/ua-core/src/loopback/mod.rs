//! In-process loopback engine
//!
//! [`LoopbackEngine`] implements both engine traits without a network. It plays
//! the far end of every dialog according to a [`LoopbackBehavior`] and emits the
//! same event sequences a SIP stack would: registration results, call progress
//! up to `CONFIRMED`, negotiated media, and `DISCONNCTD`.
//!
//! Media ports are real files. Players load a PCM WAV file when opened;
//! recorders create their file at open and write the captured samples when
//! closed. Stopping a player→recorder transmit copies the player's samples into
//! the recorder, so a verification recording ends up identical to the source.
//!
//! ```rust
//! use sipua_core::engine::SignalingEngine;
//! use sipua_core::loopback::LoopbackEngine;
//!
//! let (engine, mut events) = LoopbackEngine::new();
//! engine.create_transport(&Default::default()).unwrap();
//! assert!(events.try_recv().is_err());
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::account::AccountId;
use crate::call::{CallHandle, CallInfo, CallMediaInfo, CallState, MediaStatus, MediaType};
use crate::config::{AccountConfig, CallOptions, TransportConfig};
use crate::engine::{
    event_channel, EngineEvent, EngineEventReceiver, EngineEventSender, MediaEngine,
    SignalingEngine, TransportId,
};
use crate::error::{MediaResourceError, SignalingError};
use crate::media::MediaPortId;
use crate::registration::RegStateInfo;

pub mod wav;

/// How the simulated far end behaves
#[derive(Debug, Clone, PartialEq)]
pub struct LoopbackBehavior {
    /// Final response to REGISTER
    pub registration_code: u16,
    /// Expiry granted on a successful registration
    pub registration_expires: u32,
    /// Whether the callee answers outgoing calls
    pub answer_outgoing: bool,
    /// Whether the far end sends BYE right after the call is established
    pub hangup_after_answer: bool,
    /// Media offered with incoming calls, in SDP order
    pub incoming_media: Vec<MediaType>,
    pub fail_transport: bool,
    pub fail_make_call: bool,
}

impl Default for LoopbackBehavior {
    fn default() -> Self {
        Self {
            registration_code: 200,
            registration_expires: 300,
            answer_outgoing: true,
            hangup_after_answer: false,
            incoming_media: vec![MediaType::Audio],
            fail_transport: false,
            fail_make_call: false,
        }
    }
}

impl LoopbackBehavior {
    pub fn with_registration_code(mut self, code: u16) -> Self {
        self.registration_code = code;
        self
    }

    pub fn with_answer_outgoing(mut self, answer: bool) -> Self {
        self.answer_outgoing = answer;
        self
    }

    pub fn with_hangup_after_answer(mut self, hangup: bool) -> Self {
        self.hangup_after_answer = hangup;
        self
    }

    pub fn with_incoming_media(mut self, media: Vec<MediaType>) -> Self {
        self.incoming_media = media;
        self
    }

    pub fn with_failing_transport(mut self) -> Self {
        self.fail_transport = true;
        self
    }

    pub fn with_failing_make_call(mut self) -> Self {
        self.fail_make_call = true;
        self
    }
}

/// Signaling command received by the loopback engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    CreateTransport { port: u16 },
    RegisterAccount { account: AccountId },
    UnregisterAccount { account: AccountId },
    MakeCall { account: AccountId, target: String },
    Answer { handle: CallHandle, status: u16 },
    Hangup { handle: CallHandle, status: u16 },
    HangupAll,
}

#[derive(Debug)]
enum Port {
    Player {
        path: PathBuf,
        samples: Arc<Vec<i16>>,
    },
    Recorder {
        path: PathBuf,
        sample_rate: u32,
        samples: Vec<i16>,
    },
    CallAudio {
        handle: CallHandle,
    },
}

#[derive(Debug)]
struct LoopbackCall {
    account: AccountId,
    info: CallInfo,
    /// Audio port per media index
    audio_ports: Vec<Option<MediaPortId>>,
}

#[derive(Debug, Default)]
struct LoopbackState {
    transports: Vec<TransportConfig>,
    accounts: HashMap<AccountId, AccountConfig>,
    calls: BTreeMap<CallHandle, LoopbackCall>,
    ports: HashMap<MediaPortId, Port>,
    connections: Vec<(MediaPortId, MediaPortId)>,
    /// Call audio ports dropped by a disconnect or re-INVITE
    released_audio: HashSet<MediaPortId>,
    journal: Vec<EngineCommand>,
    next_handle: u32,
    next_port: u32,
}

impl LoopbackState {
    fn allocate_port(&mut self, port: Port) -> MediaPortId {
        self.next_port += 1;
        let id = MediaPortId(self.next_port);
        self.ports.insert(id, port);
        id
    }

    fn allocate_handle(&mut self) -> CallHandle {
        self.next_handle += 1;
        CallHandle(self.next_handle)
    }

    fn drop_connections_of(&mut self, port: MediaPortId) {
        self.connections.retain(|&(from, to)| from != port && to != port);
    }

    /// Replace a call's negotiated media, allocating audio ports for active audio
    fn negotiate(&mut self, handle: CallHandle, media: Vec<CallMediaInfo>) -> Option<CallInfo> {
        self.release_call_audio(handle);
        let ports: Vec<Option<MediaPortId>> = media
            .iter()
            .map(|entry| {
                entry
                    .is_active_audio()
                    .then(|| self.allocate_port(Port::CallAudio { handle }))
            })
            .collect();
        let call = self.calls.get_mut(&handle)?;
        call.audio_ports = ports;
        call.info.media = media;
        Some(call.info.clone())
    }

    fn release_call_audio(&mut self, handle: CallHandle) {
        let ports: Vec<MediaPortId> = match self.calls.get_mut(&handle) {
            Some(call) => call.audio_ports.drain(..).flatten().collect(),
            None => return,
        };
        for port in ports {
            self.ports.remove(&port);
            self.drop_connections_of(port);
            self.released_audio.insert(port);
        }
    }

    /// Move a call to `state` and return the snapshot to publish
    fn transition(&mut self, handle: CallHandle, state: CallState, code: u16) -> Option<CallInfo> {
        let call = self.calls.get_mut(&handle)?;
        call.info.transition(state);
        call.info.last_status_code = code;
        Some(call.info.clone())
    }

    fn disconnect(&mut self, handle: CallHandle, code: u16) -> Option<CallInfo> {
        self.release_call_audio(handle);
        let mut call = self.calls.remove(&handle)?;
        call.info.transition(CallState::Disconnected);
        call.info.last_status_code = code;
        call.info.media.clear();
        Some(call.info)
    }
}

/// Engine double that simulates the far end of every dialog
#[derive(Debug)]
pub struct LoopbackEngine {
    behavior: LoopbackBehavior,
    state: Mutex<LoopbackState>,
    events: EngineEventSender,
}

impl LoopbackEngine {
    /// Engine with the default behavior
    pub fn new() -> (Arc<Self>, EngineEventReceiver) {
        Self::with_behavior(LoopbackBehavior::default())
    }

    pub fn with_behavior(behavior: LoopbackBehavior) -> (Arc<Self>, EngineEventReceiver) {
        let (events, rx) = event_channel();
        let engine = Arc::new(Self {
            behavior,
            state: Mutex::new(LoopbackState::default()),
            events,
        });
        (engine, rx)
    }

    pub fn behavior(&self) -> &LoopbackBehavior {
        &self.behavior
    }

    /// Simulate an INVITE from `remote_uri` to `account`
    pub fn inject_incoming_call(
        &self,
        account: AccountId,
        remote_uri: &str,
    ) -> Result<CallHandle, SignalingError> {
        let mut state = self.state.lock();
        let local_uri = state
            .accounts
            .get(&account)
            .map(|config| config.id_uri.clone())
            .ok_or(SignalingError::UnknownAccount { account })?;

        let handle = state.allocate_handle();
        let info = CallInfo::new(handle, CallState::Incoming)
            .with_local_uri(local_uri)
            .with_remote_uri(remote_uri);
        state.calls.insert(
            handle,
            LoopbackCall {
                account,
                info: info.clone(),
                audio_ports: Vec::new(),
            },
        );
        drop(state);

        debug!(%handle, remote = remote_uri, "Loopback incoming call");
        self.emit(EngineEvent::IncomingCall { account, handle, info });
        Ok(handle)
    }

    /// Simulate a BYE from the far end
    pub fn remote_hangup(&self, handle: CallHandle) -> Result<(), SignalingError> {
        let info = self
            .state
            .lock()
            .disconnect(handle, 200)
            .ok_or(SignalingError::UnknownCall { handle })?;
        self.emit(EngineEvent::CallState { handle, info });
        Ok(())
    }

    /// Simulate a re-INVITE changing the negotiated media
    pub fn renegotiate_media(
        &self,
        handle: CallHandle,
        media: &[(MediaType, MediaStatus)],
    ) -> Result<(), SignalingError> {
        let entries = media
            .iter()
            .enumerate()
            .map(|(index, &(media_type, status))| CallMediaInfo {
                index,
                media_type,
                status,
            })
            .collect();
        let info = self
            .state
            .lock()
            .negotiate(handle, entries)
            .ok_or(SignalingError::UnknownCall { handle })?;
        self.emit(EngineEvent::CallMediaState { handle, info });
        Ok(())
    }

    /// Active transmit connections
    pub fn connections(&self) -> Vec<(MediaPortId, MediaPortId)> {
        self.state.lock().connections.clone()
    }

    /// Signaling commands received so far, oldest first
    pub fn journal(&self) -> Vec<EngineCommand> {
        self.state.lock().journal.clone()
    }

    /// Handles of calls not yet disconnected
    pub fn live_calls(&self) -> Vec<CallHandle> {
        self.state.lock().calls.keys().copied().collect()
    }

    /// Live call handles belonging to `account`
    pub fn calls_for(&self, account: AccountId) -> Vec<CallHandle> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(_, call)| call.account == account)
            .map(|(handle, _)| *handle)
            .collect()
    }

    pub fn call_info(&self, handle: CallHandle) -> Option<CallInfo> {
        self.state.lock().calls.get(&handle).map(|c| c.info.clone())
    }

    /// Open players and recorders
    pub fn open_port_count(&self) -> usize {
        self.state
            .lock()
            .ports
            .values()
            .filter(|p| !matches!(p, Port::CallAudio { .. }))
            .count()
    }

    fn emit(&self, event: EngineEvent) {
        trace!(kind = event.kind(), "Loopback event");
        // the dispatcher may already be gone during shutdown
        let _ = self.events.send(event);
    }

    fn emit_call_state(&self, handle: CallHandle, info: Option<CallInfo>) {
        if let Some(info) = info {
            self.emit(EngineEvent::CallState { handle, info });
        }
    }

    /// Far end answers: CONNECTING, CONFIRMED, then the negotiated media
    fn establish(&self, handle: CallHandle, media: Vec<CallMediaInfo>) {
        let (connecting, confirmed, negotiated) = {
            let mut state = self.state.lock();
            let connecting = state.transition(handle, CallState::Connecting, 200);
            let confirmed = state.transition(handle, CallState::Confirmed, 200);
            let negotiated = state.negotiate(handle, media);
            (connecting, confirmed, negotiated)
        };
        self.emit_call_state(handle, connecting);
        self.emit_call_state(handle, confirmed);
        if let Some(info) = negotiated {
            self.emit(EngineEvent::CallMediaState { handle, info });
        }

        if self.behavior.hangup_after_answer {
            let bye = self.state.lock().disconnect(handle, 200);
            self.emit_call_state(handle, bye);
        }
    }

    fn record(&self, command: EngineCommand) {
        debug!(?command, "Loopback command");
        self.state.lock().journal.push(command);
    }
}

impl SignalingEngine for LoopbackEngine {
    fn create_transport(&self, config: &TransportConfig) -> Result<TransportId, SignalingError> {
        self.record(EngineCommand::CreateTransport { port: config.port });
        if self.behavior.fail_transport {
            return Err(SignalingError::transport_failed(
                config.protocol,
                config.port,
                "Address already in use",
            ));
        }
        let mut state = self.state.lock();
        state.transports.push(config.clone());
        Ok(TransportId(state.transports.len() as u32))
    }

    fn register_account(
        &self,
        account: AccountId,
        config: &AccountConfig,
    ) -> Result<(), SignalingError> {
        self.record(EngineCommand::RegisterAccount { account });
        {
            let mut state = self.state.lock();
            if state.transports.is_empty() {
                return Err(SignalingError::registration_failed(account, "no transport"));
            }
            state.accounts.insert(account, config.clone());
        }

        if config.registration.is_some() {
            let code = self.behavior.registration_code;
            let success = (200..300).contains(&code);
            let info = RegStateInfo::new(
                code,
                reason_phrase(code),
                if success { self.behavior.registration_expires } else { 0 },
            );
            self.emit(EngineEvent::RegState { account, info });
        }
        Ok(())
    }

    fn unregister_account(&self, account: AccountId) -> Result<(), SignalingError> {
        self.record(EngineCommand::UnregisterAccount { account });
        self.state
            .lock()
            .accounts
            .remove(&account)
            .map(|_| ())
            .ok_or(SignalingError::UnknownAccount { account })
    }

    fn make_call(
        &self,
        account: AccountId,
        target: &str,
        options: &CallOptions,
    ) -> Result<CallHandle, SignalingError> {
        self.record(EngineCommand::MakeCall {
            account,
            target: target.to_string(),
        });
        if self.behavior.fail_make_call {
            return Err(SignalingError::call_placement_failed(target, "503 Service Unavailable"));
        }

        let (handle, calling, early) = {
            let mut state = self.state.lock();
            let local_uri = state
                .accounts
                .get(&account)
                .map(|config| config.id_uri.clone())
                .ok_or(SignalingError::UnknownAccount { account })?;
            let handle = state.allocate_handle();
            let info = CallInfo::new(handle, CallState::Calling)
                .with_local_uri(local_uri)
                .with_remote_uri(target);
            state.calls.insert(
                handle,
                LoopbackCall {
                    account,
                    info: info.clone(),
                    audio_ports: Vec::new(),
                },
            );
            let early = state.transition(handle, CallState::Early, 180);
            (handle, info, early)
        };

        self.emit(EngineEvent::CallState { handle, info: calling });
        self.emit_call_state(handle, early);

        if self.behavior.answer_outgoing {
            let audio = (0..options.audio_count as usize).map(CallMediaInfo::audio);
            let video = (0..options.video_count as usize)
                .map(|i| CallMediaInfo::video(options.audio_count as usize + i));
            self.establish(handle, audio.chain(video).collect());
        }
        Ok(handle)
    }

    fn answer(&self, handle: CallHandle, status: u16) -> Result<(), SignalingError> {
        self.record(EngineCommand::Answer { handle, status });
        let current = self
            .state
            .lock()
            .calls
            .get(&handle)
            .map(|c| c.info.state)
            .ok_or(SignalingError::UnknownCall { handle })?;
        if !matches!(current, CallState::Incoming | CallState::Early) {
            return Err(SignalingError::command_failed(
                "answer",
                format!("call {handle} is {current}, not ringing"),
            ));
        }

        match status {
            100..=199 => {
                let early = self.state.lock().transition(handle, CallState::Early, status);
                self.emit_call_state(handle, early);
            }
            200..=299 => {
                let media = self
                    .behavior
                    .incoming_media
                    .iter()
                    .enumerate()
                    .map(|(index, &media_type)| CallMediaInfo {
                        index,
                        media_type,
                        status: MediaStatus::Active,
                    })
                    .collect();
                self.establish(handle, media);
            }
            _ => {
                let rejected = self.state.lock().disconnect(handle, status);
                self.emit_call_state(handle, rejected);
            }
        }
        Ok(())
    }

    fn hangup(&self, handle: CallHandle, status: u16) -> Result<(), SignalingError> {
        self.record(EngineCommand::Hangup { handle, status });
        let info = self
            .state
            .lock()
            .disconnect(handle, status)
            .ok_or(SignalingError::UnknownCall { handle })?;
        self.emit(EngineEvent::CallState { handle, info });
        Ok(())
    }

    fn hangup_all(&self) -> Result<(), SignalingError> {
        self.record(EngineCommand::HangupAll);
        let disconnected: Vec<(CallHandle, CallInfo)> = {
            let mut state = self.state.lock();
            let handles: Vec<(CallHandle, bool)> = state
                .calls
                .iter()
                .map(|(handle, call)| (*handle, call.info.state.is_confirmed()))
                .collect();
            handles
                .into_iter()
                .filter_map(|(handle, confirmed)| {
                    let code = if confirmed { 200 } else { 487 };
                    state.disconnect(handle, code).map(|info| (handle, info))
                })
                .collect()
        };
        for (handle, info) in disconnected {
            self.emit(EngineEvent::CallState { handle, info });
        }
        Ok(())
    }
}

impl MediaEngine for LoopbackEngine {
    fn open_player(&self, path: &Path, _looping: bool) -> Result<MediaPortId, MediaResourceError> {
        let wav = wav::read_pcm_wav(path)?;
        let port = self.state.lock().allocate_port(Port::Player {
            path: path.to_path_buf(),
            samples: Arc::new(wav.samples),
        });
        debug!(%port, path = %path.display(), "Loopback player opened");
        Ok(port)
    }

    fn open_recorder(&self, path: &Path) -> Result<MediaPortId, MediaResourceError> {
        wav::write_pcm_wav(path, wav::DEFAULT_SAMPLE_RATE, &[])
            .map_err(|e| MediaResourceError::open_failed(path, e))?;
        let port = self.state.lock().allocate_port(Port::Recorder {
            path: path.to_path_buf(),
            sample_rate: wav::DEFAULT_SAMPLE_RATE,
            samples: Vec::new(),
        });
        debug!(%port, path = %path.display(), "Loopback recorder opened");
        Ok(port)
    }

    fn call_audio_port(&self, handle: CallHandle, media_index: usize) -> Option<MediaPortId> {
        self.state
            .lock()
            .calls
            .get(&handle)
            .and_then(|call| call.audio_ports.get(media_index).copied().flatten())
    }

    fn start_transmit(&self, from: MediaPortId, to: MediaPortId) -> Result<(), MediaResourceError> {
        let mut state = self.state.lock();
        let source = state.ports.get(&from).ok_or(MediaResourceError::UnknownPort { port: from })?;
        let sink = state.ports.get(&to).ok_or(MediaResourceError::UnknownPort { port: to })?;
        if matches!(source, Port::Recorder { .. }) || matches!(sink, Port::Player { .. }) {
            return Err(MediaResourceError::TransmitFailed {
                from,
                to,
                reason: "recorders cannot transmit and players cannot receive".to_string(),
            });
        }
        if !state.connections.contains(&(from, to)) {
            state.connections.push((from, to));
        }
        Ok(())
    }

    fn stop_transmit(&self, from: MediaPortId, to: MediaPortId) -> Result<(), MediaResourceError> {
        let mut state = self.state.lock();
        let Some(pos) = state.connections.iter().position(|&c| c == (from, to)) else {
            // the connection went away with the call audio port
            if state.released_audio.contains(&from) || state.released_audio.contains(&to) {
                trace!(%from, %to, "Transmit already stopped by call audio release");
                return Ok(());
            }
            return Err(MediaResourceError::TransmitFailed {
                from,
                to,
                reason: "not connected".to_string(),
            });
        };
        state.connections.remove(pos);

        let played = match state.ports.get(&from) {
            Some(Port::Player { samples, .. }) => Some(Arc::clone(samples)),
            _ => None,
        };
        if let (Some(played), Some(Port::Recorder { samples, .. })) =
            (played, state.ports.get_mut(&to))
        {
            samples.extend_from_slice(&played);
        }
        Ok(())
    }

    fn close_port(&self, port: MediaPortId) -> Result<(), MediaResourceError> {
        let removed = {
            let mut state = self.state.lock();
            state.drop_connections_of(port);
            state.ports.remove(&port)
        };
        match removed {
            Some(Port::Recorder {
                path,
                sample_rate,
                samples,
            }) => {
                wav::write_pcm_wav(&path, sample_rate, &samples)
                    .map_err(|e| MediaResourceError::open_failed(&path, e))?;
                debug!(
                    %port,
                    path = %path.display(),
                    samples = samples.len(),
                    "Loopback recorder closed"
                );
                Ok(())
            }
            Some(Port::Player { path, .. }) => {
                debug!(%port, path = %path.display(), "Loopback player closed");
                Ok(())
            }
            Some(Port::CallAudio { handle }) => {
                debug!(%port, %handle, "Closed call audio port");
                Ok(())
            }
            None => Err(MediaResourceError::UnknownPort { port }),
        }
    }
}

fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        408 => "Request Timeout",
        486 => "Busy Here",
        487 => "Request Terminated",
        503 => "Service Unavailable",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut EngineEventReceiver) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn states(events: &[EngineEvent]) -> Vec<CallState> {
        events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::CallState { info, .. } => Some(info.state),
                _ => None,
            })
            .collect()
    }

    fn ready_engine(
        behavior: LoopbackBehavior,
    ) -> (Arc<LoopbackEngine>, EngineEventReceiver, AccountId) {
        let (engine, rx) = LoopbackEngine::with_behavior(behavior);
        engine.create_transport(&TransportConfig::default()).unwrap();
        let account = AccountId::new();
        engine
            .register_account(account, &AccountConfig::new("sip:ff@127.0.0.1"))
            .unwrap();
        (engine, rx, account)
    }

    #[test]
    fn test_register_requires_transport() {
        let (engine, _rx) = LoopbackEngine::new();
        let err = engine
            .register_account(AccountId::new(), &AccountConfig::default())
            .unwrap_err();
        assert!(matches!(err, SignalingError::RegistrationFailed { .. }));
    }

    #[test]
    fn test_outgoing_call_progress() {
        let (engine, mut rx, account) = ready_engine(LoopbackBehavior::default());
        let handle = engine
            .make_call(account, "sip:bob@example.com", &CallOptions::default())
            .unwrap();

        let events = drain(&mut rx);
        assert_eq!(
            states(&events),
            vec![
                CallState::Calling,
                CallState::Early,
                CallState::Connecting,
                CallState::Confirmed
            ]
        );
        assert!(matches!(events.last(), Some(EngineEvent::CallMediaState { .. })));
        assert!(engine.call_audio_port(handle, 0).is_some());
        assert!(engine.call_audio_port(handle, 1).is_none());
        assert_eq!(engine.calls_for(account), vec![handle]);
    }

    #[test]
    fn test_hangup_all_uses_487_before_answer() {
        let (engine, mut rx, account) =
            ready_engine(LoopbackBehavior::default().with_answer_outgoing(false));
        engine
            .make_call(account, "sip:bob@example.com", &CallOptions::default())
            .unwrap();
        drain(&mut rx);

        engine.hangup_all().unwrap();
        let events = drain(&mut rx);
        let Some(EngineEvent::CallState { info, .. }) = events.first() else {
            panic!("expected a call state event");
        };
        assert_eq!(info.state, CallState::Disconnected);
        assert_eq!(info.last_status_code, 487);
        assert!(engine.live_calls().is_empty());
    }

    #[test]
    fn test_reject_disconnects() {
        let (engine, mut rx, account) = ready_engine(LoopbackBehavior::default());
        let handle = engine.inject_incoming_call(account, "sip:alice@example.com").unwrap();
        engine.answer(handle, 486).unwrap();

        let events = drain(&mut rx);
        assert!(matches!(events[0], EngineEvent::IncomingCall { .. }));
        assert_eq!(states(&events), vec![CallState::Disconnected]);
        assert!(engine.answer(handle, 200).is_err());
    }

    #[test]
    fn test_transmit_copies_player_into_recorder() {
        let (engine, _rx) = LoopbackEngine::new();
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tone.wav");
        let copy = dir.path().join("copy.wav");
        wav::write_pcm_wav(&source, 8000, &[10, 20, 30]).unwrap();

        let player = engine.open_player(&source, false).unwrap();
        let recorder = engine.open_recorder(&copy).unwrap();
        assert!(engine.start_transmit(recorder, player).is_err());

        engine.start_transmit(player, recorder).unwrap();
        engine.stop_transmit(player, recorder).unwrap();
        assert!(engine.stop_transmit(player, recorder).is_err());
        engine.close_port(recorder).unwrap();
        engine.close_port(player).unwrap();

        assert_eq!(wav::read_pcm_wav(&copy).unwrap().samples, vec![10, 20, 30]);
        assert_eq!(engine.open_port_count(), 0);
    }

    #[test]
    fn test_stop_after_remote_hangup_is_not_an_error() {
        let (engine, _rx, account) = ready_engine(LoopbackBehavior::default());
        let dir = tempfile::tempdir().unwrap();
        let tone = dir.path().join("tone.wav");
        wav::write_pcm_wav(&tone, 8000, &[1, 2]).unwrap();

        let handle = engine.inject_incoming_call(account, "sip:alice@example.com").unwrap();
        engine.answer(handle, 200).unwrap();
        let remote = engine.call_audio_port(handle, 0).unwrap();
        let player = engine.open_player(&tone, false).unwrap();
        engine.start_transmit(player, remote).unwrap();

        engine.remote_hangup(handle).unwrap();
        assert!(engine.connections().is_empty());
        engine.stop_transmit(player, remote).unwrap();

        // ports that never carried call audio still report a missing connection
        let recorder = engine.open_recorder(&dir.path().join("rec.wav")).unwrap();
        assert!(engine.stop_transmit(player, recorder).is_err());
    }

    #[test]
    fn test_journal_records_commands_in_order() {
        let (engine, _rx, account) =
            ready_engine(LoopbackBehavior::default().with_answer_outgoing(false));
        let handle = engine
            .make_call(account, "sip:bob@example.com", &CallOptions::default())
            .unwrap();
        engine.hangup(handle, 603).unwrap();

        assert_eq!(
            engine.journal(),
            vec![
                EngineCommand::CreateTransport { port: 5060 },
                EngineCommand::RegisterAccount { account },
                EngineCommand::MakeCall {
                    account,
                    target: "sip:bob@example.com".to_string()
                },
                EngineCommand::Hangup { handle, status: 603 },
            ]
        );
    }
}
