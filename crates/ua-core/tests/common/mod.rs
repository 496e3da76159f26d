//! Fixtures shared by the loopback-driven tests
//!
//! [`Harness`] runs a [`UserAgent`] over a [`RecordingEngine`], which forwards
//! to a [`LoopbackEngine`] and keeps a log of every media operation the core
//! issued. Tests read that log to check what the core did rather than what the
//! loopback cleaned up on its own.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::broadcast;

use sipua_core::engine::{EngineEventReceiver, MediaEngine, SignalingEngine, TransportId};
use sipua_core::loopback::{wav, LoopbackBehavior, LoopbackEngine};
use sipua_core::media::MediaPortId;
use sipua_core::{
    AccountConfig, AccountId, AgentConfig, AuthCredential, CallHandle, CallOptions, CallRegistry,
    IncomingCallPolicy, MediaPlan, MediaResourceError, RegistrationConfig, SignalingError,
    TransportConfig, UaEvent, UserAgent,
};

pub const TONE: [i16; 8] = [0, 1200, 2400, 1200, 0, -1200, -2400, -1200];

/// Media operation issued through a [`RecordingEngine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaOp {
    Start(MediaPortId, MediaPortId),
    Stop(MediaPortId, MediaPortId),
    Close(MediaPortId),
}

/// Engine wrapper that logs media operations
///
/// With a registry attached it also notes, for every `answer`, whether the
/// call was already registered when the answer went out.
pub struct RecordingEngine {
    pub inner: Arc<LoopbackEngine>,
    registry: Option<CallRegistry>,
    seen_at_answer: Mutex<Vec<bool>>,
    media_ops: Mutex<Vec<MediaOp>>,
    /// Starts still allowed before `start_transmit` begins failing
    start_budget: Mutex<Option<usize>>,
}

impl RecordingEngine {
    pub fn new(inner: Arc<LoopbackEngine>) -> Self {
        Self {
            inner,
            registry: None,
            seen_at_answer: Mutex::new(Vec::new()),
            media_ops: Mutex::new(Vec::new()),
            start_budget: Mutex::new(None),
        }
    }

    pub fn with_registry(mut self, registry: CallRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Let `n` more transmits start, then refuse every further one
    pub fn fail_starts_after(&self, n: usize) {
        *self.start_budget.lock() = Some(n);
    }

    pub fn seen_at_answer(&self) -> Vec<bool> {
        self.seen_at_answer.lock().clone()
    }

    pub fn media_ops(&self) -> Vec<MediaOp> {
        self.media_ops.lock().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.media_ops
            .lock()
            .iter()
            .filter(|op| matches!(op, MediaOp::Stop(..)))
            .count()
    }
}

impl SignalingEngine for RecordingEngine {
    fn create_transport(&self, config: &TransportConfig) -> Result<TransportId, SignalingError> {
        self.inner.create_transport(config)
    }

    fn register_account(
        &self,
        account: AccountId,
        config: &AccountConfig,
    ) -> Result<(), SignalingError> {
        self.inner.register_account(account, config)
    }

    fn unregister_account(&self, account: AccountId) -> Result<(), SignalingError> {
        self.inner.unregister_account(account)
    }

    fn make_call(
        &self,
        account: AccountId,
        target: &str,
        options: &CallOptions,
    ) -> Result<CallHandle, SignalingError> {
        self.inner.make_call(account, target, options)
    }

    fn answer(&self, handle: CallHandle, status: u16) -> Result<(), SignalingError> {
        if let Some(registry) = &self.registry {
            self.seen_at_answer
                .lock()
                .push(registry.contains_handle(handle));
        }
        self.inner.answer(handle, status)
    }

    fn hangup(&self, handle: CallHandle, status: u16) -> Result<(), SignalingError> {
        self.inner.hangup(handle, status)
    }

    fn hangup_all(&self) -> Result<(), SignalingError> {
        self.inner.hangup_all()
    }
}

impl MediaEngine for RecordingEngine {
    fn open_player(&self, path: &Path, looping: bool) -> Result<MediaPortId, MediaResourceError> {
        self.inner.open_player(path, looping)
    }

    fn open_recorder(&self, path: &Path) -> Result<MediaPortId, MediaResourceError> {
        self.inner.open_recorder(path)
    }

    fn call_audio_port(&self, handle: CallHandle, media_index: usize) -> Option<MediaPortId> {
        self.inner.call_audio_port(handle, media_index)
    }

    fn start_transmit(&self, from: MediaPortId, to: MediaPortId) -> Result<(), MediaResourceError> {
        if let Some(budget) = self.start_budget.lock().as_mut() {
            if *budget == 0 {
                return Err(MediaResourceError::TransmitFailed {
                    from,
                    to,
                    reason: "bridge full".to_string(),
                });
            }
            *budget -= 1;
        }
        self.inner.start_transmit(from, to)?;
        self.media_ops.lock().push(MediaOp::Start(from, to));
        Ok(())
    }

    fn stop_transmit(&self, from: MediaPortId, to: MediaPortId) -> Result<(), MediaResourceError> {
        self.media_ops.lock().push(MediaOp::Stop(from, to));
        self.inner.stop_transmit(from, to)
    }

    fn close_port(&self, port: MediaPortId) -> Result<(), MediaResourceError> {
        self.media_ops.lock().push(MediaOp::Close(port));
        self.inner.close_port(port)
    }
}

/// Replay a media log and check that the core stopped every edge it started,
/// and stopped it before closing either of its ports
pub fn check_media_log(ops: &[MediaOp]) -> Result<(), String> {
    let mut live: HashSet<(MediaPortId, MediaPortId)> = HashSet::new();
    for (n, op) in ops.iter().enumerate() {
        match *op {
            MediaOp::Start(from, to) => {
                if !live.insert((from, to)) {
                    return Err(format!("op {n}: {from} -> {to} started twice"));
                }
            }
            MediaOp::Stop(from, to) => {
                if !live.remove(&(from, to)) {
                    return Err(format!("op {n}: {from} -> {to} stopped but not live"));
                }
            }
            MediaOp::Close(port) => {
                if let Some((from, to)) = live.iter().find(|(a, b)| *a == port || *b == port) {
                    return Err(format!("op {n}: {port} closed while {from} -> {to} is live"));
                }
            }
        }
    }
    match live.iter().next() {
        Some((from, to)) => Err(format!("{from} -> {to} never stopped")),
        None => Ok(()),
    }
}

pub struct Harness {
    pub engine: Arc<LoopbackEngine>,
    pub recording: Arc<RecordingEngine>,
    pub events: EngineEventReceiver,
    pub agent: UserAgent,
    pub account: AccountId,
    pub dir: TempDir,
}

impl Harness {
    pub fn pump(&mut self) -> usize {
        self.agent.pump(&mut self.events)
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn call_count(&self) -> usize {
        self.agent
            .account(self.account)
            .map(|a| a.call_count())
            .unwrap_or(0)
    }

    pub fn edges(&self) -> usize {
        self.agent.registry().snapshot().iter().map(|c| c.edges).sum()
    }
}

pub fn media_plan(dir: &Path) -> MediaPlan {
    let tone = dir.join("Ring02.wav");
    wav::write_pcm_wav(&tone, 8000, &TONE).unwrap();
    MediaPlan::default()
        .with_player(tone)
        .with_recorder(dir.join("in.wav"))
        .with_verification_recorder(dir.join("test.wav"))
}

pub fn harness_with(
    behavior: LoopbackBehavior,
    policy: Option<Arc<dyn IncomingCallPolicy>>,
    plan: impl FnOnce(&Path) -> MediaPlan,
) -> Harness {
    let (engine, events) = LoopbackEngine::with_behavior(behavior);
    let recording = Arc::new(RecordingEngine::new(engine.clone()));
    let mut agent = UserAgent::new(recording.clone(), AgentConfig::default());
    agent.create_transport(&TransportConfig::default()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let config = AccountConfig::new("sip:ff@192.168.3.99")
        .with_registration(
            RegistrationConfig::new("sip:192.168.3.99")
                .with_credential(AuthCredential::digest("asterisk", "ff", "ff")),
        )
        .with_media(plan(dir.path()));
    let account = agent.add_account(config, policy).unwrap();

    let mut harness = Harness {
        engine,
        recording,
        events,
        agent,
        account,
        dir,
    };
    harness.pump();
    harness
}

pub fn harness(behavior: LoopbackBehavior) -> Harness {
    harness_with(behavior, None, media_plan)
}

pub fn drain(rx: &mut broadcast::Receiver<UaEvent>) -> Vec<UaEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
