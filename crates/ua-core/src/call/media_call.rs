//! The media-wiring call
//!
//! When media becomes active a [`Call`] plays its configured file to the remote
//! party, records the remote party, and records its own playback a second time
//! through the verification recorder:
//!
//! ```text
//!             +--> remote audio --> recorder
//! player -----+
//!             +--> verification recorder
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{CallContext, CallDirection, CallHandle, CallHandler, CallId, CallInfo, CallState};
use crate::account::AccountId;
use crate::config::MediaPlan;
use crate::engine::Engine;
use crate::error::{ConsistencyViolation, MediaResourceError};
use crate::events::{CallStatusInfo, UaEvent};
use crate::media::{EndpointRole, MediaEndpoints, MediaNode, MediaSessionGraph};
use crate::registry::CallSummary;

/// A call that wires a player and two recorders to the remote audio
pub struct Call {
    id: CallId,
    account_id: AccountId,
    handle: Option<CallHandle>,
    direction: CallDirection,
    remote_uri: String,
    state: CallState,
    last_status: u16,
    /// Plan with per-call paths already substituted
    plan: MediaPlan,
    endpoints: MediaEndpoints,
    graph: MediaSessionGraph,
    engine: Arc<dyn Engine>,
    events: broadcast::Sender<UaEvent>,
    released: bool,
    created_at: DateTime<Utc>,
}

impl Call {
    /// Create a call and open its primary recorder
    ///
    /// A recorder that cannot be opened now is retried when media becomes active.
    pub fn new(ctx: CallContext, plan: &MediaPlan) -> Self {
        let mut call = Self {
            id: ctx.call_id,
            account_id: ctx.account_id,
            handle: ctx.handle,
            direction: ctx.direction,
            remote_uri: ctx.remote_uri,
            state: CallState::Null,
            last_status: 0,
            plan: plan.resolve(&ctx.call_id),
            endpoints: MediaEndpoints::new(),
            graph: MediaSessionGraph::new(),
            engine: ctx.engine,
            events: ctx.events,
            released: false,
            created_at: Utc::now(),
        };

        if let Some(path) = call.plan.recorder.clone() {
            if let Err(e) =
                call.endpoints
                    .open_recorder(call.engine.as_ref(), EndpointRole::Recorder, &path)
            {
                warn!(
                    call_id = %call.id,
                    error = %e,
                    "Recorder not opened, retrying when media is active"
                );
            }
        }
        call
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn remote_uri(&self) -> &str {
        &self.remote_uri
    }

    pub fn media_graph(&self) -> &MediaSessionGraph {
        &self.graph
    }

    pub fn endpoints(&self) -> &MediaEndpoints {
        &self.endpoints
    }

    /// Whether graph and endpoints have been released
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Open missing endpoints and wire them to the first usable audio stream
    ///
    /// Returns the number of edges in the graph afterwards. A media state without
    /// usable audio tears down any existing wiring and is not an error.
    ///
    /// Legs are connected in order: player to remote, remote to recorder, then
    /// player to verification recorder. When a leg fails, the legs already
    /// connected stay in the graph and are released with the rest at teardown;
    /// the call goes on without the failed leg and later ones.
    fn connect_media(&mut self, info: &CallInfo) -> Result<usize, MediaResourceError> {
        let engine = Arc::clone(&self.engine);
        let engine = engine.as_ref();

        let player = match &self.plan.player {
            Some(path) => Some(self.endpoints.ensure_player(engine, path, self.plan.player_loop)?),
            None => None,
        };
        let verification = match &self.plan.verification_recorder {
            Some(path) => Some(self.endpoints.ensure_recorder(
                engine,
                EndpointRole::VerificationRecorder,
                path,
            )?),
            None => None,
        };
        let recorder = match &self.plan.recorder {
            Some(path) => {
                match self.endpoints.ensure_recorder(engine, EndpointRole::Recorder, path) {
                    Ok(id) => Some(id),
                    Err(e) => {
                        warn!(call_id = %self.id, error = %e, "Remote audio will not be recorded");
                        None
                    }
                }
            }
            None => None,
        };

        let Some(handle) = self.handle else {
            return Ok(0);
        };

        let remote = info
            .active_audio()
            .find_map(|media| engine.call_audio_port(handle, media.index));
        let Some(remote) = remote else {
            let removed = self.graph.teardown(engine);
            if removed > 0 {
                info!(call_id = %self.id, edges = removed, "Media deactivated");
            } else {
                debug!(call_id = %self.id, "No active audio in media state");
            }
            return Ok(0);
        };

        if self.graph.remote() != Some(remote) {
            if self.graph.remote().is_some() {
                let removed = self.graph.teardown(engine);
                info!(
                    call_id = %self.id,
                    edges = removed,
                    %remote,
                    "Remote audio changed, rewiring"
                );
            }
            self.graph.bind_remote(remote);
        }

        if let Some(player) = player {
            self.graph.connect_transmit(
                engine,
                &self.endpoints,
                MediaNode::Endpoint(player),
                MediaNode::RemoteAudio,
            )?;
        }
        if let Some(recorder) = recorder {
            self.graph.connect_transmit(
                engine,
                &self.endpoints,
                MediaNode::RemoteAudio,
                MediaNode::Endpoint(recorder),
            )?;
        }
        if let (Some(player), Some(verification)) = (player, verification) {
            self.graph.connect_transmit(
                engine,
                &self.endpoints,
                MediaNode::Endpoint(player),
                MediaNode::Endpoint(verification),
            )?;
        }

        Ok(self.graph.edge_count())
    }

    /// Tear down the graph, then close the endpoints
    fn release_media(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let engine = Arc::clone(&self.engine);
        let edges = self.graph.teardown(engine.as_ref());
        let closed = self.endpoints.close_all(engine.as_ref());
        debug!(call_id = %self.id, edges, endpoints = closed, "Released call media");
    }

    fn publish(&self, event: UaEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn after_terminal(&self, handler: &'static str) -> bool {
        if self.state.is_terminal() {
            let violation = ConsistencyViolation::HandlerAfterTerminal {
                call_id: self.id,
                handler,
            };
            warn!(call_id = %self.id, "{}", violation);
            return true;
        }
        false
    }
}

impl CallHandler for Call {
    fn id(&self) -> CallId {
        self.id
    }

    fn account_id(&self) -> AccountId {
        self.account_id
    }

    fn handle(&self) -> Option<CallHandle> {
        self.handle
    }

    fn bind_handle(&mut self, handle: CallHandle) {
        self.handle = Some(handle);
    }

    fn state(&self) -> CallState {
        self.state
    }

    fn summary(&self) -> CallSummary {
        CallSummary {
            call_id: self.id,
            account_id: self.account_id,
            handle: self.handle,
            direction: self.direction,
            remote_uri: self.remote_uri.clone(),
            state: self.state,
            edges: self.graph.edge_count(),
            created_at: self.created_at,
        }
    }

    fn on_call_state(&mut self, info: &CallInfo) {
        if self.after_terminal("on_call_state") {
            return;
        }

        let previous = self.state;
        self.state = info.state;
        self.last_status = info.last_status_code;
        if self.remote_uri.is_empty() {
            self.remote_uri = info.remote_uri.clone();
        }

        info!(
            call_id = %self.id,
            handle = ?self.handle,
            remote = %self.remote_uri,
            state = %info.state_text,
            "Call state changed"
        );

        self.publish(UaEvent::CallStateChanged {
            info: CallStatusInfo {
                call_id: self.id,
                account_id: self.account_id,
                handle: self.handle,
                previous_state: previous,
                new_state: info.state,
                reason: info.state_text.clone(),
                status_code: self.last_status,
                timestamp: Utc::now(),
            },
        });

        if info.state.is_terminal() {
            self.release_media();
        }
    }

    fn on_call_media_state(&mut self, info: &CallInfo) {
        if self.after_terminal("on_call_media_state") {
            return;
        }

        match self.connect_media(info) {
            Ok(0) => {}
            Ok(edges) => {
                info!(call_id = %self.id, edges, "Media connected");
                self.publish(UaEvent::MediaConnected {
                    call_id: self.id,
                    edges,
                });
            }
            Err(e) => {
                warn!(call_id = %self.id, "Error when playing: {}", e);
                self.publish(UaEvent::MediaFailed {
                    call_id: self.id,
                    reason: e.to_string(),
                });
            }
        }
    }
}

impl Drop for Call {
    fn drop(&mut self) {
        self.release_media();
    }
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("account_id", &self.account_id)
            .field("handle", &self.handle)
            .field("state", &self.state)
            .field("edges", &self.graph.edge_count())
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallMediaInfo;
    use crate::loopback::LoopbackEngine;
    use tracing_test::traced_test;

    fn context(
        engine: Arc<LoopbackEngine>,
        handle: Option<CallHandle>,
    ) -> (CallContext, broadcast::Receiver<UaEvent>) {
        let (events, rx) = broadcast::channel(16);
        let ctx = CallContext {
            call_id: CallId::new(),
            account_id: AccountId::new(),
            handle,
            direction: CallDirection::Incoming,
            remote_uri: "sip:alice@example.com".to_string(),
            engine,
            events,
        };
        (ctx, rx)
    }

    #[traced_test]
    #[test]
    fn test_missing_player_is_reported_not_propagated() {
        let (engine, _events) = LoopbackEngine::new();
        let dir = tempfile::tempdir().unwrap();
        let plan = MediaPlan::default()
            .with_player(dir.path().join("Ring02.wav"))
            .with_recorder(dir.path().join("in.wav"))
            .with_verification_recorder(dir.path().join("test.wav"));
        let (ctx, mut rx) = context(Arc::clone(&engine), Some(CallHandle(1)));

        let mut call = Call::new(ctx, &plan);
        let info = CallInfo::new(CallHandle(1), CallState::Confirmed)
            .with_media(vec![CallMediaInfo::audio(0)]);
        call.on_call_media_state(&info);

        assert!(call.media_graph().is_empty());
        assert!(logs_contain("Error when playing"));
        assert!(matches!(rx.try_recv(), Ok(UaEvent::MediaFailed { .. })));
    }

    #[traced_test]
    #[test]
    fn test_handlers_after_terminal_are_ignored() {
        let (engine, _events) = LoopbackEngine::new();
        let (ctx, _rx) = context(Arc::clone(&engine), Some(CallHandle(9)));
        let mut call = Call::new(ctx, &MediaPlan::disabled());

        call.on_call_state(&CallInfo::new(CallHandle(9), CallState::Disconnected));
        assert!(call.is_released());

        call.on_call_state(&CallInfo::new(CallHandle(9), CallState::Confirmed));
        assert_eq!(call.state(), CallState::Disconnected);
        call.on_call_media_state(&CallInfo::new(CallHandle(9), CallState::Disconnected));
        assert!(logs_contain("after terminal state"));
    }

    #[test]
    fn test_drop_closes_endpoints() {
        let (engine, _events) = LoopbackEngine::new();
        let dir = tempfile::tempdir().unwrap();
        let plan = MediaPlan::disabled().with_recorder(dir.path().join("{call_id}.wav"));
        let (ctx, _rx) = context(Arc::clone(&engine), None);
        let call_id = ctx.call_id;

        let call = Call::new(ctx, &plan);
        assert_eq!(call.endpoints().open_count(), 1);
        assert_eq!(engine.open_port_count(), 1);
        assert!(dir.path().join(format!("{call_id}.wav")).exists());

        drop(call);
        assert_eq!(engine.open_port_count(), 0);
    }
}
