//! Call capability interface and construction

use std::sync::Arc;

use tokio::sync::broadcast;

use super::{Call, CallDirection, CallHandle, CallId, CallInfo, CallState};
use crate::account::AccountId;
use crate::config::MediaPlan;
use crate::engine::Engine;
use crate::events::UaEvent;
use crate::registry::CallSummary;

/// Notifications a call reacts to
///
/// The owning account routes engine events to its calls through this trait.
/// Handlers run on the dispatcher task and must not block. After a call observed
/// `Disconnected` the account removes and drops it; a handler invoked after that
/// point is a contract violation the implementation logs and ignores.
pub trait CallHandler: Send {
    fn id(&self) -> CallId;

    /// Owning account
    fn account_id(&self) -> AccountId;

    /// Engine handle, `None` until an outgoing call has been placed
    fn handle(&self) -> Option<CallHandle>;

    /// Attach the handle the engine returned for an outgoing call
    fn bind_handle(&mut self, handle: CallHandle);

    fn state(&self) -> CallState;

    /// Snapshot for the call registry
    fn summary(&self) -> CallSummary;

    /// Signaling state changed
    fn on_call_state(&mut self, info: &CallInfo);

    /// Media negotiation finished or changed
    fn on_call_media_state(&mut self, info: &CallInfo);
}

/// Everything a call needs from its account at construction
#[derive(Clone)]
pub struct CallContext {
    pub call_id: CallId,
    pub account_id: AccountId,
    pub handle: Option<CallHandle>,
    pub direction: CallDirection,
    pub remote_uri: String,
    pub engine: Arc<dyn Engine>,
    pub events: broadcast::Sender<UaEvent>,
}

/// Builds the call objects an account owns
pub trait CallFactory: Send + Sync {
    fn create(&self, ctx: CallContext) -> Box<dyn CallHandler>;
}

/// Factory for [`Call`], the player/recorder wiring call
#[derive(Debug, Clone, Default)]
pub struct MediaCallFactory {
    plan: MediaPlan,
}

impl MediaCallFactory {
    pub fn new(plan: MediaPlan) -> Self {
        Self { plan }
    }
}

impl CallFactory for MediaCallFactory {
    fn create(&self, ctx: CallContext) -> Box<dyn CallHandler> {
        Box::new(Call::new(ctx, &self.plan))
    }
}
