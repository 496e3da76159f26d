//! Account: one SIP identity and the calls it owns
//!
//! An [`Account`] is the single owner of its call objects. Calls are stored as
//! `Box<dyn CallHandler>` and refer back to the account by [`AccountId`] only.
//! The collection is touched exclusively from the dispatcher task; the shared
//! [`CallRegistry`] mirrors it for readers elsewhere.
//!
//! # Call lifetime
//!
//! 1. Incoming: the call is created, added to the collection and the registry,
//!    and only then answered (or rejected) according to the account's policy.
//! 2. Outgoing: the call is created with no handle, added, and placed; the
//!    handle is bound when the engine accepts the INVITE, and the call is rolled
//!    back if it does not.
//! 3. On `Disconnected` the account takes the call out of its collection, lets it
//!    tear down its media graph and close its endpoints, and drops it.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::call::{
    CallContext, CallDirection, CallFactory, CallHandle, CallHandler, CallId, CallInfo,
    MediaCallFactory,
};
use crate::config::{parse_sip_uri, AccountConfig, CallOptions};
use crate::engine::Engine;
use crate::error::{ConsistencyViolation, SignalingError};
use crate::events::{AcceptAll, CallAction, IncomingCallInfo, IncomingCallPolicy, UaEvent};
use crate::registration::{RegStateInfo, RegistrationStatus, RegistrationStatusInfo};
use crate::registry::CallRegistry;

/// Locally assigned account identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(Uuid);

impl AccountId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-account counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStats {
    pub incoming_calls: u64,
    pub outgoing_calls: u64,
    pub removed_calls: u64,
    pub failed_commands: u64,
}

/// One SIP identity
pub struct Account {
    id: AccountId,
    config: AccountConfig,
    engine: Arc<dyn Engine>,
    registry: CallRegistry,
    events: broadcast::Sender<UaEvent>,
    policy: Arc<dyn IncomingCallPolicy>,
    factory: Arc<dyn CallFactory>,
    calls: Vec<Box<dyn CallHandler>>,
    registration: watch::Sender<RegistrationStatusInfo>,
    stats: AccountStats,
}

impl Account {
    /// Create an account that answers every incoming call with [`crate::Call`]s
    /// built from the configured media plan
    pub fn new(
        config: AccountConfig,
        engine: Arc<dyn Engine>,
        registry: CallRegistry,
        events: broadcast::Sender<UaEvent>,
    ) -> Self {
        let id = AccountId::new();
        let (registration, _) = watch::channel(RegistrationStatusInfo::initial(id));
        let factory = Arc::new(MediaCallFactory::new(config.media.clone()));
        Self {
            id,
            config,
            engine,
            registry,
            events,
            policy: Arc::new(AcceptAll),
            factory,
            calls: Vec::new(),
            registration,
            stats: AccountStats::default(),
        }
    }

    /// Replace the incoming-call policy
    pub fn with_policy(mut self, policy: Arc<dyn IncomingCallPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the factory used to build call objects
    pub fn with_factory(mut self, factory: Arc<dyn CallFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn config(&self) -> &AccountConfig {
        &self.config
    }

    /// Add the account to the engine
    ///
    /// With a registrar configured the account becomes active once the engine
    /// reports a successful registration; without one it is active immediately.
    pub fn register(&mut self) -> Result<(), SignalingError> {
        if self.config.registration.is_some() {
            self.registration.send_modify(|info| {
                info.status = RegistrationStatus::Registering;
                info.timestamp = Utc::now();
            });
            self.engine.register_account(self.id, &self.config)?;
            debug!(account_id = %self.id, uri = %self.config.id_uri, "Registration started");
        } else {
            self.engine.register_account(self.id, &self.config)?;
            let status = RegistrationStatusInfo::local(self.id);
            self.registration.send_replace(status.clone());
            info!(
                account_id = %self.id,
                uri = %self.config.id_uri,
                "Account active without registrar"
            );
            self.publish(UaEvent::RegistrationChanged { info: status });
        }
        Ok(())
    }

    /// Remove the account from the engine
    pub fn unregister(&mut self) -> Result<(), SignalingError> {
        if self.config.registration.is_some() && self.is_active() {
            self.registration.send_modify(|info| {
                info.status = RegistrationStatus::Unregistering;
                info.timestamp = Utc::now();
            });
        }
        self.engine.unregister_account(self.id)
    }

    /// Registration progress reported by the engine
    pub fn on_reg_state(&mut self, info: &RegStateInfo) {
        let status = RegistrationStatusInfo::from_reg_state(self.id, info);
        if status.active {
            info!(
                account_id = %self.id,
                code = info.code,
                expires = info.expires,
                "Register: code={}",
                info.code
            );
        } else {
            info!(
                account_id = %self.id,
                code = info.code,
                reason = %info.reason,
                "Unregister: code={}",
                info.code
            );
        }
        self.registration.send_replace(status.clone());
        self.publish(UaEvent::RegistrationChanged { info: status });
    }

    /// A new INVITE arrived for this account
    ///
    /// The call is in the collection before the policy's answer is sent.
    pub fn on_incoming_call(&mut self, handle: CallHandle, info: &CallInfo) -> CallId {
        let call_id = CallId::new();
        let ctx = self.context(
            call_id,
            Some(handle),
            CallDirection::Incoming,
            &info.remote_uri,
        );
        let call = self.factory.create(ctx);
        self.insert_call(call);
        self.stats.incoming_calls += 1;

        let incoming = IncomingCallInfo {
            call_id,
            account_id: self.id,
            handle,
            remote_uri: info.remote_uri.clone(),
            local_uri: info.local_uri.clone(),
            state_text: info.state_text.clone(),
            received_at: Utc::now(),
        };
        info!(account_id = %self.id, %call_id, %handle, remote = %info.remote_uri, "Incoming call");
        let action = self.policy.decide(&incoming);
        self.publish(UaEvent::IncomingCall { info: incoming });

        let result = match action.status_code() {
            Some(code) if action == CallAction::Accept => self.engine.answer(handle, code),
            Some(code) => self.engine.hangup(handle, code),
            None => {
                debug!(%call_id, "Incoming call left ringing");
                Ok(())
            }
        };
        if let Err(e) = result {
            self.report_command_failure("incoming_call", &e);
        }
        call_id
    }

    /// Place an outgoing call
    ///
    /// The call is owned by the account before the INVITE goes out and is
    /// removed again if the engine refuses to place it.
    pub fn make_call(
        &mut self,
        target: &str,
        options: &CallOptions,
    ) -> Result<CallId, SignalingError> {
        parse_sip_uri(target)?;

        let call_id = CallId::new();
        let ctx = self.context(call_id, None, CallDirection::Outgoing, target);
        let call = self.factory.create(ctx);
        self.insert_call(call);

        match self.engine.make_call(self.id, target, options) {
            Ok(handle) => {
                if let Some(call) = self.calls.iter_mut().find(|c| c.id() == call_id) {
                    call.bind_handle(handle);
                    self.registry.refresh(call.summary());
                }
                self.stats.outgoing_calls += 1;
                info!(account_id = %self.id, %call_id, %handle, %target, "Outgoing call placed");
                Ok(call_id)
            }
            Err(e) => {
                self.remove_call(call_id);
                self.stats.failed_commands += 1;
                error!(account_id = %self.id, %target, error = %e, "Failed to place call");
                Err(e)
            }
        }
    }

    /// Route a call-state event; returns false if no call owns `handle`
    pub fn on_call_state(&mut self, handle: CallHandle, info: &CallInfo) -> bool {
        let Some(pos) = self.position_by_handle(handle) else {
            return false;
        };

        if info.state.is_terminal() {
            let mut call = self.calls.remove(pos);
            let call_id = call.id();
            self.registry.remove(&call_id);
            call.on_call_state(info);
            drop(call);

            self.stats.removed_calls += 1;
            debug!(account_id = %self.id, %call_id, remaining = self.calls.len(), "Call removed");
            self.publish(UaEvent::CallRemoved {
                call_id,
                account_id: self.id,
            });
        } else {
            let call = &mut self.calls[pos];
            call.on_call_state(info);
            self.registry.refresh(call.summary());
        }
        true
    }

    /// Route a media-state event; returns false if no call owns `handle`
    pub fn on_call_media_state(&mut self, handle: CallHandle, info: &CallInfo) -> bool {
        let Some(pos) = self.position_by_handle(handle) else {
            return false;
        };
        let call = &mut self.calls[pos];
        call.on_call_media_state(info);
        self.registry.refresh(call.summary());
        true
    }

    /// Remove a call from the collection without tearing it down
    ///
    /// Removing a call that is not present is a no-op.
    pub fn remove_call(&mut self, call_id: CallId) -> Option<Box<dyn CallHandler>> {
        let Some(pos) = self.calls.iter().position(|c| c.id() == call_id) else {
            debug!(
                "{}",
                ConsistencyViolation::CallNotInAccount {
                    call_id,
                    account_id: self.id
                }
            );
            return None;
        };
        let call = self.calls.remove(pos);
        self.registry.remove(&call_id);
        Some(call)
    }

    pub fn owns_handle(&self, handle: CallHandle) -> bool {
        self.position_by_handle(handle).is_some()
    }

    pub fn call(&self, call_id: CallId) -> Option<&dyn CallHandler> {
        self.calls.iter().find(|c| c.id() == call_id).map(|c| c.as_ref())
    }

    pub fn calls(&self) -> impl Iterator<Item = &dyn CallHandler> + '_ {
        self.calls.iter().map(|c| c.as_ref())
    }

    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    /// Whether the account may place and receive calls
    pub fn is_active(&self) -> bool {
        self.registration.borrow().active
    }

    pub fn registration_status(&self) -> RegistrationStatusInfo {
        self.registration.borrow().clone()
    }

    /// Watch registration changes
    pub fn subscribe_registration(&self) -> watch::Receiver<RegistrationStatusInfo> {
        self.registration.subscribe()
    }

    pub fn stats(&self) -> AccountStats {
        self.stats
    }

    fn context(
        &self,
        call_id: CallId,
        handle: Option<CallHandle>,
        direction: CallDirection,
        remote_uri: &str,
    ) -> CallContext {
        CallContext {
            call_id,
            account_id: self.id,
            handle,
            direction,
            remote_uri: remote_uri.to_string(),
            engine: Arc::clone(&self.engine),
            events: self.events.clone(),
        }
    }

    fn insert_call(&mut self, call: Box<dyn CallHandler>) {
        self.registry.insert(call.summary());
        self.calls.push(call);
    }

    fn position_by_handle(&self, handle: CallHandle) -> Option<usize> {
        self.calls.iter().position(|c| c.handle() == Some(handle))
    }

    fn report_command_failure(&mut self, context: &str, e: &SignalingError) {
        self.stats.failed_commands += 1;
        error!(account_id = %self.id, error = %e, "{} command failed", context);
        self.publish(UaEvent::error(context, e));
    }

    fn publish(&self, event: UaEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for Account {
    fn drop(&mut self) {
        let remaining = self.calls.len();
        info!(
            account_id = %self.id,
            calls = remaining,
            "Account is being deleted: No of calls={}",
            remaining
        );
        if remaining > 0 {
            warn!(
                "{}",
                ConsistencyViolation::LeakedCalls {
                    account_id: self.id,
                    remaining
                }
            );
            for call in self.calls.drain(..) {
                self.registry.remove(&call.id());
            }
        }
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("uri", &self.config.id_uri)
            .field("calls", &self.calls.len())
            .field("active", &self.is_active())
            .finish()
    }
}
