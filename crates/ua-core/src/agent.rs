//! User-agent dispatcher
//!
//! [`UserAgent`] owns every [`Account`] and is the only place engine events are
//! delivered. It can be driven synchronously ([`UserAgent::dispatch`],
//! [`UserAgent::pump`]) or spawned onto a tokio task, in which case it serves
//! operator commands from a [`UserAgentHandle`] alongside engine events:
//!
//! ```text
//!  engine ──EngineEvent──┐
//!                        ├──> UserAgent task ──> Account ──> Call
//!  UserAgentHandle ──────┘         │
//!       ▲                          └──UaEvent──> broadcast subscribers
//!       └── oneshot replies
//! ```
//!
//! All handlers run to completion on the dispatcher task, so the per-account call
//! collections need no locking.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::account::{Account, AccountId};
use crate::call::{CallHandle, CallId};
use crate::config::{AccountConfig, AgentConfig, CallOptions, TransportConfig};
use crate::engine::{Engine, EngineEvent, EngineEventReceiver, TransportId};
use crate::error::{ConsistencyViolation, SignalingError, UaError, UaResult};
use crate::events::{IncomingCallPolicy, UaEvent};
use crate::registration::{RegistrationStatus, RegistrationStatusInfo};
use crate::registry::{CallRegistry, CallSummary};

/// Dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UaStats {
    pub events_dispatched: u64,
    /// Events that referred to no live call or account
    pub orphan_events: u64,
}

type Reply<T> = oneshot::Sender<T>;

/// Operator commands served by the dispatcher task
pub enum UaCommand {
    CreateTransport {
        config: TransportConfig,
        reply: Reply<Result<TransportId, SignalingError>>,
    },
    AddAccount {
        config: AccountConfig,
        policy: Option<Arc<dyn IncomingCallPolicy>>,
        reply: Reply<UaResult<(AccountId, watch::Receiver<RegistrationStatusInfo>)>>,
    },
    MakeCall {
        account: AccountId,
        target: String,
        options: CallOptions,
        reply: Reply<UaResult<CallId>>,
    },
    HangupAll {
        reply: Reply<Result<(), SignalingError>>,
    },
    CallCount {
        account: Option<AccountId>,
        reply: Reply<usize>,
    },
    Shutdown {
        reply: Reply<UaStats>,
    },
}

/// Owner of all accounts; the single dispatch context
pub struct UserAgent {
    engine: Arc<dyn Engine>,
    config: AgentConfig,
    accounts: Vec<Account>,
    registry: CallRegistry,
    events: broadcast::Sender<UaEvent>,
    stats: UaStats,
}

impl UserAgent {
    pub fn new(engine: Arc<dyn Engine>, config: AgentConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            engine,
            config,
            accounts: Vec::new(),
            registry: CallRegistry::new(),
            events,
            stats: UaStats::default(),
        }
    }

    /// Open the listening transport
    pub fn create_transport(
        &self,
        config: &TransportConfig,
    ) -> Result<TransportId, SignalingError> {
        let transport = self.engine.create_transport(config)?;
        info!(protocol = %config.protocol, port = config.port, "Transport created");
        Ok(transport)
    }

    /// Create an account and start its registration
    pub fn add_account(
        &mut self,
        config: AccountConfig,
        policy: Option<Arc<dyn IncomingCallPolicy>>,
    ) -> UaResult<AccountId> {
        config.validate()?;
        let mut account = Account::new(
            config,
            Arc::clone(&self.engine),
            self.registry.clone(),
            self.events.clone(),
        );
        if let Some(policy) = policy {
            account = account.with_policy(policy);
        }
        account.register()?;

        let id = account.id();
        info!(account_id = %id, uri = %account.config().id_uri, "Account added");
        self.accounts.push(account);
        Ok(id)
    }

    /// Place an outgoing call from `account`
    pub fn make_call(
        &mut self,
        account: AccountId,
        target: &str,
        options: &CallOptions,
    ) -> UaResult<CallId> {
        let account = self
            .account_mut(account)
            .ok_or(SignalingError::UnknownAccount { account })?;
        Ok(account.make_call(target, options)?)
    }

    /// Ask the engine to terminate every call
    ///
    /// Each call is cleaned up when its `Disconnected` event is dispatched.
    pub fn hangup_all(&self) -> Result<(), SignalingError> {
        info!(calls = self.total_calls(), "Hanging up all calls");
        self.engine.hangup_all()
    }

    /// Route one engine event to its account or call
    pub fn dispatch(&mut self, event: EngineEvent) {
        self.stats.events_dispatched += 1;
        match event {
            EngineEvent::RegState { account, info } => match self.account_mut(account) {
                Some(acc) => acc.on_reg_state(&info),
                None => {
                    self.stats.orphan_events += 1;
                    warn!(
                        account_id = %account,
                        code = info.code,
                        "Registration event for unknown account"
                    );
                }
            },
            EngineEvent::IncomingCall {
                account,
                handle,
                info,
            } => match self.account_mut(account) {
                Some(acc) => {
                    acc.on_incoming_call(handle, &info);
                }
                None => {
                    self.stats.orphan_events += 1;
                    warn!(
                        account_id = %account,
                        %handle,
                        "Incoming call for unknown account, rejecting"
                    );
                    if let Err(e) = self.engine.hangup(handle, 404) {
                        error!(%handle, error = %e, "Failed to reject call");
                    }
                }
            },
            EngineEvent::CallState { handle, info } => {
                let routed = self
                    .accounts
                    .iter_mut()
                    .any(|acc| acc.on_call_state(handle, &info));
                if !routed {
                    self.orphan(handle, "call_state");
                }
            }
            EngineEvent::CallMediaState { handle, info } => {
                let routed = self
                    .accounts
                    .iter_mut()
                    .any(|acc| acc.on_call_media_state(handle, &info));
                if !routed {
                    self.orphan(handle, "call_media_state");
                }
            }
        }
    }

    /// Dispatch every event already queued, returning how many there were
    pub fn pump(&mut self, events: &mut EngineEventReceiver) -> usize {
        let mut dispatched = 0;
        while let Ok(event) = events.try_recv() {
            self.dispatch(event);
            dispatched += 1;
        }
        dispatched
    }

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id() == id)
    }

    pub fn account_mut(&mut self, id: AccountId) -> Option<&mut Account> {
        self.accounts.iter_mut().find(|a| a.id() == id)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> + '_ {
        self.accounts.iter()
    }

    /// Live calls across all accounts
    pub fn total_calls(&self) -> usize {
        self.accounts.iter().map(|a| a.call_count()).sum()
    }

    pub fn registry(&self) -> &CallRegistry {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UaEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> UaStats {
        self.stats
    }

    /// Hang up all calls, wait for them to disconnect, then drop the accounts
    ///
    /// Waits at most the configured grace period; accounts that still own calls
    /// afterwards report them as leaked when dropped.
    pub async fn shutdown(&mut self, events: &mut EngineEventReceiver) -> UaStats {
        info!(calls = self.total_calls(), "Shutting down user agent");
        if self.total_calls() > 0 {
            if let Err(e) = self.engine.hangup_all() {
                error!(error = %e, "hangup_all failed during shutdown");
            }
        }

        let deadline = Instant::now() + self.config.shutdown_grace();
        while self.total_calls() > 0 {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) => self.dispatch(event),
                Ok(None) => break,
                Err(_) => {
                    warn!(remaining = self.total_calls(), "Shutdown grace period expired");
                    break;
                }
            }
        }

        for account in self.accounts.iter_mut() {
            if let Err(e) = account.unregister() {
                warn!(account_id = %account.id(), error = %e, "Failed to unregister account");
            }
        }
        self.accounts.clear();

        info!(
            events = self.stats.events_dispatched,
            orphans = self.stats.orphan_events,
            "User agent stopped"
        );
        self.stats
    }

    /// Move the dispatcher onto its own task
    pub fn spawn(self, events: EngineEventReceiver) -> (UserAgentHandle, JoinHandle<UaStats>) {
        let (commands, command_rx) = mpsc::channel(self.config.command_buffer.max(1));
        let handle = UserAgentHandle {
            commands,
            events: self.events.clone(),
            registry: self.registry.clone(),
            registrations: Arc::new(DashMap::new()),
        };
        let task = tokio::spawn(self.run(events, command_rx));
        (handle, task)
    }

    async fn run(
        mut self,
        mut events: EngineEventReceiver,
        mut commands: mpsc::Receiver<UaCommand>,
    ) -> UaStats {
        info!("User agent dispatcher started");
        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    debug!(kind = event.kind(), "Dispatching engine event");
                    self.dispatch(event);
                }
                command = commands.recv() => match command {
                    Some(UaCommand::Shutdown { reply }) => {
                        let stats = self.shutdown(&mut events).await;
                        let _ = reply.send(stats);
                        return stats;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All user agent handles dropped");
                        return self.shutdown(&mut events).await;
                    }
                },
            }
        }
    }

    fn handle_command(&mut self, command: UaCommand) {
        match command {
            UaCommand::CreateTransport { config, reply } => {
                let result = self.create_transport(&config);
                if let Err(e) = &result {
                    error!(error = %e, "Transport creation failed");
                }
                let _ = reply.send(result);
            }
            UaCommand::AddAccount {
                config,
                policy,
                reply,
            } => {
                let result = self.add_account(config, policy).and_then(|id| {
                    let rx = self
                        .account(id)
                        .map(|a| a.subscribe_registration())
                        .ok_or(SignalingError::UnknownAccount { account: id })?;
                    Ok((id, rx))
                });
                let _ = reply.send(result);
            }
            UaCommand::MakeCall {
                account,
                target,
                options,
                reply,
            } => {
                let _ = reply.send(self.make_call(account, &target, &options));
            }
            UaCommand::HangupAll { reply } => {
                let _ = reply.send(self.hangup_all());
            }
            UaCommand::CallCount { account, reply } => {
                let count = match account {
                    Some(id) => self.account(id).map(|a| a.call_count()).unwrap_or(0),
                    None => self.total_calls(),
                };
                let _ = reply.send(count);
            }
            UaCommand::Shutdown { reply } => {
                // handled by the run loop
                let _ = reply.send(self.stats);
            }
        }
    }

    fn orphan(&mut self, handle: CallHandle, event: &'static str) {
        self.stats.orphan_events += 1;
        debug!("{}", ConsistencyViolation::OrphanEvent { handle, event });
    }
}

/// Cloneable operator handle to a spawned [`UserAgent`]
#[derive(Clone)]
pub struct UserAgentHandle {
    commands: mpsc::Sender<UaCommand>,
    events: broadcast::Sender<UaEvent>,
    registry: CallRegistry,
    registrations: Arc<DashMap<AccountId, watch::Receiver<RegistrationStatusInfo>>>,
}

impl UserAgentHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> UaCommand) -> UaResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| UaError::DispatcherStopped)?;
        rx.await.map_err(|_| UaError::DispatcherStopped)
    }

    pub async fn create_transport(&self, config: TransportConfig) -> UaResult<TransportId> {
        let result = self
            .request(|reply| UaCommand::CreateTransport { config, reply })
            .await?;
        Ok(result?)
    }

    /// Add an account that accepts every incoming call
    pub async fn add_account(&self, config: AccountConfig) -> UaResult<AccountId> {
        self.add_account_with_policy(config, None).await
    }

    pub async fn add_account_with_policy(
        &self,
        config: AccountConfig,
        policy: Option<Arc<dyn IncomingCallPolicy>>,
    ) -> UaResult<AccountId> {
        let (id, registration) = self
            .request(|reply| UaCommand::AddAccount {
                config,
                policy,
                reply,
            })
            .await??;
        self.registrations.insert(id, registration);
        Ok(id)
    }

    /// Wait until the account may place calls
    ///
    /// Fails if the registrar rejects the account or nothing happens in time.
    pub async fn wait_until_active(
        &self,
        account: AccountId,
        timeout: Duration,
    ) -> UaResult<RegistrationStatusInfo> {
        let mut rx = self
            .registrations
            .get(&account)
            .map(|entry| entry.value().clone())
            .ok_or(SignalingError::UnknownAccount { account })?;

        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| s.active || s.status == RegistrationStatus::Failed),
        )
        .await;
        let status = match waited {
            Ok(Ok(status)) => status.clone(),
            Ok(Err(_)) => return Err(UaError::DispatcherStopped),
            Err(_) => {
                return Err(UaError::Timeout {
                    operation: "wait_until_active".to_string(),
                    duration_ms: timeout.as_millis() as u64,
                })
            }
        };

        if status.active {
            Ok(status)
        } else {
            Err(SignalingError::registration_failed(
                account,
                format!("{} {}", status.code, status.reason),
            )
            .into())
        }
    }

    pub async fn make_call(
        &self,
        account: AccountId,
        target: impl Into<String>,
        options: CallOptions,
    ) -> UaResult<CallId> {
        let target = target.into();
        self.request(|reply| UaCommand::MakeCall {
            account,
            target,
            options,
            reply,
        })
        .await?
    }

    pub async fn hangup_all(&self) -> UaResult<()> {
        Ok(self.request(|reply| UaCommand::HangupAll { reply }).await??)
    }

    /// Live calls of one account, or of all accounts
    pub async fn call_count(&self, account: Option<AccountId>) -> UaResult<usize> {
        self.request(|reply| UaCommand::CallCount { account, reply }).await
    }

    /// Stop the dispatcher after draining calls
    pub async fn shutdown(&self) -> UaResult<UaStats> {
        self.request(|reply| UaCommand::Shutdown { reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UaEvent> {
        self.events.subscribe()
    }

    /// Snapshot of all live calls
    pub fn calls(&self) -> Vec<CallSummary> {
        self.registry.snapshot()
    }

    pub fn registry(&self) -> &CallRegistry {
        &self.registry
    }
}

impl std::fmt::Debug for UserAgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserAgentHandle")
            .field("accounts", &self.registrations.len())
            .field("calls", &self.registry.len())
            .finish()
    }
}
