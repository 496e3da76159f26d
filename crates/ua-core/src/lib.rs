//! # sipua-core - SIP user-agent call and media core
//!
//! This crate holds the part of a SIP user agent that sits between the SIP stack
//! and the application: account registration state, the per-call state machine,
//! and the media session graph that connects a call's file player and recorders
//! to the remote party's audio.
//!
//! The SIP stack and audio bridge are consumed through the [`engine`] traits. A
//! self-contained [`loopback`] engine simulates the far end for tests and demos.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use sipua_core::{AccountConfig, AgentConfig, CallOptions, TransportConfig, UserAgent};
//! use sipua_core::loopback::LoopbackEngine;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (engine, events) = LoopbackEngine::new();
//!     let (ua, task) = UserAgent::new(engine, AgentConfig::default()).spawn(events);
//!
//!     ua.create_transport(TransportConfig::default()).await?;
//!     let account = ua.add_account(AccountConfig::new("sip:ff@127.0.0.1")).await?;
//!     ua.wait_until_active(account, Duration::from_secs(5)).await?;
//!
//!     ua.make_call(account, "sip:bob@127.0.0.1", CallOptions::default()).await?;
//!     tokio::time::sleep(Duration::from_secs(1)).await;
//!
//!     ua.hangup_all().await?;
//!     ua.shutdown().await?;
//!     task.await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! UserAgent (dispatcher task)
//!   └── Account (one per SIP identity, owns its calls)
//!         └── Call (CallHandler)
//!               ├── MediaEndpoints   player, recorder, verification recorder
//!               └── MediaSessionGraph  transmit edges to/from the remote audio
//! ```
//!
//! Every engine event is handled on the dispatcher task. When a call reaches
//! `Disconnected` its account removes it, the call tears down its graph and
//! closes its endpoints, and the call is dropped.

pub mod account;
pub mod agent;
pub mod call;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod loopback;
pub mod media;
pub mod registration;
pub mod registry;

pub use account::{Account, AccountId, AccountStats};
pub use agent::{UaCommand, UaStats, UserAgent, UserAgentHandle};
pub use call::{
    Call, CallContext, CallDirection, CallFactory, CallHandle, CallHandler, CallId, CallInfo,
    CallMediaInfo, CallState, MediaCallFactory, MediaStatus, MediaType,
};
pub use config::{
    AccountConfig, AgentConfig, CallOptions, MediaPlan, TransportConfig, TransportProtocol,
    UaConfig,
};
pub use engine::{
    Engine, EngineEvent, EngineEventReceiver, EngineEventSender, MediaEngine, SignalingEngine,
};
pub use error::{ConsistencyViolation, MediaResourceError, SignalingError, UaError, UaResult};
pub use events::{AcceptAll, CallAction, IncomingCallInfo, IncomingCallPolicy, RejectAll, UaEvent};
pub use media::{EndpointId, EndpointRole, MediaNode, MediaPortId, MediaSessionGraph};
pub use registration::{
    AuthCredential, RegistrationConfig, RegistrationStatus, RegistrationStatusInfo,
};
pub use registry::{CallRegistry, CallSummary};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
