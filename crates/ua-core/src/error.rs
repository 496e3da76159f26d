//! Error types for the user-agent core
//!
//! Errors are split along the boundaries of the system:
//!
//! - [`SignalingError`] - raised by the signaling engine (transport, registration,
//!   call placement, answer/hangup commands). Surfaced to whoever issued the command.
//! - [`MediaResourceError`] - a media endpoint could not be opened or a transmit
//!   connection could not be made. Caught at the media-state handler boundary and
//!   never propagated back into the engine.
//! - [`ConsistencyViolation`] - a programming-contract violation detected at runtime
//!   (handler after terminal state, leaked calls, events for unknown calls). These are
//!   logged, never returned from event handlers.
//!
//! [`UaError`] is the umbrella type returned by the operator-facing API.
//!
//! # Handling pattern
//!
//! ```rust
//! use sipua_core::{SignalingError, UaError};
//!
//! let err: UaError =
//!     SignalingError::call_placement_failed("sip:bob@example.com", "503 Service Unavailable")
//!         .into();
//! assert_eq!(err.category(), "signaling");
//! assert!(err.is_recoverable());
//! ```

use std::path::PathBuf;

use thiserror::Error;

use crate::account::AccountId;
use crate::call::{CallHandle, CallId};
use crate::media::{EndpointId, MediaPortId};

/// Result type alias for operator-facing operations
pub type UaResult<T> = Result<T, UaError>;

/// Failures reported by the external signaling engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignalingError {
    #[error("Transport creation failed ({protocol} port {port}): {reason}")]
    TransportFailed {
        protocol: String,
        port: u16,
        reason: String,
    },

    #[error("Registration failed for account {account}: {reason}")]
    RegistrationFailed { account: String, reason: String },

    #[error("Call to {target} could not be placed: {reason}")]
    CallPlacementFailed { target: String, reason: String },

    #[error("Command {command} failed: {reason}")]
    CommandFailed { command: &'static str, reason: String },

    #[error("Invalid SIP URI {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("Unknown account: {account}")]
    UnknownAccount { account: AccountId },

    #[error("Unknown call handle: {handle}")]
    UnknownCall { handle: CallHandle },

    #[error("Signaling engine unavailable: {reason}")]
    EngineUnavailable { reason: String },
}

impl SignalingError {
    /// Create a transport failure
    pub fn transport_failed(protocol: impl ToString, port: u16, reason: impl Into<String>) -> Self {
        Self::TransportFailed {
            protocol: protocol.to_string(),
            port,
            reason: reason.into(),
        }
    }

    /// Create a registration failure
    pub fn registration_failed(account: impl ToString, reason: impl Into<String>) -> Self {
        Self::RegistrationFailed {
            account: account.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a call placement failure
    pub fn call_placement_failed(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CallPlacementFailed {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create a generic command failure
    pub fn command_failed(command: &'static str, reason: impl Into<String>) -> Self {
        Self::CommandFailed {
            command,
            reason: reason.into(),
        }
    }

    /// Create an invalid URI error
    pub fn invalid_uri(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUri {
            uri: uri.into(),
            reason: reason.into(),
        }
    }
}

/// Failures while opening media endpoints or wiring transmit connections
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MediaResourceError {
    #[error("Cannot open media file {}: {reason}", .path.display())]
    OpenFailed { path: PathBuf, reason: String },

    #[error("Unsupported media file {}: {reason}", .path.display())]
    InvalidFormat { path: PathBuf, reason: String },

    #[error("Transmit {from} -> {to} failed: {reason}")]
    TransmitFailed {
        from: MediaPortId,
        to: MediaPortId,
        reason: String,
    },

    #[error("Unknown media port: {port}")]
    UnknownPort { port: MediaPortId },

    #[error("Endpoint {endpoint} does not belong to this call")]
    ForeignEndpoint { endpoint: EndpointId },

    #[error("Endpoint {endpoint} is closed")]
    EndpointClosed { endpoint: EndpointId },

    #[error("No remote audio is bound to the media session")]
    NoRemoteAudio,

    #[error("Invalid transmit direction: {reason}")]
    InvalidDirection { reason: String },
}

impl MediaResourceError {
    /// Create an open failure for a file-backed endpoint
    pub fn open_failed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::OpenFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an unsupported-format error
    pub fn invalid_format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid direction error
    pub fn invalid_direction(reason: impl Into<String>) -> Self {
        Self::InvalidDirection {
            reason: reason.into(),
        }
    }
}

/// Contract violations detected at runtime
///
/// None of these are expected in correct operation. They are logged where they are
/// detected; only [`ConsistencyViolation::CallNotInAccount`] is routinely tolerated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConsistencyViolation {
    #[error("{handler} invoked on call {call_id} after terminal state")]
    HandlerAfterTerminal {
        call_id: CallId,
        handler: &'static str,
    },

    #[error("Call {call_id} is not owned by account {account_id}")]
    CallNotInAccount { call_id: CallId, account_id: AccountId },

    #[error("Account {account_id} destroyed with {remaining} live call(s)")]
    LeakedCalls { account_id: AccountId, remaining: usize },

    #[error("{event} event for unknown call handle {handle}")]
    OrphanEvent {
        handle: CallHandle,
        event: &'static str,
    },
}

/// Umbrella error for the operator-facing API
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UaError {
    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    MediaResource(#[from] MediaResourceError),

    #[error(transparent)]
    Consistency(#[from] ConsistencyViolation),

    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Operation {operation} timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    #[error("User agent dispatcher is not running")]
    DispatcherStopped,
}

impl UaError {
    /// Create an invalid configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Check if retrying the operation can succeed without changing anything
    pub fn is_recoverable(&self) -> bool {
        match self {
            UaError::Signaling(SignalingError::CallPlacementFailed { .. })
            | UaError::Signaling(SignalingError::RegistrationFailed { .. })
            | UaError::Signaling(SignalingError::CommandFailed { .. })
            | UaError::Timeout { .. } => true,

            UaError::InvalidConfiguration { .. }
            | UaError::Signaling(SignalingError::InvalidUri { .. })
            | UaError::DispatcherStopped => false,

            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            UaError::Signaling(_) => "signaling",
            UaError::MediaResource(_) => "media",
            UaError::Consistency(_) => "consistency",
            UaError::InvalidConfiguration { .. } => "configuration",
            UaError::Timeout { .. } | UaError::DispatcherStopped => "system",
        }
    }
}
