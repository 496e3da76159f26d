//! Registration configuration and status
//!
//! The registration handshake itself (REGISTER, digest challenge, refresh) is run
//! by the signaling engine. This module holds what the account needs to start it
//! and what it observes while it runs.
//!
//! # Key Components
//!
//! - **RegistrationConfig** - registrar, credentials and requested expiry
//! - **AuthCredential** - one digest credential entry
//! - **RegStateInfo** - raw registration progress reported by the engine
//! - **RegistrationStatusInfo** - the account's observable registration state
//!
//! # Usage Examples
//!
//! ```rust
//! use sipua_core::registration::{AuthCredential, RegistrationConfig};
//!
//! let config = RegistrationConfig::new("sip:192.168.3.99")
//!     .with_credential(AuthCredential::digest("asterisk", "ff", "ff"))
//!     .with_expires(600);
//!
//! assert_eq!(config.expires, 600);
//! assert_eq!(config.credentials[0].scheme, "digest");
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::AccountId;

/// Default registration expiry in seconds
pub const DEFAULT_REGISTRATION_EXPIRES: u32 = 300;

/// One authentication credential entry
///
/// `data_type` 0 means `data` is a plain-text password; other values are
/// engine-defined (e.g. a precomputed digest).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCredential {
    /// Authentication scheme, normally "digest"
    pub scheme: String,
    /// Realm the credential applies to ("*" matches any)
    pub realm: String,
    pub username: String,
    #[serde(default)]
    pub data_type: u8,
    /// Secret material; never logged
    pub data: String,
}

impl AuthCredential {
    /// Plain-text digest credential
    pub fn digest(
        realm: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            scheme: "digest".to_string(),
            realm: realm.into(),
            username: username.into(),
            data_type: 0,
            data: password.into(),
        }
    }
}

impl fmt::Debug for AuthCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthCredential")
            .field("scheme", &self.scheme)
            .field("realm", &self.realm)
            .field("username", &self.username)
            .field("data_type", &self.data_type)
            .field("data", &"<redacted>")
            .finish()
    }
}

/// Registration parameters for an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// SIP registrar URI (e.g. "sip:registrar.example.com")
    pub registrar_uri: String,

    /// Credentials offered when the registrar challenges
    #[serde(default)]
    pub credentials: Vec<AuthCredential>,

    /// Requested registration lifetime in seconds
    #[serde(default = "default_expires")]
    pub expires: u32,
}

fn default_expires() -> u32 {
    DEFAULT_REGISTRATION_EXPIRES
}

impl RegistrationConfig {
    /// Registration towards `registrar_uri` without credentials
    pub fn new(registrar_uri: impl Into<String>) -> Self {
        Self {
            registrar_uri: registrar_uri.into(),
            credentials: Vec::new(),
            expires: DEFAULT_REGISTRATION_EXPIRES,
        }
    }

    /// Add a credential entry
    pub fn with_credential(mut self, credential: AuthCredential) -> Self {
        self.credentials.push(credential);
        self
    }

    pub fn with_expires(mut self, expires: u32) -> Self {
        self.expires = expires;
        self
    }
}

/// Current status of an account's registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    /// Not registered (initial state, or after an unregister completed)
    Unregistered,
    /// REGISTER sent, no final response yet
    Registering,
    /// Registrar accepted the binding
    Registered,
    /// Registrar rejected the binding or it could not be reached
    Failed,
    /// Unregister in progress
    Unregistering,
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationStatus::Unregistered => write!(f, "Unregistered"),
            RegistrationStatus::Registering => write!(f, "Registering"),
            RegistrationStatus::Registered => write!(f, "Registered"),
            RegistrationStatus::Failed => write!(f, "Failed"),
            RegistrationStatus::Unregistering => write!(f, "Unregistering"),
        }
    }
}

/// Registration progress as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegStateInfo {
    /// Final SIP status code of the last REGISTER transaction
    pub code: u16,
    /// Reason phrase
    pub reason: String,
    /// Expiry granted by the registrar; 0 after unregistration
    pub expires: u32,
}

impl RegStateInfo {
    pub fn new(code: u16, reason: impl Into<String>, expires: u32) -> Self {
        Self {
            code,
            reason: reason.into(),
            expires,
        }
    }

    /// Whether this response leaves the account registered
    pub fn is_active(&self) -> bool {
        (200..300).contains(&self.code) && self.expires > 0
    }

    /// Status an account moves to after this response
    pub fn status(&self) -> RegistrationStatus {
        if self.is_active() {
            RegistrationStatus::Registered
        } else if (200..300).contains(&self.code) {
            RegistrationStatus::Unregistered
        } else {
            RegistrationStatus::Failed
        }
    }
}

/// Observable registration state of an account
///
/// Published through a `tokio::sync::watch` channel by the account and carried
/// by [`UaEvent::RegistrationChanged`](crate::events::UaEvent::RegistrationChanged).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationStatusInfo {
    pub account_id: AccountId,
    pub status: RegistrationStatus,
    /// Last SIP status code (0 before any response)
    pub code: u16,
    pub reason: String,
    pub expires: u32,
    /// True once the account may place and receive calls
    pub active: bool,
    pub timestamp: DateTime<Utc>,
}

impl RegistrationStatusInfo {
    /// Initial state of a freshly created account
    pub fn initial(account_id: AccountId) -> Self {
        Self {
            account_id,
            status: RegistrationStatus::Unregistered,
            code: 0,
            reason: String::new(),
            expires: 0,
            active: false,
            timestamp: Utc::now(),
        }
    }

    /// State of an account that has no registrar and is usable at once
    pub fn local(account_id: AccountId) -> Self {
        Self {
            active: true,
            reason: "no registrar configured".to_string(),
            ..Self::initial(account_id)
        }
    }

    /// State after the engine reported `info`
    pub fn from_reg_state(account_id: AccountId, info: &RegStateInfo) -> Self {
        Self {
            account_id,
            status: info.status(),
            code: info.code,
            reason: info.reason.clone(),
            expires: info.expires,
            active: info.is_active(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reg_state_activity() {
        assert!(RegStateInfo::new(200, "OK", 300).is_active());
        assert_eq!(RegStateInfo::new(200, "OK", 300).status(), RegistrationStatus::Registered);

        let unregistered = RegStateInfo::new(200, "OK", 0);
        assert!(!unregistered.is_active());
        assert_eq!(unregistered.status(), RegistrationStatus::Unregistered);

        let rejected = RegStateInfo::new(403, "Forbidden", 300);
        assert!(!rejected.is_active());
        assert_eq!(rejected.status(), RegistrationStatus::Failed);
    }

    #[test]
    fn test_credential_debug_redacts_secret() {
        let credential = AuthCredential::digest("asterisk", "ff", "hunter2");
        let printed = format!("{credential:?}");
        assert!(printed.contains("asterisk"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_local_status_is_active() {
        let info = RegistrationStatusInfo::local(AccountId::new());
        assert!(info.active);
        assert_eq!(info.status, RegistrationStatus::Unregistered);
    }
}
