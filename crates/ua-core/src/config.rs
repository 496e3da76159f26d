//! User-agent configuration
//!
//! Serde-friendly configuration structures with defaults matching a plain
//! single-account deployment: UDP on 5060, one audio stream per outgoing call,
//! and the default media plan (`Ring02.wav` player, `in.wav` recorder, `test.wav`
//! verification recorder).
//!
//! # Key Components
//!
//! - **UaConfig** - everything needed to bring up one account
//! - **TransportConfig** - listening transport
//! - **AccountConfig** - identity, registration and media plan
//! - **MediaPlan** - which files a call plays and records
//! - **CallOptions** - stream counts requested for outgoing calls
//! - **AgentConfig** - dispatcher channel sizes and shutdown grace
//!
//! # Usage Examples
//!
//! ```rust
//! use sipua_core::config::{AccountConfig, MediaPlan, UaConfig};
//! use sipua_core::registration::{AuthCredential, RegistrationConfig};
//!
//! let account = AccountConfig::new("sip:ff@192.168.3.99")
//!     .with_registration(
//!         RegistrationConfig::new("sip:192.168.3.99")
//!             .with_credential(AuthCredential::digest("asterisk", "ff", "ff")),
//!     )
//!     .with_media(MediaPlan::default().with_recorder("calls/{call_id}-in.wav"));
//!
//! let config = UaConfig::default().with_account(account);
//! assert!(config.validate().is_ok());
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::call::CallId;
use crate::error::{SignalingError, UaError, UaResult};
use crate::registration::RegistrationConfig;

/// Placeholder substituted with the call id in media plan paths
pub const CALL_ID_PLACEHOLDER: &str = "{call_id}";

/// Parse and check a SIP URI (`sip:` or `sips:` scheme)
pub fn parse_sip_uri(uri: &str) -> Result<Url, SignalingError> {
    let url = Url::parse(uri).map_err(|e| SignalingError::invalid_uri(uri, e.to_string()))?;
    match url.scheme() {
        "sip" | "sips" => {}
        other => {
            return Err(SignalingError::invalid_uri(
                uri,
                format!("unsupported scheme '{other}'"),
            ))
        }
    }
    if url.path().is_empty() {
        return Err(SignalingError::invalid_uri(uri, "missing host"));
    }
    Ok(url)
}

/// Transport protocol for the listening socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    Udp,
    Tcp,
    Tls,
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportProtocol::Udp => write!(f, "UDP"),
            TransportProtocol::Tcp => write!(f, "TCP"),
            TransportProtocol::Tls => write!(f, "TLS"),
        }
    }
}

/// Listening transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub protocol: TransportProtocol,
    pub port: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            protocol: TransportProtocol::Udp,
            port: 5060,
        }
    }
}

impl TransportConfig {
    pub fn with_protocol(mut self, protocol: TransportProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Files a call plays and records
///
/// Paths may contain `{call_id}`, replaced per call by [`MediaPlan::resolve`] so
/// that concurrent calls do not share recordings. A `None` path disables that leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaPlan {
    /// Audio played to the remote party
    pub player: Option<PathBuf>,
    /// Restart the player at end of file
    pub player_loop: bool,
    /// Recording of the remote party
    pub recorder: Option<PathBuf>,
    /// Recording of what the player sends
    pub verification_recorder: Option<PathBuf>,
}

impl Default for MediaPlan {
    fn default() -> Self {
        Self {
            player: Some(PathBuf::from("Ring02.wav")),
            player_loop: false,
            recorder: Some(PathBuf::from("in.wav")),
            verification_recorder: Some(PathBuf::from("test.wav")),
        }
    }
}

impl MediaPlan {
    /// A plan that opens nothing
    pub fn disabled() -> Self {
        Self {
            player: None,
            player_loop: false,
            recorder: None,
            verification_recorder: None,
        }
    }

    pub fn with_player(mut self, path: impl Into<PathBuf>) -> Self {
        self.player = Some(path.into());
        self
    }

    pub fn with_player_loop(mut self, looping: bool) -> Self {
        self.player_loop = looping;
        self
    }

    pub fn with_recorder(mut self, path: impl Into<PathBuf>) -> Self {
        self.recorder = Some(path.into());
        self
    }

    pub fn with_verification_recorder(mut self, path: impl Into<PathBuf>) -> Self {
        self.verification_recorder = Some(path.into());
        self
    }

    /// Copy of the plan with `{call_id}` substituted in every path
    pub fn resolve(&self, call_id: &CallId) -> MediaPlan {
        let id = call_id.to_string();
        let substitute = |path: &Option<PathBuf>| {
            path.as_ref().map(|p| {
                let text = p.to_string_lossy();
                if text.contains(CALL_ID_PLACEHOLDER) {
                    PathBuf::from(text.replace(CALL_ID_PLACEHOLDER, &id))
                } else {
                    p.clone()
                }
            })
        };
        MediaPlan {
            player: substitute(&self.player),
            player_loop: self.player_loop,
            recorder: substitute(&self.recorder),
            verification_recorder: substitute(&self.verification_recorder),
        }
    }
}

/// One SIP identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Identity URI, e.g. "sip:alice@example.com"
    pub id_uri: String,

    /// Registrar settings; without them the account is usable immediately
    #[serde(default)]
    pub registration: Option<RegistrationConfig>,

    #[serde(default)]
    pub media: MediaPlan,
}

impl AccountConfig {
    pub fn new(id_uri: impl Into<String>) -> Self {
        Self {
            id_uri: id_uri.into(),
            registration: None,
            media: MediaPlan::default(),
        }
    }

    pub fn with_registration(mut self, registration: RegistrationConfig) -> Self {
        self.registration = Some(registration);
        self
    }

    pub fn with_media(mut self, media: MediaPlan) -> Self {
        self.media = media;
        self
    }

    /// Check the identity and registrar URIs
    pub fn validate(&self) -> UaResult<()> {
        parse_sip_uri(&self.id_uri)
            .map_err(|e| UaError::invalid_configuration("account.id_uri", e.to_string()))?;
        if let Some(registration) = &self.registration {
            parse_sip_uri(&registration.registrar_uri).map_err(|e| {
                UaError::invalid_configuration("account.registration.registrar_uri", e.to_string())
            })?;
        }
        Ok(())
    }
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self::new("sip:sipua@localhost")
    }
}

/// Stream counts requested for outgoing calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallOptions {
    pub audio_count: u32,
    pub video_count: u32,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            audio_count: 1,
            video_count: 0,
        }
    }
}

impl CallOptions {
    pub fn with_audio_count(mut self, count: u32) -> Self {
        self.audio_count = count;
        self
    }

    pub fn with_video_count(mut self, count: u32) -> Self {
        self.video_count = count;
        self
    }
}

/// Dispatcher settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Capacity of the operator command channel
    pub command_buffer: usize,
    /// Capacity of the operator event broadcast
    pub event_capacity: usize,
    /// How long shutdown waits for calls to disconnect
    pub shutdown_grace_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command_buffer: 64,
            event_capacity: 256,
            shutdown_grace_ms: 4000,
        }
    }
}

impl AgentConfig {
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn validate(&self) -> UaResult<()> {
        if self.command_buffer == 0 {
            return Err(UaError::invalid_configuration(
                "agent.command_buffer",
                "must be at least 1",
            ));
        }
        if self.event_capacity == 0 {
            return Err(UaError::invalid_configuration(
                "agent.event_capacity",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Complete user-agent configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UaConfig {
    pub transport: TransportConfig,
    pub account: AccountConfig,
    pub call: CallOptions,
    pub agent: AgentConfig,
}

impl UaConfig {
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_account(mut self, account: AccountConfig) -> Self {
        self.account = account;
        self
    }

    pub fn with_call_options(mut self, call: CallOptions) -> Self {
        self.call = call;
        self
    }

    pub fn with_agent(mut self, agent: AgentConfig) -> Self {
        self.agent = agent;
        self
    }

    /// Validate the whole configuration
    pub fn validate(&self) -> UaResult<()> {
        self.account.validate()?;
        self.agent.validate()?;
        if self.call.audio_count == 0 && self.call.video_count == 0 {
            return Err(UaError::invalid_configuration(
                "call",
                "at least one audio or video stream is required",
            ));
        }
        Ok(())
    }
}
