//! Media endpoint registry
//!
//! Tracks the file-backed players and recorders a single call has opened through
//! the engine. Entries are only created for successful opens; a closed entry keeps
//! its path for diagnostics but no longer has a port.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::MediaPortId;
use crate::engine::MediaEngine;
use crate::error::MediaResourceError;

/// Index of an endpoint inside one call's registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub(crate) u16);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep{}", self.0)
    }
}

/// What an endpoint is used for within a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointRole {
    /// Audio played towards the remote party
    Player,
    /// Capture of the remote party's audio
    Recorder,
    /// Independent capture of what the player sends
    VerificationRecorder,
}

impl EndpointRole {
    /// Whether endpoints with this role consume audio
    pub fn is_sink(&self) -> bool {
        !matches!(self, EndpointRole::Player)
    }
}

/// Backing implementation of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointKind {
    Player { looping: bool },
    Recorder,
}

/// A file-backed audio source or sink owned by one call
#[derive(Debug, Clone)]
pub struct MediaEndpoint {
    id: EndpointId,
    role: EndpointRole,
    kind: EndpointKind,
    path: PathBuf,
    port: Option<MediaPortId>,
}

impl MediaEndpoint {
    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn role(&self) -> EndpointRole {
        self.role
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Engine port while open
    pub fn port(&self) -> Option<MediaPortId> {
        self.port
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

/// Registry of the endpoints one call has opened
#[derive(Debug, Default)]
pub struct MediaEndpoints {
    endpoints: Vec<MediaEndpoint>,
    next_id: u16,
}

impl MediaEndpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a player on `path` and register it
    pub fn open_player<E>(
        &mut self,
        engine: &E,
        path: &Path,
        looping: bool,
    ) -> Result<EndpointId, MediaResourceError>
    where
        E: MediaEngine + ?Sized,
    {
        let port = engine.open_player(path, looping)?;
        Ok(self.register(EndpointRole::Player, EndpointKind::Player { looping }, path, port))
    }

    /// Open a recorder on `path` and register it under `role`
    pub fn open_recorder<E>(
        &mut self,
        engine: &E,
        role: EndpointRole,
        path: &Path,
    ) -> Result<EndpointId, MediaResourceError>
    where
        E: MediaEngine + ?Sized,
    {
        if !role.is_sink() {
            return Err(MediaResourceError::invalid_direction(format!(
                "a recorder cannot take the {role:?} role"
            )));
        }
        let port = engine.open_recorder(path)?;
        Ok(self.register(role, EndpointKind::Recorder, path, port))
    }

    /// Return the open player, opening it first if needed
    pub fn ensure_player<E>(
        &mut self,
        engine: &E,
        path: &Path,
        looping: bool,
    ) -> Result<EndpointId, MediaResourceError>
    where
        E: MediaEngine + ?Sized,
    {
        match self.find_open(EndpointRole::Player) {
            Some(endpoint) => Ok(endpoint.id),
            None => self.open_player(engine, path, looping),
        }
    }

    /// Return the open recorder for `role`, opening it first if needed
    pub fn ensure_recorder<E>(
        &mut self,
        engine: &E,
        role: EndpointRole,
        path: &Path,
    ) -> Result<EndpointId, MediaResourceError>
    where
        E: MediaEngine + ?Sized,
    {
        match self.find_open(role) {
            Some(endpoint) => Ok(endpoint.id),
            None => self.open_recorder(engine, role, path),
        }
    }

    /// First open endpoint with `role`
    pub fn find_open(&self, role: EndpointRole) -> Option<&MediaEndpoint> {
        self.endpoints.iter().find(|e| e.role == role && e.is_open())
    }

    pub fn get(&self, id: EndpointId) -> Option<&MediaEndpoint> {
        self.endpoints.iter().find(|e| e.id == id)
    }

    /// Close every open endpoint, returning how many were closed
    ///
    /// Close failures are logged; the endpoint is considered released either way.
    pub fn close_all<E>(&mut self, engine: &E) -> usize
    where
        E: MediaEngine + ?Sized,
    {
        let mut closed = 0;
        for endpoint in self.endpoints.iter_mut() {
            let Some(port) = endpoint.port.take() else {
                continue;
            };
            match engine.close_port(port) {
                Ok(()) => debug!(
                    endpoint = %endpoint.id,
                    %port,
                    path = %endpoint.path.display(),
                    "Closed media endpoint"
                ),
                Err(e) => warn!(
                    endpoint = %endpoint.id,
                    %port,
                    error = %e,
                    "Failed to close media endpoint"
                ),
            }
            closed += 1;
        }
        closed
    }

    pub fn open_count(&self) -> usize {
        self.endpoints.iter().filter(|e| e.is_open()).count()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MediaEndpoint> + '_ {
        self.endpoints.iter()
    }

    fn register(
        &mut self,
        role: EndpointRole,
        kind: EndpointKind,
        path: &Path,
        port: MediaPortId,
    ) -> EndpointId {
        let id = EndpointId(self.next_id);
        self.next_id += 1;
        debug!(endpoint = %id, ?role, %port, path = %path.display(), "Opened media endpoint");
        self.endpoints.push(MediaEndpoint {
            id,
            role,
            kind,
            path: path.to_path_buf(),
            port: Some(port),
        });
        id
    }
}
