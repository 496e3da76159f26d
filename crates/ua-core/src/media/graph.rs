//! Media session graph
//!
//! Directed transmit connections between one call's endpoints and the remote
//! party's audio port. Every edge recorded here has been started in the engine
//! and is stopped again by [`MediaSessionGraph::teardown`].

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{EndpointId, MediaEndpoints, MediaPortId};
use crate::engine::MediaEngine;
use crate::error::MediaResourceError;

/// Node of a call's media graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaNode {
    /// One of the call's own endpoints
    Endpoint(EndpointId),
    /// The remote party's audio stream bound to this call
    RemoteAudio,
}

impl fmt::Display for MediaNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaNode::Endpoint(id) => write!(f, "{id}"),
            MediaNode::RemoteAudio => f.write_str("remote"),
        }
    }
}

/// An active transmit connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmitEdge {
    pub source: MediaNode,
    pub sink: MediaNode,
    /// Engine port the edge was started from
    pub source_port: MediaPortId,
    /// Engine port the edge was started to
    pub sink_port: MediaPortId,
}

/// Transmit graph of a single call
#[derive(Debug, Default)]
pub struct MediaSessionGraph {
    remote: Option<MediaPortId>,
    edges: Vec<TransmitEdge>,
}

impl MediaSessionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the engine port carrying the remote party's audio
    ///
    /// Callers tear the graph down before rebinding to a different port.
    pub fn bind_remote(&mut self, port: MediaPortId) {
        self.remote = Some(port);
    }

    pub fn remote(&self) -> Option<MediaPortId> {
        self.remote
    }

    /// Start transmitting from `source` to `sink`
    ///
    /// Returns `Ok(false)` when the edge already exists. Both nodes must belong to
    /// this call: an open endpoint of `endpoints`, or the bound remote port.
    pub fn connect_transmit<E>(
        &mut self,
        engine: &E,
        endpoints: &MediaEndpoints,
        source: MediaNode,
        sink: MediaNode,
    ) -> Result<bool, MediaResourceError>
    where
        E: MediaEngine + ?Sized,
    {
        if source == sink {
            return Err(MediaResourceError::invalid_direction(format!(
                "{source} cannot transmit to itself"
            )));
        }
        if self.contains(source, sink) {
            debug!(%source, %sink, "Transmit edge already connected");
            return Ok(false);
        }

        let source_port = self.resolve(endpoints, source, false)?;
        let sink_port = self.resolve(endpoints, sink, true)?;

        engine.start_transmit(source_port, sink_port)?;
        debug!(%source, %sink, %source_port, %sink_port, "Started transmit");
        self.edges.push(TransmitEdge {
            source,
            sink,
            source_port,
            sink_port,
        });
        Ok(true)
    }

    /// Stop every edge and forget the remote binding
    ///
    /// Stop failures are logged and do not interrupt the teardown. Returns the
    /// number of edges removed.
    pub fn teardown<E>(&mut self, engine: &E) -> usize
    where
        E: MediaEngine + ?Sized,
    {
        let removed = self.edges.len();
        for edge in self.edges.drain(..) {
            if let Err(e) = engine.stop_transmit(edge.source_port, edge.sink_port) {
                warn!(
                    source = %edge.source,
                    sink = %edge.sink,
                    error = %e,
                    "Failed to stop transmit"
                );
            }
        }
        self.remote = None;
        if removed > 0 {
            debug!(edges = removed, "Media graph torn down");
        }
        removed
    }

    pub fn contains(&self, source: MediaNode, sink: MediaNode) -> bool {
        self.edges.iter().any(|e| e.source == source && e.sink == sink)
    }

    pub fn edges(&self) -> &[TransmitEdge] {
        &self.edges
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    fn resolve(
        &self,
        endpoints: &MediaEndpoints,
        node: MediaNode,
        as_sink: bool,
    ) -> Result<MediaPortId, MediaResourceError> {
        match node {
            MediaNode::RemoteAudio => self.remote.ok_or(MediaResourceError::NoRemoteAudio),
            MediaNode::Endpoint(id) => {
                let endpoint = endpoints
                    .get(id)
                    .ok_or(MediaResourceError::ForeignEndpoint { endpoint: id })?;
                if endpoint.role().is_sink() != as_sink {
                    return Err(MediaResourceError::invalid_direction(format!(
                        "{id} ({:?}) cannot be used as a {}",
                        endpoint.role(),
                        if as_sink { "sink" } else { "source" }
                    )));
                }
                endpoint
                    .port()
                    .ok_or(MediaResourceError::EndpointClosed { endpoint: id })
            }
        }
    }
}
