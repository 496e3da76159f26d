//! Per-call media: file-backed endpoints and the transmit graph between them
//!
//! A call owns a [`MediaEndpoints`] registry (player, recorder, verification
//! recorder) and a [`MediaSessionGraph`] describing which ports currently stream
//! into which. The engine performs the actual frame forwarding; this module only
//! tracks what has been asked of it so that everything can be undone in order.

use std::fmt;

use serde::{Deserialize, Serialize};

mod endpoint;
mod graph;

pub use endpoint::{EndpointId, EndpointKind, EndpointRole, MediaEndpoint, MediaEndpoints};
pub use graph::{MediaNode, MediaSessionGraph, TransmitEdge};

/// Engine-side media port (player, recorder or a call's audio stream)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MediaPortId(pub u32);

impl fmt::Display for MediaPortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port{}", self.0)
    }
}
