// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use derive_more::{AsRef, Deref, Display};
use serde::{Deserialize, Serialize};

/// Opaque, globally unique user identifier. The ordering is only used to break ties when
/// deciding which side of a pair opens the connection.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Deref, AsRef, Display,
)]
#[serde(transparent)]
#[as_ref(str)]
#[must_use]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifies the collaborative surface whose mesh is live.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Deref, AsRef, Display)]
#[serde(transparent)]
#[as_ref(str)]
#[must_use]
pub struct SurfaceId(String);

impl SurfaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl From<&str> for SurfaceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// An object on the surface that can be dragged around.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Deref, AsRef, Display)]
#[serde(transparent)]
#[as_ref(str)]
#[must_use]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier of a record in the negotiation relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Deref, AsRef, Display)]
#[serde(transparent)]
#[as_ref(str)]
#[must_use]
pub struct EnvelopeId(String);

impl EnvelopeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }
}

impl From<&str> for EnvelopeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Role {
    #[display("initiator")]
    Initiator,
    #[display("responder")]
    Responder,
}

impl Role {
    /// The participant with the smaller identifier always opens the connection, no matter who
    /// noticed whom first. Both sides compute the same answer without talking to each other.
    pub fn for_pair(local: &ParticipantId, remote: &ParticipantId) -> Self {
        if local < remote {
            Self::Initiator
        } else {
            Self::Responder
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LinkState {
    #[display("new")]
    New,
    #[display("negotiating as {_0}")]
    Negotiating(Role),
    #[display("connected")]
    Connected,
    #[display("closed")]
    Closed,
}

/// What the mesh reports to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    CursorMoved {
        participant: ParticipantId,
        x: f64,
        y: f64,
    },
    DragStarted {
        participant: ParticipantId,
        object_id: ObjectId,
    },
    Dragged {
        participant: ParticipantId,
        object_id: ObjectId,
        x: f64,
        y: f64,
    },
    DragEnded {
        participant: ParticipantId,
        object_id: ObjectId,
        x: f64,
        y: f64,
    },
    PeerConnected(ParticipantId),
    PeerDisconnected(ParticipantId),
}

impl MeshEvent {
    pub fn participant(&self) -> &ParticipantId {
        match self {
            Self::CursorMoved { participant, .. }
            | Self::DragStarted { participant, .. }
            | Self::Dragged { participant, .. }
            | Self::DragEnded { participant, .. }
            | Self::PeerConnected(participant)
            | Self::PeerDisconnected(participant) => participant,
        }
    }
}
