// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Everything that crosses the wire: application messages exchanged directly between peers, and
//! the negotiation records that travel through the relay.

use crate::types::{EnvelopeId, ObjectId, ParticipantId, SurfaceId};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Sent directly over an established link. Not relayed, not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AppMessage {
    Cursor {
        participant: ParticipantId,
        x: f64,
        y: f64,
    },
    #[serde(rename_all = "camelCase")]
    DragStart {
        participant: ParticipantId,
        object_id: ObjectId,
    },
    #[serde(rename_all = "camelCase")]
    Drag {
        participant: ParticipantId,
        object_id: ObjectId,
        x: f64,
        y: f64,
    },
    #[serde(rename_all = "camelCase")]
    DragEnd {
        participant: ParticipantId,
        object_id: ObjectId,
        x: f64,
        y: f64,
    },
    KeepalivePing,
    KeepalivePong,
}

impl AppMessage {
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to decode application message")
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to encode application message")
    }

    /// Replaces whatever identity the sender claimed with the one the link was established for.
    #[must_use]
    pub fn with_sender(self, sender: &ParticipantId) -> Self {
        match self {
            Self::Cursor { x, y, .. } => Self::Cursor {
                participant: sender.clone(),
                x,
                y,
            },
            Self::DragStart { object_id, .. } => Self::DragStart {
                participant: sender.clone(),
                object_id,
            },
            Self::Drag { object_id, x, y, .. } => Self::Drag {
                participant: sender.clone(),
                object_id,
                x,
                y,
            },
            Self::DragEnd { object_id, x, y, .. } => Self::DragEnd {
                participant: sender.clone(),
                object_id,
                x,
                y,
            },
            Self::KeepalivePing => Self::KeepalivePing,
            Self::KeepalivePong => Self::KeepalivePong,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
}

impl SessionDescription {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into() }
    }
}

/// A NAT traversal candidate, in the shape browsers hand them out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
}

impl Candidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Open,
    Accept,
    Candidate,
}

/// The decoded content of a negotiation envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Open(SessionDescription),
    Accept(SessionDescription),
    Candidate(Candidate),
}

impl Signal {
    pub const fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Open(_) => EnvelopeKind::Open,
            Self::Accept(_) => EnvelopeKind::Accept,
            Self::Candidate(_) => EnvelopeKind::Candidate,
        }
    }

    pub fn decode(kind: EnvelopeKind, payload: &str) -> Result<Self> {
        let signal = match kind {
            EnvelopeKind::Open => Self::Open(
                serde_json::from_str(payload).context("Malformed session description in open")?,
            ),
            EnvelopeKind::Accept => Self::Accept(
                serde_json::from_str(payload)
                    .context("Malformed session description in accept")?,
            ),
            EnvelopeKind::Candidate => Self::Candidate(
                serde_json::from_str(payload).context("Malformed candidate payload")?,
            ),
        };
        Ok(signal)
    }

    pub fn encode_payload(&self) -> Result<String> {
        let payload = match self {
            Self::Open(description) | Self::Accept(description) => {
                serde_json::to_string(description)?
            }
            Self::Candidate(candidate) => serde_json::to_string(candidate)?,
        };
        Ok(payload)
    }
}

/// A negotiation envelope as stored in the relay log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRecord {
    pub id: EnvelopeId,
    pub surface_id: SurfaceId,
    pub from_participant: ParticipantId,
    pub to_participant: ParticipantId,
    pub kind: EnvelopeKind,
    pub payload: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl RelayRecord {
    pub fn new(
        surface_id: SurfaceId,
        from_participant: ParticipantId,
        to_participant: ParticipantId,
        signal: &Signal,
    ) -> Result<Self> {
        Ok(Self {
            id: EnvelopeId::random(),
            surface_id,
            from_participant,
            to_participant,
            kind: signal.kind(),
            payload: signal.encode_payload()?,
            created_at: unix_millis(SystemTime::now()),
        })
    }

    pub fn signal(&self) -> Result<Signal> {
        Signal::decode(self.kind, &self.payload)
    }
}

pub(crate) fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}
