// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The seam between a [`PeerLink`](crate::link::PeerLink) and whatever actually moves bytes
//! between two participants.

use crate::messages::{Candidate, SessionDescription};
use crate::types::{ParticipantId, Role};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Negotiation side of a direct transport. Only the link's own task ever touches it, so the
/// asynchronous steps never overlap.
#[async_trait]
pub trait Transport: Send {
    /// Creates the application channel. Only the initiator does this; the responder gets it
    /// announced through the offer.
    fn open_channel(&mut self) -> Result<()>;
    async fn create_offer(&mut self) -> Result<SessionDescription>;
    async fn create_answer(&mut self) -> Result<SessionDescription>;
    async fn set_remote_description(&mut self, description: SessionDescription) -> Result<()>;
    async fn add_candidate(&mut self, candidate: Candidate) -> Result<()>;
    /// Releases everything. Must be safe to call more than once.
    fn close(&mut self);
}

/// Sending side of the application channel. Sends never block: they either go out immediately
/// or fail.
pub trait DataChannel: Send + Sync {
    fn send(&self, payload: &str) -> Result<()>;
}

/// What a transport reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    LocalCandidate(Candidate),
    ChannelOpen,
    Message(String),
    Failed(String),
    Closed,
}

pub struct TransportParts {
    pub transport: Box<dyn Transport>,
    pub channel: Arc<dyn DataChannel>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        local: &ParticipantId,
        remote: &ParticipantId,
        role: Role,
    ) -> Result<TransportParts>;
}
