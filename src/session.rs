// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wires a [`MeshCoordinator`] to its collaborators.
//!
//! The [`SessionActor`] task owns the coordinator and is the only one touching it. It reacts to
//! commands from [`SessionHandle`]s, to presence changes, to relay batches and to link reports.

use crate::config::MeshConfig;
use crate::link::LinkEvent;
use crate::mesh::MeshCoordinator;
use crate::messages::RelayRecord;
use crate::presence::{Participants, PresenceEvent, PresenceSource, PresenceTracker};
use crate::relay::{RecordBatches, Relay};
use crate::transport::TransportFactory;
use crate::types::{LinkState, MeshEvent, ObjectId, ParticipantId, Role, SurfaceId};
use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info_span, trace, warn, Instrument};

pub type PeerSummary = (ParticipantId, Role, LinkState);

// These messages are sent to the task that owns the mesh.
pub enum SessionMessage {
    SetActiveSurface(SurfaceId),
    PointerMoved {
        x: f64,
        y: f64,
        response_tx: oneshot::Sender<bool>,
    },
    DragStarted {
        object_id: ObjectId,
        response_tx: oneshot::Sender<bool>,
    },
    DragMoved {
        object_id: ObjectId,
        x: f64,
        y: f64,
        response_tx: oneshot::Sender<bool>,
    },
    DragEnded {
        object_id: ObjectId,
        x: f64,
        y: f64,
    },
    Peers {
        response_tx: oneshot::Sender<Vec<PeerSummary>>,
    },
}

impl fmt::Debug for SessionMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let repr = match self {
            Self::SetActiveSurface(surface_id) => format!("switch to surface {surface_id}"),
            Self::PointerMoved { x, y, .. } => format!("pointer at ({x}, {y})"),
            Self::DragStarted { object_id, .. } => format!("drag of {object_id} started"),
            Self::DragMoved { object_id, x, y, .. } => {
                format!("{object_id} dragged to ({x}, {y})")
            }
            Self::DragEnded { object_id, x, y } => format!("{object_id} dropped at ({x}, {y})"),
            Self::Peers { .. } => "list peers".to_string(),
        };
        write!(f, "SessionMessage({repr})")
    }
}

pub struct SessionActor {
    mesh: MeshCoordinator,
    relay: Arc<dyn Relay>,
    presence: Arc<dyn PresenceSource>,
    tracker: PresenceTracker,
    presence_rx: Option<watch::Receiver<Participants>>,
    batches_rx: Option<RecordBatches>,
    message_rx: mpsc::Receiver<SessionMessage>,
}

impl SessionActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                message = self.message_rx.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => break,
                },
                changed = presence_changed(&mut self.presence_rx) => {
                    if changed {
                        self.sync_presence();
                    } else {
                        debug!("Presence feed went away");
                        self.presence_rx = None;
                    }
                },
                batch = next_batch(&mut self.batches_rx) => match batch {
                    Some(records) => self.process_batch(records).await,
                    None => {
                        debug!("Relay subscription ended");
                        self.batches_rx = None;
                    }
                },
                event = self.mesh.next_link_event() => self.handle_link_event(event).await,
            }
        }
        debug!("Channel towards session handle has been closed (probably shutting down)");
        self.mesh.shutdown();
    }

    async fn handle_message(&mut self, message: SessionMessage) {
        trace!("Handling session message: {message:?}");
        match message {
            SessionMessage::SetActiveSurface(surface_id) => {
                self.set_active_surface(surface_id).await;
            }
            SessionMessage::PointerMoved { x, y, response_tx } => {
                let _ = response_tx.send(self.mesh.send_cursor(x, y));
            }
            SessionMessage::DragStarted {
                object_id,
                response_tx,
            } => {
                let _ = response_tx.send(self.mesh.send_drag_start(object_id));
            }
            SessionMessage::DragMoved {
                object_id,
                x,
                y,
                response_tx,
            } => {
                let _ = response_tx.send(self.mesh.send_drag_position(object_id, x, y));
            }
            SessionMessage::DragEnded { object_id, x, y } => {
                self.mesh.send_drag_end(object_id, x, y);
            }
            SessionMessage::Peers { response_tx } => {
                let _ = response_tx.send(self.mesh.peers());
            }
        }
    }

    async fn set_active_surface(&mut self, surface_id: SurfaceId) {
        if !self.mesh.set_active_surface(surface_id.clone()) {
            return;
        }
        self.tracker.reset();
        self.presence_rx = Some(self.presence.watch(&surface_id));
        self.batches_rx = match self.relay.subscribe(&surface_id, self.mesh.local_id()).await {
            Ok(batches) => Some(batches),
            Err(err) => {
                warn!("Could not subscribe to the relay for {surface_id}: {err:#}");
                None
            }
        };
        self.sync_presence();
    }

    fn sync_presence(&mut self) {
        let Some(presence_rx) = self.presence_rx.as_mut() else {
            return;
        };
        let snapshot = presence_rx.borrow_and_update().clone();
        for event in self.tracker.update(&snapshot) {
            match event {
                PresenceEvent::Discovered(participant) => {
                    self.mesh.on_participant_discovered(participant);
                }
                PresenceEvent::Left(participant) => self.mesh.on_participant_left(&participant),
            }
        }
    }

    async fn process_batch(&mut self, records: Vec<RelayRecord>) {
        let consumed = self.mesh.process_envelopes(records);
        if consumed.is_empty() {
            return;
        }
        if let Err(err) = self.relay.delete(&consumed).await {
            warn!("Failed to delete consumed relay records: {err:#}");
        }
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        if let Some(record) = self.mesh.handle_link_event(event) {
            if let Err(err) = self.relay.publish(record).await {
                warn!("Failed to publish to the relay: {err:#}");
            }
        }
    }
}

async fn presence_changed(presence_rx: &mut Option<watch::Receiver<Participants>>) -> bool {
    match presence_rx {
        Some(presence_rx) => presence_rx.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

async fn next_batch(batches_rx: &mut Option<RecordBatches>) -> Option<Vec<RelayRecord>> {
    match batches_rx {
        Some(batches_rx) => batches_rx.recv().await,
        None => std::future::pending().await,
    }
}

/// This handle knows how to talk to the `SessionActor`. Once every clone of it is dropped, the
/// actor tears down all links and stops.
#[derive(Clone)]
pub struct SessionHandle {
    local_id: ParticipantId,
    message_tx: mpsc::Sender<SessionMessage>,
    events_tx: broadcast::Sender<MeshEvent>,
}

impl SessionHandle {
    /// Must be called from within a Tokio runtime.
    pub fn new(
        local_id: ParticipantId,
        config: MeshConfig,
        factory: Arc<dyn TransportFactory>,
        relay: Arc<dyn Relay>,
        presence: Arc<dyn PresenceSource>,
    ) -> Self {
        let (message_tx, message_rx) = mpsc::channel(16);
        let span = info_span!("mesh", participant = %local_id);
        let mesh = MeshCoordinator::new(local_id.clone(), config, factory);
        let events_tx = mesh.event_sender();

        let actor = SessionActor {
            tracker: PresenceTracker::new(local_id.clone()),
            mesh,
            relay,
            presence,
            presence_rx: None,
            batches_rx: None,
            message_rx,
        };
        tokio::spawn(actor.run().instrument(span));

        Self {
            local_id,
            message_tx,
            events_tx,
        }
    }

    pub const fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<MeshEvent> {
        self.events_tx.subscribe()
    }

    async fn send_message(&self, message: SessionMessage) -> Result<()> {
        self.message_tx
            .send(message)
            .await
            .ok()
            .context("Session task has stopped")
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send_message(message(response_tx)).await?;
        response_rx
            .await
            .context("Session task dropped the request")
    }

    pub async fn set_active_surface(&self, surface_id: SurfaceId) -> Result<()> {
        self.send_message(SessionMessage::SetActiveSurface(surface_id))
            .await
    }

    /// Returns whether the position was transmitted or throttled away.
    pub async fn pointer_moved(&self, x: f64, y: f64) -> Result<bool> {
        self.request(|response_tx| SessionMessage::PointerMoved { x, y, response_tx })
            .await
    }

    pub async fn drag_started(&self, object_id: ObjectId) -> Result<bool> {
        self.request(|response_tx| SessionMessage::DragStarted {
            object_id,
            response_tx,
        })
        .await
    }

    pub async fn drag_moved(&self, object_id: ObjectId, x: f64, y: f64) -> Result<bool> {
        self.request(|response_tx| SessionMessage::DragMoved {
            object_id,
            x,
            y,
            response_tx,
        })
        .await
    }

    pub async fn drag_ended(&self, object_id: ObjectId, x: f64, y: f64) -> Result<()> {
        self.send_message(SessionMessage::DragEnded { object_id, x, y })
            .await
    }

    pub async fn peers(&self) -> Result<Vec<PeerSummary>> {
        self.request(|response_tx| SessionMessage::Peers { response_tx })
            .await
    }
}
