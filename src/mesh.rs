// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! This module provides the [`MeshCoordinator`], which owns one [`PeerLink`] per remote
//! participant on the active surface.
//!
//! The coordinator itself performs no relay I/O: it consumes batches of relay records and link
//! reports, and hands back what has to be deleted from or published to the relay. The
//! [`session`](crate::session) module does the actual talking.

use crate::config::MeshConfig;
use crate::dedup::SeenEnvelopes;
use crate::link::{LinkEvent, LinkEventKind, LinkId, PeerLink};
use crate::messages::{AppMessage, RelayRecord, Signal};
use crate::throttle::OutboundThrottle;
use crate::transport::TransportFactory;
use crate::types::{
    EnvelopeId, LinkState, MeshEvent, ObjectId, ParticipantId, Role, SurfaceId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How many candidates we keep for a participant whose open hasn't arrived yet.
const EARLY_CANDIDATE_CAP: usize = 64;

pub struct MeshCoordinator {
    local_id: ParticipantId,
    config: MeshConfig,
    factory: Arc<dyn TransportFactory>,
    active_surface: Option<SurfaceId>,
    links: HashMap<ParticipantId, PeerLink>,
    seen_envelopes: SeenEnvelopes,
    early_candidates: HashMap<ParticipantId, Vec<Signal>>,
    throttle: OutboundThrottle,
    next_link_id: LinkId,
    link_events_tx: mpsc::UnboundedSender<LinkEvent>,
    link_events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    events_tx: broadcast::Sender<MeshEvent>,
}

impl MeshCoordinator {
    pub fn new(
        local_id: ParticipantId,
        config: MeshConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        let (link_events_tx, link_events_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            local_id,
            seen_envelopes: SeenEnvelopes::new(config.seen_envelope_cap),
            early_candidates: HashMap::new(),
            throttle: OutboundThrottle::new(&config),
            config,
            factory,
            active_surface: None,
            links: HashMap::new(),
            next_link_id: 0,
            link_events_tx,
            link_events_rx,
            events_tx,
        }
    }

    pub const fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub const fn active_surface(&self) -> Option<&SurfaceId> {
        self.active_surface.as_ref()
    }

    /// Mesh events are buffered up to `event_capacity`. A subscriber that falls further behind
    /// gets [`RecvError::Lagged`](broadcast::error::RecvError::Lagged) and has lost the skipped
    /// events, including `PeerDisconnected`. Such a subscriber should resync from
    /// [`peers`](Self::peers).
    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.events_tx.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<MeshEvent> {
        self.events_tx.clone()
    }

    /// Switches the mesh to another surface. Every existing link is torn down.
    /// Returns whether anything changed.
    pub fn set_active_surface(&mut self, surface_id: SurfaceId) -> bool {
        if self.active_surface.as_ref() == Some(&surface_id) {
            return false;
        }
        info!("Switching mesh to surface {surface_id}");
        self.destroy_all_links();
        self.seen_envelopes.clear();
        self.early_candidates.clear();
        self.active_surface = Some(surface_id);
        true
    }

    pub fn on_participant_discovered(&mut self, remote_id: ParticipantId) {
        if remote_id == self.local_id || self.links.contains_key(&remote_id) {
            return;
        }
        if self.active_surface.is_none() {
            debug!("Ignoring discovery of {remote_id} without an active surface");
            return;
        }
        let role = Role::for_pair(&self.local_id, &remote_id);
        self.create_link(remote_id, role);
    }

    pub fn on_participant_left(&mut self, remote_id: &ParticipantId) {
        self.early_candidates.remove(remote_id);
        if let Some(mut link) = self.links.remove(remote_id) {
            info!("{remote_id} left");
            link.destroy();
            self.notify(MeshEvent::PeerDisconnected(remote_id.clone()));
        }
    }

    /// Routes a batch of relay records to their links. Returns the ids that were consumed by
    /// this call, which the caller should delete from the relay. Redelivered ids are skipped
    /// and not returned again.
    pub fn process_envelopes(
        &mut self,
        records: impl IntoIterator<Item = RelayRecord>,
    ) -> Vec<EnvelopeId> {
        let mut consumed = vec![];
        for record in records {
            if !self.seen_envelopes.insert(record.id.clone()) {
                continue;
            }
            consumed.push(record.id.clone());
            self.route(record);
        }
        consumed
    }

    fn route(&mut self, record: RelayRecord) {
        if record.to_participant != self.local_id {
            debug!("Envelope {} is addressed to someone else", record.id);
            return;
        }
        if self.active_surface.as_ref() != Some(&record.surface_id) {
            debug!("Envelope {} belongs to another surface", record.id);
            return;
        }
        if record.from_participant == self.local_id {
            debug!("Envelope {} was sent to ourselves", record.id);
            return;
        }
        let kind = record.kind;
        let signal = match record.signal() {
            Ok(signal) => signal,
            Err(err) => {
                debug!("Dropping envelope {}: {err:#}", record.id);
                return;
            }
        };
        let from = record.from_participant;

        if !self.links.contains_key(&from) {
            match signal {
                // The envelope beat the presence feed.
                Signal::Open(_) => self.create_link(from.clone(), Role::Responder),
                Signal::Candidate(_) => {
                    self.hold_early_candidate(from, signal);
                    return;
                }
                Signal::Accept(_) => {
                    debug!("No link for {kind:?} envelope from {from}");
                    return;
                }
            }
        }
        if let Some(link) = self.links.get(&from) {
            link.enqueue(signal);
        }
    }

    /// Relay order isn't guaranteed, so candidates may overtake the open they belong to.
    /// They wait here until a link to their sender exists.
    fn hold_early_candidate(&mut self, from: ParticipantId, signal: Signal) {
        let held = self.early_candidates.entry(from.clone()).or_default();
        if held.len() >= EARLY_CANDIDATE_CAP {
            debug!("Too many early candidates from {from}, dropping one");
            return;
        }
        held.push(signal);
    }

    pub fn early_candidate_count(&self, remote_id: &ParticipantId) -> usize {
        self.early_candidates.get(remote_id).map_or(0, Vec::len)
    }

    fn create_link(&mut self, remote_id: ParticipantId, role: Role) {
        let parts = match self.factory.create(&self.local_id, &remote_id, role) {
            Ok(parts) => parts,
            Err(err) => {
                warn!("Could not create transport for {remote_id}: {err:#}");
                return;
            }
        };
        self.next_link_id += 1;
        debug!("Creating link to {remote_id} as {role}");
        let link = PeerLink::spawn(
            self.next_link_id,
            remote_id.clone(),
            role,
            parts,
            self.config.keepalive_interval,
            self.link_events_tx.clone(),
        );
        // The link keeps these until it has a remote description.
        for candidate in self.early_candidates.remove(&remote_id).into_iter().flatten() {
            link.enqueue(candidate);
        }
        self.links.insert(remote_id, link);
    }

    pub async fn next_link_event(&mut self) -> LinkEvent {
        self.link_events_rx
            .recv()
            .await
            .expect("The coordinator holds a sender, so the channel can't close")
    }

    /// Folds a link's report into the mesh. Returns a record to publish on the relay, if the
    /// link produced a negotiation signal.
    pub fn handle_link_event(&mut self, event: LinkEvent) -> Option<RelayRecord> {
        let LinkEvent {
            link_id,
            remote_id,
            kind,
        } = event;
        if self.links.get(&remote_id).map(PeerLink::id) != Some(link_id) {
            debug!("Ignoring report from replaced link {link_id} to {remote_id}");
            return None;
        }

        match kind {
            LinkEventKind::Signal(signal) => {
                let surface_id = self.active_surface.clone()?;
                match RelayRecord::new(surface_id, self.local_id.clone(), remote_id, &signal) {
                    Ok(record) => return Some(record),
                    Err(err) => warn!("Failed to wrap signal for the relay: {err:#}"),
                }
            }
            LinkEventKind::Connected => {
                self.notify(MeshEvent::PeerConnected(remote_id));
            }
            LinkEventKind::Message(message) => {
                if let Some(event) = presentation_event(message) {
                    self.notify(event);
                }
            }
            LinkEventKind::Closed(err) => {
                warn!("Lost connection to {remote_id}: {err}");
                if let Some(mut link) = self.links.remove(&remote_id) {
                    link.destroy();
                }
                self.notify(MeshEvent::PeerDisconnected(remote_id));
            }
        }
        None
    }

    pub fn send_cursor(&mut self, x: f64, y: f64) -> bool {
        if !self.throttle.allow_cursor(Instant::now()) {
            return false;
        }
        self.broadcast(&AppMessage::Cursor {
            participant: self.local_id.clone(),
            x,
            y,
        });
        true
    }

    pub fn send_drag_start(&mut self, object_id: ObjectId) -> bool {
        if !self.throttle.allow_drag_start(&object_id, Instant::now()) {
            return false;
        }
        self.broadcast(&AppMessage::DragStart {
            participant: self.local_id.clone(),
            object_id,
        });
        true
    }

    pub fn send_drag_position(&mut self, object_id: ObjectId, x: f64, y: f64) -> bool {
        if !self.throttle.allow_drag(&object_id, Instant::now()) {
            return false;
        }
        self.broadcast(&AppMessage::Drag {
            participant: self.local_id.clone(),
            object_id,
            x,
            y,
        });
        true
    }

    /// Always transmitted: the final position must not get lost.
    pub fn send_drag_end(&mut self, object_id: ObjectId, x: f64, y: f64) {
        self.throttle.finish_drag(&object_id);
        self.broadcast(&AppMessage::DragEnd {
            participant: self.local_id.clone(),
            object_id,
            x,
            y,
        });
    }

    /// Hands the message to every link. Links that can't deliver drop it. Returns how many
    /// links actually sent it.
    pub fn broadcast(&self, message: &AppMessage) -> usize {
        self.links
            .values()
            .filter(|link| link.send(message))
            .count()
    }

    pub fn peers(&self) -> Vec<(ParticipantId, Role, LinkState)> {
        let mut peers: Vec<_> = self
            .links
            .values()
            .map(|link| (link.remote_id().clone(), link.role(), link.state()))
            .collect();
        peers.sort_by(|a, b| a.0.cmp(&b.0));
        peers
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn seen_envelope_count(&self) -> usize {
        self.seen_envelopes.len()
    }

    pub fn shutdown(&mut self) {
        self.destroy_all_links();
        self.early_candidates.clear();
        self.active_surface = None;
    }

    fn destroy_all_links(&mut self) {
        for (remote_id, mut link) in self.links.drain() {
            link.destroy();
            let _ = self.events_tx.send(MeshEvent::PeerDisconnected(remote_id));
        }
    }

    fn notify(&self, event: MeshEvent) {
        // Nobody listening is fine.
        let _ = self.events_tx.send(event);
    }
}

fn presentation_event(message: AppMessage) -> Option<MeshEvent> {
    match message {
        AppMessage::Cursor { participant, x, y } => {
            Some(MeshEvent::CursorMoved { participant, x, y })
        }
        AppMessage::DragStart {
            participant,
            object_id,
        } => Some(MeshEvent::DragStarted {
            participant,
            object_id,
        }),
        AppMessage::Drag {
            participant,
            object_id,
            x,
            y,
        } => Some(MeshEvent::Dragged {
            participant,
            object_id,
            x,
            y,
        }),
        AppMessage::DragEnd {
            participant,
            object_id,
            x,
            y,
        } => Some(MeshEvent::DragEnded {
            participant,
            object_id,
            x,
            y,
        }),
        AppMessage::KeepalivePing | AppMessage::KeepalivePong => None,
    }
}
