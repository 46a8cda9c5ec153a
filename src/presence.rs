// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Who is currently looking at a surface.
//!
//! Presence sources hand out snapshots of the participant set. The mesh wants edges instead, so
//! the [`PresenceTracker`] diffs successive snapshots.

use crate::types::{ParticipantId, SurfaceId};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::debug;

pub type Participants = BTreeSet<ParticipantId>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    Discovered(ParticipantId),
    Left(ParticipantId),
}

/// Turns snapshots into `Discovered`/`Left` edges. The local participant is never reported.
#[derive(Debug)]
pub struct PresenceTracker {
    local_id: ParticipantId,
    known: Participants,
}

impl PresenceTracker {
    pub const fn new(local_id: ParticipantId) -> Self {
        Self {
            local_id,
            known: BTreeSet::new(),
        }
    }

    /// Departures are reported before arrivals.
    pub fn update(&mut self, snapshot: &Participants) -> Vec<PresenceEvent> {
        let current: Participants = snapshot
            .iter()
            .filter(|id| **id != self.local_id)
            .cloned()
            .collect();

        let mut events: Vec<_> = self
            .known
            .difference(&current)
            .cloned()
            .map(PresenceEvent::Left)
            .collect();
        events.extend(
            current
                .difference(&self.known)
                .cloned()
                .map(PresenceEvent::Discovered),
        );
        self.known = current;
        events
    }

    /// Forgets everyone, e.g. because the surface changed.
    pub fn reset(&mut self) {
        self.known.clear();
    }

    pub const fn known(&self) -> &Participants {
        &self.known
    }
}

pub trait PresenceSource: Send + Sync {
    /// A live view of the participants on `surface_id`.
    fn watch(&self, surface_id: &SurfaceId) -> watch::Receiver<Participants>;
}

/// In-process presence: participants announce themselves with [`join`](Self::join) and go away
/// with [`leave`](Self::leave).
#[derive(Clone, Default)]
pub struct PresenceBoard {
    surfaces: Arc<Mutex<HashMap<SurfaceId, watch::Sender<Participants>>>>,
}

impl PresenceBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SurfaceId, watch::Sender<Participants>>> {
        self.surfaces.lock().expect("Presence board lock poisoned")
    }

    pub fn join(&self, surface_id: &SurfaceId, participant: ParticipantId) {
        debug!("{participant} joined {surface_id}");
        let mut surfaces = self.lock();
        let sender = surfaces
            .entry(surface_id.clone())
            .or_insert_with(|| watch::channel(Participants::new()).0);
        sender.send_if_modified(|participants| participants.insert(participant));
    }

    pub fn leave(&self, surface_id: &SurfaceId, participant: &ParticipantId) {
        debug!("{participant} left {surface_id}");
        if let Some(sender) = self.lock().get(surface_id) {
            sender.send_if_modified(|participants| participants.remove(participant));
        }
    }

    pub fn participants(&self, surface_id: &SurfaceId) -> Participants {
        self.lock()
            .get(surface_id)
            .map(|sender| sender.borrow().clone())
            .unwrap_or_default()
    }
}

impl PresenceSource for PresenceBoard {
    fn watch(&self, surface_id: &SurfaceId) -> watch::Receiver<Participants> {
        self.lock()
            .entry(surface_id.clone())
            .or_insert_with(|| watch::channel(Participants::new()).0)
            .subscribe()
    }
}
