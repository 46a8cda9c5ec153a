// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::Result;
use async_trait::async_trait;
use peermesh::config::MeshConfig;
use peermesh::memory_transport::{MemoryNetwork, MemoryTransportFactory};
use peermesh::messages::{EnvelopeKind, RelayRecord};
use peermesh::presence::PresenceBoard;
use peermesh::relay::{MemoryRelay, RecordBatches, Relay};
use peermesh::session::SessionHandle;
use peermesh::types::{EnvelopeId, MeshEvent, ObjectId, ParticipantId, SurfaceId};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Duration, Instant};

/// Keeps a copy of everything that was ever published.
#[derive(Clone, Default)]
struct RecordingRelay {
    inner: MemoryRelay,
    published: Arc<Mutex<Vec<RelayRecord>>>,
}

impl RecordingRelay {
    fn published(&self, kind: EnvelopeKind) -> Vec<RelayRecord> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|record| record.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Relay for RecordingRelay {
    async fn publish(&self, record: RelayRecord) -> Result<()> {
        self.published.lock().unwrap().push(record.clone());
        self.inner.publish(record).await
    }

    async fn delete(&self, ids: &[EnvelopeId]) -> Result<()> {
        self.inner.delete(ids).await
    }

    async fn subscribe(
        &self,
        surface_id: &SurfaceId,
        participant: &ParticipantId,
    ) -> Result<RecordBatches> {
        self.inner.subscribe(surface_id, participant).await
    }
}

struct Surface {
    id: SurfaceId,
    network: MemoryNetwork,
    relay: RecordingRelay,
    board: PresenceBoard,
}

impl Surface {
    fn new() -> Self {
        Self {
            id: "board".into(),
            network: MemoryNetwork::new(),
            relay: RecordingRelay::default(),
            board: PresenceBoard::new(),
        }
    }

    async fn join(&self, id: &str) -> (SessionHandle, broadcast::Receiver<MeshEvent>) {
        let session = SessionHandle::new(
            id.into(),
            MeshConfig::default(),
            Arc::new(MemoryTransportFactory::new(self.network.clone())),
            Arc::new(self.relay.clone()),
            Arc::new(self.board.clone()),
        );
        let events = session.subscribe_events();
        self.board.join(&self.id, id.into());
        session
            .set_active_surface(self.id.clone())
            .await
            .expect("Session should be running");
        (session, events)
    }
}

async fn wait_for(
    events: &mut broadcast::Receiver<MeshEvent>,
    wanted: impl Fn(&MeshEvent) -> bool,
) -> MeshEvent {
    timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.expect("Event channel closed");
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("Timed out waiting for mesh event")
}

/// Everything that arrives until the mesh has been quiet for a second.
async fn drain(events: &mut broadcast::Receiver<MeshEvent>) -> Vec<MeshEvent> {
    let mut drained = vec![];
    while let Ok(Ok(event)) = timeout(Duration::from_secs(1), events.recv()).await {
        drained.push(event);
    }
    drained
}

async fn connected_pair(surface: &Surface) -> [(SessionHandle, broadcast::Receiver<MeshEvent>); 2] {
    let (a, mut a_events) = surface.join("a1").await;
    let (b, mut b_events) = surface.join("b2").await;
    wait_for(&mut a_events, |event| {
        *event == MeshEvent::PeerConnected("b2".into())
    })
    .await;
    wait_for(&mut b_events, |event| {
        *event == MeshEvent::PeerConnected("a1".into())
    })
    .await;
    [(a, a_events), (b, b_events)]
}

#[tokio::test(start_paused = true)]
async fn only_the_smaller_participant_opens() {
    let surface = Surface::new();
    let _pair = connected_pair(&surface).await;

    let opens = surface.relay.published(EnvelopeKind::Open);
    assert_eq!(opens.len(), 1);
    assert_eq!(opens[0].from_participant.as_str(), "a1");
    assert_eq!(opens[0].to_participant.as_str(), "b2");

    let accepts = surface.relay.published(EnvelopeKind::Accept);
    assert_eq!(accepts.len(), 1);
    assert_eq!(accepts[0].from_participant.as_str(), "b2");
}

#[tokio::test(start_paused = true)]
async fn redelivered_open_is_ignored() {
    let surface = Surface::new();
    let [(a, _), (_b, mut b_events)] = connected_pair(&surface).await;

    let open = surface.relay.published(EnvelopeKind::Open).remove(0);
    surface.relay.inner.publish(open.clone()).await.unwrap();
    surface.relay.inner.publish(open).await.unwrap();
    sleep(Duration::from_secs(1)).await;

    assert_eq!(surface.relay.published(EnvelopeKind::Accept).len(), 1);
    assert!(a.pointer_moved(1.0, 2.0).await.unwrap());
    wait_for(&mut b_events, |event| {
        matches!(event, MeshEvent::CursorMoved { .. })
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn cursor_updates_are_capped_at_the_interval() {
    let surface = Surface::new();
    let [(a, _), (_b, mut b_events)] = connected_pair(&surface).await;

    let start = Instant::now();
    let mut sent = 0;
    let mut n = 0.0;
    while start.elapsed() < Duration::from_secs(1) {
        if a.pointer_moved(n, n).await.unwrap() {
            sent += 1;
        }
        n += 1.0;
        sleep(Duration::from_millis(1)).await;
    }

    let received = drain(&mut b_events)
        .await
        .iter()
        .filter(|event| matches!(event, MeshEvent::CursorMoved { .. }))
        .count();
    assert!((19..=21).contains(&sent), "sent {sent} cursor updates");
    assert_eq!(received, sent);
}

#[tokio::test(start_paused = true)]
async fn final_drag_position_is_never_throttled() {
    let surface = Surface::new();
    let [(a, _), (_b, mut b_events)] = connected_pair(&surface).await;
    let shape = ObjectId::from("shape");

    assert!(a.drag_started(shape.clone()).await.unwrap());
    assert!(!a.drag_started(shape.clone()).await.unwrap());
    assert!(a.drag_moved(shape.clone(), 1.0, 1.0).await.unwrap());
    assert!(!a.drag_moved(shape.clone(), 2.0, 2.0).await.unwrap());
    a.drag_ended(shape.clone(), 9.0, 9.0).await.unwrap();

    let received = drain(&mut b_events).await;
    assert_eq!(
        received,
        vec![
            MeshEvent::DragStarted {
                participant: "a1".into(),
                object_id: shape.clone(),
            },
            MeshEvent::Dragged {
                participant: "a1".into(),
                object_id: shape.clone(),
                x: 1.0,
                y: 1.0,
            },
            MeshEvent::DragEnded {
                participant: "a1".into(),
                object_id: shape,
                x: 9.0,
                y: 9.0,
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn transport_failure_disconnects_exactly_once() {
    let surface = Surface::new();
    let [(a, mut a_events), (_b, mut b_events)] = connected_pair(&surface).await;

    assert!(surface.network.fail(&"a1".into(), &"b2".into()));

    let gone: Vec<_> = drain(&mut a_events)
        .await
        .into_iter()
        .filter(|event| matches!(event, MeshEvent::PeerDisconnected(_)))
        .collect();
    assert_eq!(gone, vec![MeshEvent::PeerDisconnected("b2".into())]);
    wait_for(&mut b_events, |event| {
        *event == MeshEvent::PeerDisconnected("a1".into())
    })
    .await;

    assert!(a.peers().await.unwrap().is_empty());
    // Nobody to send to, but nothing breaks either.
    assert!(a.pointer_moved(5.0, 5.0).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn late_joiner_connects_to_everyone() {
    let surface = Surface::new();
    let [(a, _), (b, _)] = connected_pair(&surface).await;
    let (c, mut c_events) = surface.join("c3").await;

    let mut connected = vec![];
    for _ in 0..2 {
        let event = wait_for(&mut c_events, |event| {
            matches!(event, MeshEvent::PeerConnected(_))
        })
        .await;
        connected.push(event.participant().clone());
    }
    connected.sort();
    assert_eq!(connected, vec![ParticipantId::from("a1"), ParticipantId::from("b2")]);

    assert_eq!(a.peers().await.unwrap().len(), 2);
    assert_eq!(b.peers().await.unwrap().len(), 2);
    assert_eq!(c.peers().await.unwrap().len(), 2);
}
