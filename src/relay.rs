// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The negotiation relay: a shared log of [`RelayRecord`]s that participants use to exchange
//! offers, answers and candidates before they can talk directly.
//!
//! Delivery is at-least-once. Subscribers get batches that may repeat records they have already
//! seen, and records stay in the log until somebody deletes them or they age out.

use crate::messages::{unix_millis, RelayRecord};
use crate::types::{EnvelopeId, ParticipantId, SurfaceId};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub type RecordBatches = mpsc::UnboundedReceiver<Vec<RelayRecord>>;

#[async_trait]
pub trait Relay: Send + Sync {
    async fn publish(&self, record: RelayRecord) -> Result<()>;
    async fn delete(&self, ids: &[EnvelopeId]) -> Result<()>;
    /// Streams batches of records addressed to `participant` on `surface`. Whatever is pending
    /// at the time of subscribing is delivered right away.
    async fn subscribe(
        &self,
        surface_id: &SurfaceId,
        participant: &ParticipantId,
    ) -> Result<RecordBatches>;
}

struct Subscriber {
    surface_id: SurfaceId,
    participant: ParticipantId,
    batches_tx: mpsc::UnboundedSender<Vec<RelayRecord>>,
}

#[derive(Default)]
struct RelayLog {
    records: Vec<RelayRecord>,
    subscribers: Vec<Subscriber>,
}

impl RelayLog {
    fn pending_for(&self, surface_id: &SurfaceId, participant: &ParticipantId) -> Vec<RelayRecord> {
        self.records
            .iter()
            .filter(|record| {
                &record.surface_id == surface_id && &record.to_participant == participant
            })
            .cloned()
            .collect()
    }

    /// Hands everything still pending for `participant` to its subscribers, as one batch.
    fn notify(&mut self, surface_id: &SurfaceId, participant: &ParticipantId) {
        let batch = self.pending_for(surface_id, participant);
        if batch.is_empty() {
            return;
        }
        self.subscribers.retain(|subscriber| {
            if &subscriber.surface_id != surface_id || &subscriber.participant != participant {
                return !subscriber.batches_tx.is_closed();
            }
            subscriber.batches_tx.send(batch.clone()).is_ok()
        });
    }
}

/// A relay that lives in the process. Cloning it gives another handle to the same log.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    log: Arc<Mutex<RelayLog>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.log.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn pending_for(
        &self,
        surface_id: &SurfaceId,
        participant: &ParticipantId,
    ) -> Vec<RelayRecord> {
        self.log.lock().await.pending_for(surface_id, participant)
    }

    /// Drops records older than `max_age`. Returns how many went away.
    pub async fn sweep(&self, max_age: Duration) -> usize {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .map_or(0, unix_millis);
        let mut log = self.log.lock().await;
        let before = log.records.len();
        log.records.retain(|record| record.created_at >= cutoff);
        before - log.records.len()
    }

    /// Periodically sweeps stale records until the returned task is aborted.
    pub fn spawn_sweeper(&self, interval: Duration, max_age: Duration) -> JoinHandle<()> {
        let relay = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let swept = relay.sweep(max_age).await;
                if swept > 0 {
                    info!("Swept {swept} stale relay records");
                }
            }
        })
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn publish(&self, record: RelayRecord) -> Result<()> {
        debug!(
            "Relaying {:?} from {} to {}",
            record.kind, record.from_participant, record.to_participant
        );
        let surface_id = record.surface_id.clone();
        let participant = record.to_participant.clone();
        let mut log = self.log.lock().await;
        log.records.push(record);
        log.notify(&surface_id, &participant);
        Ok(())
    }

    async fn delete(&self, ids: &[EnvelopeId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut log = self.log.lock().await;
        log.records.retain(|record| !ids.contains(&record.id));
        Ok(())
    }

    async fn subscribe(
        &self,
        surface_id: &SurfaceId,
        participant: &ParticipantId,
    ) -> Result<RecordBatches> {
        let (batches_tx, batches_rx) = mpsc::unbounded_channel();
        let mut log = self.log.lock().await;
        let pending = log.pending_for(surface_id, participant);
        if !pending.is_empty() {
            // The receiver is right here, so this can't fail.
            let _ = batches_tx.send(pending);
        }
        log.subscribers.push(Subscriber {
            surface_id: surface_id.clone(),
            participant: participant.clone(),
            batches_tx,
        });
        Ok(batches_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Candidate, SessionDescription, Signal};
    use pretty_assertions::assert_eq;

    fn record(to: &str, signal: &Signal) -> RelayRecord {
        RelayRecord::new("s".into(), "a".into(), to.into(), signal).unwrap()
    }

    fn open() -> Signal {
        Signal::Open(SessionDescription::new("offer"))
    }

    #[tokio::test]
    async fn pending_records_arrive_on_subscribe() {
        let relay = MemoryRelay::new();
        let first = record("b", &open());
        relay.publish(first.clone()).await.unwrap();
        relay.publish(record("c", &open())).await.unwrap();

        let mut batches = relay.subscribe(&"s".into(), &"b".into()).await.unwrap();
        assert_eq!(batches.try_recv().unwrap(), vec![first]);
        assert!(batches.try_recv().is_err());
    }

    #[tokio::test]
    async fn publishing_redelivers_undeleted_records() {
        let relay = MemoryRelay::new();
        let mut batches = relay.subscribe(&"s".into(), &"b".into()).await.unwrap();
        let first = record("b", &open());
        let second = record("b", &Signal::Candidate(Candidate::new("c")));

        relay.publish(first.clone()).await.unwrap();
        relay.publish(second.clone()).await.unwrap();
        assert_eq!(batches.try_recv().unwrap(), vec![first.clone()]);
        assert_eq!(batches.try_recv().unwrap(), vec![first.clone(), second.clone()]);

        relay.delete(&[first.id]).await.unwrap();
        assert_eq!(relay.pending_for(&"s".into(), &"b".into()).await, vec![second]);
    }

    #[tokio::test]
    async fn other_surfaces_are_not_delivered() {
        let relay = MemoryRelay::new();
        let mut batches = relay.subscribe(&"other".into(), &"b".into()).await.unwrap();
        relay.publish(record("b", &open())).await.unwrap();
        assert!(batches.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_subscribers_are_forgotten() {
        let relay = MemoryRelay::new();
        let batches = relay.subscribe(&"s".into(), &"b".into()).await.unwrap();
        drop(batches);
        relay.publish(record("b", &open())).await.unwrap();
        assert!(relay.log.lock().await.subscribers.is_empty());
    }

    #[tokio::test]
    async fn sweep_removes_only_stale_records() {
        let relay = MemoryRelay::new();
        let mut stale = record("b", &open());
        stale.created_at = 0;
        relay.publish(stale).await.unwrap();
        relay.publish(record("b", &open())).await.unwrap();

        assert_eq!(relay.sweep(Duration::from_secs(60)).await, 1);
        assert_eq!(relay.len().await, 1);
    }
}
