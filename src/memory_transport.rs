// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! An in-process stand-in for real peer connections. Two endpoints of the same pair become
//! connected once both have exchanged descriptions and at least one candidate, which is enough
//! to exercise the whole negotiation path without any networking.

use crate::messages::{Candidate, SessionDescription};
use crate::transport::{DataChannel, Transport, TransportEvent, TransportFactory, TransportParts};
use crate::types::{ParticipantId, Role};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

const LOCAL_CANDIDATES: u16 = 2;

type EndpointKey = (ParticipantId, ParticipantId);

struct Endpoint {
    generation: u64,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    has_local_description: bool,
    has_remote_description: bool,
    remote_candidates: usize,
    open: bool,
}

impl Endpoint {
    const fn ready(&self) -> bool {
        self.has_local_description && self.has_remote_description && self.remote_candidates > 0
    }
}

#[derive(Default)]
struct NetworkState {
    endpoints: HashMap<EndpointKey, Endpoint>,
    next_generation: u64,
}

/// Shared broker that pairs up the endpoints of all participants in the process.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().expect("Memory network lock poisoned")
    }

    fn register(
        &self,
        local: &ParticipantId,
        remote: &ParticipantId,
        events_tx: mpsc::UnboundedSender<TransportEvent>,
    ) -> u64 {
        let mut state = self.lock();
        state.next_generation += 1;
        let generation = state.next_generation;
        state.endpoints.insert(
            (local.clone(), remote.clone()),
            Endpoint {
                generation,
                events_tx,
                has_local_description: false,
                has_remote_description: false,
                remote_candidates: 0,
                open: false,
            },
        );
        generation
    }

    /// Applies `update` to the endpoint if it is still the one with the given generation, then
    /// opens the channel if both sides of the pair are ready.
    fn update(
        &self,
        local: &ParticipantId,
        remote: &ParticipantId,
        generation: u64,
        update: impl FnOnce(&mut Endpoint),
    ) -> Result<()> {
        let mut state = self.lock();
        let key = (local.clone(), remote.clone());
        match state.endpoints.get_mut(&key) {
            Some(endpoint) if endpoint.generation == generation => update(endpoint),
            _ => bail!("Transport from {local} to {remote} is gone"),
        }

        let peer_key = (remote.clone(), local.clone());
        let both_ready = [&key, &peer_key].iter().all(|key| {
            state
                .endpoints
                .get(*key)
                .is_some_and(|endpoint| endpoint.ready() && !endpoint.open)
        });
        if both_ready {
            debug!("Memory channel between {local} and {remote} is open");
            for key in [&key, &peer_key] {
                if let Some(endpoint) = state.endpoints.get_mut(key) {
                    endpoint.open = true;
                    let _ = endpoint.events_tx.send(TransportEvent::ChannelOpen);
                }
            }
        }
        Ok(())
    }

    fn deliver(
        &self,
        local: &ParticipantId,
        remote: &ParticipantId,
        generation: u64,
        payload: &str,
    ) -> Result<()> {
        let state = self.lock();
        let own_open = state
            .endpoints
            .get(&(local.clone(), remote.clone()))
            .is_some_and(|endpoint| endpoint.generation == generation && endpoint.open);
        let peer = state
            .endpoints
            .get(&(remote.clone(), local.clone()))
            .filter(|endpoint| endpoint.open);
        match peer {
            Some(peer) if own_open => {
                peer.events_tx
                    .send(TransportEvent::Message(payload.to_string()))
                    .map_err(|_| anyhow::anyhow!("{remote} stopped listening"))?;
                Ok(())
            }
            _ => bail!("Channel from {local} to {remote} is not open"),
        }
    }

    fn remove(&self, local: &ParticipantId, remote: &ParticipantId, generation: u64) {
        let mut state = self.lock();
        let key = (local.clone(), remote.clone());
        if !state
            .endpoints
            .get(&key)
            .is_some_and(|endpoint| endpoint.generation == generation)
        {
            return;
        }
        let Some(endpoint) = state.endpoints.remove(&key) else {
            return;
        };
        if endpoint.open {
            if let Some(peer) = state.endpoints.get_mut(&(remote.clone(), local.clone())) {
                if peer.open {
                    peer.open = false;
                    let _ = peer.events_tx.send(TransportEvent::Closed);
                }
            }
        }
    }

    /// Makes the transport that `local` holds towards `remote` report a failure. Returns whether
    /// such a transport existed.
    pub fn fail(&self, local: &ParticipantId, remote: &ParticipantId) -> bool {
        let state = self.lock();
        state
            .endpoints
            .get(&(local.clone(), remote.clone()))
            .is_some_and(|endpoint| {
                endpoint
                    .events_tx
                    .send(TransportEvent::Failed("injected failure".to_string()))
                    .is_ok()
            })
    }

    pub fn is_open(&self, local: &ParticipantId, remote: &ParticipantId) -> bool {
        self.lock()
            .endpoints
            .get(&(local.clone(), remote.clone()))
            .is_some_and(|endpoint| endpoint.open)
    }

    pub fn endpoint_count(&self) -> usize {
        self.lock().endpoints.len()
    }
}

pub struct MemoryTransport {
    network: MemoryNetwork,
    local: ParticipantId,
    remote: ParticipantId,
    generation: u64,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    channel_requested: bool,
    closed: bool,
}

impl MemoryTransport {
    fn describe(&mut self, what: &str) -> Result<SessionDescription> {
        self.network
            .update(&self.local, &self.remote, self.generation, |endpoint| {
                endpoint.has_local_description = true;
            })?;
        for n in 0..LOCAL_CANDIDATES {
            let candidate = Candidate::new(format!(
                "candidate:{n} 1 udp 2130706431 127.0.0.1 {} typ host",
                40000 + self.generation * 10 + u64::from(n)
            ));
            let _ = self.events_tx.send(TransportEvent::LocalCandidate(candidate));
        }
        Ok(SessionDescription::new(format!(
            "v=0 {what} {} -> {}",
            self.local, self.remote
        )))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn open_channel(&mut self) -> Result<()> {
        if self.closed {
            bail!("Transport is closed");
        }
        self.channel_requested = true;
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<SessionDescription> {
        if !self.channel_requested {
            bail!("Nothing to offer without a channel");
        }
        self.describe("offer")
    }

    async fn create_answer(&mut self) -> Result<SessionDescription> {
        self.describe("answer")
    }

    async fn set_remote_description(&mut self, description: SessionDescription) -> Result<()> {
        if description.sdp.is_empty() {
            bail!("Empty session description");
        }
        self.network
            .update(&self.local, &self.remote, self.generation, |endpoint| {
                endpoint.has_remote_description = true;
            })
    }

    async fn add_candidate(&mut self, candidate: Candidate) -> Result<()> {
        let mut result = Ok(());
        self.network
            .update(&self.local, &self.remote, self.generation, |endpoint| {
                if endpoint.has_remote_description {
                    endpoint.remote_candidates += 1;
                } else {
                    result = Err(anyhow::anyhow!(
                        "Candidate '{}' arrived before the remote description",
                        candidate.candidate
                    ));
                }
            })?;
        result
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.network.remove(&self.local, &self.remote, self.generation);
    }
}

struct MemoryChannel {
    network: MemoryNetwork,
    local: ParticipantId,
    remote: ParticipantId,
    generation: u64,
}

impl DataChannel for MemoryChannel {
    fn send(&self, payload: &str) -> Result<()> {
        self.network
            .deliver(&self.local, &self.remote, self.generation, payload)
    }
}

pub struct MemoryTransportFactory {
    network: MemoryNetwork,
}

impl MemoryTransportFactory {
    pub const fn new(network: MemoryNetwork) -> Self {
        Self { network }
    }
}

impl TransportFactory for MemoryTransportFactory {
    fn create(
        &self,
        local: &ParticipantId,
        remote: &ParticipantId,
        role: Role,
    ) -> Result<TransportParts> {
        if local == remote {
            bail!("Refusing to connect {local} to itself");
        }
        let (events_tx, events) = mpsc::unbounded_channel();
        let generation = self.network.register(local, remote, events_tx.clone());
        debug!("Created memory transport from {local} to {remote} as {role}");

        let transport = MemoryTransport {
            network: self.network.clone(),
            local: local.clone(),
            remote: remote.clone(),
            generation,
            events_tx,
            channel_requested: false,
            closed: false,
        };
        let channel = MemoryChannel {
            network: self.network.clone(),
            local: local.clone(),
            remote: remote.clone(),
            generation,
        };
        Ok(TransportParts {
            transport: Box::new(transport),
            channel: Arc::new(channel),
            events,
        })
    }
}
