// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! A [`PeerLink`] owns the direct transport to exactly one remote participant.
//!
//! The link is split in two: the handle, which the mesh keeps in its map and uses to feed
//! negotiation signals and to send application messages, and the [`LinkActor`] task, which owns
//! the transport and drives the negotiation. Incoming signals are queued and applied strictly one
//! after another, and each one's asynchronous steps are awaited before the next is looked at.

use crate::error::LinkError;
use crate::messages::{AppMessage, Candidate, Signal};
use crate::transport::{DataChannel, Transport, TransportEvent, TransportParts};
use crate::types::{LinkState, ParticipantId, Role};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, Instrument};

/// Distinguishes successive links to the same participant, so that reports from a link that has
/// already been replaced can be told apart.
pub type LinkId = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct LinkEvent {
    pub link_id: LinkId,
    pub remote_id: ParticipantId,
    pub kind: LinkEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEventKind {
    /// A negotiation signal that has to reach the remote side through the relay.
    Signal(Signal),
    Connected,
    /// An application message, already attributed to the remote participant.
    Message(AppMessage),
    /// The link went away on its own. Sent at most once, never after an explicit destroy.
    Closed(LinkError),
}

type LinkEventSender = mpsc::UnboundedSender<LinkEvent>;

pub struct PeerLink {
    id: LinkId,
    remote_id: ParticipantId,
    role: Role,
    inbound_tx: mpsc::UnboundedSender<Signal>,
    channel: Arc<dyn DataChannel>,
    state_rx: watch::Receiver<LinkState>,
    cancel: CancellationToken,
    destroyed: bool,
}

impl PeerLink {
    /// Starts the link's task. Must be called from within a Tokio runtime.
    pub fn spawn(
        id: LinkId,
        remote_id: ParticipantId,
        role: Role,
        parts: TransportParts,
        keepalive_interval: Duration,
        events_tx: LinkEventSender,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LinkState::New);
        let cancel = CancellationToken::new();

        let actor = LinkActor {
            link_id: id,
            remote_id: remote_id.clone(),
            role,
            transport: parts.transport,
            channel: parts.channel.clone(),
            transport_events: parts.events,
            inbound_rx,
            pending_candidates: Vec::new(),
            remote_description_set: false,
            state_tx,
            events_tx,
            keepalive_interval,
            keepalive: None,
        };
        // Spawned from the session task, so this nests under its span.
        let span = info_span!("link", remote = %remote_id, id);
        tokio::spawn(actor.run(cancel.clone()).instrument(span));

        Self {
            id,
            remote_id,
            role,
            inbound_tx,
            channel: parts.channel,
            state_rx,
            cancel,
            destroyed: false,
        }
    }

    pub const fn id(&self) -> LinkId {
        self.id
    }

    pub const fn remote_id(&self) -> &ParticipantId {
        &self.remote_id
    }

    pub const fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> LinkState {
        if self.destroyed {
            LinkState::Closed
        } else {
            *self.state_rx.borrow()
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Appends a signal to the inbound queue.
    pub fn enqueue(&self, signal: Signal) {
        if self.destroyed {
            return;
        }
        // If the task is gone, the link is closing anyway.
        let _ = self.inbound_tx.send(signal);
    }

    /// Sends an application message if the link is connected. Returns whether it went out.
    pub fn send(&self, message: &AppMessage) -> bool {
        if !self.is_connected() {
            trace!("No route to {}, dropping message", self.remote_id);
            return false;
        }
        match message.encode() {
            Ok(payload) => match self.channel.send(&payload) {
                Ok(()) => true,
                Err(err) => {
                    debug!("Failed to send to {}: {err:#}", self.remote_id);
                    false
                }
            },
            Err(err) => {
                debug!("{err:#}");
                false
            }
        }
    }

    /// Tears the link down. Calling this more than once is fine.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.cancel.cancel();
    }
}

impl Drop for PeerLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Drives the negotiation of one link and pumps its transport events.
struct LinkActor {
    link_id: LinkId,
    remote_id: ParticipantId,
    role: Role,
    transport: Box<dyn Transport>,
    channel: Arc<dyn DataChannel>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    inbound_rx: mpsc::UnboundedReceiver<Signal>,
    /// Candidates that arrived before the remote description. Flushed in arrival order as soon
    /// as the description is applied.
    pending_candidates: Vec<Candidate>,
    remote_description_set: bool,
    state_tx: watch::Sender<LinkState>,
    events_tx: LinkEventSender,
    keepalive_interval: Duration,
    keepalive: Option<Interval>,
}

impl LinkActor {
    async fn run(mut self, cancel: CancellationToken) {
        let result = tokio::select! {
            () = cancel.cancelled() => Ok(()),
            result = self.drive() => result,
        };

        self.keepalive = None;
        self.pending_candidates.clear();
        self.transport.close();
        self.state_tx.send_replace(LinkState::Closed);

        match result {
            Ok(()) => debug!("Link to {} torn down", self.remote_id),
            Err(err) => {
                info!("Link to {} closed: {err}", self.remote_id);
                self.emit(LinkEventKind::Closed(err));
            }
        }
    }

    async fn drive(&mut self) -> Result<(), LinkError> {
        if self.role == Role::Initiator {
            self.start_as_initiator().await?;
        }

        loop {
            tokio::select! {
                signal = self.inbound_rx.recv() => match signal {
                    Some(signal) => self.apply_signal(signal).await?,
                    // Our handle is gone.
                    None => return Ok(()),
                },
                event = self.transport_events.recv() => match event {
                    Some(event) => self.handle_transport_event(event)?,
                    None => return Err(LinkError::TransportClosed),
                },
                () = next_tick(&mut self.keepalive) => {
                    self.send_direct(&AppMessage::KeepalivePing);
                }
            }
        }
    }

    async fn start_as_initiator(&mut self) -> Result<(), LinkError> {
        self.transport
            .open_channel()
            .map_err(|err| LinkError::negotiation(&err))?;
        let offer = self
            .transport
            .create_offer()
            .await
            .map_err(|err| LinkError::negotiation(&err))?;
        self.set_state(LinkState::Negotiating(Role::Initiator));
        self.emit(LinkEventKind::Signal(Signal::Open(offer)));
        Ok(())
    }

    async fn apply_signal(&mut self, signal: Signal) -> Result<(), LinkError> {
        match signal {
            Signal::Open(offer) => {
                if self.role == Role::Initiator || self.remote_description_set {
                    debug!(
                        "Ignoring unexpected open from {} (we are {})",
                        self.remote_id, self.role
                    );
                    return Ok(());
                }
                self.transport
                    .set_remote_description(offer)
                    .await
                    .map_err(|err| LinkError::negotiation(&err))?;
                self.remote_description_set = true;
                self.flush_pending_candidates().await;

                let answer = self
                    .transport
                    .create_answer()
                    .await
                    .map_err(|err| LinkError::negotiation(&err))?;
                self.set_state(LinkState::Negotiating(Role::Responder));
                self.emit(LinkEventKind::Signal(Signal::Accept(answer)));
            }
            Signal::Accept(answer) => {
                if self.role == Role::Responder || self.remote_description_set {
                    debug!(
                        "Ignoring unexpected accept from {} (we are {})",
                        self.remote_id, self.role
                    );
                    return Ok(());
                }
                self.transport
                    .set_remote_description(answer)
                    .await
                    .map_err(|err| LinkError::negotiation(&err))?;
                self.remote_description_set = true;
                self.flush_pending_candidates().await;
            }
            Signal::Candidate(candidate) => {
                if self.remote_description_set {
                    self.add_candidate(candidate).await;
                } else {
                    trace!("Buffering candidate from {}", self.remote_id);
                    self.pending_candidates.push(candidate);
                }
            }
        }
        Ok(())
    }

    async fn flush_pending_candidates(&mut self) {
        let pending = std::mem::take(&mut self.pending_candidates);
        if !pending.is_empty() {
            debug!(
                "Applying {} buffered candidates from {}",
                pending.len(),
                self.remote_id
            );
        }
        for candidate in pending {
            self.add_candidate(candidate).await;
        }
    }

    async fn add_candidate(&mut self, candidate: Candidate) {
        if let Err(err) = self.transport.add_candidate(candidate).await {
            debug!("Skipping candidate from {}: {err:#}", self.remote_id);
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) -> Result<(), LinkError> {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                self.emit(LinkEventKind::Signal(Signal::Candidate(candidate)));
            }
            TransportEvent::ChannelOpen => {
                if *self.state_tx.borrow() == LinkState::Connected {
                    return Ok(());
                }
                info!("Connected to {}", self.remote_id);
                self.set_state(LinkState::Connected);
                self.start_keepalive();
                self.emit(LinkEventKind::Connected);
            }
            TransportEvent::Message(payload) => self.receive_message(&payload),
            TransportEvent::Failed(reason) => return Err(LinkError::TransportFailed(reason)),
            TransportEvent::Closed => return Err(LinkError::TransportClosed),
        }
        Ok(())
    }

    fn receive_message(&mut self, payload: &str) {
        let message = match AppMessage::decode(payload) {
            Ok(message) => message,
            Err(err) => {
                debug!("Dropping message from {}: {err:#}", self.remote_id);
                return;
            }
        };
        match message {
            AppMessage::KeepalivePing => self.send_direct(&AppMessage::KeepalivePong),
            AppMessage::KeepalivePong => trace!("Keepalive answered by {}", self.remote_id),
            message => {
                let message = message.with_sender(&self.remote_id);
                self.emit(LinkEventKind::Message(message));
            }
        }
    }

    fn start_keepalive(&mut self) {
        let mut keepalive = interval_at(
            Instant::now() + self.keepalive_interval,
            self.keepalive_interval,
        );
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.keepalive = Some(keepalive);
    }

    fn send_direct(&self, message: &AppMessage) {
        let result = message
            .encode()
            .and_then(|payload| self.channel.send(&payload));
        if let Err(err) = result {
            debug!("Failed to send keepalive to {}: {err:#}", self.remote_id);
        }
    }

    fn set_state(&self, state: LinkState) {
        self.state_tx.send_replace(state);
    }

    fn emit(&self, kind: LinkEventKind) {
        let _ = self.events_tx.send(LinkEvent {
            link_id: self.link_id,
            remote_id: self.remote_id.clone(),
            kind,
        });
    }
}

async fn next_tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(keepalive) => {
            keepalive.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::SessionDescription;
    use anyhow::{bail, Result};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use tokio::time::sleep;

    const KEEPALIVE: Duration = Duration::from_secs(5);

    /// Records every call in order. Applying a remote description takes a while, and candidates
    /// are rejected until one was applied, like a real peer connection does.
    struct ScriptedTransport {
        calls: Arc<Mutex<Vec<String>>>,
        remote_description_set: bool,
        description_delay: Duration,
        fail_answer: bool,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn open_channel(&mut self) -> Result<()> {
            self.calls.lock().unwrap().push("open_channel".into());
            Ok(())
        }

        async fn create_offer(&mut self) -> Result<SessionDescription> {
            self.calls.lock().unwrap().push("create_offer".into());
            Ok(SessionDescription::new("offer"))
        }

        async fn create_answer(&mut self) -> Result<SessionDescription> {
            self.calls.lock().unwrap().push("create_answer".into());
            if self.fail_answer {
                bail!("no codecs in common");
            }
            Ok(SessionDescription::new("answer"))
        }

        async fn set_remote_description(&mut self, description: SessionDescription) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("remote:{}:start", description.sdp));
            sleep(self.description_delay).await;
            self.remote_description_set = true;
            self.calls
                .lock()
                .unwrap()
                .push(format!("remote:{}:end", description.sdp));
            Ok(())
        }

        async fn add_candidate(&mut self, candidate: Candidate) -> Result<()> {
            if !self.remote_description_set {
                bail!("remote description not set");
            }
            self.calls
                .lock()
                .unwrap()
                .push(format!("candidate:{}", candidate.candidate));
            Ok(())
        }

        fn close(&mut self) {
            self.calls.lock().unwrap().push("close".into());
        }
    }

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<String>>,
    }

    impl DataChannel for RecordingChannel {
        fn send(&self, payload: &str) -> Result<()> {
            self.sent.lock().unwrap().push(payload.to_string());
            Ok(())
        }
    }

    impl RecordingChannel {
        fn sent(&self) -> Vec<AppMessage> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|payload| AppMessage::decode(payload).unwrap())
                .collect()
        }
    }

    struct Harness {
        link: PeerLink,
        calls: Arc<Mutex<Vec<String>>>,
        channel: Arc<RecordingChannel>,
        transport_tx: mpsc::UnboundedSender<TransportEvent>,
        events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    }

    impl Harness {
        fn new(role: Role) -> Self {
            Self::with_transport(role, Duration::from_millis(100), false)
        }

        fn with_transport(role: Role, description_delay: Duration, fail_answer: bool) -> Self {
            let calls = Arc::new(Mutex::new(vec![]));
            let channel = Arc::new(RecordingChannel::default());
            let (transport_tx, transport_rx) = mpsc::unbounded_channel();
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let parts = TransportParts {
                transport: Box::new(ScriptedTransport {
                    calls: calls.clone(),
                    remote_description_set: false,
                    description_delay,
                    fail_answer,
                }),
                channel: channel.clone(),
                events: transport_rx,
            };
            let link = PeerLink::spawn(7, "remote".into(), role, parts, KEEPALIVE, events_tx);
            Self {
                link,
                calls,
                channel,
                transport_tx,
                events_rx,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        async fn next_event(&mut self) -> LinkEventKind {
            let event = self.events_rx.recv().await.expect("link events closed");
            assert_eq!(event.link_id, 7);
            assert_eq!(event.remote_id.as_str(), "remote");
            event.kind
        }

        async fn settle(&self) {
            sleep(Duration::from_secs(1)).await;
        }

        async fn connect(&mut self) {
            self.transport_tx.send(TransportEvent::ChannelOpen).unwrap();
            assert_eq!(self.next_event().await, LinkEventKind::Connected);
        }
    }

    fn candidate(name: &str) -> Signal {
        Signal::Candidate(Candidate::new(name))
    }

    #[tokio::test(start_paused = true)]
    async fn initiator_opens_channel_and_offers() {
        let mut harness = Harness::new(Role::Initiator);

        assert_eq!(
            harness.next_event().await,
            LinkEventKind::Signal(Signal::Open(SessionDescription::new("offer")))
        );
        assert_eq!(harness.calls(), vec!["open_channel", "create_offer"]);
        assert_eq!(
            harness.link.state(),
            LinkState::Negotiating(Role::Initiator)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn responder_waits_for_open() {
        let mut harness = Harness::new(Role::Responder);
        harness.settle().await;
        assert!(harness.calls().is_empty());
        assert_eq!(harness.link.state(), LinkState::New);

        harness.link.enqueue(Signal::Open(SessionDescription::new("offer")));
        assert_eq!(
            harness.next_event().await,
            LinkEventKind::Signal(Signal::Accept(SessionDescription::new("answer")))
        );
        assert_eq!(
            harness.link.state(),
            LinkState::Negotiating(Role::Responder)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn early_candidates_flush_in_order_after_description() {
        let harness = Harness::new(Role::Responder);
        harness.link.enqueue(candidate("c1"));
        harness.link.enqueue(candidate("c2"));
        harness.link.enqueue(candidate("c3"));
        harness.link.enqueue(Signal::Open(SessionDescription::new("offer")));
        harness.settle().await;

        assert_eq!(
            harness.calls(),
            vec![
                "remote:offer:start",
                "remote:offer:end",
                "candidate:c1",
                "candidate:c2",
                "candidate:c3",
                "create_answer",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn batch_is_applied_strictly_in_sequence() {
        let harness = Harness::new(Role::Responder);
        // Delivered together, in one wake-up.
        harness.link.enqueue(Signal::Open(SessionDescription::new("offer")));
        harness.link.enqueue(candidate("c1"));
        harness.link.enqueue(candidate("c2"));
        harness.link.enqueue(candidate("c3"));
        harness.settle().await;

        assert_eq!(
            harness.calls(),
            vec![
                "remote:offer:start",
                "remote:offer:end",
                "create_answer",
                "candidate:c1",
                "candidate:c2",
                "candidate:c3",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn initiator_flushes_candidates_after_accept() {
        let mut harness = Harness::new(Role::Initiator);
        assert_matches!(harness.next_event().await, LinkEventKind::Signal(Signal::Open(_)));

        harness.link.enqueue(candidate("c1"));
        harness.link.enqueue(Signal::Accept(SessionDescription::new("answer")));
        harness.link.enqueue(candidate("c2"));
        harness.settle().await;

        assert_eq!(
            harness.calls(),
            vec![
                "open_channel",
                "create_offer",
                "remote:answer:start",
                "remote:answer:end",
                "candidate:c1",
                "candidate:c2",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_descriptions_are_ignored() {
        let mut harness = Harness::new(Role::Initiator);
        assert_matches!(harness.next_event().await, LinkEventKind::Signal(Signal::Open(_)));

        // An initiator never answers an offer.
        harness.link.enqueue(Signal::Open(SessionDescription::new("glare")));
        harness.link.enqueue(Signal::Accept(SessionDescription::new("answer")));
        // Redelivered accept.
        harness.link.enqueue(Signal::Accept(SessionDescription::new("answer")));
        harness.settle().await;

        assert_eq!(
            harness.calls(),
            vec![
                "open_channel",
                "create_offer",
                "remote:answer:start",
                "remote:answer:end",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn local_candidates_are_forwarded_immediately() {
        let mut harness = Harness::new(Role::Responder);
        harness
            .transport_tx
            .send(TransportEvent::LocalCandidate(Candidate::new("mine")))
            .unwrap();
        assert_eq!(harness.next_event().await, LinkEventKind::Signal(candidate("mine")));
    }

    #[tokio::test(start_paused = true)]
    async fn messages_only_flow_when_connected() {
        let mut harness = Harness::new(Role::Responder);
        let ping = AppMessage::Cursor {
            participant: "me".into(),
            x: 1.0,
            y: 2.0,
        };
        assert!(!harness.link.send(&ping));

        harness.connect().await;
        assert!(harness.link.is_connected());
        assert!(harness.link.send(&ping));
        assert_eq!(harness.channel.sent(), vec![ping]);
    }

    #[tokio::test(start_paused = true)]
    async fn sender_identity_comes_from_the_link() {
        let mut harness = Harness::new(Role::Responder);
        harness.connect().await;

        harness
            .transport_tx
            .send(TransportEvent::Message(
                r#"{"type":"cursor","participant":"mallory","x":3,"y":4}"#.into(),
            ))
            .unwrap();
        assert_eq!(
            harness.next_event().await,
            LinkEventKind::Message(AppMessage::Cursor {
                participant: "remote".into(),
                x: 3.0,
                y: 4.0,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn keepalives_are_answered_and_swallowed() {
        let mut harness = Harness::new(Role::Responder);
        harness.connect().await;

        harness
            .transport_tx
            .send(TransportEvent::Message(r#"{"type":"keepalive-ping"}"#.into()))
            .unwrap();
        harness
            .transport_tx
            .send(TransportEvent::Message(r#"{"type":"keepalive-pong"}"#.into()))
            .unwrap();
        harness
            .transport_tx
            .send(TransportEvent::Message("garbage".into()))
            .unwrap();
        harness.settle().await;

        assert_eq!(harness.channel.sent(), vec![AppMessage::KeepalivePong]);
        assert!(harness.events_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_pings_periodically() {
        let mut harness = Harness::new(Role::Responder);
        harness.connect().await;

        sleep(KEEPALIVE * 2 + Duration::from_millis(10)).await;
        assert_eq!(
            harness.channel.sent(),
            vec![AppMessage::KeepalivePing, AppMessage::KeepalivePing]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_closes_once() {
        let mut harness = Harness::new(Role::Responder);
        harness.connect().await;

        harness
            .transport_tx
            .send(TransportEvent::Failed("ice failed".into()))
            .unwrap();
        harness.transport_tx.send(TransportEvent::Closed).ok();

        assert_eq!(
            harness.next_event().await,
            LinkEventKind::Closed(LinkError::TransportFailed("ice failed".into()))
        );
        harness.settle().await;
        assert_eq!(harness.link.state(), LinkState::Closed);
        assert!(harness.calls().contains(&"close".to_string()));
        // The task is gone, so the event channel is closed without further events.
        assert!(harness.events_rx.recv().await.is_none());
        assert!(!harness.link.send(&AppMessage::KeepalivePing));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_answer_is_a_negotiation_error() {
        let mut harness = Harness::with_transport(Role::Responder, Duration::ZERO, true);
        harness.link.enqueue(Signal::Open(SessionDescription::new("offer")));
        assert_matches!(
            harness.next_event().await,
            LinkEventKind::Closed(LinkError::Negotiation(reason)) if reason.contains("no codecs")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_is_silent_and_idempotent() {
        let mut harness = Harness::new(Role::Responder);
        harness.connect().await;

        harness.link.destroy();
        harness.link.destroy();
        harness.link.enqueue(Signal::Open(SessionDescription::new("late")));
        harness.settle().await;

        assert_eq!(harness.link.state(), LinkState::Closed);
        assert!(!harness.link.send(&AppMessage::KeepalivePing));
        assert_eq!(harness.calls(), vec!["close"]);
        assert!(harness.events_rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_interrupts_pending_negotiation() {
        let mut harness =
            Harness::with_transport(Role::Responder, Duration::from_secs(60), false);
        harness.link.enqueue(Signal::Open(SessionDescription::new("offer")));
        sleep(Duration::from_millis(10)).await;

        harness.link.destroy();
        harness.settle().await;

        assert_eq!(harness.calls(), vec!["remote:offer:start", "close"]);
        assert!(harness.events_rx.recv().await.is_none());
    }
}
