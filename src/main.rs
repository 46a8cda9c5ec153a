// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::future::join_all;
use peermesh::config::MeshConfig;
use peermesh::logging;
use peermesh::memory_transport::{MemoryNetwork, MemoryTransportFactory};
use peermesh::presence::PresenceBoard;
use peermesh::relay::MemoryRelay;
use peermesh::session::SessionHandle;
use peermesh::types::{MeshEvent, ObjectId, ParticipantId, SurfaceId};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

const POINTER_PERIOD: Duration = Duration::from_millis(16);
const DRAG_EVERY: u32 = 120;
const DRAG_STEPS: u32 = 30;

#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// INI file with mesh tunables. Missing keys keep their defaults.
    #[arg(short, long, global = true, env = "PEERMESH_CONFIG")]
    config: Option<PathBuf>,
    /// Enable verbose debug output.
    #[arg(short, long, global = true, action)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a few participants in this process and let them wiggle their pointers at each other.
    Simulate {
        /// How many participants join the surface.
        #[arg(short, long, default_value_t = 3)]
        participants: usize,
        /// How long to run, in seconds.
        #[arg(long, default_value_t = 5)]
        duration: u64,
        /// Name of the shared surface.
        #[arg(long, default_value = "demo")]
        surface: String,
        /// Break the link between the first two participants after this many seconds.
        #[arg(long)]
        fail_after: Option<u64>,
    },
    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    let cli = Cli::parse();

    logging::initialize(cli.debug)?;

    let config = match &cli.config {
        Some(config_file) => MeshConfig::from_config_file(config_file)?,
        None => MeshConfig::default(),
    };

    match cli.command {
        Commands::Simulate {
            participants,
            duration,
            surface,
            fail_after,
        } => {
            let run = simulate(
                config,
                participants,
                Duration::from_secs(duration),
                SurfaceId::new(surface),
                fail_after.map(Duration::from_secs),
            );
            tokio::select! {
                result = run => result?,
                result = signal::ctrl_c() => {
                    if let Err(err) = result {
                        eprintln!("Unable to listen for shutdown signal: {err}");
                    }
                }
            }
        }
        Commands::Config => {
            println!("{config}");
        }
    }
    Ok(())
}

async fn simulate(
    config: MeshConfig,
    participants: usize,
    duration: Duration,
    surface_id: SurfaceId,
    fail_after: Option<Duration>,
) -> Result<()> {
    let network = MemoryNetwork::new();
    let relay = MemoryRelay::new();
    let board = PresenceBoard::new();
    let sweeper = relay.spawn_sweeper(config.relay_max_age / 2, config.relay_max_age);

    let ids: Vec<ParticipantId> = (1..=participants)
        .map(|n| ParticipantId::new(format!("participant-{n}")))
        .collect();

    let mut sessions = vec![];
    for id in &ids {
        let session = SessionHandle::new(
            id.clone(),
            config.clone(),
            Arc::new(MemoryTransportFactory::new(network.clone())),
            Arc::new(relay.clone()),
            Arc::new(board.clone()),
        );
        tokio::spawn(report_events(id.clone(), session.subscribe_events()));
        board.join(&surface_id, id.clone());
        session.set_active_surface(surface_id.clone()).await?;
        sessions.push(session);
    }
    info!(
        "{} participants joined surface '{surface_id}'",
        sessions.len()
    );

    if let (Some(after), [first, second, ..]) = (fail_after, ids.as_slice()) {
        let network = network.clone();
        let (first, second) = (first.clone(), second.clone());
        tokio::spawn(async move {
            sleep(after).await;
            warn!("Breaking the link from {first} to {second}");
            if !network.fail(&first, &second) {
                warn!("There was no link from {first} to {second} to break");
            }
        });
    }

    let deadline = Instant::now() + duration;
    let results = join_all(
        sessions
            .iter()
            .enumerate()
            .map(|(n, session)| wiggle(session.clone(), n, deadline)),
    )
    .await;

    for (session, result) in sessions.iter().zip(results) {
        let (attempted, sent) = result?;
        info!(
            "{} sent {sent} of {attempted} pointer updates",
            session.local_id()
        );
        for (remote, role, state) in session.peers().await? {
            info!("  {remote}: {state} ({role})");
        }
    }

    sweeper.abort();
    Ok(())
}

/// Moves the pointer along a wobbly path and now and then drags an object around.
/// Returns how many pointer updates were attempted and how many went out.
async fn wiggle(session: SessionHandle, n: usize, deadline: Instant) -> Result<(u32, u32)> {
    let object_id = ObjectId::new(format!("shape-{n}"));
    let (mut x, mut y) = (100.0 * n as f64, 100.0);
    let mut attempted = 0;
    let mut sent = 0;
    let mut tick: u32 = 0;

    while Instant::now() < deadline {
        x += rand::random::<f64>() * 10.0 - 5.0;
        y += rand::random::<f64>() * 10.0 - 5.0;

        attempted += 1;
        if session.pointer_moved(x, y).await? {
            sent += 1;
        }

        let phase = tick % DRAG_EVERY;
        if phase == 0 {
            session.drag_started(object_id.clone()).await?;
        } else if phase < DRAG_STEPS {
            session.drag_moved(object_id.clone(), x, y).await?;
        } else if phase == DRAG_STEPS {
            session.drag_ended(object_id.clone(), x, y).await?;
        }

        tick += 1;
        sleep(POINTER_PERIOD).await;
    }
    Ok((attempted, sent))
}

async fn report_events(
    local_id: ParticipantId,
    mut events: tokio::sync::broadcast::Receiver<MeshEvent>,
) {
    loop {
        match events.recv().await {
            Ok(MeshEvent::PeerConnected(remote)) => info!("{local_id} is connected to {remote}"),
            Ok(MeshEvent::PeerDisconnected(remote)) => {
                info!("{local_id} lost {remote}");
            }
            Ok(MeshEvent::DragEnded {
                participant,
                object_id,
                x,
                y,
            }) => info!("{local_id} saw {participant} drop {object_id} at ({x:.0}, {y:.0})"),
            Ok(event) => debug!(from = %event.participant(), "{local_id} got {event:?}"),
            Err(RecvError::Lagged(skipped)) => debug!("{local_id} skipped {skipped} events"),
            Err(RecvError::Closed) => break,
        }
    }
}
