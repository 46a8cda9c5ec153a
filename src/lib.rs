// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! A direct peer-to-peer channel for ephemeral collaboration state.
//!
//! Viewers of the same surface find each other through a presence feed, negotiate direct links
//! through a shared relay log, and then stream pointer positions and drag previews to each other
//! without going through the durable backend.

pub mod config;
pub mod dedup;
pub mod error;
pub mod link;
pub mod logging;
pub mod memory_transport;
pub mod mesh;
pub mod messages;
pub mod presence;
pub mod relay;
pub mod session;
pub mod throttle;
pub mod transport;
pub mod types;
