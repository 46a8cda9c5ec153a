// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use thiserror::Error;

/// Why a link went away on its own. Explicit teardown by the owner is not an error and never
/// produces one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("transport failed: {0}")]
    TransportFailed(String),
    #[error("transport closed")]
    TransportClosed,
}

impl LinkError {
    pub(crate) fn negotiation(err: &anyhow::Error) -> Self {
        Self::Negotiation(format!("{err:#}"))
    }
}
