// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::types::EnvelopeId;
use std::collections::{HashSet, VecDeque};

/// Remembers the most recently processed relay envelopes, so that redelivery is harmless.
///
/// Only redelivery within the last `cap` envelopes is recognized; older ids are forgotten in the
/// order they were recorded.
#[derive(Debug)]
pub struct SeenEnvelopes {
    cap: usize,
    ids: HashSet<EnvelopeId>,
    order: VecDeque<EnvelopeId>,
}

impl SeenEnvelopes {
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            ids: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    pub fn contains(&self, id: &EnvelopeId) -> bool {
        self.ids.contains(id)
    }

    /// Records an id. Returns false if it was already known.
    pub fn insert(&mut self, id: EnvelopeId) -> bool {
        if !self.ids.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.order.clear();
    }
}
