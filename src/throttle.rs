// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Rate limiting for the high-frequency messages we send. Callers report every local movement;
//! the throttle decides which of them are actually transmitted.

use crate::config::MeshConfig;
use crate::types::ObjectId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct OutboundThrottle {
    cursor_interval: Duration,
    drag_interval: Duration,
    drag_start_window: Duration,
    last_cursor: Option<Instant>,
    last_drag: HashMap<ObjectId, Instant>,
    last_drag_start: HashMap<ObjectId, Instant>,
}

impl OutboundThrottle {
    pub fn new(config: &MeshConfig) -> Self {
        Self {
            cursor_interval: config.cursor_interval,
            drag_interval: config.drag_interval,
            drag_start_window: config.drag_start_window,
            last_cursor: None,
            last_drag: HashMap::new(),
            last_drag_start: HashMap::new(),
        }
    }

    pub fn allow_cursor(&mut self, now: Instant) -> bool {
        if elapsed_less_than(self.last_cursor, now, self.cursor_interval) {
            return false;
        }
        self.last_cursor = Some(now);
        true
    }

    pub fn allow_drag(&mut self, object_id: &ObjectId, now: Instant) -> bool {
        let last = self.last_drag.get(object_id).copied();
        if elapsed_less_than(last, now, self.drag_interval) {
            return false;
        }
        self.last_drag.insert(object_id.clone(), now);
        true
    }

    /// Swallows repeated starts for the same object caused by input jitter.
    pub fn allow_drag_start(&mut self, object_id: &ObjectId, now: Instant) -> bool {
        let last = self.last_drag_start.get(object_id).copied();
        if elapsed_less_than(last, now, self.drag_start_window) {
            return false;
        }
        self.last_drag_start.insert(object_id.clone(), now);
        true
    }

    /// A drag end is never held back. It forgets everything about the object.
    pub fn finish_drag(&mut self, object_id: &ObjectId) {
        self.last_drag.remove(object_id);
        self.last_drag_start.remove(object_id);
    }

    pub fn tracked_objects(&self) -> usize {
        self.last_drag.len().max(self.last_drag_start.len())
    }
}

fn elapsed_less_than(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
    last.is_some_and(|last| now.saturating_duration_since(last) < interval)
}
