// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tunables of the mesh, and how to read them from a config file.
use anyhow::{Context, Result};
use ini::{Ini, Properties};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const CURSOR_INTERVAL_DEFAULT: Duration = Duration::from_millis(50);
const DRAG_INTERVAL_DEFAULT: Duration = Duration::from_millis(50);
const DRAG_START_WINDOW_DEFAULT: Duration = Duration::from_millis(250);
const KEEPALIVE_INTERVAL_DEFAULT: Duration = Duration::from_secs(5);
const SEEN_ENVELOPE_CAP_DEFAULT: usize = 1000;
const RELAY_MAX_AGE_DEFAULT: Duration = Duration::from_secs(60);
const EVENT_CAPACITY_DEFAULT: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct MeshConfig {
    /// Minimum time between two transmitted cursor positions.
    pub cursor_interval: Duration,
    /// Minimum time between two transmitted positions of the same dragged object.
    pub drag_interval: Duration,
    /// Repeated drag starts for the same object within this window are swallowed.
    pub drag_start_window: Duration,
    pub keepalive_interval: Duration,
    /// How many relay envelope ids we remember for deduplication.
    pub seen_envelope_cap: usize,
    /// Relay records older than this are swept by the relay's cleanup task.
    pub relay_max_age: Duration,
    /// How many mesh events are buffered for subscribers. A subscriber lagging further
    /// behind misses events.
    pub event_capacity: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            cursor_interval: CURSOR_INTERVAL_DEFAULT,
            drag_interval: DRAG_INTERVAL_DEFAULT,
            drag_start_window: DRAG_START_WINDOW_DEFAULT,
            keepalive_interval: KEEPALIVE_INTERVAL_DEFAULT,
            seen_envelope_cap: SEEN_ENVELOPE_CAP_DEFAULT,
            relay_max_age: RELAY_MAX_AGE_DEFAULT,
            event_capacity: EVENT_CAPACITY_DEFAULT,
        }
    }
}

impl MeshConfig {
    /// Reads the general section of an INI file. Missing keys keep their defaults.
    pub fn from_config_file(config_file: &Path) -> Result<Self> {
        let conf = Ini::load_from_file(config_file)
            .with_context(|| format!("Could not read config file '{}'", config_file.display()))?;
        Self::from_properties(conf.general_section())
    }

    pub fn from_config_str(content: &str) -> Result<Self> {
        let conf = Ini::load_from_str(content).context("Could not parse config")?;
        Self::from_properties(conf.general_section())
    }

    fn from_properties(section: &Properties) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            cursor_interval: millis(section, "cursor_interval_ms")?
                .unwrap_or(defaults.cursor_interval),
            drag_interval: millis(section, "drag_interval_ms")?.unwrap_or(defaults.drag_interval),
            drag_start_window: millis(section, "drag_start_window_ms")?
                .unwrap_or(defaults.drag_start_window),
            keepalive_interval: millis(section, "keepalive_interval_ms")?
                .unwrap_or(defaults.keepalive_interval),
            seen_envelope_cap: parse(section, "seen_envelope_cap")?
                .unwrap_or(defaults.seen_envelope_cap),
            relay_max_age: millis(section, "relay_max_age_ms")?.unwrap_or(defaults.relay_max_age),
            event_capacity: parse(section, "event_capacity")?.unwrap_or(defaults.event_capacity),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.seen_envelope_cap > 0,
            "`seen_envelope_cap` must be at least 1"
        );
        anyhow::ensure!(
            !self.keepalive_interval.is_zero(),
            "`keepalive_interval_ms` must be positive"
        );
        anyhow::ensure!(
            !self.relay_max_age.is_zero(),
            "`relay_max_age_ms` must be positive"
        );
        anyhow::ensure!(self.event_capacity > 0, "`event_capacity` must be at least 1");
        Ok(())
    }
}

impl fmt::Display for MeshConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "cursor_interval_ms={}", self.cursor_interval.as_millis())?;
        writeln!(f, "drag_interval_ms={}", self.drag_interval.as_millis())?;
        writeln!(
            f,
            "drag_start_window_ms={}",
            self.drag_start_window.as_millis()
        )?;
        writeln!(
            f,
            "keepalive_interval_ms={}",
            self.keepalive_interval.as_millis()
        )?;
        writeln!(f, "seen_envelope_cap={}", self.seen_envelope_cap)?;
        writeln!(f, "relay_max_age_ms={}", self.relay_max_age.as_millis())?;
        write!(f, "event_capacity={}", self.event_capacity)
    }
}

fn parse<T>(section: &Properties, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    section
        .get(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .with_context(|| format!("Failed to parse config parameter `{key}`"))
        })
        .transpose()
}

fn millis(section: &Properties, key: &str) -> Result<Option<Duration>> {
    Ok(parse::<u64>(section, key)?.map(Duration::from_millis))
}
