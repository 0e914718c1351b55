// Shared types: unit identifiers, host-read geometry, playback state,
// and the JSON configuration accepted at construction.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a tracked unit as it appears in report payloads.
///
/// Callers may supply an integer or a string; units registered without
/// an id fall back to their insertion index in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UnitId {
    Num(i64),
    Text(String),
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitId::Num(n) => write!(f, "{}", n),
            UnitId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for UnitId {
    fn from(n: i64) -> Self {
        UnitId::Num(n)
    }
}

impl From<usize> for UnitId {
    fn from(n: usize) -> Self {
        UnitId::Num(n as i64)
    }
}

impl From<&str> for UnitId {
    fn from(s: &str) -> Self {
        UnitId::Text(s.to_string())
    }
}

impl From<String> for UnitId {
    fn from(s: String) -> Self {
        UnitId::Text(s)
    }
}

/// Bounding box of a unit, viewport-relative pixels, as read from the
/// host's bounding-box query. `bottom` and `height` are carried
/// separately because both appear in the viewability expression.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ElementBox {
    pub top: f64,
    pub bottom: f64,
    pub width: f64,
    pub height: f64,
}

impl ElementBox {
    pub fn new(top: f64, bottom: f64, width: f64, height: f64) -> Self {
        ElementBox {
            top,
            bottom,
            width,
            height,
        }
    }
}

/// Vertical band of the viewport used by the viewability test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Viewport {
    pub top: f64,
    pub bottom: f64,
}

impl Viewport {
    /// Band for a window of the given inner height, shrunk inward by
    /// `offset` pixels on both edges.
    pub fn from_window_height(height: f64, offset: f64) -> Self {
        Viewport {
            top: offset,
            bottom: height - offset,
        }
    }
}

/// Playback state of a unit at predicate-evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Playback {
    /// Plain unit with no playable media. Geometry alone decides.
    Static,
    /// Unit containing a media element. Never viewable unless playing.
    Media { playing: bool },
}

/// Tick cadence and fire threshold for one timer, derived from the
/// configuration according to the unit's media flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSettings {
    pub tick_interval_ms: u64,
    pub threshold_ms: u64,
}

impl Default for TimerSettings {
    fn default() -> Self {
        TimerSettings {
            tick_interval_ms: default_tick_interval(),
            threshold_ms: default_threshold(),
        }
    }
}

/// Host facts probed once at construction and echoed in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCapabilities {
    /// False when the page sits in a foreign frame context, where
    /// bounding-box geometry cannot be trusted.
    pub viewability_support: bool,
    /// Whether the host exposes a beacon-style send.
    pub beacon_support: bool,
    /// Whether the host signals a do-not-track preference.
    pub do_not_track: bool,
}

impl Default for HostCapabilities {
    fn default() -> Self {
        HostCapabilities {
            viewability_support: true,
            beacon_support: true,
            do_not_track: false,
        }
    }
}

/// Tracker configuration passed from JS. Every field is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Fraction of a unit's height that must overlap the viewport.
    #[serde(default = "default_viewable_on")]
    pub viewable_on: f64,
    /// Timer granularity for plain units (milliseconds).
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Timer granularity for media units (milliseconds).
    #[serde(default = "default_tick_interval")]
    pub media_tick_interval_ms: u64,
    /// Continuous-viewability duration that fires the report.
    #[serde(default = "default_threshold")]
    pub threshold_ms: u64,
    /// Fire threshold for media units.
    #[serde(default = "default_media_threshold")]
    pub media_threshold_ms: u64,
    /// Inward shrink of the viewport band on both edges (pixels).
    #[serde(default)]
    pub viewport_offset_px: f64,
    /// Where report payloads are POSTed. Events are dropped without it.
    #[serde(default)]
    pub report_endpoint: Option<String>,
    /// Honor the host's do-not-track preference by emitting nothing.
    #[serde(default)]
    pub respect_do_not_track: bool,
    /// Skip automatic page wiring; the host calls `init` explicitly.
    #[serde(default)]
    pub manual_init: bool,
}

fn default_viewable_on() -> f64 {
    0.5
}

fn default_tick_interval() -> u64 {
    100
}

fn default_threshold() -> u64 {
    4000
}

fn default_media_threshold() -> u64 {
    6000
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            viewable_on: default_viewable_on(),
            tick_interval_ms: default_tick_interval(),
            media_tick_interval_ms: default_tick_interval(),
            threshold_ms: default_threshold(),
            media_threshold_ms: default_media_threshold(),
            viewport_offset_px: 0.0,
            report_endpoint: None,
            respect_do_not_track: false,
            manual_init: false,
        }
    }
}

impl TrackerConfig {
    /// Clamp degenerate values so a bad configuration changes timing
    /// behavior but never halts measurement.
    pub fn sanitize(mut self) -> Self {
        self.viewable_on = self.viewable_on.clamp(0.0, 1.0);
        self.tick_interval_ms = self.tick_interval_ms.max(1);
        self.media_tick_interval_ms = self.media_tick_interval_ms.max(1);
        self
    }

    /// Timer settings for a unit, per its media flag.
    pub fn timer_settings(&self, is_media: bool) -> TimerSettings {
        if is_media {
            TimerSettings {
                tick_interval_ms: self.media_tick_interval_ms,
                threshold_ms: self.media_threshold_ms,
            }
        } else {
            TimerSettings {
                tick_interval_ms: self.tick_interval_ms,
                threshold_ms: self.threshold_ms,
            }
        }
    }

    /// Finest tick granularity across unit kinds; the pump interval the
    /// host should drive.
    pub fn pump_interval_ms(&self) -> u64 {
        self.tick_interval_ms.min(self.media_tick_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_from_empty_json() {
        let config: TrackerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.viewable_on, 0.5);
        assert_eq!(config.tick_interval_ms, 100);
        assert_eq!(config.media_tick_interval_ms, 100);
        assert_eq!(config.threshold_ms, 4000);
        assert_eq!(config.media_threshold_ms, 6000);
        assert_eq!(config.report_endpoint, None);
        assert!(!config.respect_do_not_track);
        assert!(!config.manual_init);
    }

    #[test]
    fn sanitize_clamps_degenerate_values() {
        let config = TrackerConfig {
            viewable_on: 3.0,
            tick_interval_ms: 0,
            ..TrackerConfig::default()
        }
        .sanitize();
        assert_eq!(config.viewable_on, 1.0);
        assert_eq!(config.tick_interval_ms, 1);
    }

    #[test]
    fn timer_settings_follow_media_flag() {
        let config = TrackerConfig::default();
        assert_eq!(config.timer_settings(false).threshold_ms, 4000);
        assert_eq!(config.timer_settings(true).threshold_ms, 6000);
        assert_eq!(config.timer_settings(true).tick_interval_ms, 100);
    }

    #[test]
    fn unit_id_serializes_untagged() {
        assert_eq!(serde_json::to_string(&UnitId::Num(7)).unwrap(), "7");
        assert_eq!(
            serde_json::to_string(&UnitId::from("promo")).unwrap(),
            "\"promo\""
        );
        let id: UnitId = serde_json::from_str("3").unwrap();
        assert_eq!(id, UnitId::Num(3));
    }

    #[test]
    fn viewport_band_applies_offset() {
        let vp = Viewport::from_window_height(900.0, 50.0);
        assert_eq!(vp.top, 50.0);
        assert_eq!(vp.bottom, 850.0);
    }
}
