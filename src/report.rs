// Report payloads and the transport boundary.
// Events are one-way: the engine emits, the sink delivers best-effort.

use serde::{Deserialize, Serialize};

use crate::types::UnitId;

/// Crate version echoed in unload summaries.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One unit's entry in the unload summary. `time` is in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDwell {
    pub id: UnitId,
    pub time: f64,
}

/// Wire payloads, discriminated by a `type` tag.
///
/// Support flags ride along as 0/1 numbers and durations as seconds,
/// matching what the collecting endpoint expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReportEvent {
    /// A unit was registered (`status` 1) or could not be resolved
    /// (`status` 0, with the id absent unless the caller supplied one).
    Init {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<UnitId>,
        status: u8,
        viewability_support: u8,
    },
    /// A unit crossed its continuous-viewability threshold.
    Viewability { id: UnitId },
    /// End-of-session summary.
    Unload {
        sb_support: u8,
        viewability_support: u8,
        time_on_page: f64,
        version: String,
        banners: Vec<UnitDwell>,
    },
}

/// Where report events go. One-way and fire-and-forget: no return
/// value, no acknowledgment, no retry.
pub trait ReportSink {
    fn send(&mut self, event: ReportEvent);
}

/// Render a millisecond duration as HH:MM:SS (wrapping at a day) for
/// log lines.
pub fn format_clock(ms: u64) -> String {
    let total_secs = ms / 1000;
    let hours = (total_secs / 3600) % 24;
    let minutes = (total_secs / 60) % 60;
    let seconds = total_secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}
