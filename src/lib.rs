// inview_core: viewability measurement engine for banner and video
// units, compiled to WASM. The measurement core is pure Rust; dom.rs
// adapts it to the page.

mod engine;
mod error;
mod registry;
mod report;
mod timer;
mod types;
mod viewability;

#[cfg(target_arch = "wasm32")]
mod dom;

use wasm_bindgen::prelude::*;

pub use engine::{PageClock, PageProbe, ViewabilityEngine};
pub use error::TrackerError;
pub use registry::{TrackedUnit, UnitRegistry};
pub use report::{format_clock, ReportEvent, ReportSink, UnitDwell, ENGINE_VERSION};
pub use timer::{TimerState, ViewabilityTimer};
pub use types::*;
pub use viewability::is_viewable;

#[cfg(target_arch = "wasm32")]
pub use dom::{probe_capabilities, BeaconSink, DomProbe, Tracker};

/// Initialize panic hook for better error messages in browser console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSink;

    impl ReportSink for NullSink {
        fn send(&mut self, _event: ReportEvent) {}
    }

    #[test]
    fn engine_builds_from_json_config() {
        let config: TrackerConfig =
            serde_json::from_str(r#"{"viewable_on":0.6,"threshold_ms":2000}"#).unwrap();
        let engine: ViewabilityEngine<u32> =
            ViewabilityEngine::new(config, HostCapabilities::default(), Box::new(NullSink), 0.0);
        assert_eq!(engine.config().viewable_on, 0.6);
        assert_eq!(engine.config().threshold_ms, 2000);
        assert!(engine.units().is_empty());
    }
}
