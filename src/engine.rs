// Page-level coordination. Every timer transition is derived here from
// explicit host signals: rechecks on layout events, a pause sweep when
// the page hides, the pump that credits ticks, and the unload summary.

use crate::registry::{TrackedUnit, UnitRegistry};
use crate::report::{format_clock, ReportEvent, ReportSink, UnitDwell, ENGINE_VERSION};
use crate::types::{ElementBox, HostCapabilities, Playback, TrackerConfig, UnitId, Viewport};
use crate::viewability::is_viewable;

/// Host facts read on demand during a recheck. The browser layer backs
/// this with live DOM reads; tests script it.
pub trait PageProbe<H> {
    /// Current bounding box of the unit, or None when it cannot be
    /// measured. One read per unit per recheck.
    fn element_box(&self, handle: &H) -> Option<ElementBox>;

    /// Current viewport band. One read per recheck.
    fn viewport(&self) -> Viewport;

    /// Whether the unit's media element is playing right now.
    fn media_playing(&self, handle: &H) -> bool;

    /// Whether the unit contains a playable media element. Consulted
    /// once, at registration.
    fn contains_media(&self, handle: &H) -> bool;
}

/// Wall-clock accumulator for time the page spent in the foreground.
#[derive(Debug, Clone)]
pub struct PageClock {
    visible_since_ms: Option<f64>,
    accumulated_ms: f64,
}

impl PageClock {
    /// A clock for a page assumed visible at `now_ms`. Callers on a
    /// hidden page follow up with [`on_hidden`](PageClock::on_hidden).
    pub fn new(now_ms: f64) -> Self {
        PageClock {
            visible_since_ms: Some(now_ms),
            accumulated_ms: 0.0,
        }
    }

    /// Close the open visible interval.
    pub fn on_hidden(&mut self, now_ms: f64) {
        if let Some(since) = self.visible_since_ms.take() {
            self.accumulated_ms += (now_ms - since).max(0.0);
        }
    }

    /// Open a visible interval unless one is already open.
    pub fn on_visible(&mut self, now_ms: f64) {
        if self.visible_since_ms.is_none() {
            self.visible_since_ms = Some(now_ms);
        }
    }

    /// Move the open interval's origin to `now_ms`, so page timing
    /// starts at the content-loaded signal. No effect while hidden.
    pub fn rebase(&mut self, now_ms: f64) {
        if self.visible_since_ms.is_some() {
            self.visible_since_ms = Some(now_ms);
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible_since_ms.is_some()
    }

    /// Accumulated foreground time including the open interval.
    pub fn total_ms(&self, now_ms: f64) -> f64 {
        let open = self
            .visible_since_ms
            .map(|since| (now_ms - since).max(0.0))
            .unwrap_or(0.0);
        self.accumulated_ms + open
    }
}

/// The measurement engine: owns the unit registry, the page clock, and
/// the report sink, and turns host signals into timer transitions.
///
/// All methods take the current wall clock as a parameter, so the
/// engine is deterministic and testable by invoking the handlers
/// directly.
pub struct ViewabilityEngine<H> {
    config: TrackerConfig,
    caps: HostCapabilities,
    registry: UnitRegistry<H>,
    page: PageClock,
    sink: Box<dyn ReportSink>,
    /// Set when the host signals do-not-track and the configuration
    /// honors it; every emission becomes a silent no-op.
    suppress_reports: bool,
}

impl<H: PartialEq + Clone> ViewabilityEngine<H> {
    pub fn new(
        config: TrackerConfig,
        caps: HostCapabilities,
        sink: Box<dyn ReportSink>,
        now_ms: f64,
    ) -> Self {
        let config = config.sanitize();
        let suppress_reports = config.respect_do_not_track && caps.do_not_track;
        ViewabilityEngine {
            config,
            caps,
            registry: UnitRegistry::new(),
            page: PageClock::new(now_ms),
            sink,
            suppress_reports,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Units in insertion order, with their timers.
    pub fn units(&self) -> &[TrackedUnit<H>] {
        self.registry.units()
    }

    /// Register a unit for tracking and report the registration.
    ///
    /// The media flag is probed once here and fixes the unit's tick
    /// cadence and threshold. Registration ends with a full recheck,
    /// since the unit may already be in view and layout may have
    /// shifted for the others. Re-registering a known handle resets
    /// its timer in place.
    pub fn add_unit(
        &mut self,
        handle: H,
        explicit_id: Option<UnitId>,
        probe: &impl PageProbe<H>,
        now_ms: f64,
    ) -> UnitId {
        let is_media = probe.contains_media(&handle);
        let settings = self.config.timer_settings(is_media);
        let id = self.registry.insert(handle, explicit_id, is_media, settings);
        self.emit(ReportEvent::Init {
            id: Some(id.clone()),
            status: 1,
            viewability_support: self.support_flag(),
        });
        self.recheck_all(probe, now_ms);
        id
    }

    /// Report a registration the host could not resolve. The unit is
    /// never added and there is no retry.
    pub fn reject_unit(&mut self, explicit_id: Option<UnitId>) {
        match &explicit_id {
            Some(id) => log::warn!("unit {} could not be resolved", id),
            None => log::warn!("unresolvable unit registration"),
        }
        self.emit(ReportEvent::Init {
            id: explicit_id,
            status: 0,
            viewability_support: self.support_flag(),
        });
    }

    /// Stop tracking a unit. Its timer is paused and its totals leave
    /// the unload summary.
    pub fn remove_unit_by_handle(&mut self, handle: &H) -> bool {
        self.registry.remove_by_handle(handle)
    }

    pub fn remove_unit_by_id(&mut self, id: &UnitId) -> bool {
        self.registry.remove_by_id(id)
    }

    /// Id under which a handle reports, if registered.
    pub fn unit_id_for_handle(&self, handle: &H) -> Option<UnitId> {
        self.registry.get_by_handle(handle).map(|u| u.id().clone())
    }

    /// Handle registered under an id, if any.
    pub fn unit_handle_by_id(&self, id: &UnitId) -> Option<H> {
        self.registry.get_by_id(id).map(|u| u.handle().clone())
    }

    /// Re-derive viewability for every unit from fresh geometry and
    /// start or pause its timer accordingly. Pause is the default:
    /// nothing is trusted from earlier rechecks, and while the page is
    /// hidden every unit counts as not viewable regardless of
    /// geometry. Idempotent at any call rate.
    pub fn recheck_all(&mut self, probe: &impl PageProbe<H>, now_ms: f64) {
        let page_visible = self.page.is_visible();
        let viewport = probe.viewport();
        let fraction = self.config.viewable_on;
        for unit in self.registry.units_mut() {
            let viewable = page_visible
                && match probe.element_box(unit.handle()) {
                    Some(bounds) => {
                        let playback = if unit.is_media() {
                            Playback::Media {
                                playing: probe.media_playing(unit.handle()),
                            }
                        } else {
                            Playback::Static
                        };
                        is_viewable(bounds, viewport, fraction, playback)
                    }
                    None => false,
                };
            if viewable {
                unit.timer_mut().start(now_ms);
            } else {
                unit.timer_mut().pause();
            }
        }
    }

    /// Pump: credit elapsed ticks on every running timer, and report
    /// each unit whose threshold fire happened during this call.
    pub fn advance(&mut self, now_ms: f64) {
        let mut fired: Vec<UnitId> = Vec::new();
        for unit in self.registry.units_mut() {
            if unit.timer_mut().advance_to(now_ms) {
                log::debug!(
                    "unit {} viewable past threshold after {}",
                    unit.id(),
                    format_clock(unit.timer().total_ms())
                );
                fired.push(unit.id().clone());
            }
        }
        for id in fired {
            self.emit(ReportEvent::Viewability { id });
        }
    }

    /// The page left the foreground: close the visible interval and
    /// pause every timer. Streaks are discarded, totals survive.
    pub fn on_page_hidden(&mut self, now_ms: f64) {
        self.page.on_hidden(now_ms);
        for unit in self.registry.units_mut() {
            unit.timer_mut().pause();
        }
    }

    /// The page returned to the foreground. Viewability is re-derived
    /// from current geometry, never resumed from pre-hidden state.
    pub fn on_page_visible(&mut self, probe: &impl PageProbe<H>, now_ms: f64) {
        self.page.on_visible(now_ms);
        self.recheck_all(probe, now_ms);
    }

    /// The host's content-loaded signal: page timing restarts here,
    /// followed by the initial recheck.
    pub fn on_content_loaded(&mut self, probe: &impl PageProbe<H>, now_ms: f64) {
        self.page.rebase(now_ms);
        self.recheck_all(probe, now_ms);
    }

    /// Foreground time so far, in milliseconds.
    pub fn time_on_page_ms(&self, now_ms: f64) -> f64 {
        self.page.total_ms(now_ms)
    }

    /// Emit the end-of-session summary: total foreground time and
    /// every unit's cumulative exposure, in seconds. Best-effort and
    /// repeatable; transport gives no acknowledgment.
    pub fn on_unload(&mut self, now_ms: f64) {
        let banners: Vec<UnitDwell> = self
            .registry
            .units()
            .iter()
            .map(|unit| UnitDwell {
                id: unit.id().clone(),
                time: unit.timer().total_ms() as f64 / 1000.0,
            })
            .collect();
        let event = ReportEvent::Unload {
            sb_support: u8::from(self.caps.beacon_support),
            viewability_support: self.support_flag(),
            time_on_page: self.time_on_page_ms(now_ms) / 1000.0,
            version: ENGINE_VERSION.to_string(),
            banners,
        };
        self.emit(event);
    }

    /// Manually report a registered unit as viewable, independent of
    /// its timer. Returns whether the unit exists. Does not touch the
    /// timer's fire latch.
    pub fn send_unit_stat(&mut self, id: &UnitId) -> bool {
        if self.registry.get_by_id(id).is_none() {
            return false;
        }
        self.emit(ReportEvent::Viewability { id: id.clone() });
        true
    }

    fn support_flag(&self) -> u8 {
        u8::from(self.caps.viewability_support)
    }

    fn emit(&mut self, event: ReportEvent) {
        if self.suppress_reports {
            log::debug!("do-not-track set, dropping report");
            return;
        }
        self.sink.send(event);
    }
}
