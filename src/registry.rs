// Tracked-unit bookkeeping: identity dedup, id assignment, and timer
// ownership. Rechecks and report emission happen one level up.

use crate::timer::ViewabilityTimer;
use crate::types::{TimerSettings, UnitId};

/// One registered unit. The handle type `H` is opaque to the engine:
/// the browser layer uses an element reference, tests use anything
/// comparable.
#[derive(Debug, Clone)]
pub struct TrackedUnit<H> {
    handle: H,
    id: UnitId,
    is_media: bool,
    timer: ViewabilityTimer,
}

impl<H> TrackedUnit<H> {
    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn id(&self) -> &UnitId {
        &self.id
    }

    /// Whether the unit was registered as containing playable media.
    /// Decided once at registration and kept for the unit's lifetime.
    pub fn is_media(&self) -> bool {
        self.is_media
    }

    pub fn timer(&self) -> &ViewabilityTimer {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut ViewabilityTimer {
        &mut self.timer
    }
}

/// Insertion-ordered set of tracked units, keyed by handle identity.
///
/// Units registered without an explicit id report under their
/// insertion index. Known limitation carried from the original wire
/// format: after a removal, a later registration can receive an index
/// that an older unit still reports under. Callers that remove units
/// should supply their own ids.
#[derive(Debug, Clone)]
pub struct UnitRegistry<H> {
    units: Vec<TrackedUnit<H>>,
}

impl<H: PartialEq> Default for UnitRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: PartialEq> UnitRegistry<H> {
    pub fn new() -> Self {
        UnitRegistry { units: Vec::new() }
    }

    /// Register a unit, or re-register one already present.
    ///
    /// Re-registration resets the existing timer in place (counters
    /// zeroed, fire latch kept) and reassigns the id; the media flag
    /// and timer cadence from the first registration stay. Returns the
    /// id the unit reports under.
    pub fn insert(
        &mut self,
        handle: H,
        explicit_id: Option<UnitId>,
        is_media: bool,
        settings: TimerSettings,
    ) -> UnitId {
        if let Some(pos) = self.units.iter().position(|u| u.handle == handle) {
            let id = explicit_id.unwrap_or_else(|| UnitId::from(pos));
            let unit = &mut self.units[pos];
            unit.timer.reset();
            unit.id = id.clone();
            return id;
        }
        let id = explicit_id.unwrap_or_else(|| UnitId::from(self.units.len()));
        self.units.push(TrackedUnit {
            handle,
            id: id.clone(),
            is_media,
            timer: ViewabilityTimer::new(settings),
        });
        id
    }

    /// Pause and drop the unit with this handle. Returns whether a
    /// unit was removed.
    pub fn remove_by_handle(&mut self, handle: &H) -> bool {
        match self.units.iter().position(|u| u.handle == *handle) {
            Some(pos) => {
                self.units[pos].timer.pause();
                self.units.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Pause and drop the first unit reporting under this id.
    pub fn remove_by_id(&mut self, id: &UnitId) -> bool {
        match self.units.iter().position(|u| u.id == *id) {
            Some(pos) => {
                self.units[pos].timer.pause();
                self.units.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn get_by_handle(&self, handle: &H) -> Option<&TrackedUnit<H>> {
        self.units.iter().find(|u| u.handle == *handle)
    }

    pub fn get_by_id(&self, id: &UnitId) -> Option<&TrackedUnit<H>> {
        self.units.iter().find(|u| u.id == *id)
    }

    /// Units in insertion order, the only order the engine defines.
    pub fn units(&self) -> &[TrackedUnit<H>] {
        &self.units
    }

    pub fn units_mut(&mut self) -> &mut [TrackedUnit<H>] {
        &mut self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
