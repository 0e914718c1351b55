// The viewability predicate: geometry plus playback, no state.

use crate::types::{ElementBox, Playback, Viewport};

/// Decide whether a unit is viewable at this instant.
///
/// A unit qualifies when at least `viewable_fraction` of its height
/// lies inside the viewport band, approximated linearly from the top
/// and bottom edges. The approximation is exact for units fully
/// inside, above, or below the band, and imprecise for units much
/// taller than the viewport. Horizontal position is not checked.
///
/// Zero-size boxes never qualify, which also excludes elements the
/// host could not measure. Media units additionally require playback.
pub fn is_viewable(
    unit: ElementBox,
    viewport: Viewport,
    viewable_fraction: f64,
    playback: Playback,
) -> bool {
    if unit.height <= 0.0 || unit.width <= 0.0 {
        return false;
    }
    let required = unit.height * viewable_fraction;
    let overlaps =
        !(unit.top + required >= viewport.bottom || unit.bottom - required <= viewport.top);
    match playback {
        Playback::Static => overlaps,
        Playback::Media { playing } => overlaps && playing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(height: f64) -> Viewport {
        Viewport::from_window_height(height, 0.0)
    }

    #[test]
    fn centered_half_visible_unit_is_viewable() {
        let unit = ElementBox::new(300.0, 550.0, 300.0, 250.0);
        assert!(is_viewable(unit, band(800.0), 0.5, Playback::Static));
    }

    #[test]
    fn fully_above_viewport_is_not_viewable() {
        let unit = ElementBox::new(-500.0, -250.0, 300.0, 250.0);
        assert!(!is_viewable(unit, band(800.0), 0.5, Playback::Static));
    }

    #[test]
    fn fully_below_viewport_is_not_viewable() {
        let unit = ElementBox::new(900.0, 1150.0, 300.0, 250.0);
        assert!(!is_viewable(unit, band(800.0), 0.5, Playback::Static));
    }

    #[test]
    fn zero_size_is_never_viewable() {
        let flat = ElementBox::new(100.0, 100.0, 300.0, 0.0);
        let thin = ElementBox::new(100.0, 350.0, 0.0, 250.0);
        assert!(!is_viewable(flat, band(800.0), 0.5, Playback::Static));
        assert!(!is_viewable(thin, band(800.0), 0.5, Playback::Static));
    }

    #[test]
    fn boundary_contact_is_not_viewable() {
        // Exactly the required fraction at the bottom edge fails the
        // strict test; a hair further in passes.
        let at_edge = ElementBox::new(700.0, 900.0, 300.0, 200.0);
        let just_in = ElementBox::new(699.0, 899.0, 300.0, 200.0);
        assert!(!is_viewable(at_edge, band(800.0), 0.5, Playback::Static));
        assert!(is_viewable(just_in, band(800.0), 0.5, Playback::Static));
    }

    #[test]
    fn fraction_one_requires_full_containment() {
        let inside = ElementBox::new(100.0, 300.0, 300.0, 200.0);
        let straddling = ElementBox::new(-50.0, 150.0, 300.0, 200.0);
        assert!(is_viewable(inside, band(800.0), 1.0, Playback::Static));
        assert!(!is_viewable(straddling, band(800.0), 1.0, Playback::Static));
    }

    #[test]
    fn offset_shrinks_the_band() {
        let unit = ElementBox::new(650.0, 900.0, 300.0, 250.0);
        assert!(is_viewable(
            unit,
            Viewport::from_window_height(800.0, 0.0),
            0.5,
            Playback::Static
        ));
        assert!(!is_viewable(
            unit,
            Viewport::from_window_height(800.0, 100.0),
            0.5,
            Playback::Static
        ));
    }

    #[test]
    fn tall_unit_centered_is_viewable() {
        let unit = ElementBox::new(-600.0, 1400.0, 300.0, 2000.0);
        assert!(is_viewable(unit, band(800.0), 0.5, Playback::Static));
    }

    #[test]
    fn paused_media_is_not_viewable() {
        let unit = ElementBox::new(300.0, 550.0, 300.0, 250.0);
        assert!(!is_viewable(
            unit,
            band(800.0),
            0.5,
            Playback::Media { playing: false }
        ));
        assert!(is_viewable(
            unit,
            band(800.0),
            0.5,
            Playback::Media { playing: true }
        ));
    }
}
