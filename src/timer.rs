// Per-unit viewability timing state machine.
// Tracks cumulative exposure and the current unbroken viewable streak,
// and fires at most once when the streak crosses the threshold.

use serde::{Deserialize, Serialize};

use crate::types::TimerSettings;

/// Timer lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerState {
    /// Never started (or fully reset).
    Idle,
    /// Accruing ticks.
    Running,
    /// Stopped with the streak discarded; total is preserved.
    Paused,
}

/// Timing state machine for one tracked unit.
///
/// The timer is passive: the host pump calls [`advance_to`] with the
/// current wall clock, or tests call [`tick`] directly. Both counters
/// advance in whole increments of the tick interval.
///
/// [`advance_to`]: ViewabilityTimer::advance_to
/// [`tick`]: ViewabilityTimer::tick
#[derive(Debug, Clone)]
pub struct ViewabilityTimer {
    tick_interval_ms: u64,
    /// Threshold in effect; raised to unreachable after the fire so a
    /// second crossing can never report again.
    effective_threshold_ms: u64,
    state: TimerState,
    total_ms: u64,
    streak_ms: u64,
    fired: bool,
    /// Wall-clock origin for accrual, meaningful while running.
    origin_ms: f64,
}

impl ViewabilityTimer {
    pub fn new(settings: TimerSettings) -> Self {
        ViewabilityTimer {
            tick_interval_ms: settings.tick_interval_ms.max(1),
            effective_threshold_ms: settings.threshold_ms,
            state: TimerState::Idle,
            total_ms: 0,
            streak_ms: 0,
            fired: false,
            origin_ms: 0.0,
        }
    }

    /// Begin (or resume) accruing at `now_ms`. No-op while already
    /// running, so rapid rechecks keep the tick phase intact. Partial
    /// progress toward a tick from an earlier run is discarded.
    pub fn start(&mut self, now_ms: f64) {
        if self.state == TimerState::Running {
            return;
        }
        self.state = TimerState::Running;
        self.origin_ms = now_ms;
    }

    /// Stop accruing and discard the current streak. Total time is
    /// preserved. No-op unless running.
    pub fn pause(&mut self) {
        if self.state != TimerState::Running {
            return;
        }
        self.streak_ms = 0;
        self.state = TimerState::Paused;
    }

    /// Zero both counters and return to `Idle`. The fire latch is not
    /// cleared: a timer that already fired stays spent, and one that
    /// has not keeps its original threshold.
    pub fn reset(&mut self) {
        self.total_ms = 0;
        self.streak_ms = 0;
        self.state = TimerState::Idle;
    }

    /// Credit one tick. Returns true exactly once, on the tick whose
    /// streak crosses the threshold. Ignored unless running.
    pub fn tick(&mut self) -> bool {
        if self.state != TimerState::Running {
            return false;
        }
        self.total_ms += self.tick_interval_ms;
        self.streak_ms += self.tick_interval_ms;
        if self.streak_ms >= self.effective_threshold_ms && !self.fired {
            self.fired = true;
            self.effective_threshold_ms = u64::MAX;
            return true;
        }
        false
    }

    /// Credit every whole tick that elapsed between the accrual origin
    /// and `now_ms`. A late pump therefore catches up; a clock that
    /// moved backwards credits nothing. Returns whether the fire
    /// happened during this advance.
    pub fn advance_to(&mut self, now_ms: f64) -> bool {
        if self.state != TimerState::Running {
            return false;
        }
        let interval = self.tick_interval_ms as f64;
        let mut fired_now = false;
        while now_ms - self.origin_ms >= interval {
            self.origin_ms += interval;
            if self.tick() {
                fired_now = true;
            }
        }
        fired_now
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    /// Cumulative timed exposure across all start/pause cycles.
    pub fn total_ms(&self) -> u64 {
        self.total_ms
    }

    /// Length of the current unbroken viewable streak.
    pub fn streak_ms(&self) -> u64 {
        self.streak_ms
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer(tick_interval_ms: u64, threshold_ms: u64) -> ViewabilityTimer {
        ViewabilityTimer::new(TimerSettings {
            tick_interval_ms,
            threshold_ms,
        })
    }

    #[test]
    fn starts_idle_with_zero_counters() {
        let t = timer(100, 400);
        assert_eq!(t.state(), TimerState::Idle);
        assert_eq!(t.total_ms(), 0);
        assert_eq!(t.streak_ms(), 0);
        assert!(!t.has_fired());
    }

    #[test]
    fn no_fire_before_threshold() {
        let mut t = timer(100, 400);
        t.start(0.0);
        for _ in 0..3 {
            assert!(!t.tick());
        }
        t.pause();
        assert!(!t.has_fired());
    }

    #[test]
    fn fires_exactly_once_at_threshold() {
        let mut t = timer(100, 400);
        t.start(0.0);
        assert!(!t.tick());
        assert!(!t.tick());
        assert!(!t.tick());
        assert!(t.tick());
        assert!(t.has_fired());
        for _ in 0..20 {
            assert!(!t.tick());
        }
    }

    #[test]
    fn pause_resets_streak_and_keeps_total() {
        let mut t = timer(100, 4000);
        t.start(0.0);
        t.tick();
        t.tick();
        t.pause();
        assert_eq!(t.streak_ms(), 0);
        assert_eq!(t.total_ms(), 200);

        t.start(200.0);
        t.tick();
        t.tick();
        t.tick();
        assert_eq!(t.streak_ms(), 300);
        assert_eq!(t.total_ms(), 500);
    }

    #[test]
    fn fire_requires_unbroken_streak() {
        let mut t = timer(100, 400);
        t.start(0.0);
        for _ in 0..3 {
            t.tick();
        }
        t.pause();
        t.start(300.0);
        for _ in 0..3 {
            assert!(!t.tick());
        }
        // Fourth consecutive tick after the interruption.
        assert!(t.tick());
    }

    #[test]
    fn tick_ignored_unless_running() {
        let mut t = timer(100, 400);
        assert!(!t.tick());
        assert_eq!(t.total_ms(), 0);

        t.start(0.0);
        t.tick();
        t.pause();
        assert!(!t.tick());
        assert_eq!(t.total_ms(), 100);
    }

    #[test]
    fn start_while_running_keeps_phase() {
        let mut t = timer(100, 4000);
        t.start(0.0);
        t.advance_to(150.0);
        assert_eq!(t.total_ms(), 100);
        // A redundant start must not move the accrual origin.
        t.start(150.0);
        t.advance_to(199.0);
        assert_eq!(t.total_ms(), 100);
        t.advance_to(200.0);
        assert_eq!(t.total_ms(), 200);
    }

    #[test]
    fn restart_discards_partial_tick_progress() {
        let mut t = timer(100, 4000);
        t.start(0.0);
        t.advance_to(150.0);
        t.pause();
        t.start(150.0);
        t.advance_to(249.0);
        assert_eq!(t.total_ms(), 100);
        t.advance_to(250.0);
        assert_eq!(t.total_ms(), 200);
    }

    #[test]
    fn advance_credits_catchup_ticks() {
        let mut t = timer(100, 400);
        t.start(0.0);
        // One late pump call covering ten intervals.
        assert!(t.advance_to(1000.0));
        assert_eq!(t.total_ms(), 1000);
        assert!(t.has_fired());
    }

    #[test]
    fn clock_regression_credits_nothing() {
        let mut t = timer(100, 400);
        t.start(1000.0);
        assert!(!t.advance_to(500.0));
        assert_eq!(t.total_ms(), 0);
    }

    #[test]
    fn reset_zeroes_counters_but_keeps_spent_latch() {
        let mut t = timer(100, 200);
        t.start(0.0);
        t.tick();
        assert!(t.tick());
        t.reset();
        assert_eq!(t.total_ms(), 0);
        assert_eq!(t.state(), TimerState::Idle);
        assert!(t.has_fired());

        t.start(0.0);
        for _ in 0..50 {
            assert!(!t.tick());
        }
        assert_eq!(t.total_ms(), 5000);
    }

    #[test]
    fn reset_before_fire_keeps_fire_capability() {
        let mut t = timer(100, 400);
        t.start(0.0);
        t.tick();
        t.tick();
        t.reset();
        t.start(0.0);
        t.tick();
        t.tick();
        t.tick();
        assert!(t.tick());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        /// One operation against the timer, mirrored in a hand-rolled
        /// model that counts ticks independently.
        #[derive(Debug, Clone)]
        enum Op {
            Start,
            Pause,
            Tick,
            Reset,
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![
                Just(Op::Start),
                Just(Op::Pause),
                Just(Op::Tick),
                Just(Op::Reset),
            ]
        }

        fn ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
            prop::collection::vec(op_strategy(), 0..=max_len)
        }

        proptest! {
            /// The fire signal happens at most once per timer, no
            /// matter how the timer is driven.
            #[test]
            fn fire_happens_at_most_once(
                interval in 1u64..500,
                threshold in 0u64..5000,
                ops in ops_strategy(64),
            ) {
                let mut t = ViewabilityTimer::new(TimerSettings {
                    tick_interval_ms: interval,
                    threshold_ms: threshold,
                });
                let mut now = 0.0;
                let mut fires = 0u32;
                for op in ops {
                    match op {
                        Op::Start => t.start(now),
                        Op::Pause => t.pause(),
                        Op::Reset => t.reset(),
                        Op::Tick => {
                            now += interval as f64;
                            if t.tick() {
                                fires += 1;
                            }
                        }
                    }
                }
                prop_assert!(fires <= 1, "fired {} times", fires);
            }

            /// Counters stay consistent with an independent tick count:
            /// total is interval times the ticks credited since the
            /// last reset, the streak covers the ticks since the last
            /// interruption, and the streak is zero right after pause.
            #[test]
            fn counters_match_tick_bookkeeping(
                interval in 1u64..500,
                threshold in 0u64..5000,
                ops in ops_strategy(64),
            ) {
                let mut t = ViewabilityTimer::new(TimerSettings {
                    tick_interval_ms: interval,
                    threshold_ms: threshold,
                });
                let mut now = 0.0;
                let mut running = false;
                let mut total_ticks = 0u64;
                let mut streak_ticks = 0u64;
                for op in ops {
                    match op {
                        Op::Start => {
                            t.start(now);
                            running = true;
                        }
                        Op::Pause => {
                            t.pause();
                            if running {
                                streak_ticks = 0;
                            }
                            running = false;
                            prop_assert_eq!(t.streak_ms(), 0);
                        }
                        Op::Reset => {
                            t.reset();
                            running = false;
                            total_ticks = 0;
                            streak_ticks = 0;
                        }
                        Op::Tick => {
                            now += interval as f64;
                            t.tick();
                            if running {
                                total_ticks += 1;
                                streak_ticks += 1;
                            }
                        }
                    }
                    prop_assert_eq!(t.total_ms(), total_ticks * interval);
                    prop_assert_eq!(t.streak_ms(), streak_ticks * interval);
                }
            }

            /// Driving via the wall clock credits whole ticks only and
            /// never moves the total backwards.
            #[test]
            fn advance_credits_whole_ticks_monotonically(
                interval in 1u64..500,
                threshold in 0u64..5000,
                deltas in prop::collection::vec(0u64..2000, 1..50),
            ) {
                let mut t = ViewabilityTimer::new(TimerSettings {
                    tick_interval_ms: interval,
                    threshold_ms: threshold,
                });
                let mut now = 0.0;
                t.start(now);
                let mut last_total = 0;
                for delta in deltas {
                    now += delta as f64;
                    t.advance_to(now);
                    prop_assert_eq!(t.total_ms() % interval, 0);
                    prop_assert!(t.total_ms() >= last_total);
                    last_total = t.total_ms();
                }
                // Everything elapsed while running, so the credited
                // total is the elapsed time rounded down to a tick.
                let expected = (now as u64 / interval) * interval;
                prop_assert_eq!(t.total_ms(), expected);
            }
        }
    }
}
