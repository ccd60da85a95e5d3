//! Overload grading and the transition ladder.

use spin::Mutex;

use super::OverloadState;
use crate::load::check_busy;
use crate::topology::Topology;

/// Ticks between determinations, per state. Calmer states re-grade on
/// every tick; the loaded ones settle down a little.
const EVAL_INTERVAL: [u64; OverloadState::COUNT] = [1, 1, 2, 2];

/// Ticks a calmer determination must persist before the fall is committed.
const RELEASE_TICKS: [u64; OverloadState::COUNT] = [0, 4, 8, 16];

// ============================================================================
// SIGNALS
// ============================================================================

/// One profiling sample of the whole system.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverloadSignals {
    /// Cores whose runnable load has outgrown what they execute.
    pub busy_cores: u32,
    /// Summed utilization of heavy tasks across all cores.
    pub heavy_util_sum: u64,
    /// Summed utilization of every active core.
    pub util_sum: u64,
    /// Tasks too large for most cores.
    pub misfit_count: u32,
}

/// A committed state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverloadTransition {
    pub from: OverloadState,
    pub to: OverloadState,
    pub tick: u64,
}

/// Snapshot of the monitor for status dumps.
#[derive(Debug, Clone, Copy)]
pub struct OverloadStatus {
    pub state: OverloadState,
    /// Ticks spent in each state since boot.
    pub time_in: [u64; OverloadState::COUNT],
}

impl core::fmt::Display for OverloadStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} normal={} elevated={} saturated={} critical={}",
            self.state, self.time_in[0], self.time_in[1], self.time_in[2], self.time_in[3]
        )
    }
}

// ============================================================================
// DETERMINATION
// ============================================================================

/// Grade one profiling sample.
pub fn determine(topo: &Topology, signals: &OverloadSignals) -> OverloadState {
    if check_busy(signals.heavy_util_sum, topo.max_capacity_sum()) {
        if signals.misfit_count as usize > topo.nr_cores() / 2 {
            return OverloadState::Critical;
        }
        return OverloadState::Saturated;
    }
    if signals.busy_cores >= 1
        && (check_busy(signals.heavy_util_sum, signals.util_sum) || signals.misfit_count >= 1)
    {
        return OverloadState::Elevated;
    }
    OverloadState::Normal
}

// ============================================================================
// MONITOR
// ============================================================================

struct MonitorInner {
    state: OverloadState,
    /// Last tick observed, for time-in-state accounting.
    last_seen: u64,
    /// Last tick a determination ran.
    last_eval: u64,
    /// First tick of the current run of calmer determinations.
    easing_since: Option<u64>,
    time_in: [u64; OverloadState::COUNT],
}

/// The overload state machine.
pub struct OverloadMonitor {
    inner: Mutex<MonitorInner>,
}

impl OverloadMonitor {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MonitorInner {
                state: OverloadState::Normal,
                last_seen: 0,
                last_eval: 0,
                easing_since: None,
                time_in: [0; OverloadState::COUNT],
            }),
        }
    }

    pub fn state(&self) -> OverloadState {
        self.inner.lock().state
    }

    pub fn status(&self) -> OverloadStatus {
        let inner = self.inner.lock();
        OverloadStatus {
            state: inner.state,
            time_in: inner.time_in,
        }
    }

    /// Feed one profiling sample. Returns the transition when one commits.
    ///
    /// A worse grade moves the state up right away; when the grade skips a
    /// barred transition, the walk stops at the highest state still
    /// allowed, and the next evaluation carries it the rest of the way. A
    /// calmer grade must hold continuously for the current state's release
    /// time before the fall commits.
    pub fn observe(
        &self,
        topo: &Topology,
        signals: &OverloadSignals,
        tick: u64,
    ) -> Option<OverloadTransition> {
        let mut inner = self.inner.lock();

        let delta = tick.saturating_sub(inner.last_seen);
        let state_idx = inner.state.index();
        inner.time_in[state_idx] += delta;
        inner.last_seen = tick;

        if tick.saturating_sub(inner.last_eval) < EVAL_INTERVAL[inner.state.index()] {
            return None;
        }
        inner.last_eval = tick;

        let target = determine(topo, signals);
        if target == inner.state {
            inner.easing_since = None;
            return None;
        }

        if target > inner.state {
            inner.easing_since = None;
            let next = highest_allowed(inner.state, target);
            return next.map(|next| commit(&mut inner, next, tick));
        }

        let since = *inner.easing_since.get_or_insert(tick);
        if tick.saturating_sub(since) < RELEASE_TICKS[inner.state.index()] {
            return None;
        }
        if !inner.state.allows(target) {
            return None;
        }
        Some(commit(&mut inner, target, tick))
    }
}

impl Default for OverloadMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk down from `target` to the highest state `from` may enter.
fn highest_allowed(from: OverloadState, target: OverloadState) -> Option<OverloadState> {
    let mut candidate = target;
    loop {
        if from.allows(candidate) {
            return Some(candidate);
        }
        candidate = match candidate {
            OverloadState::Critical => OverloadState::Saturated,
            OverloadState::Saturated => OverloadState::Elevated,
            OverloadState::Elevated => OverloadState::Normal,
            OverloadState::Normal => return None,
        };
        if candidate <= from {
            return None;
        }
    }
}

fn commit(inner: &mut MonitorInner, next: OverloadState, tick: u64) -> OverloadTransition {
    let from = inner.state;
    inner.state = next;
    inner.easing_since = None;
    OverloadTransition { from, to: next, tick }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::CoreMask;

    fn topo() -> Topology {
        Topology::builder()
            .with_group(CoreMask::from_bits(0x0f), 384)
            .with_group(CoreMask::from_bits(0xf0), 1024)
            .build()
            .unwrap()
    }

    fn calm() -> OverloadSignals {
        OverloadSignals::default()
    }

    fn heavy(topo: &Topology, misfits: u32) -> OverloadSignals {
        OverloadSignals {
            busy_cores: 4,
            heavy_util_sum: topo.max_capacity_sum() * 9 / 10,
            util_sum: topo.max_capacity_sum(),
            misfit_count: misfits,
        }
    }

    #[test]
    fn test_determination_grades() {
        let topo = topo();
        // 90 percent heavy and misfits on most cores: the worst grade.
        assert_eq!(determine(&topo, &heavy(&topo, 6)), OverloadState::Critical);
        // Same load, few misfits: saturated.
        assert_eq!(determine(&topo, &heavy(&topo, 2)), OverloadState::Saturated);
        assert_eq!(determine(&topo, &calm()), OverloadState::Normal);

        // One busy core and a single misfit task.
        let elevated = OverloadSignals {
            busy_cores: 1,
            heavy_util_sum: 100,
            util_sum: 4000,
            misfit_count: 1,
        };
        assert_eq!(determine(&topo, &elevated), OverloadState::Elevated);

        // Busy core where heavy work dominates what runs.
        let dominated = OverloadSignals {
            busy_cores: 1,
            heavy_util_sum: 900,
            util_sum: 1000,
            misfit_count: 0,
        };
        assert_eq!(determine(&topo, &dominated), OverloadState::Elevated);
    }

    #[test]
    fn test_critical_is_reached_through_saturated() {
        let topo = topo();
        let monitor = OverloadMonitor::new();
        let signals = heavy(&topo, 6);

        let first = monitor.observe(&topo, &signals, 1).unwrap();
        assert_eq!(first.to, OverloadState::Saturated);

        // Saturated evaluates every other tick.
        let second = monitor.observe(&topo, &signals, 3).unwrap();
        assert_eq!(second.from, OverloadState::Saturated);
        assert_eq!(second.to, OverloadState::Critical);
    }

    #[test]
    fn test_release_holds_before_falling() {
        let topo = topo();
        let monitor = OverloadMonitor::new();
        let busy = OverloadSignals {
            busy_cores: 2,
            heavy_util_sum: 900,
            util_sum: 1000,
            misfit_count: 0,
        };

        assert_eq!(
            monitor.observe(&topo, &busy, 1).unwrap().to,
            OverloadState::Elevated
        );
        // Calm readings inside the release window change nothing.
        assert!(monitor.observe(&topo, &calm(), 2).is_none());
        assert!(monitor.observe(&topo, &calm(), 4).is_none());
        assert_eq!(monitor.state(), OverloadState::Elevated);

        // Held long enough: the fall commits.
        let fall = monitor.observe(&topo, &calm(), 6).unwrap();
        assert_eq!(fall.to, OverloadState::Normal);
    }

    #[test]
    fn test_relapse_resets_the_release_clock() {
        let topo = topo();
        let monitor = OverloadMonitor::new();
        let busy = OverloadSignals {
            busy_cores: 2,
            heavy_util_sum: 900,
            util_sum: 1000,
            misfit_count: 0,
        };

        monitor.observe(&topo, &busy, 1).unwrap();
        assert!(monitor.observe(&topo, &calm(), 3).is_none());
        // The load comes back, so the easing run is forgotten.
        assert!(monitor.observe(&topo, &busy, 4).is_none());
        assert!(monitor.observe(&topo, &calm(), 5).is_none());
        assert!(monitor.observe(&topo, &calm(), 8).is_none());
        assert_eq!(monitor.state(), OverloadState::Elevated);

        let fall = monitor.observe(&topo, &calm(), 9).unwrap();
        assert_eq!(fall.to, OverloadState::Normal);
    }

    #[test]
    fn test_evaluation_interval_gates_regrades() {
        let topo = topo();
        let monitor = OverloadMonitor::new();
        let signals = heavy(&topo, 2);

        monitor.observe(&topo, &signals, 1).unwrap();
        assert_eq!(monitor.state(), OverloadState::Saturated);

        // One tick later is inside Saturated's evaluation interval.
        assert!(monitor.observe(&topo, &heavy(&topo, 6), 2).is_none());
        assert_eq!(monitor.state(), OverloadState::Saturated);
    }

    #[test]
    fn test_time_in_state_accumulates() {
        let topo = topo();
        let monitor = OverloadMonitor::new();

        assert!(monitor.observe(&topo, &calm(), 5).is_none());
        monitor.observe(&topo, &heavy(&topo, 2), 6).unwrap();
        assert!(monitor.observe(&topo, &calm(), 10).is_none());

        let status = monitor.status();
        assert_eq!(status.time_in[OverloadState::Normal.index()], 6);
        assert_eq!(status.time_in[OverloadState::Saturated.index()], 4);
    }

    #[test]
    fn test_transition_guard_rejects_barred_jump() {
        assert!(!OverloadState::Normal.allows(OverloadState::Critical));
        assert!(!OverloadState::Normal.allows(OverloadState::Normal));
        assert!(OverloadState::Normal.allows(OverloadState::Saturated));
        assert!(OverloadState::Critical.allows(OverloadState::Normal));
    }
}
