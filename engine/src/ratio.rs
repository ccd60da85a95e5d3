//! # Active-Ratio Tracker
//!
//! Per-core sliding-window history of "fraction of time busy". Each core
//! accumulates busy time into fixed 8ms windows; completed windows roll
//! into a ten-deep ring from which rolling average, maximum, and a
//! paired-window deviation are derived. Two patterns fall out of the
//! statistics:
//!
//! - a **low, steady** history yields a cheap demand estimate downstream
//!   consumers may substitute for a live measurement
//! - a **variable, low-average** history on a currently idle core marks it
//!   a poor placement target
//!
//! Each record is owned by the core it describes and updated only from
//! that core's own enqueue/dequeue/tick path; the lock exists for the rare
//! out-of-band reader.

extern crate alloc;

use alloc::vec::Vec;

use spin::{Mutex, RwLock};
use strata_types::{CAPACITY_SCALE, CAPACITY_SHIFT, CoreId};

use crate::error::{EngineError, EngineResult};
use crate::mask::CoreMask;
use crate::math::int_sqrt;
use crate::topology::Topology;

/// Window length in nanoseconds.
pub const WINDOW_SIZE_NS: u64 = 8_000_000;

/// Completed windows kept per core.
pub const RATIO_HIST_SIZE: usize = 10;

/// How long the new-task boost marker stays armed.
pub const BOOST_INTERVAL_NS: u64 = 2 * WINDOW_SIZE_NS;

// ============================================================================
// POLICY AND THRESHOLDS
// ============================================================================

/// Which slice of the history answers a demand query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RatioPolicy {
    /// Current partial window only.
    Recent = 0,
    /// Maximum over the ring.
    Max = 1,
    /// Larger of the partial window and the ring maximum.
    MaxRecentMax = 2,
    /// Most recently completed window.
    Last = 3,
    /// Larger of the partial window and the last completed window.
    #[default]
    MaxRecentLast = 4,
    /// Larger of the partial window and the ring average.
    MaxRecentAvg = 5,
}

impl RatioPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recent => "recent",
            Self::Max => "max",
            Self::MaxRecentMax => "max-recent-max",
            Self::Last => "last",
            Self::MaxRecentLast => "max-recent-last",
            Self::MaxRecentAvg => "max-recent-avg",
        }
    }
}

/// Pattern-recognition thresholds, all on the 1024 ratio scale except the
/// pair threshold which spans two windows.
#[derive(Debug, Clone, Copy)]
pub struct RatioThresholds {
    /// An idle core needs at least this ring average to stay a credible
    /// placement target.
    pub high_pattern_thres: u64,
    /// ...and at most this deviation.
    pub high_pattern_stdev: u64,
    /// Minimum non-empty window pairs before the steady estimate applies.
    pub low_pattern_count: usize,
    /// Maximum paired-window average for the steady estimate.
    pub low_pattern_thres: u64,
    /// Maximum deviation for the steady estimate.
    pub low_pattern_stdev: u64,
}

impl Default for RatioThresholds {
    fn default() -> Self {
        Self {
            high_pattern_thres: 700,
            high_pattern_stdev: 200,
            low_pattern_count: 3,
            low_pattern_thres: CAPACITY_SCALE,
            low_pattern_stdev: 200,
        }
    }
}

// ============================================================================
// PER-CORE RECORD
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct ActiveRatio {
    /// First event seen; timestamps before that have no baseline.
    started: bool,
    /// The core has had runnable work since the last event.
    running: bool,
    /// Busy nanoseconds inside the current window.
    active_sum: u64,
    /// Ratio of the current partial window.
    recent: u64,
    hist: [u64; RATIO_HIST_SIZE],
    /// Ring slot of the most recently completed window.
    hist_idx: usize,
    period_start: u64,
    last_updated: u64,
    avg: u64,
    max: u64,
    /// Steady-pattern demand estimate, zero when unrecognized.
    est: u64,
    stdev: u64,
    /// Timestamp of the last new-task event, zero when disarmed.
    last_boost: u64,
    /// Reported demand never exceeds this; zero disables reporting.
    limit: u64,
    /// Floor applied while the boost marker is armed.
    boost_floor: u64,
}

impl ActiveRatio {
    const fn new() -> Self {
        Self {
            started: false,
            running: false,
            active_sum: 0,
            recent: 0,
            hist: [0; RATIO_HIST_SIZE],
            hist_idx: 0,
            period_start: 0,
            last_updated: 0,
            avg: 0,
            max: 0,
            est: 0,
            stdev: 0,
            last_boost: 0,
            limit: 0,
            boost_floor: 0,
        }
    }
}

/// Read-only copy of one core's record for status queries.
#[derive(Debug, Clone, Copy)]
pub struct RatioSnapshot {
    pub running: bool,
    pub recent: u64,
    pub last: u64,
    pub avg: u64,
    pub max: u64,
    pub est: u64,
    pub stdev: u64,
    pub limit: u64,
    pub boost_floor: u64,
}

impl core::fmt::Display for RatioSnapshot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "recent={} last={} avg={} max={} est={} stdev={}",
            self.recent, self.last, self.avg, self.max, self.est, self.stdev
        )
    }
}

/// Demand answer: a utilization figure and the scale it is expressed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemandHint {
    pub util: u64,
    pub scale: u64,
}

// ============================================================================
// TRACKER
// ============================================================================

/// Active-ratio records for every core.
pub struct RatioTracker {
    cores: Vec<Mutex<ActiveRatio>>,
    policy: RwLock<RatioPolicy>,
    thresholds: RwLock<RatioThresholds>,
    all: CoreMask,
}

impl RatioTracker {
    pub fn new(topo: &Topology) -> Self {
        let mut cores = Vec::with_capacity(strata_types::MAX_CORES);
        for _ in 0..strata_types::MAX_CORES {
            cores.push(Mutex::new(ActiveRatio::new()));
        }
        Self {
            cores,
            policy: RwLock::new(RatioPolicy::default()),
            thresholds: RwLock::new(RatioThresholds::default()),
            all: topo.all_cores(),
        }
    }

    fn check_core(&self, core: CoreId) -> EngineResult<()> {
        if !self.all.contains(core) {
            return Err(EngineError::InvalidCore(core));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Event feed
    // ------------------------------------------------------------------

    /// A task became runnable on the core. `first_task` closes an idle
    /// interval and flips the record to running.
    pub fn mark_enqueue(&self, core: CoreId, now: u64, first_task: bool) -> EngineResult<()> {
        self.check_core(core)?;
        let thresholds = *self.thresholds.read();
        let mut rec = self.cores[core.index()].lock();
        advance(&mut rec, now, &thresholds);
        if first_task {
            rec.running = true;
        }
        Ok(())
    }

    /// A task left the core. `last_task` closes the running interval and
    /// flips the record to idle.
    pub fn mark_dequeue(&self, core: CoreId, now: u64, last_task: bool) -> EngineResult<()> {
        self.check_core(core)?;
        let thresholds = *self.thresholds.read();
        let mut rec = self.cores[core.index()].lock();
        advance(&mut rec, now, &thresholds);
        if last_task {
            rec.running = false;
        }
        Ok(())
    }

    /// Periodic refresh from the tick path.
    pub fn mark_update(&self, core: CoreId, now: u64) -> EngineResult<()> {
        self.check_core(core)?;
        let thresholds = *self.thresholds.read();
        let mut rec = self.cores[core.index()].lock();
        advance(&mut rec, now, &thresholds);
        Ok(())
    }

    /// A brand-new task woke here. Arms the boost marker without touching
    /// the history.
    pub fn mark_new_task(&self, core: CoreId, now: u64) -> EngineResult<()> {
        self.check_core(core)?;
        let mut rec = self.cores[core.index()].lock();
        if !rec.started {
            rec.started = true;
            rec.period_start = now;
            rec.last_updated = now;
        }
        rec.last_boost = now;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Demand queries
    // ------------------------------------------------------------------

    /// Near-future demand of a core, given its live utilization figures.
    ///
    /// Falls through to the live figures whenever the history has nothing
    /// better to say: the live ratio already exceeds the reporting limit,
    /// or the history's own answer is below the live ratio.
    pub fn demand_estimate(&self, core: CoreId, now: u64, util: u64, cap: u64) -> DemandHint {
        let live = DemandHint { util, scale: cap };
        if !self.all.contains(core) || cap == 0 {
            return live;
        }
        let thresholds = *self.thresholds.read();
        let policy = *self.policy.read();
        let mut rec = self.cores[core.index()].lock();
        if !rec.started {
            return live;
        }

        let util_ratio = util * CAPACITY_SCALE / cap;

        if rec.last_boost != 0 && util_ratio < rec.boost_floor {
            return DemandHint {
                util: rec.boost_floor,
                scale: CAPACITY_SCALE,
            };
        }
        if util_ratio > rec.limit {
            return live;
        }

        // Idle core with a weak or erratic history: poor placement target.
        if !rec.running
            && (rec.avg < thresholds.high_pattern_thres
                || rec.stdev > thresholds.high_pattern_stdev)
        {
            return DemandHint {
                util: 0,
                scale: CAPACITY_SCALE,
            };
        }

        advance(&mut rec, now, &thresholds);

        let demand = match policy {
            RatioPolicy::Recent => rec.recent,
            RatioPolicy::Max => rec.max,
            RatioPolicy::MaxRecentMax => rec.recent.max(rec.max),
            RatioPolicy::Last => rec.hist[rec.hist_idx],
            RatioPolicy::MaxRecentLast => rec.recent.max(rec.hist[rec.hist_idx]),
            RatioPolicy::MaxRecentAvg => rec.recent.max(rec.avg),
        };
        let answer = demand.max(rec.est).min(rec.limit);

        if util_ratio > answer {
            return live;
        }
        DemandHint {
            util: answer,
            scale: CAPACITY_SCALE,
        }
    }

    /// Ratio of the most recently completed window.
    pub fn last_window(&self, core: CoreId) -> u64 {
        if !self.all.contains(core) {
            return 0;
        }
        let rec = self.cores[core.index()].lock();
        rec.hist[rec.hist_idx]
    }

    /// Read-only copy of one core's record.
    pub fn snapshot(&self, core: CoreId) -> EngineResult<RatioSnapshot> {
        self.check_core(core)?;
        let rec = self.cores[core.index()].lock();
        Ok(RatioSnapshot {
            running: rec.running,
            recent: rec.recent,
            last: rec.hist[rec.hist_idx],
            avg: rec.avg,
            max: rec.max,
            est: rec.est,
            stdev: rec.stdev,
            limit: rec.limit,
            boost_floor: rec.boost_floor,
        })
    }

    // ------------------------------------------------------------------
    // Tuning
    // ------------------------------------------------------------------

    pub fn set_policy(&self, policy: RatioPolicy) {
        *self.policy.write() = policy;
    }

    pub fn policy(&self) -> RatioPolicy {
        *self.policy.read()
    }

    /// Replace the pattern thresholds.
    pub fn set_thresholds(&self, thresholds: RatioThresholds) -> EngineResult<()> {
        if thresholds.high_pattern_thres > CAPACITY_SCALE
            || thresholds.high_pattern_stdev > CAPACITY_SCALE
            || thresholds.low_pattern_stdev > CAPACITY_SCALE
        {
            return Err(EngineError::invalid_config(
                "ratio thresholds",
                "ratio bounds must be within the capacity scale",
            ));
        }
        if thresholds.low_pattern_thres > CAPACITY_SCALE * 2 {
            return Err(EngineError::invalid_config(
                "low_pattern_thres",
                "pair threshold spans two windows at most",
            ));
        }
        if thresholds.low_pattern_count > RATIO_HIST_SIZE / 2 {
            return Err(EngineError::invalid_config(
                "low_pattern_count",
                "cannot require more pairs than the ring holds",
            ));
        }
        *self.thresholds.write() = thresholds;
        Ok(())
    }

    /// Reporting limit for every core in `core`'s capacity group. Zero
    /// keeps the group on live figures only.
    pub fn set_limit(&self, topo: &Topology, core: CoreId, ratio: u64) -> EngineResult<()> {
        self.check_core(core)?;
        if ratio > CAPACITY_SCALE {
            return Err(EngineError::invalid_config(
                "active_ratio_limit",
                "must be within the capacity scale",
            ));
        }
        for sibling in topo.siblings(core).iter() {
            self.cores[sibling.index()].lock().limit = ratio;
        }
        Ok(())
    }

    /// Boost floor for every core in `core`'s capacity group.
    pub fn set_boost_floor(&self, topo: &Topology, core: CoreId, ratio: u64) -> EngineResult<()> {
        self.check_core(core)?;
        if ratio > CAPACITY_SCALE {
            return Err(EngineError::invalid_config(
                "active_ratio_boost",
                "must be within the capacity scale",
            ));
        }
        for sibling in topo.siblings(core).iter() {
            self.cores[sibling.index()].lock().boost_floor = ratio;
        }
        Ok(())
    }
}

// ============================================================================
// RECORD MECHANICS
// ============================================================================

#[inline]
fn next_slot(idx: usize) -> usize {
    (idx + 1) % RATIO_HIST_SIZE
}

/// Roll the current window into the ring, append `count` empty or full
/// windows for time skipped entirely, and refresh the statistics.
fn roll_history(rec: &mut ActiveRatio, full: bool, mut count: u64, thresholds: &RatioThresholds) {
    rec.hist_idx = next_slot(rec.hist_idx);
    rec.hist[rec.hist_idx] = rec.recent;

    while count > 0 {
        rec.hist_idx = next_slot(rec.hist_idx);
        rec.hist[rec.hist_idx] = if full { CAPACITY_SCALE } else { 0 };
        count -= 1;
    }

    recompute_stats(rec, thresholds);
}

/// Rolling average, maximum, and the paired-window deviation. Pairs that
/// were entirely idle are left out so sparse history does not dilute the
/// pattern.
fn recompute_stats(rec: &mut ActiveRatio, thresholds: &RatioThresholds) {
    let mut sum = 0;
    let mut max = 0;
    for &ratio in &rec.hist {
        sum += ratio;
        max = max.max(ratio);
    }
    rec.avg = sum / RATIO_HIST_SIZE as u64;
    rec.max = max;
    rec.est = 0;
    rec.stdev = 0;

    let mut pair_sum = 0u64;
    let mut pairs = 0u64;
    for idx in (0..RATIO_HIST_SIZE).step_by(2) {
        let pair = rec.hist[idx] + rec.hist[idx + 1];
        if pair == 0 {
            continue;
        }
        pair_sum += pair;
        pairs += 1;
    }
    if pairs <= 1 {
        return;
    }

    let pair_avg = pair_sum / pairs;
    let mut variance = 0u64;
    for idx in (0..RATIO_HIST_SIZE).step_by(2) {
        let pair = rec.hist[idx] + rec.hist[idx + 1];
        if pair == 0 {
            continue;
        }
        let diff = pair as i64 - pair_avg as i64;
        variance += (diff * diff) as u64;
    }
    rec.stdev = int_sqrt(variance / (pairs - 1));

    if pairs as usize >= thresholds.low_pattern_count
        && pair_avg <= thresholds.low_pattern_thres
        && rec.stdev <= thresholds.low_pattern_stdev
    {
        rec.est = pair_avg / 2;
    }
}

/// Account the time since the last event against the current window,
/// rolling completed windows into the ring.
fn advance(rec: &mut ActiveRatio, now: u64, thresholds: &RatioThresholds) {
    if !rec.started {
        rec.started = true;
        rec.period_start = now;
        rec.last_updated = now;
        return;
    }

    if rec.last_boost != 0 && now > rec.last_boost + BOOST_INTERVAL_NS {
        rec.last_boost = 0;
    }

    let elapsed = now.saturating_sub(rec.period_start);
    let windows = elapsed / WINDOW_SIZE_NS;

    if rec.running {
        // Busy since the last event. Credit the current window up to its
        // end; full windows in between count as entirely busy.
        let window_end = rec.period_start + WINDOW_SIZE_NS;
        let credited = now.min(window_end);
        rec.active_sum += credited.saturating_sub(rec.last_updated);
        rec.recent = (rec.active_sum << CAPACITY_SHIFT) / WINDOW_SIZE_NS;

        if windows > 0 {
            roll_history(rec, true, windows - 1, thresholds);
            rec.active_sum = elapsed % WINDOW_SIZE_NS;
            rec.recent = (rec.active_sum << CAPACITY_SHIFT) / WINDOW_SIZE_NS;
        }
    } else if windows > 0 {
        // Idle since the last event. Whatever the window had accumulated
        // before going idle completes it; skipped windows are empty.
        roll_history(rec, false, windows - 1, thresholds);
        rec.active_sum = 0;
        rec.recent = 0;
    }

    rec.period_start += WINDOW_SIZE_NS * windows;
    rec.last_updated = now;
}

// ============================================================================
// TESTS
// ============================================================================
