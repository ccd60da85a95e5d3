//! # Strata Placement Engine
//!
//! Strata decides where tasks run on heterogeneous big/little processors.
//! It weighs per-task and per-core load signals against an energy model of
//! the silicon and answers placement queries with the core that serves the
//! task's scheduling class best, preferring low energy when performance is
//! not at stake.
//!
//! ## Philosophy
//!
//! The engine is **decision-only**. It never owns a runqueue, never stops
//! a task, never touches a register. The host scheduler feeds it lifecycle
//! events and load figures, asks it questions, and carries out (or ignores)
//! the answers. Everything runs inline on the calling core in `no_std`;
//! the single piece of deferred work is observer notification.
//!
//! ## Components
//!
//! - **Topology**: immutable capacity-ordered core groups
//! - **Load mirror**: per-core utilization, idle, and frequency state
//! - **Task registry**: per-task signals, class membership, placement flags
//! - **Snapshot**: one placement's frozen view and resolved policy
//! - **Filter and select**: candidate narrowing, then per-policy choice
//! - **Energy model**: per-group power tables behind the efficiency math
//! - **Ontime and express**: migration bands and reserved-lane pinning
//! - **Overload**: system-wide pressure grading and emergency routing
//! - **Migration hub**: intended moves queued for per-core stopper drains
//!
//! [`PlacementEngine`] ties the pieces together; hosts that need finer
//! control can reach the subsystems through its accessors.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod bus;
pub mod config;
pub mod energy;
pub mod engine;
pub mod error;
pub mod filter;
pub mod load;
pub mod mask;
pub mod math;
pub mod migrate;
pub mod ontime;
pub mod overload;
pub mod ratio;
pub mod select;
pub mod snapshot;
pub mod task;
pub mod topology;
pub mod work;

pub use bus::{OverloadBus, OverloadSubscription};
pub use config::{
    BootBoost, BoostResponse, BoostState, ClassConfig, ClassConfigBuilder, ClassPinning,
    ClassRegistry, EngineConfig, PreferSet, Tunables,
};
pub use energy::{EnergyModel, FreqStep, GroupWeights, TableSpec, ENERGY_UNKNOWN};
pub use engine::{EngineStats, PlacementEngine, TICK_PERIOD_NS};
pub use error::{EngineError, EngineResult};
pub use filter::ExpressLanes;
pub use load::{CoreSample, LoadMirror};
pub use mask::CoreMask;
pub use migrate::{MigrationHub, MigrationIntent};
pub use ontime::OntimeBounds;
pub use overload::{
    OverloadSignals, OverloadState, OverloadStatus, OverloadTransition, SomacRotor,
};
pub use ratio::{DemandHint, RatioSnapshot, RatioTracker};
pub use select::SchedPolicy;
pub use task::{TaskFlags, TaskRegistry, TaskSample, TaskState};
pub use topology::Topology;

pub use strata_types::{ClassId, CoreId, IntentId, TaskId, CAPACITY_SCALE, MAX_CORES};
