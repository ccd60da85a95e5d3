//! # Energy Model
//!
//! Prices placement candidates in energy terms. Each capacity group carries
//! a table of operating points (frequency, capacity, power) registered by
//! the host's frequency driver; the model answers two questions on top:
//! what would the whole system spend with the task on core X, and how
//! efficient is core X for this task within its own group.

mod model;
mod table;

pub use model::{EnergyModel, GroupWeights, ENERGY_UNKNOWN};
pub use table::{normalized_util, EnergyState, EnergyTable, FreqStep, TableSpec};
