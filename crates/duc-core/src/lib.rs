//! # duc-core: Unit Commitment Data Model
//!
//! Fundamental data structures for multi-zone security-constrained unit
//! commitment, plus the runtime primitives every other crate builds on.
//!
//! ## Design Philosophy
//!
//! An instance is a flat, index-addressed description of the network:
//! - **Buses** carry a demand time series and a zone assignment.
//! - **Transmission lines** carry reactance-derived susceptance, normal and
//!   emergency flow limits, and a vulnerability flag marking outage
//!   candidates.
//! - **Generators** carry commitment physics (ramps, minimum up/down times)
//!   and a three-segment piecewise-linear offer curve.
//!
//! Element indices are dense and 1-based (`Bus#1..Bus#B`, `Line#1..Line#L`),
//! which lets downstream matrix code address rows and columns without hash
//! lookups. Zones reference elements by index only; there are no back
//! pointers from the instance into zone structures.
//!
//! ## Lifecycle
//!
//! An instance is built once at startup and is immutable afterwards, with
//! two sanctioned exceptions: the partitioner zeroes the demand of newly
//! boundary buses and assigns line zones. Both happen before any solver
//! state exists.
//!
//! ## Modules
//!
//! - [`error`] - Unified error taxonomy
//! - [`graph`] - Topology checks (connectivity)
//! - [`comm`] - Message-passing collectives for worker teams

use serde::{Deserialize, Serialize};

pub mod comm;
pub mod error;
pub mod graph;

pub use comm::{Communicator, LocalCommunicator, SoloCommunicator};
pub use error::{DucError, DucResult};

// Newtype wrappers for IDs for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(usize);

macro_rules! impl_id {
    ($name:ident, $label:expr) => {
        impl $name {
            /// Wrap a 1-based index.
            #[inline]
            pub fn new(value: usize) -> Self {
                $name(value)
            }

            /// The 1-based index.
            #[inline]
            pub fn value(&self) -> usize {
                self.0
            }

            /// The 0-based position in the instance's element vector.
            #[inline]
            pub fn idx(&self) -> usize {
                self.0 - 1
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}#{}", $label, self.0)
            }
        }
    };
}

impl_id!(BusId, "Bus");
impl_id!(LineId, "Line");
impl_id!(GenId, "Gen");
impl_id!(ZoneId, "Zone");

/// A network node with a demand time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bus {
    pub id: BusId,
    /// MW demand per time period, length equals the instance horizon.
    pub demand: Vec<f64>,
    pub zone: ZoneId,
}

/// A transmission line between two buses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransmissionLine {
    pub id: LineId,
    pub source: BusId,
    pub target: BusId,
    /// Series reactance in per-unit.
    pub reactance: f64,
    /// Derived as `(100 * pi / 180) / reactance`.
    pub susceptance: f64,
    /// MW limit under nominal operation.
    pub normal_limit: f64,
    /// MW limit immediately after a contingency.
    pub emergency_limit: f64,
    /// Whether this line participates in outage scenarios.
    pub vulnerable: bool,
    pub zone: ZoneId,
}

impl TransmissionLine {
    /// Susceptance implied by a reactance, matching the instance file
    /// convention (flows in MW per radian of angle difference).
    pub fn susceptance_from_reactance(reactance: f64) -> f64 {
        (100.0 * std::f64::consts::PI / 180.0) / reactance
    }
}

/// One segment of a piecewise-linear production offer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostSegment {
    /// Segment size in MW above the previous breakpoint.
    pub amount: f64,
    /// Marginal price in $/MWh within the segment.
    pub price: f64,
}

/// A thermal generating unit bound to one bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generator {
    pub id: GenId,
    pub name: String,
    pub bus: BusId,
    /// MW output when committed at minimum.
    pub min_power: f64,
    /// MW output cap; recomputed on load as `min_power + sum of offers`.
    pub max_power: f64,
    pub ramp_up: f64,
    pub ramp_down: f64,
    pub startup_ramp: f64,
    pub shutdown_ramp: f64,
    /// Hours the unit has been on (positive) or off (negative) before t=1.
    pub initial_status: i64,
    pub always_on: bool,
    /// Minimum consecutive hours on once started.
    pub min_uptime: usize,
    /// Minimum consecutive hours off once stopped.
    pub min_downtime: usize,
    /// $/h cost of running at minimum power.
    pub min_power_cost: f64,
    pub cost_segments: Vec<CostSegment>,
    pub startup_cost: f64,
}

impl Generator {
    /// Whether the unit is on in the hour preceding the horizon.
    #[inline]
    pub fn initially_on(&self) -> bool {
        self.initial_status > 0
    }

    /// MW output in the hour preceding the horizon. Units that enter the
    /// horizon committed are assumed to sit at minimum power.
    #[inline]
    pub fn initial_power(&self) -> f64 {
        if self.initially_on() {
            self.min_power
        } else {
            0.0
        }
    }
}

/// A complete unit-commitment instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitCommitmentInstance {
    pub name: String,
    pub buses: Vec<Bus>,
    pub lines: Vec<TransmissionLine>,
    pub generators: Vec<Generator>,
    /// Number of time periods (T).
    pub time_horizon: usize,
}

impl UnitCommitmentInstance {
    pub fn bus(&self, id: BusId) -> &Bus {
        &self.buses[id.idx()]
    }

    pub fn line(&self, id: LineId) -> &TransmissionLine {
        &self.lines[id.idx()]
    }

    pub fn generator(&self, id: GenId) -> &Generator {
        &self.generators[id.idx()]
    }

    /// Distinct zone ids present on the lines, ascending.
    pub fn zone_ids(&self) -> Vec<ZoneId> {
        let mut ids: Vec<ZoneId> = self.lines.iter().map(|l| l.zone).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Total MW demand in period `t` (0-based).
    pub fn total_demand(&self, t: usize) -> f64 {
        self.buses.iter().map(|b| b.demand[t]).sum()
    }

    /// Multiply every demand entry by `factor`.
    pub fn scale_demand(&mut self, factor: f64) {
        for bus in &mut self.buses {
            for d in &mut bus.demand {
                *d *= factor;
            }
        }
    }

    /// Multiply every flow limit by `factor`.
    pub fn scale_limits(&mut self, factor: f64) {
        for line in &mut self.lines {
            line.normal_limit *= factor;
            line.emergency_limit *= factor;
        }
    }

    /// Check the structural invariants: dense 1-based ids, endpoints and
    /// generator buses present, demand series matching the horizon.
    pub fn validate(&self) -> DucResult<()> {
        for (i, bus) in self.buses.iter().enumerate() {
            if bus.id.value() != i + 1 {
                return Err(DucError::Validation(format!(
                    "bus ids must be dense and 1-based; position {} holds {}",
                    i, bus.id
                )));
            }
            if bus.demand.len() != self.time_horizon {
                return Err(DucError::Validation(format!(
                    "{} has {} demand entries, horizon is {}",
                    bus.id,
                    bus.demand.len(),
                    self.time_horizon
                )));
            }
        }
        for (i, line) in self.lines.iter().enumerate() {
            if line.id.value() != i + 1 {
                return Err(DucError::Validation(format!(
                    "line ids must be dense and 1-based; position {} holds {}",
                    i, line.id
                )));
            }
            for end in [line.source, line.target] {
                if end.value() == 0 || end.value() > self.buses.len() {
                    return Err(DucError::Validation(format!(
                        "{} references unknown {}",
                        line.id, end
                    )));
                }
            }
        }
        for gen in &self.generators {
            if gen.bus.value() == 0 || gen.bus.value() > self.buses.len() {
                return Err(DucError::Validation(format!(
                    "{} is bound to unknown {}",
                    gen.id, gen.bus
                )));
            }
        }
        Ok(())
    }
}
