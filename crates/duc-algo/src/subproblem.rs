//! Zonal subproblem construction.
//!
//! Each worker owns one zone and one subproblem: the generator-level
//! commitment model restricted to the zone, with the centralized balance
//! rows replaced by zonal coupling:
//!
//! 1. virtual injection variables `w[k, b, t]` predicting every zone `k`'s
//!    boundary injections from this zone's viewpoint,
//! 2. a per-period `transfer` variable tying the zone's interior surplus
//!    to its own boundary prediction,
//! 3. cross-zone link equalities expressing neighbor boundaries through
//!    this zone's interior injections via the link matrices,
//! 4. a contingency safety band `e_max`/`e_min` per internal line, pinned
//!    at zero until the screening callback loosens it.
//!
//! The boundary-exchange vector has the identical layout on every worker:
//! all zones' `w` slots in (zone, slot, period) order, then the worker's
//! own `transfer` entries. Averaging it across workers therefore matches
//! per-slot predictions pairwise, and a zero mean is exactly boundary-bus
//! power balance plus zero net inter-zonal transfer.

use std::collections::BTreeMap;

use duc_core::{DucError, DucResult, LineId, UnitCommitmentInstance, ZoneId};
use duc_solver::{LinExpr, Model, Solution, VarId, VarKind};

use crate::uc::{build_uc_model, UcModel};
use crate::zones::Zone;

/// A zone counts as small, and then tracks other zones' boundaries with
/// full consensus weight, below this many internal lines.
const SMALL_ZONE_LINES: usize = 100;

/// Capability set the ADMM coordinator needs from a subproblem.
pub trait Subproblem {
    fn model(&self) -> &Model;
    fn model_mut(&mut self) -> &mut Model;
    /// Scalar variable holding the subproblem's own objective.
    fn objective_var(&self) -> VarId;
    /// Variables exchanged across workers, in team-wide layout order.
    fn boundary_vars(&self) -> &[VarId];
    /// Positive consensus weight per boundary variable.
    fn weights(&self) -> &[f64];
    /// Initial consensus target per boundary variable.
    fn initial_targets(&self) -> &[f64];
}

/// The zonal subproblem owned by one worker.
pub struct ZonalSubproblem {
    pub uc: UcModel,
    pub zone_id: ZoneId,
    boundary: Vec<VarId>,
    weights: Vec<f64>,
    targets: Vec<f64>,
    /// Virtual boundary injections keyed by (zone, boundary slot, period).
    pub w_vars: BTreeMap<(ZoneId, usize, usize), VarId>,
    /// Net interior surplus pushed across the boundary, per period.
    pub transfer: Vec<VarId>,
    /// Safety-band offsets per internal line and period.
    pub e_max_vars: BTreeMap<(LineId, usize), VarId>,
    pub e_min_vars: BTreeMap<(LineId, usize), VarId>,
}

impl Subproblem for ZonalSubproblem {
    fn model(&self) -> &Model {
        &self.uc.model
    }

    fn model_mut(&mut self) -> &mut Model {
        &mut self.uc.model
    }

    fn objective_var(&self) -> VarId {
        self.uc.cost_var
    }

    fn boundary_vars(&self) -> &[VarId] {
        &self.boundary
    }

    fn weights(&self) -> &[f64] {
        &self.weights
    }

    fn initial_targets(&self) -> &[f64] {
        &self.targets
    }
}

impl ZonalSubproblem {
    /// Boundary values of the latest solution, in exchange layout.
    pub fn boundary_values(&self, solution: &Solution) -> Vec<f64> {
        self.boundary.iter().map(|&v| solution.value(v)).collect()
    }
}

/// Build the subproblem for `zone`, wiring it against every other zone.
pub fn build_zonal_subproblem(
    instance: &UnitCommitmentInstance,
    zone: &Zone,
    all_zones: &[Zone],
    reserve_fraction: f64,
    relax: bool,
) -> DucResult<ZonalSubproblem> {
    let horizon = instance.time_horizon;

    let local_buses: Vec<_> = zone
        .bus_interior
        .iter()
        .chain(&zone.bus_boundary)
        .copied()
        .collect();
    let local_gens: Vec<_> = instance
        .generators
        .iter()
        .filter(|g| local_buses.contains(&g.bus))
        .map(|g| g.id)
        .collect();

    let mut uc = build_uc_model(instance, &local_gens, &local_buses, reserve_fraction);
    for row in uc.balance_rows.clone() {
        uc.model.delete_row(row);
    }
    let model = &mut uc.model;

    // Virtual injections for every zone's boundary buses. Non-neighbor
    // predictions are constrained to zero.
    let mut w_vars = BTreeMap::new();
    for other in all_zones {
        for slot in 0..other.bus_boundary.len() {
            for t in 0..horizon {
                let v = model.add_var(
                    format!("w[{},{},{}]", other.id, slot + 1, t + 1),
                    f64::NEG_INFINITY,
                    f64::INFINITY,
                    VarKind::Continuous,
                );
                if other.id != zone.id && !zone.is_neighbor(other.id) {
                    model.fix(v, 0.0);
                }
                w_vars.insert((other.id, slot, t), v);
            }
        }
    }

    let transfer: Vec<VarId> = (0..horizon)
        .map(|t| {
            model.add_var(
                format!("transfer[{}]", t + 1),
                f64::NEG_INFINITY,
                f64::INFINITY,
                VarKind::Continuous,
            )
        })
        .collect();

    // Zonal balance: interior injections plus the transfer cancel.
    for (t, &tr) in transfer.iter().enumerate() {
        let mut expr = LinExpr::new().term(tr, 1.0);
        for &b in &zone.bus_interior {
            expr.add_term(uc.inj[&(b, t)], 1.0);
        }
        model.add_eq(expr, 0.0);
    }

    // Boundary aggregation: the zone's own boundary predictions sum to the
    // transfer.
    for (t, &tr) in transfer.iter().enumerate() {
        let mut expr = LinExpr::new().term(tr, -1.0);
        for slot in 0..zone.bus_boundary.len() {
            expr.add_term(w_vars[&(zone.id, slot, t)], 1.0);
        }
        model.add_eq(expr, 0.0);
    }

    // Cross-zone link: neighbor boundary predictions follow this zone's
    // interior injections through the neighbor's link matrix.
    for other in all_zones {
        if other.id == zone.id || !zone.is_neighbor(other.id) {
            continue;
        }
        for slot in 0..other.bus_boundary.len() {
            for t in 0..horizon {
                let mut expr = LinExpr::new().term(w_vars[&(other.id, slot, t)], 1.0);
                for &c in &zone.bus_interior {
                    let col = other.ext_index(c).ok_or_else(|| {
                        DucError::Partition(format!(
                            "{} missing from {}'s external list",
                            c, other.id
                        ))
                    })?;
                    expr.add_term(uc.inj[&(c, t)], other.link_base[slot][col]);
                }
                for (own_slot, &c) in zone.bus_boundary.iter().enumerate() {
                    if other.boundary_slot(c).is_some() {
                        continue;
                    }
                    let col = other.ext_index(c).ok_or_else(|| {
                        DucError::Partition(format!(
                            "{} missing from {}'s external list",
                            c, other.id
                        ))
                    })?;
                    expr.add_term(
                        w_vars[&(zone.id, own_slot, t)],
                        other.link_base[slot][col],
                    );
                }
                model.add_eq(expr, 0.0);
            }
        }
    }

    // Safety band, pinned at zero until screening loosens it.
    let mut e_max_vars = BTreeMap::new();
    let mut e_min_vars = BTreeMap::new();
    for &l in &zone.lines_internal {
        for t in 0..horizon {
            let e_max = model.add_var(format!("e_max[{},{}]", l, t + 1), 0.0, 0.0, VarKind::Continuous);
            let e_min = model.add_var(format!("e_min[{},{}]", l, t + 1), 0.0, 0.0, VarKind::Continuous);
            e_max_vars.insert((l, t), e_max);
            e_min_vars.insert((l, t), e_min);
        }
    }

    // Boundary exchange layout, identical on every worker: all zones'
    // w-slots, then this worker's transfer.
    let mut boundary = Vec::new();
    let mut weights = Vec::new();
    let small = zone.lines_internal.len() < SMALL_ZONE_LINES;
    for other in all_zones {
        let weight = if other.id == zone.id {
            1.0
        } else if small {
            1.0
        } else {
            0.0
        };
        for slot in 0..other.bus_boundary.len() {
            for t in 0..horizon {
                boundary.push(w_vars[&(other.id, slot, t)]);
                weights.push(weight);
            }
        }
    }
    for &tr in &transfer {
        boundary.push(tr);
        weights.push(1.0);
    }
    let targets = vec![0.0; boundary.len()];

    if relax {
        relax_integrality(model);
    }

    Ok(ZonalSubproblem {
        uc,
        zone_id: zone.id,
        boundary,
        weights,
        targets,
        w_vars,
        transfer,
        e_max_vars,
        e_min_vars,
    })
}

/// Drop integrality: binaries become continuous within `[0, 1]`,
/// intersected with any tighter bounds already in place.
pub fn relax_integrality(model: &mut Model) {
    for var in model.binary_vars() {
        let (lo, hi) = model.bounds(var);
        model.set_kind(var, VarKind::Continuous);
        model.set_bounds(var, lo.max(0.0), hi.min(1.0));
    }
}
