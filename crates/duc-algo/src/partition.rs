//! Recursive zone partitioning of the bus/line graph.
//!
//! The network is split into balanced blocks with a small boundary by an
//! auxiliary MIP over three binary families: `is_int_line[l]` (line lands
//! in the interior half), `is_int_bus[b]`, and `is_bnd_bus[b]`. The
//! objective minimizes the number of boundary buses; a balance band keeps
//! the halves within `(0.5 +- eps) * L` lines of each other; buses that
//! carry generators can never be boundary.
//!
//! Splitting recurses over a stack of line sets: the external half of each
//! split receives a fresh zone id, and any half still larger than
//! `max_zone_size` goes back on the stack. When a bus becomes boundary its
//! demand is redistributed to its non-boundary neighbors and the bus is
//! forced interior for every later split, so demand is never counted on
//! both sides of a cut.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use duc_core::{BusId, DucError, DucResult, LineId, UnitCommitmentInstance, ZoneId};
use duc_solver::{LinExpr, Model, SolveStatus, SolverFactory, VarKind};

/// Error type for partitioning operations.
#[derive(Debug, Error)]
pub enum PartitionError {
    /// The auxiliary MIP admits no balanced cut.
    #[error("partitioning program is infeasible (balance tolerance {0})")]
    Infeasible(f64),

    /// The auxiliary MIP could not be solved to a usable point.
    #[error("partitioning program failed: {0}")]
    SolveFailed(String),
}

impl From<PartitionError> for DucError {
    fn from(err: PartitionError) -> Self {
        DucError::Partition(err.to_string())
    }
}

/// Partitioning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Balance tolerance eps in (0, 0.5): each half keeps between
    /// `(0.5 - eps) L` and `(0.5 + eps) L` lines.
    pub balance_tolerance: f64,
    /// MIP gap for the auxiliary program.
    pub mip_gap: f64,
    /// A zone whose line count is at or below this is left alone. Asking
    /// for a size that already covers the whole network skips
    /// decomposition entirely.
    pub max_zone_size: usize,
    /// Buses that must land in the interior of every split.
    pub forced_interior: Vec<BusId>,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            balance_tolerance: 0.25,
            mip_gap: 1e-4,
            max_zone_size: usize::MAX,
            forced_interior: Vec::new(),
        }
    }
}

impl PartitionConfig {
    /// Configuration that splits the network exactly once into two zones.
    pub fn two_zones(n_lines: usize, balance_tolerance: f64) -> Self {
        Self {
            balance_tolerance,
            // Both halves respect the band, so neither is re-split.
            max_zone_size: n_lines.max(1) - 1,
            ..Self::default()
        }
    }
}

struct Split {
    interior: Vec<LineId>,
    external: Vec<LineId>,
    boundary: Vec<BusId>,
}

/// Partition the instance in place: assigns `line.zone`, redistributes
/// boundary-bus demand, and returns the zone ids in ascending order.
pub fn partition(
    instance: &mut UnitCommitmentInstance,
    config: &PartitionConfig,
    factory: &SolverFactory,
) -> DucResult<Vec<ZoneId>> {
    for line in &mut instance.lines {
        line.zone = ZoneId::new(1);
    }
    if instance.lines.len() <= config.max_zone_size {
        return Ok(vec![ZoneId::new(1)]);
    }

    let mut forced_interior: HashSet<BusId> = config.forced_interior.iter().copied().collect();
    let mut stack: Vec<(ZoneId, Vec<LineId>)> = vec![(
        ZoneId::new(1),
        instance.lines.iter().map(|l| l.id).collect(),
    )];
    let mut next_zone = 2usize;
    let mut zones = vec![ZoneId::new(1)];

    while let Some((zone, line_set)) = stack.pop() {
        if line_set.len() <= config.max_zone_size {
            continue;
        }
        let split = split_line_set(instance, &line_set, &forced_interior, config, factory)?;
        info!(
            zone = zone.value(),
            interior = split.interior.len(),
            external = split.external.len(),
            boundary = split.boundary.len(),
            "zone split"
        );

        let external_zone = ZoneId::new(next_zone);
        next_zone += 1;
        zones.push(external_zone);
        for l in &split.external {
            instance.lines[l.idx()].zone = external_zone;
        }
        for &b in &split.boundary {
            redistribute_demand(instance, b);
            forced_interior.insert(b);
        }

        stack.push((zone, split.interior));
        stack.push((external_zone, split.external));
    }

    zones.sort_unstable();
    Ok(zones)
}

/// Zero the demand of every current boundary bus, redistributing it to
/// the neighbors. Applied when zone assignments come from the instance
/// file instead of the partitioner, which enforces this itself.
pub fn normalize_boundary_demand(instance: &mut UnitCommitmentInstance) {
    for bus in crate::zones::boundary_buses(instance) {
        redistribute_demand(instance, bus);
    }
}

/// Solve the balanced-cut MIP for one line set.
fn split_line_set(
    instance: &UnitCommitmentInstance,
    line_set: &[LineId],
    forced_interior: &HashSet<BusId>,
    config: &PartitionConfig,
    factory: &SolverFactory,
) -> DucResult<Split> {
    let mut model = Model::new();

    let mut line_var = BTreeMap::new();
    for &l in line_set {
        line_var.insert(l, model.add_var(format!("int_{}", l), 0.0, 1.0, VarKind::Binary));
    }

    // Buses incident to the set, with their incident lines inside the set.
    let mut incident: BTreeMap<BusId, Vec<LineId>> = BTreeMap::new();
    for &l in line_set {
        let line = instance.line(l);
        incident.entry(line.source).or_default().push(l);
        incident.entry(line.target).or_default().push(l);
    }

    let gen_buses: BTreeSet<BusId> = instance.generators.iter().map(|g| g.bus).collect();

    let mut int_bus_var = BTreeMap::new();
    let mut bnd_bus_var = BTreeMap::new();
    for (&b, _) in &incident {
        let int_var = model.add_var(format!("intbus_{}", b), 0.0, 1.0, VarKind::Binary);
        let bnd_var = model.add_var(format!("bndbus_{}", b), 0.0, 1.0, VarKind::Binary);
        if gen_buses.contains(&b) {
            model.fix(bnd_var, 0.0);
        }
        if forced_interior.contains(&b) {
            model.fix(int_var, 1.0);
            model.fix(bnd_var, 0.0);
        }
        model.set_linear_cost(bnd_var, 1.0);
        // Tiny cost keeps the relaxation's bus side-assignments at a
        // vertex, which keeps branching on the line variables only.
        model.set_linear_cost(int_var, 1e-4);
        int_bus_var.insert(b, int_var);
        bnd_bus_var.insert(b, bnd_var);
    }

    for (&b, lines) in &incident {
        let bnd = bnd_bus_var[&b];
        let int_bus = int_bus_var[&b];

        // Two lines at the same bus that disagree force the bus boundary.
        for (i, &l1) in lines.iter().enumerate() {
            for &l2 in &lines[i + 1..] {
                let (x1, x2) = (line_var[&l1], line_var[&l2]);
                model.add_le(
                    LinExpr::new().term(x1, 1.0).term(x2, -1.0).term(bnd, -1.0),
                    0.0,
                );
                model.add_le(
                    LinExpr::new().term(x2, 1.0).term(x1, -1.0).term(bnd, -1.0),
                    0.0,
                );
            }
        }

        // A non-boundary bus follows the side of its lines.
        for &l in lines {
            let x = line_var[&l];
            model.add_ge(
                LinExpr::new()
                    .term(int_bus, 1.0)
                    .term(bnd, 1.0)
                    .term(x, -1.0),
                0.0,
            );
            model.add_le(
                LinExpr::new()
                    .term(int_bus, 1.0)
                    .term(bnd, -1.0)
                    .term(x, -1.0),
                0.0,
            );
        }
    }

    let eps = config.balance_tolerance;
    let total = line_set.len() as f64;
    let mut balance = LinExpr::new();
    for &l in line_set {
        balance.add_term(line_var[&l], 1.0);
    }
    model.add_range(balance, (0.5 - eps) * total, (0.5 + eps) * total);

    let split_factory = SolverFactory {
        mip_gap: config.mip_gap,
        ..factory.clone()
    };
    let result = split_factory
        .solver()
        .solve(&model, None)
        .map_err(|e| PartitionError::SolveFailed(e.to_string()))?;

    if result.status == SolveStatus::Infeasible {
        return Err(PartitionError::Infeasible(eps).into());
    }
    let solution = result
        .best()
        .ok_or_else(|| PartitionError::SolveFailed(format!("status {:?}", result.status)))?;

    let mut interior = Vec::new();
    let mut external = Vec::new();
    for &l in line_set {
        if solution.value(line_var[&l]) > 0.5 {
            interior.push(l);
        } else {
            external.push(l);
        }
    }

    // Boundary buses derived from the cut itself: incident to both halves.
    let interior_set: HashSet<LineId> = interior.iter().copied().collect();
    let boundary = incident
        .iter()
        .filter(|(_, lines)| {
            let on_interior = lines.iter().any(|l| interior_set.contains(l));
            let on_external = lines.iter().any(|l| !interior_set.contains(l));
            on_interior && on_external
        })
        .map(|(&b, _)| b)
        .collect();

    Ok(Split {
        interior,
        external,
        boundary,
    })
}

/// Move a newly boundary bus's demand onto its neighbors, split equally,
/// then zero it. Total system demand is conserved.
fn redistribute_demand(instance: &mut UnitCommitmentInstance, bus: BusId) {
    let receivers: Vec<BusId> = instance
        .lines
        .iter()
        .filter_map(|l| {
            if l.source == bus {
                Some(l.target)
            } else if l.target == bus {
                Some(l.source)
            } else {
                None
            }
        })
        .filter(|&n| n != bus)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if receivers.is_empty() {
        return;
    }

    let demand = std::mem::replace(
        &mut instance.buses[bus.idx()].demand,
        vec![0.0; instance.time_horizon],
    );
    let share = 1.0 / receivers.len() as f64;
    for &r in &receivers {
        for (t, &d) in demand.iter().enumerate() {
            instance.buses[r.idx()].demand[t] += d * share;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::ladder_instance;

    #[test]
    fn oversized_limit_skips_decomposition() {
        let mut instance = ladder_instance(6, 1);
        let config = PartitionConfig::default();
        let zones = partition(&mut instance, &config, &SolverFactory::default()).unwrap();
        assert_eq!(zones, vec![ZoneId::new(1)]);
        assert!(instance.lines.iter().all(|l| l.zone == ZoneId::new(1)));
    }

    #[test]
    fn two_zone_split_is_balanced_and_complete() {
        let mut instance = ladder_instance(6, 1);
        let n_lines = instance.lines.len();
        let eps = 0.25;
        let config = PartitionConfig::two_zones(n_lines, eps);
        let zones = partition(&mut instance, &config, &SolverFactory::default()).unwrap();
        assert_eq!(zones.len(), 2);

        let interior = instance
            .lines
            .iter()
            .filter(|l| l.zone == ZoneId::new(1))
            .count();
        let half = n_lines as f64 / 2.0;
        assert!(
            (interior as f64 - half).abs() <= eps * n_lines as f64 + 1e-9,
            "balance violated: {} of {}",
            interior,
            n_lines
        );
    }

    #[test]
    fn boundary_buses_lose_their_demand_but_total_is_conserved() {
        let mut instance = ladder_instance(6, 1);
        let total_before: f64 = instance.total_demand(0);
        let config = PartitionConfig::two_zones(instance.lines.len(), 0.25);
        partition(&mut instance, &config, &SolverFactory::default()).unwrap();

        let boundary = crate::zones::boundary_buses(&instance);
        assert!(!boundary.is_empty());
        for b in &boundary {
            assert!(instance.bus(*b).demand.iter().all(|&d| d == 0.0));
        }
        let total_after: f64 = instance.total_demand(0);
        assert!((total_before - total_after).abs() < 1e-9);
    }

    #[test]
    fn generator_buses_never_become_boundary() {
        let mut instance = ladder_instance(6, 2);
        let config = PartitionConfig::two_zones(instance.lines.len(), 0.25);
        partition(&mut instance, &config, &SolverFactory::default()).unwrap();
        let boundary = crate::zones::boundary_buses(&instance);
        for gen in &instance.generators {
            assert!(
                !boundary.contains(&gen.bus),
                "{} sits on boundary {}",
                gen.id,
                gen.bus
            );
        }
    }

    #[test]
    fn partitioning_is_deterministic() {
        let config = PartitionConfig::two_zones(6, 0.25);
        let mut a = ladder_instance(6, 2);
        let mut b = ladder_instance(6, 2);
        partition(&mut a, &config, &SolverFactory::default()).unwrap();
        partition(&mut b, &config, &SolverFactory::default()).unwrap();
        let zones_a: Vec<_> = a.lines.iter().map(|l| l.zone).collect();
        let zones_b: Vec<_> = b.lines.iter().map(|l| l.zone).collect();
        assert_eq!(zones_a, zones_b);
    }
}
