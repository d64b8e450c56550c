//! Zone extraction: bus classification and link matrices.
//!
//! For a zone `z` every bus of the instance falls in exactly one of five
//! classes:
//!
//! | class | meaning |
//! |-------|---------|
//! | `BI`  | interior: touches lines of `z` only |
//! | `BIN` | boundary: touches lines of `z` and of another zone |
//! | `BN`  | single-zone bus of a neighboring zone |
//! | `BNE` | boundary bus between other zones |
//! | `BE`  | far external: single-zone bus of a non-neighbor |
//!
//! Two zones are neighbors iff they share a boundary bus.
//!
//! The **link matrices** characterize how external injections redistribute
//! onto the zone's boundary while keeping its internal-line flows
//! consistent: with the ISF re-slacked to the zone's first interior bus,
//! `link_base` is the least-squares solution `X` of
//! `ISF[L, BIN] X = ISF[L, EXT]`, of shape `|BIN| x |EXT|` where `EXT` is
//! `BN ++ BNE ++ BE`. Security mode adds one analogous matrix per
//! vulnerable external line, derived from the LODF-adjusted rows. Those
//! per-outage solves dominate extraction time and are backed by a disk
//! cache for zones with more than 100 external lines.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use faer::{prelude::*, solvers::PartialPivLu, Mat};
use tracing::debug;

use duc_core::{
    BusId, Communicator, DucError, DucResult, LineId, UnitCommitmentInstance, ZoneId,
};

use crate::cache::LinkCache;
use crate::sensitivity::{IsfMatrix, LodfMatrix};

/// Zones with more external lines than this cache their per-outage links.
const CACHE_THRESHOLD: usize = 100;

/// One zone of the partitioned network, with index-based references into
/// the owning instance.
#[derive(Debug, Clone)]
pub struct Zone {
    pub id: ZoneId,
    /// `BI`: buses touching only this zone's lines.
    pub bus_interior: Vec<BusId>,
    /// `BIN`: this zone's boundary buses, in boundary-slot order.
    pub bus_boundary: Vec<BusId>,
    /// `BN`: single-zone buses of neighboring zones.
    pub bus_neighbor: Vec<BusId>,
    /// `BNE`: boundary buses between other zones.
    pub bus_neighbor_multi: Vec<BusId>,
    /// `BE`: far-external buses.
    pub bus_far: Vec<BusId>,
    /// `BN ++ BNE ++ BE`; the column order of the link matrices.
    pub bus_external: Vec<BusId>,
    pub lines_internal: Vec<LineId>,
    pub lines_external: Vec<LineId>,
    /// Zone-neighborhood bit vector indexed by `zone.value() - 1`.
    pub neighbors: Vec<bool>,
    /// `|BIN| x |EXT|`.
    pub link_base: Vec<Vec<f64>>,
    /// Per vulnerable external line, same shape as `link_base`.
    pub link_outage: BTreeMap<LineId, Vec<Vec<f64>>>,
    ext_index: HashMap<BusId, usize>,
    boundary_index: HashMap<BusId, usize>,
}

impl Zone {
    pub fn is_neighbor(&self, other: ZoneId) -> bool {
        self.neighbors.get(other.idx()).copied().unwrap_or(false)
    }

    /// Column of `bus` in the link matrices.
    pub fn ext_index(&self, bus: BusId) -> Option<usize> {
        self.ext_index.get(&bus).copied()
    }

    /// Boundary-slot of `bus` in `BIN` order.
    pub fn boundary_slot(&self, bus: BusId) -> Option<usize> {
        self.boundary_index.get(&bus).copied()
    }
}

/// Buses incident to lines of at least two zones.
pub fn boundary_buses(instance: &UnitCommitmentInstance) -> Vec<BusId> {
    let zones_of = zones_per_bus(instance);
    instance
        .buses
        .iter()
        .filter(|b| zones_of[b.id.idx()].len() >= 2)
        .map(|b| b.id)
        .collect()
}

fn zones_per_bus(instance: &UnitCommitmentInstance) -> Vec<BTreeSet<ZoneId>> {
    let mut zones_of = vec![BTreeSet::new(); instance.buses.len()];
    for line in &instance.lines {
        zones_of[line.source.idx()].insert(line.zone);
        zones_of[line.target.idx()].insert(line.zone);
    }
    zones_of
}

/// Extract every zone of the instance, computing link matrices.
///
/// All workers extract all zones (each worker's subproblem references the
/// other zones' boundaries). Cached per-outage links are written by rank 0
/// only; every rank reads. The caller must barrier after extraction before
/// relying on cache entries written this run.
pub fn extract_zones(
    instance: &UnitCommitmentInstance,
    isf: &IsfMatrix,
    lodf: &LodfMatrix,
    security: bool,
    cache: Option<&LinkCache>,
    comm: &dyn Communicator,
) -> DucResult<Vec<Zone>> {
    let zone_ids = instance.zone_ids();
    let n_zones = zone_ids.last().map_or(0, |z| z.value());
    let zones_of = zones_per_bus(instance);

    // Neighborhood: zones sharing any boundary bus.
    let mut neighbor = vec![vec![false; n_zones]; n_zones];
    for set in &zones_of {
        if set.len() >= 2 {
            for &a in set {
                for &b in set {
                    if a != b {
                        neighbor[a.idx()][b.idx()] = true;
                    }
                }
            }
        }
    }

    zone_ids
        .iter()
        .map(|&id| extract_zone(instance, id, &zones_of, &neighbor[id.idx()], isf, lodf, security, cache, comm))
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn extract_zone(
    instance: &UnitCommitmentInstance,
    id: ZoneId,
    zones_of: &[BTreeSet<ZoneId>],
    neighbors: &[bool],
    isf: &IsfMatrix,
    lodf: &LodfMatrix,
    security: bool,
    cache: Option<&LinkCache>,
    comm: &dyn Communicator,
) -> DucResult<Zone> {
    let mut bus_interior = Vec::new();
    let mut bus_boundary = Vec::new();
    let mut bus_neighbor = Vec::new();
    let mut bus_neighbor_multi = Vec::new();
    let mut bus_far = Vec::new();

    for bus in &instance.buses {
        let zones = &zones_of[bus.id.idx()];
        let touches = zones.contains(&id);
        match (touches, zones.len()) {
            (true, 1) => bus_interior.push(bus.id),
            (true, _) => bus_boundary.push(bus.id),
            (false, 0) => bus_far.push(bus.id),
            (false, 1) => {
                let other = *zones.iter().next().expect("non-empty");
                if neighbors[other.idx()] {
                    bus_neighbor.push(bus.id);
                } else {
                    bus_far.push(bus.id);
                }
            }
            (false, _) => bus_neighbor_multi.push(bus.id),
        }
    }

    let mut lines_internal = Vec::new();
    let mut lines_external = Vec::new();
    for line in &instance.lines {
        if line.zone == id {
            lines_internal.push(line.id);
        } else {
            lines_external.push(line.id);
        }
    }

    let bus_external: Vec<BusId> = bus_neighbor
        .iter()
        .chain(&bus_neighbor_multi)
        .chain(&bus_far)
        .copied()
        .collect();
    let ext_index: HashMap<BusId, usize> = bus_external
        .iter()
        .enumerate()
        .map(|(i, &b)| (b, i))
        .collect();
    let boundary_index: HashMap<BusId, usize> = bus_boundary
        .iter()
        .enumerate()
        .map(|(i, &b)| (b, i))
        .collect();

    let mut zone = Zone {
        id,
        bus_interior,
        bus_boundary,
        bus_neighbor,
        bus_neighbor_multi,
        bus_far,
        bus_external,
        lines_internal,
        lines_external,
        neighbors: neighbors.to_vec(),
        link_base: Vec::new(),
        link_outage: BTreeMap::new(),
        ext_index,
        boundary_index,
    };

    compute_links(instance, &mut zone, isf, lodf, security, cache, comm)?;
    Ok(zone)
}

fn compute_links(
    instance: &UnitCommitmentInstance,
    zone: &mut Zone,
    isf: &IsfMatrix,
    lodf: &LodfMatrix,
    security: bool,
    cache: Option<&LinkCache>,
    comm: &dyn Communicator,
) -> DucResult<()> {
    let n_bnd = zone.bus_boundary.len();
    let n_ext = zone.bus_external.len();
    if n_ext == 0 || n_bnd == 0 {
        // Single-zone layouts have no external columns; every link matrix
        // is empty by construction.
        zone.link_base = vec![Vec::new(); n_bnd];
        return Ok(());
    }

    let first_interior = *zone.bus_interior.first().ok_or_else(|| {
        DucError::Partition(format!("{} has boundary buses but no interior", zone.id))
    })?;
    let mut isf_z = isf.clone();
    isf_z.change_slack(first_interior);

    let select = |row: &[f64], buses: &[BusId]| -> Vec<f64> {
        buses.iter().map(|b| row[b.idx()]).collect()
    };

    let base_rows: Vec<(Vec<f64>, Vec<f64>)> = zone
        .lines_internal
        .iter()
        .map(|&l| {
            let row = isf_z.row(l);
            (select(row, &zone.bus_boundary), select(row, &zone.bus_external))
        })
        .collect();
    zone.link_base = least_squares(&base_rows, n_bnd, n_ext)?;

    if !security {
        return Ok(());
    }

    let cache_enabled = cache.is_some() && zone.lines_external.len() > CACHE_THRESHOLD;
    let vulnerable_ext: Vec<LineId> = zone
        .lines_external
        .iter()
        .copied()
        .filter(|&l| instance.line(l).vulnerable)
        .collect();

    for outage in vulnerable_ext {
        if cache_enabled {
            if let Some(link) = cache.and_then(|c| c.read(&instance.name, zone.id, outage)) {
                zone.link_outage.insert(outage, link);
                continue;
            }
        }

        let outage_row = isf_z.row(outage).to_vec();
        let rows: Vec<(Vec<f64>, Vec<f64>)> = zone
            .lines_internal
            .iter()
            .map(|&l| {
                let factor = lodf.get(l, outage);
                let adjusted: Vec<f64> = isf_z
                    .row(l)
                    .iter()
                    .zip(&outage_row)
                    .map(|(&a, &o)| a + factor * o)
                    .collect();
                (
                    select(&adjusted, &zone.bus_boundary),
                    select(&adjusted, &zone.bus_external),
                )
            })
            .collect();
        let link = least_squares(&rows, n_bnd, n_ext)?;

        if cache_enabled && comm.rank() == 0 {
            if let Some(c) = cache {
                c.write(&instance.name, zone.id, outage, &link);
            }
        }
        zone.link_outage.insert(outage, link);
    }

    debug!(
        zone = zone.id.value(),
        boundary = n_bnd,
        external = n_ext,
        outage_links = zone.link_outage.len(),
        "zone links ready"
    );
    Ok(())
}

/// Solve the over-determined system `A X = B` by normal equations, where
/// the rows of `A` and `B` arrive paired per internal line.
fn least_squares(
    rows: &[(Vec<f64>, Vec<f64>)],
    n_cols_a: usize,
    n_cols_b: usize,
) -> DucResult<Vec<Vec<f64>>> {
    // Gram matrix A^T A and right-hand side A^T B.
    let mut gram = vec![vec![0.0; n_cols_a]; n_cols_a];
    let mut rhs = vec![vec![0.0; n_cols_b]; n_cols_a];
    for (a_row, b_row) in rows {
        for (i, &ai) in a_row.iter().enumerate() {
            if ai == 0.0 {
                continue;
            }
            for (j, &aj) in a_row.iter().enumerate() {
                gram[i][j] += ai * aj;
            }
            for (j, &bj) in b_row.iter().enumerate() {
                rhs[i][j] += ai * bj;
            }
        }
    }

    let gram_mat = Mat::from_fn(n_cols_a, n_cols_a, |i, j| gram[i][j]);
    let rhs_mat = Mat::from_fn(n_cols_a, n_cols_b, |i, j| rhs[i][j]);
    let lu = PartialPivLu::new(gram_mat.as_ref());
    let sol = lu.solve(&rhs_mat);

    let mut link = vec![vec![0.0; n_cols_b]; n_cols_a];
    for i in 0..n_cols_a {
        for j in 0..n_cols_b {
            let v = sol.read(i, j);
            if !v.is_finite() {
                return Err(DucError::Numerical(
                    "link least-squares system is singular".into(),
                ));
            }
            link[i][j] = v;
        }
    }
    Ok(link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensitivity::{build_isf, build_lodf};
    use crate::test_fixtures::two_zone_instance;
    use duc_core::SoloCommunicator;

    fn extract(
        instance: &UnitCommitmentInstance,
        security: bool,
    ) -> Vec<Zone> {
        let isf = build_isf(&instance.lines, instance.buses.len()).unwrap();
        let lodf = build_lodf(&isf, &instance.lines);
        extract_zones(instance, &isf, &lodf, security, None, &SoloCommunicator).unwrap()
    }

    #[test]
    fn five_way_classification_partitions_all_buses() {
        let instance = two_zone_instance();
        for zone in extract(&instance, false) {
            let count = zone.bus_interior.len()
                + zone.bus_boundary.len()
                + zone.bus_neighbor.len()
                + zone.bus_neighbor_multi.len()
                + zone.bus_far.len();
            assert_eq!(count, instance.buses.len());
        }
    }

    #[test]
    fn two_zone_layout_has_mutual_neighbors_and_no_far_buses() {
        let instance = two_zone_instance();
        let zones = extract(&instance, false);
        assert_eq!(zones.len(), 2);
        assert!(zones[0].is_neighbor(zones[1].id));
        assert!(zones[1].is_neighbor(zones[0].id));
        for zone in &zones {
            assert!(zone.bus_far.is_empty());
            assert!(zone.bus_neighbor_multi.is_empty());
            assert!(!zone.bus_boundary.is_empty());
        }
    }

    #[test]
    fn single_zone_has_empty_externals_and_links() {
        let mut instance = two_zone_instance();
        for line in &mut instance.lines {
            line.zone = ZoneId::new(1);
        }
        let zones = extract(&instance, true);
        assert_eq!(zones.len(), 1);
        let zone = &zones[0];
        assert!(zone.bus_external.is_empty());
        assert!(zone.lines_external.is_empty());
        assert!(zone.link_outage.is_empty());
        assert!(zone.link_base.iter().all(|row| row.is_empty()));
    }

    #[test]
    fn link_base_reproduces_internal_flows() {
        // The least-squares system is exactly determined when the internal
        // lines span the boundary block, so A * link == B must hold.
        let instance = two_zone_instance();
        let zones = extract(&instance, false);
        let isf = build_isf(&instance.lines, instance.buses.len()).unwrap();
        for zone in &zones {
            let mut isf_z = isf.clone();
            isf_z.change_slack(zone.bus_interior[0]);
            for &l in &zone.lines_internal {
                let row = isf_z.row(l);
                for (j, &ext) in zone.bus_external.iter().enumerate() {
                    let predicted: f64 = zone
                        .bus_boundary
                        .iter()
                        .enumerate()
                        .map(|(i, &bnd)| row[bnd.idx()] * zone.link_base[i][j])
                        .sum();
                    assert!(
                        (predicted - row[ext.idx()]).abs() < 1e-6,
                        "zone {} line {} ext {}: {} vs {}",
                        zone.id,
                        l,
                        ext,
                        predicted,
                        row[ext.idx()]
                    );
                }
            }
        }
    }

    #[test]
    fn security_mode_builds_outage_links_for_vulnerable_external_lines() {
        let instance = two_zone_instance();
        let zones = extract(&instance, true);
        for zone in &zones {
            let expected: Vec<LineId> = zone
                .lines_external
                .iter()
                .copied()
                .filter(|&l| instance.line(l).vulnerable)
                .collect();
            assert_eq!(zone.link_outage.len(), expected.len());
            for l in expected {
                let link = &zone.link_outage[&l];
                assert_eq!(link.len(), zone.bus_boundary.len());
            }
        }
    }
}
