//! Iterative contingency screening.
//!
//! Runs inside the ADMM iteration as the post-solve callback. Under the
//! current injection values it finds the single worst transmission
//! violation per period, pre- or post-contingency, and appends a flow
//! constraint for it to the worker's local subproblem. Lazy generation is
//! what keeps N-1 security tractable: the candidate set is O(L^2) per
//! period but only a handful of pairs ever bind.
//!
//! In security mode the callback also maintains the *safety band*
//! `e_max`/`e_min`: bounds on how much flow external-zone outages can push
//! onto this zone's internal lines. The band is recomputed from the
//! all-reduced injection vector whenever the implied boundary injections
//! move by more than [`BAND_TRIGGER`].
//!
//! Every added constraint is keyed by `(period, monitored, outage)` and
//! added at most once per run. `outage == monitored` encodes the
//! pre-contingency case.

use std::collections::HashSet;

use rayon::prelude::*;
use tracing::debug;

use duc_core::{Communicator, DucError, DucResult, LineId, UnitCommitmentInstance};
use duc_solver::{LinExpr, Solution, VarKind};

use crate::sensitivity::{IsfMatrix, LodfMatrix};
use crate::subproblem::{Subproblem, ZonalSubproblem};
use crate::zones::Zone;

/// Boundary-injection movement that forces a safety-band recompute, and
/// the outage-difference magnitude worth keeping, both in MW.
const BAND_TRIGGER: f64 = 10.0;

/// Violations smaller than this are ignored.
const VIOLATION_TOLERANCE: f64 = 1e-3;

/// A transmission-capacity violation. `outage == monitored` marks a
/// pre-contingency (base-case) violation.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    /// 0-based period.
    pub time: usize,
    pub monitored: LineId,
    pub outage: LineId,
    /// MW above the limit.
    pub amount: f64,
    pub limit: f64,
}

impl Violation {
    pub fn is_pre_contingency(&self) -> bool {
        self.monitored == self.outage
    }
}

/// Per-worker screening state.
pub struct ScreeningContext {
    zone: Zone,
    security: bool,
    horizon: usize,
    n_buses: usize,
    /// Rows per internal line over the interior buses, zone-slack form.
    isf_int: Vec<Vec<f64>>,
    /// Rows per internal line over the boundary buses, zone-slack form.
    isf_bnd: Vec<Vec<f64>>,
    /// LODF restricted to internal lines.
    lodf_int: Vec<Vec<f64>>,
    normal_limits: Vec<f64>,
    vulnerable_int: Vec<bool>,
    prev_w_base: Vec<Vec<f64>>,
    added: HashSet<(usize, LineId, LineId)>,
    /// Constraints generated so far, in generation order.
    pub violations: Vec<Violation>,
}

impl ScreeningContext {
    /// Precompute the zone-sliced sensitivity blocks.
    ///
    /// Security screening is only supported for two-zone layouts; the
    /// outage link machinery looks general but has never been validated
    /// beyond two zones, so wider layouts are refused outright.
    pub fn new(
        instance: &UnitCommitmentInstance,
        zone: &Zone,
        isf: &IsfMatrix,
        lodf: &LodfMatrix,
        security: bool,
    ) -> DucResult<Self> {
        let n_zones = instance.zone_ids().len();
        if security && n_zones > 2 {
            return Err(DucError::Config(format!(
                "security screening supports at most 2 zones, instance has {}",
                n_zones
            )));
        }

        let mut isf_z = isf.clone();
        if let Some(&first_interior) = zone.bus_interior.first() {
            isf_z.change_slack(first_interior);
        }

        let slice = |line: LineId, buses: &[duc_core::BusId]| -> Vec<f64> {
            let row = isf_z.row(line);
            buses.iter().map(|b| row[b.idx()]).collect()
        };
        let isf_int: Vec<Vec<f64>> = zone
            .lines_internal
            .iter()
            .map(|&l| slice(l, &zone.bus_interior))
            .collect();
        let isf_bnd: Vec<Vec<f64>> = zone
            .lines_internal
            .iter()
            .map(|&l| slice(l, &zone.bus_boundary))
            .collect();
        let lodf_int: Vec<Vec<f64>> = zone
            .lines_internal
            .iter()
            .map(|&m| {
                zone.lines_internal
                    .iter()
                    .map(|&c| lodf.get(m, c))
                    .collect()
            })
            .collect();
        let normal_limits = zone
            .lines_internal
            .iter()
            .map(|&l| instance.line(l).normal_limit)
            .collect();
        let vulnerable_int = zone
            .lines_internal
            .iter()
            .map(|&l| instance.line(l).vulnerable)
            .collect();

        Ok(Self {
            zone: zone.clone(),
            security,
            horizon: instance.time_horizon,
            n_buses: instance.buses.len(),
            isf_int,
            isf_bnd,
            lodf_int,
            normal_limits,
            vulnerable_int,
            prev_w_base: vec![Vec::new(); instance.time_horizon],
            added: HashSet::new(),
            violations: Vec::new(),
        })
    }

    /// One screening pass: update the safety band (security mode), find
    /// the worst violation per period, and add constraints for those above
    /// tolerance. Returns how many constraints were added.
    ///
    /// Collective structure is unconditional: in security mode every
    /// worker performs exactly one all-reduce here, every iteration.
    pub fn screen(
        &mut self,
        sub: &mut ZonalSubproblem,
        sol: &Solution,
        comm: &dyn Communicator,
    ) -> DucResult<usize> {
        if self.security {
            self.update_safety_band(sub, sol, comm);
        }

        let candidates = self.worst_violations(sub, sol);
        let mut added = 0;
        for violation in candidates {
            if violation.amount <= VIOLATION_TOLERANCE {
                continue;
            }
            let key = (violation.time, violation.monitored, violation.outage);
            if !self.added.insert(key) {
                continue;
            }
            self.add_flow_constraint(sub, &violation);
            debug!(
                t = violation.time + 1,
                monitored = violation.monitored.value(),
                outage = violation.outage.value(),
                amount = violation.amount,
                "flow constraint added"
            );
            self.violations.push(violation);
            added += 1;
        }
        Ok(added)
    }

    /// All-reduce the interior injections so every worker sees the full
    /// vector, then refresh `e_max`/`e_min` where the implied boundary
    /// injections moved.
    fn update_safety_band(
        &mut self,
        sub: &mut ZonalSubproblem,
        sol: &Solution,
        comm: &dyn Communicator,
    ) {
        let horizon = self.horizon;
        let mut inj = vec![0.0; self.n_buses * horizon];
        for &b in &self.zone.bus_interior {
            for t in 0..horizon {
                inj[b.idx() * horizon + t] = sol.value(sub.uc.inj[&(b, t)]);
            }
        }
        comm.all_reduce_sum_in_place(&mut inj);

        for t in 0..horizon {
            let inj_ext: Vec<f64> = self
                .zone
                .bus_external
                .iter()
                .map(|b| inj[b.idx() * horizon + t])
                .collect();
            let w_base = mat_vec(&self.zone.link_base, &inj_ext);

            let moved = if self.prev_w_base[t].len() == w_base.len() {
                norm2_diff(&w_base, &self.prev_w_base[t]) > BAND_TRIGGER
            } else {
                true
            };
            if !moved || self.zone.link_outage.is_empty() {
                continue;
            }

            // Boundary-injection shifts caused by each external outage.
            let diffs: Vec<Vec<f64>> = self
                .zone
                .link_outage
                .values()
                .filter_map(|link| {
                    let w_outage = mat_vec(link, &inj_ext);
                    let diff: Vec<f64> = w_base
                        .iter()
                        .zip(&w_outage)
                        .map(|(a, b)| a - b)
                        .collect();
                    if norm2(&diff) > BAND_TRIGGER {
                        Some(diff)
                    } else {
                        None
                    }
                })
                .collect();

            for (idx, &line) in self.zone.lines_internal.iter().enumerate() {
                let mut hi = 0.0f64;
                let mut lo = 0.0f64;
                for diff in &diffs {
                    let shift: f64 = self.isf_bnd[idx]
                        .iter()
                        .zip(diff)
                        .map(|(a, b)| a * b)
                        .sum();
                    hi = hi.max(shift);
                    lo = lo.min(shift);
                }
                let e_max = sub.e_max_vars[&(line, t)];
                let e_min = sub.e_min_vars[&(line, t)];
                let model = sub.model_mut();
                model.fix(e_max, hi);
                model.fix(e_min, lo);
            }
            self.prev_w_base[t] = w_base;
        }
    }

    /// The single worst candidate per period, scanned in parallel.
    fn worst_violations(&self, sub: &ZonalSubproblem, sol: &Solution) -> Vec<Violation> {
        (0..self.horizon)
            .into_par_iter()
            .filter_map(|t| self.worst_violation_at(sub, sol, t))
            .collect()
    }

    fn worst_violation_at(
        &self,
        sub: &ZonalSubproblem,
        sol: &Solution,
        t: usize,
    ) -> Option<Violation> {
        let inj_int: Vec<f64> = self
            .zone
            .bus_interior
            .iter()
            .map(|&b| sol.value(sub.uc.inj[&(b, t)]))
            .collect();
        let inj_bnd: Vec<f64> = (0..self.zone.bus_boundary.len())
            .map(|slot| sol.value(sub.w_vars[&(self.zone.id, slot, t)]))
            .collect();

        let pre_flow: Vec<f64> = (0..self.zone.lines_internal.len())
            .map(|idx| {
                dot(&self.isf_int[idx], &inj_int) + dot(&self.isf_bnd[idx], &inj_bnd)
            })
            .collect();

        let mut worst: Option<Violation> = None;
        let mut consider = |candidate: Violation| {
            if candidate.amount > VIOLATION_TOLERANCE
                && worst.as_ref().map_or(true, |w| candidate.amount > w.amount)
            {
                worst = Some(candidate);
            }
        };

        for (idx, &line) in self.zone.lines_internal.iter().enumerate() {
            let limit = self.normal_limits[idx];
            let (e_max, _) = sub.model().bounds(sub.e_max_vars[&(line, t)]);
            let (e_min, _) = sub.model().bounds(sub.e_min_vars[&(line, t)]);
            let amount = (pre_flow[idx] - limit + e_max).max(-pre_flow[idx] - limit - e_min);
            consider(Violation {
                time: t,
                monitored: line,
                outage: line,
                amount,
                limit,
            });
        }

        if self.security {
            for (c_idx, &outage) in self.zone.lines_internal.iter().enumerate() {
                if !self.vulnerable_int[c_idx] {
                    continue;
                }
                for (m_idx, &monitored) in self.zone.lines_internal.iter().enumerate() {
                    if m_idx == c_idx {
                        continue;
                    }
                    let post =
                        pre_flow[m_idx] + self.lodf_int[m_idx][c_idx] * pre_flow[c_idx];
                    let limit = self.normal_limits[m_idx];
                    let amount = (post - limit).max(-post - limit);
                    consider(Violation {
                        time: t,
                        monitored,
                        outage,
                        amount,
                        limit,
                    });
                }
            }
        }

        worst
    }

    /// Materialize a violation as a monitored-flow variable plus limit
    /// rows on the local model.
    fn add_flow_constraint(&self, sub: &mut ZonalSubproblem, violation: &Violation) {
        let t = violation.time;
        let limit = violation.limit;
        let mon_idx = self.internal_index(violation.monitored);

        let flow_mon = self.flow_variable(sub, violation.monitored, mon_idx, t);

        if violation.is_pre_contingency() {
            let e_max = sub.e_max_vars[&(violation.monitored, t)];
            let e_min = sub.e_min_vars[&(violation.monitored, t)];
            let model = sub.model_mut();
            model.add_le(LinExpr::new().term(flow_mon, 1.0).term(e_max, 1.0), limit);
            model.add_ge(LinExpr::new().term(flow_mon, 1.0).term(e_min, 1.0), -limit);
        } else {
            let out_idx = self.internal_index(violation.outage);
            let flow_out = self.flow_variable(sub, violation.outage, out_idx, t);
            let factor = self.lodf_int[mon_idx][out_idx];
            sub.model_mut().add_range(
                LinExpr::new().term(flow_mon, 1.0).term(flow_out, factor),
                -limit,
                limit,
            );
        }
    }

    /// A fresh variable equal to the line's flow expression at period `t`.
    fn flow_variable(
        &self,
        sub: &mut ZonalSubproblem,
        line: LineId,
        idx: usize,
        t: usize,
    ) -> duc_solver::VarId {
        let zone_id = self.zone.id;
        let interior = self.zone.bus_interior.clone();
        let n_bnd = self.zone.bus_boundary.len();
        let isf_int_row = self.isf_int[idx].clone();
        let isf_bnd_row = self.isf_bnd[idx].clone();

        let inj_terms: Vec<_> = interior
            .iter()
            .enumerate()
            .map(|(i, &b)| (sub.uc.inj[&(b, t)], isf_int_row[i]))
            .collect();
        let w_terms: Vec<_> = (0..n_bnd)
            .map(|slot| (sub.w_vars[&(zone_id, slot, t)], isf_bnd_row[slot]))
            .collect();

        let model = sub.model_mut();
        let flow = model.add_var(
            format!("flow[{},{}]", line, t + 1),
            f64::NEG_INFINITY,
            f64::INFINITY,
            VarKind::Continuous,
        );
        let mut expr = LinExpr::new().term(flow, -1.0);
        for (v, c) in inj_terms.into_iter().chain(w_terms) {
            expr.add_term(v, c);
        }
        model.add_eq(expr, 0.0);
        flow
    }

    fn internal_index(&self, line: LineId) -> usize {
        self.zone
            .lines_internal
            .iter()
            .position(|&l| l == line)
            .expect("violations only reference internal lines")
    }

    /// Violations recorded for the first period, for solution reporting.
    pub fn first_period_violations(&self) -> Vec<&Violation> {
        self.violations.iter().filter(|v| v.time == 0).collect()
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn mat_vec(m: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    m.iter().map(|row| dot(row, v)).collect()
}

fn norm2(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

fn norm2_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}
