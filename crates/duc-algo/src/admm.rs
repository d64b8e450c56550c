//! Sharing-ADMM coordination across zone workers.
//!
//! Single-program multiple-data: every worker owns one subproblem and all
//! workers move in lockstep. Each iteration
//!
//! 1. minimizes the augmented local objective
//!    `f(x) + sum_g w_g lambda_g x_g + (rho/2) sum_g w_g (x_g - target_g)^2`,
//! 2. barriers,
//! 3. runs the post-solve callback (contingency screening),
//! 4. reduces objectives (sum), boundary values (mean), solve time (max),
//! 5. updates the worker-local duals `lambda_g += rho * target_g`,
//! 6. reports `||target||_2` as the consensus residual, and
//! 7. periodically grows the penalty.
//!
//! Because every boundary slot is the same physical quantity seen from
//! different workers with opposite signs (or a transfer share), a zero mean
//! is exactly inter-zonal consistency; `target` doubles as the
//! disagreement signal the duals integrate.
//!
//! ## Dual mode
//!
//! Iterations start in MIQP mode with integrality honored. When the
//! relative objective change stalls below `obj_change_tolerance` the
//! integer part has settled: binaries are rounded, fixed, and relaxed, and
//! iterations continue as cheap QPs that drive boundary consensus. When
//! the relative infeasibility improvement stalls in QP mode the integer
//! decision is reopened. Both transitions are computed from reduced
//! quantities, so every worker switches on the same iteration.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use duc_core::{Communicator, DucError, DucResult};
use duc_solver::{Solution, SolveStatus, SolverFactory, VarId, VarKind};

use crate::subproblem::Subproblem;

/// Coordinator parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmmParams {
    /// Initial penalty rho.
    pub penalty: f64,
    /// Penalty ceiling for the periodic update.
    pub penalty_max: f64,
    /// Multiplier applied every `penalty_update_interval` iterations.
    pub penalty_multiplier: f64,
    pub penalty_update_interval: usize,
    /// Relative objective change below which MIQP mode hands over to QP.
    pub obj_change_tolerance: f64,
    /// Relative infeasibility improvement below which QP mode reopens the
    /// integer decision.
    pub infeas_improv_tolerance: f64,
    /// Iterations before the feasibility stop is considered.
    pub min_iterations: usize,
    pub max_iterations: usize,
    /// Consensus residual under which the run counts as converged.
    pub min_feasibility: f64,
    /// Wall-clock budget in seconds, shared by all iterations.
    pub max_time_secs: f64,
}

impl Default for AdmmParams {
    fn default() -> Self {
        Self {
            penalty: 0.1,
            penalty_max: 1.0,
            penalty_multiplier: 1.1,
            penalty_update_interval: 100,
            obj_change_tolerance: 1e-3,
            infeas_improv_tolerance: 1e-3,
            min_iterations: 10,
            max_iterations: 1000,
            min_feasibility: 1e-3,
            max_time_secs: 900.0,
        }
    }
}

/// Why the coordinator stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    Converged,
    IterationLimit,
    TimeBudget,
    /// NaN appeared in the consensus target.
    NumericalBlowup,
}

/// Integer handling mode of the iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdmmMode {
    Miqp,
    Qp,
}

/// Final state of a sharing-ADMM run.
#[derive(Debug, Clone)]
pub struct AdmmResult {
    /// Sum of worker objectives at the last iteration.
    pub objective: f64,
    /// Worker-local dual vector.
    pub duals: Vec<f64>,
    /// Worker-local boundary values at the last usable solve.
    pub boundary: Vec<f64>,
    /// `||target||_2` at the last iteration.
    pub infeasibility: f64,
    pub iterations: usize,
    pub wall_time_secs: f64,
    pub stop: StopReason,
    /// The worker's last usable primal point, for solution extraction.
    pub solution: Solution,
}

/// Post-solve hook run by every worker every iteration, in lockstep.
///
/// The hook must be collectively uniform: any collective it invokes must be
/// invoked by every worker's hook in the same order.
pub type PostSolveCallback<'a, S> =
    dyn FnMut(&mut S, &Solution, &dyn Communicator) -> DucResult<()> + 'a;

/// Drive a subproblem to consensus with the rest of the worker team.
pub fn run_sharing_admm<S: Subproblem>(
    comm: &dyn Communicator,
    sub: &mut S,
    factory: &SolverFactory,
    params: &AdmmParams,
    mut callback: Option<&mut PostSolveCallback<'_, S>>,
) -> DucResult<AdmmResult> {
    let start = Instant::now();
    let n_workers = comm.size() as f64;
    let boundary: Vec<VarId> = sub.boundary_vars().to_vec();
    let weights: Vec<f64> = sub.weights().to_vec();
    let mut target: Vec<f64> = sub.initial_targets().to_vec();
    let mut lambda = vec![0.0; boundary.len()];

    let mut rho = params.penalty;
    let mut mode = AdmmMode::Miqp;
    let mut saved_binaries: Vec<(VarId, f64, f64)> = Vec::new();

    let mut current: Option<Solution> = None;
    let mut total_obj = f64::NAN;
    let mut infeas = f64::NAN;
    let mut prev_obj = f64::INFINITY;
    let mut prev_infeas = f64::INFINITY;
    let mut iterations = 0;
    let mut stop = StopReason::IterationLimit;

    let solver = factory.solver();

    for iter in 1..=params.max_iterations {
        iterations = iter;

        // Agree on the elapsed budget before anything else, so every
        // worker takes the same branch.
        let elapsed = comm.all_reduce_max(start.elapsed().as_secs_f64());
        let remaining = params.max_time_secs - elapsed;
        if remaining <= 0.0 {
            stop = StopReason::TimeBudget;
            break;
        }

        // Local solve of f + w.lambda.x + (rho/2) w (x - target)^2. In QP
        // mode the weights collapse to one.
        {
            let model = sub.model_mut();
            for (g, &v) in boundary.iter().enumerate() {
                let w = if mode == AdmmMode::Qp { 1.0 } else { weights[g] };
                model.set_linear_cost(v, w * (lambda[g] - rho * target[g]));
                model.set_quadratic_cost(v, rho * w);
            }
        }

        let solve_started = Instant::now();
        let time_limit = std::time::Duration::from_secs_f64(remaining);
        match solver.solve(sub.model(), Some(time_limit)) {
            Ok(result) if result.is_usable() => {
                let sol = result.solution.expect("usable result carries a point");
                sub.model_mut().set_warm_values(&sol.values);
                current = Some(sol);
            }
            Ok(result) => {
                // Includes the "finished but numerically suspect" case:
                // keep the previous iterate and move on.
                warn!(
                    status = ?result.status,
                    iter, "subproblem solve unusable, reusing previous iterate"
                );
                if result.status == SolveStatus::Infeasible && current.is_none() {
                    warn!(iter, "subproblem infeasible with no fallback iterate");
                }
            }
            Err(err) => {
                warn!(%err, iter, "subproblem solver failed, reusing previous iterate");
            }
        }
        let solve_secs = solve_started.elapsed().as_secs_f64();

        comm.barrier();

        // The callback runs on every worker regardless of local solve
        // health; its collectives must stay aligned across the team.
        if let Some(cb) = callback.as_mut() {
            let point = current.clone().unwrap_or_else(|| Solution {
                values: vec![0.0; sub.model().num_vars()],
                objective: 0.0,
            });
            if let Err(err) = cb(sub, &point, comm) {
                warn!(%err, iter, "post-solve callback failed");
            }
        }

        let local_obj = current
            .as_ref()
            .map(|sol| sol.value(sub.objective_var()))
            .unwrap_or(0.0);
        total_obj = comm.all_reduce_sum(local_obj);

        let mut reduced: Vec<f64> = match &current {
            Some(sol) => boundary.iter().map(|&v| sol.value(v)).collect(),
            None => vec![0.0; boundary.len()],
        };
        comm.all_reduce_sum_in_place(&mut reduced);
        for v in reduced.iter_mut() {
            *v /= n_workers;
        }
        target = reduced;

        let max_solve_secs = comm.all_reduce_max(solve_secs);

        if target.iter().any(|v| v.is_nan()) {
            warn!(iter, "NaN in consensus target; stopping and keeping the last stable result");
            stop = StopReason::NumericalBlowup;
            break;
        }

        for (l, &t) in lambda.iter_mut().zip(target.iter()) {
            *l += rho * t;
        }
        infeas = target.iter().map(|v| v * v).sum::<f64>().sqrt();

        info!(
            iter,
            mode = ?mode,
            objective = total_obj,
            infeasibility = infeas,
            rho,
            solve_secs = max_solve_secs,
            "admm iteration"
        );

        // Mode switches, decided from reduced quantities only.
        let rel_obj = (prev_obj - total_obj).abs() / total_obj.abs().max(1e-12);
        let rel_infeas = (prev_infeas - infeas).abs() / infeas.abs().max(1e-12);
        match mode {
            AdmmMode::Miqp if rel_obj < params.obj_change_tolerance => {
                mode = AdmmMode::Qp;
                saved_binaries = freeze_binaries(sub, current.as_ref());
                info!(iter, "objective stalled; switching to QP mode");
            }
            AdmmMode::Qp if rel_infeas < params.infeas_improv_tolerance => {
                mode = AdmmMode::Miqp;
                restore_binaries(sub, &saved_binaries);
                saved_binaries.clear();
                info!(iter, "consensus stalled; reopening the integer decision");
            }
            _ => {}
        }

        if iter >= params.min_iterations && infeas < params.min_feasibility {
            stop = StopReason::Converged;
            break;
        }

        if params.penalty_update_interval > 0 && iter % params.penalty_update_interval == 0 {
            rho = (rho * params.penalty_multiplier).min(params.penalty_max);
        }

        prev_obj = total_obj;
        prev_infeas = infeas;
    }

    let solution = current.ok_or_else(|| {
        DucError::Solver("no subproblem solve produced a usable iterate".into())
    })?;
    let final_boundary = boundary.iter().map(|&v| solution.value(v)).collect();

    Ok(AdmmResult {
        objective: total_obj,
        duals: lambda,
        boundary: final_boundary,
        infeasibility: infeas,
        iterations,
        wall_time_secs: start.elapsed().as_secs_f64(),
        stop,
        solution,
    })
}

/// MIQP -> QP: round every binary at its current value, drop the binary
/// attribute, and pin both bounds there. Returns what must be restored.
fn freeze_binaries<S: Subproblem>(
    sub: &mut S,
    current: Option<&Solution>,
) -> Vec<(VarId, f64, f64)> {
    let model = sub.model_mut();
    let mut saved = Vec::new();
    for var in model.binary_vars() {
        let (lo, hi) = model.bounds(var);
        saved.push((var, lo, hi));
        let value = current
            .map(|sol| sol.value(var).round().clamp(lo, hi))
            .unwrap_or(lo);
        model.set_kind(var, VarKind::Continuous);
        model.fix(var, value);
    }
    saved
}

/// QP -> MIQP: restore the binary attribute and the pre-freeze bounds.
fn restore_binaries<S: Subproblem>(sub: &mut S, saved: &[(VarId, f64, f64)]) {
    let model = sub.model_mut();
    for &(var, lo, hi) in saved {
        model.set_kind(var, VarKind::Binary);
        model.set_bounds(var, lo, hi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duc_core::SoloCommunicator;
    use duc_solver::{LinExpr, Model};

    /// Minimal subproblem: an explicit model plus boundary metadata.
    struct BoxSubproblem {
        model: Model,
        objective_var: VarId,
        boundary: Vec<VarId>,
        weights: Vec<f64>,
        targets: Vec<f64>,
    }

    impl Subproblem for BoxSubproblem {
        fn model(&self) -> &Model {
            &self.model
        }
        fn model_mut(&mut self) -> &mut Model {
            &mut self.model
        }
        fn objective_var(&self) -> VarId {
            self.objective_var
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

    fn solo_subproblem() -> BoxSubproblem {
        // f = x, x in [-1, 1]. With one worker the consensus mean is x
        // itself, so the duals must drive x to zero.
        let mut model = Model::new();
        let x = model.add_var("x", -1.0, 1.0, VarKind::Continuous);
        let obj = model.add_var("obj", f64::NEG_INFINITY, f64::INFINITY, VarKind::Continuous);
        model.set_linear_cost(obj, 1.0);
        model.add_eq(LinExpr::new().term(obj, -1.0).term(x, 1.0), 0.0);
        BoxSubproblem {
            model,
            objective_var: obj,
            boundary: vec![x],
            weights: vec![1.0],
            targets: vec![0.0],
        }
    }

    #[test]
    fn solo_worker_completes_and_reports_state() {
        let mut sub = solo_subproblem();
        let params = AdmmParams {
            penalty: 0.2,
            penalty_multiplier: 1.0,
            min_iterations: 5,
            max_iterations: 60,
            min_feasibility: 1e-6,
            ..AdmmParams::default()
        };
        let result = run_sharing_admm(
            &SoloCommunicator,
            &mut sub,
            &SolverFactory::default(),
            &params,
            None,
        )
        .unwrap();
        assert!(result.iterations >= params.min_iterations);
        assert!(result.boundary[0].is_finite());
        assert!(result.infeasibility.is_finite());
        assert_eq!(result.duals.len(), 1);
    }

    #[test]
    fn time_budget_stops_immediately() {
        let mut sub = solo_subproblem();
        let params = AdmmParams {
            max_time_secs: 0.0,
            ..AdmmParams::default()
        };
        let result = run_sharing_admm(
            &SoloCommunicator,
            &mut sub,
            &SolverFactory::default(),
            &params,
            None,
        );
        // Stopped before any solve: no usable iterate to report.
        assert!(result.is_err());
    }

    #[test]
    fn callback_runs_every_iteration() {
        let mut sub = solo_subproblem();
        let params = AdmmParams {
            penalty: 0.2,
            penalty_multiplier: 1.0,
            min_iterations: 3,
            max_iterations: 40,
            min_feasibility: 1e-3,
            ..AdmmParams::default()
        };
        let mut calls = 0usize;
        let mut cb = |_sub: &mut BoxSubproblem, _sol: &Solution, _comm: &dyn Communicator| {
            calls += 1;
            Ok(())
        };
        let result = run_sharing_admm(
            &SoloCommunicator,
            &mut sub,
            &SolverFactory::default(),
            &params,
            Some(&mut cb),
        )
        .unwrap();
        assert_eq!(calls, result.iterations);
    }
}
