//! Branch-and-bound driver for mixed-integer quadratic programs.
//!
//! Depth-first search over the binary variables, bounding each node with
//! the Clarabel continuous relaxation. Branching picks the most fractional
//! binary; the child explored first follows the warm-start hint when one is
//! present, otherwise the relaxation's rounding. Exploration stops on node
//! budget, wall-clock deadline, or when the open-node bounds prove the
//! incumbent optimal within the configured relative gap.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::qp::solve_qp;
use crate::model::{Model, Solution, VarKind};
use crate::{SolveResult, SolveStatus, SolverError};

pub(crate) struct BranchBoundLimits {
    pub max_nodes: usize,
    pub int_tol: f64,
    pub mip_gap: f64,
    pub deadline: Option<Instant>,
}

struct Node {
    /// Bound overrides accumulated along the path from the root.
    fixings: Vec<(usize, f64)>,
    /// Relaxation objective of the parent, a valid lower bound here.
    bound: f64,
}

pub(crate) fn solve_miqp(
    model: &Model,
    verbose: bool,
    limits: &BranchBoundLimits,
) -> Result<SolveResult, SolverError> {
    let free_binaries: Vec<usize> = model
        .vars
        .iter()
        .enumerate()
        .filter(|(_, v)| v.kind == VarKind::Binary && v.lower < v.upper)
        .map(|(i, _)| i)
        .collect();

    if free_binaries.is_empty() {
        return solve_qp(model, verbose, remaining(limits.deadline));
    }

    // The relaxation template: binaries loosened to [0, 1] within their
    // current bounds. Node fixings are applied on top of a fresh clone.
    let mut relaxation = model.clone();
    for &j in &free_binaries {
        let var = &relaxation.vars[j];
        let lo = var.lower.max(0.0);
        let hi = var.upper.min(1.0);
        relaxation.vars[j].lower = lo;
        relaxation.vars[j].upper = hi;
    }

    let mut incumbent: Option<Solution> = None;
    let mut incumbent_obj = f64::INFINITY;
    let mut nodes = 0usize;
    let mut status = SolveStatus::Optimal;
    let mut stack = vec![Node {
        fixings: Vec::new(),
        bound: f64::NEG_INFINITY,
    }];

    while let Some(node) = stack.pop() {
        if let Some(deadline) = limits.deadline {
            if Instant::now() >= deadline {
                status = SolveStatus::TimeLimit;
                break;
            }
        }
        if nodes >= limits.max_nodes {
            status = SolveStatus::NodeLimit;
            break;
        }
        if node.bound >= prune_cutoff(incumbent_obj, limits.mip_gap) {
            continue;
        }
        nodes += 1;

        let mut sub = relaxation.clone();
        for &(j, v) in &node.fixings {
            sub.vars[j].lower = v;
            sub.vars[j].upper = v;
        }

        let relaxed = solve_qp(&sub, false, remaining(limits.deadline))?;
        let sol = match (relaxed.status, relaxed.solution) {
            (SolveStatus::Optimal, Some(sol)) | (SolveStatus::NumericalIssue, Some(sol)) => sol,
            (SolveStatus::Infeasible, _) => continue,
            (SolveStatus::Unbounded, _) => {
                if nodes == 1 {
                    return Ok(SolveResult {
                        status: SolveStatus::Unbounded,
                        solution: None,
                        gap: f64::INFINITY,
                        nodes,
                    });
                }
                continue;
            }
            (SolveStatus::TimeLimit, _) => {
                status = SolveStatus::TimeLimit;
                break;
            }
            _ => continue,
        };

        if sol.objective >= prune_cutoff(incumbent_obj, limits.mip_gap) {
            continue;
        }

        match most_fractional(&free_binaries, &sol, limits.int_tol) {
            None => {
                if sol.objective < incumbent_obj {
                    debug!(
                        objective = sol.objective,
                        nodes, "branch-and-bound incumbent improved"
                    );
                    incumbent_obj = sol.objective;
                    incumbent = Some(round_binaries(sol, &free_binaries));
                }
            }
            Some(j) => {
                let hint = model.vars[j]
                    .warm
                    .unwrap_or(sol.values[j])
                    .round()
                    .clamp(0.0, 1.0);
                let preferred = push_fixed(&node.fixings, j, hint, sol.objective);
                let other = push_fixed(&node.fixings, j, 1.0 - hint, sol.objective);
                // Depth-first: preferred child on top of the stack.
                stack.push(other);
                stack.push(preferred);
            }
        }
    }

    let open_bound = stack.iter().map(|n| n.bound).fold(f64::INFINITY, f64::min);
    let gap = match &incumbent {
        Some(_) if open_bound.is_finite() => {
            ((incumbent_obj - open_bound) / incumbent_obj.abs().max(1e-9)).max(0.0)
        }
        Some(_) => 0.0,
        None => f64::INFINITY,
    };

    if incumbent.is_none() && status == SolveStatus::Optimal {
        // Search exhausted without ever finding an integral point.
        status = SolveStatus::Infeasible;
    }

    Ok(SolveResult {
        status,
        solution: incumbent,
        gap,
        nodes,
    })
}

fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()).max(Duration::from_millis(1)))
}

fn prune_cutoff(incumbent_obj: f64, mip_gap: f64) -> f64 {
    if incumbent_obj.is_finite() {
        incumbent_obj - mip_gap * incumbent_obj.abs().max(1e-9)
    } else {
        f64::INFINITY
    }
}

fn most_fractional(binaries: &[usize], sol: &Solution, int_tol: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for &j in binaries {
        let v = sol.values[j];
        let frac = (v - v.round()).abs();
        if frac > int_tol {
            match best {
                Some((_, f)) if f >= frac => {}
                _ => best = Some((j, frac)),
            }
        }
    }
    best.map(|(j, _)| j)
}

/// Snap near-integral binaries exactly so downstream commitment logic sees
/// clean 0/1 values.
fn round_binaries(mut sol: Solution, binaries: &[usize]) -> Solution {
    for &j in binaries {
        sol.values[j] = sol.values[j].round();
    }
    sol
}

fn push_fixed(fixings: &[(usize, f64)], var: usize, value: f64, bound: f64) -> Node {
    let mut child = fixings.to_vec();
    child.push((var, value));
    Node {
        fixings: child,
        bound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LinExpr;

    fn limits() -> BranchBoundLimits {
        BranchBoundLimits {
            max_nodes: 10_000,
            int_tol: 1e-6,
            mip_gap: 1e-6,
            deadline: None,
        }
    }

    #[test]
    fn knapsack_picks_integer_optimum() {
        // max 5a + 4b + 3c  s.t.  2a + 3b + c <= 3, binaries
        // -> a = 1, c = 1, value 8
        let mut model = Model::new();
        let a = model.add_var("a", 0.0, 1.0, VarKind::Binary);
        let b = model.add_var("b", 0.0, 1.0, VarKind::Binary);
        let c = model.add_var("c", 0.0, 1.0, VarKind::Binary);
        model.set_linear_cost(a, -5.0);
        model.set_linear_cost(b, -4.0);
        model.set_linear_cost(c, -3.0);
        model.add_le(
            LinExpr::new().term(a, 2.0).term(b, 3.0).term(c, 1.0),
            3.0,
        );

        let result = solve_miqp(&model, false, &limits()).unwrap();
        assert_eq!(result.status, SolveStatus::Optimal);
        let sol = result.solution.unwrap();
        assert_eq!(sol.value(a), 1.0);
        assert_eq!(sol.value(b), 0.0);
        assert_eq!(sol.value(c), 1.0);
        assert!((sol.objective + 8.0).abs() < 1e-4);
    }

    #[test]
    fn quadratic_tracking_with_commitment() {
        // min (x - 1.6)^2 + 0.1 u,  0 <= x <= 2 u,  u binary.
        // u = 1 gives 0.1; u = 0 forces x = 0 and costs 2.56.
        let mut model = Model::new();
        let u = model.add_var("u", 0.0, 1.0, VarKind::Binary);
        let x = model.add_var("x", 0.0, 2.0, VarKind::Continuous);
        model.set_quadratic_cost(x, 2.0);
        model.set_linear_cost(x, -3.2);
        model.set_linear_cost(u, 0.1);
        model.set_objective_constant(1.6 * 1.6);
        model.add_le(LinExpr::new().term(x, 1.0).term(u, -2.0), 0.0);

        let result = solve_miqp(&model, false, &limits()).unwrap();
        let sol = result.solution.unwrap();
        assert_eq!(sol.value(u), 1.0);
        assert!((sol.value(x) - 1.6).abs() < 1e-4);
        assert!((sol.objective - 0.1).abs() < 1e-4);
    }

    #[test]
    fn infeasible_binaries_detected() {
        let mut model = Model::new();
        let a = model.add_var("a", 0.0, 1.0, VarKind::Binary);
        let b = model.add_var("b", 0.0, 1.0, VarKind::Binary);
        model.add_ge(LinExpr::new().term(a, 1.0).term(b, 1.0), 3.0);
        let result = solve_miqp(&model, false, &limits()).unwrap();
        assert_eq!(result.status, SolveStatus::Infeasible);
    }

    #[test]
    fn fixed_binaries_bypass_search() {
        let mut model = Model::new();
        let u = model.add_var("u", 1.0, 1.0, VarKind::Binary);
        let x = model.add_var("x", 0.0, 5.0, VarKind::Continuous);
        model.set_linear_cost(x, 1.0);
        model.add_ge(LinExpr::new().term(x, 1.0).term(u, -2.0), 0.0);
        let result = solve_miqp(&model, false, &limits()).unwrap();
        let sol = result.solution.unwrap();
        assert_eq!(result.nodes, 0);
        assert!((sol.value(x) - 2.0).abs() < 1e-5);
    }
}
