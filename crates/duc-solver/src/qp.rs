//! Continuous QP backend on Clarabel.
//!
//! Clarabel solves the conic program
//! ```text
//!   minimize    (1/2) x'Px + q'x
//!   subject to  Ax + s = b,  s in K
//! ```
//! with a primal-dual interior-point method. We map the model onto a Zero
//! cone block for equalities (including fixed variables) followed by a
//! Nonnegative cone block for inequalities and finite variable bounds.
//! Integrality is ignored here; the branch-and-bound driver owns it.

use std::time::Duration;

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus, SupportedConeT,
};

use crate::model::{Model, Solution};
use crate::{SolveResult, SolveStatus, SolverError};

/// Solve the continuous relaxation of `model` with current bounds,
/// treating every variable as continuous.
pub(crate) fn solve_qp(
    model: &Model,
    verbose: bool,
    time_limit: Option<Duration>,
) -> Result<SolveResult, SolverError> {
    let n_var = model.num_vars();

    // Rows in Ax + s = b. Equalities first (Zero cone), then all
    // upper-bounded forms a'x <= u rewritten from ranges, >=, and bounds
    // (Nonnegative cone).
    let mut eq_rows: Vec<(Vec<(usize, f64)>, f64)> = Vec::new();
    let mut le_rows: Vec<(Vec<(usize, f64)>, f64)> = Vec::new();

    for row in model.rows.iter().filter(|r| r.active) {
        if row.lower == row.upper {
            eq_rows.push((row.terms.clone(), row.lower));
            continue;
        }
        if row.upper.is_finite() {
            le_rows.push((row.terms.clone(), row.upper));
        }
        if row.lower.is_finite() {
            let negated: Vec<(usize, f64)> = row.terms.iter().map(|&(v, c)| (v, -c)).collect();
            le_rows.push((negated, -row.lower));
        }
    }

    for (j, var) in model.vars.iter().enumerate() {
        if var.lower == var.upper {
            eq_rows.push((vec![(j, 1.0)], var.lower));
            continue;
        }
        if var.upper.is_finite() {
            le_rows.push((vec![(j, 1.0)], var.upper));
        }
        if var.lower.is_finite() {
            le_rows.push((vec![(j, -1.0)], -var.lower));
        }
    }

    let n_eq = eq_rows.len();
    let n_le = le_rows.len();
    let n_rows = n_eq + n_le;

    // Accumulate entries column-wise, then convert to CSC.
    let mut cols: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n_var];
    let mut rhs = Vec::with_capacity(n_rows);
    for (i, (terms, b)) in eq_rows.iter().chain(le_rows.iter()).enumerate() {
        for &(v, c) in terms {
            cols[v].push((i, c));
        }
        rhs.push(*b);
    }

    let mut col_ptr = Vec::with_capacity(n_var + 1);
    let mut row_idx = Vec::new();
    let mut values = Vec::new();
    let mut nnz = 0usize;
    for col in cols.iter_mut() {
        col_ptr.push(nnz);
        col.sort_by_key(|&(r, _)| r);
        for &(r, v) in col.iter() {
            row_idx.push(r);
            values.push(v);
            nnz += 1;
        }
    }
    col_ptr.push(nnz);
    let a_mat = CscMatrix::new(n_rows, n_var, col_ptr, row_idx, values);

    // Diagonal P from the quadratic coefficients.
    let mut p_col_ptr = Vec::with_capacity(n_var + 1);
    let mut p_row_idx = Vec::new();
    let mut p_values = Vec::new();
    let mut p_nnz = 0usize;
    for (j, var) in model.vars.iter().enumerate() {
        p_col_ptr.push(p_nnz);
        if var.obj_quad != 0.0 {
            p_row_idx.push(j);
            p_values.push(var.obj_quad);
            p_nnz += 1;
        }
    }
    p_col_ptr.push(p_nnz);
    let p_mat = CscMatrix::new(n_var, n_var, p_col_ptr, p_row_idx, p_values);

    let q: Vec<f64> = model.vars.iter().map(|v| v.obj_lin).collect();

    let mut cones: Vec<SupportedConeT<f64>> = Vec::new();
    if n_eq > 0 {
        cones.push(SupportedConeT::ZeroConeT(n_eq));
    }
    if n_le > 0 {
        cones.push(SupportedConeT::NonnegativeConeT(n_le));
    }

    let settings = DefaultSettingsBuilder::default()
        .verbose(verbose)
        .time_limit(
            time_limit
                .map(|d| d.as_secs_f64().max(1e-3))
                .unwrap_or(f64::INFINITY),
        )
        .build()
        .map_err(|e| SolverError::BadModel(format!("solver settings rejected: {:?}", e)))?;

    let mut solver = DefaultSolver::new(&p_mat, &q, &a_mat, &rhs, &cones, settings);
    solver.solve();

    let sol = solver.solution;
    let point = || {
        let values: Vec<f64> = sol.x.clone();
        let objective = model.objective_value(&values);
        Solution { values, objective }
    };

    let result = match sol.status {
        SolverStatus::Solved => SolveResult {
            status: SolveStatus::Optimal,
            solution: Some(point()),
            gap: 0.0,
            nodes: 0,
        },
        SolverStatus::AlmostSolved | SolverStatus::MaxIterations => SolveResult {
            status: SolveStatus::NumericalIssue,
            solution: Some(point()),
            gap: 0.0,
            nodes: 0,
        },
        SolverStatus::MaxTime => SolveResult {
            status: SolveStatus::TimeLimit,
            solution: Some(point()),
            gap: f64::INFINITY,
            nodes: 0,
        },
        SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => SolveResult {
            status: SolveStatus::Infeasible,
            solution: None,
            gap: f64::INFINITY,
            nodes: 0,
        },
        SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => SolveResult {
            status: SolveStatus::Unbounded,
            solution: None,
            gap: f64::INFINITY,
            nodes: 0,
        },
        _ => SolveResult {
            status: SolveStatus::NumericalIssue,
            solution: None,
            gap: f64::INFINITY,
            nodes: 0,
        },
    };

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LinExpr, VarKind};
    use float_cmp::approx_eq;

    #[test]
    fn bound_constrained_lp() {
        // min 10 p  s.t.  p + 10 theta = 0,  10 theta = -50
        let mut model = Model::new();
        let p = model.add_var("p", 0.0, 100.0, VarKind::Continuous);
        let theta = model.add_var("theta", -10.0, 10.0, VarKind::Continuous);
        model.set_linear_cost(p, 10.0);
        model.add_eq(LinExpr::new().term(p, 1.0).term(theta, 10.0), 0.0);
        model.add_eq(LinExpr::new().term(theta, 10.0), -50.0);

        let result = solve_qp(&model, false, None).unwrap();
        assert_eq!(result.status, SolveStatus::Optimal);
        let sol = result.solution.unwrap();
        assert!(approx_eq!(f64, sol.value(p), 50.0, epsilon = 1e-5));
        assert!(approx_eq!(f64, sol.value(theta), -5.0, epsilon = 1e-5));
        assert!(approx_eq!(f64, sol.objective, 500.0, epsilon = 1e-3));
    }

    #[test]
    fn diagonal_qp_projects_onto_box() {
        // min (x - 3)^2 for x in [0, 2] -> x = 2
        let mut model = Model::new();
        let x = model.add_var("x", 0.0, 2.0, VarKind::Continuous);
        model.set_quadratic_cost(x, 2.0);
        model.set_linear_cost(x, -6.0);
        model.set_objective_constant(9.0);

        let result = solve_qp(&model, false, None).unwrap();
        let sol = result.solution.unwrap();
        assert!((sol.value(x) - 2.0).abs() < 1e-5);
        assert!((sol.objective - 1.0).abs() < 1e-4);
    }

    #[test]
    fn infeasible_rows_are_reported() {
        let mut model = Model::new();
        let x = model.add_var("x", 0.0, 1.0, VarKind::Continuous);
        model.add_ge(LinExpr::new().term(x, 1.0), 2.0);
        let result = solve_qp(&model, false, None).unwrap();
        assert_eq!(result.status, SolveStatus::Infeasible);
        assert!(result.solution.is_none());
    }
}
