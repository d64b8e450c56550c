//! # duc-solver: MIQP layer for unit-commitment subproblems
//!
//! The coordination engine treats optimization as a black box: "minimize
//! this quadratic or mixed-integer quadratic objective subject to these
//! linear constraints and return values". This crate is that box. It pairs
//! a plain-data model IR ([`Model`]) with the pure-Rust
//! [Clarabel](https://github.com/oxfordcontrol/Clarabel.rs) interior-point
//! solver for continuous subproblems and a branch-and-bound driver for the
//! committed (binary) variables.
//!
//! Solver construction is explicit: callers hold a [`SolverFactory`]
//! carrying gap, thread, seed, and verbosity configuration, and build a
//! [`MipSolver`] from it wherever one is needed. There is no process-wide
//! solver state.

mod branch_bound;
mod qp;
pub mod model;

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use branch_bound::BranchBoundLimits;
pub use model::{LinExpr, Model, RowId, Solution, VarId, VarKind};

/// Errors raised while setting up or driving a solve.
#[derive(Debug, Error)]
pub enum SolverError {
    /// The model could not be handed to the backend.
    #[error("solver rejected model: {0}")]
    BadModel(String),

    /// The backend failed in a way that is not a solution status.
    #[error("solver internal failure: {0}")]
    Internal(String),
}

/// Outcome classification of one solve.
///
/// `Optimal` and `Feasible` carry trustworthy points; `NumericalIssue` with
/// a point is the "successful but suspect" case the coordinator treats as a
/// warning (it keeps the previous iterate instead); the remaining variants
/// carry whatever incumbent existed when the search stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    Optimal,
    /// Integral incumbent found, optimality not proven.
    Feasible,
    Infeasible,
    Unbounded,
    TimeLimit,
    NodeLimit,
    NumericalIssue,
}

/// Result of one solve: status, best point if any, relative MIP gap, and
/// branch-and-bound node count.
#[derive(Debug, Clone)]
pub struct SolveResult {
    pub status: SolveStatus,
    pub solution: Option<Solution>,
    pub gap: f64,
    pub nodes: usize,
}

impl SolveResult {
    /// The best point found, regardless of proof status.
    pub fn best(&self) -> Option<&Solution> {
        self.solution.as_ref()
    }

    /// Whether the point can be trusted as a feasible iterate.
    pub fn is_usable(&self) -> bool {
        self.solution.is_some()
            && matches!(
                self.status,
                SolveStatus::Optimal
                    | SolveStatus::Feasible
                    | SolveStatus::TimeLimit
                    | SolveStatus::NodeLimit
            )
    }
}

/// Explicit solver configuration, passed to every entry point that solves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverFactory {
    /// Relative MIP optimality gap tolerance.
    pub mip_gap: f64,
    /// Integrality tolerance for branch-and-bound.
    pub int_tol: f64,
    /// Branch-and-bound node budget.
    pub max_nodes: usize,
    /// Advisory thread count for backends with internal parallelism.
    pub threads: usize,
    /// Advisory random seed; the bundled backend is deterministic.
    pub seed: u64,
    pub verbose: bool,
}

impl Default for SolverFactory {
    fn default() -> Self {
        Self {
            mip_gap: 1e-4,
            int_tol: 1e-6,
            max_nodes: 50_000,
            threads: 8,
            seed: 0,
            verbose: false,
        }
    }
}

impl SolverFactory {
    /// Tighten tolerances for "careful" runs.
    pub fn careful(mut self) -> Self {
        self.mip_gap = 1e-6;
        self.int_tol = 1e-8;
        self
    }

    /// Build a solver with this configuration.
    pub fn solver(&self) -> MipSolver {
        MipSolver {
            config: self.clone(),
        }
    }
}

/// A configured mixed-integer quadratic solver.
pub struct MipSolver {
    config: SolverFactory,
}

impl MipSolver {
    /// Solve `model`, honoring integrality on binary variables. `time_limit`
    /// bounds the whole search including every relaxation solve.
    pub fn solve(
        &self,
        model: &Model,
        time_limit: Option<Duration>,
    ) -> Result<SolveResult, SolverError> {
        let limits = BranchBoundLimits {
            max_nodes: self.config.max_nodes,
            int_tol: self.config.int_tol,
            mip_gap: self.config.mip_gap,
            deadline: time_limit.map(|d| Instant::now() + d),
        };
        branch_bound::solve_miqp(model, self.config.verbose, &limits)
    }

    /// Solve the continuous relaxation, ignoring integrality.
    pub fn solve_relaxation(
        &self,
        model: &Model,
        time_limit: Option<Duration>,
    ) -> Result<SolveResult, SolverError> {
        qp::solve_qp(model, self.config.verbose, time_limit)
    }
}
