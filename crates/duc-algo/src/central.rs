//! Centralized algorithm variants.
//!
//! The central path reuses the zonal machinery on a single-zone view of
//! the network: with no boundary buses the aggregation row pins the
//! transfer at zero and the zonal balance collapses to the classic
//! system-wide balance. Transmission limits are enforced the same lazy
//! way as in the decentralized run: solve, screen the worst violation per
//! period, add its constraint, repeat until clean.
//!
//! `tcuc-theta` is the angle formulation instead: explicit bus angles, a
//! flow-conservation row per bus, and every line limit stated up front.

use std::time::{Duration, Instant};

use tracing::info;

use duc_core::{DucError, DucResult, SoloCommunicator, UnitCommitmentInstance, ZoneId};
use duc_solver::{LinExpr, Solution, SolverFactory, VarKind};

use crate::screening::{ScreeningContext, Violation};
use crate::sensitivity::{build_isf, build_lodf};
use crate::subproblem::{build_zonal_subproblem, Subproblem, ZonalSubproblem};
use crate::uc::{build_uc_model, UcModel};
use crate::zones::extract_zones;

/// Result of a centralized solve.
pub struct CentralOutcome {
    pub subproblem: ZonalSubproblem,
    pub solution: Solution,
    pub cost: f64,
    pub violations: Vec<Violation>,
    /// Solve-screen rounds performed.
    pub rounds: usize,
    pub wall_time_secs: f64,
}

/// Solve the whole network in one worker with lazy flow screening.
///
/// `transmission` enables pre-contingency limits, `security` additionally
/// screens single-line outages.
pub fn solve_central(
    instance: &UnitCommitmentInstance,
    transmission: bool,
    security: bool,
    reserve_fraction: f64,
    factory: &SolverFactory,
    max_time_secs: f64,
) -> DucResult<CentralOutcome> {
    let start = Instant::now();

    // Single-zone view of the (possibly partitioned) instance.
    let mut flat = instance.clone();
    for line in &mut flat.lines {
        line.zone = ZoneId::new(1);
    }

    let isf = build_isf(&flat.lines, flat.buses.len())?;
    let lodf = build_lodf(&isf, &flat.lines);
    let zones = extract_zones(&flat, &isf, &lodf, security, None, &SoloCommunicator)?;
    let zone = &zones[0];

    let mut sub = build_zonal_subproblem(&flat, zone, &zones, reserve_fraction, false)?;
    let mut ctx = ScreeningContext::new(&flat, zone, &isf, &lodf, security)?;

    let solver = factory.solver();
    let mut rounds = 0;
    let mut solution: Option<Solution> = None;

    loop {
        rounds += 1;
        let remaining = max_time_secs - start.elapsed().as_secs_f64();
        if remaining <= 0.0 {
            info!(rounds, "central solve stopped on the time budget");
            break;
        }

        let result = solver
            .solve(sub.model(), Some(Duration::from_secs_f64(remaining)))
            .map_err(|e| DucError::Solver(e.to_string()))?;
        let sol = match result.solution {
            Some(sol) if result.is_usable() => sol,
            _ => {
                return Err(DucError::Solver(format!(
                    "central solve returned {:?}",
                    result.status
                )))
            }
        };
        sub.model_mut().set_warm_values(&sol.values);

        if !transmission {
            solution = Some(sol);
            break;
        }
        let added = ctx.screen(&mut sub, &sol, &SoloCommunicator)?;
        info!(rounds, added, "central screening round");
        solution = Some(sol);
        if added == 0 {
            break;
        }
    }

    let solution = solution.ok_or_else(|| {
        DucError::Solver("central solve produced no usable point within the budget".into())
    })?;
    let cost = solution.value(sub.objective_var());

    Ok(CentralOutcome {
        solution,
        cost,
        violations: ctx.violations.clone(),
        rounds,
        wall_time_secs: start.elapsed().as_secs_f64(),
        subproblem: sub,
    })
}

/// Result of the angle-formulation solve.
pub struct ThetaOutcome {
    pub uc: UcModel,
    pub solution: Solution,
    pub cost: f64,
    pub wall_time_secs: f64,
}

/// Transmission-constrained commitment with explicit bus angles: flows are
/// `susceptance * (theta_src - theta_tgt)`, conserved at every bus, with
/// all line limits stated up front.
pub fn solve_theta(
    instance: &UnitCommitmentInstance,
    reserve_fraction: f64,
    factory: &SolverFactory,
    max_time_secs: f64,
) -> DucResult<ThetaOutcome> {
    let start = Instant::now();
    let horizon = instance.time_horizon;
    let gen_ids: Vec<_> = instance.generators.iter().map(|g| g.id).collect();
    let bus_ids: Vec<_> = instance.buses.iter().map(|b| b.id).collect();

    let mut uc = build_uc_model(instance, &gen_ids, &bus_ids, reserve_fraction);
    // Per-bus flow conservation implies the system-wide balance.
    for row in uc.balance_rows.clone() {
        uc.model.delete_row(row);
    }
    let model = &mut uc.model;

    let mut theta = std::collections::BTreeMap::new();
    for &b in &bus_ids {
        for t in 0..horizon {
            let v = model.add_var(format!("theta[{},{}]", b, t + 1), -10.0, 10.0, VarKind::Continuous);
            if b == bus_ids[0] {
                model.fix(v, 0.0);
            }
            theta.insert((b, t), v);
        }
    }

    for line in &instance.lines {
        for t in 0..horizon {
            let expr = LinExpr::new()
                .term(theta[&(line.source, t)], line.susceptance)
                .term(theta[&(line.target, t)], -line.susceptance);
            model.add_range(expr, -line.normal_limit, line.normal_limit);
        }
    }

    for &b in &bus_ids {
        for t in 0..horizon {
            let mut expr = LinExpr::new().term(uc.inj[&(b, t)], -1.0);
            for line in &instance.lines {
                if line.source == b {
                    expr.add_term(theta[&(line.source, t)], line.susceptance);
                    expr.add_term(theta[&(line.target, t)], -line.susceptance);
                } else if line.target == b {
                    expr.add_term(theta[&(line.target, t)], line.susceptance);
                    expr.add_term(theta[&(line.source, t)], -line.susceptance);
                }
            }
            model.add_eq(expr, 0.0);
        }
    }

    let result = factory
        .solver()
        .solve(&uc.model, Some(Duration::from_secs_f64(max_time_secs.max(1.0))))
        .map_err(|e| DucError::Solver(e.to_string()))?;
    let is_usable = result.is_usable();
    let status = result.status;
    let solution = result
        .solution
        .filter(|_| is_usable)
        .ok_or_else(|| DucError::Solver(format!("theta solve returned {:?}", status)))?;
    let cost = solution.value(uc.cost_var);

    Ok(ThetaOutcome {
        solution,
        cost,
        wall_time_secs: start.elapsed().as_secs_f64(),
        uc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::two_zone_instance;

    #[test]
    fn central_without_transmission_matches_uc_cost() {
        let instance = two_zone_instance();
        let outcome = solve_central(
            &instance,
            false,
            false,
            0.0,
            &SolverFactory::default(),
            60.0,
        )
        .unwrap();
        assert_eq!(outcome.rounds, 1);
        assert!(outcome.violations.is_empty());
        assert!(outcome.cost > 0.0);
    }

    #[test]
    fn central_with_generous_limits_screens_clean() {
        let instance = two_zone_instance();
        let outcome = solve_central(
            &instance,
            true,
            false,
            0.0,
            &SolverFactory::default(),
            60.0,
        )
        .unwrap();
        // One solve round plus the clean screening pass that ends it.
        assert!(outcome.violations.is_empty());
    }

    #[test]
    fn theta_formulation_covers_demand() {
        let instance = two_zone_instance();
        let outcome =
            solve_theta(&instance, 0.0, &SolverFactory::default(), 60.0).unwrap();
        for t in 0..instance.time_horizon {
            let total: f64 = instance
                .generators
                .iter()
                .map(|g| outcome.solution.value(outcome.uc.prod[&(g.id, t)]))
                .sum();
            assert!((total - instance.total_demand(t)).abs() < 1e-4);
        }
    }

    #[test]
    fn central_and_theta_agree_when_limits_are_loose() {
        let instance = two_zone_instance();
        let central = solve_central(
            &instance,
            true,
            false,
            0.0,
            &SolverFactory::default(),
            60.0,
        )
        .unwrap();
        let theta = solve_theta(&instance, 0.0, &SolverFactory::default(), 60.0).unwrap();
        assert!(
            (central.cost - theta.cost).abs() / central.cost.max(1.0) < 1e-3,
            "central {} vs theta {}",
            central.cost,
            theta.cost
        );
    }
}
