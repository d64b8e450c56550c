//! Generator-level unit-commitment model construction.
//!
//! Builds the commitment core every algorithm variant shares: commitment
//! and switching logic, minimum up/down times, ramp limits with startup
//! and shutdown ramps, three-segment piecewise-linear production costs,
//! spinning reserve, per-bus net injections, and the centralized per-period
//! power-balance rows. The balance row handles are returned so the zonal
//! subproblem builder can delete them and substitute its own coupling.

use std::collections::BTreeMap;

use duc_core::{BusId, GenId, UnitCommitmentInstance};
use duc_solver::{LinExpr, Model, RowId, VarId, VarKind};

/// Variable handles of a built unit-commitment model.
#[derive(Debug)]
pub struct UcModel {
    pub model: Model,
    /// Scalar equal to the original (pre-penalty) cost.
    pub cost_var: VarId,
    pub horizon: usize,
    /// Total MW output per generator and period.
    pub prod: BTreeMap<(GenId, usize), VarId>,
    pub is_on: BTreeMap<(GenId, usize), VarId>,
    pub switch_on: BTreeMap<(GenId, usize), VarId>,
    pub switch_off: BTreeMap<(GenId, usize), VarId>,
    pub reserve: BTreeMap<(GenId, usize), VarId>,
    /// Production above minimum within each offer segment.
    pub seg_prod: BTreeMap<(GenId, usize, usize), VarId>,
    /// Net MW injection per bus and period.
    pub inj: BTreeMap<(BusId, usize), VarId>,
    /// Centralized per-period balance rows, deletable by the caller.
    pub balance_rows: Vec<RowId>,
}

/// Build the unit-commitment model restricted to `gen_ids` and `bus_ids`.
///
/// `reserve_fraction` of the covered demand must be held as spinning
/// reserve in every period; zero disables the requirement.
pub fn build_uc_model(
    instance: &UnitCommitmentInstance,
    gen_ids: &[GenId],
    bus_ids: &[BusId],
    reserve_fraction: f64,
) -> UcModel {
    let horizon = instance.time_horizon;
    let mut model = Model::new();

    let cost_var = model.add_var("cost", f64::NEG_INFINITY, f64::INFINITY, VarKind::Continuous);
    model.set_linear_cost(cost_var, 1.0);
    let mut cost_expr = LinExpr::new().term(cost_var, -1.0);

    let mut prod = BTreeMap::new();
    let mut is_on = BTreeMap::new();
    let mut switch_on = BTreeMap::new();
    let mut switch_off = BTreeMap::new();
    let mut reserve = BTreeMap::new();
    let mut seg_prod = BTreeMap::new();

    for &g in gen_ids {
        let gen = instance.generator(g);
        let on0 = if gen.initially_on() { 1.0 } else { 0.0 };
        let p0 = gen.initial_power();

        for t in 0..horizon {
            let on = model.add_var(format!("is_on[{},{}]", g, t + 1), 0.0, 1.0, VarKind::Binary);
            let up = model.add_var(
                format!("switch_on[{},{}]", g, t + 1),
                0.0,
                1.0,
                VarKind::Continuous,
            );
            let down = model.add_var(
                format!("switch_off[{},{}]", g, t + 1),
                0.0,
                1.0,
                VarKind::Continuous,
            );
            let p = model.add_var(
                format!("prod[{},{}]", g, t + 1),
                0.0,
                gen.max_power,
                VarKind::Continuous,
            );
            let r = model.add_var(
                format!("reserve[{},{}]", g, t + 1),
                0.0,
                gen.max_power,
                VarKind::Continuous,
            );
            if gen.always_on {
                model.fix(on, 1.0);
            }
            is_on.insert((g, t), on);
            switch_on.insert((g, t), up);
            switch_off.insert((g, t), down);
            prod.insert((g, t), p);
            reserve.insert((g, t), r);

            // Production decomposition over the offer segments.
            let mut decomposition = LinExpr::new()
                .term(p, -1.0)
                .term(on, gen.min_power);
            for (s, segment) in gen.cost_segments.iter().enumerate() {
                let sp = model.add_var(
                    format!("segprod[{},{},{}]", g, s + 1, t + 1),
                    0.0,
                    segment.amount.max(0.0),
                    VarKind::Continuous,
                );
                model.add_le(
                    LinExpr::new().term(sp, 1.0).term(on, -segment.amount),
                    0.0,
                );
                decomposition.add_term(sp, 1.0);
                cost_expr.add_term(sp, segment.price);
                seg_prod.insert((g, s, t), sp);
            }
            model.add_eq(decomposition, 0.0);

            // Committed capacity covers production plus reserve.
            model.add_le(
                LinExpr::new()
                    .term(p, 1.0)
                    .term(r, 1.0)
                    .term(on, -gen.max_power),
                0.0,
            );

            cost_expr.add_term(on, gen.min_power_cost);
            cost_expr.add_term(up, gen.startup_cost);

            // Commitment transition logic.
            let transition = LinExpr::new()
                .term(on, 1.0)
                .term(up, -1.0)
                .term(down, 1.0);
            if t == 0 {
                model.add_eq(transition, on0);
            } else {
                model.add_eq(transition.term(is_on[&(g, t - 1)], -1.0), 0.0);
            }
            model.add_le(LinExpr::new().term(up, 1.0).term(down, 1.0), 1.0);

            // Minimum up/down windows over the switch variables.
            let mut up_window = LinExpr::new().term(on, -1.0);
            for tau in t.saturating_sub(gen.min_uptime.saturating_sub(1))..=t {
                up_window.add_term(switch_on[&(g, tau)], 1.0);
            }
            model.add_le(up_window, 0.0);

            let mut down_window = LinExpr::new().term(on, 1.0);
            for tau in t.saturating_sub(gen.min_downtime.saturating_sub(1))..=t {
                down_window.add_term(switch_off[&(g, tau)], 1.0);
            }
            model.add_le(down_window, 1.0);

            // Ramping, with startup/shutdown ramps on the switch variables.
            let mut ramp_up = LinExpr::new()
                .term(p, 1.0)
                .term(up, -gen.startup_ramp);
            let mut ramp_down = LinExpr::new()
                .term(p, -1.0)
                .term(on, -gen.ramp_down)
                .term(down, -gen.shutdown_ramp);
            if t == 0 {
                ramp_up.constant -= p0 + gen.ramp_up * on0;
                ramp_down.constant += p0;
            } else {
                let p_prev = prod[&(g, t - 1)];
                let on_prev = is_on[&(g, t - 1)];
                ramp_up.add_term(p_prev, -1.0);
                ramp_up.add_term(on_prev, -gen.ramp_up);
                ramp_down.add_term(p_prev, 1.0);
            }
            model.add_le(ramp_up, 0.0);
            model.add_le(ramp_down, 0.0);
        }

        // Commitment carried in from before the horizon: a unit that has
        // not yet served its minimum up (down) time stays on (off).
        if gen.initially_on() {
            let owed = gen.min_uptime.saturating_sub(gen.initial_status.max(0) as usize);
            for t in 0..owed.min(horizon) {
                model.fix(is_on[&(g, t)], 1.0);
            }
        } else {
            let hours_off = (-gen.initial_status).max(0) as usize;
            let owed = gen.min_downtime.saturating_sub(hours_off);
            for t in 0..owed.min(horizon) {
                model.fix(is_on[&(g, t)], 0.0);
            }
        }
    }

    // Net injections and the centralized power balance.
    let mut inj = BTreeMap::new();
    let mut balance_rows = Vec::with_capacity(horizon);
    for &b in bus_ids {
        let bus = instance.bus(b);
        for t in 0..horizon {
            let v = model.add_var(
                format!("inj[{},{}]", b, t + 1),
                f64::NEG_INFINITY,
                f64::INFINITY,
                VarKind::Continuous,
            );
            let mut expr = LinExpr::new().term(v, -1.0);
            for &g in gen_ids {
                if instance.generator(g).bus == b {
                    expr.add_term(prod[&(g, t)], 1.0);
                }
            }
            model.add_eq(expr, bus.demand[t]);
            inj.insert((b, t), v);
        }
    }
    for t in 0..horizon {
        let mut expr = LinExpr::new();
        for &b in bus_ids {
            expr.add_term(inj[&(b, t)], 1.0);
        }
        balance_rows.push(model.add_eq(expr, 0.0));
    }

    if reserve_fraction > 0.0 {
        for t in 0..horizon {
            let required: f64 = bus_ids
                .iter()
                .map(|&b| instance.bus(b).demand[t])
                .sum::<f64>()
                * reserve_fraction;
            let mut expr = LinExpr::new();
            for &g in gen_ids {
                expr.add_term(reserve[&(g, t)], 1.0);
            }
            model.add_ge(expr, required);
        }
    }

    model.add_eq(cost_expr, 0.0);

    UcModel {
        model,
        cost_var,
        horizon,
        prod,
        is_on,
        switch_on,
        switch_off,
        reserve,
        seg_prod,
        inj,
        balance_rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::two_zone_instance;
    use duc_solver::{SolveStatus, SolverFactory};

    fn all_ids(
        instance: &UnitCommitmentInstance,
    ) -> (Vec<GenId>, Vec<BusId>) {
        (
            instance.generators.iter().map(|g| g.id).collect(),
            instance.buses.iter().map(|b| b.id).collect(),
        )
    }

    #[test]
    fn centralized_model_balances_demand() {
        let instance = two_zone_instance();
        let (gens, buses) = all_ids(&instance);
        let uc = build_uc_model(&instance, &gens, &buses, 0.0);

        let result = SolverFactory::default()
            .solver()
            .solve(&uc.model, None)
            .unwrap();
        assert_eq!(result.status, SolveStatus::Optimal);
        let sol = result.solution.unwrap();

        for t in 0..uc.horizon {
            let total_prod: f64 = gens.iter().map(|&g| sol.value(uc.prod[&(g, t)])).sum();
            let total_demand = instance.total_demand(t);
            assert!(
                (total_prod - total_demand).abs() < 1e-4,
                "t={}: prod {} vs demand {}",
                t,
                total_prod,
                total_demand
            );
        }
        assert!(sol.value(uc.cost_var) > 0.0);
    }

    #[test]
    fn committed_units_respect_minimum_power() {
        let instance = two_zone_instance();
        let (gens, buses) = all_ids(&instance);
        let uc = build_uc_model(&instance, &gens, &buses, 0.0);
        let sol = SolverFactory::default()
            .solver()
            .solve(&uc.model, None)
            .unwrap()
            .solution
            .unwrap();

        for (&(g, _t), &p) in &uc.prod {
            let on = sol.value(uc.is_on[&(g, _t)]);
            let power = sol.value(p);
            let gen = instance.generator(g);
            assert!(power <= gen.max_power * on + 1e-6);
            assert!(power >= gen.min_power * on - 1e-6);
        }
    }

    #[test]
    fn reserve_requirement_is_enforced() {
        let instance = two_zone_instance();
        let (gens, buses) = all_ids(&instance);
        let uc = build_uc_model(&instance, &gens, &buses, 0.1);
        let sol = SolverFactory::default()
            .solver()
            .solve(&uc.model, None)
            .unwrap()
            .solution
            .unwrap();
        for t in 0..uc.horizon {
            let held: f64 = gens.iter().map(|&g| sol.value(uc.reserve[&(g, t)])).sum();
            assert!(held >= 0.1 * instance.total_demand(t) - 1e-5);
        }
    }

    #[test]
    fn balance_rows_are_deletable() {
        let instance = two_zone_instance();
        let (gens, buses) = all_ids(&instance);
        let mut uc = build_uc_model(&instance, &gens, &buses, 0.0);
        let before = uc.model.num_active_rows();
        for row in uc.balance_rows.clone() {
            uc.model.delete_row(row);
        }
        assert_eq!(before - uc.model.num_active_rows(), uc.horizon);
    }

    #[test]
    fn initial_downtime_pins_units_off() {
        let mut instance = two_zone_instance();
        instance.generators[1].initial_status = -1;
        instance.generators[1].min_downtime = 3;
        let (gens, buses) = all_ids(&instance);
        let uc = build_uc_model(&instance, &gens, &buses, 0.0);
        let g = gens[1];
        for t in 0..uc.horizon {
            let (lo, hi) = uc.model.bounds(uc.is_on[&(g, t)]);
            assert_eq!((lo, hi), (0.0, 0.0), "t={}", t);
        }
    }
}
