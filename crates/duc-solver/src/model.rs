//! Optimization model intermediate representation.
//!
//! A [`Model`] is a plain-data description of a mixed-integer quadratic
//! program: variables with bounds and integrality, range rows over linear
//! expressions, and an objective that is linear plus a diagonal quadratic.
//! Every objective this system produces has that shape — piecewise-linear
//! production costs plus the separable ADMM penalty — so no general
//! Hessian support is carried.
//!
//! Rows can be deleted after construction (the zonal builder removes the
//! centralized balance rows it inherits); deletion tombstones the row so
//! existing [`RowId`]s stay valid.

/// Handle to a variable in a [`Model`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub(crate) usize);

impl VarId {
    /// Position of the variable in the model's dense layout.
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Handle to a constraint row in a [`Model`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowId(pub(crate) usize);

/// Variable integrality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Continuous,
    Binary,
}

#[derive(Debug, Clone)]
pub(crate) struct Variable {
    pub(crate) name: String,
    pub(crate) lower: f64,
    pub(crate) upper: f64,
    pub(crate) kind: VarKind,
    /// Linear objective coefficient.
    pub(crate) obj_lin: f64,
    /// Diagonal quadratic objective coefficient `q` in `(q/2) x^2`.
    pub(crate) obj_quad: f64,
    /// Warm-start hint carried across objective changes.
    pub(crate) warm: Option<f64>,
}

#[derive(Debug, Clone)]
pub(crate) struct Row {
    pub(crate) terms: Vec<(usize, f64)>,
    pub(crate) lower: f64,
    pub(crate) upper: f64,
    pub(crate) active: bool,
}

/// A linear expression `sum(coeff * var) + constant`.
#[derive(Debug, Clone, Default)]
pub struct LinExpr {
    pub terms: Vec<(VarId, f64)>,
    pub constant: f64,
}

impl LinExpr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style term append.
    pub fn term(mut self, var: VarId, coeff: f64) -> Self {
        self.terms.push((var, coeff));
        self
    }

    pub fn add_term(&mut self, var: VarId, coeff: f64) {
        self.terms.push((var, coeff));
    }

    pub fn offset(mut self, constant: f64) -> Self {
        self.constant += constant;
        self
    }

    /// Evaluate against a dense value vector.
    pub fn value(&self, values: &[f64]) -> f64 {
        self.constant
            + self
                .terms
                .iter()
                .map(|&(v, c)| c * values[v.index()])
                .sum::<f64>()
    }
}

/// Primal point returned by a solve.
#[derive(Debug, Clone)]
pub struct Solution {
    pub values: Vec<f64>,
    pub objective: f64,
}

impl Solution {
    #[inline]
    pub fn value(&self, var: VarId) -> f64 {
        self.values[var.index()]
    }
}

/// A mixed-integer quadratic program under construction.
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub(crate) vars: Vec<Variable>,
    pub(crate) rows: Vec<Row>,
    pub(crate) obj_constant: f64,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_var(
        &mut self,
        name: impl Into<String>,
        lower: f64,
        upper: f64,
        kind: VarKind,
    ) -> VarId {
        let id = VarId(self.vars.len());
        self.vars.push(Variable {
            name: name.into(),
            lower,
            upper,
            kind,
            obj_lin: 0.0,
            obj_quad: 0.0,
            warm: None,
        });
        id
    }

    /// Constrain `expr` to the closed interval `[lower, upper]`. The
    /// expression's constant is folded into the bounds.
    pub fn add_range(&mut self, expr: LinExpr, lower: f64, upper: f64) -> RowId {
        let id = RowId(self.rows.len());
        self.rows.push(Row {
            terms: expr.terms.iter().map(|&(v, c)| (v.index(), c)).collect(),
            lower: lower - expr.constant,
            upper: upper - expr.constant,
            active: true,
        });
        id
    }

    pub fn add_eq(&mut self, expr: LinExpr, rhs: f64) -> RowId {
        self.add_range(expr, rhs, rhs)
    }

    pub fn add_le(&mut self, expr: LinExpr, upper: f64) -> RowId {
        self.add_range(expr, f64::NEG_INFINITY, upper)
    }

    pub fn add_ge(&mut self, expr: LinExpr, lower: f64) -> RowId {
        self.add_range(expr, lower, f64::INFINITY)
    }

    /// Tombstone a row. The handle stays valid; the row stops binding.
    pub fn delete_row(&mut self, row: RowId) {
        self.rows[row.0].active = false;
    }

    pub fn set_bounds(&mut self, var: VarId, lower: f64, upper: f64) {
        let v = &mut self.vars[var.index()];
        v.lower = lower;
        v.upper = upper;
    }

    pub fn bounds(&self, var: VarId) -> (f64, f64) {
        let v = &self.vars[var.index()];
        (v.lower, v.upper)
    }

    /// Pin a variable to a single value.
    pub fn fix(&mut self, var: VarId, value: f64) {
        self.set_bounds(var, value, value);
    }

    pub fn set_kind(&mut self, var: VarId, kind: VarKind) {
        self.vars[var.index()].kind = kind;
    }

    pub fn kind(&self, var: VarId) -> VarKind {
        self.vars[var.index()].kind
    }

    pub fn name(&self, var: VarId) -> &str {
        &self.vars[var.index()].name
    }

    pub fn set_linear_cost(&mut self, var: VarId, coeff: f64) {
        self.vars[var.index()].obj_lin = coeff;
    }

    pub fn linear_cost(&self, var: VarId) -> f64 {
        self.vars[var.index()].obj_lin
    }

    /// Set the diagonal quadratic coefficient `q` contributing `(q/2) x^2`.
    pub fn set_quadratic_cost(&mut self, var: VarId, coeff: f64) {
        self.vars[var.index()].obj_quad = coeff;
    }

    pub fn set_objective_constant(&mut self, constant: f64) {
        self.obj_constant = constant;
    }

    /// Record a warm-start hint, typically the previous solve's point.
    pub fn set_warm_values(&mut self, values: &[f64]) {
        for (var, &v) in self.vars.iter_mut().zip(values.iter()) {
            var.warm = Some(v);
        }
    }

    pub fn warm_value(&self, var: VarId) -> Option<f64> {
        self.vars[var.index()].warm
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn num_active_rows(&self) -> usize {
        self.rows.iter().filter(|r| r.active).count()
    }

    /// Handles of all binary variables, fixed or not.
    pub fn binary_vars(&self) -> Vec<VarId> {
        self.vars
            .iter()
            .enumerate()
            .filter(|(_, v)| v.kind == VarKind::Binary)
            .map(|(i, _)| VarId(i))
            .collect()
    }

    /// Evaluate the objective at a point.
    pub fn objective_value(&self, values: &[f64]) -> f64 {
        let mut obj = self.obj_constant;
        for (var, &x) in self.vars.iter().zip(values.iter()) {
            obj += var.obj_lin * x + 0.5 * var.obj_quad * x * x;
        }
        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expression_evaluation() {
        let mut model = Model::new();
        let x = model.add_var("x", 0.0, 1.0, VarKind::Continuous);
        let y = model.add_var("y", 0.0, 1.0, VarKind::Continuous);
        let expr = LinExpr::new().term(x, 2.0).term(y, -1.0).offset(0.5);
        assert_eq!(expr.value(&[3.0, 4.0]), 2.5);
    }

    #[test]
    fn constant_folds_into_row_bounds() {
        let mut model = Model::new();
        let x = model.add_var("x", 0.0, 10.0, VarKind::Continuous);
        let row = model.add_le(LinExpr::new().term(x, 1.0).offset(2.0), 5.0);
        assert_eq!(model.rows[row.0].upper, 3.0);
    }

    #[test]
    fn deleted_rows_stop_counting() {
        let mut model = Model::new();
        let x = model.add_var("x", 0.0, 1.0, VarKind::Continuous);
        let row = model.add_eq(LinExpr::new().term(x, 1.0), 1.0);
        assert_eq!(model.num_active_rows(), 1);
        model.delete_row(row);
        assert_eq!(model.num_active_rows(), 0);
    }

    #[test]
    fn objective_includes_quadratic_and_constant() {
        let mut model = Model::new();
        let x = model.add_var("x", 0.0, 10.0, VarKind::Continuous);
        model.set_linear_cost(x, 3.0);
        model.set_quadratic_cost(x, 4.0);
        model.set_objective_constant(1.0);
        // 1 + 3*2 + 0.5*4*4 = 15
        assert_eq!(model.objective_value(&[2.0]), 15.0);
    }
}
