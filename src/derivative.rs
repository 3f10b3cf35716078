//! Analytic derivatives.
//!
//! Derivatives are built as new nodes in the same [`Tree`], one expression per
//! screen-space axis. A node is differentiable only if all of its inputs are;
//! the synthesizer never guesses.

use std::f32::consts::LN_2;

use log::debug;

use crate::ops::{describe, DerivativeRule};
use crate::tree::{ExprId, Expression, Tree};
use crate::value::Value;

/// Number of differentiation axes (ddx, ddy).
pub const AXIS_COUNT: usize = 2;
pub const DDX: usize = 0;
pub const DDY: usize = 1;

/// One derivative expression per axis.
pub type Partials = [ExprId; AXIS_COUNT];

/// Result of differentiating a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnalyticDerivatives {
    Valid(Partials),
    /// Placeholder zero for operations without an analytic rule (matrix
    /// products). Usable, but not the true derivative.
    ZeroStub(Partials),
    Unavailable,
}

impl AnalyticDerivatives {
    /// Partials usable by consumers, stubs included.
    pub fn partials(self) -> Option<Partials> {
        match self {
            Self::Valid(p) | Self::ZeroStub(p) => Some(p),
            Self::Unavailable => None,
        }
    }

    pub fn is_valid(self) -> bool {
        self.partials().is_some()
    }

    pub fn ddx(self) -> Option<ExprId> {
        self.partials().map(|p| p[DDX])
    }

    pub fn ddy(self) -> Option<ExprId> {
        self.partials().map(|p| p[DDY])
    }
}

/// Arguments of an operation's derivative rule.
pub struct RuleInputs<'a> {
    /// The operation's inputs.
    pub inputs: &'a [ExprId],
    /// Partials of each input, same order.
    pub derivatives: &'a [Partials],
    /// Guard added wherever a rule divides by (or takes rsqrt of) an input.
    pub epsilon: f32,
}

pub type DerivativeFn = fn(&mut Tree, &RuleInputs<'_>) -> Partials;

impl Tree {
    /// Derivatives of `id` along every axis, memoised per node.
    pub fn analytic_derivatives(&mut self, id: ExprId) -> AnalyticDerivatives {
        if let Some(cached) = self.derivatives.get(&id) {
            return *cached;
        }
        let result = self.compute_derivatives(id);
        debug!("derivatives of {:?}: {:?}", id, result);
        self.derivatives.insert(id, result);
        result
    }

    fn compute_derivatives(&mut self, id: ExprId) -> AnalyticDerivatives {
        match self.get(id).clone() {
            Expression::Constant(value) => {
                let ty = value.value_type.derivative_type();
                if ty.is_void() {
                    return AnalyticDerivatives::Unavailable;
                }
                let zero = self.new_constant(Value::zero(ty));
                AnalyticDerivatives::Valid([zero; AXIS_COUNT])
            }
            Expression::External(input) => match input.derivatives {
                Some(p) => AnalyticDerivatives::Valid(p),
                None => AnalyticDerivatives::Unavailable,
            },
            Expression::Select { condition, if_true, if_false } => {
                let (Some(t), Some(f)) = (
                    self.analytic_derivatives(if_true).partials(),
                    self.analytic_derivatives(if_false).partials(),
                ) else {
                    return AnalyticDerivatives::Unavailable;
                };
                AnalyticDerivatives::Valid(std::array::from_fn(|axis| {
                    self.new_select(condition, t[axis], f[axis])
                }))
            }
            Expression::Operation { op, inputs } => match describe(op).derivative {
                DerivativeRule::Unavailable => AnalyticDerivatives::Unavailable,
                DerivativeRule::Zero => {
                    let zero = self.new_float(0.0);
                    AnalyticDerivatives::Valid([zero; AXIS_COUNT])
                }
                DerivativeRule::Stub => {
                    let zero = self.new_constant(Value::float3(0.0, 0.0, 0.0));
                    AnalyticDerivatives::ZeroStub([zero; AXIS_COUNT])
                }
                DerivativeRule::Rule(rule) => {
                    let mut derivatives = Vec::with_capacity(inputs.len());
                    for &input in &inputs {
                        match self.analytic_derivatives(input).partials() {
                            Some(p) => derivatives.push(p),
                            None => return AnalyticDerivatives::Unavailable,
                        }
                    }
                    let args = RuleInputs {
                        inputs: &inputs,
                        derivatives: &derivatives,
                        epsilon: self.derivative_epsilon,
                    };
                    AnalyticDerivatives::Valid(rule(self, &args))
                }
            },
        }
    }
}

/// Per-operation rules. `x`, `a`, `b` are the inputs; `d*` their partials.
pub mod rules {
    use super::*;

    /// `factor * d` on every axis.
    fn chain(tree: &mut Tree, factor: ExprId, d: Partials) -> Partials {
        std::array::from_fn(|axis| tree.new_mul(factor, d[axis]))
    }

    /// `fa * da + fb * db` on every axis.
    fn chain2(tree: &mut Tree, fa: ExprId, da: Partials, fb: ExprId, db: Partials) -> Partials {
        std::array::from_fn(|axis| {
            let a = tree.new_mul(fa, da[axis]);
            let b = tree.new_mul(fb, db[axis]);
            tree.new_add(a, b)
        })
    }

    fn guarded(tree: &mut Tree, x: ExprId, epsilon: f32) -> ExprId {
        let eps = tree.new_float(epsilon);
        tree.new_max(x, eps)
    }

    pub fn forward_first(_: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        args.derivatives[0]
    }

    pub fn neg(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let d = args.derivatives[0];
        std::array::from_fn(|axis| tree.new_neg(d[axis]))
    }

    pub fn abs(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let factor = tree.new_sign(args.inputs[0]);
        chain(tree, factor, args.derivatives[0])
    }

    pub fn rcp(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let r = tree.new_rcp(args.inputs[0]);
        let r2 = tree.new_mul(r, r);
        let factor = tree.new_neg(r2);
        chain(tree, factor, args.derivatives[0])
    }

    pub fn sqrt(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let safe = guarded(tree, args.inputs[0], args.epsilon);
        let rsqrt = tree.new_rsqrt(safe);
        let half = tree.new_float(0.5);
        let factor = tree.new_mul(rsqrt, half);
        chain(tree, factor, args.derivatives[0])
    }

    pub fn rsqrt(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let x = args.inputs[0];
        let rsqrt = tree.new_rsqrt(x);
        let rcp = tree.new_rcp(x);
        let product = tree.new_mul(rsqrt, rcp);
        let half = tree.new_float(-0.5);
        let factor = tree.new_mul(product, half);
        chain(tree, factor, args.derivatives[0])
    }

    pub fn log2(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let safe = guarded(tree, args.inputs[0], args.epsilon);
        let ln2 = tree.new_float(LN_2);
        let scaled = tree.new_mul(safe, ln2);
        let factor = tree.new_rcp(scaled);
        chain(tree, factor, args.derivatives[0])
    }

    pub fn exp2(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let e = tree.new_exp2(args.inputs[0]);
        let ln2 = tree.new_float(LN_2);
        let factor = tree.new_mul(e, ln2);
        chain(tree, factor, args.derivatives[0])
    }

    /// Passes `d` through inside (0, 1), zero where clamped.
    pub fn saturate(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let x = args.inputs[0];
        let zero = tree.new_float(0.0);
        let one = tree.new_float(1.0);
        let below = tree.new_less(x, zero);
        let above = tree.new_greater(x, one);
        let d = args.derivatives[0];
        std::array::from_fn(|axis| {
            let inner = tree.new_select(above, zero, d[axis]);
            tree.new_select(below, zero, inner)
        })
    }

    pub fn length(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let x = args.inputs[0];
        let len = tree.new_length(x);
        let safe = guarded(tree, len, args.epsilon);
        let inv = tree.new_rcp(safe);
        let d = args.derivatives[0];
        std::array::from_fn(|axis| {
            let xd = tree.new_mul(x, d[axis]);
            let dot = tree.new_sum(xd);
            tree.new_mul(dot, inv)
        })
    }

    pub fn normalize(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let x = args.inputs[0];
        let n = tree.new_normalize(x);
        let len = tree.new_length(x);
        let safe = guarded(tree, len, args.epsilon);
        let inv = tree.new_rcp(safe);
        let d = args.derivatives[0];
        std::array::from_fn(|axis| {
            let nd = tree.new_mul(n, d[axis]);
            let dot = tree.new_sum(nd);
            let along = tree.new_mul(n, dot);
            let tangent = tree.new_sub(d[axis], along);
            tree.new_mul(tangent, inv)
        })
    }

    pub fn sum(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let d = args.derivatives[0];
        std::array::from_fn(|axis| tree.new_sum(d[axis]))
    }

    pub fn sin(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let factor = tree.new_cos(args.inputs[0]);
        chain(tree, factor, args.derivatives[0])
    }

    pub fn cos(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let sin = tree.new_sin(args.inputs[0]);
        let factor = tree.new_neg(sin);
        chain(tree, factor, args.derivatives[0])
    }

    pub fn tan(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let cos = tree.new_cos(args.inputs[0]);
        let cos2 = tree.new_pow2(cos);
        let factor = tree.new_rcp(cos2);
        chain(tree, factor, args.derivatives[0])
    }

    /// `rsqrt(max(1 - x^2, eps))`
    fn asin_factor(tree: &mut Tree, x: ExprId, epsilon: f32) -> ExprId {
        let one = tree.new_float(1.0);
        let x2 = tree.new_pow2(x);
        let diff = tree.new_sub(one, x2);
        let safe = guarded(tree, diff, epsilon);
        tree.new_rsqrt(safe)
    }

    pub fn asin(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let factor = asin_factor(tree, args.inputs[0], args.epsilon);
        chain(tree, factor, args.derivatives[0])
    }

    pub fn acos(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let asin = asin_factor(tree, args.inputs[0], args.epsilon);
        let factor = tree.new_neg(asin);
        chain(tree, factor, args.derivatives[0])
    }

    pub fn atan(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let x2 = tree.new_pow2(args.inputs[0]);
        let one = tree.new_float(1.0);
        let denom = tree.new_add(x2, one);
        let factor = tree.new_rcp(denom);
        chain(tree, factor, args.derivatives[0])
    }

    pub fn atan2(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let (a, b) = (args.inputs[0], args.inputs[1]);
        let a2 = tree.new_pow2(a);
        let b2 = tree.new_pow2(b);
        let sum = tree.new_add(a2, b2);
        let denom = tree.new_rcp(sum);
        let fa = tree.new_mul(b, denom);
        let neg_a = tree.new_neg(a);
        let fb = tree.new_mul(neg_a, denom);
        chain2(tree, fa, args.derivatives[0], fb, args.derivatives[1])
    }

    pub fn add(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let (da, db) = (args.derivatives[0], args.derivatives[1]);
        std::array::from_fn(|axis| tree.new_add(da[axis], db[axis]))
    }

    pub fn sub(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let (da, db) = (args.derivatives[0], args.derivatives[1]);
        std::array::from_fn(|axis| tree.new_sub(da[axis], db[axis]))
    }

    /// Product rule: `da * b + db * a`.
    pub fn mul(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let (a, b) = (args.inputs[0], args.inputs[1]);
        let (da, db) = (args.derivatives[0], args.derivatives[1]);
        std::array::from_fn(|axis| {
            let lhs = tree.new_mul(da[axis], b);
            let rhs = tree.new_mul(db[axis], a);
            tree.new_add(lhs, rhs)
        })
    }

    /// Quotient rule: `da / b - db * a / b^2`.
    pub fn div(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let (a, b) = (args.inputs[0], args.inputs[1]);
        let b2 = tree.new_mul(b, b);
        let denom = tree.new_rcp(b2);
        let fa = tree.new_mul(b, denom);
        let a_over = tree.new_mul(a, denom);
        let fb = tree.new_neg(a_over);
        chain2(tree, fa, args.derivatives[0], fb, args.derivatives[1])
    }

    /// `pow(a, b) * (b * a' / a + ln(a) * b')` with `a` clamped away from zero.
    pub fn pow_positive_clamped(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let (a, b) = (args.inputs[0], args.inputs[1]);
        let result = tree.new_pow_positive_clamped(a, b);
        let safe = guarded(tree, a, args.epsilon);
        let inv = tree.new_rcp(safe);
        let fa = tree.new_mul(b, inv);
        let log = tree.new_log2(safe);
        let ln2 = tree.new_float(LN_2);
        let fb = tree.new_mul(log, ln2);
        let inner = chain2(tree, fa, args.derivatives[0], fb, args.derivatives[1]);
        chain(tree, result, inner)
    }

    /// Derivative of the active branch.
    pub fn min(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let cond = tree.new_less(args.inputs[0], args.inputs[1]);
        select(tree, cond, args)
    }

    pub fn max(tree: &mut Tree, args: &RuleInputs<'_>) -> Partials {
        let cond = tree.new_greater(args.inputs[0], args.inputs[1]);
        select(tree, cond, args)
    }

    fn select(tree: &mut Tree, cond: ExprId, args: &RuleInputs<'_>) -> Partials {
        let (da, db) = (args.derivatives[0], args.derivatives[1]);
        std::array::from_fn(|axis| tree.new_select(cond, da[axis], db[axis]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Operation;
    use crate::tree::ExternalInput;
    use crate::types::ValueType;

    fn input(tree: &mut Tree, name: &str, ddx: f32, ddy: f32) -> ExprId {
        let dx = tree.new_float(ddx);
        let dy = tree.new_float(ddy);
        tree.new_external(ExternalInput::new(name, ValueType::Float1).with_derivatives([dx, dy]))
    }

    fn op(tree: &Tree, id: ExprId) -> (Operation, Vec<ExprId>) {
        match tree.get(id) {
            Expression::Operation { op, inputs } => (*op, inputs.clone()),
            other => panic!("expected an operation, got {:?}", other),
        }
    }

    #[test_log::test]
    fn product_rule_structure() {
        let mut tree = Tree::new();
        let x = input(&mut tree, "x", 1.0, 0.0);
        let y = input(&mut tree, "y", 0.0, 1.0);
        let f = tree.new_mul(x, y);
        let ddx = tree.analytic_derivatives(f).ddx().unwrap();

        let (add, terms) = op(&tree, ddx);
        assert_eq!(add, Operation::Add);
        let (m0, lhs) = op(&tree, terms[0]);
        let (m1, rhs) = op(&tree, terms[1]);
        assert_eq!((m0, m1), (Operation::Mul, Operation::Mul));
        assert_eq!(tree.get(lhs[0]), &Expression::Constant(Value::float(1.0)));
        assert_eq!(lhs[1], y);
        assert_eq!(tree.get(rhs[0]), &Expression::Constant(Value::float(0.0)));
        assert_eq!(rhs[1], x);
    }

    #[test_log::test]
    fn step_functions_skip_inputs() {
        let mut tree = Tree::new();
        let x = tree.new_external(ExternalInput::new("x", ValueType::Float1));
        let f = tree.new_floor(x);
        let d = tree.analytic_derivatives(f);
        assert!(d.is_valid());
        assert_eq!(tree.get(d.ddx().unwrap()), &Expression::Constant(Value::float(0.0)));
        // `x` has no derivatives, but floor never asked.
        assert_eq!(tree.analytic_derivatives(x), AnalyticDerivatives::Unavailable);
    }

    #[test_log::test]
    fn missing_input_derivative_poisons_node() {
        let mut tree = Tree::new();
        let x = input(&mut tree, "x", 1.0, 0.0);
        let opaque = tree.new_external(ExternalInput::new("t", ValueType::Float1));
        let f = tree.new_add(x, opaque);
        assert_eq!(tree.analytic_derivatives(f), AnalyticDerivatives::Unavailable);
    }

    #[test_log::test]
    fn matrix_products_are_flagged_stubs() {
        let mut tree = Tree::new();
        let v = input(&mut tree, "v", 1.0, 0.0);
        let m = tree.new_external(ExternalInput::new("m", ValueType::Float4x4));
        let f = tree.new_binary_op(Operation::VecMulMatrix4, v, m);
        let d = tree.analytic_derivatives(f);
        let AnalyticDerivatives::ZeroStub(p) = d else {
            panic!("expected a stub, got {:?}", d);
        };
        assert_eq!(tree.get(p[DDX]), &Expression::Constant(Value::float3(0.0, 0.0, 0.0)));
    }

    #[test_log::test]
    fn fmod_forwards_dividend() {
        let mut tree = Tree::new();
        let x = input(&mut tree, "x", 1.0, 0.0);
        let y = input(&mut tree, "y", 0.0, 1.0);
        let f = tree.new_binary_op(Operation::Fmod, x, y);
        let dx = tree.analytic_derivatives(x);
        assert_eq!(tree.analytic_derivatives(f), dx);
    }

    #[test_log::test]
    fn min_selects_active_branch() {
        let mut tree = Tree::new();
        let x = input(&mut tree, "x", 1.0, 0.0);
        let y = input(&mut tree, "y", 0.0, 1.0);
        let f = tree.new_min(x, y);
        let ddy = tree.analytic_derivatives(f).ddy().unwrap();
        let Expression::Select { condition, .. } = tree.get(ddy).clone() else {
            panic!("expected select");
        };
        assert_eq!(op(&tree, condition), (Operation::Less, vec![x, y]));
    }

    #[test_log::test]
    fn constants_differentiate_to_typed_zero() {
        let mut tree = Tree::new();
        let c = tree.new_constant(Value::double3(1.0, 2.0, 3.0));
        let ddx = tree.analytic_derivatives(c).ddx().unwrap();
        assert_eq!(tree.get(ddx), &Expression::Constant(Value::zero(ValueType::Float3)));
    }

    #[test_log::test]
    fn derivatives_are_memoised() {
        let mut tree = Tree::new();
        let x = input(&mut tree, "x", 1.0, 0.0);
        let f = tree.new_sin(x);
        let first = tree.analytic_derivatives(f);
        let size = tree.len();
        assert_eq!(tree.analytic_derivatives(f), first);
        assert_eq!(tree.len(), size);
    }
}
