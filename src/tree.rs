//! Expression arena.
//!
//! Nodes live in a single append-only `Vec` and refer to each other through
//! [`ExprId`] handles, so a subexpression can be shared by any number of
//! consumers. Nodes never change after construction; everything derived from
//! them (types, code, derivatives) is cached outside the node.

use std::collections::HashMap;

use log::trace;

use crate::derivative::{AnalyticDerivatives, Partials};
use crate::ops::{describe, Operation};
use crate::requested::RequestedType;
use crate::types::ValueType;
use crate::value::Value;

/// Handle to a node in a [`Tree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub(crate) u32);

impl ExprId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A named GPU-side input.
#[derive(Clone, Debug, PartialEq)]
pub struct ExternalInput {
    pub name: String,
    /// `Void` until the environment resolves it.
    pub value_type: ValueType,
    pub derivatives: Option<Partials>,
    pub previous_frame: Option<ExprId>,
}

impl ExternalInput {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            derivatives: None,
            previous_frame: None,
        }
    }

    pub fn with_derivatives(mut self, derivatives: Partials) -> Self {
        self.derivatives = Some(derivatives);
        self
    }

    pub fn with_previous_frame(mut self, previous: ExprId) -> Self {
        self.previous_frame = Some(previous);
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    Constant(Value),
    External(ExternalInput),
    Operation { op: Operation, inputs: Vec<ExprId> },
    Select { condition: ExprId, if_true: ExprId, if_false: ExprId },
}

/// Guard used by derivative rules unless configured otherwise.
pub const DEFAULT_DERIVATIVE_EPSILON: f32 = 0.00001;

/// Expression arena plus the tree-level derivative and previous-frame caches.
#[derive(Debug)]
pub struct Tree {
    nodes: Vec<Expression>,
    pub(crate) derivative_epsilon: f32,
    pub(crate) derivatives: HashMap<ExprId, AnalyticDerivatives>,
    pub(crate) previous_frames: HashMap<(ExprId, RequestedType), ExprId>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::with_derivative_epsilon(DEFAULT_DERIVATIVE_EPSILON)
    }
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_derivative_epsilon(derivative_epsilon: f32) -> Self {
        Self {
            nodes: Vec::new(),
            derivative_epsilon,
            derivatives: HashMap::new(),
            previous_frames: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// # Panics
    ///
    /// Panics if `id` came from another tree.
    pub fn get(&self, id: ExprId) -> &Expression {
        &self.nodes[id.index()]
    }

    fn push(&mut self, expr: Expression) -> ExprId {
        let id = ExprId(self.nodes.len() as u32);
        trace!("new node {:?}: {:?}", id, expr);
        self.nodes.push(expr);
        id
    }

    pub fn new_constant(&mut self, value: Value) -> ExprId {
        self.push(Expression::Constant(value))
    }

    pub fn new_float(&mut self, v: f32) -> ExprId {
        self.new_constant(Value::float(v))
    }

    pub fn new_external(&mut self, input: ExternalInput) -> ExprId {
        self.push(Expression::External(input))
    }

    /// # Panics
    ///
    /// Panics if `inputs.len()` differs from the operation's arity.
    pub fn new_operation(&mut self, op: Operation, inputs: &[ExprId]) -> ExprId {
        let desc = describe(op);
        assert_eq!(
            desc.input_count,
            inputs.len(),
            "{} takes {} inputs, got {}",
            desc.name,
            desc.input_count,
            inputs.len()
        );
        for input in inputs {
            assert!(input.index() < self.nodes.len(), "{} input {:?} is not in this tree", desc.name, input);
        }
        self.push(Expression::Operation { op, inputs: inputs.to_vec() })
    }

    pub fn new_unary_op(&mut self, op: Operation, input: ExprId) -> ExprId {
        self.new_operation(op, &[input])
    }

    pub fn new_binary_op(&mut self, op: Operation, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.new_operation(op, &[lhs, rhs])
    }

    pub fn new_select(&mut self, condition: ExprId, if_true: ExprId, if_false: ExprId) -> ExprId {
        self.push(Expression::Select { condition, if_true, if_false })
    }

    /// `x * x`
    pub fn new_pow2(&mut self, input: ExprId) -> ExprId {
        self.new_mul(input, input)
    }
}

macro_rules! unary_constructors {
    ($($fn_name:ident => $op:ident),* $(,)?) => {
        impl Tree {
            $(
                pub fn $fn_name(&mut self, input: ExprId) -> ExprId {
                    self.new_unary_op(Operation::$op, input)
                }
            )*
        }
    };
}

macro_rules! binary_constructors {
    ($($fn_name:ident => $op:ident),* $(,)?) => {
        impl Tree {
            $(
                pub fn $fn_name(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
                    self.new_binary_op(Operation::$op, lhs, rhs)
                }
            )*
        }
    };
}

unary_constructors! {
    new_abs => Abs,
    new_neg => Neg,
    new_rcp => Rcp,
    new_sqrt => Sqrt,
    new_rsqrt => Rsqrt,
    new_log2 => Log2,
    new_exp2 => Exp2,
    new_frac => Frac,
    new_floor => Floor,
    new_saturate => Saturate,
    new_sign => Sign,
    new_length => Length,
    new_normalize => Normalize,
    new_sum => Sum,
    new_sin => Sin,
    new_cos => Cos,
}

binary_constructors! {
    new_add => Add,
    new_sub => Sub,
    new_mul => Mul,
    new_div => Div,
    new_min => Min,
    new_max => Max,
    new_less => Less,
    new_greater => Greater,
    new_pow_positive_clamped => PowPositiveClamped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn handles_are_sequential() {
        let mut tree = Tree::new();
        let a = tree.new_float(1.0);
        let b = tree.new_float(2.0);
        let sum = tree.new_add(a, b);
        assert_eq!((a.index(), b.index(), sum.index()), (0, 1, 2));
        assert_eq!(
            tree.get(sum),
            &Expression::Operation { op: Operation::Add, inputs: vec![a, b] }
        );
    }

    #[test_log::test]
    fn shared_inputs_are_not_copied() {
        let mut tree = Tree::new();
        let x = tree.new_external(ExternalInput::new("x", ValueType::Float1));
        let sq = tree.new_pow2(x);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.get(sq), &Expression::Operation { op: Operation::Mul, inputs: vec![x, x] });
    }

    #[test_log::test]
    #[should_panic(expected = "Multiply takes 2 inputs, got 1")]
    fn arity_mismatch_panics() {
        let mut tree = Tree::new();
        let a = tree.new_float(1.0);
        tree.new_operation(Operation::Mul, &[a]);
    }

    #[test_log::test]
    fn every_operation_accepts_its_arity() {
        let mut tree = Tree::new();
        let a = tree.new_float(1.0);
        for &op in Operation::ALL {
            let inputs = vec![a; describe(op).input_count];
            let id = tree.new_operation(op, &inputs);
            assert!(matches!(tree.get(id), Expression::Operation { inputs: i, .. } if i.len() == inputs.len()));
        }
    }
}
