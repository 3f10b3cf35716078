//! Previous-frame rewrite.
//!
//! Builds the expression that evaluates a node with every input replaced by
//! its value on the previous frame. Only structure changes; the new nodes are
//! typed later, when something prepares them.

use log::trace;

use crate::ops::describe;
use crate::requested::RequestedType;
use crate::tree::{ExprId, Expression, Tree};

impl Tree {
    /// Previous-frame counterpart of `id` under `requested`, memoised.
    pub fn previous_frame(&mut self, id: ExprId, requested: RequestedType) -> ExprId {
        if let Some(&cached) = self.previous_frames.get(&(id, requested)) {
            return cached;
        }
        let result = match self.get(id).clone() {
            Expression::Constant(_) => id,
            Expression::External(input) => input.previous_frame.unwrap_or(id),
            Expression::Operation { op, inputs } => {
                let requested_types = describe(op).requested_types(requested);
                let previous: Vec<ExprId> = inputs
                    .iter()
                    .zip(requested_types)
                    .map(|(&input, input_requested)| self.previous_frame(input, input_requested))
                    .collect();
                self.new_operation(op, &previous)
            }
            Expression::Select { condition, if_true, if_false } => {
                let condition = self.previous_frame(condition, RequestedType::SCALAR);
                let if_true = self.previous_frame(if_true, requested);
                let if_false = self.previous_frame(if_false, requested);
                self.new_select(condition, if_true, if_false)
            }
        };
        trace!("previous frame of {:?} under {:?}: {:?}", id, requested, result);
        self.previous_frames.insert((id, requested), result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Operation;
    use crate::tree::ExternalInput;
    use crate::types::ValueType;
    use crate::value::Value;

    #[test_log::test]
    fn rewrites_inputs_to_previous_frame() {
        let mut tree = Tree::new();
        let prev = tree.new_external(ExternalInput::new("PrevPosition", ValueType::Float3));
        let pos = tree.new_external(ExternalInput::new("Position", ValueType::Float3).with_previous_frame(prev));
        let scale = tree.new_float(2.0);
        let f = tree.new_mul(pos, scale);

        let g = tree.previous_frame(f, RequestedType::VECTOR3);
        assert_ne!(g, f);
        assert_eq!(
            tree.get(g),
            &Expression::Operation { op: Operation::Mul, inputs: vec![prev, scale] }
        );
    }

    #[test_log::test]
    fn constants_are_their_own_previous_frame() {
        let mut tree = Tree::new();
        let c = tree.new_constant(Value::float(1.0));
        assert_eq!(tree.previous_frame(c, RequestedType::SCALAR), c);
    }

    #[test_log::test]
    fn reductions_request_inputs_as_vectors() {
        let mut tree = Tree::new();
        let prev = tree.new_external(ExternalInput::new("PrevV", ValueType::Float4));
        let v = tree.new_external(ExternalInput::new("V", ValueType::Float4).with_previous_frame(prev));
        let len = tree.new_length(v);
        tree.previous_frame(len, RequestedType::SCALAR);
        assert!(tree.previous_frames.contains_key(&(v, RequestedType::VECTOR4)));
        assert!(!tree.previous_frames.contains_key(&(v, RequestedType::SCALAR)));
    }

    #[test_log::test]
    fn select_condition_is_scalar() {
        let mut tree = Tree::new();
        let c = tree.new_external(ExternalInput::new("c", ValueType::Bool1));
        let a = tree.new_float(1.0);
        let b = tree.new_float(2.0);
        let s = tree.new_select(c, a, b);
        let p = tree.previous_frame(s, RequestedType::VECTOR2);
        assert_eq!(tree.get(p), &Expression::Select { condition: c, if_true: a, if_false: b });
        assert!(tree.previous_frames.contains_key(&(c, RequestedType::SCALAR)));
    }

    #[test_log::test]
    fn memoised_per_request() {
        let mut tree = Tree::new();
        let x = tree.new_external(ExternalInput::new("x", ValueType::Float1));
        let f = tree.new_sin(x);
        let a = tree.previous_frame(f, RequestedType::SCALAR);
        assert_eq!(tree.previous_frame(f, RequestedType::SCALAR), a);
    }
}
