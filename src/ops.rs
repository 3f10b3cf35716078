//! Operation catalog.
//!
//! Every operation has exactly one [`OperationDescriptor`]. Besides the
//! static metadata (name, symbol, arity, preshader opcode) the descriptor
//! carries the behaviour shared by all passes:
//!
//! - [`InputRule`]: what each input is requested as,
//! - [`ResultRule`]: operand/result types and bounds,
//! - [`DerivativeRule`]: the calculus rule,
//! - [`ShaderTemplate`]: native and extended-precision code templates.
//!
//! Propagation, emission, derivatives and the temporal rewrite all read the
//! same record, so they cannot disagree about an operation.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::derivative::{rules, DerivativeFn};
use crate::prepared::{combine_components, merge_prepared_types, PreparedComponent, PreparedType};
use crate::preshader::Opcode;
use crate::requested::RequestedType;
use crate::types::{
    combine_component_types, make_value_type, max_bound, min_bound, ComponentBounds,
    ComponentType, ValueType,
};

// --- Behaviour records ---

/// How an operation requests its inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputRule {
    /// Every input gets the node's own request.
    Propagate,
    /// Reductions read the whole vector.
    FullVector,
    /// `(vector3, matrix4x4)`
    VectorMatrix,
    /// `(matrix4x4, vector3)`
    MatrixVector,
}

/// How operand and result types are derived from the prepared inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultRule {
    /// Result is the merged input type.
    Merged,
    /// Merged, and a constant-zero operand makes the result constant zero.
    Product,
    /// Single component carrying the merged bounds.
    Reduce,
    /// Merged type without extended precision.
    NonLwc,
    /// Non-extended-precision result with every component clamped to the bounds.
    Bounded(ComponentBounds),
    /// Listed operands and the result lose extended precision.
    NonLwcInputs(&'static [usize]),
    /// Boolean result, merged shape.
    Boolean,
    /// Per-component bounds of `min(a, b)`.
    MinBound,
    /// Per-component bounds of `max(a, b)`.
    MaxBound,
    /// `mul(v, M)`; `lwc` allows an extended-precision variant.
    VectorTimesMatrix { lwc: bool },
    /// `mul(M, v)`; never extended precision.
    MatrixTimesVector,
}

/// Calculus rule applied by the derivative synthesizer.
#[derive(Clone, Copy)]
pub enum DerivativeRule {
    /// No derivative exists.
    Unavailable,
    /// Zero everywhere; inputs are not consulted.
    Zero,
    /// Zero vector placeholder for operations with no analytic rule yet.
    Stub,
    Rule(DerivativeFn),
}

impl std::fmt::Debug for DerivativeRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => f.write_str("Unavailable"),
            Self::Zero => f.write_str("Zero"),
            Self::Stub => f.write_str("Stub"),
            Self::Rule(_) => f.write_str("Rule"),
        }
    }
}

/// Shader code templates; `%` is replaced by the inputs in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderTemplate {
    None,
    /// Emitted as a local. `lwc` is used when operands are extended precision;
    /// `None` means the native form handles both.
    Call {
        native: &'static str,
        lwc: Option<&'static str>,
    },
    /// Inline `(-%)`, or `LWCNegate(%)` as a local.
    Negate,
}

/// Static description of one operation.
#[derive(Clone, Copy, Debug)]
pub struct OperationDescriptor {
    pub name: &'static str,
    pub symbol: &'static str,
    pub input_count: usize,
    pub preshader_opcode: Option<Opcode>,
    pub inputs: InputRule,
    pub result: ResultRule,
    pub derivative: DerivativeRule,
    pub shader: ShaderTemplate,
}

/// Resolved operand and result types of one operation node.
#[derive(Clone, Debug, PartialEq)]
pub struct OperationTypes {
    /// Type each input is emitted as.
    pub input_types: Vec<ValueType>,
    pub result: PreparedType,
    /// Operands are extended precision; selects the emulated template.
    pub is_lwc: bool,
}

impl OperationDescriptor {
    /// Requested type of every input, given the node's own request.
    pub fn requested_types(&self, requested: RequestedType) -> Vec<RequestedType> {
        let mut types = vec![requested; self.input_count];
        match self.inputs {
            InputRule::Propagate => {}
            InputRule::FullVector => types[0] = RequestedType::VECTOR4,
            InputRule::VectorMatrix => {
                types[0] = RequestedType::VECTOR3;
                types[1] = RequestedType::MATRIX4X4;
            }
            InputRule::MatrixVector => {
                types[0] = RequestedType::MATRIX4X4;
                types[1] = RequestedType::VECTOR3;
            }
        }
        types
    }

    /// Operand and result types from the inputs' prepared types.
    ///
    /// `inputs` must hold one prepared type per input, prepared under
    /// [`requested_types`](Self::requested_types).
    pub fn operation_types(&self, inputs: &[&PreparedType]) -> OperationTypes {
        match self.result {
            ResultRule::VectorTimesMatrix { .. } | ResultRule::MatrixTimesVector => {
                self.matrix_types(inputs)
            }
            _ => self.merged_types(inputs),
        }
    }

    fn matrix_types(&self, inputs: &[&PreparedType]) -> OperationTypes {
        let mut component = PreparedComponent::default();
        let mut component_type = ComponentType::Void;
        for input in inputs {
            component = combine_components(component, input.merged_component());
            component_type = combine_component_types(component_type, input.component_type);
        }

        let (input_types, result_type, is_lwc) = match self.result {
            ResultRule::VectorTimesMatrix { lwc: true } => (
                vec![make_value_type(component_type, 3), make_value_type(component_type, 16)],
                make_value_type(component_type, 3),
                component_type.is_lwc(),
            ),
            ResultRule::VectorTimesMatrix { lwc: false } => {
                (vec![ValueType::Float3, ValueType::Float4x4], ValueType::Float3, false)
            }
            _ => (vec![ValueType::Float4x4, ValueType::Float3], ValueType::Float3, false),
        };
        OperationTypes {
            input_types,
            result: PreparedType::with_component(result_type, component),
            is_lwc,
        }
    }

    fn merged_types(&self, inputs: &[&PreparedType]) -> OperationTypes {
        let merged = inputs
            .iter()
            .fold(PreparedType::default(), |acc, t| merge_prepared_types(&acc, t));
        let merged_value_type = merged.value_type();
        let mut input_types = vec![merged_value_type; inputs.len()];
        let is_lwc = merged.component_type == ComponentType::Double;

        let result = match self.result {
            ResultRule::Merged | ResultRule::Product => merged,
            ResultRule::Reduce => PreparedType::with_component(
                make_value_type(merged.component_type, 1),
                merged.merged_component(),
            ),
            ResultRule::NonLwc => merged.non_lwc(),
            ResultRule::Bounded(bounds) => {
                let mut result = merged.non_lwc();
                for i in 0..result.components.len() {
                    result.set_component_bounds(i, bounds);
                }
                result
            }
            ResultRule::NonLwcInputs(indices) => {
                for &i in indices {
                    input_types[i] = merged_value_type.non_lwc();
                }
                merged.non_lwc()
            }
            ResultRule::Boolean => PreparedType {
                component_type: ComponentType::Bool,
                ..merged
            },
            ResultRule::MinBound | ResultRule::MaxBound => {
                let combine = if self.result == ResultRule::MinBound { min_bound } else { max_bound };
                let mut result = merged;
                for i in 0..result.components.len() {
                    let bounds = combine(inputs[0].component_bounds(i), inputs[1].component_bounds(i));
                    result.set_component_bounds(i, bounds);
                }
                result
            }
            ResultRule::VectorTimesMatrix { .. } | ResultRule::MatrixTimesVector => {
                unreachable!("matrix operations are typed by matrix_types")
            }
        };
        OperationTypes { input_types, result, is_lwc }
    }

    /// Template text for the given precision.
    pub fn shader_template(&self, is_lwc: bool) -> Option<(&'static str, bool)> {
        match self.shader {
            ShaderTemplate::None => None,
            ShaderTemplate::Call { native, lwc } => {
                Some((if is_lwc { lwc.unwrap_or(native) } else { native }, false))
            }
            ShaderTemplate::Negate if is_lwc => Some(("LWCNegate(%)", false)),
            ShaderTemplate::Negate => Some(("(-%)", true)),
        }
    }
}

// --- Catalog ---

const fn call(native: &'static str, lwc: &'static str) -> ShaderTemplate {
    ShaderTemplate::Call { native, lwc: Some(lwc) }
}

const fn native(native: &'static str) -> ShaderTemplate {
    ShaderTemplate::Call { native, lwc: None }
}

macro_rules! define_operations {
    ($(
        $variant:ident => $name:literal, $symbol:literal, $arity:literal, $opcode:expr,
            $inputs:expr, $result:expr, $derivative:expr, $shader:expr;
    )*) => {
        /// Operation identifiers.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Operation {
            $($variant,)*
        }

        impl Operation {
            pub const ALL: &'static [Operation] = &[$(Operation::$variant,)*];

            /// Identifier as written in source, e.g. `"Sub"`.
            pub const fn ident(self) -> &'static str {
                match self {
                    $(Operation::$variant => stringify!($variant),)*
                }
            }
        }

        /// Descriptor of `op`.
        pub fn describe(op: Operation) -> OperationDescriptor {
            use InputRule::*;
            use ResultRule::*;
            match op {
                $(Operation::$variant => OperationDescriptor {
                    name: $name,
                    symbol: $symbol,
                    input_count: $arity,
                    preshader_opcode: $opcode,
                    inputs: $inputs,
                    result: $result,
                    derivative: $derivative,
                    shader: $shader,
                },)*
            }
        }
    };
}

use DerivativeRule::{Rule, Stub, Unavailable, Zero};

define_operations! {
    None => "None", "", 0, Option::None, Propagate, Merged, Unavailable, ShaderTemplate::None;

    // Unary
    Abs => "Abs", "abs", 1, Some(Opcode::Abs), Propagate, Merged, Rule(rules::abs), call("abs(%)", "LWCAbs(%)");
    Neg => "Neg", "-", 1, Some(Opcode::Neg), Propagate, Merged, Rule(rules::neg), ShaderTemplate::Negate;
    Rcp => "Rcp", "/", 1, Some(Opcode::Rcp), Propagate, NonLwc, Rule(rules::rcp), call("rcp(%)", "LWCRcp(%)");
    Sqrt => "Sqrt", "sqrt", 1, Some(Opcode::Sqrt), Propagate, NonLwc, Rule(rules::sqrt), call("sqrt(%)", "LWCSqrt(%)");
    Rsqrt => "Rsqrt", "rsqrt", 1, Some(Opcode::Rsqrt), Propagate, NonLwc, Rule(rules::rsqrt), call("rsqrt(%)", "LWCRsqrt(%)");
    Log2 => "Log2", "log2", 1, Some(Opcode::Log2), Propagate, NonLwcInputs(&[0]), Rule(rules::log2), native("log2(%)");
    Exp2 => "Exp2", "exp2", 1, Option::None, Propagate, NonLwcInputs(&[0]), Rule(rules::exp2), native("exp2(%)");
    Frac => "Frac", "frac", 1, Some(Opcode::Frac), Propagate, Bounded(ComponentBounds::UNIT), Rule(rules::forward_first), call("frac(%)", "LWCFrac(%)");
    Floor => "Floor", "floor", 1, Some(Opcode::Floor), Propagate, Merged, Zero, call("floor(%)", "LWCFloor(%)");
    Ceil => "Ceil", "ceil", 1, Some(Opcode::Ceil), Propagate, Merged, Zero, call("ceil(%)", "LWCCeil(%)");
    Round => "Round", "round", 1, Some(Opcode::Round), Propagate, Merged, Zero, call("round(%)", "LWCRound(%)");
    Trunc => "Trunc", "trunc", 1, Some(Opcode::Trunc), Propagate, Merged, Zero, call("trunc(%)", "LWCTrunc(%)");
    Saturate => "Saturate", "saturate", 1, Some(Opcode::Saturate), Propagate, Bounded(ComponentBounds::UNIT), Rule(rules::saturate), call("saturate(%)", "LWCSaturate(%)");
    Sign => "Sign", "sign", 1, Some(Opcode::Sign), Propagate, NonLwc, Zero, call("sign(%)", "LWCSign(%)");
    Length => "Length", "length", 1, Some(Opcode::Length), FullVector, Reduce, Rule(rules::length), call("length(%)", "LWCLength(%)");
    Normalize => "Normalize", "normalize", 1, Some(Opcode::Normalize), FullVector, NonLwc, Rule(rules::normalize), call("normalize(%)", "LWCNormalize(%)");
    Sum => "Sum", "sum", 1, Option::None, FullVector, Reduce, Rule(rules::sum), call("VectorSum(%)", "LWCVectorSum(%)");
    Sin => "Sin", "sin", 1, Some(Opcode::Sin), Propagate, Bounded(ComponentBounds::SIGNED_UNIT), Rule(rules::sin), call("sin(%)", "LWCSin(%)");
    Cos => "Cos", "cos", 1, Some(Opcode::Cos), Propagate, Bounded(ComponentBounds::SIGNED_UNIT), Rule(rules::cos), call("cos(%)", "LWCCos(%)");
    Tan => "Tan", "tan", 1, Some(Opcode::Tan), Propagate, NonLwc, Rule(rules::tan), call("tan(%)", "LWCTan(%)");
    Asin => "Asin", "asin", 1, Some(Opcode::Asin), Propagate, NonLwc, Rule(rules::asin), call("asin(%)", "LWCAsin(%)");
    AsinFast => "AsinFast", "asinFast", 1, Some(Opcode::Asin), Propagate, NonLwc, Rule(rules::asin), call("asinFast(%)", "LWCAsin(%)");
    Acos => "Acos", "acos", 1, Some(Opcode::Acos), Propagate, NonLwc, Rule(rules::acos), call("acos(%)", "LWCAcos(%)");
    AcosFast => "AcosFast", "acosFast", 1, Some(Opcode::Acos), Propagate, NonLwc, Rule(rules::acos), call("acosFast(%)", "LWCAcos(%)");
    Atan => "Atan", "atan", 1, Some(Opcode::Atan), Propagate, NonLwc, Rule(rules::atan), call("atan(%)", "LWCAtan(%)");
    AtanFast => "AtanFast", "atanFast", 1, Some(Opcode::Atan), Propagate, NonLwc, Rule(rules::atan), call("atanFast(%)", "LWCAtan(%)");

    // Binary
    Add => "Add", "+", 2, Some(Opcode::Add), Propagate, Merged, Rule(rules::add), call("(% + %)", "LWCAdd(%, %)");
    Sub => "Subtract", "-", 2, Some(Opcode::Sub), Propagate, Merged, Rule(rules::sub), call("(% - %)", "LWCSubtract(%, %)");
    Mul => "Multiply", "*", 2, Some(Opcode::Mul), Propagate, Product, Rule(rules::mul), call("(% * %)", "LWCMultiply(%, %)");
    Div => "Divide", "/", 2, Some(Opcode::Div), Propagate, Merged, Rule(rules::div), call("(% / %)", "LWCDivide(%, %)");
    Fmod => "Fmod", "%", 2, Some(Opcode::Fmod), Propagate, NonLwcInputs(&[1]), Rule(rules::forward_first), call("fmod(%, %)", "LWCFmod(%, %)");
    PowPositiveClamped => "PowPositiveClamped", "PowPositiveClamped", 2, Option::None, Propagate, NonLwcInputs(&[0, 1]), Rule(rules::pow_positive_clamped), native("PositiveClampedPow(%, %)");
    Atan2 => "Atan2", "atan2", 2, Some(Opcode::Atan2), Propagate, NonLwcInputs(&[0, 1]), Rule(rules::atan2), native("atan2(%, %)");
    Atan2Fast => "Atan2Fast", "atan2Fast", 2, Some(Opcode::Atan2), Propagate, NonLwcInputs(&[0, 1]), Rule(rules::atan2), native("atan2Fast(%, %)");
    Min => "Min", "min", 2, Some(Opcode::Min), Propagate, MinBound, Rule(rules::min), call("min(%, %)", "LWCMin(%, %)");
    Max => "Max", "max", 2, Some(Opcode::Max), Propagate, MaxBound, Rule(rules::max), call("max(%, %)", "LWCMax(%, %)");
    Less => "Less", "<", 2, Some(Opcode::Less), Propagate, Boolean, Zero, call("(% < %)", "LWCLess(%, %)");
    Greater => "Greater", ">", 2, Some(Opcode::Greater), Propagate, Boolean, Zero, call("(% > %)", "LWCGreater(%, %)");
    LessEqual => "LessEqual", "<=", 2, Option::None, Propagate, Boolean, Zero, call("(% <= %)", "LWCLessEqual(%, %)");
    GreaterEqual => "GreaterEqual", ">=", 2, Option::None, Propagate, Boolean, Zero, call("(% >= %)", "LWCGreaterEqual(%, %)");
    VecMulMatrix3 => "VecMulMatrix3", "mul", 2, Option::None, VectorMatrix, VectorTimesMatrix { lwc: false }, Stub, native("mul(%, (float3x3)%)");
    VecMulMatrix4 => "VecMulMatrix4", "mul", 2, Option::None, VectorMatrix, VectorTimesMatrix { lwc: true }, Stub, call("mul(%, %)", "LWCMultiply(%, %)");
    Matrix3MulVec => "Matrix3MulVec", "mul", 2, Option::None, MatrixVector, MatrixTimesVector, Stub, native("mul((float3x3)%, %)");
    Matrix4MulVec => "Matrix4MulVec", "mul", 2, Option::None, MatrixVector, MatrixTimesVector, Stub, native("mul(%, %)");
}

static BY_NAME: Lazy<HashMap<&'static str, Operation>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for &op in Operation::ALL {
        map.insert(op.ident(), op);
        map.insert(describe(op).name, op);
    }
    map
});

/// Looks an operation up by identifier (`"Sub"`) or display name (`"Subtract"`).
pub fn op_by_name(name: &str) -> Option<Operation> {
    BY_NAME.get(name).copied()
}

impl Operation {
    pub fn name(self) -> &'static str {
        describe(self).name
    }

    pub fn input_count(self) -> usize {
        describe(self).input_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prepared::Evaluation;
    use crate::types::ComponentBound;

    #[test_log::test]
    fn none_is_a_zero_arity_nop() {
        let d = describe(Operation::None);
        assert_eq!(d.name, "None");
        assert_eq!(d.symbol, "");
        assert_eq!(d.input_count, 0);
        assert_eq!(d.preshader_opcode, Option::None);
    }

    #[test_log::test]
    fn arity_matches_opcode_arity() {
        for &op in Operation::ALL {
            let d = describe(op);
            if let Some(opcode) = d.preshader_opcode {
                assert_eq!(opcode.input_count(), d.input_count, "{}", d.name);
            }
        }
    }

    #[test_log::test]
    fn names_resolve_both_ways() {
        assert_eq!(op_by_name("Sub"), Some(Operation::Sub));
        assert_eq!(op_by_name("Subtract"), Some(Operation::Sub));
        assert_eq!(op_by_name("AtanFast"), Some(Operation::AtanFast));
        assert_eq!(op_by_name("nope"), Option::None);
    }

    #[test_log::test]
    fn reductions_request_full_vectors() {
        for op in [Operation::Length, Operation::Normalize, Operation::Sum] {
            assert_eq!(describe(op).requested_types(RequestedType::SCALAR), vec![RequestedType::VECTOR4]);
        }
        assert_eq!(
            describe(Operation::Add).requested_types(RequestedType::VECTOR2),
            vec![RequestedType::VECTOR2; 2]
        );
        assert_eq!(
            describe(Operation::Matrix4MulVec).requested_types(RequestedType::SCALAR),
            vec![RequestedType::MATRIX4X4, RequestedType::VECTOR3]
        );
    }

    #[test_log::test]
    fn length_reduces_to_scalar() {
        let v = PreparedType::new(ValueType::Double3, Evaluation::Shader);
        let types = describe(Operation::Length).operation_types(&[&v]);
        assert_eq!(types.result.value_type(), ValueType::Double1);
        assert!(types.is_lwc);
    }

    #[test_log::test]
    fn fmod_strips_precision_from_divisor_only() {
        let a = PreparedType::new(ValueType::Double2, Evaluation::Shader);
        let b = PreparedType::new(ValueType::Float1, Evaluation::Shader);
        let types = describe(Operation::Fmod).operation_types(&[&a, &b]);
        assert_eq!(types.input_types, vec![ValueType::Double2, ValueType::Float2]);
        assert_eq!(types.result.value_type(), ValueType::Float2);
    }

    #[test_log::test]
    fn comparisons_are_boolean() {
        let a = PreparedType::new(ValueType::Float3, Evaluation::Shader);
        let types = describe(Operation::Less).operation_types(&[&a, &a]);
        assert_eq!(types.result.value_type(), ValueType::Bool3);
    }

    #[test_log::test]
    fn sin_is_signed_unit() {
        let a = PreparedType::new(ValueType::Double1, Evaluation::Shader);
        let types = describe(Operation::Sin).operation_types(&[&a]);
        assert_eq!(types.result.value_type(), ValueType::Float1);
        assert_eq!(types.result.component_bounds(0), ComponentBounds::SIGNED_UNIT);
    }

    #[test_log::test]
    fn max_bounds_come_from_each_operand() {
        let mut a = PreparedType::new(ValueType::Float1, Evaluation::Shader);
        a.set_component_bounds(0, ComponentBounds::new(ComponentBound::NegOne, ComponentBound::One));
        let b = PreparedType::new(ValueType::Float1, Evaluation::Shader);
        let types = describe(Operation::Max).operation_types(&[&a, &b]);
        assert_eq!(
            types.result.component_bounds(0),
            ComponentBounds::new(ComponentBound::NegOne, ComponentBound::FloatMax)
        );
    }

    #[test_log::test]
    fn matrix_ops_pin_operand_types() {
        let v = PreparedType::new(ValueType::Double3, Evaluation::Shader);
        let m = PreparedType::new(ValueType::Double4x4, Evaluation::Shader);

        let types = describe(Operation::VecMulMatrix4).operation_types(&[&v, &m]);
        assert_eq!(types.input_types, vec![ValueType::Double3, ValueType::Double4x4]);
        assert_eq!(types.result.value_type(), ValueType::Double3);
        assert!(types.is_lwc);

        let types = describe(Operation::VecMulMatrix3).operation_types(&[&v, &m]);
        assert_eq!(types.input_types, vec![ValueType::Float3, ValueType::Float4x4]);
        assert!(!types.is_lwc);

        let types = describe(Operation::Matrix3MulVec).operation_types(&[&m, &v]);
        assert_eq!(types.input_types, vec![ValueType::Float4x4, ValueType::Float3]);
        assert_eq!(types.result.value_type(), ValueType::Float3);
    }

    #[test_log::test]
    fn negate_is_inline_only_when_native() {
        let d = describe(Operation::Neg);
        assert_eq!(d.shader_template(false), Some(("(-%)", true)));
        assert_eq!(d.shader_template(true), Some(("LWCNegate(%)", false)));
        assert_eq!(describe(Operation::Log2).shader_template(true), Some(("log2(%)", false)));
    }
}
