//! Type and bounds propagation for operation and select nodes.

use crate::error::PrepareError;
use crate::ops::{describe, Operation, ResultRule};
use crate::prepared::{merge_prepared_types, Evaluation, PreparedType};
use crate::requested::RequestedType;
use crate::tree::ExprId;
use crate::types::ValueType;

use super::{EmitContext, ScopeId};

pub(super) fn prepare_operation(
    ctx: &mut EmitContext<'_>,
    scope: ScopeId,
    requested: RequestedType,
    op: Operation,
    inputs: &[ExprId],
) -> Result<PreparedType, PrepareError> {
    let desc = describe(op);
    let requested_types = desc.requested_types(requested);

    let mut input_types = Vec::with_capacity(inputs.len());
    let mut zero_input = false;
    for (&input, &input_requested) in inputs.iter().zip(&requested_types) {
        let ty = ctx.prepare_expression(input, scope, input_requested)?;
        if ty.is_void() {
            return Err(PrepareError::Unresolved);
        }
        if !ty.is_numeric() {
            return Err(ctx.diagnostics.report("Invalid arithmetic between non-numeric types"));
        }

        match ty.evaluation(input_requested) {
            Evaluation::ConstantZero => zero_input = true,
            Evaluation::Constant => {
                let value = ctx
                    .get_value_constant(input, scope, input_requested)
                    .map_err(|e| ctx.diagnostics.report(e.to_string()))?;
                zero_input |= value.is_zero();
            }
            _ => {}
        }
        input_types.push(ty);
    }

    let refs: Vec<&PreparedType> = input_types.iter().collect();
    let types = desc.operation_types(&refs);

    // Operands are cast to their operand types at emission; casts never
    // cross between matrices and vectors.
    for (ty, operand) in input_types.iter().zip(&types.input_types) {
        let actual = ty.value_type();
        if actual.is_matrix() != operand.is_matrix() {
            return Err(ctx.diagnostics.report(format!(
                "{} expects a {} operand, got {}",
                desc.name,
                operand.name(),
                actual.name()
            )));
        }
    }
    let result_type = types.result.value_type();
    if !result_type.is_numeric() {
        return Err(ctx.diagnostics.report(format!(
            "{} has no result type for {} operands",
            desc.name,
            types
                .input_types
                .iter()
                .map(|t| t.name())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    let mut result = types.result;

    if desc.preshader_opcode.is_none() {
        result.set_evaluation(Evaluation::Shader);
    }
    if desc.result == ResultRule::Product && zero_input {
        // x * 0 == 0
        result.set_evaluation(Evaluation::ConstantZero);
    }
    Ok(result)
}

pub(super) fn prepare_select(
    ctx: &mut EmitContext<'_>,
    scope: ScopeId,
    requested: RequestedType,
    condition: ExprId,
    if_true: ExprId,
    if_false: ExprId,
) -> Result<PreparedType, PrepareError> {
    let condition_type = ctx.prepare_expression(condition, scope, RequestedType::SCALAR)?;
    let condition_evaluation = condition_type.evaluation(RequestedType::SCALAR);

    if condition_evaluation.is_constant() {
        let branch = if constant_condition(ctx, scope, condition)? { if_true } else { if_false };
        let mut result = ctx.prepare_expression(branch, scope, requested)?;
        result.merge_evaluation(Evaluation::Shader);
        return Ok(result);
    }

    let false_type = ctx.prepare_expression(if_false, scope, requested)?;
    let true_type = ctx.prepare_expression(if_true, scope, requested)?;
    if false_type.component_type != true_type.component_type {
        return Err(ctx.diagnostics.report("Type mismatch"));
    }

    let mut result = merge_prepared_types(&false_type, &true_type);
    result.merge_evaluation(condition_evaluation);
    result.merge_evaluation(Evaluation::Shader);
    Ok(result)
}

/// Folded value of a constant select condition.
pub(super) fn constant_condition(
    ctx: &mut EmitContext<'_>,
    scope: ScopeId,
    condition: ExprId,
) -> Result<bool, PrepareError> {
    let value = ctx
        .get_value_constant(condition, scope, RequestedType::SCALAR)
        .map_err(|e| ctx.diagnostics.report(e.to_string()))?;
    Ok(value.cast(ValueType::Bool1).as_bool())
}
