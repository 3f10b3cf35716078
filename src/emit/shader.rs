//! Shader code for operation and select nodes.

use crate::ops::{describe, Operation};
use crate::prepared::PreparedType;
use crate::requested::RequestedType;
use crate::tree::ExprId;
use crate::types::ValueType;

use super::{prepare::constant_condition, EmitContext, ScopeId, ShaderValue};

/// # Panics
///
/// Panics if the result type is not numeric or the operation has no template.
pub(super) fn emit_operation(
    ctx: &mut EmitContext<'_>,
    scope: ScopeId,
    requested: RequestedType,
    op: Operation,
    inputs: &[ExprId],
) -> ShaderValue {
    let desc = describe(op);
    let requested_types = desc.requested_types(requested);
    let input_prepared: Vec<PreparedType> = inputs
        .iter()
        .zip(&requested_types)
        .map(|(&input, &input_requested)| ctx.prepared_type(input, scope, input_requested))
        .collect();
    let refs: Vec<&PreparedType> = input_prepared.iter().collect();
    let types = desc.operation_types(&refs);

    let values: Vec<ShaderValue> = inputs
        .iter()
        .zip(&requested_types)
        .zip(&types.input_types)
        .map(|((&input, &input_requested), &ty)| {
            ctx.get_value_shader(input, scope, input_requested, Some(ty))
        })
        .collect();
    let value_refs: Vec<&ShaderValue> = values.iter().collect();

    let result_type = types.result.value_type();
    assert!(
        result_type.is_numeric(),
        "{} produced non-numeric type {}",
        desc.name,
        result_type.name()
    );

    let (template, inline) = desc
        .shader_template(types.is_lwc)
        .unwrap_or_else(|| panic!("{} has no shader form", desc.name));
    if inline {
        ctx.emit_inline_expression(result_type, template, &value_refs)
    } else {
        ctx.emit_expression(scope, result_type, template, &value_refs)
    }
}

/// `[condition, if_true, if_false]`
pub(super) fn emit_select(
    ctx: &mut EmitContext<'_>,
    scope: ScopeId,
    requested: RequestedType,
    local_type: ValueType,
    [condition, if_true, if_false]: [ExprId; 3],
) -> ShaderValue {
    if ctx.evaluation(condition, scope, RequestedType::SCALAR).is_constant() {
        let taken = match constant_condition(ctx, scope, condition) {
            Ok(true) => if_true,
            Ok(false) => if_false,
            Err(e) => panic!("select condition {:?} failed to fold: {}", condition, e),
        };
        return ctx.get_value_shader(taken, scope, requested, None);
    }

    let true_value = ctx.get_value_shader(if_true, scope, requested, Some(local_type));
    let false_value = ctx.get_value_shader(if_false, scope, requested, Some(local_type));
    let condition_value = ctx.get_value_shader(condition, scope, RequestedType::SCALAR, Some(ValueType::Bool1));
    ctx.emit_expression(
        scope,
        local_type,
        "(% ? % : %)",
        &[&condition_value, &true_value, &false_value],
    )
}
