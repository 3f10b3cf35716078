//! Preshader code for operation nodes.

use crate::ops::{describe, Operation};
use crate::prepared::PreparedType;
use crate::preshader::PreshaderData;
use crate::requested::RequestedType;
use crate::tree::ExprId;
use crate::types::ValueType;

use super::{EmitContext, ScopeId};

/// Writes the inputs in order, then the opcode. Net stack effect is one push.
///
/// # Panics
///
/// Panics if the operation has no preshader opcode; preparation marks such
/// nodes as shader-only, so only a caller bug gets here.
pub(super) fn emit_operation(
    ctx: &mut EmitContext<'_>,
    scope: ScopeId,
    requested: RequestedType,
    op: Operation,
    inputs: &[ExprId],
    data: &mut PreshaderData,
) -> ValueType {
    let desc = describe(op);
    let opcode = desc
        .preshader_opcode
        .unwrap_or_else(|| panic!("{} has no preshader opcode", desc.name));
    let requested_types = desc.requested_types(requested);

    let mut input_prepared: Vec<PreparedType> = Vec::with_capacity(inputs.len());
    for (&input, &input_requested) in inputs.iter().zip(&requested_types) {
        ctx.get_value_preshader(input, scope, input_requested, data);
        input_prepared.push(ctx.prepared_type(input, scope, input_requested));
    }

    let pops = desc.input_count.saturating_sub(1);
    if pops > 0 {
        assert!(
            ctx.preshader_stack_position >= pops,
            "{} pops {} values, stack holds {}",
            desc.name,
            pops,
            ctx.preshader_stack_position
        );
        ctx.preshader_stack_position -= pops;
    }

    data.write_opcode(opcode);
    let refs: Vec<&PreparedType> = input_prepared.iter().collect();
    desc.operation_types(&refs).result.value_type()
}
