//! Emission context.
//!
//! [`EmitContext`] drives the three per-node passes over a [`Tree`]:
//!
//! ```text
//! prepare_expression   (id, scope, request) -> PreparedType
//! get_value_shader     (id, scope, request, type) -> ShaderValue
//! get_value_preshader  (id, scope, request, &mut PreshaderData) -> ValueType
//! ```
//!
//! All per-compilation state lives here: caches, scopes, diagnostics and the
//! preshader stack counter. Two contexts never share anything, so independent
//! graphs can be compiled on different threads.

mod prepare;
mod preshader;
mod shader;

use std::collections::HashMap;

use log::{debug, trace};

use crate::config::CompileConfig;
use crate::error::{Diagnostics, PrepareError, PreshaderError};
use crate::prepared::{Evaluation, PreparedType};
use crate::preshader::{Opcode, PreshaderData};
use crate::requested::RequestedType;
use crate::tree::{ExprId, Expression, Tree};
use crate::types::ValueType;
use crate::value::Value;

/// Handle to a scope of an [`EmitContext`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

impl ScopeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Ordered statements of one code block.
#[derive(Debug, Default)]
struct Scope {
    parent: Option<ScopeId>,
    statements: Vec<String>,
    /// `(type, code)` -> declared local.
    locals: HashMap<(ValueType, String), String>,
}

/// Lowered shader code for one node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderValue {
    /// A local's name, a literal, or an inline expression.
    pub code: String,
    pub value_type: ValueType,
}

impl ShaderValue {
    pub fn new(code: impl Into<String>, value_type: ValueType) -> Self {
        Self { code: code.into(), value_type }
    }
}

type PrepareKey = (ExprId, ScopeId, RequestedType);
type ShaderKey = (ExprId, ScopeId, RequestedType, Option<ValueType>);

pub struct EmitContext<'t> {
    tree: &'t Tree,
    pub config: CompileConfig,
    pub diagnostics: Diagnostics,
    prepared: HashMap<PrepareKey, Result<PreparedType, PrepareError>>,
    shader_values: HashMap<ShaderKey, ShaderValue>,
    scopes: Vec<Scope>,
    local_count: usize,
    preshader_stack_position: usize,
}

impl<'t> EmitContext<'t> {
    pub fn new(tree: &'t Tree, config: CompileConfig) -> Self {
        Self {
            tree,
            config,
            diagnostics: Diagnostics::new(),
            prepared: HashMap::new(),
            shader_values: HashMap::new(),
            scopes: vec![Scope::default()],
            local_count: 0,
            preshader_stack_position: 0,
        }
    }

    pub fn tree(&self) -> &'t Tree {
        self.tree
    }

    // --- Scopes ---

    pub fn root_scope(&self) -> ScopeId {
        ScopeId(0)
    }

    /// Opens a child scope; it sees the locals of its ancestors.
    pub fn new_scope(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope { parent: Some(parent), ..Scope::default() });
        id
    }

    /// Statements of `scope`, one per line.
    pub fn scope_source(&self, scope: ScopeId) -> String {
        self.scopes[scope.index()].statements.join("\n")
    }

    pub fn preshader_stack_position(&self) -> usize {
        self.preshader_stack_position
    }

    // --- Prepare ---

    /// Prepared type of `id` under `requested`, memoised.
    ///
    /// [`PrepareError::Unresolved`] is not cached, so a later call retries.
    /// Reported errors are cached and reported once.
    pub fn prepare_expression(
        &mut self,
        id: ExprId,
        scope: ScopeId,
        requested: RequestedType,
    ) -> Result<PreparedType, PrepareError> {
        let key = (id, scope, requested);
        if let Some(cached) = self.prepared.get(&key) {
            return cached.clone();
        }

        let result = self.prepare_node(id, scope, requested).map(|mut ty| {
            ty.restrict_to(requested);
            ty
        });
        trace!("prepare {:?} {:?} -> {:?}", id, requested.components, result);
        if !matches!(result, Err(PrepareError::Unresolved)) {
            self.prepared.insert(key, result.clone());
        }
        result
    }

    fn prepare_node(
        &mut self,
        id: ExprId,
        scope: ScopeId,
        requested: RequestedType,
    ) -> Result<PreparedType, PrepareError> {
        let tree = self.tree;
        match tree.get(id) {
            Expression::Constant(value) => {
                Ok(PreparedType::new(value.value_type, Evaluation::Constant))
            }
            Expression::External(input) => {
                if input.value_type.is_void() {
                    return Err(PrepareError::Unresolved);
                }
                Ok(PreparedType::new(input.value_type, Evaluation::Shader))
            }
            Expression::Operation { op, inputs } => {
                prepare::prepare_operation(self, scope, requested, *op, inputs)
            }
            Expression::Select { condition, if_true, if_false } => {
                prepare::prepare_select(self, scope, requested, *condition, *if_true, *if_false)
            }
        }
    }

    /// Evaluation class of `id`; `None` if it cannot be prepared.
    pub fn evaluation(&mut self, id: ExprId, scope: ScopeId, requested: RequestedType) -> Evaluation {
        match self.prepare_expression(id, scope, requested) {
            Ok(ty) => ty.evaluation(requested),
            Err(_) => Evaluation::None,
        }
    }

    /// Prepared type of a node that must already have prepared successfully.
    ///
    /// # Panics
    ///
    /// Panics if preparation failed; emitting such a node is a caller bug.
    pub(crate) fn prepared_type(&mut self, id: ExprId, scope: ScopeId, requested: RequestedType) -> PreparedType {
        match self.prepare_expression(id, scope, requested) {
            Ok(ty) => ty,
            Err(e) => panic!("emitting {:?}, which failed to prepare: {}", id, e),
        }
    }

    // --- Shader ---

    /// Shader code for `id`, cast to `value_type` when given.
    ///
    /// Constant nodes are folded through the preshader and emitted as
    /// literals (unless `fold_constants` is off); constant-zero nodes become a
    /// zero literal without evaluating anything.
    pub fn get_value_shader(
        &mut self,
        id: ExprId,
        scope: ScopeId,
        requested: RequestedType,
        value_type: Option<ValueType>,
    ) -> ShaderValue {
        let key = (id, scope, requested, value_type);
        if let Some(cached) = self.shader_values.get(&key) {
            return cached.clone();
        }

        let prepared = self.prepared_type(id, scope, requested);
        let value = match prepared.evaluation(requested) {
            Evaluation::ConstantZero => {
                let zero = Value::zero(prepared.value_type());
                ShaderValue::new(zero.to_shader_literal(), zero.value_type)
            }
            Evaluation::Constant if self.config.fold_constants => {
                match self.get_value_constant(id, scope, requested) {
                    Ok(v) => ShaderValue::new(v.to_shader_literal(), v.value_type),
                    Err(e) => panic!("folding {:?} produced a malformed program: {}", id, e),
                }
            }
            _ => self.emit_shader_node(id, scope, requested, &prepared),
        };
        let value = match value_type {
            Some(ty) => cast(value, ty),
            None => value,
        };
        self.shader_values.insert(key, value.clone());
        value
    }

    fn emit_shader_node(
        &mut self,
        id: ExprId,
        scope: ScopeId,
        requested: RequestedType,
        prepared: &PreparedType,
    ) -> ShaderValue {
        let tree = self.tree;
        match tree.get(id) {
            Expression::Constant(value) => ShaderValue::new(value.to_shader_literal(), value.value_type),
            Expression::External(input) => ShaderValue::new(input.name.clone(), input.value_type),
            Expression::Operation { op, inputs } => {
                shader::emit_operation(self, scope, requested, *op, inputs)
            }
            Expression::Select { condition, if_true, if_false } => shader::emit_select(
                self,
                scope,
                requested,
                prepared.value_type(),
                [*condition, *if_true, *if_false],
            ),
        }
    }

    /// Declares `template` with its `%` placeholders filled in as a new local,
    /// or reuses an identical declaration visible from `scope`.
    pub fn emit_expression(
        &mut self,
        scope: ScopeId,
        value_type: ValueType,
        template: &str,
        inputs: &[&ShaderValue],
    ) -> ShaderValue {
        let code = format_template(template, inputs);
        let key = (value_type, code);

        if self.config.dedupe_expressions {
            if let Some(name) = self.find_local(scope, &key) {
                return ShaderValue::new(name, value_type);
            }
        }

        let name = format!("{}{}", self.config.local_prefix, self.local_count);
        self.local_count += 1;
        let statement = format!("const {} {} = {};", value_type.name(), name, key.1);
        debug!("{}", statement);
        let target = &mut self.scopes[scope.index()];
        target.statements.push(statement);
        target.locals.insert(key, name.clone());
        ShaderValue::new(name, value_type)
    }

    /// Substitutes `template` without declaring a local.
    pub fn emit_inline_expression(
        &mut self,
        value_type: ValueType,
        template: &str,
        inputs: &[&ShaderValue],
    ) -> ShaderValue {
        ShaderValue::new(format_template(template, inputs), value_type)
    }

    fn find_local(&self, scope: ScopeId, key: &(ValueType, String)) -> Option<String> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let scope = &self.scopes[id.index()];
            if let Some(name) = scope.locals.get(key) {
                return Some(name.clone());
            }
            current = scope.parent;
        }
        None
    }

    // --- Preshader ---

    /// Appends the program computing `id` to `data` and returns its type.
    ///
    /// Constant-zero nodes are written as a single `ConstantZero` instruction
    /// without visiting their inputs.
    pub fn get_value_preshader(
        &mut self,
        id: ExprId,
        scope: ScopeId,
        requested: RequestedType,
        data: &mut PreshaderData,
    ) -> ValueType {
        let prepared = self.prepared_type(id, scope, requested);
        if prepared.evaluation(requested) == Evaluation::ConstantZero {
            let ty = prepared.value_type();
            data.write_opcode(Opcode::ConstantZero).write_type(ty);
            self.preshader_stack_position += 1;
            return ty;
        }

        let tree = self.tree;
        match tree.get(id) {
            Expression::Constant(value) => {
                data.write_opcode(Opcode::Constant).write_value(value);
                self.preshader_stack_position += 1;
                value.value_type
            }
            Expression::Operation { op, inputs } => {
                preshader::emit_operation(self, scope, requested, *op, inputs, data)
            }
            Expression::External(input) => {
                panic!("external input '{}' has no preshader form", input.name)
            }
            Expression::Select { .. } => panic!("select {:?} has no preshader form", id),
        }
    }

    /// Value of a constant node, typed as the node prepared.
    ///
    /// The program is built in a scratch buffer and evaluated; the stack
    /// counter is left where it was. The evaluator computes in operand
    /// precision, so the result is cast to the prepared type (a normalized
    /// double3 constant folds to a float3).
    pub fn get_value_constant(
        &mut self,
        id: ExprId,
        scope: ScopeId,
        requested: RequestedType,
    ) -> Result<Value, PreshaderError> {
        let prepared = self.prepared_type(id, scope, requested).value_type();
        let entry = self.preshader_stack_position;
        let mut data = PreshaderData::new();
        self.get_value_preshader(id, scope, requested, &mut data);
        debug_assert_eq!(self.preshader_stack_position, entry + 1);
        self.preshader_stack_position = entry;
        debug!("folding {:?}: {} bytes", id, data.len());
        let value = data.evaluate()?;
        Ok(if value.value_type == prepared { value } else { value.cast(prepared) })
    }
}

/// Replaces each `%` in `template` with the next input's code.
///
/// # Panics
///
/// Panics if the placeholder count differs from `inputs.len()`.
fn format_template(template: &str, inputs: &[&ShaderValue]) -> String {
    let mut out = String::with_capacity(template.len() + inputs.len() * 8);
    let mut next = inputs.iter();
    for ch in template.chars() {
        if ch == '%' {
            let input = next
                .next()
                .unwrap_or_else(|| panic!("template '{}' has more placeholders than inputs", template));
            out.push_str(&input.code);
        } else {
            out.push(ch);
        }
    }
    assert!(next.next().is_none(), "template '{}' has fewer placeholders than inputs", template);
    out
}

const SWIZZLE: [&str; 4] = ["", ".x", ".xy", ".xyz"];

/// Converts shader code between value types.
///
/// Vectors are truncated with a swizzle, scalars splat, short vectors are
/// zero-padded. Extended precision is entered with `LWCPromote` and left with
/// `LWCToFloat`.
///
/// # Panics
///
/// Panics on casts to or from non-numeric types, and between matrices and
/// vectors.
pub fn cast(value: ShaderValue, to: ValueType) -> ShaderValue {
    let from = value.value_type;
    if from == to {
        return value;
    }
    assert!(
        from.is_numeric() && to.is_numeric(),
        "cannot cast {} to {}",
        from.name(),
        to.name()
    );
    assert_eq!(from.is_matrix(), to.is_matrix(), "cannot cast {} to {}", from.name(), to.name());

    if from.is_lwc() && !to.is_lwc() {
        let demoted = ShaderValue::new(format!("LWCToFloat({})", value.code), from.non_lwc());
        return cast(demoted, to);
    }
    if to.is_lwc() {
        let native = cast(value, to.non_lwc());
        return ShaderValue::new(format!("LWCPromote({})", native.code), to);
    }

    let (n_from, n_to) = (from.num_components(), to.num_components());
    let code = if from.is_matrix() || n_from == n_to || n_from == 1 {
        format!("(({}){})", to.name(), value.code)
    } else if n_from > n_to {
        let truncated = format!("{}{}", value.code, SWIZZLE[n_to]);
        if from.component_type() == to.component_type() {
            truncated
        } else {
            format!("(({}){})", to.name(), truncated)
        }
    } else {
        let widened = if from.component_type() == to.component_type() {
            value.code
        } else {
            let same_shape = crate::types::make_value_type(to.component_type(), n_from);
            format!("(({}){})", same_shape.name(), value.code)
        };
        let zero = Value::zero(crate::types::make_value_type(to.component_type(), 1)).to_shader_literal();
        let padding = vec![zero; n_to - n_from].join(", ");
        format!("{}({}, {})", to.name(), widened, padding)
    };
    ShaderValue::new(code, to)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sv(code: &str, ty: ValueType) -> ShaderValue {
        ShaderValue::new(code, ty)
    }

    #[test_log::test]
    fn casts_truncate_splat_and_pad() {
        assert_eq!(cast(sv("v", ValueType::Float4), ValueType::Float2).code, "v.xy");
        assert_eq!(cast(sv("s", ValueType::Float1), ValueType::Float3).code, "((float3)s)");
        assert_eq!(cast(sv("v", ValueType::Float2), ValueType::Float4).code, "float4(v, 0.0, 0.0)");
        assert_eq!(cast(sv("b", ValueType::Bool3), ValueType::Float3).code, "((float3)b)");
    }

    #[test_log::test]
    fn casts_across_precision() {
        assert_eq!(cast(sv("p", ValueType::Double3), ValueType::Float3).code, "LWCToFloat(p)");
        assert_eq!(cast(sv("p", ValueType::Float1), ValueType::Double3).code, "LWCPromote(((float3)p))");
        assert_eq!(cast(sv("m", ValueType::Double4x4), ValueType::Float4x4).code, "LWCToFloat(m)");
    }

    #[test_log::test]
    #[should_panic(expected = "cannot cast float3 to float4x4")]
    fn vector_to_matrix_is_rejected() {
        cast(sv("v", ValueType::Float3), ValueType::Float4x4);
    }

    #[test_log::test]
    fn template_substitution() {
        let a = sv("a", ValueType::Float1);
        let b = sv("Local3", ValueType::Float1);
        assert_eq!(format_template("(% + %)", &[&a, &b]), "(a + Local3)");
    }

    #[test_log::test]
    #[should_panic(expected = "more placeholders than inputs")]
    fn template_arity_is_checked() {
        format_template("(% + %)", &[&sv("a", ValueType::Float1)]);
    }
}
