//! JSON graph documents.
//!
//! ```json
//! {
//!   "nodes": [
//!     { "kind": "constant", "type": "float", "value": 4.0 },
//!     { "kind": "external", "name": "UV", "type": "float2" },
//!     { "kind": "operation", "op": "Mul", "inputs": [0, 1] }
//!   ],
//!   "roots": [{ "node": 2, "components": 2 }]
//! }
//! ```
//!
//! Nodes may only reference nodes listed before them, so node `i` becomes
//! `ExprId(i)` and the graph is acyclic by construction.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::CompileConfig;
use crate::emit::{EmitContext, ShaderValue};
use crate::error::{DocumentError, PrepareError};
use crate::ops::{describe, op_by_name};
use crate::prepared::Evaluation;
use crate::requested::RequestedType;
use crate::tree::{ExprId, ExternalInput, Tree};
use crate::types::ValueType;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Components {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl Components {
    fn into_vec(self) -> Vec<f64> {
        match self {
            Self::Scalar(v) => vec![v],
            Self::Vector(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeDesc {
    Constant {
        #[serde(rename = "type")]
        value_type: String,
        value: Components,
    },
    External {
        name: String,
        /// Omitted means not resolved yet.
        #[serde(rename = "type", default)]
        value_type: Option<String>,
        #[serde(default)]
        derivatives: Option<[usize; 2]>,
        #[serde(default)]
        previous_frame: Option<usize>,
    },
    Operation {
        op: String,
        inputs: Vec<usize>,
    },
    Select {
        condition: usize,
        if_true: usize,
        if_false: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Ddx,
    Ddy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootDesc {
    pub node: usize,
    #[serde(default)]
    pub name: Option<String>,
    /// Components requested from the node.
    #[serde(default = "default_components")]
    pub components: usize,
    /// Emit this derivative of the node instead of its value.
    #[serde(default)]
    pub derivative: Option<Axis>,
    /// Emit the node's previous-frame value.
    #[serde(default)]
    pub previous_frame: bool,
}

fn default_components() -> usize {
    4
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub nodes: Vec<NodeDesc>,
    #[serde(default)]
    pub roots: Vec<RootDesc>,
}

/// Outcome of compiling one root.
#[derive(Debug, Clone, PartialEq)]
pub enum RootResult {
    Constant(Value),
    Shader(ShaderValue),
    /// Some input has no type yet.
    Unresolved,
    /// A diagnostic was reported.
    Failed(String),
    /// The requested derivative does not exist.
    NoDerivative,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRoot {
    pub name: String,
    pub result: RootResult,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledDocument {
    /// Declarations shared by all shader roots.
    pub source: String,
    pub roots: Vec<CompiledRoot>,
    pub diagnostics: Vec<String>,
}

impl Document {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Builds the expression tree, validating every reference first.
    pub fn build_tree(&self, derivative_epsilon: f32) -> Result<Tree, DocumentError> {
        let mut tree = Tree::with_derivative_epsilon(derivative_epsilon);
        for (node, desc) in self.nodes.iter().enumerate() {
            let check = |target: usize| {
                if target < node {
                    Ok(ExprId(target as u32))
                } else {
                    Err(DocumentError::ForwardReference { node, target })
                }
            };
            let value_type = |name: &str| {
                ValueType::from_name(name)
                    .ok_or_else(|| DocumentError::UnknownType { node, name: name.to_string() })
            };

            let id = match desc {
                NodeDesc::Constant { value_type: ty, value } => {
                    let ty = value_type(ty.as_str())?;
                    let components = value.clone().into_vec();
                    if components.len() != ty.num_components() {
                        return Err(DocumentError::ComponentCount {
                            node,
                            expected: ty.num_components(),
                            actual: components.len(),
                        });
                    }
                    tree.new_constant(Value::new(ty, components))
                }
                NodeDesc::External { name, value_type: ty, derivatives, previous_frame } => {
                    let ty = match ty {
                        Some(ty) => value_type(ty.as_str())?,
                        None => ValueType::Void,
                    };
                    let mut input = ExternalInput::new(name.clone(), ty);
                    if let Some([dx, dy]) = derivatives {
                        input = input.with_derivatives([check(*dx)?, check(*dy)?]);
                    }
                    if let Some(prev) = previous_frame {
                        input = input.with_previous_frame(check(*prev)?);
                    }
                    tree.new_external(input)
                }
                NodeDesc::Operation { op, inputs } => {
                    let op = op_by_name(op)
                        .ok_or_else(|| DocumentError::UnknownOperation { node, name: op.clone() })?;
                    let desc = describe(op);
                    if desc.input_count != inputs.len() {
                        return Err(DocumentError::Arity {
                            node,
                            op: desc.name,
                            expected: desc.input_count,
                            actual: inputs.len(),
                        });
                    }
                    let inputs = inputs.iter().map(|&i| check(i)).collect::<Result<Vec<_>, _>>()?;
                    tree.new_operation(op, &inputs)
                }
                NodeDesc::Select { condition, if_true, if_false } => {
                    tree.new_select(check(*condition)?, check(*if_true)?, check(*if_false)?)
                }
            };
            debug_assert_eq!(id.index(), node);
        }
        Ok(tree)
    }

    /// Prepares and emits every root.
    ///
    /// Errors in one root do not stop the others; every diagnostic of the
    /// pass ends up in [`CompiledDocument::diagnostics`].
    pub fn compile(&self, config: &CompileConfig) -> anyhow::Result<CompiledDocument> {
        let mut tree = self.build_tree(config.derivative_epsilon)?;

        // Derivative and previous-frame roots add nodes, so resolve them
        // before the emitter borrows the tree.
        let mut targets = Vec::with_capacity(self.roots.len());
        for (index, root) in self.roots.iter().enumerate() {
            if root.node >= tree.len() {
                return Err(DocumentError::MissingRoot { root: index, target: root.node }.into());
            }
            let requested = RequestedType::first(root.components);
            let mut id = ExprId(root.node as u32);
            if root.previous_frame {
                id = tree.previous_frame(id, requested);
            }
            let target = match root.derivative {
                Some(Axis::Ddx) => tree.analytic_derivatives(id).ddx(),
                Some(Axis::Ddy) => tree.analytic_derivatives(id).ddy(),
                None => Some(id),
            };
            targets.push((target, requested));
        }

        let mut ctx = EmitContext::new(&tree, config.clone());
        let scope = ctx.root_scope();
        let mut roots = Vec::with_capacity(self.roots.len());
        for (index, (root, (target, requested))) in self.roots.iter().zip(targets).enumerate() {
            let name = root.name.clone().unwrap_or_else(|| format!("root{}", index));
            let result = match target {
                None => RootResult::NoDerivative,
                Some(id) => match ctx.prepare_expression(id, scope, requested) {
                    Err(PrepareError::Unresolved) => RootResult::Unresolved,
                    Err(PrepareError::Reported(message)) => RootResult::Failed(message),
                    Ok(ty) => match ty.evaluation(requested) {
                        Evaluation::Constant | Evaluation::ConstantZero => {
                            RootResult::Constant(ctx.get_value_constant(id, scope, requested)?)
                        }
                        _ => RootResult::Shader(ctx.get_value_shader(id, scope, requested, None)),
                    },
                },
            };
            debug!("{}: {:?}", name, result);
            roots.push(CompiledRoot { name, result });
        }

        info!(
            "compiled {} roots, {} nodes, {} diagnostics",
            roots.len(),
            tree.len(),
            ctx.diagnostics.len()
        );
        Ok(CompiledDocument {
            source: ctx.scope_source(scope),
            roots,
            diagnostics: ctx.diagnostics.messages().to_vec(),
        })
    }
}
