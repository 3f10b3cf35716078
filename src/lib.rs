// In src/lib.rs

//! Shader expression compiler.
//!
//! Expressions live in a [`Tree`] arena. An [`EmitContext`] resolves their
//! types and bounds, then lowers them either to shader text or to a
//! preshader program that is evaluated once on the CPU. The tree can also
//! synthesize analytic screen-space derivatives and previous-frame
//! versions of any expression.

pub mod config;
pub mod derivative;
pub mod document;
pub mod emit;
pub mod error;
pub mod ops;
pub mod prepared;
pub mod preshader;
pub mod requested;
pub mod temporal;
pub mod tree;
pub mod types;
pub mod value;

pub use crate::{
    config::CompileConfig,
    derivative::AnalyticDerivatives,
    document::{CompiledDocument, CompiledRoot, Document, RootResult},
    emit::{EmitContext, ScopeId, ShaderValue},
    error::{Diagnostics, DocumentError, PrepareError, PreshaderError},
    ops::{describe, op_by_name, Operation, OperationDescriptor},
    prepared::{Evaluation, PreparedComponent, PreparedType},
    preshader::{Instruction, Opcode, PreshaderData},
    requested::{ComponentMask, RequestedType},
    tree::{ExprId, Expression, ExternalInput, Tree},
    types::{ComponentBound, ComponentBounds, ComponentType, ValueType},
    value::Value,
};
