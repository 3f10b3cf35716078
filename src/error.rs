use log::warn;
use thiserror::Error;

use crate::types::ValueType;

/// Recoverable failures of type propagation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrepareError {
    /// An input has no type yet; the driver may retry on a later pass.
    #[error("Input type is not resolved yet")]
    Unresolved,
    /// A user-facing error, already reported through [`Diagnostics`].
    #[error("{0}")]
    Reported(String),
}

/// Failures while decoding or running a preshader program.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreshaderError {
    #[error("Unknown preshader opcode {0}")]
    UnknownOpcode(u8),
    #[error("Unknown value type tag {0}")]
    UnknownValueType(u8),
    #[error("Preshader data truncated at byte {0}")]
    Truncated(usize),
    #[error("Preshader stack underflow executing {0}")]
    StackUnderflow(&'static str),
    #[error("Preshader left {0} values on the stack")]
    UnbalancedStack(usize),
    #[error("Cannot apply {op} to {value_type:?}")]
    InvalidOperand { op: &'static str, value_type: ValueType },
}

/// Malformed graph documents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Node {node}: unknown value type '{name}'")]
    UnknownType { node: usize, name: String },
    #[error("Node {node}: unknown operation '{name}'")]
    UnknownOperation { node: usize, name: String },
    #[error("Node {node}: {op} takes {expected} inputs, got {actual}")]
    Arity { node: usize, op: &'static str, expected: usize, actual: usize },
    #[error("Node {node}: {expected} components expected, got {actual}")]
    ComponentCount { node: usize, expected: usize, actual: usize },
    #[error("Node {node}: reference to node {target}, which is not defined before it")]
    ForwardReference { node: usize, target: usize },
    #[error("Root {root}: node {target} does not exist")]
    MissingRoot { root: usize, target: usize },
}

/// Ordered sink for user-facing compile errors.
///
/// Reporting never aborts: callers keep preparing independent roots so one
/// pass can surface every problem in a graph.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    messages: Vec<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `message` and returns the matching [`PrepareError`].
    pub fn report(&mut self, message: impl Into<String>) -> PrepareError {
        let message = message.into();
        warn!("{}", message);
        self.messages.push(message.clone());
        PrepareError::Reported(message)
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn report_keeps_order() {
        let mut d = Diagnostics::new();
        let first = d.report("first");
        d.report(String::from("second"));
        assert_eq!(first, PrepareError::Reported("first".into()));
        assert_eq!(d.messages(), ["first", "second"]);
        assert_eq!(d.len(), 2);
    }
}
