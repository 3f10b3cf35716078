//! Prepared types: the output of type/bounds propagation.

use serde::{Deserialize, Serialize};

use crate::requested::RequestedType;
use crate::types::{
    combine_component_types, make_value_type, ComponentBounds, ComponentType, ValueType,
};

/// Where a value can be computed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Evaluation {
    /// Component not requested / not produced.
    #[default]
    None,
    /// Only computable on the GPU.
    Shader,
    /// Folded at compile time through the preshader.
    Constant,
    /// Known to be zero; no code or bytecode needed.
    ConstantZero,
}

impl Evaluation {
    pub const fn is_constant(self) -> bool {
        matches!(self, Self::Constant | Self::ConstantZero)
    }
}

/// Join of two evaluation classes.
pub fn combine_evaluations(lhs: Evaluation, rhs: Evaluation) -> Evaluation {
    use Evaluation::*;
    match (lhs, rhs) {
        (None, other) | (other, None) => other,
        (Shader, _) | (_, Shader) => Shader,
        (ConstantZero, ConstantZero) => ConstantZero,
        _ => Constant,
    }
}

/// Evaluation class and bounds of one component.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreparedComponent {
    pub evaluation: Evaluation,
    pub bounds: ComponentBounds,
}

impl PreparedComponent {
    pub const fn new(evaluation: Evaluation, bounds: ComponentBounds) -> Self {
        Self { evaluation, bounds }
    }
}

pub fn combine_components(lhs: PreparedComponent, rhs: PreparedComponent) -> PreparedComponent {
    match (lhs.evaluation, rhs.evaluation) {
        (Evaluation::None, _) => rhs,
        (_, Evaluation::None) => lhs,
        _ => PreparedComponent::new(
            combine_evaluations(lhs.evaluation, rhs.evaluation),
            lhs.bounds.union(rhs.bounds),
        ),
    }
}

/// Resolved type of a node under one requested type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PreparedType {
    pub component_type: ComponentType,
    pub components: Vec<PreparedComponent>,
}

impl PreparedType {
    /// Every component of `value_type` with the same evaluation and the
    /// bounds of its component type.
    pub fn new(value_type: ValueType, evaluation: Evaluation) -> Self {
        let component_type = value_type.component_type();
        let component = PreparedComponent::new(evaluation, component_type.bounds());
        Self {
            component_type,
            components: vec![component; value_type.num_components()],
        }
    }

    /// A value type with every component sharing `component`.
    pub fn with_component(value_type: ValueType, component: PreparedComponent) -> Self {
        Self {
            component_type: value_type.component_type(),
            components: vec![component; value_type.num_components()],
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self.component_type {
            ComponentType::Texture => ValueType::Texture2D,
            ct => make_value_type(ct, self.components.len()),
        }
    }

    pub fn is_void(&self) -> bool {
        self.value_type().is_void()
    }

    /// Marks components the request does not read as not produced.
    /// Scalars are kept, since they splat to any component.
    pub fn restrict_to(&mut self, requested: RequestedType) {
        if self.components.len() <= 1 {
            return;
        }
        for (i, c) in self.components.iter_mut().enumerate() {
            if !requested.is_component_requested(i) {
                c.evaluation = Evaluation::None;
            }
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.component_type.is_numeric()
    }

    /// True when the value needs extended-precision emulation.
    pub fn needs_emulation(&self) -> bool {
        self.component_type.is_lwc()
    }

    /// Component `i`, splatting scalars; out of range reads as not-produced.
    pub fn component(&self, index: usize) -> PreparedComponent {
        match self.components.len() {
            1 => self.components[0],
            _ => self.components.get(index).copied().unwrap_or_default(),
        }
    }

    pub fn component_bounds(&self, index: usize) -> ComponentBounds {
        self.component(index).bounds
    }

    pub fn set_component_bounds(&mut self, index: usize, bounds: ComponentBounds) {
        if let Some(c) = self.components.get_mut(index) {
            c.bounds = bounds;
        }
    }

    /// Join of all components.
    pub fn merged_component(&self) -> PreparedComponent {
        self.components
            .iter()
            .copied()
            .fold(PreparedComponent::default(), combine_components)
    }

    /// Overrides the evaluation of every produced component.
    pub fn set_evaluation(&mut self, evaluation: Evaluation) {
        for c in &mut self.components {
            if c.evaluation != Evaluation::None {
                c.evaluation = evaluation;
            }
        }
    }

    /// Joins `evaluation` into every produced component.
    pub fn merge_evaluation(&mut self, evaluation: Evaluation) {
        for c in &mut self.components {
            if c.evaluation != Evaluation::None {
                c.evaluation = combine_evaluations(c.evaluation, evaluation);
            }
        }
    }

    /// Evaluation class of the components `requested` reads.
    pub fn evaluation(&self, requested: RequestedType) -> Evaluation {
        requested
            .indices()
            .take_while(|i| self.components.len() == 1 || *i < self.components.len())
            .map(|i| self.component(i).evaluation)
            .fold(Evaluation::None, combine_evaluations)
    }

    /// Same prepared components with `Double` demoted to `Float`.
    pub fn non_lwc(&self) -> Self {
        Self {
            component_type: self.component_type.non_lwc(),
            components: self.components.clone(),
        }
    }
}

/// Join of two prepared types: component type widens, component count is
/// the larger of the two, components combine pairwise (scalars splat).
pub fn merge_prepared_types(lhs: &PreparedType, rhs: &PreparedType) -> PreparedType {
    let n = lhs.components.len().max(rhs.components.len());
    PreparedType {
        component_type: combine_component_types(lhs.component_type, rhs.component_type),
        components: (0..n)
            .map(|i| combine_components(lhs.component(i), rhs.component(i)))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ComponentBound;

    #[test_log::test]
    fn evaluation_join() {
        use Evaluation::*;
        assert_eq!(combine_evaluations(None, Constant), Constant);
        assert_eq!(combine_evaluations(Constant, Shader), Shader);
        assert_eq!(combine_evaluations(ConstantZero, Constant), Constant);
        assert_eq!(combine_evaluations(ConstantZero, ConstantZero), ConstantZero);
    }

    #[test_log::test]
    fn merge_widens_and_splats() {
        let a = PreparedType::new(ValueType::Float1, Evaluation::Constant);
        let b = PreparedType::new(ValueType::Double3, Evaluation::Shader);
        let m = merge_prepared_types(&a, &b);
        assert_eq!(m.value_type(), ValueType::Double3);
        assert!(m.needs_emulation());
        assert_eq!(m.evaluation(RequestedType::VECTOR3), Evaluation::Shader);
    }

    #[test_log::test]
    fn merge_unions_bounds() {
        let mut a = PreparedType::new(ValueType::Float1, Evaluation::Constant);
        a.set_component_bounds(0, ComponentBounds::UNIT);
        let mut b = PreparedType::new(ValueType::Float1, Evaluation::Constant);
        b.set_component_bounds(0, ComponentBounds::SIGNED_UNIT);
        let m = merge_prepared_types(&a, &b);
        assert_eq!(
            m.component_bounds(0),
            ComponentBounds::new(ComponentBound::NegOne, ComponentBound::One)
        );
    }

    #[test_log::test]
    fn evaluation_respects_request() {
        let mut t = PreparedType::new(ValueType::Float2, Evaluation::Constant);
        t.components[1].evaluation = Evaluation::Shader;
        assert_eq!(t.evaluation(RequestedType::SCALAR), Evaluation::Constant);
        assert_eq!(t.evaluation(RequestedType::VECTOR2), Evaluation::Shader);
        // Components beyond the type are not produced.
        assert_eq!(t.evaluation(RequestedType::VECTOR4), Evaluation::Shader);
    }

    #[test_log::test]
    fn set_evaluation_skips_unproduced() {
        let mut t = PreparedType::new(ValueType::Float2, Evaluation::Constant);
        t.components[1].evaluation = Evaluation::None;
        t.set_evaluation(Evaluation::Shader);
        assert_eq!(t.components[0].evaluation, Evaluation::Shader);
        assert_eq!(t.components[1].evaluation, Evaluation::None);
    }
}
