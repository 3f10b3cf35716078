//! Shader value types.
//!
//! Types are described in two layers:
//!
//! - [`ComponentType`]: what a single lane holds (float, double, int, bool).
//! - [`ValueType`]: a component type plus a component count (scalar, vector,
//!   4x4 matrix), or a non-numeric resource type.
//!
//! `Double` is the extended-precision ("LWC") component type. GPUs have no
//! native type for it, so every operation over it goes through emulation
//! intrinsics in the generated shader code.

use serde::{Deserialize, Serialize};

// --- Component Bounds ---

/// A coarse, ordered bound on the numeric range of a component.
///
/// The variants are ordered from most negative to most positive, so the
/// derived `Ord` is the lattice order used by [`min_bound`] and [`max_bound`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ComponentBound {
    NegDoubleMax,
    NegFloatMax,
    IntMin,
    NegOne,
    Zero,
    One,
    IntMax,
    FloatMax,
    DoubleMax,
}

/// Inclusive range `[min, max]` a component is known to lie in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentBounds {
    pub min: ComponentBound,
    pub max: ComponentBound,
}

impl Default for ComponentBounds {
    fn default() -> Self {
        Self::new(ComponentBound::NegDoubleMax, ComponentBound::DoubleMax)
    }
}

impl ComponentBounds {
    pub const fn new(min: ComponentBound, max: ComponentBound) -> Self {
        Self { min, max }
    }

    /// `[0, 1]`
    pub const UNIT: Self = Self::new(ComponentBound::Zero, ComponentBound::One);

    /// `[-1, 1]`
    pub const SIGNED_UNIT: Self = Self::new(ComponentBound::NegOne, ComponentBound::One);

    /// Smallest range containing both.
    pub fn union(self, other: ComponentBounds) -> Self {
        Self::new(self.min.min(other.min), self.max.max(other.max))
    }
}

/// Bounds of `min(a, b)` given bounds of `a` and `b`.
pub fn min_bound(lhs: ComponentBounds, rhs: ComponentBounds) -> ComponentBounds {
    ComponentBounds::new(lhs.min.min(rhs.min), lhs.max.min(rhs.max))
}

/// Bounds of `max(a, b)` given bounds of `a` and `b`.
pub fn max_bound(lhs: ComponentBounds, rhs: ComponentBounds) -> ComponentBounds {
    ComponentBounds::new(lhs.min.max(rhs.min), lhs.max.max(rhs.max))
}

// --- Component Types ---

/// Type of a single component.
///
/// Numeric variants are declared in join order (see [`combine_component_types`]).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ComponentType {
    #[default]
    Void,
    Bool,
    Int,
    Float,
    Double,
    Texture,
}

impl ComponentType {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Double => "double",
            Self::Texture => "texture",
        }
    }

    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Bool | Self::Int | Self::Float | Self::Double)
    }

    /// Extended precision, emulated on the GPU.
    pub const fn is_lwc(self) -> bool {
        matches!(self, Self::Double)
    }

    /// `Double` becomes `Float`; everything else is unchanged.
    pub const fn non_lwc(self) -> Self {
        match self {
            Self::Double => Self::Float,
            other => other,
        }
    }

    /// Range a component of this type can hold.
    pub const fn bounds(self) -> ComponentBounds {
        use ComponentBound::*;
        match self {
            Self::Float => ComponentBounds::new(NegFloatMax, FloatMax),
            Self::Double => ComponentBounds::new(NegDoubleMax, DoubleMax),
            Self::Int => ComponentBounds::new(IntMin, IntMax),
            Self::Bool => ComponentBounds::new(Zero, One),
            Self::Void | Self::Texture => ComponentBounds::new(NegDoubleMax, DoubleMax),
        }
    }
}

/// Join of two component types: void is the identity, otherwise the wider type wins.
pub fn combine_component_types(lhs: ComponentType, rhs: ComponentType) -> ComponentType {
    match (lhs, rhs) {
        (ComponentType::Void, other) | (other, ComponentType::Void) => other,
        (ComponentType::Texture, _) | (_, ComponentType::Texture) => ComponentType::Texture,
        (a, b) => a.max(b),
    }
}

// --- Value Types ---

/// Full type of a value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValueType {
    #[default]
    Void,

    Float1,
    Float2,
    Float3,
    Float4,

    Double1,
    Double2,
    Double3,
    Double4,

    Int1,
    Int2,
    Int3,
    Int4,

    Bool1,
    Bool2,
    Bool3,
    Bool4,

    Float4x4,
    Double4x4,

    Texture2D,
}

impl ValueType {
    /// All value types, in declaration order.
    #[rustfmt::skip]
    pub const ALL: [ValueType; 20] = [
        Self::Void,
        Self::Float1, Self::Float2, Self::Float3, Self::Float4,
        Self::Double1, Self::Double2, Self::Double3, Self::Double4,
        Self::Int1, Self::Int2, Self::Int3, Self::Int4,
        Self::Bool1, Self::Bool2, Self::Bool3, Self::Bool4,
        Self::Float4x4, Self::Double4x4,
        Self::Texture2D,
    ];

    /// HLSL spelling. Extended-precision types map to the emulation structs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Float1 => "float",
            Self::Float2 => "float2",
            Self::Float3 => "float3",
            Self::Float4 => "float4",
            Self::Double1 => "FLWCScalar",
            Self::Double2 => "FLWCVector2",
            Self::Double3 => "FLWCVector3",
            Self::Double4 => "FLWCVector4",
            Self::Int1 => "int",
            Self::Int2 => "int2",
            Self::Int3 => "int3",
            Self::Int4 => "int4",
            Self::Bool1 => "bool",
            Self::Bool2 => "bool2",
            Self::Bool3 => "bool3",
            Self::Bool4 => "bool4",
            Self::Float4x4 => "float4x4",
            Self::Double4x4 => "FLWCMatrix",
            Self::Texture2D => "Texture2D",
        }
    }

    pub const fn component_type(self) -> ComponentType {
        match self {
            Self::Void => ComponentType::Void,
            Self::Float1 | Self::Float2 | Self::Float3 | Self::Float4 | Self::Float4x4 => {
                ComponentType::Float
            }
            Self::Double1 | Self::Double2 | Self::Double3 | Self::Double4 | Self::Double4x4 => {
                ComponentType::Double
            }
            Self::Int1 | Self::Int2 | Self::Int3 | Self::Int4 => ComponentType::Int,
            Self::Bool1 | Self::Bool2 | Self::Bool3 | Self::Bool4 => ComponentType::Bool,
            Self::Texture2D => ComponentType::Texture,
        }
    }

    pub const fn num_components(self) -> usize {
        match self {
            Self::Void | Self::Texture2D => 0,
            Self::Float1 | Self::Double1 | Self::Int1 | Self::Bool1 => 1,
            Self::Float2 | Self::Double2 | Self::Int2 | Self::Bool2 => 2,
            Self::Float3 | Self::Double3 | Self::Int3 | Self::Bool3 => 3,
            Self::Float4 | Self::Double4 | Self::Int4 | Self::Bool4 => 4,
            Self::Float4x4 | Self::Double4x4 => 16,
        }
    }

    pub const fn is_void(self) -> bool {
        matches!(self, Self::Void)
    }

    pub const fn is_numeric(self) -> bool {
        self.component_type().is_numeric()
    }

    pub const fn is_lwc(self) -> bool {
        self.component_type().is_lwc()
    }

    pub const fn is_matrix(self) -> bool {
        matches!(self, Self::Float4x4 | Self::Double4x4)
    }

    /// Same shape with `Double` components demoted to `Float`.
    pub fn non_lwc(self) -> Self {
        make_value_type(self.component_type().non_lwc(), self.num_components())
    }

    /// Type of a derivative of a value of this type: float with the same
    /// component count, or void for non-numeric types.
    pub fn derivative_type(self) -> Self {
        if self.is_numeric() && !self.is_matrix() {
            make_value_type(ComponentType::Float, self.num_components())
        } else {
            Self::Void
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }
}

/// Builds a value type from a component type and count.
///
/// Counts of 1-4 produce vectors, 16 produces a 4x4 matrix. Anything else
/// (including a void or texture component) yields [`ValueType::Void`].
pub fn make_value_type(component_type: ComponentType, num_components: usize) -> ValueType {
    use ValueType::*;
    match (component_type, num_components) {
        (ComponentType::Float, 1) => Float1,
        (ComponentType::Float, 2) => Float2,
        (ComponentType::Float, 3) => Float3,
        (ComponentType::Float, 4) => Float4,
        (ComponentType::Float, 16) => Float4x4,
        (ComponentType::Double, 1) => Double1,
        (ComponentType::Double, 2) => Double2,
        (ComponentType::Double, 3) => Double3,
        (ComponentType::Double, 4) => Double4,
        (ComponentType::Double, 16) => Double4x4,
        (ComponentType::Int, 1) => Int1,
        (ComponentType::Int, 2) => Int2,
        (ComponentType::Int, 3) => Int3,
        (ComponentType::Int, 4) => Int4,
        (ComponentType::Bool, 1) => Bool1,
        (ComponentType::Bool, 2) => Bool2,
        (ComponentType::Bool, 3) => Bool3,
        (ComponentType::Bool, 4) => Bool4,
        _ => Void,
    }
}
