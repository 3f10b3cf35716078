//! Requested types.
//!
//! A consumer asks a node for a value under a [`RequestedType`]: the set of
//! components it will actually read. Nodes are prepared and emitted once per
//! distinct request, so the request is part of every cache key.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::types::ValueType;

bitflags! {
    /// Components a consumer reads. Bits 0-3 are x/y/z/w; matrices use all 16.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ComponentMask: u16 {
        const X = 1 << 0;
        const Y = 1 << 1;
        const Z = 1 << 2;
        const W = 1 << 3;
        const XY = Self::X.bits() | Self::Y.bits();
        const XYZ = Self::XY.bits() | Self::Z.bits();
        const XYZW = Self::XYZ.bits() | Self::W.bits();
        const MATRIX = 0xffff;
    }
}

/// Which components of a value a consumer needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestedType {
    pub components: ComponentMask,
}

impl RequestedType {
    pub const SCALAR: Self = Self::new(ComponentMask::X);
    pub const VECTOR2: Self = Self::new(ComponentMask::XY);
    pub const VECTOR3: Self = Self::new(ComponentMask::XYZ);
    pub const VECTOR4: Self = Self::new(ComponentMask::XYZW);
    pub const MATRIX4X4: Self = Self::new(ComponentMask::MATRIX);

    pub const fn new(components: ComponentMask) -> Self {
        Self { components }
    }

    /// Request for the first `n` components.
    pub fn first(n: usize) -> Self {
        let bits = if n >= 16 { 0xffff } else { (1u16 << n) - 1 };
        Self::new(ComponentMask::from_bits_truncate(bits))
    }

    pub fn is_component_requested(self, index: usize) -> bool {
        index < 16 && self.components.bits() & (1 << index) != 0
    }

    /// Index one past the highest requested component.
    pub fn num_components(self) -> usize {
        16 - self.components.bits().leading_zeros() as usize
    }

    pub fn is_empty(self) -> bool {
        self.components.is_empty()
    }

    /// Iterates requested component indices in ascending order.
    pub fn indices(self) -> impl Iterator<Item = usize> {
        (0..16).filter(move |i| self.is_component_requested(*i))
    }
}

impl From<ValueType> for RequestedType {
    fn from(value_type: ValueType) -> Self {
        Self::first(value_type.num_components())
    }
}
