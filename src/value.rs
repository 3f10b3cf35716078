//! Constant values.
//!
//! A [`Value`] is what the preshader evaluator pushes and pops. Components are
//! stored as `f64` regardless of the declared type; float results are rounded
//! back through `f32` so folding matches what the GPU would compute.

use core::fmt;

use crate::types::{combine_component_types, make_value_type, ComponentType, ValueType};

/// Tile size of the extended-precision representation (2^21).
pub const LWC_TILE_SIZE: f64 = 2_097_152.0;

/// A typed constant.
#[derive(Clone, Debug, PartialEq)]
pub struct Value {
    pub value_type: ValueType,
    pub components: Vec<f64>,
}

impl Value {
    /// # Panics
    ///
    /// Panics if the component count does not match the type.
    pub fn new(value_type: ValueType, components: Vec<f64>) -> Self {
        assert_eq!(
            value_type.num_components(),
            components.len(),
            "Value::new: {} expects {} components, got {}",
            value_type.name(),
            value_type.num_components(),
            components.len()
        );
        Self { value_type, components }.normalized()
    }

    /// Zero of the given type.
    pub fn zero(value_type: ValueType) -> Self {
        Self {
            value_type,
            components: vec![0.0; value_type.num_components()],
        }
    }

    pub fn float(v: f32) -> Self {
        Self::new(ValueType::Float1, vec![v as f64])
    }

    pub fn float2(x: f32, y: f32) -> Self {
        Self::new(ValueType::Float2, vec![x as f64, y as f64])
    }

    pub fn float3(x: f32, y: f32, z: f32) -> Self {
        Self::new(ValueType::Float3, vec![x as f64, y as f64, z as f64])
    }

    pub fn float4(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self::new(ValueType::Float4, vec![x as f64, y as f64, z as f64, w as f64])
    }

    pub fn double(v: f64) -> Self {
        Self::new(ValueType::Double1, vec![v])
    }

    pub fn double3(x: f64, y: f64, z: f64) -> Self {
        Self::new(ValueType::Double3, vec![x, y, z])
    }

    pub fn int(v: i32) -> Self {
        Self::new(ValueType::Int1, vec![v as f64])
    }

    pub fn bool(v: bool) -> Self {
        Self::new(ValueType::Bool1, vec![if v { 1.0 } else { 0.0 }])
    }

    pub fn component_type(&self) -> ComponentType {
        self.value_type.component_type()
    }

    /// Component `i`, splatting scalars. Missing components read as zero.
    pub fn component(&self, i: usize) -> f64 {
        match self.components.len() {
            1 => self.components[0],
            _ => self.components.get(i).copied().unwrap_or(0.0),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.components.iter().all(|c| *c == 0.0)
    }

    pub fn as_bool(&self) -> bool {
        self.component(0) != 0.0
    }

    /// Converts to another value type: components are truncated or scalars
    /// splatted, then re-rounded for the target component type.
    pub fn cast(&self, to: ValueType) -> Value {
        let n = to.num_components();
        let components = (0..n).map(|i| self.component(i)).collect();
        Self { value_type: to, components }.normalized()
    }

    /// Rounds every component to what its component type can represent.
    fn normalized(mut self) -> Self {
        let ct = self.component_type();
        for c in &mut self.components {
            *c = round_component(ct, *c);
        }
        self
    }

    /// HLSL literal for this value.
    pub fn to_shader_literal(&self) -> String {
        let ct = self.component_type();
        if ct.is_lwc() {
            return self.lwc_literal();
        }
        let parts: Vec<String> = self
            .components
            .iter()
            .map(|c| format_component(ct, *c))
            .collect();
        if parts.len() == 1 {
            parts.into_iter().next().unwrap_or_default()
        } else {
            format!("{}({})", self.value_type.name(), parts.join(", "))
        }
    }

    /// Extended-precision literal, split into tile and offset halves.
    fn lwc_literal(&self) -> String {
        let float_type = self.value_type.non_lwc();
        let (tiles, offsets): (Vec<String>, Vec<String>) = self
            .components
            .iter()
            .map(|c| {
                let tile = (c / LWC_TILE_SIZE).round();
                let offset = c - tile * LWC_TILE_SIZE;
                (
                    format_component(ComponentType::Float, tile),
                    format_component(ComponentType::Float, offset),
                )
            })
            .unzip();
        let ctor = match self.value_type {
            ValueType::Double1 => "MakeLWCScalar",
            ValueType::Double2 => "MakeLWCVector2",
            ValueType::Double3 => "MakeLWCVector3",
            ValueType::Double4 => "MakeLWCVector4",
            _ => "MakeLWCMatrix",
        };
        let wrap = |parts: Vec<String>| {
            if parts.len() == 1 {
                parts.join("")
            } else {
                format!("{}({})", float_type.name(), parts.join(", "))
            }
        };
        format!("{}({}, {})", ctor, wrap(tiles), wrap(offsets))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shader_literal())
    }
}

fn round_component(ct: ComponentType, v: f64) -> f64 {
    match ct {
        ComponentType::Float => v as f32 as f64,
        ComponentType::Int => v.trunc(),
        ComponentType::Bool => {
            if v != 0.0 {
                1.0
            } else {
                0.0
            }
        }
        _ => v,
    }
}

fn format_component(ct: ComponentType, v: f64) -> String {
    match ct {
        ComponentType::Bool => (v != 0.0).to_string(),
        ComponentType::Int => format!("{}", v as i64),
        _ => {
            // Floats print at the precision the GPU will see.
            let v = if ct == ComponentType::Float { v as f32 as f64 } else { v };
            if v.is_nan() {
                "asfloat(0x7fc00000)".to_string()
            } else if v.is_infinite() {
                let sign = if v < 0.0 { "-" } else { "" };
                format!("{}asfloat(0x7f800000)", sign)
            } else if v.fract() == 0.0 {
                format!("{:.1}", v)
            } else if ct == ComponentType::Float {
                format!("{}", v as f32)
            } else {
                format!("{}", v)
            }
        }
    }
}

// --- Component-wise arithmetic ---

/// Applies `f` to every component, keeping the type.
pub fn unary(value: &Value, f: impl Fn(f64) -> f64) -> Value {
    Value {
        value_type: value.value_type,
        components: value.components.iter().map(|c| f(*c)).collect(),
    }
    .normalized()
}

/// Result type of a component-wise binary operation: joined component type,
/// widest component count.
fn binary_result_type(lhs: &Value, rhs: &Value) -> ValueType {
    let ct = combine_component_types(lhs.component_type(), rhs.component_type());
    let n = lhs.components.len().max(rhs.components.len());
    make_value_type(ct, n)
}

/// Applies `f` component-wise, splatting scalar operands.
pub fn binary(lhs: &Value, rhs: &Value, f: impl Fn(f64, f64) -> f64) -> Value {
    let value_type = binary_result_type(lhs, rhs);
    let components = (0..value_type.num_components())
        .map(|i| f(lhs.component(i), rhs.component(i)))
        .collect();
    Value { value_type, components }.normalized()
}

/// Component-wise comparison producing a bool vector.
pub fn compare(lhs: &Value, rhs: &Value, f: impl Fn(f64, f64) -> bool) -> Value {
    let n = lhs.components.len().max(rhs.components.len());
    let value_type = make_value_type(ComponentType::Bool, n);
    let components = (0..n)
        .map(|i| if f(lhs.component(i), rhs.component(i)) { 1.0 } else { 0.0 })
        .collect();
    Value { value_type, components }
}

/// Sum of `a[i] * b[i]` as a scalar of the joined component type.
pub fn dot(lhs: &Value, rhs: &Value) -> Value {
    let product = binary(lhs, rhs, |a, b| a * b);
    let sum: f64 = product.components.iter().sum();
    Value {
        value_type: make_value_type(product.component_type(), 1),
        components: vec![sum],
    }
    .normalized()
}

pub fn length(value: &Value) -> Value {
    unary(&dot(value, value), f64::sqrt)
}

pub fn normalize(value: &Value) -> Value {
    let len = length(value);
    binary(value, &len, |a, l| a / l)
}

/// HLSL `fmod`: result has the sign of the dividend.
pub fn fmod(a: f64, b: f64) -> f64 {
    a % b
}

/// HLSL `frac`: `x - floor(x)`.
pub fn frac(x: f64) -> f64 {
    x - x.floor()
}

/// HLSL `sign`.
pub fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// HLSL `round`: halfway cases away from zero.
pub fn round(x: f64) -> f64 {
    x.round()
}

pub fn saturate(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}
