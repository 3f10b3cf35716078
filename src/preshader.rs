//! Preshader bytecode.
//!
//! A preshader is a small stack program that folds constant subexpressions
//! at compile time. Each instruction is one opcode byte, optionally followed
//! by an encoded value or value type:
//!
//! ```text
//! Constant      <type tag> <components...>   push value
//! ConstantZero  <type tag>                    push zero of type
//! <op>                                        pop inputs, push result
//! ```
//!
//! Float, int and bool components are 4 bytes (f32, i32, f32); double
//! components are 8 bytes. All little-endian.

use log::trace;

use crate::error::PreshaderError;
use crate::types::{ComponentType, ValueType};
use crate::value::{self, Value};

/// Preshader instruction set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Constant = 0,
    ConstantZero = 1,

    // Unary
    Abs = 2,
    Neg = 3,
    Rcp = 4,
    Sqrt = 5,
    Rsqrt = 6,
    Log2 = 7,
    Frac = 8,
    Floor = 9,
    Ceil = 10,
    Round = 11,
    Trunc = 12,
    Saturate = 13,
    Sign = 14,
    Length = 15,
    Normalize = 16,
    Sin = 17,
    Cos = 18,
    Tan = 19,
    Asin = 20,
    Acos = 21,
    Atan = 22,

    // Binary
    Add = 23,
    Sub = 24,
    Mul = 25,
    Div = 26,
    Fmod = 27,
    Atan2 = 28,
    Min = 29,
    Max = 30,
    Less = 31,
    Greater = 32,
}

impl Opcode {
    pub const COUNT: usize = 33;

    #[rustfmt::skip]
    const ALL: [Opcode; Self::COUNT] = [
        Self::Constant, Self::ConstantZero,
        Self::Abs, Self::Neg, Self::Rcp, Self::Sqrt, Self::Rsqrt, Self::Log2,
        Self::Frac, Self::Floor, Self::Ceil, Self::Round, Self::Trunc,
        Self::Saturate, Self::Sign, Self::Length, Self::Normalize,
        Self::Sin, Self::Cos, Self::Tan, Self::Asin, Self::Acos, Self::Atan,
        Self::Add, Self::Sub, Self::Mul, Self::Div, Self::Fmod, Self::Atan2,
        Self::Min, Self::Max, Self::Less, Self::Greater,
    ];

    pub fn from_u8(byte: u8) -> Option<Self> {
        Self::ALL.get(byte as usize).copied()
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Constant => "Constant",
            Self::ConstantZero => "ConstantZero",
            Self::Abs => "Abs",
            Self::Neg => "Neg",
            Self::Rcp => "Rcp",
            Self::Sqrt => "Sqrt",
            Self::Rsqrt => "Rsqrt",
            Self::Log2 => "Log2",
            Self::Frac => "Frac",
            Self::Floor => "Floor",
            Self::Ceil => "Ceil",
            Self::Round => "Round",
            Self::Trunc => "Trunc",
            Self::Saturate => "Saturate",
            Self::Sign => "Sign",
            Self::Length => "Length",
            Self::Normalize => "Normalize",
            Self::Sin => "Sin",
            Self::Cos => "Cos",
            Self::Tan => "Tan",
            Self::Asin => "Asin",
            Self::Acos => "Acos",
            Self::Atan => "Atan",
            Self::Add => "Add",
            Self::Sub => "Sub",
            Self::Mul => "Mul",
            Self::Div => "Div",
            Self::Fmod => "Fmod",
            Self::Atan2 => "Atan2",
            Self::Min => "Min",
            Self::Max => "Max",
            Self::Less => "Less",
            Self::Greater => "Greater",
        }
    }

    /// Values popped by the instruction.
    pub const fn input_count(self) -> usize {
        match self as u8 {
            0..=1 => 0,
            2..=22 => 1,
            _ => 2,
        }
    }
}

/// A decoded instruction.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Constant(Value),
    ConstantZero(ValueType),
    Op(Opcode),
}

/// Append-only preshader program.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PreshaderData {
    bytes: Vec<u8>,
}

impl PreshaderData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn write_opcode(&mut self, opcode: Opcode) -> &mut Self {
        self.bytes.push(opcode as u8);
        self
    }

    pub fn write_type(&mut self, value_type: ValueType) -> &mut Self {
        self.bytes.push(value_type as u8);
        self
    }

    pub fn write_value(&mut self, value: &Value) -> &mut Self {
        self.write_type(value.value_type);
        let ct = value.component_type();
        for c in &value.components {
            match ct {
                ComponentType::Double => self.bytes.extend_from_slice(&c.to_le_bytes()),
                ComponentType::Int => self.bytes.extend_from_slice(&(*c as i32).to_le_bytes()),
                _ => self.bytes.extend_from_slice(&(*c as f32).to_le_bytes()),
            }
        }
        self
    }

    /// Decodes the whole program.
    pub fn instructions(&self) -> Result<Vec<Instruction>, PreshaderError> {
        let mut reader = Reader { bytes: &self.bytes, pos: 0 };
        let mut out = Vec::new();
        while !reader.is_done() {
            let byte = reader.read_u8()?;
            let opcode = Opcode::from_u8(byte).ok_or(PreshaderError::UnknownOpcode(byte))?;
            out.push(match opcode {
                Opcode::Constant => Instruction::Constant(reader.read_value()?),
                Opcode::ConstantZero => Instruction::ConstantZero(reader.read_type()?),
                op => Instruction::Op(op),
            });
        }
        Ok(out)
    }

    /// Runs the program and returns the single value it leaves behind.
    pub fn evaluate(&self) -> Result<Value, PreshaderError> {
        let mut stack: Vec<Value> = Vec::new();
        for instruction in self.instructions()? {
            match instruction {
                Instruction::Constant(v) => stack.push(v),
                Instruction::ConstantZero(ty) => stack.push(Value::zero(ty)),
                Instruction::Op(op) => {
                    let result = if op.input_count() == 2 {
                        let rhs = stack.pop().ok_or(PreshaderError::StackUnderflow(op.name()))?;
                        let lhs = stack.pop().ok_or(PreshaderError::StackUnderflow(op.name()))?;
                        apply_binary(op, &lhs, &rhs)?
                    } else {
                        let arg = stack.pop().ok_or(PreshaderError::StackUnderflow(op.name()))?;
                        apply_unary(op, &arg)?
                    };
                    trace!("preshader {} -> {}", op.name(), result);
                    stack.push(result);
                }
            }
        }
        let result = stack.pop().ok_or(PreshaderError::StackUnderflow("result"))?;
        if !stack.is_empty() {
            return Err(PreshaderError::UnbalancedStack(stack.len()));
        }
        Ok(result)
    }
}

fn check_numeric(op: Opcode, v: &Value) -> Result<(), PreshaderError> {
    if v.value_type.is_numeric() {
        Ok(())
    } else {
        Err(PreshaderError::InvalidOperand { op: op.name(), value_type: v.value_type })
    }
}

fn apply_unary(op: Opcode, v: &Value) -> Result<Value, PreshaderError> {
    check_numeric(op, v)?;
    Ok(match op {
        Opcode::Abs => value::unary(v, f64::abs),
        Opcode::Neg => value::unary(v, |x| -x),
        Opcode::Rcp => value::unary(v, f64::recip),
        Opcode::Sqrt => value::unary(v, f64::sqrt),
        Opcode::Rsqrt => value::unary(v, |x| x.sqrt().recip()),
        Opcode::Log2 => value::unary(v, f64::log2),
        Opcode::Frac => value::unary(v, value::frac),
        Opcode::Floor => value::unary(v, f64::floor),
        Opcode::Ceil => value::unary(v, f64::ceil),
        Opcode::Round => value::unary(v, value::round),
        Opcode::Trunc => value::unary(v, f64::trunc),
        Opcode::Saturate => value::unary(v, value::saturate),
        Opcode::Sign => value::unary(v, value::sign),
        Opcode::Length => value::length(v),
        Opcode::Normalize => value::normalize(v),
        Opcode::Sin => value::unary(v, f64::sin),
        Opcode::Cos => value::unary(v, f64::cos),
        Opcode::Tan => value::unary(v, f64::tan),
        Opcode::Asin => value::unary(v, f64::asin),
        Opcode::Acos => value::unary(v, f64::acos),
        Opcode::Atan => value::unary(v, f64::atan),
        _ => return Err(PreshaderError::InvalidOperand { op: op.name(), value_type: v.value_type }),
    })
}

fn apply_binary(op: Opcode, a: &Value, b: &Value) -> Result<Value, PreshaderError> {
    check_numeric(op, a)?;
    check_numeric(op, b)?;
    Ok(match op {
        Opcode::Add => value::binary(a, b, |x, y| x + y),
        Opcode::Sub => value::binary(a, b, |x, y| x - y),
        Opcode::Mul => value::binary(a, b, |x, y| x * y),
        Opcode::Div => value::binary(a, b, |x, y| x / y),
        Opcode::Fmod => value::binary(a, b, value::fmod),
        Opcode::Atan2 => value::binary(a, b, f64::atan2),
        Opcode::Min => value::binary(a, b, f64::min),
        Opcode::Max => value::binary(a, b, f64::max),
        Opcode::Less => value::compare(a, b, |x, y| x < y),
        Opcode::Greater => value::compare(a, b, |x, y| x > y),
        _ => return Err(PreshaderError::InvalidOperand { op: op.name(), value_type: a.value_type }),
    })
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn is_done(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], PreshaderError> {
        let end = self.pos + N;
        let slice = self.bytes.get(self.pos..end).ok_or(PreshaderError::Truncated(self.pos))?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.pos = end;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, PreshaderError> {
        Ok(self.take::<1>()?[0])
    }

    fn read_type(&mut self) -> Result<ValueType, PreshaderError> {
        let tag = self.read_u8()?;
        ValueType::ALL
            .get(tag as usize)
            .copied()
            .ok_or(PreshaderError::UnknownValueType(tag))
    }

    fn read_value(&mut self) -> Result<Value, PreshaderError> {
        let value_type = self.read_type()?;
        let ct = value_type.component_type();
        let mut components = Vec::with_capacity(value_type.num_components());
        for _ in 0..value_type.num_components() {
            components.push(match ct {
                ComponentType::Double => f64::from_le_bytes(self.take::<8>()?),
                ComponentType::Int => i32::from_le_bytes(self.take::<4>()?) as f64,
                _ => f32::from_le_bytes(self.take::<4>()?) as f64,
            });
        }
        Ok(Value::new(value_type, components))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn opcode_table_matches_discriminants() {
        for (i, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(*op as usize, i);
            assert_eq!(Opcode::from_u8(i as u8), Some(*op));
        }
        assert_eq!(Opcode::from_u8(Opcode::COUNT as u8), None);
    }

    #[test_log::test]
    fn evaluates_postfix_program() {
        let mut data = PreshaderData::new();
        data.write_opcode(Opcode::Constant).write_value(&Value::float(4.0));
        data.write_opcode(Opcode::Constant).write_value(&Value::float(0.0));
        data.write_opcode(Opcode::Add);
        data.write_opcode(Opcode::Rsqrt);
        assert_eq!(data.evaluate().unwrap(), Value::float(0.5));
    }

    #[test_log::test]
    fn operand_order_is_preserved() {
        let mut data = PreshaderData::new();
        data.write_opcode(Opcode::Constant).write_value(&Value::float(6.0));
        data.write_opcode(Opcode::Constant).write_value(&Value::float(2.0));
        data.write_opcode(Opcode::Sub);
        assert_eq!(data.evaluate().unwrap(), Value::float(4.0));
    }

    #[test_log::test]
    fn constant_zero_pushes_typed_zero() {
        let mut data = PreshaderData::new();
        data.write_opcode(Opcode::ConstantZero).write_type(ValueType::Float3);
        assert_eq!(data.evaluate().unwrap(), Value::zero(ValueType::Float3));
    }

    #[test_log::test]
    fn values_keep_their_encoding() {
        let mut data = PreshaderData::new();
        data.write_opcode(Opcode::Constant).write_value(&Value::double(1.0e12 + 0.5));
        data.write_opcode(Opcode::Constant).write_value(&Value::int(-7));
        let decoded = data.instructions().unwrap();
        assert_eq!(
            decoded,
            vec![
                Instruction::Constant(Value::double(1.0e12 + 0.5)),
                Instruction::Constant(Value::int(-7)),
            ]
        );
    }

    #[test_log::test]
    fn malformed_programs_fail() {
        let mut data = PreshaderData::new();
        data.write_opcode(Opcode::Add);
        assert_eq!(data.evaluate(), Err(PreshaderError::StackUnderflow("Add")));

        let mut data = PreshaderData::new();
        data.write_opcode(Opcode::Constant).write_value(&Value::float(1.0));
        data.write_opcode(Opcode::Constant).write_value(&Value::float(1.0));
        assert_eq!(data.evaluate(), Err(PreshaderError::UnbalancedStack(1)));

        let data = PreshaderData { bytes: vec![0xee] };
        assert_eq!(data.evaluate(), Err(PreshaderError::UnknownOpcode(0xee)));

        let data = PreshaderData { bytes: vec![Opcode::Constant as u8, ValueType::Float1 as u8, 0] };
        assert_eq!(data.evaluate(), Err(PreshaderError::Truncated(2)));
    }
}
