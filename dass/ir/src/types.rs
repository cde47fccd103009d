//! Scalar types, constants and SSA values.
use crate::InstIdx;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Element type behind a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElemTy {
    Int(u32),
    Float,
    Double,
    /// Pointee type is unknown or an aggregate.
    Opaque,
}

/// The type of an SSA value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    Void,
    Int(u32),
    Float,
    Double,
    Ptr(ElemTy),
}

impl Type {
    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    pub fn is_fp(&self) -> bool {
        matches!(self, Type::Float | Type::Double)
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, Type::Ptr(_))
    }

    pub fn int_width(&self) -> Option<u32> {
        match self {
            Type::Int(w) => Some(*w),
            _ => None,
        }
    }

    /// Width of the bit-vector encoding of this type. Pointers are
    /// addresses and occupy 64 bits.
    pub fn bit_width(&self) -> u32 {
        match self {
            Type::Void => 0,
            Type::Int(w) => *w,
            Type::Float => 32,
            Type::Double | Type::Ptr(_) => 64,
        }
    }

    /// Type of the value a pointer of this type refers to.
    pub fn pointee(&self) -> Option<Type> {
        match self {
            Type::Ptr(ElemTy::Int(w)) => Some(Type::Int(*w)),
            Type::Ptr(ElemTy::Float) => Some(Type::Float),
            Type::Ptr(ElemTy::Double) => Some(Type::Double),
            _ => None,
        }
    }

    /// Pointer to a scalar of this type.
    pub fn ptr_to(&self) -> Type {
        Type::Ptr(match self {
            Type::Int(w) => ElemTy::Int(*w),
            Type::Float => ElemTy::Float,
            Type::Double => ElemTy::Double,
            Type::Void | Type::Ptr(_) => ElemTy::Opaque,
        })
    }
}

impl Display for ElemTy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElemTy::Int(w) => write!(f, "i{w}"),
            ElemTy::Float => write!(f, "float"),
            ElemTy::Double => write!(f, "double"),
            ElemTy::Opaque => write!(f, "opaque"),
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int(w) => write!(f, "i{w}"),
            Type::Float => write!(f, "float"),
            Type::Double => write!(f, "double"),
            Type::Ptr(elem) => write!(f, "{elem}*"),
        }
    }
}

/// A compile-time literal. Floating-point literals are kept as raw bits so
/// that constants can be hashed and compared exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constant {
    Int { width: u32, value: i64 },
    Float(u32),
    Double(u64),
}

impl Constant {
    pub fn int(width: u32, value: i64) -> Self {
        Constant::Int { width, value }
    }

    pub fn bool(value: bool) -> Self {
        Constant::Int {
            width: 1,
            value: value as i64,
        }
    }

    pub fn float(value: f32) -> Self {
        Constant::Float(value.to_bits())
    }

    pub fn double(value: f64) -> Self {
        Constant::Double(value.to_bits())
    }

    pub fn ty(&self) -> Type {
        match self {
            Constant::Int { width, .. } => Type::Int(*width),
            Constant::Float(_) => Type::Float,
            Constant::Double(_) => Type::Double,
        }
    }

    /// Sign-extended integer value of an integer literal.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Constant::Int { width, value } => Some(sext(*value as u64, *width)),
            _ => None,
        }
    }
}

impl Display for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::Int { width: 1, value } => {
                write!(f, "{}", if *value & 1 == 1 { "true" } else { "false" })
            }
            Constant::Int { .. } => {
                write!(f, "{}", self.as_int().unwrap_or_default())
            }
            Constant::Float(bits) => write!(f, "{:e}", f32::from_bits(*bits)),
            Constant::Double(bits) => write!(f, "{:e}", f64::from_bits(*bits)),
        }
    }
}

/// Mask `value` down to its low `width` bits.
pub fn mask(value: u64, width: u32) -> u64 {
    if width >= 64 {
        value
    } else {
        value & ((1u64 << width) - 1)
    }
}

/// Interpret the low `width` bits of `value` as a two's complement number.
pub fn sext(value: u64, width: u32) -> i64 {
    if width == 0 || width >= 64 {
        value as i64
    } else {
        let shift = 64 - width;
        ((value << shift) as i64) >> shift
    }
}

/// An SSA operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// The n-th formal argument of the enclosing function.
    Arg(u32),
    /// The result of an instruction.
    Inst(InstIdx),
    Const(Constant),
    /// An unconstrained value of the given type.
    Undef(Type),
}

impl Value {
    pub fn as_inst(&self) -> Option<InstIdx> {
        match self {
            Value::Inst(idx) => Some(*idx),
            _ => None,
        }
    }

    pub fn as_const(&self) -> Option<Constant> {
        match self {
            Value::Const(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_const_int(&self) -> Option<i64> {
        self.as_const().and_then(|c| c.as_int())
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Value::Const(_))
    }

    pub fn int(width: u32, value: i64) -> Self {
        Value::Const(Constant::int(width, value))
    }
}

impl From<InstIdx> for Value {
    fn from(idx: InstIdx) -> Self {
        Value::Inst(idx)
    }
}

impl From<Constant> for Value {
    fn from(c: Constant) -> Self {
        Value::Const(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_literals_sign_extend() {
        let c = Constant::int(8, 0xff);
        assert_eq!(c.as_int(), Some(-1));
        assert_eq!(Constant::int(32, -4).as_int(), Some(-4));
        assert_eq!(c.to_string(), "-1");
        assert_eq!(Constant::bool(true).to_string(), "true");
    }

    #[test]
    fn pointer_types() {
        let p = Type::Int(32).ptr_to();
        assert_eq!(p, Type::Ptr(ElemTy::Int(32)));
        assert_eq!(p.pointee(), Some(Type::Int(32)));
        assert_eq!(p.to_string(), "i32*");
        assert_eq!(mask(u64::MAX, 5), 31);
    }
}
