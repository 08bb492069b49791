//! Operand model: immediates and the polymorphic `Value`.

use serde::{Deserialize, Serialize};

use crate::registry::{Registry, TypeId, TypeInfo};
use crate::{LabelId, StackId, VregId, NULL_REGISTER, NULL_STACK};

/// Canonical 64-bit storage for immediate payloads. The bits are interpreted
/// according to the type of the value carrying them: unsigned values are
/// zero-extended, signed values sign-extended, `f32` occupies the low four
/// bytes, `f64` the full width.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Immediate(u64);

impl Immediate {
    pub const ZERO: Immediate = Immediate(0);

    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn of_bool(v: bool) -> Self {
        Self(v as u64)
    }

    pub fn of_u64(v: u64) -> Self {
        Self(v)
    }

    pub fn of_i64(v: i64) -> Self {
        Self(v as u64)
    }

    pub fn of_f32(v: f32) -> Self {
        Self(v.to_bits() as u64)
    }

    pub fn of_f64(v: f64) -> Self {
        Self(v.to_bits())
    }

    pub fn u(self) -> u64 {
        self.0
    }

    pub fn i(self) -> i64 {
        self.0 as i64
    }

    pub fn f(self) -> f32 {
        f32::from_bits(self.0 as u32)
    }

    pub fn d(self) -> f64 {
        f64::from_bits(self.0)
    }

    /// Reads the payload as the scalar described by `info`: the typed view
    /// every arithmetic and conversion site goes through.
    pub fn scalar(self, info: TypeInfo) -> Scalar {
        if info.is_floating_point {
            if info.size == 4 {
                Scalar::F32(self.f())
            } else {
                Scalar::F64(self.d())
            }
        } else if info.is_unsigned || info.is_pointer {
            Scalar::U64(self.u())
        } else {
            Scalar::I64(self.i())
        }
    }
}

macro_rules! imm_from_int {
    ($($fn_name:ident: $ty:ty => $via:ty),* $(,)?) => {
        impl Immediate {
            $(pub fn $fn_name(v: $ty) -> Self {
                Self(v as $via as u64)
            })*
        }
    };
}

imm_from_int! {
    of_u8: u8 => u64,
    of_u16: u16 => u64,
    of_u32: u32 => u64,
    of_i8: i8 => i64,
    of_i16: i16 => i64,
    of_i32: i32 => i64,
}

/// A typed scalar read out of a 64-bit payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl Scalar {
    pub fn is_truthy(self) -> bool {
        match self {
            Scalar::I64(v) => v != 0,
            Scalar::U64(v) => v != 0,
            Scalar::F32(v) => v != 0.0,
            Scalar::F64(v) => v != 0.0,
        }
    }
}

/// Converts `bits`, interpreted per `from`, to the primitive described by
/// `to`, returning the canonical register/immediate representation of the
/// result (sign- or zero-extended to 64 bits). Follows C conversion rules.
///
/// Shared between constant folding and the interpreter so the two agree
/// bit-for-bit.
pub fn convert_primitive(bits: Immediate, from: TypeInfo, to: TypeInfo) -> Immediate {
    macro_rules! cast_to {
        ($v:expr) => {{
            let v = $v;
            if to.is_floating_point {
                if to.size == 4 {
                    Immediate::of_f32(v as f32)
                } else {
                    Immediate::of_f64(v as f64)
                }
            } else if to.is_unsigned {
                match to.size {
                    1 => Immediate::of_u8(v as u8),
                    2 => Immediate::of_u16(v as u16),
                    4 => Immediate::of_u32(v as u32),
                    _ => Immediate::of_u64(v as u64),
                }
            } else {
                match to.size {
                    1 => Immediate::of_i8(v as i8),
                    2 => Immediate::of_i16(v as i16),
                    4 => Immediate::of_i32(v as i32),
                    _ => Immediate::of_i64(v as i64),
                }
            }
        }};
    }

    match bits.scalar(from) {
        Scalar::I64(v) => cast_to!(v),
        Scalar::U64(v) => cast_to!(v),
        Scalar::F32(v) => cast_to!(v),
        Scalar::F64(v) => cast_to!(v),
    }
}

/// A polymorphic operand: empty, an immediate, a virtual-register reference,
/// or a label reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Empty,
    Imm {
        ty: TypeId,
        bits: Immediate,
    },
    Reg {
        ty: TypeId,
        id: VregId,
        /// Stack allocation this register names, when it does.
        stack: StackId,
        /// Interned name-string id in the owning builder.
        name: Option<u32>,
    },
    Label {
        id: LabelId,
    },
}

impl Value {
    pub fn reg(id: VregId, ty: TypeId) -> Self {
        Value::Reg { ty, id, stack: NULL_STACK, name: None }
    }

    pub fn imm(ty: TypeId, bits: Immediate) -> Self {
        Value::Imm { ty, bits }
    }

    pub fn label(id: LabelId) -> Self {
        Value::Label { id }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    pub fn is_imm(&self) -> bool {
        matches!(self, Value::Imm { .. })
    }

    pub fn is_reg(&self) -> bool {
        matches!(self, Value::Reg { .. })
    }

    pub fn is_label(&self) -> bool {
        matches!(self, Value::Label { .. })
    }

    pub fn ty(&self) -> TypeId {
        match self {
            Value::Imm { ty, .. } | Value::Reg { ty, .. } => *ty,
            Value::Empty | Value::Label { .. } => TypeId::VOID,
        }
    }

    pub fn set_ty(&mut self, new_ty: TypeId) {
        match self {
            Value::Imm { ty, .. } | Value::Reg { ty, .. } => *ty = new_ty,
            Value::Empty | Value::Label { .. } => {}
        }
    }

    pub fn with_ty(mut self, new_ty: TypeId) -> Self {
        self.set_ty(new_ty);
        self
    }

    pub fn reg_id(&self) -> VregId {
        match self {
            Value::Reg { id, .. } => *id,
            _ => NULL_REGISTER,
        }
    }

    pub fn imm_bits(&self) -> Immediate {
        match self {
            Value::Imm { bits, .. } => *bits,
            Value::Label { id } => Immediate::of_u32(*id),
            _ => Immediate::ZERO,
        }
    }

    pub fn label_id(&self) -> LabelId {
        match self {
            Value::Label { id } => *id,
            _ => crate::NULL_LABEL,
        }
    }

    pub fn stack_ref(&self) -> StackId {
        match self {
            Value::Reg { stack, .. } => *stack,
            _ => NULL_STACK,
        }
    }

    pub fn set_stack_ref(&mut self, stack_id: StackId) {
        if let Value::Reg { stack, .. } = self {
            *stack = stack_id;
        }
    }

    pub fn name_id(&self) -> Option<u32> {
        match self {
            Value::Reg { name, .. } => *name,
            _ => None,
        }
    }

    pub fn set_name_id(&mut self, id: u32) {
        if let Value::Reg { name, .. } = self {
            *name = Some(id);
        }
    }

    /// Two values are equivalent iff they have the same type, the same kind,
    /// and the same payload. Float immediates compare by value, so `-0.0`
    /// equals `0.0` and NaN equals nothing.
    pub fn is_equivalent_to(&self, other: &Value, registry: &Registry) -> bool {
        match (self, other) {
            (Value::Empty, Value::Empty) => true,
            (Value::Label { id: a }, Value::Label { id: b }) => a == b,
            (Value::Imm { ty: ta, bits: ba }, Value::Imm { ty: tb, bits: bb }) => {
                if ta != tb {
                    return false;
                }
                let info = registry.info(*ta);
                if info.is_floating_point {
                    if info.size == 4 {
                        ba.f() == bb.f()
                    } else {
                        ba.d() == bb.d()
                    }
                } else {
                    ba.u() == bb.u()
                }
            }
            (Value::Reg { ty: ta, id: a, .. }, Value::Reg { ty: tb, id: b, .. }) => ta == tb && a == b,
            _ => false,
        }
    }

    /// Debug rendering. `strings` is the owning builder's interned name
    /// table (pass an empty slice when names are unavailable).
    pub fn render(&self, registry: &Registry, strings: &[String]) -> String {
        match self {
            Value::Empty => "<empty>".into(),
            Value::Label { id } => format!("LABEL_{id}"),
            Value::Imm { ty, bits } => {
                let info = registry.info(*ty);
                if info.is_function {
                    return format!("<fn {}>", bits.u());
                }
                match bits.scalar(info) {
                    Scalar::I64(v) => format!("{v}"),
                    Scalar::U64(v) => format!("{v}"),
                    Scalar::F32(v) => format!("{v}"),
                    Scalar::F64(v) => format!("{v}"),
                }
            }
            Value::Reg { ty, id, name, .. } => {
                if let Some(n) = name {
                    if let Some(s) = strings.get(*n as usize) {
                        if !s.is_empty() {
                            return s.clone();
                        }
                    }
                }
                if registry.info(*ty).is_floating_point {
                    format!("FP{id}")
                } else {
                    format!("GP{id}")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn immediates_extend_canonically() {
        assert_eq!(Immediate::of_i8(-1).bits(), u64::MAX);
        assert_eq!(Immediate::of_u8(0xFF).bits(), 0xFF);
        assert_eq!(Immediate::of_i32(-2).i(), -2);
        assert_eq!(Immediate::of_f32(1.5).f(), 1.5);
        assert_eq!(Immediate::of_f64(-2.25).d(), -2.25);
    }

    #[test]
    fn convert_follows_c_rules() {
        let reg = Registry::new();
        let f32i = reg.info(TypeId::F32);
        let i32i = reg.info(TypeId::I32);
        let u8i = reg.info(TypeId::U8);
        let f64i = reg.info(TypeId::F64);

        // truncation toward zero
        let r = convert_primitive(Immediate::of_f32(3.7), f32i, i32i);
        assert_eq!(r.i(), 3);
        let r = convert_primitive(Immediate::of_f32(-3.7), f32i, i32i);
        assert_eq!(r.i(), -3);

        // widening int -> float
        let r = convert_primitive(Immediate::of_i32(-7), i32i, f64i);
        assert_eq!(r.d(), -7.0);

        // narrowing int -> int wraps
        let r = convert_primitive(Immediate::of_i32(257), i32i, u8i);
        assert_eq!(r.u(), 1);

        // identity float widths round-trip
        let r = convert_primitive(Immediate::of_f64(0.1), f64i, f64i);
        assert_eq!(r.d(), 0.1);
    }

    #[test]
    fn float_immediates_compare_by_value() {
        let reg = Registry::new();
        let a = Value::imm(TypeId::F32, Immediate::of_f32(0.0));
        let b = Value::imm(TypeId::F32, Immediate::of_f32(-0.0));
        assert!(a.is_equivalent_to(&b, &reg));

        let n = Value::imm(TypeId::F32, Immediate::of_f32(f32::NAN));
        assert!(!n.is_equivalent_to(&n.clone(), &reg));
    }

    #[test]
    fn register_equivalence_requires_type_and_id() {
        let reg = Registry::new();
        let a = Value::reg(3, TypeId::I32);
        let b = Value::reg(3, TypeId::I32);
        let c = Value::reg(3, TypeId::U32);
        let d = Value::reg(4, TypeId::I32);
        assert!(a.is_equivalent_to(&b, &reg));
        assert!(!a.is_equivalent_to(&c, &reg));
        assert!(!a.is_equivalent_to(&d, &reg));
    }
}
