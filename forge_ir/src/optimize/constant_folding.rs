//! Build-time evaluation of constant-only operations.

use forge_common::ForgeResult;

use super::{PassContext, PostProcessStep};
use crate::ir::{Instruction, OpCode};
use crate::registry::{Registry, TypeId};
use crate::value::{convert_primitive, Immediate, Scalar, Value};

/// Rewrites every instruction whose inputs are all immediates into an
/// `assign` of the folded result.
///
/// Arithmetic follows C semantics over the `{i64, u64, f32, f64}` domain
/// chosen from the operand types; the folded immediate takes the domain's
/// type (comparisons and logical operations produce booleans). `cvt` handles
/// primitive-to-primitive only and agrees bit-for-bit with the interpreter.
/// Division or modulo by zero is not defended against, mirroring the
/// behavior of the arithmetic opcode itself.
pub struct ConstantFoldingStep;

#[derive(Clone, Copy, PartialEq)]
enum Domain {
    I64,
    U64,
    F32,
    F64,
}

impl Domain {
    fn of(s: Scalar) -> Domain {
        match s {
            Scalar::I64(_) => Domain::I64,
            Scalar::U64(_) => Domain::U64,
            Scalar::F32(_) => Domain::F32,
            Scalar::F64(_) => Domain::F64,
        }
    }

    /// The common domain of a binary operation, per the usual arithmetic
    /// conversions: floating point wins, otherwise unsigned wins.
    fn common(a: Domain, b: Domain) -> Domain {
        if a == Domain::F64 || b == Domain::F64 {
            Domain::F64
        } else if a == Domain::F32 || b == Domain::F32 {
            Domain::F32
        } else if a == Domain::U64 || b == Domain::U64 {
            Domain::U64
        } else {
            Domain::I64
        }
    }

    fn type_id(self) -> TypeId {
        match self {
            Domain::I64 => TypeId::I64,
            Domain::U64 => TypeId::U64,
            Domain::F32 => TypeId::F32,
            Domain::F64 => TypeId::F64,
        }
    }
}

fn scalar_of(v: &Value, registry: &Registry) -> Scalar {
    v.imm_bits().scalar(registry.info(v.ty()))
}

fn as_f64(s: Scalar) -> f64 {
    match s {
        Scalar::I64(v) => v as f64,
        Scalar::U64(v) => v as f64,
        Scalar::F32(v) => v as f64,
        Scalar::F64(v) => v,
    }
}

fn as_f32(s: Scalar) -> f32 {
    match s {
        Scalar::I64(v) => v as f32,
        Scalar::U64(v) => v as f32,
        Scalar::F32(v) => v,
        Scalar::F64(v) => v as f32,
    }
}

fn as_u64(s: Scalar) -> u64 {
    match s {
        Scalar::I64(v) => v as u64,
        Scalar::U64(v) => v,
        Scalar::F32(v) => v as u64,
        Scalar::F64(v) => v as u64,
    }
}

fn as_i64(s: Scalar) -> i64 {
    match s {
        Scalar::I64(v) => v,
        Scalar::U64(v) => v as i64,
        Scalar::F32(v) => v as i64,
        Scalar::F64(v) => v as i64,
    }
}

/// Raw bits for the untyped bitwise operations: integers contribute their
/// value, floats their bit pattern.
fn bits_of(s: Scalar) -> u64 {
    match s {
        Scalar::I64(v) => v as u64,
        Scalar::U64(v) => v,
        Scalar::F32(v) => v.to_bits() as u64,
        Scalar::F64(v) => v.to_bits(),
    }
}

/// Packages a result computed in the common domain back into an immediate of
/// the left operand's domain type.
fn repack(result: Scalar, into: Domain) -> (TypeId, Immediate) {
    let bits = match into {
        Domain::I64 => Immediate::of_i64(as_i64(result)),
        Domain::U64 => Immediate::of_u64(as_u64(result)),
        Domain::F32 => Immediate::of_f32(as_f32(result)),
        Domain::F64 => Immediate::of_f64(as_f64(result)),
    };
    (into.type_id(), bits)
}

fn bool_imm(v: bool) -> (TypeId, Immediate) {
    (TypeId::BOOL, Immediate::of_bool(v))
}

macro_rules! fold_in_common {
    ($common:expr, $a:expr, $b:expr, $op:tt, $int_op:ident) => {
        match $common {
            Domain::F64 => Scalar::F64(as_f64($a) $op as_f64($b)),
            Domain::F32 => Scalar::F32(as_f32($a) $op as_f32($b)),
            Domain::U64 => Scalar::U64(as_u64($a).$int_op(as_u64($b))),
            Domain::I64 => Scalar::I64(as_i64($a).$int_op(as_i64($b))),
        }
    };
}

macro_rules! compare_in_common {
    ($common:expr, $a:expr, $b:expr, $op:tt) => {
        match $common {
            Domain::F64 => as_f64($a) $op as_f64($b),
            Domain::F32 => as_f32($a) $op as_f32($b),
            Domain::U64 => as_u64($a) $op as_u64($b),
            Domain::I64 => as_i64($a) $op as_i64($b),
        }
    };
}

fn fold_binary(op: OpCode, a: Scalar, b: Scalar) -> Option<(TypeId, Immediate)> {
    let da = Domain::of(a);
    let common = Domain::common(da, Domain::of(b));

    let result = match op {
        OpCode::IAdd | OpCode::UAdd | OpCode::FAdd | OpCode::DAdd => {
            fold_in_common!(common, a, b, +, wrapping_add)
        }
        OpCode::ISub | OpCode::USub | OpCode::FSub | OpCode::DSub => {
            fold_in_common!(common, a, b, -, wrapping_sub)
        }
        OpCode::IMul | OpCode::UMul | OpCode::FMul | OpCode::DMul => {
            fold_in_common!(common, a, b, *, wrapping_mul)
        }
        OpCode::IDiv | OpCode::UDiv | OpCode::FDiv | OpCode::DDiv => {
            fold_in_common!(common, a, b, /, wrapping_div)
        }
        OpCode::IMod | OpCode::UMod | OpCode::FMod | OpCode::DMod => match common {
            Domain::F64 => Scalar::F64(as_f64(a) % as_f64(b)),
            Domain::F32 => Scalar::F32(as_f32(a) % as_f32(b)),
            Domain::U64 => Scalar::U64(as_u64(a).wrapping_rem(as_u64(b))),
            Domain::I64 => Scalar::I64(as_i64(a).wrapping_rem(as_i64(b))),
        },

        OpCode::ILt | OpCode::ULt | OpCode::FLt | OpCode::DLt => {
            return Some(bool_imm(compare_in_common!(common, a, b, <)))
        }
        OpCode::ILte | OpCode::ULte | OpCode::FLte | OpCode::DLte => {
            return Some(bool_imm(compare_in_common!(common, a, b, <=)))
        }
        OpCode::IGt | OpCode::UGt | OpCode::FGt | OpCode::DGt => {
            return Some(bool_imm(compare_in_common!(common, a, b, >)))
        }
        OpCode::IGte | OpCode::UGte | OpCode::FGte | OpCode::DGte => {
            return Some(bool_imm(compare_in_common!(common, a, b, >=)))
        }
        OpCode::IEq | OpCode::UEq | OpCode::FEq | OpCode::DEq => {
            return Some(bool_imm(compare_in_common!(common, a, b, ==)))
        }
        OpCode::INeq | OpCode::UNeq | OpCode::FNeq | OpCode::DNeq => {
            return Some(bool_imm(compare_in_common!(common, a, b, !=)))
        }

        OpCode::LAnd => return Some(bool_imm(a.is_truthy() && b.is_truthy())),
        OpCode::LOr => return Some(bool_imm(a.is_truthy() || b.is_truthy())),

        OpCode::Shl => return Some(fold_bits(da, bits_of(a).wrapping_shl(as_u64(b) as u32))),
        OpCode::Shr => return Some(fold_bits(da, bits_of(a).wrapping_shr(as_u64(b) as u32))),
        OpCode::BAnd => return Some(fold_bits(da, bits_of(a) & bits_of(b))),
        OpCode::BOr => return Some(fold_bits(da, bits_of(a) | bits_of(b))),
        OpCode::Xor => return Some(fold_bits(da, bits_of(a) ^ bits_of(b))),

        _ => return None,
    };

    Some(repack(result, da))
}

/// Reinterprets raw bits back into the left operand's domain.
fn fold_bits(into: Domain, bits: u64) -> (TypeId, Immediate) {
    match into {
        Domain::I64 => (TypeId::I64, Immediate::of_i64(bits as i64)),
        Domain::U64 => (TypeId::U64, Immediate::of_u64(bits)),
        Domain::F32 => (TypeId::F32, Immediate::of_f32(f32::from_bits(bits as u32))),
        Domain::F64 => (TypeId::F64, Immediate::of_f64(f64::from_bits(bits))),
    }
}

fn fold_unary(op: OpCode, v: Scalar) -> Option<(TypeId, Immediate)> {
    match op {
        OpCode::INeg => Some((TypeId::I64, Immediate::of_i64(as_i64(v).wrapping_neg()))),
        OpCode::FNeg => Some((TypeId::F32, Immediate::of_f32(-as_f32(v)))),
        OpCode::DNeg => Some((TypeId::F64, Immediate::of_f64(-as_f64(v)))),
        OpCode::Not => Some(bool_imm(!v.is_truthy())),
        OpCode::Inv => Some(fold_bits(Domain::of(v), !bits_of(v))),
        _ => None,
    }
}

impl PostProcessStep for ConstantFoldingStep {
    fn execute(&mut self, cx: &mut PassContext) -> ForgeResult<bool> {
        let logger = cx.logger();
        logger.debug("ConstantFolding: analyzing");

        let mut changed = false;

        for addr in 0..cx.holder.code.len() {
            let instr = cx.holder.code[addr];
            let info = instr.info();

            if info.assigns_operand != Some(0) {
                continue;
            }

            let folded: Option<(TypeId, Immediate)> = if info.operand_count == 3 {
                if !instr.operands[1].is_imm() || !instr.operands[2].is_imm() {
                    continue;
                }

                if instr.op == OpCode::Cvt {
                    let src = &instr.operands[1];
                    let dest_ty = cx.registry.type_by_id(instr.operands[2].imm_bits().u())?;
                    let src_info = cx.registry.info(src.ty());
                    let dest_info = cx.registry.info(dest_ty);
                    if !src_info.is_primitive || !dest_info.is_primitive {
                        continue;
                    }
                    Some((dest_ty, convert_primitive(src.imm_bits(), src_info, dest_info)))
                } else {
                    fold_binary(
                        instr.op,
                        scalar_of(&instr.operands[1], cx.registry),
                        scalar_of(&instr.operands[2], cx.registry),
                    )
                }
            } else if info.operand_count == 2 {
                if !instr.operands[1].is_imm() {
                    continue;
                }
                fold_unary(instr.op, scalar_of(&instr.operands[1], cx.registry))
            } else {
                None
            };

            let Some((ty, bits)) = folded else {
                continue;
            };

            logger.debug(format!(
                "[{addr}] constant-only operation: {}",
                instr.render(cx.registry, cx.holder.strings()),
            ));

            let rewritten: &mut Instruction = &mut cx.holder.code[addr];
            rewritten.op = OpCode::Assign;
            rewritten.operands[1] = Value::imm(ty, bits);
            rewritten.operands[2] = Value::Empty;
            changed = true;
        }

        if changed {
            cx.request_repeat();
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn integer_add_folds_in_the_signed_domain() {
        let (ty, bits) = fold_binary(OpCode::IAdd, Scalar::I64(10), Scalar::I64(15)).unwrap();
        assert_eq!(ty, TypeId::I64);
        assert_eq!(bits.i(), 25);
    }

    #[test]
    fn mixed_float_int_promotes_then_truncates_back() {
        // 1 + (-0.5) computes as f64 then truncates into the i64 domain
        let (ty, bits) = fold_binary(OpCode::IAdd, Scalar::I64(1), Scalar::F64(-0.5)).unwrap();
        assert_eq!(ty, TypeId::I64);
        assert_eq!(bits.i(), 0);
    }

    #[test]
    fn comparisons_fold_to_booleans() {
        let (ty, bits) = fold_binary(OpCode::FLt, Scalar::F32(1.5), Scalar::F32(2.0)).unwrap();
        assert_eq!(ty, TypeId::BOOL);
        assert_eq!(bits.u(), 1);

        let (_, bits) = fold_binary(OpCode::UGte, Scalar::U64(3), Scalar::U64(9)).unwrap();
        assert_eq!(bits.u(), 0);
    }

    #[test]
    fn unary_negation_follows_the_opcode_family() {
        let (ty, bits) = fold_unary(OpCode::INeg, Scalar::I64(42)).unwrap();
        assert_eq!(ty, TypeId::I64);
        assert_eq!(bits.i(), -42);

        let (ty, bits) = fold_unary(OpCode::FNeg, Scalar::F32(1.25)).unwrap();
        assert_eq!(ty, TypeId::F32);
        assert_eq!(bits.f(), -1.25);
    }

    #[test]
    fn logical_ops_use_truthiness() {
        let (_, bits) = fold_binary(OpCode::LAnd, Scalar::I64(2), Scalar::F32(0.0)).unwrap();
        assert_eq!(bits.u(), 0);
        let (_, bits) = fold_binary(OpCode::LOr, Scalar::I64(0), Scalar::F64(0.25)).unwrap();
        assert_eq!(bits.u(), 1);
    }
}
