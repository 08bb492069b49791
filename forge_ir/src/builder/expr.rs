//! Expression lowering: the C-like operator surface over `Value`s.
//!
//! Primitive receivers select an opcode by type family and emit directly;
//! non-primitive receivers resolve an operator method on the type (strict
//! match preferred, then a unique convertible match) and lower to a call.
//! Semantic failures are reported through the logger and yield empty values;
//! operators over empty values silently stay empty so one error does not
//! cascade into a storm.

use forge_common::ForgeResult;

use super::FunctionBuilder;
use crate::ir::{Instruction, OpCode};
use crate::registry::{TypeId, ACCESS_ALL};
use crate::value::{convert_primitive, Value};

#[derive(Clone, Copy)]
enum BinKind {
    /// Fresh result register of the receiver's type.
    Arith,
    /// In-place: the receiver is both destination and left operand.
    ArithAssign,
    /// Fresh boolean result register.
    Compare,
    /// Plain `assign` of the converted right-hand side.
    Assign,
}

#[derive(Clone, Copy)]
enum UnaryKind {
    /// Fresh result register of the receiver's type.
    Plain,
    /// Fresh boolean result register.
    PlainBool,
    /// Mutate in place; the result observes the post-operation value.
    InPlacePre,
    /// Mutate in place; the result observes the pre-operation value.
    InPlacePost,
}

/// Opcode choices for the four scalar families (signed, unsigned, f32, f64).
type FamilyOps = [OpCode; 4];

macro_rules! binary_exprs {
    ($($fn_name:ident => [$i:ident, $u:ident, $f:ident, $d:ident], $name:literal, $kind:ident;)*) => {
        impl FunctionBuilder<'_> {
            $(pub fn $fn_name(&mut self, lhs: &Value, rhs: &Value) -> ForgeResult<Value> {
                self.lower_binary(
                    lhs,
                    rhs,
                    [OpCode::$i, OpCode::$u, OpCode::$f, OpCode::$d],
                    $name,
                    BinKind::$kind,
                )
            })*
        }
    };
}

binary_exprs! {
    expr_add => [IAdd, UAdd, FAdd, DAdd], "+", Arith;
    expr_add_assign => [IAdd, UAdd, FAdd, DAdd], "+=", ArithAssign;
    expr_sub => [ISub, USub, FSub, DSub], "-", Arith;
    expr_sub_assign => [ISub, USub, FSub, DSub], "-=", ArithAssign;
    expr_mul => [IMul, UMul, FMul, DMul], "*", Arith;
    expr_mul_assign => [IMul, UMul, FMul, DMul], "*=", ArithAssign;
    expr_div => [IDiv, UDiv, FDiv, DDiv], "/", Arith;
    expr_div_assign => [IDiv, UDiv, FDiv, DDiv], "/=", ArithAssign;
    expr_rem => [IMod, UMod, FMod, DMod], "%", Arith;
    expr_rem_assign => [IMod, UMod, FMod, DMod], "%=", ArithAssign;

    expr_xor => [Xor, Xor, Noop, Noop], "^", Arith;
    expr_xor_assign => [Xor, Xor, Noop, Noop], "^=", ArithAssign;
    expr_band => [BAnd, BAnd, Noop, Noop], "&", Arith;
    expr_band_assign => [BAnd, BAnd, Noop, Noop], "&=", ArithAssign;
    expr_bor => [BOr, BOr, Noop, Noop], "|", Arith;
    expr_bor_assign => [BOr, BOr, Noop, Noop], "|=", ArithAssign;
    expr_shl => [Shl, Shl, Noop, Noop], "<<", Arith;
    expr_shl_assign => [Shl, Shl, Noop, Noop], "<<=", ArithAssign;
    expr_shr => [Shr, Shr, Noop, Noop], ">>", Arith;
    expr_shr_assign => [Shr, Shr, Noop, Noop], ">>=", ArithAssign;

    expr_eq => [IEq, UEq, FEq, DEq], "==", Compare;
    expr_neq => [INeq, UNeq, FNeq, DNeq], "!=", Compare;
    expr_lt => [ILt, ULt, FLt, DLt], "<", Compare;
    expr_lte => [ILte, ULte, FLte, DLte], "<=", Compare;
    expr_gt => [IGt, UGt, FGt, DGt], ">", Compare;
    expr_gte => [IGte, UGte, FGte, DGte], ">=", Compare;

    expr_land => [LAnd, LAnd, LAnd, LAnd], "&&", Compare;
    expr_lor => [LOr, LOr, LOr, LOr], "||", Compare;
    expr_land_assign => [LAnd, LAnd, LAnd, LAnd], "&&=", ArithAssign;
    expr_lor_assign => [LOr, LOr, LOr, LOr], "||=", ArithAssign;

    expr_assign => [Assign, Assign, Assign, Assign], "=", Assign;
}

macro_rules! unary_exprs {
    ($($fn_name:ident => [$i:ident, $u:ident, $f:ident, $d:ident], $name:literal, $kind:ident;)*) => {
        impl FunctionBuilder<'_> {
            $(pub fn $fn_name(&mut self, v: &Value) -> ForgeResult<Value> {
                self.lower_unary(
                    v,
                    [OpCode::$i, OpCode::$u, OpCode::$f, OpCode::$d],
                    $name,
                    UnaryKind::$kind,
                )
            })*
        }
    };
}

unary_exprs! {
    expr_neg => [INeg, Noop, FNeg, DNeg], "-", Plain;
    expr_not => [Not, Not, Not, Not], "!", PlainBool;
    expr_inv => [Inv, Inv, Noop, Noop], "~", Plain;
    expr_pre_inc => [IInc, UInc, FInc, DInc], "++", InPlacePre;
    expr_post_inc => [IInc, UInc, FInc, DInc], "++", InPlacePost;
    expr_pre_dec => [IDec, UDec, FDec, DDec], "--", InPlacePre;
    expr_post_dec => [IDec, UDec, FDec, DDec], "--", InPlacePost;
}

impl FunctionBuilder<'_> {
    fn lower_binary(
        &mut self,
        lhs: &Value,
        rhs: &Value,
        ops: FamilyOps,
        name: &str,
        kind: BinKind,
    ) -> ForgeResult<Value> {
        if lhs.is_empty() || rhs.is_empty() {
            return Ok(Value::Empty);
        }
        if lhs.is_label() || rhs.is_label() {
            self.logger.error("Invalid use of label as a value");
            return Ok(Value::Empty);
        }

        let info = self.registry.info(lhs.ty());
        if !info.is_primitive {
            return self.lower_operator_method(lhs, name, &[*rhs]);
        }

        let op = match self.family_opcode(lhs.ty(), ops) {
            Some(op) => op,
            None => return Ok(Value::Empty),
        };

        let converted = self.converted_to(rhs, lhs.ty())?;
        if converted.is_empty() {
            return Ok(Value::Empty);
        }

        let mut i = Instruction::new(op);
        let result = match kind {
            BinKind::Assign => {
                i.operands[0] = *lhs;
                i.operands[1] = converted;
                *lhs
            }
            BinKind::ArithAssign => {
                i.operands[0] = *lhs;
                i.operands[1] = *lhs;
                i.operands[2] = converted;
                *lhs
            }
            BinKind::Arith => {
                let result = self.val(lhs.ty());
                i.operands[0] = result;
                i.operands[1] = *lhs;
                i.operands[2] = converted;
                result
            }
            BinKind::Compare => {
                let result = self.val(TypeId::BOOL);
                i.operands[0] = result;
                i.operands[1] = *lhs;
                i.operands[2] = converted;
                result
            }
        };

        self.add(i);
        Ok(result)
    }

    fn lower_unary(&mut self, v: &Value, ops: FamilyOps, name: &str, kind: UnaryKind) -> ForgeResult<Value> {
        if v.is_empty() {
            return Ok(Value::Empty);
        }
        if v.is_label() {
            self.logger.error("Invalid use of label as a value");
            return Ok(Value::Empty);
        }

        let info = self.registry.info(v.ty());
        if !info.is_primitive {
            return self.lower_operator_method(v, name, &[]);
        }

        let op = match self.family_opcode(v.ty(), ops) {
            Some(op) => op,
            None => return Ok(Value::Empty),
        };

        match kind {
            UnaryKind::Plain | UnaryKind::PlainBool => {
                let result = if matches!(kind, UnaryKind::PlainBool) {
                    self.val(TypeId::BOOL)
                } else {
                    self.val(v.ty())
                };
                let mut i = Instruction::new(op);
                i.operands[0] = result;
                i.operands[1] = *v;
                self.add(i);
                Ok(result)
            }
            UnaryKind::InPlacePre => {
                let mut i = Instruction::new(op);
                i.operands[0] = *v;
                self.add(i);
                let result = self.val(v.ty());
                self.assign(&result, v)?;
                Ok(result)
            }
            UnaryKind::InPlacePost => {
                let result = self.val(v.ty());
                self.assign(&result, v)?;
                let mut i = Instruction::new(op);
                i.operands[0] = *v;
                self.add(i);
                Ok(result)
            }
        }
    }

    fn family_opcode(&self, ty: TypeId, ops: FamilyOps) -> Option<OpCode> {
        let info = self.registry.info(ty);
        if info.is_integral {
            if info.is_unsigned {
                Some(ops[1])
            } else {
                Some(ops[0])
            }
        } else if info.is_floating_point {
            match info.size {
                4 => Some(ops[2]),
                8 => Some(ops[3]),
                _ => {
                    self.logger.error("Arithmetic involving >64-bit wide floating point values is unsupported");
                    None
                }
            }
        } else {
            // pointer arithmetic and the like use the unsigned family
            Some(ops[1])
        }
    }

    /// Resolves and calls an operator method on a non-primitive receiver.
    pub(crate) fn lower_operator_method(
        &mut self,
        recv: &Value,
        name: &str,
        args: &[Value],
    ) -> ForgeResult<Value> {
        let arg_tys: Vec<TypeId> = args.iter().map(Value::ty).collect();
        let lookup = self.registry.find_methods(recv.ty(), name, &arg_tys, ACCESS_ALL);

        if let Some(strict) = lookup.strict {
            return self.generate_call(strict, args, Some(recv));
        }

        match lookup.candidates.len() {
            1 => self.generate_call(lookup.candidates[0], args, Some(recv)),
            0 => {
                self.logger.error(format!(
                    "Type '{}' has no operator '{}' with arguments matching ({})",
                    self.registry.type_name(recv.ty()),
                    name,
                    self.type_list(&arg_tys),
                ));
                Ok(Value::Empty)
            }
            _ => {
                self.logger.error(format!(
                    "Reference to operator '{}' of type '{}' with arguments ({}) is ambiguous",
                    name,
                    self.registry.type_name(recv.ty()),
                    self.type_list(&arg_tys),
                ));
                for c in &lookup.candidates {
                    self.logger.info(format!("^ Could be '{}'", self.registry.func_name(*c)));
                }
                Ok(Value::Empty)
            }
        }
    }

    /// `lhs[rhs]` via the type's `[]` operator.
    pub fn expr_index(&mut self, lhs: &Value, rhs: &Value) -> ForgeResult<Value> {
        if lhs.is_empty() || rhs.is_empty() {
            return Ok(Value::Empty);
        }
        if lhs.is_label() || rhs.is_label() {
            self.logger.error("Invalid use of label as a value");
            return Ok(Value::Empty);
        }
        self.lower_operator_method(lhs, "[]", &[*rhs])
    }

    /// `callee(args)`: a direct call for function-typed values, otherwise the
    /// type's `()` operator.
    pub fn expr_call(&mut self, callee: &Value, args: &[Value], self_ptr: Option<&Value>) -> ForgeResult<Value> {
        if callee.is_empty() || self_ptr.is_some_and(Value::is_empty) {
            return Ok(Value::Empty);
        }
        if callee.is_label() {
            self.logger.error("Invalid use of label as a value");
            return Ok(Value::Empty);
        }
        for arg in args {
            if arg.is_empty() {
                return Ok(Value::Empty);
            }
            if arg.is_label() {
                self.logger.error("Invalid use of label as a value");
                return Ok(Value::Empty);
            }
        }

        if self.registry.info(callee.ty()).is_function {
            if callee.is_imm() {
                let func = self.registry.func_by_id(callee.imm_bits().u())?;
                return self.generate_call(func, args, self_ptr);
            }
            return self.generate_call_value(callee, args, self_ptr);
        }

        self.lower_operator_method(callee, "()", args)
    }

    /// `*v`. Dereferencing a pointer to a primitive loads it; a pointer to a
    /// composite yields the pointee type on the same register (objects are
    /// handled by reference); anything else resolves an `*` operator method.
    pub fn expr_deref(&mut self, v: &Value) -> ForgeResult<Value> {
        if v.is_empty() {
            return Ok(Value::Empty);
        }
        if v.is_label() {
            self.logger.error("Invalid use of label as a value");
            return Ok(Value::Empty);
        }

        let info = self.registry.info(v.ty());
        if info.is_pointer {
            let dest = match self.registry.pointee(v.ty()) {
                Some(d) => d,
                None => return Ok(Value::Empty),
            };
            let dest_info = self.registry.info(dest);
            if dest_info.is_primitive || dest_info.is_pointer {
                let result = self.val(dest);
                self.load(&result, v, 0)?;
                return Ok(result);
            }
            return Ok(v.with_ty(dest));
        }

        self.lower_operator_method(v, "*", &[])
    }

    /// Coerces `v` to type `to`, emitting as little as possible: identity and
    /// pointer-to-pointer conversions are free, immediate primitives fold at
    /// build time, register primitives emit `cvt`, and composites go through
    /// conversion operators or converting constructors.
    pub fn converted_to(&mut self, v: &Value, to: TypeId) -> ForgeResult<Value> {
        if v.is_empty() {
            return Ok(Value::Empty);
        }
        if v.is_label() {
            self.logger.error("Invalid use of label as a value");
            return Ok(Value::Empty);
        }

        if self.registry.is_equivalent(v.ty(), to) {
            return Ok(*v);
        }

        let from_info = self.registry.info(v.ty());
        let to_info = self.registry.info(to);

        if from_info.is_pointer && to_info.is_pointer {
            return Ok(v.with_ty(to));
        }

        if from_info.is_primitive && to_info.is_primitive {
            if v.is_imm() {
                let bits = convert_primitive(v.imm_bits(), from_info, to_info);
                return Ok(Value::imm(to, bits));
            }
            let result = self.val(to);
            self.cvt(&result, v)?;
            return Ok(result);
        }

        if let Some(cast) = self.registry.find_conversion_operator(v.ty(), to, ACCESS_ALL) {
            return self.generate_call(cast, &[], Some(v));
        }

        let ctors = self.registry.find_constructors(to, &[v.ty()], true, ACCESS_ALL);
        match ctors.candidates.len() {
            1 => {
                let result = self.val(to);
                self.generate_call(ctors.candidates[0], &[*v], Some(&result))?;
                Ok(result)
            }
            0 => {
                self.logger.error(format!(
                    "No conversion from type '{}' to '{}' is available",
                    self.registry.type_name(v.ty()),
                    self.registry.type_name(to),
                ));
                Ok(Value::Empty)
            }
            _ => {
                self.logger.error(format!(
                    "Construction of type '{}' with arguments ({}) is ambiguous",
                    self.registry.type_name(to),
                    self.registry.type_name(v.ty()),
                ));
                for c in &ctors.candidates {
                    self.logger.info(format!("^ Could be '{}'", self.registry.func_name(*c)));
                }
                Ok(Value::Empty)
            }
        }
    }

    pub(crate) fn type_list(&self, tys: &[TypeId]) -> String {
        tys.iter()
            .map(|t| self.registry.type_name(*t))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
