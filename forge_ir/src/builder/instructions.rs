//! One factory method per opcode. Each validates its operands against the
//! opcode's operand kinds and typing rules (when validation is enabled) and
//! emits exactly one instruction.

use forge_common::ForgeResult;

use super::{FunctionBuilder, InstrRef};
use crate::ir::{Instruction, OpCode};
use crate::registry::{FuncId, TypeId, ValueId};
use crate::value::{Immediate, Value};
use crate::{LabelId, StackId};

impl FunctionBuilder<'_> {
    /// Emits the `label` instruction for a previously allocated id.
    pub fn place_label(&mut self, label: LabelId) -> ForgeResult<InstrRef> {
        if self.validation {
            if label == 0 || label >= self.next_label_id() {
                return Err(self.verr("place_label - invalid label id"));
            }
            if self
                .code
                .iter()
                .any(|i| i.op == OpCode::Label && i.operands[0].label_id() == label)
            {
                return Err(self.verr("place_label - a label id may only be added to the code one time"));
            }
        }

        let mut i = Instruction::new(OpCode::Label);
        i.operands[0] = Value::label(label);
        Ok(self.add(i))
    }

    /// Allocates a label id and immediately emits its `label` instruction.
    pub fn label_here(&mut self) -> ForgeResult<LabelId> {
        let id = self.label();
        self.place_label(id)?;
        Ok(id)
    }

    /// Allocates a stack id and emits its `stack_alloc`.
    pub fn stack_alloc(&mut self, size: u32) -> ForgeResult<StackId> {
        let id = self.reserve_alloc_id();
        self.stack_alloc_as(size, id)?;
        Ok(id)
    }

    /// Emits `stack_alloc` for a previously reserved id.
    pub fn stack_alloc_as(&mut self, size: u32, alloc: StackId) -> ForgeResult<InstrRef> {
        if self.validation {
            if alloc == 0 {
                return Err(self.verr("stack_alloc - stack id 0 is reserved"));
            }
            if self
                .code
                .iter()
                .any(|i| i.op == OpCode::StackAlloc && i.operands[1].imm_bits().u() == alloc as u64)
            {
                return Err(self.verr("stack_alloc - a stack id may only be allocated one time per function"));
            }
        }

        let mut i = Instruction::new(OpCode::StackAlloc);
        i.operands[0] = Value::imm(TypeId::U32, Immediate::of_u32(size));
        i.operands[1] = Value::imm(TypeId::U32, Immediate::of_u32(alloc));
        let r = self.add(i);
        self.scope_track_alloc(alloc);
        Ok(r)
    }

    /// Writes the address of a stack allocation into `ptr_dest`. Stamps the
    /// stack id on the destination value, which is then tracked by the
    /// current scope for destruction.
    pub fn stack_ptr(&mut self, ptr_dest: &mut Value, alloc: StackId) -> ForgeResult<InstrRef> {
        if self.validation {
            if !ptr_dest.is_reg() {
                return Err(self.verr("stack_ptr - destination value should refer to a register"));
            }
            if !self.registry.info(ptr_dest.ty()).is_pointer {
                return Err(self.verr("stack_ptr - destination value should be a pointer type"));
            }
            self.require_known_alloc(alloc, "stack_ptr")?;
        }

        ptr_dest.set_stack_ref(alloc);

        let mut i = Instruction::new(OpCode::StackPtr);
        i.operands[0] = *ptr_dest;
        i.operands[1] = Value::imm(TypeId::U32, Immediate::of_u32(alloc));
        let r = self.add(i);
        self.scope_track_ptr(*ptr_dest);
        Ok(r)
    }

    pub fn stack_free(&mut self, alloc: StackId) -> ForgeResult<InstrRef> {
        if self.validation {
            self.require_known_alloc(alloc, "stack_free")?;
        }

        let mut i = Instruction::new(OpCode::StackFree);
        i.operands[0] = Value::imm(TypeId::U32, Immediate::of_u32(alloc));
        Ok(self.add(i))
    }

    /// Writes the address of a registered global value into `reg`.
    pub fn value_ptr(&mut self, reg: &Value, id: ValueId) -> ForgeResult<InstrRef> {
        if self.validation {
            if !reg.is_reg() {
                return Err(self.verr("value_ptr - destination value should refer to a register"));
            }
            let expect = self.registry.pointer_to(self.registry.value_type(id));
            if !self.registry.is_equal(reg.ty(), expect) {
                return Err(self.verr("value_ptr - type of destination value is not a pointer to the symbol's type"));
            }
        }

        let mut i = Instruction::new(OpCode::ValuePtr);
        i.operands[0] = *reg;
        i.operands[1] = Value::imm(TypeId::U64, Immediate::of_u64(id.0 as u64));
        Ok(self.add(i))
    }

    pub fn this_ptr(&mut self, reg: &Value) -> ForgeResult<InstrRef> {
        if self.validation {
            if !self.code.is_empty() {
                return Err(self.verr("this_ptr - this_ptr should be the first emitted instruction"));
            }
            if !reg.is_reg() {
                return Err(self.verr("this_ptr - destination value should refer to a register"));
            }
            let sig = self.registry.signature(self.func);
            match sig.this {
                None => return Err(self.verr("this_ptr - function does not have a 'this' pointer")),
                Some(this_tp) => {
                    if !self.registry.is_equal(this_tp, reg.ty()) {
                        return Err(self.verr(
                            "this_ptr - destination value should have the same type as the function's 'this' pointer",
                        ));
                    }
                }
            }
        }

        let mut i = Instruction::new(OpCode::ThisPtr);
        i.operands[0] = *reg;
        Ok(self.add(i))
    }

    pub fn ret_ptr(&mut self, reg: &Value) -> ForgeResult<InstrRef> {
        if self.validation {
            let ret_tp = self.registry.signature(self.func).ret;
            let info = self.registry.info(ret_tp);
            if info.size == 0 || info.is_primitive {
                return Err(self.verr("ret_ptr - function does not return on the stack, there is no return pointer"));
            }
            if !self.registry.is_equal(reg.ty(), self.registry.pointer_to(ret_tp)) {
                return Err(self.verr(
                    "ret_ptr - destination value should have a type that points to the function's return type",
                ));
            }
        }

        let mut i = Instruction::new(OpCode::RetPtr);
        i.operands[0] = *reg;
        Ok(self.add(i))
    }

    pub fn argument(&mut self, reg: &Value, arg_index: u32) -> ForgeResult<InstrRef> {
        if self.validation {
            for i in &self.code {
                match i.op {
                    OpCode::ThisPtr => continue,
                    OpCode::Argument => {
                        if i.operands[1].imm_bits().u() == arg_index as u64 {
                            return Err(self.verr("argument - the specified argument index has already been emitted"));
                        }
                    }
                    _ => {
                        return Err(self.verr(
                            "argument - argument instructions should precede all others (excluding this_ptr)",
                        ))
                    }
                }
            }

            let sig = self.registry.signature(self.func);
            match sig.args.get(arg_index as usize) {
                None => return Err(self.verr("argument - argument index exceeds the function's argument count")),
                Some(expect) => {
                    if !self.registry.is_equal(*expect, reg.ty()) {
                        return Err(self.verr("argument - destination value should have the argument's type"));
                    }
                }
            }
        }

        let mut i = Instruction::new(OpCode::Argument);
        i.operands[0] = *reg;
        i.operands[1] = Value::imm(TypeId::U32, Immediate::of_u32(arg_index));
        Ok(self.add(i))
    }

    /// Reserves a register that will be assigned later via `resolve`.
    pub fn reserve(&mut self, reg: &Value) -> ForgeResult<InstrRef> {
        if self.validation && !reg.is_reg() {
            return Err(self.verr("reserve - destination value should refer to a register"));
        }

        let mut i = Instruction::new(OpCode::Reserve);
        i.operands[0] = *reg;
        Ok(self.add(i))
    }

    /// Fulfills a pending `reserve`. Does not count as an assignment.
    pub fn resolve(&mut self, reg: &Value, assign_to: &Value) -> ForgeResult<InstrRef> {
        if self.validation {
            if !reg.is_reg() {
                return Err(self.verr("resolve - destination value should refer to a register"));
            }
            if !self.registry.is_equal(reg.ty(), assign_to.ty()) {
                return Err(self.verr("resolve - destination value has a different type than the value assigned to it"));
            }
        }

        let mut i = Instruction::new(OpCode::Resolve);
        i.operands[0] = *reg;
        i.operands[1] = *assign_to;
        Ok(self.add(i))
    }

    pub fn load(&mut self, dest: &Value, src: &Value, offset: u32) -> ForgeResult<InstrRef> {
        if self.validation {
            if !dest.is_reg() {
                return Err(self.verr("load - destination value should refer to a register"));
            }
            match self.registry.pointee(src.ty()) {
                Some(p) if self.registry.is_equal(dest.ty(), p) => {}
                _ => {
                    return Err(self.verr(
                        "load - destination value has a different type from the value pointed to by the source",
                    ))
                }
            }
        }

        let mut i = Instruction::new(OpCode::Load);
        i.operands[0] = *dest;
        i.operands[1] = *src;
        i.operands[2] = Value::imm(TypeId::U32, Immediate::of_u32(offset));
        Ok(self.add(i))
    }

    pub fn store(&mut self, src: &Value, dest: &Value, offset: u32) -> ForgeResult<InstrRef> {
        if self.validation {
            match self.registry.pointee(dest.ty()) {
                Some(p) if self.registry.is_equal(src.ty(), p) => {}
                _ => {
                    return Err(self.verr(
                        "store - source value has a different type from the value pointed to by the destination",
                    ))
                }
            }
        }

        let mut i = Instruction::new(OpCode::Store);
        i.operands[0] = *src;
        i.operands[1] = *dest;
        i.operands[2] = Value::imm(TypeId::U32, Immediate::of_u32(offset));
        Ok(self.add(i))
    }

    pub fn jump(&mut self, label: LabelId) -> ForgeResult<InstrRef> {
        if self.validation && (label == 0 || label >= self.next_label_id()) {
            return Err(self.verr("jump - invalid label id"));
        }

        let mut i = Instruction::new(OpCode::Jump);
        i.operands[0] = Value::label(label);
        Ok(self.add(i))
    }

    /// Converts `src` to `dest`'s primitive type; the destination type id
    /// rides along as the third operand.
    pub fn cvt(&mut self, dest: &Value, src: &Value) -> ForgeResult<InstrRef> {
        if self.validation {
            if !dest.is_reg() {
                return Err(self.verr("cvt - destination value should refer to a register"));
            }
            if !self.registry.info(dest.ty()).is_primitive || !self.registry.info(src.ty()).is_primitive {
                return Err(self.verr("cvt - both dest and src values should have primitive types"));
            }
        }

        let mut i = Instruction::new(OpCode::Cvt);
        i.operands[0] = *dest;
        i.operands[1] = *src;
        i.operands[2] = Value::imm(TypeId::U32, Immediate::of_u32(dest.ty().0));
        Ok(self.add(i))
    }

    pub fn param(&mut self, val: &Value) -> ForgeResult<InstrRef> {
        let mut i = Instruction::new(OpCode::Param);
        i.operands[0] = *val;
        Ok(self.add(i))
    }

    /// Calls a known function. `ret_dest` must be present exactly when the
    /// callee returns non-void; the preceding `param` stanza must agree with
    /// the callee's signature.
    pub fn call(&mut self, func: FuncId, ret_dest: &Value, self_ptr: &Value) -> ForgeResult<InstrRef> {
        let sig = self.registry.signature(func);
        if self.validation {
            self.check_call_shape(&sig.args, sig.ret, ret_dest)?;
        }

        let fn_tp = self.registry.function_type_of(func);
        let mut i = Instruction::new(OpCode::Call);
        i.operands[0] = Value::imm(fn_tp, Immediate::of_u64(func.0 as u64));
        i.operands[1] = *ret_dest;
        i.operands[2] = *self_ptr;
        Ok(self.add(i))
    }

    /// Calls through a function-typed value: an immediate id for a known
    /// function, or a register holding a function-value pointer.
    pub fn call_value(&mut self, func: &Value, ret_dest: &Value, self_ptr: &Value) -> ForgeResult<InstrRef> {
        if func.is_imm() {
            let id = self.registry.func_by_id(func.imm_bits().u())?;
            return self.call(id, ret_dest, self_ptr);
        }

        if self.validation {
            let sig = self
                .registry
                .type_signature(func.ty())
                .ok_or_else(|| self.verr("call - callee value does not have a function type"))?;
            self.check_call_shape(&sig.args, sig.ret, ret_dest)?;
        }

        let mut i = Instruction::new(OpCode::Call);
        i.operands[0] = *func;
        i.operands[1] = *ret_dest;
        i.operands[2] = *self_ptr;
        Ok(self.add(i))
    }

    fn check_call_shape(&self, args: &[TypeId], ret: TypeId, ret_dest: &Value) -> ForgeResult<()> {
        let ret_size = self.registry.info(ret).size;
        if ret_size == 0 && !ret_dest.is_empty() {
            return Err(self.verr("call - callee returns void but a return destination was specified"));
        }
        if ret_size > 0 && ret_dest.is_empty() {
            return Err(self.verr("call - callee returns non-void but no return destination was specified"));
        }

        let mut param_idx = args.len() as i64 - 1;
        let mut found = 0usize;
        for i in self.code.iter().rev() {
            if param_idx < 0 {
                break;
            }
            // the stanza must sit in the current straight-line region; an
            // earlier call consumes its params, and a label/jump/branch is a
            // block boundary that cuts the stanza off
            if matches!(i.op, OpCode::Call | OpCode::Label | OpCode::Jump | OpCode::Branch) {
                break;
            }
            if i.op == OpCode::Param {
                let expect = args[param_idx as usize];
                if !self.registry.is_equal(i.operands[0].ty(), expect) {
                    return Err(self.verr(format!(
                        "call - type of argument {param_idx} does not match the callee's parameter type",
                    )));
                }
                param_idx -= 1;
                found += 1;
            }
        }

        if found != args.len() {
            return Err(self.verr(format!(
                "call - callee expects {} arguments but {found} were provided",
                args.len(),
            )));
        }

        Ok(())
    }

    /// Returns from the function. A value is required exactly when the
    /// function returns a primitive; stack returns flow through `ret_ptr`.
    pub fn ret(&mut self, val: &Value) -> ForgeResult<InstrRef> {
        if self.validation {
            let ret_tp = self.registry.signature(self.func).ret;
            let info = self.registry.info(ret_tp);
            if info.size == 0 {
                if !val.is_empty() {
                    return Err(self.verr("ret - function does not return a value, but one was provided"));
                }
            } else if !info.is_primitive {
                if !val.is_empty() {
                    return Err(self.verr("ret - function returns on the stack, but a value was provided"));
                }
            } else if val.is_empty() {
                return Err(self.verr("ret - function returns a primitive value, but none was provided"));
            } else if !self.registry.is_equal(ret_tp, val.ty()) {
                return Err(self.verr("ret - provided value should have the function's return type"));
            }
        }

        let mut i = Instruction::new(OpCode::Ret);
        i.operands[0] = *val;
        Ok(self.add(i))
    }

    /// Falls through when `cond` is truthy, jumps to `dest_on_false`
    /// otherwise.
    pub fn branch(&mut self, cond: &Value, dest_on_false: LabelId) -> ForgeResult<InstrRef> {
        if self.validation {
            if !cond.is_reg() {
                return Err(self.verr("branch - condition should refer to a register"));
            }
            if dest_on_false == 0 || dest_on_false >= self.next_label_id() {
                return Err(self.verr("branch - invalid label id"));
            }
        }

        let mut i = Instruction::new(OpCode::Branch);
        i.operands[0] = *cond;
        i.operands[1] = Value::label(dest_on_false);
        Ok(self.add(i))
    }

    fn require_known_alloc(&self, alloc: StackId, ctx: &str) -> ForgeResult<()> {
        let known = self
            .code
            .iter()
            .any(|i| i.op == OpCode::StackAlloc && i.operands[1].imm_bits().u() == alloc as u64);
        if known {
            Ok(())
        } else {
            Err(self.verr(format!("{ctx} - stack id {alloc} does not reference a prior allocation")))
        }
    }
}

// ---- untyped bitwise / logical / assign ------------------------------------

macro_rules! untyped_binary {
    ($($fn_name:ident => $op:ident, $result_rule:ident, $operand_rule:ident;)*) => {
        impl FunctionBuilder<'_> {
            $(pub fn $fn_name(&mut self, result: &Value, a: &Value, b: &Value) -> ForgeResult<InstrRef> {
                if self.validation {
                    if !result.is_reg() {
                        return Err(self.verr(concat!(stringify!($fn_name), " - result value should refer to a register")));
                    }
                    self.$result_rule(result, stringify!($fn_name))?;
                    self.$operand_rule(a, stringify!($fn_name))?;
                    self.$operand_rule(b, stringify!($fn_name))?;
                }

                let mut i = Instruction::new(OpCode::$op);
                i.operands[0] = *result;
                i.operands[1] = *a;
                i.operands[2] = *b;
                Ok(self.add(i))
            })*
        }
    };
}

untyped_binary! {
    shl => Shl, rule_integral, rule_integral;
    shr => Shr, rule_integral, rule_integral;
    land => LAnd, rule_bool, rule_any;
    band => BAnd, rule_integral, rule_integral;
    lor => LOr, rule_bool, rule_any;
    bor => BOr, rule_integral, rule_integral;
    xor => Xor, rule_integral, rule_integral;
}

impl FunctionBuilder<'_> {
    pub fn not(&mut self, result: &Value, val: &Value) -> ForgeResult<InstrRef> {
        if self.validation {
            if !result.is_reg() {
                return Err(self.verr("not - result value should refer to a register"));
            }
            self.rule_bool(result, "not")?;
        }

        let mut i = Instruction::new(OpCode::Not);
        i.operands[0] = *result;
        i.operands[1] = *val;
        Ok(self.add(i))
    }

    pub fn inv(&mut self, result: &Value, val: &Value) -> ForgeResult<InstrRef> {
        if self.validation {
            if !result.is_reg() {
                return Err(self.verr("inv - result value should refer to a register"));
            }
            self.rule_primitive(result, "inv")?;
            self.rule_primitive(val, "inv")?;
        }

        let mut i = Instruction::new(OpCode::Inv);
        i.operands[0] = *result;
        i.operands[1] = *val;
        Ok(self.add(i))
    }

    pub fn assign(&mut self, dest: &Value, src: &Value) -> ForgeResult<InstrRef> {
        if self.validation {
            if !dest.is_reg() {
                return Err(self.verr("assign - destination value should refer to a register"));
            }
            if !self.registry.is_equal(dest.ty(), src.ty()) {
                return Err(self.verr("assign - destination value has a different type than the value assigned to it"));
            }
        }

        let mut i = Instruction::new(OpCode::Assign);
        i.operands[0] = *dest;
        i.operands[1] = *src;
        Ok(self.add(i))
    }

    fn rule_any(&self, _v: &Value, _ctx: &str) -> ForgeResult<()> {
        Ok(())
    }

    fn rule_bool(&self, v: &Value, ctx: &str) -> ForgeResult<()> {
        if self.registry.is_equal(v.ty(), TypeId::BOOL) {
            Ok(())
        } else {
            Err(self.verr(format!("{ctx} - value should have a boolean type")))
        }
    }

    fn rule_integral(&self, v: &Value, ctx: &str) -> ForgeResult<()> {
        if self.registry.info(v.ty()).is_integral {
            Ok(())
        } else {
            Err(self.verr(format!("{ctx} - value should have an integral type")))
        }
    }

    fn rule_primitive(&self, v: &Value, ctx: &str) -> ForgeResult<()> {
        if self.registry.info(v.ty()).is_primitive {
            Ok(())
        } else {
            Err(self.verr(format!("{ctx} - value should have a primitive type")))
        }
    }

    pub(crate) fn rule_family(&self, v: &Value, family: TypeFamily, ctx: &str) -> ForgeResult<()> {
        let info = self.registry.info(v.ty());
        let ok = match family {
            TypeFamily::SignedInt => info.is_integral && !info.is_unsigned,
            TypeFamily::UnsignedInt => info.is_integral && info.is_unsigned,
            TypeFamily::Float32 => info.is_floating_point && info.size == 4,
            TypeFamily::Float64 => info.is_floating_point && info.size == 8,
        };
        if ok {
            Ok(())
        } else {
            Err(self.verr(format!("{ctx} - value does not belong to the opcode's type family")))
        }
    }
}

/// Scalar type family an arithmetic opcode operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    SignedInt,
    UnsignedInt,
    Float32,
    Float64,
}

// ---- typed arithmetic ------------------------------------------------------

macro_rules! typed_binary {
    ($($fn_name:ident => $op:ident, $family:ident;)*) => {
        impl FunctionBuilder<'_> {
            $(pub fn $fn_name(&mut self, result: &Value, a: &Value, b: &Value) -> ForgeResult<InstrRef> {
                if self.validation {
                    if !result.is_reg() {
                        return Err(self.verr(concat!(stringify!($fn_name), " - result value should refer to a register")));
                    }
                    if !self.registry.is_equal(result.ty(), a.ty()) || !self.registry.is_equal(result.ty(), b.ty()) {
                        return Err(self.verr(concat!(stringify!($fn_name), " - result and operands should all have the same type")));
                    }
                    self.rule_family(result, TypeFamily::$family, stringify!($fn_name))?;
                }

                let mut i = Instruction::new(OpCode::$op);
                i.operands[0] = *result;
                i.operands[1] = *a;
                i.operands[2] = *b;
                Ok(self.add(i))
            })*
        }
    };
}

typed_binary! {
    iadd => IAdd, SignedInt;
    uadd => UAdd, UnsignedInt;
    fadd => FAdd, Float32;
    dadd => DAdd, Float64;
    isub => ISub, SignedInt;
    usub => USub, UnsignedInt;
    fsub => FSub, Float32;
    dsub => DSub, Float64;
    imul => IMul, SignedInt;
    umul => UMul, UnsignedInt;
    fmul => FMul, Float32;
    dmul => DMul, Float64;
    idiv => IDiv, SignedInt;
    udiv => UDiv, UnsignedInt;
    fdiv => FDiv, Float32;
    ddiv => DDiv, Float64;
    imod => IMod, SignedInt;
    umod => UMod, UnsignedInt;
    fmod => FMod, Float32;
    dmod => DMod, Float64;
}

macro_rules! typed_compare {
    ($($fn_name:ident => $op:ident, $family:ident;)*) => {
        impl FunctionBuilder<'_> {
            $(pub fn $fn_name(&mut self, result: &Value, a: &Value, b: &Value) -> ForgeResult<InstrRef> {
                if self.validation {
                    if !result.is_reg() {
                        return Err(self.verr(concat!(stringify!($fn_name), " - result value should refer to a register")));
                    }
                    self.rule_bool(result, stringify!($fn_name))?;
                    if !self.registry.is_equal(a.ty(), b.ty()) {
                        return Err(self.verr(concat!(stringify!($fn_name), " - operands should have the same type")));
                    }
                    self.rule_family(a, TypeFamily::$family, stringify!($fn_name))?;
                }

                let mut i = Instruction::new(OpCode::$op);
                i.operands[0] = *result;
                i.operands[1] = *a;
                i.operands[2] = *b;
                Ok(self.add(i))
            })*
        }
    };
}

typed_compare! {
    ilt => ILt, SignedInt;
    ult => ULt, UnsignedInt;
    flt => FLt, Float32;
    dlt => DLt, Float64;
    ilte => ILte, SignedInt;
    ulte => ULte, UnsignedInt;
    flte => FLte, Float32;
    dlte => DLte, Float64;
    igt => IGt, SignedInt;
    ugt => UGt, UnsignedInt;
    fgt => FGt, Float32;
    dgt => DGt, Float64;
    igte => IGte, SignedInt;
    ugte => UGte, UnsignedInt;
    fgte => FGte, Float32;
    dgte => DGte, Float64;
    ieq => IEq, SignedInt;
    ueq => UEq, UnsignedInt;
    feq => FEq, Float32;
    deq => DEq, Float64;
    ineq => INeq, SignedInt;
    uneq => UNeq, UnsignedInt;
    fneq => FNeq, Float32;
    dneq => DNeq, Float64;
}

macro_rules! typed_unary {
    ($($fn_name:ident => $op:ident, $family:ident;)*) => {
        impl FunctionBuilder<'_> {
            $(pub fn $fn_name(&mut self, result: &Value, val: &Value) -> ForgeResult<InstrRef> {
                if self.validation {
                    if !result.is_reg() {
                        return Err(self.verr(concat!(stringify!($fn_name), " - result value should refer to a register")));
                    }
                    if !self.registry.is_equal(result.ty(), val.ty()) {
                        return Err(self.verr(concat!(stringify!($fn_name), " - result and operand should have the same type")));
                    }
                    self.rule_family(result, TypeFamily::$family, stringify!($fn_name))?;
                }

                let mut i = Instruction::new(OpCode::$op);
                i.operands[0] = *result;
                i.operands[1] = *val;
                Ok(self.add(i))
            })*
        }
    };
}

typed_unary! {
    ineg => INeg, SignedInt;
    fneg => FNeg, Float32;
    dneg => DNeg, Float64;
}

macro_rules! typed_in_place {
    ($($fn_name:ident => $op:ident, $family:ident;)*) => {
        impl FunctionBuilder<'_> {
            $(pub fn $fn_name(&mut self, val: &Value) -> ForgeResult<InstrRef> {
                if self.validation {
                    if !val.is_reg() {
                        return Err(self.verr(concat!(stringify!($fn_name), " - value should refer to a register")));
                    }
                    self.rule_family(val, TypeFamily::$family, stringify!($fn_name))?;
                }

                let mut i = Instruction::new(OpCode::$op);
                i.operands[0] = *val;
                Ok(self.add(i))
            })*
        }
    };
}

typed_in_place! {
    iinc => IInc, SignedInt;
    uinc => UInc, UnsignedInt;
    finc => FInc, Float32;
    dinc => DInc, Float64;
    idec => IDec, SignedInt;
    udec => UDec, UnsignedInt;
    fdec => FDec, Float32;
    ddec => DDec, Float64;
}

// ---- vector family ---------------------------------------------------------

impl FunctionBuilder<'_> {
    fn check_vector_dest_and_rhs(&self, dest: &Value, rhs: &Value, ctx: &str) -> ForgeResult<()> {
        let dest_info = self.registry.info(dest.ty());
        if !dest_info.is_pointer {
            return Err(self.verr(format!("{ctx} - destination value should have a pointer type")));
        }

        let rhs_info = self.registry.info(rhs.ty());
        let ok = if rhs_info.is_pointer {
            self.registry.is_equal(dest.ty(), rhs.ty())
        } else {
            match self.registry.pointee(dest.ty()) {
                Some(p) => self.registry.is_equal(p, rhs.ty()),
                None => false,
            }
        };

        if ok {
            Ok(())
        } else {
            Err(self.verr(format!(
                "{ctx} - right-hand value should be the destination's element type or the same pointer type",
            )))
        }
    }

    fn check_components(&self, components: u8, ctx: &str) -> ForgeResult<()> {
        if components == 0 {
            Err(self.verr(format!("{ctx} - component count must be at least 1")))
        } else {
            Ok(())
        }
    }
}

macro_rules! vector_binary {
    ($($fn_name:ident => $op:ident;)*) => {
        impl FunctionBuilder<'_> {
            $(pub fn $fn_name(&mut self, dest: &Value, rhs: &Value, components: u8) -> ForgeResult<InstrRef> {
                if self.validation {
                    self.check_vector_dest_and_rhs(dest, rhs, stringify!($fn_name))?;
                    self.check_components(components, stringify!($fn_name))?;
                }

                let mut i = Instruction::new(OpCode::$op);
                i.operands[0] = *dest;
                i.operands[1] = *rhs;
                i.component_count = components;
                Ok(self.add(i))
            })*
        }
    };
}

vector_binary! {
    vset => VSet;
    vadd => VAdd;
    vsub => VSub;
    vmul => VMul;
    vdiv => VDiv;
    vmod => VMod;
}

impl FunctionBuilder<'_> {
    pub fn vneg(&mut self, val: &Value, components: u8) -> ForgeResult<InstrRef> {
        if self.validation {
            if !self.registry.info(val.ty()).is_pointer {
                return Err(self.verr("vneg - value to negate should have a pointer type"));
            }
            self.check_components(components, "vneg")?;
        }

        let mut i = Instruction::new(OpCode::VNeg);
        i.operands[0] = *val;
        i.component_count = components;
        Ok(self.add(i))
    }

    pub fn vdot(&mut self, result: &Value, a: &Value, b: &Value, components: u8) -> ForgeResult<InstrRef> {
        if self.validation {
            if !result.is_reg() {
                return Err(self.verr("vdot - result value should refer to a register"));
            }
            if !self.registry.info(a.ty()).is_pointer || !self.registry.is_equal(a.ty(), b.ty()) {
                return Err(self.verr("vdot - left-hand and right-hand values should share one pointer type"));
            }
            match self.registry.pointee(a.ty()) {
                Some(p) if self.registry.is_equal(result.ty(), p) => {}
                _ => return Err(self.verr("vdot - result value should have the operands' element type")),
            }
            self.check_components(components, "vdot")?;
        }

        let mut i = Instruction::new(OpCode::VDot);
        i.operands[0] = *result;
        i.operands[1] = *a;
        i.operands[2] = *b;
        i.component_count = components;
        Ok(self.add(i))
    }

    pub fn vmag(&mut self, result: &Value, val: &Value, components: u8) -> ForgeResult<InstrRef> {
        self.vector_reduction(result, val, components, OpCode::VMag, "vmag")
    }

    pub fn vmagsq(&mut self, result: &Value, val: &Value, components: u8) -> ForgeResult<InstrRef> {
        self.vector_reduction(result, val, components, OpCode::VMagSq, "vmagsq")
    }

    fn vector_reduction(
        &mut self,
        result: &Value,
        val: &Value,
        components: u8,
        op: OpCode,
        ctx: &str,
    ) -> ForgeResult<InstrRef> {
        if self.validation {
            if !result.is_reg() {
                return Err(self.verr(format!("{ctx} - result value should refer to a register")));
            }
            if !self.registry.info(val.ty()).is_pointer {
                return Err(self.verr(format!("{ctx} - operand should be a pointer")));
            }
            match self.registry.pointee(val.ty()) {
                Some(p) if self.registry.is_equal(result.ty(), p) => {}
                _ => {
                    return Err(self.verr(format!(
                        "{ctx} - result value should have the operand's element type",
                    )))
                }
            }
            self.check_components(components, ctx)?;
        }

        let mut i = Instruction::new(op);
        i.operands[0] = *result;
        i.operands[1] = *val;
        i.component_count = components;
        Ok(self.add(i))
    }

    pub fn vnorm(&mut self, val: &Value, components: u8) -> ForgeResult<InstrRef> {
        if self.validation {
            if !self.registry.info(val.ty()).is_pointer {
                return Err(self.verr("vnorm - value to normalize should have a pointer type"));
            }
            self.check_components(components, "vnorm")?;
        }

        let mut i = Instruction::new(OpCode::VNorm);
        i.operands[0] = *val;
        i.component_count = components;
        Ok(self.add(i))
    }

    /// 3-component cross product regardless of the declared component count.
    pub fn vcross(&mut self, result: &Value, a: &Value, b: &Value) -> ForgeResult<InstrRef> {
        if self.validation {
            if !self.registry.info(result.ty()).is_pointer
                || !self.registry.is_equal(result.ty(), a.ty())
                || !self.registry.is_equal(result.ty(), b.ty())
            {
                return Err(self.verr("vcross - result, left-hand and right-hand values should share one pointer type"));
            }
        }

        let mut i = Instruction::new(OpCode::VCross);
        i.operands[0] = *result;
        i.operands[1] = *a;
        i.operands[2] = *b;
        i.component_count = 3;
        Ok(self.add(i))
    }
}
