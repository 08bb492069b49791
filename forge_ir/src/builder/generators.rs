//! High-level emission: calls, construction/destruction, returns, structured
//! control flow, and pointer arithmetic.

use forge_common::ForgeResult;

use super::FunctionBuilder;
use crate::ir::{Instruction, OpCode};
use crate::registry::{Access, FuncId, TypeId, ACCESS_ALL};
use crate::value::{Immediate, Value};

impl FunctionBuilder<'_> {
    /// Emits a full call sequence: coerces each argument to the callee's
    /// formal type, emits the `param` stanza, allocates a result register
    /// when the callee returns a value, and emits `call`.
    pub fn generate_call(&mut self, func: FuncId, args: &[Value], self_ptr: Option<&Value>) -> ForgeResult<Value> {
        let sig = self.registry.signature(func);

        if sig.args.len() != args.len() {
            self.logger.error(format!(
                "Incorrect number of arguments provided to function '{}'. Expected {}, got {}",
                self.registry.func_name(func),
                sig.args.len(),
                args.len(),
            ));
            return Ok(Value::Empty);
        }

        let mut converted = Vec::with_capacity(args.len());
        for (arg, formal) in args.iter().zip(&sig.args) {
            let c = self.converted_to(arg, *formal)?;
            if c.is_empty() {
                return Ok(Value::Empty);
            }
            converted.push(c);
        }

        for c in &converted {
            self.param(c)?;
        }

        let self_val = self_ptr.copied().unwrap_or(Value::Empty);
        if self.registry.info(sig.ret).size == 0 {
            self.call(func, &Value::Empty, &self_val)?;
            Ok(Value::Empty)
        } else {
            let result = self.val(sig.ret);
            self.call(func, &result, &self_val)?;
            Ok(result)
        }
    }

    /// Like [`generate_call`](Self::generate_call) for a function-typed
    /// value (an immediate function id or a register holding a
    /// function-value pointer).
    pub fn generate_call_value(
        &mut self,
        callee: &Value,
        args: &[Value],
        self_ptr: Option<&Value>,
    ) -> ForgeResult<Value> {
        if callee.is_imm() {
            let func = self.registry.func_by_id(callee.imm_bits().u())?;
            return self.generate_call(func, args, self_ptr);
        }

        let sig = match self.registry.type_signature(callee.ty()) {
            Some(sig) => sig,
            None => {
                self.logger.error("Called value does not have a function type");
                return Ok(Value::Empty);
            }
        };

        if sig.args.len() != args.len() {
            self.logger.error(format!(
                "Incorrect number of arguments provided to function. Expected {}, got {}",
                sig.args.len(),
                args.len(),
            ));
            return Ok(Value::Empty);
        }

        let mut converted = Vec::with_capacity(args.len());
        for (arg, formal) in args.iter().zip(&sig.args) {
            let c = self.converted_to(arg, *formal)?;
            if c.is_empty() {
                return Ok(Value::Empty);
            }
            converted.push(c);
        }

        for c in &converted {
            self.param(c)?;
        }

        let self_val = self_ptr.copied().unwrap_or(Value::Empty);
        if self.registry.info(sig.ret).size == 0 {
            self.call_value(callee, &Value::Empty, &self_val)?;
            Ok(Value::Empty)
        } else {
            let result = self.val(sig.ret);
            self.call_value(callee, &result, &self_val)?;
            Ok(result)
        }
    }

    /// Initializes the object behind `dest_ptr` from `args`.
    ///
    /// Primitive and pointer destinations with one trivially-assignable
    /// argument lower to a `store`; everything else resolves a constructor
    /// through the registry (strict match first, then a unique convertible
    /// match). Ambiguity and missing constructors are reported through the
    /// logger and emit nothing.
    pub fn generate_construction(&mut self, dest_ptr: &Value, args: &[Value], access: Access) -> ForgeResult<()> {
        let tp = match self.registry.pointee(dest_ptr.ty()) {
            Some(tp) => tp,
            None => return Err(self.verr("generate_construction - dest_ptr should have a pointer type")),
        };
        let info = self.registry.info(tp);

        if (info.is_primitive || info.is_pointer) && args.len() <= 1 {
            let Some(arg) = args.first() else {
                return Ok(());
            };
            if self.registry.is_convertible(arg.ty(), tp) {
                let converted = self.converted_to(arg, tp)?;
                if !converted.is_empty() {
                    self.store(&converted, dest_ptr, 0)?;
                }
                return Ok(());
            }
        }

        let arg_tys: Vec<TypeId> = args.iter().map(Value::ty).collect();
        let lookup = self.registry.find_constructors(tp, &arg_tys, true, access);

        if let Some(strict) = lookup.strict {
            self.generate_call(strict, args, Some(dest_ptr))?;
            return Ok(());
        }

        match lookup.candidates.len() {
            1 => {
                self.generate_call(lookup.candidates[0], args, Some(dest_ptr))?;
            }
            0 => {
                self.logger.error(format!(
                    "No constructor for type '{}' with arguments ({}) is accessible",
                    self.registry.type_name(tp),
                    self.type_list(&arg_tys),
                ));
            }
            _ => {
                self.logger.error(format!(
                    "Constructor for type '{}' with arguments ({}) is ambiguous",
                    self.registry.type_name(tp),
                    self.type_list(&arg_tys),
                ));
                for c in &lookup.candidates {
                    self.logger.info(format!("^ Could be '{}'", self.registry.func_name(*c)));
                }
            }
        }

        Ok(())
    }

    /// Emits the destructor call for the object behind `ptr`, when its type
    /// has one. Primitives and destructor-less types emit nothing.
    pub fn generate_destruction(&mut self, ptr: &Value) -> ForgeResult<()> {
        let tp = match self.registry.pointee(ptr.ty()) {
            Some(tp) => tp,
            None => return Ok(()),
        };
        if self.registry.info(tp).is_primitive {
            return Ok(());
        }
        if let Some(dtor) = self.registry.find_destructor(tp) {
            self.generate_call(dtor, &[], Some(ptr))?;
        }
        Ok(())
    }

    /// Emits scope cleanup followed by the correct return sequence for the
    /// function's return type: primitive (and zero-size) returns pass the
    /// value through `ret`, everything else constructs into the
    /// caller-supplied return pointer.
    pub fn generate_return(&mut self, val: Option<&Value>) -> ForgeResult<()> {
        let ret_tp = self.registry.signature(self.func).ret;
        let info = self.registry.info(ret_tp);

        if info.size == 0 || info.is_primitive {
            self.emit_pre_return_instructions()?;
            let v = val.copied().unwrap_or(Value::Empty);
            self.ret(&v)?;
            return Ok(());
        }

        let ptr = self.val(self.registry.pointer_to(ret_tp));
        self.ret_ptr(&ptr)?;
        let ctor_args: Vec<Value> = val.into_iter().copied().collect();
        self.generate_construction(&ptr, &ctor_args, ACCESS_ALL)?;
        self.emit_pre_return_instructions()?;
        self.ret(&Value::Empty)?;
        Ok(())
    }

    /// `if cond { body }`. The body runs in its own scope; the false edge
    /// lands after it.
    pub fn generate_if(
        &mut self,
        cond: &Value,
        body: impl FnOnce(&mut Self) -> ForgeResult<()>,
    ) -> ForgeResult<()> {
        if cond.is_empty() {
            return Ok(());
        }

        let false_label = self.label();
        self.branch(cond, false_label)?;
        self.push_scope();
        body(self)?;
        self.pop_scope()?;
        self.place_label(false_label)?;
        Ok(())
    }

    /// `if cond { then_body } else { else_body }`.
    pub fn generate_if_else(
        &mut self,
        cond: &Value,
        then_body: impl FnOnce(&mut Self) -> ForgeResult<()>,
        else_body: impl FnOnce(&mut Self) -> ForgeResult<()>,
    ) -> ForgeResult<()> {
        if cond.is_empty() {
            return Ok(());
        }

        let false_label = self.label();
        let end_label = self.label();
        self.branch(cond, false_label)?;
        self.push_scope();
        then_body(self)?;
        self.pop_scope()?;
        self.jump(end_label)?;
        self.place_label(false_label)?;
        self.push_scope();
        else_body(self)?;
        self.pop_scope()?;
        self.place_label(end_label)?;
        Ok(())
    }

    /// A condition-first loop: `for (; cond(); step()) { body() }`. The body
    /// scope carries the loop's continue (the step label) and break (the end
    /// label) targets, so `loop_continue`/`loop_break` emit the right
    /// cleanup and jumps.
    pub fn generate_for(
        &mut self,
        cond: impl FnOnce(&mut Self) -> ForgeResult<Value>,
        step: impl FnOnce(&mut Self) -> ForgeResult<()>,
        body: impl FnOnce(&mut Self) -> ForgeResult<()>,
    ) -> ForgeResult<()> {
        let start_label = self.label();
        let step_label = self.label();
        let end_label = self.label();

        self.place_label(start_label)?;
        let cond_val = cond(self)?;
        if cond_val.is_empty() {
            return Ok(());
        }
        self.branch(&cond_val, end_label)?;

        self.push_scope();
        self.set_loop_continue_label(step_label);
        self.set_loop_break_label(end_label);
        body(self)?;
        self.pop_scope()?;

        self.place_label(step_label)?;
        step(self)?;
        self.jump(start_label)?;
        self.place_label(end_label)?;
        Ok(())
    }

    /// Offsets a pointer by a byte count, selecting `uadd`/`usub` by the
    /// offset's sign: at build time for immediates, at run time (via a
    /// generated if) for signed registers.
    pub fn ptr_offset(&mut self, ptr: &Value, offset: &Value, dest_type: Option<TypeId>) -> ForgeResult<Value> {
        let offset_info = self.registry.info(offset.ty());
        if self.validation {
            if !self.registry.info(ptr.ty()).is_pointer {
                return Err(self.verr("ptr_offset - ptr should have a pointer type"));
            }
            if let Some(dt) = dest_type {
                if !self.registry.info(dt).is_pointer {
                    return Err(self.verr("ptr_offset - dest_type, if set, should be a pointer type"));
                }
            }
            if !offset_info.is_integral {
                return Err(self.verr("ptr_offset - offset should have an integral type"));
            }
        }

        let result = self.val(dest_type.unwrap_or(ptr.ty()));

        if offset.is_imm() {
            if offset_info.is_unsigned || offset.imm_bits().i() >= 0 {
                self.emit_ptr_step(OpCode::UAdd, result, *ptr, *offset);
            } else {
                let magnitude = Value::imm(offset.ty(), Immediate::of_i64(-offset.imm_bits().i()));
                self.emit_ptr_step(OpCode::USub, result, *ptr, magnitude);
            }
            return Ok(result);
        }

        if offset_info.is_unsigned {
            self.emit_ptr_step(OpCode::UAdd, result, *ptr, *offset);
            return Ok(result);
        }

        let zero = Value::imm(offset.ty(), Immediate::ZERO);
        let is_positive = self.expr_gt(offset, &zero)?;
        let ptr_v = *ptr;
        let offset_v = *offset;
        self.generate_if_else(
            &is_positive,
            |fb| {
                fb.emit_ptr_step(OpCode::UAdd, result, ptr_v, offset_v);
                Ok(())
            },
            |fb| {
                let negated = fb.expr_neg(&offset_v)?;
                fb.emit_ptr_step(OpCode::USub, result, ptr_v, negated);
                Ok(())
            },
        )?;

        Ok(result)
    }

    /// [`ptr_offset`](Self::ptr_offset) with a build-time byte offset.
    pub fn ptr_offset_by(&mut self, ptr: &Value, offset: i64, dest_type: Option<TypeId>) -> ForgeResult<Value> {
        if self.validation {
            if !self.registry.info(ptr.ty()).is_pointer {
                return Err(self.verr("ptr_offset - ptr should have a pointer type"));
            }
            if let Some(dt) = dest_type {
                if !self.registry.info(dt).is_pointer {
                    return Err(self.verr("ptr_offset - dest_type, if set, should be a pointer type"));
                }
            }
        }

        let result = self.val(dest_type.unwrap_or(ptr.ty()));
        if offset >= 0 {
            self.emit_ptr_step(OpCode::UAdd, result, *ptr, Value::imm(TypeId::U64, Immediate::of_i64(offset)));
        } else {
            self.emit_ptr_step(OpCode::USub, result, *ptr, Value::imm(TypeId::U64, Immediate::of_i64(-offset)));
        }
        Ok(result)
    }

    // Pointer steps intentionally bypass the typed factories: the operands
    // mix a pointer with an integral offset, which the unsigned family
    // validation would reject.
    fn emit_ptr_step(&mut self, op: OpCode, result: Value, ptr: Value, offset: Value) {
        let mut i = Instruction::new(op);
        i.operands[0] = result;
        i.operands[1] = ptr;
        i.operands[2] = offset;
        self.add(i);
    }
}
