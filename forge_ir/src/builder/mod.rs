//! The function builder: emits well-typed instructions, allocates virtual
//! registers / stack ids / labels, tracks the scope stack, and hosts the
//! expression-lowering and high-level generator layers.

mod expr;
mod generators;
mod instructions;
mod scope;

use std::rc::Rc;

use forge_common::{ForgeError, ForgeResult, LogHandler, Logger, Span};
use indexmap::IndexMap;

use crate::ir::{Instruction, OpCode};
use crate::registry::{FuncId, Registry, TypeId};
use crate::source_map::SourceMap;
use crate::value::{Immediate, Value};
use crate::{Address, LabelId, StackId, VregId};

pub use scope::ScopeRecord;

/// Handle to an emitted instruction, usable to inspect or patch it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrRef(pub Address);

/// Types that can become typed immediate operands.
pub trait IntoImm {
    fn into_imm(self) -> (TypeId, Immediate);
}

macro_rules! into_imm {
    ($($ty:ty => $type_id:expr, $ctor:ident;)*) => {
        $(impl IntoImm for $ty {
            fn into_imm(self) -> (TypeId, Immediate) {
                ($type_id, Immediate::$ctor(self))
            }
        })*
    };
}

into_imm! {
    bool => TypeId::BOOL, of_bool;
    u8 => TypeId::U8, of_u8;
    u16 => TypeId::U16, of_u16;
    u32 => TypeId::U32, of_u32;
    u64 => TypeId::U64, of_u64;
    i8 => TypeId::I8, of_i8;
    i16 => TypeId::I16, of_i16;
    i32 => TypeId::I32, of_i32;
    i64 => TypeId::I64, of_i64;
    f32 => TypeId::F32, of_f32;
    f64 => TypeId::F64, of_f64;
}

/// Builds the instruction list of one function.
///
/// Construction emits the prologue (`this_ptr` for receivers, one `argument`
/// per formal). Registers, labels and stack ids are monotonically increasing
/// counters with 0 reserved as the null sentinel. The emitted code list is
/// append-only; instructions are mutated in place by the optimization passes
/// through a `CodeHolder`, never through the builder.
pub struct FunctionBuilder<'r> {
    registry: &'r Registry,
    func: FuncId,
    parent: Option<FuncId>,
    code: Vec<Instruction>,
    next_label: LabelId,
    next_reg: VregId,
    next_alloc: StackId,
    current_loc: Span,
    source_map: SourceMap,
    validation: bool,
    logger: Logger,
    this_val: Value,
    args: Vec<Value>,
    strings: Vec<String>,
    label_names: IndexMap<LabelId, u32>,
    scopes: Vec<ScopeRecord>,
}

impl<'r> FunctionBuilder<'r> {
    pub fn new(registry: &'r Registry, func: FuncId) -> Self {
        Self::construct(registry, func, None)
    }

    /// Builder for a nested closure; `parent` is the enclosing function.
    pub fn with_parent(registry: &'r Registry, func: FuncId, parent: FuncId) -> Self {
        Self::construct(registry, func, Some(parent))
    }

    fn construct(registry: &'r Registry, func: FuncId, parent: Option<FuncId>) -> Self {
        let mut fb = Self {
            registry,
            func,
            parent,
            code: Vec::new(),
            next_label: 1,
            next_reg: 1,
            next_alloc: 1,
            current_loc: Span::default(),
            source_map: SourceMap::default(),
            validation: false,
            logger: Logger::new(),
            this_val: Value::Empty,
            args: Vec::new(),
            strings: vec![String::new()],
            label_names: IndexMap::new(),
            scopes: vec![ScopeRecord::root()],
        };
        fb.emit_prologue();
        fb
    }

    // ---- core emission ---------------------------------------------------

    /// Appends one instruction and stamps it with the current source cursor.
    pub fn add(&mut self, i: Instruction) -> InstrRef {
        self.code.push(i);
        let index = self.code.len() - 1;
        self.source_map.add(index as u32, self.current_loc);
        InstrRef(index)
    }

    fn emit_prologue(&mut self) {
        let sig = self.registry.signature(self.func);

        if let Some(this_tp) = sig.this {
            let mut this_val = self.val(this_tp);
            self.set_name(&mut this_val, "this");
            let mut i = Instruction::new(OpCode::ThisPtr);
            i.operands[0] = this_val;
            self.add(i);
            self.this_val = this_val;
        }

        for (index, arg_tp) in sig.args.iter().enumerate() {
            let mut arg = self.val(*arg_tp);
            self.set_name(&mut arg, &format!("param_{index}"));
            let mut i = Instruction::new(OpCode::Argument);
            i.operands[0] = arg;
            i.operands[1] = Value::imm(TypeId::U32, Immediate::of_u32(index as u32));
            self.add(i);
            self.args.push(arg);
        }
    }

    // ---- values ----------------------------------------------------------

    /// Allocates a fresh virtual register of type `ty`.
    pub fn val(&mut self, ty: TypeId) -> Value {
        let id = self.next_reg;
        self.next_reg += 1;
        Value::reg(id, ty)
    }

    /// Typed immediate value.
    pub fn imm<T: IntoImm>(&self, v: T) -> Value {
        let (ty, bits) = v.into_imm();
        Value::imm(ty, bits)
    }

    /// Register holding a pointer to the given global; emits `value_ptr`.
    pub fn val_of_global(&mut self, id: crate::registry::ValueId) -> ForgeResult<Value> {
        let ptr_tp = self.registry.pointer_to(self.registry.value_type(id));
        let dest = self.val(ptr_tp);
        self.value_ptr(&dest, id)?;
        Ok(dest)
    }

    /// Label-reference value.
    pub fn label_val(&self, label: LabelId) -> Value {
        Value::label(label)
    }

    // ---- allocation counters ---------------------------------------------

    /// Allocates a label id without emitting its `label` instruction.
    pub fn label(&mut self) -> LabelId {
        let id = self.next_label;
        self.next_label += 1;
        id
    }

    pub fn next_alloc_id(&self) -> StackId {
        self.next_alloc
    }

    pub fn reserve_alloc_id(&mut self) -> StackId {
        let id = self.next_alloc;
        self.next_alloc += 1;
        id
    }

    // ---- accessors -------------------------------------------------------

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    pub fn func_id(&self) -> FuncId {
        self.func
    }

    pub fn parent_func(&self) -> Option<FuncId> {
        self.parent
    }

    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    pub fn instruction(&self, r: InstrRef) -> &Instruction {
        &self.code[r.0]
    }

    pub fn instruction_mut(&mut self, r: InstrRef) -> &mut Instruction {
        &mut self.code[r.0]
    }

    pub fn this_value(&self) -> Value {
        self.this_val
    }

    pub fn arg(&self, index: usize) -> ForgeResult<Value> {
        match self.args.get(index) {
            Some(v) => Ok(*v),
            None if self.validation => {
                Err(ForgeError::validation("arg - invalid argument index specified"))
            }
            None => Ok(Value::Empty),
        }
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Fresh register holding the caller-supplied return pointer.
    pub fn get_ret_ptr(&mut self) -> ForgeResult<Value> {
        let ret_tp = self.registry.signature(self.func).ret;
        let ptr = self.val(self.registry.pointer_to(ret_tp));
        self.ret_ptr(&ptr)?;
        Ok(ptr)
    }

    // ---- configuration ---------------------------------------------------

    pub fn enable_validation(&mut self) {
        self.validation = true;
    }

    pub fn validation_enabled(&self) -> bool {
        self.validation
    }

    pub fn set_log_handler(&mut self, handler: Rc<dyn LogHandler>) {
        self.logger.set_handler(handler);
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Whether any semantic error has been reported through this builder.
    pub fn did_error(&self) -> bool {
        self.logger.did_error()
    }

    pub fn set_current_source_location(&mut self, loc: Span) {
        self.current_loc = loc;
    }

    pub fn source_map(&self) -> &SourceMap {
        &self.source_map
    }

    // ---- naming ----------------------------------------------------------

    /// Interns `name`, stamps it on `v`, and retroactively on every operand
    /// occurrence of the same register in already-emitted code.
    pub fn set_name(&mut self, v: &mut Value, name: &str) {
        let id = self.add_string(name);
        v.set_name_id(id);

        if v.is_reg() {
            let reg = v.reg_id();
            for instr in &mut self.code {
                for op in &mut instr.operands {
                    if op.is_reg() && op.reg_id() == reg {
                        op.set_name_id(id);
                    }
                }
            }
            for arg in &mut self.args {
                if arg.reg_id() == reg {
                    arg.set_name_id(id);
                }
            }
            if self.this_val.reg_id() == reg {
                self.this_val.set_name_id(id);
            }
        }
    }

    pub fn set_label_name(&mut self, label: LabelId, name: &str) {
        let id = self.add_string(name);
        self.label_names.insert(label, id);
    }

    pub fn get_string(&self, id: u32) -> &str {
        self.strings.get(id as usize).map(String::as_str).unwrap_or("")
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    pub fn label_name(&self, label: LabelId) -> &str {
        match self.label_names.get(&label) {
            Some(id) => self.get_string(*id),
            None => "",
        }
    }

    fn add_string(&mut self, s: &str) -> u32 {
        self.strings.push(s.into());
        (self.strings.len() - 1) as u32
    }

    // ---- internal helpers shared by the submodules -----------------------

    pub(crate) fn verr(&self, msg: impl Into<String>) -> ForgeError {
        ForgeError::validation(msg)
    }

    pub(crate) fn next_label_id(&self) -> LabelId {
        self.next_label
    }
}
