//! The virtual machine: register file, stack buffer, and the execution loop.

use std::collections::HashMap;

use forge_common::{ForgeError, ForgeResult};
use forge_ir::registry::{FuncId, FunctionSig, Registry, TypeInfo};
use forge_ir::value::{convert_primitive, Immediate, Value};
use forge_ir::{CodeHolder, LabelId, OpCode, StackId};

/// Types that can travel through a 64-bit register slot. Signed integers are
/// sign-extended, unsigned zero-extended, `f32` occupies the low four bytes.
pub trait RegisterValue: Copy {
    fn to_bits(self) -> u64;
    fn from_bits(bits: u64) -> Self;
}

macro_rules! register_value {
    ($($ty:ty => |$v:ident| $to:expr, |$b:ident| $from:expr;)*) => {
        $(impl RegisterValue for $ty {
            fn to_bits(self) -> u64 {
                let $v = self;
                $to
            }
            fn from_bits(bits: u64) -> Self {
                let $b = bits;
                $from
            }
        })*
    };
}

register_value! {
    bool => |v| v as u64, |b| b != 0;
    u8 => |v| v as u64, |b| b as u8;
    u16 => |v| v as u64, |b| b as u16;
    u32 => |v| v as u64, |b| b as u32;
    u64 => |v| v, |b| b;
    i8 => |v| v as i64 as u64, |b| b as i8;
    i16 => |v| v as i64 as u64, |b| b as i16;
    i32 => |v| v as i64 as u64, |b| b as i32;
    i64 => |v| v as u64, |b| b as i64;
    f32 => |v| v.to_bits() as u64, |b| f32::from_bits(b as u32);
    f64 => |v| v.to_bits(), |b| f64::from_bits(b);
}

impl RegisterValue for *mut u8 {
    fn to_bits(self) -> u64 {
        self as u64
    }
    fn from_bits(bits: u64) -> Self {
        bits as *mut u8
    }
}

impl RegisterValue for *const u8 {
    fn to_bits(self) -> u64 {
        self as u64
    }
    fn from_bits(bits: u64) -> Self {
        bits as *const u8
    }
}

/// Element of a vector operation. Implemented for every primitive width and
/// signedness; the pointed-to element type of the destination operand picks
/// the implementation at run time.
trait VecElem: Copy {
    unsafe fn load(ptr: *const u8, index: usize) -> Self;
    unsafe fn store(ptr: *mut u8, index: usize, v: Self);
    fn from_reg_bits(bits: u64) -> Self;
    fn zero() -> Self;
    fn add(a: Self, b: Self) -> Self;
    fn sub(a: Self, b: Self) -> Self;
    fn mul(a: Self, b: Self) -> Self;
    fn div(a: Self, b: Self) -> Self;
    fn rem(a: Self, b: Self) -> Self;
    fn neg(a: Self) -> Self;
    fn to_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
    fn to_reg_bits(self) -> u64;
}

macro_rules! vec_elem_int {
    ($($ty:ty),*) => {
        $(impl VecElem for $ty {
            unsafe fn load(ptr: *const u8, index: usize) -> Self {
                (ptr.add(index * std::mem::size_of::<$ty>()) as *const $ty).read_unaligned()
            }
            unsafe fn store(ptr: *mut u8, index: usize, v: Self) {
                (ptr.add(index * std::mem::size_of::<$ty>()) as *mut $ty).write_unaligned(v)
            }
            fn from_reg_bits(bits: u64) -> Self {
                bits as $ty
            }
            fn zero() -> Self {
                0
            }
            fn add(a: Self, b: Self) -> Self {
                a.wrapping_add(b)
            }
            fn sub(a: Self, b: Self) -> Self {
                a.wrapping_sub(b)
            }
            fn mul(a: Self, b: Self) -> Self {
                a.wrapping_mul(b)
            }
            fn div(a: Self, b: Self) -> Self {
                a.wrapping_div(b)
            }
            fn rem(a: Self, b: Self) -> Self {
                a.wrapping_rem(b)
            }
            fn neg(a: Self) -> Self {
                a.wrapping_neg()
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
            fn from_f64(v: f64) -> Self {
                v as $ty
            }
            fn to_reg_bits(self) -> u64 {
                RegisterValue::to_bits(self)
            }
        })*
    };
}

vec_elem_int!(u8, u16, u32, u64, i8, i16, i32, i64);

macro_rules! vec_elem_float {
    ($($ty:ty),*) => {
        $(impl VecElem for $ty {
            unsafe fn load(ptr: *const u8, index: usize) -> Self {
                (ptr.add(index * std::mem::size_of::<$ty>()) as *const $ty).read_unaligned()
            }
            unsafe fn store(ptr: *mut u8, index: usize, v: Self) {
                (ptr.add(index * std::mem::size_of::<$ty>()) as *mut $ty).write_unaligned(v)
            }
            fn from_reg_bits(bits: u64) -> Self {
                RegisterValue::from_bits(bits)
            }
            fn zero() -> Self {
                0.0
            }
            fn add(a: Self, b: Self) -> Self {
                a + b
            }
            fn sub(a: Self, b: Self) -> Self {
                a - b
            }
            fn mul(a: Self, b: Self) -> Self {
                a * b
            }
            fn div(a: Self, b: Self) -> Self {
                a / b
            }
            fn rem(a: Self, b: Self) -> Self {
                a % b
            }
            fn neg(a: Self) -> Self {
                -a
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
            fn from_f64(v: f64) -> Self {
                v as $ty
            }
            fn to_reg_bits(self) -> u64 {
                RegisterValue::to_bits(self)
            }
        })*
    };
}

vec_elem_float!(f32, f64);

/// Right-hand side of a vector operation: element-wise through a pointer, or
/// a broadcast scalar.
#[derive(Clone, Copy)]
enum VecRhs<T> {
    Ptr(*const u8),
    Scalar(T),
}

impl<T: VecElem> VecRhs<T> {
    unsafe fn get(self, index: usize) -> T {
        match self {
            VecRhs::Ptr(p) => T::load(p, index),
            VecRhs::Scalar(v) => v,
        }
    }
}

unsafe fn vec_set<T: VecElem>(dest: *mut u8, rhs: VecRhs<T>, n: usize) {
    for i in 0..n {
        T::store(dest, i, rhs.get(i));
    }
}

unsafe fn vec_bin<T: VecElem>(dest: *mut u8, rhs: VecRhs<T>, n: usize, f: fn(T, T) -> T) {
    for i in 0..n {
        T::store(dest, i, f(T::load(dest, i), rhs.get(i)));
    }
}

unsafe fn vec_neg<T: VecElem>(dest: *mut u8, n: usize) {
    for i in 0..n {
        T::store(dest, i, T::neg(T::load(dest, i)));
    }
}

unsafe fn vec_dot<T: VecElem>(a: *const u8, b: *const u8, n: usize) -> T {
    let mut acc = T::zero();
    for i in 0..n {
        acc = T::add(acc, T::mul(T::load(a, i), T::load(b, i)));
    }
    acc
}

unsafe fn vec_magsq<T: VecElem>(a: *const u8, n: usize) -> T {
    vec_dot::<T>(a, a, n)
}

unsafe fn vec_mag<T: VecElem>(a: *const u8, n: usize) -> T {
    T::from_f64(vec_magsq::<T>(a, n).to_f64().sqrt())
}

unsafe fn vec_norm<T: VecElem>(dest: *mut u8, n: usize) {
    let inv = 1.0 / vec_magsq::<T>(dest as *const u8, n).to_f64().sqrt();
    for i in 0..n {
        let v = T::load(dest as *const u8, i);
        T::store(dest, i, T::from_f64(v.to_f64() * inv));
    }
}

unsafe fn vec_cross<T: VecElem>(dest: *mut u8, a: *const u8, b: *const u8) {
    let (ax, ay, az) = (T::load(a, 0), T::load(a, 1), T::load(a, 2));
    let (bx, by, bz) = (T::load(b, 0), T::load(b, 1), T::load(b, 2));
    let x = T::sub(T::mul(ay, bz), T::mul(az, by));
    let y = T::sub(T::mul(az, bx), T::mul(ax, bz));
    let z = T::sub(T::mul(ax, by), T::mul(ay, bx));
    T::store(dest, 0, x);
    T::store(dest, 1, y);
    T::store(dest, 2, z);
}

/// Runs the body with the concrete element type selected by `$info`.
macro_rules! with_elem {
    ($info:expr, $t:ident => $body:expr) => {{
        let info = $info;
        if info.is_floating_point {
            match info.size {
                4 => {
                    type $t = f32;
                    $body
                }
                _ => {
                    type $t = f64;
                    $body
                }
            }
        } else if info.is_unsigned {
            match info.size {
                1 => {
                    type $t = u8;
                    $body
                }
                2 => {
                    type $t = u16;
                    $body
                }
                4 => {
                    type $t = u32;
                    $body
                }
                _ => {
                    type $t = u64;
                    $body
                }
            }
        } else {
            match info.size {
                1 => {
                    type $t = i8;
                    $body
                }
                2 => {
                    type $t = i16;
                    $body
                }
                4 => {
                    type $t = i32;
                    $body
                }
                _ => {
                    type $t = i64;
                    $body
                }
            }
        }
    }};
}

/// Executes one function's processed code.
///
/// Register slots are 64-bit; the stack is one flat allocation with a fixed
/// offset per `stack_alloc` id, assigned at construction. Out-of-range
/// register or stack accesses are the caller's bug; the interpreter assumes
/// well-formed code.
pub struct Interpreter<'a> {
    registry: &'a Registry,
    holder: &'a CodeHolder,
    sig: FunctionSig,
    registers: Vec<u64>,
    stack: Vec<u8>,
    stack_addrs: HashMap<StackId, usize>,
    label_addrs: HashMap<LabelId, usize>,
    params: Vec<u64>,
    return_ptr: *mut u8,
}

impl<'a> Interpreter<'a> {
    pub fn new(holder: &'a CodeHolder, registry: &'a Registry) -> Self {
        let mut stack_addrs = HashMap::new();
        let mut label_addrs = HashMap::new();
        let mut stack_size = 0usize;
        let mut max_register = 0u32;

        for (addr, i) in holder.code.iter().enumerate() {
            match i.op {
                OpCode::StackAlloc => {
                    let id = i.operands[1].imm_bits().u() as StackId;
                    stack_addrs.entry(id).or_insert_with(|| {
                        let offset = stack_size;
                        stack_size += i.operands[0].imm_bits().u() as usize;
                        offset
                    });
                }
                OpCode::Label => {
                    label_addrs.insert(i.operands[0].label_id(), addr + 1);
                }
                _ => {}
            }
            for o in &i.operands {
                max_register = max_register.max(o.reg_id());
            }
        }

        Self {
            registry,
            holder,
            sig: registry.signature(holder.func),
            registers: vec![0; max_register as usize + 1],
            stack: vec![0; stack_size],
            stack_addrs,
            label_addrs,
            params: Vec::new(),
            return_ptr: std::ptr::null_mut(),
        }
    }

    /// Writes `value` into the register reserved for argument `index`.
    pub fn set_arg<T: RegisterValue>(&mut self, index: usize, value: T) {
        let reg = self.holder.arg_regs()[index].reg_id();
        self.registers[reg as usize] = value.to_bits();
    }

    pub fn set_this_ptr(&mut self, this_ptr: *mut u8) {
        let reg = self.holder.this_value().reg_id();
        if reg != 0 {
            self.registers[reg as usize] = this_ptr as u64;
        }
    }

    pub fn set_return_value_pointer(&mut self, ret_dest: *mut u8) {
        self.return_ptr = ret_dest;
    }

    /// Typed view of a register slot, for test assertions.
    pub fn register_value<T: RegisterValue>(&self, reg: u32) -> T {
        T::from_bits(self.registers[reg as usize])
    }

    pub fn stack_address_of(&self, id: StackId) -> Option<usize> {
        self.stack_addrs.get(&id).map(|off| self.stack.as_ptr() as usize + off)
    }

    fn read(&self, v: &Value) -> u64 {
        if v.is_reg() {
            self.registers[v.reg_id() as usize]
        } else {
            v.imm_bits().u()
        }
    }

    fn label_target(&self, label: LabelId) -> ForgeResult<usize> {
        self.label_addrs
            .get(&label)
            .copied()
            .ok_or(ForgeError::UnknownLabel { label })
    }

    pub fn execute(&mut self) -> ForgeResult<()> {
        let len = self.holder.code.len();
        let mut idx = 0usize;

        while idx < len {
            let i = self.holder.code[idx];
            let r0 = i.operands[0].reg_id() as usize;
            let v0 = self.read(&i.operands[0]);
            let v1 = self.read(&i.operands[1]);
            let v2 = self.read(&i.operands[2]);

            macro_rules! binop {
                ($ty:ty, |$a:ident, $b:ident| $e:expr) => {{
                    let $a = <$ty as RegisterValue>::from_bits(v1);
                    let $b = <$ty as RegisterValue>::from_bits(v2);
                    self.registers[r0] = RegisterValue::to_bits($e);
                }};
            }

            macro_rules! cmpop {
                ($ty:ty, |$a:ident, $b:ident| $e:expr) => {{
                    let $a = <$ty as RegisterValue>::from_bits(v1);
                    let $b = <$ty as RegisterValue>::from_bits(v2);
                    self.registers[r0] = ($e) as u64;
                }};
            }

            macro_rules! in_place {
                ($ty:ty, |$a:ident| $e:expr) => {{
                    let $a = <$ty as RegisterValue>::from_bits(self.registers[r0]);
                    self.registers[r0] = RegisterValue::to_bits($e);
                }};
            }

            match i.op {
                OpCode::StackPtr => {
                    let id = i.operands[1].imm_bits().u() as StackId;
                    let offset = self.stack_addrs[&id];
                    self.registers[r0] = self.stack.as_ptr() as u64 + offset as u64;
                }
                OpCode::ValuePtr => {
                    let id = self.registry.value_by_id(i.operands[1].imm_bits().u())?;
                    self.registers[r0] = self.registry.value_address(id) as u64;
                }
                OpCode::RetPtr => {
                    self.registers[r0] = self.return_ptr as u64;
                }
                OpCode::Resolve => {
                    self.registers[r0] = v1;
                }
                OpCode::Load => {
                    let info = self.registry.info(i.operands[0].ty());
                    let ptr = (v1.wrapping_add(i.operands[2].imm_bits().u())) as *const u8;
                    self.registers[r0] = unsafe { read_memory(ptr, info) };
                }
                OpCode::Store => {
                    let info = self.registry.info(i.operands[0].ty());
                    let ptr = (v1.wrapping_add(i.operands[2].imm_bits().u())) as *mut u8;
                    unsafe { write_memory(ptr, info, v0) };
                }
                OpCode::Jump => {
                    idx = self.label_target(i.operands[0].label_id())?;
                    continue;
                }
                OpCode::Branch => {
                    if v0 == 0 {
                        idx = self.label_target(i.operands[1].label_id())?;
                        continue;
                    }
                }
                OpCode::Cvt => {
                    let src_info = self.registry.info(i.operands[1].ty());
                    let dest_ty = self.registry.type_by_id(i.operands[2].imm_bits().u())?;
                    let dest_info = self.registry.info(dest_ty);
                    self.registers[r0] =
                        convert_primitive(Immediate::from_bits(v1), src_info, dest_info).bits();
                }
                OpCode::Param => {
                    self.params.push(v0);
                }
                OpCode::Call => {
                    self.dispatch_call(i.operands[0], &i.operands[1], i.operands[2])?;
                }
                OpCode::Ret => {
                    if !i.operands[0].is_empty() && !self.return_ptr.is_null() {
                        let info = self.registry.info(self.sig.ret);
                        unsafe { write_memory(self.return_ptr, info, v0) };
                    }
                    return Ok(());
                }

                OpCode::Not => self.registers[r0] = (v1 == 0) as u64,
                OpCode::Inv => self.registers[r0] = !v1,
                OpCode::Shl => self.registers[r0] = v1.wrapping_shl(v2 as u32),
                OpCode::Shr => self.registers[r0] = v1.wrapping_shr(v2 as u32),
                OpCode::LAnd => self.registers[r0] = (v1 != 0 && v2 != 0) as u64,
                OpCode::BAnd => self.registers[r0] = v1 & v2,
                OpCode::LOr => self.registers[r0] = (v1 != 0 || v2 != 0) as u64,
                OpCode::BOr => self.registers[r0] = v1 | v2,
                OpCode::Xor => self.registers[r0] = v1 ^ v2,
                OpCode::Assign => self.registers[r0] = v1,

                OpCode::IAdd => binop!(i64, |a, b| a.wrapping_add(b)),
                OpCode::UAdd => binop!(u64, |a, b| a.wrapping_add(b)),
                OpCode::FAdd => binop!(f32, |a, b| a + b),
                OpCode::DAdd => binop!(f64, |a, b| a + b),
                OpCode::ISub => binop!(i64, |a, b| a.wrapping_sub(b)),
                OpCode::USub => binop!(u64, |a, b| a.wrapping_sub(b)),
                OpCode::FSub => binop!(f32, |a, b| a - b),
                OpCode::DSub => binop!(f64, |a, b| a - b),
                OpCode::IMul => binop!(i64, |a, b| a.wrapping_mul(b)),
                OpCode::UMul => binop!(u64, |a, b| a.wrapping_mul(b)),
                OpCode::FMul => binop!(f32, |a, b| a * b),
                OpCode::DMul => binop!(f64, |a, b| a * b),
                OpCode::IDiv => binop!(i64, |a, b| a.wrapping_div(b)),
                OpCode::UDiv => binop!(u64, |a, b| a.wrapping_div(b)),
                OpCode::FDiv => binop!(f32, |a, b| a / b),
                OpCode::DDiv => binop!(f64, |a, b| a / b),
                OpCode::IMod => binop!(i64, |a, b| a.wrapping_rem(b)),
                OpCode::UMod => binop!(u64, |a, b| a.wrapping_rem(b)),
                OpCode::FMod => binop!(f32, |a, b| a % b),
                OpCode::DMod => binop!(f64, |a, b| a % b),
                OpCode::INeg => binop!(i64, |a, _b| a.wrapping_neg()),
                OpCode::FNeg => binop!(f32, |a, _b| -a),
                OpCode::DNeg => binop!(f64, |a, _b| -a),

                OpCode::IInc => in_place!(i64, |a| a.wrapping_add(1)),
                OpCode::UInc => in_place!(u64, |a| a.wrapping_add(1)),
                OpCode::FInc => in_place!(f32, |a| a + 1.0),
                OpCode::DInc => in_place!(f64, |a| a + 1.0),
                OpCode::IDec => in_place!(i64, |a| a.wrapping_sub(1)),
                OpCode::UDec => in_place!(u64, |a| a.wrapping_sub(1)),
                OpCode::FDec => in_place!(f32, |a| a - 1.0),
                OpCode::DDec => in_place!(f64, |a| a - 1.0),

                OpCode::ILt => cmpop!(i64, |a, b| a < b),
                OpCode::ULt => cmpop!(u64, |a, b| a < b),
                OpCode::FLt => cmpop!(f32, |a, b| a < b),
                OpCode::DLt => cmpop!(f64, |a, b| a < b),
                OpCode::ILte => cmpop!(i64, |a, b| a <= b),
                OpCode::ULte => cmpop!(u64, |a, b| a <= b),
                OpCode::FLte => cmpop!(f32, |a, b| a <= b),
                OpCode::DLte => cmpop!(f64, |a, b| a <= b),
                OpCode::IGt => cmpop!(i64, |a, b| a > b),
                OpCode::UGt => cmpop!(u64, |a, b| a > b),
                OpCode::FGt => cmpop!(f32, |a, b| a > b),
                OpCode::DGt => cmpop!(f64, |a, b| a > b),
                OpCode::IGte => cmpop!(i64, |a, b| a >= b),
                OpCode::UGte => cmpop!(u64, |a, b| a >= b),
                OpCode::FGte => cmpop!(f32, |a, b| a >= b),
                OpCode::DGte => cmpop!(f64, |a, b| a >= b),
                OpCode::IEq => cmpop!(i64, |a, b| a == b),
                OpCode::UEq => cmpop!(u64, |a, b| a == b),
                OpCode::FEq => cmpop!(f32, |a, b| a == b),
                OpCode::DEq => cmpop!(f64, |a, b| a == b),
                OpCode::INeq => cmpop!(i64, |a, b| a != b),
                OpCode::UNeq => cmpop!(u64, |a, b| a != b),
                OpCode::FNeq => cmpop!(f32, |a, b| a != b),
                OpCode::DNeq => cmpop!(f64, |a, b| a != b),

                OpCode::VSet | OpCode::VAdd | OpCode::VSub | OpCode::VMul | OpCode::VDiv | OpCode::VMod => {
                    let elem = self.element_info(&i.operands[0])?;
                    let n = i.component_count as usize;
                    let dest = v0 as *mut u8;
                    let rhs_is_ptr = self.registry.info(i.operands[1].ty()).is_pointer;
                    with_elem!(elem, T => {
                        let rhs = if rhs_is_ptr {
                            VecRhs::<T>::Ptr(v1 as *const u8)
                        } else {
                            VecRhs::Scalar(T::from_reg_bits(v1))
                        };
                        unsafe {
                            match i.op {
                                OpCode::VSet => vec_set::<T>(dest, rhs, n),
                                OpCode::VAdd => vec_bin::<T>(dest, rhs, n, T::add),
                                OpCode::VSub => vec_bin::<T>(dest, rhs, n, T::sub),
                                OpCode::VMul => vec_bin::<T>(dest, rhs, n, T::mul),
                                OpCode::VDiv => vec_bin::<T>(dest, rhs, n, T::div),
                                _ => vec_bin::<T>(dest, rhs, n, T::rem),
                            }
                        }
                    });
                }
                OpCode::VNeg => {
                    let elem = self.element_info(&i.operands[0])?;
                    let n = i.component_count as usize;
                    with_elem!(elem, T => unsafe { vec_neg::<T>(v0 as *mut u8, n) });
                }
                OpCode::VDot => {
                    let elem = self.element_info(&i.operands[1])?;
                    let n = i.component_count as usize;
                    with_elem!(elem, T => {
                        let dot = unsafe { vec_dot::<T>(v1 as *const u8, v2 as *const u8, n) };
                        self.registers[r0] = dot.to_reg_bits();
                    });
                }
                OpCode::VMag => {
                    let elem = self.element_info(&i.operands[1])?;
                    let n = i.component_count as usize;
                    with_elem!(elem, T => {
                        let mag = unsafe { vec_mag::<T>(v1 as *const u8, n) };
                        self.registers[r0] = mag.to_reg_bits();
                    });
                }
                OpCode::VMagSq => {
                    let elem = self.element_info(&i.operands[1])?;
                    let n = i.component_count as usize;
                    with_elem!(elem, T => {
                        let magsq = unsafe { vec_magsq::<T>(v1 as *const u8, n) };
                        self.registers[r0] = magsq.to_reg_bits();
                    });
                }
                OpCode::VNorm => {
                    let elem = self.element_info(&i.operands[0])?;
                    let n = i.component_count as usize;
                    with_elem!(elem, T => unsafe { vec_norm::<T>(v0 as *mut u8, n) });
                }
                OpCode::VCross => {
                    let elem = self.element_info(&i.operands[0])?;
                    with_elem!(elem, T => unsafe {
                        vec_cross::<T>(v0 as *mut u8, v1 as *const u8, v2 as *const u8)
                    });
                }

                // pseudo and frame bookkeeping opcodes have no runtime effect
                OpCode::Noop
                | OpCode::Label
                | OpCode::StackAlloc
                | OpCode::StackFree
                | OpCode::ThisPtr
                | OpCode::Argument
                | OpCode::Reserve => {}
            }

            idx += 1;
        }

        Ok(())
    }

    fn element_info(&self, ptr_operand: &Value) -> ForgeResult<TypeInfo> {
        match self.registry.pointee(ptr_operand.ty()) {
            Some(elem) => Ok(self.registry.info(elem)),
            None => Err(ForgeError::runtime("vector operand is not a pointer type")),
        }
    }

    fn dispatch_call(&mut self, callee: Value, ret_dest: &Value, self_ptr: Value) -> ForgeResult<()> {
        if !callee.is_imm() {
            return Err(ForgeError::unsupported(
                "the reference interpreter does not execute calls through function-value registers",
            ));
        }

        let func = self.registry.func_by_id(callee.imm_bits().u())?;
        let sig = self.registry.signature(func);
        let handler = self
            .registry
            .call_handler(func)
            .ok_or_else(|| ForgeError::runtime(format!("function '{}' has no call handler", self.registry.func_name(func))))?;

        let mut out_args: Vec<*mut u8> = Vec::with_capacity(sig.args.len() + 1);
        if sig.this.is_some() {
            let this_slot = self_ptr.reg_id() as usize;
            out_args.push(&mut self.registers[this_slot] as *mut u64 as *mut u8);
        }
        for i in 0..self.params.len().min(sig.args.len()) {
            out_args.push(&mut self.params[i] as *mut u64 as *mut u8);
        }

        let ret_info = self.registry.info(sig.ret);
        let ret_ptr: *mut u8 = if ret_dest.is_empty() {
            std::ptr::null_mut()
        } else if ret_info.is_primitive || ret_info.is_pointer {
            // written in place into the destination register
            &mut self.registers[ret_dest.reg_id() as usize] as *mut u64 as *mut u8
        } else {
            // the register's value is the memory the callee returns into
            self.registers[ret_dest.reg_id() as usize] as *mut u8
        };

        handler.call(self.registry, func, ret_ptr, &out_args);
        self.params.clear();
        Ok(())
    }
}

/// Reads `info.size` bytes at `ptr` into the canonical register
/// representation: signed values sign-extend, everything else zero-extends.
unsafe fn read_memory(ptr: *const u8, info: TypeInfo) -> u64 {
    let signed = info.is_integral && !info.is_unsigned;
    match (info.size, signed) {
        (1, false) => ptr.read_unaligned() as u64,
        (1, true) => (ptr as *const i8).read_unaligned() as i64 as u64,
        (2, false) => (ptr as *const u16).read_unaligned() as u64,
        (2, true) => (ptr as *const i16).read_unaligned() as i64 as u64,
        (4, false) => (ptr as *const u32).read_unaligned() as u64,
        (4, true) => (ptr as *const i32).read_unaligned() as i64 as u64,
        _ => (ptr as *const u64).read_unaligned(),
    }
}

/// Writes the low `info.size` bytes of `bits` to `ptr`.
unsafe fn write_memory(ptr: *mut u8, info: TypeInfo, bits: u64) {
    match info.size {
        1 => ptr.write_unaligned(bits as u8),
        2 => (ptr as *mut u16).write_unaligned(bits as u16),
        4 => (ptr as *mut u32).write_unaligned(bits as u32),
        _ => (ptr as *mut u64).write_unaligned(bits),
    }
}

/// Invokes a function through its installed call handler, the way a frontend
/// or another interpreted function would.
pub fn call_function(registry: &Registry, func: FuncId, ret_dest: *mut u8, args: &[*mut u8]) -> ForgeResult<()> {
    let handler = registry
        .call_handler(func)
        .ok_or_else(|| ForgeError::runtime(format!("function '{}' has no call handler", registry.func_name(func))))?;
    handler.call(registry, func, ret_dest, args);
    Ok(())
}
