//! The type/function/value registry the IR is typed against.
//!
//! The registry is the authority for type metadata (sizes, primitive flags,
//! pointer destinations), overload sets (constructors, conversion operators,
//! operator methods, destructors), function signatures and their installable
//! call handlers, and addressable global values.
//!
//! Registration happens up front; the builder and passes then hold a shared
//! borrow. Pointer and function types are interned on demand, and call
//! handlers are installed after compilation, so the internals use interior
//! mutability; the toolkit is single-threaded throughout.

use std::cell::RefCell;
use std::rc::Rc;

use forge_common::{ForgeError, ForgeResult};
use serde::{Deserialize, Serialize};

/// Identifier of a registered data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeId(pub u32);

/// Identifier of a registered function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FuncId(pub u32);

/// Identifier of a registered global value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueId(pub u32);

// Builtins are seeded by `Registry::new` in a fixed order.
impl TypeId {
    pub const VOID: TypeId = TypeId(0);
    pub const BOOL: TypeId = TypeId(1);
    pub const U8: TypeId = TypeId(2);
    pub const U16: TypeId = TypeId(3);
    pub const U32: TypeId = TypeId(4);
    pub const U64: TypeId = TypeId(5);
    pub const I8: TypeId = TypeId(6);
    pub const I16: TypeId = TypeId(7);
    pub const I32: TypeId = TypeId(8);
    pub const I64: TypeId = TypeId(9);
    pub const F32: TypeId = TypeId(10);
    pub const F64: TypeId = TypeId(11);
    /// `*void`, the type of raw pointer immediates.
    pub const PTR: TypeId = TypeId(12);
}

/// Metadata describing a data type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeInfo {
    pub size: u32,
    pub is_primitive: bool,
    pub is_integral: bool,
    pub is_unsigned: bool,
    pub is_floating_point: bool,
    pub is_pointer: bool,
    pub is_function: bool,
}

/// Access bitmask used to filter overload lookups.
pub type Access = u32;
pub const ACCESS_ALL: Access = u32::MAX;
pub const ACCESS_PUBLIC: Access = 1;

/// Signature of a function: return type, formal argument types, and an
/// optional receiver type (a pointer type, for methods).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSig {
    pub ret: TypeId,
    pub args: Vec<TypeId>,
    pub this: Option<TypeId>,
}

impl FunctionSig {
    pub fn new(ret: TypeId, args: Vec<TypeId>) -> Self {
        Self { ret, args, this: None }
    }

    pub fn method(ret: TypeId, args: Vec<TypeId>, this: TypeId) -> Self {
        Self { ret, args, this: Some(this) }
    }
}

/// External callable bound to a function. `ret_dest` and each entry of `args`
/// point at storage for the corresponding value; for receiver calls the
/// receiver pointer is `args[0]`.
pub trait CallHandler {
    fn call(&self, registry: &Registry, target: FuncId, ret_dest: *mut u8, args: &[*mut u8]);
}

/// Call handler wrapping a host closure. The bread and butter of tests.
pub struct NativeHandler<F>(F);

impl<F> NativeHandler<F>
where
    F: Fn(&Registry, FuncId, *mut u8, &[*mut u8]),
{
    pub fn new(f: F) -> Rc<Self> {
        Rc::new(Self(f))
    }
}

impl<F> CallHandler for NativeHandler<F>
where
    F: Fn(&Registry, FuncId, *mut u8, &[*mut u8]),
{
    fn call(&self, registry: &Registry, target: FuncId, ret_dest: *mut u8, args: &[*mut u8]) {
        (self.0)(registry, target, ret_dest, args)
    }
}

/// Result of an overload lookup: the viable candidates plus the strict
/// (exact argument types) match when one exists.
#[derive(Debug, Clone, Default)]
pub struct MethodLookup {
    pub candidates: Vec<FuncId>,
    pub strict: Option<FuncId>,
}

struct TypeRecord {
    name: String,
    info: TypeInfo,
    pointee: Option<TypeId>,
    signature: Option<FunctionSig>,
    pointer_type: Option<TypeId>,
    constructors: Vec<(FuncId, Access)>,
    destructor: Option<FuncId>,
    conversions: Vec<(TypeId, FuncId, Access)>,
    methods: Vec<(String, FuncId, Access)>,
}

impl TypeRecord {
    fn plain(name: &str, info: TypeInfo) -> Self {
        Self {
            name: name.into(),
            info,
            pointee: None,
            signature: None,
            pointer_type: None,
            constructors: Vec::new(),
            destructor: None,
            conversions: Vec::new(),
            methods: Vec::new(),
        }
    }
}

struct FunctionRecord {
    name: String,
    sig: FunctionSig,
    handler: Option<Rc<dyn CallHandler>>,
}

struct ValueRecord {
    name: String,
    ty: TypeId,
    address: usize,
}

/// Process-wide symbol registry. Not thread-safe by design.
pub struct Registry {
    types: RefCell<Vec<TypeRecord>>,
    funcs: RefCell<Vec<FunctionRecord>>,
    values: RefCell<Vec<ValueRecord>>,
}

fn primitive_info(size: u32, integral: bool, unsigned: bool, fp: bool) -> TypeInfo {
    TypeInfo {
        size,
        is_primitive: true,
        is_integral: integral,
        is_unsigned: unsigned,
        is_floating_point: fp,
        is_pointer: false,
        is_function: false,
    }
}

impl Registry {
    /// Creates a registry seeded with the built-in primitive types in the
    /// order the `TypeId` constants expect.
    pub fn new() -> Self {
        let mut types = Vec::new();
        types.push(TypeRecord::plain("void", TypeInfo { size: 0, ..TypeInfo::default() }));
        types.push(TypeRecord::plain("bool", primitive_info(1, true, true, false)));
        types.push(TypeRecord::plain("u8", primitive_info(1, true, true, false)));
        types.push(TypeRecord::plain("u16", primitive_info(2, true, true, false)));
        types.push(TypeRecord::plain("u32", primitive_info(4, true, true, false)));
        types.push(TypeRecord::plain("u64", primitive_info(8, true, true, false)));
        types.push(TypeRecord::plain("i8", primitive_info(1, true, false, false)));
        types.push(TypeRecord::plain("i16", primitive_info(2, true, false, false)));
        types.push(TypeRecord::plain("i32", primitive_info(4, true, false, false)));
        types.push(TypeRecord::plain("i64", primitive_info(8, true, false, false)));
        types.push(TypeRecord::plain("f32", primitive_info(4, true, false, true)));
        types.push(TypeRecord::plain("f64", primitive_info(8, true, false, true)));

        let mut void_ptr = TypeRecord::plain(
            "void*",
            TypeInfo { size: 8, is_pointer: true, ..TypeInfo::default() },
        );
        void_ptr.pointee = Some(TypeId::VOID);
        types.push(void_ptr);
        types[TypeId::VOID.0 as usize].pointer_type = Some(TypeId::PTR);

        Self {
            types: RefCell::new(types),
            funcs: RefCell::new(Vec::new()),
            values: RefCell::new(Vec::new()),
        }
    }

    // ---- types -----------------------------------------------------------

    /// Registers a non-primitive (composite) type of the given size.
    pub fn register_type(&self, name: &str, size: u32) -> TypeId {
        let mut types = self.types.borrow_mut();
        let id = TypeId(types.len() as u32);
        types.push(TypeRecord::plain(name, TypeInfo { size, ..TypeInfo::default() }));
        id
    }

    pub fn info(&self, ty: TypeId) -> TypeInfo {
        self.types.borrow()[ty.0 as usize].info
    }

    pub fn type_name(&self, ty: TypeId) -> String {
        self.types.borrow()[ty.0 as usize].name.clone()
    }

    pub fn type_count(&self) -> usize {
        self.types.borrow().len()
    }

    pub fn type_by_id(&self, raw: u64) -> ForgeResult<TypeId> {
        if (raw as usize) < self.types.borrow().len() {
            Ok(TypeId(raw as u32))
        } else {
            Err(ForgeError::registry(format!("unknown type id {raw}")))
        }
    }

    /// Interned pointer-to-`ty` type.
    pub fn pointer_to(&self, ty: TypeId) -> TypeId {
        if let Some(p) = self.types.borrow()[ty.0 as usize].pointer_type {
            return p;
        }

        let mut types = self.types.borrow_mut();
        let id = TypeId(types.len() as u32);
        let name = format!("{}*", types[ty.0 as usize].name);
        let mut rec = TypeRecord::plain(&name, TypeInfo { size: 8, is_pointer: true, ..TypeInfo::default() });
        rec.pointee = Some(ty);
        types.push(rec);
        types[ty.0 as usize].pointer_type = Some(id);
        id
    }

    /// Destination type of a pointer type.
    pub fn pointee(&self, ty: TypeId) -> Option<TypeId> {
        self.types.borrow()[ty.0 as usize].pointee
    }

    /// Interned function type carrying the signature of `func`.
    pub fn function_type_of(&self, func: FuncId) -> TypeId {
        let sig = self.signature(func);
        {
            let types = self.types.borrow();
            for (idx, rec) in types.iter().enumerate() {
                if rec.info.is_function && rec.signature.as_ref() == Some(&sig) {
                    return TypeId(idx as u32);
                }
            }
        }

        let mut types = self.types.borrow_mut();
        let id = TypeId(types.len() as u32);
        let name = format!("fn#{}", self.funcs.borrow()[func.0 as usize].name);
        let mut rec = TypeRecord::plain(&name, TypeInfo { size: 8, is_function: true, ..TypeInfo::default() });
        rec.signature = Some(sig);
        types.push(rec);
        id
    }

    /// Signature carried by a function type.
    pub fn type_signature(&self, ty: TypeId) -> Option<FunctionSig> {
        self.types.borrow()[ty.0 as usize].signature.clone()
    }

    pub fn is_equal(&self, a: TypeId, b: TypeId) -> bool {
        a == b
    }

    /// Equality up to pointer identity: two distinct pointer types to
    /// equivalent destinations are equivalent.
    pub fn is_equivalent(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        let (ia, ib) = (self.info(a), self.info(b));
        if ia.is_pointer && ib.is_pointer {
            return match (self.pointee(a), self.pointee(b)) {
                (Some(pa), Some(pb)) => self.is_equivalent(pa, pb),
                _ => false,
            };
        }
        false
    }

    /// Whether a value of `from` can reach `to` with at most one implicit
    /// conversion step.
    pub fn is_convertible(&self, from: TypeId, to: TypeId) -> bool {
        if self.is_directly_convertible(from, to) {
            return true;
        }
        !self.find_constructors(to, &[from], true, ACCESS_ALL).candidates.is_empty()
    }

    /// Convertibility without considering converting constructors. Overload
    /// matching uses this weaker relation, so a converting constructor can
    /// not recursively justify its own argument conversion.
    fn is_directly_convertible(&self, from: TypeId, to: TypeId) -> bool {
        if self.is_equivalent(from, to) {
            return true;
        }
        let (fi, ti) = (self.info(from), self.info(to));
        if fi.is_primitive && ti.is_primitive {
            return true;
        }
        if fi.is_pointer && ti.is_pointer {
            return true;
        }
        self.find_conversion_operator(from, to, ACCESS_ALL).is_some()
    }

    // ---- functions -------------------------------------------------------

    pub fn register_function(&self, name: &str, sig: FunctionSig) -> FuncId {
        let mut funcs = self.funcs.borrow_mut();
        let id = FuncId(funcs.len() as u32);
        funcs.push(FunctionRecord { name: name.into(), sig, handler: None });
        id
    }

    pub fn signature(&self, func: FuncId) -> FunctionSig {
        self.funcs.borrow()[func.0 as usize].sig.clone()
    }

    pub fn func_name(&self, func: FuncId) -> String {
        self.funcs.borrow()[func.0 as usize].name.clone()
    }

    pub fn func_by_id(&self, raw: u64) -> ForgeResult<FuncId> {
        if (raw as usize) < self.funcs.borrow().len() {
            Ok(FuncId(raw as u32))
        } else {
            Err(ForgeError::registry(format!("unknown function id {raw}")))
        }
    }

    pub fn call_handler(&self, func: FuncId) -> Option<Rc<dyn CallHandler>> {
        self.funcs.borrow()[func.0 as usize].handler.clone()
    }

    pub fn set_call_handler(&self, func: FuncId, handler: Rc<dyn CallHandler>) {
        self.funcs.borrow_mut()[func.0 as usize].handler = Some(handler);
    }

    // ---- members ---------------------------------------------------------

    pub fn register_constructor(&self, on: TypeId, func: FuncId, access: Access) {
        self.types.borrow_mut()[on.0 as usize].constructors.push((func, access));
    }

    pub fn register_destructor(&self, on: TypeId, func: FuncId) {
        self.types.borrow_mut()[on.0 as usize].destructor = Some(func);
    }

    pub fn register_conversion(&self, on: TypeId, dest: TypeId, func: FuncId, access: Access) {
        self.types.borrow_mut()[on.0 as usize].conversions.push((dest, func, access));
    }

    /// Registers an operator or named method. `name` is the symbolic operator
    /// name (`+`, `[]`, `()`, ...) or a plain identifier.
    pub fn register_method(&self, on: TypeId, name: &str, func: FuncId, access: Access) {
        self.types.borrow_mut()[on.0 as usize].methods.push((name.into(), func, access));
    }

    pub fn find_destructor(&self, ty: TypeId) -> Option<FuncId> {
        self.types.borrow()[ty.0 as usize].destructor
    }

    pub fn find_conversion_operator(&self, ty: TypeId, dest: TypeId, access: Access) -> Option<FuncId> {
        self.types.borrow()[ty.0 as usize]
            .conversions
            .iter()
            .find(|(d, _, a)| *d == dest && a & access != 0)
            .map(|(_, f, _)| *f)
    }

    /// Constructors of `ty` viable for the given argument types. The strict
    /// slot carries the exact-argument-types match when one exists; when
    /// `allow_convertible` is false the candidate list is restricted to
    /// strict matches as well.
    pub fn find_constructors(
        &self,
        ty: TypeId,
        arg_types: &[TypeId],
        allow_convertible: bool,
        access: Access,
    ) -> MethodLookup {
        let ctors: Vec<(FuncId, Access)> = self.types.borrow()[ty.0 as usize].constructors.clone();
        let mut lookup = MethodLookup::default();

        for (func, ctor_access) in ctors {
            if ctor_access & access == 0 {
                continue;
            }
            let sig = self.signature(func);
            match self.match_args(&sig.args, arg_types) {
                ArgMatch::Strict => {
                    lookup.strict = Some(func);
                    lookup.candidates.push(func);
                }
                ArgMatch::Convertible if allow_convertible => lookup.candidates.push(func),
                _ => {}
            }
        }

        lookup
    }

    /// Operator/method lookup by symbolic name and argument types.
    pub fn find_methods(&self, ty: TypeId, name: &str, arg_types: &[TypeId], access: Access) -> MethodLookup {
        let methods: Vec<(String, FuncId, Access)> = self.types.borrow()[ty.0 as usize].methods.clone();
        let mut lookup = MethodLookup::default();

        for (method_name, func, method_access) in methods {
            if method_name != name || method_access & access == 0 {
                continue;
            }
            let sig = self.signature(func);
            match self.match_args(&sig.args, arg_types) {
                ArgMatch::Strict => {
                    lookup.strict = Some(func);
                    lookup.candidates.push(func);
                }
                ArgMatch::Convertible => lookup.candidates.push(func),
                ArgMatch::None => {}
            }
        }

        lookup
    }

    fn match_args(&self, formals: &[TypeId], actuals: &[TypeId]) -> ArgMatch {
        if formals.len() != actuals.len() {
            return ArgMatch::None;
        }
        if formals.iter().zip(actuals).all(|(f, a)| self.is_equal(*f, *a)) {
            return ArgMatch::Strict;
        }
        if formals.iter().zip(actuals).all(|(f, a)| self.is_directly_convertible(*a, *f)) {
            return ArgMatch::Convertible;
        }
        ArgMatch::None
    }

    // ---- global values ---------------------------------------------------

    /// Registers an addressable global. The address must outlive every use
    /// of the registry.
    pub fn register_global(&self, name: &str, ty: TypeId, address: usize) -> ValueId {
        let mut values = self.values.borrow_mut();
        let id = ValueId(values.len() as u32);
        values.push(ValueRecord { name: name.into(), ty, address });
        id
    }

    pub fn value_type(&self, id: ValueId) -> TypeId {
        self.values.borrow()[id.0 as usize].ty
    }

    pub fn value_address(&self, id: ValueId) -> usize {
        self.values.borrow()[id.0 as usize].address
    }

    pub fn value_name(&self, id: ValueId) -> String {
        self.values.borrow()[id.0 as usize].name.clone()
    }

    pub fn value_by_id(&self, raw: u64) -> ForgeResult<ValueId> {
        if (raw as usize) < self.values.borrow().len() {
            Ok(ValueId(raw as u32))
        } else {
            Err(ForgeError::registry(format!("unknown value id {raw}")))
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

enum ArgMatch {
    Strict,
    Convertible,
    None,
}
