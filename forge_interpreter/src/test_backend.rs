//! The reference backend: installs an interpreter-backed call handler on
//! finished functions.

use std::rc::Rc;

use forge_common::ForgeResult;
use forge_ir::optimize::PostProcessStep;
use forge_ir::registry::{CallHandler, FuncId, Registry};
use forge_ir::{Backend, CodeHolder};

use crate::executer::Interpreter;

/// Routes calls to a function into a fresh [`Interpreter`] over its
/// processed code. Arguments arrive as pointers to their register values;
/// primitive and pointer arguments are copied into the argument registers by
/// width, and composite arguments (whose register value is the object's
/// address) are dereferenced one level, like the receiver pointer.
pub struct InterpreterCallHandler {
    holder: Rc<CodeHolder>,
}

impl InterpreterCallHandler {
    pub fn new(holder: Rc<CodeHolder>) -> Self {
        Self { holder }
    }
}

impl CallHandler for InterpreterCallHandler {
    fn call(&self, registry: &Registry, target: FuncId, ret_dest: *mut u8, args: &[*mut u8]) {
        let mut exe = Interpreter::new(&self.holder, registry);
        exe.set_return_value_pointer(ret_dest);

        let sig = registry.signature(target);
        let mut offset = 0;
        if sig.this.is_some() {
            let this_ptr = unsafe { (args[0] as *const *mut u8).read_unaligned() };
            exe.set_this_ptr(this_ptr);
            offset = 1;
        }

        for (index, arg_tp) in sig.args.iter().enumerate() {
            let info = registry.info(*arg_tp);
            let src = args[index + offset];
            if info.is_primitive || info.is_pointer {
                let signed = info.is_integral && !info.is_unsigned;
                let bits = unsafe {
                    match (info.size, signed) {
                        (1, false) => src.read_unaligned() as u64,
                        (1, true) => (src as *const i8).read_unaligned() as i64 as u64,
                        (2, false) => (src as *const u16).read_unaligned() as u64,
                        (2, true) => (src as *const i16).read_unaligned() as i64 as u64,
                        (4, false) => (src as *const u32).read_unaligned() as u64,
                        (4, true) => (src as *const i32).read_unaligned() as i64 as u64,
                        _ => (src as *const u64).read_unaligned(),
                    }
                };
                exe.set_arg(index, bits);
            } else {
                // composites travel by address: the slot behind `src` holds
                // the object's address, like the receiver slot above
                let ptr = unsafe { (src as *const *mut u8).read_unaligned() };
                exe.set_arg(index, ptr);
            }
        }

        if let Err(e) = exe.execute() {
            self.holder.logger().error(format!("interpreter aborted: {e}"));
        }
    }
}

/// Backend whose `transform` makes the function callable through the
/// interpreter. Subsequent calls to the function, from the host or from
/// other interpreted functions, route through the final processed code.
#[derive(Default)]
pub struct TestBackend {
    steps: Vec<Box<dyn PostProcessStep>>,
}

impl TestBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A test backend preloaded with the default optimization pipeline.
    pub fn with_default_pipeline() -> Self {
        let mut be = Self::new();
        be.add_post_process(Box::new(forge_ir::optimize::default_pipeline()));
        be
    }
}

impl Backend for TestBackend {
    fn post_processes(&mut self) -> &mut Vec<Box<dyn PostProcessStep>> {
        &mut self.steps
    }

    fn transform(&mut self, ch: CodeHolder, registry: &Registry) -> ForgeResult<()> {
        let func = ch.func;
        registry.set_call_handler(func, Rc::new(InterpreterCallHandler::new(Rc::new(ch))));
        Ok(())
    }
}
