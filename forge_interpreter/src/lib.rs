//! Reference interpreter for the forge IR.
//!
//! Executes a [`CodeHolder`](forge_ir::CodeHolder) against a small virtual
//! machine: a flat 64-bit register file, a linear stack buffer, and the
//! function's label map. The [`TestBackend`] wires the interpreter up as a
//! call handler so finished functions become directly callable, which is how
//! the toolkit's semantics are exercised end to end in tests.

mod executer;
mod test_backend;

pub use executer::{call_function, Interpreter, RegisterValue};
pub use test_backend::{InterpreterCallHandler, TestBackend};
