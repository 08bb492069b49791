//! Derived indices over a function's code: the label index, the control-flow
//! graph, and register liveness. All three are rebuilt wholesale after any
//! code edit; none is maintained incrementally.

pub mod cfg;
pub mod labels;
pub mod liveness;

pub use cfg::{BasicBlock, ControlFlowGraph};
pub use labels::LabelMap;
pub use liveness::{LivenessData, RegisterLifetime};
