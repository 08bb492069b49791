//! A code sequence bound to its three derived indices.

use forge_common::{ForgeResult, Logger};

use crate::analysis::{ControlFlowGraph, LabelMap, LivenessData};
use crate::builder::FunctionBuilder;
use crate::ir::Instruction;
use crate::registry::{FuncId, Registry};
use crate::value::Value;

/// Holds one function's code together with its label index, control-flow
/// graph and liveness data, plus the few function facts (argument and
/// receiver registers) consumers need after the builder is gone.
///
/// The indices are transient: any edit to `code` invalidates them, and every
/// pass that changes addresses calls [`rebuild_all`](Self::rebuild_all)
/// before the next consumer looks.
pub struct CodeHolder {
    pub func: FuncId,
    pub code: Vec<Instruction>,
    pub labels: LabelMap,
    pub cfg: ControlFlowGraph,
    pub liveness: LivenessData,
    arg_regs: Vec<Value>,
    this_val: Value,
    strings: Vec<String>,
    logger: Logger,
}

impl CodeHolder {
    /// Snapshots the builder's code. The indices start empty; call
    /// [`rebuild_all`](Self::rebuild_all) before using them.
    pub fn from_builder(fb: &FunctionBuilder) -> Self {
        Self {
            func: fb.func_id(),
            code: fb.code().to_vec(),
            labels: LabelMap::default(),
            cfg: ControlFlowGraph::default(),
            liveness: LivenessData::default(),
            arg_regs: (0..fb.arg_count()).map(|i| fb.arg(i).unwrap_or(Value::Empty)).collect(),
            this_val: fb.this_value(),
            strings: fb.strings().to_vec(),
            logger: fb.logger().clone(),
        }
    }

    pub fn rebuild_all(&mut self, registry: &Registry) -> ForgeResult<()> {
        self.rebuild_labels();
        self.rebuild_cfg()?;
        self.rebuild_liveness(registry)
    }

    pub fn rebuild_labels(&mut self) {
        self.labels.rebuild(&self.code);
    }

    pub fn rebuild_cfg(&mut self) -> ForgeResult<()> {
        self.cfg.rebuild(&self.code, &self.labels)
    }

    pub fn rebuild_liveness(&mut self, registry: &Registry) -> ForgeResult<()> {
        self.liveness.rebuild(&self.code, &self.labels, registry)
    }

    /// Register values holding the function's formal arguments, by index.
    pub fn arg_regs(&self) -> &[Value] {
        &self.arg_regs
    }

    /// Register value holding the receiver pointer, empty when the function
    /// has none.
    pub fn this_value(&self) -> Value {
        self.this_val
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Renders the whole code listing, one instruction per line.
    pub fn render(&self, registry: &Registry) -> String {
        self.code
            .iter()
            .enumerate()
            .map(|(addr, i)| format!("{addr:#05x} | {}", i.render(registry, &self.strings)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
