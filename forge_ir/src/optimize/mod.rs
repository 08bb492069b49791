//! The post-process step machinery and the standard optimization pipeline.
//!
//! A step is either code-global (`execute`) or per-basic-block
//! (`execute_on_block`); a group executes its steps in order, running each to
//! fixed point (per block first, then whole-function), and reports whether
//! anything changed so its own caller can iterate. Steps that mutate without
//! reporting a change (or that want the enclosing group to sweep again)
//! raise the context's repeat flag instead.

pub mod constant_folding;
pub mod copy_propagation;
pub mod cse;
pub mod dce;
pub mod reduce_memory;

use forge_common::{ForgeResult, Logger};

use crate::code_holder::CodeHolder;
use crate::registry::Registry;

pub use constant_folding::ConstantFoldingStep;
pub use copy_propagation::CopyPropagationStep;
pub use cse::CommonSubexpressionEliminationStep;
pub use dce::DeadCodeEliminationStep;
pub use reduce_memory::ReduceMemoryAccessStep;

/// Everything a pass sees while running: the code under transformation, the
/// registry it is typed against, the step-selection mask, and the shared
/// repeat flag.
pub struct PassContext<'a> {
    pub holder: &'a mut CodeHolder,
    pub registry: &'a Registry,
    pub mask: u32,
    repeat_requested: bool,
}

impl<'a> PassContext<'a> {
    pub fn new(holder: &'a mut CodeHolder, registry: &'a Registry, mask: u32) -> Self {
        Self { holder, registry, mask, repeat_requested: false }
    }

    /// Asks the enclosing group to run its steps again.
    pub fn request_repeat(&mut self) {
        self.repeat_requested = true;
    }

    pub fn take_repeat_request(&mut self) -> bool {
        std::mem::take(&mut self.repeat_requested)
    }

    pub fn logger(&self) -> Logger {
        self.holder.logger().clone()
    }
}

/// One optimization step. Implement whichever granularity fits; both default
/// to "no change".
pub trait PostProcessStep {
    /// Whole-function pass. Returns whether the code changed; a changed pass
    /// is immediately executed again.
    fn execute(&mut self, cx: &mut PassContext) -> ForgeResult<bool> {
        let _ = cx;
        Ok(false)
    }

    /// Per-basic-block pass, called once per block of the control-flow
    /// graph, in order.
    fn execute_on_block(&mut self, cx: &mut PassContext, block: usize) -> ForgeResult<bool> {
        let _ = (cx, block);
        Ok(false)
    }
}

/// Runs one step to fixed point: every block repeatedly until stable, then
/// the whole function repeatedly until stable. Returns whether anything
/// changed (including via the context's repeat flag).
pub fn run_step_to_fixed_point(step: &mut dyn PostProcessStep, cx: &mut PassContext) -> ForgeResult<bool> {
    let mut any = false;

    let mut block = 0;
    while block < cx.holder.cfg.blocks.len() {
        loop {
            let changed = step.execute_on_block(cx, block)?;
            any |= changed;
            if !changed {
                break;
            }
        }
        block += 1;
    }

    loop {
        let changed = step.execute(cx)?;
        any |= changed;
        if !changed {
            break;
        }
    }

    any |= cx.take_repeat_request();
    Ok(any)
}

/// A sequence of steps executed in order. The group is itself a step, so
/// pipelines nest; a group reports a change when any of its steps changed
/// the code, which makes the enclosing runner sweep it again.
#[derive(Default)]
pub struct PostProcessGroup {
    steps: Vec<(Box<dyn PostProcessStep>, u32)>,
}

impl PostProcessGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a step, selectable through `mask`. A mask of zero means the step
    /// always runs.
    pub fn add_step(&mut self, step: Box<dyn PostProcessStep>, mask: u32) {
        self.steps.push((step, mask));
    }
}

impl PostProcessStep for PostProcessGroup {
    fn execute(&mut self, cx: &mut PassContext) -> ForgeResult<bool> {
        let mut changed = false;

        for (step, step_mask) in &mut self.steps {
            if *step_mask != 0 && (*step_mask & cx.mask) == 0 {
                continue;
            }
            changed |= run_step_to_fixed_point(step.as_mut(), cx)?;
        }

        Ok(changed)
    }
}

/// The default pipeline:
///
/// ```text
/// outer:
///   inner:
///     CopyPropagation (per-block)
///     CommonSubexpressionElimination (per-block)
///     ReduceMemoryAccess (whole-function)
///   ConstantFolding (whole-function)
///   DeadCodeElimination (whole-function)
/// ```
///
/// The outer group repeats while any step reports changes.
pub fn default_pipeline() -> PostProcessGroup {
    let mut inner = PostProcessGroup::new();
    inner.add_step(Box::new(CopyPropagationStep), 0);
    inner.add_step(Box::new(CommonSubexpressionEliminationStep), 0);
    inner.add_step(Box::new(ReduceMemoryAccessStep), 0);

    let mut outer = PostProcessGroup::new();
    outer.add_step(Box::new(inner), 0);
    outer.add_step(Box::new(ConstantFoldingStep), 0);
    outer.add_step(Box::new(DeadCodeEliminationStep), 0);
    outer
}
