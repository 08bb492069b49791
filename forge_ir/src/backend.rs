//! The interface backends implement to consume post-processed code.

use forge_common::ForgeResult;

use crate::builder::FunctionBuilder;
use crate::code_holder::CodeHolder;
use crate::optimize::{run_step_to_fixed_point, PassContext, PostProcessStep};
use crate::registry::Registry;

/// Mask selecting every registered post-process step.
pub const ALL_STEPS: u32 = u32::MAX;

/// A consumer of finished functions. [`process`](Backend::process) builds a
/// `CodeHolder` over the builder's code, runs the registered post-process
/// steps (each to fixed point, in registration order), then hands the result
/// to the backend's `transform`: native code emission, or installing an
/// interpreter-backed call handler in the reference case.
pub trait Backend {
    /// Storage for the registered post-process steps.
    fn post_processes(&mut self) -> &mut Vec<Box<dyn PostProcessStep>>;

    fn add_post_process(&mut self, step: Box<dyn PostProcessStep>) {
        self.post_processes().push(step);
    }

    fn on_before_post_processing(&mut self, _ch: &mut CodeHolder, _registry: &Registry) {}

    fn on_after_post_processing(&mut self, _ch: &mut CodeHolder, _registry: &Registry) {}

    /// Consumes the processed code.
    fn transform(&mut self, ch: CodeHolder, registry: &Registry) -> ForgeResult<()>;

    /// Runs the full post-processing pipeline over `input`'s code and
    /// transforms the result. `mask` selects which steps participate.
    fn process(&mut self, input: &FunctionBuilder, mask: u32) -> ForgeResult<()> {
        let registry = input.registry();
        log::debug!(
            "processing '{}' ({} instructions)",
            registry.func_name(input.func_id()),
            input.code().len()
        );

        let mut ch = CodeHolder::from_builder(input);
        ch.rebuild_all(registry)?;

        self.on_before_post_processing(&mut ch, registry);

        {
            let mut cx = PassContext::new(&mut ch, registry, mask);
            for step in self.post_processes().iter_mut() {
                run_step_to_fixed_point(step.as_mut(), &mut cx)?;
            }
        }

        self.on_after_post_processing(&mut ch, registry);

        self.transform(ch, registry)
    }
}
