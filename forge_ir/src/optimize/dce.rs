//! Dead-code elimination by zero-usage lifetimes.

use forge_common::ForgeResult;

use super::{PassContext, PostProcessStep};
use crate::Address;

/// Removes every instruction that defines a register nobody reads.
///
/// Candidates are the begin addresses of lifetimes with a zero usage count;
/// instructions with external side effects (calls) are kept even when their
/// result is unused. Deletion walks addresses in descending order so earlier
/// removals do not shift later ones, then rebuilds the analyses.
pub struct DeadCodeEliminationStep;

impl PostProcessStep for DeadCodeEliminationStep {
    fn execute(&mut self, cx: &mut PassContext) -> ForgeResult<bool> {
        let logger = cx.logger();
        logger.debug("DeadCodeElimination: analyzing");

        let mut dead: Vec<Address> = Vec::new();
        for range in &cx.holder.liveness.lifetimes {
            if range.usage_count != 0 {
                continue;
            }
            let instr = &cx.holder.code[range.begin];
            if instr.info().has_external_side_effects {
                continue;
            }
            logger.debug(format!(
                "dead: [{}] {}",
                range.begin,
                instr.render(cx.registry, cx.holder.strings()),
            ));
            dead.push(range.begin);
        }

        if dead.is_empty() {
            return Ok(false);
        }

        dead.sort_unstable_by(|a, b| b.cmp(a));
        for addr in dead {
            cx.holder.code.remove(addr);
        }

        cx.holder.rebuild_all(cx.registry)?;
        Ok(true)
    }
}
