//! Common-subexpression elimination within basic blocks.

use forge_common::ForgeResult;

use super::{PassContext, PostProcessStep};
use crate::ir::OpCode;
use crate::value::Value;
use crate::Address;

/// Rewrites a recomputation of an already-available expression into an
/// `assign` from the earlier result.
///
/// Loads are excluded (memory may have changed), as are `assign`/`reserve`
/// (not expressions) and anything with external side effects. A rewrite is
/// only safe when none of the earlier expression's operands (its destination
/// included) has been reassigned in between.
pub struct CommonSubexpressionEliminationStep;

impl PostProcessStep for CommonSubexpressionEliminationStep {
    fn execute_on_block(&mut self, cx: &mut PassContext, block: usize) -> ForgeResult<bool> {
        let logger = cx.logger();
        let (begin, end) = {
            let b = &cx.holder.cfg.blocks[block];
            (b.begin, b.end)
        };

        logger.debug(format!("CommonSubexpressionElimination: analyzing {begin} to {end}"));

        let mut seen: Vec<Address> = Vec::new();
        let mut changed = false;

        for addr in begin..end {
            let instr = cx.holder.code[addr];

            if matches!(instr.op, OpCode::Load | OpCode::Assign | OpCode::Reserve) {
                continue;
            }
            if instr.info().has_external_side_effects {
                continue;
            }
            let Some(assigns_idx) = instr.info().assigns_operand else {
                continue;
            };
            let assigns_idx = assigns_idx as usize;

            for &expr_addr in &seen {
                let expr = cx.holder.code[expr_addr];
                if expr.op != instr.op {
                    continue;
                }
                // the same destination means a reassignment, not a reuse
                if expr.operands[assigns_idx].is_equivalent_to(&instr.operands[assigns_idx], cx.registry) {
                    continue;
                }

                let count = expr.info().operand_count as usize;
                let same_args = (0..count).filter(|o| *o != assigns_idx).all(|o| {
                    let a = &expr.operands[o];
                    let b = &instr.operands[o];
                    a.is_empty() == b.is_empty() && a.is_equivalent_to(b, cx.registry)
                });
                if !same_args {
                    continue;
                }

                // every operand of the earlier expression, its destination
                // included, must be untouched since it ran
                let safe = (0..count).all(|o| {
                    let op = &expr.operands[o];
                    if op.is_empty() || !op.is_reg() {
                        return true;
                    }
                    !((expr_addr + 1)..addr)
                        .any(|c| cx.holder.code[c].assigns_reg() == Some(op.reg_id()))
                });
                if !safe {
                    continue;
                }

                logger.debug(format!(
                    "eliminating [{addr}] {} (previously [{expr_addr}])",
                    instr.render(cx.registry, cx.holder.strings()),
                ));

                let prev_dest = expr.operands[assigns_idx];
                let rewritten = &mut cx.holder.code[addr];
                rewritten.op = OpCode::Assign;
                rewritten.operands[1] = prev_dest;
                rewritten.operands[2] = Value::Empty;
                changed = true;
                break;
            }

            seen.push(addr);
        }

        if changed {
            cx.holder.rebuild_all(cx.registry)?;
            cx.request_repeat();
        }

        Ok(changed)
    }
}
