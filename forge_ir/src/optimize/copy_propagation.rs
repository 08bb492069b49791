//! Copy propagation within basic blocks.

use std::collections::HashMap;

use forge_common::ForgeResult;

use super::{PassContext, PostProcessStep};
use crate::ir::OpCode;
use crate::value::Value;
use crate::VregId;

/// Replaces register operands with the value most recently assigned to them
/// (`assign`, or an addition of immediate zero), within one basic block.
///
/// Replacement preserves each operand slot's declared type: the vector
/// opcodes in particular derive their element semantics from the operand
/// type, and a propagated scalar must not retype the slot.
pub struct CopyPropagationStep;

impl PostProcessStep for CopyPropagationStep {
    fn execute_on_block(&mut self, cx: &mut PassContext, block: usize) -> ForgeResult<bool> {
        let logger = cx.logger();
        let (begin, end) = {
            let b = &cx.holder.cfg.blocks[block];
            (b.begin, b.end)
        };

        logger.debug(format!("CopyPropagation: analyzing {begin} to {end}"));

        let mut assign_map: HashMap<VregId, Value> = HashMap::new();
        let mut changed = false;

        for addr in begin..end {
            let instr = cx.holder.code[addr];

            let is_add_zero = matches!(instr.op, OpCode::UAdd | OpCode::IAdd)
                && instr.operands[2].is_imm()
                && instr.operands[2].imm_bits().u() == 0;

            if instr.op == OpCode::Assign || is_add_zero {
                let dest = instr.operands[0].reg_id();
                let src = instr.operands[1];

                if !src.is_imm() {
                    if let Some(known) = assign_map.get(&src.reg_id()).copied() {
                        let declared = src.ty();
                        let replacement = known.with_ty(declared);
                        cx.holder.code[addr].operands[1] = replacement;
                        changed = true;
                        assign_map.insert(dest, replacement);
                        continue;
                    }
                }

                assign_map.insert(dest, src);
                continue;
            }

            let assigned = instr.assigns_reg();

            for o in 0..3 {
                let v = cx.holder.code[addr].operands[o];
                if v.is_empty() {
                    break;
                }
                if !v.is_reg() || assigned == Some(v.reg_id()) {
                    continue;
                }
                if let Some(known) = assign_map.get(&v.reg_id()).copied() {
                    logger.debug(format!(
                        "propagating into [{addr}] {}",
                        cx.holder.code[addr].render(cx.registry, cx.holder.strings()),
                    ));
                    cx.holder.code[addr].operands[o] = known.with_ty(v.ty());
                    changed = true;
                }
            }

            if let Some(reg) = assigned {
                // the register now holds a runtime-computed value; whatever
                // the map remembered for it is stale
                assign_map.remove(&reg);
            }
        }

        if changed {
            cx.holder.rebuild_all(cx.registry)?;
            cx.request_repeat();
        }

        Ok(changed)
    }
}
