//! Redundant load/store reduction over straight-line regions.

use std::collections::HashMap;

use forge_common::ForgeResult;

use super::{PassContext, PostProcessStep};
use crate::ir::OpCode;
use crate::value::Value;
use crate::{Address, VregId};

#[derive(Clone, Copy)]
struct LoadInfo {
    loaded_at: Address,
    loaded_to: Value,
    was_overwritten: bool,
}

#[derive(Clone, Copy)]
struct StoreInfo {
    stored_at: Address,
    source: Value,
}

fn unmodified_since(last_assign: &HashMap<VregId, Address>, reg: VregId, since: Address) -> bool {
    match last_assign.get(&reg) {
        Some(at) => *at < since,
        None => true,
    }
}

/// Eliminates loads whose value is already in a register and stores that
/// repeat the memory's current contents.
///
/// Tracking is keyed by the address register and reset at any instruction
/// with external side effects; per-operand side-effect flags evict only the
/// affected registers. Loads and stores with a non-zero immediate offset are
/// not considered, a known limitation of keying the tracking on the bare
/// address register.
pub struct ReduceMemoryAccessStep;

impl PostProcessStep for ReduceMemoryAccessStep {
    fn execute(&mut self, cx: &mut PassContext) -> ForgeResult<bool> {
        let logger = cx.logger();
        logger.debug("ReduceMemoryAccess: analyzing");

        let mut load_map: HashMap<VregId, LoadInfo> = HashMap::new();
        let mut store_map: HashMap<VregId, StoreInfo> = HashMap::new();
        // last address at which a register was assigned
        let mut last_assign: HashMap<VregId, Address> = HashMap::new();

        let mut remove: Vec<Address> = Vec::new();
        let mut changed = false;

        let code_len = cx.holder.code.len();
        for addr in 0..code_len {
            let instr = cx.holder.code[addr];

            match instr.op {
                OpCode::Load => {
                    if instr.operands[2].imm_bits().u() != 0 {
                        continue;
                    }

                    let dest = instr.operands[0];
                    let to = dest.reg_id();
                    let from = instr.operands[1].reg_id();

                    // a load whose result is never read is simply dropped
                    let is_used = ((addr + 1)..code_len)
                        .any(|c| cx.holder.code[c].involves(to, true));
                    if !is_used {
                        logger.debug(format!("[{addr}] unnecessary load (loaded value unused)"));
                        remove.push(addr);
                        changed = true;
                        continue;
                    }

                    let prev_load = load_map.get(&from).copied();
                    let prev_store = store_map.get(&from).copied();
                    let mut handled = false;

                    // prefer the most recent producer: a store that happened
                    // after the last load wins
                    let store_is_current = match (&prev_load, &prev_store) {
                        (Some(l), Some(s)) => s.stored_at > l.loaded_at,
                        (None, Some(_)) => true,
                        _ => false,
                    };

                    if store_is_current {
                        let ps = prev_store.unwrap();
                        if ps.source.is_reg() {
                            if ps.source.reg_id() == to {
                                // the destination still holds what was stored here
                                if unmodified_since(&last_assign, to, ps.stored_at) {
                                    logger.debug(format!(
                                        "[{addr}] unnecessary load (destination unmodified since being stored)",
                                    ));
                                    remove.push(addr);
                                    handled = true;
                                    changed = true;
                                }
                            } else if unmodified_since(&last_assign, ps.source.reg_id(), ps.stored_at) {
                                // another register still holds the stored value
                                logger.debug(format!(
                                    "[{addr}] unnecessary load (stored value still in a register)",
                                ));
                                cx.holder.code[addr].op = OpCode::Assign;
                                cx.holder.code[addr].operands[1] = ps.source;
                                cx.holder.code[addr].operands[2] = Value::Empty;
                                last_assign.insert(to, addr);
                                handled = true;
                                changed = true;
                            }
                        } else if ps.source.is_imm() {
                            // the stored value was a constant
                            logger.debug(format!("[{addr}] unnecessary load (stored value was a constant)"));
                            cx.holder.code[addr].op = OpCode::Assign;
                            cx.holder.code[addr].operands[1] = ps.source;
                            cx.holder.code[addr].operands[2] = Value::Empty;
                            last_assign.insert(to, addr);
                            handled = true;
                            changed = true;
                        } else {
                            handled = true;
                        }
                    }

                    if !handled {
                        if let Some(pl) = prev_load {
                            if pl.loaded_to.reg_id() == to {
                                // this register already received this load
                                if !pl.was_overwritten
                                    && match last_assign.get(&to) {
                                        Some(at) => *at <= pl.loaded_at,
                                        None => true,
                                    }
                                {
                                    logger.debug(format!(
                                        "[{addr}] unnecessary load (destination already holds this memory)",
                                    ));
                                    remove.push(addr);
                                    handled = true;
                                    changed = true;
                                }
                            } else if !pl.was_overwritten
                                && unmodified_since(&last_assign, pl.loaded_to.reg_id(), pl.loaded_at)
                            {
                                // another register already holds this memory
                                logger.debug(format!(
                                    "[{addr}] unnecessary load (loaded value still in a register)",
                                ));
                                cx.holder.code[addr].op = OpCode::Assign;
                                cx.holder.code[addr].operands[1] = pl.loaded_to;
                                cx.holder.code[addr].operands[2] = Value::Empty;
                                last_assign.insert(to, addr);
                                handled = true;
                                changed = true;
                            }
                        }
                    }

                    if !handled {
                        load_map.insert(from, LoadInfo { loaded_at: addr, loaded_to: dest, was_overwritten: false });
                        last_assign.insert(to, addr);
                    }
                }
                OpCode::Store => {
                    if instr.operands[2].imm_bits().u() != 0 {
                        continue;
                    }

                    let source = instr.operands[0];
                    let at = instr.operands[1].reg_id();

                    let prev_load = load_map.get(&at).copied();
                    let prev_store = store_map.get(&at).copied();
                    let mut handled = false;

                    let store_is_current = match (&prev_load, &prev_store) {
                        (Some(l), Some(s)) => s.stored_at > l.loaded_at,
                        (None, Some(_)) => true,
                        _ => false,
                    };

                    if store_is_current {
                        let ps = prev_store.unwrap();
                        if ps.source.is_reg() {
                            if ps.source.is_equivalent_to(&source, cx.registry)
                                && match last_assign.get(&ps.source.reg_id()) {
                                    Some(a) => *a < ps.stored_at,
                                    None => true,
                                }
                            {
                                logger.debug(format!(
                                    "[{addr}] unnecessary store (source and destination unmodified since the identical store)",
                                ));
                                remove.push(addr);
                                handled = true;
                                changed = true;
                            }
                        } else if ps.source.is_imm() && source.is_equivalent_to(&ps.source, cx.registry) {
                            logger.debug(format!(
                                "[{addr}] unnecessary store (destination already holds this constant)",
                            ));
                            remove.push(addr);
                            handled = true;
                            changed = true;
                        }
                    } else if let Some(pl) = prev_load {
                        // storing back the value loaded from this address
                        if pl.loaded_to.is_equivalent_to(&source, cx.registry)
                            && match last_assign.get(&pl.loaded_to.reg_id()) {
                                Some(a) => *a <= pl.loaded_at,
                                None => true,
                            }
                        {
                            logger.debug(format!(
                                "[{addr}] unnecessary store (source was loaded from the destination)",
                            ));
                            remove.push(addr);
                            handled = true;
                            changed = true;
                        }
                    }

                    if !handled {
                        store_map.insert(at, StoreInfo { stored_at: addr, source });
                        if let Some(pl) = load_map.get_mut(&at) {
                            pl.was_overwritten = true;
                        }
                    }
                }
                _ => {
                    let info = instr.info();
                    if info.has_external_side_effects {
                        load_map.clear();
                        store_map.clear();
                    } else {
                        for o in 0..3 {
                            if info.operand_side_effects[o] && !instr.operands[o].is_empty() {
                                load_map.remove(&instr.operands[o].reg_id());
                                store_map.remove(&instr.operands[o].reg_id());
                            }
                        }
                        if let Some(reg) = instr.assigns_reg() {
                            last_assign.insert(reg, addr);
                        }
                    }
                }
            }
        }

        if !remove.is_empty() {
            remove.sort_unstable_by(|a, b| b.cmp(a));
            for addr in remove {
                cx.holder.code.remove(addr);
            }
            cx.holder.rebuild_all(cx.registry)?;
        }

        if changed {
            cx.request_repeat();
        }

        Ok(false)
    }
}
