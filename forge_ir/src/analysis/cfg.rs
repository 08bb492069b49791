//! Basic-block partition and control-flow edges.

use forge_common::ForgeResult;
use smallvec::SmallVec;

use super::labels::LabelMap;
use crate::ir::{Instruction, OpCode};
use crate::Address;

/// A maximal straight-line instruction run `[begin, end)`. Blocks end
/// immediately before a `label` (except a leading one) and immediately after
/// a `jump` or `branch`.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub begin: Address,
    pub end: Address,
    /// Indices of predecessor blocks.
    pub from: SmallVec<[u32; 2]>,
    /// Indices of successor blocks.
    pub to: SmallVec<[u32; 2]>,
}

impl BasicBlock {
    pub fn contains(&self, addr: Address) -> bool {
        self.begin <= addr && addr < self.end
    }

    /// Whether control can flow from this block back to itself.
    pub fn is_loop(&self, graph: &ControlFlowGraph) -> bool {
        let Some(self_idx) = graph.block_index_at(self.begin) else {
            return false;
        };

        let mut explored = vec![false; graph.blocks.len()];
        let mut stack: Vec<u32> = self.to.to_vec();
        while let Some(b) = stack.pop() {
            if b as usize == self_idx {
                return true;
            }
            if explored[b as usize] {
                continue;
            }
            explored[b as usize] = true;
            stack.extend(graph.blocks[b as usize].to.iter().copied());
        }
        false
    }
}

/// Basic blocks plus reciprocal predecessor/successor edges.
#[derive(Debug, Clone, Default)]
pub struct ControlFlowGraph {
    pub blocks: Vec<BasicBlock>,
}

impl ControlFlowGraph {
    pub fn block_at(&self, addr: Address) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.begin == addr)
    }

    pub fn block_index_at(&self, addr: Address) -> Option<usize> {
        self.blocks.iter().position(|b| b.begin == addr)
    }

    pub fn rebuild(&mut self, code: &[Instruction], labels: &LabelMap) -> ForgeResult<()> {
        self.blocks.clear();
        if code.is_empty() {
            return Ok(());
        }

        // partition into blocks
        let mut block = BasicBlock::default();
        let mut pending = true;
        for (addr, i) in code.iter().enumerate() {
            pending = true;
            block.end = addr + 1;

            match i.op {
                OpCode::Label => {
                    if addr == block.begin {
                        continue;
                    }
                    block.end = addr;
                    self.blocks.push(std::mem::take(&mut block));
                    block.begin = addr;
                    block.end = addr + 1;
                }
                OpCode::Jump | OpCode::Branch => {
                    let next = block.end;
                    self.blocks.push(std::mem::take(&mut block));
                    block.begin = next;
                    pending = false;
                }
                _ => {}
            }
        }
        if pending {
            self.blocks.push(block);
        }

        // connect edges
        for b in 0..self.blocks.len() {
            let terminator: Instruction = code[self.blocks[b].end - 1];
            match terminator.op {
                OpCode::Jump => {
                    let target = labels.get(terminator.operands[0].label_id())?;
                    self.link(b, target);
                }
                OpCode::Branch => {
                    // false edge through the label, true edge falls through
                    let target = labels.get(terminator.operands[1].label_id())?;
                    self.link(b, target);
                    if b + 1 < self.blocks.len() {
                        let next_begin = self.blocks[b + 1].begin;
                        self.link(b, next_begin);
                    }
                }
                _ => {
                    if b + 1 < self.blocks.len() {
                        let next_begin = self.blocks[b + 1].begin;
                        self.link(b, next_begin);
                    }
                }
            }
        }

        Ok(())
    }

    fn link(&mut self, from_block: usize, target_addr: Address) {
        let Some(target) = self.block_index_at(target_addr) else {
            return;
        };
        self.blocks[from_block].to.push(target as u32);
        self.blocks[target].from.push(from_block as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn label_at(id: u32) -> Instruction {
        let mut i = Instruction::new(OpCode::Label);
        i.operands[0] = Value::label(id);
        i
    }

    fn jump_to(id: u32) -> Instruction {
        let mut i = Instruction::new(OpCode::Jump);
        i.operands[0] = Value::label(id);
        i
    }

    fn branch_to(id: u32) -> Instruction {
        let mut i = Instruction::new(OpCode::Branch);
        i.operands[0] = Value::reg(1, crate::registry::TypeId::BOOL);
        i.operands[1] = Value::label(id);
        i
    }

    fn rebuild(code: &[Instruction]) -> ControlFlowGraph {
        let mut labels = LabelMap::default();
        labels.rebuild(code);
        let mut cfg = ControlFlowGraph::default();
        cfg.rebuild(code, &labels).unwrap();
        cfg
    }

    #[test]
    fn straight_line_code_is_one_block() {
        let code = vec![Instruction::new(OpCode::Noop); 4];
        let cfg = rebuild(&code);
        assert_eq!(cfg.blocks.len(), 1);
        assert_eq!(cfg.blocks[0].begin, 0);
        assert_eq!(cfg.blocks[0].end, 4);
        assert!(cfg.blocks[0].to.is_empty());
    }

    #[test]
    fn branch_has_label_and_fall_through_edges() {
        // 0: noop
        // 1: branch -> label 1 (false)
        // 2: noop          (true path)
        // 3: label 1
        // 4: noop
        let code = vec![
            Instruction::new(OpCode::Noop),
            branch_to(1),
            Instruction::new(OpCode::Noop),
            label_at(1),
            Instruction::new(OpCode::Noop),
        ];
        let cfg = rebuild(&code);

        assert_eq!(cfg.blocks.len(), 3);
        let first = &cfg.blocks[0];
        assert_eq!(first.to.len(), 2);
        assert!(first.to.contains(&2)); // label block
        assert!(first.to.contains(&1)); // fall-through

        // edges are reciprocal
        for (bi, b) in cfg.blocks.iter().enumerate() {
            for t in &b.to {
                assert!(cfg.blocks[*t as usize].from.contains(&(bi as u32)));
            }
            for f in &b.from {
                assert!(cfg.blocks[*f as usize].to.contains(&(bi as u32)));
            }
        }
    }

    #[test]
    fn backward_jump_forms_a_loop() {
        // 0: label 1
        // 1: noop
        // 2: jump -> label 1
        // 3: noop
        let code = vec![label_at(1), Instruction::new(OpCode::Noop), jump_to(1), Instruction::new(OpCode::Noop)];
        let cfg = rebuild(&code);

        assert_eq!(cfg.blocks.len(), 2);
        assert!(cfg.blocks[0].is_loop(&cfg));
        assert!(!cfg.blocks[1].is_loop(&cfg));
    }

    #[test]
    fn every_block_starts_at_zero_or_after_a_terminator_or_at_a_label() {
        let code = vec![
            Instruction::new(OpCode::Noop),
            branch_to(1),
            jump_to(2),
            label_at(1),
            Instruction::new(OpCode::Noop),
            label_at(2),
            Instruction::new(OpCode::Noop),
        ];
        let cfg = rebuild(&code);

        for b in &cfg.blocks {
            let ok = b.begin == 0
                || code[b.begin].op == OpCode::Label
                || matches!(code[b.begin - 1].op, OpCode::Jump | OpCode::Branch);
            assert!(ok, "block at {} does not start at a boundary", b.begin);
        }
    }
}
