//! Register liveness: per-register lifetime ranges and usage counts.

use forge_common::ForgeResult;
use indexmap::IndexMap;

use super::labels::LabelMap;
use crate::ir::{Instruction, OpCode};
use crate::registry::Registry;
use crate::{Address, VregId};

/// One live range `[begin, end]` of a register: `begin` is the assigning
/// instruction's address, `end` the last address that reads the value. A
/// register may have several disjoint ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterLifetime {
    pub reg: VregId,
    pub begin: Address,
    pub end: Address,
    /// Number of reads within the range. Zero iff the defining instruction
    /// is dead.
    pub usage_count: u16,
    pub is_fp: bool,
}

impl RegisterLifetime {
    pub fn contains(&self, at: Address) -> bool {
        self.begin <= at && at <= self.end
    }

    pub fn is_concurrent(&self, other: &RegisterLifetime) -> bool {
        self.begin <= other.end && other.begin <= self.end
    }
}

/// Lifetimes of every assigned register in a code sequence.
#[derive(Debug, Clone, Default)]
pub struct LivenessData {
    pub lifetimes: Vec<RegisterLifetime>,
    reg_ranges: IndexMap<VregId, Vec<usize>>,
}

impl LivenessData {
    pub fn ranges_of(&self, reg: VregId) -> Vec<&RegisterLifetime> {
        match self.reg_ranges.get(&reg) {
            Some(indices) => indices.iter().map(|i| &self.lifetimes[*i]).collect(),
            None => Vec::new(),
        }
    }

    pub fn is_live(&self, reg: VregId, at: Address) -> bool {
        self.get_live_range(reg, at).is_some()
    }

    pub fn get_live_range(&self, reg: VregId, at: Address) -> Option<&RegisterLifetime> {
        self.reg_ranges
            .get(&reg)?
            .iter()
            .map(|i| &self.lifetimes[*i])
            .find(|r| r.contains(at))
    }

    pub fn rebuild(&mut self, code: &[Instruction], labels: &LabelMap, registry: &Registry) -> ForgeResult<()> {
        self.lifetimes.clear();
        self.reg_ranges.clear();
        if code.is_empty() {
            return Ok(());
        }

        for (addr, instr) in code.iter().enumerate() {
            let Some(assigned) = instr.assigns() else {
                continue;
            };
            let reg = assigned.reg_id();
            if reg == crate::NULL_REGISTER {
                continue;
            }

            // an address already covered by one of the register's ranges
            // does not open a new one
            if self
                .reg_ranges
                .get(&reg)
                .is_some_and(|rs| rs.iter().any(|i| self.lifetimes[*i].contains(addr)))
            {
                continue;
            }

            let mut range = RegisterLifetime {
                reg,
                begin: addr,
                end: addr,
                usage_count: 0,
                is_fp: registry.info(assigned.ty()).is_floating_point,
            };

            let mut recalc = true;
            while recalc {
                // extend forward over uses; a reassignment that also reads
                // the register extends the range, a pure reassignment ends it
                for (scan, i1) in code.iter().enumerate().skip(range.end + 1) {
                    if i1.assigns_reg() == Some(range.reg) {
                        if i1.involves(range.reg, true) {
                            range.usage_count += 1;
                            range.end = scan;
                            continue;
                        }
                        break;
                    }

                    if i1.involves(range.reg, false) {
                        range.end = scan;
                        range.usage_count += 1;
                    }
                }

                // a backward jump or branch into the live range extends it
                // over the jump site; repeat until stable
                recalc = false;
                for (scan, i1) in code.iter().enumerate().skip(range.end + 1) {
                    let target = match i1.op {
                        OpCode::Jump => labels.get(i1.operands[0].label_id())?,
                        OpCode::Branch => labels.get(i1.operands[1].label_id())?,
                        _ => continue,
                    };
                    if target > scan {
                        continue;
                    }
                    if range.begin < target && range.end >= target && range.end < scan {
                        range.end = scan;
                        recalc = true;
                    }
                }
            }

            self.reg_ranges.entry(range.reg).or_default().push(self.lifetimes.len());
            self.lifetimes.push(range);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeId;
    use crate::value::{Immediate, Value};
    use pretty_assertions::assert_eq;

    fn assign_imm(dst: u32, v: i32) -> Instruction {
        let mut i = Instruction::new(OpCode::Assign);
        i.operands[0] = Value::reg(dst, TypeId::I32);
        i.operands[1] = Value::imm(TypeId::I32, Immediate::of_i32(v));
        i
    }

    fn iadd(dst: u32, a: u32, b: u32) -> Instruction {
        let mut i = Instruction::new(OpCode::IAdd);
        i.operands[0] = Value::reg(dst, TypeId::I32);
        i.operands[1] = Value::reg(a, TypeId::I32);
        i.operands[2] = Value::reg(b, TypeId::I32);
        i
    }

    fn rebuild(code: &[Instruction]) -> LivenessData {
        let registry = Registry::new();
        let mut labels = LabelMap::default();
        labels.rebuild(code);
        let mut l = LivenessData::default();
        l.rebuild(code, &labels, &registry).unwrap();
        l
    }

    #[test]
    fn uses_extend_ranges_and_count() {
        // 0: r1 = 1
        // 1: r2 = 2
        // 2: r3 = r1 + r2
        // 3: r3 = r3 + r1   (reassign-with-use)
        let code = vec![assign_imm(1, 1), assign_imm(2, 2), iadd(3, 1, 2), iadd(3, 3, 1)];
        let l = rebuild(&code);

        let r1 = l.ranges_of(1);
        assert_eq!(r1.len(), 1);
        assert_eq!((r1[0].begin, r1[0].end, r1[0].usage_count), (0, 3, 2));

        let r3 = l.ranges_of(3);
        assert_eq!(r3.len(), 1);
        assert_eq!((r3[0].begin, r3[0].end, r3[0].usage_count), (2, 3, 1));
    }

    #[test]
    fn pure_reassignment_splits_ranges() {
        // 0: r1 = 1
        // 1: r2 = r1 + r1
        // 2: r1 = 5          (pure reassignment: new range)
        // 3: r2 = r1 + r1
        let code = vec![assign_imm(1, 1), iadd(2, 1, 1), assign_imm(1, 5), iadd(2, 1, 1)];
        let l = rebuild(&code);

        let r1 = l.ranges_of(1);
        assert_eq!(r1.len(), 2);
        assert_eq!((r1[0].begin, r1[0].end), (0, 1));
        assert_eq!((r1[1].begin, r1[1].end), (2, 3));
        assert!(l.is_live(1, 1));
        assert!(l.is_live(1, 2));
        assert!(!l.is_live(2, 0));
    }

    #[test]
    fn zero_usage_means_dead() {
        let code = vec![assign_imm(1, 1), assign_imm(2, 2), iadd(3, 2, 2)];
        let l = rebuild(&code);
        let r1 = l.ranges_of(1);
        assert_eq!(r1[0].usage_count, 0);
        let r2 = l.ranges_of(2);
        assert_eq!(r2[0].usage_count, 1);
    }

    #[test]
    fn backward_branches_extend_crossed_ranges() {
        // 0: r1 = 0
        // 1: label 1
        // 2: r2 = r1 + r1
        // 3: branch r2 -> label 1 (backward)
        // 4: r3 = r1 + r1
        let mut branch = Instruction::new(OpCode::Branch);
        branch.operands[0] = Value::reg(2, TypeId::BOOL);
        branch.operands[1] = Value::label(1);
        let mut label = Instruction::new(OpCode::Label);
        label.operands[0] = Value::label(1);

        let code = vec![assign_imm(1, 0), label, iadd(2, 1, 1), branch, iadd(3, 1, 1)];
        let l = rebuild(&code);

        // r2's range [2, ..) is crossed by the backward branch at 3 into
        // address 2, extending it over the branch
        let r2 = l.ranges_of(2);
        assert_eq!(r2.len(), 1);
        assert_eq!(r2[0].end, 3);

        let r1 = l.ranges_of(1);
        assert_eq!(r1[0].end, 4);
    }

    #[test]
    fn every_use_lies_within_a_range() {
        let code = vec![assign_imm(1, 1), assign_imm(2, 2), iadd(3, 1, 2), iadd(4, 3, 1)];
        let l = rebuild(&code);

        for (addr, i) in code.iter().enumerate() {
            for reg in 1..=4u32 {
                if i.involves(reg, true) {
                    assert!(l.is_live(reg, addr), "use of r{reg} at {addr} outside every range");
                }
            }
        }
    }
}
