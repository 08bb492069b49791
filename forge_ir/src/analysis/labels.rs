//! Label id → address index.

use forge_common::{ForgeError, ForgeResult};
use indexmap::IndexMap;

use crate::ir::{Instruction, OpCode};
use crate::{Address, LabelId};

/// Maps each defined label to the address of its `label` instruction.
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
    map: IndexMap<LabelId, Address>,
}

impl LabelMap {
    /// Address of `label`. Looking up an undefined label is an error; pass
    /// rewrites never look up missing labels in well-formed code.
    pub fn get(&self, label: LabelId) -> ForgeResult<Address> {
        self.map
            .get(&label)
            .copied()
            .ok_or(ForgeError::UnknownLabel { label })
    }

    pub fn contains(&self, label: LabelId) -> bool {
        self.map.contains_key(&label)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LabelId, Address)> + '_ {
        self.map.iter().map(|(l, a)| (*l, *a))
    }

    pub fn rebuild(&mut self, code: &[Instruction]) {
        self.map.clear();
        for (addr, i) in code.iter().enumerate() {
            if i.op == OpCode::Label {
                self.map.insert(i.operands[0].label_id(), addr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn rebuild_indexes_every_label_once() {
        let mut code = vec![Instruction::new(OpCode::Noop); 5];
        let mut l1 = Instruction::new(OpCode::Label);
        l1.operands[0] = Value::label(1);
        let mut l2 = Instruction::new(OpCode::Label);
        l2.operands[0] = Value::label(2);
        code[1] = l1;
        code[4] = l2;

        let mut map = LabelMap::default();
        map.rebuild(&code);

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(1).unwrap(), 1);
        assert_eq!(map.get(2).unwrap(), 4);
        assert!(map.get(3).is_err());
    }
}
