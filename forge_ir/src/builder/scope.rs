//! Scope bookkeeping: stack allocations that must be destroyed and freed on
//! every control-flow exit, and the loop labels `continue`/`break` target.
//!
//! Scopes form an explicit parent-linked stack owned by the builder. A scope
//! may *escape* exactly once: escaping destructs each tracked stack pointer
//! in reverse emission order and frees every owned stack id not already freed
//! by a destructor. `loop_continue`/`loop_break` replay each intervening
//! scope's escape instructions before jumping, without consuming the scopes.

use forge_common::ForgeResult;
use indexmap::IndexSet;

use super::FunctionBuilder;
use crate::value::Value;
use crate::{LabelId, StackId, NULL_STACK};

/// One scope's owned state.
#[derive(Debug, Clone, Default)]
pub struct ScopeRecord {
    stack_ids: IndexSet<StackId>,
    stack_ptrs: Vec<Value>,
    continue_label: Option<LabelId>,
    break_label: Option<LabelId>,
    escaped: bool,
}

impl ScopeRecord {
    pub(crate) fn root() -> Self {
        Self::default()
    }

    fn add_ptr(&mut self, ptr: Value) {
        // multiple stack pointers to the same allocation all point at the
        // same memory, one is enough
        if self.stack_ptrs.iter().any(|p| p.stack_ref() == ptr.stack_ref()) {
            return;
        }
        self.stack_ptrs.push(ptr);
    }

    fn remove(&mut self, id: StackId) {
        self.stack_ids.shift_remove(&id);
        self.stack_ptrs.retain(|p| p.stack_ref() != id);
    }
}

impl FunctionBuilder<'_> {
    /// Opens a new scope. Stack allocations emitted while it is current are
    /// owned by it.
    pub fn push_scope(&mut self) {
        self.scopes.push(ScopeRecord::default());
    }

    /// Closes the current scope, escaping it first if it has not escaped.
    pub fn pop_scope(&mut self) -> ForgeResult<()> {
        if self.scopes.len() == 1 {
            return Err(self.verr("pop_scope - the root scope cannot be popped"));
        }
        if !self.scopes.last().unwrap().escaped {
            self.escape_scope()?;
        }
        self.scopes.pop();
        Ok(())
    }

    /// Emits destruction and `stack_free` for everything the current scope
    /// owns. Each scope can only be escaped one time.
    pub fn escape_scope(&mut self) -> ForgeResult<()> {
        let top = self.scopes.len() - 1;
        if self.scopes[top].escaped {
            return Err(self.verr("escape_scope - scope has already been escaped"));
        }
        self.emit_escape_instructions(top)?;
        self.scopes[top].escaped = true;
        Ok(())
    }

    /// Escapes the current scope while transferring `value`'s stack id and
    /// pointer to the parent scope, so the value survives the cleanup.
    pub fn escape_scope_with(&mut self, value: &Value) -> ForgeResult<()> {
        let top = self.scopes.len() - 1;
        if self.scopes[top].escaped {
            return Err(self.verr("escape_scope_with - scope has already been escaped"));
        }
        if top == 0 {
            return Err(self.verr(
                "escape_scope_with - escaping the root scope with a value would leave it neither destroyed nor freed",
            ));
        }

        let stack_ref = value.stack_ref();
        if stack_ref == NULL_STACK || !self.scopes[top].stack_ids.contains(&stack_ref) {
            return self.escape_scope();
        }

        let ptr = self.scopes[top]
            .stack_ptrs
            .iter()
            .copied()
            .find(|p| p.stack_ref() == stack_ref);

        let parent = top - 1;
        self.scopes[parent].stack_ids.insert(stack_ref);
        if let Some(ptr) = ptr {
            self.scopes[parent].add_ptr(ptr);
        }
        self.scopes[top].remove(stack_ref);

        self.escape_scope()
    }

    pub fn scope_escaped(&self) -> bool {
        self.scopes.last().unwrap().escaped
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    /// Sets the label control jumps to when a loop iteration should restart.
    pub fn set_loop_continue_label(&mut self, label: LabelId) {
        self.scopes.last_mut().unwrap().continue_label = Some(label);
    }

    /// Sets the label control jumps to when a loop should be left entirely.
    pub fn set_loop_break_label(&mut self, label: LabelId) {
        self.scopes.last_mut().unwrap().break_label = Some(label);
    }

    /// Nearest enclosing continue label, if any scope carries one.
    pub fn loop_continue_label(&self) -> Option<LabelId> {
        self.scopes.iter().rev().find_map(|s| s.continue_label)
    }

    /// Nearest enclosing break label, if any scope carries one.
    pub fn loop_break_label(&self) -> Option<LabelId> {
        self.scopes.iter().rev().find_map(|s| s.break_label)
    }

    /// Emits cleanup for every scope between the current one and the nearest
    /// loop scope, then jumps to the loop's continue label.
    pub fn loop_continue(&mut self) -> ForgeResult<()> {
        self.loop_exit(|s| s.continue_label, "loop_continue - continue label is unset in the current scope and all parent scopes")
    }

    /// Emits cleanup for every scope between the current one and the nearest
    /// loop scope, then jumps to the loop's break label.
    pub fn loop_break(&mut self) -> ForgeResult<()> {
        self.loop_exit(|s| s.break_label, "loop_break - break label is unset in the current scope and all parent scopes")
    }

    fn loop_exit(
        &mut self,
        label_of: impl Fn(&ScopeRecord) -> Option<LabelId>,
        missing_msg: &str,
    ) -> ForgeResult<()> {
        for index in (0..self.scopes.len()).rev() {
            self.emit_escape_instructions(index)?;
            if let Some(label) = label_of(&self.scopes[index]) {
                self.jump(label)?;
                return Ok(());
            }
        }
        Err(self.verr(missing_msg))
    }

    /// Emits the escape instructions of every open scope, innermost first,
    /// without consuming any of them. Used before `ret`.
    pub fn emit_pre_return_instructions(&mut self) -> ForgeResult<()> {
        for index in (0..self.scopes.len()).rev() {
            self.emit_escape_instructions(index)?;
        }
        Ok(())
    }

    fn emit_escape_instructions(&mut self, index: usize) -> ForgeResult<()> {
        let ptrs: Vec<Value> = self.scopes[index].stack_ptrs.clone();
        let ids: Vec<StackId> = self.scopes[index].stack_ids.iter().copied().collect();

        let mut freed = IndexSet::new();
        for ptr in ptrs.iter().rev() {
            self.generate_destruction(ptr)?;
            let id = ptr.stack_ref();
            self.stack_free(id)?;
            freed.insert(id);
        }

        for id in ids {
            if freed.contains(&id) {
                continue;
            }
            self.stack_free(id)?;
        }

        Ok(())
    }

    pub(crate) fn scope_track_alloc(&mut self, id: StackId) {
        self.scopes.last_mut().unwrap().stack_ids.insert(id);
    }

    pub(crate) fn scope_track_ptr(&mut self, ptr: Value) {
        self.scopes.last_mut().unwrap().add_ptr(ptr);
    }
}
