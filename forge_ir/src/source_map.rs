//! Attribution of emitted instructions back to frontend source spans.

use forge_common::Span;
use serde::{Deserialize, Serialize};

/// One coalesced run of instructions sharing a source span.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceMapEntry {
    pub span: Span,
    pub first_code_index: u32,
    pub last_code_index: u32,
}

/// Maps instruction indices to the source spans they were emitted under.
/// Consecutive instructions sharing the same span collapse into one entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceMap {
    pub entries: Vec<SourceMapEntry>,
}

impl SourceMap {
    pub fn add(&mut self, code_index: u32, span: Span) {
        if let Some(last) = self.entries.last_mut() {
            if last.span.same_range(&span) {
                last.last_code_index = code_index;
                return;
            }
        }

        self.entries.push(SourceMapEntry { span, first_code_index: code_index, last_code_index: code_index });
    }

    pub fn get(&self, code_index: u32) -> Option<&SourceMapEntry> {
        self.entries
            .iter()
            .find(|e| e.first_code_index <= code_index && code_index <= e.last_code_index)
    }
}
