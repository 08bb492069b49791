//! Source location tracking for the forge toolkit.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a position in source code
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
    pub offset: u32,
}

impl Position {
    pub fn new(line: u32, column: u32, offset: u32) -> Self {
        Self { line, column, offset }
    }

    pub fn start() -> Self {
        Self::new(1, 1, 0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A span of source code, attributed to a resource (file) id.
///
/// The builder keeps one of these as its cursor; every emitted instruction is
/// stamped with the cursor's current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Position,
    pub end: Position,
    pub resource_id: u32,
}

impl Span {
    pub fn new(start: Position, end: Position, resource_id: u32) -> Self {
        Self { start, end, resource_id }
    }

    pub fn single(pos: Position, resource_id: u32) -> Self {
        Self::new(pos, pos, resource_id)
    }

    /// True when two spans cover the same byte range of the same resource.
    /// Line/column are presentation data and do not participate.
    pub fn same_range(&self, other: &Span) -> bool {
        self.resource_id == other.resource_id
            && self.start.offset == other.start.offset
            && self.end.offset == other.end.offset
    }

    pub fn contains(&self, pos: Position) -> bool {
        self.start.offset <= pos.offset && pos.offset <= self.end.offset
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_range_ignores_line_and_column() {
        let a = Span::new(Position::new(1, 1, 10), Position::new(1, 9, 18), 3);
        let b = Span::new(Position::new(2, 7, 10), Position::new(2, 15, 18), 3);
        assert!(a.same_range(&b));

        let c = Span::new(Position::new(1, 1, 10), Position::new(1, 9, 19), 3);
        assert!(!a.same_range(&c));

        let d = Span::new(Position::new(1, 1, 10), Position::new(1, 9, 18), 4);
        assert!(!a.same_range(&d));
    }
}
