use serde::{Deserialize, Serialize};
use std::fmt;

/// Source location of an AST node. Lines and columns are 1-indexed,
/// the byte offset is 0-indexed. Synthesized nodes carry the sentinel
/// offset -1 and report `is_none()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
    pub offset: i64,
}

impl Position {
    pub fn new(line: u32, column: u32, offset: i64) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }

    /// The "no position" sentinel for synthesized nodes.
    pub fn none() -> Self {
        Self {
            line: 0,
            column: 0,
            offset: -1,
        }
    }

    pub fn is_none(&self) -> bool {
        self.offset < 0
    }

    /// Ordering by byte offset. A sentinel position is never before
    /// anything.
    pub fn before(&self, other: &Position) -> bool {
        !self.is_none() && !other.is_none() && self.offset < other.offset
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "<unknown>")
        } else {
            write!(f, "{}:{}", self.line, self.column)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_ordering() {
        let a = Position::new(1, 1, 0);
        let b = Position::new(1, 5, 4);
        assert!(a.before(&b));
        assert!(!b.before(&a));
        assert!(!Position::none().before(&b));
        assert!(!a.before(&Position::none()));
    }

    #[test]
    fn test_position_display() {
        assert_eq!(Position::new(3, 14, 40).to_string(), "3:14");
        assert_eq!(Position::none().to_string(), "<unknown>");
    }
}
