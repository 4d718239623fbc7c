//! Source locations for the sofa IR.
//!
//! Programs reach the fusion pass as serialized IR, so locations are kept
//! as line/column pairs rather than byte offsets into a buffer we never
//! see. Every expression node carries a [`Span`]; diagnostics produced by
//! the pass point back at it.

#![warn(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// A 1-based line/column position. Line 0 means "unknown".
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Pos {
    /// Line number.
    pub line: u32,
    /// Column number.
    pub column: u32,
}

impl Pos {
    /// The unknown position.
    pub const UNKNOWN: Self = Self { line: 0, column: 0 };

    /// Create a new position.
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// Whether this position refers to real source.
    #[must_use]
    pub const fn is_known(self) -> bool {
        self.line != 0
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A source range from `start` to `end`, both inclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// First position covered.
    pub start: Pos,
    /// Last position covered.
    pub end: Pos,
}

impl Span {
    /// A span for synthesized code with no source counterpart.
    pub const DUMMY: Self = Self {
        start: Pos::UNKNOWN,
        end: Pos::UNKNOWN,
    };

    /// Create a new span.
    #[must_use]
    pub const fn new(start: Pos, end: Pos) -> Self {
        Self { start, end }
    }

    /// A span covering a single position.
    #[must_use]
    pub const fn point(line: u32, column: u32) -> Self {
        let pos = Pos::new(line, column);
        Self {
            start: pos,
            end: pos,
        }
    }

    /// Whether this is the dummy span.
    #[must_use]
    pub const fn is_dummy(self) -> bool {
        !self.start.is_known()
    }

    /// The smallest span covering both `self` and `other`.
    ///
    /// A dummy span is absorbed by a real one.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        match (self.is_dummy(), other.is_dummy()) {
            (true, _) => other,
            (_, true) => self,
            _ => Self {
                start: self.start.min(other.start),
                end: self.end.max(other.end),
            },
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dummy() {
            f.write_str("<unknown>")
        } else if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}
