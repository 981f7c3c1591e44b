//! Terminal size types.

use serde::{Deserialize, Serialize};

/// Size of a pseudo-terminal in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Number of columns
    pub cols: u16,
    /// Number of rows
    pub rows: u16,
}

impl Dimensions {
    /// Create new dimensions from columns and rows.
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Whether either side is zero.
    pub fn is_empty(&self) -> bool {
        self.cols == 0 || self.rows == 0
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions_default() {
        let dims = Dimensions::default();
        assert_eq!(dims.cols, 80);
        assert_eq!(dims.rows, 24);
    }

    #[test]
    fn test_dimensions_display() {
        assert_eq!(Dimensions::new(120, 40).to_string(), "120x40");
    }

    #[test]
    fn test_dimensions_is_empty() {
        assert!(Dimensions::new(0, 24).is_empty());
        assert!(Dimensions::new(80, 0).is_empty());
        assert!(!Dimensions::new(1, 1).is_empty());
    }
}
