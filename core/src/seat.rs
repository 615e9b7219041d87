//! Seat coordinate math.
//!
//! A seat is addressed by a row label and a column label:
//!
//! - the row label is a bijective base-26 letter sequence (`A` = 1 ... `Z` = 26,
//!   `AA` = 27, ...), case-insensitive, turned into a zero-based row index;
//! - the column label is a 1-based decimal integer, turned into a zero-based
//!   column index.
//!
//! The bit holding the seat in the zone bitmap is
//! `row_index * seats_per_row + col_index`. Occupy and release both go through
//! [`SeatCoordinate`], so they always agree on the bit.
//!
//! ```
//! use seatguard_core::seat::SeatCoordinate;
//!
//! let seat = SeatCoordinate::parse("AB", "1")?;
//! assert_eq!(seat.row_index(), 27);
//! assert_eq!(seat.bit_index(30), 810);
//! # Ok::<(), seatguard_core::seat::SeatError>(())
//! ```

use thiserror::Error;

/// Malformed seat labels.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeatError {
    /// Row label was empty
    #[error("Row label is empty")]
    EmptyRow,

    /// Row label contained something other than ASCII letters
    #[error("Invalid row label '{0}': only letters A-Z are allowed")]
    InvalidRow(String),

    /// Row label encodes an index that does not fit in 32 bits
    #[error("Row label '{0}' is too long")]
    RowOverflow(String),

    /// Column label was not a positive integer
    #[error("Invalid column label '{0}': expected a positive integer")]
    InvalidColumn(String),
}

/// Zero-based position of a seat inside its zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SeatCoordinate {
    row_index: u32,
    col_index: u32,
}

impl SeatCoordinate {
    /// Build a coordinate from zero-based indices.
    #[must_use]
    pub const fn new(row_index: u32, col_index: u32) -> Self {
        Self {
            row_index,
            col_index,
        }
    }

    /// Parse row and column labels.
    ///
    /// # Errors
    ///
    /// Returns [`SeatError`] when either label is malformed.
    pub fn parse(row: &str, column: &str) -> Result<Self, SeatError> {
        Ok(Self {
            row_index: row_label_to_index(row)?,
            col_index: column_label_to_index(column)?,
        })
    }

    /// Zero-based row index.
    #[must_use]
    pub const fn row_index(&self) -> u32 {
        self.row_index
    }

    /// Zero-based column index.
    #[must_use]
    pub const fn col_index(&self) -> u32 {
        self.col_index
    }

    /// Bit position inside the zone bitmap.
    #[must_use]
    pub const fn bit_index(&self, seats_per_row: u32) -> u64 {
        self.row_index as u64 * seats_per_row as u64 + self.col_index as u64
    }

    /// Whether the seat exists in a zone of the given shape.
    #[must_use]
    pub const fn fits(&self, row_count: u32, seats_per_row: u32) -> bool {
        self.row_index < row_count && self.col_index < seats_per_row
    }
}

/// Convert a row label into its zero-based index.
///
/// # Errors
///
/// Returns [`SeatError::EmptyRow`], [`SeatError::InvalidRow`] or
/// [`SeatError::RowOverflow`].
#[allow(clippy::cast_possible_truncation)]
pub fn row_label_to_index(label: &str) -> Result<u32, SeatError> {
    let label = label.trim();
    if label.is_empty() {
        return Err(SeatError::EmptyRow);
    }

    let mut value: u64 = 0;
    for c in label.chars() {
        if !c.is_ascii_alphabetic() {
            return Err(SeatError::InvalidRow(label.to_string()));
        }
        let digit = u64::from(c.to_ascii_uppercase() as u8 - b'A' + 1);
        value = value * 26 + digit;
        if value > u64::from(u32::MAX) {
            return Err(SeatError::RowOverflow(label.to_string()));
        }
    }

    // value >= 1 and <= u32::MAX here
    u32::try_from(value - 1).map_err(|_| SeatError::RowOverflow(label.to_string()))
}

/// Inverse of [`row_label_to_index`], producing the upper case label.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn row_index_to_label(index: u32) -> String {
    let mut n = u64::from(index) + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        // rem < 26
        letters.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Convert a 1-based column label into its zero-based index.
///
/// # Errors
///
/// Returns [`SeatError::InvalidColumn`] for non-numeric or zero labels.
pub fn column_label_to_index(label: &str) -> Result<u32, SeatError> {
    let trimmed = label.trim();
    match trimmed.parse::<u32>() {
        Ok(n) if n >= 1 => Ok(n - 1),
        _ => Err(SeatError::InvalidColumn(trimmed.to_string())),
    }
}
