//! Inclusive height-interval algebra.
//!
//! A `HeightRange` is a closed interval of block heights. The canonical
//! empty value is `(0, -1)`; any constructor that would produce an
//! inverted interval collapses to it. Unions and subtractions that would
//! produce a gap or a split are caller errors, never silently widened.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A closed integer interval of block heights.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeightRange {
    /// Lowest height in the range.
    pub min_height: i64,
    /// Highest height in the range, inclusive.
    pub max_height: i64,
}

impl HeightRange {
    /// The canonical empty range.
    pub const EMPTY: HeightRange = HeightRange {
        min_height: 0,
        max_height: -1,
    };

    /// Create a range, collapsing inverted bounds to the canonical empty.
    pub fn new(min_height: i64, max_height: i64) -> Self {
        if min_height > max_height {
            Self::EMPTY
        } else {
            HeightRange {
                min_height,
                max_height,
            }
        }
    }

    /// The range covering `count` heights starting at `first_height`.
    pub fn from_first_count(first_height: u32, count: u32) -> Self {
        if count == 0 {
            return Self::EMPTY;
        }
        HeightRange {
            min_height: first_height as i64,
            max_height: first_height as i64 + count as i64 - 1,
        }
    }

    /// Number of heights contained, zero when empty.
    pub fn length(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            (self.max_height - self.min_height + 1) as u64
        }
    }

    /// True when the range contains no heights.
    pub fn is_empty(&self) -> bool {
        self.min_height > self.max_height
    }

    /// True when `height` falls within the range.
    pub fn contains_height(&self, height: i64) -> bool {
        !self.is_empty() && height >= self.min_height && height <= self.max_height
    }

    /// True when every height of `other` falls within this range.
    ///
    /// The empty range is contained in everything.
    pub fn contains_range(&self, other: &HeightRange) -> bool {
        if other.is_empty() {
            return true;
        }
        self.contains_height(other.min_height) && self.contains_height(other.max_height)
    }

    /// Component-wise intersection; may be empty.
    pub fn intersect(&self, other: &HeightRange) -> HeightRange {
        if self.is_empty() || other.is_empty() {
            return Self::EMPTY;
        }
        HeightRange::new(
            self.min_height.max(other.min_height),
            self.max_height.min(other.max_height),
        )
    }

    /// Union of two ranges that overlap, touch, or where one is empty.
    ///
    /// A would-be gap is a [`CoreError::RangeGap`]: this type never
    /// represents disjoint sets.
    pub fn union(&self, other: &HeightRange) -> Result<HeightRange, CoreError> {
        if self.is_empty() {
            return Ok(*other);
        }
        if other.is_empty() {
            return Ok(*self);
        }
        let touch_or_overlap = self.min_height <= other.max_height + 1
            && other.min_height <= self.max_height + 1;
        if !touch_or_overlap {
            return Err(CoreError::RangeGap {
                a: *self,
                b: *other,
            });
        }
        Ok(HeightRange::new(
            self.min_height.min(other.min_height),
            self.max_height.max(other.max_height),
        ))
    }

    /// Remove `other` from this range, requiring the result to remain a
    /// single interval.
    ///
    /// Subtracting a strict interior sub-range would split the result in
    /// two and is a [`CoreError::RangeSplit`].
    pub fn subtract(&self, other: &HeightRange) -> Result<HeightRange, CoreError> {
        let overlap = self.intersect(other);
        if overlap.is_empty() {
            return Ok(*self);
        }
        if overlap == *self {
            return Ok(Self::EMPTY);
        }
        if overlap.min_height > self.min_height && overlap.max_height < self.max_height {
            return Err(CoreError::RangeSplit {
                a: *self,
                b: *other,
            });
        }
        if overlap.min_height == self.min_height {
            Ok(HeightRange::new(overlap.max_height + 1, self.max_height))
        } else {
            Ok(HeightRange::new(self.min_height, overlap.min_height - 1))
        }
    }

    /// The part of this range strictly above `other`'s maximum height.
    ///
    /// Empty `other` leaves the range unchanged.
    pub fn above(&self, other: &HeightRange) -> HeightRange {
        if other.is_empty() {
            return *self;
        }
        HeightRange::new(self.min_height.max(other.max_height + 1), self.max_height)
    }

    /// Copy of this range capped at `max_height`.
    pub fn with_max_height(&self, max_height: i64) -> HeightRange {
        HeightRange::new(self.min_height, self.max_height.min(max_height))
    }
}

impl fmt::Display for HeightRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "[empty]")
        } else {
            write!(f, "[{}, {}]", self.min_height, self.max_height)
        }
    }
}
