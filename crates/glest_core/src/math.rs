//! Fixed-point math utilities for deterministic simulation.
//!
//! Every quantity that feeds back into world state (positions, speeds,
//! progress fractions, damage multipliers) is a [`Fixed`]. Decimal values
//! coming from data files are converted once at load time through
//! [`decimal_serde`]; nothing in the tick path touches a float.

use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

/// Fixed-point number type for all simulation math.
///
/// Uses 32 bits for integer part and 32 bits for fractional part.
/// Range: approximately -2,147,483,648 to 2,147,483,647
/// Precision: approximately 0.00000000023
pub type Fixed = I32F32;

/// Grid cell coordinate `(x, y)`.
pub type CellCoord = (i32, i32);

/// Fixed-point 2D vector.
///
/// World coordinates are anchored to the map grid: cell `(x, y)` covers
/// `[x, x+1) × [y, y+1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vec2Fixed {
    /// X coordinate.
    #[serde(with = "fixed_serde")]
    pub x: Fixed,
    /// Y coordinate.
    #[serde(with = "fixed_serde")]
    pub y: Fixed,
}

/// Serde support for fixed-point numbers.
///
/// Serializes fixed-point numbers as their raw bit representation (i64)
/// to preserve exact precision across serialization boundaries.
pub mod fixed_serde {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a fixed-point number as its raw bit representation.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.to_bits().serialize(serializer)
    }

    /// Deserialize a fixed-point number from its raw bit representation.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = i64::deserialize(deserializer)?;
        Ok(Fixed::from_bits(bits))
    }
}

/// Serde support for human-written decimals in data files.
///
/// Reads a decimal literal (`1.5`, `60`) and converts it to [`Fixed`].
/// The conversion is exact for the same input text on every platform, so
/// catalogs loaded from the same file produce bit-identical simulations.
pub mod decimal_serde {
    use super::Fixed;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize a fixed-point number as a decimal.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(value.to_num::<f64>())
    }

    /// Deserialize a decimal into a fixed-point number.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        Fixed::checked_from_num(value)
            .ok_or_else(|| D::Error::custom(format!("decimal {value} out of fixed-point range")))
    }
}

impl Vec2Fixed {
    /// Create a new fixed-point vector.
    #[must_use]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Zero vector.
    pub const ZERO: Self = Self {
        x: Fixed::ZERO,
        y: Fixed::ZERO,
    };

    /// Position of the anchor corner of a grid cell.
    #[must_use]
    pub fn from_cell(cell: CellCoord) -> Self {
        Self::new(Fixed::from_num(cell.0), Fixed::from_num(cell.1))
    }

    /// Grid cell containing this position.
    #[must_use]
    pub fn cell(self) -> CellCoord {
        (
            self.x.floor().to_num::<i32>(),
            self.y.floor().to_num::<i32>(),
        )
    }

    /// Calculate squared distance (avoids sqrt for comparisons).
    #[must_use]
    pub fn distance_squared(self, other: Self) -> Fixed {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Euclidean distance.
    #[must_use]
    pub fn distance(self, other: Self) -> Fixed {
        fixed_sqrt(self.distance_squared(other))
    }

    /// Dot product of two vectors.
    #[must_use]
    pub fn dot(self, other: Self) -> Fixed {
        self.x * other.x + self.y * other.y
    }

    /// Normalize vector using fixed-point math.
    #[must_use]
    pub fn normalize(self) -> Self {
        let len = fixed_sqrt(self.dot(self));
        if len == Fixed::ZERO {
            return Self::ZERO;
        }
        Self::new(self.x / len, self.y / len)
    }

    /// Move toward `target` by at most `max_step`.
    ///
    /// Returns the new position and whether `target` was reached. When the
    /// remaining distance fits inside the step the result is exactly
    /// `target`, so movement never overshoots.
    #[must_use]
    pub fn step_towards(self, target: Self, max_step: Fixed) -> (Self, bool) {
        let remaining = self.distance(target);
        if remaining <= max_step {
            return (target, true);
        }
        let ratio = max_step / remaining;
        let next = Self::new(
            self.x + (target.x - self.x) * ratio,
            self.y + (target.y - self.y) * ratio,
        );
        (next, false)
    }

    /// Distance from this point to an axis-aligned rectangle.
    ///
    /// Zero when the point is inside.
    #[must_use]
    pub fn distance_to_rect(self, min: Self, max: Self) -> Fixed {
        let dx = if self.x < min.x {
            min.x - self.x
        } else if self.x > max.x {
            self.x - max.x
        } else {
            Fixed::ZERO
        };
        let dy = if self.y < min.y {
            min.y - self.y
        } else if self.y > max.y {
            self.y - max.y
        } else {
            Fixed::ZERO
        };
        fixed_sqrt(dx * dx + dy * dy)
    }
}

/// Computes the square root of a fixed-point number using binary search.
///
/// Stops once the bracket is a single fixed-point step wide.
pub fn fixed_sqrt(value: Fixed) -> Fixed {
    if value <= Fixed::ZERO {
        return Fixed::ZERO;
    }

    let mut low = Fixed::ZERO;
    let mut high = if value > Fixed::ONE { value } else { Fixed::ONE };

    for _ in 0..64 {
        if high - low <= Fixed::DELTA {
            break;
        }
        let mid = low + (high - low) / Fixed::from_num(2);
        if mid.saturating_mul(mid) <= value {
            low = mid;
        } else {
            high = mid;
        }
    }

    low
}

/// Convert a duration in seconds into a whole number of ticks, rounding up.
///
/// Zero and negative durations map to zero ticks.
#[must_use]
pub fn seconds_to_ticks(seconds: Fixed, ticks_per_second: u32) -> u64 {
    if seconds <= Fixed::ZERO {
        return 0;
    }
    let ticks = (seconds * Fixed::from_num(ticks_per_second)).ceil();
    ticks.to_num::<u64>()
}

impl std::ops::Add for Vec2Fixed {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl std::ops::Sub for Vec2Fixed {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec2(x: i32, y: i32) -> Vec2Fixed {
        Vec2Fixed::new(Fixed::from_num(x), Fixed::from_num(y))
    }

    #[test]
    fn test_vec2_distance_squared() {
        let a = vec2(3, 0);
        let b = vec2(0, 4);
        // 3² + 4² = 25
        assert_eq!(a.distance_squared(b), Fixed::from_num(25));
    }

    #[test]
    fn test_distance_is_exact_for_pythagorean_triples() {
        assert_eq!(vec2(0, 0).distance(vec2(3, 4)), Fixed::from_num(5));
        assert_eq!(vec2(10, 10).distance(vec2(20, 10)), Fixed::from_num(10));
    }

    #[test]
    fn test_step_towards_does_not_overshoot() {
        let start = vec2(10, 10);
        let target = vec2(12, 10);
        let (pos, arrived) = start.step_towards(target, Fixed::from_num(5));
        assert!(arrived);
        assert_eq!(pos, target);

        let (pos, arrived) = start.step_towards(target, Fixed::ONE);
        assert!(!arrived);
        assert_eq!(pos, vec2(11, 10));
    }

    #[test]
    fn test_cell_floors_fractional_positions() {
        let p = Vec2Fixed::new(Fixed::from_num(3.75), Fixed::from_num(0.5));
        assert_eq!(p.cell(), (3, 0));
        let n = Vec2Fixed::new(Fixed::from_num(-0.5), Fixed::ZERO);
        assert_eq!(n.cell(), (-1, 0));
    }

    #[test]
    fn test_distance_to_rect() {
        let min = vec2(4, 4);
        let max = vec2(6, 6);
        assert_eq!(vec2(5, 5).distance_to_rect(min, max), Fixed::ZERO);
        assert_eq!(vec2(3, 5).distance_to_rect(min, max), Fixed::ONE);
        assert_eq!(vec2(9, 10).distance_to_rect(min, max), Fixed::from_num(5));
    }

    #[test]
    fn test_seconds_to_ticks_rounds_up() {
        assert_eq!(seconds_to_ticks(Fixed::ONE, 60), 60);
        assert_eq!(seconds_to_ticks(Fixed::from_num(0.01), 60), 1);
        assert_eq!(seconds_to_ticks(Fixed::ZERO, 60), 0);
    }

    #[test]
    fn test_fixed_determinism() {
        // Same operations must produce identical results
        let a = Fixed::from_num(1) / Fixed::from_num(3);
        let b = Fixed::from_num(1) / Fixed::from_num(3);
        assert_eq!(a, b);
        assert_eq!(a * Fixed::from_num(7), b * Fixed::from_num(7));
    }

    #[test]
    fn test_vec2_normalize() {
        let norm = vec2(3, 4).normalize();
        let len_sq = norm.dot(norm);
        let epsilon = Fixed::ONE / Fixed::from_num(10000);
        assert!(
            (len_sq - Fixed::ONE).abs() < epsilon,
            "normalized vector length² should be ~1, got {len_sq:?}"
        );
    }
}
