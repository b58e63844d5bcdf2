//! View shapes.

use horizon_common::ChunkCoord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Footprint of a connection's visible area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewShape {
    /// Squared Euclidean distance within radius squared
    #[default]
    Circle,
    /// Chebyshev distance within radius
    Square,
}

impl ViewShape {
    /// Whether `point` is visible from `center` at `radius`.
    #[must_use]
    pub const fn within(self, center: ChunkCoord, point: ChunkCoord, radius: i32) -> bool {
        let r = radius as i64;
        match self {
            Self::Circle => center.distance_squared(point) <= r * r,
            Self::Square => center.chebyshev_distance(point) <= r,
        }
    }

    /// All coordinates visible from `center`, row by row from the north-west.
    #[must_use]
    pub fn enumerate(self, center: ChunkCoord, radius: i32) -> Vec<ChunkCoord> {
        let radius = radius.max(0);
        let side = (2 * radius as usize) + 1;
        let mut out = Vec::with_capacity(side * side);
        for dz in -radius..=radius {
            for dx in -radius..=radius {
                let point = center.offset(dx, dz);
                if self.within(center, point, radius) {
                    out.push(point);
                }
            }
        }
        out
    }
}

impl fmt::Display for ViewShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Circle => write!(f, "circle"),
            Self::Square => write!(f, "square"),
        }
    }
}

impl FromStr for ViewShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "circle" => Ok(Self::Circle),
            "square" => Ok(Self::Square),
            other => Err(format!("unknown view shape '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_square_radius_two() {
        let set = ViewShape::Square.enumerate(ChunkCoord::new(0, 0), 2);
        assert_eq!(set.len(), 25);
        assert_eq!(set.first(), Some(&ChunkCoord::new(-2, -2)));
        assert_eq!(set.last(), Some(&ChunkCoord::new(2, 2)));
    }

    #[test]
    fn test_circle_radius_two() {
        let set = ViewShape::Circle.enumerate(ChunkCoord::new(0, 0), 2);
        assert!(!set.contains(&ChunkCoord::new(2, 2)));
        assert!(set.contains(&ChunkCoord::new(2, 0)));
        assert!(set.contains(&ChunkCoord::new(1, 1)));
        assert_eq!(set.len(), 13);
    }

    #[test]
    fn test_radius_zero_is_center() {
        for shape in [ViewShape::Circle, ViewShape::Square] {
            let center = ChunkCoord::new(7, -9);
            assert_eq!(shape.enumerate(center, 0), vec![center]);
        }
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("Circle".parse::<ViewShape>(), Ok(ViewShape::Circle));
        assert_eq!("square".parse::<ViewShape>(), Ok(ViewShape::Square));
        assert!("hexagon".parse::<ViewShape>().is_err());
        assert_eq!(ViewShape::Square.to_string(), "square");
    }

    proptest! {
        #[test]
        fn prop_circle_points_within_radius(cx in -1000i32..1000, cz in -1000i32..1000, r in 0i32..12) {
            let center = ChunkCoord::new(cx, cz);
            for p in ViewShape::Circle.enumerate(center, r) {
                let (dx, dz) = (i64::from(p.x - cx), i64::from(p.z - cz));
                prop_assert!(dx * dx + dz * dz <= i64::from(r) * i64::from(r));
            }
        }

        #[test]
        fn prop_square_points_within_radius(cx in -1000i32..1000, cz in -1000i32..1000, r in 0i32..12) {
            let center = ChunkCoord::new(cx, cz);
            let set = ViewShape::Square.enumerate(center, r);
            prop_assert_eq!(set.len(), ((2 * r + 1) * (2 * r + 1)) as usize);
            for p in set {
                prop_assert!((p.x - cx).abs().max((p.z - cz).abs()) <= r);
            }
        }
    }
}
