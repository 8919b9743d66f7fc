//! # Path projector
//!
//! Finds the dense path point closest to the vehicle and the signed lateral error to it.
//!
//! The local road direction is the vector from the closest point to the next one, wrapping from
//! the last point back to the first. The error is positive when the vehicle lies on the side of
//! the perpendicular `(-dy, dx)` of that direction, and negative otherwise.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector2;
use serde::Serialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Projects positions onto a closed sequence of path points.
#[derive(Debug, Clone)]
pub struct PathProjector {
    points: Vec<Vector2<f64>>,
}

/// Result of projecting a position onto the path.
#[derive(Debug, Copy, Clone, Serialize, PartialEq)]
pub struct Projection {
    /// Index of the closest path point
    pub closest_index: usize,

    /// Distance to the closest point, signed by which side of the path the position is on
    pub signed_error: f64,

    /// Dot product of the offset from the closest point with the path perpendicular
    pub steer_direction: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ProjectorError {
    #[error("A path needs at least 2 points to have a direction, found {0}")]
    TooFewPoints(usize),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PathProjector {
    /// Create a projector over the given closed sequence of points.
    pub fn new(points: Vec<Vector2<f64>>) -> Result<Self, ProjectorError> {
        if points.len() < 2 {
            return Err(ProjectorError::TooFewPoints(points.len()));
        }

        Ok(Self { points })
    }

    /// Number of path points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// The path points.
    pub fn points(&self) -> &[Vector2<f64>] {
        &self.points
    }

    /// Project the position onto the path.
    pub fn project(&self, position: &Vector2<f64>) -> Projection {
        let (closest_index, dist) = self.closest(position);

        let closest = self.points[closest_index];
        let road_direction = self.direction(closest_index);
        let perpendicular = Vector2::new(-road_direction[1], road_direction[0]);

        let steer_direction = (position - closest).dot(&perpendicular);

        let signed_error = if steer_direction > 0.0 { dist } else { -dist };

        Projection {
            closest_index,
            signed_error,
            steer_direction,
        }
    }

    /// Vector from the point at `index` to the next point along the path.
    pub fn direction(&self, index: usize) -> Vector2<f64> {
        let next = (index + 1) % self.points.len();
        self.points[next] - self.points[index]
    }

    /// Index of and distance to the closest point. Ties go to the lowest index.
    fn closest(&self, position: &Vector2<f64>) -> (usize, f64) {
        let mut best_index = 0;
        let mut best_dist_sq = f64::INFINITY;

        for (i, p) in self.points.iter().enumerate() {
            let d = (p - position).norm_squared();
            if d < best_dist_sq {
                best_index = i;
                best_dist_sq = d;
            }
        }

        (best_index, best_dist_sq.sqrt())
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
