//! Sweeping a (scale factor, time) profile about the time axis.

use crate::error::{Result, UniverseError};
use crate::friedmann::rotation_matrix;
use crate::trajectory::Trajectory;
use nalgebra::{DMatrix, Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use tracing::debug;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Evenly spaced azimuths. Open grids cover [0, 2pi); closed grids end on 2pi
/// so the rendered surface has no visible seam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AngularGrid {
    angles: Vec<f64>,
    closed: bool,
}

impl AngularGrid {
    pub const DEFAULT_SAMPLES: usize = 50;

    pub fn new(samples: usize, closed: bool) -> Result<Self> {
        if samples < 2 {
            return Err(UniverseError::invalid(
                "angular_samples",
                format!("need at least 2 samples, got {}", samples),
            ));
        }
        Ok(Self::evenly_spaced(samples, closed))
    }

    fn evenly_spaced(samples: usize, closed: bool) -> Self {
        let intervals = if closed { samples - 1 } else { samples };
        let step = TAU / intervals as f64;
        let angles = (0..samples).map(|i| i as f64 * step).collect();
        Self { angles, closed }
    }

    pub fn angles(&self) -> &[f64] {
        &self.angles
    }

    pub fn len(&self) -> usize {
        self.angles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.angles.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Default for AngularGrid {
    fn default() -> Self {
        Self::evenly_spaced(Self::DEFAULT_SAMPLES, false)
    }
}

/// Three (M, N) grids; entry (j, i) is the rotated coordinate of trajectory
/// sample j at angle i.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    pub x: DMatrix<f64>,
    pub y: DMatrix<f64>,
    pub z: DMatrix<f64>,
}

impl Surface {
    /// (rows, columns) = (trajectory samples, angular samples).
    pub fn shape(&self) -> (usize, usize) {
        self.x.shape()
    }

    pub fn point(&self, row: usize, column: usize) -> Vector3<f64> {
        Vector3::new(
            self.x[(row, column)],
            self.y[(row, column)],
            self.z[(row, column)],
        )
    }

    /// Row-major copies of x, y, z for renderers expecting flat buffers.
    pub fn to_row_major(&self) -> [Vec<f64>; 3] {
        [
            row_major(&self.x),
            row_major(&self.y),
            row_major(&self.z),
        ]
    }
}

fn row_major(matrix: &DMatrix<f64>) -> Vec<f64> {
    // nalgebra stores column-major; transpose before flattening.
    matrix.transpose().as_slice().to_vec()
}

/// Rotates every profile vector (a_j, 0, t_j) through every grid angle.
pub fn expand_to_surface(trajectory: &Trajectory, grid: &AngularGrid) -> Surface {
    let rotations: Vec<Matrix3<f64>> = grid
        .angles()
        .iter()
        .map(|&theta| rotation_matrix(theta))
        .collect();
    let profile = trajectory.profile();
    let (rows, columns) = (profile.len(), rotations.len());
    debug!(rows, columns, "expanding trajectory into surface");

    let sweep = |vector: &Vector3<f64>| -> Vec<Vector3<f64>> {
        rotations.iter().map(|rotation| rotation * vector).collect()
    };

    #[cfg(feature = "parallel")]
    let swept: Vec<Vec<Vector3<f64>>> = profile.par_iter().map(sweep).collect();
    #[cfg(not(feature = "parallel"))]
    let swept: Vec<Vec<Vector3<f64>>> = profile.iter().map(sweep).collect();

    Surface {
        x: DMatrix::from_fn(rows, columns, |j, i| swept[j][i].x),
        y: DMatrix::from_fn(rows, columns, |j, i| swept[j][i].y),
        z: DMatrix::from_fn(rows, columns, |j, i| swept[j][i].z),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::friedmann::rotate;
    use crate::trajectory::Trajectory;

    fn cone() -> Trajectory {
        let times = vec![-1.0, -0.5, 0.0, 1.0, 2.0];
        let scale_factors = times.iter().map(|t| 1.0 + 0.5 * t).collect();
        Trajectory::from_samples(times, scale_factors).expect("ascending samples")
    }

    #[test]
    fn open_grid_stops_short_of_two_pi() {
        let grid = AngularGrid::new(4, false).expect("grid");
        let expected = [0.0, TAU / 4.0, TAU / 2.0, 3.0 * TAU / 4.0];
        for (a, b) in grid.angles().iter().zip(expected) {
            assert!((a - b).abs() < 1e-12);
        }
        assert!(!grid.is_closed());
    }

    #[test]
    fn closed_grid_ends_on_two_pi() {
        let grid = AngularGrid::new(5, true).expect("grid");
        assert_eq!(grid.len(), 5);
        assert_eq!(grid.angles()[0], 0.0);
        assert!((grid.angles()[4] - TAU).abs() < 1e-12);
    }

    #[test]
    fn default_grid_has_fifty_open_samples() {
        let grid = AngularGrid::default();
        assert_eq!(grid, AngularGrid::new(50, false).expect("grid"));
    }

    #[test]
    fn grids_with_fewer_than_two_samples_are_rejected() {
        assert!(AngularGrid::new(0, false).is_err());
        assert!(AngularGrid::new(1, true).is_err());
        assert!(AngularGrid::new(2, true).is_ok());
    }

    #[test]
    fn surface_has_trajectory_by_angle_shape() {
        let trajectory = cone();
        let grid = AngularGrid::new(7, false).expect("grid");
        let surface = expand_to_surface(&trajectory, &grid);
        assert_eq!(surface.shape(), (5, 7));
        assert_eq!(surface.y.shape(), (5, 7));
        assert_eq!(surface.z.shape(), (5, 7));
    }

    #[test]
    fn surface_cells_are_rotated_profile_points() {
        let trajectory = cone();
        let grid = AngularGrid::new(9, true).expect("grid");
        let surface = expand_to_surface(&trajectory, &grid);
        for (j, (&t, &a)) in trajectory.times().iter().zip(trajectory.scale_factors()).enumerate() {
            for (i, &theta) in grid.angles().iter().enumerate() {
                let expected = rotate(theta, &Vector3::new(a, 0.0, t));
                assert!((surface.point(j, i) - expected).norm() < 1e-12);
                // time is the height of every ring
                assert_eq!(surface.z[(j, i)], t);
            }
            // first column is the unrotated profile
            assert!((surface.x[(j, 0)] - a).abs() < 1e-15);
        }
    }

    #[test]
    fn row_major_export_walks_angles_fastest() {
        let trajectory = cone();
        let grid = AngularGrid::new(3, false).expect("grid");
        let surface = expand_to_surface(&trajectory, &grid);
        let [x, _, z] = surface.to_row_major();
        assert_eq!(x.len(), 15);
        assert_eq!(x[1], surface.x[(0, 1)]);
        assert_eq!(x[3], surface.x[(1, 0)]);
        assert_eq!(z[14], 2.0);
    }
}
