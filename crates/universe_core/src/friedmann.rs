//! The Friedmann equation for the normalized scale factor and the rotation
//! used to sweep its trajectory into a surface of revolution.

use crate::error::{ensure_finite, Result};
use crate::traits::{DynamicalSystem, Scalar};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Sign of the spatial curvature term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurvatureSign {
    Open,
    Flat,
    Closed,
}

impl CurvatureSign {
    pub fn from_value(k: f64) -> Self {
        if k > 0.0 {
            CurvatureSign::Closed
        } else if k < 0.0 {
            CurvatureSign::Open
        } else {
            CurvatureSign::Flat
        }
    }
}

/// Inputs of one computation. `curvature_sign` and `lambda` are carried for
/// classification only; the right-hand side depends on `sigma_0` and `q_0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CosmologicalParameters {
    /// Density parameter.
    pub sigma_0: f64,
    /// Deceleration parameter.
    pub q_0: f64,
    /// K, one of -1, 0, +1 when derived.
    pub curvature_sign: f64,
    /// Cosmological constant term.
    pub lambda: f64,
}

impl CosmologicalParameters {
    /// Uses caller-supplied K and Lambda as is.
    pub fn new(sigma_0: f64, q_0: f64, curvature_sign: f64, lambda: f64) -> Result<Self> {
        let params = Self {
            sigma_0,
            q_0,
            curvature_sign,
            lambda,
        };
        params.validate()?;
        Ok(params)
    }

    /// Derives K = sign(3 sigma_0 - q_0 - 1) and Lambda = 3 (sigma_0 - q_0).
    pub fn from_density_and_deceleration(sigma_0: f64, q_0: f64) -> Result<Self> {
        ensure_finite("sigma_0", sigma_0)?;
        ensure_finite("q_0", q_0)?;
        Self::new(
            sigma_0,
            q_0,
            sign(3.0 * sigma_0 - q_0 - 1.0),
            3.0 * (sigma_0 - q_0),
        )
    }

    pub fn validate(&self) -> Result<()> {
        ensure_finite("sigma_0", self.sigma_0)?;
        ensure_finite("q_0", self.q_0)?;
        ensure_finite("curvature_sign", self.curvature_sign)?;
        ensure_finite("lambda", self.lambda)
    }

    pub fn curvature(&self) -> CurvatureSign {
        CurvatureSign::from_value(self.curvature_sign)
    }

    pub fn system(&self) -> FriedmannSystem {
        FriedmannSystem {
            sigma_0: self.sigma_0,
            q_0: self.q_0,
        }
    }
}

/// sign(0) = 0, unlike `f64::signum`.
fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// (a, da/dt) -> (da/dt, -sigma_0 / a^2 + (sigma_0 - q_0) a)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FriedmannSystem {
    pub sigma_0: f64,
    pub q_0: f64,
}

impl<T: Scalar> DynamicalSystem<T> for FriedmannSystem {
    fn dimension(&self) -> usize {
        2
    }

    fn apply(&self, _t: T, x: &[T], out: &mut [T]) {
        let sigma = T::from_f64(self.sigma_0).unwrap_or_else(T::nan);
        let q = T::from_f64(self.q_0).unwrap_or_else(T::nan);
        let a = x[0];
        out[0] = x[1];
        out[1] = -sigma / (a * a) + (sigma - q) * a;
    }
}

/// Right-hand side of the Friedmann equation. Non-finite when `a == 0`.
pub fn ode_right_hand_side(time: f64, state: [f64; 2], sigma_0: f64, q_0: f64) -> [f64; 2] {
    let mut out = [0.0; 2];
    let system = FriedmannSystem { sigma_0, q_0 };
    DynamicalSystem::<f64>::apply(&system, time, &state, &mut out);
    out
}

/// Right-handed rotation by `theta` about the third (time) axis.
pub fn rotation_matrix(theta: f64) -> Matrix3<f64> {
    let (sin, cos) = theta.sin_cos();
    Matrix3::new(cos, -sin, 0.0, sin, cos, 0.0, 0.0, 0.0, 1.0)
}

pub fn rotate(theta: f64, vector: &Vector3<f64>) -> Vector3<f64> {
    rotation_matrix(theta) * vector
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solvers::Tsit5;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn assert_vec_close(a: &Vector3<f64>, b: &Vector3<f64>, tol: f64) {
        assert!((a - b).norm() < tol, "{:?} != {:?}", a, b);
    }

    #[test]
    fn right_hand_side_matches_closed_form() {
        let rhs = ode_right_hand_side(0.0, [1.0, 1.0], 1.0, 0.5);
        assert_eq!(rhs[0], 1.0);
        assert!((rhs[1] - (-1.0 + 0.5)).abs() < 1e-15);

        let rhs = ode_right_hand_side(3.0, [2.0, -0.25], 0.3, -0.1);
        assert_eq!(rhs[0], -0.25);
        assert!((rhs[1] - (-0.3 / 4.0 + 0.4 * 2.0)).abs() < 1e-15);
    }

    #[test]
    fn right_hand_side_ignores_time() {
        let a = ode_right_hand_side(-1.0, [0.7, 0.2], 0.5, 0.1);
        let b = ode_right_hand_side(5.0, [0.7, 0.2], 0.5, 0.1);
        assert_eq!(a, b);
    }

    #[test]
    fn right_hand_side_is_non_finite_at_zero_scale_factor() {
        let rhs = ode_right_hand_side(0.0, [0.0, 1.0], 0.3, 0.1);
        assert!(!rhs[1].is_finite());
    }

    #[test]
    fn zero_density_and_deceleration_give_free_expansion() {
        let rhs = ode_right_hand_side(0.0, [2.5, 1.0], 0.0, 0.0);
        assert_eq!(rhs, [1.0, 0.0]);
    }

    #[test]
    fn system_evaluates_in_single_precision() {
        let system = FriedmannSystem {
            sigma_0: 1.0,
            q_0: 0.5,
        };
        let mut out = [0.0f32; 2];
        DynamicalSystem::<f32>::apply(&system, 0.0, &[1.0, 1.0], &mut out);
        assert!((out[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn single_precision_step_tracks_double_precision() {
        let system = FriedmannSystem {
            sigma_0: 1.0,
            q_0: 0.5,
        };
        let mut single = Tsit5::<f32>::new(2);
        let mut double = Tsit5::<f64>::new(2);
        let mut out_single = [0.0f32; 2];
        let mut out_double = [0.0f64; 2];

        single.prime(&system, 0.0, &[1.0, 1.0]);
        single.attempt(&system, 0.0, &[1.0, 1.0], 0.1, &mut out_single);
        double.prime(&system, 0.0, &[1.0, 1.0]);
        double.attempt(&system, 0.0, &[1.0, 1.0], 0.1, &mut out_double);

        for i in 0..2 {
            assert!((out_single[i] as f64 - out_double[i]).abs() < 1e-5);
        }
        assert!(out_double[0] > 1.0);
    }

    #[test]
    fn derived_parameters_follow_sign_and_lambda_rules() {
        let params = CosmologicalParameters::from_density_and_deceleration(0.3, -0.1)
            .expect("finite parameters");
        assert!((params.lambda - 1.2).abs() < 1e-12);
        assert!([-1.0, 0.0, 1.0].contains(&params.curvature_sign));

        let eds = CosmologicalParameters::from_density_and_deceleration(0.5, 0.5).expect("eds");
        assert_eq!(eds.curvature_sign, 0.0);
        assert_eq!(eds.curvature(), CurvatureSign::Flat);
        assert_eq!(eds.lambda, 0.0);

        let closed =
            CosmologicalParameters::from_density_and_deceleration(1.0, 1.0).expect("closed");
        assert_eq!(closed.curvature(), CurvatureSign::Closed);

        let open = CosmologicalParameters::from_density_and_deceleration(0.0, 0.0).expect("open");
        assert_eq!(open.curvature(), CurvatureSign::Open);
    }

    #[test]
    fn non_finite_parameters_are_rejected() {
        assert!(CosmologicalParameters::from_density_and_deceleration(f64::NAN, 0.0).is_err());
        assert!(CosmologicalParameters::from_density_and_deceleration(0.0, f64::INFINITY).is_err());
        assert!(CosmologicalParameters::new(0.5, 0.5, f64::NAN, 0.0).is_err());
    }

    #[test]
    fn rotate_by_zero_is_identity() {
        let v = Vector3::new(1.5, -0.3, 2.0);
        assert_vec_close(&rotate(0.0, &v), &v, 1e-15);
    }

    #[test]
    fn rotate_quarter_turn_maps_x_to_y() {
        let v = Vector3::new(2.0, 0.0, 4.0);
        assert_vec_close(&rotate(FRAC_PI_2, &v), &Vector3::new(0.0, 2.0, 4.0), 1e-12);
    }

    #[test]
    fn rotate_preserves_height_and_radius() {
        let v = Vector3::new(0.8, 0.6, -3.0);
        for i in 0..37 {
            let theta = -PI + i as f64 * 0.3;
            let r = rotate(theta, &v);
            assert!((r.z - v.z).abs() < 1e-15);
            assert!((r.xy().norm() - v.xy().norm()).abs() < 1e-12);
        }
    }

    #[test]
    fn rotate_is_two_pi_periodic() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        for theta in [0.0, 0.4, 2.0, -5.0] {
            assert_vec_close(&rotate(theta, &v), &rotate(theta + 2.0 * PI, &v), 1e-12);
        }
    }
}
